use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Directory holding SysV control scripts.
pub const DEFAULT_SCRIPT_DIR: &str = "/etc/init.d";

fn default_true() -> bool {
    true
}

fn default_restart_delay_ms() -> u64 {
    1000
}

/// On-disk TOML configuration of the service host (all fields optional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory for `<name>.pid`.
    pub pid_dir: Option<PathBuf>,
    /// Directory for the control script (`/etc/init.d` unless overridden).
    pub script_dir: Option<PathBuf>,
    /// Register boot-time start when the service is installed with auto-start.
    #[serde(default = "default_true")]
    pub register_boot: bool,
    /// Pause before relaunching a crashed instance.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    /// File this configuration was read from, forwarded to relaunched instances.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pid_dir: None,
            script_dir: None,
            register_boot: true,
            restart_delay_ms: default_restart_delay_ms(),
            source: None,
        }
    }
}

impl ServiceConfig {
    /// Parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::io(format!("reading {}", path.display()), e))?;
        let mut cfg = Self::parse(&raw)
            .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
        // Relaunched instances run from `/`; keep the path usable there.
        cfg.source = Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        Ok(cfg)
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Look for `<name>.toml` in the system then the user config directory;
    /// fall back to defaults when neither exists.
    pub fn discover(name: &str) -> Result<Self> {
        for candidate in Self::search_paths(name) {
            if candidate.is_file() {
                log::info!("Using config from: {}", candidate.display());
                return Self::load(&candidate);
            }
        }
        log::debug!("No config file for '{name}', using defaults");
        Ok(Self::default())
    }

    fn search_paths(name: &str) -> Vec<PathBuf> {
        let file = format!("{name}.toml");
        let mut paths = Vec::with_capacity(2);

        #[cfg(unix)]
        paths.push(PathBuf::from("/etc").join(name).join(&file));

        #[cfg(windows)]
        paths.push(PathBuf::from(r"C:\ProgramData").join(name).join(&file));

        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(name).join(&file));
        }
        paths
    }

    /// PID directory: configured value, else `/var/run` for root, else the
    /// user runtime dir, else `~/.<name>/run`.
    pub fn resolve_pid_dir(&self, name: &str, privileged: bool) -> PathBuf {
        if let Some(dir) = &self.pid_dir {
            return dir.clone();
        }
        if privileged {
            return PathBuf::from("/var/run");
        }
        dirs::runtime_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{name}")).join("run")))
            .unwrap_or_else(|| std::env::temp_dir().join(name))
    }

    pub fn resolve_script_dir(&self) -> PathBuf {
        self.script_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT_DIR))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Extra arguments every re-invocation of the binary must carry.
    pub fn forwarded_args(&self) -> Vec<String> {
        match &self.source {
            Some(path) => vec!["--config".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = ServiceConfig::parse("").unwrap();
        assert!(cfg.pid_dir.is_none());
        assert!(cfg.register_boot);
        assert_eq!(cfg.restart_delay(), Duration::from_secs(1));
        assert_eq!(cfg.resolve_script_dir(), PathBuf::from("/etc/init.d"));
    }

    #[test]
    fn explicit_values_override() {
        let cfg = ServiceConfig::parse(
            r#"
pid_dir = "/tmp/pids"
script_dir = "/tmp/init.d"
register_boot = false
restart_delay_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(cfg.resolve_pid_dir("svc", true), PathBuf::from("/tmp/pids"));
        assert_eq!(cfg.resolve_script_dir(), PathBuf::from("/tmp/init.d"));
        assert!(!cfg.register_boot);
        assert_eq!(cfg.restart_delay(), Duration::from_millis(250));
    }

    #[test]
    fn root_defaults_to_var_run() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.resolve_pid_dir("svc", true), PathBuf::from("/var/run"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ServiceConfig::parse("restart_delay_ms = \"soon\"").is_err());
    }

    #[test]
    fn load_records_source_and_forwards_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.toml");
        std::fs::write(&path, "register_boot = false\n").unwrap();

        let cfg = ServiceConfig::load(&path).unwrap();
        let canonical = path.canonicalize().unwrap();
        assert_eq!(cfg.source.as_deref(), Some(canonical.as_path()));
        assert_eq!(
            cfg.forwarded_args(),
            vec!["--config".to_string(), canonical.display().to_string()]
        );
        assert!(ServiceConfig::default().forwarded_args().is_empty());
    }
}
