//! SysV control script generation, installation and boot registration.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::file_ops::write_file_atomic;
use crate::error::{Result, ServiceError};

/// Inputs for rendering a control script.
#[derive(Debug, Clone)]
pub(super) struct ScriptConfig<'a> {
    pub service_name: &'a str,
    pub description: &'a str,
    /// Absolute path of the binary that hosts the service.
    pub executable: &'a Path,
    /// Arguments appended after the lifecycle token (e.g. `--config <path>`).
    pub extra_args: &'a [String],
    pub pid_file: &'a Path,
    pub auto_start: bool,
}

/// Render the init script. `start`/`stop` re-enter the binary with the
/// matching lifecycle token; `restart` is stop then start.
pub(super) fn render(config: &ScriptConfig) -> String {
    let mut content = String::with_capacity(1024);

    content.push_str("#!/bin/sh\n");
    content.push_str("### BEGIN INIT INFO\n");
    content.push_str(&format!("# Provides:          {}\n", config.service_name));
    content.push_str("# Required-Start:    $remote_fs $syslog\n");
    content.push_str("# Required-Stop:     $remote_fs $syslog\n");
    if config.auto_start {
        content.push_str("# Default-Start:     2 3 4 5\n");
        content.push_str("# Default-Stop:      0 1 6\n");
    } else {
        content.push_str("# Default-Start:\n");
        content.push_str("# Default-Stop:      0 1 6\n");
    }
    content.push_str(&format!(
        "# Short-Description: {}\n",
        single_line(config.description)
    ));
    content.push_str("### END INIT INFO\n\n");

    let mut command = shell_quote(&config.executable.display().to_string());
    command.push_str(" \"$1\"");
    for arg in config.extra_args {
        command.push(' ');
        command.push_str(&shell_quote(arg));
    }
    content.push_str(&format!(
        "PID_FILE={}\n\n",
        shell_quote(&config.pid_file.display().to_string())
    ));
    content.push_str("run_service() {\n");
    content.push_str(&format!("    {command}\n"));
    content.push_str("}\n\n");

    content.push_str("case \"$1\" in\n");
    content.push_str("    start|stop)\n");
    content.push_str("        run_service \"$1\"\n");
    content.push_str("        ;;\n");
    content.push_str("    restart)\n");
    content.push_str("        run_service stop\n");
    content.push_str("        run_service start\n");
    content.push_str("        ;;\n");
    content.push_str("    status)\n");
    content.push_str("        if [ -f \"$PID_FILE\" ]; then\n");
    content.push_str(&format!(
        "            echo \"{} is running (pid $(cat \"$PID_FILE\"))\"\n",
        config.service_name
    ));
    content.push_str("            exit 0\n");
    content.push_str("        fi\n");
    content.push_str(&format!("        echo \"{} is stopped\"\n", config.service_name));
    content.push_str("        exit 3\n");
    content.push_str("        ;;\n");
    content.push_str("    *)\n");
    content.push_str("        echo \"Usage: $0 {start|stop|restart|status}\" >&2\n");
    content.push_str("        exit 2\n");
    content.push_str("        ;;\n");
    content.push_str("esac\n");

    content
}

/// Write the script and mark it executable.
pub(super) fn install_script(config: &ScriptConfig, script_path: &Path) -> Result<()> {
    write_file_atomic(script_path, &render(config), 0o755)
}

/// Delete the script. A missing script is a failure.
pub(super) fn remove_script(script_path: &Path) -> Result<()> {
    fs::remove_file(script_path)
        .map_err(|e| ServiceError::io(format!("removing {}", script_path.display()), e))
}

/// Boot registration tool on `PATH`, if any.
pub(super) fn find_boot_tool() -> Option<PathBuf> {
    which::which("update-rc.d").ok()
}

/// `update-rc.d <name> defaults`, when the tool exists.
pub(super) fn enable_boot_start(tool: Option<&Path>, service_name: &str) -> Result<()> {
    run_boot_tool(tool, &[service_name, "defaults"])
}

/// `update-rc.d -f <name> remove`, when the tool exists.
pub(super) fn disable_boot_start(tool: Option<&Path>, service_name: &str) -> Result<()> {
    run_boot_tool(tool, &["-f", service_name, "remove"])
}

fn run_boot_tool(tool: Option<&Path>, args: &[&str]) -> Result<()> {
    let Some(tool) = tool else {
        log::warn!("update-rc.d not found, boot-time start left unchanged");
        return Ok(());
    };

    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|e| ServiceError::io(format!("failed to execute {}", tool.display()), e))?;

    if !output.status.success() {
        return Err(ServiceError::OperationFailed(format!(
            "{} {} failed: {}",
            tool.display(),
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-quote for POSIX sh.
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample<'a>(exe: &'a Path, pid: &'a Path, extra: &'a [String]) -> ScriptConfig<'a> {
        ScriptConfig {
            service_name: "myservice",
            description: "My nice\nlittle test service",
            executable: exe,
            extra_args: extra,
            pid_file: pid,
            auto_start: true,
        }
    }

    #[test]
    fn script_invokes_binary_with_lifecycle_tokens() {
        let exe = PathBuf::from("/opt/my service/bin/myservice");
        let pid = PathBuf::from("/var/run/myservice.pid");
        let script = render(&sample(&exe, &pid, &[]));

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("# Provides:          myservice\n"));
        assert!(script.contains("# Short-Description: My nice little test service\n"));
        assert!(script.contains("    '/opt/my service/bin/myservice' \"$1\"\n"));
        assert!(script.contains("PID_FILE='/var/run/myservice.pid'\n"));
        assert!(script.contains("    start|stop)\n        run_service \"$1\"\n"));
        assert!(script.contains("        run_service stop\n        run_service start\n"));
        assert!(script.contains("# Default-Start:     2 3 4 5\n"));
    }

    #[test]
    fn demand_start_has_no_runlevels() {
        let exe = PathBuf::from("/usr/bin/svc");
        let pid = PathBuf::from("/run/svc.pid");
        let mut cfg = sample(&exe, &pid, &[]);
        cfg.auto_start = false;
        assert!(render(&cfg).contains("# Default-Start:\n"));
    }

    #[test]
    fn forwarded_args_follow_the_token() {
        let exe = PathBuf::from("/usr/bin/svc");
        let pid = PathBuf::from("/run/svc.pid");
        let extra = vec!["--config".to_string(), "/etc/svc/svc.toml".to_string()];
        let script = render(&sample(&exe, &pid, &extra));
        assert!(script.contains("    '/usr/bin/svc' \"$1\" '--config' '/etc/svc/svc.toml'\n"));
    }

    #[test]
    fn failing_boot_tool_is_reported() {
        let err = enable_boot_start(Some(Path::new("false")), "svc").unwrap_err();
        assert!(matches!(err, ServiceError::OperationFailed(_)));
        assert!(disable_boot_start(None, "svc").is_ok());
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
