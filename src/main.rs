use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::{info, warn};
use servicekit::{ServiceDescriptor, ServiceHooks, ShutdownSignal};

const HEARTBEAT: Duration = Duration::from_secs(10);

/// File that lifecycle events are appended to as `<event> <pid>` lines.
const MARKER_ENV: &str = "SERVICEKITD_MARKER";

/// Demo payload: logs a heartbeat until asked to stop.
#[derive(Default)]
struct HeartbeatService {
    beats: u64,
    marker: Option<PathBuf>,
}

impl HeartbeatService {
    fn from_env() -> Self {
        Self {
            marker: std::env::var_os(MARKER_ENV).map(PathBuf::from),
            ..Self::default()
        }
    }

    fn mark(&self, event: &str) {
        let Some(path) = &self.marker else {
            return;
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{event} {}", std::process::id()));
        if let Err(e) = written {
            warn!("failed to append to {}: {e}", path.display());
        }
    }
}

impl ServiceHooks for HeartbeatService {
    fn started(&mut self, shutdown: &ShutdownSignal) -> anyhow::Result<()> {
        info!("service started (pid {})", std::process::id());
        self.mark("started");
        while !shutdown.wait_timeout(HEARTBEAT) {
            self.beats += 1;
            info!("heartbeat #{}", self.beats);
        }
        Ok(())
    }

    fn stopped(&mut self) -> anyhow::Result<()> {
        info!("service stopped after {} heartbeats", self.beats);
        self.mark("stopped");
        Ok(())
    }

    fn installed(&mut self) -> anyhow::Result<()> {
        info!("service installed");
        self.mark("installed");
        Ok(())
    }

    fn uninstalled(&mut self) -> anyhow::Result<()> {
        info!("service uninstalled");
        self.mark("uninstalled");
        Ok(())
    }
}

fn main() -> ExitCode {
    // Initialize logger with custom format for daemon
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let descriptor = match ServiceDescriptor::new("myservice", "My nice little test service", true)
    {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::FAILURE;
        }
    };

    servicekit::run_from_env(descriptor, HeartbeatService::from_env())
}
