use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

use crate::lifecycle::Command;

#[derive(Parser, Debug, Default)]
#[command(version, about = "Service lifecycle host")]
pub struct Args {
    /// Lifecycle command: install, uninstall, start, stop or run (default)
    #[arg(allow_hyphen_values = true)]
    pub command: Option<String>,

    /// Path to configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Parse the process arguments; see [`Args::parse_lenient_from`].
    pub fn parse_lenient() -> Self {
        Self::parse_lenient_from(std::env::args_os())
    }

    /// Parse `args`. The first token always selects the command; whatever
    /// clap rejects after it is ignored with a warning, and only an
    /// unrecognised token means `run`. `--help` and `--version` still print
    /// and exit.
    pub fn parse_lenient_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        match Self::try_parse_from(args.iter().cloned()) {
            Ok(parsed) => parsed,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::DisplayHelp
                        | ErrorKind::DisplayVersion
                        | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) =>
            {
                e.exit()
            }
            Err(e) => {
                log::debug!("strict parse failed ({}), salvaging arguments", e.kind());
                Self::salvage(&args)
            }
        }
    }

    /// Positional scan: `--config`/`-c` and its value, then the first other
    /// argument as the lifecycle token.
    fn salvage(args: &[OsString]) -> Self {
        let mut salvaged = Self::default();
        let mut ignored = Vec::new();
        let mut iter = args.iter().skip(1).map(|a| a.to_string_lossy().into_owned());

        while let Some(arg) = iter.next() {
            if arg == "--config" || arg == "-c" {
                salvaged.config = iter.next().map(PathBuf::from);
            } else if let Some(path) = arg.strip_prefix("--config=") {
                salvaged.config = Some(PathBuf::from(path));
            } else if salvaged.command.is_none() {
                salvaged.command = Some(arg);
            } else {
                ignored.push(arg);
            }
        }

        if !ignored.is_empty() {
            log::warn!("ignoring extra arguments: {}", ignored.join(" "));
        }
        salvaged
    }

    pub fn command(&self) -> Command {
        self.command
            .as_deref()
            .map(Command::from_token)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_lenient_from(std::iter::once("servicekitd").chain(args.iter().copied()))
    }

    #[test]
    fn no_arguments_means_run() {
        let args = parse(&[]);
        assert_eq!(args.command(), Command::Run);
        assert!(args.config.is_none());
    }

    #[test]
    fn plain_and_dashed_tokens() {
        assert_eq!(parse(&["install"]).command(), Command::Install);
        assert_eq!(parse(&["--stop"]).command(), Command::Stop);
    }

    #[test]
    fn config_is_picked_up_after_the_token() {
        let args = parse(&["start", "--config", "/etc/svc/svc.toml"]);
        assert_eq!(args.command(), Command::Start);
        assert_eq!(args.config, Some(PathBuf::from("/etc/svc/svc.toml")));
    }

    #[test]
    fn unknown_token_falls_back_to_run() {
        assert_eq!(parse(&["restart"]).command(), Command::Run);
        assert_eq!(parse(&["--frobnicate"]).command(), Command::Run);
    }

    #[test]
    fn extra_arguments_never_change_the_command() {
        assert_eq!(parse(&["stop", "--force"]).command(), Command::Stop);
        assert_eq!(parse(&["stop", "-v"]).command(), Command::Stop);
        assert_eq!(parse(&["start", "extra"]).command(), Command::Start);
        assert_eq!(parse(&["--uninstall", "now", "please"]).command(), Command::Uninstall);
    }

    #[test]
    fn config_survives_extra_arguments() {
        let args = parse(&["stop", "--force", "--config", "/etc/svc/svc.toml"]);
        assert_eq!(args.command(), Command::Stop);
        assert_eq!(args.config, Some(PathBuf::from("/etc/svc/svc.toml")));

        let args = parse(&["start", "extra", "--config=/tmp/svc.toml"]);
        assert_eq!(args.command(), Command::Start);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/svc.toml")));

        let args = parse(&["-c", "/tmp/svc.toml", "stop", "-v"]);
        assert_eq!(args.command(), Command::Stop);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/svc.toml")));
    }
}
