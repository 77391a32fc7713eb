mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ramses", version, about = "RAMSES-II gateway CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ramses",
            "send",
            "/dev/ttyACM0",
            "--controller",
            "01:145038",
            "--get",
            "zone-temp",
            "--zone",
            "3",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_send_actions() {
        let err = Cli::try_parse_from([
            "ramses",
            "send",
            "/dev/ttyACM0",
            "--controller",
            "01:145038",
            "--get",
            "zone-temp",
            "--setpoint",
            "21",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_controller_unless_raw() {
        let err = Cli::try_parse_from(["ramses", "send", "/dev/ttyACM0", "--get", "system-mode"])
            .expect_err("missing controller should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        Cli::try_parse_from([
            "ramses",
            "send",
            "localhost:5000",
            "--raw",
            "RQ --- 18:000730 01:145038 --:------ 2E04 001 FF",
        ])
        .expect("raw send should parse without a controller");
    }

    #[test]
    fn parses_parse_subcommand_with_layout() {
        let cli = Cli::try_parse_from([
            "ramses",
            "--format",
            "json",
            "parse",
            "packet.log",
            "--layout",
            "system.json",
        ])
        .expect("parse args should parse");
        assert!(matches!(cli.command, Command::Parse(_)));
    }
}
