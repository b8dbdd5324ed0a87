mod cmd;
mod endpoint;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel, LOG_LEVEL_ENV};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ipcsocket", version, about = "Local socket and named pipe IPC CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = LOG_LEVEL_ENV,
        global = true
    )]
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
            "ipcsocket",
            "send",
            "/tmp/test.sock",
            "--data",
            "ping",
            "--wait",
            "--wait-timeout",
            "500ms",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.endpoint, "/tmp/test.sock");
                assert_eq!(args.data.as_deref(), Some("ping"));
                assert!(args.wait);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ipcsocket",
            "send",
            "/tmp/test.sock",
            "--file",
            "payload.bin",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn log_level_flag_is_global() {
        let cli = Cli::try_parse_from(["ipcsocket", "echo", "/tmp/e.sock", "--log-level", "debug"])
            .expect("echo args should parse");
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(matches!(cli.command, Command::Echo(_)));
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let err = Cli::try_parse_from(["ipcsocket", "echo", "/tmp/e.sock", "--buffer-size", "0"])
            .expect_err("zero buffer should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
