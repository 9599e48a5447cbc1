//! `rosmqtt` – bridge between a ROS system and an MQTT broker.
//!
//! 1. Loads `~/.rosmqtt/config.toml` (or `--config PATH`), falling back to
//!    defaults when the file is absent.
//! 2. `run` (the default) connects to the broker and to `rosbridge_server`,
//!    issues the startup subscriptions and forwards in both directions until
//!    Ctrl-C.
//! 3. `probe send` / `probe receive` measure round-trip latency through a
//!    bridge that is already running.

mod config;
mod probe;
mod run;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::config::{Config, ConfigError};

#[derive(Debug, Parser)]
#[command(name = "rosmqtt", version, about = "Forward messages between rosbridge and MQTT")]
struct Cli {
    /// Config file (default: ~/.rosmqtt/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the bridge.
    Run,

    /// Latency measurement through a running bridge.
    #[command(subcommand)]
    Probe(ProbeCommand),
}

#[derive(Debug, Subcommand)]
enum ProbeCommand {
    /// Publish stamped headers onto the control topic.
    Send {
        /// ROS topic the bridge should publish the headers on.
        #[arg(long, default_value = "/test_hdr")]
        topic: String,
        #[arg(long, default_value_t = 1000.0)]
        rate_hz: f64,
        #[arg(long, default_value = "test")]
        frame_id: String,
        /// Stop after this many messages.
        #[arg(long)]
        count: Option<u64>,
    },

    /// Log the age of stamped messages arriving on an MQTT topic.
    Receive {
        #[arg(long, default_value = "/people_tracking/people")]
        topic: String,
        /// ROS topic to subscribe to through the bridge before listening.
        #[arg(long)]
        subscribe: Option<String>,
        #[arg(long = "type", requires = "subscribe")]
        msg_type: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let tracing_guard = telemetry::init_tracing("rosmqtt");
    info!(otlp_export = tracing_guard.is_exporting(), "tracing initialised");

    let cfg = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "could not load configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match cli.command.unwrap_or(Command::Run) {
            Command::Run => run::run(&cfg).await,
            Command::Probe(ProbeCommand::Send { topic, rate_hz, frame_id, count }) => {
                let opts = probe::SendOptions { topic, rate_hz, frame_id, count };
                probe::send(&cfg, &opts).await
            }
            Command::Probe(ProbeCommand::Receive { topic, subscribe, msg_type }) => {
                let opts = probe::ReceiveOptions { topic, subscribe, msg_type };
                probe::receive(&cfg, &opts).await
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "rosmqtt stopped");
            ExitCode::FAILURE
        }
    }
}

/// An explicit `--config` must exist; the default path may be absent.
fn load_config(explicit: Option<&std::path::Path>) -> Result<Config, ConfigError> {
    let path = explicit.map(PathBuf::from).unwrap_or_else(config::config_path);
    match config::load_from(&path)? {
        Some(cfg) => {
            info!(path = %path.display(), "loaded configuration");
            Ok(cfg)
        }
        None if explicit.is_some() => Err(ConfigError::Read {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            path,
        }),
        None => {
            info!(path = %path.display(), "no config file; using defaults");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_runs_the_bridge() {
        let cli = Cli::try_parse_from(["rosmqtt"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn probe_send_defaults() {
        let cli = Cli::try_parse_from(["rosmqtt", "probe", "send"]).unwrap();
        match cli.command {
            Some(Command::Probe(ProbeCommand::Send { topic, rate_hz, frame_id, count })) => {
                assert_eq!(topic, "/test_hdr");
                assert_eq!(rate_hz, 1000.0);
                assert_eq!(frame_id, "test");
                assert_eq!(count, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn probe_receive_takes_subscription_and_type() {
        let cli = Cli::try_parse_from([
            "rosmqtt",
            "--config",
            "/tmp/bridge.toml",
            "probe",
            "receive",
            "--topic",
            "/people_tracking/people_json",
            "--subscribe",
            "/people_tracking/people_json",
            "--type",
            "std_msgs/String",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bridge.toml")));
        match cli.command {
            Some(Command::Probe(ProbeCommand::Receive { topic, subscribe, msg_type })) => {
                assert_eq!(topic, "/people_tracking/people_json");
                assert_eq!(subscribe.as_deref(), Some("/people_tracking/people_json"));
                assert_eq!(msg_type.as_deref(), Some("std_msgs/String"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn type_without_subscribe_is_rejected() {
        let result =
            Cli::try_parse_from(["rosmqtt", "probe", "receive", "--type", "std_msgs/String"]);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load_config(Some(&missing)), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn explicit_config_is_loaded() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "double_decode = false\n").expect("write");
        let cfg = load_config(Some(&path)).expect("load");
        assert!(!cfg.double_decode);
    }
}
