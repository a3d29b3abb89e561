use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use maskproxy::config::NodeConfig;
use maskproxy::core::node::Node;
use maskproxy::core::registry::{register_caller_constructor, register_listener_constructor};
use maskproxy::identical::IdenticalCallerConstructor;
use maskproxy::logging::{self, LogLevel};
use maskproxy::mask::{MaskCallerConstructor, MaskListenerConstructor};
use maskproxy::socks::SocksListenerConstructor;

/// Two-stage encrypted tunneling proxy: a node pairs an inbound listener
/// with an outbound caller; chains are built by stacking nodes end to end.
#[derive(Debug, Parser)]
#[command(name = "maskproxy")]
struct Cli {
    /// Node config file (listener/caller protocol names, their own config
    /// files, and the port to bind).
    #[arg(long = "config_file", default_value = "server_config.json")]
    config_file: String,

    /// Log verbosity printed to console.
    #[arg(long = "log_level", value_enum, default_value = "info")]
    log_level: LogLevel,
}

/// Populates the process-wide listener/caller registries. Must run to
/// completion before any `Node` is constructed; never mutated afterward
/// (SPEC_FULL.md §4.4/§9).
fn register_protocols() {
    register_listener_constructor("socks", Arc::new(SocksListenerConstructor));
    register_listener_constructor("mask", Arc::new(MaskListenerConstructor));
    register_caller_constructor("mask", Arc::new(MaskCallerConstructor));
    register_caller_constructor("identical", Arc::new(IdenticalCallerConstructor));
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    register_protocols();

    let config = match NodeConfig::load(&cli.config_file) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(config_file = %cli.config_file, "config loaded");

    let (node, listener) = match Node::new(config) {
        Ok(pair) => pair,
        Err(err) => {
            tracing::error!(error = %err, "failed to build node");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("node created");

    let shutdown_node = Arc::clone(&node);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            drop(shutdown_node);
            std::process::exit(0);
        }
    });

    if let Err(err) = node.start(listener).await {
        tracing::error!(error = %err, "node exited with error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
