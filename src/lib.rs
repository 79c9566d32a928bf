pub mod capture;
pub mod cli;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod gpu;
pub mod pipeline;
pub mod shared;
pub mod testpattern;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cli::ParsedArgs;
use crate::core::config::{load_settings, RunConfig};
use crate::core::logging::{debug_requested_by_env, init_logging};
use crate::errors::BridgeError;

/// Parses arguments, runs the bridge and returns the process exit code.
pub fn run() -> i32 {
    let cli = match cli::parse_args(std::env::args_os()) {
        ParsedArgs::Run(cli) => cli,
        ParsedArgs::Exit(code) => return code,
    };

    let env_debug = debug_requested_by_env();
    let _logging = init_logging(cli.debug || env_debug);

    let config = match RunConfig::resolve(&cli, &load_settings(), env_debug) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(target: "system", "{}", e);
            return BridgeError::from(e).exit_code();
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(target: "system", "Failed to install signal handler: {}", e);
    }

    let code = match coordinator::run(&config, shutdown) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(target: "system", "{}", e);
            e.exit_code()
        }
    };

    tracing::info!(target: "system", "Application shutdown complete");
    code
}
