use std::process::ExitCode;

use tracing::{error, info};

mod bootstrap;
mod loop_runner;
mod scenario;
mod world;

pub(crate) fn run() -> ExitCode {
    bootstrap::init_tracing();
    info!("=== GAS Sim Startup ===");
    match bootstrap::build_app() {
        Ok(app) => loop_runner::run(app),
        Err(err) => {
            error!(error = %err, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
