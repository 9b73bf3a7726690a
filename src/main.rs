use std::process::ExitCode;

use cadence_probe::config::app_config::load_config;
use cadence_probe::executor::Supervisor;
use cadence_probe::http_probe::report;
use cadence_probe::signal::ShutdownSignals;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", report(&e));
            return ExitCode::FAILURE;
        }
    };

    log::info!("Starting application...");

    let mut signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            log::error!("failed to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut handle = match Supervisor::new(config).start() {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("{}", report(&e));
            return ExitCode::FAILURE;
        }
    };

    let name = signals.recv().await;
    log::info!("{name} received, shutting down");

    let abort = handle.abort_token();
    let forced = tokio::select! {
        _ = handle.stop() => false,
        name = signals.recv() => {
            log::warn!("{name} received again, aborting in-flight requests");
            true
        }
    };
    if forced {
        abort.cancel();
        handle.stop().await;
    }

    log::info!("all workers stopped");
    ExitCode::SUCCESS
}
