use std::process::ExitCode;

use tokio::runtime::{Builder, Runtime};
use tracing::{error, info};
use uuid::Uuid;

/// Panics land in the structured log with the instance id they happened in.
fn install_panic_hook(instance: Uuid) {
    std::panic::set_hook(Box::new(move |panic| {
        error!(service = "campus-api", event = "panic", %instance, message = %panic, "unhandled panic");
    }));
}

/// `server.worker_threads` from config.toml, else `TOKIO_WORKER_THREADS`.
fn worker_threads() -> Option<usize> {
    match configs::AppConfig::load_and_validate() {
        Ok(cfg) => cfg.server.worker_threads,
        Err(_) => std::env::var("TOKIO_WORKER_THREADS").ok().and_then(|v| v.parse().ok()),
    }
}

fn build_runtime(threads: Option<usize>) -> std::io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all();
    if let Some(n) = threads {
        builder.worker_threads(n);
    }
    builder.build()
}

fn main() -> ExitCode {
    // .env first so RUST_LOG and LOG_FORMAT apply
    dotenvy::dotenv().ok();
    common::utils::logging::init_logging_from_env();

    let instance = Uuid::new_v4();
    install_panic_hook(instance);

    let threads = worker_threads();
    let rt = match build_runtime(threads) {
        Ok(rt) => rt,
        Err(e) => {
            error!(service = "campus-api", event = "runtime_build_failed", error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    info!(
        service = "campus-api",
        event = "start",
        %instance,
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        threads = threads.unwrap_or_default(),
        "starting"
    );

    // server::run owns ctrl-c and drains the dispatcher before returning
    match rt.block_on(server::run()) {
        Ok(()) => {
            info!(service = "campus-api", event = "stop", %instance, "stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(service = "campus-api", event = "run_failed", %instance, error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
