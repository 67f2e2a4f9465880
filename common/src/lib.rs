//! Common types for rstow: the storage contract, errors, configuration and the local backend.
//!
//! Every backend implements [`Storage`]; callers pick one backend (usually via configuration)
//! and only ever talk to it through that trait.
//!
//! # Error Handling
//!
//! Operations return [`Error`], which pairs an [`ErrorKind`] (the step that failed) with an
//! `anyhow` context chain naming the file and the operation. Nothing is retried.
//!
//! # Logging
//!
//! Library code logs through `tracing`. Binaries call [`run`], which installs a subscriber whose
//! level follows [`OutputConfig::verbose`] unless `RUST_LOG` is set.

pub mod backend;
pub mod config;
pub mod error;
pub mod local;
pub mod storage;

#[cfg(test)]
mod testutils;

pub use backend::Backend;
pub use config::{
    AzureConfig, FtpConfig, LocalConfig, OutputConfig, RuntimeConfig, Secret, SshConfig,
    StorageConfig,
};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use local::LocalStorage;
pub use storage::{PruneOutcome, PruneSummary, Storage};

fn default_log_level(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_level(output)));
    // a subscriber may already be installed, e.g. by tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Sets up logging and a tokio runtime, then drives `func` to completion.
///
/// Returns `None` when the runtime cannot be built or `func` fails; the failure is logged with
/// its full context chain unless [`OutputConfig::quiet`] is set.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start tokio runtime: {:#}", &error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => Some(summary),
        Err(error) => {
            tracing::error!("{:#}", &error);
            None
        }
    }
}
