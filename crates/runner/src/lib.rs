//! Process host for the review ETL worker.
//!
//! The runner owns a set of long-running app processes and a set of closers:
//! - App processes run concurrently and share one cancellation token
//! - SIGINT/SIGTERM cancel the token so in-flight work can stop at its next I/O boundary
//! - The first process error cancels every other process
//! - Closers always run afterwards, bounded by a timeout
//!
//! # Example
//!
//! ```no_run
//! use etl_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = Runner::new()
//!         .with_app_process(|ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//!
//!     std::process::exit(if result.is_ok() { 0 } else { 1 });
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxedResultFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-running process. Receives the shared cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Cleanup hook executed once all app processes have stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub struct Runner {
    app_processes: Vec<AppProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with a 10 second closer timeout and OS signal handling enabled.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_app_process<F, Fut>(mut self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push(Box::new(move |token| Box::pin(process(token))));
        self
    }

    /// Adds a boxed app process, as produced by workers exposing `into_runner_processes`.
    pub fn with_boxed_app_process(mut self, process: AppProcess) -> Self {
        self.app_processes.push(process);
        self
    }

    /// Closers run concurrently after the app processes stop. A failing closer
    /// does not prevent the others from running.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(move || Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Uses an externally owned token, letting callers trigger shutdown.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disables SIGINT/SIGTERM handling. Shutdown then only happens through the token.
    pub fn without_signal_handling(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Runs every app process until all finish, one fails, or a shutdown
    /// signal arrives, then runs the closers.
    ///
    /// Returns the first app process error, if any. Exiting the process is left
    /// to the caller.
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for process in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move { process(process_token).await });
        }

        if self.handle_signals {
            spawn_signal_listener(token.clone());
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => debug!("app process completed"),
                Ok(Err(err)) => {
                    if first_error.is_none() && !token.is_cancelled() {
                        error!(error = %format!("{err:#}"), "app process failed");
                        first_error = Some(err);
                    } else {
                        warn!(error = %format!("{err:#}"), "app process failed during shutdown");
                    }
                    token.cancel();
                }
                Err(join_err) => {
                    error!(error = %join_err, "app process panicked");
                    if first_error.is_none() && !token.is_cancelled() {
                        first_error = Some(anyhow::anyhow!("app process panicked: {join_err}"));
                    }
                    token.cancel();
                }
            }
        }

        Self::run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => {
                error!(error = %format!("{err:#}"), "runner exiting with error");
                Err(err)
            }
            None => {
                info!("runner exiting normally");
                Ok(())
            }
        }
    }

    async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
        if closers.is_empty() {
            return;
        }

        info!(timeout_ms = timeout.as_millis(), "running closers");

        let mut closer_set = JoinSet::new();
        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        let drain = async {
            while let Some(joined) = closer_set.join_next().await {
                match joined {
                    Ok(Ok(())) => debug!("closer completed"),
                    Ok(Err(err)) => error!(error = %format!("{err:#}"), "closer failed"),
                    Err(join_err) => error!(error = %join_err, "closer panicked"),
                }
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            error!(timeout_ms = timeout.as_millis(), "closers timed out");
        } else {
            info!("all closers completed");
        }
    }
}

fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    wait_for_ctrl_c(&token).await;
                    return;
                }
            };

            tokio::select! {
                _ = token.cancelled() => {}
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    token.cancel();
                }
                _ = wait_for_ctrl_c(&token) => {}
            }
        }

        #[cfg(not(unix))]
        wait_for_ctrl_c(&token).await;
    });
}

async fn wait_for_ctrl_c(token: &CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                info!("received SIGINT, shutting down");
                token.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for SIGINT"),
        }
    }
}
