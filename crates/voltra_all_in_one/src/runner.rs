//! Concurrent process runner with graceful shutdown.
//!
//! Long-running service processes are spawned together; the first failure
//! or a SIGINT cancels the shared token, remaining processes wind down, and
//! closers run afterward regardless of outcome.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type Process = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;
type Closer = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// How long closers get before the process exits anyway.
const CLOSER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServiceRunner {
    processes: Vec<(String, Process)>,
    closers: Vec<Closer>,
    cancellation: CancellationToken,
}

impl ServiceRunner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Add a named long-running process. Processes observe the shared
    /// cancellation token and are expected to return once it fires.
    pub fn with_process<F, Fut>(mut self, name: &str, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.processes
            .push((name.to_string(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Add a cleanup step executed after every process has stopped.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Run until every process finishes, one fails, or SIGINT arrives.
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for (name, process) in self.processes {
            let token = self.cancellation.clone();
            tasks.spawn(async move {
                let result = process(token).await;
                (name, result)
            });
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    self.cancellation.cancel();
                    break;
                }
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok((name, Ok(())))) => {
                            info!(process = %name, "process finished");
                        }
                        Some(Ok((name, Err(e)))) => {
                            error!(process = %name, error = %e, "process failed, shutting down");
                            self.cancellation.cancel();
                            break;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "process panicked, shutting down");
                            self.cancellation.cancel();
                            break;
                        }
                        None => {
                            info!("all processes finished");
                            break;
                        }
                    }
                }
            }
        }

        // Drain remaining processes before cleanup.
        while let Some(joined) = tasks.join_next().await {
            if let Ok((name, Err(e))) = joined {
                warn!(process = %name, error = %e, "process ended with error during shutdown");
            }
        }

        for closer in self.closers {
            if tokio::time::timeout(CLOSER_TIMEOUT, closer()).await.is_err() {
                warn!("closer timed out");
            }
        }
    }
}

impl Default for ServiceRunner {
    fn default() -> Self {
        Self::new()
    }
}
