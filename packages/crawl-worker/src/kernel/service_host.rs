//! Hosts long-running services and wires process signals to their shutdown.
//!
//! # Example
//!
//! ```ignore
//! ServiceHost::new()
//!     .with_service(worker)
//!     .run_until_shutdown()
//!     .await?;
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running service that stops when its token is cancelled.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs services until a shutdown signal arrives or one of them exits.
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    shutdown: CancellationToken,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_service(mut self, service: impl Service + 'static) -> Self {
        self.services.push(Box::new(service));
        self
    }

    /// Token cancelled when the host shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run all services until Ctrl-C / SIGTERM.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            token.cancel();
        });

        self.run().await
    }

    /// Run all services until the shutdown token is cancelled.
    ///
    /// A service that fails or returns early cancels the others.
    pub async fn run(self) -> Result<()> {
        let mut set = JoinSet::new();
        for service in self.services {
            let name = service.name();
            let shutdown = self.shutdown.clone();
            set.spawn(async move { (name, service.run(shutdown).await) });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            self.shutdown.cancel();
            match joined {
                Ok((name, Ok(()))) => info!(service = name, "service stopped"),
                Ok((name, Err(e))) => {
                    error!(service = name, error = %e, "service failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "service task panicked");
                    first_error.get_or_insert(anyhow!("service task panicked: {e}"));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
