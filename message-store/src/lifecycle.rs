use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A startable/stoppable piece of the process. Components are infrastructure
/// adapters (broker, document store); request-serving layers live outside the
/// container and follow the process cancellation token directly.
#[async_trait]
pub trait Component: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self, shutdown: &CancellationToken) -> anyhow::Result<()>;

    /// Called after the process cancellation token has fired. Must release
    /// the component's resources; failures are aggregated by the container,
    /// they never abort the rest of shutdown.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
#[error("component {name} failed to start")]
pub struct StartError {
    pub name: &'static str,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, thiserror::Error)]
#[error("shutdown completed with {} failure(s)", .failures.len())]
pub struct ShutdownError {
    pub failures: Vec<(&'static str, anyhow::Error)>,
}

/// Sequences component startup and shutdown.
#[derive(Default)]
pub struct Container {
    components: Vec<Box<dyn Component>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, component: Box<dyn Component>) {
        self.components.push(component);
    }

    /// Starts components in registration order, failing fast: a component
    /// that cannot start is fatal to the process.
    pub async fn start_all(&mut self, shutdown: &CancellationToken) -> Result<(), StartError> {
        for component in &mut self.components {
            let name = component.name();
            component
                .start(shutdown)
                .await
                .map_err(|source| StartError { name, source })?;
            debug!(component = name, "component started");
        }
        Ok(())
    }

    /// Stops components in reverse registration order, each bounded by what
    /// remains of the deadline. Every failure is collected; shutdown always
    /// proceeds past them.
    pub async fn stop_all(&mut self, deadline: Duration) -> Result<(), ShutdownError> {
        let began = Instant::now();
        let mut failures = Vec::new();

        for component in self.components.iter_mut().rev() {
            let name = component.name();
            let remaining = deadline.saturating_sub(began.elapsed());
            match tokio::time::timeout(remaining, component.stop()).await {
                Ok(Ok(())) => debug!(component = name, "component stopped"),
                Ok(Err(err)) => {
                    error!(component = name, error = %err, "component failed to stop");
                    failures.push((name, err));
                }
                Err(_) => {
                    error!(component = name, "component stop timed out");
                    failures.push((name, anyhow!("stop timed out")));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { failures })
        }
    }
}
