use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Liveness reporting for the long-running pieces of a service.
///
/// Each component registers once and receives a [`HealthHandle`] it must use
/// to report healthy more often than its deadline. The process is healthy
/// only while every registered component has a fresh healthy report; a
/// component that stops reporting is treated as stalled and fails the check.
///
/// The registry only answers liveness. Readiness is a separate concern and
/// should not be derived from it.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Set at registration, before the first report.
    Starting,
    /// Healthy as long as the instant is in the future.
    HealthyUntil(Instant),
    /// Explicitly reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    fn is_healthy(&self, now: Instant) -> bool {
        matches!(self, ComponentStatus::HealthyUntil(until) if *until > now)
    }
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    /// Rendered per-component state, for the probe body.
    pub components: HashMap<String, String>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

type ComponentMap = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: ComponentMap,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component with a reporting deadline. The returned handle
    /// is given to the component so it can report its own status.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        if let Ok(mut map) = self.components.write() {
            map.insert(component.to_string(), ComponentStatus::Starting);
        }
        HealthHandle {
            component: component.to_string(),
            deadline,
            components: self.components.clone(),
        }
    }

    /// Overall process status: healthy only if at least one component is
    /// registered and none is starting, stalled or unhealthy.
    pub fn status(&self) -> HealthStatus {
        let Ok(map) = self.components.read() else {
            warn!("poisoned health registry lock");
            return HealthStatus::default();
        };

        let now = Instant::now();
        let mut status = HealthStatus {
            healthy: !map.is_empty(),
            components: HashMap::with_capacity(map.len()),
        };

        for (name, component) in map.iter() {
            let rendered = match component {
                ComponentStatus::Starting => "starting".to_string(),
                ComponentStatus::Unhealthy => "unhealthy".to_string(),
                ComponentStatus::HealthyUntil(_) if component.is_healthy(now) => {
                    "healthy".to_string()
                }
                ComponentStatus::HealthyUntil(_) => "stalled".to_string(),
            };
            if !component.is_healthy(now) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), rendered);
        }

        if !status.healthy {
            warn!("health check failed: {:?}", status.components);
        }
        status
    }
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: ComponentMap,
}

impl HealthHandle {
    /// Reports healthy until the deadline elapses. Must be called more often
    /// than the deadline to keep the probe green.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline));
    }

    pub fn report_unhealthy(&self) {
        self.report_status(ComponentStatus::Unhealthy);
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                map.insert(self.component.clone(), status);
            }
            Err(err) => warn!("failed to report health status: {err}"),
        }
    }
}
