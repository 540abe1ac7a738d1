//! Single HTTP check for one service

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client, Method, Url};

use super::transition::{apply_transition, Observation, Transition};
use super::DEFAULT_PROBE_TIMEOUT;
use crate::hub::{HubHandle, PublishOutcome};
use crate::model::{CheckResult, NewCheck, Service, StatusMessage};
use crate::storage::{SharedStore, StoreError};

/// How far a check got through its pipeline
#[derive(Debug)]
pub enum CheckOutcome {
    /// Logged, transitioned and handed to the live feed
    Completed {
        check: CheckResult,
        transition: Transition,
        publish: PublishOutcome,
    },
    /// The check log rejected the record; nothing else ran
    LogFailed { check: NewCheck, error: StoreError },
    /// Logged, but the status transition rolled back; not published
    TransitionFailed { check: CheckResult, error: StoreError },
}

impl CheckOutcome {
    /// Whether the probe classified the service as up
    pub fn is_up(&self) -> bool {
        match self {
            CheckOutcome::Completed { check, .. } | CheckOutcome::TransitionFailed { check, .. } => {
                check.is_up
            }
            CheckOutcome::LogFailed { check, .. } => check.is_up,
        }
    }
}

/// Runs checks and drives their side effects
pub struct Prober {
    client: Client,
    store: SharedStore,
    hub: HubHandle,
    default_timeout: Duration,
}

impl Prober {
    pub fn new(store: SharedStore, hub: HubHandle) -> Self {
        Self::with_client(Client::new(), store, hub)
    }

    pub fn with_client(client: Client, store: SharedStore, hub: HubHandle) -> Self {
        Self {
            client,
            store,
            hub,
            default_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Timeout for services whose own timeout is not positive
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Send one request and classify it. Never fails: transport errors are
    /// reported as a down check with status code 0.
    pub async fn probe(&self, service: &Service) -> NewCheck {
        let timeout = service.timeout_or(self.default_timeout);
        let start = Instant::now();

        let result = match build_request(service) {
            Ok((method, url)) => self
                .client
                .request(method, url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| describe_transport_error(&e, timeout)),
            Err(e) => Err(e),
        };
        let response_time_ms = start.elapsed().as_millis() as i64;

        let (status_code, is_up, error) = match result {
            Ok(response) => {
                let code = i32::from(response.status().as_u16());
                (code, code == service.expected_status, None)
            }
            Err(error) => (0, false, Some(error)),
        };

        NewCheck {
            service_id: service.id,
            status_code,
            response_time_ms,
            is_up,
            error,
            checked_at: Utc::now(),
        }
    }

    /// Probe `service` then log, transition and publish, each step gated on
    /// the previous one succeeding.
    pub async fn run_check(&self, service: &Service) -> CheckOutcome {
        let new_check = self.probe(service).await;

        if let Some(error) = &new_check.error {
            tracing::debug!(service_id = service.id, error = %error, "Probe failed");
        }

        let check = match self.store.append_check(new_check.clone()).await {
            Ok(check) => check,
            Err(error) => {
                tracing::error!(
                    service_id = service.id,
                    error = %error,
                    "Failed to record check, skipping status update"
                );
                return CheckOutcome::LogFailed {
                    check: new_check,
                    error,
                };
            }
        };

        let observation = Observation {
            service_id: check.service_id,
            is_up: check.is_up,
            status_code: check.status_code,
            response_time_ms: check.response_time_ms,
        };

        let transition = match apply_transition(self.store.as_ref(), observation).await {
            Ok(transition) => transition,
            Err(error) => {
                tracing::error!(
                    service_id = service.id,
                    error = %error,
                    "Status transition rolled back"
                );
                return CheckOutcome::TransitionFailed { check, error };
            }
        };

        if let Some(kind) = transition.alert {
            tracing::warn!(
                service_id = service.id,
                service = %service.name,
                alert = %kind,
                status_code = check.status_code,
                "{}",
                kind.message()
            );
        }

        let publish = self
            .hub
            .publish(&StatusMessage::new(&transition.status, Utc::now()));

        tracing::debug!(
            service_id = service.id,
            is_up = check.is_up,
            status_code = check.status_code,
            response_time_ms = check.response_time_ms,
            "Check complete"
        );

        CheckOutcome::Completed {
            check,
            transition,
            publish,
        }
    }
}

fn build_request(service: &Service) -> Result<(Method, Url), String> {
    let method = match service.method.trim() {
        "" => Method::GET,
        m => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method {:?}", service.method))?,
    };
    let url = Url::parse(&service.url).map_err(|e| format!("invalid URL {:?}: {}", service.url, e))?;
    Ok((method, url))
}

fn describe_transport_error(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("request timed out after {}ms: {}", timeout.as_millis(), e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}
