//! Validation State Machine
//!
//! One attempt against one binary version:
//!
//! ```text
//! Launching -> AwaitingReady -> Probing -> Passed
//!     |              |             |
//!     v              v             v
//!   Failed     Failed/Crashed    Failed
//!
//! every terminal state -> TornDown
//! ```
//!
//! The attempt owns the instance it launched and tears it down exactly once,
//! whatever the terminal state. No state survives between attempts.

use infra_validator_domain::{
    AttemptId, BackendError, BinaryVersion, DomainError, InstanceState, ModelLayout, ModelState,
    ProbeRequest, Result, RuntimeBackend, ServerHandle, ServingClient,
};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Why an attempt failed without the server crashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    LaunchFailed,
    LoadTimeout,
    ProbeFailed,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::LaunchFailed => write!(f, "launch failed"),
            FailureKind::LoadTimeout => write!(f, "load timeout"),
            FailureKind::ProbeFailed => write!(f, "probe failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Launching,
    AwaitingReady,
    Probing,
    Passed,
    Failed { kind: FailureKind, message: String },
    Crashed { reason: String },
    TornDown,
}

impl AttemptState {
    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        AttemptState::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Passed | AttemptState::Failed { .. } | AttemptState::Crashed { .. }
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Launching => write!(f, "Launching"),
            AttemptState::AwaitingReady => write!(f, "AwaitingReady"),
            AttemptState::Probing => write!(f, "Probing"),
            AttemptState::Passed => write!(f, "Passed"),
            AttemptState::Failed { kind, message } => write!(f, "Failed ({}): {}", kind, message),
            AttemptState::Crashed { reason } => write!(f, "Crashed: {}", reason),
            AttemptState::TornDown => write!(f, "TornDown"),
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub attempt_id: AttemptId,
    /// Terminal state reached before teardown.
    pub outcome: AttemptState,
    /// Every state visited, in order, ending with `TornDown` when an
    /// instance was launched.
    pub history: Vec<AttemptState>,
    pub teardown_failed: bool,
}

impl AttemptReport {
    pub fn passed(&self) -> bool {
        self.outcome == AttemptState::Passed
    }

    pub fn cancelled(&self) -> bool {
        matches!(
            self.outcome,
            AttemptState::Failed {
                kind: FailureKind::Cancelled,
                ..
            }
        )
    }
}

/// Timing knobs of one attempt.
#[derive(Debug, Clone)]
pub struct AttemptSettings {
    pub max_loading_time: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    pub teardown_retries: u32,
    pub teardown_retry_delay: Duration,
}

impl Default for AttemptSettings {
    fn default() -> Self {
        Self {
            max_loading_time: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            teardown_retries: 3,
            teardown_retry_delay: Duration::from_secs(1),
        }
    }
}

enum ReadyCheck {
    NotYet,
    Ready(String),
    Crashed(String),
}

pub struct ValidationAttempt<'a> {
    backend: &'a dyn RuntimeBackend,
    client: &'a dyn ServingClient,
    settings: &'a AttemptSettings,
    cancel: CancellationToken,
    history: Vec<AttemptState>,
}

impl<'a> ValidationAttempt<'a> {
    pub fn new(
        backend: &'a dyn RuntimeBackend,
        client: &'a dyn ServingClient,
        settings: &'a AttemptSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            backend,
            client,
            settings,
            cancel,
            history: Vec::new(),
        }
    }

    fn transition(&mut self, attempt_id: &AttemptId, state: AttemptState) {
        debug!("Attempt {} -> {}", attempt_id, state);
        self.history.push(state);
    }

    /// Drive one attempt to a terminal state and tear down.
    ///
    /// Returns `Err` only for configuration errors raised by the backend at
    /// launch; every other fault is an unsuccessful report.
    #[instrument(skip_all, fields(version = %version, attempt = attempt_id.attempt))]
    pub async fn run(
        mut self,
        attempt_id: AttemptId,
        version: &BinaryVersion,
        layout: &ModelLayout,
        requests: &[ProbeRequest],
    ) -> Result<AttemptReport> {
        self.transition(&attempt_id, AttemptState::Launching);

        if self.cancel.is_cancelled() {
            let outcome = AttemptState::failed(FailureKind::Cancelled, "cancelled before launch");
            self.transition(&attempt_id, outcome.clone());
            return Ok(self.report(attempt_id, outcome, false));
        }

        // Launch always runs to completion so any created instance gets a handle.
        let handle = match self.backend.launch(&attempt_id, version, layout).await {
            Ok(handle) => handle,
            Err(e) if e.is_configuration_error() => {
                error!("Configuration error launching {}: {}", version, e);
                return Err(DomainError::from(e));
            }
            Err(e) => {
                warn!("Launch of {} failed: {}", version, e);
                let outcome = AttemptState::failed(FailureKind::LaunchFailed, e.to_string());
                self.transition(&attempt_id, outcome.clone());
                return Ok(self.report(attempt_id, outcome, false));
            }
        };
        info!("Launched {} for {}", handle.instance_name, version);

        let outcome = self.drive(&attempt_id, &handle, layout, requests).await;
        self.transition(&attempt_id, outcome.clone());

        let teardown_failed = !self.teardown(&handle).await;
        self.transition(&attempt_id, AttemptState::TornDown);

        match &outcome {
            AttemptState::Passed => info!("Attempt {} passed", attempt_id),
            other => warn!("Attempt {} ended: {}", attempt_id, other),
        }
        Ok(self.report(attempt_id, outcome, teardown_failed))
    }

    fn report(
        self,
        attempt_id: AttemptId,
        outcome: AttemptState,
        teardown_failed: bool,
    ) -> AttemptReport {
        AttemptReport {
            attempt_id,
            outcome,
            history: self.history,
            teardown_failed,
        }
    }

    /// AwaitingReady and Probing; returns the terminal state.
    async fn drive(
        &mut self,
        attempt_id: &AttemptId,
        handle: &ServerHandle,
        layout: &ModelLayout,
        requests: &[ProbeRequest],
    ) -> AttemptState {
        self.transition(attempt_id, AttemptState::AwaitingReady);

        let endpoint = match self.await_ready(handle, &layout.model_name).await {
            Ok(endpoint) => endpoint,
            Err(terminal) => return terminal,
        };
        info!("{} is ready at {}", handle.instance_name, endpoint);

        self.transition(attempt_id, AttemptState::Probing);
        self.probe(&endpoint, requests).await
    }

    /// Poll until the backend reports Ready and the model is available.
    async fn await_ready(
        &self,
        handle: &ServerHandle,
        model_name: &str,
    ) -> std::result::Result<String, AttemptState> {
        let deadline = Instant::now() + self.settings.max_loading_time;
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timed_out = || {
            AttemptState::failed(
                FailureKind::LoadTimeout,
                format!("not ready after {:?}", self.settings.max_loading_time),
            )
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(AttemptState::failed(FailureKind::Cancelled, "cancelled while loading"));
                }
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                _ = interval.tick() => {}
            }

            let check = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(AttemptState::failed(FailureKind::Cancelled, "cancelled while loading"));
                }
                _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
                check = self.check_ready(handle, model_name) => check,
            };

            match check {
                ReadyCheck::NotYet => continue,
                ReadyCheck::Ready(endpoint) => return Ok(endpoint),
                ReadyCheck::Crashed(reason) => return Err(AttemptState::Crashed { reason }),
            }
        }
    }

    async fn check_ready(&self, handle: &ServerHandle, model_name: &str) -> ReadyCheck {
        match self.backend.poll(handle).await {
            Ok(InstanceState::Loading) => {
                debug!("{} still loading", handle.instance_name);
                return ReadyCheck::NotYet;
            }
            Ok(InstanceState::Crashed { reason }) => return ReadyCheck::Crashed(reason),
            Ok(InstanceState::Ready) => {}
            Err(BackendError::InstanceNotFound(name)) => {
                return ReadyCheck::Crashed(format!("instance {} disappeared", name));
            }
            Err(e) => {
                warn!("Polling {} failed: {}", handle.instance_name, e);
                return ReadyCheck::NotYet;
            }
        }

        let endpoint = match self.backend.endpoint(handle).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                debug!("Endpoint of {} not available yet: {}", handle.instance_name, e);
                return ReadyCheck::NotYet;
            }
        };

        match self.client.model_state(&endpoint, model_name).await {
            Ok(ModelState::Available) => ReadyCheck::Ready(endpoint),
            Ok(ModelState::Failed { reason }) => ReadyCheck::Crashed(reason),
            Ok(state) => {
                debug!("Model {} on {} is {:?}", model_name, endpoint, state);
                ReadyCheck::NotYet
            }
            Err(e) => {
                debug!("Model status on {} failed: {}", endpoint, e);
                ReadyCheck::NotYet
            }
        }
    }

    /// Every request must succeed. No requests means readiness alone passes.
    async fn probe(&self, endpoint: &str, requests: &[ProbeRequest]) -> AttemptState {
        for (index, request) in requests.iter().enumerate() {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return AttemptState::failed(FailureKind::Cancelled, "cancelled while probing");
                }
                sent = tokio::time::timeout(self.settings.probe_timeout, self.client.send(endpoint, request)) => sent,
            };

            match sent {
                Ok(Ok(())) => debug!("Request {} to {} succeeded", index + 1, request.path()),
                Ok(Err(e)) => {
                    return AttemptState::failed(
                        FailureKind::ProbeFailed,
                        format!("request {} ({}) failed: {}", index + 1, request.signature_name, e),
                    );
                }
                Err(_) => {
                    return AttemptState::failed(
                        FailureKind::ProbeFailed,
                        format!(
                            "request {} ({}) timed out after {:?}",
                            index + 1,
                            request.signature_name,
                            self.settings.probe_timeout
                        ),
                    );
                }
            }
        }
        AttemptState::Passed
    }

    /// Teardown with bounded retries. Returns false if every try failed.
    async fn teardown(&self, handle: &ServerHandle) -> bool {
        let tries = self.settings.teardown_retries + 1;
        for attempt in 1..=tries {
            match self.backend.teardown(handle).await {
                Ok(()) => return true,
                Err(e) if attempt < tries => {
                    warn!(
                        "Teardown of {} failed (try {}/{}): {}",
                        handle.instance_name, attempt, tries, e
                    );
                    tokio::time::sleep(self.settings.teardown_retry_delay).await;
                }
                Err(e) => {
                    error!(
                        "Giving up tearing down {} after {} tries: {}",
                        handle.instance_name, tries, e
                    );
                }
            }
        }
        false
    }
}
