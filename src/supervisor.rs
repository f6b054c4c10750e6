//! Best-effort persistent connection to a device session.
//!
//! The supervisor retries forever at a fixed interval. Once connected it fetches
//! the full device state once and then waits for the session to report a lost
//! connection before starting over.

use crate::dps::TelemetryFrame;
use crate::error::BridgeError;
use crate::session::{DeviceSession, SessionEvent};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

/// Fixed delay between a failed attempt and the next one.
pub const RETRY_DELAY: Duration = Duration::from_secs(60);
/// Shortest accepted retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Reportable supervisor activity.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Attempt {
        attempt: u32,
    },
    Connected {
        attempt: u32,
    },
    Failed {
        attempt: u32,
        error: BridgeError,
    },
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    SnapshotFetched {
        fields: usize,
    },
    SnapshotFailed {
        error: BridgeError,
    },
    ConnectionLost {
        reason: String,
    },
}

/// Keeps one session connected.
///
/// Cloning yields another handle to the same connection state.
pub struct ReconnectSupervisor<S> {
    device_id: String,
    session: Arc<S>,
    retry_delay: Duration,
    state: Arc<RwLock<ConnectionState>>,
}

impl<S> Clone for ReconnectSupervisor<S> {
    fn clone(&self) -> Self {
        Self {
            device_id: self.device_id.clone(),
            session: self.session.clone(),
            retry_delay: self.retry_delay,
            state: self.state.clone(),
        }
    }
}

impl<S: DeviceSession> ReconnectSupervisor<S> {
    pub fn new(device_id: impl Into<String>, session: Arc<S>) -> Self {
        Self {
            device_id: device_id.into(),
            session,
            retry_delay: RETRY_DELAY,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    /// Sets the retry delay, raised to at least [`MIN_RETRY_DELAY`].
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        if delay < MIN_RETRY_DELAY {
            warn!(
                "Retry delay {:?} for device {} raised to {:?}",
                delay, self.device_id, MIN_RETRY_DELAY
            );
        }
        self.retry_delay = delay.max(MIN_RETRY_DELAY);
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Runs until `cancel` fires or the session closes its notification channel.
    ///
    /// `report` receives every [`ConnectionEvent`]; `on_snapshot` receives the
    /// full-state fetch made after each successful connection.
    pub async fn run<R, H>(&self, cancel: CancellationToken, mut report: R, mut on_snapshot: H)
    where
        R: FnMut(ConnectionEvent) + Send,
        H: FnMut(TelemetryFrame) + Send,
    {
        let mut notifications = self.session.subscribe();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            drain_notifications(&mut notifications);
            self.transition(ConnectionState::Connecting, &mut report);
            report(ConnectionEvent::Attempt { attempt });
            info!("Connecting to device {} (attempt {})", self.device_id, attempt);

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.connect_once() => r,
            };

            match result {
                Ok(()) => {
                    info!("Connected to device {}", self.device_id);
                    self.transition(ConnectionState::Connected, &mut report);
                    report(ConnectionEvent::Connected { attempt });
                    attempt = 0;

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.fetch_snapshot(&mut report, &mut on_snapshot) => {}
                    }

                    let lost = tokio::select! {
                        _ = cancel.cancelled() => break,
                        lost = self.wait_for_loss(&mut notifications) => lost,
                    };
                    let Some(reason) = lost else {
                        debug!("Notifications for device {} closed", self.device_id);
                        break;
                    };
                    info!("Device {} {}, reconnecting", self.device_id, reason);
                    report(ConnectionEvent::ConnectionLost { reason });
                    self.transition(ConnectionState::Disconnected, &mut report);
                }
                Err(e) => {
                    if e.is_connection_error() {
                        warn!(
                            "Connection to device {} failed (attempt {}): {}",
                            self.device_id, attempt, e
                        );
                    } else {
                        error!(
                            "Unexpected error connecting to device {} (attempt {}): {}",
                            self.device_id, attempt, e
                        );
                    }
                    self.transition(ConnectionState::Failed, &mut report);
                    report(ConnectionEvent::Failed { attempt, error: e });
                    report(ConnectionEvent::RetryScheduled {
                        attempt,
                        delay: self.retry_delay,
                    });
                    info!(
                        "Retrying device {} in {}s",
                        self.device_id,
                        self.retry_delay.as_secs()
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        self.transition(ConnectionState::Disconnected, &mut report);
        debug!("Supervisor for device {} exited", self.device_id);
    }

    fn transition<R: FnMut(ConnectionEvent)>(&self, to: ConnectionState, report: &mut R) {
        let from = std::mem::replace(&mut *self.state.write(), to);
        if from != to {
            report(ConnectionEvent::StateChanged { from, to });
        }
    }

    async fn connect_once(&self) -> crate::error::Result<()> {
        self.session.find().await?;
        self.session.connect().await
    }

    async fn fetch_snapshot<R, H>(&self, report: &mut R, on_snapshot: &mut H)
    where
        R: FnMut(ConnectionEvent),
        H: FnMut(TelemetryFrame),
    {
        match self.session.get().await {
            Ok(frame) => {
                debug!("Initial state for device {}: {:?}", self.device_id, frame);
                report(ConnectionEvent::SnapshotFetched {
                    fields: frame.len(),
                });
                on_snapshot(frame);
            }
            Err(e) => {
                error!(
                    "Error fetching initial state for device {}: {}",
                    self.device_id, e
                );
                report(ConnectionEvent::SnapshotFailed { error: e });
            }
        }
    }

    /// Waits for a `Disconnected`/`Error` notification. `None` if the channel closed.
    async fn wait_for_loss(
        &self,
        notifications: &mut broadcast::Receiver<SessionEvent>,
    ) -> Option<String> {
        loop {
            match notifications.recv().await {
                Ok(event) => {
                    if let Some(reason) = event.loss_reason() {
                        return Some(reason);
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    debug!("Supervisor for {} skipped {} notifications", self.device_id, n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Drops notifications left over from before the current attempt.
fn drain_notifications(rx: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
