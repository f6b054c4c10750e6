//! Contract with the external device-control library.
//!
//! A session owns the connection to one physical fan controller: discovery,
//! encryption and framing all live behind this trait.

use crate::config::DeviceDescriptor;
use crate::dps::{CommandFrame, TelemetryFrame};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Unsolicited or response data.
    Data(TelemetryFrame),
    /// Data pushed after a refresh request.
    DpRefresh(TelemetryFrame),
    Disconnected,
    Error(String),
}

impl SessionEvent {
    /// Telemetry carried by the event; `Data` and `DpRefresh` are treated alike.
    pub fn telemetry(&self) -> Option<&TelemetryFrame> {
        match self {
            SessionEvent::Data(frame) | SessionEvent::DpRefresh(frame) => Some(frame),
            _ => None,
        }
    }

    /// Description of a lost connection, if this event reports one.
    pub fn loss_reason(&self) -> Option<String> {
        match self {
            SessionEvent::Disconnected => Some("disconnected".to_string()),
            SessionEvent::Error(e) => Some(e.clone()),
            _ => None,
        }
    }
}

/// One connection to one physical device.
pub trait DeviceSession: Send + Sync + 'static {
    /// Locates the device on the local network.
    fn find(&self) -> impl Future<Output = Result<()>> + Send;

    /// Establishes the session.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the full current `dp -> value` map (schema query).
    fn get(&self) -> impl Future<Output = Result<TelemetryFrame>> + Send;

    /// Issues one field write.
    fn set(&self, command: CommandFrame) -> impl Future<Output = Result<()>> + Send;

    /// Asks the device to push fresh telemetry.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;

    /// Subscribes to session notifications.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Opens sessions for configured devices.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: DeviceSession;

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Arc<Self::Session>>;
}
