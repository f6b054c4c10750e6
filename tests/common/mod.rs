#![allow(dead_code)]

use parking_lot::Mutex;
use skyfan::accessory::CharacteristicSink;
use skyfan::platform::{AccessoryHost, PlatformAccessory};
use skyfan::{
    BridgeError, CharacteristicUpdate, CommandFrame, DeviceDescriptor, DeviceSession, Result,
    ServiceKind, SessionEvent, SessionFactory, TelemetryFrame,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{Semaphore, broadcast};
use tokio::time::{Duration, Instant, sleep};
use uuid::Uuid;

/// In-memory device session with scripted failures.
pub struct MockSession {
    events: broadcast::Sender<SessionEvent>,
    failing_connects: AtomicU32,
    fail_sets: AtomicBool,
    find_calls: AtomicU32,
    get_calls: AtomicU32,
    refresh_calls: AtomicU32,
    attempt_times: Mutex<Vec<Instant>>,
    sent: Mutex<Vec<CommandFrame>>,
    snapshot: Mutex<Option<TelemetryFrame>>,
    set_gate: Option<Arc<Semaphore>>,
}

impl MockSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            failing_connects: AtomicU32::new(0),
            fail_sets: AtomicBool::new(false),
            find_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            attempt_times: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            snapshot: Mutex::new(Some(TelemetryFrame::new())),
            set_gate: None,
        }
    }

    /// The next `n` connection attempts fail.
    pub fn failing_connects(self, n: u32) -> Self {
        self.failing_connects.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_snapshot(self, frame: TelemetryFrame) -> Self {
        *self.snapshot.lock() = Some(frame);
        self
    }

    pub fn failing_snapshot(self) -> Self {
        *self.snapshot.lock() = None;
        self
    }

    /// `set` blocks until a permit is added to the returned semaphore.
    pub fn gated_sets(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.set_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub fn find_calls(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().clone()
    }

    pub fn sent(&self) -> Vec<(u32, serde_json::Value)> {
        self.sent
            .lock()
            .iter()
            .map(|c| (c.dp, c.value.clone()))
            .collect()
    }
}

impl DeviceSession for MockSession {
    async fn find(&self) -> Result<()> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(Instant::now());
        Ok(())
    }

    async fn connect(&self) -> Result<()> {
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::ConnectionFailed("handshake refused".into()));
        }
        Ok(())
    }

    async fn get(&self) -> Result<TelemetryFrame> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot.lock().clone();
        snapshot.ok_or(BridgeError::Timeout)
    }

    async fn set(&self, command: CommandFrame) -> Result<()> {
        if let Some(gate) = &self.set_gate {
            let permit = gate.acquire().await.map_err(|_| BridgeError::Offline)?;
            permit.forget();
        }
        if self.fail_sets.load(Ordering::SeqCst) {
            return Err(BridgeError::Offline);
        }
        self.sent.lock().push(command);
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Opens a fresh [`MockSession`] per accessory and remembers it.
///
/// Clones share the list of opened sessions.
#[derive(Clone, Default)]
pub struct MockFactory {
    sessions: Arc<Mutex<Vec<(String, Arc<MockSession>)>>>,
    refuse: Option<String>,
}

impl MockFactory {
    pub fn refusing(device_id: &str) -> Self {
        Self {
            refuse: Some(device_id.to_string()),
            ..Default::default()
        }
    }

    pub fn sessions_for(&self, device_id: &str) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Arc<MockSession>> {
        if self.refuse.as_deref() == Some(descriptor.id.as_str()) {
            return Err(BridgeError::ConnectionFailed("no route".into()));
        }
        let session = Arc::new(MockSession::new());
        self.sessions
            .lock()
            .push((descriptor.id.clone(), session.clone()));
        Ok(session)
    }
}

/// Host that records everything it is told.
#[derive(Default)]
pub struct RecordingHost {
    pub registered: Mutex<Vec<PlatformAccessory>>,
    pub unregistered: Mutex<Vec<PlatformAccessory>>,
    pub register_calls: AtomicU32,
    pub updates: Mutex<Vec<(Uuid, ServiceKind, CharacteristicUpdate)>>,
}

impl RecordingHost {
    pub fn updates_for(&self, accessory: Uuid) -> Vec<CharacteristicUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|(a, _, _)| *a == accessory)
            .map(|(_, _, u)| *u)
            .collect()
    }
}

impl CharacteristicSink for RecordingHost {
    fn update_characteristic(
        &self,
        accessory: Uuid,
        service: ServiceKind,
        update: &CharacteristicUpdate,
    ) {
        self.updates.lock().push((accessory, service, *update));
    }
}

impl AccessoryHost for RecordingHost {
    fn register_accessories(&self, _plugin: &str, _platform: &str, accessories: &[PlatformAccessory]) {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().extend_from_slice(accessories);
    }

    fn unregister_accessories(
        &self,
        _plugin: &str,
        _platform: &str,
        accessories: &[PlatformAccessory],
    ) {
        self.unregistered.lock().extend_from_slice(accessories);
    }
}

pub fn descriptor(id: &str, has_light: bool) -> DeviceDescriptor {
    DeviceDescriptor {
        has_light,
        ..DeviceDescriptor::new(id, "0123456789abcdef")
    }
}

/// Polls `cond` until it holds, failing the test after `limit` of (virtual) time.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", limit);
        sleep(Duration::from_millis(100)).await;
    }
}
