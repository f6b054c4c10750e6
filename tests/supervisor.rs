mod common;

use common::{MockSession, wait_until};
use parking_lot::Mutex;
use skyfan::dps::{DP_POWER, DP_SPEED};
use skyfan::supervisor::MIN_RETRY_DELAY;
use skyfan::{ConnectionEvent, ConnectionState, ReconnectSupervisor, SessionEvent, TelemetryFrame};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    session: Arc<MockSession>,
    supervisor: ReconnectSupervisor<MockSession>,
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
    snapshots: Arc<Mutex<Vec<TelemetryFrame>>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Harness {
    fn start(session: MockSession) -> Self {
        let session = Arc::new(session);
        let supervisor = ReconnectSupervisor::new("fan-1", session.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let handle = {
            let supervisor = supervisor.clone();
            let cancel = cancel.clone();
            let events = events.clone();
            let snapshots = snapshots.clone();
            tokio::spawn(async move {
                supervisor
                    .run(
                        cancel,
                        move |e| events.lock().push(e),
                        move |f| snapshots.lock().push(f),
                    )
                    .await;
            })
        };

        Self {
            session,
            supervisor,
            events,
            snapshots,
            cancel,
            handle,
        }
    }

    fn count(&self, pred: impl Fn(&ConnectionEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    async fn shutdown(self) -> ReconnectSupervisor<MockSession> {
        self.cancel.cancel();
        self.handle.await.unwrap();
        self.supervisor
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_single_snapshot() {
    let frame = TelemetryFrame::new().with(DP_POWER, true).with(DP_SPEED, 2);
    let h = Harness::start(MockSession::new().failing_connects(3).with_snapshot(frame.clone()));

    wait_until(Duration::from_secs(600), || h.session.get_calls() >= 1).await;
    // Give the supervisor a chance to do anything it should not.
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(
        h.count(|e| matches!(e, ConnectionEvent::RetryScheduled { .. })),
        3
    );
    assert_eq!(h.count(|e| matches!(e, ConnectionEvent::Failed { .. })), 3);
    assert_eq!(h.count(|e| matches!(e, ConnectionEvent::Connected { attempt: 4 })), 1);
    assert_eq!(h.session.get_calls(), 1);
    assert_eq!(h.snapshots.lock().as_slice(), &[frame]);

    let times = h.session.attempt_times();
    assert_eq!(times.len(), 4);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(60));
    }

    assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    let supervisor = h.shutdown().await;
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_is_fixed() {
    let h = Harness::start(MockSession::new().failing_connects(5));
    wait_until(Duration::from_secs(1200), || h.session.get_calls() >= 1).await;

    let delays: Vec<Duration> = h
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![Duration::from_secs(60); 5]);

    let times = h.session.attempt_times();
    assert_eq!(times.len(), 6);
    for pair in times.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(60) && gap < Duration::from_secs(61));
    }
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_reconnects_and_refetches() {
    let h = Harness::start(MockSession::new());
    wait_until(Duration::from_secs(5), || h.session.get_calls() == 1).await;

    h.session.emit(SessionEvent::Data(TelemetryFrame::new().with(DP_SPEED, 1)));
    h.session.emit(SessionEvent::Disconnected);
    wait_until(Duration::from_secs(5), || h.session.get_calls() == 2).await;

    h.session.emit(SessionEvent::Error("socket reset".into()));
    wait_until(Duration::from_secs(5), || h.session.get_calls() == 3).await;

    let reasons: Vec<String> = h
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::ConnectionLost { reason } => Some(reason.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec!["disconnected".to_string(), "socket reset".to_string()]);
    assert_eq!(h.session.find_calls(), 3);
    assert_eq!(h.count(|e| matches!(e, ConnectionEvent::RetryScheduled { .. })), 0);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_state_machine_transitions() {
    let h = Harness::start(MockSession::new().failing_connects(1));
    wait_until(Duration::from_secs(120), || h.session.get_calls() == 1).await;

    use ConnectionState::*;
    let transitions: Vec<(ConnectionState, ConnectionState)> = h
        .events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (Disconnected, Connecting),
            (Connecting, Failed),
            (Failed, Connecting),
            (Connecting, Connected),
        ]
    );
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_failure_is_reported_not_retried() {
    let h = Harness::start(MockSession::new().failing_snapshot());
    wait_until(Duration::from_secs(5), || h.session.get_calls() == 1).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.count(|e| matches!(e, ConnectionEvent::SnapshotFailed { .. })), 1);
    assert!(h.snapshots.lock().is_empty());
    assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    assert_eq!(h.session.find_calls(), 1);
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retrying() {
    let h = Harness::start(MockSession::new().failing_connects(u32::MAX));
    wait_until(Duration::from_secs(5), || h.session.find_calls() == 1).await;

    let session = h.session.clone();
    let supervisor = h.shutdown().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(session.find_calls(), 1);
    assert_eq!(supervisor.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_delay_does_not_spin() {
    let session = Arc::new(MockSession::new().failing_connects(u32::MAX));
    let supervisor =
        ReconnectSupervisor::new("fan-1", session.clone()).with_retry_delay(Duration::ZERO);
    assert_eq!(supervisor.retry_delay(), MIN_RETRY_DELAY);

    let cancel = CancellationToken::new();
    let handle = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run(cancel, |_| {}, |_| {}).await })
    };
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(session.find_calls() <= 11);
}
