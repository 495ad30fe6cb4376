use crate::{
    model::{
        OperationId,
        OperationKind,
        OperationSnapshot,
        Outcome,
        TrackedOperation,
    },
    session::Session,
};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{
        self,
        Instant,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
const FAST_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_ATTEMPTS: u32 = 150;
const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("session is no longer authenticated")]
    Unauthorized,
    #[error("status request failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("cannot track operations without an authenticated session")]
    LoggedOut,
    #[error("invalid tracking options: {0}")]
    InvalidOptions(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackOptions {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_duration: Duration,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_duration: DEFAULT_MAX_DURATION,
        }
    }
}

impl TrackOptions {
    pub fn for_kind(kind: OperationKind) -> Self {
        let interval = match kind {
            OperationKind::SubAccountDeposit | OperationKind::SubAccountBalanceQuery => {
                FAST_POLL_INTERVAL
            }
            _ => DEFAULT_POLL_INTERVAL,
        };
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if self.interval.is_zero() {
            return Err(TrackError::InvalidOptions("poll interval must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(TrackError::InvalidOptions("max attempts must be at least 1"));
        }
        if self.max_duration.is_zero() {
            return Err(TrackError::InvalidOptions("max duration must be positive"));
        }
        Ok(())
    }
}

/// The status call for one operation. Response nesting is the implementor's problem; the
/// tracker only ever sees the bare provider status.
pub trait StatusPoller: Send + Sync + 'static {
    fn poll(
        &self,
        id: &OperationId,
    ) -> impl Future<Output = Result<String, PollError>> + Send;
}

impl<F, Fut> StatusPoller for F
where
    F: Fn(OperationId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, PollError>> + Send,
{
    fn poll(
        &self,
        id: &OperationId,
    ) -> impl Future<Output = Result<String, PollError>> + Send {
        (self)(id.clone())
    }
}

/// How a poll loop that ran to the end settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub kind: OperationKind,
    pub outcome: Outcome,
    pub raw_status: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Finish {
    Settled(Outcome),
    Cancelled,
    LoggedOut,
}

struct HandleShared {
    operation_id: OperationId,
    cancel: watch::Sender<bool>,
    snapshot: watch::Sender<OperationSnapshot>,
    finish: watch::Sender<Option<Finish>>,
}

/// Cancellable reference to one poll loop. Clones refer to the same loop.
#[derive(Clone)]
pub struct TrackHandle {
    shared: Arc<HandleShared>,
}

impl TrackHandle {
    fn new(op: &TrackedOperation) -> Self {
        let (cancel, _) = watch::channel(false);
        let (snapshot, _) = watch::channel(op.snapshot());
        let (finish, _) = watch::channel(None);
        Self {
            shared: Arc::new(HandleShared {
                operation_id: op.operation_id.clone(),
                cancel,
                snapshot,
                finish,
            }),
        }
    }

    pub fn operation_id(&self) -> &OperationId {
        &self.shared.operation_id
    }

    /// Stops scheduling further polls. A poll already in flight completes, but its result is
    /// dropped and no terminal callback fires.
    pub fn cancel(&self) {
        if !self.shared.cancel.send_replace(true) {
            debug!(operation_id = %self.shared.operation_id, "tracking cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.cancel.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finish.borrow().is_some()
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Resolves once the loop exits. `None` when it was cancelled or the session ended.
    pub async fn wait(&self) -> Option<Outcome> {
        let mut finish = self.shared.finish.subscribe();
        let settled = match finish.wait_for(Option::is_some).await {
            Ok(value) => *value,
            Err(_) => None,
        };
        match settled {
            Some(Finish::Settled(outcome)) => Some(outcome),
            _ => None,
        }
    }

    fn same_loop(&self, other: &TrackHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("operation_id", &self.shared.operation_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct TrackerInner {
    session: Session,
    active: Mutex<HashMap<OperationId, TrackHandle>>,
    settled: Mutex<HashMap<OperationId, Settlement>>,
}

/// Drives operations from creation to a terminal state, at most one poll loop per operation id.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                session,
                active: Mutex::new(HashMap::new()),
                settled: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Starts polling `id`. If a loop for `id` is already running its handle is returned and
    /// nothing new is spawned; `on_terminal` of the duplicate call is dropped unused.
    pub fn track<P, F>(
        &self,
        id: OperationId,
        kind: OperationKind,
        poller: P,
        options: TrackOptions,
        on_terminal: F,
    ) -> Result<TrackHandle, TrackError>
    where
        P: StatusPoller,
        F: FnOnce(Outcome, Option<String>) + Send + 'static,
    {
        if !self.inner.session.is_authenticated() {
            return Err(TrackError::LoggedOut);
        }
        options.validate()?;

        let op = TrackedOperation::new(id.clone(), kind);
        let handle = {
            let mut active = self.lock_active();
            if let Some(existing) = active.get(&id) {
                debug!(operation_id = %id, ?kind, "already tracked; reusing poll loop");
                return Ok(existing.clone());
            }
            let handle = TrackHandle::new(&op);
            active.insert(id.clone(), handle.clone());
            handle
        };

        debug!(operation_id = %id, ?kind, ?options, "tracking operation");
        let run = PollRun {
            tracker: self.clone(),
            handle: handle.clone(),
            op,
            options,
            poller,
        };
        tokio::spawn(run.drive(on_terminal));
        Ok(handle)
    }

    pub fn is_tracking(&self, id: &OperationId) -> bool {
        self.lock_active().contains_key(id)
    }

    pub fn handle(&self, id: &OperationId) -> Option<TrackHandle> {
        self.lock_active().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    /// Last terminal result for `id`, kept until [`Tracker::forget_settlements`]. Lets a caller
    /// that did not own the loop act on its result without polling again.
    pub fn settlement(&self, id: &OperationId) -> Option<Settlement> {
        self.lock_settled().get(id).cloned()
    }

    pub fn forget_settlements(&self) {
        self.lock_settled().clear();
    }

    pub fn cancel_all(&self) {
        let handles: Vec<TrackHandle> = self.lock_active().values().cloned().collect();
        for handle in handles {
            handle.cancel();
        }
    }

    fn record(&self, id: &OperationId, settlement: Settlement) {
        self.lock_settled().insert(id.clone(), settlement);
    }

    fn release(&self, handle: &TrackHandle) {
        let mut active = self.lock_active();
        if active
            .get(handle.operation_id())
            .is_some_and(|current| current.same_loop(handle))
        {
            active.remove(handle.operation_id());
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<OperationId, TrackHandle>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_settled(&self) -> MutexGuard<'_, HashMap<OperationId, Settlement>> {
        self.inner
            .settled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct PollRun<P> {
    tracker: Tracker,
    handle: TrackHandle,
    op: TrackedOperation,
    options: TrackOptions,
    poller: P,
}

impl<P: StatusPoller> PollRun<P> {
    async fn drive<F>(mut self, on_terminal: F)
    where
        F: FnOnce(Outcome, Option<String>) + Send + 'static,
    {
        let finish = self.poll_until_settled().await;
        // Recorded before release so the id is never seen as neither active nor settled.
        if let Finish::Settled(outcome) = finish {
            self.tracker.record(
                &self.op.operation_id,
                Settlement {
                    kind: self.op.kind,
                    outcome,
                    raw_status: self.op.raw_status.clone(),
                },
            );
        }
        // Free the id first so the callback may start a fresh loop for it.
        self.tracker.release(&self.handle);
        match finish {
            Finish::Settled(outcome) => {
                info!(
                    operation_id = %self.op.operation_id,
                    kind = ?self.op.kind,
                    ?outcome,
                    raw_status = ?self.op.raw_status,
                    attempt = self.op.attempt,
                    "operation settled"
                );
                on_terminal(outcome, self.op.raw_status.clone());
            }
            Finish::Cancelled => {
                debug!(operation_id = %self.op.operation_id, "poll loop cancelled");
            }
            Finish::LoggedOut => {
                debug!(operation_id = %self.op.operation_id, "poll loop stopped by logout");
            }
        }
        self.handle.shared.finish.send_replace(Some(finish));
    }

    async fn poll_until_settled(&mut self) -> Finish {
        let session = self.tracker.session().clone();
        let mut cancel = self.handle.shared.cancel.subscribe();
        let started = Instant::now();
        let mut reported_unrecognized = false;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Finish::Cancelled,
                _ = session.wait_logged_out() => return Finish::LoggedOut,
                _ = time::sleep(self.options.interval) => {}
            }

            if started.elapsed() >= self.options.max_duration {
                return self.time_out();
            }

            let result = self.poller.poll(&self.op.operation_id).await;
            if self.handle.is_cancelled() {
                return Finish::Cancelled;
            }
            if !session.is_authenticated() {
                return Finish::LoggedOut;
            }

            match result {
                Ok(raw) => {
                    self.op.observe(&raw);
                    if !reported_unrecognized && !self.op.kind.recognizes(&raw) {
                        reported_unrecognized = true;
                        warn!(
                            operation_id = %self.op.operation_id,
                            kind = ?self.op.kind,
                            raw_status = %raw,
                            "unrecognized provider status; treating as pending"
                        );
                    }
                    self.publish();
                    if let Some(outcome) = self.op.outcome {
                        return Finish::Settled(outcome);
                    }
                }
                Err(PollError::Unauthorized) => {
                    warn!(
                        operation_id = %self.op.operation_id,
                        "status poll was unauthorized"
                    );
                    session.log_out();
                    return Finish::LoggedOut;
                }
                Err(PollError::Transport(reason)) => {
                    self.op.observe_inconclusive();
                    self.publish();
                    warn!(
                        operation_id = %self.op.operation_id,
                        attempt = self.op.attempt,
                        %reason,
                        "status poll failed; retrying"
                    );
                }
            }

            if self.op.attempt >= self.options.max_attempts {
                return self.time_out();
            }
        }
    }

    fn time_out(&mut self) -> Finish {
        self.op.time_out();
        self.publish();
        warn!(
            operation_id = %self.op.operation_id,
            kind = ?self.op.kind,
            attempt = self.op.attempt,
            "operation did not settle within its polling budget"
        );
        Finish::Settled(Outcome::TimedOut)
    }

    fn publish(&self) {
        self.handle.shared.snapshot.send_replace(self.op.snapshot());
    }
}

async fn cancelled(receiver: &mut watch::Receiver<bool>) {
    let _ = receiver.wait_for(|cancelled| *cancelled).await;
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        model::CanonicalState,
        policy::{
            CacheKey,
            EffectSink,
            Notification,
        },
    };
    use std::sync::atomic::{
        AtomicU32,
        Ordering,
    };
    use tokio::sync::Notify;

    type Calls = Arc<Mutex<Vec<Instant>>>;
    type Terminals = Arc<Mutex<Vec<(Outcome, Option<String>)>>>;

    fn scripted_poller(
        script: Vec<Result<&'static str, PollError>>,
        calls: Calls,
    ) -> impl StatusPoller {
        let script = Arc::new(script);
        move |_id: OperationId| {
            let script = script.clone();
            let calls = calls.clone();
            async move {
                let n = {
                    let mut calls = calls.lock().unwrap();
                    calls.push(Instant::now());
                    calls.len()
                };
                let step = script
                    .get(n - 1)
                    .or_else(|| script.last())
                    .cloned()
                    .unwrap_or(Ok("Pending"));
                step.map(str::to_string)
            }
        }
    }

    fn recording_callback(
        terminals: Terminals,
    ) -> impl FnOnce(Outcome, Option<String>) + Send + 'static {
        move |outcome, raw| terminals.lock().unwrap().push((outcome, raw))
    }

    fn options(interval_ms: u64, max_attempts: u32) -> TrackOptions {
        TrackOptions::default()
            .with_interval(Duration::from_millis(interval_ms))
            .with_max_attempts(max_attempts)
            .with_max_duration(Duration::from_secs(3600))
    }

    #[tokio::test(start_paused = true)]
    async fn track__accept_on_third_poll__polls_three_times_at_interval() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(
            vec![Ok("Pending"), Ok("Pending"), Ok("Accept")],
            calls.clone(),
        );
        let start = Instant::now();

        // when
        let handle = tracker
            .track(
                "sub-1".into(),
                OperationKind::SubAccountCreation,
                poller,
                options(2000, 10),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;
        time::sleep(Duration::from_secs(20)).await;

        // then
        assert_eq!(outcome, Some(Outcome::Completed));
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        for (i, at) in calls.iter().enumerate() {
            assert_eq!(*at - start, Duration::from_millis(2000) * (i as u32 + 1));
        }
        assert_eq!(
            *terminals.lock().unwrap(),
            vec![(Outcome::Completed, Some("Accept".to_string()))]
        );
        assert!(!tracker.is_tracking(&"sub-1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn track__unrecognized_status_forever__times_out_after_attempt_budget() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(vec![Ok("Mystery")], calls.clone());

        // when
        let handle = tracker
            .track(
                "pw-1".into(),
                OperationKind::PasswordReset,
                poller,
                options(1000, 5),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, Some(Outcome::TimedOut));
        assert_eq!(calls.lock().unwrap().len(), 5);
        assert_eq!(
            *terminals.lock().unwrap(),
            vec![(Outcome::TimedOut, Some("Mystery".to_string()))]
        );
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.canonical_state, CanonicalState::Pending);
        assert_eq!(snapshot.outcome, Some(Outcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn track__wall_clock_budget_exceeded__times_out_before_attempt_budget() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(vec![Ok("Pending")], calls.clone());
        let opts = options(1000, 100).with_max_duration(Duration::from_millis(2500));

        // when
        let handle = tracker
            .track(
                "tx-9".into(),
                OperationKind::WalletDeposit,
                poller,
                opts,
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, Some(Outcome::TimedOut));
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(terminals.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn track__same_id_twice__runs_a_single_poll_loop() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let first_terminals = Terminals::default();
        let second_terminals = Terminals::default();
        let script = vec![Ok("Pending"), Ok("Pending"), Ok("Accept")];

        // when
        let first = tracker
            .track(
                "sub-7".into(),
                OperationKind::SubAccountCreation,
                scripted_poller(script.clone(), calls.clone()),
                options(1000, 10),
                recording_callback(first_terminals.clone()),
            )
            .unwrap();
        let second = tracker
            .track(
                "sub-7".into(),
                OperationKind::SubAccountCreation,
                scripted_poller(script, calls.clone()),
                options(1000, 10),
                recording_callback(second_terminals.clone()),
            )
            .unwrap();
        assert_eq!(tracker.active_count(), 1);
        let outcome = second.wait().await;

        // then
        assert!(first.same_loop(&second));
        assert_eq!(outcome, Some(Outcome::Completed));
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(first_terminals.lock().unwrap().len(), 1);
        assert!(second_terminals.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel__between_polls__prevents_next_poll_and_callback() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(vec![Ok("Pending"), Ok("Accept")], calls.clone());
        let handle = tracker
            .track(
                "tx-2".into(),
                OperationKind::SubAccountDeposit,
                poller,
                options(1000, 10),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let mut snapshots = handle.subscribe();
        snapshots.wait_for(|s| s.attempt == 1).await.unwrap();

        // when
        handle.cancel();
        let outcome = handle.wait().await;
        time::sleep(Duration::from_secs(10)).await;

        // then
        assert_eq!(outcome, None);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(terminals.lock().unwrap().is_empty());
        assert!(!tracker.is_tracking(&"tx-2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel__while_poll_in_flight__discards_late_terminal_response() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let terminals = Terminals::default();
        let gate = Arc::new(Notify::new());
        let started = Arc::new(AtomicU32::new(0));
        let poller = {
            let gate = gate.clone();
            let started = started.clone();
            move |_id: OperationId| {
                let gate = gate.clone();
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok::<_, PollError>("Accept".to_string())
                }
            }
        };
        let handle = tracker
            .track(
                "tx-3".into(),
                OperationKind::SubAccountDeposit,
                poller,
                options(1000, 10),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        // when
        handle.cancel();
        gate.notify_one();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, None);
        assert!(terminals.lock().unwrap().is_empty());
        assert_eq!(handle.snapshot().outcome, None);
    }

    #[tokio::test(start_paused = true)]
    async fn track__transport_failures__are_inconclusive_and_counted() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(
            vec![
                Err(PollError::Transport("connection reset".into())),
                Err(PollError::Transport("502".into())),
                Ok("Completed"),
            ],
            calls.clone(),
        );

        // when
        let handle = tracker
            .track(
                "alice01".into(),
                OperationKind::PasswordReset,
                poller,
                options(2000, 10),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, Some(Outcome::Completed));
        assert_eq!(handle.snapshot().attempt, 3);
        assert_eq!(terminals.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn track__transport_failures_exhaust_budget__times_out_once() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(
            vec![Err(PollError::Transport("timeout".into()))],
            calls.clone(),
        );

        // when
        let handle = tracker
            .track(
                "tx-4".into(),
                OperationKind::WalletDeposit,
                poller,
                options(1000, 3),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, Some(Outcome::TimedOut));
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(*terminals.lock().unwrap(), vec![(Outcome::TimedOut, None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn track__unauthorized_poll__logs_session_out_without_callback() {
        // given
        let session = Session::authenticated();
        let tracker = Tracker::new(session.clone());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let poller = scripted_poller(
            vec![Ok("Pending"), Err(PollError::Unauthorized)],
            calls.clone(),
        );

        // when
        let handle = tracker
            .track(
                "tx-5".into(),
                OperationKind::WalletWithdrawal,
                poller,
                options(1000, 10),
                recording_callback(terminals.clone()),
            )
            .unwrap();
        let outcome = handle.wait().await;
        let retry = tracker.track(
            "tx-6".into(),
            OperationKind::WalletWithdrawal,
            scripted_poller(vec![Ok("Accept")], calls.clone()),
            options(1000, 10),
            |_, _| {},
        );

        // then
        assert_eq!(outcome, None);
        assert!(!session.is_authenticated());
        assert!(terminals.lock().unwrap().is_empty());
        assert_eq!(retry.unwrap_err(), TrackError::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn session_log_out__stops_every_loop() {
        // given
        let session = Session::authenticated();
        let tracker = Tracker::new(session.clone());
        let calls = Calls::default();
        let handles: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| {
                tracker
                    .track(
                        id.into(),
                        OperationKind::SubAccountBalanceQuery,
                        scripted_poller(vec![Ok("Pending")], calls.clone()),
                        options(1000, 100),
                        |_, _| panic!("no terminal callback after logout"),
                    )
                    .unwrap()
            })
            .collect();
        time::sleep(Duration::from_millis(2500)).await;

        // when
        session.log_out();
        for handle in &handles {
            assert_eq!(handle.wait().await, None);
        }

        // then
        assert_eq!(calls.lock().unwrap().len(), 6);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settlement__settled_loop__is_recorded_before_callback_runs() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let seen_in_callback = Arc::new(Mutex::new(None));
        let on_terminal = {
            let tracker = tracker.clone();
            let seen = seen_in_callback.clone();
            move |_, _| *seen.lock().unwrap() = tracker.settlement(&"tx-8".into())
        };

        // when
        let handle = tracker
            .track(
                "tx-8".into(),
                OperationKind::GatewayDeposit,
                scripted_poller(vec![Ok("Initial"), Ok("Reject")], Calls::default()),
                options(1000, 10),
                on_terminal,
            )
            .unwrap();
        handle.wait().await;

        // then
        let expected = Settlement {
            kind: OperationKind::GatewayDeposit,
            outcome: Outcome::Rejected,
            raw_status: Some("Reject".to_string()),
        };
        assert_eq!(*seen_in_callback.lock().unwrap(), Some(expected.clone()));
        assert_eq!(tracker.settlement(&"tx-8".into()), Some(expected));
        tracker.forget_settlements();
        assert_eq!(tracker.settlement(&"tx-8".into()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn settlement__cancelled_loop__is_not_recorded() {
        // given
        let tracker = Tracker::new(Session::authenticated());
        let handle = tracker
            .track(
                "tx-9".into(),
                OperationKind::WalletWithdrawal,
                scripted_poller(vec![Ok("Pending")], Calls::default()),
                options(1000, 10),
                |_, _| {},
            )
            .unwrap();
        time::sleep(Duration::from_millis(1500)).await;

        // when
        handle.cancel();
        handle.wait().await;

        // then
        assert_eq!(tracker.settlement(&"tx-9".into()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn track__withdrawal_insufficient__rejects_and_refreshes_balance_once() {
        // given
        #[derive(Default)]
        struct RecordingSink {
            notifications: Mutex<Vec<Notification>>,
            invalidated: Mutex<Vec<CacheKey>>,
        }
        impl EffectSink for RecordingSink {
            fn notify(&self, notification: &Notification) {
                self.notifications.lock().unwrap().push(notification.clone());
            }
            fn invalidate(&self, key: CacheKey) {
                self.invalidated.lock().unwrap().push(key);
            }
        }

        let raw_sequence = ["Pending", "Pending", "Insufficent"];
        let tracker = Tracker::new(Session::authenticated());
        let calls = Calls::default();
        let terminals = Terminals::default();
        let sink = Arc::new(RecordingSink::default());
        let kind = OperationKind::WalletWithdrawal;
        let on_terminal = {
            let sink = sink.clone();
            let terminals = terminals.clone();
            move |outcome: Outcome, raw: Option<String>| {
                kind.side_effects(outcome).apply(sink.as_ref());
                terminals.lock().unwrap().push((outcome, raw));
            }
        };

        // when
        let handle = tracker
            .track(
                "tx-8".into(),
                kind,
                scripted_poller(raw_sequence.iter().map(|s| Ok(*s)).collect(), calls),
                options(1000, 10),
                on_terminal,
            )
            .unwrap();
        let outcome = handle.wait().await;

        // then
        let canonical: Vec<_> = raw_sequence.iter().map(|raw| kind.classify(raw)).collect();
        assert_eq!(
            canonical,
            vec![
                CanonicalState::Pending,
                CanonicalState::Pending,
                CanonicalState::Rejected
            ]
        );
        assert_eq!(outcome, Some(Outcome::Rejected));
        assert_eq!(
            *terminals.lock().unwrap(),
            vec![(Outcome::Rejected, Some("Insufficent".to_string()))]
        );
        assert_eq!(sink.notifications.lock().unwrap().len(), 1);
        let balance_refreshes = sink
            .invalidated
            .lock()
            .unwrap()
            .iter()
            .filter(|key| **key == CacheKey::UserBalance)
            .count();
        assert_eq!(balance_refreshes, 1);
    }

    #[test]
    fn validate__zero_attempts__is_refused() {
        let opts = TrackOptions::default().with_max_attempts(0);
        assert_eq!(
            opts.validate(),
            Err(TrackError::InvalidOptions("max attempts must be at least 1"))
        );
        assert_eq!(
            TrackOptions::for_kind(OperationKind::SubAccountDeposit).interval,
            Duration::from_millis(1000)
        );
    }
}
