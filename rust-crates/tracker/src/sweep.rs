//! Periodic recovery of in-flight transactions.
//!
//! Each pass asks the feed for the user's unsettled transactions and hands every one that is
//! not already being polled to the [`Tracker`]. Settlements come back over a channel and are
//! written back to the collaborator before the user is notified. A transaction that settled in
//! a loop the sweep did not start is written back on the next pass without a second
//! notification.

use crate::{
    model::{
        OperationId,
        OperationKind,
        Outcome,
    },
    policy::EffectSink,
    tracker::{
        PollError,
        TrackHandle,
        TrackOptions,
        Tracker,
    },
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Which status call recovers a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusProbe {
    /// Admin-accepted wallet withdrawal waiting for provider payout.
    Settlement,
    /// Transaction still waiting on the payment gateway.
    Gateway,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SweepCandidate {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub probe: StatusProbe,
    pub amount: Option<f64>,
}

pub trait TransactionFeed: Send + Sync + 'static {
    /// Transactions the collaborator still reports as unsettled.
    fn recent(&self) -> impl Future<Output = Result<Vec<SweepCandidate>, PollError>> + Send;

    fn check(
        &self,
        candidate: &SweepCandidate,
    ) -> impl Future<Output = Result<String, PollError>> + Send;

    fn write_back(
        &self,
        candidate: &SweepCandidate,
        outcome: Outcome,
        raw_status: Option<&str>,
    ) -> impl Future<Output = Result<(), PollError>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepConfig {
    pub interval: Duration,
    pub track: TrackOptions,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            track: TrackOptions::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub discovered: usize,
    pub started: usize,
    pub already_tracked: usize,
    pub parked: usize,
    /// Settled earlier this session and written back without polling again.
    pub reconciled: usize,
}

/// A tracked transaction reaching a terminal state.
#[derive(Clone, Debug, PartialEq)]
pub struct Settled {
    pub candidate: SweepCandidate,
    pub outcome: Outcome,
    pub raw_status: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleReport {
    WrittenBack(Outcome),
    Parked,
    WriteBackFailed,
}

pub struct Sweep<F, S: ?Sized> {
    tracker: Tracker,
    feed: Arc<F>,
    sink: Arc<S>,
    config: SweepConfig,
    owned: HashMap<OperationId, TrackHandle>,
    parked: HashSet<OperationId>,
    /// Written back by this sweep; skipped if the feed still lists them.
    written: HashSet<OperationId>,
    /// Settled in a sweep loop, write-back failed, user not told yet.
    unwritten: HashSet<OperationId>,
    settled: mpsc::UnboundedSender<Settled>,
}

impl<F, S> Sweep<F, S>
where
    F: TransactionFeed,
    S: EffectSink + ?Sized + 'static,
{
    pub fn new(
        tracker: Tracker,
        feed: Arc<F>,
        sink: Arc<S>,
        config: SweepConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Settled>) {
        let (settled, receiver) = mpsc::unbounded_channel();
        let sweep = Self {
            tracker,
            feed,
            sink,
            config,
            owned: HashMap::new(),
            parked: HashSet::new(),
            written: HashSet::new(),
            unwritten: HashSet::new(),
            settled,
        };
        (sweep, receiver)
    }

    pub fn is_parked(&self, id: &OperationId) -> bool {
        self.parked.contains(id)
    }

    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    pub async fn run_once(&mut self) -> Result<SweepReport, PollError> {
        // Settled loops leave `owned` through `settle`; only cancelled ones are dropped here.
        self.owned
            .retain(|_, handle| !(handle.is_finished() && handle.is_cancelled()));
        let candidates = self.feed.recent().await?;
        let mut report = SweepReport {
            discovered: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in candidates {
            let id = candidate.operation_id.clone();
            if self.parked.contains(&id) {
                report.parked += 1;
                continue;
            }
            if self.owned.contains_key(&id)
                || self.tracker.is_tracking(&id)
                || self.written.contains(&id)
            {
                report.already_tracked += 1;
                continue;
            }
            if let Some(settlement) = self.tracker.settlement(&id) {
                // Whoever owned the loop already told the user, unless it was us and the
                // write-back failed.
                let notify = self.unwritten.contains(&id);
                self.reconcile(candidate, settlement.outcome, settlement.raw_status, notify)
                    .await;
                report.reconciled += 1;
                continue;
            }

            let poller = {
                let feed = self.feed.clone();
                let candidate = candidate.clone();
                move |_id: OperationId| {
                    let feed = feed.clone();
                    let candidate = candidate.clone();
                    async move { feed.check(&candidate).await }
                }
            };
            let on_terminal = {
                let settled = self.settled.clone();
                let candidate = candidate.clone();
                move |outcome: Outcome, raw_status: Option<String>| {
                    let _ = settled.send(Settled {
                        candidate,
                        outcome,
                        raw_status,
                    });
                }
            };

            match self.tracker.track(
                id.clone(),
                candidate.kind,
                poller,
                self.config.track,
                on_terminal,
            ) {
                Ok(handle) => {
                    debug!(operation_id = %id, kind = ?candidate.kind, "sweep picked up transaction");
                    self.owned.insert(id, handle);
                    report.started += 1;
                }
                Err(err) => {
                    warn!(operation_id = %id, %err, "sweep could not track transaction");
                }
            }
        }

        Ok(report)
    }

    /// Writes a terminal transition back and surfaces it. A timed-out transaction is parked for
    /// the rest of the session so it is not re-tracked on every pass.
    pub async fn settle(&mut self, settled: Settled) -> SettleReport {
        let Settled {
            candidate,
            outcome,
            raw_status,
        } = settled;
        self.owned.remove(&candidate.operation_id);
        self.reconcile(candidate, outcome, raw_status, true).await
    }

    async fn reconcile(
        &mut self,
        candidate: SweepCandidate,
        outcome: Outcome,
        raw_status: Option<String>,
        notify: bool,
    ) -> SettleReport {
        let id = candidate.operation_id.clone();
        let effects = candidate.kind.side_effects(outcome);

        if outcome == Outcome::TimedOut {
            self.parked.insert(id);
            if notify {
                effects.apply(self.sink.as_ref());
            }
            return SettleReport::Parked;
        }

        match self
            .feed
            .write_back(&candidate, outcome, raw_status.as_deref())
            .await
        {
            Ok(()) => {
                info!(
                    operation_id = %id,
                    kind = ?candidate.kind,
                    ?outcome,
                    "transaction reconciled"
                );
                self.unwritten.remove(&id);
                self.written.insert(id);
                if notify {
                    effects.apply(self.sink.as_ref());
                }
                SettleReport::WrittenBack(outcome)
            }
            Err(err) => {
                // Not parked: the next pass finds it again and retries the write-back.
                if notify {
                    self.unwritten.insert(id.clone());
                }
                if err == PollError::Unauthorized {
                    self.tracker.session().log_out();
                } else {
                    warn!(
                        operation_id = %id,
                        %err,
                        "failed to write back reconciled status"
                    );
                }
                SettleReport::WriteBackFailed
            }
        }
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.owned.drain() {
            handle.cancel();
        }
    }
}

pub struct SweepScheduler;

impl SweepScheduler {
    /// Runs a pass immediately, then every `config.interval`, until stopped or logged out.
    pub fn start<F, S>(
        tracker: Tracker,
        feed: Arc<F>,
        sink: Arc<S>,
        config: SweepConfig,
    ) -> SweepHandle
    where
        F: TransactionFeed,
        S: EffectSink + ?Sized + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let (sweep, settled_rx) = Sweep::new(tracker, feed, sink, config);
        let task = tokio::spawn(run_sweep(sweep, settled_rx, stop_rx));
        SweepHandle { stop, task }
    }
}

async fn run_sweep<F, S>(
    mut sweep: Sweep<F, S>,
    mut settled_rx: mpsc::UnboundedReceiver<Settled>,
    mut stop_rx: watch::Receiver<bool>,
) where
    F: TransactionFeed,
    S: EffectSink + ?Sized + 'static,
{
    let session = sweep.tracker.session().clone();
    let mut ticker = time::interval(sweep.config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval = ?sweep.config.interval, "background sweep started");

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => break,
            _ = session.wait_logged_out() => break,
            Some(settled) = settled_rx.recv() => {
                sweep.settle(settled).await;
            }
            _ = ticker.tick() => {
                if !session.is_authenticated() {
                    break;
                }
                match sweep.run_once().await {
                    Ok(report) => debug!(?report, "sweep pass finished"),
                    Err(PollError::Unauthorized) => {
                        session.log_out();
                        break;
                    }
                    Err(err) => warn!(%err, "sweep pass failed"),
                }
            }
        }
    }

    sweep.shutdown();
    info!("background sweep stopped");
}

async fn stopped(receiver: &mut watch::Receiver<bool>) {
    let _ = receiver.wait_for(|stop| *stop).await;
}

pub struct SweepHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the sweep and waits until every handle it owned was cancelled.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.task.await {
            warn!(%err, "sweep task ended abnormally");
        }
    }
}
