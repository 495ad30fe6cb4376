use crate::{
    policy::EffectSink,
    session::Session,
    sweep::{
        SweepConfig,
        SweepHandle,
        SweepScheduler,
        TransactionFeed,
    },
    tracker::Tracker,
};
use std::sync::Arc;

/// Everything whose lifetime is bounded by one login: the session gate, the tracker and the
/// background sweep. Views borrow the tracker; they never own timers.
pub struct SessionContext {
    session: Session,
    tracker: Tracker,
    sweep: Option<SweepHandle>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let session = Session::logged_out();
        let tracker = Tracker::new(session.clone());
        Self {
            session,
            tracker,
            sweep: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep.as_ref().is_some_and(|sweep| !sweep.is_finished())
    }

    /// Marks the session authenticated and starts the sweep unless one is already running.
    pub fn authenticate<F, S>(&mut self, feed: Arc<F>, sink: Arc<S>, config: SweepConfig)
    where
        F: TransactionFeed,
        S: EffectSink + ?Sized + 'static,
    {
        self.session.log_in();
        if self.is_sweeping() {
            return;
        }
        self.sweep = Some(SweepScheduler::start(
            self.tracker.clone(),
            feed,
            sink,
            config,
        ));
    }

    pub async fn logout(&mut self) {
        self.session.log_out();
        self.tracker.cancel_all();
        if let Some(sweep) = self.sweep.take() {
            sweep.shutdown().await;
        }
        self.tracker.forget_settlements();
    }
}
