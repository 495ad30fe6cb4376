pub mod context;
pub mod model;
pub mod policy;
pub mod session;
pub mod sweep;
pub mod tracker;

pub use context::SessionContext;
pub use model::{
    CanonicalState,
    OperationId,
    OperationKind,
    OperationSnapshot,
    Outcome,
    TrackedOperation,
};
pub use policy::{
    CacheKey,
    EffectSink,
    Notification,
    NotificationLevel,
    SideEffects,
};
pub use session::{
    Session,
    SessionState,
};
pub use sweep::{
    Settled,
    SettleReport,
    StatusProbe,
    Sweep,
    SweepCandidate,
    SweepConfig,
    SweepHandle,
    SweepReport,
    SweepScheduler,
    TransactionFeed,
};
pub use tracker::{
    PollError,
    Settlement,
    StatusPoller,
    TrackError,
    TrackHandle,
    TrackOptions,
    Tracker,
};
