use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Identifier the collaborator assigned when the operation was started.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    SubAccountCreation,
    SubAccountBalanceQuery,
    WalletDeposit,
    /// Main-wallet deposit waiting on the payment gateway.
    GatewayDeposit,
    WalletWithdrawal,
    SubAccountDeposit,
    SubAccountWithdrawal,
    PasswordReset,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::SubAccountCreation,
        OperationKind::SubAccountBalanceQuery,
        OperationKind::WalletDeposit,
        OperationKind::GatewayDeposit,
        OperationKind::WalletWithdrawal,
        OperationKind::SubAccountDeposit,
        OperationKind::SubAccountWithdrawal,
        OperationKind::PasswordReset,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OperationKind::SubAccountCreation => "ID creation",
            OperationKind::SubAccountBalanceQuery => "ID balance",
            OperationKind::WalletDeposit | OperationKind::GatewayDeposit => "wallet deposit",
            OperationKind::WalletWithdrawal => "wallet withdrawal",
            OperationKind::SubAccountDeposit => "ID deposit",
            OperationKind::SubAccountWithdrawal => "ID withdrawal",
            OperationKind::PasswordReset => "password reset",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalState {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl CanonicalState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CanonicalState::Pending)
    }
}

/// Terminal result handed to the `on_terminal` callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Accepted,
    Rejected,
    Completed,
    TimedOut,
}

impl TryFrom<CanonicalState> for Outcome {
    type Error = CanonicalState;

    fn try_from(value: CanonicalState) -> Result<Self, Self::Error> {
        match value {
            CanonicalState::Pending => Err(value),
            CanonicalState::Accepted => Ok(Outcome::Accepted),
            CanonicalState::Rejected => Ok(Outcome::Rejected),
            CanonicalState::Completed => Ok(Outcome::Completed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedOperation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub raw_status: Option<String>,
    pub canonical_state: CanonicalState,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
}

impl TrackedOperation {
    pub fn new(operation_id: OperationId, kind: OperationKind) -> Self {
        Self {
            operation_id,
            kind,
            raw_status: None,
            canonical_state: CanonicalState::Pending,
            attempt: 0,
            started_at: Utc::now(),
            last_polled_at: None,
            outcome: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Applies one poll result. Returns `false` when the operation had already settled, in which
    /// case nothing changes.
    pub fn observe(&mut self, raw: &str) -> bool {
        if self.is_settled() {
            return false;
        }
        self.attempt = self.attempt.saturating_add(1);
        self.last_polled_at = Some(Utc::now());
        self.raw_status = Some(raw.to_string());
        self.canonical_state = self.kind.classify(raw);
        if let Ok(outcome) = Outcome::try_from(self.canonical_state) {
            self.outcome = Some(outcome);
        }
        true
    }

    /// Counts a poll that produced no status (transport failure).
    pub fn observe_inconclusive(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        self.attempt = self.attempt.saturating_add(1);
        self.last_polled_at = Some(Utc::now());
        true
    }

    pub fn time_out(&mut self) -> bool {
        if self.is_settled() {
            return false;
        }
        self.outcome = Some(Outcome::TimedOut);
        true
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            operation_id: self.operation_id.clone(),
            kind: self.kind,
            canonical_state: self.canonical_state,
            outcome: self.outcome,
            attempt: self.attempt,
            label: self.kind.label(),
        }
    }
}

/// What a view gets to render; never the polling handle itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub canonical_state: CanonicalState,
    pub outcome: Option<Outcome>,
    pub attempt: u32,
    pub label: &'static str,
}

impl OperationSnapshot {
    pub fn is_spinning(&self) -> bool {
        self.outcome.is_none()
    }
}
