//! Per-kind mapping from provider status strings to canonical state, and the side effects a
//! terminal outcome triggers.
//!
//! The provider vocabulary is not fixed, so every mapping is total: anything unrecognized is
//! `Pending`. Matching is exact and case-sensitive after trimming whitespace. `Insufficent` is
//! spelled the way the provider spells it.

use crate::model::{
    CanonicalState,
    OperationKind,
    Outcome,
};

const ACCEPT: &str = "Accept";
const REJECT: &str = "Reject";
const INSUFFICIENT: &str = "Insufficent";
const PENDING: &str = "Pending";
const INITIAL: &str = "Initial";
const COMPLETED: &str = "Completed";

impl OperationKind {
    pub fn classify(self, raw: &str) -> CanonicalState {
        let raw = raw.trim();
        match self {
            OperationKind::SubAccountCreation
            | OperationKind::SubAccountBalanceQuery
            | OperationKind::WalletDeposit => match raw {
                ACCEPT => CanonicalState::Completed,
                _ => CanonicalState::Pending,
            },
            OperationKind::WalletWithdrawal => match raw {
                ACCEPT => CanonicalState::Completed,
                INSUFFICIENT | REJECT => CanonicalState::Rejected,
                // `Initial` is never auto-completed, for either transaction type.
                PENDING | INITIAL => CanonicalState::Pending,
                _ => CanonicalState::Pending,
            },
            OperationKind::GatewayDeposit | OperationKind::SubAccountDeposit => match raw {
                ACCEPT => CanonicalState::Completed,
                REJECT => CanonicalState::Rejected,
                _ => CanonicalState::Pending,
            },
            OperationKind::SubAccountWithdrawal => match raw {
                ACCEPT => CanonicalState::Accepted,
                REJECT => CanonicalState::Rejected,
                _ => CanonicalState::Pending,
            },
            OperationKind::PasswordReset => match raw {
                COMPLETED => CanonicalState::Completed,
                _ => CanonicalState::Pending,
            },
        }
    }

    /// Whether `raw` belongs to the vocabulary this kind knows about. Only used to decide
    /// whether an unexpected value is worth a diagnostic.
    pub fn recognizes(self, raw: &str) -> bool {
        let known: &[&str] = match self {
            OperationKind::SubAccountCreation => &[ACCEPT, PENDING, REJECT],
            OperationKind::SubAccountBalanceQuery => &[ACCEPT, PENDING],
            OperationKind::WalletDeposit | OperationKind::GatewayDeposit => {
                &[ACCEPT, PENDING, INITIAL, REJECT]
            }
            OperationKind::WalletWithdrawal => {
                &[ACCEPT, INSUFFICIENT, REJECT, PENDING, INITIAL]
            }
            OperationKind::SubAccountDeposit | OperationKind::SubAccountWithdrawal => {
                &[ACCEPT, REJECT, PENDING]
            }
            OperationKind::PasswordReset => &[COMPLETED, PENDING],
        };
        // An empty status means the record exists but the provider has not answered yet.
        let raw = raw.trim();
        raw.is_empty() || known.contains(&raw)
    }

    pub fn side_effects(self, outcome: Outcome) -> SideEffects {
        use CacheKey::*;

        let invalidate: &'static [CacheKey] = match (self, outcome) {
            (_, Outcome::TimedOut) => &[],
            (OperationKind::SubAccountCreation, _) => &[SubAccounts],
            (OperationKind::SubAccountBalanceQuery, _) => &[SubAccountBalance],
            (
                OperationKind::WalletDeposit
                | OperationKind::GatewayDeposit
                | OperationKind::WalletWithdrawal,
                _,
            ) => {
                &[UserBalance, Transactions]
            }
            (
                OperationKind::SubAccountDeposit | OperationKind::SubAccountWithdrawal,
                _,
            ) => &[UserBalance, SubAccountBalance, Transactions],
            (OperationKind::PasswordReset, _) => &[SubAccounts],
        };

        let notification = match outcome {
            Outcome::Completed => Notification::success(completed_message(self)),
            Outcome::Accepted => {
                Notification::success(format!("Your {} request was accepted", self.label()))
            }
            Outcome::Rejected => Notification::error(rejected_message(self)),
            Outcome::TimedOut => Notification::info(format!(
                "Your {} is still processing, check back later",
                self.label()
            )),
        };

        SideEffects {
            notification,
            invalidate,
        }
    }
}

fn completed_message(kind: OperationKind) -> String {
    match kind {
        OperationKind::SubAccountCreation => "ID created successfully!".to_string(),
        OperationKind::SubAccountBalanceQuery => "ID balance updated".to_string(),
        OperationKind::WalletDeposit
        | OperationKind::GatewayDeposit
        | OperationKind::WalletWithdrawal
        | OperationKind::SubAccountWithdrawal => {
            "Transaction completed successfully!".to_string()
        }
        OperationKind::SubAccountDeposit => "Your transaction successful!".to_string(),
        OperationKind::PasswordReset => {
            "Password reset completed successfully!".to_string()
        }
    }
}

fn rejected_message(kind: OperationKind) -> String {
    match kind {
        OperationKind::WalletWithdrawal => {
            "Transaction Rejected: insufficient provider balance or declined".to_string()
        }
        OperationKind::GatewayDeposit => "Transaction Rejected".to_string(),
        other => format!("Your {} was rejected", other.label()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    UserBalance,
    SubAccounts,
    SubAccountBalance,
    Transactions,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideEffects {
    pub notification: Notification,
    pub invalidate: &'static [CacheKey],
}

impl SideEffects {
    pub fn apply<S: EffectSink + ?Sized>(&self, sink: &S) {
        sink.notify(&self.notification);
        for key in self.invalidate {
            sink.invalidate(*key);
        }
    }
}

/// Where terminal outcomes surface: toasts plus cache refreshes.
pub trait EffectSink: Send + Sync {
    fn notify(&self, notification: &Notification);

    fn invalidate(&self, key: CacheKey);
}
