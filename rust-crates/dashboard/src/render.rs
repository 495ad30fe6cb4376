//! Plain-text rendering for terminal output.

use chrono::DateTime;
use panel_client::{
    Bank,
    Game,
    SubAccount,
    TransactionPage,
};
use std::fmt::Write;
use tracker::{
    CanonicalState,
    Notification,
    NotificationLevel,
    OperationKind,
    OperationSnapshot,
    Outcome,
};

pub fn amount(value: f64) -> String {
    format!("₹{value:.2}")
}

pub fn notification(notification: &Notification) -> String {
    let tag = match notification.level {
        NotificationLevel::Success => "[ok]",
        NotificationLevel::Error => "[error]",
        NotificationLevel::Info => "[info]",
    };
    format!("{tag} {}", notification.message)
}

pub fn progress(snapshot: &OperationSnapshot) -> String {
    match snapshot.outcome {
        Some(outcome) => format!("{}: {}", snapshot.label, outcome_label(outcome)),
        None => format!(
            "{}: {} (check {})",
            snapshot.label,
            state_label(snapshot.canonical_state),
            snapshot.attempt
        ),
    }
}

pub fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Accepted => "accepted",
        Outcome::Rejected => "rejected",
        Outcome::Completed => "completed",
        Outcome::TimedOut => "still processing, check back later",
    }
}

fn state_label(state: CanonicalState) -> &'static str {
    match state {
        CanonicalState::Pending => "pending",
        CanonicalState::Accepted => "accepted",
        CanonicalState::Rejected => "rejected",
        CanonicalState::Completed => "completed",
    }
}

pub fn games(games: &[Game]) -> String {
    if games.is_empty() {
        return "No games available\n".to_string();
    }
    let mut out = String::new();
    for game in games {
        let _ = writeln!(out, "{:<26} {}", game.id, game.name);
    }
    out
}

/// One row per ID. `balances` lines up with `accounts`; missing entries print as `-`.
pub fn sub_accounts(accounts: &[SubAccount], balances: &[Option<f64>]) -> String {
    if accounts.is_empty() {
        return "No IDs yet\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<26} {:<10} {:<12} {:<9} {:>12}",
        "ID", "CLIENT", "GAME", "STATE", "BALANCE"
    );
    for (index, account) in accounts.iter().enumerate() {
        let state = OperationKind::SubAccountCreation.classify(&account.status);
        let balance = balances
            .get(index)
            .copied()
            .flatten()
            .map(amount)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<26} {:<10} {:<12} {:<9} {:>12}",
            account.id,
            account.client_name,
            account.game_name.as_deref().unwrap_or("-"),
            state_label(state),
            balance
        );
    }
    out
}

pub fn banks(banks: &[Bank]) -> String {
    let mut out = String::new();
    for (index, bank) in banks.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {bank}", index + 1);
    }
    out
}

pub fn passbook(page: &TransactionPage) -> String {
    if page.transactions.is_empty() {
        return "No transactions\n".to_string();
    }
    let mut out = String::new();
    for tx in &page.transactions {
        let when = tx
            .created_at
            .as_deref()
            .map(format_timestamp)
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<18} {:<10} {:>12} {:<10} {}",
            when,
            tx.transaction_type.as_deref().unwrap_or("-"),
            amount(tx.amount),
            tx.status,
            tx.id
        );
    }
    let pagination = page.pagination;
    let _ = writeln!(
        out,
        "page {}/{} ({} transactions)",
        pagination.current_page,
        pagination.total_pages.max(1),
        pagination.total_transactions
    );
    out
}

fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.format("%d %b %Y %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}
