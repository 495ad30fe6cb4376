//! Operations that start something on the panel and then follow it with the tracker.

use crate::{
    client::PanelClient,
    error::{
        Error,
        Result,
    },
};
use std::sync::Arc;
use tracker::{
    EffectSink,
    OperationId,
    OperationKind,
    Outcome,
    TrackHandle,
    TrackOptions,
    Tracker,
};

/// Balance at or above which a sub-account may not be deleted.
pub const DELETE_BALANCE_LIMIT: f64 = 1.0;

/// Registry key for a UI-started operation. Wallet transactions use the bare transaction id so
/// the UI and the background sweep dedupe against each other.
pub fn operation_id(kind: OperationKind, subject: &str) -> OperationId {
    match kind {
        OperationKind::WalletDeposit
        | OperationKind::GatewayDeposit
        | OperationKind::WalletWithdrawal => subject.into(),
        other => format!("{other:?}/{subject}").into(),
    }
}

/// Tracks `kind` for `subject` and surfaces the terminal outcome through `sink`.
pub fn track_with_effects<S>(
    tracker: &Tracker,
    client: &PanelClient,
    kind: OperationKind,
    subject: &str,
    options: TrackOptions,
    sink: Arc<S>,
) -> Result<TrackHandle>
where
    S: EffectSink + ?Sized + 'static,
{
    let handle = tracker.track(
        operation_id(kind, subject),
        kind,
        client.poller(kind, subject),
        options,
        move |outcome: Outcome, _raw: Option<String>| {
            kind.side_effects(outcome).apply(sink.as_ref());
        },
    )?;
    Ok(handle)
}

/// Asks the panel for a fresh sub-account balance and waits until it is reported.
pub async fn refresh_sub_account_balance(
    client: &PanelClient,
    tracker: &Tracker,
    sub_account_id: &str,
    options: TrackOptions,
) -> Result<f64> {
    client.request_balance(sub_account_id).await?;
    let kind = OperationKind::SubAccountBalanceQuery;
    let handle = tracker.track(
        operation_id(kind, sub_account_id),
        kind,
        client.poller(kind, sub_account_id),
        options,
        |_, _| {},
    )?;
    match handle.wait().await {
        Some(Outcome::Completed) => client
            .latest_balance(sub_account_id)
            .await?
            .and_then(|log| log.current_balance)
            .ok_or_else(|| Error::Invalid("Balance is not available yet".to_string())),
        Some(Outcome::TimedOut) => Err(Error::Invalid(
            "Balance check is still processing, check back later".to_string(),
        )),
        Some(outcome) => Err(Error::Rejected(format!("balance check ended {outcome:?}"))),
        None if !tracker.session().is_authenticated() => Err(Error::Unauthorized),
        None => Err(Error::Invalid("Balance check was cancelled".to_string())),
    }
}

/// Deletes the sub-account only once a fresh balance shows nothing is left on it.
pub async fn delete_sub_account(
    client: &PanelClient,
    tracker: &Tracker,
    sub_account_id: &str,
    options: TrackOptions,
) -> Result<()> {
    let balance =
        refresh_sub_account_balance(client, tracker, sub_account_id, options).await?;
    if balance >= DELETE_BALANCE_LIMIT {
        return Err(Error::Invalid(
            "Please withdraw the balance first before deleting the account".to_string(),
        ));
    }
    client.delete_sub_account(sub_account_id).await?;
    tracing::info!(sub_account_id, "sub-account deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        MockPanel,
        Probe,
    };
    use std::{
        sync::Mutex,
        time::Duration,
    };
    use tracker::{
        CacheKey,
        Notification,
        NotificationLevel,
        Session,
    };

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

    fn fast() -> TrackOptions {
        TrackOptions::default()
            .with_interval(Duration::from_millis(10))
            .with_max_attempts(20)
    }

    async fn logged_in(panel: &MockPanel) -> PanelClient {
        let client = PanelClient::new(panel.base_url()).unwrap();
        client.login("9990001111", "secret").await.unwrap();
        client
    }

    #[test]
    fn operation_id__wallet_kinds_use_bare_transaction_id() {
        assert_eq!(
            operation_id(OperationKind::WalletDeposit, "tx-1"),
            OperationId::from("tx-1")
        );
        assert_eq!(
            operation_id(OperationKind::SubAccountDeposit, "sub-1"),
            OperationId::from("SubAccountDeposit/sub-1")
        );
    }

    #[tokio::test]
    async fn delete_sub_account__balance_left__refuses_and_keeps_account() {
        // given
        let panel = MockPanel::start().unwrap();
        let client = logged_in(&panel).await;
        let tracker = Tracker::new(Session::authenticated());
        panel.script(Probe::BalanceLog, "sub-1", &["Pending", "Accept"]);
        panel.set_sub_account_balance("sub-1", 25.0);

        // when
        let result = delete_sub_account(&client, &tracker, "sub-1", fast()).await;

        // then
        assert!(matches!(result, Err(Error::Invalid(msg)) if msg.contains("withdraw the balance")));
        assert!(panel.deleted().is_empty());
        assert_eq!(panel.balance_requests(), vec!["sub-1".to_string()]);
    }

    #[tokio::test]
    async fn delete_sub_account__empty_balance__deletes() {
        // given
        let panel = MockPanel::start().unwrap();
        let client = logged_in(&panel).await;
        let tracker = Tracker::new(Session::authenticated());
        panel.script(Probe::BalanceLog, "sub-2", &["Accept"]);
        panel.set_sub_account_balance("sub-2", 0.5);

        // when
        delete_sub_account(&client, &tracker, "sub-2", fast())
            .await
            .unwrap();

        // then
        assert_eq!(panel.deleted(), vec!["sub-2".to_string()]);
    }

    #[tokio::test]
    async fn track_with_effects__sub_account_deposit__notifies_once_on_accept() {
        // given
        let panel = MockPanel::start().unwrap();
        let client = logged_in(&panel).await;
        let tracker = Tracker::new(Session::authenticated());
        let sink = Arc::new(RecordingSink::default());
        client.deposit_to_sub_account("sub-3", 200.0).await.unwrap();
        panel.script(Probe::LatestTransaction, "sub-3", &["Pending", "Pending", "Accept"]);

        // when
        let handle = track_with_effects(
            &tracker,
            &client,
            OperationKind::SubAccountDeposit,
            "sub-3",
            fast(),
            sink.clone(),
        )
        .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, Some(Outcome::Completed));
        let notifications = sink.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].level, NotificationLevel::Success);
        assert_eq!(notifications[0].message, "Your transaction successful!");
        assert!(sink.invalidated.lock().unwrap().contains(&CacheKey::SubAccountBalance));
    }

    #[tokio::test]
    async fn track_with_effects__session_evicted__logs_out_without_notification() {
        // given
        let panel = MockPanel::start().unwrap();
        let client = logged_in(&panel).await;
        let session = Session::authenticated();
        let tracker = Tracker::new(session.clone());
        let sink = Arc::new(RecordingSink::default());
        panel.script(Probe::SubUser, "sub-4", &["Pending"]);
        panel.evict_session();

        // when
        let handle = track_with_effects(
            &tracker,
            &client,
            OperationKind::SubAccountCreation,
            "sub-4",
            fast(),
            sink.clone(),
        )
        .unwrap();
        let outcome = handle.wait().await;

        // then
        assert_eq!(outcome, None);
        assert!(!session.is_authenticated());
        assert!(sink.notifications.lock().unwrap().is_empty());
    }
}
