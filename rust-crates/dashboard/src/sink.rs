use crate::render;
use panel_client::{
    PanelClient,
    TransactionFilter,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracker::{
    CacheKey,
    EffectSink,
    Notification,
};

const RECENT_TRANSACTIONS: u32 = 5;

/// Prints notifications as they arrive and hands cache invalidations to the [`Refresher`].
pub struct TerminalSink {
    refetch: mpsc::UnboundedSender<CacheKey>,
}

impl TerminalSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CacheKey>) {
        let (refetch, receiver) = mpsc::unbounded_channel();
        (Self { refetch }, receiver)
    }
}

impl EffectSink for TerminalSink {
    fn notify(&self, notification: &Notification) {
        println!("{}", render::notification(notification));
    }

    fn invalidate(&self, key: CacheKey) {
        if self.refetch.send(key).is_err() {
            tracing::debug!(?key, "refresher already stopped; dropping invalidation");
        }
    }
}

/// Refetches whatever a settled operation made stale and prints the fresh value.
pub struct Refresher {
    client: PanelClient,
    user_id: String,
    sub_account: Option<String>,
}

impl Refresher {
    pub fn new(client: PanelClient, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            sub_account: None,
        }
    }

    /// The ID whose balance is refetched on [`CacheKey::SubAccountBalance`].
    pub fn focus(mut self, sub_account: impl Into<String>) -> Self {
        self.sub_account = Some(sub_account.into());
        self
    }

    /// Runs until every sender of `receiver` is gone.
    pub fn spawn(self, mut receiver: mpsc::UnboundedReceiver<CacheKey>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(first) = receiver.recv().await {
                for key in coalesce(first, &mut receiver) {
                    if let Err(err) = self.refetch(key).await {
                        if err.is_unauthorized() {
                            tracing::warn!("session ended; no further refreshes");
                            return;
                        }
                        tracing::warn!(?key, %err, "refresh failed");
                    }
                }
            }
        })
    }

    async fn refetch(&self, key: CacheKey) -> panel_client::Result<()> {
        match key {
            CacheKey::UserBalance => {
                let balance = self.client.main_balance(&self.user_id).await?;
                println!("Wallet balance: {}", render::amount(balance));
            }
            CacheKey::SubAccounts => {
                let accounts = self.client.sub_accounts().await?;
                print!("{}", render::sub_accounts(&accounts, &[]));
            }
            CacheKey::SubAccountBalance => {
                let Some(sub_account) = self.sub_account.as_deref() else {
                    return Ok(());
                };
                if let Some(balance) = self
                    .client
                    .latest_balance(sub_account)
                    .await?
                    .and_then(|log| log.current_balance)
                {
                    println!("ID balance: {}", render::amount(balance));
                }
            }
            CacheKey::Transactions => {
                let page = self
                    .client
                    .user_transactions(
                        &self.user_id,
                        &TransactionFilter::page(1, RECENT_TRANSACTIONS),
                    )
                    .await?;
                print!("{}", render::passbook(&page));
            }
        }
        Ok(())
    }
}

/// Drains whatever is already queued so a burst of settlements triggers one refetch per key.
fn coalesce(
    first: CacheKey,
    receiver: &mut mpsc::UnboundedReceiver<CacheKey>,
) -> Vec<CacheKey> {
    let mut keys = vec![first];
    while let Ok(key) = receiver.try_recv() {
        keys.push(key);
    }
    keys.sort_by_key(|key| refresh_rank(*key));
    keys.dedup();
    keys
}

fn refresh_rank(key: CacheKey) -> usize {
    match key {
        CacheKey::UserBalance => 0,
        CacheKey::SubAccountBalance => 1,
        CacheKey::SubAccounts => 2,
        CacheKey::Transactions => 3,
    }
}
