use crate::{
    client::PanelClient,
    model::{
        Transaction,
        TransactionFilter,
    },
};
use tracker::{
    OperationKind,
    Outcome,
    PollError,
    StatusProbe,
    SweepCandidate,
    TransactionFeed,
};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

const ACCEPT: &str = "Accept";
const REJECT: &str = "Reject";
const COMPLETED: &str = "Completed";
const WALLET_MODE: &str = "Wallet";
const WITHDRAWAL: &str = "Withdrawal";

/// The user's most recent wallet transactions, as seen by the background sweep.
#[derive(Clone, Debug)]
pub struct WalletFeed {
    client: PanelClient,
    user_id: String,
    page_size: u32,
}

impl WalletFeed {
    pub fn new(client: PanelClient, user_id: impl Into<String>) -> Self {
        Self {
            client,
            user_id: user_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Admin-accepted wallet withdrawals still waiting for payout are settled through the provider;
/// anything the admin has not decided on yet goes through the payment gateway.
pub fn candidate_for(tx: &Transaction) -> Option<SweepCandidate> {
    let status = tx.status.trim();
    let (kind, probe) = if status == ACCEPT
        && tx.mode.as_deref() == Some(WALLET_MODE)
        && tx.transaction_status.as_deref() != Some(COMPLETED)
    {
        (OperationKind::WalletWithdrawal, StatusProbe::Settlement)
    } else if status != ACCEPT && status != REJECT {
        let kind = if tx.transaction_type.as_deref() == Some(WITHDRAWAL) {
            OperationKind::WalletWithdrawal
        } else {
            OperationKind::GatewayDeposit
        };
        (kind, StatusProbe::Gateway)
    } else {
        return None;
    };
    Some(SweepCandidate {
        operation_id: tx.id.as_str().into(),
        kind,
        probe,
        amount: Some(tx.amount),
    })
}

/// Status written back to the collaborator once a transaction settles. `None` for outcomes that
/// are never written back.
pub fn write_back_status(
    probe: StatusProbe,
    outcome: Outcome,
    raw_status: Option<&str>,
) -> Option<String> {
    match (probe, outcome) {
        (_, Outcome::TimedOut) => None,
        (StatusProbe::Settlement, Outcome::Completed | Outcome::Accepted) => {
            Some(COMPLETED.to_string())
        }
        (StatusProbe::Settlement, Outcome::Rejected) => Some(REJECT.to_string()),
        (StatusProbe::Gateway, _) => match raw_status.map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(raw.to_string()),
            _ if outcome == Outcome::Rejected => Some(REJECT.to_string()),
            _ => Some(ACCEPT.to_string()),
        },
    }
}

impl TransactionFeed for WalletFeed {
    async fn recent(&self) -> Result<Vec<SweepCandidate>, PollError> {
        let page = self
            .client
            .user_transactions(&self.user_id, &TransactionFilter::page(1, self.page_size))
            .await?;
        Ok(page.transactions.iter().filter_map(candidate_for).collect())
    }

    async fn check(&self, candidate: &SweepCandidate) -> Result<String, PollError> {
        let id = candidate.operation_id.as_str();
        let status = match candidate.probe {
            StatusProbe::Settlement => self.client.settlement_status(id).await?,
            StatusProbe::Gateway => self.client.gateway_status(id).await?,
        };
        Ok(status)
    }

    async fn write_back(
        &self,
        candidate: &SweepCandidate,
        outcome: Outcome,
        raw_status: Option<&str>,
    ) -> Result<(), PollError> {
        let Some(status) = write_back_status(candidate.probe, outcome, raw_status) else {
            return Ok(());
        };
        let id = candidate.operation_id.as_str();
        match candidate.probe {
            StatusProbe::Settlement => self.client.update_wallet_withdrawal(id, &status).await?,
            StatusProbe::Gateway => self.client.update_transaction_request(id, &status).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        MockPanel,
        MockTransaction,
        Probe,
    };

    fn transaction(
        status: &str,
        mode: Option<&str>,
        transaction_status: Option<&str>,
        transaction_type: Option<&str>,
    ) -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            amount: 100.0,
            status: status.to_string(),
            transaction_status: transaction_status.map(str::to_string),
            transaction_type: transaction_type.map(str::to_string),
            mode: mode.map(str::to_string),
            created_at: None,
        }
    }

    #[test]
    fn candidate_for__accepted_unpaid_wallet_withdrawal__is_settlement() {
        let tx = transaction("Accept", Some("Wallet"), Some("Pending"), Some("Withdrawal"));

        let candidate = candidate_for(&tx).unwrap();

        assert_eq!(candidate.kind, OperationKind::WalletWithdrawal);
        assert_eq!(candidate.probe, StatusProbe::Settlement);
    }

    #[test]
    fn candidate_for__settled_records__are_skipped() {
        let paid = transaction("Accept", Some("Wallet"), Some("Completed"), Some("Withdrawal"));
        let accepted_gateway = transaction("Accept", Some("PowerPay"), None, Some("Deposit"));
        let rejected = transaction("Reject", Some("PowerPay"), None, Some("Deposit"));

        assert_eq!(candidate_for(&paid), None);
        assert_eq!(candidate_for(&accepted_gateway), None);
        assert_eq!(candidate_for(&rejected), None);
    }

    #[test]
    fn candidate_for__undecided_records__use_gateway_with_kind_from_type() {
        let deposit = transaction("Initial", Some("PowerPay"), None, Some("Deposit"));
        let withdrawal = transaction("Pending", Some("PowerPay"), None, Some("Withdrawal"));

        let deposit = candidate_for(&deposit).unwrap();
        let withdrawal = candidate_for(&withdrawal).unwrap();

        assert_eq!(
            (deposit.kind, deposit.probe),
            (OperationKind::GatewayDeposit, StatusProbe::Gateway)
        );
        assert_eq!(
            (withdrawal.kind, withdrawal.probe),
            (OperationKind::WalletWithdrawal, StatusProbe::Gateway)
        );
    }

    #[test]
    fn write_back_status__maps_outcome_per_probe() {
        use Outcome::*;
        use StatusProbe::*;

        assert_eq!(
            write_back_status(Settlement, Completed, Some("Accept")).as_deref(),
            Some("Completed")
        );
        assert_eq!(
            write_back_status(Settlement, Rejected, Some("Insufficent")).as_deref(),
            Some("Reject")
        );
        assert_eq!(
            write_back_status(Gateway, Completed, Some("Accept")).as_deref(),
            Some("Accept")
        );
        assert_eq!(write_back_status(Gateway, Rejected, None).as_deref(), Some("Reject"));
        assert_eq!(write_back_status(Gateway, TimedOut, Some("Initial")), None);
    }

    #[tokio::test]
    async fn wallet_feed__reads_checks_and_writes_back_through_panel() {
        // given
        let panel = MockPanel::start().unwrap();
        let client = PanelClient::new(panel.base_url()).unwrap();
        client.login("9990001111", "secret").await.unwrap();
        panel.add_transaction(MockTransaction::wallet_withdrawal_awaiting_payout("tx-9", 300.0));
        panel.add_transaction(MockTransaction::gateway("tx-10", "Deposit", "Initial", 50.0));
        panel.script(Probe::SingleTransaction, "tx-9", &["Insufficent"]);
        let feed = WalletFeed::new(client, MockPanel::USER_ID);

        // when
        let candidates = feed.recent().await.unwrap();
        let raw = feed.check(&candidates[0]).await.unwrap();
        feed.write_back(&candidates[0], Outcome::Rejected, Some(&raw))
            .await
            .unwrap();

        // then
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].probe, StatusProbe::Settlement);
        assert_eq!(candidates[1].kind, OperationKind::GatewayDeposit);
        assert_eq!(raw, "Insufficent");
        let patches = panel.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].route, "update_Wallet_Withdrawal_Transaction");
        assert_eq!(patches[0].id, "tx-9");
        assert_eq!(patches[0].status, "Reject");
    }
}
