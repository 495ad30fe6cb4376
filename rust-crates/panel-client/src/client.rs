use crate::{
    dto::{
        self,
        BalanceLogDto,
        BanksDto,
        CreatedResponseDto,
        Envelope,
        ErrorBodyDto,
        GamesDto,
        GatewayStatusDto,
        MainBalanceDto,
        OneOrMany,
        PanelsDto,
        StatusResponseDto,
        SubAccountsDto,
        TransactionDto,
        TransactionPageDto,
        UserResponseDto,
    },
    error::{
        Error,
        Result,
    },
    model::{
        BalanceLog,
        Bank,
        Game,
        SubAccount,
        Transaction,
        TransactionFilter,
        TransactionPage,
        TransactionType,
        User,
        WalletRequest,
    },
    validation,
};
use reqwest::{
    RequestBuilder,
    StatusCode,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use serde_json::json;
use tracker::{
    OperationId,
    OperationKind,
    PollError,
    StatusPoller,
};

const EVICTED_MESSAGE: &str = "logged in from another device";
const SUB_ACCOUNT_PAGE_LIMIT: u32 = 50;
const GAME_PAGE_LIMIT: u32 = 50;
const PANEL_PAGE_LIMIT: u32 = 10;
pub const DEFAULT_BRANCH: &str = "Pbk1157";
const PAYMENT_GATEWAY: &str = "http://powerdreams.org/online/pay";

/// Cookie-authenticated client for the panel API. Cheap to clone; clones share the cookie jar.
#[derive(Clone, Debug)]
pub struct PanelClient {
    base_url: String,
    http: reqwest::Client,
    branch: String,
}

impl PanelClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            base_url,
            http,
            branch: DEFAULT_BRANCH.to_string(),
        })
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    // --- session ---

    pub async fn login(&self, phone: &str, password: &str) -> Result<User> {
        let request = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "phone": phone, "password": password }));
        let dto: UserResponseDto = self.send(request, "login").await?;
        let user = User::try_from(dto)?;
        tracing::info!(user_id = %user.id, "logged in");
        Ok(user)
    }

    pub async fn current_user(&self) -> Result<User> {
        let request = self.http.get(self.url("/auth/fetchUserByToken"));
        let dto: UserResponseDto = self.send(request, "user").await?;
        User::try_from(dto)
    }

    pub async fn logout(&self) -> Result<()> {
        let request = self.http.get(self.url("/auth/logout"));
        self.send_empty(request).await
    }

    // --- catalogue ---

    pub async fn available_games(&self) -> Result<Vec<Game>> {
        let games = self.http.get(self.url(&format!(
            "/game/getAllGamesWithPagination?page=1&limit={GAME_PAGE_LIMIT}"
        )));
        let panels = self.http.get(self.url(&format!(
            "/panel/getAllPanels?page=1&limit={PANEL_PAGE_LIMIT}"
        )));
        let (games, panels) = tokio::try_join!(
            self.send::<GamesDto>(games, "games"),
            self.send::<PanelsDto>(panels, "panels"),
        )?;
        Ok(dto::available_games(games, panels))
    }

    // --- sub-accounts ---

    pub async fn sub_accounts(&self) -> Result<Vec<SubAccount>> {
        let request = self.http.get(self.url(&format!(
            "/subAccount/getSubAccounts?page=1&limit={SUB_ACCOUNT_PAGE_LIMIT}"
        )));
        let dto: SubAccountsDto = self.send(request, "sub-accounts").await?;
        dto.into_accounts()
    }

    /// Submits the creation request and returns the new sub-account id to track.
    pub async fn create_sub_account(
        &self,
        game_id: &str,
        client_name: &str,
        phone: &str,
    ) -> Result<OperationId> {
        validation::validate_client_name(client_name)?;
        let request = self
            .http
            .post(self.url("/subAccount/createSubAccount"))
            .json(&json!({
                "gameId": game_id,
                "clientName": client_name,
                "phone": phone,
            }));
        let dto: CreatedResponseDto = self.send(request, "sub-account creation").await?;
        Ok(dto.into_id("sub-account")?.into())
    }

    pub async fn sub_account_status(&self, sub_account_id: &str) -> Result<String> {
        let request = self.http.get(self.url(&format!(
            "/subAccount/latest-sub-user/{sub_account_id}"
        )));
        self.status(request, "sub-account status").await
    }

    /// Unconditional delete. Callers wanting the balance guard use
    /// [`crate::flows::delete_sub_account`].
    pub async fn delete_sub_account(&self, sub_account_id: &str) -> Result<()> {
        let request = self.http.delete(self.url(&format!(
            "/subAccount/deleteSubAccount/{sub_account_id}"
        )));
        self.send_empty(request).await
    }

    // --- balances ---

    /// Asks the panel to fetch a fresh balance for the sub-account.
    pub async fn request_balance(&self, sub_account_id: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url("/balance/createBalanceLog"))
            .json(&json!({ "userId": sub_account_id }));
        self.send_empty(request).await
    }

    pub async fn latest_balance(&self, sub_account_id: &str) -> Result<Option<BalanceLog>> {
        let request = self.http.get(self.url(&format!(
            "/balance/getBalanceLogBySubUserId/{sub_account_id}"
        )));
        let envelope: Envelope<OneOrMany<BalanceLogDto>> =
            self.send(request, "balance log").await?;
        Ok(envelope
            .into_data()?
            .and_then(OneOrMany::latest)
            .map(Into::into))
    }

    pub async fn balance_status(&self, sub_account_id: &str) -> Result<String> {
        Ok(self
            .latest_balance(sub_account_id)
            .await?
            .map(|log| log.status)
            .unwrap_or_default())
    }

    pub async fn main_balance(&self, user_id: &str) -> Result<f64> {
        let request = self
            .http
            .get(self.url(&format!("/transaction/get_MainUserBalance/{user_id}")));
        let envelope: Envelope<MainBalanceDto> = self.send(request, "main balance").await?;
        Ok(envelope
            .into_data()?
            .map(|dto| dto.balance())
            .unwrap_or_default())
    }

    // --- sub-account money ---

    pub async fn deposit_to_sub_account(&self, sub_account_id: &str, amount: f64) -> Result<()> {
        self.sub_account_transfer(
            "/transaction/depositAmountRequest_ForSubUser",
            sub_account_id,
            amount,
        )
        .await
    }

    pub async fn withdraw_from_sub_account(
        &self,
        sub_account_id: &str,
        amount: f64,
    ) -> Result<()> {
        self.sub_account_transfer(
            "/transaction/withdrawAmountRequest_ForSubUser",
            sub_account_id,
            amount,
        )
        .await
    }

    async fn sub_account_transfer(
        &self,
        path: &str,
        sub_account_id: &str,
        amount: f64,
    ) -> Result<()> {
        validation::validate_amount(amount)?;
        let request = self.http.post(self.url(path)).json(&json!({
            "subUserId": sub_account_id,
            "amount": amount,
            "mode": "Wallet",
            "role": "SubUser",
        }));
        self.send_empty(request).await
    }

    pub async fn latest_transaction_status(&self, sub_account_id: &str) -> Result<String> {
        let request = self.http.get(self.url(&format!(
            "/transaction/latest-transaction/{sub_account_id}"
        )));
        self.status(request, "latest transaction").await
    }

    // --- wallet ---

    pub async fn create_wallet_transaction(
        &self,
        user_id: &str,
        wallet: &WalletRequest,
    ) -> Result<Transaction> {
        validation::validate_amount(wallet.amount)?;
        if wallet.transaction_type == TransactionType::Withdrawal && wallet.bank.is_none() {
            return Err(Error::Invalid(
                "Please select a bank account for withdrawal".to_string(),
            ));
        }
        let body = WalletRequestBody {
            user_id,
            amount: wallet.amount,
            transaction_type: wallet.transaction_type,
            role: "User",
            mode: "PowerPay",
            branch_user_name: &self.branch,
            bank: wallet.bank.as_ref(),
        };
        let request = self
            .http
            .post(self.url("/transaction/createTransaction"))
            .json(&body);
        let envelope: Envelope<TransactionDto> =
            self.send(request, "transaction creation").await?;
        let dto = envelope
            .into_data()?
            .ok_or(Error::MissingIdentifier("transaction"))?;
        Transaction::try_from(dto)
    }

    /// Where the user completes a wallet deposit.
    pub fn payment_link(&self, transaction_id: &str) -> String {
        format!("{PAYMENT_GATEWAY}/{}/{transaction_id}/pilotplay", self.branch)
    }

    pub async fn user_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage> {
        let request = self
            .http
            .post(self.url(&format!(
                "/transaction/getUserTransactions/{user_id}?page={}&limit={}",
                filter.page, filter.limit
            )))
            .json(filter);
        let envelope: Envelope<TransactionPageDto> =
            self.send(request, "transactions").await?;
        match envelope.into_data()? {
            Some(page) => page.into_page(filter.page),
            None => Ok(TransactionPage::default()),
        }
    }

    pub async fn transaction(&self, transaction_id: &str) -> Result<Transaction> {
        let request = self.http.get(self.url(&format!(
            "/transaction/get_single_transactions/{transaction_id}"
        )));
        let envelope: Envelope<TransactionDto> = self.send(request, "transaction").await?;
        let dto = envelope
            .into_data()?
            .ok_or(Error::MissingIdentifier("transaction"))?;
        Transaction::try_from(dto)
    }

    /// Provider-side status of an admin-accepted wallet withdrawal.
    pub async fn settlement_status(&self, transaction_id: &str) -> Result<String> {
        let request = self.http.get(self.url(&format!(
            "/transaction/get_single_transactions/{transaction_id}"
        )));
        self.status(request, "settlement status").await
    }

    /// Payment-gateway status of a wallet transaction.
    pub async fn gateway_status(&self, transaction_id: &str) -> Result<String> {
        let request = self.http.get(self.url(&format!(
            "/transaction/callCheckStatus/{transaction_id}"
        )));
        let envelope: Envelope<GatewayStatusDto> = self.send(request, "gateway status").await?;
        Ok(envelope
            .into_data()?
            .map(GatewayStatusDto::into_status)
            .unwrap_or_default())
    }

    pub async fn update_wallet_withdrawal(
        &self,
        transaction_id: &str,
        status: &str,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!(
                "/transaction/update_Wallet_Withdrawal_Transaction/{transaction_id}"
            )))
            .json(&json!({ "status": status }));
        self.send_empty(request).await
    }

    pub async fn update_transaction_request(
        &self,
        transaction_id: &str,
        status: &str,
    ) -> Result<()> {
        let request = self
            .http
            .patch(self.url(&format!(
                "/transaction/update_Transaction_Request_Data_of_Request/{transaction_id}"
            )))
            .json(&json!({ "status": status }));
        self.send_empty(request).await
    }

    pub async fn saved_banks(&self, user_id: &str) -> Result<Vec<Bank>> {
        let request = self.http.get(self.url(&format!(
            "/bank/getAllBanksWithoutPagination/{user_id}"
        )));
        let dto: BanksDto = self.send(request, "banks").await?;
        Ok(dto.into())
    }

    // --- passwords ---

    pub async fn request_password_change(
        &self,
        sub_account_id: &str,
        client_name: &str,
        new_password: &str,
    ) -> Result<()> {
        let request = self
            .http
            .post(self.url("/password/create-password-change-log"))
            .json(&json!({
                "subUserId": sub_account_id,
                "clientName": client_name,
                "newPassword": new_password,
            }));
        self.send_empty(request).await
    }

    pub async fn password_change_status(&self, client_name: &str) -> Result<String> {
        let request = self.http.get(self.url(&format!(
            "/password/get-latestPassword-change-by-clientName/{client_name}"
        )));
        self.status(request, "password change").await
    }

    // --- tracking ---

    /// The status call behind an operation of `kind`. `subject` is what the panel keys the
    /// status by: the sub-account id, the client name for password resets, the transaction id
    /// for wallet transactions.
    pub async fn status_of(&self, kind: OperationKind, subject: &str) -> Result<String> {
        match kind {
            OperationKind::SubAccountCreation => self.sub_account_status(subject).await,
            OperationKind::SubAccountBalanceQuery => self.balance_status(subject).await,
            OperationKind::SubAccountDeposit | OperationKind::SubAccountWithdrawal => {
                self.latest_transaction_status(subject).await
            }
            OperationKind::WalletDeposit
            | OperationKind::GatewayDeposit
            | OperationKind::WalletWithdrawal => self.gateway_status(subject).await,
            OperationKind::PasswordReset => self.password_change_status(subject).await,
        }
    }

    pub fn poller(&self, kind: OperationKind, subject: impl Into<String>) -> impl StatusPoller {
        let client = self.clone();
        let subject: String = subject.into();
        move |_id: OperationId| {
            let client = client.clone();
            let subject = subject.clone();
            async move {
                client
                    .status_of(kind, &subject)
                    .await
                    .map_err(PollError::from)
            }
        }
    }

    // --- plumbing ---

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn status(&self, request: RequestBuilder, context: &'static str) -> Result<String> {
        let dto: StatusResponseDto = self.send(request, context).await?;
        dto.into_status()
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        let envelope: Envelope<serde_json::Value> = self.send(request, "response").await?;
        envelope.into_data()?;
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<T> {
        let res = request.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        check_status(status, &bytes)?;
        if bytes.is_empty() {
            return serde_json::from_slice(b"{}")
                .map_err(|source| Error::Decode { context, source });
        }
        serde_json::from_slice(&bytes).map_err(|source| Error::Decode { context, source })
    }
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }
    if status.is_success() {
        return Ok(());
    }
    let evicted = serde_json::from_slice::<ErrorBodyDto>(body)
        .ok()
        .and_then(|dto| dto.message)
        .is_some_and(|message| message.contains(EVICTED_MESSAGE));
    if evicted {
        return Err(Error::Unauthorized);
    }
    Err(Error::Status {
        status,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WalletRequestBody<'a> {
    user_id: &'a str,
    amount: f64,
    transaction_type: TransactionType,
    role: &'static str,
    mode: &'static str,
    branch_user_name: &'a str,
    #[serde(flatten)]
    bank: Option<&'a Bank>,
}
