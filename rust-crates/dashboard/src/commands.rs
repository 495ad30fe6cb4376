use crate::{
    Command,
    GlobalArgs,
    WalletCommand,
    render,
    sink::{
        Refresher,
        TerminalSink,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    bail,
    eyre,
};
use futures::future::join_all;
use panel_client::{
    Bank,
    PanelClient,
    TransactionFilter,
    TransactionType,
    User,
    WalletFeed,
    WalletRequest,
    flows,
    validation,
};
use profiles::{
    ProfileStore,
    TrackerTuning,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{
    info,
    warn,
};
use tracker::{
    CanonicalState,
    OperationKind,
    Outcome,
    SessionContext,
    TrackHandle,
};

const PASSWORD_ENV: &str = "PANEL_PASSWORD";
const REFRESH_GRACE: Duration = Duration::from_secs(5);

pub async fn run(global: GlobalArgs, command: Command) -> Result<()> {
    let store = ProfileStore::open(global.profile_dir.as_deref(), global.env)
        .map_err(|e| eyre!(e))?;
    let mut profile = store.load().map_err(|e| eyre!(e))?;
    let base_url = profile
        .resolve_base_url(global.env, global.base_url.as_deref())
        .map_err(|e| eyre!(e))?;
    let phone = global
        .phone
        .clone()
        .or_else(|| profile.phone.clone())
        .ok_or_else(|| eyre!("Specify --phone <number> for the first login"))?;

    let client = PanelClient::new(&base_url)?;
    let password = read_password("Panel password: ")?;
    let user = client
        .login(&phone, &password)
        .await
        .wrap_err_with(|| format!("logging in to {base_url}"))?;
    info!(user_id = %user.id, env = %global.env, "logged in");

    profile.base_url = Some(base_url);
    profile.phone = Some(phone.clone());
    profile.touch();
    store.save(&profile).map_err(|e| eyre!(e))?;

    let mut dashboard = Dashboard::new(client, user, phone, profile.tracker.clone());
    let result = dashboard.execute(command).await;
    dashboard.close().await;
    result
}

fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password(prompt).wrap_err("Failed to read password")
}

struct Dashboard {
    client: PanelClient,
    user: User,
    phone: String,
    tuning: TrackerTuning,
    context: SessionContext,
    refreshers: Vec<JoinHandle<()>>,
}

impl Dashboard {
    fn new(client: PanelClient, user: User, phone: String, tuning: TrackerTuning) -> Self {
        let context = SessionContext::new();
        context.session().log_in();
        Self {
            client,
            user,
            phone,
            tuning,
            context,
            refreshers: Vec::new(),
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Login => {
                let name = self.user.name.as_deref().unwrap_or(&self.phone);
                println!("Logged in as {name}");
                Ok(())
            }
            Command::Games => {
                let games = self.client.available_games().await?;
                print!("{}", render::games(&games));
                Ok(())
            }
            Command::Ids => self.list_ids().await,
            Command::CreateId { game, client_name } => {
                let id = self
                    .client
                    .create_sub_account(&game, &client_name, &self.phone)
                    .await?;
                println!("ID request {id} submitted");
                self.track(OperationKind::SubAccountCreation, id.as_str(), None)
                    .await
            }
            Command::Balance { sub_account: None } => {
                let balance = self.client.main_balance(&self.user.id).await?;
                println!("Wallet balance: {}", render::amount(balance));
                Ok(())
            }
            Command::Balance {
                sub_account: Some(sub_account),
            } => {
                let options = self
                    .tuning
                    .track_options(OperationKind::SubAccountBalanceQuery);
                let balance = flows::refresh_sub_account_balance(
                    &self.client,
                    self.context.tracker(),
                    &sub_account,
                    options,
                )
                .await?;
                println!("ID balance: {}", render::amount(balance));
                Ok(())
            }
            Command::Deposit {
                sub_account,
                amount,
            } => {
                self.client
                    .deposit_to_sub_account(&sub_account, amount)
                    .await?;
                self.track(
                    OperationKind::SubAccountDeposit,
                    &sub_account,
                    Some(sub_account.as_str()),
                )
                .await
            }
            Command::Withdraw {
                sub_account,
                amount,
            } => {
                self.client
                    .withdraw_from_sub_account(&sub_account, amount)
                    .await?;
                self.track(
                    OperationKind::SubAccountWithdrawal,
                    &sub_account,
                    Some(sub_account.as_str()),
                )
                .await
            }
            Command::Wallet(WalletCommand::Deposit { amount }) => {
                let request = WalletRequest {
                    amount,
                    transaction_type: TransactionType::Deposit,
                    bank: None,
                };
                let tx = self
                    .client
                    .create_wallet_transaction(&self.user.id, &request)
                    .await?;
                println!("Deposit {} created for {}", tx.id, render::amount(tx.amount));
                println!("Complete the payment at {}", self.client.payment_link(&tx.id));
                println!("Run `panel-dashboard watch` to follow it until it settles");
                Ok(())
            }
            Command::Wallet(WalletCommand::Withdraw { amount, bank }) => {
                let bank = self.choose_bank(bank).await?;
                let request = WalletRequest {
                    amount,
                    transaction_type: TransactionType::Withdrawal,
                    bank: Some(bank),
                };
                let tx = self
                    .client
                    .create_wallet_transaction(&self.user.id, &request)
                    .await?;
                println!(
                    "Withdrawal {} of {} submitted for approval",
                    tx.id,
                    render::amount(tx.amount)
                );
                Ok(())
            }
            Command::ResetPassword {
                sub_account,
                password,
            } => self.reset_password(&sub_account, password).await,
            Command::DeleteId { sub_account } => {
                let options = self
                    .tuning
                    .track_options(OperationKind::SubAccountBalanceQuery);
                flows::delete_sub_account(
                    &self.client,
                    self.context.tracker(),
                    &sub_account,
                    options,
                )
                .await?;
                println!("ID {sub_account} deleted");
                Ok(())
            }
            Command::Passbook {
                status,
                transaction_type,
                page,
                limit,
            } => {
                let mut filter = TransactionFilter::page(page, limit);
                filter.status = status;
                filter.transaction_type = transaction_type;
                let page = self
                    .client
                    .user_transactions(&self.user.id, &filter)
                    .await?;
                print!("{}", render::passbook(&page));
                Ok(())
            }
            Command::Watch => self.watch().await,
        }
    }

    async fn list_ids(&self) -> Result<()> {
        let accounts = self.client.sub_accounts().await?;
        let balances = join_all(
            accounts
                .iter()
                .map(|account| self.client.latest_balance(&account.id)),
        )
        .await
        .into_iter()
        .zip(&accounts)
        .map(|(result, account)| match result {
            Ok(log) => log.and_then(|log| log.current_balance),
            Err(err) => {
                warn!(sub_account = %account.id, %err, "could not read last balance");
                None
            }
        })
        .collect::<Vec<_>>();
        print!("{}", render::sub_accounts(&accounts, &balances));
        Ok(())
    }

    async fn choose_bank(&self, index: Option<usize>) -> Result<Bank> {
        let banks = self.client.saved_banks(&self.user.id).await?;
        match (index, banks.as_slice()) {
            (_, []) => bail!("No saved bank accounts; add one in the panel first"),
            (Some(index), banks) => index
                .checked_sub(1)
                .and_then(|index| banks.get(index))
                .cloned()
                .ok_or_else(|| eyre!("--bank must be between 1 and {}", banks.len())),
            (None, [only]) => Ok(only.clone()),
            (None, banks) => {
                print!("{}", render::banks(banks));
                bail!("Choose a bank account with --bank <n>")
            }
        }
    }

    async fn reset_password(&self, sub_account: &str, password: Option<String>) -> Result<()> {
        let accounts = self.client.sub_accounts().await?;
        let account = accounts
            .iter()
            .find(|account| account.id == sub_account)
            .ok_or_else(|| eyre!("No ID {sub_account} on this account"))?;
        let game = account.game_name.as_deref();
        let fixed = game.is_some_and(|game| {
            validation::FIXED_PASSWORD_GAMES
                .iter()
                .any(|(name, _)| *name == game)
        });
        let requested = match password {
            Some(password) => Some(password),
            None if fixed => None,
            None => Some(read_password("New password: ")?),
        };
        let new_password = validation::reset_password_for(game, requested.as_deref())?;
        if fixed {
            println!(
                "{} always resets to its default password: {new_password}",
                game.unwrap_or_default()
            );
        }
        self.client
            .request_password_change(&account.id, &account.client_name, &new_password)
            .await?;
        self.track(OperationKind::PasswordReset, &account.client_name, None)
            .await
    }

    async fn watch(&mut self) -> Result<()> {
        let feed = Arc::new(
            WalletFeed::new(self.client.clone(), self.user.id.clone())
                .with_page_size(self.tuning.sweep_page_size),
        );
        let (sink, refresher) = self.effects(None);
        self.context
            .authenticate(feed, sink.clone(), self.tuning.sweep_config());
        println!("Watching wallet transactions; press Ctrl-C to stop");

        let session = self.context.session().clone();
        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Received interrupt, stopping"),
                Err(err) => warn!(%err, "Received interrupt error, stopping anyway"),
            },
            _ = session.wait_logged_out() => {
                warn!("session ended by the panel");
            }
        }

        // The sweep keeps its own reference to the sink until `close` shuts it down.
        drop(sink);
        self.refreshers.push(refresher);
        Ok(())
    }

    /// Starts tracking, prints progress until the panel decides, then lets the refresher
    /// print whatever the outcome made stale.
    async fn track(
        &self,
        kind: OperationKind,
        subject: &str,
        focus: Option<&str>,
    ) -> Result<()> {
        let (sink, refresher) = self.effects(focus);
        let handle = flows::track_with_effects(
            self.context.tracker(),
            &self.client,
            kind,
            subject,
            self.tuning.track_options(kind),
            sink.clone(),
        )?;
        let outcome = self.follow(&handle).await;
        drop(sink);
        settle(refresher).await;
        match outcome? {
            Outcome::Rejected => bail!("The panel rejected the {kind}"),
            _ => Ok(()),
        }
    }

    async fn follow(&self, handle: &TrackHandle) -> Result<Outcome> {
        let mut updates = handle.subscribe();
        let mut shown: Option<CanonicalState> = None;
        let wait = handle.wait();
        tokio::pin!(wait);

        loop {
            tokio::select! {
                outcome = &mut wait => {
                    return match outcome {
                        Some(outcome) => Ok(outcome),
                        None if !self.context.session().is_authenticated() => {
                            Err(eyre!("The panel ended this session; log in again"))
                        }
                        None => Err(eyre!("Stopped following; the panel may still finish it")),
                    };
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let snapshot = updates.borrow_and_update().clone();
                    if snapshot.is_spinning() && shown != Some(snapshot.canonical_state) {
                        shown = Some(snapshot.canonical_state);
                        println!("{}", render::progress(&snapshot));
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                }
            }
        }
    }

    fn effects(&self, focus: Option<&str>) -> (Arc<TerminalSink>, JoinHandle<()>) {
        let (sink, receiver) = TerminalSink::new();
        let mut refresher = Refresher::new(self.client.clone(), self.user.id.clone());
        if let Some(focus) = focus {
            refresher = refresher.focus(focus);
        }
        (Arc::new(sink), refresher.spawn(receiver))
    }

    async fn close(&mut self) {
        let was_authenticated = self.context.session().is_authenticated();
        self.context.logout().await;
        for refresher in self.refreshers.drain(..) {
            settle(refresher).await;
        }
        if was_authenticated {
            if let Err(err) = self.client.logout().await {
                warn!(%err, "panel logout failed");
            }
        }
    }
}

async fn settle(refresher: JoinHandle<()>) {
    match tokio::time::timeout(REFRESH_GRACE, refresher).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "refresher ended abnormally"),
        Err(_) => warn!("refresh still running; not waiting for it"),
    }
}
