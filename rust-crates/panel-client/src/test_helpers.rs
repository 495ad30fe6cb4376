//! In-process stand-in for the panel API, served by actix-web on its own thread.

use actix_web::{
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
    cookie::Cookie,
    dev::ServerHandle,
    web,
};
use serde_json::{
    Value,
    json,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    io,
    net::TcpListener,
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread::JoinHandle,
};

const SESSION_COOKIE: &str = "panel_session";
const SESSION_TOKEN: &str = "mock-session";
const EVICTED_MESSAGE: &str = "You have logged in from another device";

/// Status endpoints whose answers can be scripted per subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Probe {
    /// `GET /subAccount/latest-sub-user/{id}`
    SubUser,
    /// `GET /balance/getBalanceLogBySubUserId/{id}`
    BalanceLog,
    /// `GET /transaction/latest-transaction/{subUserId}`
    LatestTransaction,
    /// `GET /password/get-latestPassword-change-by-clientName/{clientName}`
    PasswordChange,
    /// `GET /transaction/get_single_transactions/{id}`
    SingleTransaction,
    /// `GET /transaction/callCheckStatus/{id}`
    CheckStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockTransaction {
    pub id: String,
    pub amount: f64,
    pub status: String,
    pub transaction_status: Option<String>,
    pub transaction_type: String,
    pub mode: String,
}

impl MockTransaction {
    /// Wallet withdrawal the admin accepted but the provider has not paid out yet.
    pub fn wallet_withdrawal_awaiting_payout(id: &str, amount: f64) -> Self {
        Self {
            id: id.to_string(),
            amount,
            status: "Accept".to_string(),
            transaction_status: Some("Pending".to_string()),
            transaction_type: "Withdrawal".to_string(),
            mode: "Wallet".to_string(),
        }
    }

    pub fn gateway(id: &str, transaction_type: &str, status: &str, amount: f64) -> Self {
        Self {
            id: id.to_string(),
            amount,
            status: status.to_string(),
            transaction_status: None,
            transaction_type: transaction_type.to_string(),
            mode: "PowerPay".to_string(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "_id": self.id,
            "amount": self.amount,
            "status": self.status,
            "transactionStatus": self.transaction_status,
            "transactionType": self.transaction_type,
            "mode": self.mode,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedPatch {
    pub route: String,
    pub id: String,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedTransfer {
    pub direction: &'static str,
    pub sub_account_id: String,
    pub amount: f64,
}

#[derive(Default)]
struct MockState {
    evicted: bool,
    phone: String,
    scripts: HashMap<(Probe, String), VecDeque<String>>,
    calls: HashMap<(Probe, String), usize>,
    transactions: Vec<MockTransaction>,
    patches: Vec<RecordedPatch>,
    balances: HashMap<String, f64>,
    balance_requests: Vec<String>,
    sub_accounts: Vec<(String, String)>,
    deleted: Vec<String>,
    transfers: Vec<RecordedTransfer>,
    password_changes: Vec<(String, String)>,
    main_balance: f64,
    main_balance_reads: usize,
    next_id: u64,
}

impl MockState {
    /// Pops the next scripted status; the last one repeats forever.
    fn next_status(&mut self, probe: Probe, subject: &str) -> Option<String> {
        let key = (probe, subject.to_string());
        *self.calls.entry(key.clone()).or_default() += 1;
        let script = self.scripts.get_mut(&key)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

type SharedState = web::Data<Mutex<MockState>>;

pub struct MockPanel {
    base_url: String,
    state: SharedState,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl MockPanel {
    pub const USER_ID: &'static str = "user-1";
    pub const USER_NAME: &'static str = "Mock User";

    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let address = listener.local_addr()?;
        let base_url = format!("http://{address}");
        let state: SharedState = web::Data::new(Mutex::new(MockState::default()));

        let server_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(server_state.clone())
                .route("/auth/login", web::post().to(login))
                .route("/auth/fetchUserByToken", web::get().to(current_user))
                .route("/auth/logout", web::get().to(logout))
                .route("/game/getAllGamesWithPagination", web::get().to(games))
                .route("/panel/getAllPanels", web::get().to(panels))
                .route(
                    "/subAccount/createSubAccount",
                    web::post().to(create_sub_account),
                )
                .route("/subAccount/getSubAccounts", web::get().to(sub_accounts))
                .route(
                    "/subAccount/latest-sub-user/{id}",
                    web::get().to(|req: HttpRequest, state: SharedState, id: web::Path<String>| {
                        scripted(req, state, id, Probe::SubUser)
                    }),
                )
                .route(
                    "/subAccount/deleteSubAccount/{id}",
                    web::delete().to(delete_sub_account),
                )
                .route("/balance/createBalanceLog", web::post().to(create_balance_log))
                .route(
                    "/balance/getBalanceLogBySubUserId/{id}",
                    web::get().to(|req: HttpRequest, state: SharedState, id: web::Path<String>| {
                        scripted(req, state, id, Probe::BalanceLog)
                    }),
                )
                .route(
                    "/transaction/get_MainUserBalance/{id}",
                    web::get().to(main_balance),
                )
                .route(
                    "/transaction/depositAmountRequest_ForSubUser",
                    web::post().to(|req: HttpRequest, state: SharedState, body: web::Json<Value>| {
                        transfer(req, state, body, "deposit")
                    }),
                )
                .route(
                    "/transaction/withdrawAmountRequest_ForSubUser",
                    web::post().to(|req: HttpRequest, state: SharedState, body: web::Json<Value>| {
                        transfer(req, state, body, "withdraw")
                    }),
                )
                .route(
                    "/transaction/latest-transaction/{id}",
                    web::get().to(|req: HttpRequest, state: SharedState, id: web::Path<String>| {
                        scripted(req, state, id, Probe::LatestTransaction)
                    }),
                )
                .route(
                    "/transaction/createTransaction",
                    web::post().to(create_transaction),
                )
                .route(
                    "/transaction/getUserTransactions/{id}",
                    web::post().to(user_transactions),
                )
                .route(
                    "/transaction/get_single_transactions/{id}",
                    web::get().to(|req: HttpRequest, state: SharedState, id: web::Path<String>| {
                        scripted(req, state, id, Probe::SingleTransaction)
                    }),
                )
                .route(
                    "/transaction/callCheckStatus/{id}",
                    web::get().to(|req: HttpRequest, state: SharedState, id: web::Path<String>| {
                        scripted(req, state, id, Probe::CheckStatus)
                    }),
                )
                .route(
                    "/transaction/update_Wallet_Withdrawal_Transaction/{id}",
                    web::patch().to(
                        |req: HttpRequest,
                         state: SharedState,
                         id: web::Path<String>,
                         body: web::Json<Value>| {
                            patch(req, state, id, body, "update_Wallet_Withdrawal_Transaction")
                        },
                    ),
                )
                .route(
                    "/transaction/update_Transaction_Request_Data_of_Request/{id}",
                    web::patch().to(
                        |req: HttpRequest,
                         state: SharedState,
                         id: web::Path<String>,
                         body: web::Json<Value>| {
                            patch(
                                req,
                                state,
                                id,
                                body,
                                "update_Transaction_Request_Data_of_Request",
                            )
                        },
                    ),
                )
                .route(
                    "/password/create-password-change-log",
                    web::post().to(create_password_change),
                )
                .route(
                    "/password/get-latestPassword-change-by-clientName/{name}",
                    web::get().to(|req: HttpRequest, state: SharedState, name: web::Path<String>| {
                        scripted(req, state, name, Probe::PasswordChange)
                    }),
                )
                .route(
                    "/bank/getAllBanksWithoutPagination/{id}",
                    web::get().to(banks),
                )
        })
        .workers(1)
        .shutdown_timeout(1)
        .listen(listener)?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        tracing::debug!("mock panel listening on {}", base_url);

        Ok(Self {
            base_url,
            state,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Scripts the statuses `probe` answers for `subject`, one per call.
    pub fn script(&self, probe: Probe, subject: &str, statuses: &[&str]) {
        self.lock().scripts.insert(
            (probe, subject.to_string()),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn calls(&self, probe: Probe, subject: &str) -> usize {
        self.lock()
            .calls
            .get(&(probe, subject.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Every later call is refused as if the user logged in somewhere else.
    pub fn evict_session(&self) {
        self.lock().evicted = true;
    }

    pub fn add_transaction(&self, transaction: MockTransaction) {
        self.lock().transactions.push(transaction);
    }

    pub fn transaction(&self, id: &str) -> Option<MockTransaction> {
        self.lock()
            .transactions
            .iter()
            .find(|tx| tx.id == id)
            .cloned()
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.lock().patches.clone()
    }

    pub fn set_sub_account_balance(&self, sub_account_id: &str, balance: f64) {
        self.lock()
            .balances
            .insert(sub_account_id.to_string(), balance);
    }

    pub fn set_main_balance(&self, balance: f64) {
        self.lock().main_balance = balance;
    }

    pub fn main_balance_reads(&self) -> usize {
        self.lock().main_balance_reads
    }

    pub fn balance_requests(&self) -> Vec<String> {
        self.lock().balance_requests.clone()
    }

    pub fn sub_account_ids(&self) -> Vec<String> {
        self.lock()
            .sub_accounts
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.lock().transfers.clone()
    }

    /// `(client name, new password)` of every password change request.
    pub fn password_changes(&self) -> Vec<(String, String)> {
        self.lock().password_changes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

impl Drop for MockPanel {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(false);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `handler` when the request carries the session cookie and the session was not evicted.
fn authorized(
    req: &HttpRequest,
    state: &SharedState,
    handler: impl FnOnce(&mut MockState) -> Value,
) -> HttpResponse {
    let mut state = lock(state);
    if state.evicted {
        return HttpResponse::Forbidden()
            .json(json!({ "success": false, "message": EVICTED_MESSAGE }));
    }
    let has_session = req
        .cookie(SESSION_COOKIE)
        .is_some_and(|cookie| cookie.value() == SESSION_TOKEN);
    if !has_session {
        return HttpResponse::Unauthorized()
            .json(json!({ "success": false, "message": "Please login first" }));
    }
    HttpResponse::Ok().json(handler(&mut state))
}

fn user_json(phone: &str) -> Value {
    json!({ "_id": MockPanel::USER_ID, "phone": phone, "name": MockPanel::USER_NAME })
}

fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body.get(field).and_then(Value::as_str).unwrap_or_default()
}

async fn login(state: SharedState, body: web::Json<Value>) -> HttpResponse {
    let phone = str_field(&body, "phone").to_string();
    {
        let mut state = lock(&state);
        state.evicted = false;
        state.phone = phone.clone();
    }
    HttpResponse::Ok()
        .cookie(
            Cookie::build(SESSION_COOKIE, SESSION_TOKEN)
                .path("/")
                .finish(),
        )
        .json(json!({ "success": true, "message": "Login successful", "data": user_json(&phone) }))
}

async fn current_user(req: HttpRequest, state: SharedState) -> HttpResponse {
    authorized(&req, &state, |state| {
        json!({ "success": true, "user": user_json(&state.phone) })
    })
}

async fn logout(req: HttpRequest, state: SharedState) -> HttpResponse {
    authorized(&req, &state, |_| json!({ "success": true, "message": "Logged out" }))
}

async fn games(req: HttpRequest, state: SharedState) -> HttpResponse {
    authorized(&req, &state, |_| {
        json!({ "success": true, "games": [
            { "_id": "game-1", "name": "LOTUSBOOK", "status": true },
            { "_id": "game-2", "name": "DIAMOND", "isActive": true },
            { "_id": "game-3", "name": "RETIRED", "status": false }
        ]})
    })
}

async fn panels(req: HttpRequest, state: SharedState) -> HttpResponse {
    authorized(&req, &state, |_| {
        json!({ "success": true, "data": { "panels": [
            { "panelName": "LOTUSBOOK", "isActive": true },
            { "panelName": "DIAMOND", "isActive": true },
            { "panelName": "RETIRED", "isActive": true }
        ]}})
    })
}

async fn create_sub_account(
    req: HttpRequest,
    state: SharedState,
    body: web::Json<Value>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let id = state.fresh_id("sub");
        let client_name = str_field(&body, "clientName").to_string();
        state.sub_accounts.push((id.clone(), client_name.clone()));
        json!({ "success": true, "data": { "_id": id, "clientName": client_name } })
    })
}

async fn sub_accounts(req: HttpRequest, state: SharedState) -> HttpResponse {
    authorized(&req, &state, |state| {
        let accounts: Vec<Value> = state
            .sub_accounts
            .iter()
            .map(|(id, client_name)| {
                json!({
                    "_id": id,
                    "clientName": client_name,
                    "gameName": "DIAMOND",
                    "status": "Accept",
                })
            })
            .collect();
        json!({ "success": true, "subAccounts": accounts })
    })
}

async fn delete_sub_account(
    req: HttpRequest,
    state: SharedState,
    id: web::Path<String>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let id = id.into_inner();
        state.sub_accounts.retain(|(existing, _)| *existing != id);
        state.deleted.push(id);
        json!({ "success": true, "message": "Sub account deleted" })
    })
}

async fn create_balance_log(
    req: HttpRequest,
    state: SharedState,
    body: web::Json<Value>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        state
            .balance_requests
            .push(str_field(&body, "userId").to_string());
        json!({ "success": true })
    })
}

async fn main_balance(
    req: HttpRequest,
    state: SharedState,
    _id: web::Path<String>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        state.main_balance_reads += 1;
        json!({ "success": true, "data": { "balance": state.main_balance } })
    })
}

async fn transfer(
    req: HttpRequest,
    state: SharedState,
    body: web::Json<Value>,
    direction: &'static str,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        state.transfers.push(RecordedTransfer {
            direction,
            sub_account_id: str_field(&body, "subUserId").to_string(),
            amount: body.get("amount").and_then(Value::as_f64).unwrap_or_default(),
        });
        json!({ "success": true, "message": "Request submitted" })
    })
}

async fn create_transaction(
    req: HttpRequest,
    state: SharedState,
    body: web::Json<Value>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let transaction = MockTransaction {
            id: state.fresh_id("tx"),
            amount: body.get("amount").and_then(Value::as_f64).unwrap_or_default(),
            status: "Initial".to_string(),
            transaction_status: None,
            transaction_type: str_field(&body, "transactionType").to_string(),
            mode: str_field(&body, "mode").to_string(),
        };
        let json = transaction.to_json();
        state.transactions.push(transaction);
        json!({ "success": true, "data": json })
    })
}

async fn user_transactions(
    req: HttpRequest,
    state: SharedState,
    _id: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let page = body.get("page").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
        let limit = body.get("limit").and_then(Value::as_u64).unwrap_or(10).max(1) as usize;
        let status = body.get("status").and_then(Value::as_str);
        let transaction_type = body.get("transactionType").and_then(Value::as_str);
        let matching: Vec<&MockTransaction> = state
            .transactions
            .iter()
            .filter(|tx| status.is_none_or(|status| tx.status == status))
            .filter(|tx| transaction_type.is_none_or(|ty| tx.transaction_type == ty))
            .collect();
        let total = matching.len();
        let transactions: Vec<Value> = matching
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .map(MockTransaction::to_json)
            .collect();
        json!({ "success": true, "data": {
            "transactions": transactions,
            "pagination": {
                "currentPage": page,
                "totalPages": total.div_ceil(limit).max(1),
                "totalTransactions": total,
            }
        }})
    })
}

async fn patch(
    req: HttpRequest,
    state: SharedState,
    id: web::Path<String>,
    body: web::Json<Value>,
    route: &'static str,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let id = id.into_inner();
        let status = str_field(&body, "status").to_string();
        if let Some(tx) = state.transactions.iter_mut().find(|tx| tx.id == id) {
            match (route, status.as_str()) {
                ("update_Wallet_Withdrawal_Transaction", "Completed") => {
                    tx.transaction_status = Some(status.clone());
                }
                ("update_Wallet_Withdrawal_Transaction", _) => {
                    tx.status = status.clone();
                    tx.transaction_status = Some(status.clone());
                }
                _ => tx.status = status.clone(),
            }
        }
        state.patches.push(RecordedPatch {
            route: route.to_string(),
            id,
            status,
        });
        json!({ "success": true })
    })
}

async fn create_password_change(
    req: HttpRequest,
    state: SharedState,
    body: web::Json<Value>,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        state.password_changes.push((
            str_field(&body, "clientName").to_string(),
            str_field(&body, "newPassword").to_string(),
        ));
        json!({ "success": true, "message": "Password change requested" })
    })
}

async fn banks(req: HttpRequest, state: SharedState, _id: web::Path<String>) -> HttpResponse {
    authorized(&req, &state, |_| {
        json!({ "success": true, "data": [{
            "bankName": "State Bank",
            "accNo": "001122334455",
            "accHolderName": MockPanel::USER_NAME,
            "ifscCode": "SBIN0000001",
            "upiId": "mock@upi"
        }]})
    })
}

/// Status probes answer with the next scripted status for the path subject, in the shape the
/// real endpoint uses. Unscripted subjects report no status.
async fn scripted(
    req: HttpRequest,
    state: SharedState,
    subject: web::Path<String>,
    probe: Probe,
) -> HttpResponse {
    authorized(&req, &state, |state| {
        let subject = subject.into_inner();
        let status = state.next_status(probe, &subject);
        match probe {
            Probe::SubUser => {
                json!({ "success": true, "data": { "_id": subject, "status": status } })
            }
            Probe::BalanceLog => {
                let mut entry = json!({ "status": status });
                if status.as_deref() == Some("Accept") {
                    if let Some(balance) = state.balances.get(&subject) {
                        entry["CurrentBalance"] = json!(balance);
                    }
                }
                json!({ "success": true, "data": [entry] })
            }
            Probe::LatestTransaction => {
                json!({ "success": true, "data": { "subUserId": subject, "status": status } })
            }
            Probe::PasswordChange => {
                json!({ "success": true, "data": { "clientName": subject, "status": status } })
            }
            Probe::SingleTransaction => {
                let stored = state.transactions.iter().find(|tx| tx.id == subject);
                let status = status.or_else(|| stored.map(|tx| tx.status.clone()));
                let amount = stored.map(|tx| tx.amount).unwrap_or_default();
                json!({ "success": true, "data": {
                    "_id": subject,
                    "amount": amount,
                    "status": status,
                }})
            }
            Probe::CheckStatus => match status {
                Some(status) => json!({ "success": true, "data": {
                    "success": true,
                    "data": { "status": status },
                }}),
                None => json!({ "success": true, "data": {
                    "success": false,
                    "message": "No record found",
                }}),
            },
        }
    })
}
