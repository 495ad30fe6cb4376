//! Wire shapes of the panel API. The panel is loose about nesting (`data` vs bare payloads,
//! `id` vs `_id`, numbers sent as strings), so everything here is optional and is narrowed down
//! when converted into the public model.

use crate::{
    error::{
        Error,
        Result,
    },
    model::{
        Bank,
        BalanceLog,
        Game,
        Pagination,
        SubAccount,
        Transaction,
        TransactionPage,
        User,
    },
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
pub(crate) struct Envelope<T> {
    success: Option<bool>,
    message: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    pub(crate) fn into_data(self) -> Result<Option<T>> {
        if self.success == Some(false) {
            return Err(Error::Rejected(
                self.message
                    .unwrap_or_else(|| "request was not successful".to_string()),
            ));
        }
        Ok(self.data)
    }
}

#[derive(Deserialize)]
pub(crate) struct IdDto {
    id: Option<String>,
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
}

impl IdDto {
    fn take(self, what: &'static str) -> Result<String> {
        pick_id(self.id, self.underscore_id, what)
    }
}

fn pick_id(
    id: Option<String>,
    underscore_id: Option<String>,
    what: &'static str,
) -> Result<String> {
    id.or(underscore_id)
        .filter(|id| !id.trim().is_empty())
        .ok_or(Error::MissingIdentifier(what))
}

#[derive(Deserialize)]
pub(crate) struct UserDto {
    id: Option<String>,
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    phone: Option<String>,
    name: Option<String>,
}

/// `fetchUserByToken` and login answer with `user`, `data` or a bare user object.
#[derive(Deserialize)]
pub(crate) struct UserResponseDto {
    success: Option<bool>,
    message: Option<String>,
    user: Option<UserDto>,
    data: Option<UserDto>,
    #[serde(flatten)]
    bare: UserDto,
}

impl TryFrom<UserResponseDto> for User {
    type Error = Error;

    fn try_from(dto: UserResponseDto) -> Result<Self> {
        if dto.success == Some(false) {
            return Err(Error::Rejected(
                dto.message.unwrap_or_else(|| "login failed".to_string()),
            ));
        }
        let user = dto.user.or(dto.data).unwrap_or(dto.bare);
        Ok(User {
            id: pick_id(user.id, user.underscore_id, "user")?,
            phone: user.phone,
            name: user.name,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct StatusDto {
    status: Option<String>,
}

/// Status endpoints nest the status under `data`, occasionally not.
#[derive(Deserialize)]
pub(crate) struct StatusResponseDto {
    success: Option<bool>,
    message: Option<String>,
    data: Option<StatusDto>,
    status: Option<String>,
}

impl StatusResponseDto {
    pub(crate) fn into_status(self) -> Result<String> {
        if self.success == Some(false) {
            return Err(Error::Rejected(
                self.message
                    .unwrap_or_else(|| "status lookup failed".to_string()),
            ));
        }
        Ok(self
            .data
            .and_then(|data| data.status)
            .or(self.status)
            .unwrap_or_default())
    }
}

#[derive(Deserialize)]
pub(crate) struct GatewayStatusDto {
    success: Option<bool>,
    data: Option<StatusDto>,
}

impl GatewayStatusDto {
    /// The gateway answers `success: false` while it has nothing to report yet.
    pub(crate) fn into_status(self) -> String {
        if self.success != Some(true) {
            return String::new();
        }
        self.data.and_then(|data| data.status).unwrap_or_default()
    }
}

#[derive(Deserialize)]
pub(crate) struct CreatedResponseDto {
    data: Option<IdDto>,
    #[serde(flatten)]
    bare: IdDto,
}

impl CreatedResponseDto {
    pub(crate) fn into_id(self, what: &'static str) -> Result<String> {
        match self.data {
            Some(data) => data.take(what),
            None => self.bare.take(what),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    /// The panel lists newest first.
    pub(crate) fn latest(self) -> Option<T> {
        match self {
            OneOrMany::Many(items) => items.into_iter().next(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct BalanceLogDto {
    status: Option<String>,
    #[serde(rename = "CurrentBalance")]
    current_balance: Option<Value>,
}

impl From<BalanceLogDto> for BalanceLog {
    fn from(dto: BalanceLogDto) -> Self {
        BalanceLog {
            status: dto.status.unwrap_or_default(),
            current_balance: number(dto.current_balance.as_ref()),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct MainBalanceDto {
    balance: Option<Value>,
}

impl MainBalanceDto {
    pub(crate) fn balance(&self) -> f64 {
        number(self.balance.as_ref()).unwrap_or_default()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubAccountDto {
    id: Option<String>,
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    client_name: Option<String>,
    game_name: Option<String>,
    status: Option<String>,
}

impl TryFrom<SubAccountDto> for SubAccount {
    type Error = Error;

    fn try_from(dto: SubAccountDto) -> Result<Self> {
        Ok(SubAccount {
            id: pick_id(dto.id, dto.underscore_id, "sub-account")?,
            client_name: dto.client_name.unwrap_or_default(),
            game_name: dto.game_name,
            status: dto.status.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum SubAccountsDto {
    Keyed {
        #[serde(rename = "subAccounts")]
        sub_accounts: Vec<SubAccountDto>,
    },
    Wrapped {
        data: Vec<SubAccountDto>,
    },
    Bare(Vec<SubAccountDto>),
}

impl SubAccountsDto {
    pub(crate) fn into_accounts(self) -> Result<Vec<SubAccount>> {
        let accounts = match self {
            SubAccountsDto::Keyed { sub_accounts } => sub_accounts,
            SubAccountsDto::Wrapped { data } => data,
            SubAccountsDto::Bare(accounts) => accounts,
        };
        accounts.into_iter().map(SubAccount::try_from).collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GameDto {
    id: Option<String>,
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    name: Option<String>,
    status: Option<Value>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum GamesDto {
    Keyed { games: Vec<GameDto> },
    Wrapped { data: Vec<GameDto> },
    Bare(Vec<GameDto>),
}

impl GamesDto {
    fn into_games(self) -> Vec<GameDto> {
        match self {
            GamesDto::Keyed { games } => games,
            GamesDto::Wrapped { data } => data,
            GamesDto::Bare(games) => games,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PanelDto {
    panel_name: Option<String>,
    name: Option<String>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
pub(crate) struct PanelListDto {
    panels: Vec<PanelDto>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum PanelsDto {
    Nested { data: PanelListDto },
    Keyed { panels: Vec<PanelDto> },
    Wrapped { data: Vec<PanelDto> },
    Bare(Vec<PanelDto>),
}

impl PanelsDto {
    fn into_panels(self) -> Vec<PanelDto> {
        match self {
            PanelsDto::Nested { data } => data.panels,
            PanelsDto::Keyed { panels } => panels,
            PanelsDto::Wrapped { data } => data,
            PanelsDto::Bare(panels) => panels,
        }
    }
}

/// A game is offered only while it is active and an active panel carries its name.
pub(crate) fn available_games(games: GamesDto, panels: PanelsDto) -> Vec<Game> {
    let active_panels: Vec<String> = panels
        .into_panels()
        .into_iter()
        .filter(|panel| panel.is_active == Some(true))
        .filter_map(|panel| panel.panel_name.or(panel.name))
        .collect();

    games
        .into_games()
        .into_iter()
        .filter(|game| {
            game.status.as_ref().is_some_and(truthy) || game.is_active == Some(true)
        })
        .filter_map(|game| {
            let name = game.name?;
            if !active_panels.contains(&name) {
                return None;
            }
            let id = pick_id(game.id, game.underscore_id, "game").ok()?;
            Some(Game { id, name })
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionDto {
    id: Option<String>,
    #[serde(rename = "_id")]
    underscore_id: Option<String>,
    amount: Option<Value>,
    status: Option<String>,
    transaction_status: Option<String>,
    transaction_type: Option<String>,
    mode: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<TransactionDto> for Transaction {
    type Error = Error;

    fn try_from(dto: TransactionDto) -> Result<Self> {
        Ok(Transaction {
            id: pick_id(dto.id, dto.underscore_id, "transaction")?,
            amount: number(dto.amount.as_ref()).unwrap_or_default(),
            status: dto.status.unwrap_or_default(),
            transaction_status: dto.transaction_status,
            transaction_type: dto.transaction_type,
            mode: dto.mode,
            created_at: dto.created_at,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaginationDto {
    current_page: Option<Value>,
    total_pages: Option<Value>,
    total_transactions: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct TransactionPageDto {
    #[serde(default)]
    transactions: Vec<TransactionDto>,
    pagination: Option<PaginationDto>,
}

impl TransactionPageDto {
    pub(crate) fn into_page(self, requested_page: u32) -> Result<TransactionPage> {
        let transactions = self
            .transactions
            .into_iter()
            .map(Transaction::try_from)
            .collect::<Result<Vec<_>>>()?;
        let pagination = match self.pagination {
            Some(dto) => Pagination {
                current_page: number(dto.current_page.as_ref())
                    .map_or(requested_page, |n| n as u32),
                total_pages: number(dto.total_pages.as_ref()).map_or(1, |n| n as u32),
                total_transactions: number(dto.total_transactions.as_ref())
                    .map_or(transactions.len() as u64, |n| n as u64),
            },
            None => Pagination {
                current_page: requested_page,
                total_pages: 1,
                total_transactions: transactions.len() as u64,
            },
        };
        Ok(TransactionPage {
            transactions,
            pagination,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum BanksDto {
    Keyed { banks: Vec<Bank> },
    Wrapped { data: Vec<Bank> },
    Bare(Vec<Bank>),
}

impl From<BanksDto> for Vec<Bank> {
    fn from(dto: BanksDto) -> Self {
        match dto {
            BanksDto::Keyed { banks } => banks,
            BanksDto::Wrapped { data } => data,
            BanksDto::Bare(banks) => banks,
        }
    }
}

/// Error bodies carry a `message`; used to spot the "logged in from another device" eviction.
#[derive(Deserialize)]
pub(crate) struct ErrorBodyDto {
    pub(crate) message: Option<String>,
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
