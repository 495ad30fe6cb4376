//! HTTP client for the gaming-panel API and the glue that lets the tracker poll it.

pub mod client;
mod dto;
pub mod error;
pub mod feed;
pub mod flows;
pub mod model;
pub mod validation;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use client::{
    DEFAULT_BRANCH,
    PanelClient,
};
pub use error::{
    Error,
    Result,
};
pub use feed::WalletFeed;
pub use model::{
    BalanceLog,
    Bank,
    Game,
    Pagination,
    SubAccount,
    Transaction,
    TransactionFilter,
    TransactionPage,
    TransactionType,
    User,
    WalletRequest,
};
