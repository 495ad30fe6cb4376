use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub phone: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubAccount {
    pub id: String,
    pub client_name: String,
    pub game_name: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceLog {
    pub status: String,
    pub current_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub status: String,
    pub transaction_status: Option<String>,
    pub transaction_type: Option<String>,
    pub mode: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_transactions: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bank {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acc_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acc_holder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifsc_code: Option<String>,
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.bank_name.as_deref().unwrap_or("bank");
        match (&self.acc_no, &self.upi_id) {
            (Some(acc_no), _) => write!(f, "{name} ({acc_no})"),
            (None, Some(upi)) => write!(f, "{name} ({upi})"),
            (None, None) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => f.write_str("Deposit"),
            TransactionType::Withdrawal => f.write_str("Withdrawal"),
        }
    }
}

/// Body of the passbook query. Empty filters are left out of the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub page: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
}

impl TransactionFilter {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit,
            status: None,
            transaction_type: None,
            min_amount: None,
            max_amount: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletRequest {
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub bank: Option<Bank>,
}
