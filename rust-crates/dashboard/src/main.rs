use clap::{
    Args,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use profiles::Environment;
use std::path::PathBuf;

mod commands;
mod logging;
mod render;
mod sink;

#[derive(Parser, Debug)]
#[command(version, about = "Gaming panel dashboard", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// production, staging or local
    #[arg(long, global = true, default_value = "production")]
    pub env: Environment,

    /// Panel API URL; saved to the profile once a login succeeds
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Defaults to ~/.panel-dashboard
    #[arg(long, global = true)]
    pub profile_dir: Option<String>,

    #[arg(long, global = true)]
    pub phone: Option<String>,

    /// Write a daily-rotated log file here in addition to stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify credentials and remember the phone number
    Login,
    /// List the games an ID can be created for
    Games,
    /// List game IDs
    Ids,
    /// Create a game ID and follow it until the panel decides
    CreateId {
        #[arg(long)]
        game: String,
        #[arg(long)]
        client_name: String,
    },
    /// Main wallet balance, or a fresh balance of one ID
    Balance {
        #[arg(long)]
        sub_account: Option<String>,
    },
    /// Move funds from the wallet into an ID
    Deposit {
        #[arg(long)]
        sub_account: String,
        #[arg(long)]
        amount: f64,
    },
    /// Move funds from an ID back to the wallet
    Withdraw {
        #[arg(long)]
        sub_account: String,
        #[arg(long)]
        amount: f64,
    },
    /// Wallet deposits and withdrawals through the payment gateway
    #[command(subcommand)]
    Wallet(WalletCommand),
    /// Reset an ID's game password and follow the panel until it is applied
    ResetPassword {
        #[arg(long)]
        sub_account: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Delete an ID once its balance is below 1
    DeleteId {
        #[arg(long)]
        sub_account: String,
    },
    /// Transaction history
    Passbook {
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        transaction_type: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Settle in-flight wallet transactions in the background until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum WalletCommand {
    /// Request a gateway deposit and print the payment link
    Deposit {
        #[arg(long)]
        amount: f64,
    },
    /// Request a payout to one of the saved bank accounts
    Withdraw {
        #[arg(long)]
        amount: f64,
        /// 1-based index into the saved bank accounts
        #[arg(long)]
        bank: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::init_tracing(cli.global.log_dir.as_deref())?;
    commands::run(cli.global, cli.command).await
}
