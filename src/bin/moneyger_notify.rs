//! moneyger-notify: notification service management commands.
//!
//! ## Configuration
//! - MONEYGER_CONFIG: Path to a YAML config file (optional)
//! - MONEYGER__NOTIFICATIONS__AMQP__URL: Broker URL override
//! - MONEYGER_LOG: tracing filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use moneyger_notify::bus::{AmqpTransport, AsyncPublisher, ExchangeConfig};
use moneyger_notify::config::Config;
use moneyger_notify::currency::{NationalRates, RatesConverter};
use moneyger_notify::notifications::{
    Account, Transaction, TransactionsProducer, UsersProducer, UsersRpcService,
};
use moneyger_notify::rpc::{AmqpRpcTransport, RpcClient};
use moneyger_notify::utils::bootstrap::init_tracing;

#[derive(Parser)]
#[command(name = "moneyger-notify")]
#[command(about = "Manage moneyger accounts in the notification service")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe accounts to notifications.
    Register {
        /// Accounts as ID:EMAIL (e.g. 42:user@example.com)
        #[arg(required = true, value_parser = parse_account)]
        accounts: Vec<Account>,
    },
    /// Unsubscribe an account from notifications.
    Unsubscribe {
        account_id: i64,
    },
    /// Announce existing transactions read from a JSON array file.
    SendTransactions {
        file: PathBuf,
    },
    /// Announce deleted transactions.
    DeleteTransactions {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Print the notification service secret of an account.
    Credentials {
        account_id: i64,
    },
}

fn parse_account(value: &str) -> Result<Account, String> {
    let (id, email) = value
        .split_once(':')
        .ok_or_else(|| format!("expected ID:EMAIL, got '{}'", value))?;
    let id = id
        .parse()
        .map_err(|e| format!("invalid account id '{}': {}", id, e))?;
    if email.is_empty() {
        return Err(format!("missing email in '{}'", value));
    }
    Ok(Account {
        id,
        email: email.to_string(),
    })
}

fn users_producer(config: &Config) -> UsersProducer {
    let transport = AmqpTransport::from_config(&config.notifications.amqp);
    UsersProducer::new(
        AsyncPublisher::new(transport, ExchangeConfig::users()),
        config.notifications.token_length,
    )
}

fn transactions_producer(
    config: &Config,
) -> Result<TransactionsProducer, Box<dyn std::error::Error>> {
    let rates = NationalRates::new(config.currency.rates.clone())?;
    let transport = AmqpTransport::from_config(&config.notifications.amqp);
    Ok(TransactionsProducer::new(
        AsyncPublisher::new(transport, ExchangeConfig::transactions()),
        Arc::new(RatesConverter::new(rates)),
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref().and_then(|p| p.to_str()))?;

    match cli.command {
        Commands::Register { accounts } => {
            let producer = users_producer(&config);
            for account in &accounts {
                producer.register_account(account);
            }
            producer.send().await;
            info!(count = accounts.len(), "Accounts registered");
        }
        Commands::Unsubscribe { account_id } => {
            users_producer(&config).delete_account(account_id).send().await;
            info!(account_id, "Account unsubscribed");
        }
        Commands::SendTransactions { file } => {
            let transactions: Vec<Transaction> =
                serde_json::from_slice(&std::fs::read(&file)?)?;
            transactions_producer(&config)?
                .add_transactions(&transactions)
                .send()
                .await;
            info!(count = transactions.len(), "Transactions sent");
        }
        Commands::DeleteTransactions { ids } => {
            let count = ids.len();
            transactions_producer(&config)?
                .delete_transactions(ids)
                .send()
                .await;
            info!(count, "Transaction deletions sent");
        }
        Commands::Credentials { account_id } => {
            let service = UsersRpcService::new(RpcClient::new(
                AmqpRpcTransport::from_config(&config.notifications.amqp),
                ExchangeConfig::users(),
            ));
            let credentials = service.get_account_credentials(account_id).await?;
            println!("{}", credentials.token);
        }
    }

    Ok(())
}
