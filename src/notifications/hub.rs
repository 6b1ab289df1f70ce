//! Composition root tying domain events to their producers.

use tracing::info;

use super::{
    Account, AccountCredentials, ChatMessage, MessagesProducer, Transaction,
    TransactionsProducer, UsersProducer, UsersRpcService,
};
use crate::rpc::{self, RpcTransport};

/// All notification producers plus the credentials RPC, built once and
/// handed to whatever reacts to account, transaction and chat events.
pub struct Notifications<R> {
    pub users: UsersProducer,
    pub transactions: TransactionsProducer,
    pub messages: MessagesProducer,
    pub users_rpc: UsersRpcService<R>,
}

impl<R: RpcTransport> Notifications<R> {
    pub fn new(
        users: UsersProducer,
        transactions: TransactionsProducer,
        messages: MessagesProducer,
        users_rpc: UsersRpcService<R>,
    ) -> Self {
        Self {
            users,
            transactions,
            messages,
            users_rpc,
        }
    }

    pub async fn account_registered(&self, account: &Account) {
        self.users.register_account(account).send().await
    }

    pub async fn account_deleted(&self, account_id: i64) {
        self.users.delete_account(account_id).send().await
    }

    /// Buffer a saved transaction; nothing is sent until
    /// [`flush_transactions`](Self::flush_transactions).
    pub fn transaction_saved(&self, transaction: &Transaction, created: bool) {
        if created {
            self.transactions.add_transactions([transaction]);
        } else {
            self.transactions.update_transactions([transaction]);
        }
    }

    pub fn transaction_deleted(&self, transaction_id: i64) {
        self.transactions.delete_transactions([transaction_id]);
    }

    pub async fn flush_transactions(&self) {
        self.transactions.send().await
    }

    pub async fn chat_message_sent(&self, message: &ChatMessage) {
        self.messages.add_new_message(message).send().await
    }

    pub async fn account_credentials(&self, account_id: i64) -> rpc::Result<AccountCredentials> {
        self.users_rpc.get_account_credentials(account_id).await
    }

    pub async fn unsubscribe_user_from_notifications(&self, account: &Account) {
        self.account_deleted(account.id).await
    }

    /// The token the notification service holds for `account_id`.
    pub async fn get_notifications_service_secret(&self, account_id: i64) -> rpc::Result<String> {
        Ok(self.account_credentials(account_id).await?.token)
    }

    /// Register every account and send them in one cycle.
    pub async fn subscribe_accounts(&self, accounts: &[Account]) -> usize {
        for account in accounts {
            self.users.register_account(account);
        }
        self.users.send().await;
        info!(count = accounts.len(), "Subscribed accounts to notifications");
        accounts.len()
    }

    /// Announce existing transactions as created, in one cycle.
    pub async fn send_account_transactions(&self, transactions: &[Transaction]) -> usize {
        self.transactions.add_transactions(transactions).send().await;
        info!(count = transactions.len(), "Sent account transactions");
        transactions.len()
    }
}

#[cfg(feature = "amqp")]
mod amqp {
    use std::sync::Arc;

    use super::*;
    use crate::bus::{AmqpTransport, AsyncPublisher, ExchangeConfig};
    use crate::config::Config;
    use crate::currency::{CurrencyError, NationalRates, RatesConverter};
    use crate::rpc::{AmqpRpcTransport, RpcClient};

    impl Notifications<AmqpRpcTransport> {
        /// Wire every producer to RabbitMQ as configured.
        pub fn from_config(config: &Config) -> Result<Self, CurrencyError> {
            let rates = NationalRates::new(config.currency.rates.clone())?;
            let amqp = &config.notifications.amqp;
            let transport = AmqpTransport::from_config(amqp);
            Ok(Self::new(
                UsersProducer::new(
                    AsyncPublisher::new(transport.clone(), ExchangeConfig::users()),
                    config.notifications.token_length,
                ),
                TransactionsProducer::new(
                    AsyncPublisher::new(transport.clone(), ExchangeConfig::transactions()),
                    Arc::new(RatesConverter::new(rates)),
                ),
                MessagesProducer::new(AsyncPublisher::new(transport, ExchangeConfig::messages())),
                UsersRpcService::new(RpcClient::new(
                    AmqpRpcTransport::from_config(amqp),
                    ExchangeConfig::users(),
                )),
            ))
        }
    }
}
