//! Domain producers for the external notification service.
//!
//! Each producer owns a [`Publisher`] bound to its domain's exchange,
//! accumulates messages through fluent methods, and flushes them with a single
//! `send()`. Delivery is best-effort: `send()` never fails, so a broker outage
//! can't break the operation that triggered the notification.

use tracing::error;

use crate::bus::Publisher;

mod hub;
pub mod messages;
pub mod transactions;
pub mod users;

pub use hub::Notifications;
pub use messages::{ChatMessage, MessagesProducer};
pub use transactions::{
    serialize_transaction, SerializedTransaction, Transaction, TransactionType,
    TransactionsProducer,
};
pub use users::{mint_token, Account, AccountCredentials, UsersProducer, UsersRpcService};

/// Routing keys agreed with the notification service.
pub mod routes {
    pub const USER_CREATED: &str = "user.event.created";
    pub const USER_DELETED: &str = "user.event.deleted";
    pub const USER_REQUEST_CREDENTIALS: &str = "user.request.credentials";
    pub const TRANSACTION_CREATED: &str = "transaction.event.created";
    pub const TRANSACTION_UPDATED: &str = "transaction.event.updated";
    pub const TRANSACTION_DELETED: &str = "transaction.event.deleted";
    pub const MESSAGE_SENT: &str = "message.event.sent";
}

/// Generic producer isolating publish failures from its callers.
pub struct Producer {
    publisher: Box<dyn Publisher>,
}

impl Producer {
    pub fn new(publisher: impl Publisher + 'static) -> Self {
        Self {
            publisher: Box::new(publisher),
        }
    }

    pub fn publisher(&self) -> &dyn Publisher {
        self.publisher.as_ref()
    }

    /// Publish everything buffered. Failures are logged, never returned.
    pub async fn send(&self) {
        if let Err(e) = self.publisher.publish().await {
            error!(error = %e, "Exception occurred while publishing messages");
        }
    }
}
