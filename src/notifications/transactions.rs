//! Transaction change notifications.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{routes, Producer};
use crate::bus::{OutboundMessage, Publisher};
use crate::currency::{CurrencyCode, CurrencyConverter};

/// Currency the notification service reports amounts in.
pub const REPORTING_CURRENCY: CurrencyCode = CurrencyCode::Usd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "IN")]
    Income,
    #[serde(rename = "OUT")]
    Outcome,
}

/// Transaction fields the notification service needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    pub transaction_time: DateTime<Utc>,
}

/// Wire shape of one transaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerializedTransaction {
    pub transaction_id: i64,
    pub account_id: i64,
    pub transaction_type: TransactionType,
    pub amount: String,
    pub transaction_time: String,
}

/// Normalize `transaction` into its wire shape, amount in USD.
pub fn serialize_transaction(
    transaction: &Transaction,
    converter: &dyn CurrencyConverter,
) -> SerializedTransaction {
    let amount = converter.convert(
        transaction.amount,
        transaction.currency,
        REPORTING_CURRENCY,
    );
    SerializedTransaction {
        transaction_id: transaction.id,
        account_id: transaction.account_id,
        transaction_type: transaction.transaction_type,
        amount: amount.to_string(),
        transaction_time: transaction.transaction_time.to_rfc3339(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Pending {
    Transaction(SerializedTransaction),
    Id(i64),
}

type Buffer = BTreeMap<&'static str, Vec<Pending>>;

/// Accumulates transaction events per routing key, safe to feed from
/// several threads before one `send()`.
pub struct TransactionsProducer {
    producer: Producer,
    converter: Arc<dyn CurrencyConverter>,
    buffer: Mutex<Buffer>,
}

impl TransactionsProducer {
    pub fn new(publisher: impl Publisher + 'static, converter: Arc<dyn CurrencyConverter>) -> Self {
        Self {
            producer: Producer::new(publisher),
            converter,
            buffer: Mutex::new(BTreeMap::new()),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn extend(&self, routing_key: &'static str, items: Vec<Pending>) {
        if items.is_empty() {
            return;
        }
        self.buffer().entry(routing_key).or_default().extend(items);
    }

    fn serialize_all<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Vec<Pending> {
        transactions
            .into_iter()
            .map(|tx| Pending::Transaction(serialize_transaction(tx, self.converter.as_ref())))
            .collect()
    }

    pub fn add_transactions<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> &Self {
        let items = self.serialize_all(transactions);
        self.extend(routes::TRANSACTION_CREATED, items);
        self
    }

    pub fn update_transactions<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> &Self {
        let items = self.serialize_all(transactions);
        self.extend(routes::TRANSACTION_UPDATED, items);
        self
    }

    pub fn delete_transactions(&self, ids: impl IntoIterator<Item = i64>) -> &Self {
        let items = ids.into_iter().map(Pending::Id).collect();
        self.extend(routes::TRANSACTION_DELETED, items);
        self
    }

    /// Number of buffered transaction events across all routing keys.
    pub fn pending(&self) -> usize {
        self.buffer().values().map(Vec::len).sum()
    }

    /// Drain the buffer into one message per routing key and publish once.
    pub async fn send(&self) {
        let groups = std::mem::take(&mut *self.buffer());
        for (routing_key, items) in groups {
            if items.is_empty() {
                continue;
            }
            match serde_json::to_string(&items) {
                Ok(body) => {
                    debug!(routing_key, count = items.len(), "Queueing transaction batch");
                    self.producer
                        .publisher()
                        .add_message(OutboundMessage::new(routing_key, body));
                }
                Err(e) => error!(routing_key, error = %e, "Failed to serialize transactions"),
            }
        }
        self.producer.send().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockPublisher;
    use crate::currency::{NationalRates, RatesConverter};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn converter() -> Arc<dyn CurrencyConverter> {
        let rates = NationalRates::new(HashMap::from([
            (CurrencyCode::Usd, Decimal::new(32, 1)),
            (CurrencyCode::Eur, Decimal::new(35, 1)),
            (CurrencyCode::Rub, Decimal::new(35, 3)),
        ]))
        .unwrap();
        Arc::new(RatesConverter::new(rates))
    }

    fn transaction(id: i64, amount: Decimal, currency: CurrencyCode) -> Transaction {
        Transaction {
            id,
            account_id: 9,
            transaction_type: TransactionType::Outcome,
            amount,
            currency,
            transaction_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    fn body(message: &OutboundMessage) -> serde_json::Value {
        serde_json::from_slice(&message.body).unwrap()
    }

    #[test]
    fn test_serialize_usd_is_identity() {
        let tx = transaction(1, Decimal::new(1050, 2), CurrencyCode::Usd);
        let serialized = serialize_transaction(&tx, converter().as_ref());

        assert_eq!(serialized.amount, "10.50");
        assert_eq!(serialized.transaction_id, 1);
        assert_eq!(serialized.account_id, 9);
        assert_eq!(serialized.transaction_time, "2024-03-01T12:30:00+00:00");
    }

    #[test]
    fn test_serialize_converts_to_usd() {
        let converter = converter();
        let tx = transaction(2, Decimal::new(64, 0), CurrencyCode::Byn);
        let serialized = serialize_transaction(&tx, converter.as_ref());

        let expected = converter.convert(tx.amount, CurrencyCode::Byn, CurrencyCode::Usd);
        assert_eq!(serialized.amount, expected.to_string());
        assert_eq!(serialized.amount, "20.00");
    }

    #[test]
    fn test_transaction_type_wire_names() {
        assert_eq!(
            serde_json::to_value(TransactionType::Income).unwrap(),
            serde_json::json!("IN")
        );
        assert_eq!(
            serde_json::to_value(TransactionType::Outcome).unwrap(),
            serde_json::json!("OUT")
        );
    }

    #[tokio::test]
    async fn test_send_groups_by_routing_key() {
        let publisher = MockPublisher::new();
        let producer = TransactionsProducer::new(publisher.clone(), converter());
        let first = transaction(1, Decimal::new(5, 0), CurrencyCode::Usd);
        let second = transaction(2, Decimal::new(7, 0), CurrencyCode::Usd);

        producer
            .add_transactions([&first])
            .update_transactions([&second])
            .add_transactions([&second])
            .delete_transactions([3, 4])
            .send()
            .await;

        assert_eq!(publisher.cycles(), 1);
        let published = publisher.published();
        assert_eq!(published.len(), 3);

        let created = published
            .iter()
            .find(|m| m.routing_key == "transaction.event.created")
            .unwrap();
        let ids: Vec<_> = body(created)
            .as_array()
            .unwrap()
            .iter()
            .map(|tx| tx["transaction_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let updated = published
            .iter()
            .find(|m| m.routing_key == "transaction.event.updated")
            .unwrap();
        assert_eq!(body(updated)[0]["transaction_type"], "OUT");

        let deleted = published
            .iter()
            .find(|m| m.routing_key == "transaction.event.deleted")
            .unwrap();
        assert_eq!(body(deleted), serde_json::json!([3, 4]));
    }

    #[tokio::test]
    async fn test_send_drains_buffer() {
        let publisher = MockPublisher::new();
        let producer = TransactionsProducer::new(publisher.clone(), converter());

        producer.delete_transactions([1]);
        assert_eq!(producer.pending(), 1);
        producer.send().await;
        assert_eq!(producer.pending(), 0);

        producer.send().await;
        assert_eq!(publisher.published_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_adds_no_group() {
        let publisher = MockPublisher::new();
        let producer = TransactionsProducer::new(publisher.clone(), converter());

        producer
            .add_transactions(std::iter::empty())
            .delete_transactions(Vec::new())
            .send()
            .await;

        assert_eq!(publisher.published_count(), 0);
        assert_eq!(publisher.cycles(), 0);
    }

    #[test]
    fn test_concurrent_adds_accumulate() {
        let producer = Arc::new(TransactionsProducer::new(MockPublisher::new(), converter()));

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let producer = Arc::clone(&producer);
                std::thread::spawn(move || {
                    let tx = transaction(n, Decimal::ONE, CurrencyCode::Usd);
                    for _ in 0..25 {
                        producer.add_transactions([&tx]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(producer.pending(), 200);
    }
}
