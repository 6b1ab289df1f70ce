//! Account lifecycle notifications and the credentials RPC.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::{routes, Producer};
use crate::bus::{OutboundMessage, Publisher};
use crate::rpc::{self, RpcClient, RpcError, RpcTransport};

/// Account fields the notification service needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
}

/// Credentials shared between this application and the notification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub account_id: i64,
    pub email: String,
    pub token: String,
}

/// Random token of `byte_length` bytes, hex encoded.
pub fn mint_token(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Publishes account registration and deletion events.
pub struct UsersProducer {
    producer: Producer,
    token_length: usize,
}

impl UsersProducer {
    pub fn new(publisher: impl Publisher + 'static, token_length: usize) -> Self {
        Self {
            producer: Producer::new(publisher),
            token_length,
        }
    }

    /// Mint a token for `account` and queue its credentials.
    pub fn register_account(&self, account: &Account) -> &Self {
        let credentials = AccountCredentials {
            account_id: account.id,
            email: account.email.clone(),
            token: mint_token(self.token_length),
        };
        match serde_json::to_string(&credentials) {
            Ok(body) => self
                .producer
                .publisher()
                .add_message(OutboundMessage::new(routes::USER_CREATED, body)),
            Err(e) => error!(account_id = account.id, error = %e, "Failed to serialize credentials"),
        }
        self
    }

    pub fn delete_account(&self, account_id: i64) -> &Self {
        self.producer.publisher().add_message(OutboundMessage::new(
            routes::USER_DELETED,
            account_id.to_string(),
        ));
        self
    }

    pub async fn send(&self) {
        self.producer.send().await
    }
}

#[derive(Deserialize)]
struct CredentialsResponse {
    #[serde(default)]
    success: bool,
    result: Option<AccountCredentials>,
}

/// Fetches account credentials from the notification service.
pub struct UsersRpcService<T> {
    client: RpcClient<T>,
}

impl<T: RpcTransport> UsersRpcService<T> {
    pub fn new(client: RpcClient<T>) -> Self {
        Self { client }
    }

    pub async fn get_account_credentials(&self, account_id: i64) -> rpc::Result<AccountCredentials> {
        let mut connection = self.client.connect().await?;
        let response = connection
            .call(&OutboundMessage::new(
                routes::USER_REQUEST_CREDENTIALS,
                account_id.to_string(),
            ))
            .await;
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close RPC connection");
        }
        parse_credentials_response(&response?)
    }
}

fn parse_credentials_response(response: &[u8]) -> rpc::Result<AccountCredentials> {
    let response: CredentialsResponse = serde_json::from_slice(response)
        .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
    if !response.success {
        return Err(RpcError::Unsuccessful);
    }
    response
        .result
        .ok_or_else(|| RpcError::InvalidResponse("missing result".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ExchangeConfig, MockPublisher};
    use crate::rpc::MockRpcTransport;

    fn account() -> Account {
        Account {
            id: 7,
            email: "user@example.com".to_string(),
        }
    }

    #[test]
    fn test_mint_token_is_hex_of_requested_length() {
        let token = mint_token(16);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(mint_token(16), token);
    }

    #[tokio::test]
    async fn test_register_account_publishes_credentials() {
        let publisher = MockPublisher::new();
        let producer = UsersProducer::new(publisher.clone(), 20);

        producer.register_account(&account()).send().await;

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "user.event.created");
        let body: serde_json::Value = serde_json::from_slice(&published[0].body).unwrap();
        assert_eq!(body["account_id"], 7);
        assert_eq!(body["email"], "user@example.com");
        assert_eq!(body["token"].as_str().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_delete_account_publishes_bare_id() {
        let publisher = MockPublisher::new();
        let producer = UsersProducer::new(publisher.clone(), 20);

        producer.delete_account(42).send().await;

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "user.event.deleted");
        assert_eq!(published[0].body_str(), "42");
    }

    #[tokio::test]
    async fn test_chained_calls_flush_in_one_cycle() {
        let publisher = MockPublisher::new();
        let producer = UsersProducer::new(publisher.clone(), 8);

        producer
            .register_account(&account())
            .delete_account(3)
            .send()
            .await;

        assert_eq!(publisher.cycles(), 1);
        let keys: Vec<_> = publisher
            .published()
            .into_iter()
            .map(|m| m.routing_key)
            .collect();
        assert_eq!(keys, vec!["user.event.created", "user.event.deleted"]);
    }

    #[test]
    fn test_parse_successful_response() {
        let credentials = parse_credentials_response(
            br#"{"success": true, "result": {"account_id": 1, "email": "a@b.c", "token": "ff"}}"#,
        )
        .unwrap();
        assert_eq!(
            credentials,
            AccountCredentials {
                account_id: 1,
                email: "a@b.c".to_string(),
                token: "ff".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_unsuccessful_response() {
        assert!(matches!(
            parse_credentials_response(br#"{"success": false, "result": null}"#),
            Err(RpcError::Unsuccessful)
        ));
        assert!(matches!(
            parse_credentials_response(br#"{"result": {}}"#),
            Err(RpcError::Unsuccessful)
        ));
    }

    #[test]
    fn test_parse_malformed_response() {
        assert!(matches!(
            parse_credentials_response(b"not json"),
            Err(RpcError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_credentials_response(br#"{"success": true}"#),
            Err(RpcError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_get_account_credentials_round_trip() {
        let transport = MockRpcTransport::new().replying(
            br#"{"success": true, "result": {"account_id": 5, "email": "x@y.z", "token": "abcd"}}"#
                .to_vec(),
        );
        let service = UsersRpcService::new(RpcClient::new(transport.clone(), ExchangeConfig::users()));

        let credentials = service.get_account_credentials(5).await.unwrap();

        assert_eq!(credentials.token, "abcd");
        let requests = transport.requests();
        assert_eq!(requests[0].message.routing_key, "user.request.credentials");
        assert_eq!(requests[0].message.body_str(), "5");
        assert_eq!(transport.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_get_account_credentials_rejected() {
        let transport = MockRpcTransport::new().replying(br#"{"success": false}"#.to_vec());
        let service = UsersRpcService::new(RpcClient::new(transport.clone(), ExchangeConfig::users()));

        let result = service.get_account_credentials(5).await;

        assert!(matches!(result, Err(RpcError::Unsuccessful)));
        assert_eq!(transport.sessions_closed(), 1);
    }
}
