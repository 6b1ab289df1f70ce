use std::time::Duration;

use super::*;

fn client(transport: MockRpcTransport) -> RpcClient<MockRpcTransport> {
    RpcClient::new(transport, ExchangeConfig::users())
}

fn request() -> OutboundMessage {
    OutboundMessage::new("user.request.credentials", "42")
}

#[tokio::test]
async fn test_call_returns_matching_reply() {
    let transport = MockRpcTransport::new().replying(b"pong".to_vec());
    let client = client(transport.clone());

    let mut connection = client.connect().await.unwrap();
    let response = connection.call(&request()).await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(response, b"pong");
    assert_eq!(transport.sessions_closed(), 1);
}

#[tokio::test]
async fn test_call_sets_correlation_and_reply_to() {
    let transport = MockRpcTransport::new().replying(b"ok".to_vec());
    let client = client(transport.clone());

    let mut connection = client.connect().await.unwrap();
    connection.call(&request()).await.unwrap();
    connection.close().await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].exchange, "users_exchange");
    assert_eq!(requests[0].message, request());
    assert_eq!(
        requests[0].properties.reply_to.as_deref(),
        Some("amq.gen-mock-1")
    );
    let correlation_id = requests[0].properties.correlation_id.clone().unwrap();
    assert_eq!(
        Uuid::parse_str(&correlation_id).unwrap().get_version_num(),
        4
    );
}

#[tokio::test]
async fn test_call_ignores_mismatched_correlation_ids() {
    let transport = MockRpcTransport::new().respond_with(|_, properties| {
        vec![
            Reply::new("stale-1", b"wrong".to_vec()),
            Reply {
                correlation_id: None,
                body: b"anonymous".to_vec(),
            },
            Reply::new("stale-2", b"also wrong".to_vec()),
            Reply {
                correlation_id: properties.correlation_id.clone(),
                body: b"right".to_vec(),
            },
        ]
    });
    let client = client(transport);

    let mut connection = client.connect().await.unwrap();
    let response = connection.call(&request()).await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(response, b"right");
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out_after_ten_seconds() {
    let client = client(MockRpcTransport::new());
    let mut connection = client.connect().await.unwrap();

    let started = Instant::now();
    let result = connection.call(&request()).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(RpcError::EmptyResponse { timeout }) if timeout == Duration::from_secs(10)
    ));
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
    // A timeout is not a transport failure; the scope stays usable.
    assert!(connection.is_open());
    connection.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_only_stale_replies_times_out() {
    let transport = MockRpcTransport::new()
        .respond_with(|_, _| vec![Reply::new("someone-else", b"nope".to_vec())]);
    let client = client(transport);
    let mut connection = client.connect().await.unwrap();

    let result = connection.call(&request()).await;

    assert!(matches!(result, Err(RpcError::EmptyResponse { .. })));
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_response_does_not_leak_into_next_call() {
    let transport = MockRpcTransport::new().respond_with(|message, properties| {
        vec![Reply {
            correlation_id: properties.correlation_id.clone(),
            body: message.body.clone(),
        }]
    });
    let client = client(transport);
    let mut connection = client.connect().await.unwrap();

    let first = connection
        .call(&OutboundMessage::new("user.request.credentials", "1"))
        .await
        .unwrap();
    let second = connection
        .call(&OutboundMessage::new("user.request.credentials", "2"))
        .await
        .unwrap();
    connection.close().await.unwrap();

    assert_eq!(first, b"1");
    assert_eq!(second, b"2");
}

#[tokio::test]
async fn test_call_after_close_is_not_connected() {
    let transport = MockRpcTransport::new().replying(b"x".to_vec());
    let client = client(transport.clone());
    let mut connection = client.connect().await.unwrap();

    transport.break_sessions();

    assert!(matches!(
        connection.call(&request()).await,
        Err(RpcError::NotConnected)
    ));
}

#[tokio::test]
async fn test_transport_failure_discards_session() {
    let transport = MockRpcTransport::new().replying(b"x".to_vec());
    let client = client(transport.clone());
    let mut connection = client.connect().await.unwrap();

    transport.fail_publish(true);
    let first = connection.call(&request()).await;
    transport.fail_publish(false);
    let second = connection.call(&request()).await;

    assert!(matches!(first, Err(RpcError::Transport(_))));
    assert!(matches!(second, Err(RpcError::NotConnected)));
    assert!(!connection.is_open());
    assert_eq!(transport.sessions_closed(), 1);
}

#[tokio::test]
async fn test_consumer_end_is_transport_failure() {
    let transport = MockRpcTransport::new();
    transport.end_consumer();
    let client = client(transport);
    let mut connection = client.connect().await.unwrap();

    let result = connection.call(&request()).await;

    assert!(matches!(result, Err(RpcError::Transport(_))));
    assert!(!connection.is_open());
}

#[tokio::test]
async fn test_connect_failure_surfaces() {
    let client = client(MockRpcTransport::new().fail_open());
    assert!(matches!(
        client.connect().await,
        Err(RpcError::Connection(_))
    ));
}

#[tokio::test]
async fn test_connect_declares_exchange() {
    let transport = MockRpcTransport::new();
    let client = client(transport.clone());

    let connection = client.connect().await.unwrap();
    connection.close().await.unwrap();

    assert_eq!(transport.declared(), vec![ExchangeConfig::users()]);
}

#[test]
fn test_pending_call_accepts_only_own_id() {
    let mut pending = PendingCall::new();
    assert!(!pending.accept(Reply::new("other", b"x".to_vec())));
    assert!(pending.response.is_none());

    let own = pending.correlation_id.to_string();
    assert!(pending.accept(Reply::new(own, b"y".to_vec())));
    assert_eq!(pending.response.as_deref(), Some(&b"y"[..]));
}

#[tokio::test]
async fn test_drop_without_close_closes_in_background() {
    let transport = MockRpcTransport::new();
    let client = client(transport.clone());

    let connection = client.connect().await.unwrap();
    drop(connection);
    tokio::task::yield_now().await;

    assert_eq!(transport.sessions_closed(), 1);
}
