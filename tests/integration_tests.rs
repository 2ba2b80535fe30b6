//! Integration tests for the SPV network client.
//!
//! Every test drives the real client against an in-process fake SPV server
//! speaking newline-delimited JSON-RPC over a local TCP socket.

use serde_json::{json, Value};
use spv_client::{
    ConnectionState, NetworkConfig, NetworkError, ServerAddress, Session, SpvClient,
    SubscriptionRouter, Topic,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_test::assert_err;

const WAIT: Duration = Duration::from_secs(5);

fn local(port: u16) -> ServerAddress {
    ServerAddress {
        host: "127.0.0.1".to_string(),
        port,
    }
}

fn test_config(servers: Vec<ServerAddress>) -> NetworkConfig {
    NetworkConfig {
        servers,
        protocol_version: "1.2".to_string(),
        connect_timeout_ms: 1000,
        subscription_buffer: 64,
    }
}

/// A local port with nothing listening on it.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn send_line(write: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await
}

/// Canned reply for one request line, mimicking an Electrum-protocol server.
fn reply_for(line: &str) -> Option<String> {
    let request: Value = serde_json::from_str(line).ok()?;
    let id = request["id"].as_u64()?;
    let method = request["method"].as_str()?;
    if method == "blockchain.transaction.broadcast" {
        return Some(
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": 2, "message": "rejected"}})
                .to_string(),
        );
    }
    let result = match method {
        "server.version" => json!(["FakeServer 1.0", "1.4"]),
        "blockchain.address.get_history" => json!([]),
        "blockchain.headers.subscribe" => json!({"height": 100, "hex": "00"}),
        _ => json!(null),
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string())
}

async fn serve_canned(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(reply) = reply_for(&line) {
            if send_line(&mut write, &reply).await.is_err() {
                break;
            }
        }
    }
}

/// A healthy server that answers canned replies on any number of
/// sequential connections.
async fn spawn_canned_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_canned(stream));
        }
    });
    port
}

#[tokio::test]
async fn test_failover_skips_dead_server() {
    let dead = dead_port().await;
    let live = spawn_canned_server().await;

    let client = SpvClient::new(test_config(vec![local(dead), local(live)]));
    let mut connected = client.on_connected();
    client.start().await;

    let addr = timeout(WAIT, connected.recv()).await.unwrap().unwrap();
    assert_eq!(addr, local(live));
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);

    client.stop().await;
}

#[tokio::test]
async fn test_rpc_fails_fast_while_disconnected() {
    // Never started: no session can exist, and the call must not block.
    let client = SpvClient::new(test_config(vec![local(dead_port().await)]));

    let result = timeout(WAIT, client.get_history("addr1")).await.unwrap();
    assert!(matches!(result, Err(NetworkError::NotConnected)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_in_flight_request_resolves_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        // First connection: handshake, then hang up on the next request.
        // Later connections (the loop retrying): answer normally.
        let mut first = true;
        while let Ok((stream, _)) = listener.accept().await {
            if first {
                first = false;
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                let line = lines.next_line().await.unwrap().unwrap();
                let reply = reply_for(&line).unwrap();
                send_line(&mut write, &reply).await.unwrap();
                let _ = lines.next_line().await;
                // Dropping the halves closes the connection without a reply.
            } else {
                tokio::spawn(serve_canned(stream));
            }
        }
    });

    let client = SpvClient::new(test_config(vec![local(port)]));
    let mut connected = client.on_connected();
    client.start().await;
    timeout(WAIT, connected.recv()).await.unwrap().unwrap();

    let result = timeout(WAIT, client.get_transaction("deadbeef")).await.unwrap();
    assert!(matches!(result, Err(NetworkError::ConnectionLost)));

    client.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let live = spawn_canned_server().await;
    let client = SpvClient::new(test_config(vec![local(live)]));
    let mut connected = client.on_connected();
    client.start().await;
    timeout(WAIT, connected.recv()).await.unwrap().unwrap();

    client.stop().await;
    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // A second stop must be a no-op, and the facade stays fail-fast.
    client.stop().await;
    assert!(matches!(
        client.get_history("addr1").await,
        Err(NetworkError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnects_after_remote_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut first = true;
        while let Ok((stream, _)) = listener.accept().await {
            if first {
                first = false;
                // Handshake, then close straight away.
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                let line = lines.next_line().await.unwrap().unwrap();
                let reply = reply_for(&line).unwrap();
                send_line(&mut write, &reply).await.unwrap();
            } else {
                tokio::spawn(serve_canned(stream));
            }
        }
    });

    let client = SpvClient::new(test_config(vec![local(port)]));
    let mut connected = client.on_connected();
    client.start().await;

    // One event per successful handshake: the pool is retried cyclically
    // after the remote close.
    let first = timeout(WAIT, connected.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, connected.recv()).await.unwrap().unwrap();
    assert_eq!(first, local(port));
    assert_eq!(second, local(port));
    assert!(client.is_connected());

    client.stop().await;
}

#[tokio::test]
async fn test_version_mismatch_fails_attempt_and_advances() {
    let old_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let old_port = old_listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = old_listener.accept().await {
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": ["AncientServer 0.9", "1.0"],
                });
                if send_line(&mut write, &reply.to_string()).await.is_err() {
                    break;
                }
            }
        }
    });
    let live = spawn_canned_server().await;

    let client = SpvClient::new(test_config(vec![local(old_port), local(live)]));
    let mut connected = client.on_connected();
    client.start().await;

    let addr = timeout(WAIT, connected.recv()).await.unwrap().unwrap();
    assert_eq!(addr, local(live));

    client.stop().await;
}

#[tokio::test]
async fn test_remote_error_scoped_to_one_request() {
    let live = spawn_canned_server().await;
    let client = SpvClient::new(test_config(vec![local(live)]));
    let mut connected = client.on_connected();
    client.start().await;
    timeout(WAIT, connected.recv()).await.unwrap().unwrap();

    let result = timeout(WAIT, client.broadcast_transaction("00ff")).await.unwrap();
    match result {
        Err(NetworkError::Remote { code, message }) => {
            assert_eq!(code, 2);
            assert_eq!(message, "rejected");
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // The connection survives a request-scoped failure.
    assert!(client.is_connected());
    let history = timeout(WAIT, client.get_history("addr1")).await.unwrap();
    assert_eq!(history.unwrap(), json!([]));

    client.stop().await;
}

#[tokio::test]
async fn test_out_of_order_replies_resolve_correct_callers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        // Reply to the second request first: callers must still get their
        // own replies.
        for line in [second, first] {
            let request: Value = serde_json::from_str(&line).unwrap();
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": request["method"],
            });
            send_line(&mut write, &reply.to_string()).await.unwrap();
        }
        let _ = lines.next_line().await;
    });

    let router = Arc::new(SubscriptionRouter::new(16));
    let session = Session::connect(&local(port), router, Duration::from_secs(1))
        .await
        .unwrap();

    let (alpha, beta) = tokio::join!(
        session.send_request("req.alpha", vec![]),
        session.send_request("req.beta", vec![]),
    );
    assert_eq!(alpha.unwrap(), json!("req.alpha"));
    assert_eq!(beta.unwrap(), json!("req.beta"));

    session.close();
    session.closed().await;
}

#[tokio::test]
async fn test_pushed_notifications_fan_out_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        // An unrecognized push must be dropped without disturbing the
        // recognized ones around it.
        let pushes = [
            json!({"jsonrpc": "2.0", "method": "blockchain.scripthash.subscribe", "params": ["x"]}),
            json!({"jsonrpc": "2.0", "method": "blockchain.headers.subscribe", "params": [{"height": 101}]}),
            json!({"jsonrpc": "2.0", "method": "blockchain.headers.subscribe", "params": [{"height": 102}]}),
        ];
        for push in pushes {
            send_line(&mut write, &push.to_string()).await.unwrap();
        }
        let mut lines = BufReader::new(read).lines();
        let _ = lines.next_line().await;
    });

    let router = Arc::new(SubscriptionRouter::new(16));
    let mut rx1 = router.subscribe(Topic::Headers);
    let mut rx2 = router.subscribe(Topic::Headers);

    let session = Session::connect(&local(port), router.clone(), Duration::from_secs(1))
        .await
        .unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, vec![json!({"height": 101})]);
        assert_eq!(second, vec![json!({"height": 102})]);
    }

    // A consumer attaching now must not see either earlier event.
    let mut late = router.subscribe(Topic::Headers);
    assert_err!(late.try_recv());

    session.close();
    session.closed().await;
}

#[tokio::test]
async fn test_loop_keeps_cycling_through_failing_pool() {
    // Two dead entries: the loop must keep attempting both until stopped.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let attempts = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let seen = attempts.clone();
    tokio::spawn(async move {
        // Refuse every connection after recording it.
        while let Ok((stream, _)) = listener.accept().await {
            seen.lock().await.push(());
            drop(stream);
        }
    });

    let client = SpvClient::new(test_config(vec![local(dead_port().await), local(port)]));
    client.start().await;

    // The refusing server is hit repeatedly: the loop neither stops on
    // failure nor sticks on one pool entry.
    timeout(WAIT, async {
        loop {
            if attempts.lock().await.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert!(!client.is_connected());
    client.stop().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
