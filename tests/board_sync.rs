//! End-to-end tests: a real server, real WebSocket subscribers, and
//! mutations flowing through the board service.

use std::net::SocketAddr;

use futures_util::StreamExt;
use tasklane::board::BoardDb;
use tasklane::board::api::SharedState;
use tasklane::board::models::{ItemFields, NewColumn};
use tasklane::board::server::{ServerConfig, build_router, build_state};
use tasklane::board::sync::{BoardMessage, SnapshotFollower};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port backed by an in-memory database.
async fn start_test_server() -> (SocketAddr, SharedState) {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(config: ServerConfig) -> (SocketAddr, SharedState) {
    let state = build_state(BoardDb::new_in_memory().unwrap(), &config);
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, board_id: i64) -> Client {
    let url = format!("ws://{}/ws/boards/{}", addr, board_id);
    let (client, _) = connect_async(&url).await.expect("should connect");
    client
}

/// Next board message, skipping control frames.
async fn next_message(client: &mut Client) -> BoardMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("message within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("board message JSON");
        }
    }
}

fn titles(message: &BoardMessage, column: usize) -> Vec<String> {
    match message {
        BoardMessage::Success { payload, .. } => payload.columns[column]
            .items
            .iter()
            .map(|i| i.title.clone())
            .collect(),
        other => panic!("expected SUCCESS, got {:?}", other),
    }
}

/// Board with columns P and Q; items A, B, C in P.
async fn seed(state: &SharedState) -> (i64, Vec<i64>, Vec<i64>) {
    let columns = ["P", "Q"]
        .iter()
        .map(|n| NewColumn {
            name: n.to_string(),
            ..Default::default()
        })
        .collect();
    let board = state
        .service
        .create_board("Live".into(), None, Some(columns))
        .await
        .unwrap();
    let cols: Vec<i64> = state
        .service
        .board_snapshot(board.id)
        .await
        .unwrap()
        .columns
        .iter()
        .map(|c| c.column.id)
        .collect();
    let mut items = Vec::new();
    for title in ["A", "B", "C"] {
        let item = state
            .service
            .create_item(
                cols[0],
                ItemFields {
                    title: title.into(),
                    ..Default::default()
                },
                false,
            )
            .await
            .unwrap();
        items.push(item.id);
    }
    state.service.wait_for_broadcasts().await;
    (board.id, cols, items)
}

#[tokio::test]
async fn test_subscriber_receives_initial_snapshot() {
    let (addr, state) = start_test_server().await;
    let (board_id, _, _) = seed(&state).await;

    let mut client = connect(addr, board_id).await;
    let initial = next_message(&mut client).await;
    assert_eq!(initial.board_id(), board_id);
    assert_eq!(titles(&initial, 0), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_unknown_board_is_rejected_before_upgrade() {
    let (addr, _) = start_test_server().await;
    let url = format!("ws://{}/ws/boards/999", addr);
    assert!(connect_async(&url).await.is_err());
}

#[tokio::test]
async fn test_two_subscribers_converge_on_moves() {
    let (addr, state) = start_test_server().await;
    let (board_id, cols, items) = seed(&state).await;

    let mut alice = connect(addr, board_id).await;
    let mut bob = connect(addr, board_id).await;
    let mut alice_view = SnapshotFollower::new();
    let mut bob_view = SnapshotFollower::new();
    assert!(alice_view.apply(next_message(&mut alice).await));
    assert!(bob_view.apply(next_message(&mut bob).await));

    // A,B,C -> move A to 2 -> B,C,A
    state.service.move_to(items[0], 2).await.unwrap();
    let update = next_message(&mut alice).await;
    assert_eq!(titles(&update, 0), vec!["B", "C", "A"]);
    assert!(alice_view.apply(update));
    assert!(bob_view.apply(next_message(&mut bob).await));

    // B crosses to Q
    state
        .service
        .move_to_column(items[1], cols[1], 0)
        .await
        .unwrap();
    assert!(alice_view.apply(next_message(&mut alice).await));
    assert!(bob_view.apply(next_message(&mut bob).await));

    assert_eq!(alice_view.current(), bob_view.current());
    let snapshot = alice_view.current().unwrap();
    assert_eq!(snapshot.columns[0].item_ids(), vec![items[2], items[0]]);
    assert_eq!(snapshot.columns[1].item_ids(), vec![items[1]]);
    let positions: Vec<Option<i32>> = snapshot.columns[0]
        .items
        .iter()
        .map(|i| i.position)
        .collect();
    assert_eq!(positions, vec![Some(0), Some(1)]);
}

#[tokio::test]
async fn test_rejected_mutation_sends_nothing() {
    let (addr, state) = start_test_server().await;
    let (board_id, _, items) = seed(&state).await;

    let mut client = connect(addr, board_id).await;
    next_message(&mut client).await;

    assert!(state.service.move_to(items[0], -1).await.is_err());
    state.service.wait_for_broadcasts().await;
    let quiet = timeout(Duration::from_millis(200), client.next()).await;
    assert!(quiet.is_err(), "no message expected after a rejected move");
}

#[tokio::test]
async fn test_lagging_subscriber_still_converges() {
    let (addr, state) = start_server_with(ServerConfig {
        channel_capacity: 1,
        ..ServerConfig::default()
    })
    .await;
    let (board_id, _, items) = seed(&state).await;

    let mut client = connect(addr, board_id).await;
    let mut view = SnapshotFollower::new();
    assert!(view.apply(next_message(&mut client).await));

    // Publish a dozen snapshots without reading, overflowing the one-slot
    // channel.
    for round in 0..12 {
        let target = if round % 2 == 0 { 2 } else { 0 };
        state.service.move_to(items[0], target).await.unwrap();
        state.service.wait_for_broadcasts().await;
    }
    let expected = state.service.board_snapshot(board_id).await.unwrap();

    while view.revision() != Some(expected.revision()) {
        let message = next_message(&mut client).await;
        if let Some(revision) = view.revision() {
            if let BoardMessage::Success { revision: next, .. } = &message {
                assert!(*next > revision, "stale snapshot {} after {}", next, revision);
            }
        }
        view.apply(message);
    }
    assert_eq!(view.current(), Some(&expected));
}
