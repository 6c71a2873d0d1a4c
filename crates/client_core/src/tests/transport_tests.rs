use super::*;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::{
    net::TcpListener,
    time::{timeout, Duration},
};

struct FakeController {
    frames: Vec<AxumMessage>,
    close_after_frames: bool,
    received: mpsc::UnboundedSender<String>,
}

async fn fake_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<FakeController>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| fake_connection(state, socket))
}

async fn fake_connection(state: Arc<FakeController>, mut socket: WebSocket) {
    for frame in &state.frames {
        if socket.send(frame.clone()).await.is_err() {
            return;
        }
    }
    if state.close_after_frames {
        let _ = socket.send(AxumMessage::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let AxumMessage::Text(text) = message {
            let _ = state.received.send(text);
        }
    }
}

async fn spawn_fake_controller(
    frames: Vec<AxumMessage>,
    close_after_frames: bool,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let (received, received_rx) = mpsc::unbounded_channel();
    let state = Arc::new(FakeController {
        frames,
        close_after_frames,
        received,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/", get(fake_ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}/"), received_rx)
}

async fn next_line(source: &mut WsLineSource) -> Option<String> {
    timeout(Duration::from_secs(5), source.next_line())
        .await
        .expect("line in time")
        .map(|line| line.expect("line ok"))
}

#[tokio::test]
async fn multi_line_frames_are_split_in_order() {
    let (url, _received) = spawn_fake_controller(
        vec![
            AxumMessage::Text(
                "[INFO] Sequences for device d1:\n  - Morning\n  - Evening".into(),
            ),
            AxumMessage::Text("[INFO] No sequences found for device d2".into()),
        ],
        false,
    )
    .await;

    let (_sink, mut source) = connect_websocket(&url).await.expect("connect");
    assert_eq!(
        next_line(&mut source).await.as_deref(),
        Some("[INFO] Sequences for device d1:")
    );
    assert_eq!(next_line(&mut source).await.as_deref(), Some("  - Morning"));
    assert_eq!(next_line(&mut source).await.as_deref(), Some("  - Evening"));
    assert_eq!(
        next_line(&mut source).await.as_deref(),
        Some("[INFO] No sequences found for device d2")
    );
}

#[tokio::test]
async fn utf8_binary_frames_are_read_as_text() {
    let (url, _received) = spawn_fake_controller(
        vec![
            AxumMessage::Binary(vec![0xff, 0xfe]),
            AxumMessage::Binary(b"[SEQ] Stored sequence 'Morning' for device d1".to_vec()),
        ],
        false,
    )
    .await;

    let (_sink, mut source) = connect_websocket(&url).await.expect("connect");
    assert_eq!(
        next_line(&mut source).await.as_deref(),
        Some("[SEQ] Stored sequence 'Morning' for device d1")
    );
}

#[tokio::test]
async fn sent_lines_reach_the_controller() {
    let (url, mut received) = spawn_fake_controller(Vec::new(), false).await;

    let (mut sink, _source) = connect_websocket(&url).await.expect("connect");
    sink.send_line("LIST d1").await.expect("send list");
    sink.send_line("PILL 2").await.expect("send pill");

    let first = timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("received in time");
    let second = timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("received in time");
    assert_eq!(first.as_deref(), Some("LIST d1"));
    assert_eq!(second.as_deref(), Some("PILL 2"));
}

#[tokio::test]
async fn controller_close_ends_the_source() {
    let (url, _received) = spawn_fake_controller(
        vec![AxumMessage::Text("[INFO] Ready".into())],
        true,
    )
    .await;

    let (_sink, mut source) = connect_websocket(&url).await.expect("connect");
    assert_eq!(next_line(&mut source).await.as_deref(), Some("[INFO] Ready"));
    assert_eq!(next_line(&mut source).await, None);
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let err = connect_websocket(&format!("ws://{addr}/"))
        .await
        .err()
        .expect("connect must fail");
    assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
}

#[test]
fn controller_url_must_be_websocket() {
    assert!(parse_controller_url("ws://192.168.4.1:81").is_ok());
    assert!(parse_controller_url("wss://dispenser.local/ws").is_ok());

    let err = parse_controller_url("http://192.168.4.1:81").expect_err("http rejected");
    assert!(err.to_string().contains("unsupported scheme"), "{err}");
    assert!(matches!(
        parse_controller_url("not a url"),
        Err(TransportError::InvalidUrl { .. })
    ));
}

#[tokio::test]
async fn channel_transport_connects_both_ends() {
    let (mut sink, mut source, mut peer) = channel_transport();

    sink.send_line("EXECUTE d1 Morning").await.expect("send");
    assert_eq!(peer.sent.recv().await.as_deref(), Some("EXECUTE d1 Morning"));

    peer.inbound.send("  - Morning".into()).expect("push");
    assert_eq!(
        source.next_line().await.map(|line| line.expect("line ok")),
        Some("  - Morning".to_string())
    );

    drop(peer);
    assert!(source.next_line().await.is_none());
    assert!(matches!(
        sink.send_line("PILL 1").await,
        Err(TransportError::Closed)
    ));
}
