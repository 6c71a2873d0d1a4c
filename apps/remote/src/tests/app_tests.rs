use super::*;
use client_core::{
    transport::{channel_transport, ChannelPeer},
    SessionConfig, SessionController,
};
use tokio::time::timeout;

struct Fixture {
    remote: Remote,
    storage: Storage,
    device: DeviceIdentity,
    names: SharedDispenserNames,
    peer: ChannelPeer,
}

async fn fixture() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let device = DeviceIdentity::new("d1").expect("identity");
    let names = SharedDispenserNames::new(
        storage.dispenser_names(&device, 2).await.expect("names"),
    );
    let (sink, source, peer) = channel_transport();
    let (controller, handle) = SessionController::new(
        device.clone(),
        SessionConfig::default(),
        Arc::new(names.clone()),
        Box::new(sink),
        Box::new(source),
    );
    tokio::spawn(controller.run());

    let remote = Remote::new(
        handle,
        storage.clone(),
        device.clone(),
        names.clone(),
        2,
        Duration::from_millis(600),
    );
    Fixture {
        remote,
        storage,
        device,
        names,
        peer,
    }
}

async fn next_sent(peer: &mut ChannelPeer) -> String {
    timeout(Duration::from_secs(5), peer.sent.recv())
        .await
        .expect("command sent in time")
        .expect("sink open")
}

#[tokio::test]
async fn trigger_event_records_manual_dispense() {
    let f = fixture().await;
    f.remote
        .handle_event(ClientEvent::Triggered {
            slot: Slot(1),
            name: "Dispenser 2".into(),
        })
        .await
        .expect("event");

    let log = f.storage.recent_log(&f.device).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, DispenseAction::ManualDispense);
    assert_eq!(log[0].detail, "Dispenser 2 (Servo 2)");
}

#[tokio::test]
async fn executed_sequence_is_logged() {
    let f = fixture().await;
    f.remote
        .handle_event(ClientEvent::SequenceExecuted("Morning".into()))
        .await
        .expect("event");

    let log = f.storage.recent_log(&f.device).await.expect("log");
    assert_eq!(log[0].action, DispenseAction::SequenceExecute);
    assert_eq!(log[0].detail, "Sequence: Morning");
}

#[tokio::test]
async fn long_press_rename_takes_next_line() {
    let f = fixture().await;
    f.remote
        .handle_event(ClientEvent::RenameRequested {
            slot: Slot(1),
            current_name: "Dispenser 2".into(),
        })
        .await
        .expect("event");

    assert_eq!(
        f.remote.handle_line("Iron").await.expect("line"),
        Flow::Continue
    );
    assert_eq!(f.names.name(Slot(1)), "Iron");
    assert_eq!(
        f.storage
            .dispenser_names(&f.device, 2)
            .await
            .expect("names"),
        vec!["Dispenser 1".to_string(), "Iron".to_string()]
    );
    let log = f.storage.recent_log(&f.device).await.expect("log");
    assert_eq!(log[0].action, DispenseAction::Rename);
    assert_eq!(log[0].detail, "\"Dispenser 2\" → \"Iron\"");
}

#[tokio::test]
async fn blank_line_cancels_pending_rename() {
    let f = fixture().await;
    f.remote
        .handle_event(ClientEvent::RenameRequested {
            slot: Slot(0),
            current_name: "Dispenser 1".into(),
        })
        .await
        .expect("event");

    f.remote.handle_line("   ").await.expect("line");
    assert_eq!(f.names.name(Slot(0)), "Dispenser 1");
    assert!(f.storage.recent_log(&f.device).await.expect("log").is_empty());
}

#[tokio::test]
async fn unchanged_rename_is_not_logged() {
    let f = fixture().await;
    f.remote
        .handle_line("rename 1 Dispenser 1")
        .await
        .expect("line");
    f.remote.handle_line("rename 3 Iron").await.expect("line");

    assert!(f.storage.recent_log(&f.device).await.expect("log").is_empty());
}

#[tokio::test]
async fn create_checks_duplicates_and_pads_counts() {
    let mut f = fixture().await;
    assert_eq!(next_sent(&mut f.peer).await, "LIST d1");

    f.remote
        .handle_event(ClientEvent::SnapshotChanged(vec!["Morning".into()]))
        .await
        .expect("event");
    f.remote
        .handle_line("create Morning 1,1")
        .await
        .expect("line");
    f.remote.handle_line("create Night 1,0,4").await.expect("line");
    f.remote.handle_line("create Night 3").await.expect("line");

    assert_eq!(next_sent(&mut f.peer).await, "SEQUENCE d1 Night (3,0)");
}

#[tokio::test]
async fn back_to_back_creates_send_once() {
    let mut f = fixture().await;
    let printer = tokio::spawn(
        f.remote
            .clone()
            .run_events(f.remote.handle.subscribe_events()),
    );
    assert_eq!(next_sent(&mut f.peer).await, "LIST d1");

    f.remote
        .handle_line("create Morning 1,0")
        .await
        .expect("line");
    f.remote
        .handle_line("create Morning 1,0")
        .await
        .expect("line");

    assert_eq!(next_sent(&mut f.peer).await, "SEQUENCE d1 Morning (1,0)");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.peer.sent.try_recv().is_err());
    printer.abort();
}

#[tokio::test]
async fn all_zero_create_is_not_cached() {
    let mut f = fixture().await;
    assert_eq!(next_sent(&mut f.peer).await, "LIST d1");

    f.remote.handle_line("create Empty 0,0").await.expect("line");
    f.remote.handle_line("create Empty 1").await.expect("line");
    assert_eq!(next_sent(&mut f.peer).await, "SEQUENCE d1 Empty (1,0)");
}

#[tokio::test]
async fn raw_lines_are_forwarded_expanded() {
    let mut f = fixture().await;
    assert_eq!(next_sent(&mut f.peer).await, "LIST d1");

    f.remote.handle_line("DELETE Night").await.expect("line");
    assert_eq!(next_sent(&mut f.peer).await, "DELETE d1 Night");

    f.remote.handle_line("exec Morning").await.expect("line");
    assert_eq!(next_sent(&mut f.peer).await, "EXECUTE d1 Morning");
}

#[tokio::test]
async fn quit_stops_the_console() {
    let f = fixture().await;
    assert_eq!(f.remote.handle_line("quit").await.expect("line"), Flow::Quit);
    assert_eq!(
        f.remote.handle_line("tap 9").await.expect("line"),
        Flow::Continue
    );
}
