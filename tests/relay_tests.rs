use std::time::Duration;

use colabri_code::adapter::{DocumentAdapter, DocumentHandle, HeadlessTarget};
use colabri_code::models::{HealthResponse, Identity};
use colabri_code::presence::PresenceBroadcaster;
use colabri_code::routes::create_app;
use colabri_code::session::{Session, SessionState};
use colabri_code::store::{RelayTransport, RoomHub};
use futures_util::StreamExt;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_relay() -> (String, RoomHub) {
    let hub = RoomHub::new(Duration::from_secs(60));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(hub.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr.to_string(), hub)
}

async fn attach(session: &Session) -> DocumentHandle {
    DocumentAdapter::new(Duration::from_millis(500))
        .attach(HeadlessTarget::mounted(), session)
        .await
        .unwrap()
}

async fn until(handle: &DocumentHandle, expected: &str) {
    let mut rx = handle.subscribe_content();
    timeout(WAIT, rx.wait_for(|c| c == expected))
        .await
        .unwrap_or_else(|_| panic!("never saw {:?}, have {:?}", expected, handle.content()))
        .unwrap();
}

#[tokio::test]
async fn edits_converge_through_the_relay() {
    let (addr, hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));

    let alice = Session::enter(&transport, "algo", 11).await.unwrap();
    let bob = Session::enter(&transport, "algo", 22).await.unwrap();
    let a = attach(&alice).await;
    let b = attach(&bob).await;

    a.insert(0, "int main() {}").unwrap();
    until(&b, "int main() {}").await;

    b.insert(12, " return 0; ").unwrap();
    a.insert(0, "// hi\n").unwrap();
    until(&a, "// hi\nint main() { return 0; }").await;
    until(&b, "// hi\nint main() { return 0; }").await;
    assert_eq!(hub.room_content("algo").as_deref(), Some("// hi\nint main() { return 0; }"));
}

#[tokio::test]
async fn late_joiner_gets_snapshot() {
    let (addr, _hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));

    let alice = Session::enter(&transport, "late", 1).await.unwrap();
    let a = attach(&alice).await;
    a.insert(0, "print('first')").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bob = Session::enter(&transport, "late", 2).await.unwrap();
    assert_eq!(bob.content().unwrap(), "print('first')");
}

#[tokio::test]
async fn local_undo_over_relay_keeps_remote_text() {
    let (addr, _hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));

    let alice = Session::enter(&transport, "undo", 1).await.unwrap();
    let bob = Session::enter(&transport, "undo", 2).await.unwrap();
    let a = attach(&alice).await;
    let b = attach(&bob).await;

    a.insert(0, "abc").unwrap();
    until(&b, "abc").await;
    b.insert(3, "X").unwrap();
    until(&a, "abcX").await;

    assert!(a.undo().unwrap());
    until(&a, "X").await;
    until(&b, "X").await;
}

#[tokio::test]
async fn presence_crosses_relay_and_leave_removes_it() {
    let (addr, _hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));

    let alice = Session::enter(&transport, "presence", 1).await.unwrap();
    let bob = Session::enter(&transport, "presence", 2).await.unwrap();

    let mut remote = PresenceBroadcaster::new(bob.clone()).subscribe_remote();
    assert!(remote.next().await.unwrap().is_empty());

    PresenceBroadcaster::new(alice.clone())
        .publish_local(&Identity {
            name: "Alice".into(),
            color: "#ee6352".into(),
        })
        .unwrap();
    let roster = timeout(WAIT, remote.next()).await.unwrap().unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].display_name, "Alice");
    assert_eq!(roster[0].color_light, "#ee635280");

    alice.leave();
    let roster = timeout(WAIT, remote.next()).await.unwrap().unwrap();
    assert!(roster.is_empty());
}

#[tokio::test]
async fn relay_shutdown_disconnects_sessions() {
    let (addr, hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));

    let session = Session::enter(&transport, "closing", 5).await.unwrap();
    let handle = attach(&session).await;
    let mut state = session.watch_state();

    assert!(hub.close_room("closing"));
    timeout(WAIT, state.wait_for(|s| *s == SessionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    timeout(WAIT, async {
        while handle.is_attached() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn api_reports_health_and_rooms() {
    let (addr, _hub) = spawn_relay().await;
    let transport = RelayTransport::new(format!("ws://{}", addr));
    let _session = Session::enter(&transport, "stats", 9).await.unwrap();

    let health: HealthResponse = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "ok");

    let diagnostics: serde_json::Value = reqwest::get(format!("http://{}/api/v1/diagnostics", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(diagnostics["n_rooms"], 1);
    assert_eq!(diagnostics["n_conn"], 1);
}
