use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use queue_tracker_cell::services::{
    QueueSubscription, QueueTrackerService, RealtimeFeed, SupabaseRealtimeFeed, TaskChannel,
};
use queue_tracker_cell::{QueueStatus, QueueTrackerError, QueueUpdate};
use shared_models::auth::PatientContext;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

const WAIT: Duration = Duration::from_secs(5);

/// Feed that replays whatever the test pushes into it.
struct ScriptedFeed {
    updates: Mutex<Option<mpsc::Receiver<QueueStatus>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedFeed {
    fn new() -> (Arc<Self>, mpsc::Sender<QueueStatus>) {
        let (sender, receiver) = mpsc::channel(8);
        let feed = Arc::new(Self {
            updates: Mutex::new(Some(receiver)),
            closed: Arc::new(AtomicBool::new(false)),
        });
        (feed, sender)
    }

    fn subscribed(&self) -> bool {
        self.updates.lock().unwrap().is_none()
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeFeed for ScriptedFeed {
    async fn subscribe(
        &self,
        _doctor_id: Uuid,
        _access_token: &str,
    ) -> Result<QueueSubscription, QueueTrackerError> {
        let mut updates = self
            .updates
            .lock()
            .unwrap()
            .take()
            .expect("feed subscribed twice");
        let closed = self.closed.clone();

        Ok(TaskChannel::spawn(move |sender, mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    status = updates.recv() => match status {
                        Some(status) => {
                            if sender.send(status).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
        }))
    }
}

struct Fixture {
    server: MockServer,
    ctx: PatientContext,
    user: TestUser,
    doctor_id: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();
        let user = TestUser::patient("meera@example.com");
        let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(1));
        let ctx = PatientContext::new(&user.to_user(), &token).unwrap();

        Self {
            server,
            ctx,
            user,
            doctor_id: Uuid::new_v4(),
        }
    }

    fn service(&self) -> QueueTrackerService {
        QueueTrackerService::new(&TestConfig::with_supabase_url(&self.server.uri()).to_app_config())
    }

    async fn mount_appointment(&self, token_number: i32) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::appointment_response(
                    &Uuid::new_v4().to_string(),
                    &self.user.id,
                    &self.doctor_id.to_string(),
                    "2030-03-11",
                    token_number,
                    "scheduled",
                )
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mount_queue(&self, current_token: i32) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/queue_status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::queue_status_response(&self.doctor_id.to_string(), current_token)
            ])))
            .mount(&self.server)
            .await;
    }

    fn status(&self, current_token: i32) -> QueueStatus {
        QueueStatus {
            id: Uuid::new_v4(),
            doctor_id: self.doctor_id,
            current_token,
            is_active: true,
            last_updated: None,
        }
    }
}

async fn next_update(live: &mut queue_tracker_cell::LiveQueue) -> QueueUpdate {
    timeout(WAIT, live.recv())
        .await
        .expect("timed out waiting for queue update")
        .expect("live queue ended")
}

#[tokio::test]
async fn test_live_queue_follows_the_serving_counter() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(45).await;
    fixture.mount_queue(40).await;
    let (feed, push) = ScriptedFeed::new();

    let mut live = fixture
        .service()
        .start_tracking(&fixture.ctx, feed.clone())
        .await
        .unwrap();

    let initial = next_update(&mut live).await;
    assert_eq!(initial.position.tokens_ahead, 5);
    assert_eq!(initial.position.estimated_wait_minutes, 15);
    assert!(initial.alert.is_none());

    push.send(fixture.status(43)).await.unwrap();
    let advanced = next_update(&mut live).await;
    assert_eq!(advanced.position.tokens_ahead, 2);
    assert_eq!(advanced.position.estimated_wait_minutes, 6);
    assert_eq!(advanced.alert.unwrap().message, "Your turn is approaching");

    let mut foreign = fixture.status(44);
    foreign.doctor_id = Uuid::new_v4();
    push.send(foreign).await.unwrap();
    push.send(fixture.status(45)).await.unwrap();

    let turn = next_update(&mut live).await;
    assert_eq!(turn.position.current_token, 45);
    assert!(turn.position.is_your_turn);
    assert!(turn.alert.is_none());

    live.close().await;
    assert!(feed.closed());
}

#[tokio::test]
async fn test_no_active_appointment_skips_subscription() {
    let fixture = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fixture.server)
        .await;
    let (feed, _push) = ScriptedFeed::new();

    let result = fixture.service().start_tracking(&fixture.ctx, feed.clone()).await;

    assert_matches!(result, Err(QueueTrackerError::NoActiveAppointment));
    assert!(!feed.subscribed());
}

#[tokio::test]
async fn test_failed_initial_read_closes_subscription() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(12).await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/queue_status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fixture.server)
        .await;
    let (feed, _push) = ScriptedFeed::new();

    let result = fixture.service().start_tracking(&fixture.ctx, feed.clone()).await;

    assert_matches!(result, Err(QueueTrackerError::StatusUnavailable { .. }));
    assert!(feed.subscribed());
    assert!(feed.closed());
}

#[tokio::test]
async fn test_feed_end_finishes_live_queue() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(8).await;
    fixture.mount_queue(2).await;
    let (feed, push) = ScriptedFeed::new();

    let mut live = fixture
        .service()
        .start_tracking(&fixture.ctx, feed.clone())
        .await
        .unwrap();

    next_update(&mut live).await;
    drop(push);

    let end = timeout(WAIT, live.recv()).await.unwrap();
    assert!(end.is_none());
    live.close().await;
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_supabase_feed_joins_forwards_and_leaves() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let doctor_id = Uuid::new_v4();

    let realtime = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = next_json(&mut socket).await;
        let topic = join["topic"].as_str().unwrap().to_string();

        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": "1"
        });
        socket.send(Message::Text(reply.to_string())).await.unwrap();

        let change = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "table": "queue_status",
                    "record": {
                        "id": Uuid::new_v4(),
                        "doctor_id": doctor_id,
                        "current_token": 43,
                        "is_active": true,
                        "last_updated": "2030-03-11T09:30:00Z"
                    }
                }
            },
            "ref": null
        });
        socket.send(Message::Text(change.to_string())).await.unwrap();

        loop {
            let frame = next_json(&mut socket).await;
            if frame["event"] == "phx_leave" {
                return (join, frame);
            }
        }
    });

    let mut config = TestConfig::default().to_app_config();
    config.supabase_realtime_url = Some(format!("ws://{}/socket", addr));
    let feed = SupabaseRealtimeFeed::new(&config);

    let mut subscription = feed.subscribe(doctor_id, "patient-jwt").await.unwrap();

    let status = timeout(WAIT, subscription.recv()).await.unwrap().unwrap();
    assert_eq!(status.doctor_id, doctor_id);
    assert_eq!(status.current_token, 43);

    subscription.close().await;

    let (join, leave) = timeout(WAIT, realtime).await.unwrap().unwrap();
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["payload"]["access_token"], "patient-jwt");
    assert_eq!(
        join["payload"]["config"]["postgres_changes"][0]["filter"],
        format!("doctor_id=eq.{}", doctor_id)
    );
    assert_eq!(leave["topic"], format!("realtime:queue_status:{}", doctor_id));
}

#[tokio::test]
async fn test_supabase_feed_reports_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = TestConfig::default().to_app_config();
    config.supabase_realtime_url = Some(format!("ws://{}/socket", addr));

    let result = SupabaseRealtimeFeed::new(&config).subscribe(Uuid::new_v4(), "jwt").await;

    assert_matches!(result, Err(QueueTrackerError::RealtimeError(_)));
}

#[tokio::test]
async fn test_supabase_feed_reports_refused_join() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let realtime = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = next_json(&mut socket).await;
        let reply = json!({
            "topic": join["topic"],
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": "1"
        });
        socket.send(Message::Text(reply.to_string())).await.unwrap();

        // Hold the socket open until the client goes away.
        while let Some(Ok(_)) = socket.next().await {}
    });

    let mut config = TestConfig::default().to_app_config();
    config.supabase_realtime_url = Some(format!("ws://{}/socket", addr));

    let result = timeout(
        WAIT,
        SupabaseRealtimeFeed::new(&config).subscribe(Uuid::new_v4(), "expired-jwt"),
    )
    .await
    .unwrap();

    assert_matches!(result, Err(QueueTrackerError::RealtimeError(msg)) if msg.contains("unauthorized"));
    timeout(WAIT, realtime).await.unwrap().unwrap();
}
