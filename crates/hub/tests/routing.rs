#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end routing tests: a real hub server, a stub daemon, and a
//! scripted operator console.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post},
    chrono::Utc,
    tokio::net::TcpListener,
};

use {
    intercom_console::{ApprovalChoice, ApprovalPrompt, JoinDecision, OperatorConsole},
    intercom_hub::{HubState, build_hub_app},
    intercom_policy::{GrantScope, PolicyEngine},
    intercom_protocol::{
        DeliverRequest, HeartbeatRequest, MachineStatus, MissionStartReply, MissionStartRequest,
        MissionStatus, RouteReply, RouteStatus, SessionPresence, SessionStatus,
    },
    intercom_registry::{MachineRecord, Registry},
};

const TOKEN_A: &str = "token-machine-a";
const TOKEN_B: &str = "token-machine-b";

// ── Scripted console ────────────────────────────────────────────────────────

struct ScriptedConsole {
    answer: ApprovalChoice,
    prompts: AtomicUsize,
    notes: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    fn new(answer: ApprovalChoice) -> Arc<Self> {
        Arc::new(Self {
            answer,
            prompts: AtomicUsize::new(0),
            notes: Mutex::new(Vec::new()),
        })
    }

    fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorConsole for ScriptedConsole {
    async fn announce_join(&self, _: &str, _: &str, _: &str) -> JoinDecision {
        JoinDecision::Pending
    }

    async fn ask_approval(&self, _prompt: ApprovalPrompt) -> ApprovalChoice {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.answer
    }

    async fn post_to_mission(&self, mission_id: &str, text: &str) {
        self.notes.lock().unwrap().push(format!("{mission_id}: {text}"));
    }

    async fn notify_feedback(&self, kind: &str, text: &str) {
        self.notes.lock().unwrap().push(format!("{kind}: {text}"));
    }
}

// ── Stub daemon ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct StubDaemon {
    delivered: Mutex<Vec<DeliverRequest>>,
    launched: Mutex<Vec<MissionStartRequest>>,
    deliver_404: bool,
}

async fn stub_deliver(
    State(stub): State<Arc<StubDaemon>>,
    Json(req): Json<DeliverRequest>,
) -> impl IntoResponse {
    if stub.deliver_404 {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "code": "no_active_session" })),
        )
            .into_response();
    }
    stub.delivered.lock().unwrap().push(req);
    Json(serde_json::json!({ "ok": true })).into_response()
}

async fn stub_mission_start(
    State(stub): State<Arc<StubDaemon>>,
    Json(req): Json<MissionStartRequest>,
) -> Json<MissionStartReply> {
    stub.launched.lock().unwrap().push(req);
    Json(MissionStartReply {
        mission_id: "dm-1".into(),
        status: MissionStatus::Running,
    })
}

async fn start_stub_daemon(stub: Arc<StubDaemon>) -> SocketAddr {
    let app = Router::new()
        .route("/session/deliver", post(stub_deliver))
        .route("/mission/start", post(stub_mission_start))
        .with_state(stub);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    hub_addr: SocketAddr,
    console: Arc<ScriptedConsole>,
    stub: Arc<StubDaemon>,
    http: reqwest::Client,
}

async fn start_harness(answer: ApprovalChoice, deliver_404: bool) -> Harness {
    start_harness_with_policy(answer, deliver_404, PolicyEngine::ask_everything()).await
}

async fn start_harness_with_policy(
    answer: ApprovalChoice,
    deliver_404: bool,
    policy: PolicyEngine,
) -> Harness {
    let stub = Arc::new(StubDaemon {
        deliver_404,
        ..StubDaemon::default()
    });
    let daemon_addr = start_stub_daemon(Arc::clone(&stub)).await;

    let registry = Registry::in_memory().await.unwrap();
    seed_machines(&registry, &format!("http://{daemon_addr}")).await;

    let console = ScriptedConsole::new(answer);
    let state = HubState::new(
        "hub",
        registry,
        policy,
        console.clone() as Arc<dyn OperatorConsole>,
    );
    let app = build_hub_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hub_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        hub_addr,
        console,
        stub,
        http: reqwest::Client::new(),
    }
}

/// Approve machines `a` and `b` with project `p`, both reachable at
/// `daemon_url`.
async fn seed_machines(registry: &Registry, daemon_url: &str) {
    for (id, token) in [("a", TOKEN_A), ("b", TOKEN_B)] {
        registry
            .register_machine(&MachineRecord {
                machine_id: id.into(),
                display_name: id.into(),
                overlay_ip: "127.0.0.1".into(),
                daemon_url: daemon_url.to_string(),
                token: String::new(),
                status: MachineStatus::Pending,
                created_at: Utc::now().timestamp(),
                last_seen: None,
            })
            .await
            .unwrap();
        registry.approve_join(id, token).await.unwrap();
        registry
            .register_project(&intercom_registry::ProjectRecord {
                machine_id: id.into(),
                project_id: "p".into(),
                description: String::new(),
                capabilities: Vec::new(),
                path: String::new(),
            })
            .await
            .unwrap();
    }
}

impl Harness {
    async fn signed_post(
        &self,
        path: &str,
        machine: &str,
        token: &str,
        body: serde_json::Value,
    ) -> reqwest::Response {
        self.signed_post_at(path, machine, token, body, Utc::now().timestamp())
            .await
    }

    async fn signed_post_at(
        &self,
        path: &str,
        machine: &str,
        token: &str,
        body: serde_json::Value,
        ts: i64,
    ) -> reqwest::Response {
        let bytes = serde_json::to_vec(&body).unwrap();
        let headers = intercom_auth::sign_at("POST", path, &bytes, token, machine, ts).unwrap();
        let mut req = self
            .http
            .post(format!("http://{}{path}", self.hub_addr))
            .header("content-type", "application/json")
            .body(bytes);
        for (name, value) in headers.pairs() {
            req = req.header(name, value);
        }
        req.send().await.unwrap()
    }

    /// Announce an active session `s1` for `b/p`.
    async fn announce_presence_for_b(&self) {
        let hb = HeartbeatRequest {
            machine_id: "b".into(),
            overlay_ip: "127.0.0.1".into(),
            daemon_url: String::new(),
            active_sessions: vec![SessionPresence {
                session_id: "s-20260801-abc123".into(),
                project: "p".into(),
                status: SessionStatus::Active,
                summary: None,
            }],
        };
        let resp = self
            .signed_post("/api/heartbeat", "b", TOKEN_B, serde_json::to_value(hb).unwrap())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

fn chat_body(thread_id: &str) -> serde_json::Value {
    serde_json::json!({
        "from_agent": "a/p",
        "to_agent": "b/p",
        "type": "chat",
        "payload": { "message": "hi", "thread_id": thread_id },
    })
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_happy_path_delivers_to_session() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;
    h.announce_presence_for_b().await;

    let resp = h
        .signed_post("/api/route", "a", TOKEN_A, chat_body("t-111111"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::Delivered);
    assert_eq!(reply.thread_id.as_deref(), Some("t-111111"));

    let delivered = h.stub.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].thread_id, "t-111111");
    assert_eq!(delivered[0].from_agent.to_string(), "a/p");
    assert_eq!(delivered[0].message, "hi");
    // The daemon resolves the target session itself; the hub never pins one.
    assert_eq!(delivered[0].session_id, None);
}

#[tokio::test]
async fn chat_to_offline_target_reports_no_active_session() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;
    // No heartbeat: hub has no presence for b/p.

    let resp = h
        .signed_post("/api/route", "a", TOKEN_A, chat_body("t-111111"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::NoActiveSession);
    assert_eq!(reply.thread_id.as_deref(), Some("t-111111"));

    assert!(h.stub.delivered.lock().unwrap().is_empty());
    let notes: Vec<String> = h
        .console
        .notes()
        .into_iter()
        .filter(|n| n.contains("no active session"))
        .collect();
    assert_eq!(notes.len(), 1);
}

#[tokio::test]
async fn chat_trusts_daemon_404_over_stale_presence() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), true).await;
    h.announce_presence_for_b().await;

    let resp = h
        .signed_post("/api/route", "a", TOKEN_A, chat_body("t-222222"))
        .await;
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::NoActiveSession);
}

#[tokio::test]
async fn ask_parks_on_operator_and_mission_grant_suppresses_reprompt() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Mission), false).await;

    let ask = serde_json::json!({
        "from_agent": "a/home",
        "to_agent": "b/p",
        "type": "ask",
        "payload": { "prompt": "list disks" },
    });
    let resp = h.signed_post("/api/route", "a", TOKEN_A, ask.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::Queued);
    assert_eq!(h.console.prompt_count(), 1);
    assert_eq!(h.stub.launched.lock().unwrap().len(), 1);

    // Second ask within the same mission must not prompt again.
    let mut again = ask;
    again["mission_id"] = serde_json::Value::String(reply.mission_id.clone());
    let resp = h.signed_post("/api/route", "a", TOKEN_A, again).await;
    let reply2: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply2.status, RouteStatus::Queued);
    assert_eq!(reply2.mission_id, reply.mission_id);
    assert_eq!(h.console.prompt_count(), 1);
    assert_eq!(h.stub.launched.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn operator_denial_reports_denied() {
    let h = start_harness(ApprovalChoice::Deny, false).await;

    let ask = serde_json::json!({
        "from_agent": "a/home",
        "to_agent": "b/p",
        "type": "ask",
        "payload": { "prompt": "list disks" },
    });
    let resp = h.signed_post("/api/route", "a", TOKEN_A, ask).await;
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::Denied);
    assert_eq!(reply.error.as_deref(), Some("denied_by_operator"));
    assert!(h.stub.launched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn expired_signature_is_rejected() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;

    let hb = serde_json::json!({
        "machine_id": "b",
        "overlay_ip": "127.0.0.1",
        "daemon_url": "",
        "active_sessions": [],
    });
    let resp = h
        .signed_post_at("/api/heartbeat", "b", TOKEN_B, hb, Utc::now().timestamp() - 120)
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "auth_stale");
}

#[tokio::test]
async fn from_agent_must_match_signing_machine() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;

    let spoofed = serde_json::json!({
        "from_agent": "b/p",
        "to_agent": "a/p",
        "type": "chat",
        "payload": { "message": "hi" },
    });
    let resp = h.signed_post("/api/route", "a", TOKEN_A, spoofed).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reply_resolves_recipient_from_thread() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;
    h.announce_presence_for_b().await;

    // a → b opens the thread.
    let resp = h
        .signed_post("/api/route", "a", TOKEN_A, chat_body("t-333333"))
        .await;
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::Delivered);

    // b replies without knowing the recipient; the thread map resolves a/p.
    // a/p has no announced session, so the reply reports no_active_session.
    let reply_body = serde_json::json!({
        "from_agent": "b/p",
        "to_agent": "b/p",
        "type": "reply",
        "payload": { "message": "hello back", "thread_id": "t-333333" },
    });
    let resp = h.signed_post("/api/route", "b", TOKEN_B, reply_body).await;
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::NoActiveSession);

    // The reply landed on the mission that owns the thread.
    let list = h
        .signed_post("/api/route", "b", TOKEN_B, serde_json::json!({
            "from_agent": "b/p",
            "to_agent": "a/p",
            "type": "status",
            "mission_id": reply.mission_id,
        }))
        .await;
    let status_reply: RouteReply = list.json().await.unwrap();
    assert_eq!(status_reply.thread_id.as_deref(), Some("t-333333"));
}

#[tokio::test]
async fn unknown_target_machine_is_not_found() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;

    let body = serde_json::json!({
        "from_agent": "a/p",
        "to_agent": "ghost/p",
        "type": "chat",
        "payload": { "message": "hi" },
    });
    let resp = h.signed_post("/api/route", "a", TOKEN_A, body).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsigned_request_to_protected_route_is_rejected() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;
    let resp = h
        .http
        .post(format!("http://{}/api/route", h.hub_addr))
        .json(&chat_body("t-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_with_two_live_sessions_reaches_the_newest() {
    // A real daemon for machine b with two live sessions on project p.
    let dir = tempfile::tempdir().unwrap();
    let daemon_state = intercom_daemon::DaemonState::new(
        "b",
        "127.0.0.1",
        "http://127.0.0.1:0",
        Some(TOKEN_B.into()),
        dir.path().to_path_buf(),
        intercom_config::AgentLauncherConfig::default(),
    );
    let app = intercom_daemon::build_daemon_app(Arc::clone(&daemon_state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let daemon_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let now = Utc::now();
    for (session_id, registered_at) in [
        ("s-old", now - chrono::Duration::minutes(5)),
        ("s-new", now),
    ] {
        daemon_state
            .sessions
            .register(intercom_daemon::sessions::SessionRecord {
                session_id: session_id.into(),
                project: "p".into(),
                pid: std::process::id(),
                inbox_path: daemon_state.inbox.path_for(session_id),
                registered_at,
                status: SessionStatus::Active,
                summary: None,
            })
            .await;
    }

    // Hub whose registry points machine b at the real daemon.
    let registry = Registry::in_memory().await.unwrap();
    seed_machines(&registry, &format!("http://{daemon_addr}")).await;
    let console = ScriptedConsole::new(ApprovalChoice::Allow(GrantScope::Once));
    let state = HubState::new(
        "hub",
        registry,
        PolicyEngine::ask_everything(),
        console.clone() as Arc<dyn OperatorConsole>,
    );
    let hub_app = build_hub_app(state);
    let hub_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let hub_addr = hub_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(hub_listener, hub_app).await.unwrap();
    });
    let h = Harness {
        hub_addr,
        console,
        stub: Arc::new(StubDaemon::default()),
        http: reqwest::Client::new(),
    };

    // The daemon's heartbeat announces its authoritative presence.
    let hb = HeartbeatRequest {
        machine_id: "b".into(),
        overlay_ip: "127.0.0.1".into(),
        daemon_url: String::new(),
        active_sessions: daemon_state.sessions.presence().await,
    };
    let resp = h
        .signed_post("/api/heartbeat", "b", TOKEN_B, serde_json::to_value(hb).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = h
        .signed_post("/api/route", "a", TOKEN_A, chat_body("t-444444"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: RouteReply = resp.json().await.unwrap();
    assert_eq!(reply.status, RouteStatus::Delivered);

    // The most recently registered session received the message; the stale
    // one got nothing.
    let raw = std::fs::read_to_string(daemon_state.inbox.path_for("s-new")).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.contains("\"message\":\"hi\""));
    assert!(!daemon_state.inbox.path_for("s-old").exists());
}

#[tokio::test]
async fn discover_is_open_and_identifies_hub() {
    let h = start_harness(ApprovalChoice::Allow(GrantScope::Once), false).await;
    let resp = h
        .http
        .get(format!("http://{}/api/discover", h.hub_addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["hub"], true);
    assert_eq!(body["machine_id"], "hub");
}
