//! Daemon HTTP surface.
//!
//! `/discover` and `/health` are open; everything else carries a request
//! signature verified against this machine's token.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::{Path, Query, Request, State},
        middleware::{self, Next},
        response::Response,
        routing::{get, post},
    },
    chrono::Utc,
    intercom_auth::Verification,
    intercom_protocol::{
        DeliverRequest, DiscoverReply, InboxEntry, JoinRequest, JoinState, MissionPollReply,
        MissionStartReply, MissionStartRequest, RegisterRequest, SessionRegisterReply,
        SessionRegisterRequest, SessionStatusReply,
    },
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::{
    error::DaemonError, heartbeat::run_heartbeat_loop, hub_client::HubClient,
    sessions::SessionRecord, state::DaemonState,
};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the daemon router.
pub fn build_daemon_app(state: Arc<DaemonState>) -> Router {
    let protected = Router::new()
        .route("/mission/start", post(mission_start))
        .route("/missions/{id}", get(mission_poll))
        .route("/session/register", post(session_register))
        .route("/session/unregister", post(session_unregister))
        .route("/sessions", get(sessions_list))
        .route("/session/deliver", post(session_deliver))
        .route("/session/{id}/status", get(session_status))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_signature,
        ));

    Router::new()
        .route("/discover", get(discover))
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Join the hub if needed, register projects, run the heartbeat loop, and
/// serve the daemon surface until the process exits.
pub async fn start_daemon(
    state: Arc<DaemonState>,
    client: Arc<HubClient>,
    display_name: String,
    discovery: intercom_config::DiscoveryConfig,
    listen: &str,
) -> anyhow::Result<()> {
    ensure_joined(&state, &client, &display_name).await?;

    let manifest = RegisterRequest {
        machine_id: state.machine_id.clone(),
        projects: crate::discovery::scan_projects(&discovery),
    };
    info!(projects = manifest.projects.len(), "registering project manifest");
    if let Err(e) = client.register(&manifest).await {
        warn!(error = %e, "project registration failed, continuing");
    }

    tokio::spawn(run_heartbeat_loop(Arc::clone(&state), Arc::clone(&client)));

    let app = build_daemon_app(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen, "daemon listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Make sure this machine holds an approved token, walking the join flow if
/// necessary. Blocks until the operator decides.
pub async fn ensure_joined(
    state: &Arc<DaemonState>,
    client: &Arc<HubClient>,
    display_name: &str,
) -> anyhow::Result<()> {
    if state.token().await.is_some() {
        return Ok(());
    }

    let reply = client
        .join(&JoinRequest {
            machine_id: state.machine_id.clone(),
            display_name: display_name.to_string(),
            overlay_ip: state.overlay_ip.clone(),
        })
        .await?;

    match reply.status {
        JoinState::Approved => {
            let token = reply
                .token
                .ok_or_else(|| anyhow::anyhow!("hub approved join without a token"))?;
            install_token(state, client, token).await;
            return Ok(());
        },
        JoinState::Denied => anyhow::bail!("join denied by operator"),
        JoinState::Pending | JoinState::PendingApproval => {
            info!("join pending operator approval, polling");
        },
    }

    loop {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        match client.join_status().await {
            Ok(reply) => match reply.status {
                JoinState::Approved => {
                    let token = reply
                        .token
                        .ok_or_else(|| anyhow::anyhow!("hub approved join without a token"))?;
                    install_token(state, client, token).await;
                    return Ok(());
                },
                JoinState::Denied => anyhow::bail!("join denied by operator"),
                JoinState::Pending | JoinState::PendingApproval => {},
            },
            Err(e) => warn!(error = %e, "join status poll failed"),
        }
    }
}

async fn install_token(state: &Arc<DaemonState>, client: &Arc<HubClient>, token: String) {
    info!("join approved, token installed (persist it via auth.token or INTERCOM_TOKEN)");
    state.set_token(token.clone()).await;
    client.set_token(token).await;
}

// ── Auth middleware ─────────────────────────────────────────────────────────

async fn require_signature(
    State(state): State<Arc<DaemonState>>,
    req: Request,
    next: Next,
) -> Result<Response, DaemonError> {
    let (parts, body) = req.into_parts();

    let machine = header_str(&parts, intercom_auth::HEADER_MACHINE)?;
    let ts: i64 = header_str(&parts, intercom_auth::HEADER_TS)?
        .parse()
        .map_err(|_| DaemonError::AuthBadSignature)?;
    let signature = header_str(&parts, intercom_auth::HEADER_SIG)?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| DaemonError::BadEnvelope(e.to_string()))?;

    // Every caller shares this machine's token; the claimed machine id is
    // informational.
    let token = state.token().await;
    let verdict = intercom_auth::verify(
        parts.method.as_str(),
        parts.uri.path(),
        &bytes,
        &machine,
        ts,
        &signature,
        |_| token,
    );

    match verdict {
        Verification::Verified { .. } => {
            let req = Request::from_parts(parts, axum::body::Body::from(bytes));
            Ok(next.run(req).await)
        },
        Verification::Stale => Err(DaemonError::AuthStale),
        Verification::BadSignature => Err(DaemonError::AuthBadSignature),
        Verification::UnknownMachine => Err(DaemonError::AuthUnknownMachine(machine)),
    }
}

fn header_str(parts: &axum::http::request::Parts, name: &str) -> Result<String, DaemonError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(DaemonError::AuthBadSignature)
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn discover(State(state): State<Arc<DaemonState>>) -> Json<DiscoverReply> {
    Json(DiscoverReply {
        hub: false,
        version: env!("CARGO_PKG_VERSION").to_string(),
        machine_id: state.machine_id.clone(),
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn mission_start(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<MissionStartRequest>,
) -> Result<Json<MissionStartReply>, DaemonError> {
    let reply = state.runner.start(&req).await?;
    Ok(Json(reply))
}

async fn mission_poll(
    State(state): State<Arc<DaemonState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<MissionPollReply>, DaemonError> {
    let since: u64 = params
        .get("feedback_since")
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| DaemonError::BadEnvelope("feedback_since must be an integer".into()))?
        .unwrap_or(0);

    let reply = state
        .runner
        .poll(&id, since)
        .await
        .ok_or_else(|| DaemonError::not_found("mission", &id))?;
    Ok(Json(reply))
}

async fn session_register(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<SessionRegisterRequest>,
) -> Result<Json<SessionRegisterReply>, DaemonError> {
    if req.project.is_empty() {
        return Err(DaemonError::BadEnvelope("project is required".into()));
    }
    let session_id = req
        .session_id
        .unwrap_or_else(intercom_common::ids::session_id);
    let inbox_path = state.inbox.path_for(&session_id);

    state
        .sessions
        .register(SessionRecord {
            session_id: session_id.clone(),
            project: req.project,
            pid: req.pid,
            inbox_path: inbox_path.clone(),
            registered_at: Utc::now(),
            status: Default::default(),
            summary: req.summary,
        })
        .await;

    Ok(Json(SessionRegisterReply {
        session_id,
        inbox_path: inbox_path.display().to_string(),
    }))
}

async fn session_unregister(
    State(state): State<Arc<DaemonState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, DaemonError> {
    let session_id = body
        .get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DaemonError::BadEnvelope("session_id is required".into()))?;
    let removed = state.sessions.unregister(session_id).await;
    Ok(Json(serde_json::json!({ "ok": true, "removed": removed })))
}

async fn sessions_list(State(state): State<Arc<DaemonState>>) -> Json<serde_json::Value> {
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .list()
        .await
        .iter()
        .map(|s| {
            serde_json::json!({
                "session_id": s.session_id,
                "project": s.project,
                "pid": s.pid,
                "status": s.status,
                "registered_at": s.registered_at.to_rfc3339(),
            })
        })
        .collect();
    Json(serde_json::json!({ "sessions": sessions }))
}

async fn session_deliver(
    State(state): State<Arc<DaemonState>>,
    Json(req): Json<DeliverRequest>,
) -> Result<Json<serde_json::Value>, DaemonError> {
    let session = state
        .sessions
        .resolve_live(req.session_id.as_deref(), &req.project)
        .await
        .ok_or_else(|| DaemonError::NoActiveSession(req.project.clone()))?;

    let entry = InboxEntry {
        thread_id: req.thread_id,
        from_agent: req.from_agent,
        timestamp: req.timestamp,
        message: req.message,
        read: false,
    };
    state.inbox.append(&session.session_id, &entry).await?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "session_id": session.session_id,
    })))
}

async fn session_status(
    State(state): State<Arc<DaemonState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusReply>, DaemonError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| DaemonError::not_found("session", &id))?;
    let inbox_pending = state.inbox.pending_count(&id).await?;

    Ok(Json(SessionStatusReply {
        session_id: session.session_id,
        project: session.project,
        pid: session.pid,
        status: session.status,
        summary: session.summary,
        registered_at: session.registered_at,
        inbox_pending,
    }))
}
