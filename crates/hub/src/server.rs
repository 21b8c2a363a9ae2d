//! Hub HTTP surface.
//!
//! `/api/discover`, `/api/join` and `/api/join/status/*` are unauthenticated;
//! everything else requires a valid request signature, verified against the
//! registry's token for the claiming machine.

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
    intercom_console::JoinDecision,
    intercom_protocol::{
        AgentInfo, AgentsReply, DiscoverReply, FeedbackRequest, HeartbeatRequest, JoinReply,
        JoinRequest, JoinState, MachineStatus, RegisterRequest, RouteRequest,
    },
    intercom_registry::{AgentFilter, MachineRecord},
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::{error::HubError, router, state::HubState};

/// Pending/denied join rows are garbage-collected after this many seconds.
const JOIN_GC_MAX_AGE_SECS: i64 = 7 * 24 * 3600;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The verified signing machine, attached by the auth middleware.
#[derive(Debug, Clone)]
pub struct SignedMachine(pub String);

/// Build the hub router.
pub fn build_hub_app(state: Arc<HubState>) -> Router {
    let protected = Router::new()
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/register", post(register))
        .route("/api/agents", get(agents))
        .route("/api/route", post(route_message))
        .route("/api/missions", get(missions_list))
        .route("/api/missions/{id}", get(mission_poll))
        .route("/api/feedback", post(feedback))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_signature,
        ));

    Router::new()
        .route("/api/discover", get(discover))
        .route("/api/join", post(join))
        .route("/api/join/status/{machine_id}", get(join_status))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the hub on `listen` until the process exits.
pub async fn start_hub(state: Arc<HubState>, listen: &str) -> anyhow::Result<()> {
    spawn_join_gc(Arc::clone(&state));
    let app = build_hub_app(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen, "hub listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_join_gc(state: Arc<HubState>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match state.registry.gc_stale_joins(JOIN_GC_MAX_AGE_SECS).await {
                Ok(0) => {},
                Ok(n) => info!(removed = n, "garbage-collected stale join rows"),
                Err(e) => warn!(error = %e, "join gc failed"),
            }
        }
    });
}

// ── Auth middleware ─────────────────────────────────────────────────────────

async fn require_signature(
    State(state): State<Arc<HubState>>,
    req: Request,
    next: Next,
) -> Result<Response, HubError> {
    let (parts, body) = req.into_parts();

    let machine = header_str(&parts, intercom_auth::HEADER_MACHINE)?;
    let ts: i64 = header_str(&parts, intercom_auth::HEADER_TS)?
        .parse()
        .map_err(|_| HubError::AuthBadSignature)?;
    let signature = header_str(&parts, intercom_auth::HEADER_SIG)?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| HubError::BadEnvelope(e.to_string()))?;

    let token = state.registry.lookup_token(&machine).await?;
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
        Verification::Verified { machine_id } => {
            let mut req = Request::from_parts(parts, axum::body::Body::from(bytes));
            req.extensions_mut().insert(SignedMachine(machine_id));
            Ok(next.run(req).await)
        },
        Verification::Stale => Err(HubError::AuthStale),
        Verification::BadSignature => Err(HubError::AuthBadSignature),
        Verification::UnknownMachine => Err(HubError::AuthUnknownMachine(machine)),
    }
}

fn header_str(parts: &axum::http::request::Parts, name: &str) -> Result<String, HubError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(HubError::AuthBadSignature)
}

// ── Unauthenticated handlers ────────────────────────────────────────────────

async fn discover(State(state): State<Arc<HubState>>) -> Json<DiscoverReply> {
    Json(DiscoverReply {
        hub: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        machine_id: state.machine_id.clone(),
    })
}

async fn join(
    State(state): State<Arc<HubState>>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinReply>, HubError> {
    if req.machine_id.is_empty() {
        return Err(HubError::BadEnvelope("machine_id is required".into()));
    }

    if let Some(existing) = state.registry.get_machine(&req.machine_id).await? {
        match existing.status {
            MachineStatus::Approved => {
                return Ok(Json(JoinReply {
                    status: JoinState::Approved,
                    token: Some(existing.token),
                }));
            },
            MachineStatus::Denied | MachineStatus::Revoked => {
                return Ok(Json(JoinReply {
                    status: JoinState::Denied,
                    token: None,
                }));
            },
            MachineStatus::Pending => {},
        }
    }

    state
        .registry
        .register_machine(&MachineRecord {
            machine_id: req.machine_id.clone(),
            display_name: req.display_name.clone(),
            overlay_ip: req.overlay_ip.clone(),
            daemon_url: format!("http://{}:{}", req.overlay_ip, intercom_protocol::DEFAULT_PORT),
            token: String::new(),
            status: MachineStatus::Pending,
            created_at: Utc::now().timestamp(),
            last_seen: None,
        })
        .await?;

    if state.begin_join_announcement(&req.machine_id).await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let decision = state
                .console
                .announce_join(&req.machine_id, &req.display_name, &req.overlay_ip)
                .await;
            let result = match decision {
                JoinDecision::Approved => {
                    let token = uuid::Uuid::new_v4().simple().to_string();
                    state
                        .registry
                        .approve_join(&req.machine_id, &token)
                        .await
                        .map(|_| ())
                },
                JoinDecision::Denied => state.registry.deny_join(&req.machine_id).await,
                JoinDecision::Pending => Ok(()),
            };
            if let Err(e) = result {
                warn!(machine_id = %req.machine_id, error = %e, "join resolution failed");
            }
            state.end_join_announcement(&req.machine_id).await;
        });
    }

    Ok(Json(JoinReply {
        status: JoinState::PendingApproval,
        token: None,
    }))
}

async fn join_status(
    State(state): State<Arc<HubState>>,
    Path(machine_id): Path<String>,
) -> Result<Json<JoinReply>, HubError> {
    let machine = state
        .registry
        .get_machine(&machine_id)
        .await?
        .ok_or_else(|| HubError::not_found("machine", &machine_id))?;

    let reply = match machine.status {
        MachineStatus::Approved => JoinReply {
            status: JoinState::Approved,
            token: Some(machine.token),
        },
        MachineStatus::Denied | MachineStatus::Revoked => JoinReply {
            status: JoinState::Denied,
            token: None,
        },
        MachineStatus::Pending => JoinReply {
            status: JoinState::Pending,
            token: None,
        },
    };
    Ok(Json(reply))
}

// ── Signed handlers ─────────────────────────────────────────────────────────

async fn heartbeat(
    State(state): State<Arc<HubState>>,
    axum::Extension(signer): axum::Extension<SignedMachine>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, HubError> {
    if req.machine_id != signer.0 {
        return Err(HubError::BadEnvelope(
            "heartbeat machine_id does not match signing machine".into(),
        ));
    }

    state
        .registry
        .update_heartbeat(
            &req.machine_id,
            Some(&req.overlay_ip).filter(|s| !s.is_empty()).map(|s| s.as_str()),
            Some(&req.daemon_url).filter(|s| !s.is_empty()).map(|s| s.as_str()),
        )
        .await?;
    state
        .update_presence(&req.machine_id, req.active_sessions)
        .await;

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn register(
    State(state): State<Arc<HubState>>,
    axum::Extension(signer): axum::Extension<SignedMachine>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, HubError> {
    if req.machine_id != signer.0 {
        return Err(HubError::BadEnvelope(
            "register machine_id does not match signing machine".into(),
        ));
    }

    for project in &req.projects {
        state
            .registry
            .register_project(&intercom_registry::ProjectRecord {
                machine_id: req.machine_id.clone(),
                project_id: project.project_id.clone(),
                description: project.description.clone(),
                capabilities: project.capabilities.clone(),
                path: project.path.clone(),
            })
            .await?;
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn agents(
    State(state): State<Arc<HubState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<AgentsReply>, HubError> {
    let filter = match params.get("filter") {
        None => AgentFilter::All,
        Some(raw) => AgentFilter::parse(raw)
            .ok_or_else(|| HubError::BadEnvelope(format!("unknown filter: {raw}")))?,
    };

    let pairs = state.registry.list_agents(&filter).await?;
    let mut agents = Vec::with_capacity(pairs.len());
    for (machine, project) in pairs {
        let session = state
            .find_session(&machine.machine_id, &project.project_id)
            .await;
        agents.push(AgentInfo {
            machine_id: machine.machine_id.clone(),
            project_id: project.project_id,
            status: if machine.is_online() { "online" } else { "offline" }.into(),
            description: project.description,
            capabilities: project.capabilities,
            session,
        });
    }
    Ok(Json(AgentsReply { agents }))
}

async fn route_message(
    State(state): State<Arc<HubState>>,
    axum::Extension(signer): axum::Extension<SignedMachine>,
    Json(req): Json<RouteRequest>,
) -> Result<Json<intercom_protocol::RouteReply>, HubError> {
    let reply = router::route(&state, &signer.0, req).await?;
    Ok(Json(reply))
}

async fn missions_list(
    State(state): State<Arc<HubState>>,
) -> Json<serde_json::Value> {
    let missions = state.missions.list().await;
    let entries: Vec<serde_json::Value> = missions
        .iter()
        .map(|m| {
            serde_json::json!({
                "mission_id": m.mission_id,
                "from_agent": m.from.to_string(),
                "to_agent": m.to.to_string(),
                "type": m.kind,
                "status": m.status,
                "created_at": m.created_at.to_rfc3339(),
            })
        })
        .collect();
    Json(serde_json::json!({ "missions": entries }))
}

async fn mission_poll(
    State(state): State<Arc<HubState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<intercom_protocol::MissionPollReply>, HubError> {
    let since: u64 = params
        .get("feedback_since")
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| HubError::BadEnvelope("feedback_since must be an integer".into()))?
        .unwrap_or(0);

    refresh_from_daemon(&state, &id).await;

    let mission = state
        .missions
        .snapshot(&id)
        .await
        .ok_or_else(|| HubError::not_found("mission", &id))?;
    Ok(Json(mission.poll_reply(since)))
}

async fn feedback(
    State(state): State<Arc<HubState>>,
    Json(req): Json<FeedbackRequest>,
) -> Json<serde_json::Value> {
    let kind = match req.kind {
        intercom_protocol::FeedbackKind::Bug => "bug",
        intercom_protocol::FeedbackKind::Improvement => "improvement",
        intercom_protocol::FeedbackKind::Note => "note",
    };
    state
        .console
        .notify_feedback(kind, &format!("{} — {}", req.from_agent, req.description))
        .await;
    Json(serde_json::json!({ "ok": true }))
}

/// Pull fresh status/output/feedback from the executing daemon before
/// answering a mission poll.
async fn refresh_from_daemon(state: &Arc<HubState>, mission_id: &str) {
    let Some(mission) = state.missions.snapshot(mission_id).await else {
        return;
    };
    let Some(daemon_mission_id) = mission.daemon_mission_id else {
        return;
    };
    if mission.status.is_terminal() {
        return;
    }
    let Ok(Some(machine)) = state.registry.get_machine(&mission.to.machine).await else {
        return;
    };

    let since = state.missions.feedback_high_water(mission_id).await;
    match state
        .daemons
        .fetch_mission(&machine.daemon_url, &machine.token, &daemon_mission_id, since)
        .await
    {
        Ok(poll) => state.missions.merge_daemon_poll(mission_id, poll).await,
        Err(e) => warn!(mission_id, error = %e, "mission refresh from daemon failed"),
    }
}
