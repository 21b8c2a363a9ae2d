//! Message router: classify, check policy, park on approval, dispatch.
//!
//! Ordering within a mission is guaranteed by the mission gate, held across
//! approval pauses; unrelated missions proceed concurrently. An operator
//! wait never holds a store-wide lock.

use std::sync::Arc;

use {
    chrono::Utc,
    intercom_common::AgentAddr,
    intercom_console::{ApprovalChoice, ApprovalPrompt},
    intercom_policy::{Decision, GrantOutcome, GrantScope, PolicyRequest},
    intercom_protocol::{
        DeliverRequest, MachineStatus, Message, MissionStartRequest, MissionStatus, RouteReply,
        RouteRequest, RouteStatus,
    },
    tracing::{info, warn},
};

use crate::{
    daemon_client::{DaemonClientError, DeliverOutcome},
    error::HubError,
    missions::LogEntry,
    state::HubState,
    threads::ThreadInfo,
};

/// Route one message. `sender_machine` is the verified signing machine.
pub async fn route(
    state: &Arc<HubState>,
    sender_machine: &str,
    req: RouteRequest,
) -> Result<RouteReply, HubError> {
    if req.from_agent.machine != sender_machine {
        return Err(HubError::BadEnvelope(format!(
            "from_agent {} does not match signing machine {sender_machine}",
            req.from_agent
        )));
    }

    match &req.message {
        Message::Status => handle_status(state, &req).await,
        Message::History { thread_id } => handle_history(state, &req, thread_id.as_deref()).await,
        Message::Response { message } => handle_response(state, &req, message).await,
        Message::Ask { .. } | Message::Send { .. } | Message::StartAgent { .. } => {
            route_mission(state, req).await
        },
        Message::Chat { .. } | Message::Reply { .. } => route_chat(state, req).await,
    }
}

// ── Mission-store queries ────────────────────────────────────────────────────

async fn handle_status(
    state: &Arc<HubState>,
    req: &RouteRequest,
) -> Result<RouteReply, HubError> {
    let mission_id = req
        .mission_id
        .as_deref()
        .ok_or_else(|| HubError::BadEnvelope("status requires mission_id".into()))?;
    let mission = state
        .missions
        .snapshot(mission_id)
        .await
        .ok_or_else(|| HubError::not_found("mission", mission_id))?;

    let mut reply = RouteReply::new(RouteStatus::Delivered, mission_id);
    reply.mission_status = Some(mission.status);
    reply.thread_id = mission.thread_id;
    Ok(reply)
}

async fn handle_history(
    state: &Arc<HubState>,
    req: &RouteRequest,
    thread_id: Option<&str>,
) -> Result<RouteReply, HubError> {
    let mission_id = match thread_id {
        Some(t) => {
            let info = state
                .threads
                .get(t)
                .await
                .ok_or_else(|| HubError::not_found("thread", t))?;
            info.mission_id
        },
        None => req
            .mission_id
            .clone()
            .ok_or_else(|| HubError::BadEnvelope("history requires thread_id or mission_id".into()))?,
    };

    let mission = state
        .missions
        .snapshot(&mission_id)
        .await
        .ok_or_else(|| HubError::not_found("mission", &mission_id))?;

    let lines = mission
        .messages
        .iter()
        .map(|m| format!("[{}] {} ({}): {}", m.at.to_rfc3339(), m.from, m.kind, m.text))
        .collect();

    let mut reply = RouteReply::new(RouteStatus::Delivered, mission_id);
    reply.history = Some(lines);
    reply.thread_id = mission.thread_id;
    Ok(reply)
}

async fn handle_response(
    state: &Arc<HubState>,
    req: &RouteRequest,
    message: &str,
) -> Result<RouteReply, HubError> {
    let mission_id = req
        .mission_id
        .as_deref()
        .ok_or_else(|| HubError::BadEnvelope("response requires mission_id".into()))?;
    let gate = state
        .missions
        .gate(mission_id)
        .await
        .ok_or_else(|| HubError::not_found("mission", mission_id))?;
    let _guard = gate.lock().await;

    state
        .missions
        .append_message(
            mission_id,
            LogEntry {
                at: Utc::now(),
                from: req.from_agent.clone(),
                kind: "response".into(),
                text: message.to_string(),
            },
        )
        .await;
    state
        .missions
        .set_status(mission_id, MissionStatus::Completed, None)
        .await;
    state
        .console
        .post_to_mission(mission_id, &format!("✅ {} responded: {}", req.from_agent, preview(message)))
        .await;

    Ok(RouteReply::new(RouteStatus::Delivered, mission_id))
}

// ── Mission path: ask / send / start_agent ──────────────────────────────────

async fn route_mission(state: &Arc<HubState>, req: RouteRequest) -> Result<RouteReply, HubError> {
    let target = approved_machine(state, &req.to_agent).await?;

    let (mission_id, gate) = state
        .missions
        .create_or_get(req.mission_id.clone(), &req.from_agent, &req.to_agent, req.message.kind())
        .await;
    let _guard = gate.lock().await;

    state
        .missions
        .append_message(
            &mission_id,
            LogEntry {
                at: Utc::now(),
                from: req.from_agent.clone(),
                kind: req.message.kind().into(),
                text: req.message.text().to_string(),
            },
        )
        .await;

    if let Some(denied) = check_policy(
        state,
        &mission_id,
        &req.from_agent,
        &req.to_agent,
        req.message.kind(),
        req.message.text(),
    )
    .await?
    {
        return Ok(denied);
    }

    let (prompt, cwd) = match &req.message {
        Message::Ask { prompt } => (prompt.clone(), None),
        Message::Send { message } => (message.clone(), None),
        Message::StartAgent { prompt, cwd } => (prompt.clone(), cwd.clone()),
        _ => unreachable!("route_mission only sees mission messages"),
    };

    let start = MissionStartRequest {
        mission_id: mission_id.clone(),
        from_agent: req.from_agent.clone(),
        project: req.to_agent.project.clone(),
        prompt,
        cwd,
    };

    match state
        .daemons
        .start_mission(&target.daemon_url, &target.token, &start)
        .await
    {
        Ok(reply) => {
            state
                .missions
                .bind_daemon_mission(&mission_id, &reply.mission_id)
                .await;
            state
                .missions
                .set_status(&mission_id, MissionStatus::Running, None)
                .await;
            info!(mission_id, target = %req.to_agent, "mission launched");
            state
                .console
                .post_to_mission(
                    &mission_id,
                    &format!(
                        "🚀 {} → {} ({}): {}",
                        req.from_agent,
                        req.to_agent,
                        req.message.kind(),
                        preview(req.message.text())
                    ),
                )
                .await;
            Ok(RouteReply::new(RouteStatus::Queued, mission_id))
        },
        Err(DaemonClientError::Rejected { status: 400, body })
            if body.contains(intercom_protocol::error_codes::PATH_NOT_ALLOWED) =>
        {
            state
                .missions
                .set_status(&mission_id, MissionStatus::Failed, Some("path_not_allowed"))
                .await;
            state
                .console
                .post_to_mission(&mission_id, "❌ launch refused: working directory not allowed")
                .await;
            let mut reply = RouteReply::new(RouteStatus::Error, mission_id);
            reply.error = Some("path_not_allowed".into());
            Ok(reply)
        },
        Err(e) => {
            warn!(mission_id, error = %e, "mission launch failed");
            state
                .missions
                .set_status(&mission_id, MissionStatus::Failed, Some("unreachable"))
                .await;
            state
                .console
                .post_to_mission(
                    &mission_id,
                    &format!("⚠️ could not reach {} for launch", req.to_agent),
                )
                .await;
            let mut reply = RouteReply::new(RouteStatus::Unreachable, mission_id);
            reply.error = Some(e.to_string());
            Ok(reply)
        },
    }
}

// ── Chat path: chat / reply ─────────────────────────────────────────────────

async fn route_chat(state: &Arc<HubState>, req: RouteRequest) -> Result<RouteReply, HubError> {
    // Resolve thread, recipient and owning mission.
    let (thread_id, to_agent, existing_mission) = match &req.message {
        Message::Chat { thread_id, .. } => match thread_id {
            Some(t) => match state.threads.get(t).await {
                Some(info) => (t.clone(), req.to_agent.clone(), Some(info.mission_id)),
                None => (t.clone(), req.to_agent.clone(), None),
            },
            None => (intercom_common::ids::thread_id(), req.to_agent.clone(), None),
        },
        Message::Reply { thread_id, .. } => {
            let info = state
                .threads
                .get(thread_id)
                .await
                .ok_or_else(|| HubError::not_found("thread", thread_id))?;
            let to = info.other(&req.from_agent).clone();
            (thread_id.clone(), to, Some(info.mission_id))
        },
        _ => unreachable!("route_chat only sees chat messages"),
    };

    let target = approved_machine(state, &to_agent).await?;

    let (mission_id, gate) = state
        .missions
        .create_or_get(existing_mission, &req.from_agent, &to_agent, "chat")
        .await;
    let _guard = gate.lock().await;

    state.missions.set_thread(&mission_id, &thread_id).await;
    state
        .threads
        .record(
            &thread_id,
            ThreadInfo {
                mission_id: mission_id.clone(),
                participant_a: req.from_agent.clone(),
                participant_b: to_agent.clone(),
            },
        )
        .await;

    let text = req.message.text().to_string();
    state
        .missions
        .append_message(
            &mission_id,
            LogEntry {
                at: Utc::now(),
                from: req.from_agent.clone(),
                kind: req.message.kind().into(),
                text: text.clone(),
            },
        )
        .await;

    if let Some(denied) = check_policy(
        state,
        &mission_id,
        &req.from_agent,
        &to_agent,
        req.message.kind(),
        &text,
    )
    .await?
    {
        return Ok(denied);
    }

    // Presence first: heartbeats announce sessions, and chat never launches
    // an agent.
    if state
        .find_session(&to_agent.machine, &to_agent.project)
        .await
        .is_none()
    {
        state
            .console
            .post_to_mission(
                &mission_id,
                &format!("💤 {} → {}: no active session, chat not delivered", req.from_agent, to_agent),
            )
            .await;
        let mut reply = RouteReply::new(RouteStatus::NoActiveSession, mission_id);
        reply.thread_id = Some(thread_id);
        return Ok(reply);
    }

    // No explicit session target: the daemon resolves the most recently
    // registered live session for the project, which is authoritative over
    // this cache.
    let deliver = DeliverRequest {
        project: to_agent.project.clone(),
        session_id: None,
        thread_id: thread_id.clone(),
        from_agent: req.from_agent.clone(),
        message: text.clone(),
        timestamp: Utc::now(),
    };

    match state
        .daemons
        .deliver(&target.daemon_url, &target.token, &deliver)
        .await
    {
        Ok(DeliverOutcome::Delivered) => {
            state
                .missions
                .set_status(&mission_id, MissionStatus::Running, None)
                .await;
            state
                .console
                .post_to_mission(
                    &mission_id,
                    &format!("💬 {} → {}: {}", req.from_agent, to_agent, preview(&text)),
                )
                .await;
            Ok(RouteReply::new(RouteStatus::Delivered, mission_id).with_thread(thread_id))
        },
        Ok(DeliverOutcome::NoActiveSession) => {
            state
                .console
                .post_to_mission(
                    &mission_id,
                    &format!("💤 {} → {}: no active session, chat not delivered", req.from_agent, to_agent),
                )
                .await;
            Ok(RouteReply::new(RouteStatus::NoActiveSession, mission_id).with_thread(thread_id))
        },
        Err(e) => {
            warn!(mission_id, error = %e, "chat delivery failed");
            state
                .missions
                .set_status(&mission_id, MissionStatus::Failed, Some("unreachable"))
                .await;
            state
                .console
                .post_to_mission(
                    &mission_id,
                    &format!("⚠️ could not reach {} for chat delivery", to_agent),
                )
                .await;
            let mut reply = RouteReply::new(RouteStatus::Unreachable, mission_id).with_thread(thread_id);
            reply.error = Some(e.to_string());
            Ok(reply)
        },
    }
}

// ── Policy ──────────────────────────────────────────────────────────────────

/// Run the policy engine for a message already holding its mission gate.
/// Returns `Some(reply)` when the message must not be dispatched.
async fn check_policy(
    state: &Arc<HubState>,
    mission_id: &str,
    from_agent: &AgentAddr,
    to_agent: &AgentAddr,
    kind: &str,
    text: &str,
) -> Result<Option<RouteReply>, HubError> {
    let from = from_agent.to_string();
    let to = to_agent.to_string();

    let decision = {
        let policy = state.policy.lock().await;
        policy.decide(PolicyRequest {
            from: &from,
            to: &to,
            kind,
            text,
            mission_id: Some(mission_id),
        })
    };

    match decision {
        Decision::AutoAllow { notify } => {
            if notify {
                state
                    .console
                    .post_to_mission(
                        mission_id,
                        &format!("👌 auto-approved {kind} {from} → {to}"),
                    )
                    .await;
            }
            state
                .missions
                .set_status(mission_id, MissionStatus::Approved, None)
                .await;
            Ok(None)
        },
        Decision::AutoDeny => {
            state
                .missions
                .set_status(mission_id, MissionStatus::Denied, Some("denied_by_policy"))
                .await;
            state
                .console
                .post_to_mission(mission_id, &format!("🚫 blocked by policy: {from} → {to}"))
                .await;
            let mut reply = RouteReply::new(RouteStatus::Denied, mission_id);
            reply.error = Some("denied_by_policy".into());
            Ok(Some(reply))
        },
        Decision::AskOperator { label, scopes } => {
            state
                .missions
                .set_status(mission_id, MissionStatus::PendingApproval, Some(&label))
                .await;

            let choice = state
                .console
                .ask_approval(ApprovalPrompt {
                    mission_id: mission_id.to_string(),
                    from: from.clone(),
                    to: to.clone(),
                    kind: kind.to_string(),
                    preview: preview(text),
                    scopes: scopes.clone(),
                })
                .await;

            match choice {
                ApprovalChoice::Allow(scope) => {
                    let mut policy = state.policy.lock().await;
                    policy.record(GrantOutcome::Allowed, scope, &from, &to, Some(mission_id));
                    drop(policy);
                    state
                        .missions
                        .set_status(mission_id, MissionStatus::Approved, None)
                        .await;
                    info!(mission_id, ?scope, "operator approved");
                    Ok(None)
                },
                ApprovalChoice::Deny => {
                    let scope = scopes.first().copied().unwrap_or(GrantScope::Once);
                    let mut policy = state.policy.lock().await;
                    policy.record(GrantOutcome::Denied, scope, &from, &to, Some(mission_id));
                    drop(policy);
                    state
                        .missions
                        .set_status(mission_id, MissionStatus::Denied, Some("denied_by_operator"))
                        .await;
                    state
                        .console
                        .post_to_mission(mission_id, &format!("🚫 operator denied {from} → {to}"))
                        .await;
                    let mut reply = RouteReply::new(RouteStatus::Denied, mission_id);
                    reply.error = Some("denied_by_operator".into());
                    Ok(Some(reply))
                },
                ApprovalChoice::Timeout => {
                    state
                        .missions
                        .set_status(mission_id, MissionStatus::Denied, Some("timeout"))
                        .await;
                    state
                        .console
                        .post_to_mission(mission_id, &format!("⏰ approval timed out: {from} → {to}"))
                        .await;
                    let mut reply = RouteReply::new(RouteStatus::Denied, mission_id);
                    reply.error = Some("approval_timeout".into());
                    Ok(Some(reply))
                },
            }
        },
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

async fn approved_machine(
    state: &Arc<HubState>,
    agent: &AgentAddr,
) -> Result<intercom_registry::MachineRecord, HubError> {
    let machine = state
        .registry
        .get_machine(&agent.machine)
        .await?
        .ok_or_else(|| HubError::not_found("machine", &agent.machine))?;
    if machine.status != MachineStatus::Approved {
        return Err(HubError::not_found("machine", &agent.machine));
    }
    Ok(machine)
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.len() <= 200 {
        line.to_string()
    } else {
        let mut cut = 200;
        while cut > 0 && !line.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &line[..cut])
    }
}
