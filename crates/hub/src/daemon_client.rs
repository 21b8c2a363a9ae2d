//! Signed HTTP client the hub uses to reach daemons.
//!
//! Requests are signed with the target machine's token; the canonical path
//! excludes the query string on both sides.

use std::time::Duration;

use {
    intercom_protocol::{
        DELIVER_TIMEOUT_SECS, DeliverRequest, MissionPollReply, MissionStartReply,
        MissionStartRequest, ROUTE_TIMEOUT_SECS,
    },
    reqwest::StatusCode,
    thiserror::Error,
    tracing::{debug, warn},
};

#[derive(Error, Debug)]
pub enum DaemonClientError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("daemon rejected request: {status}")]
    Rejected { status: u16, body: String },

    #[error("cannot sign request: {0}")]
    Sign(#[from] intercom_auth::SignError),
}

/// Outcome of a chat delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverOutcome {
    Delivered,
    NoActiveSession,
}

pub struct DaemonClient {
    http: reqwest::Client,
    machine_id: String,
}

impl DaemonClient {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            machine_id: machine_id.into(),
        }
    }

    /// Ask a daemon to launch a child agent.
    pub async fn start_mission(
        &self,
        daemon_url: &str,
        token: &str,
        req: &MissionStartRequest,
    ) -> Result<MissionStartReply, DaemonClientError> {
        let path = "/mission/start";
        let body = serde_json::to_vec(req)
            .map_err(|e| DaemonClientError::Transport(e.to_string()))?;
        let resp = self
            .signed_post(daemon_url, path, body, token, ROUTE_TIMEOUT_SECS)
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(rejected(status, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| DaemonClientError::Transport(e.to_string()))
    }

    /// Deposit a chat message into a session inbox on the target daemon.
    ///
    /// Idempotent on the daemon side, so one retry with a 1 s backoff is
    /// allowed on transport failure.
    pub async fn deliver(
        &self,
        daemon_url: &str,
        token: &str,
        req: &DeliverRequest,
    ) -> Result<DeliverOutcome, DaemonClientError> {
        let path = "/session/deliver";
        let body = serde_json::to_vec(req)
            .map_err(|e| DaemonClientError::Transport(e.to_string()))?;

        let mut last_err = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                debug!(daemon_url, "retrying chat delivery");
            }
            match self
                .signed_post(daemon_url, path, body.clone(), token, DELIVER_TIMEOUT_SECS)
                .await
            {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Ok(DeliverOutcome::NoActiveSession);
                },
                Ok(resp) if resp.status().is_success() => return Ok(DeliverOutcome::Delivered),
                Ok(resp) => return Err(rejected(resp.status(), resp).await),
                Err(e) => {
                    warn!(daemon_url, error = %e, "chat delivery attempt failed");
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or_else(|| DaemonClientError::Transport("delivery failed".into())))
    }

    /// Poll a daemon-local mission for status, output and new feedback.
    pub async fn fetch_mission(
        &self,
        daemon_url: &str,
        token: &str,
        daemon_mission_id: &str,
        feedback_since: u64,
    ) -> Result<MissionPollReply, DaemonClientError> {
        let path = format!("/missions/{daemon_mission_id}");
        let headers = intercom_auth::sign("GET", &path, b"", token, &self.machine_id)?;

        let mut request = self
            .http
            .get(format!("{daemon_url}{path}?feedback_since={feedback_since}"))
            .timeout(Duration::from_secs(ROUTE_TIMEOUT_SECS));
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| DaemonClientError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(rejected(status, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| DaemonClientError::Transport(e.to_string()))
    }

    async fn signed_post(
        &self,
        daemon_url: &str,
        path: &str,
        body: Vec<u8>,
        token: &str,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, DaemonClientError> {
        let headers = intercom_auth::sign("POST", path, &body, token, &self.machine_id)?;
        let mut request = self
            .http
            .post(format!("{daemon_url}{path}"))
            .timeout(Duration::from_secs(timeout_secs))
            .header("content-type", "application/json")
            .body(body);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| DaemonClientError::Transport(e.to_string()))
    }
}

async fn rejected(status: StatusCode, resp: reqwest::Response) -> DaemonClientError {
    let body = resp.text().await.unwrap_or_default();
    DaemonClientError::Rejected {
        status: status.as_u16(),
        body,
    }
}
