//! Thin signed HTTP client for the hub API.

use std::time::Duration;

use {
    intercom_protocol::{
        AgentsReply, DiscoverReply, HEARTBEAT_TIMEOUT_SECS, HeartbeatRequest, JoinReply,
        JoinRequest, ROUTE_TIMEOUT_SECS, RegisterRequest, RouteReply, RouteRequest,
    },
    thiserror::Error,
    tracing::debug,
};

#[derive(Error, Debug)]
pub enum HubClientError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("hub rejected request: {status}")]
    Rejected { status: u16, body: String },

    #[error("not joined: no machine token available")]
    NotJoined,
}

impl From<intercom_auth::SignError> for HubClientError {
    fn from(_: intercom_auth::SignError) -> Self {
        Self::NotJoined
    }
}

/// Signed wrapper around the hub HTTP surface.
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
    machine_id: String,
    token: tokio::sync::RwLock<Option<String>>,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, machine_id: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            machine_id: machine_id.into(),
            token: tokio::sync::RwLock::new(token),
        }
    }

    /// Install the token issued on join approval.
    pub async fn set_token(&self, token: String) {
        *self.token.write().await = Some(token);
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub async fn discover(&self) -> Result<DiscoverReply, HubClientError> {
        let resp = self
            .http
            .get(format!("{}/api/discover", self.base_url))
            .timeout(Duration::from_secs(HEARTBEAT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(transport)?;
        parse(resp).await
    }

    /// First contact: unauthenticated join request.
    pub async fn join(&self, req: &JoinRequest) -> Result<JoinReply, HubClientError> {
        let resp = self
            .http
            .post(format!("{}/api/join", self.base_url))
            .timeout(Duration::from_secs(ROUTE_TIMEOUT_SECS))
            .json(req)
            .send()
            .await
            .map_err(transport)?;
        parse(resp).await
    }

    pub async fn join_status(&self) -> Result<JoinReply, HubClientError> {
        let resp = self
            .http
            .get(format!("{}/api/join/status/{}", self.base_url, self.machine_id))
            .timeout(Duration::from_secs(HEARTBEAT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(transport)?;
        parse(resp).await
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<(), HubClientError> {
        let resp = self
            .signed_post("/api/heartbeat", req, HEARTBEAT_TIMEOUT_SECS)
            .await?;
        let _: serde_json::Value = parse(resp).await?;
        Ok(())
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<(), HubClientError> {
        let resp = self
            .signed_post("/api/register", req, ROUTE_TIMEOUT_SECS)
            .await?;
        let _: serde_json::Value = parse(resp).await?;
        Ok(())
    }

    pub async fn agents(&self, filter: Option<&str>) -> Result<AgentsReply, HubClientError> {
        let path = "/api/agents";
        let token = self.require_token().await?;
        let headers = intercom_auth::sign("GET", path, b"", &token, &self.machine_id)?;

        let mut url = format!("{}{path}", self.base_url);
        if let Some(filter) = filter {
            url.push_str(&format!("?filter={filter}"));
        }
        let mut request = self
            .http
            .get(url)
            .timeout(Duration::from_secs(ROUTE_TIMEOUT_SECS));
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        parse(request.send().await.map_err(transport)?).await
    }

    pub async fn route(&self, req: &RouteRequest) -> Result<RouteReply, HubClientError> {
        let resp = self.signed_post("/api/route", req, ROUTE_TIMEOUT_SECS).await?;
        parse(resp).await
    }

    async fn require_token(&self) -> Result<String, HubClientError> {
        self.token.read().await.clone().ok_or(HubClientError::NotJoined)
    }

    async fn signed_post<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, HubClientError> {
        let token = self.require_token().await?;
        let bytes = serde_json::to_vec(body).map_err(|e| transport_str(e.to_string()))?;
        let headers = intercom_auth::sign("POST", path, &bytes, &token, &self.machine_id)?;

        debug!(path, "signed hub request");
        let mut request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .timeout(Duration::from_secs(timeout_secs))
            .header("content-type", "application/json")
            .body(bytes);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }
        request.send().await.map_err(transport)
    }
}

fn transport(e: reqwest::Error) -> HubClientError {
    HubClientError::Transport(e.to_string())
}

fn transport_str(e: String) -> HubClientError {
    HubClientError::Transport(e)
}

async fn parse<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, HubClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(HubClientError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    resp.json().await.map_err(transport)
}
