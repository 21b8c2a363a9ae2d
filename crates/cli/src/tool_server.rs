//! Session-side adapter: announce an active session to the local daemon and
//! keep it registered until shutdown.

use {anyhow::Context, tracing::info};

use intercom_config::{IntercomConfig, Mode};

pub async fn run(
    config: &IntercomConfig,
    project: &str,
    session_id: Option<&str>,
) -> anyhow::Result<()> {
    let token = config
        .auth
        .token
        .clone()
        .context("auth.token is required for tool-server")?;
    let machine_id = config.machine.id.clone();
    if machine_id.is_empty() {
        anyhow::bail!("machine.id must be set in the config");
    }

    let daemon_url = local_daemon_url(config)?;
    let http = reqwest::Client::new();

    let body = serde_json::json!({
        "session_id": session_id,
        "project": project,
        "pid": std::process::id(),
    });
    let reply: serde_json::Value = signed_post(
        &http,
        &daemon_url,
        "/session/register",
        &body,
        &token,
        &machine_id,
    )
    .await
    .context("session registration failed")?;

    let session_id = reply["session_id"]
        .as_str()
        .context("daemon returned no session_id")?
        .to_string();
    let inbox_path = reply["inbox_path"].as_str().unwrap_or_default();
    info!(session_id, inbox_path, "session registered");
    println!("{}", serde_json::json!({ "session_id": session_id, "inbox_path": inbox_path }));

    tokio::signal::ctrl_c().await?;

    let body = serde_json::json!({ "session_id": session_id });
    let _: serde_json::Value = signed_post(
        &http,
        &daemon_url,
        "/session/unregister",
        &body,
        &token,
        &machine_id,
    )
    .await
    .context("session unregister failed")?;
    info!("session unregistered");
    Ok(())
}

/// The local daemon's base URL, derived from the configured listen address.
fn local_daemon_url(config: &IntercomConfig) -> anyhow::Result<String> {
    let port: u16 = config
        .hub
        .listen
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .context("cannot parse listen address")?;
    // Standalone runs the daemon one port above the hub.
    let port = match config.mode {
        Mode::Standalone => port + 1,
        _ => port,
    };
    Ok(format!("http://127.0.0.1:{port}"))
}

async fn signed_post(
    http: &reqwest::Client,
    base_url: &str,
    path: &str,
    body: &serde_json::Value,
    token: &str,
    machine_id: &str,
) -> anyhow::Result<serde_json::Value> {
    let bytes = serde_json::to_vec(body)?;
    let headers = intercom_auth::sign("POST", path, &bytes, token, machine_id)?;

    let mut req = http
        .post(format!("{base_url}{path}"))
        .header("content-type", "application/json")
        .body(bytes);
    for (name, value) in headers.pairs() {
        req = req.header(name, value);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(intercom_daemon::hub_client::HubClientError::Rejected {
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(resp.json().await?)
}
