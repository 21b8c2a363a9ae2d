//! Process wiring for the `hub`, `daemon`, and `standalone` verbs.

use std::sync::Arc;

use {
    anyhow::Context,
    tracing::{info, warn},
};

use {
    intercom_config::IntercomConfig,
    intercom_console::{NoopConsole, OperatorConsole, TelegramConsole},
    intercom_daemon::{DaemonState, HubClient},
    intercom_hub::HubState,
    intercom_policy::{PolicyEngine, PolicyFile},
    intercom_protocol::MachineStatus,
    intercom_registry::{MachineRecord, Registry},
};

pub async fn run_hub(config: IntercomConfig) -> anyhow::Result<()> {
    let machine_id = require_machine_id(&config)?;
    let registry = open_registry(&config).await?;
    seed_own_machine(&registry, &config, &machine_id, String::new()).await?;

    let state = HubState::new(
        machine_id,
        registry,
        load_policy(&config)?,
        build_console(&config).await?,
    );
    intercom_hub::start_hub(state, &config.hub.listen).await
}

pub async fn run_daemon(config: IntercomConfig) -> anyhow::Result<()> {
    let machine_id = require_machine_id(&config)?;
    let hub_url = config
        .hub
        .url
        .clone()
        .context("hub.url is required in daemon mode")?;

    let listen = config.hub.listen.clone();
    let port = listen_port(&listen)?;
    let overlay_ip = overlay_ip(&config);
    let daemon_url = format!("http://{overlay_ip}:{port}");

    let state = DaemonState::new(
        machine_id.clone(),
        overlay_ip,
        daemon_url,
        config.auth.token.clone(),
        config.state_dir(),
        config.agent_launcher.clone(),
    );
    let client = Arc::new(HubClient::new(
        hub_url,
        machine_id,
        config.auth.token.clone(),
    ));

    intercom_daemon::start_daemon(
        state,
        client,
        config.machine.display_name().to_string(),
        config.discovery.clone(),
        &listen,
    )
    .await
}

pub async fn run_standalone(config: IntercomConfig) -> anyhow::Result<()> {
    let machine_id = require_machine_id(&config)?;
    let token = config
        .auth
        .token
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let hub_listen = config.hub.listen.clone();
    let hub_port = listen_port(&hub_listen)?;
    let daemon_port = hub_port + 1;
    let daemon_listen = format!("127.0.0.1:{daemon_port}");
    let daemon_url = format!("http://127.0.0.1:{daemon_port}");

    let registry = open_registry(&config).await?;
    seed_own_machine(&registry, &config, &machine_id, daemon_url.clone()).await?;
    // A previous run may have issued a different token; the stored one wins.
    let token = registry.approve_join(&machine_id, &token).await?;

    let hub_state = HubState::new(
        machine_id.clone(),
        registry,
        load_policy(&config)?,
        build_console(&config).await?,
    );
    tokio::spawn(async move {
        if let Err(e) = intercom_hub::start_hub(hub_state, &hub_listen).await {
            warn!(error = %e, "hub exited");
        }
    });

    let daemon_state = DaemonState::new(
        machine_id.clone(),
        "127.0.0.1",
        daemon_url,
        Some(token.clone()),
        config.state_dir(),
        config.agent_launcher.clone(),
    );
    let client = Arc::new(HubClient::new(
        format!("http://127.0.0.1:{hub_port}"),
        machine_id,
        Some(token),
    ));

    intercom_daemon::start_daemon(
        daemon_state,
        client,
        config.machine.display_name().to_string(),
        config.discovery.clone(),
        &daemon_listen,
    )
    .await
}

fn require_machine_id(config: &IntercomConfig) -> anyhow::Result<String> {
    let id = config.machine.id.clone();
    if id.is_empty() {
        anyhow::bail!("machine.id must be set in the config");
    }
    Ok(id)
}

fn overlay_ip(config: &IntercomConfig) -> String {
    if config.machine.overlay_ip.is_empty() {
        "127.0.0.1".to_string()
    } else {
        config.machine.overlay_ip.clone()
    }
}

fn listen_port(listen: &str) -> anyhow::Result<u16> {
    listen
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .with_context(|| format!("cannot parse listen address: {listen}"))
}

async fn open_registry(config: &IntercomConfig) -> anyhow::Result<Registry> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("cannot create state dir {}", state_dir.display()))?;
    let db_path = state_dir.join("registry.db");
    Registry::new(&format!("sqlite://{}?mode=rwc", db_path.display())).await
}

/// The hub's own machine row, so locally signed calls verify.
async fn seed_own_machine(
    registry: &Registry,
    config: &IntercomConfig,
    machine_id: &str,
    daemon_url: String,
) -> anyhow::Result<()> {
    if registry.get_machine(machine_id).await?.is_some() {
        return Ok(());
    }
    registry
        .register_machine(&MachineRecord {
            machine_id: machine_id.to_string(),
            display_name: config.machine.display_name().to_string(),
            overlay_ip: overlay_ip(config),
            daemon_url,
            token: String::new(),
            status: MachineStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            last_seen: None,
        })
        .await?;
    if let Some(token) = &config.auth.token {
        registry.approve_join(machine_id, token).await?;
    }
    Ok(())
}

fn load_policy(config: &IntercomConfig) -> anyhow::Result<PolicyEngine> {
    let path = match &config.policy_path {
        Some(path) => Some(path.clone()),
        None => {
            let local = std::path::PathBuf::from("policy.yaml");
            local.exists().then_some(local)
        },
    };

    let file = match path {
        Some(path) => {
            info!(path = %path.display(), "loading policy");
            PolicyFile::load(&path)?
        },
        None => {
            info!("no policy file, defaulting to ask-once for everything");
            PolicyFile::default()
        },
    };
    Ok(PolicyEngine::new(file)?)
}

async fn build_console(config: &IntercomConfig) -> anyhow::Result<Arc<dyn OperatorConsole>> {
    match (&config.telegram.bot_token, config.telegram.group_id) {
        (Some(bot_token), Some(group_id)) => {
            let console = Arc::new(TelegramConsole::new(
                bot_token,
                group_id,
                config.telegram.owner_id,
            ));
            console.start().await.context("telegram console failed to start")?;
            info!(group_id, "telegram operator console attached");
            Ok(console)
        },
        _ => {
            warn!("no operator console configured, approvals auto-allow once");
            Ok(Arc::new(NoopConsole))
        },
    }
}
