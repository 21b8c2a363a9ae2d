mod check_inbox;
mod modes;
mod tool_server;

use std::process::ExitCode;

use {
    clap::{Parser, Subcommand, ValueEnum},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "intercom", about = "Intercom — message bus for coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "INTERCOM_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub: registry, approval engine, and router.
    Hub,
    /// Run the per-node daemon: heartbeat, inbox delivery, agent launcher.
    Daemon,
    /// Run hub and daemon in one process, for single-machine setups.
    Standalone,
    /// Session-side adapter: register a session with the local daemon and
    /// keep it alive until shutdown.
    ToolServer {
        /// Project this session belongs to.
        #[arg(long, default_value = intercom_common::HOME_PROJECT)]
        project: String,
        /// Explicit session id (generated if omitted).
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Drain unread inbox messages exactly once.
    CheckInbox {
        /// Session id (defaults to the most recently used inbox).
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long, value_enum, default_value_t = InboxFormat::Hook)]
        format: InboxFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InboxFormat {
    /// Agent-hook text: a short banner plus one line per message.
    Hook,
    /// Raw JSON array of inbox entries.
    Json,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<intercom_config::IntercomConfig> {
    match &cli.config {
        Some(path) => intercom_config::load_config(path),
        None => Ok(intercom_config::discover_and_load()),
    }
}

/// Exit codes: 0 success, 1 configuration or I/O error, 2 authentication
/// error.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    use intercom_daemon::hub_client::HubClientError;

    if err.downcast_ref::<intercom_auth::SignError>().is_some() {
        return ExitCode::from(2);
    }
    if let Some(e) = err.downcast_ref::<HubClientError>() {
        let auth = matches!(e, HubClientError::NotJoined)
            || matches!(e, HubClientError::Rejected { status: 401 | 403, .. });
        if auth {
            return ExitCode::from(2);
        }
    }
    ExitCode::from(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e:#}");
            return ExitCode::from(1);
        },
    };

    let result = match cli.command {
        Commands::Hub => modes::run_hub(config).await,
        Commands::Daemon => modes::run_daemon(config).await,
        Commands::Standalone => modes::run_standalone(config).await,
        Commands::ToolServer {
            ref project,
            ref session_id,
        } => tool_server::run(&config, project, session_id.as_deref()).await,
        Commands::CheckInbox {
            ref session_id,
            format,
        } => check_inbox::run(&config, session_id.as_deref(), format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        },
    }
}
