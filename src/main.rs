mod settings;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::Level;
use url::Url;

use wsboot_client::{HttpWorkspaceControl, MessageBusClient, WebSocketAgentLink};
use wsboot_core::{LogErrorSink, OrchestrationEvent, WorkspaceControl, WorkspaceId};
use wsboot_engine::{AgentEndpointStrategy, IdeLaunch, OrchestratorConfig, StartupOrchestrator};
use wsboot_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

use crate::settings::{load_settings, Settings};

#[derive(Debug, Parser)]
#[command(name = "wsboot", version, about = "Start a remote workspace and wait for its agent")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Workspace service URL
    #[arg(long, global = true)]
    server: Option<String>,
    /// Message bus websocket URL
    #[arg(long, global = true)]
    bus: Option<String>,
    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a workspace and wait until its agent answers
    Start {
        workspace_id: String,
        /// Agent connection attempts before giving up
        #[arg(long)]
        budget: Option<u32>,
        #[arg(long)]
        retry_delay_ms: Option<u64>,
        /// Reach the agent on this machine port instead of the ws-agent server
        #[arg(long)]
        fixed_port: Option<u16>,
        /// IDE action to append to the printed IDE URL
        #[arg(long)]
        action: Option<String>,
        /// IDE loading parameter, `name=value`
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// List workspaces and their status
    List,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))
}

fn telemetry_config(settings: &Settings) -> TelemetryConfig {
    let log_level = Level::from_str(&settings.logging.level).unwrap_or(Level::INFO);
    let module_levels = settings
        .logging
        .modules
        .iter()
        .filter_map(|(module, level)| Some((module.clone(), Level::from_str(level).ok()?)))
        .collect();
    TelemetryConfig {
        log_level,
        module_levels,
        format: if settings.logging.json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings().context("loading settings")?;
    if let Some(server) = cli.common.server.clone() {
        settings.server_url = server;
    }
    if let Some(bus) = cli.common.bus.clone() {
        settings.bus_url = Some(bus);
    }
    if cli.common.json_logs {
        settings.logging.json = true;
    }
    init_telemetry(&telemetry_config(&settings));

    let control = Arc::new(HttpWorkspaceControl::new(
        &settings.server_url,
        Duration::from_millis(settings.status_poll_ms),
    ));

    match cli.command {
        Command::List => list(control.as_ref()).await,
        Command::Start {
            workspace_id,
            budget,
            retry_delay_ms,
            fixed_port,
            action,
            params,
        } => {
            if let Some(budget) = budget {
                settings.reconnect_budget = budget;
            }
            if let Some(delay) = retry_delay_ms {
                settings.retry_delay_ms = delay;
            }
            let endpoint_strategy = match fixed_port {
                Some(port) => AgentEndpointStrategy::FixedPort { port },
                None => AgentEndpointStrategy::WsAgentServer,
            };
            let mut launch = IdeLaunch::new(
                Url::parse(&settings.server_url).context("invalid server URL")?,
            );
            if let Some(action) = action {
                launch.set_action(action);
            }
            for (name, value) in params {
                launch.set_parameter(name, value);
            }
            start(
                &settings,
                control,
                WorkspaceId::from_raw(workspace_id),
                endpoint_strategy,
                launch,
            )
            .await
        }
    }
}

async fn list(control: &dyn WorkspaceControl) -> anyhow::Result<()> {
    let workspaces = control.fetch_workspaces().await?;
    for ws in workspaces {
        println!("{}\t{}\t{}", ws.id, ws.status, ws.config.name);
    }
    Ok(())
}

async fn start(
    settings: &Settings,
    control: Arc<HttpWorkspaceControl>,
    id: WorkspaceId,
    endpoint_strategy: AgentEndpointStrategy,
    mut launch: IdeLaunch,
) -> anyhow::Result<()> {
    let workspace = control
        .fetch_details(&id)
        .await
        .with_context(|| format!("fetching workspace {id}"))?;

    let bus_url = settings
        .bus_url()
        .with_context(|| format!("no message bus URL for server {}", settings.server_url))?;
    let bus = Arc::new(
        MessageBusClient::connect(&bus_url)
            .await
            .with_context(|| format!("connecting to message bus at {bus_url}"))?,
    );
    let link = Arc::new(WebSocketAgentLink::new(Duration::from_millis(
        settings.agent_connect_timeout_ms,
    )));

    let orchestrator = StartupOrchestrator::new(
        control.clone(),
        bus,
        link,
        Arc::new(LogErrorSink),
        OrchestratorConfig {
            reconnect_budget: settings.reconnect_budget,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            endpoint_strategy,
        },
    );
    let printer = tokio::spawn(print_progress(orchestrator.subscribe_events()));

    let result = tokio::select! {
        result = orchestrator.start_workspace(&workspace) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            printer.abort();
            bail!("interrupted");
        }
    };
    printer.abort();
    result?;

    let details = control.fetch_details(&id).await?;
    match launch.resolve_url(&details) {
        Some(url) => println!("{url}"),
        None => tracing::warn!(workspace_id = %id, "workspace runtime has no dev machine"),
    }
    Ok(())
}

async fn print_progress(mut events: broadcast::Receiver<OrchestrationEvent>) {
    loop {
        match events.recv().await {
            Ok(OrchestrationEvent::StepAdvanced { step, .. }) => {
                tracing::info!(step, "step advanced");
            }
            Ok(OrchestrationEvent::StepLog { step, line, .. }) => {
                println!("[{step}] {line}");
            }
            Ok(OrchestrationEvent::AgentConnectAttempt {
                attempt, remaining, ..
            }) => {
                tracing::debug!(attempt, remaining, "connecting to agent");
            }
            Ok(event) => tracing::debug!(event_type = event.event_type(), "orchestration event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "progress output lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_command() {
        let cli = Cli::parse_from([
            "wsboot",
            "start",
            "workspace42",
            "--budget",
            "3",
            "--fixed-port",
            "4401",
            "--param",
            "file=README.md",
            "--server",
            "http://che.local",
        ]);
        assert_eq!(cli.common.server.as_deref(), Some("http://che.local"));
        match cli.command {
            Command::Start {
                workspace_id,
                budget,
                fixed_port,
                params,
                ..
            } => {
                assert_eq!(workspace_id, "workspace42");
                assert_eq!(budget, Some(3));
                assert_eq!(fixed_port, Some(4401));
                assert_eq!(params, vec![("file".to_string(), "README.md".to_string())]);
            }
            Command::List => panic!("expected start"),
        }
    }

    #[test]
    fn rejects_malformed_param() {
        assert!(parse_param("novalue").is_err());
        assert_eq!(parse_param("a=b=c").unwrap(), ("a".into(), "b=c".into()));
    }

    #[test]
    fn telemetry_config_from_settings() {
        let mut settings = Settings::default();
        settings.logging.level = "debug".into();
        settings.logging.json = true;
        settings
            .logging
            .modules
            .insert("wsboot_engine".into(), "trace".into());
        settings.logging.modules.insert("bad".into(), "loud".into());

        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(
            config.module_levels,
            vec![("wsboot_engine".to_string(), Level::TRACE)]
        );
    }
}
