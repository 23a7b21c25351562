use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Context, Result, bail},
    clap::Parser,
    deckhand_client::{
        ClientConfig, ConnectionStatus, Credential, GatewayClient, GatewayEvent, KnownEvent,
    },
    serde_json::Value,
    tracing::info,
};

/// Follow a gateway's event stream from the terminal.
///
/// Connects with the operator role, prints every pushed event as one line
/// and keeps reconnecting until interrupted. With `--call`, sends a single
/// request instead and prints its result.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Gateway WebSocket URL. Overrides the config file.
    #[arg(long, env = "DECKHAND_GATEWAY_URL")]
    url: Option<String>,

    /// Bearer token for the handshake. Overrides the config file.
    #[arg(long, env = "DECKHAND_GATEWAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to a TOML client config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only print these events (repeatable). Prints everything by default.
    #[arg(long = "event")]
    events: Vec<String>,

    /// Send one request (e.g. `gateway.health`), print the result and exit.
    #[arg(long)]
    call: Option<String>,

    /// JSON params for `--call`.
    #[arg(long, default_value = "{}", requires = "call")]
    params: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &args.url {
        config.url.clone_from(url);
    }
    config.validate().context("invalid client config")?;

    let credential = match args.token {
        Some(token) => Credential::token(token),
        None => config.credential(),
    };
    let url = config.url.clone();
    let timeout = config.request_timeout();
    let client = GatewayClient::new(config);

    let mut changes = client.status_changes();
    tokio::spawn(async move {
        while let Ok(status) = changes.recv().await {
            info!(%status, "gateway status");
        }
    });

    client.connect(url, credential);

    match args.call {
        Some(method) => call_once(&client, &method, &args.params, timeout).await,
        None => {
            follow(&client, args.events);
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("interrupted, disconnecting");
            client.disconnect();
            Ok(())
        },
    }
}

fn follow(client: &GatewayClient, filter: Vec<String>) {
    client.on_any(move |event: &GatewayEvent| {
        if filter.is_empty() || filter.iter().any(|name| name == &event.name) {
            println!("{}", describe(event));
        }
    });
}

async fn call_once(
    client: &GatewayClient,
    method: &str,
    params: &str,
    timeout: Duration,
) -> Result<()> {
    let params: Value = serde_json::from_str(params).context("--params is not valid JSON")?;

    let mut status = client.watch_status();
    let connected = tokio::time::timeout(
        timeout,
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await;
    if !matches!(connected, Ok(Ok(_))) {
        client.disconnect();
        bail!("gateway handshake did not complete within {timeout:?}");
    }

    let result = client.request(method, params).await;
    client.disconnect();
    let payload = result.with_context(|| format!("{method} failed"))?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// One-line rendering of an event.
fn describe(event: &GatewayEvent) -> String {
    match event.typed() {
        KnownEvent::Health(health) => {
            let agents: Vec<String> = health
                .agents
                .iter()
                .map(|agent| format!("{}({})", agent.agent_id, agent.session_count()))
                .collect();
            format!("[health] agents: {}", agents.join(", "))
        },
        KnownEvent::Agent(agent) => format!(
            "[agent] {} {}",
            agent.agent_id.as_deref().unwrap_or("?"),
            agent.kind.as_deref().unwrap_or("?"),
        ),
        KnownEvent::Chat(chat) | KnownEvent::SessionMessage(chat) => {
            let speaker = if chat.is_from_user() {
                "user"
            } else {
                chat.speaker().unwrap_or("agent")
            };
            let marker = if chat.is_final { "" } else { " …" };
            format!(
                "[{}] {speaker}: {}{marker}",
                event.name,
                chat.body().unwrap_or_default()
            )
        },
        KnownEvent::Heartbeat(beat) => {
            format!("[heartbeat] {}", beat.agent_id.as_deref().unwrap_or("?"))
        },
        KnownEvent::Connected(_) => "[connected]".to_string(),
        KnownEvent::Challenge(_) | KnownEvent::Tick => format!("[{}]", event.name),
        KnownEvent::Other(payload) => {
            if payload.is_null() {
                format!("[{}]", event.name)
            } else {
                format!("[{}] {payload}", event.name)
            }
        },
    }
}
