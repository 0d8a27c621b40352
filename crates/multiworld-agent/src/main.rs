use std::sync::Arc;

use multiworld_agent::{
    CommandDispatcher, Host, Supervisor, SupervisorError, SupervisorSettings, WorldStore,
    error::format_error_chain, port_alloc::PortPair, settings,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};

const COMMAND_PREFIX: &str = "mw ";

/// Stand-in for the embedding server when the agent runs on its own: console
/// commands and transfers are logged rather than executed.
#[derive(Debug)]
struct ConsoleHost {
    world: String,
    ports: PortPair,
}

impl ConsoleHost {
    fn from_env() -> Self {
        let port = |name: &str, default: u16| {
            settings::env_u64(name)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(default)
        };
        Self {
            world: settings::env_string("MULTIWORLD_PRIMARY_WORLD")
                .unwrap_or_else(|| "world".to_string()),
            ports: PortPair {
                primary: port("MULTIWORLD_PRIMARY_PORT", 19132),
                secondary: port("MULTIWORLD_PRIMARY_PORTV6", 19133),
            },
        }
    }
}

impl Host for ConsoleHost {
    fn primary_world(&self) -> &str {
        &self.world
    }

    fn primary_ports(&self) -> PortPair {
        self.ports
    }

    fn dispatch_command(&self, command: &str) -> anyhow::Result<()> {
        tracing::info!(world = %self.world, command, "primary command");
        Ok(())
    }

    fn transfer_player(&self, player: &str, host: &str, port: u16) -> anyhow::Result<()> {
        tracing::info!(player, host, port, "transfer player");
        Ok(())
    }
}

async fn handle_line(dispatcher: &CommandDispatcher, supervisor: &Supervisor, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if let Some(rest) = line.strip_prefix(COMMAND_PREFIX) {
        let dispatcher = dispatcher.clone();
        let rest = rest.to_string();
        // Lifecycle commands can take seconds; keep reading the console meanwhile.
        tokio::spawn(async move {
            match dispatcher.execute_line(&rest).await {
                Ok(msg) => println!("{}", msg.trim_end()),
                Err(e) => {
                    let detail = match &e {
                        SupervisorError::Internal(err) => format_error_chain(err),
                        other => other.to_string(),
                    };
                    tracing::warn!(code = e.code(), error = %detail, "command failed");
                    println!("error: {detail}");
                }
            }
        });
        return;
    }

    if let Err(e) = supervisor.host().dispatch_command(line) {
        tracing::warn!(error = %e, "primary command failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = SupervisorSettings::from_env();
    let store = WorldStore::load(&settings.config_path()).await?;
    tracing::info!(
        data_root = %settings.data_root.display(),
        worlds = store.snapshot().len(),
        nested = settings.inside_child,
        "multiworld-agent starting"
    );

    let host = Arc::new(ConsoleHost::from_env());
    let supervisor = Supervisor::new(settings, host)?;
    let worlds = store.snapshot();
    let dispatcher = CommandDispatcher::new(supervisor.clone(), Arc::new(Mutex::new(store)));

    if !supervisor.settings().inside_child {
        supervisor.start_all_enabled(worlds);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&dispatcher, &supervisor, &line).await,
                Ok(None) => {
                    tracing::info!("console closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "console read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
        }
    }

    let stopped = supervisor.shutdown().await;
    tracing::info!(stopped, "multiworld-agent stopped");
    Ok(())
}
