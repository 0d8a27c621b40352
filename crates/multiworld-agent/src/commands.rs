use std::{fmt::Write as _, sync::Arc};

use multiworld_core::WorldState;
use tokio::sync::Mutex;

use crate::{
    error::{Result, SupervisorError},
    supervisor::Supervisor,
    world_store::WorldStore,
};

const USAGE: &str = "create <key> <port> | delete <key> [erase_files] | enable <key> | disable <key> | list | send <key> <player> | cmd <key> <command...>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Create { key: String, port: u16 },
    Delete { key: String, erase_files: bool },
    Enable { key: String },
    Disable { key: String },
    List,
    Send { key: String, player: String },
    Cmd { key: String, command: String },
}

fn usage(msg: &str) -> SupervisorError {
    SupervisorError::Usage(format!("{msg} ({USAGE})"))
}

impl AdminCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or_else(|| usage("empty command"))?;
        let mut key = || {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| usage("missing world key"))
        };

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "create" => {
                let key = key()?;
                let raw = parts.next().ok_or_else(|| usage("missing port"))?;
                let port = raw
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p >= 1024)
                    .ok_or_else(|| usage(&format!("invalid port {raw:?}")))?;
                AdminCommand::Create { key, port }
            }
            "delete" => {
                let key = key()?;
                let erase_files = match parts.next() {
                    None => false,
                    Some(v) if v.eq_ignore_ascii_case("true") || v == "erase_files" => true,
                    Some(v) if v.eq_ignore_ascii_case("false") => false,
                    Some(v) => return Err(usage(&format!("invalid erase_files {v:?}"))),
                };
                AdminCommand::Delete { key, erase_files }
            }
            "enable" => AdminCommand::Enable { key: key()? },
            "disable" => AdminCommand::Disable { key: key()? },
            "list" => AdminCommand::List,
            "send" => {
                let key = key()?;
                let player = parts.next().ok_or_else(|| usage("missing player"))?;
                AdminCommand::Send {
                    key,
                    player: player.to_string(),
                }
            }
            "cmd" => {
                let key = key()?;
                let command = parts.by_ref().collect::<Vec<_>>().join(" ");
                if command.is_empty() {
                    return Err(usage("missing command"));
                }
                AdminCommand::Cmd { key, command }
            }
            other => return Err(usage(&format!("unknown verb {other:?}"))),
        };
        if parts.next().is_some() && !matches!(cmd, AdminCommand::Cmd { .. }) {
            return Err(usage("too many arguments"));
        }
        Ok(cmd)
    }
}

/// Maps operator verbs onto supervisor calls and keeps the world document in
/// step with what is running.
#[derive(Clone)]
pub struct CommandDispatcher {
    supervisor: Supervisor,
    store: Arc<Mutex<WorldStore>>,
}

impl CommandDispatcher {
    pub fn new(supervisor: Supervisor, store: Arc<Mutex<WorldStore>>) -> Self {
        Self { supervisor, store }
    }

    pub async fn execute_line(&self, line: &str) -> Result<String> {
        self.execute(AdminCommand::parse(line)?).await
    }

    pub async fn execute(&self, cmd: AdminCommand) -> Result<String> {
        match cmd {
            AdminCommand::Create { key, port } => self.create(&key, port).await,
            AdminCommand::Delete { key, erase_files } => self.delete(&key, erase_files).await,
            AdminCommand::Enable { key } => self.enable(&key).await,
            AdminCommand::Disable { key } => self.disable(&key).await,
            AdminCommand::List => Ok(self.list().await),
            AdminCommand::Send { key, player } => self.send(&key, &player).await,
            AdminCommand::Cmd { key, command } => {
                self.supervisor.route_command(&key, &command).await?;
                Ok(format!("sent to {key}: {command}"))
            }
        }
    }

    async fn create(&self, key: &str, port: u16) -> Result<String> {
        self.supervisor.ensure_primary_instance()?;
        let host = self.supervisor.host();
        let spec = {
            let mut store = self.store.lock().await;
            let spec = store
                .create(key, port, host.primary_world(), host.primary_ports())?
                .clone();
            store.save().await?;
            spec
        };

        let st = self.supervisor.start_world(key, &spec).await?;
        let ports = format!(
            "{}/{}",
            spec.primary_port.unwrap_or_default(),
            spec.secondary_port.unwrap_or_default()
        );
        Ok(match st {
            Some(st) => format!("created {key} on ports {ports}; running as {}", st.resolved_name),
            None => format!("created {key} on ports {ports}"),
        })
    }

    async fn delete(&self, key: &str, erase_files: bool) -> Result<String> {
        self.supervisor.ensure_primary_instance()?;
        if self.supervisor.is_primary(key) {
            return Err(SupervisorError::PrimaryWorld {
                action: "delete",
                world: key.to_string(),
            });
        }
        let enabled = {
            let store = self.store.lock().await;
            store
                .get(key)
                .ok_or_else(|| SupervisorError::UnknownWorld(key.to_string()))?
                .enabled
        };

        if enabled || self.supervisor.is_enabled(key).await {
            self.supervisor.stop_world(key).await?;
        }

        {
            let mut store = self.store.lock().await;
            store.remove(key)?;
            store.save().await?;
        }

        if erase_files {
            let dir = self.supervisor.settings().world_dir(key);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(format!("deleted {key} and erased its files"));
        }
        Ok(format!("deleted {key}"))
    }

    async fn enable(&self, key: &str) -> Result<String> {
        self.supervisor.ensure_primary_instance()?;
        if self.supervisor.is_primary(key) {
            return Ok(format!("{key} is the primary world and always enabled"));
        }
        let spec = {
            let mut store = self.store.lock().await;
            let spec = store.set_enabled(key, true)?;
            store.save().await?;
            spec
        };
        if self.supervisor.is_enabled(key).await {
            return Ok(format!("{key} is already running"));
        }
        let st = self.supervisor.start_world(key, &spec).await?;
        Ok(match st {
            Some(st) => format!("enabled {key}; running as {} on port {}", st.resolved_name, st.port),
            None => format!("enabled {key}"),
        })
    }

    async fn disable(&self, key: &str) -> Result<String> {
        self.supervisor.ensure_primary_instance()?;
        if self.supervisor.is_primary(key) {
            return Err(SupervisorError::PrimaryWorld {
                action: "disable",
                world: key.to_string(),
            });
        }
        {
            let mut store = self.store.lock().await;
            store.set_enabled(key, false)?;
            store.save().await?;
        }
        let report = self.supervisor.stop_world(key).await?;
        Ok(format!(
            "disabled {key}; stopped {} instance(s)",
            report.stopped.len() + report.orphans.len()
        ))
    }

    async fn list(&self) -> String {
        let running = self.supervisor.list().await;
        let configured = self.store.lock().await.snapshot();
        let host = self.supervisor.host();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} (primary) port {} running",
            host.primary_world(),
            host.primary_ports().primary
        );
        for (key, spec) in configured {
            if self.supervisor.is_primary(&key) {
                continue;
            }
            let live: Vec<_> = running.iter().filter(|s| s.world_key.0 == key).collect();
            let state = match live.first() {
                Some(s) if s.state == WorldState::Running => "running",
                Some(s) if s.state == WorldState::Stopping => "stopping",
                Some(_) => "exited",
                None if spec.enabled => "enabled, not running",
                None => "disabled",
            };
            let port = live
                .first()
                .map(|s| s.port)
                .or(spec.primary_port)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            let level = spec.level_name_or(&key);
            let _ = write!(out, "{key} ({level}) port {port} {state}");
            if let Some(s) = live.first()
                && s.resolved_name != level
            {
                let _ = write!(out, " as {}", s.resolved_name);
            }
            out.push('\n');
        }
        out
    }

    async fn send(&self, key: &str, player: &str) -> Result<String> {
        let host = self.supervisor.host();
        let port = if self.supervisor.is_primary(key) {
            host.primary_ports().primary
        } else {
            self.supervisor
                .port_of(key)
                .await
                .ok_or_else(|| SupervisorError::NotRunning(key.to_string()))?
        };
        let target = &self.supervisor.settings().public_host;
        host.transfer_player(player, target, port)?;
        Ok(format!("sent {player} to {key} ({target}:{port})"))
    }
}
