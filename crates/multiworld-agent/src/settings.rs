use std::{path::PathBuf, time::Duration};

use crate::retry::RetryPolicy;

/// Env var the launcher sets on every child so a nested agent knows it is not
/// the primary instance.
pub const PARENT_ENV: &str = "MULTIWORLD_PARENT";

const DEFAULT_LAUNCH_RETRIES: u32 = 3;
const DEFAULT_POST_SPAWN_WAIT_MS: u64 = 1000;
const DEFAULT_STOP_GRACE_SEC: u64 = 5;
const DEFAULT_PLUGIN_SYNC_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PLUGIN_SYNC_INTERVAL_MS: u64 = 100;
const DEFAULT_FALLBACK_BASE_PORT: u16 = 19133;

pub fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn absolute(raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Best-effort canonicalization: don't fail if the directory doesn't exist yet.
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub data_root: PathBuf,
    pub plugin_payload_dir: PathBuf,
    pub template_path: Option<PathBuf>,
    pub server_exec: String,
    pub server_args: Vec<String>,
    pub launch_retries: u32,
    pub post_spawn_wait: Duration,
    pub stop_grace: Duration,
    pub stop_command: String,
    pub plugin_sync_timeout: Duration,
    pub plugin_sync_interval: Duration,
    pub fallback_base_port: u16,
    pub public_host: String,
    /// Set when this process was itself launched by a supervisor.
    pub inside_child: bool,
}

impl SupervisorSettings {
    /// Defaults rooted at `data_root`, ignoring the environment.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            plugin_payload_dir: data_root.join("plugins"),
            template_path: None,
            server_exec: "java".to_string(),
            server_args: vec![
                "-jar".to_string(),
                absolute("server.jar").display().to_string(),
            ],
            launch_retries: DEFAULT_LAUNCH_RETRIES,
            post_spawn_wait: Duration::from_millis(DEFAULT_POST_SPAWN_WAIT_MS),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SEC),
            stop_command: "stop".to_string(),
            plugin_sync_timeout: Duration::from_millis(DEFAULT_PLUGIN_SYNC_TIMEOUT_MS),
            plugin_sync_interval: Duration::from_millis(DEFAULT_PLUGIN_SYNC_INTERVAL_MS),
            fallback_base_port: DEFAULT_FALLBACK_BASE_PORT,
            public_host: "127.0.0.1".to_string(),
            inside_child: false,
            data_root,
        }
    }

    pub fn from_env() -> Self {
        let data_root =
            absolute(&env_string("MULTIWORLD_DATA_ROOT").unwrap_or_else(|| "./data".to_string()));
        let mut s = Self::with_data_root(data_root);

        if let Some(dir) = env_string("MULTIWORLD_PLUGIN_DIR") {
            s.plugin_payload_dir = absolute(&dir);
        }
        s.template_path = env_string("MULTIWORLD_TEMPLATE").map(|p| absolute(&p));
        if let Some(exec) = env_string("MULTIWORLD_SERVER_EXEC") {
            s.server_exec = exec;
        }
        if let Some(args) = env_string("MULTIWORLD_SERVER_ARGS") {
            s.server_args = args.split_whitespace().map(str::to_string).collect();
        } else if let Some(jar) = env_string("MULTIWORLD_SERVER_JAR") {
            s.server_args = vec!["-jar".to_string(), absolute(&jar).display().to_string()];
        }
        s.launch_retries = env_u64("MULTIWORLD_LAUNCH_RETRIES")
            .map(|v| v.clamp(0, 10) as u32)
            .unwrap_or(DEFAULT_LAUNCH_RETRIES);
        s.post_spawn_wait = Duration::from_millis(
            env_u64("MULTIWORLD_POST_SPAWN_WAIT_MS")
                .map(|v| v.clamp(50, 30_000))
                .unwrap_or(DEFAULT_POST_SPAWN_WAIT_MS),
        );
        s.stop_grace = Duration::from_secs(
            env_u64("MULTIWORLD_STOP_GRACE_SEC")
                .map(|v| v.clamp(1, 120))
                .unwrap_or(DEFAULT_STOP_GRACE_SEC),
        );
        if let Some(cmd) = env_string("MULTIWORLD_STOP_COMMAND") {
            s.stop_command = cmd;
        }
        s.plugin_sync_timeout = Duration::from_millis(
            env_u64("MULTIWORLD_PLUGIN_SYNC_TIMEOUT_MS")
                .map(|v| v.clamp(100, 120_000))
                .unwrap_or(DEFAULT_PLUGIN_SYNC_TIMEOUT_MS),
        );
        s.plugin_sync_interval = Duration::from_millis(
            env_u64("MULTIWORLD_PLUGIN_SYNC_INTERVAL_MS")
                .map(|v| v.clamp(10, 5000))
                .unwrap_or(DEFAULT_PLUGIN_SYNC_INTERVAL_MS),
        );
        s.fallback_base_port = env_u64("MULTIWORLD_FALLBACK_BASE_PORT")
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_FALLBACK_BASE_PORT);
        if let Some(host) = env_string("MULTIWORLD_PUBLIC_HOST") {
            s.public_host = host;
        }
        s.inside_child = std::env::var_os(PARENT_ENV).is_some();
        s
    }

    pub fn worlds_dir(&self) -> PathBuf {
        self.data_root.join("worlds")
    }

    pub fn world_dir(&self, world_key: &str) -> PathBuf {
        self.worlds_dir().join(world_key)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_root.join("worlds.yml")
    }

    pub fn plugin_sync_policy(&self) -> RetryPolicy {
        let interval = self.plugin_sync_interval.max(Duration::from_millis(1));
        let attempts = (self.plugin_sync_timeout.as_millis() / interval.as_millis()).max(1);
        RetryPolicy {
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            interval,
            timeout: Some(self.plugin_sync_timeout),
        }
    }

    pub fn launch_policy(&self) -> RetryPolicy {
        // No extra pause between attempts: each attempt already waits post_spawn_wait.
        RetryPolicy {
            attempts: self.launch_retries.saturating_add(1),
            interval: Duration::ZERO,
            timeout: None,
        }
    }
}
