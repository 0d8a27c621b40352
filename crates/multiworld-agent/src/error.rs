use std::fmt::Write as _;

/// Errors surfaced synchronously by the supervisor and the command surface.
///
/// Every variant carries a stable machine code (see [`SupervisorError::code`]) so
/// the command layer can map failures without matching on message text.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("port {port} is already in use")]
    PortConflict { port: u16 },
    #[error("no free secondary port above {primary}")]
    PortsExhausted { primary: u16 },
    #[error("level name already used by world {existing}: {name}")]
    NameConflict { name: String, existing: String },
    #[error("world already exists: {0}")]
    WorldExists(String),
    #[error("unknown world: {0}")]
    UnknownWorld(String),
    #[error("invalid world key: {0:?}")]
    InvalidWorldKey(String),
    #[error("world {world} failed to start after {attempts} attempts: {reason}")]
    LaunchFailed {
        world: String,
        attempts: u32,
        reason: String,
    },
    #[error("world is not running: {0}")]
    NotRunning(String),
    #[error("world is already running: {0}")]
    AlreadyRunning(String),
    #[error("refusing to {action} the primary world {world}")]
    PrimaryWorld { action: &'static str, world: String },
    #[error("world lifecycle can only be changed from the primary instance")]
    NestedOrchestration,
    #[error("usage: {0}")]
    Usage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::PortConflict { .. } | SupervisorError::PortsExhausted { .. } => {
                "port_conflict"
            }
            SupervisorError::NameConflict { .. } => "name_conflict",
            SupervisorError::WorldExists(_) => "world_exists",
            SupervisorError::UnknownWorld(_) => "unknown_world",
            SupervisorError::InvalidWorldKey(_) => "invalid_world_key",
            SupervisorError::LaunchFailed { .. } => "launch_failed",
            SupervisorError::NotRunning(_) => "not_running",
            SupervisorError::AlreadyRunning(_) => "already_running",
            SupervisorError::PrimaryWorld { .. } => "primary_world",
            SupervisorError::NestedOrchestration => "nested_orchestration",
            SupervisorError::Usage(_) => "usage",
            SupervisorError::Io(_) => "io",
            SupervisorError::Internal(_) => "internal",
        }
    }

    /// Configuration conflicts are rejected before any process is touched.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SupervisorError::PortConflict { .. }
                | SupervisorError::PortsExhausted { .. }
                | SupervisorError::NameConflict { .. }
                | SupervisorError::WorldExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut out = String::new();
    let mut last: Option<String> = None;
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() || last.as_deref() == Some(s.as_str()) {
            continue;
        }
        if !out.is_empty() {
            out.push_str(": ");
        }
        let _ = write!(out, "{s}");
        last = Some(s);
    }
    if out.is_empty() {
        "unknown error".to_string()
    } else {
        out
    }
}
