pub mod commands;
pub mod error;
pub mod host;
pub mod launcher;
pub mod orphan;
pub mod plugin_sync;
pub mod port_alloc;
pub mod properties;
mod registry;
pub mod retry;
pub mod settings;
pub mod supervisor;
pub mod world_store;

pub use commands::{AdminCommand, CommandDispatcher};
pub use error::{Result, SupervisorError};
pub use host::Host;
pub use settings::SupervisorSettings;
pub use supervisor::{StopReport, Supervisor};
pub use world_store::WorldStore;
