use crate::port_alloc::PortPair;

/// The primary server the supervisor runs inside.
///
/// Implementations must be cheap to call from any task; the supervisor never
/// holds its registry lock while calling into the host.
pub trait Host: Send + Sync + 'static {
    /// Name of the world this process itself serves. Never launched or
    /// stopped through the supervisor.
    fn primary_world(&self) -> &str;

    fn primary_ports(&self) -> PortPair;

    /// Run a console command on the primary world's own dispatcher.
    fn dispatch_command(&self, command: &str) -> anyhow::Result<()>;

    /// Move a connected player to another server.
    fn transfer_player(&self, player: &str, host: &str, port: u16) -> anyhow::Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct RecordingHost {
        pub(crate) commands: Mutex<Vec<String>>,
        pub(crate) transfers: Mutex<Vec<(String, String, u16)>>,
    }

    impl Host for RecordingHost {
        fn primary_world(&self) -> &str {
            "world"
        }

        fn primary_ports(&self) -> PortPair {
            PortPair {
                primary: 19132,
                secondary: 19232,
            }
        }

        fn dispatch_command(&self, command: &str) -> anyhow::Result<()> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(())
        }

        fn transfer_player(&self, player: &str, host: &str, port: u16) -> anyhow::Result<()> {
            if player == "offline" {
                anyhow::bail!("player not online: {player}");
            }
            self.transfers
                .lock()
                .unwrap()
                .push((player.to_string(), host.to_string(), port));
            Ok(())
        }
    }
}
