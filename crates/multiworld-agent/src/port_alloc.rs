use std::{collections::BTreeSet, io::ErrorKind, net::TcpListener};

use crate::error::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortPair {
    pub primary: u16,
    pub secondary: u16,
}

/// Pick a (primary, secondary) pair for a new world.
///
/// `primary_world` is the host's own pair; `claimed` are the pairs of every
/// configured world. The requested primary is rejected if any of those use it;
/// the secondary is the first port above it that nobody uses.
pub fn allocate(
    requested_primary: u16,
    primary_world: PortPair,
    claimed: &[PortPair],
) -> Result<PortPair, SupervisorError> {
    let used: BTreeSet<u16> = std::iter::once(primary_world)
        .chain(claimed.iter().copied())
        .flat_map(|p| [p.primary, p.secondary])
        .collect();

    ensure_free([requested_primary], &used)?;

    let mut secondary = requested_primary;
    loop {
        secondary = secondary
            .checked_add(1)
            .ok_or(SupervisorError::PortsExhausted {
                primary: requested_primary,
            })?;
        if !used.contains(&secondary) {
            break;
        }
    }

    Ok(PortPair {
        primary: requested_primary,
        secondary,
    })
}

/// Reject the first of `ports` that is already in `used`.
pub fn ensure_free(
    ports: impl IntoIterator<Item = u16>,
    used: &BTreeSet<u16>,
) -> Result<(), SupervisorError> {
    match ports.into_iter().find(|p| used.contains(p)) {
        Some(port) => Err(SupervisorError::PortConflict { port }),
        None => Ok(()),
    }
}

/// Probe whether the OS would let a child bind `port` right now.
pub fn is_bindable(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::AddrInUse => false,
        Err(e) => {
            tracing::debug!(port, error = %e, "port probe failed");
            false
        }
    }
}
