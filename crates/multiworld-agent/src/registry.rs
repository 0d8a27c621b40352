use std::collections::{BTreeMap, BTreeSet, HashMap};

use multiworld_core::{WorldKey, WorldState, WorldStatus};

use crate::{
    error::SupervisorError,
    launcher::{Console, WorldProcess},
    port_alloc::{self, PortPair},
};

/// Ports held by one world: the one it is reached on and, when configured,
/// its secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorldPorts {
    pub(crate) primary: u16,
    pub(crate) secondary: Option<u16>,
}

impl WorldPorts {
    fn iter(self) -> impl Iterator<Item = u16> {
        std::iter::once(self.primary).chain(self.secondary)
    }
}

#[derive(Debug)]
pub(crate) struct RegistryEntry {
    pub(crate) world_key: String,
    pub(crate) raw_name: String,
    /// `None` while a stop is in flight; the slot stays reserved until removed.
    pub(crate) process: Option<WorldProcess>,
    pub(crate) pid: Option<u32>,
}

/// Runtime state shared by every supervisor handle. Always accessed under the
/// supervisor's mutex.
#[derive(Debug, Default)]
pub(crate) struct WorldRegistry {
    entries: BTreeMap<String, RegistryEntry>,
    ports: BTreeMap<String, WorldPorts>,
    /// Highest suffix handed out per raw level name; 0 means "seen, unsuffixed".
    seen: HashMap<String, u32>,
    /// World keys with a launch in flight, and the ports reserved for it.
    pending: BTreeMap<String, WorldPorts>,
    /// Names handed out to in-flight launches: resolved -> raw.
    reserved: BTreeMap<String, String>,
}

impl WorldRegistry {
    pub(crate) fn contains_key(&self, world_key: &str) -> bool {
        self.entries.values().any(|e| e.world_key == world_key)
    }

    /// Every port held by the host, a tracked world or an in-flight launch.
    fn used_ports(&self, host: PortPair) -> BTreeSet<u16> {
        [host.primary, host.secondary]
            .into_iter()
            .chain(self.ports.values().flat_map(|p| p.iter()))
            .chain(self.pending.values().flat_map(|p| p.iter()))
            .collect()
    }

    /// Reserve `world_key` and its ports for a launch. A missing primary port
    /// is replaced by the first free one counting up from `base + registry
    /// size`. The reservation lasts until [`Self::insert`] or
    /// [`Self::end_start`].
    pub(crate) fn begin_start(
        &mut self,
        world_key: &str,
        primary: Option<u16>,
        secondary: Option<u16>,
        host: PortPair,
        base: u16,
    ) -> Result<WorldPorts, SupervisorError> {
        if self.contains_key(world_key) || self.pending.contains_key(world_key) {
            return Err(SupervisorError::AlreadyRunning(world_key.to_string()));
        }

        let mut used = self.used_ports(host);
        let primary = match primary {
            Some(port) => {
                port_alloc::ensure_free([port], &used)?;
                port
            }
            None => self.fallback_port(&used, base)?,
        };
        used.insert(primary);
        if let Some(port) = secondary {
            port_alloc::ensure_free([port], &used)?;
        }

        let ports = WorldPorts { primary, secondary };
        self.pending.insert(world_key.to_string(), ports);
        Ok(ports)
    }

    /// Drop a launch reservation that never produced an entry.
    pub(crate) fn end_start(&mut self, world_key: &str) {
        self.pending.remove(world_key);
    }

    fn fallback_port(&self, used: &BTreeSet<u16>, base: u16) -> Result<u16, SupervisorError> {
        let offset = u16::try_from(self.entries.len()).unwrap_or(u16::MAX);
        let start = base.saturating_add(offset);
        (start..=u16::MAX)
            .find(|p| !used.contains(p))
            .ok_or(SupervisorError::PortsExhausted { primary: start })
    }

    fn name_taken(&self, name: &str) -> bool {
        self.entries.contains_key(name) || self.reserved.contains_key(name)
    }

    /// Disambiguate a raw level name: the first world gets it unchanged, later
    /// ones get `raw_<n>` with a strictly increasing `n`. The name stays
    /// reserved until [`Self::insert`] or [`Self::release_name`].
    pub(crate) fn resolve_name(&mut self, raw: &str) -> String {
        let resolved = self.next_name(raw);
        self.reserved.insert(resolved.clone(), raw.to_string());
        resolved
    }

    fn next_name(&mut self, raw: &str) -> String {
        if !self.seen.contains_key(raw) {
            self.seen.insert(raw.to_string(), 0);
            if !self.name_taken(raw) {
                return raw.to_string();
            }
        }
        loop {
            let n = self.seen.get(raw).copied().unwrap_or(0) + 1;
            self.seen.insert(raw.to_string(), n);
            let candidate = format!("{raw}_{n}");
            if !self.name_taken(&candidate) {
                return candidate;
            }
        }
    }

    /// Track a launched world under its resolved name. Its name and port
    /// reservations become the entry's.
    pub(crate) fn insert(
        &mut self,
        resolved: String,
        world_key: &str,
        raw_name: &str,
        process: WorldProcess,
        ports: WorldPorts,
    ) {
        self.reserved.remove(&resolved);
        self.pending.remove(world_key);
        self.ports.insert(resolved.clone(), ports);
        self.entries.insert(
            resolved,
            RegistryEntry {
                world_key: world_key.to_string(),
                raw_name: raw_name.to_string(),
                pid: process.pid(),
                process: Some(process),
            },
        );
    }

    /// Drop a name handed out by [`Self::resolve_name`] whose launch never
    /// produced an entry.
    pub(crate) fn release_name(&mut self, resolved: &str) {
        if let Some(raw) = self.reserved.remove(resolved) {
            self.forget_if_unused(&raw);
        }
    }

    fn forget_if_unused(&mut self, raw: &str) {
        let in_use = self.entries.values().any(|e| e.raw_name == raw)
            || self.reserved.values().any(|r| r == raw);
        if !in_use {
            self.seen.remove(raw);
        }
    }

    fn matches(resolved: &str, entry: &RegistryEntry, world_key: &str) -> bool {
        if entry.world_key == world_key || resolved == world_key {
            return true;
        }
        // Same-named worlds launched more than once: `<key>_<n>`.
        resolved
            .strip_prefix(world_key)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }

    /// Take the process handles of every entry belonging to `world_key`. The
    /// entries stay in place (state `Stopping`) until [`Self::remove`] is
    /// called. The flag reports whether anything matched at all, including
    /// entries whose stop is already in flight.
    pub(crate) fn take_for_stop(&mut self, world_key: &str) -> (Vec<(String, WorldProcess)>, bool) {
        let mut out = Vec::new();
        let mut matched = false;
        for (resolved, entry) in self.entries.iter_mut() {
            if !Self::matches(resolved, entry, world_key) {
                continue;
            }
            matched = true;
            if let Some(process) = entry.process.take() {
                out.push((resolved.clone(), process));
            }
        }
        (out, matched)
    }

    pub(crate) fn remove(&mut self, resolved: &str) {
        let Some(entry) = self.entries.remove(resolved) else {
            return;
        };
        self.ports.remove(resolved);
        self.forget_if_unused(&entry.raw_name);
    }

    pub(crate) fn world_keys(&self) -> BTreeSet<String> {
        self.entries.values().map(|e| e.world_key.clone()).collect()
    }

    pub(crate) fn port_of(&self, world_key: &str) -> Option<u16> {
        self.entries
            .iter()
            .find(|(_, e)| e.world_key == world_key)
            .and_then(|(name, _)| self.ports.get(name))
            .map(|p| p.primary)
    }

    /// Console of the world's live process, if it has one that has not exited.
    pub(crate) fn live_console(&mut self, world_key: &str) -> Option<Console> {
        let process = self
            .entries
            .values_mut()
            .find(|e| e.world_key == world_key)
            .and_then(|e| e.process.as_mut())?;
        if process.has_exited() {
            return None;
        }
        Some(process.console())
    }

    pub(crate) fn statuses(&mut self) -> Vec<WorldStatus> {
        let ports = &self.ports;
        self.entries
            .iter_mut()
            .map(|(name, e)| {
                let state = match e.process.as_mut() {
                    None => WorldState::Stopping,
                    Some(p) => {
                        if p.has_exited() {
                            WorldState::Exited
                        } else {
                            WorldState::Running
                        }
                    }
                };
                WorldStatus {
                    world_key: WorldKey(e.world_key.clone()),
                    resolved_name: name.clone(),
                    port: ports.get(name).map(|p| p.primary).unwrap_or_default(),
                    state,
                    pid: e.pid,
                }
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn has_entry(&self, resolved: &str) -> bool {
        self.entries.contains_key(resolved)
    }

    #[cfg(test)]
    pub(crate) fn has_counter(&self, raw: &str) -> bool {
        self.seen.contains_key(raw)
    }

    #[cfg(test)]
    pub(crate) fn has_port_for(&self, resolved: &str) -> bool {
        self.ports.contains_key(resolved)
    }
}
