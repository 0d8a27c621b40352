use std::sync::Arc;

use anyhow::Context;
use multiworld_core::{WorldKey, WorldSpec, WorldState, WorldStatus};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    error::{Result, SupervisorError},
    host::Host,
    launcher::{self, StopOutcome},
    orphan, plugin_sync, port_alloc,
    properties::{self, Properties},
    registry::{WorldPorts, WorldRegistry},
    settings::SupervisorSettings,
    world_store::validate_world_key,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Resolved names that were tracked and have now been removed.
    pub stopped: Vec<(String, StopOutcome)>,
    /// Untracked processes terminated by the working-directory scan.
    pub orphans: Vec<u32>,
}

impl StopReport {
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.orphans.is_empty()
    }
}

/// Owns every auxiliary world launched from this host. Cheap to clone; all
/// clones share one registry behind one lock.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Mutex<WorldRegistry>>,
    settings: Arc<SupervisorSettings>,
    template: Arc<Properties>,
    host: Arc<dyn Host>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, host: Arc<dyn Host>) -> anyhow::Result<Self> {
        let template = properties::load_template(settings.template_path.as_deref())?;
        Ok(Self {
            inner: Arc::new(Mutex::new(WorldRegistry::default())),
            settings: Arc::new(settings),
            template: Arc::new(template),
            host,
        })
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub fn is_primary(&self, world_key: &str) -> bool {
        world_key == self.host.primary_world()
    }

    pub(crate) fn ensure_primary_instance(&self) -> Result<()> {
        if self.settings.inside_child {
            return Err(SupervisorError::NestedOrchestration);
        }
        Ok(())
    }

    /// Prepare the world directory, launch the dedicated server and track it.
    /// Returns `None` for the primary world, which is never launched here.
    pub async fn start_world(&self, world_key: &str, spec: &WorldSpec) -> Result<Option<WorldStatus>> {
        if self.is_primary(world_key) {
            tracing::debug!(world = world_key, "primary world is not managed; skipping start");
            return Ok(None);
        }
        self.ensure_primary_instance()?;
        validate_world_key(world_key)?;

        let ports = self.inner.lock().await.begin_start(
            world_key,
            spec.primary_port,
            spec.secondary_port,
            self.host.primary_ports(),
            self.settings.fallback_base_port,
        )?;
        if spec.primary_port.is_none() {
            tracing::warn!(world = world_key, port = ports.primary, "server-port missing or invalid; using fallback");
        }

        // What the child actually runs with: the reserved port and a level name.
        let mut effective = spec.clone();
        effective.level_name = spec.level_name_or(world_key).to_string();
        effective.primary_port = Some(ports.primary);

        let res = self.launch_reserved(world_key, &effective, ports).await;
        if res.is_err() {
            self.inner.lock().await.end_start(world_key);
        }
        res.map(Some)
    }

    async fn launch_reserved(
        &self,
        world_key: &str,
        spec: &WorldSpec,
        ports: WorldPorts,
    ) -> Result<WorldStatus> {
        let settings = &self.settings;
        let dir = settings.world_dir(world_key);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create world dir {}", dir.display()))?;

        let plugin_dir = dir.join(plugin_sync::WORLD_PLUGIN_DIR);
        if !plugin_sync::sync(
            &settings.plugin_payload_dir,
            &plugin_dir,
            settings.plugin_sync_policy(),
        )
        .await
        {
            tracing::warn!(world = world_key, "plugin sync incomplete; launching anyway");
        }

        let props = properties::merge(&self.template, spec);
        properties::write_file(&dir, &props).await?;

        for port in [Some(ports.primary), ports.secondary].into_iter().flatten() {
            if !port_alloc::is_bindable(port) {
                tracing::warn!(world = world_key, port, "configured port is not bindable right now");
            }
        }

        let resolved = self.inner.lock().await.resolve_name(&spec.level_name);
        if resolved != spec.level_name {
            tracing::info!(world = world_key, level = %spec.level_name, %resolved, "level name already in use; disambiguated");
        }

        let launched =
            match launcher::launch(settings, &resolved, &dir, self.host.primary_world()).await {
                Ok(l) => l,
                Err(e) => {
                    self.inner.lock().await.release_name(&resolved);
                    return Err(e);
                }
            };
        let launcher::Launched {
            process,
            stdout,
            stderr,
        } = launched;
        let pid = process.pid();

        self.inner
            .lock()
            .await
            .insert(resolved.clone(), world_key, &spec.level_name, process, ports);

        launcher::spawn_output_forwarders(&resolved, stdout, stderr);

        Ok(WorldStatus {
            world_key: WorldKey(world_key.to_string()),
            resolved_name: resolved,
            port: ports.primary,
            state: WorldState::Running,
            pid,
        })
    }

    /// Stop every tracked instance of `world_key`. When nothing is tracked the
    /// world directory is scanned for orphaned processes instead.
    pub async fn stop_world(&self, world_key: &str) -> Result<StopReport> {
        if self.is_primary(world_key) {
            return Err(SupervisorError::PrimaryWorld {
                action: "stop",
                world: world_key.to_string(),
            });
        }
        self.ensure_primary_instance()?;
        validate_world_key(world_key)?;

        let (taken, matched) = self.inner.lock().await.take_for_stop(world_key);
        let mut report = StopReport::default();

        if !matched {
            let dir = self.settings.world_dir(world_key);
            report.orphans = orphan::reap(&dir, self.settings.stop_grace).await;
            if report.orphans.is_empty() {
                tracing::debug!(world = world_key, "stop requested but nothing is running");
            }
            return Ok(report);
        }

        for (resolved, process) in taken {
            let pid = process.pid();
            let outcome = process
                .shutdown(&self.settings.stop_command, self.settings.stop_grace)
                .await;
            match outcome {
                StopOutcome::Unconfirmed => {
                    tracing::error!(world = %resolved, ?pid, "process did not exit after kill")
                }
                _ => tracing::info!(world = %resolved, ?pid, ?outcome, "world stopped"),
            }
            self.inner.lock().await.remove(&resolved);
            report.stopped.push((resolved, outcome));
        }
        Ok(report)
    }

    /// Start every enabled world on its own task so one slow launch does not
    /// hold up the others.
    pub fn start_all_enabled(
        &self,
        worlds: impl IntoIterator<Item = (String, WorldSpec)>,
    ) -> Vec<JoinHandle<()>> {
        worlds
            .into_iter()
            .filter(|(_, spec)| spec.enabled)
            .map(|(key, spec)| {
                let sup = self.clone();
                tokio::spawn(async move {
                    match sup.start_world(&key, &spec).await {
                        Ok(Some(st)) => {
                            tracing::info!(world = %key, resolved = %st.resolved_name, port = st.port, "world started")
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(world = %key, code = e.code(), error = %e, "world failed to start")
                        }
                    }
                })
            })
            .collect()
    }

    pub fn stop_all_enabled(
        &self,
        worlds: impl IntoIterator<Item = (String, WorldSpec)>,
    ) -> Vec<JoinHandle<()>> {
        worlds
            .into_iter()
            .filter(|(key, spec)| spec.enabled && !self.is_primary(key))
            .map(|(key, _)| self.spawn_stop(key))
            .collect()
    }

    fn spawn_stop(&self, key: String) -> JoinHandle<()> {
        let sup = self.clone();
        tokio::spawn(async move {
            if let Err(e) = sup.stop_world(&key).await {
                tracing::error!(world = %key, code = e.code(), error = %e, "world failed to stop");
            }
        })
    }

    /// Host shutdown: stop everything that is tracked, whatever the config says.
    pub async fn shutdown(&self) -> usize {
        let keys = self.inner.lock().await.world_keys();
        let n = keys.len();
        let handles: Vec<_> = keys.into_iter().map(|k| self.spawn_stop(k)).collect();
        for h in handles {
            let _ = h.await;
        }
        n
    }

    pub async fn is_enabled(&self, world_key: &str) -> bool {
        self.inner.lock().await.contains_key(world_key)
    }

    pub async fn port_of(&self, world_key: &str) -> Option<u16> {
        self.inner.lock().await.port_of(world_key)
    }

    /// Run a console command in a world: the primary world's own dispatcher,
    /// or one line on a child's stdin.
    pub async fn route_command(&self, world_key: &str, text: &str) -> Result<()> {
        if self.is_primary(world_key) {
            return self.host.dispatch_command(text).map_err(SupervisorError::from);
        }

        let console = self
            .inner
            .lock()
            .await
            .live_console(world_key)
            .ok_or_else(|| SupervisorError::NotRunning(world_key.to_string()))?;

        // The registry lock is released; a child that stops reading only
        // stalls this call.
        match tokio::time::timeout(self.settings.stop_grace, console.send_line(text)).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(SupervisorError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("console of {world_key} is not accepting input"),
            ))),
        }
    }

    pub async fn list(&self) -> Vec<WorldStatus> {
        self.inner.lock().await.statuses()
    }

    /// (entry, port, disambiguation counter) still present for a world.
    #[cfg(test)]
    pub(crate) async fn registry_trace(&self, resolved: &str, raw: &str) -> (bool, bool, bool) {
        let reg = self.inner.lock().await;
        (
            reg.has_entry(resolved),
            reg.has_port_for(resolved),
            reg.has_counter(raw),
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::atomic::{AtomicU64, Ordering},
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use super::*;
    use crate::host::testing::RecordingHost;

    /// Echoes console lines into console.txt and exits on `stop`.
    const CONSOLE_SCRIPT: &str =
        "while read l; do case \"$l\" in stop) exit 0;; esac; echo \"$l\" >> console.txt; done";

    fn temp_dir_for(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "multiworld-supervisor-{test_name}-{}-{n}-{ts}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn settings_for(root: &Path, script: &str) -> SupervisorSettings {
        let mut s = SupervisorSettings::with_data_root(root);
        s.server_exec = "/bin/sh".to_string();
        s.server_args = vec!["-c".to_string(), script.to_string()];
        s.post_spawn_wait = Duration::from_millis(100);
        s.stop_grace = Duration::from_secs(2);
        s.plugin_sync_timeout = Duration::from_millis(200);
        s.plugin_sync_interval = Duration::from_millis(10);
        s.fallback_base_port = 25000;
        s
    }

    fn supervisor(root: &Path, script: &str) -> (Supervisor, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::default());
        let sup = Supervisor::new(settings_for(root, script), host.clone()).unwrap();
        (sup, host)
    }

    async fn wait_for_file(path: &Path) -> String {
        for _ in 0..50 {
            if let Ok(s) = std::fs::read_to_string(path)
                && !s.is_empty()
            {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn scenario_start_list_stop() {
        let root = temp_dir_for("scenario-a");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let st = sup
            .start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(st.resolved_name, "alpha");
        assert!(sup.is_enabled("alpha").await);

        let listed = sup.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].world_key.0, "alpha");
        assert_eq!(listed[0].port, 19133);
        assert_eq!(listed[0].state, WorldState::Running);

        let props = std::fs::read_to_string(root.join("worlds/alpha/server.properties")).unwrap();
        assert!(props.contains("server-port=19133\n"));
        assert!(props.contains("level-name=alpha\n"));

        let report = sup.stop_world("alpha").await.unwrap();
        assert_eq!(report.stopped, vec![("alpha".to_string(), StopOutcome::Graceful(Some(0)))]);
        assert!(!sup.is_enabled("alpha").await);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn same_level_name_is_disambiguated() {
        let root = temp_dir_for("scenario-c");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let a = sup
            .start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap()
            .unwrap();
        let b = sup
            .start_world("alpha-copy", &WorldSpec::new("alpha", 19135, 19136))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.resolved_name, "alpha");
        assert_eq!(b.resolved_name, "alpha_1");

        let listed = sup.list().await;
        assert_eq!(listed.len(), 2);
        assert_ne!(listed[0].port, listed[1].port);

        // Stopping by the level name takes down every same-named instance.
        let report = sup.stop_world("alpha").await.unwrap();
        assert_eq!(report.stopped.len(), 2);
        assert!(sup.list().await.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stop_leaves_no_trace() {
        let root = temp_dir_for("no-trace");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        assert_eq!(sup.registry_trace("alpha", "alpha").await, (true, true, true));

        sup.stop_world("alpha").await.unwrap();
        assert_eq!(sup.registry_trace("alpha", "alpha").await, (false, false, false));

        // The name is available again, unsuffixed.
        let st = sup
            .start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(st.resolved_name, "alpha");
        sup.shutdown().await;

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn failed_launch_registers_nothing() {
        let root = temp_dir_for("scenario-e");
        let (sup, _) = supervisor(&root, "echo x >> attempts.txt; exit 1");

        let err = sup
            .start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::LaunchFailed { attempts: 4, .. }));
        assert!(!sup.is_enabled("alpha").await);
        assert!(sup.list().await.is_empty());
        assert_eq!(sup.registry_trace("alpha", "alpha").await, (false, false, false));

        let attempts = std::fs::read_to_string(root.join("worlds/alpha/attempts.txt")).unwrap();
        assert_eq!(attempts.lines().count(), 4);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn untracked_world_is_reaped_by_directory() {
        let root = temp_dir_for("scenario-d");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let orphan_dir = sup.settings().world_dir("alpha");
        let other_dir = sup.settings().world_dir("beta");
        std::fs::create_dir_all(&orphan_dir).unwrap();
        std::fs::create_dir_all(&other_dir).unwrap();
        let mut orphan = std::process::Command::new("sleep")
            .arg("30")
            .current_dir(&orphan_dir)
            .spawn()
            .unwrap();
        let mut bystander = std::process::Command::new("sleep")
            .arg("30")
            .current_dir(&other_dir)
            .spawn()
            .unwrap();

        let report = sup.stop_world("alpha").await.unwrap();
        assert!(report.stopped.is_empty());
        assert_eq!(report.orphans, vec![orphan.id()]);
        assert!(orphan.wait().is_ok());
        assert!(bystander.try_wait().unwrap().is_none());

        let _ = bystander.kill();
        let _ = bystander.wait();
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn commands_reach_child_console_and_primary_dispatcher() {
        let root = temp_dir_for("route");
        let (sup, host) = supervisor(&root, CONSOLE_SCRIPT);

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        sup.route_command("alpha", "say hello").await.unwrap();
        let console = wait_for_file(&root.join("worlds/alpha/console.txt")).await;
        assert_eq!(console, "say hello\n");

        sup.route_command("world", "list").await.unwrap();
        assert_eq!(*host.commands.lock().unwrap(), vec!["list".to_string()]);

        assert!(matches!(
            sup.route_command("beta", "say hi").await,
            Err(SupervisorError::NotRunning(_))
        ));

        sup.shutdown().await;
        assert!(sup.list().await.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn primary_world_is_never_launched_or_stopped() {
        let root = temp_dir_for("primary");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let res = sup
            .start_world("world", &WorldSpec::new("world", 19133, 19134))
            .await
            .unwrap();
        assert!(res.is_none());
        assert!(matches!(
            sup.stop_world("world").await,
            Err(SupervisorError::PrimaryWorld { .. })
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn nested_instance_refuses_lifecycle_changes() {
        let root = temp_dir_for("nested");
        let mut settings = settings_for(&root, CONSOLE_SCRIPT);
        settings.inside_child = true;
        let sup = Supervisor::new(settings, Arc::new(RecordingHost::default())).unwrap();

        assert!(matches!(
            sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134)).await,
            Err(SupervisorError::NestedOrchestration)
        ));
        assert!(matches!(
            sup.stop_world("alpha").await,
            Err(SupervisorError::NestedOrchestration)
        ));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn duplicate_start_and_port_reuse_are_rejected() {
        let root = temp_dir_for("duplicate");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        assert!(matches!(
            sup.start_world("alpha", &WorldSpec::new("alpha", 19140, 19141)).await,
            Err(SupervisorError::AlreadyRunning(_))
        ));
        assert!(matches!(
            sup.start_world("beta", &WorldSpec::new("beta", 19133, 19150)).await,
            Err(SupervisorError::PortConflict { port: 19133 })
        ));
        sup.shutdown().await;

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn exited_child_is_listed_as_exited() {
        let root = temp_dir_for("exited");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        sup.route_command("alpha", "stop").await.unwrap();

        let mut state = WorldState::Running;
        for _ in 0..40 {
            state = sup.list().await[0].state;
            if state == WorldState::Exited {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(state, WorldState::Exited);
        assert!(matches!(
            sup.route_command("alpha", "say hi").await,
            Err(SupervisorError::NotRunning(_))
        ));

        let report = sup.stop_world("alpha").await.unwrap();
        assert_eq!(report.stopped, vec![("alpha".to_string(), StopOutcome::AlreadyExited)]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn concurrent_starts_cannot_share_a_port() {
        let root = temp_dir_for("concurrent-ports");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let alpha = WorldSpec::new("alpha", 19133, 19134);
        let beta = WorldSpec::new("beta", 19133, 19134);
        let (a, b) = tokio::join!(sup.start_world("alpha", &alpha), sup.start_world("beta", &beta));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, SupervisorError::PortConflict { port: 19133 }));

        let listed = sup.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].port, 19133);

        sup.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn secondary_and_host_ports_are_claimed() {
        let root = temp_dir_for("claimed-ports");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        assert!(matches!(
            sup.start_world("beta", &WorldSpec::new("beta", 19134, 19150)).await,
            Err(SupervisorError::PortConflict { port: 19134 })
        ));
        assert!(matches!(
            sup.start_world("gamma", &WorldSpec::new("gamma", 19132, 19160)).await,
            Err(SupervisorError::PortConflict { port: 19132 })
        ));
        assert!(matches!(
            sup.start_world("delta", &WorldSpec::new("delta", 19160, 19232)).await,
            Err(SupervisorError::PortConflict { port: 19232 })
        ));
        assert_eq!(sup.list().await.len(), 1);

        // A rejected start leaves nothing reserved behind.
        sup.start_world("beta", &WorldSpec::new("beta", 19150, 19151))
            .await
            .unwrap();
        sup.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stuck_console_does_not_block_other_calls() {
        let root = temp_dir_for("stuck-console");
        let (sup, _) = supervisor(&root, "exec sleep 30");

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        let router = {
            let sup = sup.clone();
            let line = "x".repeat(200_000);
            tokio::spawn(async move { sup.route_command("alpha", &line).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let listed = tokio::time::timeout(Duration::from_secs(1), sup.list())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        match router.await.unwrap() {
            Err(SupervisorError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected result: {other:?}"),
        }

        sup.shutdown().await;
        assert!(sup.list().await.is_empty());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_level_name_runs_under_world_key() {
        let root = temp_dir_for("no-level-name");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let st = sup
            .start_world("alpha", &WorldSpec::new("", 19133, 19134))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(st.resolved_name, "alpha");
        let props = std::fs::read_to_string(root.join("worlds/alpha/server.properties")).unwrap();
        assert!(props.contains("level-name=alpha\n"));

        sup.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_port_uses_fallback() {
        let root = temp_dir_for("fallback");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let mut spec = WorldSpec::new("alpha", 0, 0);
        spec.primary_port = None;
        spec.secondary_port = None;
        let st = sup.start_world("alpha", &spec).await.unwrap().unwrap();
        assert_eq!(st.port, 25000);
        let props = std::fs::read_to_string(root.join("worlds/alpha/server.properties")).unwrap();
        assert!(props.contains("server-port=25000\n"));
        sup.shutdown().await;

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn start_all_only_launches_enabled_worlds() {
        let root = temp_dir_for("start-all");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);

        let mut disabled = WorldSpec::new("gamma", 19160, 19161);
        disabled.enabled = false;
        let worlds = vec![
            ("alpha".to_string(), WorldSpec::new("alpha", 19133, 19134)),
            ("beta".to_string(), WorldSpec::new("beta", 19150, 19151)),
            ("gamma".to_string(), disabled),
        ];
        for h in sup.start_all_enabled(worlds.clone()) {
            h.await.unwrap();
        }
        assert!(sup.is_enabled("alpha").await);
        assert!(sup.is_enabled("beta").await);
        assert!(!sup.is_enabled("gamma").await);

        for h in sup.stop_all_enabled(worlds) {
            h.await.unwrap();
        }
        assert!(sup.list().await.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn plugin_payload_lands_in_world_dir() {
        let root = temp_dir_for("plugins");
        let (sup, _) = supervisor(&root, CONSOLE_SCRIPT);
        let payload = &sup.settings().plugin_payload_dir;
        std::fs::create_dir_all(payload).unwrap();
        std::fs::write(payload.join("Multiworld.jar"), b"jar").unwrap();

        sup.start_world("alpha", &WorldSpec::new("alpha", 19133, 19134))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.join("worlds/alpha/plugins/Multiworld.jar")).unwrap(),
            b"jar"
        );
        sup.shutdown().await;

        let _ = std::fs::remove_dir_all(&root);
    }
}
