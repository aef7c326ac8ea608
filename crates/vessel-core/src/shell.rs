//! The owning context object of the core process

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vessel_bus::{
    BusClient, CommandResult, CommandServer, HandlerRegistry, ViewHost, ViewId, ViewOpen,
    ViewSpec, ViewTable,
};
use vessel_fetch::Fetcher;
use vessel_status::{
    BusVoiceSink, IconSink, StatusMonitor, StatusSource, TrayIndicator, VoiceTracker,
};
use vessel_storage::Database;
use vessel_updater::{ReleaseFeedBackend, UpdateBackend, UpdateOrchestrator};

use crate::config::Config;
use crate::Result;

/// Actor name of the status panel view.
pub const STATUS_VIEW: &str = "status";

/// Platform services the shell calls into.
#[derive(Clone)]
pub struct Services {
    pub host: Arc<dyn ViewHost>,
    pub icons: Arc<dyn IconSink>,
    pub status: Arc<dyn StatusSource>,
}

/// Core application state
///
/// Every process-wide singleton lives here and is handed explicitly to the
/// components that need it.
pub struct Shell {
    config: Config,
    db: Database,
    registry: HandlerRegistry,
    server: CommandServer,
    views: ViewTable,
    updater: UpdateOrchestrator,
    status: StatusMonitor,
    tray: TrayIndicator,
    shut_down: AtomicBool,
}

impl Shell {
    /// Opens the settings database and checks for updates against the
    /// configured release feed.
    pub fn new(config: Config, services: Services) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;

        let backend = ReleaseFeedBackend::new(
            Fetcher::new()?,
            config.release_feed_url.clone(),
            config.current_version.clone(),
            config.staging_dir.clone(),
        );
        Self::with_parts(config, db, services, Arc::new(backend))
    }

    pub fn with_parts(
        config: Config,
        db: Database,
        services: Services,
        backend: Arc<dyn UpdateBackend>,
    ) -> Result<Self> {
        let registry = HandlerRegistry::new();
        let server = CommandServer::new(registry.clone());
        let views = ViewTable::new(services.host);

        let updater = UpdateOrchestrator::new(
            backend,
            views.clone(),
            registry.clone(),
            db.clone(),
            config.updater_settings(),
        );
        updater.register_handlers()?;

        let status =
            StatusMonitor::new(views.clone(), services.status, config.status_poll_interval());

        let tray = TrayIndicator::new(services.icons);
        tray.register_handlers(&registry)?;

        tracing::info!(
            version = %config.current_version,
            handlers = registry.len(),
            "Shell initialized"
        );

        Ok(Self {
            config,
            db,
            registry,
            server,
            views,
            updater,
            status,
            tray,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Kicks off background work: the startup update check and, if
    /// configured, periodic checks. Must run inside the runtime.
    pub fn start(&self) {
        self.updater.spawn_startup_check();
        self.updater.start_periodic();
    }

    /// A new bus connection for a view. Failing here is the one fatal error
    /// of the control plane.
    pub fn connect_view(&self) -> Result<BusClient> {
        Ok(self.server.connect()?)
    }

    /// Entry point for views speaking JSON frames instead of a [`BusClient`].
    pub async fn handle_frame(&self, raw: &str) -> Option<CommandResult> {
        self.server.handle_frame(raw).await
    }

    pub fn open_status_view(&self) -> Result<ViewOpen> {
        let spec = ViewSpec::new("Vessel Status", "status/index.html").size(480, 360);
        Ok(self.status.open(STATUS_VIEW, &spec)?)
    }

    /// View-side voice tracking that reports to this shell over `client`.
    pub fn voice_tracker(&self, client: BusClient) -> VoiceTracker {
        VoiceTracker::new(Arc::new(BusVoiceSink::spawn(client)), self.config.debounce_window())
    }

    /// Called by the host whenever one of its views is gone.
    pub fn notify_view_closed(&self, id: ViewId) -> bool {
        self.views.notify_closed(id)
    }

    /// Process-wide teardown. Safe to call from several shutdown paths;
    /// only the first call does anything.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.updater.shutdown();
        self.views.close_all();
        tracing::info!("Shell shut down");
        true
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn views(&self) -> &ViewTable {
        &self.views
    }

    pub fn updater(&self) -> &UpdateOrchestrator {
        &self.updater
    }

    pub fn status(&self) -> &StatusMonitor {
        &self.status
    }

    pub fn tray(&self) -> &TrayIndicator {
        &self.tray
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use vessel_bus::{vocabulary, Subscription};
    use vessel_status::{TrayVariant, VoiceEvent};
    use vessel_updater::{ListenerSet, UpdateInfo, UpdateState, UPDATER_VIEW};

    struct StaticFeed {
        version: Option<&'static str>,
        progress: ListenerSet<f64>,
        errors: ListenerSet<str>,
    }

    #[async_trait]
    impl UpdateBackend for StaticFeed {
        async fn check(&self) -> vessel_updater::Result<Option<UpdateInfo>> {
            Ok(self
                .version
                .map(|version| UpdateInfo::new(version, "https://example.invalid")))
        }

        async fn download(&self, _update: &UpdateInfo) -> vessel_updater::Result<PathBuf> {
            Ok(PathBuf::from("/tmp/vessel-setup"))
        }

        fn quit_and_install(&self, _installer: &Path) -> vessel_updater::Result<()> {
            Ok(())
        }

        fn on_progress(&self, listener: Box<dyn Fn(&f64) + Send + Sync>) -> Subscription {
            self.progress.subscribe(listener)
        }

        fn on_error(&self, listener: Box<dyn Fn(&str) + Send + Sync>) -> Subscription {
            self.errors.subscribe(listener)
        }
    }

    #[derive(Default)]
    struct Host {
        next: Mutex<u64>,
        alive: Mutex<HashSet<ViewId>>,
        pushes: Mutex<Vec<(ViewId, String, Value)>>,
    }

    impl ViewHost for Host {
        fn create(&self, _spec: &ViewSpec) -> vessel_bus::Result<ViewId> {
            let mut next = self.next.lock();
            *next += 1;
            let id = ViewId(*next);
            self.alive.lock().insert(id);
            Ok(id)
        }

        fn focus(&self, _id: ViewId) -> vessel_bus::Result<()> {
            Ok(())
        }

        fn close(&self, id: ViewId) -> vessel_bus::Result<()> {
            self.alive.lock().remove(&id);
            Ok(())
        }

        fn is_alive(&self, id: ViewId) -> bool {
            self.alive.lock().contains(&id)
        }

        fn push(&self, id: ViewId, channel: &str, payload: Value) -> vessel_bus::Result<()> {
            self.pushes.lock().push((id, channel.to_string(), payload));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Icons(Mutex<Vec<TrayVariant>>);

    impl IconSink for Icons {
        fn set_icon(&self, variant: TrayVariant) {
            self.0.lock().push(variant);
        }
    }

    struct Presence;

    impl StatusSource for Presence {
        fn snapshot(&self) -> anyhow::Result<Value> {
            Ok(json!({ "status": "online", "activities": [] }))
        }
    }

    struct Harness {
        shell: Shell,
        host: Arc<Host>,
        icons: Arc<Icons>,
    }

    fn harness(version: Option<&'static str>) -> Harness {
        let host = Arc::new(Host::default());
        let icons = Arc::new(Icons::default());
        let services = Services {
            host: host.clone(),
            icons: icons.clone(),
            status: Arc::new(Presence),
        };
        let backend = Arc::new(StaticFeed {
            version,
            progress: ListenerSet::new("download-progress"),
            errors: ListenerSet::new("error"),
        });
        let shell = Shell::with_parts(
            Config::new(PathBuf::from("/unused")),
            Database::open_in_memory().unwrap(),
            services,
            backend,
        )
        .unwrap();
        Harness { shell, host, icons }
    }

    async fn eventually(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_registers_process_wide_handlers() {
        let h = harness(None);
        let registry = h.shell.registry();

        for name in [
            vocabulary::UPDATER_IS_OUTDATED,
            vocabulary::UPDATER_OPEN,
            vocabulary::VOICE_STATE_CHANGED,
            vocabulary::VOICE_CALL_STATE_CHANGED,
            vocabulary::QUERY_IS_IN_CALL,
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
        assert!(!registry.contains(vocabulary::UPDATER_INSTALL));
    }

    #[tokio::test]
    async fn test_updater_open_over_the_bus() {
        let h = harness(Some("9.0.0"));
        let client = h.shell.connect_view().unwrap();

        let available: bool = client
            .invoke_as(vocabulary::UPDATER_OPEN, Value::Null)
            .await
            .unwrap();

        assert!(available);
        assert!(h.shell.views().is_open(UPDATER_VIEW));
        assert_eq!(h.shell.updater().state(), UpdateState::Available);
    }

    #[tokio::test]
    async fn test_startup_check_without_update_stays_quiet() {
        let h = harness(None);
        h.shell.start();
        let client = h.shell.connect_view().unwrap();

        let outdated: bool = client
            .invoke_as(vocabulary::UPDATER_IS_OUTDATED, Value::Null)
            .await
            .unwrap();

        assert!(!outdated);
        assert!(!h.shell.views().is_open(UPDATER_VIEW));
    }

    #[tokio::test]
    async fn test_voice_events_reach_the_tray() {
        let h = harness(None);
        let tracker = h.shell.voice_tracker(h.shell.connect_view().unwrap());

        tracker.handle(VoiceEvent::CallConnected);
        eventually(|| h.shell.tray().current() == TrayVariant::TrayIdle).await;

        tracker.handle(VoiceEvent::Speaking(true));
        eventually(|| h.shell.tray().current() == TrayVariant::TraySpeaking).await;

        tracker.handle(VoiceEvent::CallDisconnected);
        eventually(|| h.shell.tray().current() == TrayVariant::Tray).await;

        assert_eq!(
            *h.icons.0.lock(),
            vec![
                TrayVariant::Tray,
                TrayVariant::TrayIdle,
                TrayVariant::TraySpeaking,
                TrayVariant::Tray,
            ]
        );
    }

    #[tokio::test]
    async fn test_frames_are_answered() {
        let h = harness(None);
        let frame = json!({
            "name": vocabulary::QUERY_IS_IN_CALL,
            "nonce": "frame-1",
            "payload": null,
        });

        let result = h.shell.handle_frame(&frame.to_string()).await.unwrap();
        assert_eq!(result.nonce, "frame-1");
        assert!(result.ok);
        assert_eq!(result.data, json!(false));
    }

    #[tokio::test]
    async fn test_status_view_gets_initial_snapshot() {
        let h = harness(None);
        let id = h.shell.open_status_view().unwrap().id();

        let pushes = h.host.pushes.lock();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, id);
        assert_eq!(pushes[0].1, vocabulary::events::STATUS);
    }

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let h = harness(Some("9.0.0"));
        h.shell.updater().check_for_updates(vessel_updater::CheckTrigger::Manual).await;
        h.shell.open_status_view().unwrap();

        assert!(h.shell.shutdown());
        assert!(!h.shell.shutdown());

        assert!(!h.shell.views().is_open(UPDATER_VIEW));
        assert!(!h.shell.views().is_open(STATUS_VIEW));
        assert!(!h.shell.registry().contains(vocabulary::UPDATER_OPEN));
        assert_eq!(h.shell.status().watched(), 0);
    }
}
