//! Update cycle controller and the updater view it drives

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use vessel_bus::vocabulary::{self, events};
use vessel_bus::{handler_fn, HandlerRegistry, Subscription, ViewOpen, ViewSpec, ViewTable};
use vessel_storage::Database;

use crate::backend::{UpdateBackend, UpdateInfo};
use crate::decision::UpdateDecision;
use crate::error::UpdateError;
use crate::state::UpdateState;
use crate::Result;

/// Actor name of the update prompt view.
pub const UPDATER_VIEW: &str = "updater";

#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    pub current_version: String,
    pub check_timeout: Duration,
    pub download_timeout: Duration,
    /// Pause between a finished download and launching the installer
    pub install_delay: Duration,
    pub snooze_duration: Duration,
    /// Background re-checks; `None` checks only at startup and on request
    pub check_interval: Option<Duration>,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            check_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(5 * 60),
            install_delay: Duration::from_millis(100),
            snooze_duration: Duration::from_secs(24 * 60 * 60),
            check_interval: None,
        }
    }
}

/// What started a check. Only manual checks ignore snooze and ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Startup,
    Periodic,
    Manual,
}

impl CheckTrigger {
    fn honors_decision(&self) -> bool {
        !matches!(self, CheckTrigger::Manual)
    }
}

struct Inner {
    backend: Arc<dyn UpdateBackend>,
    views: ViewTable,
    registry: HandlerRegistry,
    db: Database,
    settings: UpdaterSettings,
    state: watch::Sender<UpdateState>,
    /// Result of the last finished check
    latest: Mutex<Option<UpdateInfo>>,
    /// Installer of the last finished download
    installer: Mutex<Option<PathBuf>>,
    install_timer: Mutex<Option<JoinHandle<()>>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    /// Process-wide handlers, released on shutdown
    handlers: Mutex<Vec<Subscription>>,
    shut_down: AtomicBool,
}

/// Owns the single update cycle of the process.
///
/// Everything tied to the updater view (its command handlers and the backend
/// listeners forwarding progress and errors) is bound to the view in the
/// [`ViewTable`], so it is released whenever the view goes away.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

impl UpdateOrchestrator {
    pub fn new(
        backend: Arc<dyn UpdateBackend>,
        views: ViewTable,
        registry: HandlerRegistry,
        db: Database,
        settings: UpdaterSettings,
    ) -> Self {
        let (state, _) = watch::channel(UpdateState::Idle);
        Self {
            inner: Arc::new(Inner {
                backend,
                views,
                registry,
                db,
                settings,
                state,
                latest: Mutex::new(None),
                installer: Mutex::new(None),
                install_timer: Mutex::new(None),
                periodic: Mutex::new(None),
                handlers: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> UpdateState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.inner.state.subscribe()
    }

    pub fn latest(&self) -> Option<UpdateInfo> {
        self.inner.latest.lock().clone()
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.inner.settings
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Registers `updater-is-outdated` and `updater-open`.
    pub fn register_handlers(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let outdated = self.inner.registry.register_scoped(
            vocabulary::UPDATER_IS_OUTDATED,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                async move {
                    let updater = upgrade(&weak)?;
                    Ok(json!(updater.is_outdated().await))
                }
            }),
        )?;

        let weak = Arc::downgrade(&self.inner);
        let open = self.inner.registry.register_scoped(
            vocabulary::UPDATER_OPEN,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                async move {
                    let updater = upgrade(&weak)?;
                    let available = updater.check_for_updates(CheckTrigger::Manual).await;
                    Ok(json!(available))
                }
            }),
        )?;

        self.inner.handlers.lock().extend([outdated, open]);
        Ok(())
    }

    /// Runs the startup check in the background.
    pub fn spawn_startup_check(&self) -> JoinHandle<bool> {
        let updater = self.clone();
        tokio::spawn(async move { updater.check_for_updates(CheckTrigger::Startup).await })
    }

    /// Starts background checks if an interval is configured.
    pub fn start_periodic(&self) -> bool {
        let Some(interval) = self.inner.settings.check_interval else {
            return false;
        };
        if self.is_shut_down() {
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut periodic = self.inner.periodic.lock();
        if let Some(previous) = periodic.take() {
            previous.abort();
        }
        *periodic = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                UpdateOrchestrator { inner }
                    .check_for_updates(CheckTrigger::Periodic)
                    .await;
            }
        }));

        tracing::info!(interval_secs = interval.as_secs(), "Periodic update checks enabled");
        true
    }

    /// Asks the backend for a newer release, bounded by the check timeout.
    ///
    /// A failed or timed-out check counts as "no update" for this cycle: it
    /// is logged, the state moves to `Failed` and `false` is returned.
    pub async fn check_for_updates(&self, trigger: CheckTrigger) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let current = self.state();
        if current.is_busy() && !self.install_stalled() {
            tracing::debug!(state = %current, ?trigger, "Update in progress, skipping check");
            return self.inner.latest.lock().is_some();
        }

        self.transition(UpdateState::CheckPending);
        self.inner.installer.lock().take();
        let timeout = self.inner.settings.check_timeout;
        let outcome = match tokio::time::timeout(timeout, self.inner.backend.check()).await {
            Ok(result) => result,
            Err(_) => Err(UpdateError::Timeout {
                operation: "Update check",
                after: timeout,
            }),
        };

        match outcome {
            Ok(Some(update)) => {
                *self.inner.latest.lock() = Some(update.clone());
                self.transition(UpdateState::Available);
                self.surface(update, trigger);
                true
            }
            Ok(None) => {
                *self.inner.latest.lock() = None;
                self.transition(UpdateState::Idle);
                false
            }
            Err(e) => {
                tracing::warn!(?trigger, error = %e, "Failed to check for updates");
                *self.inner.latest.lock() = None;
                self.transition(UpdateState::Failed);
                false
            }
        }
    }

    /// Whether the last check found an update. Waits for a check that is
    /// still running, up to the check timeout.
    pub async fn is_outdated(&self) -> bool {
        let mut state = self.subscribe();
        let settled = tokio::time::timeout(
            self.inner.settings.check_timeout,
            state.wait_for(|state| *state != UpdateState::CheckPending),
        )
        .await
        .is_ok();
        if !settled {
            tracing::debug!("Update check still pending");
        }
        self.inner.latest.lock().is_some()
    }

    /// Opens the updater view for `update`, or focuses it if it is open.
    pub fn open_window(&self, update: UpdateInfo) -> Result<ViewOpen> {
        if self.is_shut_down() {
            return Err(UpdateError::ShutDown);
        }

        let spec = ViewSpec::new("Vessel Updater", "updater/index.html")
            .min_size(750, 400)
            .params(serde_json::to_value(&update)?);
        let opened = self.inner.views.open(UPDATER_VIEW, &spec)?;

        if opened.is_created() {
            if let Err(e) = self.bind_window(update) {
                tracing::error!(error = %e, "Failed to wire updater view");
                self.inner.views.close(UPDATER_VIEW);
                return Err(e);
            }
        }
        Ok(opened)
    }

    pub fn close_window(&self) -> bool {
        self.inner.views.close(UPDATER_VIEW)
    }

    /// Downloads `update` within the download timeout, then schedules the
    /// installer. When the download already finished but launching the
    /// installer failed, launching is retried without downloading again.
    pub async fn install(&self, update: UpdateInfo) -> Result<()> {
        if self.is_shut_down() {
            return Err(UpdateError::ShutDown);
        }

        let from = self.state();
        if from == UpdateState::Downloaded {
            if self.inner.install_timer.lock().is_some() {
                return Ok(());
            }
            let installer = self.inner.installer.lock().clone();
            if let Some(installer) = installer {
                tracing::info!(installer = %installer.display(), "Retrying installer launch");
                self.schedule_install(installer);
                return Ok(());
            }
        }
        if from.is_busy() || !self.transition(UpdateState::Downloading) {
            return Err(UpdateError::InvalidTransition {
                from,
                to: UpdateState::Downloading,
            });
        }

        let timeout = self.inner.settings.download_timeout;
        match tokio::time::timeout(timeout, self.inner.backend.download(&update)).await {
            Ok(Ok(installer)) => {
                *self.inner.installer.lock() = Some(installer.clone());
                self.transition(UpdateState::Downloaded);
                self.schedule_install(installer);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!(version = %update.version, error = %e, "Failed to download update");
                self.transition(UpdateState::Failed);
                Err(e)
            }
            Err(_) => {
                let e = UpdateError::Timeout {
                    operation: "Download",
                    after: timeout,
                };
                tracing::error!(version = %update.version, error = %e, "Failed to download update");
                self.transition(UpdateState::Failed);
                // The backend never finished, so it reported nothing itself
                self.push_to_window(events::ERROR, json!(e.to_string()));
                Err(e)
            }
        }
    }

    /// Hides prompts for the snooze duration and closes the view.
    pub fn snooze(&self) -> Result<()> {
        let mut decision = UpdateDecision::load(&self.inner.db)?;
        let duration = chrono::Duration::from_std(self.inner.settings.snooze_duration)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        decision.snooze(Utc::now(), duration);
        decision.save(&self.inner.db)?;

        tracing::info!(until = ?decision.snooze_until, "Update snoozed");
        self.dismiss();
        Ok(())
    }

    /// Never prompts for `version` again and closes the view.
    pub fn ignore(&self, version: &str) -> Result<()> {
        let mut decision = UpdateDecision::load(&self.inner.db)?;
        decision.ignore(version);
        decision.save(&self.inner.db)?;

        tracing::info!(version = %version, "Update ignored");
        self.dismiss();
        Ok(())
    }

    /// Cancels the install timer and periodic checks, closes the view and
    /// releases every handler and listener. Only the first call does
    /// anything.
    pub fn shutdown(&self) -> bool {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(timer) = self.inner.install_timer.lock().take() {
            timer.abort();
        }
        if let Some(task) = self.inner.periodic.lock().take() {
            task.abort();
        }

        self.inner.views.close(UPDATER_VIEW);

        let handlers: Vec<Subscription> = self.inner.handlers.lock().drain(..).collect();
        for handler in handlers.iter().rev() {
            handler.release();
        }

        tracing::info!("Updater shut down");
        true
    }

    fn surface(&self, update: UpdateInfo, trigger: CheckTrigger) {
        if trigger.honors_decision() {
            match UpdateDecision::load(&self.inner.db) {
                Ok(decision) if decision.suppresses(&update.version, Utc::now()) => {
                    tracing::info!(version = %update.version, "Update prompt suppressed by user decision");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read update decision");
                }
            }
        }

        if let Err(e) = self.open_window(update) {
            tracing::warn!(error = %e, "Failed to open updater view");
        }
    }

    fn bind_window(&self, update: UpdateInfo) -> Result<()> {
        let inner = &self.inner;
        let update = Arc::new(update);
        let mut resources = Vec::new();

        let weak = Arc::downgrade(inner);
        let data = Arc::clone(&update);
        resources.push(inner.registry.register_scoped(
            vocabulary::UPDATER_GET_DATA,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                let data = Arc::clone(&data);
                async move {
                    let updater = upgrade(&weak)?;
                    Ok(json!({
                        "update": *data,
                        "version": updater.inner.settings.current_version,
                    }))
                }
            }),
        )?);

        let weak = Arc::downgrade(inner);
        let target = Arc::clone(&update);
        resources.push(inner.registry.register_scoped(
            vocabulary::UPDATER_INSTALL,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                let target = Arc::clone(&target);
                async move {
                    let updater = upgrade(&weak)?;
                    updater.install((*target).clone()).await?;
                    Ok(Value::Null)
                }
            }),
        )?);

        let weak = Arc::downgrade(inner);
        resources.push(inner.registry.register_scoped(
            vocabulary::UPDATER_SNOOZE,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.snooze()?;
                    Ok(Value::Null)
                }
            }),
        )?);

        let weak = Arc::downgrade(inner);
        let version = update.version.clone();
        resources.push(inner.registry.register_scoped(
            vocabulary::UPDATER_IGNORE,
            handler_fn(move |_payload: Value| {
                let weak = weak.clone();
                let version = version.clone();
                async move {
                    upgrade(&weak)?.ignore(&version)?;
                    Ok(Value::Null)
                }
            }),
        )?);

        let views = inner.views.clone();
        resources.push(inner.backend.on_progress(Box::new(move |percent: &f64| {
            if let Err(e) = views.push(UPDATER_VIEW, events::DOWNLOAD_PROGRESS, json!(percent)) {
                tracing::trace!(error = %e, "Dropped download progress");
            }
        })));

        let views = inner.views.clone();
        resources.push(inner.backend.on_error(Box::new(move |message: &str| {
            if let Err(e) = views.push(UPDATER_VIEW, events::ERROR, json!(message)) {
                tracing::trace!(error = %e, "Dropped updater error");
            }
        })));

        for resource in resources {
            if !inner.views.bind(UPDATER_VIEW, resource) {
                break;
            }
        }
        Ok(())
    }

    fn schedule_install(&self, installer: PathBuf) {
        if self.is_shut_down() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.install_delay;
        let mut timer = self.inner.install_timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.install_timer.lock().take();
            if inner.shut_down.load(Ordering::SeqCst) {
                return;
            }

            let updater = UpdateOrchestrator { inner };
            match updater.inner.backend.quit_and_install(&installer) {
                Ok(()) => {
                    updater.transition(UpdateState::Installing);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to quit and install");
                }
            }
        }));
    }

    /// Downloaded, but the installer launch failed and nothing is scheduled.
    fn install_stalled(&self) -> bool {
        self.state() == UpdateState::Downloaded && self.inner.install_timer.lock().is_none()
    }

    fn dismiss(&self) {
        self.inner.views.close(UPDATER_VIEW);
        self.transition(UpdateState::Idle);
    }

    fn push_to_window(&self, channel: &str, payload: Value) {
        if let Err(e) = self.inner.views.push(UPDATER_VIEW, channel, payload) {
            tracing::debug!(channel = %channel, error = %e, "Updater view not reachable");
        }
    }

    fn transition(&self, next: UpdateState) -> bool {
        let mut from = next;
        let applied = self.inner.state.send_if_modified(|state| {
            from = *state;
            if *state == next || !state.can_transition_to(next) {
                return false;
            }
            *state = next;
            true
        });

        if applied {
            tracing::debug!(from = %from, to = %next, "Update state changed");
        } else if from != next {
            tracing::warn!(from = %from, to = %next, "Ignoring invalid update state transition");
        }
        applied || from == next
    }
}

fn upgrade(weak: &Weak<Inner>) -> Result<UpdateOrchestrator> {
    weak.upgrade()
        .map(|inner| UpdateOrchestrator { inner })
        .ok_or(UpdateError::ShutDown)
}
