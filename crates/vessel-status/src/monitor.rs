//! Polling status pushes for views that display live state

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use vessel_bus::vocabulary::events;
use vessel_bus::{Subscription, ViewOpen, ViewSpec, ViewTable};

use crate::error::StatusError;
use crate::snapshot::SnapshotGate;
use crate::Result;

/// Something whose current state can be read on demand.
pub trait StatusSource: Send + Sync + 'static {
    fn snapshot(&self) -> anyhow::Result<Value>;
}

/// One view's diff state plus its closed flag.
struct Feed {
    gate: Mutex<SnapshotGate>,
    /// Set on release without taking `gate`, which a push may be holding
    closed: AtomicBool,
}

type Gate = Arc<Feed>;

/// Opens status views and keeps them fed.
///
/// Each view gets its own [`SnapshotGate`] and poll task. Both are bound to
/// the view, so closing it (from either side) stops the polling and no push
/// starts afterwards.
#[derive(Clone)]
pub struct StatusMonitor {
    views: ViewTable,
    source: Arc<dyn StatusSource>,
    interval: Duration,
    gates: Arc<Mutex<HashMap<String, Gate>>>,
}

impl StatusMonitor {
    pub fn new(views: ViewTable, source: Arc<dyn StatusSource>, interval: Duration) -> Self {
        Self {
            views,
            source,
            interval,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens (or focuses) the status view `name`. A freshly created view
    /// receives the current snapshot right away and then on every change.
    pub fn open(&self, name: &str, spec: &ViewSpec) -> Result<ViewOpen> {
        let runtime = Handle::try_current().map_err(|_| StatusError::NoRuntime)?;
        let opened = self.views.open(name, spec)?;
        if !opened.is_created() {
            return Ok(opened);
        }

        let gate: Gate = Arc::new(Feed {
            gate: Mutex::new(SnapshotGate::new()),
            closed: AtomicBool::new(false),
        });
        self.gates.lock().insert(name.to_string(), Arc::clone(&gate));
        push_if_changed(&self.views, name, self.source.as_ref(), &gate);

        let task = runtime.spawn(poll(
            self.views.clone(),
            name.to_string(),
            Arc::clone(&self.source),
            Arc::clone(&gate),
            self.interval,
        ));

        let gates = Arc::downgrade(&self.gates);
        let key = name.to_string();
        let bound = self.views.bind(
            name,
            Subscription::new(format!("status-poll:{name}"), move || {
                gate.closed.store(true, Ordering::SeqCst);
                task.abort();
                if let Some(gates) = gates.upgrade() {
                    let mut gates = gates.lock();
                    if gates.get(&key).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
                        gates.remove(&key);
                    }
                }
            }),
        );
        if !bound {
            tracing::debug!(view = %name, "Status view closed before polling started");
        }

        Ok(opened)
    }

    pub fn close(&self, name: &str) -> bool {
        self.views.close(name)
    }

    /// Reads the source once and pushes if the view needs it.
    /// Used after actions that are known to change the status.
    pub fn refresh(&self, name: &str) -> bool {
        let gate = self.gates.lock().get(name).cloned();
        match gate {
            Some(gate) => push_if_changed(&self.views, name, self.source.as_ref(), &gate),
            None => false,
        }
    }

    /// Number of views currently being polled.
    pub fn watched(&self) -> usize {
        self.gates.lock().len()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

async fn poll(
    views: ViewTable,
    name: String,
    source: Arc<dyn StatusSource>,
    gate: Gate,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if gate.closed.load(Ordering::SeqCst) {
            break;
        }
        push_if_changed(&views, &name, source.as_ref(), &gate);
    }
}

/// One tick. The gate stays locked across the push so two ticks never send
/// the same snapshot; the host may close the view from inside `push`.
fn push_if_changed(views: &ViewTable, name: &str, source: &dyn StatusSource, feed: &Feed) -> bool {
    let mut gate = feed.gate.lock();
    if feed.closed.load(Ordering::SeqCst) {
        return false;
    }

    let snapshot = match source.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(view = %name, error = %e, "Failed to read status");
            return false;
        }
    };

    let json = match gate.changed(&snapshot) {
        Ok(Some(json)) => json,
        Ok(None) => return false,
        Err(e) => {
            tracing::warn!(view = %name, error = %e, "Failed to serialize status");
            return false;
        }
    };

    match views.push(name, events::STATUS, snapshot) {
        Ok(()) => {
            gate.record(json);
            tracing::trace!(view = %name, "Pushed status");
            true
        }
        Err(e) => {
            tracing::debug!(view = %name, error = %e, "Status push failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use vessel_bus::{ViewHost, ViewId};

    #[derive(Default)]
    struct RecordingHost {
        next: Mutex<u64>,
        alive: Mutex<HashSet<ViewId>>,
        pushes: Mutex<Vec<(ViewId, String, Value)>>,
    }

    impl RecordingHost {
        fn pushes_to(&self, id: ViewId) -> Vec<Value> {
            self.pushes
                .lock()
                .iter()
                .filter(|(view, _, _)| *view == id)
                .map(|(_, _, payload)| payload.clone())
                .collect()
        }
    }

    impl ViewHost for RecordingHost {
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

    struct SharedStatus(Mutex<Value>);

    impl StatusSource for SharedStatus {
        fn snapshot(&self) -> anyhow::Result<Value> {
            Ok(self.0.lock().clone())
        }
    }

    const INTERVAL: Duration = Duration::from_millis(2000);

    fn monitor() -> (StatusMonitor, Arc<RecordingHost>, Arc<SharedStatus>) {
        let host = Arc::new(RecordingHost::default());
        let status = Arc::new(SharedStatus(Mutex::new(json!({ "running": true }))));
        let monitor = StatusMonitor::new(ViewTable::new(host.clone()), status.clone(), INTERVAL);
        (monitor, host, status)
    }

    async fn tick() {
        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
    }

    fn spec() -> ViewSpec {
        ViewSpec::new("Status", "status.html")
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_initial_snapshot_then_only_changes() {
        let (monitor, host, status) = monitor();
        let id = monitor.open("status", &spec()).unwrap().id();
        assert_eq!(host.pushes_to(id), vec![json!({ "running": true })]);

        tick().await;
        tick().await;
        assert_eq!(host.pushes_to(id).len(), 1);

        *status.0.lock() = json!({ "running": false });
        tick().await;
        assert_eq!(
            host.pushes_to(id),
            vec![json!({ "running": true }), json!({ "running": false })]
        );

        let pushes = host.pushes.lock();
        assert!(pushes.iter().all(|(_, channel, _)| channel == events::STATUS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_views_do_not_share_a_gate() {
        let (monitor, host, _status) = monitor();
        let first = monitor.open("status", &spec()).unwrap().id();
        let second = monitor.open("status-detached", &spec()).unwrap().id();

        assert_eq!(host.pushes_to(first).len(), 1);
        assert_eq!(host.pushes_to(second).len(), 1);
        assert_eq!(monitor.watched(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_focuses_without_another_poller() {
        let (monitor, host, _status) = monitor();
        let id = monitor.open("status", &spec()).unwrap().id();
        let again = monitor.open("status", &spec()).unwrap();

        assert!(!again.is_created());
        assert_eq!(again.id(), id);
        assert_eq!(monitor.watched(), 1);
        assert_eq!(host.pushes_to(id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_push_after_close() {
        let (monitor, host, status) = monitor();
        let id = monitor.open("status", &spec()).unwrap().id();

        assert!(monitor.close("status"));
        assert_eq!(monitor.watched(), 0);

        *status.0.lock() = json!({ "running": false });
        tick().await;
        tick().await;
        assert_eq!(host.pushes_to(id).len(), 1);
        assert!(!monitor.refresh("status"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_side_close_stops_polling() {
        let (monitor, host, status) = monitor();
        let id = monitor.open("status", &spec()).unwrap().id();

        host.alive.lock().remove(&id);
        // The host reports the close; the bound poller goes with the view.
        let views = monitor.views.clone();
        assert!(views.notify_closed(id));

        *status.0.lock() = json!({ "running": false });
        tick().await;
        assert_eq!(host.pushes_to(id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_goes_through_the_view_gate() {
        let (monitor, host, status) = monitor();
        let id = monitor.open("status", &spec()).unwrap().id();

        assert!(!monitor.refresh("status"));
        *status.0.lock() = json!({ "running": false, "restarting": true });
        assert!(monitor.refresh("status"));
        assert_eq!(host.pushes_to(id).len(), 2);
    }

    /// Reports the view closed from inside the push, like a host whose
    /// window died while an event was being delivered.
    #[derive(Default)]
    struct ClosesDuringPush {
        views: Mutex<Option<ViewTable>>,
        pushes: AtomicUsize,
    }

    impl ViewHost for ClosesDuringPush {
        fn create(&self, _spec: &ViewSpec) -> vessel_bus::Result<ViewId> {
            Ok(ViewId(1))
        }

        fn focus(&self, _id: ViewId) -> vessel_bus::Result<()> {
            Ok(())
        }

        fn close(&self, _id: ViewId) -> vessel_bus::Result<()> {
            Ok(())
        }

        fn is_alive(&self, _id: ViewId) -> bool {
            true
        }

        fn push(&self, id: ViewId, _channel: &str, _payload: Value) -> vessel_bus::Result<()> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            let views = self.views.lock().take();
            if let Some(views) = views {
                views.notify_closed(id);
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_may_close_view_during_push() {
        let host = Arc::new(ClosesDuringPush::default());
        let status = Arc::new(SharedStatus(Mutex::new(json!({ "running": true }))));
        let views = ViewTable::new(host.clone());
        let monitor = StatusMonitor::new(views.clone(), status.clone(), INTERVAL);
        monitor.open("status", &spec()).unwrap();
        *host.views.lock() = Some(views);

        *status.0.lock() = json!({ "running": false });
        assert!(monitor.refresh("status"));
        assert_eq!(monitor.watched(), 0);

        *status.0.lock() = json!({ "running": true, "restarting": true });
        tick().await;
        assert_eq!(host.pushes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_open_requires_runtime() {
        let (monitor, _host, _status) = monitor();
        assert!(matches!(
            monitor.open("status", &spec()),
            Err(StatusError::NoRuntime)
        ));
    }
}
