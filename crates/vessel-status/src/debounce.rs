//! Coalesces rapid state changes into one emission per window

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type Emit<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct State<T> {
    pending: Option<T>,
    last_sent: Option<T>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is cancelled, so a timer that already woke up
    /// but lost the race for the lock does nothing.
    generation: u64,
}

impl<T> State<T> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Debounced emitter.
///
/// [`Debouncer::update`] records the latest value and emits it once the
/// window elapses, unless it equals what was last emitted.
/// [`Debouncer::immediate`] skips the window entirely.
pub struct Debouncer<T> {
    state: Arc<Mutex<State<T>>>,
    window: Duration,
    emit: Emit<T>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            window: self.window,
            emit: Arc::clone(&self.emit),
        }
    }
}

impl<T> Debouncer<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new(window: Duration, emit: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pending: None,
                last_sent: None,
                timer: None,
                generation: 0,
            })),
            window,
            emit: Arc::new(emit),
        }
    }

    /// Records `next` as the pending value. `None` means "nothing to show",
    /// and an expiring window then emits nothing.
    pub fn update(&self, next: Option<T>) {
        let mut state = self.state.lock();
        if state.pending == next {
            return;
        }
        state.pending = next;

        if state.timer.is_some() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("No runtime for debounce timer, flushing now");
            flush(&mut state, self.emit.as_ref());
            return;
        };

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let emit = Arc::clone(&self.emit);
        let window = self.window;
        state.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let mut state = shared.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            flush(&mut state, emit.as_ref());
        }));
    }

    /// Emits `value` now, cancelling any pending window.
    pub fn immediate(&self, value: T) {
        let mut state = self.state.lock();
        if state.pending.as_ref() == Some(&value) && state.last_sent.as_ref() == Some(&value) {
            return;
        }

        state.cancel_timer();
        state.pending = Some(value);
        flush(&mut state, self.emit.as_ref());
    }

    /// Forgets everything: pending value, last emission and running timer.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cancel_timer();
        state.pending = None;
        state.last_sent = None;
    }

    pub fn pending(&self) -> Option<T> {
        self.state.lock().pending.clone()
    }

    pub fn last_sent(&self) -> Option<T> {
        self.state.lock().last_sent.clone()
    }

    pub fn is_waiting(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

fn flush<T: Clone + PartialEq>(state: &mut State<T>, emit: &(dyn Fn(&T) + Send + Sync)) {
    let Some(value) = state.pending.clone() else {
        return;
    };
    if state.last_sent.as_ref() == Some(&value) {
        return;
    }
    emit(&value);
    state.last_sent = Some(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    fn recording() -> (Debouncer<&'static str>, Arc<Mutex<Vec<&'static str>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let debouncer = Debouncer::new(WINDOW, move |value: &&'static str| sink.lock().push(*value));
        (debouncer, sent)
    }

    async fn elapse(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_emits_only_the_last_value() {
        let (debouncer, sent) = recording();

        debouncer.update(Some("a"));
        elapse(Duration::from_millis(30)).await;
        debouncer.update(Some("b"));
        elapse(Duration::from_millis(30)).await;
        debouncer.update(Some("c"));
        assert!(sent.lock().is_empty());

        elapse(WINDOW).await;
        assert_eq!(*sent.lock(), vec!["c"]);
        assert!(!debouncer.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_value_is_not_re_emitted() {
        let (debouncer, sent) = recording();

        debouncer.update(Some("idle"));
        elapse(WINDOW * 2).await;
        debouncer.update(Some("muted"));
        debouncer.update(Some("idle"));
        elapse(WINDOW * 2).await;

        assert_eq!(*sent.lock(), vec!["idle"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_bypasses_and_cancels_window() {
        let (debouncer, sent) = recording();

        debouncer.update(Some("idle"));
        debouncer.immediate("speaking");
        assert_eq!(*sent.lock(), vec!["speaking"]);
        assert!(!debouncer.is_waiting());

        elapse(WINDOW * 2).await;
        assert_eq!(*sent.lock(), vec!["speaking"]);

        debouncer.immediate("speaking");
        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_pending_emits_nothing() {
        let (debouncer, sent) = recording();

        debouncer.update(Some("idle"));
        debouncer.update(None);
        elapse(WINDOW * 2).await;

        assert!(sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forgets_last_emission() {
        let (debouncer, sent) = recording();

        debouncer.immediate("idle");
        debouncer.update(Some("muted"));
        debouncer.reset();
        elapse(WINDOW * 2).await;
        assert_eq!(*sent.lock(), vec!["idle"]);

        debouncer.update(Some("idle"));
        elapse(WINDOW * 2).await;
        assert_eq!(*sent.lock(), vec!["idle", "idle"]);
    }

    #[test]
    fn test_without_runtime_flushes_synchronously() {
        let (debouncer, sent) = recording();
        debouncer.update(Some("idle"));
        assert_eq!(*sent.lock(), vec!["idle"]);
    }
}
