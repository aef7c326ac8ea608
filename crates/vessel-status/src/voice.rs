//! Voice call state on the view side, reduced to a tray variant

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vessel_bus::{vocabulary, BusClient};

use crate::debounce::Debouncer;
use crate::error::StatusError;

/// Icon shown in the tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrayVariant {
    Tray,
    TrayUnread,
    TrayIdle,
    TrayMuted,
    TrayDeafened,
    TraySpeaking,
}

impl TrayVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrayVariant::Tray => "tray",
            TrayVariant::TrayUnread => "trayUnread",
            TrayVariant::TrayIdle => "trayIdle",
            TrayVariant::TrayMuted => "trayMuted",
            TrayVariant::TrayDeafened => "trayDeafened",
            TrayVariant::TraySpeaking => "traySpeaking",
        }
    }

    /// Variants that only make sense during a call.
    pub fn is_voice(&self) -> bool {
        !matches!(self, TrayVariant::Tray | TrayVariant::TrayUnread)
    }
}

impl fmt::Display for TrayVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrayVariant {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tray" => Ok(TrayVariant::Tray),
            "trayUnread" => Ok(TrayVariant::TrayUnread),
            "trayIdle" => Ok(TrayVariant::TrayIdle),
            "trayMuted" => Ok(TrayVariant::TrayMuted),
            "trayDeafened" => Ok(TrayVariant::TrayDeafened),
            "traySpeaking" => Ok(TrayVariant::TraySpeaking),
            other => Err(StatusError::UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    CallConnected,
    CallDisconnected,
    SelfMute(bool),
    SelfDeaf(bool),
    Speaking(bool),
}

/// Where voice state goes once it has settled.
pub trait VoiceSink: Send + Sync {
    fn voice_state_changed(&self, variant: TrayVariant);
    fn voice_call_state_changed(&self, in_call: bool);
}

#[derive(Debug, Default)]
struct CallState {
    in_call: bool,
    muted: bool,
    deafened: bool,
    started_at: Option<DateTime<Utc>>,
}

impl CallState {
    fn variant(&self) -> Option<TrayVariant> {
        if !self.in_call {
            return None;
        }
        Some(if self.deafened {
            TrayVariant::TrayDeafened
        } else if self.muted {
            TrayVariant::TrayMuted
        } else {
            TrayVariant::TrayIdle
        })
    }
}

/// Folds raw voice events into tray variants.
///
/// Mute, deafen and speaking-stopped changes are debounced; speaking-started
/// is forwarded at once. Call connect and disconnect go straight to the sink.
pub struct VoiceTracker {
    state: Mutex<CallState>,
    tray: Debouncer<TrayVariant>,
    sink: Arc<dyn VoiceSink>,
}

impl VoiceTracker {
    pub fn new(sink: Arc<dyn VoiceSink>, window: Duration) -> Self {
        let forward = Arc::clone(&sink);
        Self {
            state: Mutex::new(CallState::default()),
            tray: Debouncer::new(window, move |variant: &TrayVariant| {
                forward.voice_state_changed(*variant)
            }),
            sink,
        }
    }

    pub fn handle(&self, event: VoiceEvent) {
        let mut state = self.state.lock();
        match event {
            VoiceEvent::CallConnected => {
                state.in_call = true;
                state.started_at = Some(Utc::now());
                self.sink.voice_call_state_changed(true);
                self.tray.update(state.variant());
            }
            VoiceEvent::CallDisconnected => {
                state.in_call = false;
                state.started_at = None;
                self.tray.reset();
                self.sink.voice_call_state_changed(false);
            }
            VoiceEvent::SelfMute(muted) => {
                state.muted = muted;
                if state.in_call {
                    self.tray.update(state.variant());
                }
            }
            VoiceEvent::SelfDeaf(deafened) => {
                state.deafened = deafened;
                if state.in_call {
                    self.tray.update(state.variant());
                }
            }
            VoiceEvent::Speaking(true) => {
                if state.in_call {
                    self.tray.immediate(TrayVariant::TraySpeaking);
                }
            }
            VoiceEvent::Speaking(false) => {
                self.tray.update(state.variant());
            }
        }
    }

    pub fn in_call(&self) -> bool {
        self.state.lock().in_call
    }

    /// When the current call connected, if there is one.
    pub fn call_started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    /// The variant the tray would settle on right now, ignoring speaking.
    pub fn settled_variant(&self) -> Option<TrayVariant> {
        self.state.lock().variant()
    }
}

/// Sends voice state to the core over the bus, in the order it was produced.
pub struct BusVoiceSink {
    queue: mpsc::UnboundedSender<(&'static str, serde_json::Value)>,
}

impl BusVoiceSink {
    /// Must be called inside a runtime; the forwarding task lives as long as
    /// the sink.
    pub fn spawn(client: BusClient) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<(&'static str, serde_json::Value)>();
        tokio::spawn(async move {
            while let Some((name, payload)) = rx.recv().await {
                if let Err(e) = client.invoke(name, payload).await {
                    tracing::warn!(command = %name, error = %e, "Failed to forward voice state");
                }
            }
        });
        Self { queue }
    }

    fn send(&self, name: &'static str, payload: serde_json::Value) {
        if self.queue.send((name, payload)).is_err() {
            tracing::debug!(command = %name, "Voice forwarder stopped");
        }
    }
}

impl VoiceSink for BusVoiceSink {
    fn voice_state_changed(&self, variant: TrayVariant) {
        self.send(vocabulary::VOICE_STATE_CHANGED, json!(variant));
    }

    fn voice_call_state_changed(&self, in_call: bool) {
        self.send(vocabulary::VOICE_CALL_STATE_CHANGED, json!(in_call));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use vessel_bus::{CommandServer, HandlerRegistry};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Variant(TrayVariant),
        InCall(bool),
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Seen>>);

    impl VoiceSink for RecordingSink {
        fn voice_state_changed(&self, variant: TrayVariant) {
            self.0.lock().push(Seen::Variant(variant));
        }

        fn voice_call_state_changed(&self, in_call: bool) {
            self.0.lock().push(Seen::InCall(in_call));
        }
    }

    const WINDOW: Duration = Duration::from_millis(100);

    fn tracker() -> (VoiceTracker, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (VoiceTracker::new(sink.clone(), WINDOW), sink)
    }

    async fn settle() {
        tokio::time::sleep(WINDOW * 2).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_variant_names_round_trip() {
        for variant in [
            TrayVariant::Tray,
            TrayVariant::TrayUnread,
            TrayVariant::TrayIdle,
            TrayVariant::TrayMuted,
            TrayVariant::TrayDeafened,
            TrayVariant::TraySpeaking,
        ] {
            assert_eq!(variant.as_str().parse::<TrayVariant>().unwrap(), variant);
            assert_eq!(json!(variant), json!(variant.as_str()));
        }
        assert!("trayLoud".parse::<TrayVariant>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_connect_settles_on_idle() {
        let (tracker, sink) = tracker();

        tracker.handle(VoiceEvent::CallConnected);
        assert!(tracker.in_call());
        assert!(tracker.call_started_at().is_some());
        settle().await;

        assert_eq!(
            *sink.0.lock(),
            vec![Seen::InCall(true), Seen::Variant(TrayVariant::TrayIdle)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_toggle_burst_collapses() {
        let (tracker, sink) = tracker();
        tracker.handle(VoiceEvent::CallConnected);
        settle().await;
        sink.0.lock().clear();

        tracker.handle(VoiceEvent::SelfMute(true));
        tracker.handle(VoiceEvent::SelfMute(false));
        tracker.handle(VoiceEvent::SelfDeaf(true));
        settle().await;

        assert_eq!(*sink.0.lock(), vec![Seen::Variant(TrayVariant::TrayDeafened)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_is_immediate_and_stop_is_debounced() {
        let (tracker, sink) = tracker();
        tracker.handle(VoiceEvent::CallConnected);
        settle().await;
        sink.0.lock().clear();

        tracker.handle(VoiceEvent::Speaking(true));
        assert_eq!(*sink.0.lock(), vec![Seen::Variant(TrayVariant::TraySpeaking)]);

        tracker.handle(VoiceEvent::Speaking(false));
        assert_eq!(sink.0.lock().len(), 1);
        settle().await;
        assert_eq!(
            *sink.0.lock(),
            vec![
                Seen::Variant(TrayVariant::TraySpeaking),
                Seen::Variant(TrayVariant::TrayIdle)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_outside_a_call_is_ignored() {
        let (tracker, sink) = tracker();
        tracker.handle(VoiceEvent::Speaking(true));
        tracker.handle(VoiceEvent::SelfMute(true));
        settle().await;
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_drops_pending_variant() {
        let (tracker, sink) = tracker();
        tracker.handle(VoiceEvent::CallConnected);
        tracker.handle(VoiceEvent::CallDisconnected);
        settle().await;

        assert_eq!(*sink.0.lock(), vec![Seen::InCall(true), Seen::InCall(false)]);
        assert_eq!(tracker.settled_variant(), None);
        assert!(tracker.call_started_at().is_none());
    }

    #[tokio::test]
    async fn test_bus_sink_forwards_in_order() {
        let registry = HandlerRegistry::new();
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        for name in [
            vocabulary::VOICE_STATE_CHANGED,
            vocabulary::VOICE_CALL_STATE_CHANGED,
        ] {
            let seen = Arc::clone(&seen);
            registry
                .register_fn(name, move |payload: Value| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push((name.to_string(), payload));
                        Ok(Value::Null)
                    }
                })
                .unwrap();
        }
        let client = CommandServer::new(registry).connect().unwrap();

        let sink = BusVoiceSink::spawn(client);
        sink.voice_call_state_changed(true);
        sink.voice_state_changed(TrayVariant::TraySpeaking);
        sink.voice_state_changed(TrayVariant::TrayIdle);

        for _ in 0..100 {
            if seen.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            *seen.lock(),
            vec![
                (vocabulary::VOICE_CALL_STATE_CHANGED.to_string(), json!(true)),
                (vocabulary::VOICE_STATE_CHANGED.to_string(), json!("traySpeaking")),
                (vocabulary::VOICE_STATE_CHANGED.to_string(), json!("trayIdle")),
            ]
        );
    }
}
