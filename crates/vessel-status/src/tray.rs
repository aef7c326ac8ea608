//! Core side of the tray icon

use anyhow::Context;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use vessel_bus::{vocabulary, HandlerRegistry};

use crate::voice::TrayVariant;

/// Platform tray, reduced to the one thing the core does with it.
pub trait IconSink: Send + Sync {
    fn set_icon(&self, variant: TrayVariant);
}

#[derive(Debug, Default)]
struct TrayState {
    unread: bool,
    in_call: bool,
    voice: Option<TrayVariant>,
    shown: Option<TrayVariant>,
}

impl TrayState {
    fn effective(&self) -> TrayVariant {
        if self.in_call {
            return self.voice.unwrap_or(TrayVariant::TrayIdle);
        }
        if self.unread {
            TrayVariant::TrayUnread
        } else {
            TrayVariant::Tray
        }
    }
}

/// Decides which icon the tray shows and touches the platform only when it
/// actually changes.
#[derive(Clone)]
pub struct TrayIndicator {
    state: Arc<Mutex<TrayState>>,
    sink: Arc<dyn IconSink>,
}

impl TrayIndicator {
    pub fn new(sink: Arc<dyn IconSink>) -> Self {
        let indicator = Self {
            state: Arc::new(Mutex::new(TrayState::default())),
            sink,
        };
        indicator.apply(|_| {});
        indicator
    }

    pub fn set_unread(&self, unread: bool) {
        self.apply(|state| state.unread = unread);
    }

    pub fn set_in_call(&self, in_call: bool) {
        self.apply(|state| {
            state.in_call = in_call;
            if !in_call {
                state.voice = None;
            }
        });
    }

    /// Voice variants are ignored outside a call.
    pub fn set_voice_state(&self, variant: TrayVariant) {
        if !variant.is_voice() {
            tracing::debug!(%variant, "Ignoring non-voice tray variant");
            return;
        }
        self.apply(|state| {
            if state.in_call {
                state.voice = Some(variant);
            }
        });
    }

    pub fn current(&self) -> TrayVariant {
        self.state.lock().effective()
    }

    pub fn in_call(&self) -> bool {
        self.state.lock().in_call
    }

    /// Handles the voice commands views send to the core.
    pub fn register_handlers(&self, registry: &HandlerRegistry) -> vessel_bus::Result<()> {
        let tray = self.clone();
        registry.register_fn(vocabulary::VOICE_STATE_CHANGED, move |payload: Value| {
            let tray = tray.clone();
            async move {
                let variant: TrayVariant =
                    serde_json::from_value(payload).context("Invalid tray variant")?;
                tray.set_voice_state(variant);
                Ok(Value::Null)
            }
        })?;

        let tray = self.clone();
        registry.register_fn(vocabulary::VOICE_CALL_STATE_CHANGED, move |payload: Value| {
            let tray = tray.clone();
            async move {
                let in_call = payload.as_bool().context("Expected a boolean call state")?;
                tray.set_in_call(in_call);
                Ok(Value::Null)
            }
        })?;

        let tray = self.clone();
        registry.register_fn(vocabulary::QUERY_IS_IN_CALL, move |_payload: Value| {
            let tray = tray.clone();
            async move { Ok(Value::Bool(tray.in_call())) }
        })
    }

    fn apply(&self, change: impl FnOnce(&mut TrayState)) {
        let mut state = self.state.lock();
        change(&mut state);
        let next = state.effective();
        if state.shown == Some(next) {
            return;
        }
        state.shown = Some(next);
        drop(state);

        tracing::debug!(variant = %next, "Tray icon changed");
        self.sink.set_icon(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vessel_bus::CommandServer;

    #[derive(Default)]
    struct RecordingTray(Mutex<Vec<TrayVariant>>);

    impl IconSink for RecordingTray {
        fn set_icon(&self, variant: TrayVariant) {
            self.0.lock().push(variant);
        }
    }

    fn indicator() -> (TrayIndicator, Arc<RecordingTray>) {
        let sink = Arc::new(RecordingTray::default());
        (TrayIndicator::new(sink.clone()), sink)
    }

    #[test]
    fn test_only_changes_reach_the_platform() {
        let (tray, sink) = indicator();
        tray.set_unread(false);
        tray.set_unread(true);
        tray.set_unread(true);

        assert_eq!(*sink.0.lock(), vec![TrayVariant::Tray, TrayVariant::TrayUnread]);
    }

    #[test]
    fn test_call_overrides_unread_until_it_ends() {
        let (tray, sink) = indicator();
        tray.set_unread(true);
        tray.set_in_call(true);
        tray.set_voice_state(TrayVariant::TrayMuted);
        tray.set_in_call(false);

        assert_eq!(
            *sink.0.lock(),
            vec![
                TrayVariant::Tray,
                TrayVariant::TrayUnread,
                TrayVariant::TrayIdle,
                TrayVariant::TrayMuted,
                TrayVariant::TrayUnread,
            ]
        );
    }

    #[test]
    fn test_voice_state_outside_call_is_ignored() {
        let (tray, _sink) = indicator();
        tray.set_voice_state(TrayVariant::TraySpeaking);
        tray.set_voice_state(TrayVariant::TrayUnread);
        assert_eq!(tray.current(), TrayVariant::Tray);
    }

    #[tokio::test]
    async fn test_handlers_drive_the_indicator() {
        let (tray, sink) = indicator();
        let registry = HandlerRegistry::new();
        tray.register_handlers(&registry).unwrap();
        let client = CommandServer::new(registry).connect().unwrap();

        client
            .invoke(vocabulary::VOICE_CALL_STATE_CHANGED, json!(true))
            .await
            .unwrap();
        client
            .invoke(vocabulary::VOICE_STATE_CHANGED, json!("traySpeaking"))
            .await
            .unwrap();
        let in_call: bool = client
            .invoke_as(vocabulary::QUERY_IS_IN_CALL, Value::Null)
            .await
            .unwrap();

        assert!(in_call);
        assert_eq!(sink.0.lock().last(), Some(&TrayVariant::TraySpeaking));

        let err = client
            .invoke(vocabulary::VOICE_STATE_CHANGED, json!("trayLoud"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid tray variant"));
    }
}
