use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use log::{debug, warn};
use tokio::sync::watch;

use crate::device::types::{DeviceEvent, DeviceState};

/// Owner of the single `DeviceState` snapshot.
///
/// Only the engine task applies events. Everyone else holds a `watch::Receiver`, so every
/// event is published as one replacement and readers never see half of it.
pub struct StateStore {
    sender: watch::Sender<DeviceState>,
    malformed_count: Arc<AtomicU64>,
}

impl StateStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(DeviceState::default());
        StateStore { sender, malformed_count: Arc::new(AtomicU64::new(0)) }
    }

    /// Returns true if the snapshot changed.
    pub fn apply(&mut self, event: DeviceEvent) -> bool {
        if let DeviceEvent::Malformed(raw, reason) = &event {
            self.malformed_count.fetch_add(1, Ordering::Relaxed);
            warn!("Dropping malformed notification {:?}: {}", String::from_utf8_lossy(raw), reason);
            return false;
        }

        let changed = self.sender.send_if_modified(|state| {
            let before = state.clone();
            match event {
                DeviceEvent::ShaderList(names) => state.shader_names = names,
                DeviceEvent::AccentShaderList(names) => state.accent_shader_names = names,
                DeviceEvent::ActiveShader(name) => state.active_shader = Some(name),
                DeviceEvent::ActiveAccentShader(name) => state.active_accent_shader = Some(name),
                DeviceEvent::Brightness(value) => state.brightness = value,
                DeviceEvent::AnimationState(active) => state.is_animation_active = active,
                DeviceEvent::ServoSpeeds(speeds) => state.servo_speeds = speeds,
                DeviceEvent::Malformed(..) => {},
            }
            *state != before
        });

        if changed {
            let state = self.sender.borrow();
            if let Some(active) = &state.active_shader {
                if !state.shader_names.is_empty() && !state.shader_names.contains(active) {
                    // resolves itself once the matching shader list arrives
                    debug!("Active shader {:?} is not (yet) in the shader list", active);
                }
            }
        }

        changed
    }

    pub fn snapshot(&self) -> DeviceState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.sender.subscribe()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }

    /// Shared view of the malformed notification counter.
    pub fn malformed_counter(&self) -> Arc<AtomicU64> {
        self.malformed_count.clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::codec::decode;
    use crate::device::types::ServoSpeeds;

    #[test]
    fn applies_events_to_fields() {
        let mut store = StateStore::new();
        assert!(store.apply(decode(b"shaders:Inferno;Loopy Rainbow")));
        assert!(store.apply(decode(b"activeShader:Loopy Rainbow")));
        assert!(store.apply(decode(b"brightness:42")));
        assert!(store.apply(decode(b"animationState:true")));

        let state = store.snapshot();
        assert_eq!(state.shader_names, vec!["Inferno".to_string(), "Loopy Rainbow".to_string()]);
        assert_eq!(state.active_shader.as_deref(), Some("Loopy Rainbow"));
        assert_eq!(state.brightness, 42);
        assert!(state.is_animation_active);
    }

    #[test]
    fn lists_are_replaced_not_merged() {
        let mut store = StateStore::new();
        store.apply(decode(b"accentShaders:A;B;C"));
        store.apply(decode(b"accentShaders:D"));
        assert_eq!(store.snapshot().accent_shader_names, vec!["D".to_string()]);
    }

    #[test]
    fn malformed_is_a_no_op() {
        let mut store = StateStore::new();
        store.apply(decode(b"brightness:12"));
        let before = store.snapshot();

        assert!(!store.apply(decode(b"brightness:abc")));
        assert!(!store.apply(decode(b"servoSpeeds:1;2;3")));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.malformed_count(), 2);
    }

    #[test]
    fn same_value_does_not_notify() {
        let mut store = StateStore::new();
        let mut receiver = store.subscribe();
        receiver.borrow_and_update();

        assert!(store.apply(DeviceEvent::Brightness(7)));
        assert!(receiver.has_changed().unwrap());
        receiver.borrow_and_update();

        assert!(!store.apply(DeviceEvent::Brightness(7)));
        assert!(!receiver.has_changed().unwrap());
    }

    #[test]
    fn servo_speeds_update_atomically() {
        let mut store = StateStore::new();
        let receiver = store.subscribe();
        let a = ServoSpeeds([0.1, 0.1, 0.1, 0.1]);
        let b = ServoSpeeds([0.9, 0.9, 0.9, 0.9]);

        let reader = std::thread::spawn(move || {
            for _ in 0..10_000 {
                let speeds = receiver.borrow().servo_speeds;
                let first = speeds.0[0];
                assert!(speeds.0.iter().all(|speed| *speed == first), "torn read {:?}", speeds);
            }
        });

        for i in 0..10_000 {
            store.apply(DeviceEvent::ServoSpeeds(if i % 2 == 0 { a } else { b }));
        }

        reader.join().unwrap();
    }
}
