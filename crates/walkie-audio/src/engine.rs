use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bridge::{AudioBridge, BridgeStats, EngineState};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSender};
use crate::mixer::Mixer;
use crate::provider::{CpalStreamProvider, StreamProvider};
use crate::registry::{DeviceId, DeviceRegistry};

/// Control surface for the walkie-talkie audio engine.
///
/// Binds the [`AudioBridge`] to the [`DeviceRegistry`] and [`Mixer`] and
/// exposes them to non-real-time callers (transport, UI bridge). Every method
/// takes `&self` and may be called from any thread.
///
/// Device operations only act while the engine is running; otherwise they are
/// no-ops returning `false`/`None`, the same as for an unknown device id.
pub struct AudioEngine {
    config: EngineConfig,
    registry: Arc<DeviceRegistry>,
    mixer: Mixer,
    bridge: AudioBridge,
    events: EventSender,
    event_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
}

impl AudioEngine {
    /// Validate `config`, allocate the registry and bind `provider`.
    pub fn new(config: EngineConfig, provider: Box<dyn StreamProvider>) -> Result<Self, EngineError> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new(config.max_devices, config.ring_capacity()));
        let mixer = Mixer::new(Arc::clone(&registry));
        let (events, event_rx) = EventSender::channel(config.event_queue_capacity);
        let bridge = AudioBridge::new(provider, mixer.clone(), config.clone(), events.clone());

        tracing::info!(
            max_devices = config.max_devices,
            ring_capacity = registry.buffer_capacity(),
            "audio engine initialised"
        );
        Ok(Self {
            config,
            registry,
            mixer,
            bridge,
            events,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Engine backed by the host's real audio devices.
    pub fn with_cpal(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(config, Box::new(CpalStreamProvider::new()))
    }

    /// Open the hardware streams. Returns `false` (and stays stopped) if
    /// either stream could not be opened or started.
    pub fn start_engine(&self) -> bool {
        match self.bridge.start() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "failed to start audio engine");
                false
            }
        }
    }

    /// Close the hardware streams and drop every device. Idempotent.
    pub fn stop_engine(&self) {
        self.bridge.stop();
        if !self.registry.is_empty() {
            self.registry.clear();
            self.events.emit(EngineEvent::Cleared);
        }
    }

    pub fn state(&self) -> EngineState {
        self.bridge.state()
    }

    pub fn add_device(&self, id: DeviceId) -> bool {
        if !self.ensure_running(id, "add_device") {
            return false;
        }
        match self.registry.try_add_device(id) {
            Ok(()) => {
                self.events.emit(EngineEvent::DeviceAdded { device_id: id });
                true
            }
            Err(e) => {
                self.events.emit(EngineEvent::DeviceRejected {
                    device_id: id,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    pub fn remove_device(&self, id: DeviceId) {
        if self.ensure_running(id, "remove_device") && self.registry.remove_device(id) {
            self.events.emit(EngineEvent::DeviceRemoved { device_id: id });
        }
    }

    /// Push received remote audio into a device's ring.
    pub fn update_device_audio(&self, id: DeviceId, samples: &[i16]) {
        if self.bridge.is_running() {
            self.registry.update_device_audio(id, samples);
        }
    }

    /// Mix-minus output for `id`: every other device's latest `num_frames`.
    pub fn get_mixed_audio(&self, id: DeviceId, num_frames: usize) -> Option<Vec<i16>> {
        if !self.ensure_running(id, "get_mixed_audio") {
            return None;
        }
        self.mixer.get_mixed_audio(id, num_frames)
    }

    /// Drop every device. The local device is registered again straight
    /// away, with an empty ring, so the microphone and speaker keep working.
    pub fn clear(&self) {
        if self.bridge.is_running() {
            self.registry.clear();
            self.events.emit(EngineEvent::Cleared);
            self.bridge.ensure_local_device();
        }
    }

    /// Pull locally captured audio to forward over the transport.
    pub fn capture(&self, num_frames: usize) -> Option<Vec<i16>> {
        self.bridge.capture(num_frames)
    }

    /// Queue samples for local playback. Returns how many were accepted.
    pub fn play(&self, samples: &[i16]) -> usize {
        self.bridge.play(samples)
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_device_id(&self) -> DeviceId {
        self.bridge.local_device_id()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Take the event receiver for a UI bridge task.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.event_rx.lock().take()
    }

    fn ensure_running(&self, id: DeviceId, op: &'static str) -> bool {
        let running = self.bridge.is_running();
        if !running {
            tracing::debug!(device = %id, op, "engine stopped; ignoring device operation");
        }
        running
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop_engine();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ManualStreamHandle, ManualStreamProvider};

    fn engine() -> (AudioEngine, ManualStreamHandle) {
        let (provider, handle) = ManualStreamProvider::new();
        let engine = AudioEngine::new(EngineConfig::default(), Box::new(provider)).unwrap();
        (engine, handle)
    }

    #[test]
    fn test_device_ops_are_noops_when_stopped() {
        let (engine, _handle) = engine();
        assert!(!engine.add_device(DeviceId::new(1)));
        engine.update_device_audio(DeviceId::new(1), &[1, 2]);
        engine.remove_device(DeviceId::new(1));
        engine.clear();
        assert!(engine.get_mixed_audio(DeviceId::new(1), 2).is_none());
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (provider, _handle) = ManualStreamProvider::new();
        let config = EngineConfig {
            max_devices: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            AudioEngine::new(config, Box::new(provider)),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_start_registers_local_device() {
        let (engine, handle) = engine();
        assert!(engine.start_engine());
        assert!(handle.is_running());
        assert_eq!(engine.registry().active_ids(), vec![engine.local_device_id()]);
    }

    #[test]
    fn test_stop_clears_registry() {
        let (engine, _handle) = engine();
        assert!(engine.start_engine());
        assert!(engine.add_device(DeviceId::new(1)));
        engine.stop_engine();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_clear_keeps_local_device() {
        let (engine, handle) = engine();
        assert!(engine.start_engine());
        let mut events = engine.take_event_rx().unwrap();
        while events.try_recv().is_ok() {}

        assert!(engine.add_device(DeviceId::new(1)));
        engine.update_device_audio(DeviceId::new(1), &[40; 4]);
        engine.clear();
        assert_eq!(engine.registry().active_ids(), vec![engine.local_device_id()]);

        // The microphone still reaches remote devices added after the clear.
        assert!(engine.add_device(DeviceId::new(2)));
        assert!(handle.push_capture(&[9; 4]));
        assert_eq!(engine.get_mixed_audio(DeviceId::new(2), 4), Some(vec![9; 4]));

        let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            seen,
            vec![
                EngineEvent::DeviceAdded { device_id: DeviceId::new(1) },
                EngineEvent::Cleared,
                EngineEvent::DeviceAdded { device_id: DeviceId::new(0) },
                EngineEvent::DeviceAdded { device_id: DeviceId::new(2) },
            ]
        );
    }

    #[test]
    fn test_failed_start_reports_false() {
        let (engine, handle) = engine();
        handle.fail_next_open("permission denied");
        assert!(!engine.start_engine());
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_event_rx_taken_once() {
        let (engine, _handle) = engine();
        assert!(engine.take_event_rx().is_some());
        assert!(engine.take_event_rx().is_none());
    }
}
