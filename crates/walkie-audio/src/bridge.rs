use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSender};
use crate::mixer::{saturate_into, Mixer};
use crate::provider::{StreamCallbacks, StreamConfig, StreamProvider};
use crate::registry::DeviceId;

/// Lifecycle of the hardware streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl EngineState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Counters updated from the audio callbacks.
#[derive(Default)]
struct Counters {
    callbacks: AtomicU64,
    capture_dropped: AtomicU64,
    playback_dropped: AtomicU64,
}

/// Snapshot of the bridge's real-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Playback callbacks served since the engine was created.
    pub callbacks: u64,
    /// Captured samples dropped because nobody drained `capture()`.
    pub capture_dropped: u64,
    /// `play()` samples refused because the playback queue was full.
    pub playback_dropped: u64,
}

/// Binds the hardware streams to the registry and mixer.
///
/// ```text
/// Microphone ──capture cb──▶ local device ring ──▶ mixes for remote devices
///                   └──────▶ capture queue ──▶ capture() ──▶ transport
///
/// Speaker ◀──playback cb── saturate( mix-minus(local) + play queue ) ◀── play()
/// ```
///
/// The callbacks only touch per-device locks, two SPSC queues and atomics;
/// they never allocate, log or wait on a lock held by a caller thread.
pub struct AudioBridge {
    /// Also serialises start/stop.
    provider: Mutex<Box<dyn StreamProvider>>,
    state: AtomicU8,
    mixer: Mixer,
    config: EngineConfig,
    events: EventSender,
    counters: Arc<Counters>,
    capture_rx: Mutex<Option<rtrb::Consumer<i16>>>,
    playback_tx: Mutex<Option<rtrb::Producer<i16>>>,
}

impl AudioBridge {
    pub fn new(
        provider: Box<dyn StreamProvider>,
        mixer: Mixer,
        config: EngineConfig,
        events: EventSender,
    ) -> Self {
        Self {
            provider: Mutex::new(provider),
            state: AtomicU8::new(EngineState::Stopped.as_u8()),
            mixer,
            config,
            events,
            counters: Arc::new(Counters::default()),
            capture_rx: Mutex::new(None),
            playback_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Open and start both streams. On any failure both are torn down and the
    /// bridge is back in `Stopped`. Starting a running bridge is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut provider = self.provider.lock();
        match self.state() {
            EngineState::Running => return Ok(()),
            EngineState::Stopped => {}
            other => return Err(EngineError::InvalidState(other)),
        }
        self.set_state(EngineState::Starting);
        let added_local = self.ensure_local_device();

        let (capture_tx, capture_rx) = rtrb::RingBuffer::new(self.config.capture_queue_frames);
        let (playback_tx, playback_rx) = rtrb::RingBuffer::new(self.config.playback_queue_frames);
        let callbacks = StreamCallbacks {
            capture: self.capture_callback(capture_tx),
            playback: self.playback_callback(playback_rx),
            error: self.error_callback(),
        };

        let stream_config = StreamConfig::from(&self.config);
        let opened = provider
            .open(&stream_config, callbacks)
            .and_then(|()| provider.start());
        if let Err(e) = opened {
            provider.stop();
            let local = self.config.local_device_id;
            if added_local && self.mixer.registry().remove_device(local) {
                self.events.emit(EngineEvent::DeviceRemoved { device_id: local });
            }
            tracing::error!(error = %e, "failed to start audio streams");
            self.set_state(EngineState::Stopped);
            return Err(e);
        }

        *self.capture_rx.lock() = Some(capture_rx);
        *self.playback_tx.lock() = Some(playback_tx);
        self.set_state(EngineState::Running);
        tracing::info!(
            sample_rate = self.config.sample_rate,
            frames_per_callback = self.config.frames_per_callback,
            local_device = %self.config.local_device_id,
            "audio bridge running"
        );
        Ok(())
    }

    /// Tear down both streams. Safe to call in any state, any number of times.
    pub fn stop(&self) {
        let mut provider = self.provider.lock();
        if self.state() == EngineState::Stopped {
            return;
        }
        self.set_state(EngineState::Stopping);
        provider.stop();
        *self.capture_rx.lock() = None;
        *self.playback_tx.lock() = None;
        self.set_state(EngineState::Stopped);

        let stats = self.stats();
        tracing::info!(
            callbacks = stats.callbacks,
            capture_dropped = stats.capture_dropped,
            playback_dropped = stats.playback_dropped,
            "audio bridge stopped"
        );
    }

    /// Pull `num_frames` locally captured samples for the transport.
    ///
    /// `None` when not running. Otherwise exactly `num_frames` samples; if
    /// fewer were captured, the missing part is leading silence.
    pub fn capture(&self, num_frames: usize) -> Option<Vec<i16>> {
        if !self.is_running() {
            return None;
        }
        let mut guard = self.capture_rx.lock();
        let rx = guard.as_mut()?;

        let mut out = vec![0i16; num_frames];
        let available = rx.slots().min(num_frames);
        if let Ok(chunk) = rx.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            let start = num_frames - available;
            out[start..start + first.len()].copy_from_slice(first);
            out[start + first.len()..].copy_from_slice(second);
            chunk.commit_all();
        }
        Some(out)
    }

    /// Queue samples for local playback, mixed over the mix-minus output.
    /// Returns how many samples were accepted (0 when not running).
    pub fn play(&self, samples: &[i16]) -> usize {
        if !self.is_running() {
            return 0;
        }
        let mut guard = self.playback_tx.lock();
        match guard.as_mut() {
            Some(tx) => enqueue(tx, samples, &self.counters.playback_dropped),
            None => 0,
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            callbacks: self.counters.callbacks.load(Ordering::Relaxed),
            capture_dropped: self.counters.capture_dropped.load(Ordering::Relaxed),
            playback_dropped: self.counters.playback_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn local_device_id(&self) -> DeviceId {
        self.config.local_device_id
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::Release);
        tracing::debug!(%state, "engine state changed");
        self.events.emit(EngineEvent::StateChanged { state });
    }

    /// The microphone feeds, and the speaker hears, the local device.
    /// Returns whether it had to be registered now.
    pub(crate) fn ensure_local_device(&self) -> bool {
        let local = self.config.local_device_id;
        let registry = self.mixer.registry();
        if registry.contains(local) {
            return false;
        }
        match registry.try_add_device(local) {
            Ok(()) => {
                self.events.emit(EngineEvent::DeviceAdded { device_id: local });
                true
            }
            Err(e) => {
                tracing::warn!(device = %local, error = %e, "could not register local device; capture will not be mixed");
                false
            }
        }
    }

    fn capture_callback(&self, mut capture_tx: rtrb::Producer<i16>) -> crate::provider::CaptureCallback {
        let registry = Arc::clone(self.mixer.registry());
        let counters = Arc::clone(&self.counters);
        let local = self.config.local_device_id;
        Box::new(move |frames: &[i16]| {
            registry.update_device_audio(local, frames);
            enqueue(&mut capture_tx, frames, &counters.capture_dropped);
        })
    }

    fn playback_callback(&self, mut playback_rx: rtrb::Consumer<i16>) -> crate::provider::PlaybackCallback {
        let mixer = self.mixer.clone();
        let counters = Arc::clone(&self.counters);
        let local = self.config.local_device_id;
        let mut scratch = vec![0i32; mixer.registry().buffer_capacity()];
        Box::new(move |out: &mut [i16]| {
            counters.callbacks.fetch_add(1, Ordering::Relaxed);

            let span = out.len().min(scratch.len());
            let split = out.len() - span;
            let (head, tail) = out.split_at_mut(split);
            // No ring holds history this old; only queued local playback lands here.
            for sample in head.iter_mut() {
                *sample = playback_rx.pop().unwrap_or(0);
            }

            let acc = &mut scratch[..span];
            acc.fill(0);
            mixer.accumulate(local, acc);
            for slot in acc.iter_mut() {
                match playback_rx.pop() {
                    Ok(sample) => *slot += i32::from(sample),
                    Err(_) => break,
                }
            }
            saturate_into(acc, tail);
        })
    }

    fn error_callback(&self) -> crate::provider::ErrorCallback {
        let events = self.events.clone();
        Box::new(move |message: String| {
            events.emit(EngineEvent::StreamError { message });
        })
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Push as many samples as fit; the rest are counted as dropped.
fn enqueue(tx: &mut rtrb::Producer<i16>, samples: &[i16], dropped: &AtomicU64) -> usize {
    let accepted = samples.len().min(tx.slots());
    if let Ok(mut chunk) = tx.write_chunk(accepted) {
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        second.copy_from_slice(&samples[split..accepted]);
        chunk.commit_all();
    }
    let refused = samples.len() - accepted;
    if refused > 0 {
        dropped.fetch_add(refused as u64, Ordering::Relaxed);
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ManualStreamHandle, ManualStreamProvider};
    use crate::registry::DeviceRegistry;

    fn bridge_with(config: EngineConfig) -> (AudioBridge, ManualStreamHandle, tokio::sync::mpsc::Receiver<EngineEvent>) {
        let (provider, handle) = ManualStreamProvider::new();
        let registry = Arc::new(DeviceRegistry::new(config.max_devices, config.ring_capacity()));
        let (events, rx) = EventSender::channel(64);
        let bridge = AudioBridge::new(Box::new(provider), Mixer::new(registry), config, events);
        (bridge, handle, rx)
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            frames_per_callback: 4,
            buffer_periods: 4,
            capture_queue_frames: 8,
            playback_queue_frames: 8,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_state_transitions_and_idempotent_stop() {
        let (bridge, handle, mut rx) = bridge_with(small_config());
        assert_eq!(bridge.state(), EngineState::Stopped);

        bridge.start().unwrap();
        assert_eq!(bridge.state(), EngineState::Running);
        assert!(handle.is_running());
        // Starting again does not reopen the streams.
        bridge.start().unwrap();
        assert_eq!(handle.start_count(), 1);

        bridge.stop();
        bridge.stop();
        assert_eq!(bridge.state(), EngineState::Stopped);
        assert!(!handle.is_open());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::StateChanged { state } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                EngineState::Starting,
                EngineState::Running,
                EngineState::Stopping,
                EngineState::Stopped
            ]
        );
    }

    #[test]
    fn test_open_failure_leaves_stopped() {
        let (bridge, handle, mut rx) = bridge_with(small_config());
        handle.fail_next_open("no input device");
        assert!(matches!(bridge.start(), Err(EngineError::StreamOpen(_))));
        assert_eq!(bridge.state(), EngineState::Stopped);
        assert!(!handle.is_open());
        assert!(bridge.capture(4).is_none());
        assert!(bridge.mixer.registry().is_empty());

        // The rolled-back registration is reported too.
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::StateChanged { state: EngineState::Starting },
                EngineEvent::DeviceAdded { device_id: DeviceId::new(0) },
                EngineEvent::DeviceRemoved { device_id: DeviceId::new(0) },
                EngineEvent::StateChanged { state: EngineState::Stopped },
            ]
        );
    }

    #[test]
    fn test_start_failure_leaves_stopped() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        handle.fail_next_start("device busy");
        assert!(matches!(bridge.start(), Err(EngineError::StreamStart(_))));
        assert_eq!(bridge.state(), EngineState::Stopped);
        assert!(!handle.is_running());

        // A later attempt can still succeed.
        bridge.start().unwrap();
        assert!(bridge.is_running());
    }

    #[test]
    fn test_capture_feeds_local_ring_and_queue() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        bridge.start().unwrap();
        let registry = Arc::clone(bridge.mixer.registry());
        assert!(registry.contains(DeviceId::new(0)));
        registry.add_device(DeviceId::new(1));

        assert!(handle.push_capture(&[10, 20, 30]));
        assert_eq!(bridge.capture(3), Some(vec![10, 20, 30]));
        // Drained: the next pull is silence.
        assert_eq!(bridge.capture(2), Some(vec![0, 0]));
        // The remote device hears the local microphone.
        assert_eq!(bridge.mixer.get_mixed_audio(DeviceId::new(1), 3), Some(vec![10, 20, 30]));
    }

    #[test]
    fn test_capture_underrun_is_leading_silence() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        bridge.start().unwrap();
        handle.push_capture(&[5, 6]);
        assert_eq!(bridge.capture(4), Some(vec![0, 0, 5, 6]));
    }

    #[test]
    fn test_capture_queue_overrun_counts_drops() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        bridge.start().unwrap();
        handle.push_capture(&[1; 6]);
        handle.push_capture(&[2; 6]);
        assert_eq!(bridge.stats().capture_dropped, 4);
        assert_eq!(bridge.capture(8), Some(vec![1, 1, 1, 1, 1, 1, 2, 2]));
    }

    #[test]
    fn test_playback_is_mix_minus_plus_queue() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        bridge.start().unwrap();
        let registry = Arc::clone(bridge.mixer.registry());
        registry.add_device(DeviceId::new(1));
        registry.update_device_audio(DeviceId::new(1), &[100, 100, 100, 100]);
        // Local microphone must not come back out of the speaker.
        handle.push_capture(&[7000; 4]);

        assert_eq!(bridge.play(&[1, 2]), 2);
        assert_eq!(handle.render(4), Some(vec![101, 102, 100, 100]));
        assert_eq!(bridge.stats().callbacks, 1);
    }

    #[test]
    fn test_playback_saturates_after_queue_sum() {
        let (bridge, handle, _rx) = bridge_with(small_config());
        bridge.start().unwrap();
        let registry = Arc::clone(bridge.mixer.registry());
        registry.add_device(DeviceId::new(1));
        registry.update_device_audio(DeviceId::new(1), &[i16::MAX; 2]);

        bridge.play(&[i16::MAX, i16::MIN]);
        assert_eq!(handle.render(2), Some(vec![i16::MAX, -1]));
    }

    #[test]
    fn test_play_when_stopped_is_refused() {
        let (bridge, _handle, _rx) = bridge_with(small_config());
        assert_eq!(bridge.play(&[1, 2, 3]), 0);
        assert!(bridge.capture(3).is_none());
    }

    #[test]
    fn test_stream_error_becomes_event() {
        let (bridge, handle, mut rx) = bridge_with(small_config());
        bridge.start().unwrap();
        assert!(handle.raise_error("input: device unplugged"));

        let errors: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, EngineEvent::StreamError { .. }))
            .collect();
        assert_eq!(
            errors,
            vec![EngineEvent::StreamError {
                message: "input: device unplugged".into()
            }]
        );
    }

    #[test]
    fn test_full_registry_still_starts() {
        let config = EngineConfig {
            max_devices: 1,
            ..small_config()
        };
        let (bridge, handle, _rx) = bridge_with(config);
        bridge.mixer.registry().add_device(DeviceId::new(9));
        bridge.start().unwrap();
        assert!(!bridge.mixer.registry().contains(DeviceId::new(0)));
        // Nothing to mix for an unregistered local device: silence.
        assert_eq!(handle.render(3), Some(vec![0, 0, 0]));
    }
}
