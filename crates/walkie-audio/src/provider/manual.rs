use std::sync::Arc;

use parking_lot::Mutex;

use super::{StreamCallbacks, StreamConfig, StreamProvider};
use crate::error::EngineError;

#[derive(Default)]
struct ManualState {
    config: Option<StreamConfig>,
    callbacks: Option<StreamCallbacks>,
    running: bool,
    fail_open: Option<String>,
    fail_start: Option<String>,
    starts: usize,
    stops: usize,
}

/// A stream provider with no hardware behind it.
///
/// Nothing runs on its own: the paired [`ManualStreamHandle`] invokes the
/// capture and playback callbacks synchronously, one block per call, which
/// makes callback-driven behaviour deterministic in tests and simulations.
pub struct ManualStreamProvider {
    state: Arc<Mutex<ManualState>>,
}

/// Drives a [`ManualStreamProvider`] from outside the engine.
#[derive(Clone)]
pub struct ManualStreamHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualStreamProvider {
    pub fn new() -> (Self, ManualStreamHandle) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            ManualStreamHandle { state },
        )
    }
}

impl StreamProvider for ManualStreamProvider {
    fn open(&mut self, config: &StreamConfig, callbacks: StreamCallbacks) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_open.take() {
            return Err(EngineError::StreamOpen(reason));
        }
        state.config = Some(config.clone());
        state.callbacks = Some(callbacks);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_start.take() {
            state.callbacks = None;
            return Err(EngineError::StreamStart(reason));
        }
        if state.callbacks.is_none() {
            return Err(EngineError::StreamStart("streams were not opened".into()));
        }
        state.running = true;
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if state.running {
            state.stops += 1;
        }
        state.running = false;
        state.callbacks = None;
    }
}

impl ManualStreamHandle {
    /// Deliver one block of "microphone" frames. Returns `false` if the
    /// streams are not running.
    pub fn push_capture(&self, frames: &[i16]) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        match state.callbacks.as_mut() {
            Some(callbacks) => {
                (callbacks.capture)(frames);
                true
            }
            None => false,
        }
    }

    /// Pull one block of `frames` playback samples, as the hardware would.
    pub fn render(&self, frames: usize) -> Option<Vec<i16>> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }
        let callbacks = state.callbacks.as_mut()?;
        let mut out = vec![0i16; frames];
        (callbacks.playback)(&mut out);
        Some(out)
    }

    /// Report an asynchronous stream error, as a disconnected device would.
    pub fn raise_error(&self, message: &str) -> bool {
        let mut state = self.state.lock();
        match state.callbacks.as_mut() {
            Some(callbacks) => {
                (callbacks.error)(message.to_string());
                true
            }
            None => false,
        }
    }

    /// Make the next `open` fail with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        self.state.lock().fail_open = Some(reason.to_string());
    }

    /// Make the next `start` fail with `reason`.
    pub fn fail_next_start(&self, reason: &str) {
        self.state.lock().fail_start = Some(reason.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether callbacks are currently held (opened and not yet stopped).
    pub fn is_open(&self) -> bool {
        self.state.lock().callbacks.is_some()
    }

    /// Stream parameters from the most recent `open`.
    pub fn config(&self) -> Option<StreamConfig> {
        self.state.lock().config.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stops
    }
}
