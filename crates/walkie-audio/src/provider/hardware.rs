use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dasp_sample::{FromSample, ToSample};
use parking_lot::Mutex;

use super::{CaptureCallback, ErrorCallback, PlaybackCallback, StreamCallbacks, StreamConfig, StreamProvider};
use crate::device::{find_device, DeviceDirection};
use crate::error::EngineError;

/// Frames converted per step when the capture format is not `i16`.
const CONVERT_CHUNK: usize = 256;

/// Playback conversion scratch, in frames. Larger host blocks play silence.
const MAX_HOST_BLOCK: usize = 16_384;

/// Capture and playback through cpal.
///
/// Both streams are built on one dedicated `audio-io` thread which owns them
/// for their whole life (`cpal::Stream` is `!Send` on macOS), so the provider
/// itself is `Send`. The streams are created and dropped together: if either
/// fails to build or play, neither survives.
#[derive(Default)]
pub struct CpalStreamProvider {
    opened: Option<(StreamConfig, StreamCallbacks)>,
    /// Dropping this sender signals the audio thread to shut down.
    shutdown_tx: Option<std_mpsc::Sender<()>>,
    /// Handle to the dedicated audio thread.
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl CpalStreamProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamProvider for CpalStreamProvider {
    fn open(&mut self, config: &StreamConfig, callbacks: StreamCallbacks) -> Result<(), EngineError> {
        if self.thread_handle.is_some() {
            return Err(EngineError::StreamOpen("streams are already running".into()));
        }
        self.opened = Some((config.clone(), callbacks));
        Ok(())
    }

    /// Spawn the audio thread and wait for it to report that both streams
    /// are playing, or why they are not.
    fn start(&mut self) -> Result<(), EngineError> {
        let (config, callbacks) = self
            .opened
            .take()
            .ok_or_else(|| EngineError::StreamStart("streams were not opened".into()))?;

        let (init_tx, init_rx) = std_mpsc::sync_channel::<Result<(), EngineError>>(1);
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("audio-io".into())
            .spawn(move || match build_streams(&config, callbacks) {
                Ok((input, output)) => {
                    let played = input
                        .play()
                        .and_then(|()| output.play())
                        .map_err(|e| EngineError::StreamStart(e.to_string()));
                    let failed = played.is_err();
                    let _ = init_tx.send(played);
                    if failed {
                        return;
                    }
                    // Park until shutdown; the streams stay alive in this scope.
                    let _ = shutdown_rx.recv();
                    drop(input);
                    drop(output);
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                }
            })
            .map_err(|e| EngineError::AudioDevice(format!("failed to spawn audio thread: {e}")))?;

        let init = init_rx
            .recv()
            .map_err(|_| EngineError::AudioDevice("audio thread died during init".into()))
            .and_then(|r| r);
        if let Err(e) = init {
            let _ = handle.join();
            return Err(e);
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.thread_handle = Some(handle);
        tracing::info!("cpal capture and playback streams started");
        Ok(())
    }

    fn stop(&mut self) {
        self.opened = None;
        // Dropping the sender makes recv() in the thread return Err, which
        // exits the thread and drops both streams.
        self.shutdown_tx = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("cpal streams stopped");
        }
    }
}

impl Drop for CpalStreamProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build both streams on the current thread. The returned streams must be
/// kept alive for audio to flow.
fn build_streams(
    config: &StreamConfig,
    callbacks: StreamCallbacks,
) -> Result<(cpal::Stream, cpal::Stream), EngineError> {
    let host = cpal::default_host();
    let input_device = match config.input_device.as_deref() {
        Some(name) => find_device(&host, name, &DeviceDirection::Input)?,
        None => host
            .default_input_device()
            .ok_or_else(|| EngineError::AudioDevice("no input device available".into()))?,
    };
    let output_device = match config.output_device.as_deref() {
        Some(name) => find_device(&host, name, &DeviceDirection::Output)?,
        None => host
            .default_output_device()
            .ok_or_else(|| EngineError::AudioDevice("no output device available".into()))?,
    };

    let on_error = Arc::new(Mutex::new(callbacks.error));
    let input = build_input_stream(&input_device, config, callbacks.capture, &on_error)?;
    let output = build_output_stream(&output_device, config, callbacks.playback, &on_error)?;
    Ok((input, output))
}

/// Mono stream config at the engine rate. The requested block size is only
/// used when the device advertises support for it.
fn stream_config_for(config: &StreamConfig, supported: &cpal::SupportedBufferSize) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: buffer_size_for(supported, config.frames_per_callback),
    }
}

fn buffer_size_for(supported: &cpal::SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
            cpal::BufferSize::Fixed(frames)
        }
        cpal::SupportedBufferSize::Range { min, max } => {
            tracing::warn!(frames, min, max, "block size unsupported by device, using host default");
            cpal::BufferSize::Default
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    capture: CaptureCallback,
    on_error: &Arc<Mutex<ErrorCallback>>,
) -> Result<cpal::Stream, EngineError> {
    let supported = device
        .default_input_config()
        .map_err(|e| EngineError::AudioDevice(format!("no input config: {e}")))?;
    let config = &stream_config_for(config, supported.buffer_size());

    match supported.sample_format() {
        cpal::SampleFormat::I16 => input_stream::<i16>(device, config, capture, on_error),
        cpal::SampleFormat::F32 => input_stream::<f32>(device, config, capture, on_error),
        cpal::SampleFormat::U16 => input_stream::<u16>(device, config, capture, on_error),
        format => {
            return Err(EngineError::StreamOpen(format!(
                "unsupported input sample format: {format:?}"
            )))
        }
    }
    .map_err(|e| EngineError::StreamOpen(format!("failed to build input stream: {e}")))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    playback: PlaybackCallback,
    on_error: &Arc<Mutex<ErrorCallback>>,
) -> Result<cpal::Stream, EngineError> {
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::AudioDevice(format!("no output config: {e}")))?;
    let block = (config.frames_per_callback as usize).max(MAX_HOST_BLOCK);
    let config = &stream_config_for(config, supported.buffer_size());

    match supported.sample_format() {
        cpal::SampleFormat::I16 => output_stream_i16(device, config, playback, on_error),
        cpal::SampleFormat::F32 => output_stream::<f32>(device, config, playback, block, on_error),
        cpal::SampleFormat::U16 => output_stream::<u16>(device, config, playback, block, on_error),
        format => {
            return Err(EngineError::StreamOpen(format!(
                "unsupported output sample format: {format:?}"
            )))
        }
    }
    .map_err(|e| EngineError::StreamOpen(format!("failed to build output stream: {e}")))
}

/// Input stream in the device's native format, converted to `i16` in fixed
/// stack chunks so the callback never allocates.
fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut capture: CaptureCallback,
    on_error: &Arc<Mutex<ErrorCallback>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + ToSample<i16>,
{
    let on_error = Arc::clone(on_error);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mut chunk = [0i16; CONVERT_CHUNK];
            for block in data.chunks(CONVERT_CHUNK) {
                for (dst, &src) in chunk.iter_mut().zip(block) {
                    *dst = src.to_sample_();
                }
                capture(&chunk[..block.len()]);
            }
        },
        move |err: cpal::StreamError| {
            tracing::error!("input stream error: {err}");
            (*on_error.lock())(format!("input: {err}"));
        },
        None,
    )
}

/// Native `i16` output: the device buffer is the mix target.
fn output_stream_i16(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut playback: PlaybackCallback,
    on_error: &Arc<Mutex<ErrorCallback>>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let on_error = Arc::clone(on_error);
    device.build_output_stream(
        config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| playback(data),
        move |err: cpal::StreamError| {
            tracing::error!("output stream error: {err}");
            (*on_error.lock())(format!("output: {err}"));
        },
        None,
    )
}

/// Output in another native format. Each hardware block is mixed in one
/// playback call into scratch allocated here, then converted.
fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut playback: PlaybackCallback,
    block: usize,
    on_error: &Arc<Mutex<ErrorCallback>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + FromSample<i16>,
{
    let on_error = Arc::clone(on_error);
    let mut scratch = vec![0i16; block];
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            render_converted(&mut playback, &mut scratch, data);
        },
        move |err: cpal::StreamError| {
            tracing::error!("output stream error: {err}");
            (*on_error.lock())(format!("output: {err}"));
        },
        None,
    )
}

/// Run `playback` once for the whole of `data`. A block larger than
/// `scratch` is written as silence.
fn render_converted<T>(playback: &mut PlaybackCallback, scratch: &mut [i16], data: &mut [T])
where
    T: Copy + FromSample<i16>,
{
    let Some(frames) = scratch.get_mut(..data.len()) else {
        data.fill(T::from_sample_(0i16));
        return;
    };
    playback(frames);
    for (dst, &src) in data.iter_mut().zip(frames.iter()) {
        *dst = T::from_sample_(src);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::mixer::Mixer;
    use crate::registry::{DeviceId, DeviceRegistry};

    #[test]
    fn test_converted_block_matches_single_mix() {
        let registry = Arc::new(DeviceRegistry::new(2, 1024));
        registry.add_device(DeviceId::new(0));
        registry.add_device(DeviceId::new(1));
        let ramp: Vec<i16> = (0..480).collect();
        registry.update_device_audio(DeviceId::new(1), &ramp);

        let mixer = Mixer::new(registry);
        let whole = mixer.get_mixed_audio(DeviceId::new(0), 480).unwrap();
        assert_eq!(whole, ramp);

        let mut mix_scratch = vec![0i32; 1024];
        let mut playback: PlaybackCallback = Box::new(move |out: &mut [i16]| {
            mixer.mix_into(DeviceId::new(0), out, &mut mix_scratch);
        });
        let mut scratch = vec![0i16; MAX_HOST_BLOCK];
        let mut data = vec![0.0f32; 480];
        render_converted(&mut playback, &mut scratch, &mut data);

        let expected: Vec<f32> = whole.iter().map(|&s| f32::from_sample_(s)).collect();
        assert_eq!(data, expected);
    }

    #[test]
    fn test_oversized_block_is_silent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut playback: PlaybackCallback = Box::new(move |out: &mut [i16]| {
            counter.fetch_add(1, Ordering::Relaxed);
            out.fill(1000);
        });
        let mut scratch = vec![0i16; 4];
        let mut data = vec![0u16; 8];
        render_converted(&mut playback, &mut scratch, &mut data);

        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(data, vec![u16::from_sample_(0i16); 8]);
    }

    #[test]
    fn test_buffer_size_falls_back_to_default() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(buffer_size_for(&range, 480), cpal::BufferSize::Fixed(480));
        assert_eq!(buffer_size_for(&range, 8192), cpal::BufferSize::Default);
        assert_eq!(
            buffer_size_for(&cpal::SupportedBufferSize::Unknown, 480),
            cpal::BufferSize::Default
        );
    }
}
