use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use walkie_audio::device::enumerate_hardware;
use walkie_audio::{AudioEngine, DeviceId, EngineConfig};

/// Command-line arguments for the loopback monitor.
struct Args {
    config_path: Option<PathBuf>,
    seconds: u64,
    list_devices: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        config_path: None,
        seconds: 10,
        list_devices: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                parsed.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value {value:?}"))?;
            }
            "--list-devices" => parsed.list_devices = true,
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(parsed)
}

fn list_devices() {
    let devices = enumerate_hardware();
    for device in &devices.input_devices {
        tracing::info!(name = %device.name, default = device.is_default, "input device");
    }
    for device in &devices.output_devices {
        tracing::info!(name = %device.name, default = device.is_default, "output device");
    }
    if devices.input_devices.is_empty() && devices.output_devices.is_empty() {
        tracing::warn!("no audio devices found");
    }
}

/// Feed captured audio back in as a remote device, so the local speaker
/// plays the microphone through the mix-minus path.
async fn loopback(engine: Arc<AudioEngine>, remote: DeviceId, mut shutdown_rx: mpsc::Receiver<()>) {
    let frames = engine.config().frames_per_callback as usize;
    let period = Duration::from_secs_f64(engine.config().callback_period_ms() / 1000.0);
    let mut tick = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some(block) = engine.capture(frames) else {
                    break;
                };
                engine.update_device_audio(remote, &block);
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    tracing::debug!("loopback task finished");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let config = match &args.config_path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let engine = Arc::new(AudioEngine::with_cpal(config).context("failed to create audio engine")?);
    let mut events = engine
        .take_event_rx()
        .context("event receiver already taken")?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(?event, "engine event");
        }
    });

    if !engine.start_engine() {
        bail!("audio engine failed to start; see log for details");
    }

    let remote = DeviceId::new(engine.local_device_id().get().wrapping_add(1));
    if !engine.add_device(remote) {
        engine.stop_engine();
        bail!("could not register loopback device {remote}");
    }

    tracing::info!(seconds = args.seconds, remote = %remote, "walkie-monitor running");

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(loopback(Arc::clone(&engine), remote, shutdown_rx));

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    let _ = shutdown_tx.send(()).await;
    if let Err(e) = task.await {
        tracing::warn!(error = %e, "loopback task failed");
    }

    engine.stop_engine();
    let stats = engine.stats();
    tracing::info!(
        callbacks = stats.callbacks,
        capture_dropped = stats.capture_dropped,
        playback_dropped = stats.playback_dropped,
        "walkie-monitor finished"
    );
    Ok(())
}
