use anyhow::{Context, Result};
use glam::DVec3;
use sonavox::{
    AssetKey, ChannelId, FileAsset, ListenerState, SoftwareDevice, SonavoxEngine,
    SonavoxEngineDesc, SonavoxEvent, SoundParams, SymphoniaCodec,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ORBIT_RADIUS: f64 = 8.0;
const RUN_TIME: Duration = Duration::from_secs(20);

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: {} <music file> <effect file>", args[0]);
        std::process::exit(2);
    }

    let music = AssetKey::new(FileAsset::new(&args[1]));
    let effect = AssetKey::new(FileAsset::new(&args[2]));

    let volume = Arc::new(|channel: &ChannelId| match channel.as_str() {
        "music" => 0.6,
        _ => 1.0,
    });

    let engine = SonavoxEngine::spawn(
        SonavoxEngineDesc::default(),
        SoftwareDevice::open_default_output,
        Arc::new(SymphoniaCodec),
        volume,
    )
    .context("Failed to start audio engine")?;

    engine.play_music(&music, SoundParams::new("music"), true)?;

    // The same effect as a looping source left behind at the start.
    let hum = engine.play_static_audio(
        &effect,
        SoundParams::new("ambient").spatial(DVec3::new(ORBIT_RADIUS, 0.0, 0.0)),
        true,
    )?;

    let started = Instant::now();
    let mut next_shot = started;
    let mut shots = 0u32;

    while started.elapsed() < RUN_TIME {
        let t = started.elapsed().as_secs_f64();

        // Walk the listener slowly away from the start so the origin follows.
        let listener = DVec3::new(t * 40.0, 0.0, 0.0);
        engine.set_listener(ListenerState::from_position(listener))?;

        if Instant::now() >= next_shot {
            let angle = shots as f64 * 0.9;
            let offset = DVec3::new(angle.cos(), 0.0, angle.sin()) * ORBIT_RADIUS * 4.0;
            engine.play_sound(&effect, SoundParams::new("sfx").spatial(listener + offset))?;
            shots += 1;
            next_shot += Duration::from_millis(1500);
        }

        // Fade the looping source in and out.
        hum.set_gain((0.5 + 0.5 * (t * 0.5).sin()) as f32);

        for event in engine.poll_events() {
            if event.is_error() {
                log::error!("{:?}", event);
            } else {
                log::info!("{:?}", event);
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    log::info!("Stopping music after {} effects", shots);
    engine.stop("music")?;
    hum.dispose();
    engine.dispose()?;

    Ok(())
}
