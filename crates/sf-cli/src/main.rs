//! Scripted smoke-test harness for the scene audio engine.
//!
//! Usage:
//!   cargo run -p sf-cli -- play-stereo       - play a tone, print per-frame levels
//!   cargo run -p sf-cli -- play-spatial       - play a moving 3D source
//!   cargo run -p sf-cli -- export             - render an offline export and report RMS

use anyhow::Result;
use clap::{Parser, Subcommand};

use sf_core::{ClipId, Config, OperatorId};
use sf_engine::{AnalysisSettings, Engine, Mode3D, PlaybackState, SpatialOperatorUpdate, StereoOperatorUpdate};

#[derive(Parser)]
#[command(name = "sf-cli", about = "Scene audio engine smoke-test harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Number of frames to drive before reporting.
    #[arg(long, default_value_t = 60)]
    frames: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a stereo operator against a mock tone and print its level each frame.
    PlayStereo,
    /// Play a spatial operator orbiting the listener and print its distance gain.
    PlaySpatial,
    /// Render an export pass over a soundtrack clip and print the output RMS.
    Export,
}

fn mock_engine() -> Engine {
    let mut backend = sf_audio::MockBackend::new(48_000);
    backend.register_clip("tone.wav", sf_audio::SyntheticClip::sine(440.0, 48_000 * 4, 48_000));
    Engine::new(Box::new(backend), Config::default())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::PlayStereo => run_play_stereo(cli.frames),
        Commands::PlaySpatial => run_play_spatial(cli.frames),
        Commands::Export => run_export(cli.frames),
    }
    Ok(())
}

fn run_play_stereo(frames: usize) {
    let mut engine = mock_engine();
    let id = OperatorId::from_parts(0, 1);
    for frame in 0..frames {
        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: frame == 0, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.0 },
        );
        engine.complete_frame(
            PlaybackState { frame_count: frame as i64, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: frame as f64 / 60.0 },
            AnalysisSettings::default(),
        );
        println!("frame {frame:3}: level={:.4}", engine.get_operator_level(id));
    }
}

fn run_play_spatial(frames: usize) {
    let mut engine = mock_engine();
    let id = OperatorId::from_parts(0, 2);
    for frame in 0..frames {
        let angle = frame as f32 / frames as f32 * std::f32::consts::TAU;
        let position = [angle.cos() * 5.0, 0.0, angle.sin() * 5.0];
        engine.update_spatial_operator(
            id,
            SpatialOperatorUpdate {
                file: "tone.wav",
                play: frame == 0,
                stop: false,
                volume: 1.0,
                mute: false,
                position,
                min_distance: 1.0,
                max_distance: 20.0,
                speed: 1.0,
                seek: 0.0,
                orientation: [0.0, 0.0, 1.0],
                inner_cone_deg: 360.0,
                outer_cone_deg: 360.0,
                outer_cone_volume: 1.0,
                mode: Mode3D::Normal,
            },
        );
        engine.complete_frame(
            PlaybackState { frame_count: frame as i64, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: frame as f64 / 60.0 },
            AnalysisSettings::default(),
        );
        println!("frame {frame:3}: position={position:?} level={:.4}", engine.get_operator_level(id));
    }
}

fn run_export(frames: usize) {
    let mut engine = mock_engine();
    engine.use_soundtrack_clip(ClipId(1), "tone.wav", 0.0);

    let mut session = sf_engine::ExportSession::begin(&mut engine, 48_000, 0.0, false).expect("export prepare failed");
    let mut total_rms = 0.0f64;
    for frame in 0..frames {
        let out = session.render_frame(1.0 / 60.0);
        let sum_sq: f64 = out.left.iter().chain(out.right.iter()).map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum_sq / (out.left.len() + out.right.len()).max(1) as f64).sqrt();
        total_rms += rms;
        println!("export frame {frame:3}: rms={rms:.4}");
    }
    session.finish();
    println!("mean rms over {frames} frames: {:.4}", total_rms / frames.max(1) as f64);
}
