use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mouthpiece::assets::PendingAssets;
use mouthpiece::audio::manager::Manager;
use mouthpiece::control::feed::spawn_feed;
use mouthpiece::control::modulation::{LoopExit, ModulationLoop};
use mouthpiece::control::range::RangeTracker;
use mouthpiece::control::rig::AudioEngine;
use mouthpiece::control::selection::Effect;
use mouthpiece::fx::chain::EffectChainManager;
use mouthpiece::settings::Settings;
use std::{
    io::{self, BufReader},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Parser, Debug)]
#[command(name = "mouthpiece")]
#[command(version)]
#[command(about = "Face-controlled effect chain. Reads feature frames as JSON lines on stdin.")]
struct Args {
    #[arg(long, env = "MOUTHPIECE_CONFIG", help = "JSON settings file")]
    config: Option<PathBuf>,
    #[arg(long, env = "IR_PATH", help = "Impulse response WAV file")]
    ir: Option<String>,
    #[arg(long, value_enum, help = "Effect selected at startup")]
    effect: Option<Effect>,
    #[arg(long, env = "INPUT_PORT", help = "JACK port feeding the chain")]
    input_port: Option<String>,
    #[arg(long, env = "OUTPUT_LEFT_PORT")]
    output_left_port: Option<String>,
    #[arg(long, env = "OUTPUT_RIGHT_PORT")]
    output_right_port: Option<String>,
    #[arg(long, help = "Feature region tracked for modulation")]
    region: Option<String>,
    #[arg(long, help = "Start with the convolution stage bypassed")]
    no_convolution: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        if let Some(ir) = &self.ir {
            settings.ir_path.clone_from(ir);
        }
        if let Some(effect) = self.effect {
            settings.effect = effect;
        }
        if let Some(port) = &self.input_port {
            settings.audio.input_port.clone_from(port);
        }
        if let Some(port) = &self.output_left_port {
            settings.audio.output_left_port.clone_from(port);
        }
        if let Some(port) = &self.output_right_port {
            settings.audio.output_right_port.clone_from(port);
        }
        if let Some(region) = &self.region {
            settings.modulation.region.clone_from(region);
        }
        if self.no_convolution {
            settings.convolution_enabled = false;
        }

        Ok(settings)
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    info!("Mouthpiece v{}", env!("CARGO_PKG_VERSION"));
    info!("Args: {:?}", args);

    let settings = args.settings()?;
    info!("{settings}");

    let manager = Manager::new(&settings.audio).context("failed to create audio manager")?;
    let sample_rate = manager.sample_rate();

    let assets = PendingAssets::load(PathBuf::from(&settings.ir_path), sample_rate);
    let mut chain = EffectChainManager::new(manager.engine().clone(), assets, sample_rate as f32);
    chain.set_convolution_enabled(settings.convolution_enabled);

    let range = RangeTracker::new(settings.modulation.range_min, settings.modulation.range_max);
    let mut engine = AudioEngine::new(
        chain,
        manager,
        range,
        settings.modulation.region.clone(),
        settings.effect,
    );
    engine.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let shutdown_flag = Arc::clone(&running);

    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        shutdown_flag.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")?;

    let feed = spawn_feed(BufReader::new(io::stdin()));
    let mut modulation = ModulationLoop::new(feed.detector, running);

    loop {
        match modulation.run(&mut engine) {
            Ok(LoopExit::Stopped) => break,
            Ok(LoopExit::DetectorClosed) => {
                info!("Feature feed closed");
                break;
            }
            Err(e) => {
                error!("{e}");
                if let Err(restart) = modulation.restart_detector() {
                    warn!("Detector restart failed: {restart:#}");
                    return Err(e.into());
                }
                engine.reset_calibration();
            }
        }
    }

    info!("Processed {} frames", modulation.frames_processed());
    Ok(())
}
