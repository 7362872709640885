use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use framewire::cli::Args;
use framewire::config::{self, CoreConfig, PathConfig};
use framewire::core::{
    AffinityDispatcher, AffinityToken, EventKind, LoopMode, Media, PlaybackState, Player, PlayerContext,
    ScriptedEngineFactory, SimScript,
};
use framewire::video::{LoopbackCompositor, SoftwareGpu};

const PUMP_INTERVAL: Duration = Duration::from_millis(20);

fn init_logging(args: &Args, paths: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, paths));
        config::ensure_parent(&log_path)?;
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn open_next(player: &Player, token: &AffinityToken, queue: &mut VecDeque<Media>, args: &Args) -> Result<bool> {
    let Some(media) = queue.pop_front() else {
        return Ok(false);
    };
    info!("Opening {}", media);
    player
        .open(token, Some(media.clone()))
        .with_context(|| format!("Failed to open {}", media))?;
    if let Some(seek_ms) = args.seek_ms {
        player.seek_time(token, seek_ms).context("Seek rejected")?;
    }
    player.play(token).context("Play rejected")?;
    Ok(true)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let paths = PathConfig::from_env_and_cli(args.config_dir.clone());
    init_logging(&args, &paths)?;
    debug!("Command-line args: {:?}", args);

    let config = CoreConfig::load_or_default(&paths)?;
    info!("Config path: {}", config::config_file(config::CONFIG_FILE, &paths).display());
    let stop_timeout = config.stop_timeout();

    let compositor = Arc::new(LoopbackCompositor::new());
    let context = PlayerContext::new(config, compositor.clone());

    let script = SimScript {
        duration_ms: args.duration_ms.max(1),
        video: args.video(),
        ..SimScript::default()
    };
    let environment = context.create_environment(Arc::new(ScriptedEngineFactory::auto(script)), &[])?;

    // The main thread is the player's affinity thread
    let dispatcher = AffinityDispatcher::new();
    let token = dispatcher.token().context("Dispatcher not bound to main thread")?;
    let player = context.create_player(environment, Arc::clone(&dispatcher))?;
    let bridge = context.bridge(player.id()).context("Player has no event bridge")?;

    if script.video.is_some() {
        let (decode, compositor_device) = SoftwareGpu::pair("decode", "compositor");
        let channel = context.create_frame_channel(decode, compositor_device)?;
        player.set_video_output(&token, channel)?;
    }
    if args.loop_playback {
        player.set_loop_mode(&token, LoopMode::Loop)?;
    }
    if let Some(volume) = args.volume {
        player.set_volume(&token, volume)?;
    }
    if let Some(rate) = args.rate {
        player.set_rate(&token, rate)?;
    }

    let mut queue: VecDeque<Media> = args.media.iter().map(|uri| Media::from_uri(uri)).collect();
    if queue.is_empty() {
        queue.push_back(Media::file("demo.mp4"));
    }
    let run_limit = args.run_ms.map(Duration::from_millis).unwrap_or_else(|| {
        let passes = if args.loop_playback { 3 } else { queue.len() as u64 };
        Duration::from_millis(args.duration_ms.max(1) as u64 * passes + 1000)
    });
    let deadline = Instant::now() + run_limit;

    open_next(&player, &token, &mut queue, &args)?;
    let mut running = true;
    while running && Instant::now() < deadline {
        dispatcher.pump(PUMP_INTERVAL);

        let mut advance = false;
        for event in bridge.poll() {
            println!("{}", serde_json::to_string(&event)?);
            if let EventKind::PlaybackStateChanged { state } = event.kind {
                advance |= !args.loop_playback && matches!(state, PlaybackState::Stopped | PlaybackState::Error);
            }
        }
        if advance {
            running = open_next(&player, &token, &mut queue, &args)?;
        }
    }

    match player.stop_sync(&token, stop_timeout) {
        Ok(outcome) => debug!("Final stop: {:?}", outcome),
        Err(e) => warn!("Final stop failed: {}", e),
    }
    bridge.flush(stop_timeout);
    for event in bridge.poll() {
        println!("{}", serde_json::to_string(&event)?);
    }

    info!(
        "Composed {} frames ({} frame signals)",
        compositor.frames_composed(),
        compositor.frame_signals()
    );
    context.shutdown();
    dispatcher.terminate();
    Ok(())
}
