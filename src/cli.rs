use clap::Parser;
use std::path::PathBuf;

// Build version with engine info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Engine: scripted (in-process)\n",
    "GPU:    software handoff\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Drive a scripted player through the framewire core and print its events as JSON lines
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Media URI to open (file path, file://, dshow:// or any network URL); repeat to play in sequence
    #[arg(short = 'm', long = "media", value_name = "URI")]
    pub media: Vec<String>,

    /// Loop the current media instead of advancing
    #[arg(short = 'o', long = "loop")]
    pub loop_playback: bool,

    /// Seek to this time (ms) right after opening; applied once playback starts
    #[arg(long = "seek-ms", value_name = "MS")]
    pub seek_ms: Option<i64>,

    /// Volume 0..1 (clamped)
    #[arg(long = "volume", value_name = "VOLUME")]
    pub volume: Option<f64>,

    /// Playback rate
    #[arg(long = "rate", value_name = "RATE")]
    pub rate: Option<f64>,

    /// Simulated media length
    #[arg(long = "duration-ms", value_name = "MS", default_value_t = 2000)]
    pub duration_ms: i64,

    /// Simulated decoded frame size; 0 0 for audio-only
    #[arg(long = "video-size", value_names = ["WIDTH", "HEIGHT"], num_args = 2)]
    pub video_size: Option<Vec<u32>>,

    /// Stop after this long (default: every media once, or three passes with --loop)
    #[arg(long = "run-ms", value_name = "MS")]
    pub run_ms: Option<u64>,

    /// Enable logging to file (default: framewire.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// Decoded frame size, `None` when video is disabled
    pub fn video(&self) -> Option<(u32, u32)> {
        match self.video_size.as_deref() {
            Some([0, _]) | Some([_, 0]) => None,
            Some([w, h]) => Some((*w, *h)),
            _ => Some((640, 360)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequence() {
        let args = Args::parse_from([
            "framewire", "-m", "a.mp4", "--media", "rtsp://cam/1", "--loop", "--seek-ms", "500", "-vv",
        ]);
        assert_eq!(args.media, vec!["a.mp4", "rtsp://cam/1"]);
        assert!(args.loop_playback);
        assert_eq!(args.seek_ms, Some(500));
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.duration_ms, 2000);
        assert_eq!(args.video(), Some((640, 360)));
    }

    #[test]
    fn test_video_size() {
        let args = Args::parse_from(["framewire", "--video-size", "1920", "1080"]);
        assert_eq!(args.video(), Some((1920, 1080)));
        let args = Args::parse_from(["framewire", "--video-size", "0", "0"]);
        assert_eq!(args.video(), None);
    }

    #[test]
    fn test_log_flag_optional_value() {
        let args = Args::parse_from(["framewire", "--log"]);
        assert_eq!(args.log_file, Some(None));
        let args = Args::parse_from(["framewire", "--log", "out.log"]);
        assert_eq!(args.log_file, Some(Some(PathBuf::from("out.log"))));
    }
}
