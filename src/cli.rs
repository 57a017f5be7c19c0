use clap::Parser;
use std::path::PathBuf;

/// Replay a telemetry recording and print the frames it resolves to
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Recording to replay: a JSON recording, or JSON lines with --stream
    #[arg(value_name = "FILE")]
    pub file_path: PathBuf,

    /// Treat FILE as a stream of JSON-line messages fed through a channel
    #[arg(long = "stream")]
    pub stream: bool,

    /// Timestamp to resolve a frame at (can be specified multiple times)
    #[arg(short = 's', long = "seek", value_name = "SECONDS", allow_negative_numbers = true)]
    pub seek: Vec<f64>,

    /// Look-ahead window in seconds (default: from config)
    #[arg(short = 'a', long = "look-ahead", value_name = "SECONDS")]
    pub look_ahead: Option<f64>,

    /// Hide a stream (can be specified multiple times)
    #[arg(long = "hide", value_name = "STREAM")]
    pub hide: Vec<String>,

    /// Override the log start shift in seconds
    #[arg(short = 'w', long = "time-window", value_name = "SECONDS")]
    pub time_window: Option<f64>,

    /// Enable logging to file (default: logplay.log in the config dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
