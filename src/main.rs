use logplay::cli::Args;
use logplay::config::{self, CONFIG_FILE, LoaderConfig};
use logplay::connectors::{ConnectorKind, LogMessage, MemoryConnector, Recording, StreamConnector};
use logplay::core::{ChannelScheduler, EventPayload, Loader, LoaderEvent, LoaderOptions};
use logplay::entities::{StreamSetting, StreamSettings};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Give up on a stream that never finishes
const STREAM_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::config_file("logplay.log", args.config_dir.clone()));
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
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

/// Feed JSON-line messages from `path` into `tx` on a reader thread
fn spawn_reader(path: PathBuf, tx: Sender<LogMessage>) -> Result<std::thread::JoinHandle<()>> {
    let file = std::fs::File::open(&path)
        .with_context(|| format!("Failed to open stream: {}", path.display()))?;
    let handle = std::thread::Builder::new()
        .name("logplay-reader".to_string())
        .spawn(move || {
            let reader = std::io::BufReader::new(file);
            for (idx, line) in reader.lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx.send(LogMessage::Error(format!("read failed: {}", e)));
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message = LogMessage::from_json(&line)
                    .unwrap_or_else(|e| LogMessage::Error(format!("line {}: {}", idx + 1, e)));
                if tx.send(message).is_err() {
                    return;
                }
            }
            let _ = tx.send(LogMessage::End);
        })?;
    Ok(handle)
}

fn build_connector(args: &Args) -> Result<(ConnectorKind, Option<std::thread::JoinHandle<()>>)> {
    if args.stream {
        let connector = StreamConnector::new();
        let tx = connector
            .sender()
            .context("Stream connector has no sender")?;
        let reader = spawn_reader(args.file_path.clone(), tx)?;
        Ok((connector.into(), Some(reader)))
    } else {
        let recording = Recording::load(&args.file_path)?;
        Ok((MemoryConnector::new(recording).into(), None))
    }
}

fn load_config(args: &Args) -> Result<LoaderConfig> {
    let path = config::config_file(CONFIG_FILE, args.config_dir.clone());
    let mut cfg = LoaderConfig::load(&path)?;
    if let Some(window) = args.time_window {
        cfg.time_window = window;
    }
    if let Some(look_ahead) = args.look_ahead {
        cfg.default_look_ahead = look_ahead;
    }
    Ok(cfg)
}

fn print_frame(loader: &Loader, requested: Option<f64>) -> Result<()> {
    let frame = loader.current_frame();
    let out = serde_json::json!({
        "seek": requested,
        "time": loader.current_time(),
        "look_ahead": loader.look_ahead(),
        "frame": frame.as_deref(),
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let cfg = load_config(args)?;
    let tick = Duration::from_millis(cfg.tick_interval_ms.max(1));
    config::set_global_config(cfg);

    let scheduler = Arc::new(ChannelScheduler::new());
    let (connector, reader) = build_connector(args)?;
    let mut loader = Loader::new(connector, LoaderOptions::new(scheduler.clone()));

    let finished = Arc::new(AtomicBool::new(false));
    for event in LoaderEvent::ALL {
        let finished = Arc::clone(&finished);
        loader.on(
            event,
            Arc::new(move |event: LoaderEvent, payload: &EventPayload| {
                match payload {
                    EventPayload::Message(msg) => warn!("Loader {}: {}", event, msg),
                    _ => info!("Loader {}", event),
                }
                if event == LoaderEvent::Finish {
                    finished.store(true, Ordering::SeqCst);
                }
            }),
        );
    }
    loader.subscribe(Arc::new(|generation: u64| {
        debug!("Loader: flushed generation {}", generation);
    }));

    loader.connect()?;
    info!("Replaying {}", args.file_path.display());

    let deadline = Instant::now() + STREAM_TIMEOUT;
    while !finished.load(Ordering::SeqCst) {
        if loader.poll() == 0 {
            std::thread::sleep(tick);
        }
        scheduler.poll();
        if Instant::now() > deadline {
            warn!("Stream did not finish within {:?}", STREAM_TIMEOUT);
            break;
        }
    }
    if let Some(reader) = reader {
        let _ = reader.join();
    }

    if !args.hide.is_empty() {
        let hidden: StreamSettings = args
            .hide
            .iter()
            .map(|name| (name.clone(), StreamSetting::Visible(false)))
            .collect();
        loader.update_stream_settings(hidden);
    }

    if args.seek.is_empty() {
        scheduler.poll();
        print_frame(&loader, None)?;
    }
    for &t in &args.seek {
        loader.seek(t);
        scheduler.poll();
        print_frame(&loader, Some(t))?;
    }

    for (name, count) in loader.stats().snapshot() {
        debug!("Stat {}: {}", name, count);
    }
    loader.teardown();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("logplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    run(&args)
}
