//! Retrocap command line recorder
//!
//! Opens a media source with GStreamer and records it, reading control
//! commands from stdin.
//!
//! Usage:
//!   retrocap <uri-or-path> [OPTIONS]
//!
//! Options:
//!   --mode <event|fragmented|streaming|live>   Recording mode (default: event)
//!   --out <template>                           Output template (default: capture.<format>)
//!   --format <name>                            Container format (default from config)
//!   --fragment-secs <n>                        Fragment length for fragmented mode
//!   --config <path>                            Config file (default: user config dir)
//!   --verbose                                  Debug logging
//!
//! Commands on stdin:
//!   save <before-secs> <after-secs> <path>     Save an event
//!   frame                                      Read one live frame and print its mean luma
//!   status                                     Print session status as JSON
//!   stop | quit                                Stop and exit

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use retrocap_lib::encoding::ContainerFormat;
use retrocap_lib::gst::{init_gstreamer_env, GstCodecs, GstMuxer, GstSource};
use retrocap_lib::pixel::{FrameBuffer, FrameData, OutputColor};
use retrocap_lib::recording::RecordingMode;
use retrocap_lib::{config, Config, FrameStatus, Session};

fn option(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(location) = args.get(1).filter(|a| !a.starts_with("--")).cloned() else {
        bail!("usage: retrocap <uri-or-path> [--mode event|fragmented|streaming|live] [--out template]");
    };

    let config_path = option(&args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let mut config = Config::load_or_default(&config_path);
    if let Some(secs) = option(&args, "--fragment-secs") {
        config.fragment_secs = secs.parse().context("--fragment-secs must be a whole number")?;
    }

    let log_level = if args.iter().any(|a| a == "--verbose") {
        "debug"
    } else {
        config.log_level.as_str()
    };
    retrocap_lib::init_logging(log_level);

    if !init_gstreamer_env() {
        bail!("GStreamer could not be initialized");
    }

    let format = match option(&args, "--format") {
        Some(name) => name.parse::<ContainerFormat>()?,
        None => config.container_format()?,
    };
    let template = option(&args, "--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("capture.{}", format.extension())));
    let mode = option(&args, "--mode").unwrap_or_else(|| "event".to_string());
    let recording_mode = match mode.as_str() {
        "event" => Some(RecordingMode::EventBuffer),
        "fragmented" => Some(RecordingMode::Fragmented {
            fragment_secs: config.fragment_secs,
        }),
        "streaming" => Some(RecordingMode::Streaming),
        "live" => None,
        other => bail!("unknown mode '{}'", other),
    };

    let mut session = Session::new(config, Arc::new(GstCodecs::new()), Arc::new(GstMuxer::new()))?;
    let source = GstSource::open(&location)?;
    let summary = session.initialize(Box::new(source))?;
    println!(
        "Source: {}x{}, {} frames at {} fps",
        summary.width,
        summary.height,
        summary.frame_count.map_or("?".to_string(), |n| n.to_string()),
        summary.frame_rate.map_or("?".to_string(), |f| format!("{:.2}", f))
    );

    match recording_mode {
        Some(mode) => session.start_recording(&template, format, mode)?,
        None => session.start_live()?,
    }
    println!("Running in {:?} mode. Commands: save <before> <after> <path>, frame, status, stop", session.state());

    let reader = session.reader();
    let mut frame = vec![0u8; 3 * (summary.width as usize) * (summary.height as usize)];

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            ["save", before, after, path] => parse_save(before, after).and_then(|(before, after)| {
                session
                    .request_event_capture(before, after, &PathBuf::from(path))
                    .map_err(Into::into)
            }),
            ["frame"] => {
                let mut out = FrameBuffer::packed(
                    FrameData::Byte(&mut frame),
                    OutputColor::Yuv,
                    summary.width as usize,
                    summary.height as usize,
                );
                match reader.read(&mut out) {
                    Ok(FrameStatus::Ready { pts }) => {
                        let luma = &frame[..(summary.width * summary.height) as usize];
                        let mean = luma.iter().map(|&v| v as u64).sum::<u64>() / luma.len().max(1) as u64;
                        println!("frame ready at pts {}, mean luma {}", pts, mean);
                        Ok(())
                    }
                    Ok(FrameStatus::NotReady) => {
                        println!("frame not ready");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            ["status"] => serde_json::to_string_pretty(&session.status())
                .map(|json| println!("{}", json))
                .map_err(Into::into),
            ["stop"] | ["quit"] => break,
            [] => Ok(()),
            _ => Err(anyhow!("unknown command '{}'", line.trim())),
        };
        if let Err(e) = result {
            eprintln!("error: {:#}", e);
        }
    }

    if session.state().is_running() {
        session.stop_recording()?;
    }
    if let Some(error) = session.last_error() {
        eprintln!("last background error: {}", error);
    }
    session.shutdown();
    Ok(())
}

fn parse_save(before: &str, after: &str) -> anyhow::Result<(f64, f64)> {
    let before = before.parse().context("before must be a number of seconds")?;
    let after = after.parse().context("after must be a number of seconds")?;
    Ok((before, after))
}
