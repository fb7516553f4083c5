use anyhow::{bail, Result};
use audica::audio::{list_output_devices, AudioContext, BackendKind, ContextConfig};
use audica::{Audica, AudicaOptions, DataType, MediaElement};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Characters used for the text bar graph, quietest first
const LEVELS: &[u8] = b" .:-=+*#%@";

/// Columns in the text bar graph
const COLUMNS: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "audica")]
#[command(about = "Play a media file and print its waveform or spectrum", long_about = None)]
struct Args {
    /// Media file to play
    path: Option<PathBuf>,

    /// Values per snapshot (greater than 8, divisible by 8)
    #[arg(short, long, default_value = "256")]
    size: usize,

    /// Snapshot kind: time or hz
    #[arg(short, long, default_value = "time")]
    mode: DataType,

    /// Milliseconds between snapshots
    #[arg(long, default_value = "50")]
    interval_ms: u64,

    /// Print one JSON object per snapshot instead of bars
    #[arg(long)]
    json: bool,

    /// Output device id (see --list-devices)
    #[arg(long)]
    sink: Option<String>,

    /// Render without an output device
    #[arg(long)]
    manual: bool,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    time: f64,
    data_type: DataType,
    data: &'a [u8],
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.list_devices {
        for device in list_output_devices()? {
            let marker = if device.is_default { "*" } else { " " };
            println!("{} {:<32} {}", marker, device.id, device.name);
        }
        return Ok(());
    }

    let Some(path) = args.path.as_ref() else {
        bail!("No media file given (pass a path, or --list-devices)");
    };

    let element = MediaElement::open(path)?;
    let context = AudioContext::with_config(ContextConfig {
        backend: args.manual.then_some(BackendKind::Manual),
        sample_rate: None,
        sink_id: args.sink.clone(),
    })?;

    let audica = Audica::with_context(
        AudicaOptions {
            size: Some(args.size),
            element: Some(element.clone()),
            data_type: Some(args.mode),
        },
        context.clone(),
    )?;

    log::info!(
        "Playing {:?} ({:.1}s) through {:?} backend",
        path,
        element.duration(),
        context.backend()
    );

    element.play();
    let interval = Duration::from_millis(args.interval_ms.max(1));
    let frames_per_tick = (context.sample_rate() as u64 * interval.as_millis() as u64 / 1000) as usize;

    while !element.ended() {
        match context.backend() {
            BackendKind::Manual => {
                context.render(frames_per_tick)?;
            }
            BackendKind::Device => thread::sleep(interval),
        }

        let data = audica.get_data();
        if args.json {
            let snapshot = Snapshot {
                time: element.current_time(),
                data_type: audica.data_type(),
                data: &data,
            };
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            println!("{:>7.2}s |{}|", element.current_time(), bars(&data));
        }
    }

    context.close();
    log::info!("Playback finished");
    Ok(())
}

/// Average `data` down to `COLUMNS` characters
fn bars(data: &[u8]) -> String {
    let chunk = data.len().div_ceil(COLUMNS).max(1);
    data.chunks(chunk)
        .map(|values| {
            let mean = values.iter().map(|&v| v as usize).sum::<usize>() / values.len();
            LEVELS[mean * (LEVELS.len() - 1) / 255] as char
        })
        .collect()
}
