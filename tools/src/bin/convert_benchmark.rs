//! Retrocap Pixel Conversion Benchmark
//!
//! Measures live-frame conversion throughput for every source layout and
//! output type using the library's own lookup tables and converter.
//!
//! Usage:
//!   cargo run -p retrocap-tools --bin convert_benchmark [-- [OPTIONS]]
//!
//! Options:
//!   --size <WxH>        Frame size (default: 1920x1080)
//!   --frames <n>        Conversions per case (default: 200)
//!   --verbose           Extra debug output

use std::time::Instant;

use retrocap_lib::pixel::{convert, FrameBuffer, FrameData, OutputColor, YuvTables};
use retrocap_lib::video::{DecodedPicture, PixelLayout};

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FRAMES: usize = 200;

const LAYOUTS: &[PixelLayout] = &[PixelLayout::Yuv420p, PixelLayout::Yuv422p, PixelLayout::Yuyv422];

enum Sample {
    Byte,
    Float,
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");

    let (width, height) = args
        .iter()
        .position(|a| a == "--size")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| parse_size(s))
        .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
    let frames = args
        .iter()
        .position(|a| a == "--frames")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    let log_level = if verbose { "debug" } else { "info" };
    retrocap_lib::init_logging(log_level);

    println!("\n=== Retrocap Conversion Benchmark ===\n");
    println!("  {}x{}, {} frames per case\n", width, height, frames);

    let tables = YuvTables::new();
    let samples = (width * height) as usize * 3;
    let mut bytes = vec![0u8; samples];
    let mut floats = vec![0f32; samples];

    println!("  {:<10} {:<6} {:<6} {:>10} {:>12}", "Layout", "Output", "Type", "fps", "Mpix/s");
    println!("  {}", "-".repeat(48));

    for &layout in LAYOUTS {
        let picture = DecodedPicture::solid(width, height, layout, 120, 90, 200);
        for color in [OutputColor::Rgb, OutputColor::Yuv] {
            for sample in [Sample::Byte, Sample::Float] {
                let start = Instant::now();
                let mut failed = None;
                for _ in 0..frames {
                    let data = match sample {
                        Sample::Byte => FrameData::Byte(&mut bytes),
                        Sample::Float => FrameData::Float(&mut floats),
                    };
                    let mut out = FrameBuffer::packed(data, color, width as usize, height as usize);
                    if let Err(e) = convert(&tables, &picture, &mut out) {
                        failed = Some(e);
                        break;
                    }
                }
                let elapsed = start.elapsed().as_secs_f64();

                let type_name = match sample {
                    Sample::Byte => "u8",
                    Sample::Float => "f32",
                };
                let color_name = match color {
                    OutputColor::Rgb => "rgb",
                    OutputColor::Yuv => "yuv",
                };
                if let Some(e) = failed {
                    println!("  {:<10?} {:<6} {:<6} FAILED: {}", layout, color_name, type_name, e);
                    continue;
                }

                let fps = frames as f64 / elapsed.max(f64::EPSILON);
                let mpix = fps * (width * height) as f64 / 1_000_000.0;
                log::debug!("{:?}/{}/{}: {:.3}s total", layout, color_name, type_name, elapsed);
                println!(
                    "  {:<10?} {:<6} {:<6} {:>10.1} {:>12.1}",
                    layout, color_name, type_name, fps, mpix
                );
            }
        }
    }
    println!();
}
