//! Test pattern command - publish a synthetic sender

use anyhow::{anyhow, Context, Result};
use avatarcam_core::capture::{memshare, MemShareSender};
use avatarcam_core::config::ConfigFile;
use avatarcam_core::types::{now_ns, Frame, FrameFormat};
use avatarcam_core::PixelFormat;
use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info};

/// Arguments for the test-pattern command
#[derive(Args)]
pub struct TestPatternArgs {
    /// Sender name
    #[arg(short, long, default_value = "VRChatCam")]
    name: String,

    /// Frame width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Frame height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Frames per second
    #[arg(short, long, default_value = "30")]
    fps: u32,

    /// Pixel format (bgra8, rgba8, bgr8, rgb8)
    #[arg(long, default_value = "bgra8")]
    format: String,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

/// Publish a moving colour-bar pattern until Ctrl+C
pub async fn test_pattern(args: TestPatternArgs) -> Result<()> {
    let pixel_format: PixelFormat = args.format.parse().map_err(|e| anyhow!("{}", e))?;
    if pixel_format.channels().is_none() {
        return Err(anyhow!("Test pattern needs a packed RGB format, not {}", pixel_format));
    }
    if args.width == 0 || args.height == 0 || args.fps == 0 {
        return Err(anyhow!("Width, height and fps must be non-zero"));
    }

    let file = ConfigFile::load().context("Failed to load configuration")?;
    let dir = file
        .source
        .directory
        .clone()
        .unwrap_or_else(memshare::default_sender_dir);

    let format = FrameFormat::new(args.width, args.height, pixel_format);
    if format.buffer_size().is_none() {
        return Err(anyhow!("{} is too large to allocate", format));
    }
    let sender = MemShareSender::new(&dir, &args.name)
        .with_context(|| format!("Failed to create sender '{}' in {}", args.name, dir.display()))?;

    println!("AvatarCam - Test Pattern\n");
    println!("  Sender:  {}", args.name);
    println!("  Format:  {} @ {} fps", format, args.fps);
    println!("  Path:    {}", dir.display());
    println!("\nPress Ctrl+C to stop...");

    let stop = Arc::new(AtomicBool::new(false));
    let interval = Duration::from_secs_f64(1.0 / args.fps as f64);
    let limit = args.duration.map(Duration::from_secs);
    let publisher = {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || publish_loop(sender, format, interval, limit, &stop))
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            println!("\nStopping test pattern...");
        }
        _ = wait_for(&stop) => {}
    }
    stop.store(true, Ordering::SeqCst);

    let published = publisher.await.context("Publisher task failed")??;
    println!("Published {} frames.", published);
    Ok(())
}

async fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn publish_loop(
    mut sender: MemShareSender,
    format: FrameFormat,
    interval: Duration,
    limit: Option<Duration>,
    stop: &AtomicBool,
) -> Result<u64> {
    let started = Instant::now();
    let mut next = started;
    let mut index: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        let frame = Frame::new(format, render(format, index), now_ns())?;
        sender.publish(&frame).context("Failed to publish frame")?;
        index += 1;

        next += interval;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    stop.store(true, Ordering::SeqCst);
    sender.close().context("Failed to close sender")?;
    info!("Test pattern stopped after {} frames", sender.frames_published());
    Ok(sender.frames_published())
}

/// Eight colour bars scrolling right, one pixel column per frame
fn render(format: FrameFormat, index: u64) -> Vec<u8> {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [255, 255, 0],
        [0, 255, 255],
        [0, 255, 0],
        [255, 0, 255],
        [255, 0, 0],
        [0, 0, 255],
        [16, 16, 16],
    ];

    let mut data = vec![0u8; format.buffer_size().unwrap_or_default()];
    let Some(layout) = format.pixel_format.channels() else {
        return data;
    };
    let bpp = format.pixel_format.bytes_per_pixel();
    let width = format.width as u64;
    let bar_width = (width / BARS.len() as u64).max(1);
    let stride = format.stride();

    for (y, row) in data.chunks_exact_mut(stride).enumerate() {
        // Bottom strip shows a frame counter ramp
        let counter_row = y as u32 >= format.height - format.height / 16;
        for (x, px) in row.chunks_exact_mut(bpp).enumerate() {
            let [r, g, b] = if counter_row {
                let v = ((x as u64 + index * 4) % 256) as u8;
                [v, v, v]
            } else {
                let shifted = (x as u64 + width - index % width) % width;
                BARS[((shifted / bar_width) as usize).min(BARS.len() - 1)]
            };
            px[layout.r] = r;
            px[layout.g] = g;
            px[layout.b] = b;
            if let Some(a) = layout.a {
                px[a] = 255;
            }
        }
    }
    data
}
