use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use posture_monitor::camera::{FrameSource, OpenCvFactory};
use posture_monitor::config::Config;
use posture_monitor::logging;

const CONFIG_PATH: &str = "posture_monitor.toml";
const WAIT_FOR_FRAME: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    // Usage: frame_probe [config.toml] [snapshot.jpg]
    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or(CONFIG_PATH);
    let snapshot = args.get(2);

    let config = Config::load_or_default(config_path);
    logging::init(&config.logging.level);

    println!("=== Frame probe ({}) ===", env!("GIT_VERSION"));
    println!(
        "camera {}: requested {}x{} @ {}fps",
        config.camera.index, config.camera.width, config.camera.height, config.camera.fps
    );

    let factory = Arc::new(OpenCvFactory::from_config(&config.camera));
    let source = FrameSource::new(config.camera.clone(), factory);
    source.start();

    let deadline = Instant::now() + WAIT_FOR_FRAME;
    while source.peek().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }

    let status = source.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let Some(frame) = source.capture_for_inference() {
        println!(
            "frame #{}: {}x{} ch={} age={}ms",
            frame.sequence(),
            frame.width(),
            frame.height(),
            frame.channels(),
            frame.age_ms()
        );
    }

    if let Some(path) = snapshot {
        let Some(jpeg) = source.peek_jpeg(config.camera.jpeg_quality) else {
            source.release();
            bail!("no frame to save");
        };
        std::fs::write(path, &jpeg).with_context(|| format!("writing {}", path))?;
        println!("saved: {} ({} bytes)", path, jpeg.len());
    }

    source.release();

    if !status.available {
        bail!("camera {} unavailable", config.camera.index);
    }
    Ok(())
}
