use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use texplay::fill::Rect;
use texplay::graph::audio_sink::{AudioEndpoints, CpalEndpoints};
use texplay::platform::sim::{SimClip, SimPlatform};
use texplay::surface::SurfaceDevice;
use texplay::surface::host::HostSurfaceDevice;
use texplay::surface::wgpu_backend::WgpuSurfaceDevice;
use texplay::{PlayerFactory, PlayerSettings};

const DEMO_URL: &str = "sim://demo/loop.mp4";
const FRAME: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // --list-audio: print output endpoints and exit (no GPU, no playback)
    if std::env::args().any(|a| a == "--list-audio") {
        for endpoint in CpalEndpoints.active_render_endpoints() {
            println!("{}  ({})", endpoint.friendly_name, endpoint.id);
        }
        return Ok(());
    }

    let run_for = std::env::args()
        .skip(1)
        .find_map(|a| a.parse::<f32>().ok())
        .and_then(|secs| Duration::try_from_secs_f32(secs).ok())
        .unwrap_or(Duration::from_secs(5));

    let settings = PlayerSettings::load();

    let sim = SimPlatform::new();
    sim.set_lookahead(settings.lookahead());
    sim.register(
        DEMO_URL,
        SimClip::video(Duration::from_secs(2), 640, 360, 30),
    );

    let surfaces: Arc<dyn SurfaceDevice> = match WgpuSurfaceDevice::headless() {
        Ok(device) => Arc::new(device),
        Err(e) => {
            log::warn!("No GPU available ({e}), presenting into host memory");
            Arc::new(HostSurfaceDevice::new())
        }
    };

    let factory = PlayerFactory::new(
        Arc::new(sim.clone()),
        surfaces,
        Arc::new(CpalEndpoints),
        settings,
    );
    let mut player = factory.create()?;

    let loops = Arc::new(AtomicUsize::new(0));
    let counter = loops.clone();
    player.on_presentation_ended(move || {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!("Presentation ended ({n})");
    });
    player.on_play_started(|| log::info!("Playback started"));

    if !player.load(DEMO_URL, None, false) {
        anyhow::bail!("could not open {DEMO_URL}");
    }
    player.set_loop(true);
    player.play();

    let mut worker = sim.spawn_worker(FRAME)?;
    let viewport = Rect::new(0.0, 0.0, 1280.0, 720.0);
    let started = Instant::now();
    let mut drawn = 0u64;
    while started.elapsed() < run_for {
        player.update();
        if let Some(binding) = player.bind(0) {
            if let Some(quad) = player.draw(viewport) {
                log::trace!(
                    "Draw texture {:?} ({}x{}) into {:?}",
                    binding.texture,
                    binding.width,
                    binding.height,
                    quad.dst
                );
                drawn += 1;
            }
            player.unbind();
        }
        std::thread::sleep(FRAME);
    }

    log::info!(
        "Ran {:.1}s: {} draws, {} loops, position {:.2}s",
        started.elapsed().as_secs_f32(),
        drawn,
        loops.load(Ordering::Relaxed),
        player.position()
    );

    worker.stop();
    player.close();
    Ok(())
}
