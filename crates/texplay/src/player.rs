//! Application-facing player. Wraps one [`SessionController`] and its shared surface,
//! reports failures as `bool`/`Option` and logs them, and hands the renderer the current
//! video frame through bind/unbind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::PlayerError;
use crate::fill::{DrawQuad, Rect, VideoFill};
use crate::graph::audio_sink::AudioEndpoints;
use crate::platform::MediaPlatform;
use crate::platform::context::PlatformContext;
use crate::presenter::Presenter;
use crate::session::state::{CommandOutcome, PlaybackState};
use crate::session::{ControllerConfig, SessionController};
use crate::settings::PlayerSettings;
use crate::signal::{Connection, Signal};
use crate::surface::{ExternalTexture, SharedSurfaceGateway, SurfaceDevice, SurfaceGuard};

/// Creates players that share one media platform, one surface device and one set of
/// audio endpoints.
pub struct PlayerFactory {
    context: PlatformContext,
    surfaces: Arc<dyn SurfaceDevice>,
    endpoints: Arc<dyn AudioEndpoints>,
    settings: PlayerSettings,
    next_id: AtomicU32,
}

impl PlayerFactory {
    pub fn new(
        platform: Arc<dyn MediaPlatform>,
        surfaces: Arc<dyn SurfaceDevice>,
        endpoints: Arc<dyn AudioEndpoints>,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            context: PlatformContext::new(platform),
            surfaces,
            endpoints,
            settings,
            next_id: AtomicU32::new(1),
        }
    }

    pub fn create(&self) -> Result<Player, PlayerError> {
        let lease = self.context.acquire().map_err(PlayerError::Platform)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let gateway = Arc::new(SharedSurfaceGateway::new(self.surfaces.clone()));
        let presenter = Arc::new(Presenter::new(
            id,
            gateway.clone(),
            self.settings.effective_pool_depth(),
        ));
        let controller = SessionController::new(
            lease,
            self.endpoints.clone(),
            presenter,
            ControllerConfig::from(&self.settings),
        );
        log::debug!("Created player {id} on {}", self.surfaces.name());
        Ok(Player {
            id,
            controller,
            gateway,
            external: ExternalTexture(u64::from(id)),
            fill: self.settings.video_fill,
            audio_only: false,
            play_pending: false,
            play_started: Signal::new(),
            binds: 0,
            bound_unit: None,
            default_audio_device: self.settings.audio_device.clone(),
        })
    }

    pub fn context(&self) -> &PlatformContext {
        &self.context
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    /// Abnormal exit: shut the platform down even though players are still alive.
    pub fn force_exit(&self) {
        self.context.force_shutdown();
    }
}

/// What a renderer needs to sample the bound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: ExternalTexture,
    pub unit: u32,
    pub width: u32,
    pub height: u32,
}

/// Exclusive access to the shared surface for the lifetime of the value.
pub struct ScopedBind<'a> {
    guard: SurfaceGuard<'a>,
    binding: TextureBinding,
}

impl ScopedBind<'_> {
    pub fn binding(&self) -> TextureBinding {
        self.binding
    }

    pub fn guard(&self) -> &SurfaceGuard<'_> {
        &self.guard
    }
}

pub struct Player {
    id: u32,
    controller: SessionController,
    gateway: Arc<SharedSurfaceGateway>,
    external: ExternalTexture,
    fill: VideoFill,
    audio_only: bool,
    play_pending: bool,
    play_started: Signal,
    binds: usize,
    bound_unit: Option<u32>,
    default_audio_device: Option<String>,
}

impl Player {
    pub fn id(&self) -> u32 {
        self.id
    }

    // ---- loading ----

    /// Open `path`. An empty or missing hint falls back to the configured audio device.
    pub fn load(&mut self, path: &str, audio_hint: Option<&str>, audio_only: bool) -> bool {
        let hint = self.audio_hint(audio_hint);
        self.audio_only = audio_only;
        self.play_pending = false;
        match self.controller.open(path, hint.as_deref()) {
            Ok(()) => {
                self.ensure_surface();
                true
            }
            Err(e) => {
                log::error!("Could not load {path}: {e}");
                false
            }
        }
    }

    /// Like [`load`](Self::load) but resolution completes in the background; media info
    /// becomes available on a later [`update`](Self::update).
    pub fn load_async(&mut self, path: &str, audio_hint: Option<&str>, audio_only: bool) -> bool {
        let hint = self.audio_hint(audio_hint);
        self.audio_only = audio_only;
        self.play_pending = false;
        match self.controller.open_async(path, hint.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not load {path}: {e}");
                false
            }
        }
    }

    /// Play several files together. The first one's video reaches this player's surface;
    /// later ones present into [`sequence_gateways`](Self::sequence_gateways).
    pub fn load_sequence(&mut self, paths: &[&str], audio_hint: Option<&str>) -> bool {
        let hint = self.audio_hint(audio_hint);
        self.audio_only = false;
        self.play_pending = false;
        match self.controller.open_sequence(paths, hint.as_deref()) {
            Ok(()) => {
                self.ensure_surface();
                true
            }
            Err(e) => {
                log::error!("Could not load sequence: {e}");
                false
            }
        }
    }

    fn audio_hint(&self, hint: Option<&str>) -> Option<String> {
        hint.filter(|h| !h.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_audio_device.clone())
    }

    fn ensure_surface(&self) {
        let info = self.controller.media_info();
        if self.audio_only || !info.has_video || info.width == 0 || info.height == 0 {
            return;
        }
        match self
            .gateway
            .create_or_resize(info.width, info.height, self.external)
        {
            Ok(true) => log::debug!(
                "Player {} surface is now {}x{}",
                self.id,
                info.width,
                info.height
            ),
            Ok(false) => {}
            Err(e) => log::warn!("Player {} could not create its surface: {e}", self.id),
        }
    }

    // ---- transport ----

    pub fn play(&mut self) {
        match self.controller.play() {
            Ok(CommandOutcome::Issued | CommandOutcome::Latched) => self.play_pending = true,
            Ok(_) => {}
            Err(e) => log::warn!("play: {e}"),
        }
    }

    pub fn pause(&mut self) {
        match self.controller.pause() {
            Ok(_) => self.play_pending = false,
            Err(e) => log::debug!("pause: {e}"),
        }
    }

    pub fn stop(&mut self) {
        self.play_pending = false;
        if let Err(e) = self.controller.stop() {
            log::debug!("stop: {e}");
        }
    }

    pub fn close(&mut self) {
        self.play_pending = false;
        if let Err(e) = self.controller.close() {
            log::error!("close: {e}");
        }
    }

    /// Handle pending session events. Call once per frame from the thread that owns the
    /// player.
    pub fn update(&mut self) {
        self.controller.pump_events();
        self.ensure_surface();
        if !self.play_pending {
            return;
        }
        match self.controller.state() {
            PlaybackState::Started => {
                self.play_pending = false;
                self.play_started.emit();
            }
            state if state.is_opening() => {}
            state => {
                log::debug!("Play never started, player is {state}");
                self.play_pending = false;
            }
        }
    }

    /// Percentage of the network buffer that is filled. `None` for local files.
    pub fn buffer_progress(&self) -> Option<u32> {
        self.controller.buffer_progress()
    }

    pub fn set_position(&mut self, secs: f32) {
        let mut secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
        let duration = self.controller.duration();
        if duration > Duration::ZERO {
            secs = secs.min(duration.as_secs_f32());
        }
        let target = match Duration::try_from_secs_f32(secs) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("seek to {secs}s: {e}");
                return;
            }
        };
        if let Err(e) = self.controller.seek(target) {
            log::warn!("seek: {e}");
        }
    }

    pub fn step_forward(&mut self) -> bool {
        match self.controller.step_forward() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("step: {e}");
                false
            }
        }
    }

    pub fn set_volume(&mut self, level: f32) {
        if let Err(e) = self.controller.set_volume(level) {
            log::warn!("volume: {e}");
        }
    }

    pub fn volume(&self) -> f32 {
        self.controller.volume()
    }

    pub fn set_speed(&mut self, rate: f32, thinning: bool) -> bool {
        match self.controller.set_rate(rate, thinning) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("speed {rate}: {e}");
                false
            }
        }
    }

    pub fn speed(&self) -> f32 {
        self.controller.rate().speed
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.controller.set_looping(looping);
    }

    pub fn is_looping(&self) -> bool {
        self.controller.is_looping()
    }

    // ---- queries ----

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn position(&self) -> f32 {
        self.controller.position().as_secs_f32()
    }

    pub fn duration(&self) -> f32 {
        self.controller.duration().as_secs_f32()
    }

    pub fn frame_rate(&self) -> f32 {
        self.controller.media_info().frames_per_second()
    }

    pub fn width(&self) -> u32 {
        self.controller.media_info().width
    }

    pub fn height(&self) -> u32 {
        self.controller.media_info().height
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Started
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    /// Stopped or paused.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state(), PlaybackState::Stopped | PlaybackState::Paused)
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    // ---- texture ----

    /// Lock the surface for the renderer until [`unbind`](Self::unbind). Blocks while the
    /// presenter is writing a frame.
    pub fn bind(&mut self, unit: u32) -> Option<TextureBinding> {
        if self.audio_only {
            return None;
        }
        self.gateway.lock_unscoped();
        let Some((width, height)) = self.gateway.size() else {
            self.gateway.unlock();
            return None;
        };
        self.binds += 1;
        self.bound_unit = Some(unit);
        Some(TextureBinding {
            texture: self.external,
            unit,
            width,
            height,
        })
    }

    pub fn unbind(&mut self) -> bool {
        if self.binds == 0 {
            return false;
        }
        self.binds -= 1;
        if self.binds == 0 {
            self.bound_unit = None;
        }
        self.gateway.unlock();
        true
    }

    /// Bind for the lifetime of the returned value.
    pub fn scoped_bind(&self, unit: u32) -> Option<ScopedBind<'_>> {
        if self.audio_only {
            return None;
        }
        let guard = self.gateway.lock();
        let (width, height) = guard.size()?;
        Some(ScopedBind {
            guard,
            binding: TextureBinding {
                texture: self.external,
                unit,
                width,
                height,
            },
        })
    }

    pub fn bound_unit(&self) -> Option<u32> {
        self.bound_unit
    }

    pub fn is_texture_locked(&self) -> bool {
        self.gateway.is_locked()
    }

    /// Where and how to draw the current frame into `dest`. `None` without a video surface.
    pub fn draw(&self, dest: Rect) -> Option<DrawQuad> {
        if self.audio_only || dest.is_empty() {
            return None;
        }
        let guard = self.gateway.lock();
        let size = guard.size()?;
        Some(DrawQuad::layout(self.external, size, dest, self.fill))
    }

    pub fn set_video_fill(&mut self, fill: VideoFill) {
        self.fill = fill;
    }

    pub fn video_fill(&self) -> VideoFill {
        self.fill
    }

    pub fn has_texture(&self) -> bool {
        !self.audio_only && self.gateway.is_created()
    }

    pub fn texture(&self) -> Option<ExternalTexture> {
        self.gateway.external()
    }

    pub fn texture_size(&self) -> Option<(u32, u32)> {
        self.gateway.size()
    }

    pub fn gateway(&self) -> &Arc<SharedSurfaceGateway> {
        &self.gateway
    }

    /// Surfaces of the later sources of a sequence, in load order. Empty for single loads.
    pub fn sequence_gateways(&self) -> Vec<Arc<SharedSurfaceGateway>> {
        self.controller
            .sequence_presenters()
            .iter()
            .map(|p| p.gateway().clone())
            .collect()
    }

    // ---- signals ----

    pub fn on_play_started(&self, slot: impl Fn() + Send + Sync + 'static) -> Connection {
        self.play_started.connect(slot)
    }

    pub fn on_presentation_ended(&self, slot: impl Fn() + Send + Sync + 'static) -> Connection {
        self.controller.presentation_ended().connect(slot)
    }

    pub fn play_started_signal(&self) -> &Signal {
        &self.play_started
    }

    pub fn presentation_ended_signal(&self) -> &Signal {
        self.controller.presentation_ended()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        while self.unbind() {}
        if let Err(e) = self.controller.close() {
            log::warn!("Player {} did not close cleanly: {e}", self.id);
        }
        self.gateway.release();
    }
}
