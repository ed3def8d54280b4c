//! Session controller: owns one platform session at a time, issues transport commands,
//! and folds the session's asynchronous events into the playback state.

pub mod events;
pub mod rate;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use events::{Delivery, EventRelay};
use rate::{RatePlan, RateRejection, RateState, plan_rate_change};
use state::{
    Action, Command, CommandOutcome, Gate, Machine, PendingIntent, PlaybackState, SessionEvent,
    dispatch, gate,
};

use crate::error::PlayerError;
use crate::graph::audio_sink::AudioEndpoints;
use crate::graph::{GraphBuilder, GraphError, SequencedSource};
use crate::platform::context::PlatformLease;
use crate::platform::{
    EventKind, MajorType, MediaPlatform, MediaSession, MediaSource, PlatformError,
    PresentationDescriptor,
};
use crate::presenter::Presenter;
use crate::settings::{PlayerSettings, ReverseLoopPoint};
use crate::signal::Signal;
use crate::surface::{ExternalTexture, SharedSurfaceGateway};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub close_timeout: Duration,
    pub reverse_loop_point: ReverseLoopPoint,
    pub pool_depth: usize,
}

impl From<&PlayerSettings> for ControllerConfig {
    fn from(settings: &PlayerSettings) -> Self {
        Self {
            close_timeout: settings.close_timeout(),
            reverse_loop_point: settings.reverse_loop_point,
            pool_depth: settings.effective_pool_depth(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&PlayerSettings::default())
    }
}

/// What the first selected video stream says about the media.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<(u32, u32)>,
    pub duration: Duration,
    pub has_audio: bool,
    pub has_video: bool,
}

impl MediaInfo {
    pub fn from_presentation(presentation: &PresentationDescriptor) -> Self {
        let video = presentation.first_selected_video();
        let (width, height) = video.and_then(|v| v.frame_size).unwrap_or((0, 0));
        Self {
            width,
            height,
            frame_rate: video.and_then(|v| v.frame_rate),
            duration: presentation.duration,
            has_audio: presentation
                .selected()
                .any(|s| s.major_type == MajorType::Audio),
            has_video: video.is_some(),
        }
    }

    pub fn frames_per_second(&self) -> f32 {
        match self.frame_rate {
            Some((num, den)) if den > 0 => num as f32 / den as f32,
            _ => 0.0,
        }
    }

    pub fn frame_interval(&self) -> Option<Duration> {
        match self.frame_rate {
            Some((num, den)) if num > 0 => Some(Duration::from_secs_f64(
                f64::from(den) / f64::from(num),
            )),
            _ => None,
        }
    }
}

struct ActiveSession {
    session: Arc<dyn MediaSession>,
    sources: Vec<Arc<dyn MediaSource>>,
    relay: Arc<EventRelay>,
    deliveries: Receiver<Delivery>,
    closed: Receiver<()>,
}

pub struct SessionController {
    lease: PlatformLease,
    endpoints: Arc<dyn AudioEndpoints>,
    presenter: Arc<Presenter>,
    sequence_presenters: Vec<Arc<Presenter>>,
    config: ControllerConfig,
    state: PlaybackState,
    pending: Option<PendingIntent>,
    looping: bool,
    volume: f32,
    volume_pending: bool,
    audio_hint: Option<String>,
    url: Option<String>,
    media: MediaInfo,
    active: Option<ActiveSession>,
    open_failure: Option<PlatformError>,
    presentation_ended: Signal,
}

impl SessionController {
    pub fn new(
        lease: PlatformLease,
        endpoints: Arc<dyn AudioEndpoints>,
        presenter: Arc<Presenter>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            lease,
            endpoints,
            presenter,
            sequence_presenters: Vec::new(),
            config,
            state: PlaybackState::Closed,
            pending: None,
            looping: false,
            volume: 1.0,
            volume_pending: false,
            audio_hint: None,
            url: None,
            media: MediaInfo::default(),
            active: None,
            open_failure: None,
            presentation_ended: Signal::new(),
        }
    }

    fn platform(&self) -> Arc<dyn MediaPlatform> {
        self.lease.platform().clone()
    }

    fn session(&self) -> Option<Arc<dyn MediaSession>> {
        self.active.as_ref().map(|a| a.session.clone())
    }

    fn machine(&self) -> Machine {
        Machine {
            state: self.state,
            pending: self.pending,
            looping: self.looping,
            speed: self.rate().speed,
            duration: self.media.duration,
            reverse_loop_point: self.config.reverse_loop_point,
        }
    }

    // ---- opening ----

    fn create_session(&mut self) -> Result<(), PlayerError> {
        if self.active.is_some() {
            if let Err(e) = self.close_session() {
                log::warn!("Previous session did not close cleanly: {e}");
            }
        }
        self.release_sequence_presenters();
        self.open_failure = None;
        let session = self.platform().create_session().map_err(PlayerError::Open)?;
        let (relay, channels) = EventRelay::new();
        if let Err(e) = relay.attach(&session) {
            session.shutdown();
            return Err(PlayerError::Open(e));
        }
        self.active = Some(ActiveSession {
            session,
            sources: Vec::new(),
            relay,
            deliveries: channels.deliveries,
            closed: channels.closed,
        });
        self.state = PlaybackState::Ready;
        self.pending = None;
        self.volume_pending = (self.volume - 1.0).abs() > f32::EPSILON;
        Ok(())
    }

    fn fail_open(&mut self, error: PlayerError) -> PlayerError {
        log::error!(
            "Failed to open {}: {error}",
            self.url.as_deref().unwrap_or("<none>")
        );
        if let Err(e) = self.close_session() {
            log::warn!("Cleanup after failed open: {e}");
        }
        self.state = PlaybackState::Closed;
        self.pending = None;
        error
    }

    /// Open `url` synchronously. Returns once the graph is submitted; the session reports
    /// readiness later through [`pump_events`](Self::pump_events).
    pub fn open(&mut self, url: &str, audio_hint: Option<&str>) -> Result<(), PlayerError> {
        log::info!("Opening {url}");
        self.create_session()?;
        self.url = Some(url.to_string());
        self.audio_hint = audio_hint.map(str::to_string);
        let source = match self.platform().resolve_source(url) {
            Ok(source) => source,
            Err(e) => return Err(self.fail_open(PlayerError::Open(e))),
        };
        if let Some(active) = &mut self.active {
            active.sources = vec![source.clone()];
        }
        match self.submit_graph(&source, None) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_open(e)),
        }
    }

    /// Open `url` with source resolution completing on a platform thread.
    pub fn open_async(&mut self, url: &str, audio_hint: Option<&str>) -> Result<(), PlayerError> {
        log::info!("Opening {url} asynchronously");
        self.create_session()?;
        self.url = Some(url.to_string());
        self.audio_hint = audio_hint.map(str::to_string);
        let sink = self.active.as_ref().and_then(|a| a.relay.sink());
        let Some(sink) = sink else {
            return Err(self.fail_open(PlayerError::Open(PlatformError::Shutdown)));
        };
        if let Err(e) = self.platform().begin_resolve_source(url, sink) {
            return Err(self.fail_open(PlayerError::Open(e)));
        }
        self.state = PlaybackState::OpeningAsync;
        Ok(())
    }

    /// Play several sources in one graph. The first source drives the primary presenter;
    /// each later source gets its own presenter and a surface sized to its video stream.
    pub fn open_sequence(&mut self, urls: &[&str], audio_hint: Option<&str>) -> Result<(), PlayerError> {
        if urls.is_empty() {
            return Err(PlayerError::Graph(GraphError::NoStreams));
        }
        log::info!("Opening sequence of {} sources", urls.len());
        self.create_session()?;
        self.url = Some(urls.join(", "));
        self.audio_hint = audio_hint.map(str::to_string);

        let mut parts = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let resolved = self
                .platform()
                .resolve_source(url)
                .and_then(|source| source.presentation().map(|pd| (source, pd)));
            let (source, presentation) = match resolved {
                Ok(ok) => ok,
                Err(e) => return Err(self.fail_open(PlayerError::Open(e))),
            };
            let presenter = if i == 0 {
                self.presenter.clone()
            } else {
                let gateway = Arc::new(SharedSurfaceGateway::new(
                    self.presenter.gateway().device().clone(),
                ));
                if let Some((width, height)) =
                    presentation.first_selected_video().and_then(|v| v.frame_size)
                {
                    let external =
                        ExternalTexture((u64::from(self.presenter.id()) << 32) | i as u64);
                    if let Err(e) = gateway.create_or_resize(width, height, external) {
                        log::warn!("No surface for sequence source {url}: {e}");
                    }
                }
                let id = (self.presenter.id() << 8) | i as u32;
                let presenter = Arc::new(Presenter::new(id, gateway, self.config.pool_depth));
                self.sequence_presenters.push(presenter.clone());
                presenter
            };
            parts.push(SequencedSource {
                source,
                presentation,
                presenter,
            });
        }
        if let Some(active) = &mut self.active {
            active.sources = parts.iter().map(|p| p.source.clone()).collect();
        }

        let built = GraphBuilder::new(self.endpoints.as_ref())
            .build_sequenced(&parts, self.audio_hint.as_deref());
        let graph = match built {
            Ok(graph) => graph,
            Err(e) => return Err(self.fail_open(e.into())),
        };
        self.media = MediaInfo::from_presentation(&parts[0].presentation);
        self.state = PlaybackState::OpeningSync;
        let submitted = self
            .session()
            .ok_or(PlatformError::Shutdown)
            .and_then(|s| s.set_topology(graph));
        if let Err(e) = submitted {
            return Err(self.fail_open(PlayerError::Open(e)));
        }
        Ok(())
    }

    fn submit_graph(
        &mut self,
        source: &Arc<dyn MediaSource>,
        presentation: Option<PresentationDescriptor>,
    ) -> Result<(), PlayerError> {
        let presentation = match presentation {
            Some(pd) => pd,
            None => source.presentation().map_err(PlayerError::Open)?,
        };
        let graph = GraphBuilder::new(self.endpoints.as_ref()).build(
            source,
            &presentation,
            &self.presenter,
            self.audio_hint.as_deref(),
        )?;
        self.media = MediaInfo::from_presentation(&presentation);
        self.state = PlaybackState::OpeningSync;
        let session = self
            .session()
            .ok_or(PlayerError::Open(PlatformError::Shutdown))?;
        session.set_topology(graph).map_err(PlayerError::Open)?;
        log::debug!(
            "Submitted graph for {} ({}x{}, {:.2} fps)",
            source.url(),
            self.media.width,
            self.media.height,
            self.media.frames_per_second()
        );
        Ok(())
    }

    // ---- transport ----

    pub fn play(&mut self) -> Result<CommandOutcome, PlayerError> {
        match gate(self.state, Command::Play) {
            Gate::Issue => {
                self.run(Action::Start)?;
                Ok(CommandOutcome::Issued)
            }
            Gate::Latch => {
                self.pending = Some(PendingIntent::Play);
                log::debug!("Play latched until the graph is ready");
                Ok(CommandOutcome::Latched)
            }
            Gate::Reject => Err(PlayerError::invalid(Command::Play.name(), self.state)),
        }
    }

    pub fn pause(&mut self) -> Result<CommandOutcome, PlayerError> {
        if self.state.is_opening() && self.pending.take().is_some() {
            log::debug!("Pause cancelled the latched play");
            return Ok(CommandOutcome::Cancelled);
        }
        match gate(self.state, Command::Pause) {
            Gate::Issue => {
                self.run(Action::Pause)?;
                Ok(CommandOutcome::Issued)
            }
            _ => Err(PlayerError::invalid(Command::Pause.name(), self.state)),
        }
    }

    pub fn stop(&mut self) -> Result<CommandOutcome, PlayerError> {
        match gate(self.state, Command::Stop) {
            Gate::Issue => {
                self.run(Action::Stop)?;
                Ok(CommandOutcome::Issued)
            }
            _ => Err(PlayerError::invalid(Command::Stop.name(), self.state)),
        }
    }

    /// Restart the clock at `position`, then put the session back into the paused or
    /// stopped state it was in.
    pub fn seek(&mut self, position: Duration) -> Result<(), PlayerError> {
        if gate(self.state, Command::Seek) == Gate::Reject {
            return Err(PlayerError::invalid(Command::Seek.name(), self.state));
        }
        let prior = self.state;
        let target = if self.media.duration > Duration::ZERO {
            position.min(self.media.duration)
        } else {
            position
        };
        self.run(Action::Restart(target))?;
        match prior {
            PlaybackState::Stopped => self.run(Action::Stop)?,
            PlaybackState::Paused => self.run(Action::Pause)?,
            _ => {}
        }
        Ok(())
    }

    /// Pause (if playing) and move exactly one frame forward.
    pub fn step_forward(&mut self) -> Result<(), PlayerError> {
        if !self.state.has_graph() {
            return Err(PlayerError::invalid("step", self.state));
        }
        let Some(interval) = self.media.frame_interval() else {
            return Err(PlayerError::invalid("step", self.state));
        };
        if self.state == PlaybackState::Started {
            self.run(Action::Pause)?;
        }
        let target = self.position() + interval;
        if self.media.duration > Duration::ZERO && target > self.media.duration {
            return Ok(());
        }
        self.run(Action::Restart(target))?;
        self.run(Action::Pause)
    }

    pub fn set_rate(&mut self, speed: f32, thinning: bool) -> Result<(), PlayerError> {
        if !speed.is_finite() {
            return Err(RateRejection::RateUnsupported(speed).into());
        }
        if gate(self.state, Command::SetRate) == Gate::Reject {
            return Err(PlayerError::invalid(Command::SetRate.name(), self.state));
        }
        let session = self
            .session()
            .ok_or_else(|| PlayerError::invalid(Command::SetRate.name(), self.state))?;
        session
            .check_rate(speed, thinning)
            .map_err(PlayerError::from_platform)?;
        let current = session.rate();
        if current == (RateState { speed, thinning }) {
            return Ok(());
        }
        match plan_rate_change(self.state, current, speed) {
            RatePlan::SameDirection { pause_first, resume } => {
                if pause_first {
                    self.run(Action::Pause)?;
                }
                let applied = session
                    .set_rate(speed, thinning)
                    .map_err(PlayerError::from_platform);
                if resume {
                    self.run(Action::Start)?;
                }
                applied?;
            }
            RatePlan::Reversal { stop_first, resume } => {
                let position = session.position();
                if stop_first {
                    self.run(Action::Stop)?;
                }
                let applied = session
                    .set_rate(speed, thinning)
                    .map_err(PlayerError::from_platform);
                if resume {
                    self.run(Action::Restart(position))?;
                }
                applied?;
            }
        }
        log::debug!("Playback rate set to {speed} (thinning: {thinning})");
        Ok(())
    }

    /// Set the output volume in `0.0..=1.0`. Without a session that has volume control the
    /// level is kept and applied once the graph is ready.
    pub fn set_volume(&mut self, level: f32) -> Result<CommandOutcome, PlayerError> {
        self.volume = level.clamp(0.0, 1.0);
        self.volume_pending = true;
        if !self.state.has_graph() {
            return Ok(CommandOutcome::Deferred);
        }
        self.apply_pending_volume()
    }

    fn apply_pending_volume(&mut self) -> Result<CommandOutcome, PlayerError> {
        let Some(session) = self.session() else {
            return Ok(CommandOutcome::Deferred);
        };
        match session.set_volume(self.volume) {
            Ok(()) => {
                self.volume_pending = false;
                Ok(CommandOutcome::Issued)
            }
            Err(PlatformError::NoVolumeControl) => {
                log::debug!("Session has no volume control yet, keeping {}", self.volume);
                Ok(CommandOutcome::Deferred)
            }
            Err(e) => Err(PlayerError::Platform(e)),
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    // ---- events ----

    /// Handle every delivery that has arrived so far. Returns how many were handled.
    pub fn pump_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            // re-read the receiver each time: handling may replace the session
            let Some(deliveries) = self.active.as_ref().map(|a| a.deliveries.clone()) else {
                break;
            };
            let Ok(delivery) = deliveries.try_recv() else {
                break;
            };
            if let Err(e) = self.handle_event(delivery) {
                log::warn!("Session event handling failed: {e}");
            }
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, delivery: Delivery) -> Result<(), PlayerError> {
        let event = match delivery {
            Delivery::SourceResolved(result) => {
                if self.state != PlaybackState::OpeningAsync {
                    log::debug!("Ignoring source resolution while {}", self.state);
                    if let Ok(source) = result {
                        source.shutdown();
                    }
                    return Ok(());
                }
                match result {
                    Ok(source) => {
                        if let Some(active) = &mut self.active {
                            active.sources = vec![source];
                        }
                        SessionEvent::SourceResolved
                    }
                    Err(error) => SessionEvent::Failed {
                        during: "source resolution",
                        error,
                    },
                }
            }
            Delivery::Event(event) => SessionEvent::from(event),
        };
        log_event(&event);
        self.apply(event)
    }

    fn apply(&mut self, event: SessionEvent) -> Result<(), PlayerError> {
        let transition = dispatch(&self.machine(), &event);
        self.state = transition.state;
        self.pending = transition.pending;
        for action in transition.actions {
            if let Err(e) = self.run(action) {
                if self.state.is_opening() {
                    return Err(self.fail_open(e));
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn run(&mut self, action: Action) -> Result<(), PlayerError> {
        let next = action.resulting_state();
        self.execute(action)?;
        if let Some(state) = next {
            self.state = state;
        }
        Ok(())
    }

    fn execute(&mut self, action: Action) -> Result<(), PlayerError> {
        match action {
            Action::Start => self.transport(|s| s.start(None)),
            Action::Restart(position) => self.transport(|s| s.start(Some(position))),
            Action::Pause => self.transport(|s| s.pause()),
            Action::Stop => self.transport(|s| s.stop()),
            Action::BuildPendingGraph => {
                let source = self.primary_source()?;
                self.submit_graph(&source, None)
            }
            Action::RebuildGraph(presentation) => {
                let source = self.primary_source()?;
                self.submit_graph(&source, Some(presentation))
            }
            Action::ApplyVolume => {
                if self.volume_pending {
                    if let Err(e) = self.apply_pending_volume() {
                        log::warn!("Could not apply volume: {e}");
                    }
                }
                Ok(())
            }
            Action::FirePresentationEnded => {
                self.presentation_ended.emit();
                Ok(())
            }
            Action::ReportOpenFailure(error) => {
                // Nobody is waiting on an event-driven open; keep the cause for queries.
                self.open_failure = Some(error.clone());
                let reported = self.fail_open(PlayerError::Open(error));
                log::debug!("Open failure recorded: {reported}");
                Ok(())
            }
        }
    }

    fn transport(
        &self,
        command: impl FnOnce(&dyn MediaSession) -> Result<(), PlatformError>,
    ) -> Result<(), PlayerError> {
        let active = self
            .active
            .as_ref()
            .ok_or(PlayerError::Platform(PlatformError::Shutdown))?;
        command(active.session.as_ref()).map_err(PlayerError::from_platform)
    }

    fn primary_source(&self) -> Result<Arc<dyn MediaSource>, PlayerError> {
        self.active
            .as_ref()
            .and_then(|a| a.sources.first().cloned())
            .ok_or(PlayerError::Open(PlatformError::InvalidRequest))
    }

    // ---- closing ----

    fn close_session(&mut self) -> Result<(), PlayerError> {
        let Some(active) = self.active.take() else {
            self.state = PlaybackState::Closed;
            return Ok(());
        };
        self.state = PlaybackState::Closing;
        active.relay.set_closing();
        let mut result = Ok(());
        match active.session.close() {
            Ok(()) => {
                if active.closed.recv_timeout(self.config.close_timeout).is_err() {
                    log::error!(
                        "Timed out after {:?} waiting for the session to close",
                        self.config.close_timeout
                    );
                    result = Err(PlayerError::Timeout(self.config.close_timeout));
                }
            }
            Err(e) => {
                log::warn!("Session close request failed: {e}");
                result = Err(PlayerError::Platform(e));
            }
        }
        for source in &active.sources {
            source.shutdown();
        }
        active.session.shutdown();
        self.presenter.flush();
        self.state = PlaybackState::Closed;
        self.pending = None;
        log::debug!("Session closed");
        result
    }

    fn release_sequence_presenters(&mut self) {
        for presenter in self.sequence_presenters.drain(..) {
            presenter.release_resources();
            presenter.gateway().release();
        }
    }

    /// Close the session and release the presenter's buffers. The platform itself is
    /// shut down when the last controller goes away.
    pub fn close(&mut self) -> Result<(), PlayerError> {
        let result = self.close_session();
        self.presenter.release_resources();
        self.release_sequence_presenters();
        self.media = MediaInfo::default();
        result
    }

    // ---- queries ----

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn pending(&self) -> Option<PendingIntent> {
        self.pending
    }

    pub fn has_session(&self) -> bool {
        self.active.is_some()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media
    }

    pub fn position(&self) -> Duration {
        self.session().map_or(Duration::ZERO, |s| s.position())
    }

    pub fn duration(&self) -> Duration {
        self.media.duration
    }

    /// Network buffer fill in percent, when the current source is buffered.
    pub fn buffer_progress(&self) -> Option<u32> {
        self.session().and_then(|s| s.buffer_progress())
    }

    /// Why the last open failed after it was submitted, if it did.
    pub fn open_failure(&self) -> Option<&PlatformError> {
        self.open_failure.as_ref()
    }

    pub fn rate(&self) -> RateState {
        self.session().map_or_else(RateState::default, |s| s.rate())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn presenter(&self) -> &Arc<Presenter> {
        &self.presenter
    }

    pub fn sequence_presenters(&self) -> &[Arc<Presenter>] {
        &self.sequence_presenters
    }

    pub fn presentation_ended(&self) -> &Signal {
        &self.presentation_ended
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Session did not close cleanly: {e}");
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Notice(EventKind::TopologySet { node_count }) => {
            log::debug!("Topology set with {node_count} nodes");
        }
        SessionEvent::Notice(EventKind::BufferingStarted) => log::info!("Buffering started"),
        SessionEvent::Notice(EventKind::BufferingStopped) => log::info!("Buffering stopped"),
        SessionEvent::Notice(kind) => log::trace!("Session event: {}", kind.name()),
        SessionEvent::Failed { during, error } => {
            log::warn!("Session reported failure during {during}: {error}");
        }
        SessionEvent::GraphReady => log::debug!("Graph ready"),
        SessionEvent::EndOfPresentation => log::debug!("End of presentation"),
        SessionEvent::NewPresentation(pd) => {
            log::info!("New presentation with {} streams", pd.streams.len());
        }
        SessionEvent::SourceResolved => log::debug!("Source resolved"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::audio_sink::StaticEndpoints;
    use crate::platform::MediaEvent;
    use crate::platform::context::PlatformContext;
    use crate::platform::sim::{SimClip, SimCommand, SimPlatform};
    use crate::session::rate::RateRejection;
    use crate::surface::host::HostSurfaceDevice;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const URL: &str = "sim://clip.mp4";
    const TICK: Duration = Duration::from_millis(100);

    fn setup_with(clip: SimClip, config: ControllerConfig) -> (SimPlatform, SessionController) {
        let sim = SimPlatform::new();
        sim.register(URL, clip);
        let ctx = PlatformContext::new(Arc::new(sim.clone()));
        let gateway = Arc::new(SharedSurfaceGateway::new(Arc::new(HostSurfaceDevice::new())));
        gateway.create_or_resize(64, 36, ExternalTexture(1)).unwrap();
        let presenter = Arc::new(Presenter::new(1, gateway, 3));
        let controller = SessionController::new(
            ctx.acquire().unwrap(),
            Arc::new(StaticEndpoints::named(&["Speakers"])),
            presenter,
            config,
        );
        (sim, controller)
    }

    fn setup(clip: SimClip) -> (SimPlatform, SessionController) {
        setup_with(clip, ControllerConfig::default())
    }

    fn clip(secs: u64) -> SimClip {
        SimClip::video(Duration::from_secs(secs), 64, 36, 30)
    }

    fn opened(clip: SimClip) -> (SimPlatform, SessionController) {
        let (sim, mut c) = setup(clip);
        c.open(URL, None).unwrap();
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
        (sim, c)
    }

    fn playing(clip: SimClip) -> (SimPlatform, SessionController) {
        let (sim, mut c) = opened(clip);
        c.play().unwrap();
        assert_eq!(c.state(), PlaybackState::Started);
        (sim, c)
    }

    fn run_for(sim: &SimPlatform, c: &mut SessionController, ticks: usize) {
        for _ in 0..ticks {
            sim.advance(TICK);
            c.pump_events();
        }
    }

    #[test]
    fn open_shows_first_frame_paused() {
        let (sim, mut c) = setup(clip(10));
        c.open(URL, None).unwrap();
        assert_eq!(c.state(), PlaybackState::OpeningSync);
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::SetTopology { nodes: 4 },
                SimCommand::Start(None),
                SimCommand::Pause
            ]
        );
        sim.advance(Duration::ZERO);
        let shown = c.presenter().gateway().current_frame().unwrap();
        assert_eq!(shown.pts, Duration::ZERO);
        assert_eq!(c.media_info().width, 64);
        assert!((c.media_info().frames_per_second() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn play_during_open_is_latched_and_honored_once() {
        let (sim, mut c) = setup(clip(10));
        c.open(URL, None).unwrap();
        assert_eq!(c.play().unwrap(), CommandOutcome::Latched);
        assert_eq!(c.pending(), Some(PendingIntent::Play));
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Started);
        assert_eq!(c.pending(), None);
        let starts = sim
            .commands()
            .iter()
            .filter(|cmd| **cmd == SimCommand::Start(None))
            .count();
        assert_eq!(starts, 2);
    }

    #[test]
    fn pause_cancels_latched_play() {
        let (_sim, mut c) = setup(clip(10));
        c.open(URL, None).unwrap();
        c.play().unwrap();
        assert_eq!(c.pause().unwrap(), CommandOutcome::Cancelled);
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
    }

    #[test]
    fn pause_rejected_unless_started() {
        let (sim, mut c) = setup(clip(10));
        assert!(matches!(
            c.pause(),
            Err(PlayerError::InvalidRequest { .. })
        ));
        c.open(URL, None).unwrap();
        c.pump_events();
        sim.clear_commands();
        assert!(c.pause().is_err());
        assert_eq!(c.state(), PlaybackState::Paused);
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn seek_during_open_fails_without_side_effects() {
        let (sim, mut c) = setup(clip(10));
        c.open(URL, None).unwrap();
        sim.clear_commands();
        assert!(c.seek(Duration::from_secs(1)).is_err());
        assert_eq!(c.state(), PlaybackState::OpeningSync);
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn rejected_stop_issues_nothing() {
        let (sim, mut c) = setup(clip(10));
        c.open(URL, None).unwrap();
        sim.clear_commands();
        assert!(matches!(
            c.stop(),
            Err(PlayerError::InvalidRequest {
                state: PlaybackState::OpeningSync,
                ..
            })
        ));
        assert!(sim.commands().is_empty());
        assert_eq!(c.state(), PlaybackState::OpeningSync);

        c.pump_events();
        c.stop().unwrap();
        assert_eq!(c.state(), PlaybackState::Stopped);
        sim.clear_commands();
        assert!(c.stop().is_err());
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn seek_reapplies_paused_state() {
        let (sim, mut c) = opened(clip(10));
        sim.clear_commands();
        c.seek(Duration::from_secs(3)).unwrap();
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(c.position(), Duration::from_secs(3));
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::Start(Some(Duration::from_secs(3))),
                SimCommand::Pause
            ]
        );
    }

    #[test]
    fn seek_while_playing_keeps_playing() {
        let (_sim, mut c) = playing(clip(10));
        c.seek(Duration::from_secs(20)).unwrap();
        assert_eq!(c.state(), PlaybackState::Started);
        assert_eq!(c.position(), Duration::from_secs(10));
    }

    #[test]
    fn reversal_restarts_at_recorded_position() {
        let (sim, mut c) = playing(clip(10));
        run_for(&sim, &mut c, 20);
        let before = c.position();
        sim.clear_commands();

        c.set_rate(-1.0, false).unwrap();
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::Stop,
                SimCommand::SetRate {
                    speed: -1.0,
                    thinning: false
                },
                SimCommand::Start(Some(before)),
            ]
        );
        assert_eq!(c.state(), PlaybackState::Started);
        let after = c.position();
        assert!(after.abs_diff(before) < Duration::from_secs_f64(1.0 / 30.0));

        run_for(&sim, &mut c, 5);
        assert!(c.position() < before);
    }

    #[test]
    fn reversal_while_paused_keeps_state_and_position() {
        let (sim, mut c) = opened(clip(10));
        c.seek(Duration::from_secs(5)).unwrap();
        c.pump_events();
        sim.clear_commands();

        c.set_rate(-1.0, false).unwrap();
        c.pump_events();
        assert_eq!(
            sim.commands(),
            vec![SimCommand::SetRate {
                speed: -1.0,
                thinning: false
            }]
        );
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(c.position(), Duration::from_secs(5));

        c.play().unwrap();
        run_for(&sim, &mut c, 5);
        assert!(c.position() < Duration::from_secs(5));
    }

    #[test]
    fn unsupported_reverse_leaves_playback_alone() {
        let (sim, mut c) = playing(clip(10).without_reverse());
        run_for(&sim, &mut c, 5);
        let before = c.position();
        sim.clear_commands();

        let err = c.set_rate(-1.0, false).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::Unsupported(RateRejection::ReverseUnsupported)
        ));
        assert_eq!(c.state(), PlaybackState::Started);
        assert_eq!(c.position(), before);
        assert!(sim.commands().is_empty());
        assert_eq!(c.rate().speed, 1.0);
    }

    #[test]
    fn thinning_and_rate_limits_are_distinct_rejections() {
        let (_sim, mut c) = playing(clip(10));
        assert!(matches!(
            c.set_rate(1.0, true),
            Err(PlayerError::Unsupported(RateRejection::ThinningUnsupported))
        ));
        assert!(matches!(
            c.set_rate(16.0, false),
            Err(PlayerError::Unsupported(RateRejection::RateUnsupported(_)))
        ));
    }

    #[test]
    fn non_finite_rates_are_rejected_untouched() {
        let (sim, mut c) = playing(clip(10));
        sim.clear_commands();
        for speed in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            assert!(matches!(
                c.set_rate(speed, false),
                Err(PlayerError::Unsupported(RateRejection::RateUnsupported(_)))
            ));
        }
        assert!(sim.commands().is_empty());
        assert_eq!(c.rate(), RateState::default());
        run_for(&sim, &mut c, 3);
        assert_eq!(c.state(), PlaybackState::Started);
    }

    #[test]
    fn same_direction_change_pauses_around_it() {
        let (sim, mut c) = playing(clip(10));
        sim.clear_commands();
        c.set_rate(2.0, false).unwrap();
        assert_eq!(
            sim.commands(),
            vec![
                SimCommand::Pause,
                SimCommand::SetRate {
                    speed: 2.0,
                    thinning: false
                },
                SimCommand::Start(None),
            ]
        );
        assert_eq!(c.state(), PlaybackState::Started);
        assert_eq!(c.rate().speed, 2.0);
    }

    #[test]
    fn looping_fires_end_once_per_pass() {
        let (sim, mut c) = playing(clip(1));
        c.set_looping(true);
        let ends = Arc::new(AtomicUsize::new(0));
        let counter = ends.clone();
        c.presentation_ended().connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut first_restart = None;
        for _ in 0..25 {
            sim.advance(TICK);
            c.pump_events();
            if first_restart.is_none() && ends.load(Ordering::SeqCst) == 1 {
                first_restart = Some(c.position());
            }
        }
        assert_eq!(ends.load(Ordering::SeqCst), 2);
        assert_eq!(first_restart, Some(Duration::ZERO));
        assert_eq!(c.state(), PlaybackState::Started);
    }

    #[test]
    fn end_without_loop_pauses() {
        let (sim, mut c) = playing(clip(1));
        let ends = Arc::new(AtomicUsize::new(0));
        let counter = ends.clone();
        c.presentation_ended().connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        run_for(&sim, &mut c, 15);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), PlaybackState::Paused);
    }

    #[test]
    fn volume_set_before_open_is_applied_when_ready() {
        let (sim, mut c) = setup(clip(10));
        assert_eq!(c.set_volume(0.4).unwrap(), CommandOutcome::Deferred);
        c.open(URL, None).unwrap();
        assert_eq!(sim.last_session().unwrap().volume(), None);
        c.pump_events();
        assert_eq!(sim.last_session().unwrap().volume(), Some(0.4));
        assert_eq!(c.set_volume(0.8).unwrap(), CommandOutcome::Issued);
    }

    #[test]
    fn close_times_out_but_still_tears_down() {
        let config = ControllerConfig {
            close_timeout: Duration::from_millis(50),
            ..ControllerConfig::default()
        };
        let (sim, mut c) = setup_with(clip(10), config);
        c.open(URL, None).unwrap();
        c.pump_events();
        sim.set_stall_close(true);
        let err = c.close().unwrap_err();
        assert!(matches!(err, PlayerError::Timeout(_)));
        assert_eq!(c.state(), PlaybackState::Closed);
        let commands = sim.commands();
        assert_eq!(
            &commands[commands.len() - 2..],
            &[SimCommand::Close, SimCommand::Shutdown]
        );
        assert!(!c.presenter().has_outstanding());
    }

    #[test]
    fn close_is_clean_and_idempotent() {
        let (sim, mut c) = opened(clip(10));
        c.close().unwrap();
        assert_eq!(c.state(), PlaybackState::Closed);
        assert!(!c.has_session());
        assert!(sim.last_session().is_none());
        c.close().unwrap();
    }

    #[test]
    fn async_open_latches_play_until_ready() {
        let (sim, mut c) = setup(clip(10));
        c.open_async(URL, None).unwrap();
        assert_eq!(c.state(), PlaybackState::OpeningAsync);
        assert_eq!(c.play().unwrap(), CommandOutcome::Latched);
        sim.advance(Duration::ZERO);
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Started);
        assert_eq!(c.media_info().height, 36);
    }

    #[test]
    fn async_open_failure_closes() {
        let (sim, mut c) = setup(clip(10));
        c.open_async("sim://missing.mp4", None).unwrap();
        sim.advance(Duration::ZERO);
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Closed);
        assert!(!c.has_session());
        assert!(c.open_failure().is_some());

        c.open(URL, None).unwrap();
        assert!(c.open_failure().is_none());
    }

    #[test]
    fn sync_open_failure_reports_cause() {
        let (_sim, mut c) = setup(clip(10));
        let err = c.open("rtsp://camera/1", None).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::Open(PlatformError::UnsupportedScheme(_))
        ));
        assert_eq!(c.state(), PlaybackState::Closed);
    }

    #[test]
    fn reopening_closes_previous_session() {
        let (sim, mut c) = opened(clip(10));
        c.open(URL, None).unwrap();
        assert!(sim.commands().contains(&SimCommand::Close));
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
    }

    #[test]
    fn new_presentation_rebuilds_graph() {
        let (sim, mut c) = opened(clip(10));
        let pd = sim
            .resolve_source(URL)
            .unwrap()
            .presentation()
            .unwrap();
        sim.last_session()
            .unwrap()
            .inject(MediaEvent::ok(EventKind::NewPresentation(pd)));
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
        let topologies = sim
            .commands()
            .iter()
            .filter(|cmd| matches!(cmd, SimCommand::SetTopology { .. }))
            .count();
        assert_eq!(topologies, 2);
    }

    #[test]
    fn sequence_drops_audio_of_later_sources() {
        let (sim, mut c) = setup(clip(10));
        sim.register("sim://b.mp4", clip(5));
        c.open_sequence(&[URL, "sim://b.mp4"], None).unwrap();
        c.pump_events();
        assert_eq!(c.state(), PlaybackState::Paused);
        assert_eq!(c.sequence_presenters().len(), 1);
        assert!(sim.commands().contains(&SimCommand::SetTopology { nodes: 6 }));

        let secondary = c.sequence_presenters()[0].clone();
        assert!(secondary.gateway().is_created());
        assert_eq!(secondary.gateway().size(), Some((64, 36)));
        c.play().unwrap();
        run_for(&sim, &mut c, 20);
        assert!(secondary.presented_count() > 0);
        assert!(c.presenter().presented_count() > 0);

        c.close().unwrap();
        assert!(!secondary.gateway().is_created());
        assert!(c.sequence_presenters().is_empty());
    }

    #[test]
    fn buffering_progress_is_reported_without_state_change() {
        let (sim, mut c) = opened(clip(10));
        assert_eq!(c.buffer_progress(), None);
        let session = sim.last_session().unwrap();
        session.set_buffer_progress(40);
        c.pump_events();
        assert_eq!(c.buffer_progress(), Some(40));
        assert_eq!(c.state(), PlaybackState::Paused);
        session.set_buffer_progress(250);
        c.pump_events();
        assert_eq!(c.buffer_progress(), Some(100));
        c.close().unwrap();
        assert_eq!(c.buffer_progress(), None);
    }

    #[test]
    fn step_forward_advances_one_frame() {
        let (_sim, mut c) = opened(clip(10));
        c.step_forward().unwrap();
        assert_eq!(c.state(), PlaybackState::Paused);
        let frame = Duration::from_secs_f64(1.0 / 30.0);
        assert!(c.position().abs_diff(frame) < Duration::from_micros(10));
    }

    #[test]
    fn last_controller_shuts_platform_down() {
        let (sim, c) = opened(clip(10));
        assert_eq!(sim.startup_count(), 1);
        drop(c);
        assert_eq!(sim.shutdown_count(), 1);
    }
}
