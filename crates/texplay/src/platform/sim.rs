//! Deterministic in-process media platform. Clips are registered by URL, time only moves
//! on [`SimPlatform::advance`], and every session command is recorded so callers can
//! check ordering. Decoded frames are a flat test pattern written into presenter buffers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{
    Completion, CompletionSink, EventKind, MajorType, MediaEvent, MediaPlatform, MediaSession,
    MediaSource, PlatformError, PresentationDescriptor, StreamDescriptor, TopologyStatus,
};
use crate::graph::MediaGraph;
use crate::presenter::Presenter;
use crate::session::rate::RateState;

const MAX_DECODES_PER_TICK: usize = 8;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimVideo {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
}

/// A registered clip and what the platform claims it can do with it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimClip {
    pub duration: Duration,
    pub video: Option<SimVideo>,
    pub audio: bool,
    pub reverse: bool,
    pub thinning: bool,
    pub max_rate: f32,
    pub volume_control: bool,
}

impl SimClip {
    /// Audio + video clip. Audio is stream 0, video stream 1.
    pub fn video(duration: Duration, width: u32, height: u32, fps: u32) -> Self {
        Self {
            duration,
            video: Some(SimVideo {
                width,
                height,
                fps_num: fps,
                fps_den: 1,
            }),
            audio: true,
            reverse: true,
            thinning: false,
            max_rate: 4.0,
            volume_control: true,
        }
    }

    pub fn audio_only(duration: Duration) -> Self {
        Self {
            duration,
            video: None,
            audio: true,
            reverse: false,
            thinning: false,
            max_rate: 2.0,
            volume_control: true,
        }
    }

    pub fn without_reverse(mut self) -> Self {
        self.reverse = false;
        self
    }

    pub fn with_thinning(mut self) -> Self {
        self.thinning = true;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = false;
        self
    }

    fn presentation(&self) -> PresentationDescriptor {
        let mut streams = Vec::new();
        if self.audio {
            streams.push(StreamDescriptor {
                index: 0,
                selected: true,
                major_type: MajorType::Audio,
                frame_size: None,
                frame_rate: None,
            });
        }
        if let Some(video) = self.video {
            streams.push(StreamDescriptor {
                index: streams.len() as u32,
                selected: true,
                major_type: MajorType::Video,
                frame_size: Some((video.width, video.height)),
                frame_rate: Some((video.fps_num, video.fps_den)),
            });
        }
        PresentationDescriptor {
            streams,
            duration: self.duration,
        }
    }
}

/// Session command as recorded by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    SetTopology { nodes: usize },
    Start(Option<Duration>),
    Pause,
    Stop,
    SetRate { speed: f32, thinning: bool },
    SetVolume(f32),
    Close,
    Shutdown,
}

struct SimShared {
    clips: Mutex<HashMap<String, SimClip>>,
    running: AtomicBool,
    startups: AtomicUsize,
    shutdowns: AtomicUsize,
    sessions: Mutex<Vec<Weak<SimSession>>>,
    resolutions: Mutex<Vec<(String, Arc<dyn CompletionSink>)>>,
    stall_close: AtomicBool,
    commands: Mutex<Vec<SimCommand>>,
    lookahead: Mutex<Duration>,
}

impl SimShared {
    fn record(&self, command: SimCommand) {
        lock(&self.commands).push(command);
    }

    fn clip(&self, url: &str) -> Option<SimClip> {
        lock(&self.clips).get(url).cloned()
    }
}

#[derive(Clone)]
pub struct SimPlatform {
    shared: Arc<SimShared>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimShared {
                clips: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                startups: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                sessions: Mutex::new(Vec::new()),
                resolutions: Mutex::new(Vec::new()),
                stall_close: AtomicBool::new(false),
                commands: Mutex::new(Vec::new()),
                lookahead: Mutex::new(Duration::from_millis(66)),
            }),
        }
    }

    pub fn set_lookahead(&self, lookahead: Duration) {
        *lock(&self.shared.lookahead) = lookahead;
    }

    pub fn register(&self, url: impl Into<String>, clip: SimClip) {
        lock(&self.shared.clips).insert(url.into(), clip);
    }

    /// Swallow `SessionClosed`, so closes only finish by timing out.
    pub fn set_stall_close(&self, stall: bool) {
        self.shared.stall_close.store(stall, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        lock(&self.shared.commands).clone()
    }

    pub fn clear_commands(&self) {
        lock(&self.shared.commands).clear();
    }

    pub fn startup_count(&self) -> usize {
        self.shared.startups.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    fn live_sessions(&self) -> Vec<Arc<SimSession>> {
        let mut sessions = lock(&self.shared.sessions);
        sessions.retain(|s| s.strong_count() > 0);
        sessions.iter().filter_map(Weak::upgrade).collect()
    }

    /// Most recently created session that is still alive.
    pub fn last_session(&self) -> Option<Arc<SimSession>> {
        self.live_sessions().pop()
    }

    /// Move the clock forward: finish pending resolutions, then run every live session.
    pub fn advance(&self, dt: Duration) {
        let resolutions = std::mem::take(&mut *lock(&self.shared.resolutions));
        for (url, sink) in resolutions {
            sink.complete(Completion::SourceResolved(self.resolve_source(&url)));
        }
        let lookahead = *lock(&self.shared.lookahead);
        for session in self.live_sessions() {
            session.tick(dt, lookahead);
        }
    }

    /// Drive [`advance`](Self::advance) from a background thread in real time.
    pub fn spawn_worker(&self, tick: Duration) -> std::io::Result<SimWorker> {
        let platform = self.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("texplay-sim".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    let now = Instant::now();
                    platform.advance(now - last);
                    last = now;
                }
                log::debug!("Sim worker exiting");
            })?;
        Ok(SimWorker {
            shutdown,
            handle: Some(handle),
        })
    }
}

fn check_scheme(url: &str) -> Result<(), PlatformError> {
    match url.split_once("://") {
        Some((scheme, _)) if !matches!(scheme, "sim" | "file") => {
            Err(PlatformError::UnsupportedScheme(scheme.to_string()))
        }
        _ => Ok(()),
    }
}

impl MediaPlatform for SimPlatform {
    fn startup(&self) -> Result<(), PlatformError> {
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn create_session(&self) -> Result<Arc<dyn MediaSession>, PlatformError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(PlatformError::NotStarted);
        }
        let session = Arc::new(SimSession {
            shared: self.shared.clone(),
            state: Mutex::new(SessionSim::default()),
        });
        lock(&self.shared.sessions).push(Arc::downgrade(&session));
        Ok(session)
    }

    fn resolve_source(&self, url: &str) -> Result<Arc<dyn MediaSource>, PlatformError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(PlatformError::NotStarted);
        }
        check_scheme(url)?;
        let clip = self
            .shared
            .clip(url)
            .ok_or_else(|| PlatformError::SourceNotFound(url.to_string()))?;
        Ok(Arc::new(SimSource {
            url: url.to_string(),
            clip,
            shut_down: AtomicBool::new(false),
        }))
    }

    fn begin_resolve_source(
        &self,
        url: &str,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<(), PlatformError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(PlatformError::NotStarted);
        }
        lock(&self.shared.resolutions).push((url.to_string(), sink));
        Ok(())
    }
}

pub struct SimWorker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimWorker {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct SimSource {
    url: String,
    clip: SimClip,
    shut_down: AtomicBool,
}

impl SimSource {
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl MediaSource for SimSource {
    fn url(&self) -> &str {
        &self.url
    }

    fn presentation(&self) -> Result<PresentationDescriptor, PlatformError> {
        if self.is_shut_down() {
            return Err(PlatformError::Shutdown);
        }
        Ok(self.clip.presentation())
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
    Ended,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
struct Caps {
    reverse: bool,
    thinning: bool,
    max_rate: f32,
    volume_control: bool,
}

impl From<&SimClip> for Caps {
    fn from(clip: &SimClip) -> Self {
        Self {
            reverse: clip.reverse,
            thinning: clip.thinning,
            max_rate: clip.max_rate,
            volume_control: clip.volume_control,
        }
    }
}

struct Branch {
    presenter: Arc<Presenter>,
    size: (u32, u32),
    interval: f64,
    /// Next frame index to decode. `None` restarts at the clock.
    next: Option<i64>,
}

impl Branch {
    fn plan(&self, now: f64, lookahead: f64, duration: f64, reverse: bool) -> Vec<i64> {
        let last = ((duration / self.interval).ceil() as i64 - 1).max(0);
        if reverse {
            let current = ((now / self.interval).ceil() as i64).clamp(0, last);
            let start = self.next.map_or(current, |n| n.min(current));
            let end = (((now - lookahead) / self.interval).ceil() as i64).max(0);
            (end..=start).rev().take(MAX_DECODES_PER_TICK).collect()
        } else {
            let current = ((now / self.interval).floor() as i64).clamp(0, last);
            let start = self.next.map_or(current, |n| n.max(current));
            let end = (((now + lookahead) / self.interval).floor() as i64).min(last);
            (start..=end).take(MAX_DECODES_PER_TICK).collect()
        }
    }
}

#[derive(Default)]
struct SessionSim {
    armed: Option<Arc<dyn CompletionSink>>,
    queue: VecDeque<MediaEvent>,
    phase: Phase,
    has_topology: bool,
    branches: Vec<Branch>,
    duration: f64,
    position: f64,
    rate: RateState,
    caps: Caps,
    volume: Option<f32>,
    buffer_progress: Option<u32>,
    /// Bumped whenever decode cursors are reset.
    epoch: u64,
    /// Show one frame at the current position while not running.
    preroll: bool,
    shut_down: bool,
}

impl SessionSim {
    fn check_alive(&self) -> Result<(), PlatformError> {
        if self.shut_down || self.phase == Phase::Closed {
            Err(PlatformError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn reset_cursors(&mut self) -> Vec<Arc<Presenter>> {
        self.epoch += 1;
        self.preroll = true;
        self.branches
            .iter_mut()
            .map(|b| {
                b.next = None;
                b.presenter.clone()
            })
            .collect()
    }

    fn push(&mut self, kind: EventKind) {
        self.queue.push_back(MediaEvent::ok(kind));
    }
}

/// One simulated playback session.
pub struct SimSession {
    shared: Arc<SimShared>,
    state: Mutex<SessionSim>,
}

struct TickPlan {
    index: usize,
    presenter: Arc<Presenter>,
    size: (u32, u32),
    interval: f64,
    frames: Vec<i64>,
}

fn test_pattern((width, height): (u32, u32), frame: i64) -> Vec<u8> {
    let shade = (frame.rem_euclid(256)) as u8;
    [shade, 255 - shade, 96, 255].repeat(width as usize * height as usize)
}

impl SimSession {
    fn state(&self) -> MutexGuard<'_, SessionSim> {
        lock(&self.state)
    }

    pub fn volume(&self) -> Option<f32> {
        self.state().volume
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Act as a network source filling its buffer. Below 100% raises `BufferingStarted`,
    /// 100% raises `BufferingStopped`.
    pub fn set_buffer_progress(&self, percent: u32) {
        {
            let mut st = self.state();
            let percent = percent.min(100);
            st.buffer_progress = Some(percent);
            st.push(if percent < 100 {
                EventKind::BufferingStarted
            } else {
                EventKind::BufferingStopped
            });
        }
        self.deliver();
    }

    /// Queue an arbitrary event, as if the pipeline raised it.
    pub fn inject(&self, event: MediaEvent) {
        self.state().queue.push_back(event);
        self.deliver();
    }

    /// Hand queued events to the armed sink, one at a time, with the state lock released.
    fn deliver(&self) {
        loop {
            let next = {
                let mut st = self.state();
                if st.armed.is_some() && !st.queue.is_empty() {
                    st.armed.take().zip(st.queue.pop_front())
                } else {
                    None
                }
            };
            match next {
                Some((sink, event)) => sink.complete(Completion::Event(event)),
                None => break,
            }
        }
    }

    fn tick(&self, dt: Duration, lookahead: Duration) {
        let (now, epoch, reverse, plans) = {
            let mut st = self.state();
            if st.shut_down {
                return;
            }
            let running = st.phase == Phase::Running;
            let preroll = st.preroll && matches!(st.phase, Phase::Paused | Phase::Stopped);
            if !running && !preroll {
                return;
            }
            st.preroll = false;
            let speed = f64::from(st.rate.speed);
            let reverse = speed < 0.0;
            let mut look = 0.0;
            if running {
                st.position += dt.as_secs_f64() * speed;
                let ended = if reverse {
                    st.position <= 0.0
                } else {
                    st.position >= st.duration
                };
                if ended {
                    st.position = st.position.clamp(0.0, st.duration);
                    st.phase = Phase::Ended;
                    st.push(EventKind::EndOfPresentation);
                }
                look = lookahead.as_secs_f64() * speed.abs().max(1.0);
            }
            let (now, duration) = (st.position, st.duration);
            let plans: Vec<TickPlan> = st
                .branches
                .iter()
                .enumerate()
                .map(|(index, b)| TickPlan {
                    index,
                    presenter: b.presenter.clone(),
                    size: b.size,
                    interval: b.interval,
                    frames: b.plan(now, look, duration, reverse),
                })
                .collect();
            (now, st.epoch, reverse, plans)
        };

        let mut cursors = Vec::new();
        for plan in plans {
            let mut last = None;
            for frame in plan.frames {
                let mut buffer = match plan.presenter.acquire_target() {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        log::trace!("Decoder waiting for a free buffer: {e}");
                        break;
                    }
                };
                if let Err(e) = buffer.target_mut().write_rgba(&test_pattern(plan.size, frame)) {
                    log::warn!("Decode into frame buffer failed: {e}");
                }
                let pts = Duration::from_secs_f64(frame as f64 * plan.interval);
                plan.presenter.schedule_frame(buffer, pts);
                last = Some(frame);
            }
            plan.presenter.present_due(Duration::from_secs_f64(now));
            if let Some(frame) = last {
                cursors.push((plan.index, if reverse { frame - 1 } else { frame + 1 }));
            }
        }

        {
            let mut st = self.state();
            if st.epoch == epoch {
                for (index, next) in cursors {
                    if let Some(branch) = st.branches.get_mut(index) {
                        branch.next = Some(next);
                    }
                }
            }
        }
        self.deliver();
    }
}

impl MediaSession for SimSession {
    fn begin_get_event(&self, sink: Arc<dyn CompletionSink>) -> Result<(), PlatformError> {
        let mut st = self.state();
        if st.shut_down {
            return Err(PlatformError::Shutdown);
        }
        if st.armed.is_some() {
            return Err(PlatformError::EventRequestPending);
        }
        st.armed = Some(sink);
        Ok(())
    }

    fn set_topology(&self, graph: MediaGraph) -> Result<(), PlatformError> {
        self.state().check_alive()?;
        let node_count = graph.node_count();
        let mut duration = 0.0_f64;
        let mut caps = None;
        for source in graph.sources() {
            duration = duration.max(source.presentation()?.duration.as_secs_f64());
            if caps.is_none() {
                caps = self.shared.clip(source.url()).as_ref().map(Caps::from);
            }
        }
        let branches: Vec<Branch> = graph
            .video_branches()
            .into_iter()
            .filter_map(|b| {
                let size = b.stream.frame_size?;
                let (num, den) = b.stream.frame_rate.unwrap_or((30, 1));
                Some(Branch {
                    presenter: b.presenter.clone(),
                    size,
                    interval: f64::from(den.max(1)) / f64::from(num.max(1)),
                    next: None,
                })
            })
            .collect();
        drop(graph);

        for branch in &branches {
            branch
                .presenter
                .set_media_format(branch.size.0, branch.size.1)
                .map_err(|e| PlatformError::Other(e.to_string()))?;
        }

        {
            let mut st = self.state();
            st.check_alive()?;
            st.branches = branches;
            st.duration = duration;
            st.position = 0.0;
            st.caps = caps.unwrap_or_default();
            st.has_topology = true;
            st.phase = Phase::Idle;
            st.epoch += 1;
            st.preroll = true;
            st.push(EventKind::TopologySet { node_count });
            st.push(EventKind::TopologyStatus(TopologyStatus::Ready));
        }
        self.shared.record(SimCommand::SetTopology { nodes: node_count });
        self.deliver();
        Ok(())
    }

    fn start(&self, from: Option<Duration>) -> Result<(), PlatformError> {
        let flush = {
            let mut st = self.state();
            st.check_alive()?;
            if !st.has_topology {
                return Err(PlatformError::InvalidRequest);
            }
            let restart_at = match (from, st.phase) {
                (Some(pos), _) => Some(pos.as_secs_f64().min(st.duration)),
                (None, Phase::Ended) => Some(if st.rate.is_reverse() { st.duration } else { 0.0 }),
                (None, _) => None,
            };
            let flush = restart_at.map(|pos| {
                st.position = pos;
                st.reset_cursors()
            });
            st.phase = Phase::Running;
            st.push(EventKind::SessionStarted);
            flush.unwrap_or_default()
        };
        for presenter in flush {
            presenter.flush();
        }
        self.shared.record(SimCommand::Start(from));
        self.deliver();
        Ok(())
    }

    fn pause(&self) -> Result<(), PlatformError> {
        {
            let mut st = self.state();
            st.check_alive()?;
            match st.phase {
                Phase::Running | Phase::Ended => {
                    st.phase = Phase::Paused;
                    st.push(EventKind::SessionPaused);
                }
                Phase::Paused => {}
                _ => return Err(PlatformError::InvalidRequest),
            }
        }
        self.shared.record(SimCommand::Pause);
        self.deliver();
        Ok(())
    }

    fn stop(&self) -> Result<(), PlatformError> {
        let flush = {
            let mut st = self.state();
            st.check_alive()?;
            match st.phase {
                Phase::Running | Phase::Paused | Phase::Ended => {
                    st.phase = Phase::Stopped;
                    st.position = 0.0;
                    st.push(EventKind::SessionStopped);
                    st.reset_cursors()
                }
                Phase::Stopped => Vec::new(),
                _ => return Err(PlatformError::InvalidRequest),
            }
        };
        for presenter in flush {
            presenter.flush();
        }
        self.shared.record(SimCommand::Stop);
        self.deliver();
        Ok(())
    }

    fn close(&self) -> Result<(), PlatformError> {
        {
            let mut st = self.state();
            st.check_alive()?;
            st.phase = Phase::Closed;
            if !self.shared.stall_close.load(Ordering::SeqCst) {
                st.push(EventKind::SessionClosed);
            }
        }
        self.shared.record(SimCommand::Close);
        self.deliver();
        Ok(())
    }

    fn shutdown(&self) {
        {
            let mut st = self.state();
            if st.shut_down {
                return;
            }
            st.shut_down = true;
            st.armed = None;
            st.queue.clear();
            st.branches.clear();
        }
        self.shared.record(SimCommand::Shutdown);
    }

    fn position(&self) -> Duration {
        Duration::from_secs_f64(self.state().position.max(0.0))
    }

    fn rate(&self) -> RateState {
        self.state().rate
    }

    fn check_rate(&self, speed: f32, thinning: bool) -> Result<(), PlatformError> {
        let st = self.state();
        st.check_alive()?;
        if speed < 0.0 && !st.caps.reverse {
            return Err(PlatformError::ReverseUnsupported);
        }
        if thinning && !st.caps.thinning {
            return Err(PlatformError::ThinningUnsupported);
        }
        if !speed.is_finite() || speed.abs() > st.caps.max_rate {
            return Err(PlatformError::UnsupportedRate(speed));
        }
        Ok(())
    }

    fn set_rate(&self, speed: f32, thinning: bool) -> Result<(), PlatformError> {
        self.check_rate(speed, thinning)?;
        let presenters = {
            let mut st = self.state();
            let flipped = !st.rate.same_direction(speed);
            if flipped && st.phase == Phase::Running {
                return Err(PlatformError::UnsupportedRateTransition);
            }
            st.rate = RateState { speed, thinning };
            if flipped {
                st.reset_cursors();
            }
            st.push(EventKind::SessionRateChanged);
            st.branches
                .iter()
                .map(|b| b.presenter.clone())
                .collect::<Vec<_>>()
        };
        for presenter in presenters {
            presenter.on_clock_rate(speed);
        }
        self.shared.record(SimCommand::SetRate { speed, thinning });
        self.deliver();
        Ok(())
    }

    fn set_volume(&self, level: f32) -> Result<(), PlatformError> {
        {
            let mut st = self.state();
            st.check_alive()?;
            if !st.has_topology || !st.caps.volume_control {
                return Err(PlatformError::NoVolumeControl);
            }
            st.volume = Some(level);
        }
        self.shared.record(SimCommand::SetVolume(level));
        Ok(())
    }

    fn buffer_progress(&self) -> Option<u32> {
        self.state().buffer_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::graph::audio_sink::StaticEndpoints;
    use crate::surface::host::HostSurfaceDevice;
    use crate::surface::{ExternalTexture, SharedSurfaceGateway};

    struct Recorder {
        events: Mutex<Vec<EventKind>>,
        session: Mutex<Option<Arc<dyn MediaSession>>>,
        this: Weak<Recorder>,
    }

    impl Recorder {
        fn attach(session: &Arc<dyn MediaSession>, rearm: bool) -> Arc<Self> {
            let recorder = Arc::new_cyclic(|this| Recorder {
                events: Mutex::new(Vec::new()),
                session: Mutex::new(rearm.then(|| session.clone())),
                this: this.clone(),
            });
            session.begin_get_event(recorder.clone()).unwrap();
            recorder
        }

        fn kinds(&self) -> Vec<EventKind> {
            lock(&self.events).clone()
        }
    }

    impl CompletionSink for Recorder {
        fn complete(&self, completion: Completion) {
            if let Completion::Event(event) = completion {
                lock(&self.events).push(event.kind);
                let session = lock(&self.session).clone();
                if let (Some(session), Some(me)) = (session, self.this.upgrade()) {
                    let _ = session.begin_get_event(me);
                }
            }
        }
    }

    fn running_platform() -> SimPlatform {
        let sim = SimPlatform::new();
        sim.startup().unwrap();
        sim.register("sim://clip", SimClip::video(Duration::from_secs(2), 8, 8, 10));
        sim
    }

    fn presenter() -> Arc<Presenter> {
        let gateway = Arc::new(SharedSurfaceGateway::new(Arc::new(HostSurfaceDevice::new())));
        gateway.create_or_resize(8, 8, ExternalTexture(1)).unwrap();
        Arc::new(Presenter::new(1, gateway, 3))
    }

    fn open(sim: &SimPlatform, p: &Arc<Presenter>) -> Arc<dyn MediaSession> {
        let session = sim.create_session().unwrap();
        let source = sim.resolve_source("sim://clip").unwrap();
        let pd = source.presentation().unwrap();
        let eps = StaticEndpoints::default();
        let graph = GraphBuilder::new(&eps).build(&source, &pd, p, None).unwrap();
        session.set_topology(graph).unwrap();
        session
    }

    #[test]
    fn resolution_errors() {
        let sim = SimPlatform::new();
        assert_eq!(
            sim.resolve_source("sim://clip").err(),
            Some(PlatformError::NotStarted)
        );
        sim.startup().unwrap();
        assert_eq!(
            sim.resolve_source("rtsp://camera").err(),
            Some(PlatformError::UnsupportedScheme("rtsp".into()))
        );
        assert_eq!(
            sim.resolve_source("missing.mp4").err(),
            Some(PlatformError::SourceNotFound("missing.mp4".into()))
        );
    }

    #[test]
    fn only_one_event_request_at_a_time() {
        let sim = running_platform();
        let session = sim.create_session().unwrap();
        let recorder = Recorder::attach(&session, false);
        assert_eq!(
            session.begin_get_event(recorder),
            Err(PlatformError::EventRequestPending)
        );
    }

    #[test]
    fn events_wait_for_an_armed_sink() {
        let sim = running_platform();
        let p = presenter();
        let session = open(&sim, &p);
        let recorder = Recorder::attach(&session, false);
        assert!(recorder.kinds().is_empty());
        // the queue is drained on the next delivery, one event per request
        session.start(None).unwrap();
        assert_eq!(
            recorder.kinds(),
            vec![EventKind::TopologySet { node_count: 4 }]
        );
    }

    #[test]
    fn clock_decodes_and_presents() {
        let sim = running_platform();
        let p = presenter();
        let session = open(&sim, &p);
        session.start(None).unwrap();
        for _ in 0..5 {
            sim.advance(Duration::from_millis(100));
        }
        assert!((session.position().as_secs_f64() - 0.5).abs() < 1e-6);
        let shown = p.gateway().current_frame().unwrap();
        assert_eq!(shown.pts, Duration::from_secs_f64(0.5));
        assert!(p.presented_count() >= 5);
    }

    #[test]
    fn stop_rewinds_and_capabilities_are_checked() {
        let sim = running_platform();
        let p = presenter();
        let session = open(&sim, &p);
        session.start(None).unwrap();
        sim.advance(Duration::from_millis(300));
        session.stop().unwrap();
        assert_eq!(session.position(), Duration::ZERO);
        assert_eq!(
            session.check_rate(1.0, true),
            Err(PlatformError::ThinningUnsupported)
        );
        assert_eq!(
            session.check_rate(9.0, false),
            Err(PlatformError::UnsupportedRate(9.0))
        );
        session.start(None).unwrap();
        assert_eq!(
            session.set_rate(-1.0, false),
            Err(PlatformError::UnsupportedRateTransition)
        );
    }

    #[test]
    fn end_of_presentation_raised_once() {
        let sim = running_platform();
        let p = presenter();
        let session = open(&sim, &p);
        let recorder = Recorder::attach(&session, true);
        session.start(None).unwrap();
        for _ in 0..25 {
            sim.advance(Duration::from_millis(100));
        }
        let ends = recorder
            .kinds()
            .into_iter()
            .filter(|k| *k == EventKind::EndOfPresentation)
            .count();
        assert_eq!(ends, 1);
        assert_eq!(session.position(), Duration::from_secs(2));
    }

    #[test]
    fn shutdown_rejects_further_requests() {
        let sim = running_platform();
        let session = sim.create_session().unwrap();
        session.shutdown();
        let recorder = Arc::new_cyclic(|this| Recorder {
            events: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            this: this.clone(),
        });
        assert_eq!(session.begin_get_event(recorder), Err(PlatformError::Shutdown));
        assert_eq!(session.start(None), Err(PlatformError::Shutdown));
    }
}
