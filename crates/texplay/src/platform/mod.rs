//! Interface to the external media service: source resolution, the playback session and
//! its asynchronous event queue. The decode pipeline itself stays behind these traits.

pub mod context;
pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::graph::MediaGraph;
use crate::session::rate::RateState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlatformError {
    #[error("media platform is not running")]
    NotStarted,
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("unsupported byte stream type: {0}")]
    UnsupportedByteStream(String),
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("request is not valid in the current session state")]
    InvalidRequest,
    #[error("reverse playback is not supported")]
    ReverseUnsupported,
    #[error("thinning is not supported")]
    ThinningUnsupported,
    #[error("playback rate {0} is not supported")]
    UnsupportedRate(f32),
    #[error("rate transition requires the session to be stopped")]
    UnsupportedRateTransition,
    #[error("session has no volume control")]
    NoVolumeControl,
    #[error("an event request is already pending")]
    EventRequestPending,
    #[error("object has been shut down")]
    Shutdown,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MajorType {
    Audio,
    Video,
    Other(String),
}

impl std::fmt::Display for MajorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MajorType::Audio => f.write_str("audio"),
            MajorType::Video => f.write_str("video"),
            MajorType::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub index: u32,
    pub selected: bool,
    pub major_type: MajorType,
    /// Native video size, video streams only.
    pub frame_size: Option<(u32, u32)>,
    /// Frame rate as numerator / denominator, video streams only.
    pub frame_rate: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PresentationDescriptor {
    pub streams: Vec<StreamDescriptor>,
    pub duration: Duration,
}

impl PresentationDescriptor {
    pub fn selected(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.iter().filter(|s| s.selected)
    }

    pub fn first_selected_video(&self) -> Option<&StreamDescriptor> {
        self.selected().find(|s| s.major_type == MajorType::Video)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStatus {
    Ready,
    StartedSource,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    TopologySet { node_count: usize },
    TopologyStatus(TopologyStatus),
    SessionStarted,
    SessionPaused,
    SessionStopped,
    SessionRateChanged,
    SessionClosed,
    EndOfPresentation,
    NewPresentation(PresentationDescriptor),
    BufferingStarted,
    BufferingStopped,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TopologySet { .. } => "topology-set",
            EventKind::TopologyStatus(_) => "topology-status",
            EventKind::SessionStarted => "session-started",
            EventKind::SessionPaused => "session-paused",
            EventKind::SessionStopped => "session-stopped",
            EventKind::SessionRateChanged => "session-rate-changed",
            EventKind::SessionClosed => "session-closed",
            EventKind::EndOfPresentation => "end-of-presentation",
            EventKind::NewPresentation(_) => "new-presentation",
            EventKind::BufferingStarted => "buffering-started",
            EventKind::BufferingStopped => "buffering-stopped",
        }
    }
}

/// One session event with the status the platform attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub kind: EventKind,
    pub status: Result<(), PlatformError>,
}

impl MediaEvent {
    pub fn ok(kind: EventKind) -> Self {
        Self {
            kind,
            status: Ok(()),
        }
    }

    pub fn failed(kind: EventKind, error: PlatformError) -> Self {
        Self {
            kind,
            status: Err(error),
        }
    }
}

/// What the platform hands back to a [`CompletionSink`].
pub enum Completion {
    Event(MediaEvent),
    SourceResolved(Result<Arc<dyn MediaSource>, PlatformError>),
}

/// Receiver of asynchronous completions. Called on a platform thread, one completion at
/// a time per session.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, completion: Completion);
}

pub trait MediaSource: Send + Sync {
    fn url(&self) -> &str;
    fn presentation(&self) -> Result<PresentationDescriptor, PlatformError>;
    fn shutdown(&self);
}

pub trait MediaSession: Send + Sync {
    /// Arm the session to deliver its next event to `sink`. At most one request may be
    /// outstanding.
    fn begin_get_event(&self, sink: Arc<dyn CompletionSink>) -> Result<(), PlatformError>;
    /// Submit a graph. Readiness is reported through the event queue.
    fn set_topology(&self, graph: MediaGraph) -> Result<(), PlatformError>;
    /// Start or resume. `None` continues from the current position.
    fn start(&self, from: Option<Duration>) -> Result<(), PlatformError>;
    fn pause(&self) -> Result<(), PlatformError>;
    fn stop(&self) -> Result<(), PlatformError>;
    /// Request close. Completion is the `SessionClosed` event.
    fn close(&self) -> Result<(), PlatformError>;
    fn shutdown(&self);
    fn position(&self) -> Duration;
    fn rate(&self) -> RateState;
    /// Capability check only, nothing changes.
    fn check_rate(&self, speed: f32, thinning: bool) -> Result<(), PlatformError>;
    fn set_rate(&self, speed: f32, thinning: bool) -> Result<(), PlatformError>;
    fn set_volume(&self, level: f32) -> Result<(), PlatformError>;
    /// How full the network buffer is, in percent. `None` for sources that are not
    /// buffered.
    fn buffer_progress(&self) -> Option<u32> {
        None
    }
}

pub trait MediaPlatform: Send + Sync {
    fn startup(&self) -> Result<(), PlatformError>;
    fn shutdown(&self);
    fn create_session(&self) -> Result<Arc<dyn MediaSession>, PlatformError>;
    fn resolve_source(&self, url: &str) -> Result<Arc<dyn MediaSource>, PlatformError>;
    /// Resolve in the background. The result arrives as [`Completion::SourceResolved`].
    fn begin_resolve_source(
        &self,
        url: &str,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<(), PlatformError>;
}
