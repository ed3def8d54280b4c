//! Playback state machine. [`dispatch`] is pure: it maps the current machine and one
//! session event to the actions the controller must run.

use std::time::Duration;

use crate::platform::{EventKind, MediaEvent, PlatformError, PresentationDescriptor, TopologyStatus};
use crate::settings::ReverseLoopPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Closed,
    Ready,
    OpeningAsync,
    OpenedAsync,
    OpeningSync,
    Started,
    Paused,
    Stopped,
    Closing,
}

impl PlaybackState {
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackState::Closed => "closed",
            PlaybackState::Ready => "ready",
            PlaybackState::OpeningAsync => "opening (async)",
            PlaybackState::OpenedAsync => "opened (async)",
            PlaybackState::OpeningSync => "opening",
            PlaybackState::Started => "started",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Closing => "closing",
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(
            self,
            PlaybackState::OpeningAsync | PlaybackState::OpenedAsync | PlaybackState::OpeningSync
        )
    }

    /// A graph is ready and transport commands reach the session.
    pub fn has_graph(&self) -> bool {
        matches!(
            self,
            PlaybackState::Started | PlaybackState::Paused | PlaybackState::Stopped
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A user intent recorded while the graph is not ready yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingIntent {
    Play,
}

/// How a transport command was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Sent to the session.
    Issued,
    /// Recorded and applied when the graph becomes ready.
    Latched,
    /// Cancelled a latched intent.
    Cancelled,
    /// Stored until a session that can take it exists.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Seek,
    SetRate,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Seek => "seek",
            Command::SetRate => "set rate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Issue,
    Latch,
    Reject,
}

pub fn gate(state: PlaybackState, command: Command) -> Gate {
    match command {
        Command::Play if matches!(state, PlaybackState::Paused | PlaybackState::Stopped) => {
            Gate::Issue
        }
        Command::Play if state.is_opening() => Gate::Latch,
        Command::Pause if state == PlaybackState::Started => Gate::Issue,
        Command::Stop if matches!(state, PlaybackState::Started | PlaybackState::Paused) => {
            Gate::Issue
        }
        Command::Seek | Command::SetRate if state.has_graph() => Gate::Issue,
        _ => Gate::Reject,
    }
}

/// Events after translation from the platform's event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    GraphReady,
    EndOfPresentation,
    NewPresentation(PresentationDescriptor),
    SourceResolved,
    Failed {
        during: &'static str,
        error: PlatformError,
    },
    /// Informational only: logged, no state change.
    Notice(EventKind),
}

impl From<MediaEvent> for SessionEvent {
    fn from(event: MediaEvent) -> Self {
        if let Err(error) = event.status {
            return SessionEvent::Failed {
                during: event.kind.name(),
                error,
            };
        }
        match event.kind {
            EventKind::TopologyStatus(TopologyStatus::Ready) => SessionEvent::GraphReady,
            EventKind::EndOfPresentation => SessionEvent::EndOfPresentation,
            EventKind::NewPresentation(pd) => SessionEvent::NewPresentation(pd),
            other => SessionEvent::Notice(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Start or resume from the current position.
    Start,
    /// Start from an explicit position.
    Restart(Duration),
    Pause,
    Stop,
    BuildPendingGraph,
    RebuildGraph(PresentationDescriptor),
    ApplyVolume,
    FirePresentationEnded,
    ReportOpenFailure(PlatformError),
}

impl Action {
    /// State the controller is in once this action succeeded.
    pub fn resulting_state(&self) -> Option<PlaybackState> {
        match self {
            Action::Start | Action::Restart(_) => Some(PlaybackState::Started),
            Action::Pause => Some(PlaybackState::Paused),
            Action::Stop => Some(PlaybackState::Stopped),
            Action::BuildPendingGraph | Action::RebuildGraph(_) => Some(PlaybackState::OpeningSync),
            Action::ReportOpenFailure(_) => Some(PlaybackState::Closed),
            Action::ApplyVolume | Action::FirePresentationEnded => None,
        }
    }
}

/// Inputs of [`dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    pub state: PlaybackState,
    pub pending: Option<PendingIntent>,
    pub looping: bool,
    pub speed: f32,
    pub duration: Duration,
    pub reverse_loop_point: ReverseLoopPoint,
}

impl Machine {
    fn loop_point(&self) -> Duration {
        if self.speed < 0.0 && self.reverse_loop_point == ReverseLoopPoint::End {
            self.duration
        } else {
            Duration::ZERO
        }
    }
}

/// `state` is entered before the actions run; each successful action then moves the
/// state to its [`Action::resulting_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PlaybackState,
    pub pending: Option<PendingIntent>,
    pub actions: Vec<Action>,
}

impl Transition {
    fn stay(machine: &Machine) -> Self {
        Self {
            state: machine.state,
            pending: machine.pending,
            actions: Vec::new(),
        }
    }

    /// State once every action has succeeded.
    pub fn final_state(&self) -> PlaybackState {
        self.actions
            .iter()
            .rev()
            .find_map(Action::resulting_state)
            .unwrap_or(self.state)
    }
}

pub fn dispatch(machine: &Machine, event: &SessionEvent) -> Transition {
    match event {
        SessionEvent::GraphReady if machine.state == PlaybackState::OpeningSync => {
            let mut actions = vec![Action::Start, Action::Pause, Action::ApplyVolume];
            if machine.pending == Some(PendingIntent::Play) {
                actions.push(Action::Start);
            }
            Transition {
                state: machine.state,
                pending: None,
                actions,
            }
        }
        SessionEvent::EndOfPresentation if machine.state.has_graph() => {
            let mut actions = vec![Action::FirePresentationEnded];
            if machine.looping {
                actions.push(Action::Stop);
                actions.push(Action::Restart(machine.loop_point()));
            } else if machine.state == PlaybackState::Started {
                actions.push(Action::Pause);
            }
            Transition {
                actions,
                ..Transition::stay(machine)
            }
        }
        SessionEvent::NewPresentation(pd) => Transition {
            actions: vec![Action::RebuildGraph(pd.clone())],
            ..Transition::stay(machine)
        },
        SessionEvent::SourceResolved if machine.state == PlaybackState::OpeningAsync => {
            Transition {
                state: PlaybackState::OpenedAsync,
                pending: machine.pending,
                actions: vec![Action::BuildPendingGraph],
            }
        }
        SessionEvent::Failed { error, .. } if machine.state.is_opening() => Transition {
            state: PlaybackState::Closed,
            pending: None,
            actions: vec![Action::ReportOpenFailure(error.clone())],
        },
        _ => Transition::stay(machine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PlaybackState; 9] = [
        PlaybackState::Closed,
        PlaybackState::Ready,
        PlaybackState::OpeningAsync,
        PlaybackState::OpenedAsync,
        PlaybackState::OpeningSync,
        PlaybackState::Started,
        PlaybackState::Paused,
        PlaybackState::Stopped,
        PlaybackState::Closing,
    ];

    fn machine(state: PlaybackState) -> Machine {
        Machine {
            state,
            pending: None,
            looping: false,
            speed: 1.0,
            duration: Duration::from_secs(10),
            reverse_loop_point: ReverseLoopPoint::End,
        }
    }

    #[test]
    fn pause_only_from_started() {
        for state in ALL {
            let expected = if state == PlaybackState::Started {
                Gate::Issue
            } else {
                Gate::Reject
            };
            assert_eq!(gate(state, Command::Pause), expected, "{state}");
        }
    }

    #[test]
    fn stop_only_from_started_or_paused() {
        for state in ALL {
            let expected = if matches!(state, PlaybackState::Started | PlaybackState::Paused) {
                Gate::Issue
            } else {
                Gate::Reject
            };
            assert_eq!(gate(state, Command::Stop), expected, "{state}");
        }
    }

    #[test]
    fn play_latches_while_opening() {
        for state in ALL {
            let g = gate(state, Command::Play);
            match state {
                PlaybackState::Paused | PlaybackState::Stopped => assert_eq!(g, Gate::Issue),
                s if s.is_opening() => assert_eq!(g, Gate::Latch),
                _ => assert_eq!(g, Gate::Reject, "{state}"),
            }
        }
    }

    #[test]
    fn seek_rejected_without_ready_graph() {
        assert_eq!(gate(PlaybackState::OpeningSync, Command::Seek), Gate::Reject);
        assert_eq!(gate(PlaybackState::Stopped, Command::Seek), Gate::Issue);
    }

    #[test]
    fn graph_ready_presents_first_frame_paused() {
        let t = dispatch(&machine(PlaybackState::OpeningSync), &SessionEvent::GraphReady);
        assert_eq!(
            t.actions,
            vec![Action::Start, Action::Pause, Action::ApplyVolume]
        );
        assert_eq!(t.final_state(), PlaybackState::Paused);
    }

    #[test]
    fn graph_ready_honors_latched_play_once() {
        let mut m = machine(PlaybackState::OpeningSync);
        m.pending = Some(PendingIntent::Play);
        let t = dispatch(&m, &SessionEvent::GraphReady);
        assert_eq!(t.actions.last(), Some(&Action::Start));
        assert_eq!(t.final_state(), PlaybackState::Started);
        assert_eq!(t.pending, None);
    }

    #[test]
    fn graph_ready_outside_opening_is_ignored() {
        let t = dispatch(&machine(PlaybackState::Started), &SessionEvent::GraphReady);
        assert!(t.actions.is_empty());
        assert_eq!(t.final_state(), PlaybackState::Started);
    }

    #[test]
    fn end_of_stream_fires_before_loop_restart() {
        let mut m = machine(PlaybackState::Started);
        m.looping = true;
        let t = dispatch(&m, &SessionEvent::EndOfPresentation);
        assert_eq!(
            t.actions,
            vec![
                Action::FirePresentationEnded,
                Action::Stop,
                Action::Restart(Duration::ZERO)
            ]
        );
        assert_eq!(t.final_state(), PlaybackState::Started);
    }

    #[test]
    fn end_of_stream_without_loop_pauses() {
        let t = dispatch(&machine(PlaybackState::Started), &SessionEvent::EndOfPresentation);
        assert_eq!(
            t.actions,
            vec![Action::FirePresentationEnded, Action::Pause]
        );
        let t = dispatch(&machine(PlaybackState::Paused), &SessionEvent::EndOfPresentation);
        assert_eq!(t.actions, vec![Action::FirePresentationEnded]);
    }

    #[test]
    fn reverse_loop_point_follows_setting() {
        let mut m = machine(PlaybackState::Started);
        m.looping = true;
        m.speed = -1.0;
        let t = dispatch(&m, &SessionEvent::EndOfPresentation);
        assert_eq!(t.actions[2], Action::Restart(Duration::from_secs(10)));

        m.reverse_loop_point = ReverseLoopPoint::Origin;
        let t = dispatch(&m, &SessionEvent::EndOfPresentation);
        assert_eq!(t.actions[2], Action::Restart(Duration::ZERO));
    }

    #[test]
    fn source_resolved_only_counts_in_async_open() {
        let t = dispatch(&machine(PlaybackState::OpeningAsync), &SessionEvent::SourceResolved);
        assert_eq!(t.state, PlaybackState::OpenedAsync);
        assert_eq!(t.final_state(), PlaybackState::OpeningSync);

        let t = dispatch(&machine(PlaybackState::Paused), &SessionEvent::SourceResolved);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn failure_while_opening_closes() {
        let mut m = machine(PlaybackState::OpeningSync);
        m.pending = Some(PendingIntent::Play);
        let event = SessionEvent::from(MediaEvent::failed(
            EventKind::TopologyStatus(TopologyStatus::Ready),
            PlatformError::UnsupportedByteStream("x".into()),
        ));
        let t = dispatch(&m, &event);
        assert_eq!(t.state, PlaybackState::Closed);
        assert_eq!(t.pending, None);

        let t = dispatch(&machine(PlaybackState::Started), &event);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn new_presentation_rebuilds() {
        let pd = PresentationDescriptor {
            streams: Vec::new(),
            duration: Duration::from_secs(3),
        };
        let t = dispatch(
            &machine(PlaybackState::Started),
            &SessionEvent::NewPresentation(pd.clone()),
        );
        assert_eq!(t.actions, vec![Action::RebuildGraph(pd)]);
        assert_eq!(t.final_state(), PlaybackState::OpeningSync);
    }

    #[test]
    fn informational_events_change_nothing() {
        let m = machine(PlaybackState::Paused);
        let event = SessionEvent::from(MediaEvent::ok(EventKind::TopologySet { node_count: 4 }));
        assert_eq!(dispatch(&m, &event), Transition::stay(&m));
    }
}
