use std::time::Duration;

use thiserror::Error;

use crate::graph::GraphError;
use crate::platform::PlatformError;
use crate::presenter::pool::PoolError;
use crate::session::rate::RateRejection;
use crate::session::state::PlaybackState;
use crate::surface::SurfaceError;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("cannot {command} while {state}")]
    InvalidRequest {
        command: &'static str,
        state: PlaybackState,
    },
    #[error(transparent)]
    Unsupported(#[from] RateRejection),
    #[error("frame buffers unavailable: {0}")]
    Resource(#[from] PoolError),
    #[error("failed to open media: {0}")]
    Open(PlatformError),
    #[error("failed to build playback graph: {0}")]
    Graph(#[from] GraphError),
    #[error("timed out after {0:?} waiting for the session to close")]
    Timeout(Duration),
    #[error("shared surface: {0}")]
    Surface(#[from] SurfaceError),
    #[error("media platform: {0}")]
    Platform(PlatformError),
}

impl PlayerError {
    /// Translate a status from a transport command.
    pub fn from_platform(error: PlatformError) -> Self {
        match RateRejection::from_platform(&error) {
            Some(rejection) => PlayerError::Unsupported(rejection),
            None => PlayerError::Platform(error),
        }
    }

    pub fn invalid(command: &'static str, state: PlaybackState) -> Self {
        PlayerError::InvalidRequest { command, state }
    }
}
