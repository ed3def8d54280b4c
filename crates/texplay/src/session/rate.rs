use thiserror::Error;

use super::state::PlaybackState;
use crate::platform::PlatformError;

/// Signed playback speed (negative is reverse) plus the thinning flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    pub speed: f32,
    pub thinning: bool,
}

impl Default for RateState {
    fn default() -> Self {
        Self {
            speed: 1.0,
            thinning: false,
        }
    }
}

impl RateState {
    pub fn is_reverse(&self) -> bool {
        self.speed < 0.0
    }

    /// Zero counts as forward.
    pub fn same_direction(&self, speed: f32) -> bool {
        self.is_reverse() == (speed < 0.0)
    }
}

/// Why a rate change was refused. State and position are untouched in every case.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RateRejection {
    #[error("reverse playback is not supported by this media")]
    ReverseUnsupported,
    #[error("thinned playback is not supported by this media")]
    ThinningUnsupported,
    #[error("rate {0} is not supported by this media")]
    RateUnsupported(f32),
    #[error("cannot change to this rate while running")]
    TransitionWhileRunning,
}

impl RateRejection {
    pub fn from_platform(error: &PlatformError) -> Option<Self> {
        match error {
            PlatformError::ReverseUnsupported => Some(Self::ReverseUnsupported),
            PlatformError::ThinningUnsupported => Some(Self::ThinningUnsupported),
            PlatformError::UnsupportedRate(rate) => Some(Self::RateUnsupported(*rate)),
            PlatformError::UnsupportedRateTransition => Some(Self::TransitionWhileRunning),
            _ => None,
        }
    }
}

/// Command sequence for applying a new rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePlan {
    /// Same direction: optionally pause around the change, then resume.
    SameDirection { pause_first: bool, resume: bool },
    /// Direction flip. A running session is stopped around the change and restarted at
    /// the recorded position; a paused or stopped one only takes the new rate.
    Reversal { stop_first: bool, resume: bool },
}

pub fn plan_rate_change(state: PlaybackState, current: RateState, requested: f32) -> RatePlan {
    let playing = state == PlaybackState::Started;
    if current.same_direction(requested) {
        RatePlan::SameDirection {
            pause_first: playing,
            resume: playing,
        }
    } else {
        RatePlan::Reversal {
            stop_first: playing,
            resume: playing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_counts_as_forward() {
        let fwd = RateState::default();
        assert!(fwd.same_direction(0.0));
        assert!(!fwd.same_direction(-0.5));
        let rev = RateState {
            speed: -2.0,
            thinning: false,
        };
        assert!(!rev.same_direction(0.0));
    }

    #[test]
    fn same_direction_pauses_only_when_playing() {
        let current = RateState::default();
        assert_eq!(
            plan_rate_change(PlaybackState::Started, current, 2.0),
            RatePlan::SameDirection {
                pause_first: true,
                resume: true
            }
        );
        assert_eq!(
            plan_rate_change(PlaybackState::Paused, current, 0.5),
            RatePlan::SameDirection {
                pause_first: false,
                resume: false
            }
        );
    }

    #[test]
    fn reversal_stops_only_when_playing() {
        let current = RateState::default();
        assert_eq!(
            plan_rate_change(PlaybackState::Started, current, -1.0),
            RatePlan::Reversal {
                stop_first: true,
                resume: true
            }
        );
        assert_eq!(
            plan_rate_change(PlaybackState::Paused, current, -1.0),
            RatePlan::Reversal {
                stop_first: false,
                resume: false
            }
        );
        assert_eq!(
            plan_rate_change(PlaybackState::Stopped, current, -1.0),
            RatePlan::Reversal {
                stop_first: false,
                resume: false
            }
        );
    }

    #[test]
    fn platform_errors_map_to_rejections() {
        assert_eq!(
            RateRejection::from_platform(&PlatformError::UnsupportedRate(8.0)),
            Some(RateRejection::RateUnsupported(8.0))
        );
        assert_eq!(RateRejection::from_platform(&PlatformError::Shutdown), None);
    }
}
