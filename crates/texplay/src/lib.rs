//! Media playback control layer.
//!
//! Drives an external decode service (behind [`platform::MediaPlatform`]) and hands every
//! decoded video frame to an independent renderer through a lock-guarded shared GPU
//! surface. The renderer only ever sees the surface through [`player::Player::bind`] /
//! [`player::Player::unbind`] or a scoped bind.

pub mod error;
pub mod fill;
pub mod graph;
pub mod platform;
pub mod player;
pub mod presenter;
pub mod session;
pub mod settings;
pub mod signal;
pub mod surface;

pub use error::PlayerError;
pub use fill::{DrawQuad, VideoFill};
pub use player::{Player, PlayerFactory, TextureBinding};
pub use session::state::PlaybackState;
pub use settings::PlayerSettings;
