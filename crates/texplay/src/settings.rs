use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fill::VideoFill;

/// Where a looping clip restarts when it reaches its end while playing in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReverseLoopPoint {
    /// Restart at zero, same as forward playback.
    Origin,
    /// Restart at the clip's duration and keep running backwards.
    #[default]
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSettings {
    pub version: u32,
    /// Friendly name of the preferred audio output. Used when `load` gets no hint.
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default = "default_pool_depth")]
    pub pool_depth: usize,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default)]
    pub reverse_loop_point: ReverseLoopPoint,
    #[serde(default)]
    pub video_fill: VideoFill,
    /// How far ahead of the clock the decoder fills the presenter queue.
    #[serde(default = "default_lookahead_ms")]
    pub lookahead_ms: u64,
}

fn default_pool_depth() -> usize {
    3
}

fn default_close_timeout_ms() -> u64 {
    5000
}

fn default_lookahead_ms() -> u64 {
    66
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            version: 1,
            audio_device: None,
            pool_depth: default_pool_depth(),
            close_timeout_ms: default_close_timeout_ms(),
            reverse_loop_point: ReverseLoopPoint::default(),
            video_fill: VideoFill::default(),
            lookahead_ms: default_lookahead_ms(),
        }
    }
}

impl PlayerSettings {
    pub fn load() -> Self {
        let Some(config_dir) = dirs::config_dir() else {
            return Self::default();
        };
        Self::load_from(&config_dir.join("texplay").join("settings.json"))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed settings at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) {
        let Some(config_dir) = dirs::config_dir() else {
            return;
        };
        let path = config_dir.join("texplay").join("settings.json");
        if let Err(e) = self.save_to(&path) {
            log::warn!("Failed to save settings: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    /// Pool depth clamped to something a decoder can actually run with.
    pub fn effective_pool_depth(&self) -> usize {
        self.pool_depth.clamp(2, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = PlayerSettings::default();
        assert_eq!(s.pool_depth, 3);
        assert_eq!(s.close_timeout(), Duration::from_secs(5));
        assert_eq!(s.reverse_loop_point, ReverseLoopPoint::End);
        assert_eq!(s.video_fill, VideoFill::Fill);
        assert!(s.audio_device.is_none());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = PlayerSettings::default();
        s.audio_device = Some("Speakers (USB Audio)".into());
        s.reverse_loop_point = ReverseLoopPoint::Origin;
        s.video_fill = VideoFill::CropFit;
        s.save_to(&path).unwrap();

        let loaded = PlayerSettings::load_from(&path);
        assert_eq!(loaded.audio_device.as_deref(), Some("Speakers (USB Audio)"));
        assert_eq!(loaded.reverse_loop_point, ReverseLoopPoint::Origin);
        assert_eq!(loaded.video_fill, VideoFill::CropFit);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"version": 1, "pool_depth": 5}"#).unwrap();
        let loaded = PlayerSettings::load_from(&path);
        assert_eq!(loaded.pool_depth, 5);
        assert_eq!(loaded.close_timeout_ms, 5000);
        assert_eq!(loaded.lookahead_ms, 66);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(PlayerSettings::load_from(&path).pool_depth, 3);
        assert_eq!(
            PlayerSettings::load_from(&dir.path().join("absent.json")).pool_depth,
            3
        );
    }

    #[test]
    fn pool_depth_is_clamped() {
        let s = PlayerSettings {
            pool_depth: 0,
            ..Default::default()
        };
        assert_eq!(s.effective_pool_depth(), 2);
    }
}
