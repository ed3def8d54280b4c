use cpal::traits::{DeviceTrait, HostTrait};

/// An active audio render endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEndpoint {
    pub id: String,
    pub friendly_name: String,
}

pub trait AudioEndpoints: Send + Sync {
    fn active_render_endpoints(&self) -> Vec<AudioEndpoint>;
}

/// Output devices of the default cpal host.
#[derive(Debug, Default)]
pub struct CpalEndpoints;

impl AudioEndpoints for CpalEndpoints {
    fn active_render_endpoints(&self) -> Vec<AudioEndpoint> {
        let host = cpal::default_host();
        let host_name = host.id().name();
        host.output_devices()
            .map(|devices| {
                devices
                    .filter_map(|d| d.description().ok().map(|desc| desc.name().to_string()))
                    .map(|name| AudioEndpoint {
                        id: format!("{host_name}:{name}"),
                        friendly_name: name,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fixed endpoint list, for headless runs and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticEndpoints(pub Vec<AudioEndpoint>);

impl StaticEndpoints {
    pub fn named(names: &[&str]) -> Self {
        Self(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| AudioEndpoint {
                    id: format!("static:{i}"),
                    friendly_name: (*name).to_string(),
                })
                .collect(),
        )
    }
}

impl AudioEndpoints for StaticEndpoints {
    fn active_render_endpoints(&self) -> Vec<AudioEndpoint> {
        self.0.clone()
    }
}

/// Pick the endpoint whose friendly name equals `hint`. `None` means the system default.
pub fn select_endpoint(endpoints: &dyn AudioEndpoints, hint: Option<&str>) -> Option<AudioEndpoint> {
    let hint = hint.filter(|h| !h.is_empty())?;
    let found = endpoints
        .active_render_endpoints()
        .into_iter()
        .find(|e| e.friendly_name == hint);
    if found.is_none() {
        log::warn!("Audio device '{hint}' not found, using the default output");
    }
    found
}
