use std::any::Any;

use anyhow::Result;
use wgpu::{
    DeviceDescriptor, ExperimentalFeatures, Instance, InstanceDescriptor, MemoryHints,
    PowerPreference, RequestAdapterOptions, Trace,
};

use super::{ExternalTexture, FrameTarget, SurfaceDevice, SurfaceError, SurfaceStore};

const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Decode targets and the shared surface as textures on one wgpu device. Presenting a
/// frame is a texture-to-texture copy recorded on the GPU.
pub struct WgpuSurfaceDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl WgpuSurfaceDevice {
    /// Share an existing renderer device, so the renderer can sample the surface directly.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_name: "external device".into(),
        }
    }

    /// Create a device with no window attached.
    pub fn headless() -> Result<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("texplay-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: ExperimentalFeatures::default(),
            memory_hints: MemoryHints::Performance,
            trace: Trace::Off,
        }))?;

        let info = adapter.get_info();
        log::info!("GPU initialized: {} ({:?})", info.name, info.backend);

        Ok(Self {
            device,
            queue,
            adapter_name: info.name,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

pub struct WgpuFrameTarget {
    texture: wgpu::Texture,
    queue: wgpu::Queue,
    width: u32,
    height: u32,
}

impl FrameTarget for WgpuFrameTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write_rgba(&mut self, data: &[u8]) -> Result<(), SurfaceError> {
        let expected = self.width as usize * self.height as usize * 4;
        if data.len() != expected {
            return Err(SurfaceError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            extent(self.width, self.height),
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The shared surface texture plus what a renderer needs to sample it.
pub struct WgpuSharedSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    device: wgpu::Device,
    queue: wgpu::Queue,
    external: ExternalTexture,
    width: u32,
    height: u32,
}

impl WgpuSharedSurface {
    pub fn downcast(store: &dyn SurfaceStore) -> Option<&WgpuSharedSurface> {
        store.as_any().downcast_ref::<WgpuSharedSurface>()
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }
}

impl SurfaceStore for WgpuSharedSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn external(&self) -> ExternalTexture {
        self.external
    }

    fn copy_from(&mut self, frame: &dyn FrameTarget) -> Result<(), SurfaceError> {
        let src = frame
            .as_any()
            .downcast_ref::<WgpuFrameTarget>()
            .ok_or(SurfaceError::ForeignTarget)?;
        if src.size() != self.size() {
            return Err(SurfaceError::SizeMismatch {
                frame: src.size(),
                surface: self.size(),
            });
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texplay-present"),
            });
        encoder.copy_texture_to_texture(
            src.texture.as_image_copy(),
            self.texture.as_image_copy(),
            extent(self.width, self.height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl SurfaceDevice for WgpuSurfaceDevice {
    fn create_target(&self, width: u32, height: u32) -> Result<Box<dyn FrameTarget>, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidSize(width, height));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texplay-decode-target"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Ok(Box::new(WgpuFrameTarget {
            texture,
            queue: self.queue.clone(),
            width,
            height,
        }))
    }

    fn create_surface(
        &self,
        width: u32,
        height: u32,
        external: ExternalTexture,
    ) -> Result<Box<dyn SurfaceStore>, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidSize(width, height));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texplay-shared-surface"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texplay-surface-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });
        Ok(Box::new(WgpuSharedSurface {
            texture,
            view,
            sampler,
            device: self.device.clone(),
            queue: self.queue.clone(),
            external,
            width,
            height,
        }))
    }

    fn name(&self) -> &str {
        &self.adapter_name
    }
}
