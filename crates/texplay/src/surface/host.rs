//! CPU-memory surface device. Used when no GPU adapter is available and by tests.

use std::any::Any;

use super::{ExternalTexture, FrameTarget, SurfaceDevice, SurfaceError, SurfaceStore};

#[derive(Debug, Default)]
pub struct HostSurfaceDevice;

impl HostSurfaceDevice {
    pub fn new() -> Self {
        Self
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

#[derive(Debug)]
pub struct HostFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl HostFrame {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl FrameTarget for HostFrame {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write_rgba(&mut self, data: &[u8]) -> Result<(), SurfaceError> {
        if data.len() != self.pixels.len() {
            return Err(SurfaceError::DataLength {
                expected: self.pixels.len(),
                actual: data.len(),
            });
        }
        self.pixels.copy_from_slice(data);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct HostSurface {
    width: u32,
    height: u32,
    external: ExternalTexture,
    pixels: Vec<u8>,
}

impl HostSurface {
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn downcast(store: &dyn SurfaceStore) -> Option<&HostSurface> {
        store.as_any().downcast_ref::<HostSurface>()
    }
}

impl SurfaceStore for HostSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn external(&self) -> ExternalTexture {
        self.external
    }

    fn copy_from(&mut self, frame: &dyn FrameTarget) -> Result<(), SurfaceError> {
        let src = frame
            .as_any()
            .downcast_ref::<HostFrame>()
            .ok_or(SurfaceError::ForeignTarget)?;
        if src.size() != self.size() {
            return Err(SurfaceError::SizeMismatch {
                frame: src.size(),
                surface: self.size(),
            });
        }
        self.pixels.copy_from_slice(&src.pixels);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl SurfaceDevice for HostSurfaceDevice {
    fn create_target(&self, width: u32, height: u32) -> Result<Box<dyn FrameTarget>, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidSize(width, height));
        }
        Ok(Box::new(HostFrame {
            width,
            height,
            pixels: vec![0; byte_len(width, height)],
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
        Ok(Box::new(HostSurface {
            width,
            height,
            external,
            pixels: vec![0; byte_len(width, height)],
        }))
    }

    fn name(&self) -> &str {
        "host memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_moves_pixels_into_surface() {
        let device = HostSurfaceDevice::new();
        let mut target = device.create_target(2, 1).unwrap();
        target.write_rgba(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut surface = device.create_surface(2, 1, ExternalTexture(3)).unwrap();
        surface.copy_from(target.as_ref()).unwrap();
        let host = HostSurface::downcast(surface.as_ref()).unwrap();
        assert_eq!(host.pixels(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn copy_rejects_other_sizes() {
        let device = HostSurfaceDevice::new();
        let target = device.create_target(2, 2).unwrap();
        let mut surface = device.create_surface(2, 1, ExternalTexture(3)).unwrap();
        assert_eq!(
            surface.copy_from(target.as_ref()),
            Err(SurfaceError::SizeMismatch {
                frame: (2, 2),
                surface: (2, 1)
            })
        );
    }

    #[test]
    fn short_write_rejected() {
        let device = HostSurfaceDevice::new();
        let mut target = device.create_target(2, 2).unwrap();
        assert_eq!(
            target.write_rgba(&[0; 4]),
            Err(SurfaceError::DataLength {
                expected: 16,
                actual: 4
            })
        );
    }
}
