use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::surface::ExternalTexture;

/// How the video texture is mapped onto a destination rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoFill {
    /// Stretch to the destination, ignoring aspect.
    #[default]
    Fill,
    /// Whole frame visible, letterboxed or pillarboxed inside the destination.
    AspectFit,
    /// Destination fully covered, frame cropped around its center.
    CropFit,
}

/// Axis-aligned rectangle, `min` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const UNIT: Rect = Rect {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            min: Vec2::new(x, y),
            max: Vec2::new(x + width, y + height),
        }
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Largest rectangle with the aspect of `size` that fits inside `container`, centered.
fn fit_inside(size: Vec2, container: Rect) -> Rect {
    let avail = container.size();
    let scale = (avail.x / size.x.max(f32::EPSILON)).min(avail.y / size.y.max(f32::EPSILON));
    let fitted = size * scale;
    let min = container.center() - fitted * 0.5;
    Rect {
        min,
        max: min + fitted,
    }
}

/// Per-draw mapping from destination-local UV to texture UV: `tex = offset + uv * scale`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct FillUniforms {
    pub uv_scale: [f32; 2],
    pub uv_offset: [f32; 2],
}

/// Everything a renderer needs to draw the current frame: which texture, which part of it,
/// and where on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawQuad {
    pub texture: ExternalTexture,
    /// Source region in normalized texture coordinates.
    pub src_uv: Rect,
    /// Destination region in the caller's coordinate space.
    pub dst: Rect,
}

impl DrawQuad {
    pub fn layout(
        texture: ExternalTexture,
        texture_size: (u32, u32),
        dest: Rect,
        fill: VideoFill,
    ) -> Self {
        let tex = Vec2::new(texture_size.0 as f32, texture_size.1 as f32);
        let (src_uv, dst) = match fill {
            VideoFill::Fill => (Rect::UNIT, dest),
            VideoFill::AspectFit => (Rect::UNIT, fit_inside(tex, dest)),
            VideoFill::CropFit => {
                let bounds = Rect {
                    min: Vec2::ZERO,
                    max: tex,
                };
                let crop = fit_inside(dest.size(), bounds);
                let inv = Vec2::ONE / tex.max(Vec2::ONE);
                (
                    Rect {
                        min: crop.min * inv,
                        max: crop.max * inv,
                    },
                    dest,
                )
            }
        };
        Self {
            texture,
            src_uv,
            dst,
        }
    }

    pub fn uniforms(&self) -> FillUniforms {
        FillUniforms {
            uv_scale: self.src_uv.size().to_array(),
            uv_offset: self.src_uv.min.to_array(),
        }
    }
}
