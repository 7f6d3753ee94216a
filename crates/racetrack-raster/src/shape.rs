use serde::{Deserialize, Serialize};
use tiny_skia as sk;

use crate::RasterError;

/// One element of a vector path description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PathSegment {
    MoveTo { x: f32, y: f32 },
    LineTo { x: f32, y: f32 },
    QuadTo { x1: f32, y1: f32, x: f32, y: f32 },
    CubicTo { x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32 },
    Close,
}

/// Translation plus rotation (radians) applied when rasterizing a shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
}

impl Placement {
    pub const IDENTITY: Placement = Placement {
        x: 0.0,
        y: 0.0,
        rotation: 0.0,
    };

    #[must_use]
    pub const fn new(x: f32, y: f32, rotation: f32) -> Self {
        Self { x, y, rotation }
    }

    pub(crate) fn transform(self) -> sk::Transform {
        // tiny-skia rotations are expressed in degrees.
        sk::Transform::from_rotate(self.rotation.to_degrees()).post_translate(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ShapeKind {
    Stroke { segments: Vec<PathSegment>, width: f32 },
    Rect { width: f32, height: f32 },
}

/// Vector geometry that can be rasterized into a tag plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    kind: ShapeKind,
}

impl Shape {
    /// Path stroked with round caps and joins.
    #[must_use]
    pub fn stroke(segments: Vec<PathSegment>, width: f32) -> Self {
        Self {
            kind: ShapeKind::Stroke { segments, width },
        }
    }

    /// Axis-aligned rectangle centred on the local origin.
    #[must_use]
    pub fn rect(width: f32, height: f32) -> Self {
        Self {
            kind: ShapeKind::Rect { width, height },
        }
    }

    /// Build the outline as a tiny-skia path (strokes are expanded to their outline).
    pub fn to_path(&self) -> Result<sk::Path, RasterError> {
        match &self.kind {
            ShapeKind::Stroke { segments, width } => {
                if !(width.is_finite() && *width > 0.0) {
                    return Err(RasterError::DegenerateShape("stroke width must be positive"));
                }
                let path = build_path(segments)?;
                let stroke = sk::Stroke {
                    width: *width,
                    line_cap: sk::LineCap::Round,
                    line_join: sk::LineJoin::Round,
                    ..sk::Stroke::default()
                };
                path.stroke(&stroke, 1.0)
                    .ok_or(RasterError::DegenerateShape("stroke produced no outline"))
            }
            ShapeKind::Rect { width, height } => {
                sk::Rect::from_xywh(-width / 2.0, -height / 2.0, *width, *height)
                    .map(sk::PathBuilder::from_rect)
                    .ok_or(RasterError::DegenerateShape("rectangle must have positive size"))
            }
        }
    }

    /// Binary coverage of this shape on a `width`x`height` canvas.
    pub(crate) fn coverage(
        &self,
        width: u32,
        height: u32,
        placement: Placement,
    ) -> Result<sk::Mask, RasterError> {
        let path = self.to_path()?;
        let mut mask = sk::Mask::new(width, height).ok_or(RasterError::ZeroSized { width, height })?;
        // Anti-aliasing off: tags are categorical, partial coverage has no meaning.
        mask.fill_path(&path, sk::FillRule::Winding, false, placement.transform());
        Ok(mask)
    }
}

/// Convert segments into a tiny-skia path.
pub fn build_path(segments: &[PathSegment]) -> Result<sk::Path, RasterError> {
    let mut pb = sk::PathBuilder::new();
    for segment in segments {
        match *segment {
            PathSegment::MoveTo { x, y } => pb.move_to(x, y),
            PathSegment::LineTo { x, y } => pb.line_to(x, y),
            PathSegment::QuadTo { x1, y1, x, y } => pb.quad_to(x1, y1, x, y),
            PathSegment::CubicTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => pb.cubic_to(x1, y1, x2, y2, x, y),
            PathSegment::Close => pb.close(),
        }
    }
    pb.finish()
        .ok_or(RasterError::DegenerateShape("path has no drawable segments"))
}
