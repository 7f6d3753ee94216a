use crate::{Placement, RasterError, Shape, Tag, TagRaster};

/// How a layer's tag combines with what is already on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// The layer's tag replaces the existing pixel.
    #[default]
    Replace,
    /// The layer's flags are OR-ed into the existing pixel.
    Union,
}

impl CompositeMode {
    pub(crate) fn apply(self, below: Tag, above: Tag) -> Tag {
        match self {
            Self::Replace => above,
            Self::Union => below.union(above),
        }
    }
}

/// What a [`Layer`] draws.
#[derive(Debug, Clone, Copy)]
pub enum LayerContent<'a> {
    /// An existing tag plane, copied pixel for pixel.
    Raster(&'a TagRaster),
    /// A vector shape painted with a single tag.
    Shape(&'a Shape, Tag),
}

/// One source in a [`compose`] call.
#[derive(Debug, Clone, Copy)]
pub struct Layer<'a> {
    pub content: LayerContent<'a>,
    pub position: (f32, f32),
    pub rotation: f32,
    pub mode: CompositeMode,
}

impl<'a> Layer<'a> {
    #[must_use]
    pub fn raster(raster: &'a TagRaster) -> Self {
        Self {
            content: LayerContent::Raster(raster),
            position: (0.0, 0.0),
            rotation: 0.0,
            mode: CompositeMode::Replace,
        }
    }

    #[must_use]
    pub fn shape(shape: &'a Shape, tag: Tag, placement: Placement, mode: CompositeMode) -> Self {
        Self {
            content: LayerContent::Shape(shape, tag),
            position: (placement.x, placement.y),
            rotation: placement.rotation,
            mode,
        }
    }
}

/// Draw `sources` in order onto a fresh `width`x`height` raster.
pub fn compose(sources: &[Layer<'_>], width: u32, height: u32) -> Result<TagRaster, RasterError> {
    let mut target = TagRaster::default();
    compose_into(&mut target, sources, width, height)?;
    Ok(target)
}

/// Same as [`compose`], drawing into a caller-owned raster to reuse its allocation.
pub fn compose_into(
    target: &mut TagRaster,
    sources: &[Layer<'_>],
    width: u32,
    height: u32,
) -> Result<(), RasterError> {
    if width == 0 || height == 0 {
        return Err(RasterError::ZeroSized { width, height });
    }
    target.width = width;
    target.height = height;
    target.tags.clear();
    target
        .tags
        .resize(width as usize * height as usize, Tag::NONE.bits());

    for layer in sources {
        match layer.content {
            LayerContent::Raster(source) => blit(target, source, layer)?,
            LayerContent::Shape(shape, tag) => {
                let placement = Placement::new(layer.position.0, layer.position.1, layer.rotation);
                target.paint_shape(shape, placement, tag, layer.mode)?;
            }
        }
    }
    Ok(())
}

fn blit(target: &mut TagRaster, source: &TagRaster, layer: &Layer<'_>) -> Result<(), RasterError> {
    if layer.rotation != 0.0 {
        return Err(RasterError::UnsupportedTransform {
            rotation: layer.rotation,
        });
    }
    let dx = layer.position.0.round() as i64;
    let dy = layer.position.1.round() as i64;
    let target_w = i64::from(target.width);
    let target_h = i64::from(target.height);
    for sy in 0..i64::from(source.height) {
        let ty = sy + dy;
        if ty < 0 || ty >= target_h {
            continue;
        }
        for sx in 0..i64::from(source.width) {
            let tx = sx + dx;
            if tx < 0 || tx >= target_w {
                continue;
            }
            let src = source.tags[sy as usize * source.width as usize + sx as usize];
            let dst = &mut target.tags[ty as usize * target.width as usize + tx as usize];
            *dst = layer.mode.apply(Tag::from_bits(*dst), Tag::from_bits(src)).bits();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_layer_unions_with_track() {
        let track = TagRaster::filled(32, 32, Tag::AVAILABLE).expect("track");
        let body = Shape::rect(8.0, 4.0);
        let composed = compose(
            &[
                Layer::raster(&track),
                Layer::shape(
                    &body,
                    Tag::VEHICLE,
                    Placement::new(16.0, 16.0, 0.0),
                    CompositeMode::Union,
                ),
            ],
            32,
            32,
        )
        .expect("compose");
        assert_eq!(composed.tag_at(16, 16), Tag::AVAILABLE.union(Tag::VEHICLE));
        assert_eq!(composed.tag_at(2, 2), Tag::AVAILABLE);
        assert_eq!(composed.count(Tag::VEHICLE), 32);
    }

    #[test]
    fn raster_layers_are_offset_by_position() {
        let mut source = TagRaster::filled(4, 4, Tag::AVAILABLE).expect("source");
        source.set(0, 0, Tag::LAP_LINE);
        let mut layer = Layer::raster(&source);
        layer.position = (2.0, 3.0);
        let composed = compose(&[layer], 8, 8).expect("compose");
        assert_eq!(composed.tag_at(2, 3), Tag::LAP_LINE);
        assert_eq!(composed.tag_at(0, 0), Tag::NONE);
    }

    #[test]
    fn rotated_raster_layers_fail() {
        let source = TagRaster::filled(4, 4, Tag::AVAILABLE).expect("source");
        let mut layer = Layer::raster(&source);
        layer.rotation = 0.5;
        assert_eq!(
            compose(&[layer], 4, 4),
            Err(RasterError::UnsupportedTransform { rotation: 0.5 })
        );
    }
}
