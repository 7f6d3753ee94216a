//! Semantic tag rasters used for collision masks and sensing.
//!
//! Every pixel carries a single flag byte ([`Tag`]) rather than a colour. Vector
//! shapes are rasterized through `tiny-skia` masks and then written into the tag
//! plane, so sensing never depends on colour-channel arithmetic.

mod compose;
mod shape;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use compose::{CompositeMode, Layer, LayerContent, compose, compose_into};
pub use shape::{PathSegment, Placement, Shape, build_path};

/// Errors emitted by rasterization and compositing.
#[derive(Debug, Error, PartialEq)]
pub enum RasterError {
    /// Raster or window dimensions must be non-zero.
    #[error("raster dimensions must be non-zero (got {width}x{height})")]
    ZeroSized { width: u32, height: u32 },
    /// The vector description produced no drawable geometry.
    #[error("degenerate shape: {0}")]
    DegenerateShape(&'static str),
    /// Raster layers can only be translated, not rotated.
    #[error("raster layers cannot be rotated (rotation {rotation})")]
    UnsupportedTransform { rotation: f32 },
}

/// Per-pixel semantic flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(u8);

impl Tag {
    pub const NONE: Tag = Tag(0);
    pub const OFF_TRACK: Tag = Tag(1 << 0);
    pub const AVAILABLE: Tag = Tag(1 << 1);
    pub const LAP_LINE: Tag = Tag(1 << 2);
    pub const VEHICLE: Tag = Tag(1 << 3);
    pub const SENSOR: Tag = Tag(1 << 4);

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Tag) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Tag) -> Tag {
        Tag(self.0 | other.0)
    }

    #[must_use]
    pub const fn is_off_track(self) -> bool {
        self.contains(Self::OFF_TRACK)
    }

    #[must_use]
    pub const fn is_lap_line(self) -> bool {
        self.contains(Self::LAP_LINE)
    }

    #[must_use]
    pub const fn is_vehicle(self) -> bool {
        self.contains(Self::VEHICLE)
    }

    /// Region tag with overlay flags (vehicle, sensor) stripped.
    #[must_use]
    pub const fn region(self) -> Tag {
        Tag(self.0 & (Self::OFF_TRACK.0 | Self::AVAILABLE.0 | Self::LAP_LINE.0))
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Tag, &str); 5] = [
            (Tag::OFF_TRACK, "OffTrack"),
            (Tag::AVAILABLE, "Available"),
            (Tag::LAP_LINE, "LapLine"),
            (Tag::VEHICLE, "Vehicle"),
            (Tag::SENSOR, "Sensor"),
        ];
        let mut list = f.debug_set();
        for (tag, name) in NAMES {
            if self.contains(tag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

/// Dense plane of [`Tag`] bytes in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRaster {
    width: u32,
    height: u32,
    tags: Vec<u8>,
}

impl Default for TagRaster {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tags: Vec::new(),
        }
    }
}

impl TagRaster {
    /// Allocate a raster with every pixel set to `tag`.
    pub fn filled(width: u32, height: u32, tag: Tag) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::ZeroSized { width, height });
        }
        Ok(Self {
            width,
            height,
            tags: vec![tag.bits(); width as usize * height as usize],
        })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw tag bytes, row-major.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.tags
    }

    /// Tag at `(x, y)`; `None` outside the raster.
    #[must_use]
    pub fn get(&self, x: i64, y: i64) -> Option<Tag> {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return None;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.tags.get(idx).copied().map(Tag::from_bits)
    }

    /// Tag at `(x, y)`, reading anything outside the raster as off-track.
    #[must_use]
    pub fn tag_at(&self, x: i64, y: i64) -> Tag {
        self.get(x, y).unwrap_or(Tag::OFF_TRACK)
    }

    pub fn set(&mut self, x: i64, y: i64, tag: Tag) -> bool {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return false;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.tags[idx] = tag.bits();
        true
    }

    /// OR `tag` into the pixel at `(x, y)`.
    pub fn mark(&mut self, x: i64, y: i64, tag: Tag) -> bool {
        match self.get(x, y) {
            Some(current) => self.set(x, y, current.union(tag)),
            None => false,
        }
    }

    /// Iterate pixels as `(x, y, tag)`.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, Tag)> + '_ {
        let width = self.width as usize;
        self.tags.iter().enumerate().map(move |(idx, &bits)| {
            ((idx % width) as u32, (idx / width) as u32, Tag::from_bits(bits))
        })
    }

    /// Count pixels whose tag contains `tag`.
    #[must_use]
    pub fn count(&self, tag: Tag) -> usize {
        self.tags
            .iter()
            .filter(|&&bits| Tag::from_bits(bits).contains(tag))
            .count()
    }

    /// Rasterize `shape` at `placement` and write `tag` wherever it covers a pixel.
    pub fn paint_shape(
        &mut self,
        shape: &Shape,
        placement: Placement,
        tag: Tag,
        mode: CompositeMode,
    ) -> Result<(), RasterError> {
        let coverage = shape.coverage(self.width, self.height, placement)?;
        for (dst, &cov) in self.tags.iter_mut().zip(coverage.data()) {
            if cov >= 128 {
                *dst = mode.apply(Tag::from_bits(*dst), tag).bits();
            }
        }
        Ok(())
    }

    /// Copy a `width`x`height` window whose top-left corner sits at `(x, y)`.
    ///
    /// Pixels outside the canvas read as [`Tag::OFF_TRACK`].
    pub fn get_pixels(&self, x: i64, y: i64, width: u32, height: u32) -> Result<PixelWindow, RasterError> {
        let mut window = PixelWindow::default();
        self.get_pixels_into(x, y, width, height, &mut window)?;
        Ok(window)
    }

    /// Same as [`TagRaster::get_pixels`], reusing the allocation held by `window`.
    pub fn get_pixels_into(
        &self,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        window: &mut PixelWindow,
    ) -> Result<(), RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::ZeroSized { width, height });
        }
        let len = width as usize * height as usize;
        let raster = &mut window.raster;
        raster.width = width;
        raster.height = height;
        raster.tags.clear();
        raster.tags.resize(len, Tag::OFF_TRACK.bits());
        for row in 0..i64::from(height) {
            let src_y = y + row;
            if src_y < 0 || src_y >= i64::from(self.height) {
                continue;
            }
            let x0 = x.max(0);
            let x1 = (x + i64::from(width)).min(i64::from(self.width));
            if x0 >= x1 {
                continue;
            }
            let src_start = src_y as usize * self.width as usize + x0 as usize;
            let src_end = src_start + (x1 - x0) as usize;
            let dst_start = row as usize * width as usize + (x0 - x) as usize;
            raster.tags[dst_start..dst_start + (x1 - x0) as usize]
                .copy_from_slice(&self.tags[src_start..src_end]);
        }
        window.origin_x = x;
        window.origin_y = y;
        Ok(())
    }
}

/// A copied region of a [`TagRaster`] together with where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PixelWindow {
    pub raster: TagRaster,
    pub origin_x: i64,
    pub origin_y: i64,
}

impl PixelWindow {
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.raster.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.raster.height
    }

    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.raster.tags
    }

    /// Convert canvas coordinates into window-local coordinates.
    #[must_use]
    pub fn to_local(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.origin_x as f32, y - self.origin_y as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_flags() {
        let tag = Tag::AVAILABLE.union(Tag::VEHICLE);
        assert!(tag.contains(Tag::AVAILABLE));
        assert!(tag.is_vehicle());
        assert!(!tag.is_off_track());
        assert_eq!(tag.region(), Tag::AVAILABLE);
        assert!(!Tag::NONE.contains(Tag::NONE));
    }

    #[test]
    fn zero_sized_rasters_are_rejected() {
        assert_eq!(
            TagRaster::filled(0, 4, Tag::OFF_TRACK),
            Err(RasterError::ZeroSized { width: 0, height: 4 })
        );
    }

    #[test]
    fn window_outside_canvas_reads_off_track() {
        let mut raster = TagRaster::filled(4, 4, Tag::AVAILABLE).expect("raster");
        raster.set(0, 0, Tag::LAP_LINE);
        let window = raster.get_pixels(-2, -2, 4, 4).expect("window");
        assert_eq!(window.raster.tag_at(0, 0), Tag::OFF_TRACK);
        assert_eq!(window.raster.tag_at(1, 1), Tag::OFF_TRACK);
        assert_eq!(window.raster.tag_at(2, 2), Tag::LAP_LINE);
        assert_eq!(window.raster.tag_at(3, 3), Tag::AVAILABLE);
        assert_eq!(window.origin_x, -2);
    }

    #[test]
    fn window_reuses_buffer() {
        let raster = TagRaster::filled(16, 16, Tag::AVAILABLE).expect("raster");
        let mut window = PixelWindow::default();
        raster.get_pixels_into(4, 4, 8, 8, &mut window).expect("first");
        raster.get_pixels_into(12, 12, 8, 8, &mut window).expect("second");
        assert_eq!(window.raster.count(Tag::AVAILABLE), 16);
        assert_eq!(window.raster.count(Tag::OFF_TRACK), 48);
    }

    #[test]
    fn stroked_path_marks_available_pixels() {
        let mut raster = TagRaster::filled(64, 32, Tag::OFF_TRACK).expect("raster");
        let road = Shape::stroke(
            vec![
                PathSegment::MoveTo { x: 4.0, y: 16.0 },
                PathSegment::LineTo { x: 60.0, y: 16.0 },
            ],
            10.0,
        );
        raster
            .paint_shape(&road, Placement::IDENTITY, Tag::AVAILABLE, CompositeMode::Replace)
            .expect("paint");
        assert_eq!(raster.tag_at(32, 16), Tag::AVAILABLE);
        assert_eq!(raster.tag_at(32, 2), Tag::OFF_TRACK);
        assert_eq!(raster.tag_at(32, 28), Tag::OFF_TRACK);
    }
}
