//! Road geometry and its two raster views.
//!
//! The *mask* is a [`TagRaster`] where every pixel carries exactly one region
//! tag (off-track, available road, or lap line); it is built once when the track
//! loads and drives all collision and sensing. The *image* is a decorative
//! rendering of the same geometry, built lazily and cached, with no meaning to
//! the simulation.

use racetrack_raster::{CompositeMode, PathSegment, Placement, RasterError, Shape, Tag, TagRaster, build_path};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tiny_skia as sk;

/// Errors raised while loading a track definition.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("track `{0}` has a zero-length starting direction")]
    ZeroDirection(String),
    #[error("track `{name}` has non-positive {field} ({value})")]
    InvalidThickness {
        name: String,
        field: &'static str,
        value: f32,
    },
    #[error("track `{0}` has an empty path")]
    EmptyPath(String),
    #[error("track `{name}` has a zero-sized canvas ({width}x{height})")]
    ZeroCanvas { name: String, width: u32, height: u32 },
    #[error("failed to rasterize track: {0}")]
    Raster(#[from] RasterError),
    #[error("failed to render track image: {0}")]
    Image(String),
}

/// Data table describing one named track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackDefinition {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub path: Vec<PathSegment>,
    pub road_thickness: f32,
    pub lane_marking_thickness: f32,
    pub start: (f32, f32),
    /// Need not be normalized; zero is rejected.
    pub start_direction: (f32, f32),
}

/// Immutable loaded track.
pub struct Track {
    definition: TrackDefinition,
    direction: (f32, f32),
    starting_angle: f32,
    mask: TagRaster,
    image: OnceLock<sk::Pixmap>,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("name", &self.definition.name)
            .field("width", &self.definition.width)
            .field("height", &self.definition.height)
            .field("road_thickness", &self.definition.road_thickness)
            .field("starting_angle", &self.starting_angle)
            .field("image_cached", &self.image.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Track {
    /// Validate the definition and rasterize its mask.
    pub fn from_definition(definition: TrackDefinition) -> Result<Self, TrackError> {
        let name = definition.name.clone();
        if definition.width == 0 || definition.height == 0 {
            return Err(TrackError::ZeroCanvas {
                name,
                width: definition.width,
                height: definition.height,
            });
        }
        if definition.path.is_empty() {
            return Err(TrackError::EmptyPath(name));
        }
        for (field, value) in [
            ("road thickness", definition.road_thickness),
            ("lane marking thickness", definition.lane_marking_thickness),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrackError::InvalidThickness { name, field, value });
            }
        }
        let (dx, dy) = definition.start_direction;
        let length = dx.hypot(dy);
        if !(length.is_finite() && length > f32::EPSILON) {
            return Err(TrackError::ZeroDirection(name));
        }
        let direction = (dx / length, dy / length);
        let starting_angle = direction.1.atan2(direction.0);

        let mut mask = TagRaster::filled(definition.width, definition.height, Tag::OFF_TRACK)?;
        let road = Shape::stroke(definition.path.clone(), definition.road_thickness);
        mask.paint_shape(&road, Placement::IDENTITY, Tag::AVAILABLE, CompositeMode::Replace)?;
        let lap_line = Shape::rect(definition.lane_marking_thickness, definition.road_thickness);
        let (sx, sy) = definition.start;
        mask.paint_shape(
            &lap_line,
            Placement::new(sx, sy, starting_angle),
            Tag::LAP_LINE,
            CompositeMode::Replace,
        )?;

        Ok(Self {
            definition,
            direction,
            starting_angle,
            mask,
            image: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn definition(&self) -> &TrackDefinition {
        &self.definition
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.definition.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.definition.height
    }

    #[must_use]
    pub const fn road_thickness(&self) -> f32 {
        self.definition.road_thickness
    }

    #[must_use]
    pub const fn lane_marking_thickness(&self) -> f32 {
        self.definition.lane_marking_thickness
    }

    #[must_use]
    pub const fn start(&self) -> (f32, f32) {
        self.definition.start
    }

    /// Unit starting direction.
    #[must_use]
    pub const fn direction(&self) -> (f32, f32) {
        self.direction
    }

    /// `atan2` of the starting direction, in radians.
    #[must_use]
    pub const fn starting_angle(&self) -> f32 {
        self.starting_angle
    }

    #[must_use]
    pub fn mask(&self) -> &TagRaster {
        &self.mask
    }

    /// Whether `(x, y)` lies on the canvas.
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.definition.width as f32 && y < self.definition.height as f32
    }

    /// Decorative rendering, built on first use.
    pub fn image(&self) -> Result<&sk::Pixmap, TrackError> {
        if let Some(image) = self.image.get() {
            return Ok(image);
        }
        let rendered = self.render_image()?;
        Ok(self.image.get_or_init(|| rendered))
    }

    /// PNG bytes of the decorative image.
    pub fn encode_png(&self) -> Result<Vec<u8>, TrackError> {
        self.image()?
            .encode_png()
            .map_err(|err| TrackError::Image(err.to_string()))
    }

    fn render_image(&self) -> Result<sk::Pixmap, TrackError> {
        let def = &self.definition;
        let mut pixmap = sk::Pixmap::new(def.width, def.height).ok_or(TrackError::ZeroCanvas {
            name: def.name.clone(),
            width: def.width,
            height: def.height,
        })?;
        pixmap.fill(sk::Color::from_rgba8(58, 125, 68, 255));

        let path = build_path(&def.path)?;
        let mut paint = sk::Paint::default();
        paint.anti_alias = true;

        paint.set_color_rgba8(64, 64, 70, 255);
        let asphalt = sk::Stroke {
            width: def.road_thickness,
            line_cap: sk::LineCap::Round,
            line_join: sk::LineJoin::Round,
            ..sk::Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &asphalt, sk::Transform::identity(), None);

        paint.set_color_rgba8(236, 236, 236, 255);
        let dash_length = (def.lane_marking_thickness * 6.0).max(8.0);
        let lane = sk::Stroke {
            width: def.lane_marking_thickness,
            line_cap: sk::LineCap::Butt,
            dash: sk::StrokeDash::new(vec![dash_length, dash_length * 0.75], 0.0),
            ..sk::Stroke::default()
        };
        pixmap.stroke_path(&path, &paint, &lane, sk::Transform::identity(), None);

        paint.set_color_rgba8(250, 250, 250, 255);
        let line = Shape::rect(def.lane_marking_thickness * 2.0, def.road_thickness).to_path()?;
        let (sx, sy) = def.start;
        let transform =
            sk::Transform::from_rotate(self.starting_angle.to_degrees()).post_translate(sx, sy);
        pixmap.fill_path(&line, &paint, sk::FillRule::Winding, transform, None);
        Ok(pixmap)
    }
}

/// Loaded tracks keyed by name.
#[derive(Debug, Default, Clone)]
pub struct TrackRegistry {
    tracks: BTreeMap<String, Arc<Track>>,
}

impl TrackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in track.
    pub fn builtin() -> Result<Self, TrackError> {
        let mut registry = Self::new();
        for definition in builtin_definitions() {
            registry.insert(Track::from_definition(definition)?);
        }
        Ok(registry)
    }

    /// Insert a track, replacing any track with the same name.
    pub fn insert(&mut self, track: Track) -> Arc<Track> {
        let track = Arc::new(track);
        self.tracks
            .insert(track.name().to_string(), Arc::clone(&track));
        track
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Track>> {
        self.tracks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.tracks.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Track>> + '_ {
        self.tracks.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

const CANVAS_WIDTH: u32 = 1000;
const CANVAS_HEIGHT: u32 = 700;

/// Definitions for the tracks that ship with the simulator.
#[must_use]
pub fn builtin_definitions() -> Vec<TrackDefinition> {
    use PathSegment::{Close, CubicTo, LineTo, MoveTo, QuadTo};

    // Rounded rectangle, start on the top straight heading east.
    let basic = TrackDefinition {
        name: "basic".to_string(),
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        path: vec![
            MoveTo { x: 300.0, y: 100.0 },
            LineTo { x: 700.0, y: 100.0 },
            QuadTo { x1: 850.0, y1: 100.0, x: 850.0, y: 250.0 },
            LineTo { x: 850.0, y: 450.0 },
            QuadTo { x1: 850.0, y1: 600.0, x: 700.0, y: 600.0 },
            LineTo { x: 300.0, y: 600.0 },
            QuadTo { x1: 150.0, y1: 600.0, x: 150.0, y: 450.0 },
            LineTo { x: 150.0, y: 250.0 },
            QuadTo { x1: 150.0, y1: 100.0, x: 300.0, y: 100.0 },
            Close,
        ],
        road_thickness: 80.0,
        lane_marking_thickness: 4.0,
        start: (500.0, 100.0),
        start_direction: (1.0, 0.0),
    };

    // Ellipse centred on the canvas from four cubic arcs.
    let (cx, cy, rx, ry) = (500.0_f32, 350.0_f32, 380.0_f32, 240.0_f32);
    let k = 0.552_284_8_f32;
    let oval = TrackDefinition {
        name: "oval".to_string(),
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        path: vec![
            MoveTo { x: cx, y: cy - ry },
            CubicTo { x1: cx + k * rx, y1: cy - ry, x2: cx + rx, y2: cy - k * ry, x: cx + rx, y: cy },
            CubicTo { x1: cx + rx, y1: cy + k * ry, x2: cx + k * rx, y2: cy + ry, x: cx, y: cy + ry },
            CubicTo { x1: cx - k * rx, y1: cy + ry, x2: cx - rx, y2: cy + k * ry, x: cx - rx, y: cy },
            CubicTo { x1: cx - rx, y1: cy - k * ry, x2: cx - k * rx, y2: cy - ry, x: cx, y: cy - ry },
            Close,
        ],
        road_thickness: 90.0,
        lane_marking_thickness: 4.0,
        start: (cx, cy - ry),
        start_direction: (1.0, 0.0),
    };

    // Switchback with a tight inner hairpin.
    let hairpin = TrackDefinition {
        name: "hairpin".to_string(),
        width: CANVAS_WIDTH,
        height: CANVAS_HEIGHT,
        path: vec![
            MoveTo { x: 200.0, y: 120.0 },
            LineTo { x: 800.0, y: 120.0 },
            CubicTo { x1: 920.0, y1: 120.0, x2: 920.0, y2: 320.0, x: 800.0, y: 320.0 },
            LineTo { x: 500.0, y: 320.0 },
            CubicTo { x1: 400.0, y1: 320.0, x2: 400.0, y2: 460.0, x: 500.0, y: 460.0 },
            LineTo { x: 800.0, y: 460.0 },
            CubicTo { x1: 920.0, y1: 460.0, x2: 920.0, y2: 620.0, x: 800.0, y: 620.0 },
            LineTo { x: 200.0, y: 620.0 },
            CubicTo { x1: 80.0, y1: 620.0, x2: 80.0, y2: 120.0, x: 200.0, y: 120.0 },
            Close,
        ],
        road_thickness: 70.0,
        lane_marking_thickness: 4.0,
        start: (500.0, 120.0),
        start_direction: (1.0, 0.0),
    };

    vec![basic, oval, hairpin]
}
