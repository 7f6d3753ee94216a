use racetrack_raster::{PixelWindow, RasterError, Tag, TagRaster};

use crate::config::SensorConfig;

/// One distance ray fixed relative to the car heading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    angle: f32,
    range: f32,
    endpoint: (f32, f32),
}

impl Sensor {
    /// Build a sensor from an angle in radians and a range in pixels.
    #[must_use]
    pub fn new(angle: f32, range: f32) -> Self {
        Self {
            angle,
            range,
            endpoint: (angle.cos() * range, angle.sin() * range),
        }
    }

    #[must_use]
    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(config.angle_degrees.to_radians(), config.range)
    }

    #[must_use]
    pub const fn angle(&self) -> f32 {
        self.angle
    }

    #[must_use]
    pub const fn range(&self) -> f32 {
        self.range
    }

    /// Ray endpoint in the car's local frame.
    #[must_use]
    pub const fn endpoint(&self) -> (f32, f32) {
        self.endpoint
    }

    /// Normalized clear distance along the ray over a raw tag buffer.
    ///
    /// `center_x`/`center_y` are buffer-local coordinates. Cells outside the
    /// buffer count as off-track. Returns 1.0 when the whole range is clear and
    /// 0.0 when the origin itself is blocked.
    #[must_use]
    pub fn read(
        &self,
        buffer: &[u8],
        width: u32,
        height: u32,
        center_x: f32,
        center_y: f32,
        heading: f32,
    ) -> f32 {
        self.walk(center_x, center_y, heading, |x, y| {
            if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                return true;
            }
            let idx = y as usize * width as usize + x as usize;
            buffer
                .get(idx)
                .is_none_or(|&bits| Tag::from_bits(bits).is_off_track())
        })
    }

    /// Read against an extracted window using canvas coordinates.
    #[must_use]
    pub fn read_window(&self, window: &PixelWindow, car_x: f32, car_y: f32, heading: f32) -> f32 {
        let (local_x, local_y) = window.to_local(car_x, car_y);
        self.read(
            window.buffer(),
            window.width(),
            window.height(),
            local_x,
            local_y,
            heading,
        )
    }

    /// Read directly on `raster`, marking every clear cell visited with [`Tag::SENSOR`].
    pub fn trace(&self, raster: &mut TagRaster, car_x: f32, car_y: f32, heading: f32) -> f32 {
        self.walk(car_x, car_y, heading, |x, y| {
            let blocked = raster.tag_at(x, y).is_off_track();
            if !blocked {
                raster.mark(x, y, Tag::SENSOR);
            }
            blocked
        })
    }

    fn walk(
        &self,
        origin_x: f32,
        origin_y: f32,
        heading: f32,
        mut blocked: impl FnMut(i64, i64) -> bool,
    ) -> f32 {
        if !(self.range.is_finite() && self.range > 0.0) {
            return 0.0;
        }
        let direction = self.angle + heading;
        let (dx, dy) = (direction.cos(), direction.sin());
        let whole = self.range.floor();
        // Unit steps, plus the exact endpoint when the range is fractional.
        let distances = (0..=whole as u32)
            .map(|step| step as f32)
            .chain((self.range > whole).then_some(self.range));
        let mut last_clear = 0.0_f32;
        for distance in distances {
            let x = (origin_x + dx * distance).floor() as i64;
            let y = (origin_y + dy * distance).floor() as i64;
            if blocked(x, y) {
                return (last_clear / self.range).clamp(0.0, 1.0);
            }
            last_clear = distance;
        }
        1.0
    }
}

/// Half-extent of the square window needed to serve every sensor.
#[must_use]
pub fn window_reach(sensors: &[Sensor]) -> u32 {
    let longest = sensors
        .iter()
        .map(Sensor::range)
        .filter(|range| range.is_finite())
        .fold(0.0_f32, f32::max);
    longest.ceil() as u32 + 1
}

/// Extract a window of `reach` pixels around `(x, y)` from `mask` into `window`.
pub fn extract_window(
    mask: &TagRaster,
    x: f32,
    y: f32,
    reach: u32,
    window: &mut PixelWindow,
) -> Result<(), RasterError> {
    let side = reach * 2 + 1;
    let left = x.floor() as i64 - i64::from(reach);
    let top = y.floor() as i64 - i64::from(reach);
    mask.get_pixels_into(left, top, side, side, window)
}

/// Read every sensor against an already extracted window.
#[must_use]
pub fn read_window_all(
    sensors: &[Sensor],
    window: &PixelWindow,
    car_x: f32,
    car_y: f32,
    heading: f32,
) -> Vec<f32> {
    sensors
        .iter()
        .map(|sensor| sensor.read_window(window, car_x, car_y, heading))
        .collect()
}

/// Read every sensor from one shared window extracted around the car.
pub fn read_all(
    sensors: &[Sensor],
    mask: &TagRaster,
    car_x: f32,
    car_y: f32,
    heading: f32,
) -> Result<Vec<f32>, RasterError> {
    let mut window = PixelWindow::default();
    extract_window(mask, car_x, car_y, window_reach(sensors), &mut window)?;
    Ok(read_window_all(sensors, &window, car_x, car_y, heading))
}
