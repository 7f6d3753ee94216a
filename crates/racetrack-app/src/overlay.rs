use anyhow::{Context, Result};
use racetrack_raster::{Tag, TagRaster};
use tiny_skia as sk;

/// Display colour for a mask pixel. Marks drawn on top of the region win.
#[must_use]
pub fn overlay_color(tag: Tag) -> [u8; 4] {
    if tag.is_vehicle() {
        [230, 60, 60, 255]
    } else if tag.contains(Tag::SENSOR) {
        [250, 220, 40, 255]
    } else if tag.is_lap_line() {
        [245, 245, 245, 255]
    } else if tag.contains(Tag::AVAILABLE) {
        [70, 70, 78, 255]
    } else {
        [40, 110, 50, 255]
    }
}

/// Paint a tag raster into an RGBA pixmap.
pub fn render_overlay(raster: &TagRaster) -> Result<sk::Pixmap> {
    let mut pixmap = sk::Pixmap::new(raster.width(), raster.height())
        .context("overlay raster has a zero-sized canvas")?;
    for (pixel, &bits) in pixmap.pixels_mut().iter_mut().zip(raster.as_bytes()) {
        let [r, g, b, a] = overlay_color(Tag::from_bits(bits));
        if let Some(color) = sk::PremultipliedColorU8::from_rgba(r, g, b, a) {
            *pixel = color;
        }
    }
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_and_sensor_marks_take_priority() {
        let tag = Tag::AVAILABLE.union(Tag::VEHICLE).union(Tag::SENSOR);
        assert_eq!(overlay_color(tag), [230, 60, 60, 255]);
        assert_eq!(
            overlay_color(Tag::AVAILABLE.union(Tag::SENSOR)),
            [250, 220, 40, 255]
        );
        assert_eq!(overlay_color(Tag::OFF_TRACK), [40, 110, 50, 255]);
    }

    #[test]
    fn raster_pixels_map_in_row_major_order() {
        let mut raster = TagRaster::filled(4, 3, Tag::OFF_TRACK).expect("raster");
        raster.set(2, 1, Tag::AVAILABLE);
        let pixmap = render_overlay(&raster).expect("overlay");
        assert_eq!((pixmap.width(), pixmap.height()), (4, 3));
        let road = pixmap.pixel(2, 1).expect("pixel");
        assert_eq!((road.red(), road.green(), road.blue()), (70, 70, 78));
        let grass = pixmap.pixel(0, 0).expect("pixel");
        assert_eq!((grass.red(), grass.green(), grass.blue()), (40, 110, 50));
    }
}
