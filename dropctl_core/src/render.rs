//! Annotated display frames.
//!
//! Pure functions over already-computed cycle data; nothing here feeds back
//! into segmentation or control.

use crate::channel::Channel;
use crate::config::{DrawFlags, Segment};
use crate::tracker::Marker;
use crate::types::BoxRect;
use crate::vision::Droplet;
use crate::vision::masks::draw_thick_segment;
use image::buffer::ConvertBuffer;
use image::imageops::{FilterType, resize};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

pub const CHANNEL_TINT: Rgb<u8> = Rgb([40, 90, 220]);
pub const DROPLET_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
pub const MARKER_COLOR: Rgb<u8> = Rgb([230, 230, 0]);
pub const MARKER_BOX: Rgb<u8> = Rgb([0, 220, 220]);
pub const MEASURING_BOX: Rgb<u8> = Rgb([255, 140, 0]);
pub const KINK_COLOR: Rgb<u8> = Rgb([230, 0, 0]);
pub const NECK_COLOR: Rgb<u8> = Rgb([230, 0, 230]);
pub const CUT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const KINK_RADIUS: i32 = 3;

/// Everything one annotated frame shows.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub raw: &'a GrayImage,
    pub channels: &'a [Channel],
    pub droplets: &'a [Droplet],
    pub markers: &'a [Marker],
    pub draw: DrawFlags,
    pub scale: f64,
}

pub fn gray_to_rgb(img: &GrayImage) -> RgbImage {
    img.convert()
}

/// Nearest-neighbour resize by the display scale.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn upscale(img: RgbImage, scale: f64) -> RgbImage {
    if !(scale.is_finite() && scale > 0.0) || (scale - 1.0).abs() < f64::EPSILON {
        return img;
    }
    let w = (f64::from(img.width()) * scale).round().max(1.0) as u32;
    let h = (f64::from(img.height()) * scale).round().max(1.0) as u32;
    resize(&img, w, h, FilterType::Nearest)
}

/// A mask with cut lines overlaid, for the mask-making and channel-cutting
/// modes.
pub fn render_mask(mask: &GrayImage, cuts: &[Segment], cut_thickness: u32, scale: f64) -> RgbImage {
    let mut cut_layer = GrayImage::new(mask.width(), mask.height());
    for cut in cuts {
        draw_thick_segment(&mut cut_layer, cut, cut_thickness, 255);
    }
    let mut out = gray_to_rgb(mask);
    for (x, y, p) in cut_layer.enumerate_pixels() {
        if p[0] != 0 {
            out.put_pixel(x, y, CUT_COLOR);
        }
    }
    upscale(out, scale)
}

#[allow(clippy::cast_precision_loss)]
fn draw_contour(img: &mut RgbImage, contour: &[Point<i32>], color: Rgb<u8>) {
    let Some(&first) = contour.first() else {
        return;
    };
    if contour.len() == 1 {
        let p = (first.x as f32, first.y as f32);
        draw_line_segment_mut(img, p, p, color);
        return;
    }
    for (a, b) in contour.iter().zip(contour.iter().cycle().skip(1)) {
        draw_line_segment_mut(img, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
    }
}

fn draw_box(img: &mut RgbImage, r: BoxRect, color: Rgb<u8>) {
    if r.width > 0 && r.height > 0 {
        draw_hollow_rect_mut(img, Rect::at(r.x, r.y).of_size(r.width, r.height), color);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn tint(base: Rgb<u8>, over: Rgb<u8>) -> Rgb<u8> {
    let mix = |a: u8, b: u8| ((u16::from(a) + u16::from(b)) / 2) as u8;
    Rgb([mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2])])
}

/// Annotated colour frame at display scale.
#[allow(clippy::cast_possible_truncation)]
pub fn render_scene(scene: &Scene<'_>) -> RgbImage {
    let mut img = gray_to_rgb(scene.raw);
    let (w, h) = img.dimensions();

    if scene.draw.channels {
        for ch in scene.channels {
            for (x, y, p) in ch.mask.enumerate_pixels() {
                if p[0] != 0 && x < w && y < h {
                    let base = *img.get_pixel(x, y);
                    img.put_pixel(x, y, tint(base, CHANNEL_TINT));
                }
            }
        }
    }
    if scene.draw.droplets {
        for d in scene.droplets {
            draw_contour(&mut img, &d.blob.contour, DROPLET_COLOR);
        }
    }
    if scene.draw.necks {
        for d in scene.droplets {
            let Some(k) = d.kink_point() else {
                continue;
            };
            draw_hollow_circle_mut(&mut img, (k.x as i32, k.y as i32), KINK_RADIUS, KINK_COLOR);
            if let Some(n) = d.neck_point() {
                draw_line_segment_mut(&mut img, (k.x as f32, k.y as f32), (n.x as f32, n.y as f32), NECK_COLOR);
            }
        }
    }
    if scene.draw.markers {
        for m in scene.markers {
            draw_contour(&mut img, &m.contour, MARKER_COLOR);
            draw_box(&mut img, m.rect, MARKER_BOX);
        }
        for mi in scene.channels.iter().filter_map(Channel::measuring_marker) {
            if let Some(m) = scene.markers.get(mi) {
                draw_box(&mut img, m.rect, MEASURING_BOX);
            }
        }
    }
    upscale(img, scene.scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Follow, separate};
    use crate::types::Point2;
    use image::Luma;

    fn marker(x: f64, y: f64) -> Marker {
        let c = Point2::new(x, y);
        Marker {
            centroid: c,
            rect: BoxRect::centered(c, 6),
            identity: 0,
            contour: vec![Point::new(x as i32, y as i32)],
        }
    }

    #[test]
    fn gray_levels_become_neutral_colours() {
        let img = GrayImage::from_fn(4, 2, |x, y| Luma([u8::try_from(x * 60 + y).expect("small")]));
        let rgb = gray_to_rgb(&img);
        assert_eq!(rgb.dimensions(), (4, 2));
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(3, 1), Rgb([181, 181, 181]));
    }

    #[test]
    fn upscale_multiplies_dimensions() {
        let img = RgbImage::new(10, 4);
        assert_eq!(upscale(img.clone(), 2.0).dimensions(), (20, 8));
        assert_eq!(upscale(img.clone(), 1.0).dimensions(), (10, 4));
        assert_eq!(upscale(img, -1.0).dimensions(), (10, 4));
    }

    #[test]
    fn cut_lines_are_drawn_over_mask() {
        let mask = GrayImage::from_pixel(20, 20, Luma([255]));
        let cut = Segment::new(Point2::new(10.0, 0.0), Point2::new(10.0, 19.0));
        let out = render_mask(&mask, &[cut], 3, 1.0);
        assert_eq!(*out.get_pixel(10, 10), CUT_COLOR);
        assert_eq!(*out.get_pixel(2, 2), Rgb([255, 255, 255]));
    }

    #[test]
    fn measuring_marker_box_is_highlighted() {
        let raw = GrayImage::from_pixel(40, 20, Luma([0]));
        let band = GrayImage::from_fn(40, 20, |_, y| Luma([if (5..15).contains(&y) { 255 } else { 0 }]));
        let mut channels = separate(&band, 1);
        let markers = vec![marker(10.0, 10.0), marker(30.0, 10.0)];
        channels[0].follow = Follow::Marker(1);
        let img = render_scene(&Scene {
            raw: &raw,
            channels: &channels,
            droplets: &[],
            markers: &markers,
            draw: DrawFlags::default(),
            scale: 1.0,
        });
        assert_eq!(*img.get_pixel(7, 7), MARKER_BOX);
        assert_eq!(*img.get_pixel(27, 7), MEASURING_BOX);
        assert_eq!(*img.get_pixel(20, 10), tint(Rgb([0, 0, 0]), CHANNEL_TINT));
        assert_eq!(*img.get_pixel(20, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn disabled_layers_leave_frame_untouched() {
        let raw = GrayImage::from_pixel(8, 8, Luma([9]));
        let markers = vec![marker(4.0, 4.0)];
        let draw = DrawFlags {
            channels: false,
            droplets: false,
            markers: false,
            necks: false,
        };
        let img = render_scene(&Scene {
            raw: &raw,
            channels: &[],
            droplets: &[],
            markers: &markers,
            draw,
            scale: 2.0,
        });
        assert_eq!(img.dimensions(), (16, 16));
        assert!(img.pixels().all(|p| *p == Rgb([9, 9, 9])));
    }
}
