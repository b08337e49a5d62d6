//! Person regions, cropping, and drawing of review annotations.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::alarms::BoundingBox;

pub const REGION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const STORED_LABEL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const FONT_PX: f32 = 20.0;
const LINE_WIDTH: i32 = 2;
const LABEL_GAP: i32 = 15;

/// Person box in integer pixels; edges may lie outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonRegion {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// Non-empty crop inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PersonRegion {
    /// `xmin`/`xmax` are the left/right columns, `ymin`/`ymax` the top/bottom rows.
    pub fn from_box(b: &BoundingBox) -> Self {
        Self {
            left: b.xmin as i64,
            top: b.ymin as i64,
            right: b.xmax as i64,
            bottom: b.ymax as i64,
        }
    }

    /// Part of the region inside a `width x height` image, `None` when empty.
    pub fn clamp(&self, width: u32, height: u32) -> Option<CropRect> {
        let left = self.left.clamp(0, width as i64);
        let right = self.right.clamp(0, width as i64);
        let top = self.top.clamp(0, height as i64);
        let bottom = self.bottom.clamp(0, height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(CropRect {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

pub fn crop(img: &RgbImage, rect: CropRect) -> RgbImage {
    image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Baseline for a name drawn above a box whose top edge is at `top`.
pub fn name_baseline(top: i32) -> i32 {
    let above = top.saturating_sub(LABEL_GAP);
    if above > LABEL_GAP {
        above
    } else {
        top.saturating_add(LABEL_GAP)
    }
}

/// Baseline for the stored label drawn below a box whose bottom edge is at `bottom`.
pub fn stored_label_baseline(bottom: i32) -> i32 {
    let below = bottom.saturating_add(LABEL_GAP);
    if below > LABEL_GAP {
        below
    } else {
        bottom.saturating_sub(LABEL_GAP)
    }
}

/// `v` limited to one image extent beyond either side of `[0, extent]`.
fn near_image(v: i64, extent: u32) -> i32 {
    let extent = i64::from(extent);
    v.clamp(-extent, 2 * extent) as i32
}

fn draw_box(img: &mut RgbImage, left: i64, top: i64, right: i64, bottom: i64, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    let (left, right) = (near_image(left, width), near_image(right, width));
    let (top, bottom) = (near_image(top, height), near_image(bottom, height));
    for inset in 0..LINE_WIDTH {
        let w = right - left - 2 * inset;
        let h = bottom - top - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Draws boxes and labels onto review frames.
pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Annotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            scale: PxScale::from(FONT_PX),
        }
    }

    /// Load the label font; boxes are still drawn when it is unavailable.
    pub fn load(font_path: &Path) -> Self {
        let font = std::fs::read(font_path)
            .map_err(|e| e.to_string())
            .and_then(|data| FontArc::try_from_vec(data).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self::new(Some(font)),
            Err(e) => {
                log::warn!(
                    "font {} unavailable ({e}), labels will not be drawn",
                    font_path.display()
                );
                Self::new(None)
            }
        }
    }

    /// Text with its baseline at `baseline`.
    fn put_text(&self, img: &mut RgbImage, text: &str, x: i32, baseline: i32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            let (width, height) = img.dimensions();
            let x = near_image(x.into(), width);
            let top = near_image(i64::from(baseline) - self.scale.y as i64, height);
            draw_text_mut(img, color, x, top, self.scale, font, text);
        }
    }

    /// Outline a person region and tag it with its class label.
    pub fn draw_region(&self, img: &mut RgbImage, region: &PersonRegion, label: &str) {
        draw_box(
            img,
            region.left,
            region.top,
            region.right,
            region.bottom,
            REGION_COLOR,
        );
        let (width, height) = img.dimensions();
        let (x, top) = (near_image(region.left, width), near_image(region.top, height));
        self.put_text(img, label, x, top - LABEL_GAP, MATCH_COLOR);
    }

    /// Box and name of a recognized face, in parent image pixels.
    ///
    /// `stored` is the label recorded with the alarm; it is drawn below the box
    /// when it differs from `name`.
    pub fn draw_face(
        &self,
        img: &mut RgbImage,
        bounds: (i32, i32, i32, i32),
        name: &str,
        stored: Option<&str>,
    ) {
        let (left, top, right, bottom) = bounds;
        draw_box(
            img,
            left.into(),
            top.into(),
            right.into(),
            bottom.into(),
            MATCH_COLOR,
        );
        self.put_text(img, name, left, name_baseline(top), MATCH_COLOR);
        if let Some(stored) = stored.filter(|s| *s != name) {
            self.put_text(
                img,
                stored,
                left,
                stored_label_baseline(bottom),
                STORED_LABEL_COLOR,
            );
        }
    }
}
