//! Watermark layout and rasterization

use chrono::{DateTime, Local};
use image::{RgbImage, RgbaImage};
use resvg::tiny_skia::{
    FillRule, Paint, Path, PathBuilder, Pixmap, Rect, Stroke, Transform,
};

use super::glyphs;
use super::{CompositeError, WatermarkSpec, WatermarkedPage};
use crate::pdf::{PageImage, RenderedPage};

const BRAND_SIZE: f32 = 24.0;
const BRAND_INSET: f32 = 20.0;
const BRAND_OUTLINE_WIDTH: f32 = 2.0;

const HEADER_SIZE: f32 = 16.0;
const HEADER_ORIGIN: f32 = 20.0;

const DIAGONAL_SIZE: f32 = 14.0;
/// Vertical offset from page centre and rotation in degrees
const DIAGONALS: [(f32, f32); 3] = [(0.0, -30.0), (-100.0, 30.0), (100.0, -45.0)];

const FORENSIC_SIZE: f32 = 8.0;
const FORENSIC_INSET: f32 = 5.0;

const VIEWED_SIZE: f32 = 12.0;
const VIEWED_INSET: f32 = 10.0;

const BADGE_SIZE: f32 = 16.0;
const BADGE_PADDING: f32 = 12.0;
const BADGE_HEIGHT: f32 = 32.0;

const WHITE: [u8; 3] = [0xff, 0xff, 0xff];
const BLACK: [u8; 3] = [0x00, 0x00, 0x00];
const RED: [u8; 3] = [0xff, 0x00, 0x00];
const GRAY: [u8; 3] = [0x66, 0x66, 0x66];
const FORENSIC: [u8; 3] = [0x00, 0x00, 0x01];

/// Watermark layers, in draw order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    BrandMark,
    IdentityHeader,
    DiagonalIdentity,
    Forensic,
    ViewedAt,
    BadgeBackground,
    BadgeText,
}

/// Colour and opacity of a mark
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ink {
    pub rgb: [u8; 3],
    pub opacity: f32,
}

impl Ink {
    #[must_use]
    pub const fn new(rgb: [u8; 3], opacity: f32) -> Self {
        Self { rgb, opacity }
    }

    /// 8-bit alpha; any visible layer keeps at least one step
    #[must_use]
    pub fn alpha(self) -> u8 {
        ((self.opacity.clamp(0.0, 1.0) * 255.0).round() as u8).max(1)
    }

    fn paint(self, anti_alias: bool) -> Paint<'static> {
        let mut paint = Paint::default();
        let [r, g, b] = self.rgb;
        paint.set_color_rgba8(r, g, b, self.alpha());
        paint.anti_alias = anti_alias;
        paint
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Text whose box has its top-left corner at `(x, y)`, rotated by
    /// `rotation` degrees around the box centre
    Text {
        text: String,
        size: f32,
        x: f32,
        y: f32,
        rotation: f32,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

/// One planned watermark element
#[derive(Clone, Debug, PartialEq)]
pub struct Mark {
    pub layer: Layer,
    pub shape: Shape,
    pub fill: Ink,
    /// Outline drawn beneath the fill, with its stroke width
    pub outline: Option<(Ink, f32)>,
    pub anti_alias: bool,
}

impl Mark {
    fn text(layer: Layer, text: String, size: f32, (x, y): (f32, f32), fill: Ink) -> Self {
        Self {
            layer,
            shape: Shape::Text {
                text,
                size,
                x,
                y,
                rotation: 0.0,
            },
            fill,
            outline: None,
            anti_alias: true,
        }
    }
}

pub struct Compositor;

impl Compositor {
    /// Lay out every watermark layer for a `width` x `height` page
    #[must_use]
    pub fn plan(spec: &WatermarkSpec, width: u32, height: u32, now: DateTime<Local>) -> Vec<Mark> {
        let (w, h) = (width as f32, height as f32);
        let mut marks = Vec::new();

        let (tw, th) = glyphs::measure(&spec.base_label, BRAND_SIZE);
        let mut brand = Mark::text(
            Layer::BrandMark,
            spec.base_label.clone(),
            BRAND_SIZE,
            (w - BRAND_INSET - tw, h - BRAND_INSET - th),
            Ink::new(WHITE, 0.7),
        );
        brand.outline = Some((Ink::new(BLACK, 0.7), BRAND_OUTLINE_WIDTH));
        marks.push(brand);

        if let Some(identity) = &spec.identity_label {
            marks.push(Mark::text(
                Layer::IdentityHeader,
                format!("{identity} \u{2022} {}", now.format("%Y-%m-%d")),
                HEADER_SIZE,
                (HEADER_ORIGIN, HEADER_ORIGIN),
                Ink::new(RED, 0.15),
            ));

            let text = format!("{} \u{2022} {identity}", spec.base_label);
            let (tw, th) = glyphs::measure(&text, DIAGONAL_SIZE);
            for (offset, rotation) in DIAGONALS {
                let (cx, cy) = (w / 2.0, h / 2.0 + offset);
                marks.push(Mark {
                    layer: Layer::DiagonalIdentity,
                    shape: Shape::Text {
                        text: text.clone(),
                        size: DIAGONAL_SIZE,
                        x: cx - tw / 2.0,
                        y: cy - th / 2.0,
                        rotation,
                    },
                    fill: Ink::new(RED, 0.08),
                    outline: None,
                    anti_alias: true,
                });
            }
        }

        if let Some(id) = &spec.identity_id {
            let mut forensic = Mark::text(
                Layer::Forensic,
                format!("ID:{id}:{}", now.timestamp_millis()),
                FORENSIC_SIZE,
                (FORENSIC_INSET, h - FORENSIC_INSET - FORENSIC_SIZE),
                Ink::new(FORENSIC, 0.01),
            );
            // Hard edges keep the mark recoverable with a levels adjustment.
            forensic.anti_alias = false;
            marks.push(forensic);
        }

        let viewed = format!("Viewed: {}", now.format("%Y-%m-%d %H:%M:%S"));
        let (tw, _) = glyphs::measure(&viewed, VIEWED_SIZE);
        marks.push(Mark::text(
            Layer::ViewedAt,
            viewed,
            VIEWED_SIZE,
            (w - VIEWED_INSET - tw, VIEWED_INSET),
            Ink::new(GRAY, 0.3),
        ));

        if spec.total_pages > 1 {
            let badge = format!("Page {} of {}", spec.page_number, spec.total_pages);
            let (tw, _) = glyphs::measure(&badge, BADGE_SIZE);
            marks.push(Mark {
                layer: Layer::BadgeBackground,
                shape: Shape::Rect {
                    x: BADGE_PADDING,
                    y: BADGE_PADDING,
                    width: tw + BADGE_PADDING * 2.0,
                    height: BADGE_HEIGHT,
                },
                // 0.8 black under a 0.9 layer opacity
                fill: Ink::new(BLACK, 0.72),
                outline: None,
                anti_alias: true,
            });
            marks.push(Mark::text(
                Layer::BadgeText,
                badge,
                BADGE_SIZE,
                (BADGE_PADDING * 2.0, BADGE_PADDING * 2.0),
                Ink::new(WHITE, 0.9),
            ));
        }

        marks
    }

    /// Composite with the local clock
    pub fn compose(
        page: &RenderedPage,
        spec: &WatermarkSpec,
    ) -> Result<WatermarkedPage, CompositeError> {
        Self::compose_at(page, spec, Local::now())
    }

    /// Decode `page` and burn in every planned mark.
    ///
    /// Either all layers are applied or an error is returned; there is no
    /// partially watermarked output.
    pub fn compose_at(
        page: &RenderedPage,
        spec: &WatermarkSpec,
        now: DateTime<Local>,
    ) -> Result<WatermarkedPage, CompositeError> {
        let base = decode(page)?;
        let (width, height) = base.dimensions();

        let mut pixmap = Pixmap::new(width, height).ok_or(CompositeError::Surface { width, height })?;
        for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(base.pixels()) {
            dst[..3].copy_from_slice(&src.0);
            dst[3] = 0xff;
        }

        for mark in Self::plan(spec, width, height, now) {
            draw(&mut pixmap, &mark);
        }

        let mut out = Vec::with_capacity(width as usize * height as usize * 4);
        for px in pixmap.pixels() {
            let c = px.demultiply();
            out.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
        }
        let image =
            RgbaImage::from_raw(width, height, out).ok_or(CompositeError::Surface { width, height })?;

        Ok(WatermarkedPage {
            page_number: page.page_number,
            tier: page.tier,
            image,
        })
    }
}

fn decode(page: &RenderedPage) -> Result<RgbImage, CompositeError> {
    let fail = |detail: String| CompositeError::DecodeFailure {
        page: page.page_number,
        detail,
    };

    let image = match &page.image {
        PageImage::Raw(bitmap) => {
            if bitmap.width != page.width || bitmap.height != page.height {
                return Err(fail(format!(
                    "bitmap is {}x{}, page claims {}x{}",
                    bitmap.width, bitmap.height, page.width, page.height
                )));
            }
            RgbImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone())
                .ok_or_else(|| fail(format!("{} bytes do not match the bitmap size", bitmap.pixels.len())))?
        }
        PageImage::Encoded(bytes) => image::load_from_memory(bytes)
            .map_err(|e| fail(e.to_string()))?
            .to_rgb8(),
    };

    if image.width() == 0 || image.height() == 0 {
        return Err(fail("empty image".to_string()));
    }
    Ok(image)
}

fn text_path(text: &str, size: f32, x: f32, y: f32) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for run in glyphs::layout(text, size) {
        if let Some(rect) = Rect::from_xywh(x + run.x, y + run.y, run.width, run.height) {
            pb.push_rect(rect);
        }
    }
    pb.finish()
}

fn draw(pixmap: &mut Pixmap, mark: &Mark) {
    let (path, transform) = match &mark.shape {
        Shape::Text {
            text,
            size,
            x,
            y,
            rotation,
        } => {
            let transform = if *rotation == 0.0 {
                Transform::identity()
            } else {
                let (tw, th) = glyphs::measure(text, *size);
                Transform::from_rotate_at(*rotation, x + tw / 2.0, y + th / 2.0)
            };
            (text_path(text, *size, *x, *y), transform)
        }
        Shape::Rect {
            x,
            y,
            width,
            height,
        } => (
            Rect::from_xywh(*x, *y, *width, *height).map(PathBuilder::from_rect),
            Transform::identity(),
        ),
    };

    // Blank text (all spaces) has no path.
    let Some(path) = path else {
        return;
    };

    if let Some((ink, width)) = mark.outline {
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        pixmap.stroke_path(&path, &ink.paint(mark.anti_alias), &stroke, transform, None);
    }
    pixmap.fill_path(
        &path,
        &mark.fill.paint(mark.anti_alias),
        FillRule::Winding,
        transform,
        None,
    );
}
