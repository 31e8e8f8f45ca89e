use chrono::{DateTime, Local, TimeZone};
use image::{Rgba, RgbaImage};
use pagevault::pdf::{QualityTier, RawBitmap, RenderedPage};
use pagevault::{Compositor, ViewerIdentity, WatermarkSpec};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 1000;

fn now() -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
        .single()
        .unwrap()
}

fn white_page(page: u32) -> RenderedPage {
    RenderedPage::from_bitmap(
        page,
        QualityTier::Final,
        2.2,
        RawBitmap::solid(WIDTH, HEIGHT, [0xff, 0xff, 0xff]),
    )
}

fn identified(page: u32, total: u32) -> WatermarkSpec {
    WatermarkSpec::new("4Csecure", page, total).with_identity(&ViewerIdentity::new(
        Some("a@b.com".into()),
        Some("42".into()),
    ))
}

fn composite(spec: &WatermarkSpec) -> RgbaImage {
    Compositor::compose_at(&white_page(spec.page_number), spec, now())
        .unwrap()
        .image
}

fn any_in(
    image: &RgbaImage,
    xs: std::ops::Range<u32>,
    ys: std::ops::Range<u32>,
    pred: impl Fn(&Rgba<u8>) -> bool,
) -> bool {
    ys.clone()
        .any(|y| xs.clone().any(|x| pred(image.get_pixel(x, y))))
}

fn luminance(p: &Rgba<u8>) -> u32 {
    (u32::from(p[0]) + u32::from(p[1]) + u32::from(p[2])) / 3
}

/// Red at low opacity over white: full red channel, lifted green and blue
fn faint_red(p: &Rgba<u8>, min: u8, max: u8) -> bool {
    p[0] == 0xff && (min..=max).contains(&p[1]) && p[1] == p[2]
}

#[test]
fn brand_mark_is_outlined_in_the_bottom_right() {
    let image = composite(&identified(2, 3));

    // 8 glyphs of 24px inset 20px from the corner.
    assert!(any_in(&image, 588..780, 956..980, |p| luminance(p) < 150));
    assert!(any_in(&image, 588..780, 956..980, |p| luminance(p) > 180
        && luminance(p) < 0xff));
    assert!(!any_in(&image, 0..560, 940..950, |p| luminance(p) < 150));
}

#[test]
fn identity_header_is_faint_red() {
    let image = composite(&identified(2, 3));
    // Past the right edge of the page badge.
    assert!(any_in(&image, 215..340, 20..36, |p| faint_red(p, 200, 235)));
}

#[test]
fn three_diagonals_cross_the_middle_of_the_page() {
    let image = composite(&identified(2, 3));
    for centre_y in [500, 400, 600] {
        assert!(
            any_in(&image, 380..420, centre_y - 20..centre_y + 20, |p| faint_red(
                p, 225, 250
            )),
            "no diagonal around y={centre_y}"
        );
    }
}

#[test]
fn forensic_mark_is_nearly_invisible_with_hard_edges() {
    let image = composite(&identified(2, 3));

    let forensic: Vec<&Rgba<u8>> = (987..995)
        .flat_map(|y| (5..120).map(move |x| (x, y)))
        .map(|(x, y)| image.get_pixel(x, y))
        .filter(|p| luminance(p) < 0xff)
        .collect();

    assert!(!forensic.is_empty());
    // One alpha level, no anti-aliased fringe.
    assert!(forensic.iter().all(|p| (245..=254).contains(&p[0])));
    assert!(forensic.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn page_badge_is_dark_with_light_text() {
    let image = composite(&identified(2, 3));

    let bg = image.get_pixel(14, 14);
    assert!((68..=74).contains(&bg[0]), "badge background was {bg:?}");
    assert_eq!(bg[3], 0xff);
    assert!(any_in(&image, 24..200, 24..40, |p| luminance(p) > 200));
}

#[test]
fn single_page_documents_have_no_badge() {
    let image = composite(&WatermarkSpec::new("4Csecure", 1, 1));
    assert_eq!(image.get_pixel(14, 14), &Rgba([0xff, 0xff, 0xff, 0xff]));
    assert!(!any_in(&image, 0..WIDTH, 0..HEIGHT, |p| p[0] == 0xff && p[1] < 0xff));
}

#[test]
fn untouched_areas_keep_the_page_pixels() {
    let image = composite(&identified(2, 3));
    assert_eq!(image.get_pixel(100, 900), &Rgba([0xff, 0xff, 0xff, 0xff]));
    assert!(image.pixels().all(|p| p[3] == 0xff));
}

#[test]
fn viewed_stamp_is_top_right() {
    let image = composite(&WatermarkSpec::new("4Csecure", 1, 1));
    // 27 glyphs of 12px inset 10px.
    assert!(any_in(&image, 466..790, 10..22, |p| luminance(p) < 0xff));
    assert!(!any_in(&image, 0..460, 0..40, |p| luminance(p) < 0xff));
}
