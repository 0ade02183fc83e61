//! Pure geometry for a single transformation.
//!
//! All functions here are pure and testable without any I/O or images. The
//! engine asks [`plan`] which region of the source to keep and what size to
//! resample it to, then does exactly that.
//!
//! | Spec | Result |
//! |---|---|
//! | no ratio | whole source, width as requested, height proportional |
//! | ratio, `Crop::None`, contain | whole source, fitted inside the box |
//! | ratio, `Crop::None`, no contain | whole source, scaled to cover the box |
//! | ratio, anchor | cover crop positioned on the anchor, exact box |
//! | ratio, anchor, focal window ≥ box | cover crop inside the window |
//! | ratio, anchor, focal window < box | cover crop centered on the window |

use crate::variant::{Crop, Dimensions, FocalWindow, VariantSpec};

/// Pixel rectangle within the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(source: Dimensions) -> Self {
        Self {
            x: 0,
            y: 0,
            width: source.width,
            height: source.height,
        }
    }
}

/// What to cut from the source and how large the output is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub region: Rect,
    pub output: Dimensions,
}

impl Plan {
    pub fn crops(&self, source: Dimensions) -> bool {
        self.region != Rect::full(source)
    }
}

/// Decide the crop region and output size for `spec` applied to `source`.
pub fn plan(source: Dimensions, spec: &VariantSpec) -> Plan {
    let full = Rect::full(source);
    let Some(ratio) = spec.ratio else {
        return Plan {
            region: full,
            output: Dimensions {
                width: spec.width,
                height: scale_round(spec.width, source.height, source.width),
            },
        };
    };
    let target = Dimensions {
        width: spec.width,
        height: ratio.height_for(spec.width),
    };

    let anchor = match spec.crop {
        Crop::None => {
            let output = if spec.contain {
                calculate_fit_dimensions(source, target)
            } else {
                calculate_fill_dimensions(source, target)
            };
            return Plan {
                region: full,
                output,
            };
        }
        Crop::Anchor { x, y } => (x, y),
    };

    let (area, anchor) = match spec.focal_window {
        Some(window) => {
            let window_rect = window_pixels(source, &window);
            if window_rect.width >= target.width && window_rect.height >= target.height {
                (window_rect, anchor)
            } else {
                (full, window.center())
            }
        }
        None => (full, anchor),
    };

    Plan {
        region: cover_region(area, target, anchor),
        output: target,
    }
}

/// Dimensions that fit entirely inside `target` while keeping the source aspect.
pub fn calculate_fit_dimensions(source: Dimensions, target: Dimensions) -> Dimensions {
    let scale = f64::min(
        target.width as f64 / source.width as f64,
        target.height as f64 / source.height as f64,
    );
    scaled(source, scale)
}

/// Dimensions that completely cover `target` while keeping the source aspect.
/// One side matches exactly, the other may exceed.
pub fn calculate_fill_dimensions(source: Dimensions, target: Dimensions) -> Dimensions {
    let scale = f64::max(
        target.width as f64 / source.width as f64,
        target.height as f64 / source.height as f64,
    );
    scaled(source, scale)
}

/// Largest region of `area` with the target's aspect, centered on `anchor`
/// (percent of `area`) and shifted back inside `area` when it would overflow.
pub fn cover_region(area: Rect, target: Dimensions, anchor: (f64, f64)) -> Rect {
    let area_aspect = area.width as f64 / area.height as f64;
    let target_aspect = target.width as f64 / target.height as f64;

    let (width, height) = if area_aspect > target_aspect {
        // Area is wider: keep full height
        let w = (area.height as f64 * target_aspect).round() as u32;
        (w.clamp(1, area.width), area.height)
    } else {
        let h = (area.width as f64 / target_aspect).round() as u32;
        (area.width, h.clamp(1, area.height))
    };

    let center_x = area.x as f64 + anchor.0 / 100.0 * area.width as f64;
    let center_y = area.y as f64 + anchor.1 / 100.0 * area.height as f64;
    let x = place(center_x, width, area.x, area.width);
    let y = place(center_y, height, area.y, area.height);

    Rect {
        x,
        y,
        width,
        height,
    }
}

fn place(center: f64, len: u32, start: u32, span: u32) -> u32 {
    let max = (start + span - len) as f64;
    (center - len as f64 / 2.0).round().clamp(start as f64, max) as u32
}

fn window_pixels(source: Dimensions, window: &FocalWindow) -> Rect {
    let px = |pct: f64, len: u32| (pct / 100.0 * len as f64).round() as u32;
    let left = px(window.left, source.width).min(source.width - 1);
    let top = px(window.top, source.height).min(source.height - 1);
    let right = px(window.right, source.width).clamp(left + 1, source.width);
    let bottom = px(window.bottom, source.height).clamp(top + 1, source.height);
    Rect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    }
}

fn scaled(source: Dimensions, scale: f64) -> Dimensions {
    Dimensions {
        width: ((source.width as f64 * scale).round() as u32).max(1),
        height: ((source.height as f64 * scale).round() as u32).max(1),
    }
}

fn scale_round(value: u32, num: u32, den: u32) -> u32 {
    ((value as f64 * num as f64 / den as f64).round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::sample_spec;
    use crate::variant::Ratio;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    fn square(width: u32, crop: Crop) -> VariantSpec {
        VariantSpec {
            ratio: Ratio::new(1.0),
            crop,
            ..sample_spec(width)
        }
    }

    // =========================================================================
    // fill / fit
    // =========================================================================

    #[test]
    fn fill_wider_source_to_portrait_target() {
        // 800x600 (4:3) → 400x500: height matches, width = 500 * 4/3 = 667
        assert_eq!(
            calculate_fill_dimensions(dims(800, 600), dims(400, 500)),
            dims(667, 500)
        );
    }

    #[test]
    fn fill_taller_source_to_landscape_target() {
        assert_eq!(
            calculate_fill_dimensions(dims(600, 800), dims(500, 400)),
            dims(500, 667)
        );
    }

    #[test]
    fn fit_keeps_inside_box() {
        assert_eq!(
            calculate_fit_dimensions(dims(800, 600), dims(400, 400)),
            dims(400, 300)
        );
        assert_eq!(
            calculate_fit_dimensions(dims(600, 800), dims(400, 400)),
            dims(300, 400)
        );
    }

    // =========================================================================
    // plan
    // =========================================================================

    #[test]
    fn plan_without_ratio_keeps_aspect() {
        let spec = VariantSpec {
            ratio: None,
            ..sample_spec(400)
        };
        let p = plan(dims(800, 600), &spec);
        assert_eq!(p.output, dims(400, 300));
        assert!(!p.crops(dims(800, 600)));
    }

    #[test]
    fn plan_center_crop_landscape_to_square() {
        let p = plan(dims(800, 600), &square(400, Crop::center()));
        assert_eq!(
            p.region,
            Rect {
                x: 100,
                y: 0,
                width: 600,
                height: 600
            }
        );
        assert_eq!(p.output, dims(400, 400));
    }

    #[test]
    fn plan_anchor_corners_clamp_inside_source() {
        let top_left = plan(dims(800, 600), &square(400, Crop::Anchor { x: 0.0, y: 0.0 }));
        assert_eq!(top_left.region.x, 0);
        let bottom_right = plan(
            dims(800, 600),
            &square(400, Crop::Anchor { x: 100.0, y: 100.0 }),
        );
        assert_eq!(bottom_right.region.x, 200);
        assert_eq!(bottom_right.region.y, 0);
    }

    #[test]
    fn plan_center_crop_portrait_to_video() {
        // 600x800 → 16:9: keep full width, height = 600 / (16/9) = 337.5 → 338
        let p = plan(dims(600, 800), &sample_spec(320));
        assert_eq!(
            p.region,
            Rect {
                x: 0,
                y: 231,
                width: 600,
                height: 338
            }
        );
        assert_eq!(p.output, dims(320, 180));
    }

    #[test]
    fn plan_no_crop_contain_fits() {
        let spec = VariantSpec {
            contain: true,
            ..square(400, Crop::None)
        };
        let p = plan(dims(800, 600), &spec);
        assert_eq!(p.output, dims(400, 300));
        assert!(!p.crops(dims(800, 600)));
    }

    #[test]
    fn plan_no_crop_without_contain_covers() {
        let spec = VariantSpec {
            contain: false,
            ..square(400, Crop::None)
        };
        let p = plan(dims(800, 600), &spec);
        assert_eq!(p.output, dims(533, 400));
    }

    #[test]
    fn plan_crops_into_large_focal_window() {
        // Window (20,0)-(80,50) of 1000x1000 is 600x500, larger than 300x300
        let spec = VariantSpec {
            focal_window: FocalWindow::new(20.0, 0.0, 80.0, 50.0),
            ..square(300, Crop::center())
        };
        let p = plan(dims(1000, 1000), &spec);
        assert_eq!(
            p.region,
            Rect {
                x: 250,
                y: 0,
                width: 500,
                height: 500
            }
        );
    }

    #[test]
    fn plan_centers_on_small_focal_window() {
        // Window (80,0)-(100,20) of 2000x1000 is 400x200, smaller than 400x400
        let spec = VariantSpec {
            focal_window: FocalWindow::new(80.0, 0.0, 100.0, 20.0),
            ..square(400, Crop::center())
        };
        let p = plan(dims(2000, 1000), &spec);
        assert_eq!(
            p.region,
            Rect {
                x: 1000,
                y: 0,
                width: 1000,
                height: 1000
            }
        );
    }
}
