//! Overlay drawing for annotated output frames

use image::{Rgb, RgbImage};
use visionsafe_core::{BoundingBox, PersonAssessment, WorkerState, WorkerStatus};

pub const SAFE_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
pub const UNSAFE_COLOR: Rgb<u8> = Rgb([255, 140, 0]);
pub const FIRED_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
pub const UNTRACKED_COLOR: Rgb<u8> = Rgb([128, 128, 128]);

const BOX_THICKNESS: u32 = 2;
const LABEL_HEIGHT: u32 = 14;

/// Box plus caption drawn over one person
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
    pub label: String,
}

/// Overlay for an assessed person given their current ledger status.
pub fn overlay_for(assessment: &PersonAssessment, status: WorkerStatus, max_strikes: u32) -> Overlay {
    let Some(track_id) = assessment.track_id else {
        return Overlay {
            bbox: assessment.bbox,
            color: UNTRACKED_COLOR,
            label: "Untracked".to_string(),
        };
    };

    if status.state == WorkerState::Fired {
        return Overlay {
            bbox: assessment.bbox,
            color: FIRED_COLOR,
            label: format!("{} FIRED!", track_id.label()),
        };
    }

    match assessment.missing.first() {
        None => Overlay {
            bbox: assessment.bbox,
            color: SAFE_COLOR,
            label: format!("{} SAFE", track_id.label()),
        },
        Some(first) => Overlay {
            bbox: assessment.bbox,
            color: UNSAFE_COLOR,
            label: format!(
                "{} No {} ({}/{})",
                track_id.label(),
                first,
                status.strike_count,
                max_strikes
            ),
        },
    }
}

/// Draw every overlay's box and caption bar onto the frame.
pub fn draw_overlays(frame: &mut RgbImage, overlays: &[Overlay]) {
    for overlay in overlays {
        draw_rect(frame, &overlay.bbox, overlay.color, BOX_THICKNESS);
        draw_label_bar(frame, &overlay.bbox, overlay.color);
    }
}

fn draw_rect(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || !bbox.is_valid() {
        return;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox.x, w);
    let y0 = clamp(bbox.y, h);
    let x1 = clamp(bbox.right(), w);
    let y1 = clamp(bbox.bottom(), h);

    for t in 0..thickness {
        let xx0 = x0 + t;
        let yy0 = y0 + t;
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Solid bar above the box (inside it when the box touches the top edge).
fn draw_label_bar(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let Some(clamped) = bbox.clamp_to(w, h) else {
        return;
    };
    let x0 = clamped.x as u32;
    let x1 = (clamped.right() as u32).min(w);
    let top = clamped.y as u32;
    let y0 = top.saturating_sub(LABEL_HEIGHT);
    let y1 = if top >= LABEL_HEIGHT { top } else { (top + LABEL_HEIGHT).min(h) };
    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visionsafe_core::{EquipmentClass, TrackId};

    fn assessment(track: Option<u64>, missing: &[&str]) -> PersonAssessment {
        PersonAssessment {
            track_id: track.map(TrackId),
            bbox: BoundingBox::new(10.0, 30.0, 20.0, 40.0),
            missing: missing.iter().map(|m| EquipmentClass::new(*m)).collect(),
        }
    }

    #[test]
    fn test_overlay_colors() {
        let clean = WorkerStatus::default();
        assert_eq!(overlay_for(&assessment(Some(1), &[]), clean, 15).color, SAFE_COLOR);

        let warned = WorkerStatus {
            state: WorkerState::Warned,
            strike_count: 2,
        };
        let unsafe_overlay = overlay_for(&assessment(Some(1), &["Vest", "Gloves"]), warned, 15);
        assert_eq!(unsafe_overlay.color, UNSAFE_COLOR);
        assert_eq!(unsafe_overlay.label, "Worker-1 No Vest (2/15)");

        let fired = WorkerStatus {
            state: WorkerState::Fired,
            strike_count: 15,
        };
        let fired_overlay = overlay_for(&assessment(Some(1), &[]), fired, 15);
        assert_eq!(fired_overlay.color, FIRED_COLOR);
        assert_eq!(fired_overlay.label, "Worker-1 FIRED!");

        assert_eq!(overlay_for(&assessment(None, &["Vest"]), clean, 15).color, UNTRACKED_COLOR);
    }

    #[test]
    fn test_draw_overlays_paints_box_edges() {
        let mut frame = RgbImage::new(64, 96);
        let overlay = Overlay {
            bbox: BoundingBox::new(10.0, 30.0, 20.0, 40.0),
            color: FIRED_COLOR,
            label: String::new(),
        };
        draw_overlays(&mut frame, &[overlay]);
        assert_eq!(*frame.get_pixel(10, 50), FIRED_COLOR);
        assert_eq!(*frame.get_pixel(30, 50), FIRED_COLOR);
        assert_eq!(*frame.get_pixel(20, 70), FIRED_COLOR);
        // label bar above the box
        assert_eq!(*frame.get_pixel(20, 20), FIRED_COLOR);
        // interior untouched
        assert_eq!(*frame.get_pixel(20, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_out_of_bounds_box_is_safe() {
        let mut frame = RgbImage::new(16, 16);
        let overlay = Overlay {
            bbox: BoundingBox::new(-50.0, -50.0, 500.0, 500.0),
            color: SAFE_COLOR,
            label: "x".to_string(),
        };
        draw_overlays(&mut frame, &[overlay]);
        assert_eq!(*frame.get_pixel(0, 0), SAFE_COLOR);
    }
}
