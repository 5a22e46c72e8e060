//! PPE association: decides which required items each detected person is missing.

use crate::config::{AssociationConfig, BodyZone, OverlapMetric};
use crate::types::{BoundingBox, Detection, EquipmentClass, TrackId};
use serde::{Deserialize, Serialize};

/// Per-person result of one frame's association pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonAssessment {
    pub track_id: Option<TrackId>,
    pub bbox: BoundingBox,
    /// Missing required classes, in configured order
    pub missing: Vec<EquipmentClass>,
}

impl PersonAssessment {
    /// Person seen without a stable tracker identity.
    pub fn untracked(&self) -> bool {
        self.track_id.is_none()
    }

    pub fn is_compliant(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct PpeAssociator {
    config: AssociationConfig,
}

impl PpeAssociator {
    pub fn new(config: AssociationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }

    /// Assess every person in one frame's detections.
    pub fn assess(&self, detections: &[Detection]) -> Vec<PersonAssessment> {
        let usable: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.bbox.is_valid() && d.confidence >= self.config.min_confidence)
            .collect();

        let (persons, equipment): (Vec<&Detection>, Vec<&Detection>) =
            usable.into_iter().partition(|d| self.is_person(d));

        persons
            .into_iter()
            .map(|person| {
                let missing = self
                    .config
                    .required
                    .iter()
                    .filter(|req| {
                        !equipment
                            .iter()
                            .any(|item| req.accepts(&item.class) && self.associated(&person.bbox, item))
                    })
                    .map(|req| req.class.clone())
                    .collect();

                PersonAssessment {
                    track_id: person.track_id,
                    bbox: person.bbox,
                    missing,
                }
            })
            .collect()
    }

    fn is_person(&self, detection: &Detection) -> bool {
        detection
            .class
            .trim()
            .eq_ignore_ascii_case(self.config.person_class.trim())
    }

    /// Overlap metric first, then the item's body zone if one is configured.
    fn associated(&self, person: &BoundingBox, item: &Detection) -> bool {
        if !overlaps(self.config.metric, person, &item.bbox) {
            return false;
        }
        match self.zone_for(&item.class) {
            Some(zone) => in_zone(zone, person, &item.bbox),
            None => true,
        }
    }

    fn zone_for(&self, label: &str) -> Option<&BodyZone> {
        self.config.zones.iter().find(|zone| zone.class.matches(label))
    }
}

/// Apply an overlap metric between a person box and an equipment box.
pub fn overlaps(metric: OverlapMetric, person: &BoundingBox, item: &BoundingBox) -> bool {
    match metric {
        OverlapMetric::CenterInside => {
            let (cx, cy) = item.center();
            person.contains_point(cx, cy)
        }
        OverlapMetric::Containment { min_fraction } => {
            let area = item.area();
            area > 0.0 && person.intersection_area(item) / area >= min_fraction
        }
        OverlapMetric::Iou { min_iou } => person.iou(item) >= min_iou,
    }
}

fn in_zone(zone: &BodyZone, person: &BoundingBox, item: &BoundingBox) -> bool {
    let (_, cy) = item.center();
    let relative = (cy - person.y) / person.height;
    relative >= zone.top && relative <= zone.bottom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequiredEquipment;

    fn person(id: u64) -> Detection {
        Detection::new(Some(TrackId(id)), "person", BoundingBox::new(100.0, 100.0, 100.0, 300.0), 0.9)
    }

    fn item(class: &str, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(None, class, BoundingBox::new(x, y, w, h), 0.8)
    }

    fn simple_config(metric: OverlapMetric) -> AssociationConfig {
        AssociationConfig {
            required: vec![RequiredEquipment::new("Helmet"), RequiredEquipment::new("Vest")],
            metric,
            zones: Vec::new(),
            ..AssociationConfig::default()
        }
    }

    #[test]
    fn test_person_without_equipment_misses_everything() {
        let associator = PpeAssociator::new(AssociationConfig::default());
        let result = associator.assess(&[person(1)]);
        assert_eq!(result.len(), 1);
        let missing: Vec<&str> = result[0].missing.iter().map(|c| c.as_str()).collect();
        assert_eq!(missing, vec!["Vest", "Gloves", "Shoes", "Headgear"]);
        assert!(!result[0].untracked());
    }

    #[test]
    fn test_fully_equipped_person_is_compliant() {
        let associator = PpeAssociator::new(AssociationConfig::default());
        let detections = vec![
            person(1),
            item("Helmet", 130.0, 100.0, 40.0, 40.0),
            item("Vest", 110.0, 180.0, 80.0, 80.0),
            item("Gloves", 100.0, 240.0, 20.0, 20.0),
            item("Shoes", 120.0, 370.0, 60.0, 25.0),
        ];
        let result = associator.assess(&detections);
        assert!(result[0].is_compliant(), "missing: {:?}", result[0].missing);
    }

    #[test]
    fn test_alternative_satisfies_headgear() {
        let associator = PpeAssociator::new(AssociationConfig::default());
        let detections = vec![person(1), item("Goggles", 130.0, 120.0, 40.0, 20.0)];
        let result = associator.assess(&detections);
        assert!(!result[0].missing.iter().any(|c| c.as_str() == "Headgear"));
    }

    #[test]
    fn test_zone_rejects_helmet_at_feet() {
        let associator = PpeAssociator::new(AssociationConfig::default());
        let detections = vec![person(1), item("Helmet", 130.0, 360.0, 40.0, 30.0)];
        let result = associator.assess(&detections);
        assert!(result[0].missing.iter().any(|c| c.as_str() == "Headgear"));
    }

    #[test]
    fn test_equipment_on_other_person_not_counted() {
        let associator = PpeAssociator::new(simple_config(OverlapMetric::CenterInside));
        let other = Detection::new(Some(TrackId(2)), "Person", BoundingBox::new(400.0, 100.0, 100.0, 300.0), 0.9);
        let detections = vec![person(1), other, item("Helmet", 430.0, 100.0, 40.0, 40.0)];
        let result = associator.assess(&detections);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].missing.len(), 2);
        assert_eq!(result[1].missing, vec![EquipmentClass::new("Vest")]);
    }

    #[test]
    fn test_low_confidence_ignored() {
        let associator = PpeAssociator::new(simple_config(OverlapMetric::CenterInside));
        let mut helmet = item("helmet", 130.0, 100.0, 40.0, 40.0);
        helmet.confidence = 0.1;
        let result = associator.assess(&[person(1), helmet]);
        assert_eq!(result[0].missing.len(), 2);
    }

    #[test]
    fn test_untracked_person_flagged() {
        let associator = PpeAssociator::new(simple_config(OverlapMetric::CenterInside));
        let mut p = person(1);
        p.track_id = None;
        let result = associator.assess(&[p]);
        assert!(result[0].untracked());
    }

    #[test]
    fn test_center_inside_boundary() {
        let p = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        // center exactly on the right edge
        assert!(overlaps(OverlapMetric::CenterInside, &p, &BoundingBox::new(90.0, 40.0, 20.0, 20.0)));
        assert!(!overlaps(OverlapMetric::CenterInside, &p, &BoundingBox::new(91.0, 40.0, 20.0, 20.0)));
    }

    #[test]
    fn test_containment_threshold() {
        let p = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        // half of the item is inside
        let half = BoundingBox::new(90.0, 0.0, 20.0, 10.0);
        assert!(overlaps(OverlapMetric::Containment { min_fraction: 0.5 }, &p, &half));
        assert!(!overlaps(OverlapMetric::Containment { min_fraction: 0.51 }, &p, &half));
    }

    #[test]
    fn test_iou_threshold() {
        let p = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let shifted = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!(overlaps(OverlapMetric::Iou { min_iou: 0.33 }, &p, &shifted));
        assert!(!overlaps(OverlapMetric::Iou { min_iou: 0.34 }, &p, &shifted));
    }
}
