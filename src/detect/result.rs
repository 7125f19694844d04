use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One model output: a box, a class label and a confidence in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "DetectionFields")]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_name: class_name.into(),
            confidence: if confidence.is_nan() {
                0.0
            } else {
                confidence.clamp(0.0, 1.0)
            },
        }
    }
}

/// Wire shape of [`Detection`]; deserialized values go through
/// [`Detection::new`] so the confidence range holds for config input too.
#[derive(Deserialize)]
struct DetectionFields {
    #[serde(rename = "box")]
    bbox: BoundingBox,
    class_name: String,
    confidence: f32,
}

impl From<DetectionFields> for Detection {
    fn from(fields: DetectionFields) -> Self {
        Detection::new(fields.bbox, fields.class_name, fields.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        let far = BoundingBox::new(50.0, 50.0, 60.0, 60.0);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn confidence_is_clamped() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), "Normal", 1.7);
        assert_eq!(det.confidence, 1.0);
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), "Normal", f32::NAN);
        assert_eq!(det.confidence, 0.0);
    }

    #[test]
    fn deserialized_confidence_is_clamped() {
        let json = r#"[
            {"box": {"x1": 0.0, "y1": 0.0, "x2": 4.0, "y2": 4.0}, "class_name": "Shoplifting", "confidence": 1.7},
            {"box": {"x1": 0.0, "y1": 0.0, "x2": 4.0, "y2": 4.0}, "class_name": "Normal", "confidence": -0.2}
        ]"#;
        let dets: Vec<Detection> = serde_json::from_str(json).unwrap();
        assert_eq!(dets[0].confidence, 1.0);
        assert_eq!(dets[1].confidence, 0.0);
        assert_eq!(dets[0].class_name, "Shoplifting");
    }

    #[test]
    fn detection_serializes_box_field() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "Shoplifting", 0.91);
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["class_name"], "Shoplifting");
        assert_eq!(json["box"]["x2"], 10.0);
    }
}
