use likeness_core::{BoundingBox, Located};

/// One SCRFD detection in source image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl DetectedFace {
    /// Intersection-over-union with another detection.
    pub fn iou(&self, other: &DetectedFace) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Copy of this detection clipped to a `width x height` image.
    pub fn clipped(&self, width: u32, height: u32) -> DetectedFace {
        let (w, h) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, w);
        let y1 = self.y.clamp(0.0, h);
        let x2 = (self.x + self.width).clamp(0.0, w);
        let y2 = (self.y + self.height).clamp(0.0, h);
        DetectedFace {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            ..self.clone()
        }
    }
}

impl Located for DetectedFace {
    fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_xywh(self.x, self.y, self.width, self.height)
    }
}
