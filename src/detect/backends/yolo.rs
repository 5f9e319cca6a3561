//! YOLOv8 output decoding.
//!
//! The exported head is `[1, 4 + classes, anchors]` (channel-major) with `cx, cy, w, h` in
//! model-input pixels followed by per-class scores. Some exporters transpose it to
//! `[1, anchors, 4 + classes]`; both layouts are accepted.

/// A decoded box in model-input coordinates.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
}

impl RawBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &RawBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Decodes a `[1, a, b]` head. Returns `None` when the shape is not a YOLOv8 head.
pub(crate) fn decode(values: &[f32], shape: &[usize], score_threshold: f32) -> Option<Vec<RawBox>> {
    let &[1, a, b] = shape else {
        return None;
    };
    // Real exports have far fewer channels than anchors.
    let (channels, anchors, channel_major) = if a > 4 && (a <= b || b <= 4) {
        (a, b, true)
    } else if b > 4 {
        (b, a, false)
    } else {
        return None;
    };
    if values.len() != channels * anchors {
        return None;
    }
    let at = |channel: usize, anchor: usize| {
        if channel_major {
            values[channel * anchors + anchor]
        } else {
            values[anchor * channels + channel]
        }
    };

    let mut out = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..channels)
            .map(|c| (c - 4, at(c, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < score_threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        out.push(RawBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score,
            class_id,
        });
    }
    Some(out)
}

/// Greedy per-class non-maximum suppression.
pub(crate) fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<RawBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, score: f32, class_id: usize) -> RawBox {
        RawBox {
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
            score,
            class_id,
        }
    }

    #[test]
    fn decodes_channel_major_head() {
        // 2 classes, 3 anchors: rows cx, cy, w, h, score0, score1.
        let values = [
            10.0, 50.0, 90.0, //
            10.0, 50.0, 90.0, //
            4.0, 4.0, 4.0, //
            4.0, 4.0, 4.0, //
            0.9, 0.1, 0.2, //
            0.05, 0.2, 0.7,
        ];
        let boxes = decode(&values, &[1, 6, 3], 0.5).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 0);
        assert_eq!(boxes[0].x1, 8.0);
        assert_eq!(boxes[1].class_id, 1);
        assert_eq!(boxes[1].score, 0.7);
    }

    #[test]
    fn decodes_transposed_head() {
        let values = [
            10.0, 10.0, 4.0, 4.0, 0.9, //
            50.0, 50.0, 4.0, 4.0, 0.1, //
        ];
        // [1, anchors, channels] with channels = 5 > anchors = 2.
        let boxes = decode(&values, &[1, 2, 5], 0.5).unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].y2, 12.0);
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(decode(&[0.0; 8], &[2, 4], 0.5).is_none());
        assert!(decode(&[0.0; 8], &[1, 4, 2], 0.5).is_none());
    }

    #[test]
    fn nms_is_per_class() {
        let kept = non_max_suppression(
            vec![raw(0.0, 0.8, 0), raw(1.0, 0.9, 0), raw(1.0, 0.7, 1), raw(40.0, 0.6, 0)],
            0.45,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept.iter().any(|b| b.class_id == 1));
        assert!(kept.iter().all(|b| b.score != 0.8));
    }
}
