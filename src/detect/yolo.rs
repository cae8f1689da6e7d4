//! YOLOv8 output decoding.
//!
//! The detection head emits a `[1, 4 + classes, anchors]` tensor: rows 0..4 hold
//! the box center and size in model-input pixels, the remaining rows hold one score
//! per class. Decoding keeps the best class per anchor, drops anchors under the
//! confidence threshold, rescales to frame pixels and runs class-wise NMS.

use anyhow::{anyhow, Result};

use super::labels::coco_label;
use super::result::{BoundingBox, Detection};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Decode a row-major `[4 + classes, anchors]` output slice.
pub fn decode_output(
    data: &[f32],
    rows: usize,
    anchors: usize,
    frame_width: u32,
    frame_height: u32,
    params: &YoloParams,
) -> Result<Vec<Detection>> {
    if rows <= 4 {
        return Err(anyhow!("yolo output has {} rows; expected at least 5", rows));
    }
    if data.len() != rows * anchors {
        return Err(anyhow!(
            "yolo output has {} values; expected {}x{}",
            data.len(),
            rows,
            anchors
        ));
    }
    let scale_x = frame_width as f32 / params.input_size as f32;
    let scale_y = frame_height as f32 / params.input_size as f32;
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    let mut candidates: Vec<(usize, Detection)> = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, anchor)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !(score >= params.conf_threshold) {
            continue;
        }
        let Some(label) = coco_label(class_id) else {
            continue;
        };
        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_x).max(0.0),
            ((cy - h / 2.0) * scale_y).max(0.0),
            ((cx + w / 2.0) * scale_x).min(frame_width as f32),
            ((cy + h / 2.0) * scale_y).min(frame_height as f32),
        );
        candidates.push((class_id, Detection::new(label, score, bbox)));
    }

    Ok(non_max_suppression(candidates, params))
}

fn non_max_suppression(
    mut candidates: Vec<(usize, Detection)>,
    params: &YoloParams,
) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_id, det) in candidates {
        if kept.len() >= params.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|(kept_class, kept_det)| {
            *kept_class == class_id && kept_det.bbox.iou(&det.bbox) > params.iou_threshold
        });
        if !suppressed {
            kept.push((class_id, det));
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSES: usize = 80;
    const ROWS: usize = 4 + CLASSES;

    fn output(anchors: &[(f32, f32, f32, f32, usize, f32)]) -> Vec<f32> {
        let n = anchors.len();
        let mut data = vec![0.0f32; ROWS * n];
        for (i, &(cx, cy, w, h, class_id, score)) in anchors.iter().enumerate() {
            data[i] = cx;
            data[n + i] = cy;
            data[2 * n + i] = w;
            data[3 * n + i] = h;
            data[(4 + class_id) * n + i] = score;
        }
        data
    }

    #[test]
    fn decodes_and_rescales_boxes() {
        let data = output(&[(320.0, 320.0, 64.0, 128.0, 0, 0.9)]);
        let params = YoloParams::default();
        let dets = decode_output(&data, ROWS, 1, 1280, 640, &params).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "person");
        assert_eq!(dets[0].bbox, BoundingBox::new(576.0, 256.0, 704.0, 384.0));
    }

    #[test]
    fn drops_low_confidence_and_suppresses_overlaps() {
        let data = output(&[
            (100.0, 100.0, 50.0, 50.0, 63, 0.8),
            (102.0, 100.0, 50.0, 50.0, 63, 0.7),
            (102.0, 100.0, 50.0, 50.0, 0, 0.6),
            (400.0, 400.0, 50.0, 50.0, 64, 0.1),
        ]);
        let params = YoloParams::default();
        let dets = decode_output(&data, ROWS, 4, 640, 640, &params).unwrap();
        let labels: Vec<&str> = dets.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["laptop", "person"]);
        assert_eq!(dets[0].confidence, 0.8);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let params = YoloParams::default();
        assert!(decode_output(&[0.0; 10], ROWS, 1, 640, 640, &params).is_err());
        assert!(decode_output(&[0.0; 4], 4, 1, 640, 640, &params).is_err());
    }
}
