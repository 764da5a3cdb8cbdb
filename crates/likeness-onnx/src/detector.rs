//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Input images are
//! letterboxed into a 640x640 RGB tensor.

use crate::face::DetectedFace;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SCRFD variant: small and quick, or large and thorough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetectorModel {
    #[default]
    Fast,
    Accurate,
}

impl DetectorModel {
    pub fn file_name(&self) -> &'static str {
        match self {
            DetectorModel::Fast => "det_500m.onnx",
            DetectorModel::Accurate => "det_10g.onnx",
        }
    }
}

impl fmt::Display for DetectorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectorModel::Fast => "fast",
            DetectorModel::Accurate => "accurate",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown detector model {0:?} (expected \"fast\" or \"accurate\")")]
pub struct UnknownDetectorModel(pub String);

impl FromStr for DetectorModel {
    type Err = UnknownDetectorModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectorModel::Fast),
            "accurate" | "cnn" => Ok(DetectorModel::Accurate),
            _ => Err(UnknownDetectorModel(s.to_string())),
        }
    }
}

/// Maps letterboxed tensor coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    /// Whole-pixel offset of the resized image inside the tensor.
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = Self::scaled(width, height, scale);
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        }
    }

    fn scaled(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        (w, h)
    }

    fn to_source(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score, bbox and kps per stride), got {}",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::debug!(?outputs, "SCRFD output mapping");
        Ok(Self { session, outputs })
    }

    /// Faces in `image`, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.outputs) {
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(score_idx, "scores")?;
            let boxes = extract(bbox_idx, "boxes")?;
            let kps = extract(kps_idx, "landmarks")?;
            candidates.extend(decode_stride(scores, boxes, kps, stride, &letterbox));
        }

        let faces: Vec<DetectedFace> = nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .map(|f| f.clipped(image.width(), image.height()))
            .filter(|f| f.width > 0.0 && f.height > 0.0)
            .collect();
        tracing::debug!(faces = faces.len(), "SCRFD detection done");
        Ok(faces)
    }
}

/// Letterbox `image` into a normalized NCHW tensor.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (new_w, new_h) = Letterbox::scaled(image.width(), image.height(), letterbox.scale);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding normalizes to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let off_x = letterbox.pad_x as usize;
    let off_y = letterbox.pad_y as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, off_y + y as usize, off_x + x as usize]] =
                (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    (tensor, letterbox)
}

/// Locate score/bbox/kps tensors per stride by name (`score_8`, `bbox_16`,
/// ...), falling back to the positional layout of stock exports.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };
    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<DetectedFace> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let mut out = Vec::new();

    for idx in 0..anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }
        let Some(b) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * step;
        let cy = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_source((cx - b[0] * step, cy - b[1] * step));
        let (x2, y2) = letterbox.to_source((cx + b[2] * step, cy + b[3] * step));

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.to_source((cx + k[i * 2] * step, cy + k[i * 2 + 1] * step)))
        });

        out.push(DetectedFace {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

/// Greedy non-maximum suppression, result sorted by confidence.
fn nms(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<DetectedFace> = Vec::new();
    for face in faces {
        if keep.iter().all(|k| k.iou(&face) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn face(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let kept = nms(
            vec![
                face(5.0, 5.0, 100.0, 100.0, 0.8),
                face(0.0, 0.0, 100.0, 100.0, 0.9),
                face(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(320, 240);
        assert_abs_diff_eq!(lb.scale, 2.0);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 80);
        let (x, y) = lb.to_source((100.0 * 2.0, 50.0 * 2.0 + 80.0));
        assert_abs_diff_eq!(x, 100.0, epsilon = 1e-4);
        assert_abs_diff_eq!(y, 50.0, epsilon = 1e-4);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let image = RgbImage::from_pixel(64, 32, image::Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_abs_diff_eq!(tensor[[0, 1, 320, 320]], (255.0 - SCRFD_MEAN) / SCRFD_STD);
    }

    #[test]
    fn test_odd_padding_maps_first_row_to_zero() {
        // 100x37 scales to 640x237, leaving 403 rows of padding.
        let image = RgbImage::from_pixel(100, 37, image::Rgb([255, 255, 255]));
        let (tensor, lb) = preprocess(&image);
        assert_eq!(lb.pad_y, 201);
        assert_eq!(tensor[[0, 0, 200, 320]], 0.0);
        assert_abs_diff_eq!(tensor[[0, 0, 201, 320]], (255.0 - SCRFD_MEAN) / SCRFD_STD);

        let (x, y) = lb.to_source((0.0, 201.0));
        assert_abs_diff_eq!(x, 0.0);
        assert_abs_diff_eq!(y, 0.0);
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = ["bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_layout(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| (400 + i).to_string()).collect();
        assert_eq!(output_layout(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        };
        let grid = 640 / 32;
        let anchors = grid * grid * 2;
        let mut scores = vec![0.0; anchors];
        let mut boxes = vec![0.0; anchors * 4];
        let kps = vec![0.0; anchors * 10];
        // Anchor 2 sits in cell 1: centre (32, 0).
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let faces = decode_stride(&scores, &boxes, &kps, 32, &lb);
        assert_eq!(faces.len(), 1);
        assert_eq!((faces[0].x, faces[0].y, faces[0].width, faces[0].height), (16.0, 0.0, 32.0, 32.0));
        assert_eq!(faces[0].landmarks.unwrap()[0], (32.0, 0.0));
    }

    #[rstest]
    #[case("fast", DetectorModel::Fast)]
    #[case("hog", DetectorModel::Fast)]
    #[case(" Accurate ", DetectorModel::Accurate)]
    #[case("cnn", DetectorModel::Accurate)]
    fn test_detector_model_parse(#[case] input: &str, #[case] expected: DetectorModel) {
        assert_eq!(input.parse::<DetectorModel>(), Ok(expected));
    }

    #[test]
    fn test_detector_model_rejects_other() {
        assert!("huge".parse::<DetectorModel>().is_err());
        assert_eq!(DetectorModel::Accurate.file_name(), "det_10g.onnx");
    }
}
