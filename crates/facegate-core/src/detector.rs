//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the slim RFB-320 UltraFace model: 320×240 RGB input, two outputs
//! (per-prior class scores and pre-decoded normalized corner boxes),
//! post-processed with a confidence filter and IoU-based NMS.

use crate::provider::ProviderError;
use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_CONFIDENCE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output tensor positions (scores, boxes), discovered by name at load.
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ProviderError> {
        if !Path::new(model_path).exists() {
            return Err(ProviderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 2 {
            return Err(ProviderError::Detector(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded UltraFace detector"
        );

        Ok(Self {
            session,
            output_indices,
        })
    }

    /// Detect faces in a grayscale image, returning boxes sorted by confidence.
    pub fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, ProviderError> {
        if gray.len() < (width * height) as usize || width == 0 || height == 0 {
            return Err(ProviderError::Detector(format!(
                "invalid frame: {}x{} with {} bytes",
                width,
                height,
                gray.len()
            )));
        }

        let input = preprocess(gray, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (score_idx, box_idx) = self.output_indices;
        let (_, scores) = outputs[score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ProviderError::Detector(format!("scores: {e}")))?;
        let (_, boxes) = outputs[box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ProviderError::Detector(format!("boxes: {e}")))?;

        let detections = decode(
            scores,
            boxes,
            width as f32,
            height as f32,
            ULTRAFACE_CONFIDENCE_THRESHOLD,
        );

        let mut result = nms(detections, ULTRAFACE_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Discover output tensor ordering by name.
///
/// The stock UltraFace export names its outputs "scores" and "boxes";
/// unrecognized names fall back to that positional order.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "UltraFace output names not recognized, using positional [0]=scores, [1]=boxes");
            (0, 1)
        }
    }
}

/// Stretch-resize the grayscale image to 320×240 and build the NCHW tensor.
///
/// UltraFace is trained on stretched (not letterboxed) input, so the
/// normalized output boxes map back to the source by plain scaling.
fn preprocess(gray: &[u8], width: usize, height: usize) -> Array4<f32> {
    let resized = resize_bilinear(
        gray,
        width,
        height,
        ULTRAFACE_INPUT_WIDTH,
        ULTRAFACE_INPUT_HEIGHT,
    );

    let mut tensor =
        Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
    for y in 0..ULTRAFACE_INPUT_HEIGHT {
        for x in 0..ULTRAFACE_INPUT_WIDTH {
            let pixel = resized[y * ULTRAFACE_INPUT_WIDTH + x] as f32;
            let normalized = (pixel - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

/// Bilinear grayscale resize.
pub(crate) fn resize_bilinear(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h];
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return dst;
    }
    let scale_x = src_w as f32 / dst_w as f32;
    let scale_y = src_h as f32 / dst_h as f32;

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * src_w + x0] as f32;
            let tr = src[y0 * src_w + x1] as f32;
            let bl = src[y1 * src_w + x0] as f32;
            let br = src[y1 * src_w + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            dst[y * dst_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    dst
}

/// Decode prior scores and normalized corner boxes into source-space boxes.
///
/// Scores come as [background, face] pairs per prior; boxes as
/// [x1, y1, x2, y2] in [0, 1] of the stretched input.
fn decode(scores: &[f32], boxes: &[f32], src_w: f32, src_h: f32, threshold: f32) -> Vec<FaceBox> {
    let priors = scores.len() / 2;
    let mut detections = Vec::new();

    for i in 0..priors {
        let confidence = scores[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }
        let off = i * 4;
        if off + 3 >= boxes.len() {
            break;
        }
        let x1 = (boxes[off] * src_w).clamp(0.0, src_w);
        let y1 = (boxes[off + 1] * src_h).clamp(0.0, src_h);
        let x2 = (boxes[off + 2] * src_w).clamp(0.0, src_w);
        let y2 = (boxes[off + 3] * src_h).clamp(0.0, src_h);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    detections
}

/// Intersection-over-union of two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy non-maximum suppression: keep the most confident box, drop
/// overlapping candidates above the IoU threshold, repeat.
fn nms(mut detections: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<FaceBox> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) <= threshold) {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
        }
    }

    #[test]
    fn iou_disjoint_is_zero() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(20.0, 20.0, 10.0, 10.0, 0.9);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_identical_is_one() {
        let a = face(5.0, 5.0, 10.0, 10.0, 0.9);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        // Two 10x10 boxes offset by 5 in x: inter=50, union=150
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(5.0, 0.0, 10.0, 10.0, 0.9);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence() {
        let dets = vec![
            face(0.0, 0.0, 10.0, 10.0, 0.8),
            face(1.0, 1.0, 10.0, 10.0, 0.95),
            face(50.0, 50.0, 10.0, 10.0, 0.7),
        ];
        let kept = nms(dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.95).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let dets = vec![
            face(0.0, 0.0, 10.0, 10.0, 0.9),
            face(100.0, 100.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(dets, 0.3).len(), 2);
    }

    #[test]
    fn decode_filters_by_confidence_and_scales() {
        // Two priors: one background-dominant, one confident face.
        let scores = vec![0.9, 0.1, 0.05, 0.95];
        let boxes = vec![
            0.0, 0.0, 0.5, 0.5, // prior 0, filtered out
            0.25, 0.25, 0.75, 0.75, // prior 1
        ];
        let dets = decode(&scores, &boxes, 320.0, 240.0, 0.7);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 80.0).abs() < 1e-3);
        assert!((d.y - 60.0).abs() < 1e-3);
        assert!((d.width - 160.0).abs() < 1e-3);
        assert!((d.height - 120.0).abs() < 1e-3);
    }

    #[test]
    fn decode_drops_degenerate_boxes() {
        let scores = vec![0.0, 0.99];
        let boxes = vec![0.5, 0.5, 0.5, 0.5]; // zero area
        assert!(decode(&scores, &boxes, 320.0, 240.0, 0.7).is_empty());
    }

    #[test]
    fn resize_preserves_constant_image() {
        let src = vec![77u8; 8 * 8];
        let dst = resize_bilinear(&src, 8, 8, 4, 4);
        assert_eq!(dst.len(), 16);
        assert!(dst.iter().all(|&p| p == 77));
    }

    #[test]
    fn resize_identity_dimensions() {
        let src: Vec<u8> = (0..16).collect();
        let dst = resize_bilinear(&src, 4, 4, 4, 4);
        assert_eq!(dst, src);
    }

    #[test]
    fn preprocess_shape_and_channel_replication() {
        let gray = vec![128u8; 64 * 48];
        let tensor = preprocess(&gray, 64, 48);
        assert_eq!(
            tensor.shape(),
            &[1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH]
        );
        let expected = (128.0 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
        let val = tensor[[0, 0, 10, 10]];
        assert!((val - expected).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 10, 10]], tensor[[0, 1, 10, 10]]);
        assert_eq!(tensor[[0, 1, 10, 10]], tensor[[0, 2, 10, 10]]);
    }
}
