//! PaddleOCR in-process engine
//!
//! Runs DBNet text detection and CRNN recognition via ONNX Runtime. Both
//! sessions and the character dictionary are loaded once at construction;
//! per-frame inference faults degrade to the empty recognition.

use anyhow::{anyhow, Context, Result};
use image::{
    imageops::{self, FilterType},
    GrayImage, Luma, RgbImage,
};
use imageproc::contours::{find_contours, BorderType};
use ndarray::{s, Array4, ArrayView2};
use ort::{session::Session, value::TensorRef};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::models::{self, ModelManager, ModelType};
use super::{Recognition, TextRecognizer, TextSpan};

/// Longest input side fed to detection; larger frames are scaled down
const DET_LIMIT_SIDE: u32 = 960;
/// Probability-map binarization threshold
const DET_BINARIZE_THRESHOLD: f32 = 0.3;
/// Minimum mean probability inside a candidate box
const DET_BOX_THRESHOLD: f32 = 0.6;
/// Candidate boxes smaller than this on either side are noise
const DET_MIN_BOX_SIZE: u32 = 3;
/// DB boxes hug the text core; expand by area/perimeter times this ratio
const DET_UNCLIP_RATIO: f32 = 1.5;
/// Recognizer input height
const REC_INPUT_HEIGHT: u32 = 48;
/// Narrowest crop the recognizer accepts
const REC_MIN_WIDTH: u32 = 16;

/// An axis-aligned detected text region, in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// PaddleOCR-based recognition backend
pub struct PaddleEngine {
    det: Session,
    rec: Session,
    dict: Vec<String>,
}

impl PaddleEngine {
    /// Load detection, recognition, and the character dictionary
    ///
    /// Explicit paths win; anything left unset is resolved through the
    /// managed model cache (downloading on first use). Failure here is a
    /// setup-time error, before any frame is processed.
    pub fn new(
        languages: &[String],
        det_model: Option<&Path>,
        rec_model: Option<&Path>,
        char_dict: Option<&Path>,
    ) -> Result<Self> {
        let manager = match (det_model, rec_model, char_dict) {
            (Some(_), Some(_), Some(_)) => None,
            _ => Some(ModelManager::new()?),
        };

        // The managed cache carries English models only; other languages
        // need explicit model paths.
        if manager.is_some() && languages.iter().any(|lang| lang != "en") {
            warn!(
                "managed model cache provides English models; set det_model/rec_model/char_dict \
                 to recognize {languages:?}"
            );
        }

        let det_path = resolve_source(det_model, ModelType::Detection, manager.as_ref())?;
        let rec_path = resolve_source(rec_model, ModelType::Recognition, manager.as_ref())?;
        let dict_path = resolve_source(char_dict, ModelType::Dictionary, manager.as_ref())?;

        let det = models::load_session(&det_path).context("detection model")?;
        let rec = models::load_session(&rec_path).context("recognition model")?;
        let dict = models::load_dictionary(&dict_path)?;

        debug!("PaddleOCR engine ready ({} dictionary entries)", dict.len());

        Ok(Self { det, rec, dict })
    }

    fn run(&mut self, image: &RgbImage) -> Result<Recognition> {
        let boxes = self.detect(image)?;
        if boxes.is_empty() {
            return Ok(Recognition::empty());
        }

        let mut spans = Vec::new();
        for text_box in boxes {
            let crop = imageops::crop_imm(
                image,
                text_box.x,
                text_box.y,
                text_box.width,
                text_box.height,
            )
            .to_image();
            if let Some(span) = self.recognize_region(&crop)? {
                spans.push(span);
            }
        }

        Ok(Recognition::from_spans(spans))
    }

    /// Detect text regions, returned in reading order
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<TextBox>> {
        let (orig_w, orig_h) = image.dimensions();
        let (input_w, input_h) = det_input_size(orig_w, orig_h);
        let resized = imageops::resize(image, input_w, input_h, FilterType::Triangle);

        let input = det_tensor(&resized);
        let tensor = TensorRef::from_array_view(input.view())?;
        let outputs = self.det.run(ort::inputs![tensor])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        if shape.len() != 4 {
            return Err(anyhow!("unexpected detection output shape: {shape:?}"));
        }
        let map_h = shape[2] as usize;
        let map_w = shape[3] as usize;
        let prob = ArrayView2::from_shape((map_h, map_w), data)
            .map_err(|e| anyhow!("detection output does not form a probability map: {e}"))?;

        let mut boxes = boxes_from_prob_map(&prob);

        // The probability map lives in resized coordinates
        let scale_x = orig_w as f32 / map_w as f32;
        let scale_y = orig_h as f32 / map_h as f32;
        for text_box in &mut boxes {
            *text_box = scale_box(*text_box, scale_x, scale_y, orig_w, orig_h);
        }
        boxes.retain(|b| b.width > 0 && b.height > 0);
        sort_reading_order(&mut boxes);

        debug!("detected {} text region(s)", boxes.len());
        Ok(boxes)
    }

    /// Recognize one cropped region; None when it decodes to nothing
    fn recognize_region(&mut self, crop: &RgbImage) -> Result<Option<TextSpan>> {
        let (w, h) = crop.dimensions();
        if w == 0 || h == 0 {
            return Ok(None);
        }

        let target_w = ((w as f32 / h as f32) * REC_INPUT_HEIGHT as f32)
            .round()
            .max(REC_MIN_WIDTH as f32) as u32;
        let resized = imageops::resize(crop, target_w, REC_INPUT_HEIGHT, FilterType::Triangle);

        let input = rec_tensor(&resized);
        let tensor = TensorRef::from_array_view(input.view())?;
        let outputs = self.rec.run(ort::inputs![tensor])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        if shape.len() != 3 {
            return Err(anyhow!("unexpected recognition output shape: {shape:?}"));
        }
        let seq_len = shape[1] as usize;
        let num_classes = shape[2] as usize;
        let probs = ArrayView2::from_shape((seq_len, num_classes), data)
            .map_err(|e| anyhow!("recognition output does not form a sequence: {e}"))?;

        Ok(ctc_decode(&probs, &self.dict))
    }
}

impl TextRecognizer for PaddleEngine {
    fn recognize(&mut self, image: &RgbImage) -> Recognition {
        if image.width() == 0 || image.height() == 0 {
            return Recognition::empty();
        }
        match self.run(image) {
            Ok(recognition) => recognition,
            Err(err) => {
                warn!("paddle recognition failed: {err:#}");
                Recognition::empty()
            }
        }
    }
}

fn resolve_source(
    explicit: Option<&Path>,
    model_type: ModelType,
    manager: Option<&ModelManager>,
) -> Result<PathBuf> {
    match (explicit, manager) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, Some(manager)) => manager.ensure_model(model_type),
        (None, None) => Err(anyhow!("no source for {}", model_type.filename())),
    }
}

/// Detection input dimensions: longest side capped, both sides multiples of 32
fn det_input_size(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let scale = if longest > DET_LIMIT_SIDE {
        DET_LIMIT_SIDE as f32 / longest as f32
    } else {
        1.0
    };
    let round32 = |v: f32| ((v / 32.0).round().max(1.0) as u32) * 32;
    (
        round32(width as f32 * scale),
        round32(height as f32 * scale),
    )
}

/// NCHW detection input, ImageNet-normalized
fn det_tensor(image: &RgbImage) -> Array4<f32> {
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    let (w, h) = image.dimensions();
    let mut input = Array4::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            input[[0, c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
        }
    }
    input
}

/// NCHW recognition input, scaled to [-1, 1]
fn rec_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut input = Array4::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            input[[0, c, y as usize, x as usize]] = (value - 0.5) / 0.5;
        }
    }
    input
}

/// Extract candidate boxes from the DB probability map
///
/// The map is binarized, outer contours become axis-aligned boxes, weak and
/// tiny candidates are dropped, and survivors are expanded by the unclip
/// offset (area over perimeter) to recover the full glyph extent.
fn boxes_from_prob_map(prob: &ArrayView2<f32>) -> Vec<TextBox> {
    let (h, w) = prob.dim();
    let mut bitmap = GrayImage::new(w as u32, h as u32);
    for ((y, x), &p) in prob.indexed_iter() {
        if p > DET_BINARIZE_THRESHOLD {
            bitmap.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }

    let mut boxes = Vec::new();
    for contour in find_contours::<u32>(&bitmap) {
        if contour.border_type != BorderType::Outer || contour.points.is_empty() {
            continue;
        }

        let x0 = contour.points.iter().map(|p| p.x).min().unwrap_or(0);
        let y0 = contour.points.iter().map(|p| p.y).min().unwrap_or(0);
        let x1 = contour.points.iter().map(|p| p.x).max().unwrap_or(0);
        let y1 = contour.points.iter().map(|p| p.y).max().unwrap_or(0);

        let box_w = x1 - x0 + 1;
        let box_h = y1 - y0 + 1;
        if box_w < DET_MIN_BOX_SIZE || box_h < DET_MIN_BOX_SIZE {
            continue;
        }

        let region = prob.slice(s![y0 as usize..=y1 as usize, x0 as usize..=x1 as usize]);
        let score = region.mean().unwrap_or(0.0);
        if score < DET_BOX_THRESHOLD {
            continue;
        }

        let area = (box_w * box_h) as f32;
        let perimeter = (2 * (box_w + box_h)) as f32;
        let offset = (area * DET_UNCLIP_RATIO / perimeter).round() as u32;

        let x0 = x0.saturating_sub(offset);
        let y0 = y0.saturating_sub(offset);
        let x1 = (x1 + offset).min(w as u32 - 1);
        let y1 = (y1 + offset).min(h as u32 - 1);

        boxes.push(TextBox {
            x: x0,
            y: y0,
            width: x1 - x0 + 1,
            height: y1 - y0 + 1,
        });
    }

    boxes
}

fn scale_box(text_box: TextBox, scale_x: f32, scale_y: f32, max_w: u32, max_h: u32) -> TextBox {
    let x = ((text_box.x as f32 * scale_x) as u32).min(max_w.saturating_sub(1));
    let y = ((text_box.y as f32 * scale_y) as u32).min(max_h.saturating_sub(1));
    let width = ((text_box.width as f32 * scale_x).ceil() as u32).min(max_w - x);
    let height = ((text_box.height as f32 * scale_y).ceil() as u32).min(max_h - y);
    TextBox {
        x,
        y,
        width,
        height,
    }
}

/// Sort boxes top-to-bottom, then left-to-right within a row
///
/// Boxes whose vertical centers fall within half the smaller height of each
/// other count as the same row, so detection order matches reading order.
fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        let tolerance = (a.height.min(b.height) / 2) as i64;
        let dy = a.y as i64 - b.y as i64;
        if dy.abs() <= tolerance {
            a.x.cmp(&b.x)
        } else {
            a.y.cmp(&b.y)
        }
    });
}

/// Greedy CTC decode against the character dictionary
///
/// Blank index is 0; repeats of the same raw index collapse; an index one
/// past the dictionary decodes as space. Returns None when nothing decodes.
fn ctc_decode(probs: &ArrayView2<f32>, dict: &[String]) -> Option<TextSpan> {
    let mut text = String::new();
    let mut kept_probs: Vec<f32> = Vec::new();
    let mut last_idx = 0usize;

    for row in probs.outer_iter() {
        let Some((idx, &p)) = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        else {
            continue;
        };

        if idx != 0 && idx != last_idx {
            let char_idx = idx - 1;
            if char_idx < dict.len() {
                text.push_str(&dict[char_idx]);
                kept_probs.push(p);
            } else if char_idx == dict.len() {
                text.push(' ');
                kept_probs.push(p);
            }
        }
        last_idx = idx;
    }

    let text = text.trim().to_string();
    if text.is_empty() || kept_probs.is_empty() {
        return None;
    }

    let confidence =
        (kept_probs.iter().sum::<f32>() / kept_probs.len() as f32) as f64 * 100.0;
    Some(TextSpan { text, confidence })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_det_input_size_rounds_to_32() {
        assert_eq!(det_input_size(960, 540), (960, 544));
        assert_eq!(det_input_size(100, 100), (96, 96));
        assert_eq!(det_input_size(10, 10), (32, 32));
    }

    #[test]
    fn test_det_input_size_caps_longest_side() {
        let (w, h) = det_input_size(3840, 2160);
        assert!(w <= DET_LIMIT_SIDE);
        assert!(h <= DET_LIMIT_SIDE);
        assert_eq!(w % 32, 0);
        assert_eq!(h % 32, 0);
    }

    #[test]
    fn test_tensor_normalization() {
        let image = RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));

        let rec = rec_tensor(&image);
        assert_eq!(rec.shape(), &[1, 3, 2, 2]);
        assert!((rec[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);

        let det = det_tensor(&image);
        // White pixel, red channel: (1.0 - 0.485) / 0.229
        assert!((det[[0, 0, 0, 0]] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
    }

    fn prob_map_with_blobs(blobs: &[(usize, usize, usize, usize)]) -> Array2<f32> {
        let mut map = Array2::zeros((64, 64));
        for &(y, x, h, w) in blobs {
            map.slice_mut(s![y..y + h, x..x + w]).fill(0.9);
        }
        map
    }

    #[test]
    fn test_boxes_from_prob_map_finds_blobs() {
        let map = prob_map_with_blobs(&[(8, 4, 6, 20), (40, 10, 6, 16)]);
        let boxes = boxes_from_prob_map(&map.view());
        assert_eq!(boxes.len(), 2);

        // Boxes cover their blobs after the unclip expansion
        assert!(boxes.iter().any(|b| b.x <= 4 && b.y <= 8 && b.width >= 20));
    }

    #[test]
    fn test_boxes_from_prob_map_blank_map() {
        let map = Array2::from_elem((64, 64), 0.05f32);
        assert!(boxes_from_prob_map(&map.view()).is_empty());
    }

    #[test]
    fn test_boxes_from_prob_map_drops_tiny_blobs() {
        let map = prob_map_with_blobs(&[(10, 10, 1, 1)]);
        assert!(boxes_from_prob_map(&map.view()).is_empty());
    }

    #[test]
    fn test_sort_reading_order() {
        let make = |x, y| TextBox {
            x,
            y,
            width: 40,
            height: 10,
        };
        let mut boxes = vec![make(50, 30), make(5, 31), make(5, 2)];
        sort_reading_order(&mut boxes);
        assert_eq!(boxes[0], make(5, 2));
        // Same row despite one pixel of vertical jitter
        assert_eq!(boxes[1], make(5, 31));
        assert_eq!(boxes[2], make(50, 30));
    }

    fn one_hot_rows(indices: &[usize], num_classes: usize, p: f32) -> Array2<f32> {
        let mut probs = Array2::from_elem((indices.len(), num_classes), 0.01f32);
        for (row, &idx) in indices.iter().enumerate() {
            probs[[row, idx]] = p;
        }
        probs
    }

    #[test]
    fn test_ctc_decode_collapses_repeats_and_blanks() {
        let dict: Vec<String> = ["H", "I"].iter().map(|s| s.to_string()).collect();
        // blank=0, H=1, I=2, space=3
        let probs = one_hot_rows(&[1, 1, 0, 2, 2], 4, 0.9);
        let span = ctc_decode(&probs.view(), &dict).unwrap();
        assert_eq!(span.text, "HI");
        assert!((span.confidence - 90.0).abs() < 1.0);
    }

    #[test]
    fn test_ctc_decode_blank_separated_repeat_kept() {
        let dict: Vec<String> = ["o"].iter().map(|s| s.to_string()).collect();
        let probs = one_hot_rows(&[1, 0, 1], 3, 0.8);
        let span = ctc_decode(&probs.view(), &dict).unwrap();
        assert_eq!(span.text, "oo");
    }

    #[test]
    fn test_ctc_decode_space_entry() {
        let dict: Vec<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        // space is one past the dictionary: index 3
        let probs = one_hot_rows(&[1, 3, 2], 4, 0.9);
        let span = ctc_decode(&probs.view(), &dict).unwrap();
        assert_eq!(span.text, "a b");
    }

    #[test]
    fn test_ctc_decode_all_blank_is_none() {
        let dict: Vec<String> = ["a"].iter().map(|s| s.to_string()).collect();
        let probs = one_hot_rows(&[0, 0, 0], 3, 0.99);
        assert!(ctc_decode(&probs.view(), &dict).is_none());
    }

    #[test]
    fn test_scale_box_clamps_to_frame() {
        let scaled = scale_box(
            TextBox {
                x: 30,
                y: 30,
                width: 10,
                height: 10,
            },
            2.0,
            2.0,
            70,
            70,
        );
        assert_eq!(scaled.x, 60);
        assert!(scaled.x + scaled.width <= 70);
        assert!(scaled.y + scaled.height <= 70);
    }
}
