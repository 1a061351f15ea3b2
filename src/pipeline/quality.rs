//! Image quality assessment: scores a scan for usability before any OCR runs.
//!
//! Three sub-metrics, each normalised to 0..=1:
//! - **Blur**: Laplacian variance of the grayscale image (`v / 200`, capped).
//! - **Brightness**: distance of mean luminance from a mid-grey target of 130.
//! - **Skew**: projection-profile angle; straight pages score 0.8, skewed 0.3.
//!
//! `score = 40·blur + 30·brightness + 30·skew`, so the score can only go
//! down when any single metric gets worse. The assessor never fails: an
//! undecodable image scores 0 with a note, which the rulebook treats like
//! any other poor scan.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use serde::{Deserialize, Serialize};

use crate::models::enums::ReadabilityStatus;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Laplacian variance below this = blurry.
pub const BLUR_THRESHOLD: f32 = 100.0;

/// Laplacian variance at which the blur sub-score saturates.
const BLUR_SATURATION: f32 = 200.0;

/// Mean luminance that scores a perfect brightness.
const BRIGHTNESS_TARGET: f32 = 130.0;

/// Mean luminance outside this band is reported as an issue.
const TOO_DARK: f32 = 60.0;
const TOO_BRIGHT: f32 = 200.0;

/// Skew angle above this (degrees) counts as skewed.
pub const SKEW_THRESHOLD_DEG: f32 = 2.0;

/// Skew sub-scores.
const STRAIGHT_FACTOR: f32 = 0.8;
const SKEWED_FACTOR: f32 = 0.3;

/// Longest side analysed. Larger scans are downscaled first so phone photos
/// cost the same as flatbed scans.
const MAX_ANALYSIS_DIM: u32 = 1600;

/// Readability label thresholds.
const CLEAR_THRESHOLD: f32 = 75.0;
const PARTIAL_THRESHOLD: f32 = 50.0;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Quality assessment for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall usability, 0..=100, two decimals.
    pub score: f32,
    pub readability: ReadabilityStatus,
    /// Raw Laplacian variance. Higher = sharper.
    pub blur_variance: f32,
    pub is_blurry: bool,
    /// Mean grayscale luminance (0-255).
    pub brightness: f32,
    /// Detected skew in degrees, `None` when straight or undetectable.
    pub skew_angle: Option<f32>,
    pub is_skewed: bool,
    /// Short machine-friendly issue tags: `blurry`, `too_dark`, `too_bright`, `skewed`.
    pub issues: Vec<String>,
    /// Diagnostic note when the image could not be analysed.
    pub note: Option<String>,
}

impl QualityReport {
    /// Report for an image that could not be decoded. It counts as blurry
    /// so the severe-blur rule halts it with a re-upload request.
    pub fn unreadable(reason: &str) -> Self {
        Self {
            score: 0.0,
            readability: ReadabilityStatus::Unreadable,
            blur_variance: 0.0,
            is_blurry: true,
            brightness: 0.0,
            skew_angle: None,
            is_skewed: false,
            issues: vec!["undecodable".into()],
            note: Some(reason.to_string()),
        }
    }
}

/// Scores raw image bytes. Infallible by contract.
pub trait QualityAssessor {
    fn assess(&self, image_bytes: &[u8]) -> QualityReport;
}

// ═══════════════════════════════════════════════════════════
// ImageQualityAssessor
// ═══════════════════════════════════════════════════════════

/// Production assessor: decode → EXIF orientation → downscale → grayscale → metrics.
pub struct ImageQualityAssessor;

impl QualityAssessor for ImageQualityAssessor {
    fn assess(&self, image_bytes: &[u8]) -> QualityReport {
        let decoded = match image::load_from_memory(image_bytes) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(error = %e, "Quality: image could not be decoded");
                return QualityReport::unreadable(&format!("image could not be decoded: {e}"));
            }
        };

        let oriented = apply_orientation(decoded, read_exif_orientation(image_bytes));
        let gray = downscale(oriented).to_luma8();
        assess_gray(&gray)
    }
}

/// Compute the full report from a grayscale image.
pub fn assess_gray(gray: &GrayImage) -> QualityReport {
    if gray.width() == 0 || gray.height() == 0 {
        return QualityReport::unreadable("image has no pixels");
    }

    let blur_variance = compute_laplacian_variance(gray);
    let brightness = mean_luminance(gray);
    let skew_angle = detect_skew_angle(gray);

    let is_blurry = blur_variance < BLUR_THRESHOLD;
    let is_skewed = skew_angle.map_or(false, |a| a.abs() > SKEW_THRESHOLD_DEG);

    let score = combine_scores(
        blur_score(blur_variance),
        brightness_score(brightness),
        is_skewed,
    );

    let mut issues = Vec::new();
    if is_blurry {
        issues.push("blurry".to_string());
    }
    if brightness < TOO_DARK {
        issues.push("too_dark".to_string());
    } else if brightness > TOO_BRIGHT {
        issues.push("too_bright".to_string());
    }
    if is_skewed {
        issues.push("skewed".to_string());
    }

    QualityReport {
        score,
        readability: readability_for(score),
        blur_variance,
        is_blurry,
        brightness,
        skew_angle,
        is_skewed,
        issues,
        note: None,
    }
}

/// Blur sub-score in 0..=1.
pub fn blur_score(variance: f32) -> f32 {
    (variance / BLUR_SATURATION).clamp(0.0, 1.0)
}

/// Brightness sub-score in 0..=1, peaking at the mid-grey target.
pub fn brightness_score(mean: f32) -> f32 {
    (1.0 - (mean - BRIGHTNESS_TARGET).abs() / BRIGHTNESS_TARGET).clamp(0.0, 1.0)
}

/// Weighted combination, rounded to two decimals.
pub fn combine_scores(blur: f32, brightness: f32, is_skewed: bool) -> f32 {
    let skew = if is_skewed { SKEWED_FACTOR } else { STRAIGHT_FACTOR };
    let raw = blur * 40.0 + brightness * 30.0 + skew * 30.0;
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

pub fn readability_for(score: f32) -> ReadabilityStatus {
    if score >= CLEAR_THRESHOLD {
        ReadabilityStatus::Clear
    } else if score >= PARTIAL_THRESHOLD {
        ReadabilityStatus::PartiallyClear
    } else {
        ReadabilityStatus::Unreadable
    }
}

// ═══════════════════════════════════════════════════════════
// Image helpers
// ═══════════════════════════════════════════════════════════

fn downscale(img: DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= MAX_ANALYSIS_DIM {
        return img;
    }
    img.resize(MAX_ANALYSIS_DIM, MAX_ANALYSIS_DIM, FilterType::Triangle)
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Mean grayscale luminance.
pub fn mean_luminance(img: &GrayImage) -> f32 {
    let count = (img.width() as u64) * (img.height() as u64);
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    (sum as f64 / count as f64) as f32
}

/// Laplacian variance with the 3x3 kernel `[0,1,0; 1,-4,1; 0,1,0]`.
/// Blurry documents < 100, sharp text > 500.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let px = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;
            let laplacian =
                px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0) as f32
}

/// Detect skew angle via horizontal projection profile.
///
/// Tests candidate angles from -5 to +5 degrees in 0.25 steps; the angle
/// with the crispest row transitions wins. `None` when the image is too
/// small, has < 2% ink, or the best angle is under 0.5 degrees.
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = (img.width(), img.height());
    if w < 50 || h < 50 {
        return None;
    }

    let ink_threshold = 128u8;
    let dark_count = img.pixels().filter(|p| p.0[0] < ink_threshold).count();
    if (dark_count as f32 / (w as f32 * h as f32)) < 0.02 {
        return None;
    }

    let mut best_angle = 0.0f32;
    let mut best_score = f64::NEG_INFINITY;

    for step in 0..=40 {
        let angle = -5.0 + step as f32 * 0.25;
        let score = projection_variance(img, ink_threshold, angle);
        // Ties prefer the smaller correction
        if score > best_score || (score == best_score && angle.abs() < best_angle.abs()) {
            best_score = score;
            best_angle = angle;
        }
    }

    (best_angle.abs() >= 0.5).then_some(best_angle)
}

/// Sum of squared differences between adjacent row ink counts after
/// shearing rows by `angle_deg`. Samples every 4th column.
fn projection_variance(img: &GrayImage, threshold: u8, angle_deg: f32) -> f64 {
    let (w, h) = (img.width(), img.height());
    let tan_a = (angle_deg.to_radians()).tan() as f64;
    let mut projection = vec![0u32; h as usize];

    for y in 0..h {
        let shift = (y as f64 * tan_a).round() as i64;
        let mut count = 0u32;
        for x in (0..w).step_by(4) {
            let sx = x as i64 + shift;
            if sx >= 0 && (sx as u32) < w && img.get_pixel(sx as u32, y).0[0] < threshold {
                count += 1;
            }
        }
        projection[y as usize] = count;
    }

    projection
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as f64 - pair[0] as f64;
            diff * diff
        })
        .sum()
}

// ═══════════════════════════════════════════════════════════
// Mock
// ═══════════════════════════════════════════════════════════

/// Returns a fixed score. Used to drive pipeline scenarios in tests.
pub struct MockQualityAssessor {
    score: f32,
    is_blurry: bool,
}

impl MockQualityAssessor {
    pub fn new(score: f32) -> Self {
        Self {
            score,
            is_blurry: false,
        }
    }

    pub fn with_blur(mut self, is_blurry: bool) -> Self {
        self.is_blurry = is_blurry;
        self
    }
}

impl QualityAssessor for MockQualityAssessor {
    fn assess(&self, _image_bytes: &[u8]) -> QualityReport {
        QualityReport {
            score: self.score,
            readability: readability_for(self.score),
            blur_variance: if self.is_blurry { 20.0 } else { 400.0 },
            is_blurry: self.is_blurry,
            brightness: BRIGHTNESS_TARGET,
            skew_angle: None,
            is_skewed: false,
            issues: if self.is_blurry {
                vec!["blurry".into()]
            } else {
                Vec::new()
            },
            note: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
