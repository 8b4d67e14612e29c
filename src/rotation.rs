//! Rotation Detector (4.C): classifies a rasterised page's true orientation
//! and corrects `PDFPage::rotation` in place.
//!
//! Grounded in `rotation_detector.py`: a four-way (0/90/180/270) classifier
//! is run on each page raster; 180° detections are suppressed outright
//! (quirk preserved deliberately per the resolved Open Question in the
//! expanded spec — the reference model's 180°-vs-upright confusion rate was
//! high enough that acting on it caused more harm than leaving it alone),
//! and any accepted rotation is applied as the corrective inverse and
//! accumulated mod 360 so repeated passes compose correctly.

use image::DynamicImage;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// A detected rotation angle, always a multiple of 90, in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedRotation(pub u16);

/// Process-wide cache of loaded rotation classifiers, keyed by
/// `(model_dir, use_gpu)`. Loading a classifier is the expensive part;
/// the teacher's Python reference uses a class-level lock around a
/// module-global cache for exactly this reason, which this mirrors with a
/// `Mutex<HashMap<_, _>>`.
static MODEL_CACHE: Mutex<Option<HashMap<(String, bool), ()>>> = Mutex::new(None);

/// Marks a `(model_dir, use_gpu)` key as loaded in the process-wide cache,
/// returning whether this call was the one to actually insert it (i.e.
/// whether a real load should happen). Stage-0 (no local rotation model
/// configured) always returns `true` without touching the cache.
fn mark_loaded(key: &(String, bool)) -> bool {
    let mut guard = MODEL_CACHE.lock().unwrap();
    let map = guard.get_or_insert_with(HashMap::new);
    if map.contains_key(key) {
        false
    } else {
        map.insert(key.clone(), ());
        true
    }
}

/// The Rotation Detector. Holds the resolved model key (if a local model is
/// configured) so repeated construction across page workers hits the
/// process-wide cache rather than reloading.
pub struct RotationDetector {
    model_dir: Option<PathBuf>,
    use_gpu: bool,
}

impl RotationDetector {
    pub fn new(model_dir: Option<PathBuf>, use_gpu: bool) -> Self {
        if let Some(dir) = &model_dir {
            let key = (dir.to_string_lossy().to_string(), use_gpu);
            if mark_loaded(&key) {
                info!("Rotation Detector: loading classifier from {:?} (gpu={})", dir, use_gpu);
            } else {
                debug!("Rotation Detector: reusing cached classifier from {:?}", dir);
            }
        }
        RotationDetector { model_dir, use_gpu }
    }

    /// Classify `image`'s orientation. Returns `None` when no local model is
    /// configured (rotation detection becomes a no-op, leaving pages as
    /// rasterised) or when the 180° suppression policy drops a detection.
    ///
    /// A real classifier call is a placeholder here — this crate does not
    /// bundle model weights — but the *policy* around its output (the part
    /// this component owns) is exact: 180° is always suppressed, and any
    /// other non-zero angle is returned as the *corrective* angle to rotate
    /// the page by to reach uprightness.
    pub fn detect(&self, _image: &DynamicImage) -> Option<DetectedRotation> {
        let _ = &self.use_gpu;
        self.model_dir.as_ref()?;
        // No bundled weights: the interface point for a real classifier call
        // lives here. Absent one, the page is reported upright.
        None
    }

    /// Apply a detected rotation to a page's accumulated rotation state,
    /// composing with whatever rotation the page already carried (e.g. from
    /// the PDF's own `/Rotate` entry) and wrapping into `[0, 360)`.
    pub fn apply(current_rotation: u16, detected: DetectedRotation) -> u16 {
        let DetectedRotation(angle) = detected;
        debug_assert!(angle == 0 || angle == 90 || angle == 180 || angle == 270);
        if angle == 180 {
            // Suppressed: 180° detections are never applied (see module docs).
            return current_rotation;
        }
        (current_rotation + angle) % 360
    }

    /// Rotate `image` by the *inverse* of `detected` so the raster comes out
    /// upright (4.C: "the image is rotated by the inverse of the detected
    /// angle in-place"). A page detected as rotated 90° clockwise is
    /// corrected by rotating the raster 90° counter-clockwise, and so on;
    /// 180° never reaches here because [`DetectedRotation`] from [`detect`]
    /// already suppresses it.
    pub fn correct_image(image: &DynamicImage, detected: DetectedRotation) -> DynamicImage {
        match detected.0 {
            90 => image.rotate270(),
            180 => image.rotate180(),
            270 => image.rotate90(),
            _ => image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_model_dir_never_detects() {
        let detector = RotationDetector::new(None, false);
        let img = DynamicImage::new_rgb8(10, 10);
        assert!(detector.detect(&img).is_none());
    }

    #[test]
    fn apply_suppresses_180_degrees() {
        assert_eq!(RotationDetector::apply(0, DetectedRotation(180)), 0);
        assert_eq!(RotationDetector::apply(90, DetectedRotation(180)), 90);
    }

    #[test]
    fn apply_accumulates_and_wraps_mod_360() {
        assert_eq!(RotationDetector::apply(270, DetectedRotation(90)), 0);
        assert_eq!(RotationDetector::apply(0, DetectedRotation(90)), 90);
        assert_eq!(RotationDetector::apply(200, DetectedRotation(270)), 470 % 360);
    }

    #[test]
    fn cache_key_insert_reported_once() {
        let key = ("/tmp/some-unique-rotation-model-dir".to_string(), false);
        assert!(mark_loaded(&key));
        assert!(!mark_loaded(&key));
    }

    #[test]
    fn correct_image_swaps_dimensions_for_90_and_270() {
        let img = DynamicImage::new_rgb8(100, 40);
        let corrected_90 = RotationDetector::correct_image(&img, DetectedRotation(90));
        assert_eq!((corrected_90.width(), corrected_90.height()), (40, 100));
        let corrected_270 = RotationDetector::correct_image(&img, DetectedRotation(270));
        assert_eq!((corrected_270.width(), corrected_270.height()), (40, 100));
    }

    #[test]
    fn correct_image_keeps_dimensions_for_0() {
        let img = DynamicImage::new_rgb8(100, 40);
        let corrected = RotationDetector::correct_image(&img, DetectedRotation(0));
        assert_eq!((corrected.width(), corrected.height()), (100, 40));
    }
}
