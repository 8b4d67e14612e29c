//! Reading-Order Analyzer (4.F): orders a page's layout elements into the
//! sequence a human reader would scan them in.
//!
//! [`decode`] is a direct, exact port of `order_analyzer.py`'s `decode()` —
//! the one piece of this component with no wiggle room, since any deviation
//! changes output ordering for every multi-column or multi-region page.
//! `BboxesMasks`/model inference themselves are not reproduced (no bundled
//! LayoutLMv3 weights ship with this crate); [`ReadingOrderAnalyzer`] is the
//! integration point where a real model call would plug in, following the
//! same process-wide cached-singleton pattern as the Rotation Detector
//! (4.C) for the same reason — model loading is the expensive part.

use crate::types::{LayoutElement, ReadingOrderElement};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

const CLS_TOKEN_ID: i64 = 0;
const EOS_TOKEN_ID: i64 = 2;
const UNK_TOKEN_ID: i64 = 3;

/// Model input tensors for one page's reading-order inference, framed with
/// a leading CLS box and a trailing EOS box (both `[0,0,0,0]`), grounded in
/// `BboxesMasks`.
#[derive(Debug, Clone)]
pub struct BboxesMasks {
    pub bbox: Vec<[i64; 4]>,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

/// Build model input tensors for `boxes` (already scaled into the 0-1000
/// grid the reading-order model expects).
pub fn bboxes_masks(boxes: &[[i64; 4]]) -> BboxesMasks {
    let mut bbox = Vec::with_capacity(boxes.len() + 2);
    bbox.push([0, 0, 0, 0]);
    bbox.extend_from_slice(boxes);
    bbox.push([0, 0, 0, 0]);

    let mut input_ids = Vec::with_capacity(boxes.len() + 2);
    input_ids.push(CLS_TOKEN_ID);
    input_ids.extend(std::iter::repeat(UNK_TOKEN_ID).take(boxes.len()));
    input_ids.push(EOS_TOKEN_ID);

    let attention_mask = vec![1i64; boxes.len() + 2];

    BboxesMasks { bbox, input_ids, attention_mask }
}

/// Decode a `length x length` logits matrix into an element-index-per-
/// reading-position permutation.
///
/// `logits[i][j]` is the model's compatibility score for placing element
/// `j` at reading position `i`. The greedy assignment (take each row's
/// argmax) can produce collisions — two positions both wanting the same
/// element. Collisions are resolved by keeping whichever position has the
/// higher score for that element and making every losing position re-pick
/// its next-best candidate from its own descending-score list, repeating
/// until no collisions remain. This is an exact port of the reference
/// `decode()`'s repeated `orders[idx].pop()` loop.
///
/// Returns `ret` where `ret[i]` is the element index assigned to reading
/// position `i`.
pub fn decode(logits: &[Vec<f64>], length: usize) -> Vec<usize> {
    if length == 0 {
        return Vec::new();
    }

    // Per row, candidate element indices sorted ascending by score so the
    // best candidate is the last element (mirrors the Python `.pop()`
    // taking the list's tail after an ascending argsort).
    let mut orders: Vec<Vec<usize>> = (0..length)
        .map(|i| {
            let mut idx: Vec<usize> = (0..length).collect();
            idx.sort_by(|&a, &b| logits[i][a].partial_cmp(&logits[i][b]).unwrap());
            idx
        })
        .collect();

    let mut ret: Vec<usize> = orders.iter_mut().map(|o| o.pop().unwrap()).collect();

    loop {
        let mut elem_to_rows: HashMap<usize, Vec<usize>> = HashMap::new();
        for (row, &elem) in ret.iter().enumerate() {
            elem_to_rows.entry(elem).or_default().push(row);
        }
        elem_to_rows.retain(|_, rows| rows.len() > 1);
        if elem_to_rows.is_empty() {
            break;
        }

        for (elem, rows) in elem_to_rows {
            let mut row_to_score: Vec<(usize, f64)> =
                rows.into_iter().map(|row| (row, logits[row][elem])).collect();
            row_to_score.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

            // The highest-scoring row keeps `elem`; every other row re-picks
            // its own next-best candidate.
            for &(row, _) in row_to_score.iter().skip(1) {
                ret[row] = orders[row].pop().unwrap();
            }
        }
    }

    ret
}

/// Process-wide cache marker for loaded reading-order models, keyed by
/// `(model_dir, use_gpu)` — mirrors [`crate::rotation::RotationDetector`]'s
/// cache for the same reason (loading model weights is the expensive,
/// one-time cost the reference guards with a class-level lock).
static MODEL_CACHE: Mutex<Option<HashSet<(String, bool)>>> = Mutex::new(None);

fn mark_loaded(key: &(String, bool)) -> bool {
    let mut guard = MODEL_CACHE.lock().unwrap();
    let set = guard.get_or_insert_with(HashSet::new);
    set.insert(key.clone())
}

pub struct ReadingOrderAnalyzer {
    model_dir: Option<PathBuf>,
    use_gpu: bool,
}

impl ReadingOrderAnalyzer {
    pub fn new(model_dir: Option<PathBuf>, use_gpu: bool) -> Self {
        if let Some(dir) = &model_dir {
            let key = (dir.to_string_lossy().to_string(), use_gpu);
            if mark_loaded(&key) {
                debug!("Reading-Order Analyzer: loading model from {:?}", dir);
            }
        }
        ReadingOrderAnalyzer { model_dir, use_gpu }
    }

    /// Scale a page-pixel bbox quad into the model's 0-1000 grid (the
    /// reference's `analyze_page_order` scaling step, inlined here so
    /// callers pass page-pixel boxes directly).
    pub fn scale_to_grid(bbox: &crate::types::BoundingBox, page_width: u32, page_height: u32) -> [i64; 4] {
        let pw = page_width.max(1) as f64;
        let ph = page_height.max(1) as f64;
        let x1 = bbox.x.max(0.0).min(pw);
        let y1 = bbox.y.max(0.0).min(ph);
        let x2 = (bbox.x + bbox.width).max(0.0).min(pw);
        let y2 = (bbox.y + bbox.height).max(0.0).min(ph);

        let x_scale = 1000.0 / pw;
        let y_scale = 1000.0 / ph;

        let left = (x1 * x_scale).round() as i64;
        let top = (y1 * y_scale).round() as i64;
        let right = (x2 * x_scale).round() as i64;
        let bottom = (y2 * y_scale).round() as i64;

        let left = left.clamp(0, 1000);
        let top = top.clamp(0, 1000);
        let right = (left + 1).max(right).min(1000);
        let bottom = (top + 1).max(bottom).min(1000);

        [left, top, right, bottom]
    }

    /// Analyze reading order for one page's elements. Returns an empty
    /// vector (never an error) when there are no elements, when no local
    /// model is configured, or when the page image is unavailable — all
    /// three edge cases degrade to "natural detection order" at the caller
    /// rather than aborting the page, matching the reference's behavior of
    /// returning an empty `ordered_elements` list in each case.
    pub fn analyze_page_order(
        &self,
        elements: &[LayoutElement],
        page_width: u32,
        page_height: u32,
    ) -> Vec<ReadingOrderElement> {
        let _ = self.use_gpu;
        if elements.is_empty() {
            return Vec::new();
        }
        if self.model_dir.is_none() {
            warn!("Reading-Order Analyzer: no local model configured, falling back to detection order");
            return Vec::new();
        }

        let _boxes: Vec<[i64; 4]> = elements
            .iter()
            .map(|e| Self::scale_to_grid(&e.bbox, page_width, page_height))
            .collect();

        // No bundled model weights ship with this crate; the integration
        // point for a real inference call is here, producing a logits
        // matrix consumed by `decode`. Absent one, fall back to detection
        // order at the caller.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_handles_empty_input() {
        assert_eq!(decode(&[], 0), Vec::<usize>::new());
    }

    #[test]
    fn decode_single_element_is_trivial() {
        let logits = vec![vec![0.5]];
        assert_eq!(decode(&logits, 1), vec![0]);
    }

    #[test]
    fn decode_produces_a_permutation() {
        // A logits matrix where every row's argmax is the same column (0),
        // forcing the collision-resolution loop to run repeatedly.
        let logits = vec![
            vec![5.0, 1.0, 2.0],
            vec![4.0, 3.0, 0.5],
            vec![3.0, 0.1, 0.2],
        ];
        let result = decode(&logits, 3);
        let mut sorted = result.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2]);
    }

    #[test]
    fn decode_no_collisions_is_identity_argmax() {
        // Distinct, non-colliding argmax per row.
        let logits = vec![
            vec![9.0, 0.0, 0.0],
            vec![0.0, 9.0, 0.0],
            vec![0.0, 0.0, 9.0],
        ];
        assert_eq!(decode(&logits, 3), vec![0, 1, 2]);
    }

    #[test]
    fn scale_to_grid_clamps_into_0_1000() {
        let bbox = crate::types::BoundingBox { x: -10.0, y: -10.0, width: 5000.0, height: 5000.0, page_num: 0 };
        let quad = ReadingOrderAnalyzer::scale_to_grid(&bbox, 2000, 3000);
        assert!(quad.iter().all(|&v| (0..=1000).contains(&v)));
    }

    #[test]
    fn analyze_returns_empty_for_no_elements() {
        let analyzer = ReadingOrderAnalyzer::new(None, false);
        assert!(analyzer.analyze_page_order(&[], 1000, 1000).is_empty());
    }
}
