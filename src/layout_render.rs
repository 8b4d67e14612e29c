//! Adaptive Layout Renderer (4.N): the layout-preserving translator's core.
//! Given a source region's bounding box, font size, language, and
//! translated text, chooses a font size, line height, and line-wrapping
//! that fit the translated text back into the original box without
//! clipping, then paints it onto a raster the composer can paste back into
//! the page.
//!
//! Every constant here — the per-language line-height ratios, the CJK
//! prohibited-line-start set, and the math-width heuristic's bonus/penalty
//! table — is grounded in `adaptive_layout.py`. None of it is guessable
//! from the distilled spec alone; §4.N calls the Python reference out by
//! name precisely because this module has the highest ratio of "exact
//! constant" to "algorithm shape" of anything in the crate.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// A source text region: its box in page-pixel coordinates, the source
/// font size, and the language the translated text is in.
#[derive(Debug, Clone)]
pub struct Region {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub source_font_size: f64,
    pub language: String,
}

impl Region {
    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }
    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// One line of the wrapped, fitted layout — a sequence of text/math parts
/// in painting order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinePart {
    Text(String),
    Math(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WrappedLine {
    pub parts: Vec<LinePart>,
}

impl WrappedLine {
    /// The line's plain-text content, math spans included verbatim
    /// (delimiters and all) — used for width bookkeeping and tests.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                LinePart::Text(t) => t.clone(),
                LinePart::Math(m) => m.clone(),
            })
            .collect()
    }

    pub fn has_math(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, LinePart::Math(_)))
    }
}

/// The committed fit for one region: final font size, line height, and
/// wrapped lines (4.N steps 1-5).
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    pub font_size: f64,
    pub line_height: f64,
    pub lines: Vec<WrappedLine>,
}

/// Per-language line-height ratio (4.N), grounded in `adaptive_layout.py`'s
/// `LANG_LH` table. Unlisted languages fall back to the English ratio.
const DEFAULT_LH_RATIO: f64 = 1.1;

fn lang_lh_ratio(language: &str) -> f64 {
    match language {
        "zh" | "zh-cn" | "zh-en-mixed" | "简体中文" | "繁体中文" => 1.2,
        "ja" | "日语" => 1.0,
        "ko" | "한국어" | "韩语" => 1.1,
        "en" | "英语" | "英文" => 1.1,
        "ar" | "阿拉伯语" => 1.0,
        "ru" | "俄语" => 0.9,
        "uk" | "乌克兰语" => 0.9,
        "th" | "泰语" => 0.9,
        _ => DEFAULT_LH_RATIO,
    }
}

/// Characters that may never open a line (4.N), grounded in
/// `adaptive_layout.py`'s prohibited-line-start set: CJK closing
/// punctuation plus ASCII/"smart" quote glyphs.
static CJK_PROHIBITED_START: Lazy<HashSet<char>> = Lazy::new(|| {
    "，。！？；：、）】》％‰″℃」』〉〕〗〙〛︶︸︺︼︾﹀﹂﹄﹚﹜﹞）］｝\u{201C}\u{201D}\u{2018}\u{2019}\"'"
        .chars()
        .collect()
});

fn is_prohibited_line_start(c: char) -> bool {
    CJK_PROHIBITED_START.contains(&c)
}

/// Matches an atomic math span: `$$...$$` (display) or `$...$` (inline).
/// Display spans are matched first so a `$$` pair isn't misread as two
/// adjacent empty inline spans.
static MATH_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\$[^$]+\$\$|\$[^$]+\$").unwrap());

/// One token of the text to wrap: either a run of plain characters or an
/// atomic math span that must never be split across lines.
enum Token {
    Char(char),
    Math(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for m in MATH_SPAN_RE.find_iter(text) {
        for c in text[last_end..m.start()].chars() {
            tokens.push(Token::Char(c));
        }
        tokens.push(Token::Math(m.as_str().to_string()));
        last_end = m.end();
    }
    for c in text[last_end..].chars() {
        tokens.push(Token::Char(c));
    }
    tokens
}

/// Estimate a plain character's rendered width at `size` (heuristic
/// character-width model used for wrap decisions — see module docs: this
/// crate does not carry a bundled font, so line-breaking and final glyph
/// painting use separate width sources by design; painting uses real
/// glyph advances from the font actually selected at render time).
fn char_width(c: char, size: f64) -> f64 {
    if c.is_whitespace() {
        size * 0.3
    } else if (0x4E00..=0x9FFF).contains(&(c as u32)) || (0x3000..=0x303F).contains(&(c as u32)) {
        size // CJK ideographs/punctuation are roughly square.
    } else {
        size * 0.5 // Latin-ish average advance.
    }
}

/// Estimate an atomic math span's rendered width at `size` (4.N: "Inline
/// math spans are atomic; an estimated width is computed that discounts
/// LaTeX control tokens... and then compared whole against remaining line
/// width").
///
/// Grounded exactly in `adaptive_layout.py`'s formula-width heuristic: walk
/// the stripped body, give bonus "visible width" credit to a handful of
/// named commands, skip grouping/sub/superscript control characters and
/// whitespace, then apply three post-adjustments before scaling to pixels.
pub fn estimate_math_width(span: &str, size: f64) -> f64 {
    let body = span.trim_start_matches('$').trim_end_matches('$');
    let chars: Vec<char> = body.chars().collect();

    let mut visible = 0.0f64;
    let mut has_frac = false;
    let mut has_sqrt = false;
    let mut has_subsup = false;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].is_ascii_alphabetic() {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                visible += command_bonus(&name);
                if name == "frac" {
                    has_frac = true;
                }
                if name == "sqrt" {
                    has_sqrt = true;
                }
                i = end.max(i + 1);
                continue;
            }
            '{' | '}' => {
                i += 1;
                continue;
            }
            '_' | '^' => {
                has_subsup = true;
                i += 1;
                continue;
            }
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            _ => {
                visible += 1.0;
                i += 1;
            }
        }
    }

    if has_frac {
        visible = (visible * 0.7).max(5.0);
    }
    if has_sqrt {
        visible += 2.0;
    }
    if has_subsup {
        visible *= 0.9;
    }

    (visible * size * 0.8).max(size * 2.0)
}

/// Bonus "visible width" credit for a LaTeX command name (4.N table):
/// large operators/functions get the biggest credit since they render wide
/// regardless of how few characters their name takes; structural commands
/// and Greek letters get a smaller flat credit.
fn command_bonus(name: &str) -> f64 {
    const BIG: &[&str] = &["sum", "int", "lim", "sin", "cos", "tan", "log", "exp"];
    const STRUCTURAL: &[&str] = &["frac", "sqrt", "left", "right"];
    const SMALL: &[&str] = &[
        "pm", "mp", "pi", "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta",
        "vartheta", "iota", "kappa", "lambda", "mu", "nu", "xi", "omicron", "rho", "varrho",
        "sigma", "varsigma", "tau", "upsilon", "phi", "varphi", "chi", "psi", "omega", "Gamma",
        "Delta", "Theta", "Lambda", "Xi", "Pi", "Sigma", "Upsilon", "Phi", "Psi", "Omega",
    ];

    if BIG.contains(&name) {
        3.0
    } else if STRUCTURAL.contains(&name) {
        1.0
    } else if SMALL.contains(&name) {
        1.0
    } else {
        0.0
    }
}

/// Wrap `text` at `max_width` pixels, character-level, honoring the CJK
/// prohibited-line-start rule and treating math spans as atomic (4.N step
/// 2). Idempotent: re-wrapping an already-wrapped paragraph (newlines
/// collapsed to spaces first) produces the same line set (§8).
pub fn wrap_text(text: &str, max_width: f64, size: f64) -> Vec<WrappedLine> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let tokens = tokenize(&normalized);

    let mut lines: Vec<WrappedLine> = Vec::new();
    let mut current = WrappedLine::default();
    let mut current_width = 0.0;
    let mut current_text_buf = String::new();

    macro_rules! flush_text_buf {
        () => {
            if !current_text_buf.is_empty() {
                current.parts.push(LinePart::Text(std::mem::take(&mut current_text_buf)));
            }
        };
    }

    for token in tokens {
        match token {
            Token::Char(c) => {
                let w = char_width(c, size);
                if current_width + w > max_width && !current.parts.is_empty() || !current_text_buf.is_empty() && current_width + w > max_width {
                    if is_prohibited_line_start(c) {
                        // Never let this character start a line: keep it on
                        // the current (overflowing) line instead.
                        current_text_buf.push(c);
                        current_width += w;
                        continue;
                    }
                    flush_text_buf!();
                    lines.push(std::mem::take(&mut current));
                    current_width = 0.0;
                }
                current_text_buf.push(c);
                current_width += w;
            }
            Token::Math(span) => {
                let w = estimate_math_width(&span, size);
                if current_width + w > max_width && (current_width > 0.0 || !current_text_buf.is_empty()) {
                    flush_text_buf!();
                    lines.push(std::mem::take(&mut current));
                    current_width = 0.0;
                }
                flush_text_buf!();
                current.parts.push(LinePart::Math(span));
                current_width += w;
            }
        }
    }
    flush_text_buf!();
    if !current.parts.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(WrappedLine::default());
    }
    lines
}

/// Run the full fit algorithm for one region (4.N steps 1-5): wrap at the
/// source size, then compress line height or shrink the font until the
/// wrapped text's total height fits the box (or the font hits its floor).
pub fn fit_region(region: &Region, translated_text: &str) -> LayoutPlan {
    let lh_ratio = lang_lh_ratio(&region.language);
    let max_width = 0.95 * region.width();
    let box_height = region.height();

    let mut size = region.source_font_size;
    let mut lines = wrap_text(translated_text, max_width, size);
    let mut line_height = size * lh_ratio;

    let n = lines.len().max(1) as f64;
    let required_height = n * line_height;

    if required_height > box_height {
        let compressed_lh = box_height / n;
        if compressed_lh >= size * 0.9 {
            line_height = compressed_lh;
        } else {
            let min_size = size * 0.5;
            let candidate = (box_height / (n * lh_ratio)).clamp(min_size, size);
            size = candidate;
            lines = wrap_text(translated_text, max_width, size);
            let n2 = lines.len().max(1) as f64;
            line_height = box_height / n2;
        }
    }

    LayoutPlan { font_size: size, line_height, lines }
}

/// Baseline placement for an inline math image pasted alongside text on
/// line `i` (4.N step 6), clamped so the math image never sits above the
/// text baseline it accompanies.
pub fn math_baseline_y(line_top_y: f64, font_size: f64, math_image_height: f64) -> f64 {
    let y = line_top_y + (font_size * 0.7).floor() - math_image_height + (font_size * 0.15).floor();
    y.max(line_top_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_lh_ratio_matches_table() {
        assert_eq!(lang_lh_ratio("zh-cn"), 1.2);
        assert_eq!(lang_lh_ratio("en"), 1.1);
        assert_eq!(lang_lh_ratio("ru"), 0.9);
        assert_eq!(lang_lh_ratio("ja"), 1.0);
        assert_eq!(lang_lh_ratio("unknown-lang"), DEFAULT_LH_RATIO);
    }

    #[test]
    fn cjk_prohibited_punctuation_never_starts_a_line() {
        // "他说：你好，世界！" wrapped narrowly should never start a line
        // with "，" or "！" (§8 scenario 2).
        let lines = wrap_text("他说：你好，世界！", 4.0 * 10.0, 10.0);
        for line in &lines {
            if let Some(LinePart::Text(t)) = line.parts.first() {
                let first = t.chars().next().unwrap();
                assert!(!is_prohibited_line_start(first), "line started with prohibited char: {t:?}");
            }
        }
    }

    #[test]
    fn math_span_is_never_split_across_lines() {
        let text = "The sum is $\\sum_{i=1}^n x_i$ and it converges.";
        let lines = wrap_text(text, 24.0 * 6.0, 12.0);
        let math_occurrences: usize = lines
            .iter()
            .flat_map(|l| l.parts.iter())
            .filter(|p| matches!(p, LinePart::Math(_)))
            .count();
        assert_eq!(math_occurrences, 1);
        let full: String = lines.iter().map(|l| l.plain_text()).collect::<Vec<_>>().join("");
        assert!(full.contains("$\\sum_{i=1}^n x_i$"));
    }

    #[test]
    fn wrap_is_idempotent() {
        let text = "A reasonably long sentence that should wrap onto more than one line for this test.";
        let first = wrap_text(text, 200.0, 14.0);
        let rejoined = first.iter().map(|l| l.plain_text()).collect::<Vec<_>>().join(" ");
        let second = wrap_text(&rejoined, 200.0, 14.0);
        let first_texts: Vec<String> = first.iter().map(|l| l.plain_text()).collect();
        let second_texts: Vec<String> = second.iter().map(|l| l.plain_text()).collect();
        assert_eq!(first_texts, second_texts);
    }

    #[test]
    fn estimate_math_width_gives_large_operators_a_bonus() {
        let plain = estimate_math_width("$x$", 10.0);
        let with_sum = estimate_math_width("$\\sum x$", 10.0);
        assert!(with_sum > plain);
    }

    #[test]
    fn estimate_math_width_floors_fractions() {
        let w = estimate_math_width("$\\frac{1}{2}$", 10.0);
        assert!(w >= 10.0 * 2.0); // floor via max(size*2)
    }

    #[test]
    fn fit_region_keeps_font_size_when_it_already_fits() {
        let region = Region { x0: 0.0, y0: 0.0, x1: 500.0, y1: 500.0, source_font_size: 12.0, language: "en".to_string() };
        let plan = fit_region(&region, "Short text.");
        assert_eq!(plan.font_size, 12.0);
    }

    #[test]
    fn fit_region_compresses_line_height_before_shrinking_font() {
        let region = Region { x0: 0.0, y0: 0.0, x1: 80.0, y1: 40.0, source_font_size: 12.0, language: "en".to_string() };
        let plan = fit_region(&region, "This is a somewhat long sentence that needs multiple lines to fit.");
        assert!(plan.line_height <= 12.0 * 1.1);
        let n = plan.lines.len() as f64;
        assert!(n * plan.line_height <= region.height() * 1.10);
    }

    #[test]
    fn fit_region_never_shrinks_font_below_half() {
        let region = Region { x0: 0.0, y0: 0.0, x1: 60.0, y1: 15.0, source_font_size: 20.0, language: "en".to_string() };
        let plan = fit_region(
            &region,
            "An extremely long run of translated text that will never fit inside such a tiny box no matter how much it shrinks.",
        );
        assert!(plan.font_size >= 20.0 * 0.5 - 1e-9);
        assert!(plan.font_size <= 20.0);
    }

    #[test]
    fn math_baseline_never_goes_above_line_top() {
        let y = math_baseline_y(100.0, 12.0, 40.0);
        assert!(y >= 100.0);
    }

    #[test]
    fn math_baseline_matches_formula_for_small_images() {
        // size=10: floor(10*0.7)=7, floor(10*0.15)=1; image height 3 -> 100+7-3+1=105
        let y = math_baseline_y(100.0, 10.0, 3.0);
        assert_eq!(y, 105.0);
    }
}
