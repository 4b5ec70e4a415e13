use crate::indicators::sma_series;
use serde::{Deserialize, Serialize};

/// Chart patterns recognised on smoothed closes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatternKind {
    None,
    DoubleTop,
    DoubleBottom,
    RisingWedge,
    FallingWedge,
    InverseHeadAndShoulders,
    HeadAndShoulders,
    AscendingTriangle,
    DescendingTriangle,
}

impl PatternKind {
    /// Investment contribution: 1.0 bullish, 0.0 bearish, 0.5 otherwise
    pub fn investment_signal(&self) -> f64 {
        match self {
            PatternKind::InverseHeadAndShoulders
            | PatternKind::FallingWedge
            | PatternKind::DoubleBottom
            | PatternKind::AscendingTriangle => 1.0,
            PatternKind::HeadAndShoulders
            | PatternKind::RisingWedge
            | PatternKind::DoubleTop
            | PatternKind::DescendingTriangle => 0.0,
            PatternKind::None => 0.5,
        }
    }
}

/// Winning pattern and how many bars ago its last extremum printed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub distance: usize,
}

impl PatternMatch {
    pub fn none() -> Self {
        Self {
            kind: PatternKind::None,
            distance: 0,
        }
    }
}

/// Local extremum of a smoothed series, indexed by candle bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremum {
    pub bar: usize,
    pub value: f64,
}

struct Template {
    kind: PatternKind,
    smoothing: usize,
    width: usize,
    matches: fn(&[f64]) -> bool,
}

const MIN_SPACING: usize = 2;

// Order decides ties on the ending bar.
const TEMPLATES: [Template; 8] = [
    Template {
        kind: PatternKind::InverseHeadAndShoulders,
        smoothing: 4,
        width: 5,
        matches: inverse_head_and_shoulders,
    },
    Template {
        kind: PatternKind::HeadAndShoulders,
        smoothing: 4,
        width: 5,
        matches: head_and_shoulders,
    },
    Template {
        kind: PatternKind::DescendingTriangle,
        smoothing: 5,
        width: 6,
        matches: descending_triangle,
    },
    Template {
        kind: PatternKind::AscendingTriangle,
        smoothing: 5,
        width: 6,
        matches: ascending_triangle,
    },
    Template {
        kind: PatternKind::DoubleBottom,
        smoothing: 5,
        width: 5,
        matches: double_bottom,
    },
    Template {
        kind: PatternKind::DoubleTop,
        smoothing: 5,
        width: 5,
        matches: double_top,
    },
    Template {
        kind: PatternKind::RisingWedge,
        smoothing: 3,
        width: 6,
        matches: rising_wedge,
    },
    Template {
        kind: PatternKind::FallingWedge,
        smoothing: 4,
        width: 6,
        matches: falling_wedge,
    },
];

/// Detect the most recent chart pattern in a close-price series
///
/// Every template is scanned newest window first and keeps its first hit.
/// The template whose window ends on the latest bar wins. Returns
/// `PatternMatch::none()` when nothing matches.
///
/// Distance counts from the series length back to the smoothed index of the
/// last extremum, i.e. `smoothing` bars more than the candle offset of the
/// window end.
pub fn detect_pattern(closes: &[f64]) -> PatternMatch {
    let mut best: Option<(PatternKind, usize, usize)> = None;

    for template in TEMPLATES.iter() {
        let extrema = find_extrema(closes, template.smoothing);
        if let Some(end_bar) = scan(&extrema, template) {
            match best {
                Some((_, best_bar, _)) if best_bar >= end_bar => {}
                _ => best = Some((template.kind, end_bar, template.smoothing)),
            }
        }
    }

    match best {
        Some((kind, end_bar, smoothing)) => PatternMatch {
            kind,
            distance: smoothed_distance(closes.len(), end_bar, smoothing),
        },
        None => PatternMatch::none(),
    }
}

/// Bars between the series length and the smoothed index ending on `end_bar`
fn smoothed_distance(len: usize, end_bar: usize, smoothing: usize) -> usize {
    let smoothed_index = end_bar + 1 - smoothing.max(1);
    len - smoothed_index
}

/// Strict local maxima and minima of the rolling mean of `closes`
///
/// A smoothed point maps to the last candle of its window. Plateaus are not
/// extrema. Sorted by bar.
pub fn find_extrema(closes: &[f64], smoothing: usize) -> Vec<Extremum> {
    let smoothed = sma_series(closes, smoothing);
    if smoothed.len() < 3 {
        return Vec::new();
    }

    let shift = smoothing.max(1) - 1;
    (1..smoothed.len() - 1)
        .filter(|&i| {
            let (prev, value, next) = (smoothed[i - 1], smoothed[i], smoothed[i + 1]);
            (value > prev && value > next) || (value < prev && value < next)
        })
        .map(|i| Extremum {
            bar: i + shift,
            value: smoothed[i],
        })
        .collect()
}

fn scan(extrema: &[Extremum], template: &Template) -> Option<usize> {
    if extrema.len() < template.width {
        return None;
    }

    for end in (template.width - 1..extrema.len()).rev() {
        let window = &extrema[end + 1 - template.width..=end];
        if window.windows(2).any(|w| w[1].bar - w[0].bar < MIN_SPACING) {
            continue;
        }

        let values: Vec<f64> = window.iter().map(|e| e.value).collect();
        if (template.matches)(&values) {
            return Some(window[template.width - 1].bar);
        }
    }

    None
}

fn within(x: f64, y: f64, tolerance: f64) -> bool {
    (x - y).abs() < (x + y) / 2.0 * tolerance
}

fn double_top(v: &[f64]) -> bool {
    let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);
    a < b && b > c && c < d && d > e && c < a && within(b, d, 0.005)
}

fn double_bottom(v: &[f64]) -> bool {
    let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);
    a > b && b < c && c > d && d < e && c < a && within(b, d, 0.005)
}

fn head_and_shoulders(v: &[f64]) -> bool {
    let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);
    a > b && b < c && c > d && d < e && c > a && c > e && within(b, d, 0.005)
}

fn inverse_head_and_shoulders(v: &[f64]) -> bool {
    let (a, b, c, d, e) = (v[0], v[1], v[2], v[3], v[4]);
    a < b && b > c && c < d && d > e && c < a && c < e && within(b, d, 0.005)
}

fn ascending_triangle(v: &[f64]) -> bool {
    let (a, b, c, d, e, f) = (v[0], v[1], v[2], v[3], v[4], v[5]);
    a > b
        && b < c
        && c > d
        && d < e
        && e > f
        && b < d
        && d < f
        && within(a, c, 0.01)
        && within(c, e, 0.01)
        && within(a, e, 0.01)
}

fn descending_triangle(v: &[f64]) -> bool {
    let (a, b, c, d, e, f) = (v[0], v[1], v[2], v[3], v[4], v[5]);
    a < b
        && b > c
        && c < d
        && d > e
        && e < f
        && b > d
        && d > f
        && within(a, c, 0.01)
        && within(c, e, 0.01)
        && within(a, e, 0.01)
}

fn rising_wedge(v: &[f64]) -> bool {
    v[0] < v[2] && v[2] < v[4] && v[1] < v[3] && v[3] < v[5]
}

fn falling_wedge(v: &[f64]) -> bool {
    v[0] > v[2] && v[2] > v[4] && v[1] > v[3] && v[3] > v[5]
}
