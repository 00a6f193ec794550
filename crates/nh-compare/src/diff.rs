//! Channel comparison results and the screen, cell and event comparators.
//!
//! Every comparator is a pure function `(actual, expected) -> ChannelResult`.
//! None of them fail: short or missing sequences lower `matched` and surface a
//! divergence at the first absent position.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::rng::strip_source_tag;
use crate::trace::Cell;

/// One dimension of comparison.
///
/// Declaration order is report order, and the order in which a session's
/// first divergence is picked.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Rng,
    Screen,
    Color,
    Event,
    Animation,
}

/// A pair of normalized entries next to a divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub index: usize,
    pub actual: Option<String>,
    pub expected: Option<String>,
}

/// The first point where two channel sequences disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub channel: Channel,
    /// Position in the normalized sequence.
    pub index: usize,
    /// 1-based input step (0 = startup), when the channel is stepwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<usize>,
    /// `None` when the actual sequence ended before `index`.
    pub actual: Option<String>,
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_expected: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actual_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextEntry>,
}

impl Divergence {
    pub fn new(
        channel: Channel,
        index: usize,
        actual: Option<String>,
        expected: Option<String>,
    ) -> Self {
        Self {
            channel,
            index,
            step: None,
            row: None,
            col: None,
            actual,
            expected,
            raw_actual: None,
            raw_expected: None,
            actual_stack: Vec::new(),
            expected_stack: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn at_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }
}

impl core::fmt::Display for Divergence {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} divergence at index {}", self.channel, self.index)?;
        if let Some(step) = self.step {
            write!(f, " (step {})", step)?;
        }
        if let (Some(row), Some(col)) = (self.row, self.col) {
            write!(f, " [row {}, col {}]", row, col)?;
        } else if let Some(row) = self.row {
            write!(f, " [row {}]", row)?;
        }
        write!(
            f,
            ": actual={} expected={}",
            self.actual.as_deref().unwrap_or("(missing)"),
            self.expected.as_deref().unwrap_or("(missing)")
        )
    }
}

/// Matched/total counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub matched: u64,
    pub total: u64,
}

impl ChannelMetrics {
    pub fn new(matched: u64, total: u64) -> Self {
        Self { matched, total }
    }

    pub fn is_complete(&self) -> bool {
        self.matched == self.total
    }

    pub fn add(&mut self, other: ChannelMetrics) {
        self.matched += other.matched;
        self.total += other.total;
    }

    /// `matched/total`, or `-` when nothing was compared.
    pub fn fraction(&self) -> String {
        if self.total == 0 {
            "-".to_string()
        } else {
            format!("{}/{}", self.matched, self.total)
        }
    }
}

/// Outcome of comparing one channel.
///
/// Invariants: `matched <= total`, and `first_divergence` is `None` exactly
/// when `matched == total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub matched: u64,
    pub total: u64,
    #[serde(rename = "match")]
    pub is_match: bool,
    pub first_divergence: Option<Divergence>,
}

impl ChannelResult {
    pub fn new(matched: u64, total: u64, first_divergence: Option<Divergence>) -> Self {
        debug_assert!(matched <= total);
        debug_assert_eq!(first_divergence.is_none(), matched == total);
        Self {
            matched,
            total,
            is_match: matched == total,
            first_divergence,
        }
    }

    /// Nothing compared.
    pub fn empty() -> Self {
        Self::new(0, 0, None)
    }

    pub fn metrics(&self) -> ChannelMetrics {
        ChannelMetrics::new(self.matched, self.total)
    }

    /// Fold another result into this one, keeping the earliest divergence.
    pub fn accumulate(&mut self, other: ChannelResult) {
        self.matched += other.matched;
        self.total += other.total;
        if self.first_divergence.is_none() {
            self.first_divergence = other.first_divergence;
        }
        self.is_match = self.matched == self.total;
    }
}

/// A differing screen row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff {
    pub row: usize,
    pub actual: String,
    pub expected: String,
}

/// Strip trailing padding from a rendered line.
pub fn normalize_screen_line(line: &str) -> &str {
    line.trim_end()
}

/// Every differing row, trailing-whitespace-insensitive.
pub fn screen_diffs(actual: &[String], expected: &[String]) -> Vec<LineDiff> {
    let rows = actual.len().max(expected.len());
    (0..rows)
        .filter_map(|row| {
            let a = normalize_screen_line(actual.get(row).map_or("", String::as_str));
            let e = normalize_screen_line(expected.get(row).map_or("", String::as_str));
            (a != e).then(|| LineDiff {
                row,
                actual: a.to_string(),
                expected: e.to_string(),
            })
        })
        .collect()
}

/// Compare two screens line by line.
///
/// A row missing on one side compares as an empty line.
pub fn compare_screen_lines(actual: &[String], expected: &[String]) -> ChannelResult {
    let total = actual.len().max(expected.len());
    let diffs = screen_diffs(actual, expected);
    let first = diffs.first().map(|d| {
        let mut div = Divergence::new(
            Channel::Screen,
            d.row,
            Some(d.actual.clone()),
            Some(d.expected.clone()),
        );
        div.row = Some(d.row);
        div.raw_actual = actual.get(d.row).cloned();
        div.raw_expected = expected.get(d.row).cloned();
        div
    });
    ChannelResult::new((total - diffs.len()) as u64, total as u64, first)
}

/// Compare two decoded cell grids position by position.
///
/// Rows and columns missing on one side compare as blank cells, the same way
/// trailing padding is ignored for screen text.
pub fn compare_cells(actual: &[Vec<Cell>], expected: &[Vec<Cell>]) -> ChannelResult {
    let blank = Cell::blank();
    let rows = actual.len().max(expected.len());
    let mut matched = 0u64;
    let mut total = 0u64;
    let mut first = None;

    for row in 0..rows {
        let a_row = actual.get(row).map_or(&[][..], Vec::as_slice);
        let e_row = expected.get(row).map_or(&[][..], Vec::as_slice);
        let cols = a_row.len().max(e_row.len());
        for col in 0..cols {
            let a = a_row.get(col).unwrap_or(&blank);
            let e = e_row.get(col).unwrap_or(&blank);
            if a == e {
                matched += 1;
            } else if first.is_none() {
                let mut div = Divergence::new(
                    Channel::Color,
                    total as usize,
                    Some(a.to_string()),
                    Some(e.to_string()),
                );
                div.row = Some(row);
                div.col = Some(col);
                first = Some(div);
            }
            total += 1;
        }
    }

    ChannelResult::new(matched, total, first)
}

/// True for call-stack enter (`>name`) and exit (`<name`) markers.
pub fn is_boundary_marker(entry: &str) -> bool {
    entry.starts_with('>') || entry.starts_with('<')
}

/// Enter/exit markers of a raw RNG log, source tags stripped.
pub fn boundary_events(rng: &[String]) -> Vec<String> {
    rng.iter()
        .map(|e| strip_source_tag(e))
        .filter(|e| is_boundary_marker(e))
        .map(str::to_string)
        .collect()
}

/// Compare two semantic event streams index by index.
pub fn compare_events(actual: &[String], expected: &[String]) -> ChannelResult {
    let total = actual.len().max(expected.len());
    let mut matched = 0u64;
    let mut first = None;
    for i in 0..total {
        let a = actual.get(i);
        let e = expected.get(i);
        if a.is_some() && a == e {
            matched += 1;
        } else if first.is_none() {
            first = Some(Divergence::new(Channel::Event, i, a.cloned(), e.cloned()));
        }
    }
    ChannelResult::new(matched, total as u64, first)
}

/// Render a divergence for the console.
pub fn format_divergence(divergence: Option<&Divergence>) -> String {
    let Some(d) = divergence else {
        return "No divergence".to_string();
    };

    let mut header = format!("First {} divergence at index {}", d.channel, d.index);
    if let Some(step) = d.step {
        header.push_str(&format!(" (step {})", step));
    }
    header.push(':');
    let mut lines = vec![header];
    lines.push(format!("  Actual:   {}", d.actual.as_deref().unwrap_or("(missing)")));
    lines.push(format!("  Expected: {}", d.expected.as_deref().unwrap_or("(missing)")));
    if let Some(raw) = &d.raw_actual {
        lines.push(format!("  Actual (raw):   {}", raw));
    }
    if let Some(raw) = &d.raw_expected {
        lines.push(format!("  Expected (raw): {}", raw));
    }
    if !d.actual_stack.is_empty() {
        lines.push(format!("  Actual stack:   {}", d.actual_stack.join(" ")));
    }
    if !d.expected_stack.is_empty() {
        lines.push(format!("  Expected stack: {}", d.expected_stack.join(" ")));
    }
    if !d.context.is_empty() {
        lines.push("  Context:".to_string());
        for entry in &d.context {
            let a = entry.actual.as_deref().unwrap_or("(missing)");
            let e = entry.expected.as_deref().unwrap_or("(missing)");
            let mark = if a == e { '=' } else { '!' };
            lines.push(format!("    [{}] {} {}", entry.index, mark, a));
            if a != e {
                lines.push(format!("        {} {}", mark, e));
            }
        }
    }
    lines.join("\n")
}

/// Render screen differences, showing at most `max_diffs` rows.
pub fn format_screen_diff(actual: &[String], expected: &[String], max_diffs: usize) -> String {
    let diffs = screen_diffs(actual, expected);
    if diffs.is_empty() {
        return "Screens match".to_string();
    }
    let total = actual.len().max(expected.len());
    let mut lines = vec![format!(
        "Screen mismatch: {}/{} lines match",
        total - diffs.len(),
        total
    )];
    for d in diffs.iter().take(max_diffs) {
        lines.push(format!("  Row {}:", d.row));
        lines.push(format!("    Actual:   \"{}\"", d.actual));
        lines.push(format!("    Expected: \"{}\"", d.expected));
    }
    if diffs.len() > max_diffs {
        lines.push(format!("  ... and {} more differences", diffs.len() - max_diffs));
    }
    lines.join("\n")
}
