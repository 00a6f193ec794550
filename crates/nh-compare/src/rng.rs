//! RNG trace normalization and comparison.
//!
//! Raw RNG logs interleave three kinds of entries in one stream:
//!
//! - primitive calls, e.g. `rn2(10)=5 @ mon.c:123`
//! - composite calls (`rne(`, `rnz(`, `d(`) that summarize primitives which
//!   are also logged individually
//! - call-boundary markers (`>func`, `<func`) and `^` annotations
//!
//! Only primitives are compared. Composite entries would count the same
//! randomness twice, and markers belong to the event channel. When the
//! normalized streams diverge, the raw entries and enclosing `>` markers are
//! recovered from the un-normalized logs.

use crate::diff::{Channel, ChannelResult, ContextEntry, Divergence};

/// Prefixes of composite entries dropped by default.
pub const COMPOSITE_PREFIXES: &[&str] = &["rne(", "rnz(", "d("];

/// How many enclosing enter markers are attached to a divergence.
pub const STACK_DEPTH: usize = 3;

/// Normalization switches for the RNG comparator.
#[derive(Debug, Clone)]
pub struct RngOptions {
    pub ignore_markers: bool,
    pub ignore_composite: bool,
    pub composite_prefixes: Vec<String>,
    /// Normalized entries of context to attach on each side of a divergence.
    pub context: usize,
}

impl Default for RngOptions {
    fn default() -> Self {
        Self {
            ignore_markers: true,
            ignore_composite: true,
            composite_prefixes: COMPOSITE_PREFIXES.iter().map(|p| p.to_string()).collect(),
            context: 0,
        }
    }
}

impl RngOptions {
    pub fn with_context(mut self, context: usize) -> Self {
        self.context = context;
        self
    }

    fn is_composite(&self, entry: &str) -> bool {
        self.composite_prefixes.iter().any(|p| entry.starts_with(p.as_str()))
    }

    /// Whether a stripped entry takes part in value comparison.
    fn keeps(&self, entry: &str) -> bool {
        if entry.is_empty() {
            return false;
        }
        if self.ignore_markers && is_marker(entry) {
            return false;
        }
        if self.ignore_composite && self.is_composite(entry) {
            return false;
        }
        true
    }
}

/// Enter/exit markers and `^` annotations.
pub fn is_marker(entry: &str) -> bool {
    matches!(entry.as_bytes().first(), Some(b'>' | b'<' | b'^'))
}

/// Drop leading `NNN ` sequence numbers.
fn strip_sequence_prefix(mut entry: &str) -> &str {
    loop {
        let digits = entry.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return entry;
        }
        let rest = &entry[digits..];
        let trimmed = rest.trim_start();
        if trimmed.len() == rest.len() {
            // digits not followed by whitespace are part of the entry
            return entry;
        }
        entry = trimmed;
    }
}

/// Remove the sequence number prefix and the ` @ file:line` source tag.
pub fn strip_source_tag(entry: &str) -> &str {
    let body = strip_sequence_prefix(entry);
    let body = match body.find(" @") {
        Some(at) => &body[..at],
        None => body,
    };
    body.trim_end()
}

/// Normalized entries paired with their index in the raw log.
fn normalize_indexed<'a>(entries: &'a [String], options: &RngOptions) -> Vec<(usize, &'a str)> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i, strip_source_tag(e)))
        .filter(|(_, e)| options.keeps(e))
        .collect()
}

/// The comparable primitive stream of a raw RNG log.
pub fn normalize_rng(entries: &[String], options: &RngOptions) -> Vec<String> {
    normalize_indexed(entries, options)
        .into_iter()
        .map(|(_, e)| e.to_string())
        .collect()
}

/// Up to `max_depth` enter markers preceding `raw_index`, outermost first.
pub fn call_stack(raw: &[String], raw_index: usize, max_depth: usize) -> Vec<String> {
    let mut stack: Vec<String> = raw[..raw_index.min(raw.len())]
        .iter()
        .rev()
        .filter(|e| strip_sequence_prefix(e).starts_with('>'))
        .take(max_depth)
        .cloned()
        .collect();
    stack.reverse();
    stack
}

/// Compare two raw RNG logs over their normalized primitive streams.
///
/// `total` is the longer normalized length and `matched` counts positions
/// that agree.
pub fn compare_rng(actual: &[String], expected: &[String], options: &RngOptions) -> ChannelResult {
    let a = normalize_indexed(actual, options);
    let e = normalize_indexed(expected, options);
    let total = a.len().max(e.len());

    let mut matched = 0u64;
    let mut first: Option<usize> = None;
    for i in 0..total {
        match (a.get(i), e.get(i)) {
            (Some((_, x)), Some((_, y))) if x == y => matched += 1,
            _ => {
                if first.is_none() {
                    first = Some(i);
                }
            }
        }
    }

    let divergence = first.map(|index| {
        let mut div = Divergence::new(
            Channel::Rng,
            index,
            a.get(index).map(|(_, s)| s.to_string()),
            e.get(index).map(|(_, s)| s.to_string()),
        );
        if let Some(&(raw, _)) = a.get(index) {
            div.raw_actual = Some(actual[raw].clone());
            div.actual_stack = call_stack(actual, raw, STACK_DEPTH);
        }
        if let Some(&(raw, _)) = e.get(index) {
            div.raw_expected = Some(expected[raw].clone());
            div.expected_stack = call_stack(expected, raw, STACK_DEPTH);
        }
        if options.context > 0 {
            let start = index.saturating_sub(options.context);
            let end = (index + options.context + 1).min(total);
            div.context = (start..end)
                .filter(|&i| i != index)
                .map(|i| ContextEntry {
                    index: i,
                    actual: a.get(i).map(|(_, s)| s.to_string()),
                    expected: e.get(i).map(|(_, s)| s.to_string()),
                })
                .collect();
        }
        div
    });

    ChannelResult::new(matched, total as u64, divergence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_source_tag_forms() {
        assert_eq!(strip_source_tag("rn2(10)=5 @a:1"), "rn2(10)=5");
        assert_eq!(strip_source_tag("1 rn2(10)=5 @ hack.c:123"), "rn2(10)=5");
        assert_eq!(strip_source_tag("rnd(6)=3"), "rnd(6)=3");
        assert_eq!(strip_source_tag("12 >dog_move @ dogmove.c:1"), ">dog_move");
        assert_eq!(strip_source_tag("100"), "100");
        assert_eq!(strip_source_tag("7 12 rn2(3)=1"), "rn2(3)=1");
    }

    #[test]
    fn test_identical_logs_match() {
        let trace = log(&["rn2(10)=5", "rnd(6)=3"]);
        let result = compare_rng(&trace, &trace, &RngOptions::default());
        assert_eq!(result.matched, 2);
        assert_eq!(result.total, 2);
        assert!(result.first_divergence.is_none());
    }

    #[test]
    fn test_source_tags_do_not_matter() {
        let result = compare_rng(
            &log(&["rn2(10)=5 @a:1", "rn2(10)=5 @a:2"]),
            &log(&["rn2(10)=5 @b:1", "rn2(10)=9 @b:2"]),
            &RngOptions::default(),
        );
        assert_eq!(result.matched, 1);
        assert_eq!(result.total, 2);
        let div = result.first_divergence.unwrap();
        assert_eq!(div.index, 1);
        assert_eq!(div.actual.as_deref(), Some("rn2(10)=5"));
        assert_eq!(div.expected.as_deref(), Some("rn2(10)=9"));
        assert_eq!(div.raw_actual.as_deref(), Some("rn2(10)=5 @a:2"));
        assert_eq!(div.raw_expected.as_deref(), Some("rn2(10)=9 @b:2"));
    }

    #[test]
    fn test_markers_and_composites_are_dropped() {
        let actual = log(&[">makemon", "rn2(5)=1", "d(2,6)=7", "rn2(6)=3", "rn2(6)=4", "<makemon"]);
        let expected = log(&["rn2(5)=1", "rn2(6)=3", "rn2(6)=4"]);
        let result = compare_rng(&actual, &expected, &RngOptions::default());
        assert_eq!(result.total, 3);
        assert_eq!(result.matched, 3);
    }

    #[test]
    fn test_divergence_carries_call_stack() {
        let actual = log(&[">a", ">b", "rn2(2)=0", ">c", ">d", "rn2(3)=1"]);
        let expected = log(&[">a", ">b", "rn2(2)=0", ">c", ">d", "rn2(3)=2"]);
        let div = compare_rng(&actual, &expected, &RngOptions::default())
            .first_divergence
            .unwrap();
        assert_eq!(div.actual_stack, vec![">b", ">c", ">d"]);
        assert_eq!(div.expected_stack, vec![">b", ">c", ">d"]);
    }

    #[test]
    fn test_short_actual_diverges_at_end() {
        let result = compare_rng(
            &log(&["rn2(10)=5"]),
            &log(&["rn2(10)=5", "rnd(6)=3"]),
            &RngOptions::default(),
        );
        assert_eq!(result.matched, 1);
        assert_eq!(result.total, 2);
        let div = result.first_divergence.unwrap();
        assert_eq!(div.index, 1);
        assert_eq!(div.actual, None);
        assert!(div.actual_stack.is_empty());
    }

    #[test]
    fn test_empty_logs() {
        let result = compare_rng(&[], &[], &RngOptions::default());
        assert_eq!((result.matched, result.total), (0, 0));
        assert!(result.is_match);
    }

    #[test]
    fn test_context_around_divergence() {
        let result = compare_rng(
            &log(&["rn2(1)=0", "rn2(2)=1", "rn2(3)=2", "rn2(4)=3", "rn2(5)=4"]),
            &log(&["rn2(1)=0", "rn2(2)=1", "rn2(3)=9", "rn2(4)=3", "rn2(5)=4"]),
            &RngOptions::default().with_context(2),
        );
        let div = result.first_divergence.unwrap();
        let indices: Vec<usize> = div.context.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let raw = log(&["3 4 rn2(3)=1 @ x.c:1", "rne(4)=2", "<f", "  ", "rnd(2)=2"]);
        let once = normalize_rng(&raw, &RngOptions::default());
        let twice = normalize_rng(&once, &RngOptions::default());
        assert_eq!(once, vec!["rn2(3)=1", "rnd(2)=2"]);
        assert_eq!(once, twice);
    }
}
