//! Comparator policies.
//!
//! A policy wraps the pure comparators of [`crate::diff`] and [`crate::rng`]
//! with the normalization quirks of one family of sessions. Policies are
//! chosen once per session from a lookup table keyed on [`SessionKind`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::ansi::{cells_to_text, decode_dec_special, decode_shifted};
use crate::diff::{
    Channel, ChannelResult, Divergence, compare_cells, compare_events, compare_screen_lines,
};
use crate::rng::{RngOptions, compare_rng, normalize_rng};
use crate::trace::{AnsiScreen, Cell, Session, SessionKind, Step};

/// Default width of the interface column window.
pub const DEFAULT_COMPARE_COLUMNS: usize = 80;

/// Per-channel comparison behavior for one session.
///
/// Step methods return `None` when the expected step has nothing to compare
/// on that channel, which excludes the step from the channel's totals.
pub trait ComparatorPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Compare the concatenated RNG logs of a whole run.
    fn compare_rng(&self, actual: &[String], expected: &[String]) -> ChannelResult;

    fn compare_screen_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult>;

    fn compare_color_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult>;

    fn compare_events(&self, actual: &[String], expected: &[String]) -> ChannelResult {
        compare_events(actual, expected)
    }

    fn compare_animation_boundaries_step(
        &self,
        _actual: &Step,
        _expected: &Step,
    ) -> Option<ChannelResult> {
        None
    }
}

/// Cell grid of a step, if it captured one.
fn step_cells(step: &Step) -> Option<Vec<Vec<Cell>>> {
    step.screen_ansi
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(AnsiScreen::to_cells)
}

/// Cells of a candidate step. A candidate that captured no control-coded
/// screen has nothing to score for color; an empty capture still counts.
fn candidate_cells(step: &Step) -> Option<Vec<Vec<Cell>>> {
    step.screen_ansi.as_ref().map(AnsiScreen::to_cells)
}

/// Screen text of a step, falling back to the glyphs of its cell grid.
fn step_screen_text(step: &Step) -> Vec<String> {
    if !step.screen.is_empty() {
        return step.screen.clone();
    }
    step_cells(step)
        .map(|rows| rows.iter().map(|r| cells_to_text(r)).collect())
        .unwrap_or_default()
}

// ============================================================================
// Strict
// ============================================================================

/// Plain channel comparison with no session-specific allowances.
#[derive(Debug, Clone, Default)]
pub struct StrictPolicy {
    pub rng_options: RngOptions,
}

impl StrictPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComparatorPolicy for StrictPolicy {
    fn name(&self) -> &str {
        "strict"
    }

    fn compare_rng(&self, actual: &[String], expected: &[String]) -> ChannelResult {
        compare_rng(actual, expected, &self.rng_options)
    }

    fn compare_screen_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult> {
        if !expected.has_screen() {
            return None;
        }
        Some(compare_screen_lines(
            &step_screen_text(actual),
            &step_screen_text(expected),
        ))
    }

    fn compare_color_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult> {
        let expected = step_cells(expected)?;
        let actual = candidate_cells(actual)?;
        Some(compare_cells(&actual, &expected))
    }
}

// ============================================================================
// Gameplay
// ============================================================================

static WELCOME_TOPLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+ -- Welcome to the Mazes of Menace!.*\(seed:\d+\)$").expect("valid pattern")
});

static MAP_DUMP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Map dumped to /tmp/[^ ]*dumpmap\.txt\.$").expect("valid pattern"));

const MAP_LOAD_PROMPTS: &[&str] = &["Load which des lua file?", "Load which level?"];

fn trimmed(line: &str) -> &str {
    line.trim_end_matches(' ').trim_start()
}

/// The startup banner and the map-dump notice occupy the same top line
/// depending on how the run was launched.
fn is_startup_topline_alias(actual: &str, expected: &str) -> bool {
    let (a, e) = (trimmed(actual), trimmed(expected));
    (MAP_DUMP_LINE.is_match(a) && WELCOME_TOPLINE.is_match(e))
        || (MAP_DUMP_LINE.is_match(e) && WELCOME_TOPLINE.is_match(a))
}

fn is_map_load_prompt(line: &str) -> bool {
    let text = trimmed(line);
    MAP_LOAD_PROMPTS.iter().any(|p| text.starts_with(p))
}

fn strip_shift_bytes(line: &str) -> String {
    line.trim_end_matches('\r')
        .chars()
        .filter(|&c| c != '\x0e' && c != '\x0f')
        .collect()
}

/// Expected animation boundary count of a reference step, if the step logged
/// any delay annotations at all.
pub fn expected_animation_boundaries(step: &Step) -> Option<usize> {
    let mut comparable = false;
    let mut count = 0;
    for entry in &step.rng {
        if entry.starts_with("^delay_output[") || entry.contains("animation(tmp_at)") {
            comparable = true;
        }
        if entry.starts_with(">runmode_delay_output") && entry.contains("animation(tmp_at)") {
            count += 1;
        }
    }
    comparable.then_some(count)
}

/// Policy for recorded gameplay: tolerant of terminal encoding and banner
/// differences, and able to place RNG divergences on a step.
#[derive(Debug, Clone)]
pub struct GameplayPolicy {
    name: String,
    rng_options: RngOptions,
    /// Cumulative normalized RNG length after startup and after each step.
    rng_step_ends: Vec<usize>,
    dec_graphics: bool,
    column_window: Option<usize>,
}

impl GameplayPolicy {
    pub fn new(session: &Session) -> Self {
        let rng_options = RngOptions::default();
        let mut cumulative = 0;
        let rng_step_ends = std::iter::once(&session.startup)
            .chain(session.steps.iter())
            .map(|step| {
                cumulative += normalize_rng(&step.rng, &rng_options).len();
                cumulative
            })
            .collect();
        Self {
            name: "gameplay".to_string(),
            rng_options,
            rng_step_ends,
            dec_graphics: session.meta.option_str("symset") == Some("DECgraphics"),
            column_window: None,
        }
    }

    /// Gameplay behavior restricted to the leftmost columns of each row.
    pub fn interface(session: &Session) -> Self {
        let columns = session
            .meta
            .option_u64("compareColumns")
            .map(|c| c as usize)
            .unwrap_or(DEFAULT_COMPARE_COLUMNS);
        Self {
            name: "interface".to_string(),
            column_window: Some(columns),
            ..Self::new(session)
        }
    }

    pub fn column_window(&self) -> Option<usize> {
        self.column_window
    }

    /// 1-based step holding the normalized RNG entry at `index`, 0 for startup.
    pub fn step_for_rng_index(&self, index: usize) -> Option<usize> {
        self.rng_step_ends.iter().position(|&end| index < end)
    }

    fn comparable_lines(&self, step: &Step) -> Vec<String> {
        if let Some(rows) = step_cells(step) {
            return rows.iter().map(|r| cells_to_text(r)).collect();
        }
        if self.dec_graphics {
            step.screen
                .iter()
                .map(|l| strip_shift_bytes(l).chars().map(decode_dec_special).collect::<String>())
                .collect()
        } else {
            step.screen.iter().map(|l| decode_shifted(l)).collect()
        }
    }

    fn clip_line(&self, line: String) -> String {
        match self.column_window {
            Some(cols) => line.chars().take(cols).collect(),
            None => line,
        }
    }

    fn clip_cells(&self, mut row: Vec<Cell>) -> Vec<Cell> {
        if let Some(cols) = self.column_window {
            row.truncate(cols);
        }
        row
    }
}

impl ComparatorPolicy for GameplayPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn compare_rng(&self, actual: &[String], expected: &[String]) -> ChannelResult {
        let mut result = compare_rng(actual, expected, &self.rng_options);
        if let Some(div) = result.first_divergence.as_mut() {
            div.step = self.step_for_rng_index(div.index);
        }
        result
    }

    fn compare_screen_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult> {
        if !expected.has_screen() {
            return None;
        }
        let mut a = self.comparable_lines(actual);
        let mut e = self.comparable_lines(expected);
        for row in 0..a.len().min(e.len()) {
            if is_startup_topline_alias(&a[row], &e[row]) {
                a[row].clear();
                e[row].clear();
            }
        }
        let a: Vec<String> = a.into_iter().map(|l| self.clip_line(strip_shift_bytes(&l))).collect();
        let e: Vec<String> = e.into_iter().map(|l| self.clip_line(strip_shift_bytes(&l))).collect();
        Some(compare_screen_lines(&a, &e))
    }

    fn compare_color_step(&self, actual: &Step, expected: &Step) -> Option<ChannelResult> {
        let mut e = step_cells(expected)?;
        let mut a = candidate_cells(actual)?;
        for row in 0..a.len().min(e.len()) {
            let a_text = cells_to_text(&a[row]);
            let e_text = cells_to_text(&e[row]);
            if (is_map_load_prompt(&a_text) && is_map_load_prompt(&e_text))
                || is_startup_topline_alias(&a_text, &e_text)
            {
                a[row].clear();
                e[row].clear();
            }
        }
        let a: Vec<Vec<Cell>> = a.into_iter().map(|r| self.clip_cells(r)).collect();
        let e: Vec<Vec<Cell>> = e.into_iter().map(|r| self.clip_cells(r)).collect();
        Some(compare_cells(&a, &e))
    }

    fn compare_animation_boundaries_step(
        &self,
        actual: &Step,
        expected: &Step,
    ) -> Option<ChannelResult> {
        let expected_count = expected_animation_boundaries(expected)?;
        let actual_count = actual.animation_boundaries.as_ref().map_or(0, Vec::len);
        if actual_count == expected_count {
            return Some(ChannelResult::new(1, 1, None));
        }
        let div = Divergence::new(
            Channel::Animation,
            0,
            Some(actual_count.to_string()),
            Some(expected_count.to_string()),
        );
        Some(ChannelResult::new(0, 1, Some(div)))
    }
}

// ============================================================================
// Registry
// ============================================================================

type PolicyFactory = fn(&Session) -> Box<dyn ComparatorPolicy>;

fn strict(_: &Session) -> Box<dyn ComparatorPolicy> {
    Box::new(StrictPolicy::new())
}

fn gameplay(session: &Session) -> Box<dyn ComparatorPolicy> {
    Box::new(GameplayPolicy::new(session))
}

fn interface(session: &Session) -> Box<dyn ComparatorPolicy> {
    Box::new(GameplayPolicy::interface(session))
}

/// Policy per session kind. Names are accepted by [`policy_by_name`].
pub const POLICY_TABLE: &[(SessionKind, &str, PolicyFactory)] = &[
    (SessionKind::Gameplay, "gameplay", gameplay),
    (SessionKind::Chargen, "interface", interface),
    (SessionKind::Interface, "interface", interface),
    (SessionKind::Map, "strict", strict),
    (SessionKind::Special, "strict", strict),
];

/// Names of all registered policies.
pub fn policy_names() -> Vec<&'static str> {
    let mut names: Vec<&str> = POLICY_TABLE.iter().map(|(_, name, _)| *name).collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// The policy registered for a session's kind.
pub fn policy_for(session: &Session) -> Box<dyn ComparatorPolicy> {
    let kind = session.kind();
    let factory = POLICY_TABLE
        .iter()
        .find(|(k, _, _)| *k == kind)
        .map_or(strict as PolicyFactory, |(_, _, f)| *f);
    let policy = factory(session);
    debug!(session = session.name(), %kind, policy = policy.name(), "selected comparator policy");
    policy
}

/// A policy selected by name, overriding the kind-based choice.
pub fn policy_by_name(name: &str, session: &Session) -> Option<Box<dyn ComparatorPolicy>> {
    POLICY_TABLE
        .iter()
        .find(|(_, n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, _, factory)| factory(session))
}
