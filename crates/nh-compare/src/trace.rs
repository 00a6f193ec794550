//! Recorded session traces.
//!
//! A session is one reference run of the program under test: metadata, a
//! startup step, and the ordered input steps with their captured channels
//! (RNG calls, screen text, colored cells, semantic events). The candidate's
//! replay output uses the same `Step` shape so both sides can be compared
//! uniformly.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Session category, used to pick a comparator policy.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SessionKind {
    #[default]
    Gameplay,
    Chargen,
    Map,
    Interface,
    Special,
}

impl SessionKind {
    /// Guess the kind of a session from its file name.
    ///
    /// Used when the session metadata does not carry an explicit type, and by
    /// the runner to filter sessions without parsing them.
    pub fn infer_from_name(name: &str) -> Self {
        let file = name.rsplit('/').next().unwrap_or(name);
        if file.contains("_chargen") {
            SessionKind::Chargen
        } else if file.contains("_gameplay") {
            SessionKind::Gameplay
        } else if file.starts_with("interface_")
            || (file.starts_with("seed") && (file.contains("_on.") || file.contains("_off.")))
        {
            SessionKind::Interface
        } else if file.contains("_special") {
            SessionKind::Special
        } else if file.contains("_map") || file.starts_with("map_") {
            SessionKind::Map
        } else {
            SessionKind::Gameplay
        }
    }
}

bitflags! {
    /// Rendering attributes of a screen cell.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Attr: u8 {
        const BOLD = 0x01;
        const DIM = 0x02;
        const UNDERLINE = 0x04;
        const BLINK = 0x08;
        const INVERSE = 0x10;
        const INVISIBLE = 0x20;
    }
}

// Attributes travel as their raw bits.
impl Serialize for Attr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Attr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        Ok(Attr::from_bits_truncate(bits))
    }
}

/// A rendered glyph plus its color and attributes.
///
/// Colors are palette indices (0-7 normal, 8-15 bright, up to 255 for the
/// extended palette); `None` is the terminal default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub ch: char,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fg: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<u8>,
    #[serde(default, skip_serializing_if = "Attr::is_empty")]
    pub attr: Attr,
}

impl Cell {
    pub const fn plain(ch: char) -> Self {
        Self {
            ch,
            fg: None,
            bg: None,
            attr: Attr::empty(),
        }
    }

    /// The cell a terminal shows where nothing was drawn.
    pub const fn blank() -> Self {
        Self::plain(' ')
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank()
    }
}

impl core::fmt::Display for Cell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.ch)?;
        match self.fg {
            Some(c) => write!(f, " fg={}", c)?,
            None => write!(f, " fg=-")?,
        }
        match self.bg {
            Some(c) => write!(f, " bg={}", c)?,
            None => write!(f, " bg=-")?,
        }
        if !self.attr.is_empty() {
            write!(f, " attr={:?}", self.attr)?;
        }
        Ok(())
    }
}

/// Colored screen capture: either already decoded cells, or raw lines with
/// embedded control sequences that still need decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnsiScreen {
    Cells(Vec<Vec<Cell>>),
    Lines(Vec<String>),
}

impl AnsiScreen {
    pub fn is_empty(&self) -> bool {
        match self {
            AnsiScreen::Cells(rows) => rows.is_empty(),
            AnsiScreen::Lines(lines) => lines.is_empty(),
        }
    }

    /// Decoded cell grid, one row per screen line.
    pub fn to_cells(&self) -> Vec<Vec<Cell>> {
        match self {
            AnsiScreen::Cells(rows) => rows.clone(),
            AnsiScreen::Lines(lines) => lines.iter().map(|l| crate::ansi::decode_line(l)).collect(),
        }
    }
}

/// One input step and everything captured while processing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Recorded key (or key sequence); `None` for the startup step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Timing and input hints, forwarded verbatim to the candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// RNG call log, including enter/exit markers and source tags.
    #[serde(default)]
    pub rng: Vec<String>,
    #[serde(default)]
    pub screen: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_ansi: Option<AnsiScreen>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    /// Animation boundaries reported by the candidate (never recorded in
    /// reference sessions, which log them as RNG annotations instead).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_boundaries: Option<Vec<String>>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.rng.is_empty()
            && self.screen.is_empty()
            && self.screen_ansi.as_ref().is_none_or(AnsiScreen::is_empty)
            && self.events.as_ref().is_none_or(Vec::is_empty)
    }

    /// True when the step captured any screen content at all.
    pub fn has_screen(&self) -> bool {
        !self.screen.is_empty() || self.screen_ansi.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session identifier (the file name it was loaded from).
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub seed: u64,
    #[serde(rename = "type", default)]
    pub kind: SessionKind,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SessionMeta {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

/// A recorded reference run. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub meta: SessionMeta,
    #[serde(default)]
    pub startup: Step,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> SessionKind {
        self.meta.kind
    }

    /// Startup RNG followed by every step's RNG, in order.
    pub fn all_rng(&self) -> Vec<String> {
        concat_rng(&self.startup, &self.steps)
    }
}

/// On-disk session document.
///
/// Accepts both the nested `meta` layout and the older flat layout where
/// `seed`, `type` and `options` sit at the top level and the startup step is
/// the first entry of `steps`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub meta: Option<DocumentMeta>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: Option<SessionKind>,
    #[serde(default)]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub startup: Option<Step>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// The nested `meta` block of a session document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentMeta {
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: Option<SessionKind>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl SessionDocument {
    /// Normalize into a `Session` named `name`.
    pub fn into_session(self, name: &str) -> Session {
        let nested = self.meta.unwrap_or_default();
        let mut options = nested.options;
        if let Some(flat) = self.options {
            options.extend(flat);
        }
        let meta = SessionMeta {
            name: name.to_string(),
            seed: self.seed.or(nested.seed).unwrap_or(0),
            kind: self
                .kind
                .or(nested.kind)
                .unwrap_or_else(|| SessionKind::infer_from_name(name)),
            options,
        };

        let mut steps = self.steps;
        let startup = match self.startup {
            Some(startup) => startup,
            None if steps
                .first()
                .is_some_and(|s| s.key.is_none() && s.action.as_deref() == Some("startup")) =>
            {
                steps.remove(0)
            }
            None => Step::default(),
        };

        Session {
            meta,
            startup,
            steps,
        }
    }
}

/// Output of replaying a session through the candidate program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrace {
    #[serde(default)]
    pub startup: Step,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateTrace {
    /// A trace for a replay that could not even start.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// True when nothing at all was captured.
    pub fn is_empty(&self) -> bool {
        self.startup.is_empty() && self.steps.is_empty()
    }

    pub fn all_rng(&self) -> Vec<String> {
        concat_rng(&self.startup, &self.steps)
    }
}

fn concat_rng(startup: &Step, steps: &[Step]) -> Vec<String> {
    startup
        .rng
        .iter()
        .chain(steps.iter().flat_map(|s| s.rng.iter()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_kind_from_name() {
        assert_eq!(SessionKind::infer_from_name("seed1_chargen_valk.session.json"), SessionKind::Chargen);
        assert_eq!(SessionKind::infer_from_name("seed42_gameplay.session.json"), SessionKind::Gameplay);
        assert_eq!(SessionKind::infer_from_name("interface_options.session.json"), SessionKind::Interface);
        assert_eq!(SessionKind::infer_from_name("seed5_autopickup_on.session.json"), SessionKind::Interface);
        assert_eq!(SessionKind::infer_from_name("maps/seed3_map.session.json"), SessionKind::Map);
        assert_eq!(SessionKind::infer_from_name("oracle_special.session.json"), SessionKind::Special);
        assert_eq!(SessionKind::infer_from_name("whatever.session.json"), SessionKind::Gameplay);
    }

    #[test]
    fn test_kind_parses_case_insensitively() {
        assert_eq!("Chargen".parse::<SessionKind>().unwrap(), SessionKind::Chargen);
        assert_eq!(SessionKind::Map.to_string(), "map");
    }

    #[test]
    fn test_legacy_startup_step_is_split_off() {
        let doc: SessionDocument = serde_json::from_str(
            r#"{
                "seed": 7,
                "type": "gameplay",
                "options": {"symset": "DECgraphics"},
                "steps": [
                    {"key": null, "action": "startup", "rng": ["rn2(2)=1"], "screen": []},
                    {"key": "h", "rng": ["rn2(3)=0"], "screen": ["x"]}
                ]
            }"#,
        )
        .unwrap();
        let session = doc.into_session("seed7_gameplay.session.json");
        assert_eq!(session.meta.seed, 7);
        assert_eq!(session.meta.option_str("symset"), Some("DECgraphics"));
        assert_eq!(session.startup.rng, vec!["rn2(2)=1"]);
        assert_eq!(session.steps.len(), 1);
        assert_eq!(session.steps[0].key.as_deref(), Some("h"));
        assert_eq!(session.all_rng(), vec!["rn2(2)=1", "rn2(3)=0"]);
    }

    #[test]
    fn test_nested_meta_layout() {
        let doc: SessionDocument = serde_json::from_str(
            r#"{"meta": {"seed": 3, "type": "map", "options": {}},
                "startup": {"rng": []},
                "steps": []}"#,
        )
        .unwrap();
        let session = doc.into_session("x.session.json");
        assert_eq!(session.kind(), SessionKind::Map);
        assert_eq!(session.name(), "x.session.json");
    }

    #[test]
    fn test_screen_ansi_accepts_cells_or_lines() {
        let cells: Step =
            serde_json::from_str(r#"{"screenAnsi": [[{"ch": "@", "fg": 1, "attr": 1}]]}"#).unwrap();
        match cells.screen_ansi {
            Some(AnsiScreen::Cells(rows)) => {
                assert_eq!(rows[0][0].ch, '@');
                assert_eq!(rows[0][0].fg, Some(1));
                assert_eq!(rows[0][0].attr, Attr::BOLD);
            }
            other => panic!("expected cells, got {:?}", other),
        }
        let lines: Step = serde_json::from_str(r#"{"screenAnsi": ["\u001b[31m@\u001b[0m"]}"#).unwrap();
        assert!(matches!(lines.screen_ansi, Some(AnsiScreen::Lines(_))));
        assert!(lines.has_screen());
    }

    #[test]
    fn test_failed_trace_is_empty() {
        let trace = CandidateTrace::failed("boom");
        assert!(trace.is_empty());
        assert_eq!(trace.error.as_deref(), Some("boom"));
    }
}
