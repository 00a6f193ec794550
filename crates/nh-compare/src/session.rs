//! Whole-session comparison.
//!
//! Runs the candidate once through a [`Replayer`], then scores every channel
//! through the session's [`ComparatorPolicy`]:
//!
//! - RNG and events are compared once over the whole run, startup included.
//! - Screen, color and animation are compared per step over the steps both
//!   sides have. A step contributes at most 1 to the screen total.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::{Channel, ChannelMetrics, ChannelResult, Divergence, boundary_events};
use crate::policy::{ComparatorPolicy, policy_for};
use crate::replay::Replayer;
use crate::trace::{CandidateTrace, Session, Step};

/// Multi-channel outcome of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionComparison {
    pub channels: BTreeMap<Channel, ChannelResult>,
    #[serde(default)]
    pub actual_steps: usize,
    #[serde(default)]
    pub expected_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionComparison {
    /// A comparison that never got to compare anything.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelResult> {
        self.channels.get(&channel)
    }

    /// Earliest divergence, in channel order.
    pub fn first_divergence(&self) -> Option<&Divergence> {
        self.channels
            .values()
            .find_map(|r| r.first_divergence.as_ref())
    }

    pub fn passed(&self) -> bool {
        self.error.is_none() && self.channels.values().all(|r| r.is_match)
    }

    pub fn metrics(&self) -> BTreeMap<Channel, ChannelMetrics> {
        self.channels
            .iter()
            .map(|(channel, r)| (*channel, r.metrics()))
            .collect()
    }
}

/// Event stream of a run: per step, the RNG boundary markers followed by any
/// explicitly recorded events.
pub fn event_stream(startup: &Step, steps: &[Step]) -> Vec<String> {
    std::iter::once(startup)
        .chain(steps)
        .flat_map(|step| {
            let mut events = boundary_events(&step.rng);
            events.extend(step.events.iter().flatten().cloned());
            events
        })
        .collect()
}

/// Adds one stepwise result into a running channel total.
fn fold_step(acc: &mut Option<ChannelResult>, result: ChannelResult, step: usize) {
    let result = ChannelResult {
        first_divergence: result.first_divergence.map(|d| d.at_step(step)),
        ..result
    };
    match acc {
        Some(total) => total.accumulate(result),
        None => *acc = Some(result),
    }
}

/// Compares candidate traces against one session under a fixed policy.
pub struct SessionComparator {
    policy: Box<dyn ComparatorPolicy>,
}

impl SessionComparator {
    /// Comparator using the policy registered for the session's kind.
    pub fn for_session(session: &Session) -> Self {
        Self {
            policy: policy_for(session),
        }
    }

    pub fn with_policy(policy: Box<dyn ComparatorPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Replay the session once and compare the result.
    pub fn compare(&self, session: &Session, replayer: &dyn Replayer) -> SessionComparison {
        let trace = replayer.replay(session);
        self.compare_trace(session, &trace)
    }

    pub fn compare_trace(&self, session: &Session, trace: &CandidateTrace) -> SessionComparison {
        let mut comparison = SessionComparison {
            channels: BTreeMap::new(),
            actual_steps: trace.steps.len(),
            expected_steps: session.steps.len(),
            error: trace.error.clone(),
        };
        if trace.error.is_some() && trace.is_empty() {
            return comparison;
        }

        let policy = self.policy.as_ref();
        let rng = policy.compare_rng(&trace.all_rng(), &session.all_rng());
        let events = policy.compare_events(
            &event_stream(&trace.startup, &trace.steps),
            &event_stream(&session.startup, &session.steps),
        );

        let mut screen = ChannelResult::empty();
        let mut color = None;
        let mut animation = None;
        for (i, (actual, expected)) in trace.steps.iter().zip(&session.steps).enumerate() {
            let step = i + 1;
            if let Some(r) = policy.compare_screen_step(actual, expected) {
                screen.accumulate(match r.first_divergence {
                    None => ChannelResult::new(1, 1, None),
                    Some(d) => ChannelResult::new(0, 1, Some(d.at_step(step))),
                });
            }
            if let Some(r) = policy.compare_color_step(actual, expected) {
                fold_step(&mut color, r, step);
            }
            if let Some(r) = policy.compare_animation_boundaries_step(actual, expected) {
                fold_step(&mut animation, r, step);
            }
        }

        comparison.channels.insert(Channel::Rng, rng);
        comparison.channels.insert(Channel::Screen, screen);
        comparison.channels.insert(Channel::Event, events);
        if let Some(color) = color {
            comparison.channels.insert(Channel::Color, color);
        }
        if let Some(animation) = animation {
            comparison.channels.insert(Channel::Animation, animation);
        }

        debug!(
            session = session.name(),
            policy = policy.name(),
            passed = comparison.passed(),
            "compared session"
        );
        comparison
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::SelfCheckReplayer;
    use crate::trace::{AnsiScreen, SessionKind, SessionMeta};

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn step(rng: &[&str], screen: &[&str]) -> Step {
        Step {
            rng: strs(rng),
            screen: strs(screen),
            ..Step::default()
        }
    }

    fn sample_session() -> Session {
        Session {
            meta: SessionMeta {
                name: "seed1_gameplay.session.json".into(),
                seed: 1,
                kind: SessionKind::Gameplay,
                ..SessionMeta::default()
            },
            startup: step(&["rn2(2)=1"], &["Welcome"]),
            steps: vec![
                step(&[">move", "rn2(3)=0", "<move"], &["@."]),
                step(&["rn2(4)=2"], &[]),
                step(&["rn2(5)=1"], &[".@"]),
            ],
        }
    }

    #[test]
    fn test_self_check_passes_every_channel() {
        let session = sample_session();
        let comparator = SessionComparator::for_session(&session);
        let result = comparator.compare(&session, &SelfCheckReplayer);
        assert!(result.passed());
        assert!(result.first_divergence().is_none());
        assert_eq!(result.channel(Channel::Rng).unwrap().total, 4);
        // step 2 captured no screen and is excluded
        assert_eq!(result.channel(Channel::Screen).unwrap().total, 2);
        assert_eq!(result.channel(Channel::Event).unwrap().total, 2);
        assert!(result.channel(Channel::Color).is_none());
    }

    #[test]
    fn test_screen_divergence_is_stamped_with_step() {
        let session = sample_session();
        let mut trace = SelfCheckReplayer.replay(&session);
        trace.steps[2].screen = strs(&["@."]);
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        let screen = result.channel(Channel::Screen).unwrap();
        assert_eq!((screen.matched, screen.total), (1, 2));
        assert_eq!(screen.first_divergence.as_ref().unwrap().step, Some(3));
        assert!(!result.passed());
        assert_eq!(result.first_divergence().unwrap().channel, Channel::Screen);
    }

    #[test]
    fn test_rng_divergence_wins_in_channel_order() {
        let session = sample_session();
        let mut trace = SelfCheckReplayer.replay(&session);
        trace.steps[1].rng = strs(&["rn2(4)=3"]);
        trace.steps[2].screen = strs(&["x"]);
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        let div = result.first_divergence().unwrap();
        assert_eq!(div.channel, Channel::Rng);
        assert_eq!(div.index, 2);
        assert_eq!(div.step, Some(2));
    }

    #[test]
    fn test_short_trace_compares_common_steps() {
        let session = sample_session();
        let mut trace = SelfCheckReplayer.replay(&session);
        trace.steps.truncate(1);
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        assert_eq!(result.actual_steps, 1);
        assert_eq!(result.expected_steps, 3);
        assert!(result.channel(Channel::Screen).unwrap().is_match);
        let rng = result.channel(Channel::Rng).unwrap();
        assert_eq!((rng.matched, rng.total), (2, 4));
    }

    #[test]
    fn test_failed_empty_trace_has_no_channels() {
        let session = sample_session();
        let result = SessionComparator::for_session(&session)
            .compare(&session, &|_: &Session| CandidateTrace::failed("crashed"));
        assert!(result.channels.is_empty());
        assert!(!result.passed());
        assert_eq!(result.error.as_deref(), Some("crashed"));
    }

    #[test]
    fn test_partial_trace_with_error_is_still_scored() {
        let session = sample_session();
        let mut trace = SelfCheckReplayer.replay(&session);
        trace.steps.truncate(2);
        trace.error = Some("candidate exited".into());
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        assert!(result.channel(Channel::Rng).is_some());
        assert!(!result.passed());
    }

    #[test]
    fn test_color_channel_accumulates_cells() {
        let mut session = sample_session();
        session.steps[0].screen_ansi = Some(AnsiScreen::Lines(strs(&["\x1b[33m@\x1b[0m."])));
        let mut trace = SelfCheckReplayer.replay(&session);
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        let color = result.channel(Channel::Color).unwrap();
        assert_eq!((color.matched, color.total), (2, 2));

        trace.steps[0].screen_ansi = Some(AnsiScreen::Lines(strs(&["\x1b[31m@\x1b[0m."])));
        let result = SessionComparator::for_session(&session).compare_trace(&session, &trace);
        let color = result.channel(Channel::Color).unwrap();
        assert_eq!((color.matched, color.total), (1, 2));
        let div = color.first_divergence.as_ref().unwrap();
        assert_eq!((div.step, div.row, div.col), (Some(1), Some(0), Some(0)));
    }

    #[test]
    fn test_explicit_events_follow_markers() {
        let mut s = step(&[">a", "<a"], &[]);
        s.events = Some(strs(&["^die"]));
        assert_eq!(event_stream(&Step::default(), &[s]), strs(&[">a", "<a", "^die"]));
    }
}
