//! Differences between two result bundles.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::diff::{Channel, ChannelMetrics};
use crate::report::ResultBundle;

/// Change of a summary counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountChange {
    pub old: i64,
    pub new: i64,
}

impl CountChange {
    pub fn delta(&self) -> i64 {
        self.new - self.old
    }
}

/// What changed between a baseline run and a new run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineDiff {
    pub summary_changes: BTreeMap<String, CountChange>,
    /// Passed before, failing now.
    pub regressions: Vec<String>,
    /// Failing before, passing now.
    pub improvements: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub channel_changes: BTreeMap<Channel, (ChannelMetrics, ChannelMetrics)>,
}

impl BaselineDiff {
    pub fn between(old: &ResultBundle, new: &ResultBundle) -> Self {
        let mut diff = BaselineDiff::default();

        let counters = [
            ("total", old.summary.total, new.summary.total),
            ("passed", old.summary.passed, new.summary.passed),
            ("failed", old.summary.failed, new.summary.failed),
        ];
        for (key, o, n) in counters {
            if o != n {
                diff.summary_changes.insert(
                    key.to_string(),
                    CountChange {
                        old: o as i64,
                        new: n as i64,
                    },
                );
            }
        }

        let old_by: BTreeMap<&str, bool> =
            old.results.iter().map(|r| (r.session.as_str(), r.passed)).collect();
        let new_by: BTreeMap<&str, bool> =
            new.results.iter().map(|r| (r.session.as_str(), r.passed)).collect();

        for (session, was) in &old_by {
            match new_by.get(session) {
                None => diff.removed.push(session.to_string()),
                Some(true) if !was => diff.improvements.push(session.to_string()),
                Some(false) if *was => diff.regressions.push(session.to_string()),
                Some(_) => {}
            }
        }
        diff.added = new_by
            .keys()
            .filter(|s| !old_by.contains_key(*s))
            .map(|s| s.to_string())
            .collect();

        let channels: BTreeSet<Channel> = old
            .summary
            .per_channel_totals
            .keys()
            .chain(new.summary.per_channel_totals.keys())
            .copied()
            .collect();
        for channel in channels {
            let o = old.summary.per_channel_totals.get(&channel).copied().unwrap_or_default();
            let n = new.summary.per_channel_totals.get(&channel).copied().unwrap_or_default();
            if o != n {
                diff.channel_changes.insert(channel, (o, n));
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.summary_changes.is_empty()
            && self.regressions.is_empty()
            && self.improvements.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.channel_changes.is_empty()
    }

    pub fn has_regressions(&self) -> bool {
        !self.regressions.is_empty()
    }
}

impl core::fmt::Display for BaselineDiff {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes from baseline");
        }
        if !self.summary_changes.is_empty() {
            writeln!(f, "Summary changes:")?;
            for (key, change) in &self.summary_changes {
                writeln!(f, "  {}: {} -> {} ({:+})", key, change.old, change.new, change.delta())?;
            }
        }
        let sections = [
            ("Regressions (pass -> fail)", &self.regressions),
            ("Improvements (fail -> pass)", &self.improvements),
            ("New sessions", &self.added),
            ("Removed sessions", &self.removed),
        ];
        for (title, sessions) in sections {
            if sessions.is_empty() {
                continue;
            }
            writeln!(f, "{}:", title)?;
            for session in sessions {
                writeln!(f, "  {}", session)?;
            }
        }
        if !self.channel_changes.is_empty() {
            writeln!(f, "Channel totals:")?;
            for (channel, (o, n)) in &self.channel_changes {
                writeln!(
                    f,
                    "  {}: {} -> {} ({:+} matched)",
                    channel,
                    o.fraction(),
                    n.fraction(),
                    n.matched as i64 - o.matched as i64
                )?;
            }
        }
        Ok(())
    }
}
