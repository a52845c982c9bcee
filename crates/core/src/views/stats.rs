use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use callpath_protocol::SharedStr;
use serde::{Deserialize, Serialize};

use crate::config::StatsSort;
use crate::model::CallPathTree;

const NAME_WIDTH: usize = 40;
const COLUMN_WIDTH: usize = 25;

/// One row of the statistics table: a function merged over every call path
/// it appears at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    pub identity: SharedStr,
    pub call_count: u64,
    /// Sum of inclusive times.
    pub total_time: Duration,
    /// Sum of exclusive times.
    pub self_time: Duration,
}

impl StatEntry {
    pub fn total_per_call(&self) -> f64 {
        per_call(self.total_time, self.call_count)
    }

    pub fn self_per_call(&self) -> f64 {
        per_call(self.self_time, self.call_count)
    }
}

fn per_call(time: Duration, calls: u64) -> f64 {
    if calls == 0 {
        0.0
    } else {
        time.as_secs_f64() / calls as f64
    }
}

/// Flattened, identity-aggregated view of a [`CallPathTree`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub entries: Vec<StatEntry>,
}

impl Statistics {
    pub fn from_tree(tree: &CallPathTree, sort: StatsSort, ascending: bool) -> Self {
        let mut by_name: HashMap<&str, StatEntry> = HashMap::new();

        for (_, node) in tree.iter_preorder() {
            if node.is_root() {
                continue;
            }
            let data = node.data();
            let entry = by_name
                .entry(data.identity.as_str())
                .or_insert_with(|| StatEntry {
                    identity: data.identity.clone(),
                    call_count: 0,
                    total_time: Duration::ZERO,
                    self_time: Duration::ZERO,
                });
            entry.call_count += data.call_count;
            entry.total_time += data.total_time;
            entry.self_time += tree.self_time(node.id());
        }

        let mut stats = Self {
            entries: by_name.into_values().collect(),
        };
        stats.sort_by(sort, ascending);
        stats
    }

    /// Reorder rows. Ties always fall back to identity order.
    pub fn sort_by(&mut self, sort: StatsSort, ascending: bool) {
        self.entries.sort_by(|a, b| {
            let ord = match sort {
                StatsSort::TotalTime => b.total_time.cmp(&a.total_time),
                StatsSort::SelfTime => b.self_time.cmp(&a.self_time),
                StatsSort::Count => b.call_count.cmp(&a.call_count),
                StatsSort::Name => a.identity.cmp(&b.identity),
            };
            let ord = if ascending { ord.reverse() } else { ord };
            ord.then_with(|| a.identity.cmp(&b.identity))
        });
    }

    pub fn entry(&self, identity: &str) -> Option<&StatEntry> {
        self.entries.iter().find(|e| e.identity == identity)
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.iter().map(|e| e.call_count).sum()
    }

    /// Sum of self times: the wall time covered by the profiled calls.
    pub fn total_self_time(&self) -> Duration {
        self.entries.iter().map(|e| e.self_time).sum()
    }

    pub fn write_report<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(
            out,
            "{} function calls in {:.6} seconds",
            self.total_calls(),
            self.total_self_time().as_secs_f64()
        )?;
        writeln!(out)?;
        writeln!(
            out,
            "{:<NAME_WIDTH$}{:>COLUMN_WIDTH$}{:>COLUMN_WIDTH$}{:>COLUMN_WIDTH$}{:>COLUMN_WIDTH$}{:>COLUMN_WIDTH$}",
            "Function Name",
            "Call Count",
            "Total Time (s)",
            "Per Call (s)",
            "Cumulative Time (s)",
            "Per Call (s)",
        )?;
        for e in &self.entries {
            writeln!(
                out,
                "{:<NAME_WIDTH$}{:>COLUMN_WIDTH$}{:>COLUMN_WIDTH$.6}{:>COLUMN_WIDTH$.6}{:>COLUMN_WIDTH$.6}{:>COLUMN_WIDTH$.6}",
                e.identity.as_str(),
                e.call_count,
                e.total_time.as_secs_f64(),
                e.total_per_call(),
                e.self_time.as_secs_f64(),
                e.self_per_call(),
            )?;
        }
        Ok(())
    }
}
