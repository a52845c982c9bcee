use serde::{Deserialize, Serialize};

/// Row ordering for the statistics report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsSort {
    #[default]
    TotalTime,
    SelfTime,
    Count,
    Name,
}

impl StatsSort {
    /// Next ordering in the cycle used by interactive viewers.
    pub fn next(self) -> Self {
        match self {
            Self::TotalTime => Self::SelfTime,
            Self::SelfTime => Self::Count,
            Self::Count => Self::Name,
            Self::Name => Self::TotalTime,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TotalTime => "total time",
            Self::SelfTime => "self time",
            Self::Count => "call count",
            Self::Name => "name",
        }
    }
}

/// Runtime settings of a [`CallProfiler`](crate::CallProfiler).
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```json
/// { "enabled": true, "indent_width": 4, "sort": "self_time" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// When false, scope guards neither enter nor leave; the tree is untouched.
    pub enabled: bool,
    /// Spaces per depth level in the hierarchical dump.
    pub indent_width: usize,
    pub sort: StatsSort,
    /// Reverse the natural order of `sort` (which is descending for times
    /// and counts, alphabetical for names).
    pub ascending: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            indent_width: 2,
            sort: StatsSort::default(),
            ascending: false,
        }
    }
}

impl ProfilerConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ProfilerConfig::from_json(br#"{"sort": "self_time"}"#)
            .unwrap_or_else(|_| ProfilerConfig::default());
        assert_eq!(cfg.sort, StatsSort::SelfTime);
        assert!(cfg.enabled);
        assert_eq!(cfg.indent_width, 2);
        assert!(!cfg.ascending);
    }

    #[test]
    fn rejects_unknown_sort() {
        assert!(ProfilerConfig::from_json(br#"{"sort": "random"}"#).is_err());
    }

    #[test]
    fn sort_cycle_visits_every_order() {
        let mut sort = StatsSort::TotalTime;
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(sort);
            sort = sort.next();
        }
        assert_eq!(sort, StatsSort::TotalTime);
        assert_eq!(
            seen,
            vec![StatsSort::TotalTime, StatsSort::SelfTime, StatsSort::Count, StatsSort::Name]
        );
    }
}
