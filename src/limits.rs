//! Depth and fan-out caps for sub-result hierarchies.
//!
//! The same [`HierarchyLimits`] are applied when a document is parsed and
//! again before each batch is published. Level 1 is the list of direct
//! children of a top-level result.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticSink, Warning};
use crate::model::SubResult;

/// Default maximum nesting depth of sub-results.
pub const DEFAULT_MAX_HIERARCHY_LEVEL: usize = 10;

/// Default maximum number of sub-results under one node.
pub const DEFAULT_MAX_SUB_RESULTS_PER_LEVEL: usize = 300;

/// Hard limits on sub-result nesting depth and breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLimits {
    pub max_depth: usize,
    pub max_per_level: usize,
}

impl Default for HierarchyLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_HIERARCHY_LEVEL,
            max_per_level: DEFAULT_MAX_SUB_RESULTS_PER_LEVEL,
        }
    }
}

impl HierarchyLimits {
    /// Returns `true` if nodes at `level` may be kept.
    pub fn allows_level(&self, level: usize) -> bool {
        level <= self.max_depth
    }

    /// Truncates `sub_results` (which sit at `level`) and all their
    /// descendants to these limits.
    ///
    /// Excess children keep their original order; everything beyond the
    /// depth limit is removed. Each cut is reported as a warning for `test`.
    pub fn enforce(
        &self,
        test: &str,
        sub_results: &mut Vec<SubResult>,
        level: usize,
        sink: &dyn DiagnosticSink,
    ) {
        if sub_results.is_empty() {
            return;
        }

        if !self.allows_level(level) {
            sink.warning(Warning::MaxHierarchyLevelReached {
                test: test.to_string(),
                max: self.max_depth,
            });
            sub_results.clear();
            return;
        }

        if sub_results.len() > self.max_per_level {
            sink.warning(Warning::MaxSubResultsPerLevel {
                test: test.to_string(),
                found: sub_results.len(),
                max: self.max_per_level,
            });
            sub_results.truncate(self.max_per_level);
        }

        for sub_result in sub_results.iter_mut() {
            self.enforce(test, &mut sub_result.sub_results, level + 1, sink);
        }
    }
}
