// AOR Flow - Execution strategies

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a flow dispatches its enabled steps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStrategy {
    /// Steps run in declared order; each step receives the previous reply's
    /// content. A failure short-circuits the remainder.
    #[default]
    Sequential,

    /// All enabled steps run concurrently on the input; replies are merged
    /// deterministically in declared order.
    Parallel,

    /// All enabled steps run concurrently; the first success wins and the
    /// rest are cancelled.
    Competition,

    /// Like Sequential, but each step receives the previous step's full
    /// reply including its `data` payload.
    Pipeline,
}

impl fmt::Display for FlowStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowStrategy::Sequential => "SEQUENTIAL",
            FlowStrategy::Parallel => "PARALLEL",
            FlowStrategy::Competition => "COMPETITION",
            FlowStrategy::Pipeline => "PIPELINE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(FlowStrategy::Sequential.to_string(), "SEQUENTIAL");
        assert_eq!(FlowStrategy::Competition.to_string(), "COMPETITION");

        let encoded = serde_json::to_string(&FlowStrategy::Parallel).unwrap();
        assert_eq!(encoded, "\"PARALLEL\"");

        let decoded: FlowStrategy = serde_json::from_str("\"PIPELINE\"").unwrap();
        assert_eq!(decoded, FlowStrategy::Pipeline);
    }
}
