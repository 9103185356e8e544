pub mod array;
pub mod budget;
pub mod farm;
pub mod localize;

pub use array::{array_compare, compare_arrays, evaluate_deviation};
pub use budget::{BudgetPass, budget_compare, compare_budgets};
pub use farm::{FarmComparison, compare_farm_outputs, farm_outputs_compare};
pub use localize::{CellFailure, Coordinate, locate_failures, localize};

use crate::log::DiagnosticSink;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Pass,
    StructuralMismatch,
    AggregateDeviation,
    LocalizedDeviation,
}

impl OutcomeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::StructuralMismatch => "structural_mismatch",
            Self::AggregateDeviation => "aggregate_deviation",
            Self::LocalizedDeviation => "localized_deviation",
        }
    }
}

/// Result of one comparison. `field` is set for budget items and empty for
/// plain array comparisons.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonOutcome {
    Pass,
    StructuralMismatch {
        field: Option<String>,
        reason: String,
    },
    AggregateDeviation {
        field: Option<String>,
        mean_error: f64,
        tolerance: f64,
    },
    LocalizedDeviation {
        field: Option<String>,
        failures: Vec<CellFailure>,
    },
}

impl ComparisonOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Pass => OutcomeKind::Pass,
            Self::StructuralMismatch { .. } => OutcomeKind::StructuralMismatch,
            Self::AggregateDeviation { .. } => OutcomeKind::AggregateDeviation,
            Self::LocalizedDeviation { .. } => OutcomeKind::LocalizedDeviation,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Pass => None,
            Self::StructuralMismatch { field, .. }
            | Self::AggregateDeviation { field, .. }
            | Self::LocalizedDeviation { field, .. } => field.as_deref(),
        }
    }

    /// The diagnostic block written to the log; `None` on pass.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Pass => None,
            Self::StructuralMismatch { reason, .. } => Some(format!("{}\n", reason)),
            Self::AggregateDeviation {
                field: None,
                mean_error,
                tolerance,
            } => Some(format!(
                "Mean error: {:.2} is greater than array tolerance: {:.2}\n",
                mean_error, tolerance
            )),
            Self::AggregateDeviation {
                field: Some(field),
                mean_error,
                tolerance,
            } => Some(format!(
                "Budget item {}: Budget error: {:.2} is greater than budget tolerance: {:.2}\n",
                field, mean_error, tolerance
            )),
            Self::LocalizedDeviation { field, failures } => {
                Some(localize(failures, field.as_deref()))
            }
        }
    }

    /// Writes the diagnostic block, if any, and returns the pass flag.
    pub fn report_to(&self, sink: &dyn DiagnosticSink) -> bool {
        if let Some(block) = self.diagnostic() {
            sink.record(&block);
        }
        self.passed()
    }
}

#[cfg(test)]
mod tests {
    use super::{CellFailure, ComparisonOutcome, Coordinate, OutcomeKind};
    use crate::log::MemorySink;

    #[test]
    fn pass_writes_nothing() {
        let sink = MemorySink::new();
        assert!(ComparisonOutcome::Pass.report_to(&sink));
        assert!(sink.is_empty());
    }

    #[test]
    fn aggregate_diagnostic_depends_on_field() {
        let array = ComparisonOutcome::AggregateDeviation {
            field: None,
            mean_error: 0.123,
            tolerance: 0.01,
        };
        let budget = ComparisonOutcome::AggregateDeviation {
            field: Some("STORAGE_IN".to_string()),
            mean_error: 0.123,
            tolerance: 0.01,
        };

        assert_eq!(
            array.diagnostic().as_deref(),
            Some("Mean error: 0.12 is greater than array tolerance: 0.01\n")
        );
        assert_eq!(
            budget.diagnostic().as_deref(),
            Some("Budget item STORAGE_IN: Budget error: 0.12 is greater than budget tolerance: 0.01\n")
        );
        assert_eq!(budget.kind(), OutcomeKind::AggregateDeviation);
        assert_eq!(budget.field(), Some("STORAGE_IN"));
    }

    #[test]
    fn failing_outcome_writes_exactly_one_block() {
        let sink = MemorySink::new();
        let outcome = ComparisonOutcome::LocalizedDeviation {
            field: None,
            failures: vec![
                CellFailure {
                    coordinate: Coordinate::TimeSeries1D { entry: 1 },
                    sim_value: 2.0,
                    valid_value: 1.0,
                    deviation: 0.5,
                },
                CellFailure {
                    coordinate: Coordinate::TimeSeries1D { entry: 2 },
                    sim_value: 3.0,
                    valid_value: 1.0,
                    deviation: 1.0,
                },
            ],
        };

        assert!(!outcome.report_to(&sink));
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lines().count(), 2);
    }
}
