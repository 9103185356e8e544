use super::ComparisonOutcome;
use super::budget::compare_budgets;
use crate::farm::FarmEntityTimeSeries;
use crate::log::DiagnosticSink;
use crate::numerics::ToleranceConfig;
use serde::Serialize;

/// Farm comparison result; `entity` names the farm whose budget failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FarmComparison {
    pub entity: Option<i64>,
    pub outcome: ComparisonOutcome,
}

impl FarmComparison {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }

    pub fn diagnostic(&self) -> Option<String> {
        let block = self.outcome.diagnostic()?;
        Some(match self.entity {
            Some(entity) => format!("Farm entity {}:\n{}", entity, block),
            None => block,
        })
    }

    pub fn report_to(&self, sink: &dyn DiagnosticSink) -> bool {
        if let Some(block) = self.diagnostic() {
            sink.record(&block);
        }
        self.passed()
    }
}

/// Compares two stress-period farm series entity by entity as 1-D budgets.
pub fn compare_farm_outputs(
    sim: &FarmEntityTimeSeries,
    valid: &FarmEntityTimeSeries,
    tolerance: &ToleranceConfig,
) -> FarmComparison {
    if sim.entity_ids() != valid.entity_ids() {
        tracing::debug!(
            sim_entities = ?sim.entity_ids(),
            valid_entities = ?valid.entity_ids(),
            "farm entity sets differ"
        );
        return FarmComparison {
            entity: None,
            outcome: ComparisonOutcome::StructuralMismatch {
                field: None,
                reason: "Farm numbers do not match".to_string(),
            },
        };
    }

    let sim_budgets = sim.to_budget_sets();
    for (entity, valid_budget) in valid.to_budget_sets() {
        let Some(sim_budget) = sim_budgets.get(&entity) else {
            continue;
        };
        let outcome = compare_budgets(sim_budget, &valid_budget, tolerance);
        if !outcome.passed() {
            return FarmComparison {
                entity: Some(entity),
                outcome,
            };
        }
    }

    FarmComparison {
        entity: None,
        outcome: ComparisonOutcome::Pass,
    }
}

pub fn farm_outputs_compare(
    sim: &FarmEntityTimeSeries,
    valid: &FarmEntityTimeSeries,
    incremental_tolerance: f64,
    budget_tolerance: f64,
    offset: f64,
    sink: &dyn DiagnosticSink,
) -> bool {
    let tolerance = ToleranceConfig::new(incremental_tolerance, budget_tolerance, offset);
    compare_farm_outputs(sim, valid, &tolerance).report_to(sink)
}
