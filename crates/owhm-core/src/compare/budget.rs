use super::ComparisonOutcome;
use super::array::evaluate_deviation;
use crate::domain::{FIELD_SYNONYMS, NamedArraySet};
use crate::log::DiagnosticSink;
use crate::numerics::{Damping, ToleranceConfig};
use ndarray::ArrayD;
use std::collections::BTreeMap;

pub const PERCENT_DISCREPANCY: &str = "PERCENT_DISCREPANCY";

/// Storage and balance terms, compared after every flow term.
pub const BALANCE_TERMS: [&str; 3] = ["IN-OUT", "STORAGE_IN", "STORAGE_OUT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPass {
    FlowTerms,
    BalanceTerms,
}

impl BudgetPass {
    pub const ORDER: [BudgetPass; 2] = [BudgetPass::FlowTerms, BudgetPass::BalanceTerms];

    pub fn includes(self, field: &str) -> bool {
        let balance = BALANCE_TERMS.contains(&field);
        match self {
            Self::FlowTerms => !balance && field != PERCENT_DISCREPANCY,
            Self::BalanceTerms => balance,
        }
    }
}

/// Compares two budgets field by field; the first failing field ends the comparison.
pub fn compare_budgets(
    sim: &NamedArraySet,
    valid: &NamedArraySet,
    tolerance: &ToleranceConfig,
) -> ComparisonOutcome {
    let sim_fields = canonical_fields(sim);
    let valid_fields = canonical_fields(valid);

    if !sim_fields.keys().eq(valid_fields.keys()) {
        return key_mismatch(&sim_fields, &valid_fields);
    }

    let damping = Damping::budget(tolerance.offset);
    for pass in BudgetPass::ORDER {
        for (&field, &valid_array) in &valid_fields {
            if !pass.includes(field) {
                continue;
            }
            let Some(&sim_array) = sim_fields.get(field) else {
                continue;
            };

            if sim_array.len() != valid_array.len() || sim_array.shape() != valid_array.shape() {
                return ComparisonOutcome::StructuralMismatch {
                    field: Some(field.to_string()),
                    reason: format!("Budget arrays are not compatible: {}", field),
                };
            }

            let outcome = evaluate_deviation(
                sim_array,
                valid_array,
                tolerance.cell_tol,
                tolerance.array_tol,
                damping,
                Some(field),
            );
            tracing::debug!(field, ?pass, kind = outcome.kind().as_str(), "budget item compared");
            if !outcome.passed() {
                return outcome;
            }
        }
    }

    ComparisonOutcome::Pass
}

/// Boolean entry point; `incremental_tolerance` applies per entry and
/// `budget_tolerance` to the mean of each item.
pub fn budget_compare(
    sim: &NamedArraySet,
    valid: &NamedArraySet,
    incremental_tolerance: f64,
    budget_tolerance: f64,
    offset: f64,
    sink: &dyn DiagnosticSink,
) -> bool {
    let tolerance = ToleranceConfig::new(incremental_tolerance, budget_tolerance, offset);
    compare_budgets(sim, valid, &tolerance).report_to(sink)
}

/// Field view with synonym names mapped to their canonical spelling. A
/// synonym's data replaces a canonical field of the same name, as
/// [`NamedArraySet::normalize_synonyms`] does.
fn canonical_fields(set: &NamedArraySet) -> BTreeMap<&str, &ArrayD<f64>> {
    let mut fields = BTreeMap::new();
    for (name, values) in set {
        match FIELD_SYNONYMS.iter().find(|(alias, _)| *alias == name.as_str()) {
            Some((_, canonical)) => {
                fields.insert(*canonical, values);
            }
            None => {
                fields.entry(name.as_str()).or_insert(values);
            }
        }
    }
    fields
}

fn key_mismatch(
    sim: &BTreeMap<&str, &ArrayD<f64>>,
    valid: &BTreeMap<&str, &ArrayD<f64>>,
) -> ComparisonOutcome {
    let only_sim: Vec<&str> = sim
        .keys()
        .filter(|key| !valid.contains_key(*key))
        .copied()
        .collect();
    let only_valid: Vec<&str> = valid
        .keys()
        .filter(|key| !sim.contains_key(*key))
        .copied()
        .collect();

    ComparisonOutcome::StructuralMismatch {
        field: None,
        reason: format!(
            "Budget items do not match: candidate only [{}], reference only [{}]",
            only_sim.join(", "),
            only_valid.join(", ")
        ),
    }
}
