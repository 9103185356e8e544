use super::ComparisonOutcome;
use super::localize::locate_failures;
use crate::log::DiagnosticSink;
use crate::numerics::{Damping, deviation_array, exceeds, mean};
use ndarray::ArrayD;

/// Two-stage tolerance check over same-shaped arrays.
///
/// The aggregate (mean) check runs first and short-circuits; cells are only
/// localized once the aggregate is within `array_tol`.
pub fn evaluate_deviation(
    sim: &ArrayD<f64>,
    valid: &ArrayD<f64>,
    cell_tol: f64,
    array_tol: f64,
    damping: Damping,
    field: Option<&str>,
) -> ComparisonOutcome {
    let deviation = deviation_array(sim, valid, damping);

    let mean_error = mean(&deviation).abs();
    if exceeds(mean_error, array_tol) {
        return ComparisonOutcome::AggregateDeviation {
            field: field.map(str::to_string),
            mean_error,
            tolerance: array_tol,
        };
    }

    let failures = locate_failures(sim, valid, &deviation, |value| exceeds(value, cell_tol));
    if failures.is_empty() {
        ComparisonOutcome::Pass
    } else {
        ComparisonOutcome::LocalizedDeviation {
            field: field.map(str::to_string),
            failures,
        }
    }
}

/// Compares value-like arrays such as heads.
pub fn compare_arrays(
    sim: &ArrayD<f64>,
    valid: &ArrayD<f64>,
    cell_tol: f64,
    array_tol: f64,
) -> ComparisonOutcome {
    if sim.shape() != valid.shape() {
        tracing::debug!(
            sim_shape = ?sim.shape(),
            valid_shape = ?valid.shape(),
            "array shapes differ"
        );
        return ComparisonOutcome::StructuralMismatch {
            field: None,
            reason: "Array shapes are not the same dimension".to_string(),
        };
    }

    evaluate_deviation(sim, valid, cell_tol, array_tol, Damping::heads(), None)
}

/// Boolean entry point; every failure writes one block to `sink`.
pub fn array_compare(
    sim: &ArrayD<f64>,
    valid: &ArrayD<f64>,
    cell_tol: f64,
    array_tol: f64,
    sink: &dyn DiagnosticSink,
) -> bool {
    compare_arrays(sim, valid, cell_tol, array_tol).report_to(sink)
}
