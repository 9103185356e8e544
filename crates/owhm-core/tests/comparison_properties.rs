use ndarray::{ArrayD, IxDyn};
use owhm_core::compare::{
    ComparisonOutcome, Coordinate, OutcomeKind, array_compare, budget_compare, compare_arrays,
    compare_budgets,
};
use owhm_core::domain::NamedArraySet;
use owhm_core::farm::{FarmEntity, FarmEntityTimeSeries};
use owhm_core::log::{DiagnosticSink, MemorySink};
use owhm_core::netflux::{PairingRule, compute_net};
use owhm_core::numerics::{Damping, ToleranceConfig, deviation_array};
use std::collections::{BTreeMap, BTreeSet};

fn array(shape: &[usize], values: Vec<f64>) -> ArrayD<f64> {
    ArrayD::from_shape_vec(IxDyn(shape), values).expect("shape should match data")
}

fn series(values: &[f64]) -> ArrayD<f64> {
    array(&[values.len()], values.to_vec())
}

fn budget(fields: &[(&str, Vec<f64>)]) -> NamedArraySet {
    let mut set = NamedArraySet::new();
    for (name, values) in fields {
        set.insert(name, series(values));
    }
    set
}

#[test]
fn differing_shapes_fail_without_touching_elements() {
    let shapes: [(&[usize], &[usize]); 3] = [(&[4], &[5]), (&[2, 3], &[3, 2]), (&[2, 2, 2], &[8])];
    for (sim_shape, valid_shape) in shapes {
        let sim = ArrayD::from_elem(IxDyn(sim_shape), f64::NAN);
        let valid = ArrayD::from_elem(IxDyn(valid_shape), f64::INFINITY);
        let sink = MemorySink::new();

        assert!(!array_compare(&sim, &valid, 1.0, 1.0, &sink));
        assert_eq!(sink.contents(), "Array shapes are not the same dimension\n");
    }
}

#[test]
fn any_finite_array_matches_itself() {
    let fixtures = [
        array(&[3], vec![0.0, -1.123456789, 1.0e6]),
        array(&[2, 2], vec![-50.0, 0.0, 12.5, 3.0]),
        array(&[1, 2, 3], vec![7.0, -7.0, 0.1, -0.1, 1.0e-9, 400.0]),
        array(&[2, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]),
    ];
    for values in &fixtures {
        let sink = MemorySink::new();
        assert!(array_compare(values, values, 0.0, 0.0, &sink));
        assert!(sink.is_empty());

        let mut set = NamedArraySet::new();
        set.insert("STORAGE_IN", values.clone());
        assert!(budget_compare(&set, &set, 0.0, 0.0, 0.0, &sink));
    }
}

#[test]
fn larger_offset_shrinks_budget_deviation() {
    let sim = series(&[12.0, -40.0, 0.5, 900.0]);
    let valid = series(&[10.0, -35.0, 0.25, 1000.0]);

    let mut previous: Option<ArrayD<f64>> = None;
    for offset in [0.0, 1.0, 10.0, 100.0, 1000.0] {
        let deviation = deviation_array(&sim, &valid, Damping::budget(offset));
        if let Some(previous) = &previous {
            for (now, before) in deviation.iter().zip(previous.iter()) {
                assert!(now.abs() < before.abs(), "offset {offset}: {now} !< {before}");
            }
        }
        previous = Some(deviation);
    }
}

#[test]
fn systematic_bias_fails_on_the_aggregate_path() {
    let valid = array(&[4, 4], vec![100.0; 16]);
    let sim = array(&[4, 4], vec![103.0; 16]);
    let sink = MemorySink::new();

    // every cell is ~3% off: under cell_tol, over array_tol
    assert!(!array_compare(&sim, &valid, 0.05, 0.01, &sink));
    let contents = sink.contents();
    assert!(contents.contains("array tolerance"));
    assert!(!contents.contains("row:"));
}

#[test]
fn single_injected_cell_is_localized_in_three_dimensions() {
    let valid = array(&[2, 2, 2], vec![50.0; 8]);
    let mut sim = valid.clone();
    sim[[1, 0, 1].as_slice()] = 55.0;

    let outcome = compare_arrays(&sim, &valid, 0.05, 0.05);
    let ComparisonOutcome::LocalizedDeviation { failures, .. } = &outcome else {
        panic!("expected localized deviation, got {outcome:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].coordinate,
        Coordinate::Spatial3D {
            layer: 2,
            row: 1,
            column: 2
        }
    );

    let sink = MemorySink::new();
    assert!(!outcome.report_to(&sink));
    assert!(sink.contents().starts_with("Array failure: layer: 2, row: 1, column 2, sim_val: 55.00"));
}

#[test]
fn four_dimensional_failures_carry_the_stress_period() {
    let valid = array(&[2, 1, 2, 2], vec![10.0; 8]);
    let mut sim = valid.clone();
    sim[[1, 0, 1, 0].as_slice()] = 10.5;

    let outcome = compare_arrays(&sim, &valid, 0.01, 0.05);
    let ComparisonOutcome::LocalizedDeviation { failures, .. } = outcome else {
        panic!("expected localized deviation");
    };
    let coordinate = failures[0].coordinate;
    assert_eq!(coordinate.period(), Some(2));
    assert_eq!(coordinate.layer(), Some(1));
    assert_eq!(coordinate.row(), Some(2));
    assert_eq!(coordinate.column(), Some(1));
}

#[test]
fn budget_key_sets_must_match_even_when_shared_values_agree() {
    let sim = budget(&[("WEL_IN", vec![1.0, 2.0]), ("DRN_OUT", vec![3.0, 4.0])]);
    let valid = budget(&[("WEL_IN", vec![1.0, 2.0])]);

    let outcome = compare_budgets(&sim, &valid, &ToleranceConfig::default());
    assert_eq!(outcome.kind(), OutcomeKind::StructuralMismatch);
    let reverse = compare_budgets(&valid, &sim, &ToleranceConfig::default());
    assert_eq!(reverse.kind(), OutcomeKind::StructuralMismatch);
}

#[test]
fn budget_failures_stop_at_the_first_field() {
    let sim = budget(&[("AAA_IN", vec![900.0]), ("ZZZ_IN", vec![900.0])]);
    let valid = budget(&[("AAA_IN", vec![1.0]), ("ZZZ_IN", vec![1.0])]);
    let sink = MemorySink::new();

    assert!(!budget_compare(&sim, &valid, 0.01, 0.01, 100.0, &sink));
    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("Budget item AAA_IN:"));
}

#[test]
fn net_flux_pairs_are_independent_of_key_order() {
    let orders = [
        ["WEL_IN", "WEL_OUT", "RCH_IN", "RCH_OUT"],
        ["RCH_OUT", "WEL_OUT", "RCH_IN", "WEL_IN"],
    ];
    let values: BTreeMap<&str, Vec<f64>> = BTreeMap::from([
        ("WEL_IN", vec![5.0, 1.0]),
        ("WEL_OUT", vec![2.0, 3.0]),
        ("RCH_IN", vec![8.0, 8.0]),
        ("RCH_OUT", vec![0.5, 0.0]),
    ]);

    for order in orders {
        let mut set = NamedArraySet::new();
        for name in order {
            set.insert(name, series(&values[name]));
        }
        let fields: BTreeSet<String> = order.iter().map(|name| name.to_string()).collect();

        let nets = compute_net(&set, &fields, PairingRule::ExactSuffix)
            .expect("paired fields should net");
        assert_eq!(nets.len(), 2);
        assert_eq!(nets["WEL"], series(&[3.0, -2.0]));
        assert_eq!(nets["RCH"], series(&[7.5, 8.0]));
    }
}

#[test]
fn farm_series_aggregate_to_weighted_period_means() {
    let entity = FarmEntity::new(vec![1, 1, 2, 2])
        .with_steps(vec![1, 2, 1, 2])
        .with_field("days", vec![1.0, 2.0, 4.0, 6.0])
        .with_field("q-tot-in", vec![10.0, 20.0, 10.0, 20.0]);
    let series = FarmEntityTimeSeries::from_entities(BTreeMap::from([(3, entity)]));

    let aggregated = series
        .aggregate_to_stress_periods()
        .expect("aggregation should succeed");
    let entity = aggregated.entity(3).expect("entity should survive");
    assert_eq!(entity.per(), &[1, 2]);
    assert_eq!(entity.field("q-tot-in"), Some(&[15.0, 15.0][..]));
}

#[test]
fn five_by_five_outlier_scenario() {
    let valid = array(&[5, 5], vec![10.0; 25]);
    let mut sim = valid.clone();
    sim[[3, 2].as_slice()] = 14.0;

    // 40% on one cell of 25 is a mean of ~0.0143 with the head damping
    let strict = compare_arrays(&sim, &valid, 0.01, 0.01);
    assert_eq!(strict.kind(), OutcomeKind::AggregateDeviation);

    let localized = compare_arrays(&sim, &valid, 0.01, 0.05);
    let ComparisonOutcome::LocalizedDeviation { failures, .. } = &localized else {
        panic!("expected localized deviation, got {localized:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].coordinate, Coordinate::Spatial2D { row: 4, column: 3 });

    let sink = MemorySink::new();
    assert!(array_compare(&sim, &valid, 0.5, 0.05, &sink));
    assert!(sink.is_empty());
}

#[test]
fn sinks_receive_one_block_per_failure_and_the_model_marker() {
    let sink = MemorySink::new();
    sink.record_model_name("model.hds");
    let valid = series(&[1.0, 1.0, 1.0, 1.0]);
    let sim = series(&[1.0, 5.0, 1.0, 5.0]);

    assert!(!array_compare(&sim, &valid, 0.01, 10.0, &sink));
    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], "@@@@@:  model.hds\n");
    assert_eq!(entries[1].lines().count(), 2);
}
