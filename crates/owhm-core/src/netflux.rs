//! Net flux per budget category (`X_IN - X_OUT`) for charting and export.
//!
//! Net values never gate a regression result.

use crate::domain::{NamedArraySet, OwhmError, Target};
use ndarray::ArrayD;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

pub const IN_SUFFIX: &str = "_IN";
pub const OUT_SUFFIX: &str = "_OUT";

/// Totals and balance terms that have no place in a per-category chart.
pub const NET_FLUX_IGNORE: [&str; 4] = ["TOTAL_IN", "TOTAL_OUT", "IN-OUT", "PERCENT_DISCREPANCY"];

pub type NetFluxMap = BTreeMap<String, ArrayD<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingRule {
    /// `X_IN` pairs with exactly `X_OUT`; anything else is an error.
    #[default]
    ExactSuffix,
    /// Any key containing `_IN` pairs with the first non-`_IN` key that
    /// contains its prefix. Unpaired keys are skipped.
    FirstContaining,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetFluxError {
    #[error("field '{field}' is not present in the budget")]
    MissingField { field: String },
    #[error("field '{field}' has no matching {expected} counterpart")]
    Unpaired { field: String, expected: &'static str },
    #[error("fields '{inflow}' and '{outflow}' have different shapes")]
    ShapeMismatch { inflow: String, outflow: String },
}

impl From<NetFluxError> for OwhmError {
    fn from(error: NetFluxError) -> Self {
        OwhmError::input_validation("INPUT.NET_FLUX", error.to_string())
    }
}

/// Budget field names eligible for net-flux pairing.
pub fn net_flux_fields(set: &NamedArraySet) -> BTreeSet<String> {
    set.keys()
        .into_iter()
        .filter(|name| !NET_FLUX_IGNORE.contains(name))
        .map(str::to_string)
        .collect()
}

/// Pairs inflow and outflow fields of `set` restricted to `fields`.
pub fn compute_net(
    set: &NamedArraySet,
    fields: &BTreeSet<String>,
    rule: PairingRule,
) -> Result<NetFluxMap, NetFluxError> {
    if let Some(missing) = fields.iter().find(|field| !set.contains(field)) {
        return Err(NetFluxError::MissingField {
            field: missing.clone(),
        });
    }

    let pairs = match rule {
        PairingRule::ExactSuffix => exact_suffix_pairs(fields)?,
        PairingRule::FirstContaining => first_containing_pairs(fields),
    };

    let mut nets = NetFluxMap::new();
    for (category, inflow, outflow) in pairs {
        let (Some(inflow_values), Some(outflow_values)) = (set.get(&inflow), set.get(&outflow))
        else {
            continue;
        };
        if inflow_values.shape() != outflow_values.shape() {
            return Err(NetFluxError::ShapeMismatch { inflow, outflow });
        }
        nets.insert(category, inflow_values - outflow_values);
    }

    Ok(nets)
}

fn exact_suffix_pairs(
    fields: &BTreeSet<String>,
) -> Result<Vec<(String, String, String)>, NetFluxError> {
    let mut pairs = Vec::new();
    for field in fields {
        if let Some(category) = field.strip_suffix(IN_SUFFIX) {
            let outflow = format!("{}{}", category, OUT_SUFFIX);
            if !fields.contains(&outflow) {
                return Err(NetFluxError::Unpaired {
                    field: field.clone(),
                    expected: OUT_SUFFIX,
                });
            }
            pairs.push((category.to_string(), field.clone(), outflow));
        } else if let Some(category) = field.strip_suffix(OUT_SUFFIX) {
            if !fields.contains(&format!("{}{}", category, IN_SUFFIX)) {
                return Err(NetFluxError::Unpaired {
                    field: field.clone(),
                    expected: IN_SUFFIX,
                });
            }
        } else {
            return Err(NetFluxError::Unpaired {
                field: field.clone(),
                expected: "_IN/_OUT",
            });
        }
    }
    Ok(pairs)
}

fn first_containing_pairs(fields: &BTreeSet<String>) -> Vec<(String, String, String)> {
    let mut pairs = Vec::new();
    for field in fields.iter().filter(|field| field.contains(IN_SUFFIX)) {
        // drop the last three characters, not bytes: names are not always ASCII
        let category = field
            .char_indices()
            .rev()
            .nth(IN_SUFFIX.chars().count() - 1)
            .map_or("", |(index, _)| &field[..index]);
        let counterpart = fields
            .iter()
            .find(|other| other.contains(category) && !other.contains(IN_SUFFIX));
        match counterpart {
            Some(outflow) => pairs.push((category.to_string(), field.clone(), outflow.clone())),
            None => tracing::debug!(field = field.as_str(), "no outflow counterpart, skipped"),
        }
    }
    pairs
}

#[derive(Debug, Clone, PartialEq)]
struct CachedNet {
    fields: BTreeSet<String>,
    rule: PairingRule,
    nets: NetFluxMap,
}

/// Candidate and reference budgets side by side, with net flux memoized per
/// target until the requested field set or pairing rule changes.
#[derive(Debug, Clone)]
pub struct BudgetPairView {
    candidate: NamedArraySet,
    reference: NamedArraySet,
    cache: BTreeMap<Target, CachedNet>,
    computations: usize,
}

impl BudgetPairView {
    pub fn new(candidate: NamedArraySet, reference: NamedArraySet) -> Self {
        Self {
            candidate,
            reference,
            cache: BTreeMap::new(),
            computations: 0,
        }
    }

    pub fn budget(&self, target: Target) -> &NamedArraySet {
        match target {
            Target::Candidate => &self.candidate,
            Target::Reference => &self.reference,
        }
    }

    /// Number of periods, taken from the reference `IN-OUT` term.
    pub fn period_count(&self) -> usize {
        self.reference.get("IN-OUT").map_or(0, ArrayD::len)
    }

    pub fn net(
        &mut self,
        target: Target,
        fields: &BTreeSet<String>,
        rule: PairingRule,
    ) -> Result<&NetFluxMap, NetFluxError> {
        let budget = match target {
            Target::Candidate => &self.candidate,
            Target::Reference => &self.reference,
        };

        let cached = match self.cache.entry(target) {
            Entry::Occupied(entry) => {
                let cached = entry.into_mut();
                if cached.fields != *fields || cached.rule != rule {
                    cached.nets = compute_net(budget, fields, rule)?;
                    cached.fields = fields.clone();
                    cached.rule = rule;
                    self.computations += 1;
                }
                cached
            }
            Entry::Vacant(entry) => {
                let nets = compute_net(budget, fields, rule)?;
                self.computations += 1;
                entry.insert(CachedNet {
                    fields: fields.clone(),
                    rule,
                    nets,
                })
            }
        };
        Ok(&cached.nets)
    }

    /// Net flux for the chart view: default ignore list, reference field set.
    pub fn chart_net(&mut self, target: Target, rule: PairingRule) -> Result<&NetFluxMap, NetFluxError> {
        let fields = net_flux_fields(&self.reference);
        self.net(target, &fields, rule)
    }

    pub fn computations(&self) -> usize {
        self.computations
    }
}

#[cfg(test)]
mod tests {
    use super::{BudgetPairView, NetFluxError, PairingRule, compute_net, net_flux_fields};
    use crate::domain::{NamedArraySet, Target};
    use ndarray::{ArrayD, IxDyn};
    use std::collections::BTreeSet;

    fn series(values: &[f64]) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
            .expect("shape should match data")
    }

    fn budget(fields: &[(&str, Vec<f64>)]) -> NamedArraySet {
        let mut set = NamedArraySet::new();
        for (name, values) in fields {
            set.insert(name, series(values));
        }
        set
    }

    fn names(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|field| field.to_string()).collect()
    }

    #[test]
    fn exact_pairs_are_order_independent() {
        let set = budget(&[
            ("RCH_OUT", vec![1.0, 1.0]),
            ("WEL_IN", vec![5.0, 6.0]),
            ("RCH_IN", vec![3.0, 4.0]),
            ("WEL_OUT", vec![2.0, 2.0]),
        ]);
        let forward = names(&["WEL_IN", "WEL_OUT", "RCH_IN", "RCH_OUT"]);
        let backward = names(&["RCH_OUT", "RCH_IN", "WEL_OUT", "WEL_IN"]);

        let nets = compute_net(&set, &forward, PairingRule::ExactSuffix)
            .expect("paired fields should net");
        assert_eq!(nets.keys().collect::<Vec<_>>(), vec!["RCH", "WEL"]);
        assert_eq!(nets["WEL"], series(&[3.0, 4.0]));
        assert_eq!(nets["RCH"], series(&[2.0, 3.0]));
        assert_eq!(
            compute_net(&set, &backward, PairingRule::ExactSuffix)
                .expect("paired fields should net"),
            nets
        );
    }

    #[test]
    fn unpaired_fields_fail_loudly() {
        let set = budget(&[("WEL_IN", vec![1.0]), ("DRN_OUT", vec![1.0])]);

        let error = compute_net(&set, &names(&["WEL_IN"]), PairingRule::ExactSuffix)
            .expect_err("unpaired inflow should fail");
        assert_eq!(
            error,
            NetFluxError::Unpaired {
                field: "WEL_IN".to_string(),
                expected: "_OUT"
            }
        );

        assert!(compute_net(&set, &names(&["DRN_OUT"]), PairingRule::ExactSuffix).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let set = budget(&[("WEL_IN", vec![1.0])]);
        let error = compute_net(&set, &names(&["SFR_IN"]), PairingRule::ExactSuffix)
            .expect_err("missing field should fail");
        assert_eq!(
            error,
            NetFluxError::MissingField {
                field: "SFR_IN".to_string()
            }
        );
    }

    #[test]
    fn legacy_rule_takes_first_containing_key() {
        let set = budget(&[
            ("MNW_IN", vec![4.0]),
            ("MNW_EXTRA", vec![1.0]),
            ("MNW_OUT", vec![3.0]),
            ("LAK_IN", vec![2.0]),
        ]);
        let fields = names(&["MNW_IN", "MNW_EXTRA", "MNW_OUT", "LAK_IN"]);

        let nets = compute_net(&set, &fields, PairingRule::FirstContaining)
            .expect("legacy pairing should not fail");
        assert_eq!(nets.len(), 1);
        assert_eq!(nets["MNW"], series(&[3.0]));
    }

    #[test]
    fn legacy_rule_trims_characters_in_non_ascii_names() {
        let set = budget(&[
            ("A_INÉÉ", vec![1.0]),
            ("A_OUT", vec![1.0]),
            ("ÉTANG_IN", vec![5.0, 6.0]),
            ("ÉTANG_OUT", vec![2.0, 2.0]),
        ]);
        let fields = names(&["A_INÉÉ", "A_OUT", "ÉTANG_IN", "ÉTANG_OUT"]);

        let nets = compute_net(&set, &fields, PairingRule::FirstContaining)
            .expect("legacy pairing should not fail");
        assert_eq!(nets.len(), 1);
        assert_eq!(nets["ÉTANG"], series(&[3.0, 4.0]));
    }

    #[test]
    fn chart_fields_drop_totals() {
        let set = budget(&[
            ("TOTAL_IN", vec![1.0]),
            ("TOTAL_OUT", vec![1.0]),
            ("IN-OUT", vec![0.0]),
            ("PERCENT_DISCREPANCY", vec![0.0]),
            ("WEL_IN", vec![1.0]),
            ("WEL_OUT", vec![1.0]),
        ]);
        assert_eq!(net_flux_fields(&set), names(&["WEL_IN", "WEL_OUT"]));
    }

    #[test]
    fn pair_view_memoizes_until_fields_change() {
        let reference = budget(&[
            ("IN-OUT", vec![0.0, 0.0]),
            ("WEL_IN", vec![5.0, 5.0]),
            ("WEL_OUT", vec![1.0, 1.0]),
            ("RCH_IN", vec![2.0, 2.0]),
            ("RCH_OUT", vec![2.0, 2.0]),
        ]);
        let mut view = BudgetPairView::new(reference.clone(), reference);
        assert_eq!(view.period_count(), 2);

        view.chart_net(Target::Reference, PairingRule::ExactSuffix)
            .expect("chart net should compute");
        view.chart_net(Target::Reference, PairingRule::ExactSuffix)
            .expect("chart net should be cached");
        assert_eq!(view.computations(), 1);

        view.chart_net(Target::Candidate, PairingRule::ExactSuffix)
            .expect("candidate net should compute");
        assert_eq!(view.computations(), 2);

        let wells_only = names(&["WEL_IN", "WEL_OUT"]);
        let nets = view
            .net(Target::Reference, &wells_only, PairingRule::ExactSuffix)
            .expect("narrowed field set should compute");
        assert_eq!(nets.len(), 1);
        assert_eq!(view.computations(), 3);
    }
}
