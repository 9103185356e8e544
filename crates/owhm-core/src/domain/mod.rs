pub mod errors;

pub use errors::{OwhmError, OwhmErrorCategory, OwhmResult};

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::{Display, Formatter};

/// Reader bookkeeping columns that never take part in a comparison.
pub const READER_BOOKKEEPING_FIELDS: [&str; 3] = ["totim", "time_step", "stress_period"];

/// Field names that differ between simulator variants for the same budget term.
pub const FIELD_SYNONYMS: [(&str, &str); 2] = [("MNW2_IN", "MNW_IN"), ("MNW2_OUT", "MNW_OUT")];

/// Field-name to array mapping with upper-case, unique keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NamedArraySet {
    fields: BTreeMap<String, ArrayD<f64>>,
}

impl NamedArraySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from reader records, skipping bookkeeping fields.
    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, ArrayD<f64>)>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for (name, values) in records {
            let name = name.as_ref();
            if is_bookkeeping_field(name) {
                continue;
            }
            set.insert(name, values);
        }
        set
    }

    pub fn insert(&mut self, name: impl AsRef<str>, values: ArrayD<f64>) -> Option<ArrayD<f64>> {
        self.fields.insert(normalize_field_name(name.as_ref()), values)
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.fields.get(&normalize_field_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(&normalize_field_name(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<ArrayD<f64>> {
        self.fields.remove(&normalize_field_name(name))
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, ArrayD<f64>> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn same_keys(&self, other: &Self) -> bool {
        self.fields.keys().eq(other.fields.keys())
    }

    /// Renames known synonym fields to their canonical names.
    pub fn normalize_synonyms(&mut self) {
        for (alias, canonical) in FIELD_SYNONYMS {
            if let Some(values) = self.fields.remove(alias) {
                self.fields.insert(canonical.to_string(), values);
            }
        }
    }
}

impl<'a> IntoIterator for &'a NamedArraySet {
    type Item = (&'a String, &'a ArrayD<f64>);
    type IntoIter = btree_map::Iter<'a, String, ArrayD<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

fn is_bookkeeping_field(name: &str) -> bool {
    let name = name.trim();
    READER_BOOKKEEPING_FIELDS
        .iter()
        .any(|field| field.eq_ignore_ascii_case(name))
}

/// Outcome of reading one simulation output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    data: NamedArraySet,
    success: bool,
    fail_list: Vec<String>,
}

impl ParsedOutput {
    pub fn loaded(data: NamedArraySet) -> Self {
        Self {
            data,
            success: true,
            fail_list: Vec::new(),
        }
    }

    pub fn failed(data: NamedArraySet, fail_list: Vec<String>) -> Self {
        Self {
            data,
            success: false,
            fail_list,
        }
    }

    pub fn data(&self) -> &NamedArraySet {
        &self.data
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn fail_list(&self) -> &[String] {
        &self.fail_list
    }

    pub fn into_data(self) -> NamedArraySet {
        self.data
    }

    /// Returns the payload, or an upstream-parse error naming the failed fields.
    pub fn require_loaded(self, label: &str) -> OwhmResult<NamedArraySet> {
        if self.success {
            return Ok(self.data);
        }
        let reason = if self.fail_list.is_empty() {
            "unknown loading error".to_string()
        } else {
            self.fail_list.join(", ")
        };
        Err(OwhmError::input_validation(
            "INPUT.UPSTREAM_PARSE",
            format!("{} output failed to load: {}", label, reason),
        ))
    }
}

/// Which side of a comparison an array set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Candidate,
    Reference,
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candidate => f.write_str("candidate"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

/// Simulation output families the harness knows how to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Head,
    ListBudget,
    CellBudget,
    FarmOutput,
}

impl OutputKind {
    pub const ALL: [OutputKind; 4] = [
        OutputKind::ListBudget,
        OutputKind::Head,
        OutputKind::CellBudget,
        OutputKind::FarmOutput,
    ];

    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::ListBudget => &["lst", "list"],
            Self::Head => &["hed", "head", "hds", "ufh"],
            Self::CellBudget => &["cbc", "bud"],
            Self::FarmOutput => &["out"],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::ListBudget => "list_budget",
            Self::CellBudget => "cell_budget",
            Self::FarmOutput => "farm_output",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }
}

impl Display for OutputKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}
