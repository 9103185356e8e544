use crate::domain::{OutputKind, OwhmError};
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const TOLERANCE_POLICY_PATH: &str = "tolerance-policy.json";

/// Added to head values before the ratio is taken. Chosen so it never cancels
/// a physically meaningful head.
pub const HEAD_OFFSET: f64 = 1.123456789;

pub const DEFAULT_BUDGET_OFFSET: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ToleranceConfig {
    #[serde(rename = "cellTol", default = "default_fraction")]
    pub cell_tol: f64,
    #[serde(rename = "arrayTol", default = "default_fraction")]
    pub array_tol: f64,
    #[serde(default = "default_offset")]
    pub offset: f64,
}

impl ToleranceConfig {
    pub const fn new(cell_tol: f64, array_tol: f64, offset: f64) -> Self {
        Self {
            cell_tol,
            array_tol,
            offset,
        }
    }

    /// Tolerance used by the regression drivers for every output kind.
    pub const fn regression_default() -> Self {
        Self::new(0.05, 0.05, DEFAULT_BUDGET_OFFSET)
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self::new(0.01, 0.01, DEFAULT_BUDGET_OFFSET)
    }
}

fn default_fraction() -> f64 {
    0.01
}

fn default_offset() -> f64 {
    DEFAULT_BUDGET_OFFSET
}

/// Per-kind tolerances for a regression session.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TolerancePolicy {
    #[serde(default = "ToleranceConfig::regression_default")]
    pub head: ToleranceConfig,
    #[serde(rename = "listBudget", default = "ToleranceConfig::regression_default")]
    pub list_budget: ToleranceConfig,
    #[serde(rename = "cellBudget", default = "ToleranceConfig::regression_default")]
    pub cell_budget: ToleranceConfig,
    #[serde(rename = "farmOutput", default = "ToleranceConfig::regression_default")]
    pub farm_output: ToleranceConfig,
}

impl TolerancePolicy {
    pub fn for_kind(&self, kind: OutputKind) -> ToleranceConfig {
        match kind {
            OutputKind::Head => self.head,
            OutputKind::ListBudget => self.list_budget,
            OutputKind::CellBudget => self.cell_budget,
            OutputKind::FarmOutput => self.farm_output,
        }
    }
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            head: ToleranceConfig::regression_default(),
            list_budget: ToleranceConfig::regression_default(),
            cell_budget: ToleranceConfig::regression_default(),
            farm_output: ToleranceConfig::regression_default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TolerancePolicyError {
    #[error("failed to read tolerance policy '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse tolerance policy '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("tolerance policy '{}' has negative or non-finite {field} for {kind}", path.display())]
    Invalid {
        path: PathBuf,
        kind: OutputKind,
        field: &'static str,
    },
}

impl From<TolerancePolicyError> for OwhmError {
    fn from(error: TolerancePolicyError) -> Self {
        let message = error.to_string();
        match error {
            TolerancePolicyError::Read { .. } => OwhmError::io_system("IO.TOLERANCE_POLICY", message),
            TolerancePolicyError::Parse { .. } | TolerancePolicyError::Invalid { .. } => {
                OwhmError::input_validation("INPUT.TOLERANCE_POLICY", message)
            }
        }
    }
}

pub fn load_tolerance_policy(
    policy_path: impl AsRef<Path>,
) -> Result<TolerancePolicy, TolerancePolicyError> {
    let policy_path = policy_path.as_ref();
    let source = fs::read_to_string(policy_path).map_err(|source| TolerancePolicyError::Read {
        path: policy_path.to_path_buf(),
        source,
    })?;
    let policy: TolerancePolicy =
        serde_json::from_str(&source).map_err(|source| TolerancePolicyError::Parse {
            path: policy_path.to_path_buf(),
            source,
        })?;

    for kind in OutputKind::ALL {
        let tolerance = policy.for_kind(kind);
        let checks = [
            ("cellTol", tolerance.cell_tol),
            ("arrayTol", tolerance.array_tol),
            ("offset", tolerance.offset),
        ];
        if let Some((field, _)) = checks
            .into_iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(TolerancePolicyError::Invalid {
                path: policy_path.to_path_buf(),
                kind,
                field,
            });
        }
    }

    Ok(policy)
}

/// How values are shifted away from zero before the relative deviation is taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Damping {
    /// `value + constant`, for value-like arrays such as heads.
    Additive(f64),
    /// `|value| + offset`, for signed budget terms.
    Magnitude(f64),
}

impl Damping {
    pub const fn heads() -> Self {
        Self::Additive(HEAD_OFFSET)
    }

    pub const fn budget(offset: f64) -> Self {
        Self::Magnitude(offset)
    }

    #[inline]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Additive(constant) => value + constant,
            Self::Magnitude(offset) => value.abs() + offset,
        }
    }
}

/// Signed relative deviation of one damped pair.
///
/// Equal damped values give exactly zero so a comparison of an array with
/// itself never divides zero by zero.
#[inline]
pub fn relative_deviation(sim: f64, valid: f64, damping: Damping) -> f64 {
    let damped_sim = damping.apply(sim);
    let damped_valid = damping.apply(valid);
    let difference = damped_sim - damped_valid;
    if difference == 0.0 {
        return 0.0;
    }
    difference / damped_valid
}

/// Element-wise relative deviation of two same-shaped arrays.
pub fn deviation_array(sim: &ArrayD<f64>, valid: &ArrayD<f64>, damping: Damping) -> ArrayD<f64> {
    Zip::from(sim)
        .and(valid)
        .map_collect(|&sim, &valid| relative_deviation(sim, valid, damping))
}

/// Arithmetic mean; zero for an empty array.
pub fn mean(values: &ArrayD<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    stable_sum(values.iter().copied()) / values.len() as f64
}

pub fn stable_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for value in values {
        let corrected = value - correction;
        let next = sum + corrected;
        correction = (next - sum) - corrected;
        sum = next;
    }

    sum
}

/// True when `value` breaches `tolerance`; non-finite values always breach.
#[inline]
pub fn exceeds(value: f64, tolerance: f64) -> bool {
    !value.is_finite() || value.abs() > tolerance
}
