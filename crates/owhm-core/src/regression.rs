use crate::compare::{
    ComparisonOutcome, FarmComparison, OutcomeKind, compare_arrays, compare_budgets,
    compare_farm_outputs,
};
use crate::domain::{OutputKind, OwhmError, OwhmResult, ParsedOutput};
use crate::farm::FarmEntityTimeSeries;
use crate::log::{DiagnosticLog, DiagnosticSink, LogSinkError};
use crate::numerics::{ToleranceConfig, TolerancePolicy, TolerancePolicyError, load_tolerance_policy};
use crate::snapshot::{
    FarmSnapshot, SnapshotEntry, SnapshotError, discover_snapshots, read_farm_output, read_parsed_output,
};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HEAD_FIELD: &str = "HEAD";
pub const LOADING_ERROR_ENTRY: &str = "Unknown loading error\n";

#[derive(Debug, Clone)]
pub struct RegressionRunnerConfig {
    pub suite_name: String,
    pub candidate_root: PathBuf,
    pub reference_root: PathBuf,
    /// `None` runs with [`TolerancePolicy::default`].
    pub policy_path: Option<PathBuf>,
    pub log_path: PathBuf,
    pub report_path: PathBuf,
}

impl Default for RegressionRunnerConfig {
    fn default() -> Self {
        Self {
            suite_name: "owhm".to_string(),
            candidate_root: PathBuf::from("output"),
            reference_root: PathBuf::from("output-reference"),
            policy_path: None,
            log_path: PathBuf::from("errors.txt"),
            report_path: PathBuf::from("regression-report.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
    LoadFailure,
    Error,
}

impl CaseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::LoadFailure => "LOAD_FAILURE",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub relative_path: String,
    pub model_name: String,
    pub kind: OutputKind,
    pub status: CaseStatus,
    pub outcome: Option<OutcomeKind>,
    pub field: Option<String>,
    pub entity: Option<i64>,
    pub reason: Option<String>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Pass
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionRunReport {
    pub generated_at_unix_seconds: u64,
    pub suite_name: String,
    pub passed: bool,
    pub candidate_root: String,
    pub reference_root: String,
    pub policy_path: Option<String>,
    pub log_path: String,
    pub case_count: usize,
    pub passed_case_count: usize,
    pub failed_case_count: usize,
    pub load_failure_count: usize,
    pub error_count: usize,
    pub cases: Vec<CaseReport>,
}

/// Compares every reference snapshot against the candidate snapshot at the
/// same relative path, logging failures and writing a JSON report.
pub fn run_regression(config: &RegressionRunnerConfig) -> OwhmResult<RegressionRunReport> {
    let policy = match &config.policy_path {
        Some(path) => load_tolerance_policy(path)
            .map_err(|source| OwhmError::from(RegressionRunnerError::Policy(source)))?,
        None => TolerancePolicy::default(),
    };
    let log = DiagnosticLog::create(&config.log_path)
        .map_err(|source| OwhmError::from(RegressionRunnerError::Log(source)))?;
    let entries = discover_snapshots(&config.reference_root)
        .map_err(|source| OwhmError::from(RegressionRunnerError::Discover(source)))?;

    tracing::info!(
        suite = config.suite_name.as_str(),
        cases = entries.len(),
        "regression run started"
    );

    let mut cases = Vec::with_capacity(entries.len());
    for entry in &entries {
        log.record_model_name(entry.model_name());
        let case = run_case(config, entry, policy.for_kind(entry.kind), &log);
        if case.passed() {
            tracing::info!(case = case.relative_path.as_str(), kind = %case.kind, "case passed");
        } else {
            tracing::warn!(
                case = case.relative_path.as_str(),
                kind = %case.kind,
                status = case.status.as_str(),
                reason = case.reason.as_deref().unwrap_or(""),
                "case did not pass"
            );
        }
        cases.push(case);
    }

    let count = |status: CaseStatus| cases.iter().filter(|case| case.status == status).count();
    let case_count = cases.len();
    let passed_case_count = count(CaseStatus::Pass);
    let failed_case_count = count(CaseStatus::Fail);
    let load_failure_count = count(CaseStatus::LoadFailure);
    let error_count = count(CaseStatus::Error);

    let report = RegressionRunReport {
        generated_at_unix_seconds: current_unix_timestamp_seconds(),
        suite_name: config.suite_name.clone(),
        passed: passed_case_count == case_count,
        candidate_root: normalize_path(&config.candidate_root),
        reference_root: normalize_path(&config.reference_root),
        policy_path: config.policy_path.as_deref().map(normalize_path),
        log_path: normalize_path(log.path()),
        case_count,
        passed_case_count,
        failed_case_count,
        load_failure_count,
        error_count,
        cases,
    };

    write_report_file(&config.report_path, &report).map_err(OwhmError::from)?;
    Ok(report)
}

pub fn render_human_summary(report: &RegressionRunReport) -> String {
    let mut lines = Vec::new();
    let status = if report.passed { "PASS" } else { "FAIL" };
    lines.push(format!("Regression status: {}", status));
    lines.push(format!("Suite: {}", report.suite_name));
    lines.push(format!(
        "Cases: {} total ({} passed, {} failed, {} load failures, {} errors)",
        report.case_count,
        report.passed_case_count,
        report.failed_case_count,
        report.load_failure_count,
        report.error_count
    ));

    for case in report.cases.iter().filter(|case| !case.passed()) {
        let mut detail = match case.outcome {
            Some(outcome) => outcome.as_str().to_string(),
            None => case
                .reason
                .clone()
                .unwrap_or_else(|| "case failed without a reason".to_string()),
        };
        if let Some(entity) = case.entity {
            detail.push_str(&format!(", farm entity {}", entity));
        }
        if let Some(field) = &case.field {
            detail.push_str(&format!(", field {}", field));
        }
        lines.push(format!(
            "  {} {} {}: {}",
            case.status.as_str(),
            case.kind,
            case.relative_path,
            detail
        ));
    }

    if !report.passed {
        lines.push(format!("Diagnostics written to {}", report.log_path));
    }

    lines.join("\n")
}

fn run_case(
    config: &RegressionRunnerConfig,
    entry: &SnapshotEntry,
    tolerance: ToleranceConfig,
    sink: &dyn DiagnosticSink,
) -> CaseReport {
    let candidate_path = config.candidate_root.join(&entry.relative_path);
    let reference_path = config.reference_root.join(&entry.relative_path);
    let mut case = CaseReport {
        relative_path: entry.relative_path.clone(),
        model_name: entry.model_name().to_string(),
        kind: entry.kind,
        status: CaseStatus::Pass,
        outcome: None,
        field: None,
        entity: None,
        reason: None,
    };

    let result = match entry.kind {
        OutputKind::Head => compare_head_case(&candidate_path, &reference_path, tolerance, sink),
        OutputKind::ListBudget | OutputKind::CellBudget => {
            compare_budget_case(&candidate_path, &reference_path, tolerance, sink)
        }
        OutputKind::FarmOutput => {
            compare_farm_case(&candidate_path, &reference_path, tolerance, sink)
        }
    };

    match result {
        Ok(comparison) => {
            case.status = if comparison.passed() {
                CaseStatus::Pass
            } else {
                CaseStatus::Fail
            };
            case.outcome = Some(comparison.outcome.kind());
            case.field = comparison.outcome.field().map(str::to_string);
            case.entity = comparison.entity;
        }
        Err(CaseError::Load(reason)) => {
            sink.record(LOADING_ERROR_ENTRY);
            case.status = CaseStatus::LoadFailure;
            case.reason = Some(reason);
        }
        Err(CaseError::Fatal(error)) => {
            sink.record(&format!("{}\n", error.diagnostic_line()));
            case.status = CaseStatus::Error;
            case.reason = Some(error.to_string());
        }
    }
    case
}

struct CaseComparison {
    outcome: ComparisonOutcome,
    entity: Option<i64>,
}

impl CaseComparison {
    fn reported(outcome: ComparisonOutcome, sink: &dyn DiagnosticSink) -> Self {
        outcome.report_to(sink);
        Self {
            outcome,
            entity: None,
        }
    }

    fn passed(&self) -> bool {
        self.outcome.passed()
    }
}

impl From<FarmComparison> for CaseComparison {
    fn from(comparison: FarmComparison) -> Self {
        Self {
            outcome: comparison.outcome,
            entity: comparison.entity,
        }
    }
}

enum CaseError {
    Load(String),
    Fatal(OwhmError),
}

fn load_pair(candidate_path: &Path, reference_path: &Path) -> Result<(ParsedOutput, ParsedOutput), CaseError> {
    let candidate = read_parsed_output(candidate_path);
    let reference = read_parsed_output(reference_path);
    if candidate.success() && reference.success() {
        return Ok((candidate, reference));
    }

    let mut reasons = Vec::new();
    for (label, output) in [("candidate", &candidate), ("reference", &reference)] {
        if !output.success() {
            reasons.push(format!("{}: {}", label, output.fail_list().join(", ")));
        }
    }
    Err(CaseError::Load(reasons.join("; ")))
}

fn compare_head_case(
    candidate_path: &Path,
    reference_path: &Path,
    tolerance: ToleranceConfig,
    sink: &dyn DiagnosticSink,
) -> Result<CaseComparison, CaseError> {
    let (candidate, reference) = load_pair(candidate_path, reference_path)?;
    let (Some(sim), Some(valid)) = (candidate.data().get(HEAD_FIELD), reference.data().get(HEAD_FIELD))
    else {
        return Err(CaseError::Load(format!("snapshot has no {} field", HEAD_FIELD)));
    };

    let outcome = compare_arrays(sim, valid, tolerance.cell_tol, tolerance.array_tol);
    Ok(CaseComparison::reported(outcome, sink))
}

fn compare_budget_case(
    candidate_path: &Path,
    reference_path: &Path,
    tolerance: ToleranceConfig,
    sink: &dyn DiagnosticSink,
) -> Result<CaseComparison, CaseError> {
    let (candidate, reference) = load_pair(candidate_path, reference_path)?;
    let outcome = compare_budgets(candidate.data(), reference.data(), &tolerance);
    Ok(CaseComparison::reported(outcome, sink))
}

fn compare_farm_case(
    candidate_path: &Path,
    reference_path: &Path,
    tolerance: ToleranceConfig,
    sink: &dyn DiagnosticSink,
) -> Result<CaseComparison, CaseError> {
    let candidate = read_farm_output(candidate_path);
    let reference = read_farm_output(reference_path);
    if !candidate.success || !reference.success {
        let mut reasons = Vec::new();
        for (label, output) in [("candidate", &candidate), ("reference", &reference)] {
            if !output.success {
                reasons.push(format!("{}: {}", label, output.fail_list.join(", ")));
            }
        }
        return Err(CaseError::Load(reasons.join("; ")));
    }

    let aggregate = |snapshot: FarmSnapshot, label: &str| {
        let series = FarmEntityTimeSeries::from_table(&snapshot.header, &snapshot.rows)
            .map_err(|error| {
                if error.is_table_error() {
                    CaseError::Load(format!("{}: {}", label, error))
                } else {
                    CaseError::Fatal(error.into())
                }
            })?;
        series
            .aggregate_to_stress_periods()
            .map_err(|error| CaseError::Fatal(error.into()))
    };
    let sim = aggregate(candidate, "candidate")?;
    let valid = aggregate(reference, "reference")?;

    let comparison = compare_farm_outputs(&sim, &valid, &tolerance);
    comparison.report_to(sink);
    Ok(comparison.into())
}

#[derive(Debug)]
pub enum RegressionRunnerError {
    Policy(TolerancePolicyError),
    Log(LogSinkError),
    Discover(SnapshotError),
    ReportDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    SerializeReport {
        path: PathBuf,
        source: serde_json::Error,
    },
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for RegressionRunnerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Policy(source) => write!(f, "tolerance policy setup failed: {}", source),
            Self::Log(source) => write!(f, "diagnostic log setup failed: {}", source),
            Self::Discover(source) => write!(f, "snapshot discovery failed: {}", source),
            Self::ReportDirectory { path, source } => write!(
                f,
                "failed to create report directory '{}': {}",
                path.display(),
                source
            ),
            Self::SerializeReport { path, source } => write!(
                f,
                "failed to serialize report '{}': {}",
                path.display(),
                source
            ),
            Self::WriteReport { path, source } => {
                write!(f, "failed to write report '{}': {}", path.display(), source)
            }
        }
    }
}

impl Error for RegressionRunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Policy(source) => Some(source),
            Self::Log(source) => Some(source),
            Self::Discover(source) => Some(source),
            Self::ReportDirectory { source, .. } => Some(source),
            Self::SerializeReport { source, .. } => Some(source),
            Self::WriteReport { source, .. } => Some(source),
        }
    }
}

impl From<RegressionRunnerError> for OwhmError {
    fn from(error: RegressionRunnerError) -> Self {
        let message = error.to_string();
        match error {
            RegressionRunnerError::Policy(source) => source.into(),
            RegressionRunnerError::Log(source) => source.into(),
            RegressionRunnerError::Discover(source) => source.into(),
            RegressionRunnerError::ReportDirectory { .. }
            | RegressionRunnerError::WriteReport { .. } => {
                OwhmError::io_system("IO.REGRESSION_FILESYSTEM", message)
            }
            RegressionRunnerError::SerializeReport { .. } => {
                OwhmError::internal("SYS.REGRESSION_REPORT", message)
            }
        }
    }
}

fn write_report_file(
    report_path: &Path,
    report: &RegressionRunReport,
) -> Result<(), RegressionRunnerError> {
    if let Some(parent_dir) = report_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent_dir).map_err(|source| {
            RegressionRunnerError::ReportDirectory {
                path: parent_dir.to_path_buf(),
                source,
            }
        })?;
    }

    let report_json = serde_json::to_string_pretty(report).map_err(|source| {
        RegressionRunnerError::SerializeReport {
            path: report_path.to_path_buf(),
            source,
        }
    })?;
    fs::write(report_path, report_json).map_err(|source| RegressionRunnerError::WriteReport {
        path: report_path.to_path_buf(),
        source,
    })
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
