use super::CliError;
use anyhow::Context;
use owhm_core::compare::{ComparisonOutcome, compare_arrays, compare_budgets, compare_farm_outputs};
use owhm_core::domain::{OutputKind, OwhmError};
use owhm_core::export::write_budget_table;
use owhm_core::log::{DiagnosticLog, DiagnosticSink, MemorySink};
use owhm_core::netflux::{PairingRule, compute_net, net_flux_fields};
use owhm_core::numerics::{DEFAULT_BUDGET_OFFSET, ToleranceConfig};
use owhm_core::regression::{
    HEAD_FIELD, RegressionRunnerConfig, render_human_summary, run_regression,
};
use owhm_core::snapshot::{read_farm_output, read_parsed_output};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub(super) struct RegressionArgs {
    /// Suite name recorded in the report
    #[arg(long, default_value = "owhm")]
    suite: String,

    /// Root of the candidate snapshot tree
    #[arg(long, default_value = "output")]
    candidate_root: PathBuf,

    /// Root of the reference snapshot tree
    #[arg(long, default_value = "output-reference")]
    reference_root: PathBuf,

    /// Tolerance policy path (default: 0.05/0.05, offset 100 for every kind)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Diagnostic log path, truncated at start
    #[arg(long, default_value = "errors.txt")]
    log: PathBuf,

    /// JSON report output path
    #[arg(long, default_value = "regression-report.json")]
    report: PathBuf,
}

impl RegressionArgs {
    fn into_config(self) -> RegressionRunnerConfig {
        RegressionRunnerConfig {
            suite_name: self.suite,
            candidate_root: self.candidate_root,
            reference_root: self.reference_root,
            policy_path: self.policy,
            log_path: self.log,
            report_path: self.report,
        }
    }
}

#[derive(clap::Args)]
pub(super) struct CompareArgs {
    /// Output kind: head, list_budget, cell_budget or farm_output
    #[arg(long, value_parser = parse_output_kind)]
    kind: OutputKind,

    /// Candidate snapshot
    #[arg(long)]
    candidate: PathBuf,

    /// Reference snapshot
    #[arg(long)]
    reference: PathBuf,

    /// Per-element relative tolerance
    #[arg(long, default_value_t = 0.01)]
    cell_tol: f64,

    /// Mean relative tolerance
    #[arg(long, default_value_t = 0.01)]
    array_tol: f64,

    /// Budget damping offset
    #[arg(long, default_value_t = DEFAULT_BUDGET_OFFSET)]
    offset: f64,

    /// Write diagnostics to this log instead of stdout
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(clap::Args)]
pub(super) struct ExportArgs {
    /// Budget snapshot to tabulate
    #[arg(long)]
    input: PathBuf,

    /// CSV output path
    #[arg(long)]
    output: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct NetFluxArgs {
    /// Budget snapshot
    #[arg(long)]
    input: PathBuf,

    /// Restrict pairing to these fields (default: every field except totals)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Pair by first substring match instead of exact `_IN`/`_OUT` suffixes
    #[arg(long)]
    legacy_pairing: bool,
}

fn parse_output_kind(value: &str) -> Result<OutputKind, String> {
    OutputKind::from_name(value).ok_or_else(|| {
        let known: Vec<&str> = OutputKind::ALL.iter().map(|kind| kind.as_str()).collect();
        format!("unknown output kind '{}'; expected one of {}", value, known.join(", "))
    })
}

pub(super) fn run_regression_command(args: RegressionArgs) -> Result<i32, CliError> {
    let config = args.into_config();
    let report = run_regression(&config)?;
    println!("{}", render_human_summary(&report));
    println!("JSON report: {}", config.report_path.display());

    if report.passed { Ok(0) } else { Ok(1) }
}

pub(super) fn run_compare_command(args: CompareArgs) -> Result<i32, CliError> {
    let tolerance = ToleranceConfig::new(args.cell_tol, args.array_tol, args.offset);
    tracing::debug!(
        kind = %args.kind,
        candidate = %args.candidate.display(),
        reference = %args.reference.display(),
        "comparing snapshots"
    );
    let memory = MemorySink::new();
    let file_log = args
        .log
        .as_deref()
        .map(DiagnosticLog::create)
        .transpose()
        .map_err(OwhmError::from)?;
    let sink: &dyn DiagnosticSink = match &file_log {
        Some(log) => log as &dyn DiagnosticSink,
        None => &memory,
    };
    sink.record_model_name(&file_label(&args.candidate));

    let (outcome, entity) = compare_pair(args.kind, &args.candidate, &args.reference, &tolerance)?;
    let passed = outcome.passed();
    if let Some(block) = outcome.diagnostic() {
        match entity {
            Some(entity) => sink.record(&format!("Farm entity {}:\n{}", entity, block)),
            None => sink.record(&block),
        }
    }

    println!(
        "Comparison status: {} ({})",
        if passed { "PASS" } else { "FAIL" },
        outcome.kind().as_str()
    );
    if file_log.is_none() && !passed {
        print!("{}", memory.contents());
    }

    if passed { Ok(0) } else { Ok(1) }
}

fn compare_pair(
    kind: OutputKind,
    candidate: &Path,
    reference: &Path,
    tolerance: &ToleranceConfig,
) -> Result<(ComparisonOutcome, Option<i64>), OwhmError> {
    match kind {
        OutputKind::Head => {
            let sim = read_parsed_output(candidate).require_loaded("candidate")?;
            let valid = read_parsed_output(reference).require_loaded("reference")?;
            let (Some(sim), Some(valid)) = (sim.get(HEAD_FIELD), valid.get(HEAD_FIELD)) else {
                return Err(OwhmError::input_validation(
                    "INPUT.SNAPSHOT",
                    format!("head snapshots must contain a {} field", HEAD_FIELD),
                ));
            };
            Ok((
                compare_arrays(sim, valid, tolerance.cell_tol, tolerance.array_tol),
                None,
            ))
        }
        OutputKind::ListBudget | OutputKind::CellBudget => {
            let sim = read_parsed_output(candidate).require_loaded("candidate")?;
            let valid = read_parsed_output(reference).require_loaded("reference")?;
            Ok((compare_budgets(&sim, &valid, tolerance), None))
        }
        OutputKind::FarmOutput => {
            let sim = read_farm_output(candidate)
                .require_loaded("candidate")?
                .aggregate_to_stress_periods()?;
            let valid = read_farm_output(reference)
                .require_loaded("reference")?
                .aggregate_to_stress_periods()?;
            let comparison = compare_farm_outputs(&sim, &valid, tolerance);
            Ok((comparison.outcome, comparison.entity))
        }
    }
}

pub(super) fn run_export_command(args: ExportArgs) -> Result<i32, CliError> {
    let budget = read_parsed_output(&args.input).require_loaded("input")?;
    let rows = write_budget_table(&args.output, &budget).map_err(OwhmError::from)?;
    println!("Wrote {} rows to {}", rows, args.output.display());
    Ok(0)
}

pub(super) fn run_net_flux_command(args: NetFluxArgs) -> Result<i32, CliError> {
    let budget = read_parsed_output(&args.input).require_loaded("input")?;
    let fields: BTreeSet<String> = if args.fields.is_empty() {
        net_flux_fields(&budget)
    } else {
        args.fields
            .iter()
            .map(|field| field.trim().to_ascii_uppercase())
            .collect()
    };
    let rule = if args.legacy_pairing {
        PairingRule::FirstContaining
    } else {
        PairingRule::ExactSuffix
    };

    let nets = compute_net(&budget, &fields, rule).map_err(OwhmError::from)?;
    let mut json = Map::new();
    for (category, values) in &nets {
        json.insert(
            category.clone(),
            Value::from(values.iter().copied().collect::<Vec<f64>>()),
        );
    }
    let rendered = serde_json::to_string_pretty(&Value::Object(json))
        .context("failed to render net flux as JSON")?;
    println!("{}", rendered);
    Ok(0)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
