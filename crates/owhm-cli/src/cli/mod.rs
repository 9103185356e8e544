mod commands;

use clap::Parser;
use owhm_core::domain::OwhmError;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let owhm_error = error.as_owhm_error();
            eprintln!("{}", owhm_error.diagnostic_line());
            if let Some(summary_line) = owhm_error.fatal_exit_line() {
                eprintln!("{}", summary_line);
            }
            owhm_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("owhm-regress".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "owhm-regress",
    version,
    about = "Tolerance-based regression comparison of OWHM simulator output"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Compare every reference snapshot against the candidate tree
    Regression(commands::RegressionArgs),
    /// Compare one candidate snapshot against one reference snapshot
    Compare(commands::CompareArgs),
    /// Write a budget snapshot as a CSV table
    Export(commands::ExportArgs),
    /// Print net flux per budget category as JSON
    NetFlux(commands::NetFluxArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Regression(args) => commands::run_regression_command(args),
        CliCommand::Compare(args) => commands::run_compare_command(args),
        CliCommand::Export(args) => commands::run_export_command(args),
        CliCommand::NetFlux(args) => commands::run_net_flux_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Core(OwhmError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<OwhmError> for CliError {
    fn from(error: OwhmError) -> Self {
        Self::Core(error)
    }
}

impl CliError {
    fn as_owhm_error(&self) -> OwhmError {
        match self {
            Self::Usage(message) => OwhmError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Core(error) => error.clone(),
            Self::Internal(error) => OwhmError::internal("SYS.CLI", format!("{error:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CliError, run};

    #[test]
    fn help_exits_cleanly() {
        assert_eq!(run(["--help"]).expect("help should succeed"), 0);
    }

    #[test]
    fn unknown_subcommand_is_a_usage_error() {
        let error = run(["frobnicate"]).expect_err("unknown command should fail");
        assert!(matches!(error, CliError::Usage(_)));
        assert_eq!(error.as_owhm_error().exit_code(), 2);
    }

    #[test]
    fn unknown_output_kind_is_rejected() {
        let error = run([
            "compare",
            "--kind",
            "zonebudget",
            "--candidate",
            "a.json",
            "--reference",
            "b.json",
        ])
        .expect_err("unknown kind should fail");
        assert!(matches!(error, CliError::Usage(_)));
    }
}
