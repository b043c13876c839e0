//! Exit status policy shared by every binary.
//!
//! `0` success, `1` usage error or missing upstream input, `2` collaborator
//! failure or any other fatal error.

use crate::models::StageSummary;
use clap::Parser;
use std::process::ExitCode;
use thiserror::Error;

pub const SUCCESS: u8 = 0;
pub const USAGE_OR_MISSING_INPUT: u8 = 1;
pub const COLLABORATOR_FAILURE: u8 = 2;

#[derive(Debug, Error)]
pub enum StageError {
    /// A file the previous stage should have produced is not there.
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid arguments: {0}")]
    Usage(String),
    /// Browser, network, vision API, mail server, or an unwritable output.
    #[error("{0}")]
    Collaborator(String),
}

impl StageError {
    pub fn code(&self) -> u8 {
        match self {
            StageError::MissingInput(_) | StageError::Usage(_) => USAGE_OR_MISSING_INPUT,
            StageError::Collaborator(_) => COLLABORATOR_FAILURE,
        }
    }
}

/// Exit code for a fatal error: the first [`StageError`] in its chain decides,
/// anything unclassified counts as a collaborator failure.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StageError>())
        .map(StageError::code)
        .unwrap_or(COLLABORATOR_FAILURE)
}

/// Parses arguments, printing clap's message on failure.
///
/// `--help` and `--version` exit with 0, every other parse error with 1.
pub fn parse_args<A: Parser>() -> Result<A, ExitCode> {
    A::try_parse().map_err(|e| {
        let _ = e.print();
        if e.use_stderr() {
            ExitCode::from(USAGE_OR_MISSING_INPUT)
        } else {
            ExitCode::from(SUCCESS)
        }
    })
}

/// Runs a stage body and always ends with the `SUMMARY` line.
pub fn run_stage<F>(stage: &str, body: F) -> ExitCode
where
    F: FnOnce(&mut StageSummary) -> anyhow::Result<()>,
{
    let mut summary = StageSummary::new(stage);
    let result = body(&mut summary);

    println!("{}", summary);
    println!("{}", summary.to_line());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn classified_errors_keep_their_code() {
        let missing = anyhow::Error::new(StageError::MissingInput("brand_filtered_products.xlsx".into()));
        assert_eq!(exit_code(&missing), 1);
        let usage = anyhow::Error::new(StageError::Usage("empty query".into()));
        assert_eq!(exit_code(&usage), 1);
        let smtp = anyhow::Error::new(StageError::Collaborator("SMTP refused".into()));
        assert_eq!(exit_code(&smtp), 2);
    }

    #[test]
    fn context_does_not_hide_classification() {
        let err: anyhow::Result<()> = Err(StageError::MissingInput("x.xlsx".into()).into());
        let wrapped = err.context("text merger").unwrap_err();
        assert_eq!(exit_code(&wrapped), 1);
    }

    #[test]
    fn unclassified_errors_are_collaborator_failures() {
        assert_eq!(exit_code(&anyhow!("chrome crashed")), 2);
    }

    #[derive(Parser, Debug)]
    struct StageArgs {
        #[clap(long)]
        query: String,
    }

    #[test]
    fn clap_errors_map_to_usage() {
        let err = StageArgs::try_parse_from(["stage"]).unwrap_err();
        assert!(err.use_stderr());
        let help = StageArgs::try_parse_from(["stage", "--help"]).unwrap_err();
        assert!(!help.use_stderr());
    }
}
