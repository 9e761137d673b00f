// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use owo_colors::OwoColorize;
use protest_metadata::ProtestExitCode;
use protest_runner::errors::{
    ConfigParseError, LoadContainerError, ProfileNotFound, RunError, TestFilterBuildError,
};
use std::{error::Error, path::PathBuf};
use thiserror::Error;

// The #[error()] strings are placeholders: errors are meant to be printed with
// `display_to_stderr`, which colorizes them and walks the source chain.

/// An error that `protest` knows how to report, along with its exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not read the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("test filter build error")]
    TestFilterBuildError {
        #[from]
        err: TestFilterBuildError,
    },
    #[error("container load failed")]
    ContainerLoadFailed {
        #[from]
        err: LoadContainerError,
    },
    #[error("run setup failed")]
    RunSetupFailed {
        #[source]
        err: RunError,
    },
    #[error("run errored")]
    RunErrored { message: String },
    #[error("test run failed")]
    TestRunFailed,
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("error serializing output")]
    SerializeOutputError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    pub(crate) fn from_run_error(err: RunError) -> Self {
        match err {
            RunError::Load(err) => Self::ContainerLoadFailed { err },
            other => Self::RunSetupFailed { err: other },
        }
    }

    pub(crate) fn run_errored(message: impl Into<String>) -> Self {
        Self::RunErrored {
            message: message.into(),
        }
    }

    pub(crate) fn test_run_failed() -> Self {
        Self::TestRunFailed
    }

    pub(crate) fn write_output_error(err: std::io::Error) -> Self {
        Self::WriteOutputError { err }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::TestFilterBuildError { .. } => ProtestExitCode::SETUP_ERROR,
            Self::ContainerLoadFailed { .. } => ProtestExitCode::CONTAINER_LOAD_FAILED,
            Self::RunSetupFailed { .. } | Self::RunErrored { .. } => ProtestExitCode::RUN_ERRORED,
            Self::TestRunFailed => ProtestExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } | Self::SerializeOutputError { .. } => {
                ProtestExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                tracing::error!("could not read the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                tracing::error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                tracing::error!(
                    "failed to parse protest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProfileNotFound { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::TestFilterBuildError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::ContainerLoadFailed { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::RunSetupFailed { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::RunErrored { message } => {
                tracing::error!("test run errored: {message}");
                None
            }
            Self::TestRunFailed => {
                tracing::error!("test run failed");
                None
            }
            Self::WriteOutputError { err } => {
                tracing::error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::SerializeOutputError { err } => {
                tracing::error!("error serializing output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}
