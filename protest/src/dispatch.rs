// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    output::{OutputContext, OutputOpts, OutputWriter, StdoutStyles, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use protest_metadata::{ProtestExitCode, RunSummary, TestListSummary};
use protest_runner::{
    config::{ProtestConfig, ProtestProfile, TestThreads},
    engine::{LoggingThreshold, TestEngine, TestPackage},
    libtest::{ContainerList, LibtestEngine, LibtestOptions},
    listener::CompletedRun,
    runner::{NotificationHandlers, Notifications, OutputSink, RunConfig, TestRunner},
    test_filter::{NameFilter, RunIgnored},
};
use std::{
    io::Write,
    sync::{Arc, Mutex},
};
use swrite::{SWrite, swrite, swriteln};

type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Run the tests in compiled Rust test binaries, one process per test.
#[derive(Debug, Parser)]
#[command(version, name = "protest", styles = clap_styles::style(), max_term_width = 100)]
pub struct ProtestApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl ProtestApp {
    /// Initializes the output context: color support and the logger.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the exit code on success.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::List {
                container_opts,
                message_format,
            } => exec_list(&container_opts, message_format, output, output_writer),
            Command::Run {
                container_opts,
                config_opts,
                profile,
                runner_opts,
                message_format,
                filters,
            } => {
                let root = current_dir()?;
                let config = config_opts.make_config(&root)?;
                let profile =
                    config.profile(profile.as_deref().unwrap_or(ProtestConfig::DEFAULT_PROFILE))?;
                let settings = runner_opts.resolve(&profile, filters);
                tracing::debug!(
                    profile = profile.name(),
                    config_file = %config.config_file(),
                    ?settings,
                    "resolved run settings"
                );
                exec_run(&container_opts, settings, message_format, output, output_writer)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tests in a test container
    ///
    /// The container is run with `--list`, with and without `--ignored`. Use --message-format json
    /// to get machine-readable output.
    List {
        #[command(flatten)]
        container_opts: ContainerOpts,

        #[command(flatten)]
        message_format: MessageFormatOpts,
    },

    /// Run the tests in a test container
    ///
    /// Each selected test runs in its own process. The exit code is 0 if every test that ran
    /// passed, and 100 if any test failed.
    Run {
        #[command(flatten)]
        container_opts: ContainerOpts,

        #[command(flatten)]
        config_opts: ConfigOpts,

        /// Protest profile to use
        #[arg(long, short = 'P', env = "PROTEST_PROFILE")]
        profile: Option<String>,

        #[command(flatten)]
        runner_opts: RunnerOpts,

        #[command(flatten)]
        message_format: MessageFormatOpts,

        /// Only run tests whose names contain one of these substrings [default: from profile]
        #[arg(name = "FILTERS", help_heading = None)]
        filters: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct ContainerOpts {
    /// Path to the test container (a compiled test binary)
    #[arg(long, value_name = "PATH")]
    container: Utf8PathBuf,

    /// Directory to run tests in [default: current directory]
    #[arg(long, value_name = "DIR")]
    cwd: Option<Utf8PathBuf>,
}

impl ContainerOpts {
    fn package(&self) -> TestPackage {
        let package = TestPackage::new(&self.container);
        match &self.cwd {
            Some(cwd) => package.with_cwd(cwd),
            None => package,
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/protest.toml in the current directory]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, root: &Utf8Path) -> Result<ProtestConfig> {
        Ok(ProtestConfig::from_sources(root, self.config_file.as_deref())?)
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Echo each line of test output as it is produced [default: from profile]
    #[arg(long, short)]
    verbose: bool,

    /// Threshold for the engine's own diagnostics [default: from profile]
    #[arg(long, value_name = "LEVEL")]
    logging_threshold: Option<LoggingThreshold>,

    /// Number of tests to run simultaneously [default: from profile]
    #[arg(long, short = 'j', visible_alias = "jobs", value_name = "THREADS")]
    test_threads: Option<TestThreads>,

    /// Run ignored tests: default, only, all [default: from profile]
    #[arg(long, value_name = "WHICH")]
    run_ignored: Option<RunIgnored>,
}

impl RunnerOpts {
    /// Merges these options over the profile: options given on the command line win.
    fn resolve(self, profile: &ProtestProfile<'_>, filters: Vec<String>) -> RunSettings {
        let filters = if filters.is_empty() {
            profile.filter().to_vec()
        } else {
            filters
        };

        RunSettings {
            verbose: self.verbose || profile.verbose(),
            logging_threshold: self
                .logging_threshold
                .unwrap_or_else(|| profile.logging_threshold()),
            test_threads: self
                .test_threads
                .unwrap_or_else(|| profile.test_threads())
                .compute(),
            run_ignored: self.run_ignored.unwrap_or_else(|| profile.run_ignored()),
            filters,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct RunSettings {
    verbose: bool,
    logging_threshold: LoggingThreshold,
    test_threads: usize,
    run_ignored: RunIgnored,
    filters: Vec<String>,
}

#[derive(Copy, Clone, Debug, Default, Args)]
#[command(next_help_heading = "Output options")]
struct MessageFormatOpts {
    /// Output format
    #[arg(long, short = 'T', value_enum, default_value_t, value_name = "FMT")]
    message_format: MessageFormat,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
enum MessageFormat {
    /// Human-readable output
    #[default]
    Plain,
    /// JSON on a single line
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

impl MessageFormat {
    fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty)
    }

    fn to_json(self, value: &impl serde::Serialize) -> Result<String> {
        let json = match self {
            Self::JsonPretty => serde_json::to_string_pretty(value),
            Self::Json | Self::Plain => serde_json::to_string(value),
        };
        json.map_err(|err| ExpectedError::SerializeOutputError { err })
    }
}

fn exec_list(
    container_opts: &ContainerOpts,
    message_format: MessageFormatOpts,
    output: OutputContext,
    output_writer: &mut OutputWriter,
) -> Result<i32> {
    let list = ContainerList::new(&container_opts.package())?;
    let message_format = message_format.message_format;

    let mut out = String::new();
    if message_format.is_json() {
        let mut summary = TestListSummary::new(&container_opts.container);
        for (name, listed) in list.iter() {
            summary.push(name.full_name(), listed.ignored);
        }
        out.push_str(&message_format.to_json(&summary)?);
        out.push('\n');
    } else {
        let styles = output.stdout_styles();
        swriteln!(
            out,
            "{}: {} tests",
            container_opts.container,
            list.test_count().style(styles.count)
        );
        for (name, listed) in list.iter() {
            swrite!(out, "    {name}");
            if listed.ignored {
                swrite!(out, " {}", "(ignored)".style(styles.skip));
            }
            out.push('\n');
        }
    }

    write_stdout(output_writer, &out)?;
    Ok(ProtestExitCode::OK)
}

fn exec_run(
    container_opts: &ContainerOpts,
    settings: RunSettings,
    message_format: MessageFormatOpts,
    output: OutputContext,
    output_writer: &mut OutputWriter,
) -> Result<i32> {
    let message_format = message_format.message_format;
    let filter = NameFilter::new(&settings.filters)?;
    let engine = LibtestEngine::with_options(LibtestOptions {
        test_threads: settings.test_threads,
        run_ignored: settings.run_ignored,
    });
    let mut runner = TestRunner::with_engine(engine);

    let run_error: Arc<Mutex<Option<String>>> = Arc::default();
    let handler_error = run_error.clone();
    let cancel = runner.engine().cancel_handle();
    let completed_run = move |completed: &CompletedRun<'_>| {
        if let CompletedRun::Errored { error, .. } = completed {
            *handler_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error.to_string());
        }
        cancel.cancel();
    };

    // JSON goes to stdout, so echoed test output goes to stderr instead.
    let output_sink = if message_format.is_json() {
        OutputSink::stderr()
    } else {
        OutputSink::stdout()
    };
    let handlers = NotificationHandlers::new()
        .with_completed_run(Box::new(completed_run))
        .with_output_sink(output_sink);

    let mut config = RunConfig::new()
        .with_filter(filter)
        .with_logging_threshold(settings.logging_threshold)
        .with_notifications(Notifications::Default(handlers));
    if let Some(cwd) = &container_opts.cwd {
        config = config.with_cwd(cwd);
    }

    let results = runner
        .run_container_tests_with(&container_opts.container, settings.verbose, config)
        .map_err(ExpectedError::from_run_error)?;
    let summary = RunSummary::from_results(&container_opts.container, results.into_inner());

    let out = if message_format.is_json() {
        let mut out = message_format.to_json(&summary)?;
        out.push('\n');
        out
    } else {
        format_plain_summary(&summary, &output.stdout_styles())
    };
    write_stdout(output_writer, &out)?;

    let run_error = run_error
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(message) = run_error {
        return Err(ExpectedError::run_errored(message));
    }
    if !summary.is_success() {
        return Err(ExpectedError::test_run_failed());
    }
    Ok(ProtestExitCode::OK)
}

fn format_plain_summary(summary: &RunSummary, styles: &StdoutStyles) -> String {
    let mut out = String::new();
    for (name, outcome) in &summary.results {
        let style = match outcome.as_str() {
            "Passed" => styles.pass,
            "Failed" | "Errored" => styles.fail,
            _ => styles.skip,
        };
        swriteln!(out, "{:>9} {name}", outcome.style(style));
    }
    swriteln!(
        out,
        "{} tests: {} passed, {} failed, {} not run",
        summary.results.len().style(styles.count),
        summary.passed.style(styles.pass),
        summary.failed.style(styles.fail),
        summary.other.style(styles.skip),
    );
    out
}

fn write_stdout(output_writer: &mut OutputWriter, out: &str) -> Result<()> {
    let mut writer = output_writer.stdout_writer();
    writer
        .write_all(out.as_bytes())
        .and_then(|()| writer.flush())
        .map_err(ExpectedError::write_output_error)
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
        path: err.into_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Color;
    use camino_tempfile::Utf8TempDir;
    use clap::CommandFactory;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use test_case::test_case;

    #[test]
    fn verify_app() {
        ProtestApp::command().debug_assert();
    }

    #[test]
    fn color_env_var() {
        let command = ProtestApp::command();
        let color = command
            .get_arguments()
            .find(|arg| arg.get_id() == "color")
            .expect("--color is a global argument");
        assert_eq!(
            color.get_env(),
            Some(std::ffi::OsStr::new(crate::output::COLOR_ENV))
        );
    }

    #[test]
    fn verbose_help_describes_echo() {
        let command = ProtestApp::command();
        let run = command
            .find_subcommand("run")
            .expect("run is a subcommand");
        let verbose = run
            .get_arguments()
            .find(|arg| arg.get_id() == "verbose")
            .expect("run takes --verbose");
        let help = verbose.get_help().expect("--verbose has help").to_string();
        assert!(help.starts_with("Echo each line of test output"), "help: {help}");
        assert!(!help.contains("transcript"), "help: {help}");
    }

    #[test_case(&["protest", "list", "--container", "bin"] ; "list")]
    #[test_case(&["protest", "list", "--container", "bin", "-T", "json-pretty"] ; "list json")]
    #[test_case(&["protest", "--color", "never", "run", "--container", "bin"] ; "run")]
    #[test_case(
        &["protest", "run", "--container", "bin", "-v", "-j", "4", "--run-ignored", "all"] ;
        "run with runner options"
    )]
    #[test_case(&["protest", "run", "--container", "bin", "--test-threads", "num-cpus"] ; "num cpus")]
    #[test_case(&["protest", "run", "--container", "bin", "--logging-threshold", "debug"] ; "threshold")]
    #[test_case(&["protest", "run", "--container", "bin", "-P", "ci", "foo", "bar"] ; "filters")]
    #[test_case(&["protest", "run", "--container", "bin", "--cwd", "/tmp"] ; "cwd")]
    fn valid_args(args: &[&str]) {
        if let Err(error) = ProtestApp::try_parse_from(args) {
            panic!("{args:?} should parse, but failed with:\n{error}");
        }
    }

    #[test_case(&["protest", "run"] ; "missing container")]
    #[test_case(&["protest", "run", "--container", "bin", "-j", "0"] ; "zero threads")]
    #[test_case(&["protest", "run", "--container", "bin", "--run-ignored", "some"] ; "bad run ignored")]
    #[test_case(
        &["protest", "run", "--container", "bin", "--logging-threshold", "loud"] ;
        "bad threshold"
    )]
    #[test_case(&["protest", "list", "--container", "bin", "-T", "xml"] ; "bad format")]
    fn invalid_args(args: &[&str]) {
        assert!(
            ProtestApp::try_parse_from(args).is_err(),
            "{args:?} should fail to parse"
        );
    }

    fn parse_run(args: &[&str]) -> (ConfigOpts, Option<String>, RunnerOpts, Vec<String>) {
        let app = ProtestApp::try_parse_from(args).expect("valid args");
        match app.command {
            Command::Run {
                config_opts,
                profile,
                runner_opts,
                filters,
                ..
            } => (config_opts, profile, runner_opts, filters),
            Command::List { .. } => panic!("expected run command"),
        }
    }

    fn write_config(dir: &Utf8TempDir) -> Utf8PathBuf {
        let config_file = dir.path().join("protest.toml");
        std::fs::write(
            &config_file,
            indoc! {r#"
                [profile.ci]
                verbose = true
                test-threads = 3
                run-ignored = "all"
                filter = ["slow::"]
            "#},
        )
        .expect("config written");
        config_file
    }

    #[test]
    fn profile_settings_apply() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let config_file = write_config(&dir);
        let (config_opts, profile, runner_opts, filters) = parse_run(&[
            "protest",
            "run",
            "--container",
            "bin",
            "--config-file",
            config_file.as_str(),
            "--profile",
            "ci",
        ]);

        let config = config_opts.make_config(dir.path()).expect("config parses");
        let profile = config
            .profile(profile.as_deref().unwrap_or(ProtestConfig::DEFAULT_PROFILE))
            .expect("profile exists");
        let settings = runner_opts.resolve(&profile, filters);
        assert_eq!(
            settings,
            RunSettings {
                verbose: true,
                logging_threshold: LoggingThreshold::Warn,
                test_threads: 3,
                run_ignored: RunIgnored::All,
                filters: vec!["slow::".to_owned()],
            }
        );
    }

    #[test]
    fn command_line_overrides_profile() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let config_file = write_config(&dir);
        let (config_opts, profile, runner_opts, filters) = parse_run(&[
            "protest",
            "run",
            "--container",
            "bin",
            "--config-file",
            config_file.as_str(),
            "--profile",
            "ci",
            "-j",
            "7",
            "--run-ignored",
            "only",
            "--logging-threshold",
            "off",
            "fast::",
        ]);

        let config = config_opts.make_config(dir.path()).expect("config parses");
        let profile = config
            .profile(profile.as_deref().unwrap_or(ProtestConfig::DEFAULT_PROFILE))
            .expect("profile exists");
        let settings = runner_opts.resolve(&profile, filters);
        assert_eq!(
            settings,
            RunSettings {
                verbose: true,
                logging_threshold: LoggingThreshold::Off,
                test_threads: 7,
                run_ignored: RunIgnored::Only,
                filters: vec!["fast::".to_owned()],
            }
        );
    }

    #[test]
    fn unknown_profile_is_a_setup_error() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let (config_opts, ..) = parse_run(&["protest", "run", "--container", "bin"]);
        let config = config_opts.make_config(dir.path()).expect("default config parses");
        let error = ExpectedError::from(config.profile("missing").expect_err("unknown profile"));
        assert_eq!(error.process_exit_code(), ProtestExitCode::SETUP_ERROR);
    }

    #[test]
    fn list_missing_container() {
        let app = ProtestApp::try_parse_from([
            "protest",
            "list",
            "--container",
            "/this/container/does/not/exist",
        ])
        .expect("valid args");
        let output = OutputContext {
            color: Color::Never,
        };
        let mut writer = OutputWriter::Test { stdout: Vec::new() };

        let error = app
            .exec(output, &mut writer)
            .expect_err("missing container fails");
        assert_eq!(
            error.process_exit_code(),
            ProtestExitCode::CONTAINER_LOAD_FAILED
        );
        let OutputWriter::Test { stdout } = writer else {
            unreachable!("test writer");
        };
        assert!(stdout.is_empty(), "nothing is written on failure");
    }

    #[test]
    fn plain_summary() {
        let results: BTreeMap<String, String> = [
            ("math::add", "Passed"),
            ("math::sub", "Failed"),
            ("slow::big", "Ignored"),
        ]
        .into_iter()
        .map(|(name, outcome)| (name.to_owned(), outcome.to_owned()))
        .collect();
        let summary = RunSummary::from_results("bin", results);

        let out = format_plain_summary(&summary, &StdoutStyles::default());
        assert_eq!(
            out,
            indoc! {"
                   Passed math::add
                   Failed math::sub
                  Ignored slow::big
                3 tests: 1 passed, 1 failed, 1 not run
            "}
        );
    }
}
