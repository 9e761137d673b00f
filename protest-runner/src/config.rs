// Copyright (c) The protest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for protest.
//!
//! Configuration is read from an embedded default, with `.config/protest.toml` (or an explicitly
//! provided file) layered on top. Settings are grouped into named profiles.

use crate::{
    engine::LoggingThreshold,
    errors::{ConfigParseError, ProfileNotFound, TestThreadsParseError},
    libtest::get_num_cpus,
    test_filter::RunIgnored,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Overall configuration for protest.
///
/// Most settings are managed through [profiles](ProtestProfile), obtained through the
/// [`profile`](Self::profile) method.
#[derive(Clone, Debug)]
pub struct ProtestConfig {
    config_file: Utf8PathBuf,
    inner: ProtestConfigImpl,
}

impl ProtestConfig {
    /// The default location of the config within a directory.
    pub const CONFIG_PATH: &'static str = ".config/protest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/protest.toml` in
    /// `root`.
    ///
    /// An explicitly specified file must exist. If no file is specified and `root` doesn't have a
    /// config, the default config is used.
    pub fn from_sources(
        root: impl AsRef<Utf8Path>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.as_ref().join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let inner = Self::make_default_config()
            .add_source(source)
            .build()
            .and_then(|config| config.try_deserialize::<ProtestConfigImpl>())
            .map_err(|err| ConfigParseError::new(config_file.clone(), err))?;

        Ok(Self { config_file, inner })
    }

    /// Returns the path the repository config was, or would have been, read from.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the profile with the given name, or an error if it isn't defined.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<ProtestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = self.inner.profiles.get(name)?;
        Ok(ProtestProfile {
            name: name.to_owned(),
            default_profile: &self.inner.profiles.default,
            custom_profile,
        })
    }

    fn make_default_config() -> config::ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }
}

/// A configuration profile for protest.
///
/// Settings that a custom profile doesn't specify fall back to the default profile.
#[derive(Clone, Debug)]
pub struct ProtestProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl ProtestProfile<'_> {
    /// Returns the name of this profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if test output should be echoed.
    pub fn verbose(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.verbose)
            .unwrap_or(self.default_profile.verbose)
    }

    /// Returns the threshold for the engine's own diagnostics.
    pub fn logging_threshold(&self) -> LoggingThreshold {
        self.custom_profile
            .and_then(|profile| profile.logging_threshold)
            .unwrap_or(self.default_profile.logging_threshold)
    }

    /// Returns the number of threads to run tests with.
    pub fn test_threads(&self) -> TestThreads {
        self.custom_profile
            .and_then(|profile| profile.test_threads)
            .unwrap_or(self.default_profile.test_threads)
    }

    /// Returns which tests run based on their ignored status.
    pub fn run_ignored(&self) -> RunIgnored {
        self.custom_profile
            .and_then(|profile| profile.run_ignored)
            .unwrap_or(self.default_profile.run_ignored)
    }

    /// Returns the substring patterns tests are filtered by.
    pub fn filter(&self) -> &[String] {
        self.custom_profile
            .and_then(|profile| profile.filter.as_deref())
            .unwrap_or(&self.default_profile.filter)
    }
}

/// The number of threads to run tests with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run tests with a specified number of threads.
    Count(usize),

    /// Run tests with a number of threads equal to the logical CPU count.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of test threads computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }
        match s.parse::<usize>() {
            Ok(threads) if threads > 0 => Ok(Self::Count(threads)),
            _ => Err(TestThreadsParseError::new(s)),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(TestThreads::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match usize::try_from(v) {
                    Ok(threads) if threads > 0 => Ok(TestThreads::Count(threads)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match usize::try_from(v) {
                    Ok(threads) if threads > 0 => Ok(TestThreads::Count(threads)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProtestConfigImpl {
    #[serde(rename = "profile")]
    profiles: ProtestProfilesImpl,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProtestProfilesImpl {
    default: DefaultProfileImpl,
    #[serde(flatten)]
    other: BTreeMap<String, CustomProfileImpl>,
}

impl ProtestProfilesImpl {
    fn get(&self, profile: &str) -> Result<Option<&CustomProfileImpl>, ProfileNotFound> {
        let custom_profile = match profile {
            ProtestConfig::DEFAULT_PROFILE => None,
            other => Some(
                self.other
                    .get(other)
                    .ok_or_else(|| ProfileNotFound::new(profile, self.all_profiles()))?,
            ),
        };
        Ok(custom_profile)
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        self.other
            .keys()
            .map(|key| key.as_str())
            .chain(std::iter::once(ProtestConfig::DEFAULT_PROFILE))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DefaultProfileImpl {
    verbose: bool,
    logging_threshold: LoggingThreshold,
    test_threads: TestThreads,
    run_ignored: RunIgnored,
    filter: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    verbose: Option<bool>,
    #[serde(default)]
    logging_threshold: Option<LoggingThreshold>,
    #[serde(default)]
    test_threads: Option<TestThreads>,
    #[serde(default)]
    run_ignored: Option<RunIgnored>,
    #[serde(default)]
    filter: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use test_case::test_case;

    fn temp_root(config_contents: &str) -> Utf8TempDir {
        let root = camino_tempfile::tempdir().unwrap();
        let config_path = root.path().join(ProtestConfig::CONFIG_PATH);
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, config_contents).unwrap();
        root
    }

    #[test]
    fn default_config_is_valid() {
        let root = camino_tempfile::tempdir().unwrap();
        let config = ProtestConfig::from_sources(root.path(), None).expect("default config parses");
        let profile = config
            .profile(ProtestConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        assert!(!profile.verbose());
        assert_eq!(profile.logging_threshold(), LoggingThreshold::Warn);
        assert_eq!(profile.test_threads(), TestThreads::NumCpus);
        assert_eq!(profile.run_ignored(), RunIgnored::Default);
        assert!(profile.filter().is_empty());
    }

    #[test]
    fn custom_profile_falls_back_to_default() {
        let root = temp_root(indoc! {r#"
            [profile.default]
            test-threads = 4
            filter = ["parse"]

            [profile.ci]
            verbose = true
            logging-threshold = "debug"
            run-ignored = "all"
        "#});
        let config = ProtestConfig::from_sources(root.path(), None).expect("config parses");

        let default = config.profile("default").expect("default profile exists");
        assert_eq!(default.test_threads(), TestThreads::Count(4));
        assert!(!default.verbose());

        let ci = config.profile("ci").expect("ci profile exists");
        assert!(ci.verbose());
        assert_eq!(ci.logging_threshold(), LoggingThreshold::Debug);
        assert_eq!(ci.run_ignored(), RunIgnored::All);
        assert_eq!(ci.test_threads(), TestThreads::Count(4), "falls back to default");
        assert_eq!(ci.filter(), ["parse"], "falls back to default");
    }

    #[test]
    fn unknown_profile() {
        let root = temp_root("[profile.ci]\n");
        let config = ProtestConfig::from_sources(root.path(), None).expect("config parses");
        let error = config.profile("nightly").expect_err("nightly isn't defined");
        assert_eq!(
            error.to_string(),
            "profile `nightly` not found (known profiles: ci, default)"
        );
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let root = camino_tempfile::tempdir().unwrap();
        let missing = root.path().join("missing.toml");
        let error = ProtestConfig::from_sources(root.path(), Some(&missing))
            .expect_err("missing explicit file fails");
        assert_eq!(error.config_file(), missing);
    }

    #[test_case(r#"test-threads = 0"#; "zero threads")]
    #[test_case(r#"test-threads = "many""#; "unknown string")]
    #[test_case(r#"logging-threshold = "loud""#; "unknown threshold")]
    #[test_case(r#"run-ignored = "sometimes""#; "unknown run-ignored")]
    fn invalid_values(line: &str) {
        let root = temp_root(&format!("[profile.default]\n{line}\n"));
        let error = ProtestConfig::from_sources(root.path(), None).expect_err("invalid config");
        assert_eq!(
            error.config_file(),
            root.path().join(ProtestConfig::CONFIG_PATH)
        );
    }

    #[test_case("num-cpus", Ok(TestThreads::NumCpus); "num cpus")]
    #[test_case("8", Ok(TestThreads::Count(8)); "count")]
    #[test_case("0", Err(()); "zero")]
    #[test_case("-1", Err(()); "negative")]
    fn test_threads_from_str(input: &str, expected: Result<TestThreads, ()>) {
        assert_eq!(input.parse::<TestThreads>().map_err(|_| ()), expected);
    }
}
