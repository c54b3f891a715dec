//! Run configuration.
//!
//! The environment is read once into [`EnvConfig`]; combined with the
//! command-line options it becomes the immutable [`RunConfig`] every other
//! module works from. The driver itself never changes directory and never
//! mutates its own environment; everything a child process needs is carried
//! in `child_env` and applied per spawn.

use anyhow::{Context, Result};
use std::env;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Directory-name suffixes marking a variant of another test's sources.
const VARIANT_SUFFIXES: &[&str] = &[".opt", ".emu"];

/// Environment knobs, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// `LP_BUILD_DIR`: build tree holding `bin/` (default `..`).
    pub build_dir: Option<String>,
    /// `LP_SOURCE_DIR`: source tree root (default `../../..`).
    pub source_dir: Option<String>,
    /// `LP_TESTSUITE_ROOT`: directory of all test sources.
    pub testsuite_root: Option<String>,
    /// `LP_TESTSUITE_SRC`: source directory of this one test.
    pub test_source: Option<String>,
    /// `IMGTOOL_ROOT`: image tool installation.
    pub imgtool_root: Option<String>,
    /// `LP_TESTSHADE_NAME`: replacement program for `lp-testshade`.
    pub testshade_name: Option<String>,
    /// `LP_REGRESSION_TEST`: baseline-then-compare mode selector.
    pub regression: Option<String>,
    /// `LP_TESTSUITE_SKIP_DIFF`: run commands but compare nothing.
    pub skip_diff: bool,
    /// `TESTSUITE_CLEANUP_ON_SUCCESS`: remove generated files on pass.
    pub cleanup_on_success: bool,
    /// `DEBUG`: relax image thresholds for debug toolchain builds.
    pub debug: bool,
    /// `LP_TESTSUITE_THRESH_SCALE`: scale all image thresholds.
    pub thresh_scale: Option<f64>,
}

impl EnvConfig {
    /// Read every driver-relevant environment variable.
    pub fn capture() -> EnvConfig {
        EnvConfig {
            build_dir: env::var("LP_BUILD_DIR").ok(),
            source_dir: env::var("LP_SOURCE_DIR").ok(),
            testsuite_root: env::var("LP_TESTSUITE_ROOT").ok(),
            test_source: env::var("LP_TESTSUITE_SRC").ok(),
            imgtool_root: env::var("IMGTOOL_ROOT").ok(),
            testshade_name: env::var("LP_TESTSHADE_NAME").ok(),
            regression: env::var("LP_REGRESSION_TEST").ok(),
            skip_diff: parse_flag(env::var("LP_TESTSUITE_SKIP_DIFF").ok()),
            cleanup_on_success: parse_flag(env::var("TESTSUITE_CLEANUP_ON_SUCCESS").ok()),
            debug: parse_present(env::var("DEBUG").ok()),
            thresh_scale: parse_scale(env::var("LP_TESTSUITE_THRESH_SCALE").ok()),
        }
    }
}

/// Command-line options, filled in by the binary.
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Test directory to run in; defaults to the current directory.
    pub test_dir: Option<PathBuf>,
    /// Build tree override, taking precedence over `LP_BUILD_DIR`.
    pub build_dir: Option<PathBuf>,
    /// Extra directory prepended to the executable search path of children.
    pub path: Option<PathBuf>,
    /// MS Visual Studio configuration subdirectory of `bin/`.
    pub devenv_config: Option<String>,
    /// MS Visual Studio solution path.
    pub solution_path: Option<PathBuf>,
}

/// Everything one test run needs to know, resolved up front.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory the test executes in; children run with this as cwd.
    pub work_dir: PathBuf,
    /// Test name, with any variant suffix stripped.
    pub test_name: String,
    /// Build tree root.
    pub build_dir: PathBuf,
    /// Directory holding the toolchain binaries.
    pub bin_dir: PathBuf,
    /// Source tree root.
    pub source_dir: PathBuf,
    /// Directory holding this test's sources and `test.json`.
    pub test_source_dir: PathBuf,
    /// `ref/` inside the working directory.
    pub ref_dir: PathBuf,
    /// `baseline/` inside the working directory.
    pub baseline_dir: PathBuf,
    /// The shared test log, `out.txt`.
    pub log_path: PathBuf,
    /// Image tool installation, if configured.
    pub imgtool_root: Option<PathBuf>,
    /// Replacement program for `lp-testshade`, if configured.
    pub testshade_name: Option<String>,
    /// Regression selector, if this is a baseline-then-compare run.
    pub regression: Option<String>,
    /// Skip all output comparison.
    pub skip_diff: bool,
    /// Remove generated files when the run passes.
    pub cleanup_on_success: bool,
    /// Relax image thresholds for debug builds.
    pub debug: bool,
    /// Scale factor for image thresholds.
    pub thresh_scale: Option<f64>,
    /// Environment exported to every spawned process.
    pub child_env: Vec<(OsString, OsString)>,
}

impl RunConfig {
    /// Resolve directories and child environment from the captured
    /// environment and the command line. Relative paths from the
    /// environment are taken relative to the working directory.
    pub fn new(env: EnvConfig, options: DriverOptions) -> Result<RunConfig> {
        let test_dir = options.test_dir.unwrap_or_else(|| PathBuf::from("."));
        let work_dir = lexical_normalize(
            &std::path::absolute(&test_dir)
                .with_context(|| format!("resolving test directory {}", test_dir.display()))?,
        );
        let test_name = test_name_of(&work_dir)?;

        let build_rel = options
            .build_dir
            .or_else(|| env.build_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".."));
        let build_dir = resolve_from(&work_dir, &build_rel);
        let mut bin_dir = build_dir.join("bin");
        if cfg!(windows) {
            // IDE builds nest binaries per configuration under bin/.
            if let Some(devenv) = options.devenv_config.as_deref() {
                if !devenv.is_empty() {
                    bin_dir.push(devenv);
                }
            }
        }

        let source_dir = resolve_from(
            &work_dir,
            Path::new(env.source_dir.as_deref().unwrap_or("../../..")),
        );
        let testsuite_root = match env.testsuite_root.as_deref() {
            Some(root) => resolve_from(&work_dir, Path::new(root)),
            None => source_dir.join("testsuite"),
        };
        let test_source_dir = match env.test_source.as_deref() {
            Some(dir) => resolve_from(&work_dir, Path::new(dir)),
            None => testsuite_root.join(&test_name),
        };

        let imgtool_root = env
            .imgtool_root
            .map(|root| resolve_from(&work_dir, Path::new(&root)));

        let child_env = build_child_env(
            &source_dir,
            options.path.as_deref(),
            options.solution_path.as_deref(),
            options.devenv_config.as_deref(),
        )?;

        Ok(RunConfig {
            ref_dir: work_dir.join("ref"),
            baseline_dir: work_dir.join("baseline"),
            log_path: work_dir.join("out.txt"),
            work_dir,
            test_name,
            build_dir,
            bin_dir,
            source_dir,
            test_source_dir,
            imgtool_root,
            testshade_name: env.testshade_name,
            regression: env.regression,
            skip_diff: env.skip_diff,
            cleanup_on_success: env.cleanup_on_success,
            debug: env.debug,
            thresh_scale: env.thresh_scale,
            child_env,
        })
    }
}

fn test_name_of(work_dir: &Path) -> Result<String> {
    let name = work_dir
        .file_name()
        .and_then(|name| name.to_str())
        .context("the test directory has no usable name")?;
    for suffix in VARIANT_SUFFIXES {
        if name.ends_with(suffix) {
            let base = name.split('.').next().unwrap_or(name);
            return Ok(base.to_string());
        }
    }
    Ok(name.to_string())
}

fn resolve_from(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        lexical_normalize(path)
    } else {
        lexical_normalize(&base.join(path))
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                normalized.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

fn build_child_env(
    source_dir: &Path,
    extra_path: Option<&Path>,
    solution_path: Option<&Path>,
    devenv_config: Option<&str>,
) -> Result<Vec<(OsString, OsString)>> {
    let mut child_env = vec![(
        OsString::from("LP_HOME"),
        source_dir.join("src").into_os_string(),
    )];

    let mut prefixes: Vec<PathBuf> = Vec::new();
    if let Some(path) = extra_path {
        prefixes.push(path.to_path_buf());
    }
    if cfg!(windows) {
        // IDE builds keep the image-tool libraries next to the solution.
        if let Some(solution) = solution_path {
            if solution.is_dir() {
                let mut lib_dir = solution.join("libimgtool");
                if let Some(devenv) = devenv_config {
                    if !devenv.is_empty() {
                        lib_dir.push(devenv);
                    }
                }
                prefixes.push(lib_dir);
            }
        }
    }
    if !prefixes.is_empty() {
        let current = env::var_os("PATH").unwrap_or_default();
        let joined = env::join_paths(prefixes.into_iter().chain(env::split_paths(&current)))
            .context("prepending to the executable search path")?;
        child_env.push((OsString::from("PATH"), joined));
    }

    Ok(child_env)
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .is_some_and(|flag| flag != 0)
}

fn parse_present(value: Option<String>) -> bool {
    value.is_some_and(|raw| !raw.is_empty())
}

fn parse_scale(value: Option<String>) -> Option<f64> {
    let raw = value?;
    match raw.trim().parse::<f64>() {
        Ok(factor) => Some(factor),
        Err(_) => {
            log::warn!("ignoring unparseable threshold scale {raw:?}");
            None
        }
    }
}
