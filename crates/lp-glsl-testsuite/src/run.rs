//! Test orchestration.
//!
//! A normal run executes the command list once and compares the declared
//! outputs against `ref/`. When a regression selector is set, the list
//! runs twice: first as a baseline capture with the plain toolchain, then
//! again under the selected execution variant, comparing against the
//! baseline instead of `ref/`. A failed baseline capture skips the
//! comparison phase; the baseline failure is the run's result.

use crate::command::{self, Invocation};
use crate::compare::{Comparator, ReferenceSource};
use crate::config::{DriverOptions, EnvConfig, RunConfig};
use crate::descriptor::TestDescriptor;
use crate::executor::CommandRunner;
use crate::report;
use crate::stage::{self, Staging};
use crate::thresholds::CompareThresholds;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;

/// What a single execution of the command list is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    /// Run and compare against `ref/`.
    Normal,
    /// Run and move the outputs into `baseline/`; nothing is compared.
    CaptureBaseline,
    /// Run under the selected variant and compare against `baseline/`.
    CompareBaseline,
}

/// Alternate toolchain execution mode exercised by the regression
/// comparison phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecVariant {
    /// Batched SIMD shader execution.
    Batched,
    /// Q32 fixed-point shader execution.
    Q32,
    /// The toolchain as-is.
    Plain,
}

impl ExecVariant {
    fn from_selector(selector: &str) -> ExecVariant {
        match selector {
            "BATCHED" => ExecVariant::Batched,
            "Q32" => ExecVariant::Q32,
            _ => ExecVariant::Plain,
        }
    }

    /// Environment enabling the variant in the tools under test.
    fn extra_env(self) -> &'static [(&'static str, &'static str)] {
        match self {
            ExecVariant::Batched => &[("LP_TESTSHADE_BATCHED", "1")],
            ExecVariant::Q32 => &[("LP_TESTSHADE_Q32", "1")],
            ExecVariant::Plain => &[],
        }
    }
}

/// Everything derived from the descriptor before any phase runs.
struct PreparedTest {
    invocations: Vec<Invocation>,
    outputs: Vec<String>,
    thresholds: CompareThresholds,
    filter: Option<Regex>,
}

/// Run one test to completion. Returns the process exit code.
pub fn run_test(config: &RunConfig, descriptor: &TestDescriptor) -> Result<i32> {
    let staging = Staging::acquire(config)?;
    let thresholds = CompareThresholds::resolve(descriptor, config.debug, config.thresh_scale);
    let filter = descriptor.compiled_filter()?;
    let outputs = resolved_outputs(config, descriptor);

    let mut invocations = Vec::new();
    if descriptor.compile_shaders {
        for shader in &staging.shaders {
            invocations.push(command::compile_invocation(config, shader));
        }
    }
    for sub in &descriptor.command {
        invocations.push(command::sub_command_invocation(config, sub));
    }
    let prepared = PreparedTest {
        invocations,
        outputs,
        thresholds,
        filter,
    };

    let code = match &config.regression {
        Some(selector) => {
            let variant = ExecVariant::from_selector(selector);
            let baseline =
                run_phase(config, descriptor, &prepared, RunPhase::CaptureBaseline, &[])?;
            if baseline == 0 {
                run_phase(
                    config,
                    descriptor,
                    &prepared,
                    RunPhase::CompareBaseline,
                    variant.extra_env(),
                )?
            } else {
                // A broken baseline leaves nothing meaningful to compare.
                baseline
            }
        }
        None => run_phase(config, descriptor, &prepared, RunPhase::Normal, &[])?,
    };

    if code == 0 && config.cleanup_on_success {
        stage::clean_generated(config);
    }
    report::run_result(&config.test_name, code == 0);
    Ok(code)
}

/// Entry point for the command line: resolve configuration, load the
/// descriptor, run. Returns the process exit code.
pub fn run_driver(options: DriverOptions) -> Result<i32> {
    let config = RunConfig::new(EnvConfig::capture(), options)?;
    report::test_header(&config.test_name, &config.test_source_dir);
    let descriptor = TestDescriptor::load(&config.test_source_dir.join("test.json"))?;
    run_test(&config, &descriptor)
}

fn run_phase(
    config: &RunConfig,
    descriptor: &TestDescriptor,
    prepared: &PreparedTest,
    phase: RunPhase,
    extra_env: &[(&'static str, &'static str)],
) -> Result<i32> {
    let runner = CommandRunner::new(config, extra_env);
    if !runner.run_commands(&prepared.invocations, descriptor.failure_ok)? {
        return Ok(1);
    }
    if config.skip_diff {
        return Ok(0);
    }
    if phase == RunPhase::CaptureBaseline {
        return capture_baseline(config, &prepared.outputs);
    }

    let source = if phase == RunPhase::CompareBaseline {
        ReferenceSource::Baseline
    } else {
        ReferenceSource::Ref
    };
    let comparator = Comparator::new(
        &runner,
        config,
        &prepared.thresholds,
        descriptor.image_tool,
        &descriptor.image_post_args,
        prepared.filter.as_ref(),
        source,
    );
    // Check every output even after a mismatch; the report should show
    // all of them.
    let mut all_matched = true;
    for output in &prepared.outputs {
        all_matched &= comparator.check_output(output);
    }
    Ok(if all_matched { 0 } else { 1 })
}

/// Move every declared output into `baseline/` for the later comparison
/// phase. A missing output fails the capture.
fn capture_baseline(config: &RunConfig, outputs: &[String]) -> Result<i32> {
    fs::create_dir_all(&config.baseline_dir)
        .with_context(|| format!("creating {}", config.baseline_dir.display()))?;
    let mut captured = true;
    for output in outputs {
        let from = config.work_dir.join(output);
        let to = config.baseline_dir.join(output);
        if let Err(err) = fs::rename(&from, &to) {
            report::fail(output, &format!("(could not capture baseline: {err})"));
            captured = false;
        }
    }
    Ok(if captured { 0 } else { 1 })
}

/// The outputs to compare: the declared list, plus `out.exr` and
/// `out.tif` when a reference for them exists but the descriptor does not
/// mention them.
fn resolved_outputs(config: &RunConfig, descriptor: &TestDescriptor) -> Vec<String> {
    let mut outputs = descriptor.outputs.clone();
    for default in ["out.exr", "out.tif"] {
        if config.ref_dir.join(default).is_file() && !outputs.iter().any(|output| output == default)
        {
            outputs.push(default.to_string());
        }
    }
    outputs
}
