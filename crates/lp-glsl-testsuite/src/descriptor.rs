//! Test descriptor loading and validation.
//!
//! Every test directory carries a `test.json` describing the commands to
//! run and the outputs to compare. Descriptors are plain data: they are
//! parsed and validated in full before anything is executed, and a typo in
//! a field name is an error rather than a silently ignored key.

use crate::command::{ImageTool, Tool};
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One entry of a test's command list.
///
/// Exactly one of `tool` and `program` must be given: `tool` names a
/// toolchain or image binary resolved by the driver, `program` is an
/// arbitrary executable used as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubCommand {
    /// Known toolchain or image tool to run.
    #[serde(default)]
    pub tool: Option<Tool>,
    /// Arbitrary executable to run instead of a known tool.
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments passed verbatim; nothing is shell-interpreted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for this invocation only.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Leave the invocation's output on the console instead of appending
    /// it to the test log.
    #[serde(default)]
    pub silent: bool,
}

/// Declarative description of one test, loaded from `test.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestDescriptor {
    /// Commands to run, in order.
    #[serde(default)]
    pub command: Vec<SubCommand>,
    /// Produced files compared against their references.
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,
    /// Keep running after a command exits non-zero.
    #[serde(default)]
    pub failure_ok: bool,
    /// Compile every staged `.glsl` source before the command list runs.
    #[serde(default = "default_true")]
    pub compile_shaders: bool,
    /// Regex selecting which log lines participate in text comparison.
    /// Only lines fully matching the pattern are compared, on both sides.
    #[serde(default)]
    pub output_filter: Option<String>,
    /// Which image comparator to use.
    #[serde(default)]
    pub image_tool: ImageTool,
    /// Arguments appended after each file operand of the image comparator.
    #[serde(default)]
    pub image_post_args: Vec<String>,
    /// Override for the per-pixel failure threshold.
    #[serde(default)]
    pub fail_thresh: Option<f64>,
    /// Override for the outright-failure threshold.
    #[serde(default)]
    pub hard_fail: Option<f64>,
    /// Override for the failing-pixel percentage.
    #[serde(default)]
    pub fail_percent: Option<f64>,
    /// Override for the relative error limit.
    #[serde(default)]
    pub fail_relative: Option<f64>,
    /// Override for the tolerated number of failing pixels.
    #[serde(default)]
    pub allow_failures: Option<u32>,
}

fn default_outputs() -> Vec<String> {
    vec!["out.txt".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for TestDescriptor {
    fn default() -> TestDescriptor {
        TestDescriptor {
            command: Vec::new(),
            outputs: default_outputs(),
            failure_ok: false,
            compile_shaders: true,
            output_filter: None,
            image_tool: ImageTool::default(),
            image_post_args: Vec::new(),
            fail_thresh: None,
            hard_fail: None,
            fail_percent: None,
            fail_relative: None,
            allow_failures: None,
        }
    }
}

impl TestDescriptor {
    /// Read and validate the descriptor at `path`. A missing descriptor is
    /// an error; the driver never guesses what a test should run.
    pub fn load(path: &Path) -> Result<TestDescriptor> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading test descriptor {}", path.display()))?;
        let descriptor: TestDescriptor = serde_json::from_str(&raw)
            .with_context(|| format!("parsing test descriptor {}", path.display()))?;
        descriptor
            .validate()
            .with_context(|| format!("validating test descriptor {}", path.display()))?;
        Ok(descriptor)
    }

    /// Check everything that can be checked before execution.
    pub fn validate(&self) -> Result<()> {
        for (index, sub) in self.command.iter().enumerate() {
            match (&sub.tool, &sub.program) {
                (Some(_), Some(_)) => {
                    bail!("command {index}: give either a tool or a program, not both")
                }
                (None, None) => bail!("command {index}: a tool or a program is required"),
                (None, Some(program)) if program.is_empty() => {
                    bail!("command {index}: the program name is empty")
                }
                _ => {}
            }
        }
        for output in &self.outputs {
            if output.is_empty() || output.contains('/') || output.contains('\\') {
                bail!("output {output:?} must be a plain file name");
            }
        }
        for (name, value) in [
            ("fail_thresh", self.fail_thresh),
            ("hard_fail", self.hard_fail),
            ("fail_percent", self.fail_percent),
            ("fail_relative", self.fail_relative),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    bail!("{name} must be finite and non-negative, got {value}");
                }
            }
        }
        self.compiled_filter()?;
        Ok(())
    }

    /// Compile `output_filter`, anchored so a line must match in full.
    pub fn compiled_filter(&self) -> Result<Option<Regex>> {
        match &self.output_filter {
            Some(source) => {
                let anchored = format!("^(?:{source})$");
                let regex = Regex::new(&anchored)
                    .with_context(|| format!("compiling output filter {source:?}"))?;
                Ok(Some(regex))
            }
            None => Ok(None),
        }
    }
}
