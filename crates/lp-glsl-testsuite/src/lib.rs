//! Regression-test driver for the lp-glsl shading toolchain.
//!
//! Each test is a directory holding a `test.json` descriptor, reference
//! outputs under `ref/`, and shader sources. The driver stages the test's
//! fixtures into a working directory, runs the toolchain binaries as
//! subprocesses with their output collected into `out.txt`, and compares
//! every declared output against its reference to decide pass or fail.
//! The compilers, renderers, and the image-diff tools are all external
//! executables; the driver never links them.

pub mod command;
pub mod compare;
pub mod config;
pub mod descriptor;
pub mod diff;
pub mod executor;
pub mod report;
pub mod run;
pub mod stage;
pub mod thresholds;

// Re-exports
pub use config::{DriverOptions, EnvConfig, RunConfig};
pub use descriptor::TestDescriptor;
pub use run::{run_driver, run_test};
pub use thresholds::CompareThresholds;
