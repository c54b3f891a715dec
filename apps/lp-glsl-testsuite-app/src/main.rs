use anyhow::Result;
use clap::Parser;
use lp_glsl_testsuite::{DriverOptions, run_driver};
use std::path::PathBuf;
use std::process;

/// Run one testsuite test: stage its fixtures, execute its commands, and
/// compare the outputs against their references
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Test directory to run in (defaults to the current directory)
    #[clap(value_name = "TEST_DIR")]
    pub test_dir: Option<PathBuf>,

    /// Build tree holding bin/; overrides LP_BUILD_DIR
    #[clap(value_name = "BUILD_DIR")]
    pub build_dir: Option<PathBuf>,

    /// Extra directory prepended to the executable search path of child processes
    #[clap(short, long)]
    pub path: Option<PathBuf>,

    /// MS Visual Studio configuration subdirectory of bin/
    #[clap(long)]
    pub devenv_config: Option<String>,

    /// MS Visual Studio solution path
    #[clap(long)]
    pub solution_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let options = DriverOptions {
        test_dir: args.test_dir,
        build_dir: args.build_dir,
        path: args.path,
        devenv_config: args.devenv_config,
        solution_path: args.solution_path,
    };
    let code = run_driver(options)?;
    process::exit(code);
}
