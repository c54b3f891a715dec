//! Sequential subprocess execution.
//!
//! Commands run one at a time, in order, with stdout and stderr appended
//! to the shared test log. A non-zero exit stops the run immediately
//! unless the test declared failures acceptable; nothing later in the
//! list is started. There are no timeouts: a hung tool is the build
//! system's problem to kill, not the driver's.

use crate::command::Invocation;
use crate::config::RunConfig;
use crate::report;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::process::{Command, ExitStatus, Stdio};

/// Spawns invocations inside one test's working directory.
pub struct CommandRunner<'a> {
    config: &'a RunConfig,
    extra_env: &'a [(&'static str, &'static str)],
}

impl<'a> CommandRunner<'a> {
    /// A runner applying `extra_env` (the execution-variant environment)
    /// to every spawned process.
    pub fn new(config: &'a RunConfig, extra_env: &'a [(&'static str, &'static str)]) -> CommandRunner<'a> {
        CommandRunner { config, extra_env }
    }

    /// Empty the test log so this run starts from a clean slate.
    pub fn truncate_log(&self) -> Result<()> {
        File::create(&self.config.log_path)
            .with_context(|| format!("truncating {}", self.config.log_path.display()))?;
        Ok(())
    }

    /// Run the whole command list. Returns `Ok(false)` when a command
    /// failed and the run must stop; the failure has already been
    /// reported, with the accumulated log printed for debugging.
    pub fn run_commands(&self, invocations: &[Invocation], failure_ok: bool) -> Result<bool> {
        self.truncate_log()?;
        for invocation in invocations {
            log::debug!("running {invocation}");
            let status = if invocation.silent {
                self.run_inherit(invocation)
            } else {
                self.run_logged(invocation)
            };
            let failed = match status {
                Ok(status) => !status.success(),
                Err(err) => {
                    log::warn!("could not start {invocation}: {err}");
                    true
                }
            };
            if failed && !failure_ok {
                report::command_failed(&invocation.to_string());
                let log = fs::read_to_string(&self.config.log_path).unwrap_or_default();
                report::log_dump(&log);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run with output appended to the test log.
    pub fn run_logged(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        let stdout = self.log_file()?;
        let stderr = stdout.try_clone()?;
        self.base_command(invocation)
            .stdout(stdout)
            .stderr(stderr)
            .status()
    }

    /// Run with output left on the console.
    pub fn run_inherit(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        self.base_command(invocation).status()
    }

    /// Run with output discarded; only the exit status matters.
    pub fn run_quiet(&self, invocation: &Invocation) -> io::Result<ExitStatus> {
        self.base_command(invocation)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    }

    fn base_command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&self.config.work_dir);
        for (name, value) in &self.config.child_env {
            command.env(name, value);
        }
        for (name, value) in self.extra_env {
            command.env(name, value);
        }
        for (name, value) in &invocation.env {
            command.env(name, value);
        }
        command
    }

    fn log_file(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_path)
    }
}
