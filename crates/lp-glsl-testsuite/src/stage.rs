//! Test fixture staging.
//!
//! Tests execute in a scratch directory inside the build tree, not in
//! their source directory. Staging makes the source material reachable
//! from there: `ref/` and `src/` are linked in, the whole source
//! directory appears as `data/`, and flat input files (shaders, headers,
//! shader groups, scenes) are copied so tools see them under their plain
//! names. Everything is idempotent; an in-source run stages nothing.

use crate::config::RunConfig;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;

/// Input files copied flat from the test source into the work directory.
const STAGED_INPUT_PATTERNS: &[&str] = &["*.glsl", "*.h", "*.glslgroup", "*.xml"];

/// Image extensions a test run may generate.
const IMAGE_EXTENSIONS: &[&str] = &[
    "tif", "tx", "exr", "jpg", "jpeg", "png", "rla", "dpx", "iff", "psd",
];

/// Non-image extensions a test run may generate.
const GENERATED_EXTENSIONS: &[&str] = &["txt", "diff", "glo"];

/// Build a glob pattern for `pattern` under `dir`. The directory itself
/// is escaped; a checkout path like `lp[main]` must not act as a
/// character class.
pub(crate) fn dir_pattern(dir: &Path, pattern: &str) -> String {
    format!("{}/{pattern}", glob::Pattern::escape(&dir.display().to_string()))
}

/// The staged state of one test's working directory.
#[derive(Debug)]
pub struct Staging {
    /// Staged shader sources, sorted, as plain file names.
    pub shaders: Vec<String>,
}

impl Staging {
    /// Stage the test's fixtures into the working directory.
    pub fn acquire(config: &RunConfig) -> Result<Staging> {
        stage_dir(&config.test_source_dir.join("ref"), &config.ref_dir)?;
        stage_dir(&config.test_source_dir.join("src"), &config.work_dir.join("src"))?;
        if config.test_source_dir != config.work_dir {
            stage_dir(&config.test_source_dir, &config.work_dir.join("data"))?;
        }

        for pattern in STAGED_INPUT_PATTERNS {
            let full = dir_pattern(&config.test_source_dir, pattern);
            let paths = glob::glob(&full).with_context(|| format!("listing {full}"))?;
            for path in paths.flatten() {
                let Some(name) = path.file_name() else {
                    continue;
                };
                let dest = config.work_dir.join(name);
                if dest != path {
                    fs::copy(&path, &dest)
                        .with_context(|| format!("staging {}", path.display()))?;
                }
            }
        }

        let pattern = dir_pattern(&config.work_dir, "*.glsl");
        let mut shaders: Vec<String> = glob::glob(&pattern)
            .with_context(|| format!("listing {pattern}"))?
            .flatten()
            .filter_map(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .collect();
        shaders.sort();
        Ok(Staging { shaders })
    }
}

/// Remove generated artifacts from the work directory and `baseline/`.
/// Removal problems are logged, never fatal.
pub fn clean_generated(config: &RunConfig) {
    for dir in [&config.work_dir, &config.baseline_dir] {
        for ext in IMAGE_EXTENSIONS.iter().chain(GENERATED_EXTENSIONS) {
            let pattern = dir_pattern(dir, &format!("*.{ext}"));
            let Ok(paths) = glob::glob(&pattern) else {
                continue;
            };
            for path in paths.flatten() {
                if let Err(err) = fs::remove_file(&path) {
                    log::warn!("could not remove {}: {err}", path.display());
                }
            }
        }
    }
}

/// Make `source` appear at `dest` if `source` exists and `dest` does not.
fn stage_dir(source: &Path, dest: &Path) -> Result<()> {
    if !source.is_dir() || dest.symlink_metadata().is_ok() {
        return Ok(());
    }
    link_or_copy_dir(source, dest)
        .with_context(|| format!("staging {} as {}", source.display(), dest.display()))
}

#[cfg(unix)]
fn link_or_copy_dir(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn link_or_copy_dir(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            link_or_copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
