//! Output comparison against reference artifacts.
//!
//! Each produced output is matched by extension: `.tif` and `.exr` go
//! through the external image comparator, `.txt` through a filtered line
//! diff, everything else through a byte-for-byte check. An output passes
//! if any candidate reference matches; the exact-named reference is tried
//! first, then every other same-extension file in `ref/`, so a test may
//! carry per-platform reference variants. In regression runs the only
//! candidate is the captured baseline copy.

use crate::command::{self, ImageTool, Invocation};
use crate::config::RunConfig;
use crate::diff::unified_diff;
use crate::executor::CommandRunner;
use crate::report;
use crate::stage;
use crate::thresholds::CompareThresholds;
use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions whose failures are explained by re-running the image tool
/// with its report appended to the test log.
const DIAGNOSED_IMAGE_EXTENSIONS: &[&str] = &["tif", "exr", "jpg", "png"];

/// How one output is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    /// Tolerant pixel comparison via the external image tool.
    Image,
    /// Filtered line diff.
    Text,
    /// Byte-for-byte equality.
    Bytes,
}

impl CompareKind {
    /// Pick the comparison strategy from the output's extension.
    pub fn for_name(name: &str) -> CompareKind {
        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some("tif") | Some("exr") => CompareKind::Image,
            Some("txt") => CompareKind::Text,
            _ => CompareKind::Bytes,
        }
    }
}

/// Where reference candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    /// The test's `ref/` directory.
    Ref,
    /// The `baseline/` directory captured by the first regression phase.
    Baseline,
}

/// Compares one run's outputs and reports each result.
pub struct Comparator<'a> {
    runner: &'a CommandRunner<'a>,
    config: &'a RunConfig,
    thresholds: &'a CompareThresholds,
    image_tool: ImageTool,
    image_post_args: &'a [String],
    filter: Option<&'a Regex>,
    source: ReferenceSource,
}

impl<'a> Comparator<'a> {
    pub fn new(
        runner: &'a CommandRunner<'a>,
        config: &'a RunConfig,
        thresholds: &'a CompareThresholds,
        image_tool: ImageTool,
        image_post_args: &'a [String],
        filter: Option<&'a Regex>,
        source: ReferenceSource,
    ) -> Comparator<'a> {
        Comparator {
            runner,
            config,
            thresholds,
            image_tool,
            image_post_args,
            filter,
            source,
        }
    }

    /// Compare `output` against its reference candidates, reporting the
    /// result. Failures print diagnostics: the file and its diff for text,
    /// the image tool's report (sent to the log) for images. Read errors
    /// count as a failed comparison, never a crash.
    pub fn check_output(&self, output: &str) -> bool {
        let candidates = self.candidates(output);
        for candidate in &candidates {
            let matched = match CompareKind::for_name(output) {
                CompareKind::Image => self.image_matches(output, candidate),
                CompareKind::Text => self.text_matches(output, candidate),
                CompareKind::Bytes => self.bytes_match(output, candidate),
            };
            match matched {
                Ok(true) => {
                    report::pass(
                        output,
                        &command::forward_slashes(&candidate.to_string_lossy()),
                    );
                    return true;
                }
                Ok(false) => {}
                Err(err) => {
                    log::warn!("comparing {output} against {}: {err:#}", candidate.display());
                }
            }
        }
        let detail = if candidates.is_empty() {
            "(no reference found)"
        } else {
            "(no reference matched)"
        };
        report::fail(output, detail);
        self.explain_failure(output);
        false
    }

    /// Candidate references in the order they are tried, as paths
    /// relative to the working directory.
    fn candidates(&self, output: &str) -> Vec<PathBuf> {
        match self.source {
            ReferenceSource::Baseline => {
                let candidate = Path::new("baseline").join(output);
                if self.config.work_dir.join(&candidate).is_file() {
                    vec![candidate]
                } else {
                    Vec::new()
                }
            }
            ReferenceSource::Ref => {
                let mut found = Vec::new();
                let exact = Path::new("ref").join(output);
                if self.config.work_dir.join(&exact).is_file() {
                    found.push(exact.clone());
                }
                if let Some(extension) = Path::new(output).extension().and_then(|ext| ext.to_str())
                {
                    let pattern = stage::dir_pattern(
                        &self.config.work_dir.join("ref"),
                        &format!("*.{}", glob::Pattern::escape(extension)),
                    );
                    let mut alternates: Vec<PathBuf> = match glob::glob(&pattern) {
                        Ok(paths) => paths
                            .flatten()
                            .filter_map(|path| {
                                path.strip_prefix(&self.config.work_dir)
                                    .map(Path::to_path_buf)
                                    .ok()
                            })
                            .filter(|path| *path != exact)
                            .collect(),
                        Err(err) => {
                            log::warn!("listing reference candidates for {output}: {err}");
                            Vec::new()
                        }
                    };
                    alternates.sort();
                    found.extend(alternates);
                }
                found
            }
        }
    }

    fn image_matches(&self, output: &str, candidate: &Path) -> Result<bool> {
        let invocation = self.image_invocation(output, candidate);
        let status = self
            .runner
            .run_quiet(&invocation)
            .with_context(|| format!("running {invocation}"))?;
        Ok(status.success())
    }

    fn text_matches(&self, output: &str, candidate: &Path) -> Result<bool> {
        let produced = fs::read_to_string(self.config.work_dir.join(output))
            .with_context(|| format!("reading {output}"))?;
        let reference = fs::read_to_string(self.config.work_dir.join(candidate))
            .with_context(|| format!("reading {}", candidate.display()))?;
        let produced = filtered_text(&produced, self.filter);
        let reference = filtered_text(&reference, self.filter);
        let to_label = command::forward_slashes(&candidate.to_string_lossy());
        match unified_diff(&produced, &reference, output, &to_label) {
            None => Ok(true),
            Some(diff) => {
                let diff_path = self.config.work_dir.join(format!("{output}.diff"));
                fs::write(&diff_path, &diff)
                    .with_context(|| format!("writing {}", diff_path.display()))?;
                Ok(false)
            }
        }
    }

    fn bytes_match(&self, output: &str, candidate: &Path) -> Result<bool> {
        let produced = fs::read(self.config.work_dir.join(output))
            .with_context(|| format!("reading {output}"))?;
        let reference = fs::read(self.config.work_dir.join(candidate))
            .with_context(|| format!("reading {}", candidate.display()))?;
        Ok(produced == reference)
    }

    fn explain_failure(&self, output: &str) {
        let extension = Path::new(output)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        if extension == "txt" {
            let contents =
                fs::read_to_string(self.config.work_dir.join(output)).unwrap_or_default();
            let diff = fs::read_to_string(self.config.work_dir.join(format!("{output}.diff")))
                .unwrap_or_default();
            report::text_failure(output, &contents, &diff);
        } else if DIAGNOSED_IMAGE_EXTENSIONS.contains(&extension) {
            let invocation = self.image_invocation(output, &self.primary_candidate(output));
            if let Err(err) = self.runner.run_logged(&invocation) {
                log::warn!("could not capture image diagnostics for {output}: {err}");
            }
        }
    }

    /// The reference a failing image is re-diffed against for diagnostics.
    fn primary_candidate(&self, output: &str) -> PathBuf {
        match self.source {
            ReferenceSource::Ref => Path::new("ref").join(output),
            ReferenceSource::Baseline => Path::new("baseline").join(output),
        }
    }

    fn image_invocation(&self, output: &str, candidate: &Path) -> Invocation {
        command::image_compare_invocation(
            self.config,
            self.image_tool,
            self.thresholds,
            output,
            candidate,
            self.image_post_args,
        )
    }
}

/// Apply the output filter: only lines fully matching it take part in the
/// comparison. Both the produced file and the reference go through this.
/// Kept lines keep their endings, so a missing final newline still shows
/// up in the diff.
fn filtered_text(raw: &str, filter: Option<&Regex>) -> String {
    match filter {
        Some(regex) => raw
            .split_inclusive('\n')
            .filter(|entry| {
                let line = entry.strip_suffix('\n').unwrap_or(entry);
                let line = line.strip_suffix('\r').unwrap_or(line);
                regex.is_match(line)
            })
            .collect(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use std::fs;
    use tempfile::TempDir;

    fn work_config(dir: &TempDir) -> RunConfig {
        work_config_at(dir.path().to_path_buf())
    }

    fn work_config_at(work_dir: PathBuf) -> RunConfig {
        RunConfig {
            ref_dir: work_dir.join("ref"),
            baseline_dir: work_dir.join("baseline"),
            log_path: work_dir.join("out.txt"),
            test_name: "sample".to_string(),
            build_dir: work_dir.join("build"),
            bin_dir: work_dir.join("build/bin"),
            source_dir: work_dir.clone(),
            test_source_dir: work_dir.clone(),
            work_dir,
            imgtool_root: None,
            testshade_name: None,
            regression: None,
            skip_diff: false,
            cleanup_on_success: false,
            debug: false,
            thresh_scale: None,
            child_env: Vec::new(),
        }
    }

    fn comparator<'a>(
        runner: &'a CommandRunner<'a>,
        config: &'a RunConfig,
        thresholds: &'a CompareThresholds,
        filter: Option<&'a Regex>,
        source: ReferenceSource,
    ) -> Comparator<'a> {
        Comparator::new(
            runner,
            config,
            thresholds,
            ImageTool::ImgTool,
            &[],
            filter,
            source,
        )
    }

    #[test]
    fn test_compare_kind_by_extension() {
        assert_eq!(CompareKind::for_name("out.tif"), CompareKind::Image);
        assert_eq!(CompareKind::for_name("out.exr"), CompareKind::Image);
        assert_eq!(CompareKind::for_name("out.txt"), CompareKind::Text);
        assert_eq!(CompareKind::for_name("out.jpg"), CompareKind::Bytes);
        assert_eq!(CompareKind::for_name("graph.glo"), CompareKind::Bytes);
        assert_eq!(CompareKind::for_name("plain"), CompareKind::Bytes);
    }

    #[test]
    fn test_filtered_text_keeps_fully_matching_lines() {
        let filter = Regex::new("^(?:RESULT .*)$").expect("Failed to compile");
        let raw = "noise\nRESULT 1\ntrailing RESULT 2\nRESULT 3\n";
        assert_eq!(
            filtered_text(raw, Some(&filter)),
            "RESULT 1\nRESULT 3\n"
        );
        assert_eq!(filtered_text(raw, None), raw);
        // An unterminated final line stays unterminated.
        assert_eq!(
            filtered_text("RESULT 1\nRESULT 2", Some(&filter)),
            "RESULT 1\nRESULT 2"
        );
    }

    #[test]
    fn test_candidates_prefer_exact_then_sorted_alternates() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        for name in ["out.txt", "zz.txt", "aa.txt", "image.exr"] {
            fs::write(config.ref_dir.join(name), name).expect("Failed to write ref");
        }
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        let candidates = comparator.candidates("out.txt");
        assert_eq!(
            candidates,
            [
                PathBuf::from("ref/out.txt"),
                PathBuf::from("ref/aa.txt"),
                PathBuf::from("ref/zz.txt"),
            ]
        );
    }

    #[test]
    fn test_candidates_without_exact_reference() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.ref_dir.join("linux.txt"), "x").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        assert_eq!(
            comparator.candidates("out.txt"),
            [PathBuf::from("ref/linux.txt")]
        );
        assert!(comparator.candidates("out.exr").is_empty());
    }

    #[test]
    fn test_candidates_found_under_glob_metacharacter_paths() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let work = dir.path().join("lp[rel]");
        fs::create_dir_all(work.join("ref")).expect("Failed to create ref dir");
        let config = work_config_at(work);
        fs::write(config.ref_dir.join("linux.txt"), "x").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        assert_eq!(
            comparator.candidates("out.txt"),
            [PathBuf::from("ref/linux.txt")]
        );
    }

    #[test]
    fn test_candidates_in_baseline_mode() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.baseline_dir).expect("Failed to create baseline dir");
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.baseline_dir.join("out.txt"), "x").expect("Failed to write baseline");
        fs::write(config.ref_dir.join("out.txt"), "y").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator = comparator(
            &runner,
            &config,
            &thresholds,
            None,
            ReferenceSource::Baseline,
        );

        // ref/ is ignored entirely in regression comparisons.
        assert_eq!(
            comparator.candidates("out.txt"),
            [PathBuf::from("baseline/out.txt")]
        );
        assert!(comparator.candidates("other.txt").is_empty());
    }

    #[test]
    fn test_text_mismatch_writes_diff_sidecar() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.work_dir.join("out.txt"), "got\n").expect("Failed to write output");
        fs::write(config.ref_dir.join("out.txt"), "want\n").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        assert!(!comparator.check_output("out.txt"));
        let sidecar = fs::read_to_string(config.work_dir.join("out.txt.diff"))
            .expect("Failed to read diff sidecar");
        assert!(sidecar.contains("-got"));
        assert!(sidecar.contains("+want"));
        assert!(sidecar.contains("ref/out.txt"));
    }

    #[test]
    fn test_text_final_newline_is_significant() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.work_dir.join("out.txt"), "a\nb").expect("Failed to write output");
        fs::write(config.ref_dir.join("out.txt"), "a\nb\n").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        assert!(!comparator.check_output("out.txt"));
        let sidecar = fs::read_to_string(config.work_dir.join("out.txt.diff"))
            .expect("Failed to read diff sidecar");
        assert!(sidecar.contains("No newline at end of file"));
    }

    #[test]
    fn test_text_match_with_filter_ignores_noise() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(
            config.work_dir.join("out.txt"),
            "RESULT ok\ntiming 12ms\n",
        )
        .expect("Failed to write output");
        fs::write(
            config.ref_dir.join("out.txt"),
            "RESULT ok\ntiming 99ms\n",
        )
        .expect("Failed to write ref");
        let filter = Regex::new("^(?:RESULT .*)$").expect("Failed to compile");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator = comparator(
            &runner,
            &config,
            &thresholds,
            Some(&filter),
            ReferenceSource::Ref,
        );

        assert!(comparator.check_output("out.txt"));
        assert!(!config.work_dir.join("out.txt.diff").exists());
    }

    #[test]
    fn test_bytes_match_exactly() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.work_dir.join("out.glo"), [1u8, 2, 3]).expect("Failed to write output");
        fs::write(config.ref_dir.join("out.glo"), [1u8, 2, 3]).expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        assert!(comparator.check_output("out.glo"));

        fs::write(config.work_dir.join("out.glo"), [1u8, 2, 4]).expect("Failed to write output");
        assert!(!comparator.check_output("out.glo"));
    }

    #[test]
    fn test_missing_output_is_a_failure_not_a_crash() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = work_config(&dir);
        fs::create_dir(&config.ref_dir).expect("Failed to create ref dir");
        fs::write(config.ref_dir.join("out.txt"), "want\n").expect("Failed to write ref");
        let runner = CommandRunner::new(&config, &[]);
        let thresholds = CompareThresholds::BASE;
        let comparator =
            comparator(&runner, &config, &thresholds, None, ReferenceSource::Ref);

        // The produced file was never written.
        assert!(!comparator.check_output("out.txt"));
    }
}
