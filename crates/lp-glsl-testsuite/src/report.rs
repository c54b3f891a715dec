//! Console reporting with ANSI colors.
//!
//! Results go to stdout, where the invoking build system captures them.

use std::path::Path;

/// ANSI color codes
mod colors {
    pub const GREEN: &str = "\x1b[32m";
    pub const RED: &str = "\x1b[31m";
    pub const DIM: &str = "\x1b[2m";
    pub const RESET: &str = "\x1b[0m";
}

/// Check if colors should be enabled
/// Respects NO_COLOR environment variable
fn should_color() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Format text with color if colors are enabled
fn colorize(text: &str, color: &str) -> String {
    if should_color() {
        format!("{color}{text}{}", colors::RESET)
    } else {
        text.to_string()
    }
}

/// Print a block followed by a newline even when the block lacks one.
fn print_block(contents: &str) {
    print!("{contents}");
    if !contents.is_empty() && !contents.ends_with('\n') {
        println!();
    }
}

/// Announce the test being run and where its sources live.
pub fn test_header(name: &str, source_dir: &Path) {
    let detail = format!("(source {})", source_dir.display());
    println!("Running {name} {}", colorize(&detail, colors::DIM));
}

/// One output matched a reference.
pub fn pass(output: &str, reference: &str) {
    let mark = colorize("✓", colors::GREEN);
    println!("{mark} PASS: {output} matches {reference}");
}

/// One output matched no reference.
pub fn fail(output: &str, detail: &str) {
    let mark = colorize("✗", colors::RED);
    println!("{mark} FAIL: {output} {detail}");
}

/// A sub-command exited non-zero or never started.
pub fn command_failed(command: &str) {
    let mark = colorize("✗", colors::RED);
    println!("{mark} FAIL: command failed: {command}");
}

/// Frame the accumulated test log for failure diagnosis.
pub fn log_dump(contents: &str) {
    println!("Output was:\n--------");
    print_block(contents);
    println!("--------");
}

/// Print a failed text output in full, then its diff.
pub fn text_failure(output: &str, contents: &str, diff: &str) {
    println!("-----{output}----->");
    print_block(contents);
    println!("<----------");
    println!("Diff was:\n-------");
    print_block(diff);
    println!("-------");
}

/// Final verdict for the whole run.
pub fn run_result(name: &str, passed: bool) {
    if passed {
        let mark = colorize("✓", colors::GREEN);
        println!("{mark} {name} passed");
    } else {
        let mark = colorize("✗", colors::RED);
        println!("{mark} {name} FAILED");
    }
}
