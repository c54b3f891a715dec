//! Invocation construction and tool resolution.
//!
//! Commands are built as plain argument vectors; nothing goes through a
//! shell. Toolchain binaries live in the build tree's `bin/` directory,
//! image tools in a separate installation.

use crate::config::RunConfig;
use crate::descriptor::SubCommand;
use crate::thresholds::CompareThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Flags passed to every shader compilation.
pub const COMPILE_FLAGS: &[&str] = &["-Wall"];

/// Executables the driver knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    /// Shader compiler.
    #[serde(rename = "lp-glslc")]
    Glslc,
    /// Compiled-shader introspection.
    #[serde(rename = "lp-glslinfo")]
    GlslInfo,
    /// Shader-execution test tool.
    #[serde(rename = "lp-testshade")]
    TestShade,
    /// CPU renderer test tool.
    #[serde(rename = "lp-testrender")]
    TestRender,
    /// Emulator renderer test tool.
    #[serde(rename = "lp-testrender-emu")]
    TestRenderEmu,
    /// Image swiss-knife, also the default image comparator.
    #[serde(rename = "imgtool")]
    ImgTool,
    /// Dedicated image differ.
    #[serde(rename = "imgdiff")]
    ImgDiff,
    /// Texture converter.
    #[serde(rename = "mktex")]
    MkTex,
}

impl Tool {
    /// Name of the executable on disk.
    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::Glslc => "lp-glslc",
            Tool::GlslInfo => "lp-glslinfo",
            Tool::TestShade => "lp-testshade",
            Tool::TestRender => "lp-testrender",
            Tool::TestRenderEmu => "lp-testrender-emu",
            Tool::ImgTool => "imgtool",
            Tool::ImgDiff => "imgdiff",
            Tool::MkTex => "mktex",
        }
    }

    fn uses_image_install(self) -> bool {
        matches!(self, Tool::ImgTool | Tool::ImgDiff | Tool::MkTex)
    }

    fn is_renderer(self) -> bool {
        matches!(self, Tool::TestRender | Tool::TestRenderEmu)
    }
}

/// Which tool compares images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTool {
    /// `imgtool`, invoked with a trailing `--diff`.
    #[default]
    ImgTool,
    /// `imgdiff`, which additionally honors relative-error limits.
    ImgDiff,
}

impl ImageTool {
    fn tool(self) -> Tool {
        match self {
            ImageTool::ImgTool => Tool::ImgTool,
            ImageTool::ImgDiff => Tool::ImgDiff,
        }
    }
}

/// A fully resolved subprocess: program, arguments, extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to spawn.
    pub program: PathBuf,
    /// Arguments, passed as-is.
    pub args: Vec<String>,
    /// Environment applied on top of the driver's exports.
    pub env: Vec<(String, String)>,
    /// Leave output on the console instead of the test log.
    pub silent: bool,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Resolve the program path for a tool.
pub fn tool_program(config: &RunConfig, tool: Tool) -> PathBuf {
    if tool == Tool::TestShade {
        if let Some(name) = &config.testshade_name {
            return PathBuf::from(name);
        }
    }
    if tool.uses_image_install() {
        return match &config.imgtool_root {
            Some(root) => root.join("bin").join(tool.binary_name()),
            None => PathBuf::from(tool.binary_name()),
        };
    }
    config.bin_dir.join(tool.binary_name())
}

/// Compile one staged shader.
pub fn compile_invocation(config: &RunConfig, shader: &str) -> Invocation {
    let mut args: Vec<String> = COMPILE_FLAGS.iter().map(|flag| flag.to_string()).collect();
    args.push(shader.to_string());
    Invocation {
        program: tool_program(config, Tool::Glslc),
        args,
        env: Vec::new(),
        silent: false,
    }
}

/// Resolve one descriptor command into an invocation.
pub fn sub_command_invocation(config: &RunConfig, sub: &SubCommand) -> Invocation {
    let (program, renderer) = match (&sub.tool, &sub.program) {
        (Some(tool), _) => (tool_program(config, *tool), tool.is_renderer()),
        (None, Some(program)) => (PathBuf::from(program), false),
        // Rejected by descriptor validation; an empty program fails to spawn.
        (None, None) => (PathBuf::new(), false),
    };
    let mut env: Vec<(String, String)> = Vec::new();
    if renderer {
        // Keep renderer library chatter out of the compared log.
        env.push(("LP_RENDER_LOG_LEVEL".to_string(), "0".to_string()));
    }
    env.extend(sub.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    Invocation {
        program,
        args: sub.args.clone(),
        env,
        silent: sub.silent,
    }
}

/// Compare `produced` against `reference` with the selected image tool.
///
/// Paths are given relative to the working directory, with `/` separators
/// on every platform.
pub fn image_compare_invocation(
    config: &RunConfig,
    tool: ImageTool,
    thresholds: &CompareThresholds,
    produced: &str,
    reference: &Path,
    post_args: &[String],
) -> Invocation {
    let mut args = vec![
        "-a".to_string(),
        "-fail".to_string(),
        format_threshold(thresholds.fail),
        "-failpercent".to_string(),
        format_threshold(thresholds.fail_percent),
        "-hardfail".to_string(),
        format_threshold(thresholds.hard_fail),
        "-warn".to_string(),
        format_threshold(thresholds.warn()),
        "-warnpercent".to_string(),
        format_threshold(thresholds.warn_percent()),
    ];
    if tool == ImageTool::ImgDiff {
        args.push("-failrelative".to_string());
        args.push(format_threshold(thresholds.fail_relative));
        args.push("-allowfailures".to_string());
        args.push(thresholds.allow_failures.to_string());
    }
    args.push(forward_slashes(produced));
    args.extend(post_args.iter().cloned());
    args.push(forward_slashes(&reference.to_string_lossy()));
    args.extend(post_args.iter().cloned());
    if tool == ImageTool::ImgTool {
        args.push("--diff".to_string());
    }
    Invocation {
        program: tool_program(config, tool.tool()),
        args,
        env: Vec::new(),
        silent: false,
    }
}

fn format_threshold(value: f64) -> String {
    format!("{value}")
}

/// Render a path with `/` separators regardless of platform.
pub fn forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SubCommand;
    use std::collections::BTreeMap;

    fn test_config() -> RunConfig {
        RunConfig {
            work_dir: PathBuf::from("/build/testsuite/noise"),
            test_name: "noise".to_string(),
            build_dir: PathBuf::from("/build"),
            bin_dir: PathBuf::from("/build/bin"),
            source_dir: PathBuf::from("/src"),
            test_source_dir: PathBuf::from("/src/testsuite/noise"),
            ref_dir: PathBuf::from("/build/testsuite/noise/ref"),
            baseline_dir: PathBuf::from("/build/testsuite/noise/baseline"),
            log_path: PathBuf::from("/build/testsuite/noise/out.txt"),
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

    #[test]
    fn test_compile_invocation_uses_compiler_flags() {
        let invocation = compile_invocation(&test_config(), "noise.glsl");
        assert_eq!(invocation.program, PathBuf::from("/build/bin/lp-glslc"));
        assert_eq!(invocation.args, ["-Wall", "noise.glsl"]);
        assert!(!invocation.silent);
    }

    #[test]
    fn test_toolchain_tools_resolve_from_bin_dir() {
        let config = test_config();
        assert_eq!(
            tool_program(&config, Tool::TestShade),
            PathBuf::from("/build/bin/lp-testshade")
        );
        assert_eq!(
            tool_program(&config, Tool::GlslInfo),
            PathBuf::from("/build/bin/lp-glslinfo")
        );
    }

    #[test]
    fn test_testshade_name_override_wins() {
        let config = RunConfig {
            testshade_name: Some("/opt/alt/testshade-gpu".to_string()),
            ..test_config()
        };
        assert_eq!(
            tool_program(&config, Tool::TestShade),
            PathBuf::from("/opt/alt/testshade-gpu")
        );
        // Other tools are unaffected.
        assert_eq!(
            tool_program(&config, Tool::TestRender),
            PathBuf::from("/build/bin/lp-testrender")
        );
    }

    #[test]
    fn test_image_tools_resolve_from_image_install() {
        let bare = test_config();
        assert_eq!(tool_program(&bare, Tool::ImgTool), PathBuf::from("imgtool"));

        let rooted = RunConfig {
            imgtool_root: Some(PathBuf::from("/opt/imgtools")),
            ..test_config()
        };
        assert_eq!(
            tool_program(&rooted, Tool::ImgDiff),
            PathBuf::from("/opt/imgtools/bin/imgdiff")
        );
        assert_eq!(
            tool_program(&rooted, Tool::MkTex),
            PathBuf::from("/opt/imgtools/bin/mktex")
        );
    }

    #[test]
    fn test_renderers_silence_library_logging() {
        let sub = SubCommand {
            tool: Some(Tool::TestRender),
            program: None,
            args: vec!["scene.xml".to_string()],
            env: BTreeMap::new(),
            silent: false,
        };
        let invocation = sub_command_invocation(&test_config(), &sub);
        assert!(
            invocation
                .env
                .contains(&("LP_RENDER_LOG_LEVEL".to_string(), "0".to_string()))
        );

        let shade = SubCommand {
            tool: Some(Tool::TestShade),
            ..sub
        };
        let invocation = sub_command_invocation(&test_config(), &shade);
        assert!(invocation.env.is_empty());
    }

    #[test]
    fn test_sub_command_env_follows_renderer_default() {
        let mut env = BTreeMap::new();
        env.insert("LP_RENDER_LOG_LEVEL".to_string(), "3".to_string());
        let sub = SubCommand {
            tool: Some(Tool::TestRenderEmu),
            program: None,
            args: Vec::new(),
            env,
            silent: false,
        };
        let invocation = sub_command_invocation(&test_config(), &sub);
        // The descriptor's value comes later, so it wins when applied in order.
        assert_eq!(
            invocation.env,
            [
                ("LP_RENDER_LOG_LEVEL".to_string(), "0".to_string()),
                ("LP_RENDER_LOG_LEVEL".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_image_compare_flags_for_imgtool() {
        let thresholds = CompareThresholds::BASE;
        let invocation = image_compare_invocation(
            &test_config(),
            ImageTool::ImgTool,
            &thresholds,
            "out.tif",
            Path::new("ref/out.tif"),
            &[],
        );
        assert_eq!(invocation.program, PathBuf::from("imgtool"));
        assert_eq!(
            invocation.args,
            [
                "-a",
                "-fail",
                "0.004",
                "-failpercent",
                "0.02",
                "-hardfail",
                "0.01",
                "-warn",
                "0.008",
                "-warnpercent",
                "0.02",
                "out.tif",
                "ref/out.tif",
                "--diff",
            ]
        );
    }

    #[test]
    fn test_image_compare_flags_for_imgdiff() {
        let thresholds = CompareThresholds {
            allow_failures: 2,
            ..CompareThresholds::BASE
        };
        let invocation = image_compare_invocation(
            &test_config(),
            ImageTool::ImgDiff,
            &thresholds,
            "out.exr",
            Path::new("baseline/out.exr"),
            &[],
        );
        assert!(invocation.args.windows(2).any(|w| w == ["-failrelative", "0.001"]));
        assert!(invocation.args.windows(2).any(|w| w == ["-allowfailures", "2"]));
        assert!(!invocation.args.contains(&"--diff".to_string()));
    }

    #[test]
    fn test_image_post_args_follow_each_file() {
        let thresholds = CompareThresholds::BASE;
        let post = vec!["--ch".to_string(), "R,G,B".to_string()];
        let invocation = image_compare_invocation(
            &test_config(),
            ImageTool::ImgTool,
            &thresholds,
            "out.tif",
            Path::new("ref/out.tif"),
            &post,
        );
        let tail: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        let expected = [
            "out.tif", "--ch", "R,G,B", "ref/out.tif", "--ch", "R,G,B", "--diff",
        ];
        assert_eq!(&tail[tail.len() - expected.len()..], expected);
    }

    #[test]
    fn test_forward_slashes() {
        assert_eq!(forward_slashes("ref\\out.tif"), "ref/out.tif");
        assert_eq!(forward_slashes("ref/out.tif"), "ref/out.tif");
    }

    #[test]
    fn test_invocation_display() {
        let invocation = Invocation {
            program: PathBuf::from("/build/bin/lp-testshade"),
            args: vec!["-g".to_string(), "64".to_string()],
            env: Vec::new(),
            silent: false,
        };
        assert_eq!(invocation.to_string(), "/build/bin/lp-testshade -g 64");
    }
}
