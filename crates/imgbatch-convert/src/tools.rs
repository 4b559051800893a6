//! Converter tool configuration and discovery.
//!
//! [`ConverterConfig`] describes how to invoke the external converter: a
//! program and an argument template. [`ToolRegistry`] discovers the known
//! ImageMagick front ends and reports their availability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use imgbatch_common::{Error, Result};

/// Default converter timeout: 2 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on captured stderr, in bytes.
const DEFAULT_STDERR_LIMIT: usize = 4096;

/// Known tool names that the registry manages.
///
/// `magick` is ImageMagick 7; `convert` is the ImageMagick 6 entry point.
const KNOWN_TOOLS: &[&str] = &["magick", "convert"];

/// How to invoke the external converter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Program name (looked up in `PATH`) or path to the executable.
    #[serde(default = "default_program")]
    pub program: String,

    /// Argument template. See [`TemplateContext`](crate::TemplateContext)
    /// for the available variables.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Maximum time one conversion may take before it is killed.
    #[serde(
        default = "default_timeout",
        rename = "timeout_secs",
        with = "duration_secs"
    )]
    pub timeout: Duration,

    /// Maximum number of stderr bytes kept for error reports.
    #[serde(default = "default_stderr_limit")]
    pub stderr_limit: usize,
}

fn default_program() -> String {
    "magick".to_string()
}

fn default_args() -> Vec<String> {
    ["-", "-quality", "{quality}", "{format}:-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_stderr_limit() -> usize {
    DEFAULT_STDERR_LIMIT
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout: default_timeout(),
            stderr_limit: default_stderr_limit(),
        }
    }
}

/// Serde helpers to (de)serialize `Duration` as whole seconds.
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Resolve a program name or path to an executable.
///
/// A value containing a path separator is checked directly; a bare name is
/// searched in `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| {
        Error::launch(
            display_name(Path::new(program)),
            format!("{program} not found ({e}); is it installed and in PATH?"),
        )
    })
}

/// Short name of a program for logs and error messages.
pub(crate) fn display_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered converter locations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    names: Vec<String>,
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover the known converters plus the configured program.
    ///
    /// Tools that are not found are omitted from the registry but still
    /// reported as unavailable by [`check_all`](Self::check_all).
    pub fn discover(config: &ConverterConfig) -> Self {
        let mut names: Vec<String> = Vec::new();
        if !KNOWN_TOOLS.contains(&config.program.as_str()) {
            names.push(config.program.clone());
        }
        names.extend(KNOWN_TOOLS.iter().map(|s| s.to_string()));

        let tools = names
            .iter()
            .filter_map(|name| resolve_program(name).ok().map(|p| (name.clone(), p)))
            .collect();

        Self { names, tools }
    }

    /// Return the path of the given tool, or [`Error::Launch`] if it was not
    /// found during discovery.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| {
            Error::launch(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all registered tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        self.names
            .iter()
            .map(|name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.clone(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.clone(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .stdin(std::process::Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
