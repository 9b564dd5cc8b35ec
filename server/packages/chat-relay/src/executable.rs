//! Locates and validates the Claude CLI executable.
//!
//! Package managers rarely put a real binary on `PATH`: npm installs a
//! shell wrapper that execs `node .../cli.js`, and on Windows a `.cmd`
//! shim. Resolution traces through one layer of that indirection and
//! then confirms liveness with a `--version` probe before the server
//! starts serving.

use std::path::{Path, PathBuf};

use chat_relay_error::RelayError;
use tokio::process::Command;

pub const EXECUTABLE_NAME: &str = "claude";

/// A validated invocation target for the engine.
///
/// `args_prefix` is non-empty when the real artifact is a script that
/// needs an interpreter in front of it (`node cli.js ...`).
#[derive(Debug, Clone)]
pub struct ResolvedExecutable {
    pub program: PathBuf,
    pub args_prefix: Vec<String>,
    pub version: String,
}

impl ResolvedExecutable {
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args_prefix.iter().cloned());
        parts.join(" ")
    }
}

/// Resolves the executable, preferring an explicit hint over `PATH`
/// auto-detection. Fatal at startup when nothing validates.
pub async fn resolve(hint: Option<&Path>) -> Result<ResolvedExecutable, RelayError> {
    if let Some(hint) = hint {
        return validate(hint.to_path_buf(), Vec::new())
            .await
            .ok_or_else(|| RelayError::ExecutableNotFound {
                hint: Some(hint.display().to_string()),
            });
    }

    let candidate =
        find_in_path(EXECUTABLE_NAME).ok_or(RelayError::ExecutableNotFound { hint: None })?;

    if candidate
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("cmd"))
    {
        if let Ok(contents) = tokio::fs::read_to_string(&candidate).await {
            let shim_dir = candidate.parent().unwrap_or_else(|| Path::new("."));
            if let Some(script) = parse_cmd_shim(&contents, shim_dir) {
                if let Some(resolved) = validate(
                    PathBuf::from("node"),
                    vec![script.to_string_lossy().to_string()],
                )
                .await
                {
                    return Ok(resolved);
                }
            }
        }
    }

    if let Some(script) = trace_wrapper(&candidate).await {
        if let Some(resolved) = validate(
            PathBuf::from("node"),
            vec![script.to_string_lossy().to_string()],
        )
        .await
        {
            return Ok(resolved);
        }
    }

    validate(candidate.clone(), Vec::new())
        .await
        .ok_or_else(|| RelayError::ExecutableNotFound {
            hint: Some(candidate.display().to_string()),
        })
}

/// Liveness probe: the candidate must exit 0 on `--version` and print
/// something that looks like a version.
async fn validate(program: PathBuf, args_prefix: Vec<String>) -> Option<ResolvedExecutable> {
    let output = Command::new(&program)
        .args(&args_prefix)
        .arg("--version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = parse_version_output(&output.stdout)?;
    Some(ResolvedExecutable {
        program,
        args_prefix,
        version,
    })
}

fn find_in_path(binary_name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary_name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            for ext in ["exe", "cmd"] {
                let candidate = dir.join(format!("{binary_name}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

fn parse_version_output(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Recovers the node script path from a Windows `.cmd` launcher shim.
/// `%~dp0` in the shim text expands to the shim's own directory.
fn parse_cmd_shim(contents: &str, shim_dir: &Path) -> Option<PathBuf> {
    for raw in contents.split_whitespace() {
        let token = raw.trim_matches('"');
        if !token.to_ascii_lowercase().ends_with(".js") {
            continue;
        }
        let expanded = token.replace("%~dp0", "").replace('\\', "/");
        return Some(shim_dir.join(expanded.trim_start_matches('/')));
    }
    None
}

/// Runs a wrapper script with a fake `node` first on `PATH` that prints
/// the script path it was asked to execute, recovering the real CLI
/// artifact behind one layer of wrapper indirection.
#[cfg(unix)]
async fn trace_wrapper(candidate: &Path) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let head = tokio::fs::read(candidate).await.ok()?;
    if !head.starts_with(b"#!") {
        return None;
    }

    let shim_dir = tempfile::tempdir().ok()?;
    let shim_path = shim_dir.path().join("node");
    std::fs::write(&shim_path, "#!/bin/sh\nprintf '%s\\n' \"$1\"\nexit 0\n").ok()?;
    std::fs::set_permissions(&shim_path, std::fs::Permissions::from_mode(0o755)).ok()?;

    let mut paths = vec![shim_dir.path().to_path_buf()];
    if let Some(path_var) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&path_var));
    }
    let joined = std::env::join_paths(paths).ok()?;

    let output = Command::new(candidate)
        .arg("--version")
        .env("PATH", joined)
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let traced = PathBuf::from(text.lines().next()?.trim());
    if traced.is_absolute() && traced.is_file() {
        tracing::debug!(
            wrapper = %candidate.display(),
            script = %traced.display(),
            "traced claude wrapper to real script"
        );
        Some(traced)
    } else {
        None
    }
}

#[cfg(not(unix))]
async fn trace_wrapper(_candidate: &Path) -> Option<PathBuf> {
    None
}
