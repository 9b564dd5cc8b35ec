//! Builds the CLI invocation for one assistant turn.

use std::path::PathBuf;

use tokio::process::Command;

use crate::events::PermissionMode;
use crate::executable::ResolvedExecutable;

/// Everything the engine needs for one turn, already filtered and
/// rules-injected by the layers above.
#[derive(Debug, Clone)]
pub struct TurnInvocation {
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub resume_session_id: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub permission_mode: Option<PermissionMode>,
}

/// Argument list for the turn, exposed separately from [`Command`] so
/// the flag layout stays unit-testable.
///
/// Optional request parameters that were omitted produce no flag at
/// all; the CLI's own defaults apply.
pub fn turn_args(executable: &ResolvedExecutable, turn: &TurnInvocation) -> Vec<String> {
    let mut args = executable.args_prefix.clone();
    args.extend(
        [
            "-p",
            &turn.prompt,
            "--output-format",
            "stream-json",
            "--verbose",
        ]
        .map(str::to_string),
    );
    if !turn.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(turn.allowed_tools.join(","));
    }
    if let Some(session_id) = &turn.resume_session_id {
        args.push("--resume".to_string());
        args.push(session_id.clone());
    }
    if let Some(mode) = turn.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.as_arg().to_string());
    }
    args
}

pub fn build_turn_command(executable: &ResolvedExecutable, turn: &TurnInvocation) -> Command {
    let mut command = Command::new(&executable.program);
    command.args(turn_args(executable, turn));
    if let Some(dir) = &turn.working_directory {
        command.current_dir(dir);
    }
    command
}
