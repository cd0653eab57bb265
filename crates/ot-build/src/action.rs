//! Actions produced by realized rules
//!
//! An action is the executable payload of a rule: what the scheduler runs
//! once every input is up to date. Arguments are fully rendered strings at
//! this point; the structured [`ArgSpec`](crate::ArgSpec) form only exists
//! before evaluation.

use ot_path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Spawn a program. `dir` is the working directory (project root when
    /// absent); `stdout_to` captures standard output into a target file.
    Run {
        prog: Path,
        args: Vec<String>,
        dir: Option<Path>,
        stdout_to: Option<Path>,
    },
    /// Run a shell snippet with `bash -c`.
    Bash { script: String },
    WriteFile { path: Path, contents: String },
    Copy { src: Path, dst: Path },
    RemoveFile { path: Path },
    /// Run sub-actions in sequence, stopping at the first failure.
    Progn(Vec<Action>),
}

impl Action {
    /// Short display name for progress reporting.
    pub fn display_name(&self) -> String {
        match self {
            Action::Run { prog, .. } => format!("run {}", prog.basename()),
            Action::Bash { .. } => "bash".to_string(),
            Action::WriteFile { path, .. } => format!("write {}", path.basename()),
            Action::Copy { dst, .. } => format!("copy to {}", dst.basename()),
            Action::RemoveFile { path } => format!("remove {}", path.basename()),
            Action::Progn(actions) => format!("progn ({} steps)", actions.len()),
        }
    }
}
