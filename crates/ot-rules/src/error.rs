//! Errors during rule generation
//!
//! Two families: configuration-fatal errors abort generation immediately;
//! deferred errors (missing libraries, unsatisfiable selects, scanner-output
//! problems) are converted with [`RulesError::deferred`] and embedded into
//! the build graph, so they only fire if the affected rule is evaluated.
//! All variants are `Clone` for that reason.

use ot_build::BuildError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RulesError {
    #[error("module {module} in {dir} has an interface but no implementation")]
    IntfWithoutImpl { dir: String, module: String },

    #[error("duplicate module {module} in {dir}: both {file_a} and {file_b} map to it")]
    DuplicateModule {
        dir: String,
        module: String,
        file_a: String,
        file_b: String,
    },

    #[error("module {module} is listed in the modules field but has no source file in {dir}")]
    UnknownModule { dir: String, module: String },

    #[error("cannot evaluate this set without the build graph: it reads from file {file}")]
    FileSetNotStatic { file: String },

    #[error("malformed dependency-scanner output line: {line:?}")]
    MalformedScannerOutput { line: String },

    #[error("module {module} appears twice in dependency-scanner output")]
    DuplicateModuleInScan { module: String },

    #[error("dependency cycle between modules: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("executable {exe} has no corresponding module {module}")]
    ExecutableWithoutModule { exe: String, module: String },

    #[error("library {name:?} not found")]
    MissingLibrary { name: String },

    #[error("none of the select branches for {result} is satisfiable")]
    NoMatchingSelect { result: String },

    #[error("invalid glob {glob:?}: {reason}")]
    InvalidGlob { glob: String, reason: String },

    #[error("multiple rules generated for target {path}")]
    DuplicateTarget { path: String },

    #[error("variable {var} expands to the first dependency, which is a glob or recursive form")]
    FirstDepNotAFile { var: String },

    #[error("unknown {kind} artifact {name:?} referenced from a user action")]
    UnknownArtifact { kind: &'static str, name: String },
}

impl RulesError {
    /// Convert into a deferred build failure: the error is stored in the
    /// rule and raised when the rule is evaluated, not now.
    pub fn deferred(&self) -> BuildError {
        BuildError::deferred(self.to_string())
    }
}
