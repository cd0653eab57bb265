//! Variable expansion for user actions
//!
//! Variables appear as `${NAME}` or `$(NAME)`. Lookup order: the
//! dependency/target pseudo-variables (`@`, `<`, `^`), `ROOT`, the
//! context's built-in tool map, then artifact references (`bin:name`,
//! `findlib:pkg:file`). Artifact references resolve to paths whose build
//! edges must exist, so the expander reports them back to the caller to be
//! staged as rule dependencies before the action runs. Unknown variables
//! are left untouched for the action to deal with.

use std::sync::LazyLock;

use ot_path::Path;
use regex::Regex;

use crate::error::RulesError;
use crate::super_context::{DepSet, SuperContext};

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^{}]+)\}|\$\(([^()]+)\)").expect("variable regex"));

pub(crate) struct Expander<'a> {
    pub sctx: &'a SuperContext,
    pub dir: &'a Path,
    pub targets: &'a [Path],
    pub deps: &'a DepSet,
}

impl Expander<'_> {
    /// Expand one string, returning it plus the artifact paths it pulled
    /// in (to be declared as dependencies).
    pub fn expand(&self, s: &str) -> Result<(String, Vec<Path>), RulesError> {
        let mut extra_deps: Vec<Path> = Vec::new();
        let mut failure: Option<RulesError> = None;
        let out = VAR_RE
            .replace_all(s, |caps: &regex::Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                match self.lookup(name, &mut extra_deps) {
                    Ok(Some(value)) => value,
                    Ok(None) => caps.get(0).unwrap().as_str().to_string(),
                    Err(err) => {
                        failure.get_or_insert(err);
                        String::new()
                    }
                }
            })
            .into_owned();
        match failure {
            Some(err) => Err(err),
            None => Ok((out, extra_deps)),
        }
    }

    fn lookup(&self, name: &str, extra: &mut Vec<Path>) -> Result<Option<String>, RulesError> {
        match name {
            "@" => Ok(Some(join_paths(self.targets))),
            "<" => {
                if !self.deps.first_is_plain && !self.deps.is_empty() {
                    return Err(RulesError::FirstDepNotAFile {
                        var: "${<}".to_string(),
                    });
                }
                Ok(Some(
                    self.deps
                        .files
                        .first()
                        .map(Path::to_path_string)
                        .unwrap_or_default(),
                ))
            }
            "^" => Ok(Some(join_paths(&self.deps.files))),
            "ROOT" => Ok(Some(Path::Root.reach(self.dir))),
            _ => {
                if let Some(bin) = name.strip_prefix("bin:") {
                    let path = self.sctx.artifacts.binary(bin).ok_or_else(|| {
                        RulesError::UnknownArtifact {
                            kind: "bin",
                            name: bin.to_string(),
                        }
                    })?;
                    extra.push(path.clone());
                    return Ok(Some(path.to_path_string()));
                }
                if let Some(rest) = name.strip_prefix("findlib:") {
                    let (pkg, file) =
                        rest.split_once(':')
                            .ok_or_else(|| RulesError::UnknownArtifact {
                                kind: "findlib",
                                name: rest.to_string(),
                            })?;
                    let pkg = self.sctx.lib_db.findlib().find(pkg).map_err(|_| {
                        RulesError::UnknownArtifact {
                            kind: "findlib",
                            name: rest.to_string(),
                        }
                    })?;
                    let path = Path::absolute(pkg.dir.join(file));
                    extra.push(path.clone());
                    return Ok(Some(path.to_path_string()));
                }
                Ok(self.sctx.context.expand_var(name))
            }
        }
    }
}

fn join_paths(paths: &[Path]) -> String {
    paths
        .iter()
        .map(Path::to_path_string)
        .collect::<Vec<_>>()
        .join(" ")
}
