//! Path model for the rule generator
//!
//! Rules reference three kinds of paths: files in the source tree, files in
//! a per-context build tree that mirrors the source tree under
//! `_build/<context>/`, and absolute paths outside the project (installed
//! packages, compilers). This crate provides the tagged `Path` type shared by
//! every rule emitter, with a total order so path sets can live in ordered
//! collections and rule output is reproducible.
//!
//! ## Key invariant
//!
//! The build tree mirrors the source tree: for a given context, every source
//! path has exactly one build counterpart (`Path::to_build`), and
//! `extract_build_context` recovers the `(context, subpath)` pair from any
//! build path.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

/// Name of the directory holding all build contexts, relative to the
/// project root.
pub const BUILD_DIR: &str = "_build";

/// Identity of a build context (e.g. `default`, `4.14.1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextName(String);

impl ContextName {
    pub fn new(name: impl Into<String>) -> Self {
        ContextName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the default build context.
    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextName {
    fn from(s: &str) -> Self {
        ContextName::new(s)
    }
}

/// A path as seen by the rule generator.
///
/// `Root` is the project root, which is also the root of the source tree.
/// `Source` and `Build` paths are stored relative (no leading `/`, no `..`),
/// `Absolute` paths are platform-absolute. The derived order (variant order,
/// then structural) is total and stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Path {
    Root,
    Source(Utf8PathBuf),
    Build {
        context: ContextName,
        rel: Utf8PathBuf,
    },
    Absolute(Utf8PathBuf),
}

impl Path {
    /// A path in the source tree, relative to the project root.
    pub fn source(rel: impl Into<Utf8PathBuf>) -> Path {
        let rel = rel.into();
        if rel.as_str().is_empty() || rel.as_str() == "." {
            Path::Root
        } else {
            Path::Source(rel)
        }
    }

    /// A path in the build tree of `context`.
    pub fn build(context: impl Into<ContextName>, rel: impl Into<Utf8PathBuf>) -> Path {
        Path::Build {
            context: context.into(),
            rel: rel.into(),
        }
    }

    pub fn absolute(abs: impl Into<Utf8PathBuf>) -> Path {
        Path::Absolute(abs.into())
    }

    /// Append a relative path.
    pub fn append(&self, suffix: impl AsRef<Utf8Path>) -> Path {
        let suffix = suffix.as_ref();
        match self {
            Path::Root => Path::source(suffix),
            Path::Source(p) => Path::Source(p.join(suffix)),
            Path::Build { context, rel } => Path::Build {
                context: context.clone(),
                rel: rel.join(suffix),
            },
            Path::Absolute(p) => Path::Absolute(p.join(suffix)),
        }
    }

    /// Append a single file name. Alias of [`Path::append`] kept for call
    /// sites that read better with it.
    pub fn relative(&self, name: &str) -> Path {
        self.append(name)
    }

    pub fn parent(&self) -> Path {
        match self {
            Path::Root => Path::Root,
            Path::Source(p) => match p.parent() {
                Some(parent) => Path::source(parent.to_owned()),
                None => Path::Root,
            },
            Path::Build { context, rel } => match rel.parent() {
                Some(parent) if !parent.as_str().is_empty() => Path::Build {
                    context: context.clone(),
                    rel: parent.to_owned(),
                },
                _ => {
                    if rel.as_str().is_empty() {
                        Path::Root
                    } else {
                        Path::Build {
                            context: context.clone(),
                            rel: Utf8PathBuf::new(),
                        }
                    }
                }
            },
            Path::Absolute(p) => match p.parent() {
                Some(parent) => Path::Absolute(parent.to_owned()),
                None => Path::Absolute(p.clone()),
            },
        }
    }

    pub fn basename(&self) -> &str {
        match self {
            Path::Root => ".",
            Path::Source(p) => p.file_name().unwrap_or("."),
            Path::Build { context, rel } => rel.file_name().unwrap_or_else(|| context.as_str()),
            Path::Absolute(p) => p.file_name().unwrap_or("/"),
        }
    }

    /// Last extension of the basename, with the leading dot
    /// (`foo.pp.ml` yields `.ml`).
    pub fn extension(&self) -> Option<String> {
        let name = self.basename();
        name.rfind('.')
            .filter(|&i| i > 0)
            .map(|i| name[i..].to_string())
    }

    /// For a build path, the `(context, subpath)` pair; `None` otherwise.
    pub fn extract_build_context(&self) -> Option<(&ContextName, &Utf8Path)> {
        match self {
            Path::Build { context, rel } => Some((context, rel.as_path())),
            _ => None,
        }
    }

    pub fn is_in_build_dir(&self) -> bool {
        matches!(self, Path::Build { .. })
    }

    /// The build counterpart of a source path (identity on build paths).
    pub fn to_build(&self, context: &ContextName) -> Path {
        match self {
            Path::Root => Path::Build {
                context: context.clone(),
                rel: Utf8PathBuf::new(),
            },
            Path::Source(p) => Path::Build {
                context: context.clone(),
                rel: p.clone(),
            },
            other => other.clone(),
        }
    }

    /// The source counterpart of a build path (identity on source paths).
    pub fn drop_build_context(&self) -> Path {
        match self {
            Path::Build { rel, .. } => Path::source(rel.clone()),
            other => other.clone(),
        }
    }

    /// Project the path to its platform string form, relative to the
    /// project root where applicable.
    pub fn to_path_string(&self) -> String {
        match self {
            Path::Root => ".".to_string(),
            Path::Source(p) => p.as_str().to_string(),
            Path::Build { context, rel } => {
                if rel.as_str().is_empty() {
                    format!("{BUILD_DIR}/{context}")
                } else {
                    format!("{BUILD_DIR}/{context}/{rel}")
                }
            }
            Path::Absolute(p) => p.as_str().to_string(),
        }
    }

    /// Shortest relative string form of `self` as seen from the directory
    /// `from`. Used for stable command lines and line-directive rewriting.
    /// Falls back to the projected form when the two paths do not share a
    /// relative frame (one of them is absolute).
    pub fn reach(&self, from: &Path) -> String {
        match (self, from) {
            (Path::Absolute(_), _) | (_, Path::Absolute(_)) => self.to_path_string(),
            _ => {
                let target = self.to_path_string();
                let base = from.to_path_string();
                relative_string(&target, &base)
            }
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path_string())
    }
}

fn relative_string(target: &str, base: &str) -> String {
    let tcomps: Vec<&str> = target.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
    let bcomps: Vec<&str> = base.split('/').filter(|c| !c.is_empty() && *c != ".").collect();

    let common = tcomps
        .iter()
        .zip(bcomps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..bcomps.len() {
        parts.push("..");
    }
    parts.extend(&tcomps[common..]);

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
