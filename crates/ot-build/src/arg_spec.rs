//! Structured command-line arguments
//!
//! Command arguments are described as a small tree rather than a flat string
//! list so that the realizer can tell which fragments are also dependencies
//! (`Dep`, `Deps`), which are outputs (`Target`), and which are computed
//! from the rule's dynamic input (`Dyn`). Rendering to strings happens at
//! evaluation time.

use std::fmt;
use std::sync::Arc;

use ot_path::Path;

use crate::build::DynVal;
use crate::error::BuildError;

type DynArgFn = Arc<dyn Fn(&DynVal) -> Result<ArgSpec, BuildError> + Send + Sync>;

#[derive(Clone)]
pub enum ArgSpec {
    /// A single literal argument.
    A(String),
    /// Several literal arguments.
    As(Vec<String>),
    /// Grouping; flattened on render.
    S(Vec<ArgSpec>),
    /// A path argument that is also an input of the rule.
    Dep(Path),
    Deps(Vec<Path>),
    /// A path argument that is an output of the rule.
    Target(Path),
    /// A path argument with no dependency registration.
    Path(Path),
    Paths(Vec<Path>),
    /// A fragment computed from the dynamic input. The resulting tree must
    /// be static: no targets, no nested `Dyn`.
    Dyn(DynArg),
}

#[derive(Clone)]
pub struct DynArg(pub(crate) DynArgFn);

impl ArgSpec {
    pub fn a(s: impl Into<String>) -> ArgSpec {
        ArgSpec::A(s.into())
    }

    /// A dynamic fragment computed from the typed dynamic input.
    pub fn dyn_of<T, F>(f: F) -> ArgSpec
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> ArgSpec + Send + Sync + 'static,
    {
        ArgSpec::Dyn(DynArg(Arc::new(move |v: &DynVal| {
            let t = v
                .downcast_ref::<T>()
                .ok_or(BuildError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            Ok(f(t))
        })))
    }
}

impl fmt::Debug for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSpec::A(s) => write!(f, "A({s:?})"),
            ArgSpec::As(s) => write!(f, "As({s:?})"),
            ArgSpec::S(s) => f.debug_tuple("S").field(s).finish(),
            ArgSpec::Dep(p) => write!(f, "Dep({p})"),
            ArgSpec::Deps(ps) => f.debug_tuple("Deps").field(ps).finish(),
            ArgSpec::Target(p) => write!(f, "Target({p})"),
            ArgSpec::Path(p) => write!(f, "Path({p})"),
            ArgSpec::Paths(ps) => f.debug_tuple("Paths").field(ps).finish(),
            ArgSpec::Dyn(_) => f.write_str("Dyn(..)"),
        }
    }
}

/// Render an argument tree against the dynamic input.
pub fn expand_args(args: &[ArgSpec], input: &DynVal) -> Result<Vec<String>, BuildError> {
    let mut out = Vec::new();
    for arg in args {
        expand_into(arg, input, &mut out, false)?;
    }
    Ok(out)
}

fn expand_into(
    arg: &ArgSpec,
    input: &DynVal,
    out: &mut Vec<String>,
    in_dyn: bool,
) -> Result<(), BuildError> {
    match arg {
        ArgSpec::A(s) => out.push(s.clone()),
        ArgSpec::As(ss) => out.extend(ss.iter().cloned()),
        ArgSpec::S(args) => {
            for a in args {
                expand_into(a, input, out, in_dyn)?;
            }
        }
        ArgSpec::Dep(p) | ArgSpec::Path(p) => out.push(p.to_path_string()),
        ArgSpec::Deps(ps) | ArgSpec::Paths(ps) => {
            out.extend(ps.iter().map(Path::to_path_string))
        }
        ArgSpec::Target(p) => {
            if in_dyn {
                return Err(BuildError::DynNotStatic);
            }
            out.push(p.to_path_string());
        }
        ArgSpec::Dyn(d) => {
            if in_dyn {
                return Err(BuildError::DynNotStatic);
            }
            let expanded = (d.0)(input)?;
            expand_into(&expanded, input, out, true)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn unit_input() -> DynVal {
        Arc::new(())
    }

    #[test]
    fn literal_args_render_in_order() {
        let args = vec![
            ArgSpec::a("-c"),
            ArgSpec::As(vec!["-g".into(), "-bin-annot".into()]),
            ArgSpec::S(vec![ArgSpec::a("-o"), ArgSpec::Target(Path::source("x.cmo"))]),
        ];
        let rendered = expand_args(&args, &unit_input()).unwrap();
        assert_eq!(rendered, vec!["-c", "-g", "-bin-annot", "-o", "x.cmo"]);
    }

    #[test]
    fn dyn_fragment_sees_typed_input() {
        let args = vec![ArgSpec::dyn_of::<Vec<String>, _>(|libs| {
            ArgSpec::As(libs.clone())
        })];
        let input: DynVal = Arc::new(vec!["a.cma".to_string(), "b.cma".to_string()]);
        let rendered = expand_args(&args, &input).unwrap();
        assert_eq!(rendered, vec!["a.cma", "b.cma"]);
    }

    #[test]
    fn dyn_fragment_may_not_declare_targets() {
        let args = vec![ArgSpec::dyn_of::<(), _>(|()| {
            ArgSpec::Target(Path::source("oops"))
        })];
        let err = expand_args(&args, &unit_input()).unwrap_err();
        assert!(matches!(err, BuildError::DynNotStatic));
    }

    #[test]
    fn dyn_fragment_type_mismatch_is_reported() {
        let args = vec![ArgSpec::dyn_of::<Vec<String>, _>(|v| ArgSpec::As(v.clone()))];
        let err = expand_args(&args, &unit_input()).unwrap_err();
        assert!(matches!(err, BuildError::TypeMismatch { .. }));
    }
}
