//! The composable build value
//!
//! A `Build<I, O>` describes a computation from `I` to `O` whose
//! *construction* declares path dependencies and targets as a side channel.
//! It is a sum-type AST with a single realizer: [`Rule::new`](crate::Rule)
//! walks the tree to collect the static dependency and target sets, and the
//! executor later evaluates the same tree against an [`EvalEnv`] to obtain
//! the action. Dynamic parts (`vpath`, `dyn_paths`, file contents) resolve
//! in that second phase: `dyn_paths` reports its discovered list through
//! [`EvalEnv::register_dynamic_input`], and the executor declares those
//! paths as inputs before running the action.
//!
//! Values flow through the tree type-erased; the typed façade restores the
//! types at the edges, so a mis-typed composition fails at evaluation with a
//! `TypeMismatch` naming the expected type.

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use ot_path::Path;
use regex::Regex;

use crate::action::Action;
use crate::arg_spec::{expand_args, ArgSpec};
use crate::error::BuildError;
use crate::rule::{LibDepKind, LibDepRecord};
use crate::vfile::{Vspec, VspecDyn};

/// Type-erased value flowing through a build graph.
pub type DynVal = Arc<dyn Any + Send + Sync>;

/// Bound for values that may flow through a build graph.
pub trait BuildValue: Any + Clone + Send + Sync {}
impl<T: Any + Clone + Send + Sync> BuildValue for T {}

pub(crate) type ArrFn = Arc<dyn Fn(DynVal) -> Result<DynVal, BuildError> + Send + Sync>;
type PairFn = Arc<dyn Fn(DynVal, DynVal) -> Result<DynVal, BuildError> + Send + Sync>;

pub(crate) fn downcast<T: BuildValue>(v: DynVal) -> Result<T, BuildError> {
    match v.downcast::<T>() {
        Ok(t) => Ok((*t).clone()),
        Err(_) => Err(BuildError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }),
    }
}

#[derive(Clone)]
pub(crate) enum Node {
    Arr(ArrFn),
    Paths(Vec<Path>),
    PathsGlob { dir: Path, pattern: Regex },
    FilesRecursivelyIn { dir: Path },
    Targets(Vec<Path>),
    Contents { path: Path },
    LinesOf { path: Path },
    Vpath(VspecDyn),
    StoreVfile(VspecDyn),
    DynPaths(Box<Node>),
    RecordLibDeps(LibDepRecord),
    Fail(BuildError),
    Compose(Box<Node>, Box<Node>),
    Fanout {
        left: Box<Node>,
        right: Box<Node>,
        pair: PairFn,
    },
    Run {
        prog: Path,
        args: Vec<ArgSpec>,
        dir: Option<Path>,
        stdout_to: Option<Path>,
        extra_targets: Vec<Path>,
    },
    BashCmd { script: String },
    EchoTo { target: Path },
    CopyFile { src: Path, dst: Path },
    CreateFile { path: Path, contents: String },
    ActionConst(Action),
}

/// A composable build description from `I` to `O`. See the module docs.
pub struct Build<I, O> {
    pub(crate) node: Node,
    _pd: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Build<I, O> {
    fn clone(&self) -> Self {
        Build {
            node: self.node.clone(),
            _pd: PhantomData,
        }
    }
}

fn from_node<I, O>(node: Node) -> Build<I, O> {
    Build {
        node,
        _pd: PhantomData,
    }
}

fn lift<I, O>(
    f: impl Fn(I) -> Result<O, BuildError> + Send + Sync + 'static,
) -> ArrFn
where
    I: BuildValue,
    O: BuildValue,
{
    Arc::new(move |v: DynVal| {
        let input = downcast::<I>(v)?;
        f(input).map(|o| Arc::new(o) as DynVal)
    })
}

/// Constant output, no dependencies.
pub fn pure<O: BuildValue>(o: O) -> Build<(), O> {
    arr(move |()| o.clone())
}

/// Pure function lifted into the graph.
pub fn arr<I: BuildValue, O: BuildValue>(
    f: impl Fn(I) -> O + Send + Sync + 'static,
) -> Build<I, O> {
    from_node(Node::Arr(lift(move |i| Ok(f(i)))))
}

/// Fallible pure function; the error surfaces at evaluation time.
pub fn arr_result<I: BuildValue, O: BuildValue>(
    f: impl Fn(I) -> Result<O, BuildError> + Send + Sync + 'static,
) -> Build<I, O> {
    from_node(Node::Arr(lift(f)))
}

/// Declare a single static input dependency.
pub fn path<I: BuildValue>(p: Path) -> Build<I, I> {
    paths(vec![p])
}

/// Declare static input dependencies.
pub fn paths<I: BuildValue>(ps: Vec<Path>) -> Build<I, I> {
    from_node(Node::Paths(ps))
}

pub fn path_set<I: BuildValue>(ps: BTreeSet<Path>) -> Build<I, I> {
    paths(ps.into_iter().collect())
}

/// Declare a glob dependency: the executor enumerates matching basenames of
/// `dir` before the action runs.
pub fn paths_glob<I: BuildValue>(dir: Path, pattern: Regex) -> Build<I, I> {
    from_node(Node::PathsGlob { dir, pattern })
}

/// Depend on every file under `dir`, transitively.
pub fn files_recursively_in<I: BuildValue>(dir: Path) -> Build<I, I> {
    from_node(Node::FilesRecursivelyIn { dir })
}

/// Declare targets not implied by the terminal action (bash rules,
/// constant-action rules).
pub fn targets<I: BuildValue>(ps: Vec<Path>) -> Build<I, I> {
    from_node(Node::Targets(ps))
}

/// The contents of a file, as a dependency-registering dynamic value.
pub fn contents(p: Path) -> Build<(), String> {
    from_node(Node::Contents { path: p })
}

/// The lines of a file.
pub fn lines_of(p: Path) -> Build<(), Vec<String>> {
    from_node(Node::LinesOf { path: p })
}

/// Load a persisted typed value; depends on its file.
pub fn vpath<T: BuildValue>(spec: &Vspec<T>) -> Build<(), T> {
    from_node(Node::Vpath(spec.erase()))
}

/// Persist the input value under the spec's path (which becomes a target).
pub fn store_vfile<T: BuildValue>(spec: &Vspec<T>) -> Build<T, ()> {
    from_node(Node::StoreVfile(spec.erase()))
}

/// After `inner` produces a path list, declare each element as a dependency
/// (dynamic dependencies). The input passes through unchanged. The list
/// only exists at evaluation time; it is handed to the executor through
/// [`EvalEnv::register_dynamic_input`] so the discovered paths can be
/// brought up to date before the action runs.
pub fn dyn_paths<I: BuildValue>(inner: Build<I, Vec<Path>>) -> Build<I, I> {
    from_node(Node::DynPaths(Box::new(inner.node)))
}

/// Record library usage for the directory; consumed by the install-manifest
/// and editor-integration emitters, not by the action itself.
pub fn record_lib_deps<I: BuildValue>(
    dir: Path,
    kind: LibDepKind,
    deps: Vec<String>,
) -> Build<I, I> {
    from_node(Node::RecordLibDeps(LibDepRecord { dir, kind, deps }))
}

/// A deferred failure: realization succeeds, evaluation fails.
pub fn fail<I: BuildValue, O: BuildValue>(err: BuildError) -> Build<I, O> {
    from_node(Node::Fail(err))
}

/// Run a program. The program registers as an input unless it lives outside
/// the project.
pub fn run<I: BuildValue>(prog: Path, args: Vec<ArgSpec>) -> Build<I, Action> {
    from_node(Node::Run {
        prog,
        args,
        dir: None,
        stdout_to: None,
        extra_targets: Vec::new(),
    })
}

/// Run a program that writes additional targets beyond those named by
/// `Target` arguments.
pub fn run_extra<I: BuildValue>(
    prog: Path,
    args: Vec<ArgSpec>,
    extra_targets: Vec<Path>,
) -> Build<I, Action> {
    from_node(Node::Run {
        prog,
        args,
        dir: None,
        stdout_to: None,
        extra_targets,
    })
}

/// Run a program capturing its standard output into a target file.
pub fn run_capture<I: BuildValue>(
    prog: Path,
    args: Vec<ArgSpec>,
    stdout_to: Path,
) -> Build<I, Action> {
    from_node(Node::Run {
        prog,
        args,
        dir: None,
        stdout_to: Some(stdout_to),
        extra_targets: Vec::new(),
    })
}

/// Run a program from a specific working directory (for tools that write
/// outputs next to their inputs).
pub fn run_in<I: BuildValue>(
    prog: Path,
    args: Vec<ArgSpec>,
    dir: Path,
    extra_targets: Vec<Path>,
) -> Build<I, Action> {
    from_node(Node::Run {
        prog,
        args,
        dir: Some(dir),
        stdout_to: None,
        extra_targets,
    })
}

pub fn bash<I: BuildValue>(script: impl Into<String>) -> Build<I, Action> {
    from_node(Node::BashCmd {
        script: script.into(),
    })
}

/// A constant action. Dependencies and targets must be declared separately
/// with [`paths`] and [`targets`]; the action is not introspected.
pub fn action<I: BuildValue>(a: Action) -> Build<I, Action> {
    from_node(Node::ActionConst(a))
}

/// Write the dynamic input string to `target`.
pub fn echo(target: Path) -> Build<String, Action> {
    from_node(Node::EchoTo { target })
}

pub fn copy<I: BuildValue>(src: Path, dst: Path) -> Build<I, Action> {
    from_node(Node::CopyFile { src, dst })
}

pub fn create_file<I: BuildValue>(path: Path, contents: impl Into<String>) -> Build<I, Action> {
    from_node(Node::CreateFile {
        path,
        contents: contents.into(),
    })
}

/// Write several files in one rule.
pub fn create_files<I: BuildValue>(files: Vec<(Path, String)>) -> Build<I, Action> {
    let target_paths: Vec<Path> = files.iter().map(|(p, _)| p.clone()).collect();
    let writes = files
        .into_iter()
        .map(|(path, contents)| Action::WriteFile { path, contents })
        .collect();
    targets::<I>(target_paths).then(action(Action::Progn(writes)))
}

/// Combine many independent builds into one producing all their outputs.
pub fn all<T: BuildValue>(builds: Vec<Build<(), T>>) -> Build<(), Vec<T>> {
    let mut acc: Build<(), Vec<T>> = pure(Vec::new());
    for b in builds {
        acc = acc.fanout(b).map(|(mut v, t)| {
            v.push(t);
            v
        });
    }
    acc
}

/// Translate a user-facing glob (`*`, `?`) into an anchored basename regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, BuildError> {
    let mut re = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                re.push('\\');
                re.push(ch);
            }
            c => re.push(c),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| BuildError::InvalidGlob {
        glob: glob.to_string(),
        reason: e.to_string(),
    })
}

impl<I: BuildValue, O: BuildValue> Build<I, O> {
    /// Sequence `self` then `next`; dependency sets union.
    pub fn then<P: BuildValue>(self, next: Build<O, P>) -> Build<I, P> {
        from_node(Node::Compose(Box::new(self.node), Box::new(next.node)))
    }

    /// Pure post-transform.
    pub fn map<P: BuildValue>(self, f: impl Fn(O) -> P + Send + Sync + 'static) -> Build<I, P> {
        self.then(arr(f))
    }

    pub fn map_result<P: BuildValue>(
        self,
        f: impl Fn(O) -> Result<P, BuildError> + Send + Sync + 'static,
    ) -> Build<I, P> {
        self.then(arr_result(f))
    }

    /// Parallel composition sharing the input.
    pub fn fanout<P: BuildValue>(self, other: Build<I, P>) -> Build<I, (O, P)> {
        let pair: PairFn = Arc::new(|a: DynVal, b: DynVal| {
            let a = downcast::<O>(a)?;
            let b = downcast::<P>(b)?;
            Ok(Arc::new((a, b)) as DynVal)
        });
        from_node(Node::Fanout {
            left: Box::new(self.node),
            right: Box::new(other.node),
            pair,
        })
    }

    /// Evaluate the computation against an environment. This is the
    /// executor's half of the two-phase realization; tests use it with
    /// [`MemEnv`].
    pub fn eval(&self, input: I, env: &mut dyn EvalEnv) -> Result<O, BuildError> {
        let out = eval_node(&self.node, Arc::new(input) as DynVal, env)?;
        downcast::<O>(out)
    }
}

/// Environment supplied by the executor during evaluation.
///
/// `register_dynamic_input` is the second half of the two-phase
/// realization contract: when a `dyn_paths` node resolves its list, every
/// element is reported here, and the executor must treat the reported set
/// as inputs of the rule (bring them up to date, include them in the
/// rule's hash) before acting on the evaluated action.
pub trait EvalEnv {
    fn read_file(&mut self, path: &Path) -> Result<String, BuildError>;
    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), BuildError>;
    fn register_dynamic_input(&mut self, path: &Path);
}

/// In-memory environment for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemEnv {
    pub files: BTreeMap<Path, String>,
    /// Paths reported by `dyn_paths` nodes during evaluation.
    pub dynamic_inputs: BTreeSet<Path>,
}

impl MemEnv {
    pub fn new() -> MemEnv {
        MemEnv::default()
    }

    pub fn with_file(mut self, path: Path, contents: impl Into<String>) -> MemEnv {
        self.files.insert(path, contents.into());
        self
    }
}

impl EvalEnv for MemEnv {
    fn read_file(&mut self, path: &Path) -> Result<String, BuildError> {
        self.files.get(path).cloned().ok_or_else(|| BuildError::Io {
            path: path.clone(),
            reason: "no such file".to_string(),
        })
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<(), BuildError> {
        self.files.insert(path.clone(), contents.to_string());
        Ok(())
    }

    fn register_dynamic_input(&mut self, path: &Path) {
        self.dynamic_inputs.insert(path.clone());
    }
}

pub(crate) fn eval_node(
    node: &Node,
    input: DynVal,
    env: &mut dyn EvalEnv,
) -> Result<DynVal, BuildError> {
    match node {
        Node::Arr(f) => f(input),
        Node::Paths(_)
        | Node::PathsGlob { .. }
        | Node::FilesRecursivelyIn { .. }
        | Node::Targets(_)
        | Node::RecordLibDeps(_) => Ok(input),
        Node::Contents { path } => {
            let s = env.read_file(path)?;
            Ok(Arc::new(s) as DynVal)
        }
        Node::LinesOf { path } => {
            let s = env.read_file(path)?;
            let lines: Vec<String> = s.lines().map(str::to_string).collect();
            Ok(Arc::new(lines) as DynVal)
        }
        Node::Vpath(spec) => {
            let s = env.read_file(&spec.path)?;
            (spec.decode)(&s)
        }
        Node::StoreVfile(spec) => {
            let s = (spec.encode)(&input)?;
            env.write_file(&spec.path, &s)?;
            Ok(Arc::new(()) as DynVal)
        }
        Node::DynPaths(inner) => {
            let discovered = eval_node(inner, input.clone(), env)?;
            let discovered = downcast::<Vec<Path>>(discovered)?;
            for path in &discovered {
                env.register_dynamic_input(path);
            }
            Ok(input)
        }
        Node::Fail(err) => Err(err.clone()),
        Node::Compose(a, b) => {
            let mid = eval_node(a, input, env)?;
            eval_node(b, mid, env)
        }
        Node::Fanout { left, right, pair } => {
            let a = eval_node(left, input.clone(), env)?;
            let b = eval_node(right, input, env)?;
            pair(a, b)
        }
        Node::Run {
            prog,
            args,
            dir,
            stdout_to,
            ..
        } => {
            let rendered = expand_args(args, &input)?;
            Ok(Arc::new(Action::Run {
                prog: prog.clone(),
                args: rendered,
                dir: dir.clone(),
                stdout_to: stdout_to.clone(),
            }) as DynVal)
        }
        Node::BashCmd { script } => Ok(Arc::new(Action::Bash {
            script: script.clone(),
        }) as DynVal),
        Node::EchoTo { target } => {
            let contents = downcast::<String>(input)?;
            Ok(Arc::new(Action::WriteFile {
                path: target.clone(),
                contents,
            }) as DynVal)
        }
        Node::CopyFile { src, dst } => Ok(Arc::new(Action::Copy {
            src: src.clone(),
            dst: dst.clone(),
        }) as DynVal),
        Node::CreateFile { path, contents } => Ok(Arc::new(Action::WriteFile {
            path: path.clone(),
            contents: contents.clone(),
        }) as DynVal),
        Node::ActionConst(a) => Ok(Arc::new(a.clone()) as DynVal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfile::name_list_codec;

    #[test]
    fn pure_and_map() {
        let b = pure(2u32).map(|n| n * 21);
        let mut env = MemEnv::new();
        assert_eq!(b.eval((), &mut env).unwrap(), 42);
    }

    #[test]
    fn compose_chains_values() {
        let b = pure("foo".to_string())
            .then(arr(|s: String| s.len()))
            .map(|n| n + 1);
        let mut env = MemEnv::new();
        assert_eq!(b.eval((), &mut env).unwrap(), 4);
    }

    #[test]
    fn fanout_shares_input() {
        let left = arr(|n: u32| n + 1);
        let right = arr(|n: u32| n * 2);
        let b = left.fanout(right);
        let mut env = MemEnv::new();
        assert_eq!(b.eval(10, &mut env).unwrap(), (11, 20));
    }

    #[test]
    fn vpath_round_trips_through_env() {
        let spec = Vspec::new(Path::build("default", "a.requires.sexp"), name_list_codec());
        let store = store_vfile(&spec);
        let load = vpath(&spec);
        let mut env = MemEnv::new();
        store
            .eval(vec!["x".to_string(), "y".to_string()], &mut env)
            .unwrap();
        assert_eq!(load.eval((), &mut env).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn fail_is_deferred_to_eval() {
        let b: Build<(), Vec<String>> = fail(BuildError::deferred("library missing: nope"));
        let mut env = MemEnv::new();
        let err = b.eval((), &mut env).unwrap_err();
        assert!(matches!(err, BuildError::Deferred { .. }));
    }

    #[test]
    fn lines_of_reads_lines() {
        let p = Path::build("default", "flags");
        let b = lines_of(p.clone());
        let mut env = MemEnv::new().with_file(p, "-g\n-O2\n");
        assert_eq!(b.eval((), &mut env).unwrap(), vec!["-g", "-O2"]);
    }

    #[test]
    fn dyn_paths_reports_discovered_inputs() {
        let spec = Vspec::new(
            Path::build("default", "x.depends.impl.sexp"),
            name_list_codec(),
        );
        let b = dyn_paths(vpath(&spec).map(|names: Vec<String>| {
            names
                .iter()
                .map(|n| Path::build("default", format!("{n}.cmi")))
                .collect::<Vec<_>>()
        }));
        let mut env = MemEnv::new().with_file(spec.path.clone(), "(foo bar)\n");
        b.eval((), &mut env).unwrap();
        assert!(env
            .dynamic_inputs
            .contains(&Path::build("default", "foo.cmi")));
        assert!(env
            .dynamic_inputs
            .contains(&Path::build("default", "bar.cmi")));
    }

    #[test]
    fn all_collects_in_order() {
        let b = all(vec![pure(1u8), pure(2u8), pure(3u8)]);
        let mut env = MemEnv::new();
        assert_eq!(b.eval((), &mut env).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn type_mismatch_names_expected_type() {
        // Compose two builds whose types only line up through erasure abuse.
        let bad = from_node::<(), u32>(Node::Arr(lift(|s: String| Ok(s.len() as u32))));
        let mut env = MemEnv::new();
        let err = bad.eval((), &mut env).unwrap_err();
        match err {
            BuildError::TypeMismatch { expected } => {
                assert!(expected.contains("String"), "got {expected}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn glob_translation() {
        let re = glob_to_regex("*.h").unwrap();
        assert!(re.is_match("foo.h"));
        assert!(!re.is_match("foo.hh"));
        assert!(!re.is_match("sub/foo.h"));
        let re = glob_to_regex("README*").unwrap();
        assert!(re.is_match("README"));
        assert!(re.is_match("README.md"));
    }
}
