//! Rule realization
//!
//! A [`Rule`] is what the build executor consumes: the static input and
//! target sets of a build description, plus the retained description itself
//! for the second realization phase (action evaluation). The contract is
//! that every path an action reads is in `inputs` (or matched by `globs` /
//! `recursive_inputs`), and every path it writes is in `targets` or
//! `extra_targets`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ot_path::Path;
use regex::Regex;

use crate::action::Action;
use crate::arg_spec::ArgSpec;
use crate::build::{eval_node, Build, BuildValue, EvalEnv, Node};
use crate::error::BuildError;

/// How a set of library names was used by the directory that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibDepKind {
    Required,
    Optional,
}

/// Library usage recorded as a side channel of rule construction.
#[derive(Debug, Clone)]
pub struct LibDepRecord {
    pub dir: Path,
    pub kind: LibDepKind,
    pub deps: Vec<String>,
}

/// A glob dependency: basenames of `dir` matching `pattern`.
#[derive(Clone)]
pub struct GlobDep {
    pub dir: Path,
    pub pattern: Regex,
}

impl fmt::Debug for GlobDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobDep({}, {})", self.dir, self.pattern.as_str())
    }
}

/// A realized build edge.
pub struct Rule {
    pub inputs: BTreeSet<Path>,
    pub globs: Vec<GlobDep>,
    pub recursive_inputs: Vec<Path>,
    pub targets: BTreeSet<Path>,
    pub extra_targets: BTreeSet<Path>,
    pub lib_deps: Vec<LibDepRecord>,
    node: Node,
}

impl Rule {
    /// Realize a build description into a rule: walk the tree once to
    /// collect static dependencies and targets, keep the tree for action
    /// evaluation.
    pub fn new<O: BuildValue>(build: Build<(), O>) -> Rule {
        let node = build.node;
        let mut acc = Acc::default();
        collect(&node, &mut acc);
        Rule {
            inputs: acc.inputs,
            globs: acc.globs,
            recursive_inputs: acc.recursive_inputs,
            targets: acc.targets,
            extra_targets: acc.extra_targets,
            lib_deps: acc.lib_deps,
            node,
        }
    }

    /// All paths this rule writes.
    pub fn all_targets(&self) -> BTreeSet<Path> {
        self.targets.union(&self.extra_targets).cloned().collect()
    }

    /// Second realization phase: evaluate the retained description against
    /// an environment. Returns the terminal action when the description
    /// produces one (`store_vfile` rules write through the environment and
    /// produce none). Dynamic dependencies discovered by `dyn_paths` nodes
    /// are reported through [`EvalEnv::register_dynamic_input`] along the
    /// way; the executor must treat that set as rule inputs.
    pub fn eval_action(&self, env: &mut dyn EvalEnv) -> Result<Option<Action>, BuildError> {
        let out = eval_node(&self.node, Arc::new(()), env)?;
        Ok(out.downcast::<Action>().ok().map(|a| (*a).clone()))
    }

    /// True if the description embeds a deferred failure (the rule will
    /// error whenever evaluated).
    pub fn has_deferred_failure(&self) -> bool {
        has_fail(&self.node)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("inputs", &self.inputs)
            .field("globs", &self.globs)
            .field("targets", &self.targets)
            .field("extra_targets", &self.extra_targets)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Acc {
    inputs: BTreeSet<Path>,
    globs: Vec<GlobDep>,
    recursive_inputs: Vec<Path>,
    targets: BTreeSet<Path>,
    extra_targets: BTreeSet<Path>,
    lib_deps: Vec<LibDepRecord>,
}

fn collect(node: &Node, acc: &mut Acc) {
    match node {
        Node::Arr(_) | Node::Fail(_) | Node::BashCmd { .. } | Node::ActionConst(_) => {}
        Node::Paths(ps) => acc.inputs.extend(ps.iter().cloned()),
        Node::PathsGlob { dir, pattern } => acc.globs.push(GlobDep {
            dir: dir.clone(),
            pattern: pattern.clone(),
        }),
        Node::FilesRecursivelyIn { dir } => acc.recursive_inputs.push(dir.clone()),
        Node::Targets(ps) => acc.targets.extend(ps.iter().cloned()),
        Node::Contents { path } | Node::LinesOf { path } => {
            acc.inputs.insert(path.clone());
        }
        Node::Vpath(spec) => {
            acc.inputs.insert(spec.path.clone());
        }
        Node::StoreVfile(spec) => {
            acc.targets.insert(spec.path.clone());
        }
        // The static sources of the dynamic list (persisted-value files)
        // register here; the list itself is reported at evaluation time
        // through `EvalEnv::register_dynamic_input`.
        Node::DynPaths(inner) => collect(inner, acc),
        Node::RecordLibDeps(record) => acc.lib_deps.push(record.clone()),
        Node::Compose(a, b) => {
            collect(a, acc);
            collect(b, acc);
        }
        Node::Fanout { left, right, .. } => {
            collect(left, acc);
            collect(right, acc);
        }
        Node::Run {
            prog,
            args,
            stdout_to,
            extra_targets,
            ..
        } => {
            if !matches!(prog, Path::Absolute(_) | Path::Root) {
                acc.inputs.insert(prog.clone());
            }
            for arg in args {
                collect_args(arg, acc);
            }
            if let Some(out) = stdout_to {
                acc.targets.insert(out.clone());
            }
            acc.extra_targets.extend(extra_targets.iter().cloned());
        }
        Node::EchoTo { target } => {
            acc.targets.insert(target.clone());
        }
        Node::CopyFile { src, dst } => {
            acc.inputs.insert(src.clone());
            acc.targets.insert(dst.clone());
        }
        Node::CreateFile { path, .. } => {
            acc.targets.insert(path.clone());
        }
    }
}

fn collect_args(arg: &ArgSpec, acc: &mut Acc) {
    match arg {
        ArgSpec::A(_) | ArgSpec::As(_) | ArgSpec::Path(_) | ArgSpec::Paths(_) | ArgSpec::Dyn(_) => {
        }
        ArgSpec::S(args) => {
            for a in args {
                collect_args(a, acc);
            }
        }
        ArgSpec::Dep(p) => {
            acc.inputs.insert(p.clone());
        }
        ArgSpec::Deps(ps) => acc.inputs.extend(ps.iter().cloned()),
        ArgSpec::Target(p) => {
            acc.targets.insert(p.clone());
        }
    }
}

fn has_fail(node: &Node) -> bool {
    match node {
        Node::Fail(_) => true,
        Node::DynPaths(inner) => has_fail(inner),
        Node::Compose(a, b) => has_fail(a) || has_fail(b),
        Node::Fanout { left, right, .. } => has_fail(left) || has_fail(right),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{self, MemEnv};
    use crate::vfile::{name_list_codec, Vspec};

    #[test]
    fn run_rule_collects_deps_and_targets() {
        let src = Path::build("default", "src/foo.ml");
        let dst = Path::build("default", "src/foo.cmo");
        let cmi = Path::build("default", "src/foo.cmi");
        let compiler = Path::absolute("/usr/bin/ocamlc");
        let b = build::run_extra::<()>(
            compiler,
            vec![
                ArgSpec::a("-c"),
                ArgSpec::a("-o"),
                ArgSpec::Target(dst.clone()),
                ArgSpec::Dep(src.clone()),
            ],
            vec![cmi.clone()],
        );
        let rule = Rule::new(b);
        assert!(rule.inputs.contains(&src));
        assert!(rule.targets.contains(&dst));
        assert!(rule.extra_targets.contains(&cmi));
        // Absolute programs are not project inputs.
        assert_eq!(rule.inputs.len(), 1);
    }

    #[test]
    fn project_local_program_is_an_input() {
        let exe = Path::build("default", ".ppx/a+b/ppx.exe");
        let b = build::run::<()>(exe.clone(), vec![ArgSpec::a("--as-ppx")]);
        let rule = Rule::new(b);
        assert!(rule.inputs.contains(&exe));
    }

    #[test]
    fn store_vfile_is_a_target_and_vpath_an_input() {
        let spec = Vspec::new(Path::build("default", "lib.requires.sexp"), name_list_codec());
        let store_rule = Rule::new(build::pure(Vec::<String>::new()).then(build::store_vfile(&spec)));
        assert!(store_rule.targets.contains(&spec.path));

        let load_rule = Rule::new(build::vpath(&spec).map(|v: Vec<String>| v.len()));
        assert!(load_rule.inputs.contains(&spec.path));
    }

    #[test]
    fn dyn_paths_collects_source_statically_and_list_dynamically() {
        let dep_file = Path::build("default", "x.depends.impl.sexp");
        let spec = Vspec::new(dep_file.clone(), name_list_codec());
        let b = build::dyn_paths(
            build::vpath(&spec).map(|names: Vec<String>| {
                names
                    .iter()
                    .map(|n| Path::build("default", format!("{n}.cmi")))
                    .collect::<Vec<_>>()
            }),
        );
        let rule = Rule::new(b.then(build::create_file(
            Path::build("default", "out"),
            "",
        )));
        // The persisted map the list is computed from is a static input.
        assert!(rule.inputs.contains(&dep_file));
        assert!(rule.targets.contains(&Path::build("default", "out")));

        // The computed list itself only exists at evaluation time and
        // must come back through the environment.
        let mut env = MemEnv::new().with_file(dep_file, "(a b)\n");
        rule.eval_action(&mut env).unwrap();
        assert!(env
            .dynamic_inputs
            .contains(&Path::build("default", "a.cmi")));
        assert!(env
            .dynamic_inputs
            .contains(&Path::build("default", "b.cmi")));
    }

    #[test]
    fn eval_action_renders_command() {
        let src = Path::build("default", "a.ml");
        let b = build::run::<()>(
            Path::absolute("/usr/bin/ocamlc"),
            vec![ArgSpec::a("-c"), ArgSpec::Dep(src.clone())],
        );
        let rule = Rule::new(b);
        let mut env = MemEnv::new();
        let action = rule.eval_action(&mut env).unwrap().unwrap();
        match action {
            Action::Run { args, .. } => assert_eq!(args, vec!["-c", "_build/default/a.ml"]),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn deferred_failure_detected_and_raised() {
        let b = build::fail::<(), Vec<String>>(BuildError::deferred("library missing: foo"))
            .then(build::store_vfile(&Vspec::new(
                Path::build("default", "x.requires.sexp"),
                name_list_codec(),
            )));
        let rule = Rule::new(b);
        assert!(rule.has_deferred_failure());
        let mut env = MemEnv::new();
        let err = rule.eval_action(&mut env).unwrap_err();
        assert!(err.to_string().contains("library missing"));
    }
}
