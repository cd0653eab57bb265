//! Build-graph primitive for the rule generator
//!
//! This crate provides the composable value out of which every rule is
//! built: a `Build<I, O>` arrow whose construction declares path
//! dependencies and targets, realized once into a [`Rule`] (static phase)
//! and evaluated later by the executor against an [`EvalEnv`] (dynamic
//! phase).
//!
//! ## Layering
//!
//! - [`build`] — the combinator AST and its evaluator
//! - [`arg_spec`] — structured command arguments
//! - [`action`] — fully rendered actions
//! - [`rule`] — the realizer
//! - [`vfile`] — persisted typed values and their codecs

pub mod action;
pub mod arg_spec;
pub mod build;
pub mod error;
pub mod rule;
pub mod vfile;

pub use action::Action;
pub use arg_spec::{expand_args, ArgSpec};
pub use build::{
    action as const_action, all, arr, arr_result, bash, contents, copy, create_file, create_files,
    dyn_paths, echo, fail, files_recursively_in, glob_to_regex, lines_of, path, path_set, paths,
    paths_glob, pure, record_lib_deps, run, run_capture, run_extra, run_in, store_vfile, targets,
    vpath, Build, BuildValue, DynVal, EvalEnv, MemEnv,
};
pub use error::BuildError;
pub use rule::{GlobDep, LibDepKind, LibDepRecord, Rule};
pub use vfile::{name_list_codec, name_map_codec, Codec, NameMap, Vspec};
