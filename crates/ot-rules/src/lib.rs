//! Rule-generation core
//!
//! Translates per-directory declarative build descriptions (stanzas) into
//! a rule graph for a separate-compilation language: module discovery,
//! dependency scanning, preprocessor pipelines, compilation, archiving,
//! linking, stubs, generators, install manifests. The graph itself is the
//! `ot-build` crate; external package lookup is `ot-findlib`.
//!
//! Entry point: [`gen_rules`].

pub mod compile;
pub mod context;
pub mod dep_scan;
pub mod error;
mod expand;
mod generators;
pub mod install;
pub mod lib_db;
pub mod link;
mod merlin;
mod meta;
pub mod modules;
pub mod ordered_set;
pub mod preprocess;
pub mod stanza;
mod stubs;
pub mod super_context;

pub use compile::{alias_module_body, lib_cm_all};
pub use context::Context;
pub use error::RulesError;
pub use install::InstallEntry;
pub use lib_db::{
    best_names, dedup_libs, requires_spec, runtime_deps_spec, LibDb, LibDep, ResolvedLib,
    ResolvedSelect, Select, SelectChoice,
};
pub use link::link_closure;
pub use modules::{guess_modules, parse_modules, Module, ModuleMap};
pub use ordered_set::OrderedSet;
pub use stanza::{
    capitalize, CmKind, DepConf, Executables, InstallStanza, LibKind, Library, MlKind, Mode,
    ModeDict, OcamllexStanza, OcamlyaccStanza, Preprocess, PreprocessMap, Provides, Section,
    Stanza, UserAction, UserRule,
};
pub use super_context::{gen_rules, Artifacts, PackageDef, SrcDir, SuperContext};
