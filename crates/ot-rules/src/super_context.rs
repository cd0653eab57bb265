//! Generation-scoped orchestrator
//!
//! `SuperContext` carries everything rule generation needs — the context
//! configuration, the library database, the artifact resolver, the
//! preprocessor-driver memo and the append-only rule accumulator — as
//! explicit state rather than globals. [`gen_rules`] is the entry point:
//! it registers libraries and artifacts in a first pass, then walks every
//! directory's stanzas dispatching to the emitters, and finishes with the
//! editor-integration and install-manifest rules.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use ot_build::{
    copy, create_file, files_recursively_in, glob_to_regex, paths, paths_glob, store_vfile,
    vpath, Build, BuildValue, LibDepKind, Rule,
};
use ot_findlib::{Findlib, Mode};
use ot_path::Path;
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::compile::{alias_module_body, CompileParams, OcamlFlags};
use crate::context::Context;
use crate::error::RulesError;
use crate::lib_db::{best_names, requires_spec, runtime_deps_spec, LibDb, LibDep, ResolvedLib};
use crate::modules::{guess_modules, parse_modules, Module, ModuleMap};
use crate::preprocess::PpxDriver;
use crate::stanza::{DepConf, Executables, Library, Stanza};

/// A package declared at the project level.
#[derive(Debug, Clone)]
pub struct PackageDef {
    pub name: String,
    /// Source-relative directory the package is rooted at.
    pub path: Utf8PathBuf,
    pub version: Option<String>,
}

impl PackageDef {
    pub fn new(name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> PackageDef {
        PackageDef {
            name: name.into(),
            path: path.into(),
            version: None,
        }
    }
}

/// One source directory: its file names and its parsed stanzas. Traversal
/// and parsing are external; the generator receives the finished records.
#[derive(Debug, Clone)]
pub struct SrcDir {
    pub path: Utf8PathBuf,
    pub files: BTreeSet<String>,
    pub stanzas: Vec<Stanza>,
}

impl SrcDir {
    pub fn new(path: impl Into<Utf8PathBuf>) -> SrcDir {
        SrcDir {
            path: path.into(),
            files: BTreeSet::new(),
            stanzas: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: &[&str]) -> SrcDir {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_stanza(mut self, stanza: Stanza) -> SrcDir {
        self.stanzas.push(stanza);
        self
    }
}

/// Resolver for `bin:`-style artifact references.
pub struct Artifacts {
    bins: HashMap<String, Path>,
    provides: HashMap<String, Path>,
}

impl Artifacts {
    pub fn binary(&self, name: &str) -> Option<Path> {
        self.bins
            .get(name)
            .or_else(|| self.provides.get(name))
            .cloned()
    }
}

/// Interpreted dependency configurations of a user rule or preprocessor.
pub(crate) struct DepSet {
    pub files: Vec<Path>,
    pub globs: Vec<(Path, Regex)>,
    pub recursive: Vec<Path>,
    pub first_is_plain: bool,
}

impl DepSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.globs.is_empty() && self.recursive.is_empty()
    }

    /// The dependency-declaration prefix of the rule being built.
    pub fn build(&self) -> Build<(), ()> {
        let mut b: Build<(), ()> = paths(self.files.clone());
        for (dir, pattern) in &self.globs {
            b = b.then(paths_glob(dir.clone(), pattern.clone()));
        }
        for dir in &self.recursive {
            b = b.then(files_recursively_in(dir.clone()));
        }
        b
    }
}

/// Modules of a generated library, kept for the install emitter.
pub(crate) struct LibModules {
    pub modules: ModuleMap,
    pub alias: Option<Module>,
}

pub struct SuperContext {
    pub(crate) context: Arc<Context>,
    pub(crate) lib_db: LibDb,
    pub(crate) artifacts: Artifacts,
    pub(crate) packages: IndexMap<String, PackageDef>,
    dirs: Vec<SrcDir>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) ppx_drivers: HashMap<String, PpxDriver>,
    pub(crate) lib_modules: HashMap<String, LibModules>,
}

/// Generate the full rule graph for a project.
pub fn gen_rules(
    context: Arc<Context>,
    findlib: Findlib,
    packages: Vec<PackageDef>,
    dirs: Vec<SrcDir>,
) -> Result<Vec<Rule>, RulesError> {
    SuperContext::new(context, findlib, packages, dirs).gen()
}

impl SuperContext {
    /// First pass: register libraries with the database and executables
    /// and `Provides` stanzas with the artifact resolver.
    pub fn new(
        context: Arc<Context>,
        findlib: Findlib,
        packages: Vec<PackageDef>,
        dirs: Vec<SrcDir>,
    ) -> SuperContext {
        let mut libs: Vec<(Path, Library)> = Vec::new();
        let mut bins = HashMap::new();
        let mut provides = HashMap::new();
        for sd in &dirs {
            let dir = Path::build(context.name.clone(), sd.path.clone());
            for stanza in &sd.stanzas {
                match stanza {
                    Stanza::Library(lib) => libs.push((dir.clone(), lib.clone())),
                    Stanza::Executables(exes) => {
                        let native =
                            context.ocamlopt.is_some() && exes.modes.contains(&Mode::Native);
                        let ext = if native { ".exe" } else { ".bc" };
                        for name in &exes.names {
                            bins.insert(name.clone(), dir.relative(&format!("{name}{ext}")));
                        }
                    }
                    Stanza::Provides(p) => {
                        provides.insert(p.name.clone(), dir.relative(&p.file));
                    }
                    _ => {}
                }
            }
        }
        let lib_db = LibDb::new(findlib, libs);
        SuperContext {
            context,
            lib_db,
            artifacts: Artifacts { bins, provides },
            packages: packages.into_iter().map(|p| (p.name.clone(), p)).collect(),
            dirs,
            rules: Vec::new(),
            ppx_drivers: HashMap::new(),
            lib_modules: HashMap::new(),
        }
    }

    /// Second pass: dispatch stanzas to the emitters, then the
    /// per-directory and per-package finishers.
    #[instrument(skip_all, fields(context = %self.context.name))]
    pub fn gen(mut self) -> Result<Vec<Rule>, RulesError> {
        info!(
            dirs = self.dirs.len(),
            libs = self.lib_db.internal_libs().len(),
            "generating rules"
        );
        let dirs = self.dirs.clone();
        for sd in &dirs {
            let needs_modules = sd
                .stanzas
                .iter()
                .any(|s| matches!(s, Stanza::Library(_) | Stanza::Executables(_)));
            let discovered = if needs_modules {
                guess_modules(sd.path.as_str(), &sd.files)?
            } else {
                ModuleMap::new()
            };
            let dir = self.context.build_path(sd.path.clone());
            for stanza in &sd.stanzas {
                match stanza {
                    Stanza::Library(lib) => self.library_rules(sd, &discovered, lib)?,
                    Stanza::Executables(exes) => {
                        self.executables_stanza_rules(sd, &discovered, exes)?
                    }
                    Stanza::Rule(rule) => self.user_rule_rules(&dir, rule)?,
                    Stanza::Ocamllex(lex) => self.ocamllex_rules(&dir, lex),
                    Stanza::Ocamlyacc(yacc) => self.ocamlyacc_rules(&dir, yacc),
                    Stanza::Install(_) | Stanza::Provides(_) => {}
                }
            }
        }
        for sd in &dirs {
            self.merlin_rules(sd);
        }
        self.install_rules(&dirs)?;
        self.check_target_uniqueness()?;
        Ok(self.rules)
    }

    pub(crate) fn add_rule<O: BuildValue>(&mut self, build: Build<(), O>) {
        self.rules.push(Rule::new(build));
    }

    pub fn internal_libs_without_non_installable_optional_ones(
        &self,
    ) -> Vec<(Path, Arc<Library>)> {
        self.lib_db.internal_libs_without_non_installable_optional_ones()
    }

    fn library_rules(
        &mut self,
        sd: &SrcDir,
        discovered: &ModuleMap,
        lib: &Library,
    ) -> Result<(), RulesError> {
        let dir = self.context.build_path(sd.path.clone());
        debug!(dir = %dir, lib = %lib.name, "library rules");
        let mut modules = parse_modules(sd.path.as_str(), &lib.modules, discovered)?;

        // Object-name assignment: wrapped libraries prefix every module
        // except the main one.
        let main = lib.main_module_name();
        if lib.wrapped {
            for (name, m) in modules.iter_mut() {
                if *name != main {
                    m.obj_name = format!("{}__{}", lib.name, name);
                }
            }
        }

        let alias = if lib.wrapped && !(modules.len() == 1 && modules.contains_key(&main)) {
            Some(Module {
                name: format!("{main}__"),
                impl_file: format!("{}__.ml-gen", lib.name),
                intf_file: None,
                obj_name: format!("{}__", lib.name),
            })
        } else {
            None
        };
        if let Some(alias_module) = &alias {
            self.add_rule(create_file::<()>(
                dir.relative(&alias_module.impl_file),
                alias_module_body(&modules),
            ));
        }

        let modules = self.pped_modules(
            &dir,
            Some(&lib.name),
            &lib.preprocess,
            &lib.preprocessor_deps,
            modules,
        )?;
        let dep_specs = self.ocamldep_rules(&dir, &lib.name, &modules, alias.as_ref());
        let requires = self.requires_rules(&dir, &lib.name, &lib.libraries, lib.optional);
        self.runtime_deps_rules(
            &dir,
            &lib.name,
            &lib.libraries,
            &lib.ppx_runtime_libraries,
            lib.optional,
        );

        for select in self.lib_db.resolve_selects(&lib.libraries) {
            self.add_rule(copy::<()>(
                dir.relative(&select.src_file),
                dir.relative(&select.dst_file),
            ));
        }

        let flags = OcamlFlags::new(
            &self.context.clone(),
            &dir,
            &lib.flags,
            &lib.ocamlc_flags,
            &lib.ocamlopt_flags,
        );
        {
            let params = CompileParams {
                dir: &dir,
                modules: &modules,
                alias_module: alias.as_ref(),
                dep_specs: &dep_specs,
                requires: &requires,
                flags: &flags,
            };
            let members: Vec<Module> = modules.values().cloned().collect();
            for m in &members {
                self.module_compile_rules(&params, m);
            }
            if let Some(alias_module) = &alias {
                self.module_compile_rules(&params, alias_module);
            }
        }

        self.cm_all_rules(&dir, &lib.name, &modules, alias.as_ref());
        if lib.has_stubs() {
            self.stub_rules(&dir, lib, &requires);
        }
        self.archive_rules(&dir, lib, &modules, alias.as_ref(), &dep_specs);

        self.lib_modules
            .insert(lib.name.clone(), LibModules { modules, alias });
        Ok(())
    }

    fn executables_stanza_rules(
        &mut self,
        sd: &SrcDir,
        discovered: &ModuleMap,
        exes: &Executables,
    ) -> Result<(), RulesError> {
        let Some(item) = exes.names.first().cloned() else {
            return Ok(());
        };
        let dir = self.context.build_path(sd.path.clone());
        debug!(dir = %dir, exe = %item, "executable rules");
        let modules = parse_modules(sd.path.as_str(), &exes.modules, discovered)?;
        let modules = self.pped_modules(&dir, None, &exes.preprocess, &[], modules)?;
        let dep_specs = self.ocamldep_rules(&dir, &item, &modules, None);
        let requires = self.requires_rules(&dir, &item, &exes.libraries, false);

        let flags = OcamlFlags::new(
            &self.context.clone(),
            &dir,
            &exes.flags,
            &exes.ocamlc_flags,
            &exes.ocamlopt_flags,
        );
        {
            let params = CompileParams {
                dir: &dir,
                modules: &modules,
                alias_module: None,
                dep_specs: &dep_specs,
                requires: &requires,
                flags: &flags,
            };
            let members: Vec<Module> = modules.values().cloned().collect();
            for m in &members {
                self.module_compile_rules(&params, m);
            }
        }
        self.executable_rules(&dir, exes, &modules, &dep_specs, &requires)
    }

    /// Emit the closure rule persisting `{item}.requires.sexp` and return
    /// the loader consumers hang their dependencies on.
    pub(crate) fn requires_rules(
        &mut self,
        dir: &Path,
        item: &str,
        deps: &[LibDep],
        optional: bool,
    ) -> Build<(), Vec<ResolvedLib>> {
        let kind = if optional {
            LibDepKind::Optional
        } else {
            LibDepKind::Required
        };
        let closure = self.lib_db.closure_build(dir, deps, kind);
        let spec = requires_spec(dir, item);
        self.add_rule(
            closure
                .map(|libs: Vec<ResolvedLib>| best_names(&libs))
                .then(store_vfile(&spec)),
        );
        let db = self.lib_db.clone();
        vpath(&spec).map_result(move |names: Vec<String>| {
            names
                .iter()
                .map(|n| db.resolve(n).map_err(|e| e.deferred()))
                .collect()
        })
    }

    fn runtime_deps_rules(
        &mut self,
        dir: &Path,
        item: &str,
        lib_deps: &[LibDep],
        runtime_deps: &[LibDep],
        optional: bool,
    ) {
        let kind = if optional {
            LibDepKind::Optional
        } else {
            LibDepKind::Required
        };
        let closure = self
            .lib_db
            .closed_ppx_runtime_deps_build(dir, lib_deps, runtime_deps, kind);
        let spec = runtime_deps_spec(dir, item);
        self.add_rule(
            closure
                .map(|libs: Vec<ResolvedLib>| best_names(&libs))
                .then(store_vfile(&spec)),
        );
    }

    pub(crate) fn interpret_dep_confs(
        &self,
        dir: &Path,
        deps: &[DepConf],
    ) -> Result<DepSet, RulesError> {
        let mut files = Vec::new();
        let mut globs = Vec::new();
        let mut recursive = Vec::new();
        for dep in deps {
            match dep {
                DepConf::File(f) => files.push(dir.relative(f)),
                DepConf::GlobFiles(glob) => {
                    let pattern =
                        glob_to_regex(glob).map_err(|e| RulesError::InvalidGlob {
                            glob: glob.clone(),
                            reason: e.to_string(),
                        })?;
                    globs.push((dir.clone(), pattern));
                }
                DepConf::FilesRecursivelyIn(sub) => recursive.push(dir.relative(sub)),
            }
        }
        Ok(DepSet {
            files,
            globs,
            recursive,
            first_is_plain: deps.first().map(DepConf::is_plain_file).unwrap_or(false),
        })
    }

    /// No two rules may declare the same target; the executor keys its
    /// scheduling on output paths.
    fn check_target_uniqueness(&self) -> Result<(), RulesError> {
        let mut seen: BTreeSet<Path> = BTreeSet::new();
        for rule in &self.rules {
            for target in rule.all_targets() {
                if !seen.insert(target.clone()) {
                    return Err(RulesError::DuplicateTarget {
                        path: target.to_path_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
