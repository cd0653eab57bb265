//! Library database
//!
//! Interprets library-dependency expressions against the set of internal
//! (first-party) libraries and the external package database. Closures are
//! not recomputed across directories: every library persists its closure to
//! `{name}.requires.sexp` (and its preprocessor-runtime closure to
//! `{name}.runtime-deps.sexp`), and consumers load those files through the
//! build graph. The persisted form is a list of best names; loading maps
//! each name back through this database. Order is link order and must be
//! preserved.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use ot_build::{
    all, fail, name_list_codec, record_lib_deps, vpath, Build, BuildError, LibDepKind, Vspec,
};
use ot_findlib::{Findlib, Mode, Package};
use ot_path::Path;

use crate::error::RulesError;
use crate::stanza::Library;

/// A library dependency as written in a stanza.
#[derive(Debug, Clone)]
pub enum LibDep {
    Direct(String),
    Select(Select),
}

impl LibDep {
    pub fn direct(name: &str) -> LibDep {
        LibDep::Direct(name.to_string())
    }
}

/// Choose between alternative implementation files based on which packages
/// are available. The first satisfied choice wins and its file is copied to
/// `result_file`.
#[derive(Debug, Clone)]
pub struct Select {
    pub result_file: String,
    pub choices: Vec<SelectChoice>,
}

#[derive(Debug, Clone)]
pub struct SelectChoice {
    pub required: BTreeSet<String>,
    pub forbidden: BTreeSet<String>,
    pub file: String,
}

/// A select resolution, materialized as a copy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelect {
    pub src_file: String,
    pub dst_file: String,
}

/// A library dependency resolved to its definition.
#[derive(Debug, Clone)]
pub enum ResolvedLib {
    Internal { dir: Path, lib: Arc<Library> },
    External(Package),
}

impl ResolvedLib {
    pub fn best_name(&self) -> &str {
        match self {
            ResolvedLib::Internal { lib, .. } => lib.best_name(),
            ResolvedLib::External(pkg) => &pkg.name,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ResolvedLib::Internal { .. })
    }

    /// Directory to pass as an include path when compiling against this
    /// library.
    pub fn include_dir(&self) -> Path {
        match self {
            ResolvedLib::Internal { dir, .. } => dir.clone(),
            ResolvedLib::External(pkg) => Path::absolute(pkg.dir.clone()),
        }
    }

    pub fn archive_paths(&self, mode: Mode) -> Vec<Path> {
        match self {
            ResolvedLib::Internal { dir, lib } => {
                vec![dir.relative(&format!("{}{}", lib.name, mode.archive_ext()))]
            }
            ResolvedLib::External(pkg) => pkg
                .archive_paths(mode)
                .into_iter()
                .map(Path::Absolute)
                .collect(),
        }
    }

    /// Installed header files this library exposes to stub compilation.
    pub fn header_paths(&self) -> Vec<Path> {
        match self {
            ResolvedLib::Internal { dir, lib } => lib
                .install_c_headers
                .iter()
                .map(|h| dir.relative(&format!("{h}.h")))
                .collect(),
            ResolvedLib::External(_) => Vec::new(),
        }
    }
}

/// Deduplicate by best name, preserving first occurrence.
pub fn dedup_libs(libs: Vec<ResolvedLib>) -> Vec<ResolvedLib> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    libs.into_iter()
        .filter(|lib| seen.insert(lib.best_name().to_string()))
        .collect()
}

pub fn best_names(libs: &[ResolvedLib]) -> Vec<String> {
    libs.iter().map(|l| l.best_name().to_string()).collect()
}

/// Persisted closure of a library or executable item.
pub fn requires_spec(dir: &Path, item: &str) -> Vspec<Vec<String>> {
    Vspec::new(
        dir.relative(&format!("{item}.requires.sexp")),
        name_list_codec(),
    )
}

/// Persisted preprocessor-runtime closure.
pub fn runtime_deps_spec(dir: &Path, item: &str) -> Vspec<Vec<String>> {
    Vspec::new(
        dir.relative(&format!("{item}.runtime-deps.sexp")),
        name_list_codec(),
    )
}

#[derive(Clone)]
pub struct LibDb {
    inner: Arc<Inner>,
}

struct Inner {
    findlib: Findlib,
    /// Registration order, stable across runs.
    libs: Vec<(Path, Arc<Library>)>,
    /// Indexed by both local and public name.
    by_name: HashMap<String, (Path, Arc<Library>)>,
}

impl LibDb {
    pub fn new(findlib: Findlib, libs: Vec<(Path, Library)>) -> LibDb {
        let libs: Vec<(Path, Arc<Library>)> = libs
            .into_iter()
            .map(|(dir, lib)| (dir, Arc::new(lib)))
            .collect();
        let mut by_name = HashMap::new();
        for (dir, lib) in &libs {
            by_name.insert(lib.name.clone(), (dir.clone(), lib.clone()));
            if let Some(public) = &lib.public_name {
                by_name.insert(public.clone(), (dir.clone(), lib.clone()));
            }
        }
        LibDb {
            inner: Arc::new(Inner {
                findlib,
                libs,
                by_name,
            }),
        }
    }

    pub fn findlib(&self) -> &Findlib {
        &self.inner.findlib
    }

    pub fn find_internal(&self, name: &str) -> Option<(Path, Arc<Library>)> {
        self.inner.by_name.get(name).cloned()
    }

    /// Resolve a name: internal libraries shadow external packages.
    pub fn resolve(&self, name: &str) -> Result<ResolvedLib, RulesError> {
        if let Some((dir, lib)) = self.inner.by_name.get(name) {
            return Ok(ResolvedLib::Internal {
                dir: dir.clone(),
                lib: lib.clone(),
            });
        }
        match self.inner.findlib.find(name) {
            Ok(pkg) => Ok(ResolvedLib::External(pkg.clone())),
            Err(_) => Err(RulesError::MissingLibrary {
                name: name.to_string(),
            }),
        }
    }

    fn known(&self, name: &str) -> bool {
        self.inner.by_name.contains_key(name) || self.inner.findlib.mem(name)
    }

    fn choose<'a>(&self, select: &'a Select) -> Option<&'a SelectChoice> {
        select.choices.iter().find(|choice| {
            choice.required.iter().all(|p| self.known(p))
                && choice.forbidden.iter().all(|p| !self.known(p))
        })
    }

    /// Classify each dependency. Missing dependencies and unsatisfiable
    /// selects do not abort: the first problem is returned as a value so
    /// the caller can defer it (optional stanzas) or raise it.
    pub fn interpret_lib_deps(
        &self,
        _dir: &Path,
        deps: &[LibDep],
    ) -> (Vec<(Path, Arc<Library>)>, Vec<Package>, Option<RulesError>) {
        let mut internals = Vec::new();
        let mut externals = Vec::new();
        let mut failure: Option<RulesError> = None;
        for dep in deps {
            match dep {
                LibDep::Direct(name) => {
                    if let Some(err) = self.classify_one(name, &mut internals, &mut externals) {
                        failure.get_or_insert(err);
                    }
                }
                LibDep::Select(select) => match self.choose(select) {
                    Some(choice) => {
                        for name in &choice.required {
                            if let Some(err) =
                                self.classify_one(name, &mut internals, &mut externals)
                            {
                                failure.get_or_insert(err);
                            }
                        }
                    }
                    None => {
                        failure.get_or_insert(RulesError::NoMatchingSelect {
                            result: select.result_file.clone(),
                        });
                    }
                },
            }
        }
        (internals, externals, failure)
    }

    fn classify_one(
        &self,
        name: &str,
        internals: &mut Vec<(Path, Arc<Library>)>,
        externals: &mut Vec<Package>,
    ) -> Option<RulesError> {
        match self.resolve(name) {
            Ok(ResolvedLib::Internal { dir, lib }) => {
                internals.push((dir, lib));
                None
            }
            Ok(ResolvedLib::External(pkg)) => {
                externals.push(pkg);
                None
            }
            Err(err) => Some(err),
        }
    }

    /// Resolve every select to its copy rule. Unsatisfiable selects are
    /// skipped here; `interpret_lib_deps` reports them.
    pub fn resolve_selects(&self, deps: &[LibDep]) -> Vec<ResolvedSelect> {
        deps.iter()
            .filter_map(|dep| match dep {
                LibDep::Direct(_) => None,
                LibDep::Select(select) => self.choose(select).map(|choice| ResolvedSelect {
                    src_file: choice.file.clone(),
                    dst_file: select.result_file.clone(),
                }),
            })
            .collect()
    }

    /// The declared names of a dependency list, for lib-usage recording.
    fn recorded_names(&self, deps: &[LibDep]) -> Vec<String> {
        let mut names = Vec::new();
        for dep in deps {
            match dep {
                LibDep::Direct(name) => names.push(name.clone()),
                LibDep::Select(select) => {
                    if let Some(choice) = self.choose(select) {
                        names.extend(choice.required.iter().cloned());
                    }
                }
            }
        }
        names
    }

    /// The full closure of a dependency list as a build value: externals
    /// first (package-database closure), then each internal dependency's
    /// persisted closure followed by the dependency itself, deduplicated
    /// preserving first occurrence.
    pub fn closure_build(
        &self,
        dir: &Path,
        deps: &[LibDep],
        kind: LibDepKind,
    ) -> Build<(), Vec<ResolvedLib>> {
        let (internals, externals, failure) = self.interpret_lib_deps(dir, deps);
        let record = record_lib_deps::<()>(dir.clone(), kind, self.recorded_names(deps));
        if let Some(err) = failure {
            return record.then(fail(err.deferred()));
        }
        let ext_closure: Vec<ResolvedLib> = match self.inner.findlib.closure(externals.iter()) {
            Ok(pkgs) => pkgs.into_iter().map(ResolvedLib::External).collect(),
            Err(err) => return record.then(fail(BuildError::deferred(err.to_string()))),
        };
        let loads = internals
            .iter()
            .map(|(idir, ilib)| self.load_requires(idir, ilib))
            .collect();
        record.then(all(loads).map(move |lists: Vec<Vec<ResolvedLib>>| {
            let mut out = ext_closure.clone();
            out.extend(lists.into_iter().flatten());
            dedup_libs(out)
        }))
    }

    /// Load an internal library's persisted closure and append the library
    /// itself (its own file does not include it).
    fn load_requires(&self, dir: &Path, lib: &Arc<Library>) -> Build<(), Vec<ResolvedLib>> {
        let spec = requires_spec(dir, &lib.name);
        let db = self.clone();
        let me = ResolvedLib::Internal {
            dir: dir.clone(),
            lib: lib.clone(),
        };
        vpath(&spec).map_result(move |names: Vec<String>| {
            let mut libs = names
                .iter()
                .map(|n| db.resolve(n).map_err(|e| e.deferred()))
                .collect::<Result<Vec<_>, _>>()?;
            libs.push(me.clone());
            Ok(libs)
        })
    }

    fn load_runtime_deps(&self, dir: &Path, lib: &Arc<Library>) -> Build<(), Vec<ResolvedLib>> {
        let spec = runtime_deps_spec(dir, &lib.name);
        let db = self.clone();
        vpath(&spec).map_result(move |names: Vec<String>| {
            names
                .iter()
                .map(|n| db.resolve(n).map_err(|e| e.deferred()))
                .collect()
        })
    }

    /// Closure of the runtime dependencies of a preprocessor-plugin set:
    /// the runtime deps declared by `runtime_deps` themselves, plus the
    /// runtime deps contributed transitively by `lib_deps` (via their
    /// persisted `runtime-deps.sexp` files for internals, via the package
    /// database for externals).
    pub fn closed_ppx_runtime_deps_build(
        &self,
        dir: &Path,
        lib_deps: &[LibDep],
        runtime_deps: &[LibDep],
        kind: LibDepKind,
    ) -> Build<(), Vec<ResolvedLib>> {
        let (lib_int, lib_ext, fail_a) = self.interpret_lib_deps(dir, lib_deps);
        let (rt_int, rt_ext, fail_b) = self.interpret_lib_deps(dir, runtime_deps);
        let record = record_lib_deps::<()>(dir.clone(), kind, self.recorded_names(runtime_deps));
        if let Some(err) = fail_a.or(fail_b) {
            return record.then(fail(err.deferred()));
        }
        let findlib = &self.inner.findlib;
        let ext_closure: Result<Vec<Package>, _> = findlib
            .closed_ppx_runtime_deps_of(lib_ext.iter())
            .and_then(|mut rt| {
                rt.extend(findlib.closure(rt_ext.iter())?);
                Ok(rt)
            });
        let ext_closure: Vec<ResolvedLib> = match ext_closure {
            Ok(pkgs) => pkgs.into_iter().map(ResolvedLib::External).collect(),
            Err(err) => return record.then(fail(BuildError::deferred(err.to_string()))),
        };
        let mut loads: Vec<Build<(), Vec<ResolvedLib>>> = Vec::new();
        for (idir, ilib) in &lib_int {
            loads.push(self.load_runtime_deps(idir, ilib));
        }
        for (idir, ilib) in &rt_int {
            loads.push(self.load_requires(idir, ilib));
        }
        record.then(all(loads).map(move |lists: Vec<Vec<ResolvedLib>>| {
            let mut out = ext_closure.clone();
            out.extend(lists.into_iter().flatten());
            dedup_libs(out)
        }))
    }

    /// Transitive closure computed during generation (no persisted files),
    /// used where rules about the closure must be emitted right now: the
    /// preprocessor-driver builder and installability filtering.
    pub fn static_closure(&self, names: &[String]) -> Result<Vec<ResolvedLib>, RulesError> {
        let mut acc: IndexMap<String, ResolvedLib> = IndexMap::new();
        let mut visiting = BTreeSet::new();
        for name in names {
            self.visit_static(name, &mut acc, &mut visiting)?;
        }
        Ok(acc.into_values().collect())
    }

    fn visit_static(
        &self,
        name: &str,
        acc: &mut IndexMap<String, ResolvedLib>,
        visiting: &mut BTreeSet<String>,
    ) -> Result<(), RulesError> {
        let lib = self.resolve(name)?;
        let key = lib.best_name().to_string();
        if acc.contains_key(&key) || visiting.contains(&key) {
            return Ok(());
        }
        visiting.insert(key.clone());
        match &lib {
            ResolvedLib::Internal { lib: l, .. } => {
                for dep in &l.libraries {
                    match dep {
                        LibDep::Direct(n) => self.visit_static(n, acc, visiting)?,
                        LibDep::Select(select) => match self.choose(select) {
                            Some(choice) => {
                                for n in &choice.required {
                                    self.visit_static(n, acc, visiting)?;
                                }
                            }
                            None => {
                                return Err(RulesError::NoMatchingSelect {
                                    result: select.result_file.clone(),
                                })
                            }
                        },
                    }
                }
            }
            ResolvedLib::External(pkg) => {
                for dep in &pkg.requires {
                    self.visit_static(dep, acc, visiting)?;
                }
            }
        }
        visiting.remove(&key);
        acc.insert(key, lib);
        Ok(())
    }

    /// True when the library's transitive dependencies all resolve,
    /// including the packages it only assumes at runtime.
    pub fn installable(&self, lib: &Library) -> bool {
        let names: Vec<String> = lib
            .libraries
            .iter()
            .filter_map(|d| match d {
                LibDep::Direct(n) => Some(n.clone()),
                LibDep::Select(_) => None,
            })
            .collect();
        let selects_ok = lib.libraries.iter().all(|d| match d {
            LibDep::Direct(_) => true,
            LibDep::Select(s) => self.choose(s).is_some(),
        });
        let virtual_ok = lib.virtual_deps.iter().all(|d| self.known(d));
        selects_ok && virtual_ok && self.static_closure(&names).is_ok()
    }

    pub fn internal_libs(&self) -> &[(Path, Arc<Library>)] {
        &self.inner.libs
    }

    /// All internal libraries, minus optional ones whose closure has
    /// missing dependencies. Feeds the install-manifest emitter.
    pub fn internal_libs_without_non_installable_optional_ones(
        &self,
    ) -> Vec<(Path, Arc<Library>)> {
        self.inner
            .libs
            .iter()
            .filter(|(_, lib)| !lib.optional || self.installable(lib))
            .cloned()
            .collect()
    }
}
