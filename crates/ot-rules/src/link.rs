//! Archive & executable emitter
//!
//! Closes module sets over the scanned dependency graph into link order,
//! then emits the per-mode archive, shared-object and executable rules.
//! Cycles are diagnosed here, naming the modules involved; the scanner
//! deliberately does not reject them.

use std::collections::HashMap;

use ot_build::{arr, dyn_paths, path, paths, run, run_extra, vpath, ArgSpec, Build, NameMap};
use ot_findlib::Mode;
use ot_path::Path;

use crate::compile::lib_cm_all;
use crate::dep_scan::ModuleDeps;
use crate::error::RulesError;
use crate::lib_db::ResolvedLib;
use crate::modules::{Module, ModuleMap};
use crate::stanza::{capitalize, CmKind, Executables, Library};
use crate::super_context::SuperContext;

/// Close `roots` over the dependency map into link order (dependencies
/// first). Depth-first; a back edge is a cycle and fails with the cycle
/// path.
pub fn link_closure(map: &NameMap, roots: &[String]) -> Result<Vec<String>, RulesError> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Visiting,
        Done,
    }
    fn visit(
        name: &str,
        map: &NameMap,
        states: &mut HashMap<String, State>,
        stack: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> Result<(), RulesError> {
        match states.get(name) {
            Some(State::Done) => return Ok(()),
            Some(State::Visiting) => {
                let pos = stack.iter().position(|x| x == name).unwrap_or(0);
                let mut cycle: Vec<String> = stack[pos..].to_vec();
                cycle.push(name.to_string());
                return Err(RulesError::DependencyCycle { cycle });
            }
            None => {}
        }
        states.insert(name.to_string(), State::Visiting);
        stack.push(name.to_string());
        if let Some(deps) = map.get(name) {
            for dep in deps {
                if map.contains_key(dep) {
                    visit(dep, map, states, stack, out)?;
                }
            }
        }
        stack.pop();
        states.insert(name.to_string(), State::Done);
        out.push(name.to_string());
        Ok(())
    }

    let mut states = HashMap::new();
    let mut stack = Vec::new();
    let mut out = Vec::new();
    for root in roots {
        if map.contains_key(root) {
            visit(root, map, &mut states, &mut stack, &mut out)?;
        }
    }
    Ok(out)
}

/// Link-ordered artifact paths of a module closure, as a build value.
fn ordered_cm_paths(
    dir: &Path,
    dep_specs: &ModuleDeps,
    roots: Vec<String>,
    obj_names: HashMap<String, String>,
    cm_kind: CmKind,
) -> Build<(), Vec<Path>> {
    let dir = dir.clone();
    vpath(&dep_specs.impl_spec).map_result(move |map: NameMap| {
        let order = link_closure(&map, &roots).map_err(|e| e.deferred())?;
        Ok(order
            .iter()
            .filter_map(|name| {
                obj_names
                    .get(name)
                    .map(|obj| dir.relative(&format!("{obj}{}", cm_kind.ext())))
            })
            .collect())
    })
}

fn all_obj_names(modules: &ModuleMap, alias: Option<&Module>) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = modules
        .iter()
        .map(|(name, m)| (name.clone(), m.obj_name.clone()))
        .collect();
    if let Some(alias) = alias {
        map.insert(alias.name.clone(), alias.obj_name.clone());
    }
    map
}

fn closure_roots(modules: &ModuleMap, alias: Option<&Module>) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    if let Some(alias) = alias {
        roots.push(alias.name.clone());
    }
    roots.extend(modules.keys().cloned());
    roots
}

type ArchiveInput = ((Vec<Path>, Vec<String>), Vec<String>);

impl SuperContext {
    /// Per-mode archive rules plus the native shared object.
    pub(crate) fn archive_rules(
        &mut self,
        dir: &Path,
        lib: &Library,
        modules: &ModuleMap,
        alias: Option<&Module>,
        dep_specs: &ModuleDeps,
    ) {
        let obj_names = all_obj_names(modules, alias);
        let roots = closure_roots(modules, alias);
        let stubs_archive = dir.relative(&format!(
            "lib{}{}",
            lib.stubs_base(),
            self.context.ext_lib
        ));

        for mode in [Mode::Byte, Mode::Native] {
            if !lib.modes.contains(&mode) {
                continue;
            }
            let Some(compiler) = self.context.compiler(mode) else {
                continue;
            };
            let cm_kind = match mode {
                Mode::Byte => CmKind::Cmo,
                Mode::Native => CmKind::Cmx,
            };
            let target = dir.relative(&format!("{}{}", lib.name, mode.archive_ext()));

            let order = ordered_cm_paths(dir, dep_specs, roots.clone(), obj_names.clone(), cm_kind);
            let mut b: Build<(), ArchiveInput> = order
                .then(dyn_paths(arr(|v: Vec<Path>| v)))
                .fanout(lib.library_flags.expand(dir, Vec::new()))
                .fanout(lib.c_library_flags.expand(dir, Vec::new()));
            if lib.has_stubs() {
                b = b.then(path(stubs_archive.clone()));
            }

            let mut args: Vec<ArgSpec> = Vec::new();
            args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                let ((_, library_flags), _) = input;
                ArgSpec::As(library_flags.clone())
            }));
            args.push(ArgSpec::a("-a"));
            if lib.kind.linkall() {
                args.push(ArgSpec::a("-linkall"));
            }
            if lib.has_stubs() {
                let l_flag = format!("-l{}", lib.stubs_base());
                match mode {
                    Mode::Byte => args.push(ArgSpec::As(vec![
                        "-dllib".to_string(),
                        l_flag.clone(),
                        "-cclib".to_string(),
                        l_flag,
                    ])),
                    Mode::Native => {
                        args.push(ArgSpec::As(vec!["-cclib".to_string(), l_flag]))
                    }
                }
            }
            args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                let (_, c_library_flags) = input;
                ArgSpec::As(
                    c_library_flags
                        .iter()
                        .flat_map(|f| ["-cclib".to_string(), f.clone()])
                        .collect(),
                )
            }));
            args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                let ((cm_files, _), _) = input;
                ArgSpec::Paths(cm_files.clone())
            }));
            args.push(ArgSpec::a("-o"));
            args.push(ArgSpec::Target(target.clone()));

            let extra_targets = match mode {
                Mode::Byte => Vec::new(),
                // The native archiver also writes the companion library.
                Mode::Native => vec![dir.relative(&format!(
                    "{}{}",
                    lib.name, self.context.ext_lib
                ))],
            };
            self.add_rule(b.then(run_extra(compiler, args, extra_targets)));
        }

        // Native shared object, linked from the archive.
        if lib.modes.contains(&Mode::Native) {
            if let Some(ocamlopt) = self.context.compiler(Mode::Native) {
                let cmxa = dir.relative(&format!("{}.cmxa", lib.name));
                let cmxs = dir.relative(&format!("{}.cmxs", lib.name));
                let mut b = path::<()>(cmxa.clone());
                if lib.has_stubs() {
                    b = b.then(path(stubs_archive));
                }
                self.add_rule(b.then(run(
                    ocamlopt,
                    vec![
                        ArgSpec::a("-shared"),
                        ArgSpec::a("-linkall"),
                        ArgSpec::a("-I"),
                        ArgSpec::Path(dir.clone()),
                        ArgSpec::Dep(cmxa),
                        ArgSpec::a("-o"),
                        ArgSpec::Target(cmxs),
                    ],
                )));
            }
        }
    }

    /// Per-kind zero-byte sentinels depending on every cm file of the
    /// library.
    pub(crate) fn cm_all_rules(
        &mut self,
        dir: &Path,
        lib_name: &str,
        modules: &ModuleMap,
        alias: Option<&Module>,
    ) {
        for cm_kind in CmKind::all() {
            if self.context.compiler(cm_kind.mode()).is_none() {
                continue;
            }
            let mut files: Vec<Path> = Vec::new();
            for m in modules.values().chain(alias.into_iter()) {
                files.push(dir.relative(&format!("{}{}", m.obj_name, cm_kind.ext())));
            }
            let sentinel = lib_cm_all(dir, lib_name, cm_kind);
            self.add_rule(paths::<()>(files).then(ot_build::create_file(sentinel, "")));
        }
    }

    /// Executable rules: one per name per mode, closed from the module
    /// named like the executable.
    pub(crate) fn executable_rules(
        &mut self,
        dir: &Path,
        exes: &Executables,
        modules: &ModuleMap,
        dep_specs: &ModuleDeps,
        requires: &Build<(), Vec<ResolvedLib>>,
    ) -> Result<(), RulesError> {
        let obj_names = all_obj_names(modules, None);
        for name in &exes.names {
            let main = capitalize(name);
            if !modules.contains_key(&main) {
                return Err(RulesError::ExecutableWithoutModule {
                    exe: name.clone(),
                    module: main,
                });
            }
        }

        for name in &exes.names {
            let main = capitalize(name);
            for mode in [Mode::Byte, Mode::Native] {
                if !exes.modes.contains(&mode) {
                    continue;
                }
                let Some(compiler) = self.context.compiler(mode) else {
                    continue;
                };
                let cm_kind = match mode {
                    Mode::Byte => CmKind::Cmo,
                    Mode::Native => CmKind::Cmx,
                };
                let ext = match mode {
                    Mode::Byte => ".bc",
                    Mode::Native => ".exe",
                };
                let target = dir.relative(&format!("{name}{ext}"));

                let order = ordered_cm_paths(
                    dir,
                    dep_specs,
                    vec![main.clone()],
                    obj_names.clone(),
                    cm_kind,
                )
                .then(dyn_paths(arr(|v: Vec<Path>| v)));

                // Internal dep archives must exist before linking.
                let libs = requires
                    .clone()
                    .then(dyn_paths(arr(move |libs: Vec<ResolvedLib>| {
                        libs.iter()
                            .filter(|l| l.is_internal())
                            .flat_map(|l| l.archive_paths(mode))
                            .collect::<Vec<Path>>()
                    })))
                    .map(move |libs: Vec<ResolvedLib>| best_archive_args(&libs, mode));

                let link_flags = exes
                    .link_flags
                    .expand(dir, self.context.standard_mode_flags());
                let b: Build<(), ArchiveInput> = order.fanout(libs).fanout(link_flags);

                let mut args: Vec<ArgSpec> = vec![ArgSpec::a("-o"), ArgSpec::Target(target)];
                args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                    let (_, flags) = input;
                    ArgSpec::As(flags.clone())
                }));
                args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                    let ((_, archives), _) = input;
                    ArgSpec::As(archives.clone())
                }));
                args.push(ArgSpec::a("-I"));
                args.push(ArgSpec::Path(dir.clone()));
                args.push(ArgSpec::dyn_of::<ArchiveInput, _>(|input| {
                    let ((cm_files, _), _) = input;
                    ArgSpec::Paths(cm_files.clone())
                }));
                self.add_rule(b.then(run(compiler, args)));
            }
        }
        Ok(())
    }
}

/// Include and archive arguments of a library closure, render-ready.
fn best_archive_args(libs: &[ResolvedLib], mode: Mode) -> Vec<String> {
    let mut args = Vec::new();
    for lib in libs {
        args.push("-I".to_string());
        args.push(lib.include_dir().to_path_string());
    }
    for lib in libs {
        for archive in lib.archive_paths(mode) {
            args.push(archive.to_path_string());
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[&str])]) -> NameMap {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn closure_orders_dependencies_first() {
        let m = map(&[("Main", &["Util", "Cfg"]), ("Util", &["Cfg"]), ("Cfg", &[])]);
        let order = link_closure(&m, &["Main".to_string()]).unwrap();
        assert_eq!(order, vec!["Cfg", "Util", "Main"]);
    }

    #[test]
    fn closure_of_all_modules_is_complete() {
        let m = map(&[("A", &[]), ("B", &["A"])]);
        let order =
            link_closure(&m, &["A".to_string(), "B".to_string()]).unwrap();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        let m = map(&[("A", &["B"]), ("B", &["A"])]);
        let err = link_closure(&m, &["A".to_string()]).unwrap_err();
        match err {
            RulesError::DependencyCycle { cycle } => {
                assert!(cycle.contains(&"A".to_string()));
                assert!(cycle.contains(&"B".to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn self_edge_free_maps_do_not_cycle() {
        let m = map(&[("A", &["Missing"])]);
        // Deps outside the map are ignored.
        assert_eq!(link_closure(&m, &["A".to_string()]).unwrap(), vec!["A"]);
    }
}
