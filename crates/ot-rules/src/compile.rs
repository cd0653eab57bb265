//! Compilation rule emitter
//!
//! One rule per module per compiled-artifact kind. The delicate part is
//! who produces the interface artifact when the module has no explicit
//! interface file: the bytecode rule is nominated sole producer, and the
//! native rule is fed a false `-intf-suffix` so the compiler reads the
//! existing artifact instead of racing to re-create it.

use std::collections::HashMap;
use std::sync::Arc;

use ot_build::{arr, dyn_paths, paths, run_extra, vpath, ArgSpec, Build, NameMap};
use ot_path::Path;

use crate::context::Context;
use crate::dep_scan::ModuleDeps;
use crate::lib_db::ResolvedLib;
use crate::modules::{Module, ModuleMap};
use crate::ordered_set::OrderedSet;
use crate::stanza::CmKind;
use crate::super_context::SuperContext;

/// Zero-byte sentinel whose dependencies are all of a library's artifacts
/// of one cm kind. Consumers depend on it instead of enumerating files.
pub fn lib_cm_all(dir: &Path, lib_name: &str, cm_kind: CmKind) -> Path {
    dir.relative(&format!(".{}{}-all", lib_name, cm_kind.ext()))
}

/// Flag sets of a compiling stanza, lifted into the build graph so
/// file-sourced sets register their files.
pub(crate) struct OcamlFlags {
    common: Build<(), Vec<String>>,
    byte: Build<(), Vec<String>>,
    native: Build<(), Vec<String>>,
}

impl OcamlFlags {
    pub(crate) fn new(
        ctx: &Context,
        dir: &Path,
        flags: &OrderedSet,
        ocamlc_flags: &OrderedSet,
        ocamlopt_flags: &OrderedSet,
    ) -> OcamlFlags {
        OcamlFlags {
            common: flags.expand(dir, ctx.standard_ocaml_flags()),
            byte: ocamlc_flags.expand(dir, ctx.standard_mode_flags()),
            native: ocamlopt_flags.expand(dir, ctx.standard_mode_flags()),
        }
    }

    pub(crate) fn for_cm(&self, cm_kind: CmKind) -> Build<(), Vec<String>> {
        let mode_flags = match cm_kind {
            CmKind::Cmi | CmKind::Cmo => self.byte.clone(),
            CmKind::Cmx => self.native.clone(),
        };
        self.common.clone().fanout(mode_flags).map(|(mut c, m)| {
            c.extend(m);
            c
        })
    }
}

/// Everything shared by the compile rules of one stanza.
pub(crate) struct CompileParams<'a> {
    pub dir: &'a Path,
    pub modules: &'a ModuleMap,
    pub alias_module: Option<&'a Module>,
    pub dep_specs: &'a ModuleDeps,
    pub requires: &'a Build<(), Vec<ResolvedLib>>,
    pub flags: &'a OcamlFlags,
}

impl CompileParams<'_> {
    /// Object names of every module (alias included), for translating
    /// dependency-map entries into artifact paths.
    fn obj_names(&self) -> Arc<HashMap<String, String>> {
        let mut map: HashMap<String, String> = self
            .modules
            .iter()
            .map(|(name, m)| (name.clone(), m.obj_name.clone()))
            .collect();
        if let Some(alias) = self.alias_module {
            map.insert(alias.name.clone(), alias.obj_name.clone());
        }
        Arc::new(map)
    }

    fn open_flag(&self) -> Option<String> {
        self.alias_module
            .map(|alias| crate::stanza::capitalize(&alias.obj_name))
    }
}

/// Dynamic input of a compile rule: ((flags, library closure), dep map).
type CmInput = ((Vec<String>, Vec<ResolvedLib>), NameMap);

impl SuperContext {
    pub(crate) fn module_compile_rules(&mut self, p: &CompileParams, m: &Module) {
        for cm_kind in CmKind::all() {
            self.build_cm(p, m, cm_kind);
        }
    }

    fn build_cm(&mut self, p: &CompileParams, m: &Module, cm_kind: CmKind) {
        let Some(compiler) = self.context.compiler(cm_kind.mode()) else {
            return;
        };
        let is_alias = p.alias_module.map(|a| a.name == m.name).unwrap_or(false);

        let src_file = match cm_kind {
            // No interface file: the interface artifact comes out of the
            // bytecode rule instead.
            CmKind::Cmi => match &m.intf_file {
                Some(f) => f.clone(),
                None => return,
            },
            CmKind::Cmo | CmKind::Cmx => m.impl_file.clone(),
        };
        let src = p.dir.relative(&src_file);
        let dst = p.dir.relative(&format!("{}{}", m.obj_name, cm_kind.ext()));
        let cmi = p.dir.relative(&format!("{}.cmi", m.obj_name));

        let mut static_deps = vec![src.clone()];
        let mut extra_targets = Vec::new();
        let mut extra_args: Vec<ArgSpec> = Vec::new();
        match cm_kind {
            CmKind::Cmi => {
                extra_targets.push(p.dir.relative(&format!("{}.cmti", m.obj_name)));
            }
            CmKind::Cmo => {
                if m.intf_file.is_some() {
                    static_deps.push(cmi.clone());
                } else {
                    extra_targets.push(cmi.clone());
                }
                extra_targets.push(p.dir.relative(&format!("{}.cmt", m.obj_name)));
            }
            CmKind::Cmx => {
                static_deps.push(cmi.clone());
                if m.intf_file.is_none() {
                    let impl_ext = src.extension().unwrap_or_else(|| ".ml".to_string());
                    extra_args.push(ArgSpec::a("-intf-suffix"));
                    extra_args.push(ArgSpec::a(impl_ext));
                }
                extra_targets
                    .push(p.dir.relative(&format!("{}{}", m.obj_name, self.context.ext_obj)));
            }
        }

        // Cross-module inputs follow the persisted dependency map.
        let dep_spec = match cm_kind {
            CmKind::Cmi => &p.dep_specs.intf_spec,
            _ => &p.dep_specs.impl_spec,
        };
        let obj_names = p.obj_names();
        let module_name = m.name.clone();
        let dep_dir = p.dir.clone();
        let module_dep_paths = arr(move |input: CmInput| {
            let (_, map) = &input;
            let mut out = Vec::new();
            if let Some(deps) = map.get(&module_name) {
                for dep in deps {
                    if let Some(obj) = obj_names.get(dep) {
                        out.push(dep_dir.relative(&format!("{obj}.cmi")));
                        if cm_kind == CmKind::Cmx {
                            out.push(dep_dir.relative(&format!("{obj}.cmx")));
                        }
                    }
                }
            }
            out
        });

        // Depend on each dep library's all-cm sentinel of the same kind.
        let sentinel_paths = arr(move |input: CmInput| {
            let ((_, libs), _) = &input;
            libs.iter()
                .filter_map(|lib| match lib {
                    ResolvedLib::Internal { dir, lib } => {
                        Some(lib_cm_all(dir, &lib.name, cm_kind))
                    }
                    ResolvedLib::External(_) => None,
                })
                .collect::<Vec<Path>>()
        });

        let b = p
            .flags
            .for_cm(cm_kind)
            .fanout(p.requires.clone())
            .fanout(vpath(dep_spec))
            .then(dyn_paths(module_dep_paths))
            .then(dyn_paths(sentinel_paths))
            .then(paths(static_deps));

        let mut args: Vec<ArgSpec> = Vec::new();
        args.push(ArgSpec::dyn_of::<CmInput, _>(|input| {
            let ((flags, libs), _) = input;
            let mut rendered = vec![ArgSpec::As(flags.clone())];
            for lib in libs {
                rendered.push(ArgSpec::a("-I"));
                rendered.push(ArgSpec::Path(lib.include_dir()));
            }
            ArgSpec::S(rendered)
        }));
        if p.alias_module.is_some() {
            args.push(ArgSpec::a("-no-alias-deps"));
        }
        if let Some(open) = p.open_flag() {
            if !is_alias {
                args.push(ArgSpec::a("-open"));
                args.push(ArgSpec::a(open));
            }
        }
        if is_alias {
            // The generated alias body triggers unused-module-binding
            // warnings by construction.
            args.push(ArgSpec::a("-w"));
            args.push(ArgSpec::a("-49"));
        }
        if cm_kind != CmKind::Cmx {
            args.push(ArgSpec::a("-bin-annot"));
        }
        args.push(ArgSpec::a("-I"));
        args.push(ArgSpec::Path(p.dir.clone()));
        args.extend(extra_args);
        args.push(ArgSpec::a("-c"));
        args.push(ArgSpec::a("-o"));
        args.push(ArgSpec::Target(dst));
        if !(src_file.ends_with(".ml") || src_file.ends_with(".mli")) {
            let force = match cm_kind {
                CmKind::Cmi => "-intf",
                _ => "-impl",
            };
            args.push(ArgSpec::a(force));
        }
        args.push(ArgSpec::Dep(src));

        self.add_rule(b.then(run_extra(compiler, args, extra_targets)));
    }
}

/// The generated body of a wrapped library's alias module: one
/// `module {Name} = {Prefixed}` line per renamed module, in map order.
pub fn alias_module_body(modules: &ModuleMap) -> String {
    let mut body = String::new();
    for (name, m) in modules {
        if m.obj_name.contains("__") {
            body.push_str(&format!(
                "module {} = {}\n",
                name,
                crate::stanza::capitalize(&m.obj_name)
            ));
        }
    }
    body
}
