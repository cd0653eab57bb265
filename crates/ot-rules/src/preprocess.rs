//! Preprocessor pipeline
//!
//! Each module is lifted through its preprocessing choice before scanning
//! and compilation: identity, the metaquotation rewriter, an ad-hoc shell
//! command, or a driver executable synthesized from a plugin set. The
//! preprocessed counterparts carry a `.pp.` infix before the extension so
//! `foo.pp.mli` remains the interface of `foo.pp.ml`, and the module record
//! is replaced so every later rule sees the preprocessed files.
//!
//! Drivers are cached process-wide during generation: the plugin set is
//! canonicalized to a sorted plus-joined key, and at most one driver is
//! built per key, shared by every consumer.

use ot_build::{bash, path, paths, run, targets, ArgSpec, Build};
use ot_findlib::Mode;
use ot_path::Path;
use tracing::debug;

use crate::context::Context;
use crate::error::RulesError;
use crate::lib_db::ResolvedLib;
use crate::modules::{Module, ModuleMap};
use crate::stanza::{DepConf, MlKind, Preprocess, PreprocessMap};
use crate::super_context::SuperContext;

/// A built preprocessor driver: the executable and the closed library set
/// it was linked from (consulted for per-invocation flags).
#[derive(Clone)]
pub struct PpxDriver {
    pub exe: Path,
    pub libs: Vec<ResolvedLib>,
}

/// `foo.ml` → `foo.pp.ml`.
fn pped_file(file: &str) -> String {
    match file.rfind('.') {
        Some(i) => format!("{}.pp{}", &file[..i], &file[i..]),
        None => format!("{file}.pp"),
    }
}

impl SuperContext {
    /// Lift every module of a stanza through its preprocessing choice,
    /// emitting the rewrite rules and returning the replaced module map.
    pub(crate) fn pped_modules(
        &mut self,
        dir: &Path,
        libname: Option<&str>,
        preprocess: &PreprocessMap,
        preprocessor_deps: &[DepConf],
        modules: ModuleMap,
    ) -> Result<ModuleMap, RulesError> {
        let extra = self.interpret_dep_confs(dir, preprocessor_deps)?;
        let mut out = ModuleMap::new();
        for (name, m) in modules {
            let module = match preprocess.for_module(&name).clone() {
                Preprocess::No => m,
                Preprocess::Command(cmd) => {
                    self.pp_with(&m, dir, |sctx, src, dst, _kind| {
                        let script = format!(
                            "{} {} > {}",
                            cmd,
                            src.to_path_string(),
                            dst.to_path_string()
                        );
                        sctx.add_rule(
                            path::<()>(src.clone())
                                .then(paths(extra.files.clone()))
                                .then(targets(vec![dst.clone()]))
                                .then(bash(script)),
                        );
                    })
                }
                Preprocess::Metaquot => {
                    let prog = self.metaquot_prog()?;
                    self.pp_with(&m, dir, |sctx, src, dst, _kind| {
                        sctx.add_rule(
                            paths::<()>(extra.files.clone()).then(run(
                                prog.clone(),
                                vec![
                                    ArgSpec::Dep(src.clone()),
                                    ArgSpec::a("-o"),
                                    ArgSpec::Target(dst.clone()),
                                ],
                            )),
                        );
                    })
                }
                Preprocess::Pps { pps, flags } => {
                    let driver = self.get_ppx_driver(&pps)?;
                    let specific =
                        specific_args_for_pps(&self.context.clone(), &driver.libs, libname, dir);
                    self.pp_with(&m, dir, |sctx, src, dst, kind| {
                        let mut args = vec![ArgSpec::As(flags.clone())];
                        args.extend(specific.clone());
                        args.push(ArgSpec::a(kind.force_flag()));
                        args.push(ArgSpec::Dep(src.clone()));
                        args.push(ArgSpec::a("-o"));
                        args.push(ArgSpec::Target(dst.clone()));
                        sctx.add_rule(
                            paths::<()>(extra.files.clone())
                                .then(run(driver.exe.clone(), args)),
                        );
                    })
                }
            };
            out.insert(name, module);
        }
        Ok(out)
    }

    /// Emit one rewrite rule per source half and return the renamed record.
    fn pp_with(
        &mut self,
        m: &Module,
        dir: &Path,
        mut emit: impl FnMut(&mut SuperContext, &Path, &Path, MlKind),
    ) -> Module {
        let impl_pp = pped_file(&m.impl_file);
        emit(
            self,
            &dir.relative(&m.impl_file),
            &dir.relative(&impl_pp),
            MlKind::Impl,
        );
        let intf_pp = m.intf_file.as_ref().map(|f| {
            let pp = pped_file(f);
            emit(self, &dir.relative(f), &dir.relative(&pp), MlKind::Intf);
            pp
        });
        Module {
            name: m.name.clone(),
            impl_file: impl_pp,
            intf_file: intf_pp,
            obj_name: m.obj_name.clone(),
        }
    }

    fn metaquot_prog(&self) -> Result<Path, RulesError> {
        let pkg = self
            .lib_db
            .findlib()
            .find("ppx_tools.metaquot")
            .map_err(|_| RulesError::MissingLibrary {
                name: "ppx_tools.metaquot".to_string(),
            })?;
        Ok(Path::absolute(pkg.dir.join("ppx_metaquot")))
    }

    /// The driver for a plugin set, built on first use and shared after.
    pub(crate) fn get_ppx_driver(&mut self, pps: &[String]) -> Result<PpxDriver, RulesError> {
        let mut sorted: Vec<String> = pps.to_vec();
        sorted.sort();
        sorted.dedup();
        let key = sorted.join("+");
        if let Some(driver) = self.ppx_drivers.get(&key) {
            return Ok(driver.clone());
        }
        debug!(key = %key, "building preprocessor driver");
        let driver = self.build_ppx_driver(&key, &sorted)?;
        self.ppx_drivers.insert(key, driver.clone());
        Ok(driver)
    }

    /// Link a driver executable from the closure of the driver core plus
    /// the plugins, with the runner library forced to the end.
    fn build_ppx_driver(&mut self, key: &str, pps: &[String]) -> Result<PpxDriver, RulesError> {
        let exe = self.context.build_path(format!(".ppx/{key}/ppx.exe"));

        let mut names = vec!["ppx_driver".to_string()];
        names.extend(pps.iter().cloned());
        let closure = self.lib_db.static_closure(&names)?;
        let runner_closure = self.lib_db.static_closure(&["ppx_driver_runner".to_string()])?;
        let mut libs: Vec<ResolvedLib> = closure
            .into_iter()
            .filter(|l| l.best_name() != "ppx_driver_runner")
            .collect();
        for lib in runner_closure {
            if !libs.iter().any(|l| l.best_name() == lib.best_name()) {
                libs.push(lib);
            }
        }

        let mode = if self.context.ocamlopt.is_some() {
            Mode::Native
        } else {
            Mode::Byte
        };
        let compiler = self
            .context
            .compiler(mode)
            .unwrap_or_else(|| Path::absolute(self.context.ocamlc.clone()));

        let mut args = vec![
            ArgSpec::a("-o"),
            ArgSpec::Target(exe.clone()),
            ArgSpec::a("-linkall"),
            ArgSpec::a("-g"),
        ];
        for lib in &libs {
            args.push(ArgSpec::S(vec![
                ArgSpec::a("-I"),
                ArgSpec::Path(lib.include_dir()),
            ]));
            for archive in lib.archive_paths(mode) {
                if lib.is_internal() {
                    args.push(ArgSpec::Dep(archive));
                } else {
                    args.push(ArgSpec::Path(archive));
                }
            }
        }
        self.add_rule(run::<()>(compiler, args));

        Ok(PpxDriver { exe, libs })
    }
}

/// Flags a driver invocation needs beyond the user's, derived from
/// well-known plugin identities in the closed library set.
pub(crate) fn specific_args_for_pps(
    ctx: &Context,
    libs: &[ResolvedLib],
    libname: Option<&str>,
    dir: &Path,
) -> Vec<ArgSpec> {
    let mut uses_here = false;
    let mut uses_libname_cookie = false;
    let mut uses_inline_test = false;
    let mut uses_bench = false;
    for lib in libs {
        match lib.best_name() {
            "ppx_here" | "ppx_assert" => uses_here = true,
            "ppx_inline_test.libname" => uses_libname_cookie = true,
            "ppx_inline_test" | "ppx_expect" => uses_inline_test = true,
            "ppx_bench" => uses_bench = true,
            _ => {}
        }
    }

    let mut args = Vec::new();
    if uses_here {
        args.push(ArgSpec::a("-dirname"));
        args.push(ArgSpec::a(dir.drop_build_context().to_path_string()));
    }
    if uses_libname_cookie || uses_inline_test || uses_bench {
        if let Some(libname) = libname {
            args.push(ArgSpec::a("-inline-test-lib"));
            args.push(ArgSpec::a(libname));
        }
    }
    if ctx.drop_inline_tests {
        if uses_inline_test {
            args.push(ArgSpec::a("-inline-test-drop-with-deadcode"));
        }
        if uses_bench {
            args.push(ArgSpec::a("-bench-drop-with-deadcode"));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pp_infix_precedes_the_extension() {
        assert_eq!(pped_file("foo.ml"), "foo.pp.ml");
        assert_eq!(pped_file("foo.mli"), "foo.pp.mli");
    }
}
