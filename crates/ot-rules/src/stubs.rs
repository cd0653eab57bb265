//! C/C++ stub pipeline
//!
//! Stub objects are compiled through the bytecode compiler acting as a C
//! driver (flags travel behind `-ccopt`), or through the detected C++
//! compiler directly. The stub archiver then produces the static archive
//! and the dynamic library in a single rule, since the executor keys
//! parallelism on output paths and the archiver writes both at once.

use ot_build::{dyn_paths, glob_to_regex, paths, paths_glob, run, run_in, ArgSpec, Build};
use ot_path::Path;

use crate::lib_db::ResolvedLib;
use crate::stanza::Library;
use crate::super_context::SuperContext;

type StubInput = (Vec<String>, Vec<ResolvedLib>);

impl SuperContext {
    pub(crate) fn stub_rules(
        &mut self,
        dir: &Path,
        lib: &Library,
        requires: &Build<(), Vec<ResolvedLib>>,
    ) {
        let mut objects: Vec<Path> = Vec::new();

        for name in &lib.c_names {
            let src = dir.relative(&format!("{name}.c"));
            let obj = dir.relative(&format!("{name}{}", self.context.ext_obj));
            objects.push(obj.clone());

            let b = self.stub_inputs(dir, requires, &lib.c_flags, &src);
            let mut args: Vec<ArgSpec> = Vec::new();
            args.push(ArgSpec::dyn_of::<StubInput, _>(|input| {
                let (flags, libs) = input;
                let mut rendered: Vec<String> = flags
                    .iter()
                    .flat_map(|f| ["-ccopt".to_string(), f.clone()])
                    .collect();
                for lib in libs {
                    rendered.push("-ccopt".to_string());
                    rendered.push(format!("-I{}", lib.include_dir().to_path_string()));
                }
                ArgSpec::As(rendered)
            }));
            args.push(ArgSpec::a("-g"));
            args.push(ArgSpec::a("-c"));
            args.push(ArgSpec::Dep(src));
            let compiler = Path::absolute(self.context.ocamlc.clone());
            self.add_rule(b.then(run_in(compiler, args, dir.clone(), vec![obj])));
        }

        for name in &lib.cxx_names {
            let src = dir.relative(&format!("{name}.cpp"));
            let obj = dir.relative(&format!("{name}{}", self.context.ext_obj));
            objects.push(obj.clone());

            let (cxx, base_args) = self.context.cxx_compiler();
            let b = self.stub_inputs(dir, requires, &lib.cxx_flags, &src);
            let mut args: Vec<ArgSpec> = vec![ArgSpec::As(base_args)];
            // The C driver knows where the runtime headers live; the C++
            // compiler has to be told.
            args.push(ArgSpec::a("-I"));
            args.push(ArgSpec::Path(Path::absolute(
                self.context.stdlib_dir.clone(),
            )));
            args.push(ArgSpec::dyn_of::<StubInput, _>(|input| {
                let (flags, libs) = input;
                let mut rendered = flags.clone();
                for lib in libs {
                    rendered.push(format!("-I{}", lib.include_dir().to_path_string()));
                }
                ArgSpec::As(rendered)
            }));
            args.push(ArgSpec::a("-o"));
            args.push(ArgSpec::Target(obj));
            args.push(ArgSpec::a("-c"));
            args.push(ArgSpec::Dep(src));
            self.add_rule(b.then(run(Path::absolute(cxx), args)));
        }

        // One rule, two outputs: static archive and dynamic library.
        if lib.self_build_stubs_archive.is_none() && !objects.is_empty() {
            let base = lib.stubs_base();
            let static_archive =
                dir.relative(&format!("lib{base}{}", self.context.ext_lib));
            let dynamic_library =
                dir.relative(&format!("dll{base}{}", self.context.ext_dll));
            let archiver = Path::absolute(self.context.ocamlmklib.clone());
            let args = vec![
                ArgSpec::a("-g"),
                ArgSpec::a("-o"),
                ArgSpec::a(base),
                ArgSpec::Deps(objects),
            ];
            self.add_rule(run_in::<()>(
                archiver,
                args,
                dir.clone(),
                vec![static_archive, dynamic_library],
            ));
        }
    }

    /// Shared dependency plumbing of a stub compilation: the source, every
    /// header in the directory, the closure's exposed headers, and the
    /// flag set lifted through the graph.
    fn stub_inputs(
        &self,
        dir: &Path,
        requires: &Build<(), Vec<ResolvedLib>>,
        flags: &crate::ordered_set::OrderedSet,
        src: &Path,
    ) -> Build<(), StubInput> {
        let headers = glob_to_regex("*.h").expect("static glob");
        flags
            .expand(dir, Vec::new())
            .fanout(requires.clone())
            .then(paths(vec![src.clone()]))
            .then(paths_glob(dir.clone(), headers))
            .then(dyn_paths(ot_build::arr(|input: StubInput| {
                let (_, libs) = &input;
                libs.iter().flat_map(|l| l.header_paths()).collect::<Vec<Path>>()
            })))
    }
}
