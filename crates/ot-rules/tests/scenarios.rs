//! End-to-end scenarios: full stanza sets through `gen_rules`, asserting
//! on the realized rule graph and on evaluated actions.

use std::collections::BTreeSet;
use std::sync::Arc;

use ot_build::{Action, MemEnv, Rule};
use ot_findlib::{Findlib, Package};
use ot_rules::{
    gen_rules, Context, Library, OrderedSet, PackageDef, Preprocess, PreprocessMap, Select,
    SelectChoice, SrcDir, Stanza, SuperContext,
};

fn ctx() -> Arc<Context> {
    Arc::new(Context::for_tests())
}

fn target_strings(rules: &[Rule]) -> BTreeSet<String> {
    rules
        .iter()
        .flat_map(|r| r.all_targets().into_iter().map(|t| t.to_path_string()))
        .collect()
}

fn find_rule<'a>(rules: &'a [Rule], target: &str) -> &'a Rule {
    rules
        .iter()
        .find(|r| {
            r.all_targets()
                .iter()
                .any(|t| t.to_path_string() == target)
        })
        .unwrap_or_else(|| panic!("no rule produces {target}"))
}

#[test]
fn s1_single_module_library_both_modes() {
    let mut lib = Library::new("foo");
    lib.wrapped = false;
    let dirs = vec![SrcDir::new("src")
        .with_files(&["foo.ml"])
        .with_stanza(Stanza::Library(lib))];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();
    let targets = target_strings(&rules);

    for expected in [
        "_build/default/src/.foo.impl.ocamldep-output",
        "_build/default/src/.foo.intf.ocamldep-output",
        "_build/default/src/foo.depends.impl.sexp",
        "_build/default/src/foo.depends.intf.sexp",
        "_build/default/src/foo.cmi",
        "_build/default/src/foo.cmo",
        "_build/default/src/foo.cmx",
        "_build/default/src/foo.o",
        "_build/default/src/foo.requires.sexp",
        "_build/default/src/foo.runtime-deps.sexp",
        "_build/default/src/foo.cma",
        "_build/default/src/foo.cmxa",
        "_build/default/src/foo.a",
        "_build/default/src/foo.cmxs",
        "_build/default/src/.foo.cmi-all",
        "_build/default/src/.foo.cmo-all",
        "_build/default/src/.foo.cmx-all",
    ] {
        assert!(targets.contains(expected), "missing target {expected}");
    }

    // Property: each path is the target of at most one rule.
    let mut seen = BTreeSet::new();
    for rule in &rules {
        for t in rule.all_targets() {
            assert!(seen.insert(t.clone()), "duplicate target {t}");
        }
    }
}

#[test]
fn s2_wrapped_library_with_alias() {
    let lib = Library::new("mylib");
    let dirs = vec![SrcDir::new("src")
        .with_files(&["mylib.ml", "a.ml", "b.ml", "b.mli"])
        .with_stanza(Stanza::Library(lib))];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();
    let targets = target_strings(&rules);

    // Non-main modules are renamed, the main module is not.
    assert!(targets.contains("_build/default/src/mylib__A.cmo"));
    assert!(targets.contains("_build/default/src/mylib__B.cmo"));
    assert!(targets.contains("_build/default/src/mylib.cmo"));

    // The alias module body re-exports each renamed module.
    let alias_rule = find_rule(&rules, "_build/default/src/mylib__.ml-gen");
    let action = alias_rule
        .eval_action(&mut MemEnv::new())
        .unwrap()
        .expect("alias write action");
    match action {
        Action::WriteFile { contents, .. } => {
            assert_eq!(contents, "module A = Mylib__A\nmodule B = Mylib__B\n");
        }
        other => panic!("unexpected action {other:?}"),
    }

    // Real modules open the alias.
    let compile_a = find_rule(&rules, "_build/default/src/mylib__A.cmo");
    let mut env = MemEnv::new();
    seed_requires(&mut env, "src", "mylib", &[]);
    seed_dep_maps(
        &mut env,
        "src",
        "mylib",
        &[("Mylib__", &[]), ("A", &[]), ("B", &[])],
    );
    let action = compile_a.eval_action(&mut env).unwrap().expect("run action");
    match action {
        Action::Run { args, .. } => {
            let joined = args.join(" ");
            assert!(joined.contains("-open Mylib__"), "args: {joined}");
            assert!(joined.contains("-no-alias-deps"), "args: {joined}");
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn s3_optional_library_with_missing_dep() {
    let mut lib = Library::new("opt");
    lib.optional = true;
    lib.libraries.push(ot_rules::LibDep::direct("nonexistent"));
    let dirs = vec![SrcDir::new("opt")
        .with_files(&["opt.ml"])
        .with_stanza(Stanza::Library(lib))];

    let sctx = SuperContext::new(ctx(), Findlib::empty(), Vec::new(), dirs);
    // Filtered from the installable set.
    assert!(sctx
        .internal_libs_without_non_installable_optional_ones()
        .is_empty());

    // Rule generation still succeeds; realizing the closure fails.
    let rules = sctx.gen().unwrap();
    let closure_rule = find_rule(&rules, "_build/default/opt/opt.requires.sexp");
    assert!(closure_rule.has_deferred_failure());
    let err = closure_rule.eval_action(&mut MemEnv::new()).unwrap_err();
    assert!(err.to_string().contains("nonexistent"), "got {err}");
}

#[test]
fn s4_shared_preprocessor_driver() {
    let findlib = Findlib::from_packages(vec![
        Package::new("ppx_driver", "/opt/lib/ppx_driver"),
        Package::new("ppx_driver_runner", "/opt/lib/ppx_driver_runner"),
        Package::new("ppx_x", "/opt/lib/ppx_x"),
        Package::new("ppx_y", "/opt/lib/ppx_y"),
    ]);
    let mut lib_a = Library::new("a");
    lib_a.wrapped = false;
    lib_a.preprocess = PreprocessMap::pps(&["ppx_x", "ppx_y"]);
    let mut lib_b = Library::new("b");
    lib_b.wrapped = false;
    // Same plugin set in a different declaration order.
    lib_b.preprocess = PreprocessMap::pps(&["ppx_y", "ppx_x"]);

    let dirs = vec![
        SrcDir::new("a")
            .with_files(&["a.ml"])
            .with_stanza(Stanza::Library(lib_a)),
        SrcDir::new("b")
            .with_files(&["b.ml"])
            .with_stanza(Stanza::Library(lib_b)),
    ];
    let rules = gen_rules(ctx(), findlib, Vec::new(), dirs).unwrap();

    let driver_exe = "_build/default/.ppx/ppx_x+ppx_y/ppx.exe";
    let driver_rules: Vec<_> = rules
        .iter()
        .filter(|r| {
            r.all_targets()
                .iter()
                .any(|t| t.to_path_string() == driver_exe)
        })
        .collect();
    assert_eq!(driver_rules.len(), 1, "exactly one driver rule");

    // Both preprocessed-module rules invoke the same driver.
    for pp in ["_build/default/a/a.pp.ml", "_build/default/b/b.pp.ml"] {
        let rule = find_rule(&rules, pp);
        assert!(
            rule.inputs
                .iter()
                .any(|p| p.to_path_string() == driver_exe),
            "{pp} does not depend on the shared driver"
        );
    }
}

#[test]
fn s5_select_resolution() {
    let findlib = Findlib::from_packages(vec![Package::new("unix", "/opt/lib/unix")]);
    let mut lib = Library::new("sel");
    lib.wrapped = false;
    lib.modules = OrderedSet::Literal(Vec::new());
    lib.libraries.push(ot_rules::LibDep::Select(Select {
        result_file: "backend.ml".to_string(),
        choices: vec![
            SelectChoice {
                required: BTreeSet::from(["unix".to_string()]),
                forbidden: BTreeSet::new(),
                file: "unix_impl.ml".to_string(),
            },
            SelectChoice {
                required: BTreeSet::new(),
                forbidden: BTreeSet::new(),
                file: "stub_impl.ml".to_string(),
            },
        ],
    }));
    let dirs = vec![SrcDir::new("src")
        .with_files(&["unix_impl.ml", "stub_impl.ml"])
        .with_stanza(Stanza::Library(lib))];
    let rules = gen_rules(ctx(), findlib, Vec::new(), dirs).unwrap();

    // The chosen alternative is materialized by a copy rule.
    let copy_rule = find_rule(&rules, "_build/default/src/backend.ml");
    assert!(copy_rule
        .inputs
        .iter()
        .any(|p| p.to_path_string() == "_build/default/src/unix_impl.ml"));

    // The closure includes the select's package.
    let closure_rule = find_rule(&rules, "_build/default/src/sel.requires.sexp");
    let mut env = MemEnv::new();
    assert!(closure_rule.eval_action(&mut env).unwrap().is_none());
    let stored = env
        .files
        .iter()
        .find(|(p, _)| p.to_path_string() == "_build/default/src/sel.requires.sexp")
        .map(|(_, contents)| contents.clone())
        .expect("closure persisted");
    assert_eq!(stored, "(unix)\n");
}

#[test]
fn s6_lexer_generator_rewrites_line_directives() {
    let dirs = vec![SrcDir::new("src")
        .with_files(&["lex1.mll"])
        .with_stanza(Stanza::Ocamllex(ot_rules::OcamllexStanza {
            names: vec!["lex1".to_string()],
        }))];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();
    let rule = find_rule(&rules, "_build/default/src/lex1.ml");
    let action = rule
        .eval_action(&mut MemEnv::new())
        .unwrap()
        .expect("generator action");
    match action {
        Action::Progn(steps) => {
            assert!(matches!(&steps[0], Action::Run { .. }));
            match &steps[1] {
                Action::Bash { script } => {
                    assert!(
                        script.contains("\"_build/default/src/lex1.ml\""),
                        "rewrite must reference the canonical build path: {script}"
                    );
                }
                other => panic!("expected rewrite step, got {other:?}"),
            }
            assert!(matches!(steps.last(), Some(Action::RemoveFile { .. })));
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn closure_files_are_stable_across_runs() {
    let findlib = Findlib::from_packages(vec![
        Package::new("unix", "/opt/lib/unix"),
        Package::new("str", "/opt/lib/str").with_requires(vec!["unix"]),
    ]);
    let build = |findlib: Findlib| {
        let mut lib = Library::new("foo");
        lib.wrapped = false;
        lib.libraries.push(ot_rules::LibDep::direct("str"));
        let dirs = vec![SrcDir::new("src")
            .with_files(&["foo.ml"])
            .with_stanza(Stanza::Library(lib))];
        let rules = gen_rules(ctx(), findlib, Vec::new(), dirs).unwrap();
        let rule_index = rules
            .iter()
            .position(|r| {
                r.all_targets()
                    .iter()
                    .any(|t| t.to_path_string() == "_build/default/src/foo.requires.sexp")
            })
            .unwrap();
        let mut env = MemEnv::new();
        rules[rule_index].eval_action(&mut env).unwrap();
        env.files
            .values()
            .next()
            .cloned()
            .expect("stored closure")
    };
    let first = build(findlib.clone());
    let second = build(findlib);
    assert_eq!(first, second);
    assert_eq!(first, "(unix str)\n");
}

#[test]
fn install_manifest_for_a_package() {
    let mut lib = Library::new("foo");
    lib.wrapped = false;
    let dirs = vec![SrcDir::new("src")
        .with_files(&["foo.ml", "README.md"])
        .with_stanza(Stanza::Library(lib))];
    let mut pkg = PackageDef::new("foo", "src");
    pkg.version = Some("0.1".to_string());
    let rules = gen_rules(ctx(), Findlib::empty(), vec![pkg], dirs).unwrap();

    let manifest = find_rule(&rules, "_build/default/src/foo.install");
    let action = manifest
        .eval_action(&mut MemEnv::new())
        .unwrap()
        .expect("manifest write");
    match action {
        Action::WriteFile { contents, .. } => {
            assert!(contents.contains("\"_build/default/src/foo.cma\""));
            assert!(contents.contains("{\"META\"}"));
            assert!(contents.contains("doc: ["));
            assert!(contents.contains("README.md"));
        }
        other => panic!("unexpected action {other:?}"),
    }

    // Default context: the manifest is copied back into the source tree.
    let copy_rule = find_rule(&rules, "src/foo.install");
    assert!(copy_rule
        .inputs
        .iter()
        .any(|p| p.to_path_string() == "_build/default/src/foo.install"));

    // META synthesis reads the persisted closure.
    let meta_rule = find_rule(&rules, "_build/default/src/META.foo");
    let mut env = MemEnv::new();
    seed_requires(&mut env, "src", "foo", &[]);
    let action = meta_rule.eval_action(&mut env).unwrap().expect("meta write");
    match action {
        Action::WriteFile { contents, .. } => {
            assert!(contents.contains("version = \"0.1\""));
            assert!(contents.contains("archive(byte) = \"foo.cma\""));
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn executables_are_linked_per_mode() {
    let mut exes = ot_rules::Executables::new(vec!["tool"]);
    exes.libraries.push(ot_rules::LibDep::direct("unix"));
    let findlib = Findlib::from_packages(vec![Package::new("unix", "/opt/lib/unix")
        .with_archives(vec!["unix.cma"], vec!["unix.cmxa"])]);
    let dirs = vec![SrcDir::new("bin")
        .with_files(&["tool.ml", "helper.ml"])
        .with_stanza(Stanza::Executables(exes))];
    let rules = gen_rules(ctx(), findlib, Vec::new(), dirs).unwrap();
    let targets = target_strings(&rules);
    assert!(targets.contains("_build/default/bin/tool.bc"));
    assert!(targets.contains("_build/default/bin/tool.exe"));

    let exe = find_rule(&rules, "_build/default/bin/tool.exe");
    let mut env = MemEnv::new();
    seed_requires(&mut env, "bin", "tool", &["unix"]);
    seed_dep_maps(&mut env, "bin", "tool", &[("Tool", &[]), ("Helper", &[])]);
    let action = exe.eval_action(&mut env).unwrap().expect("link action");
    match action {
        Action::Run { args, .. } => {
            let joined = args.join(" ");
            assert!(joined.contains("/opt/lib/unix/unix.cmxa"), "args: {joined}");
            assert!(joined.contains("tool.cmx"), "args: {joined}");
        }
        other => panic!("unexpected action {other:?}"),
    }
    // The ordered closure the link consumes is a discovered input.
    assert!(env
        .dynamic_inputs
        .iter()
        .any(|p| p.to_path_string() == "_build/default/bin/tool.cmx"));
}

#[test]
fn cross_module_deps_become_compile_inputs() {
    let mut lib = Library::new("pair");
    lib.wrapped = false;
    let dirs = vec![SrcDir::new("src")
        .with_files(&["foo.ml", "bar.ml"])
        .with_stanza(Stanza::Library(lib))];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();

    let seed = |env: &mut MemEnv| {
        seed_requires(env, "src", "pair", &[]);
        seed_dep_maps(env, "src", "pair", &[("Bar", &["Foo"]), ("Foo", &[])]);
    };

    // Bytecode: Bar needs Foo's interface artifact.
    let compile_bar = find_rule(&rules, "_build/default/src/bar.cmo");
    let mut env = MemEnv::new();
    seed(&mut env);
    compile_bar.eval_action(&mut env).unwrap();
    assert!(
        env.dynamic_inputs
            .iter()
            .any(|p| p.to_path_string() == "_build/default/src/foo.cmi"),
        "bar.cmo must depend on foo.cmi, got {:?}",
        env.dynamic_inputs
    );

    // Native: interface plus native artifact of the dependency.
    let compile_bar_native = find_rule(&rules, "_build/default/src/bar.cmx");
    let mut env = MemEnv::new();
    seed(&mut env);
    compile_bar_native.eval_action(&mut env).unwrap();
    for needed in ["_build/default/src/foo.cmi", "_build/default/src/foo.cmx"] {
        assert!(
            env.dynamic_inputs
                .iter()
                .any(|p| p.to_path_string() == needed),
            "bar.cmx must depend on {needed}"
        );
    }

    // A module with no deps pulls nothing extra in.
    let compile_foo = find_rule(&rules, "_build/default/src/foo.cmo");
    let mut env = MemEnv::new();
    seed(&mut env);
    compile_foo.eval_action(&mut env).unwrap();
    assert!(env.dynamic_inputs.is_empty(), "got {:?}", env.dynamic_inputs);
}

#[test]
fn stub_compiles_depend_on_closure_headers() {
    let mut base = Library::new("base");
    base.wrapped = false;
    base.install_c_headers.push("base_api".to_string());
    let mut wrap = Library::new("wrap");
    wrap.wrapped = false;
    wrap.c_names.push("wrap_impl".to_string());
    wrap.libraries.push(ot_rules::LibDep::direct("base"));

    let dirs = vec![
        SrcDir::new("base")
            .with_files(&["base.ml", "base_api.h"])
            .with_stanza(Stanza::Library(base)),
        SrcDir::new("wrap")
            .with_files(&["wrap.ml", "wrap_impl.c"])
            .with_stanza(Stanza::Library(wrap)),
    ];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();

    let stub = find_rule(&rules, "_build/default/wrap/wrap_impl.o");
    let mut env = MemEnv::new();
    seed_requires(&mut env, "wrap", "wrap", &["base"]);
    stub.eval_action(&mut env).unwrap();
    assert!(
        env.dynamic_inputs
            .iter()
            .any(|p| p.to_path_string() == "_build/default/base/base_api.h"),
        "stub object must depend on the closure's exposed headers, got {:?}",
        env.dynamic_inputs
    );
}

#[test]
fn missing_executable_module_is_fatal() {
    let exes = ot_rules::Executables::new(vec!["ghost"]);
    let dirs = vec![SrcDir::new("bin")
        .with_files(&["tool.ml"])
        .with_stanza(Stanza::Executables(exes))];
    let err = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap_err();
    assert!(err.to_string().contains("ghost"), "got {err}");
}

#[test]
fn command_preprocessing_replaces_module_files() {
    let mut lib = Library::new("p");
    lib.wrapped = false;
    lib.preprocess = PreprocessMap::single(Preprocess::Command("cat".to_string()));
    let dirs = vec![SrcDir::new("src")
        .with_files(&["p.ml"])
        .with_stanza(Stanza::Library(lib))];
    let rules = gen_rules(ctx(), Findlib::empty(), Vec::new(), dirs).unwrap();
    // The scan consumes the preprocessed file, not the original.
    let scan = find_rule(&rules, "_build/default/src/.p.impl.ocamldep-output");
    assert!(scan
        .inputs
        .iter()
        .any(|p| p.to_path_string() == "_build/default/src/p.pp.ml"));
}

// Helpers seeding persisted values into an evaluation environment.

fn seed_requires(env: &mut MemEnv, dir: &str, item: &str, names: &[&str]) {
    env.files.insert(
        ot_path::Path::build("default", format!("{dir}/{item}.requires.sexp")),
        format!("({})\n", names.join(" ")),
    );
}

fn seed_dep_maps(env: &mut MemEnv, dir: &str, item: &str, entries: &[(&str, &[&str])]) {
    let mut text = String::new();
    for (module, deps) in entries {
        text.push_str(&format!("({module} ({}))\n", deps.join(" ")));
    }
    for kind in ["impl", "intf"] {
        env.files.insert(
            ot_path::Path::build("default", format!("{dir}/{item}.depends.{kind}.sexp")),
            text.clone(),
        );
    }
}
