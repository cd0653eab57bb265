//! Build-context configuration
//!
//! A context bundles everything the emitters need to know about one
//! compiler installation: tool paths, version, extensions, word size.
//! Detecting these from the environment is the concern of an external
//! component; the rule generator receives the finished record.

use camino::Utf8PathBuf;
use ot_findlib::Mode;
use ot_path::{ContextName, Path};

#[derive(Debug, Clone)]
pub struct Context {
    pub name: ContextName,
    pub ocaml_bin: Utf8PathBuf,
    pub ocaml: Utf8PathBuf,
    pub ocamlc: Utf8PathBuf,
    /// Absent when the installation has no native compiler; native rules
    /// are skipped then.
    pub ocamlopt: Option<Utf8PathBuf>,
    pub ocamldep: Utf8PathBuf,
    pub ocamllex: Utf8PathBuf,
    pub ocamlyacc: Utf8PathBuf,
    pub ocamlmklib: Utf8PathBuf,
    pub ocaml_version: String,
    pub stdlib_dir: Utf8PathBuf,
    /// Full C compiler command line as configured at compiler build time,
    /// e.g. `gcc -O2 -fno-strict-aliasing`.
    pub c_compiler: String,
    pub ext_obj: String,
    pub ext_lib: String,
    pub ext_dll: String,
    pub arch_sixtyfour: bool,
    pub portable_int63: bool,
    /// Pass dead-code-elimination flags to inline-test preprocessors.
    pub drop_inline_tests: bool,
    pub make_prog: String,
}

impl Context {
    /// A plausible context for unit tests: default context, full toolchain
    /// under `/ocaml/bin`.
    pub fn for_tests() -> Context {
        let bin = Utf8PathBuf::from("/ocaml/bin");
        Context {
            name: ContextName::new("default"),
            ocaml: bin.join("ocaml"),
            ocamlc: bin.join("ocamlc"),
            ocamlopt: Some(bin.join("ocamlopt")),
            ocamldep: bin.join("ocamldep"),
            ocamllex: bin.join("ocamllex"),
            ocamlyacc: bin.join("ocamlyacc"),
            ocamlmklib: bin.join("ocamlmklib"),
            ocaml_bin: bin,
            ocaml_version: "4.14.1".to_string(),
            stdlib_dir: Utf8PathBuf::from("/ocaml/lib/ocaml"),
            c_compiler: "gcc -O2 -fno-strict-aliasing".to_string(),
            ext_obj: ".o".to_string(),
            ext_lib: ".a".to_string(),
            ext_dll: ".so".to_string(),
            arch_sixtyfour: true,
            portable_int63: true,
            drop_inline_tests: false,
            make_prog: "make".to_string(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.name.is_default()
    }

    pub fn build_path(&self, rel: impl Into<Utf8PathBuf>) -> Path {
        Path::build(self.name.clone(), rel.into())
    }

    /// Compiler for a code-generation mode, if configured.
    pub fn compiler(&self, mode: Mode) -> Option<Path> {
        match mode {
            Mode::Byte => Some(Path::absolute(self.ocamlc.clone())),
            Mode::Native => self.ocamlopt.clone().map(Path::absolute),
        }
    }

    /// The C++ compiler derived from the C one: first word of the command
    /// line with `-std=` tokens removed from the remainder; `g++` when the
    /// configuration is empty.
    pub fn cxx_compiler(&self) -> (String, Vec<String>) {
        let mut words = self.c_compiler.split_whitespace();
        match words.next() {
            None => ("g++".to_string(), Vec::new()),
            Some(prog) => {
                let args = words
                    .filter(|w| !w.starts_with("-std="))
                    .map(str::to_string)
                    .collect();
                (prog.to_string(), args)
            }
        }
    }

    /// Baseline compiler flags, the `:standard` value of flag sets.
    pub fn standard_ocaml_flags(&self) -> Vec<String> {
        ["-w", "+a-4-9-40-41-42-44-45-48", "-strict-sequence", "-g"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Baseline per-mode compiler flags.
    pub fn standard_mode_flags(&self) -> Vec<String> {
        vec!["-g".to_string()]
    }

    /// Built-in variables available to user actions. `ROOT` is
    /// directory-dependent and handled by the expander.
    pub fn expand_var(&self, name: &str) -> Option<String> {
        let value = match name {
            "CPP" => format!("{} -E", self.c_compiler),
            "PA_CPP" => format!("{} -undef -traditional -x c -E", self.c_compiler),
            "CC" => self.c_compiler.clone(),
            "CXX" => {
                let (prog, args) = self.cxx_compiler();
                std::iter::once(prog).chain(args).collect::<Vec<_>>().join(" ")
            }
            "ocaml_bin" => self.ocaml_bin.to_string(),
            "OCAML" => self.ocaml.to_string(),
            "OCAMLC" => self.ocamlc.to_string(),
            "OCAMLOPT" => self
                .ocamlopt
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "ocamlopt".to_string()),
            "ocaml_version" => self.ocaml_version.clone(),
            "ocaml_where" => self.stdlib_dir.to_string(),
            "ARCH_SIXTYFOUR" => self.arch_sixtyfour.to_string(),
            "PORTABLE_INT63" => self.portable_int63.to_string(),
            "MAKE" => self.make_prog.clone(),
            "-verbose" => String::new(),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cxx_compiler_strips_std_tokens() {
        let mut ctx = Context::for_tests();
        ctx.c_compiler = "gcc -O2 -std=gnu99 -fPIC".to_string();
        let (prog, args) = ctx.cxx_compiler();
        assert_eq!(prog, "gcc");
        assert_eq!(args, vec!["-O2", "-fPIC"]);
    }

    #[test]
    fn cxx_compiler_falls_back_to_gxx() {
        let mut ctx = Context::for_tests();
        ctx.c_compiler = String::new();
        assert_eq!(ctx.cxx_compiler().0, "g++");
    }

    #[test]
    fn builtin_vars() {
        let ctx = Context::for_tests();
        assert_eq!(ctx.expand_var("OCAMLC").unwrap(), "/ocaml/bin/ocamlc");
        assert_eq!(ctx.expand_var("ARCH_SIXTYFOUR").unwrap(), "true");
        assert_eq!(ctx.expand_var("-verbose").unwrap(), "");
        assert_eq!(ctx.expand_var("NOPE"), None);
    }

    #[test]
    fn native_compiler_is_optional() {
        let mut ctx = Context::for_tests();
        ctx.ocamlopt = None;
        assert!(ctx.compiler(Mode::Byte).is_some());
        assert!(ctx.compiler(Mode::Native).is_none());
    }
}
