//! Typed stanzas
//!
//! A stanza is one top-level declaration of a per-directory build
//! description. Surface syntax is the concern of an external parser; the
//! rule generator consumes the typed forms defined here. Constructors fill
//! in the defaults a bare declaration would get.

use std::collections::{BTreeMap, BTreeSet};

pub use ot_findlib::{Mode, ModeDict};

use crate::lib_db::LibDep;
use crate::ordered_set::OrderedSet;

/// The two halves of a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MlKind {
    Impl,
    Intf,
}

impl MlKind {
    pub fn all() -> [MlKind; 2] {
        [MlKind::Impl, MlKind::Intf]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MlKind::Impl => "impl",
            MlKind::Intf => "intf",
        }
    }

    pub fn source_ext(self) -> &'static str {
        match self {
            MlKind::Impl => ".ml",
            MlKind::Intf => ".mli",
        }
    }

    /// Scanner/compiler flag forcing a file to be treated as this kind.
    pub fn force_flag(self) -> &'static str {
        match self {
            MlKind::Impl => "-impl",
            MlKind::Intf => "-intf",
        }
    }
}

/// Compiled-module artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CmKind {
    Cmi,
    Cmo,
    Cmx,
}

impl CmKind {
    pub fn all() -> [CmKind; 3] {
        [CmKind::Cmi, CmKind::Cmo, CmKind::Cmx]
    }

    pub fn ext(self) -> &'static str {
        match self {
            CmKind::Cmi => ".cmi",
            CmKind::Cmo => ".cmo",
            CmKind::Cmx => ".cmx",
        }
    }

    /// Which compiler produces this artifact.
    pub fn mode(self) -> Mode {
        match self {
            CmKind::Cmi | CmKind::Cmo => Mode::Byte,
            CmKind::Cmx => Mode::Native,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibKind {
    Normal,
    PpxRewriter,
    PpxTypeConvPlugin,
}

impl LibKind {
    /// Rewriter libraries are archived with `-linkall` so plugin registration
    /// side effects survive linking.
    pub fn linkall(self) -> bool {
        matches!(self, LibKind::PpxRewriter | LibKind::PpxTypeConvPlugin)
    }
}

/// How one module is preprocessed before scanning and compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Preprocess {
    #[default]
    No,
    /// The metaquotation rewriter shipped with the compiler tooling.
    Metaquot,
    /// Ad-hoc shell command; receives the source file, stdout is captured.
    Command(String),
    /// A driver built from the given plugin set.
    Pps { pps: Vec<String>, flags: Vec<String> },
}

/// Per-module preprocessing choices with a default for unkeyed modules.
#[derive(Debug, Clone, Default)]
pub struct PreprocessMap {
    pub default: Preprocess,
    pub per_module: BTreeMap<String, Preprocess>,
}

impl PreprocessMap {
    pub fn single(choice: Preprocess) -> PreprocessMap {
        PreprocessMap {
            default: choice,
            per_module: BTreeMap::new(),
        }
    }

    pub fn pps(pps: &[&str]) -> PreprocessMap {
        PreprocessMap::single(Preprocess::Pps {
            pps: pps.iter().map(|s| s.to_string()).collect(),
            flags: Vec::new(),
        })
    }

    pub fn for_module(&self, name: &str) -> &Preprocess {
        self.per_module.get(name).unwrap_or(&self.default)
    }
}

/// Dependency configuration of user rules and preprocessors.
#[derive(Debug, Clone)]
pub enum DepConf {
    File(String),
    GlobFiles(String),
    FilesRecursivelyIn(String),
}

impl DepConf {
    pub fn is_plain_file(&self) -> bool {
        matches!(self, DepConf::File(_))
    }
}

#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    pub public_name: Option<String>,
    pub synopsis: Option<String>,
    pub wrapped: bool,
    pub modes: BTreeSet<Mode>,
    pub kind: LibKind,
    pub optional: bool,
    pub libraries: Vec<LibDep>,
    pub ppx_runtime_libraries: Vec<LibDep>,
    pub preprocess: PreprocessMap,
    pub preprocessor_deps: Vec<DepConf>,
    pub virtual_deps: Vec<String>,
    pub modules: OrderedSet,
    pub flags: OrderedSet,
    pub ocamlc_flags: OrderedSet,
    pub ocamlopt_flags: OrderedSet,
    pub link_flags: OrderedSet,
    pub library_flags: OrderedSet,
    pub c_flags: OrderedSet,
    pub cxx_flags: OrderedSet,
    pub c_library_flags: OrderedSet,
    pub c_names: Vec<String>,
    pub cxx_names: Vec<String>,
    pub install_c_headers: Vec<String>,
    pub self_build_stubs_archive: Option<String>,
    pub js_artifacts: Vec<String>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Library {
        Library {
            name: name.into(),
            public_name: None,
            synopsis: None,
            wrapped: true,
            modes: BTreeSet::from(Mode::all()),
            kind: LibKind::Normal,
            optional: false,
            libraries: Vec::new(),
            ppx_runtime_libraries: Vec::new(),
            preprocess: PreprocessMap::default(),
            preprocessor_deps: Vec::new(),
            virtual_deps: Vec::new(),
            modules: OrderedSet::Standard,
            flags: OrderedSet::Standard,
            ocamlc_flags: OrderedSet::Standard,
            ocamlopt_flags: OrderedSet::Standard,
            link_flags: OrderedSet::Literal(Vec::new()),
            library_flags: OrderedSet::Literal(Vec::new()),
            c_flags: OrderedSet::Standard,
            cxx_flags: OrderedSet::Standard,
            c_library_flags: OrderedSet::Literal(Vec::new()),
            c_names: Vec::new(),
            cxx_names: Vec::new(),
            install_c_headers: Vec::new(),
            self_build_stubs_archive: None,
            js_artifacts: Vec::new(),
        }
    }

    /// Canonical identity: public name if declared, local name otherwise.
    pub fn best_name(&self) -> &str {
        self.public_name.as_deref().unwrap_or(&self.name)
    }

    /// Name of the module a wrapped library exposes.
    pub fn main_module_name(&self) -> String {
        capitalize(&self.name)
    }

    pub fn has_stubs(&self) -> bool {
        !self.c_names.is_empty()
            || !self.cxx_names.is_empty()
            || self.self_build_stubs_archive.is_some()
    }

    /// Base name of the stubs archives: `lib{base}_stubs.a` and
    /// `dll{base}_stubs.so`.
    pub fn stubs_base(&self) -> String {
        let base = self
            .self_build_stubs_archive
            .as_deref()
            .unwrap_or(&self.name);
        format!("{base}_stubs")
    }
}

#[derive(Debug, Clone)]
pub struct Executables {
    pub names: Vec<String>,
    pub package: Option<String>,
    pub libraries: Vec<LibDep>,
    pub preprocess: PreprocessMap,
    pub modules: OrderedSet,
    pub modes: BTreeSet<Mode>,
    pub flags: OrderedSet,
    pub ocamlc_flags: OrderedSet,
    pub ocamlopt_flags: OrderedSet,
    pub link_flags: OrderedSet,
}

impl Executables {
    pub fn new(names: Vec<&str>) -> Executables {
        Executables {
            names: names.into_iter().map(str::to_string).collect(),
            package: None,
            libraries: Vec::new(),
            preprocess: PreprocessMap::default(),
            modules: OrderedSet::Standard,
            modes: BTreeSet::from(Mode::all()),
            flags: OrderedSet::Standard,
            ocamlc_flags: OrderedSet::Standard,
            ocamlopt_flags: OrderedSet::Standard,
            link_flags: OrderedSet::Literal(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UserAction {
    /// Program plus arguments, each subject to variable expansion.
    Run(Vec<String>),
    /// Shell snippet, subject to variable expansion.
    Bash(String),
}

#[derive(Debug, Clone)]
pub struct UserRule {
    pub targets: Vec<String>,
    pub deps: Vec<DepConf>,
    pub action: UserAction,
}

#[derive(Debug, Clone)]
pub struct OcamllexStanza {
    pub names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OcamlyaccStanza {
    pub names: Vec<String>,
}

/// Install-manifest section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Lib,
    Libexec,
    Stublibs,
    Bin,
    Doc,
    Etc,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Lib => "lib",
            Section::Libexec => "libexec",
            Section::Stublibs => "stublibs",
            Section::Bin => "bin",
            Section::Doc => "doc",
            Section::Etc => "etc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallStanza {
    pub section: Section,
    /// `(source file, optional destination name)` pairs.
    pub files: Vec<(String, Option<String>)>,
    pub package: Option<String>,
}

/// Declares a named artifact resolvable through `bin:`-style references.
#[derive(Debug, Clone)]
pub struct Provides {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone)]
pub enum Stanza {
    Library(Library),
    Executables(Executables),
    Rule(UserRule),
    Ocamllex(OcamllexStanza),
    Ocamlyacc(OcamlyaccStanza),
    Install(InstallStanza),
    Provides(Provides),
}

/// Capitalize the first ASCII letter, the module-name convention.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
