//! Package-database façade
//!
//! The rule generator resolves external (third-party) library dependencies
//! against an installed package database. Reading the database off disk is
//! someone else's job; this crate receives already-parsed [`Package`]
//! records and answers the queries the rule emitters need: lookup,
//! transitive closure in link order, and the transitive *runtime* closure
//! of a preprocessor-plugin set.

use camino::Utf8PathBuf;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FindlibError {
    #[error("package {name:?} not found")]
    PackageNotFound {
        name: String,
        required_by: Option<String>,
    },
}

/// Code-generation mode of the compiled language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Byte,
    Native,
}

impl Mode {
    pub fn all() -> [Mode; 2] {
        [Mode::Byte, Mode::Native]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Byte => "byte",
            Mode::Native => "native",
        }
    }

    /// Extension of the library archive produced in this mode.
    pub fn archive_ext(self) -> &'static str {
        match self {
            Mode::Byte => ".cma",
            Mode::Native => ".cmxa",
        }
    }

    pub fn select<T>(self, dict: &ModeDict<T>) -> &T {
        match self {
            Mode::Byte => &dict.byte,
            Mode::Native => &dict.native,
        }
    }
}

/// Per-mode pair of values (archives, plugins, flags, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeDict<T> {
    pub byte: T,
    pub native: T,
}

impl<T> ModeDict<T> {
    pub fn new(byte: T, native: T) -> ModeDict<T> {
        ModeDict { byte, native }
    }
}

/// An installed package as read from the external database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Fully qualified name (`foo` or `foo.bar`).
    pub name: String,
    /// Absolute directory the package's files live in.
    pub dir: Utf8PathBuf,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Archive file names per mode, relative to `dir`.
    pub archives: ModeDict<Vec<String>>,
    /// Plugin file names per mode, relative to `dir`.
    pub plugins: ModeDict<Vec<String>>,
    /// Names of packages this one requires, in declaration order.
    pub requires: Vec<String>,
    /// Names of packages needed at runtime by code this package's
    /// preprocessor plugins generate.
    pub ppx_runtime_deps: Vec<String>,
    /// True when the package has a preprocessor entry point.
    pub has_ppx_driver: bool,
}

impl Package {
    /// Minimal record for tests and synthetic databases.
    pub fn new(name: impl Into<String>, dir: impl Into<Utf8PathBuf>) -> Package {
        Package {
            name: name.into(),
            dir: dir.into(),
            version: None,
            description: None,
            archives: ModeDict::default(),
            plugins: ModeDict::default(),
            requires: Vec::new(),
            ppx_runtime_deps: Vec::new(),
            has_ppx_driver: false,
        }
    }

    pub fn with_requires(mut self, requires: Vec<&str>) -> Package {
        self.requires = requires.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_ppx_runtime_deps(mut self, deps: Vec<&str>) -> Package {
        self.ppx_runtime_deps = deps.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_archives(mut self, byte: Vec<&str>, native: Vec<&str>) -> Package {
        self.archives = ModeDict::new(
            byte.into_iter().map(str::to_string).collect(),
            native.into_iter().map(str::to_string).collect(),
        );
        self
    }

    /// Absolute paths of this package's archives for `mode`.
    pub fn archive_paths(&self, mode: Mode) -> Vec<Utf8PathBuf> {
        mode.select(&self.archives)
            .iter()
            .map(|a| self.dir.join(a))
            .collect()
    }
}

/// The package database façade. Cheap to clone; rule closures capture it.
#[derive(Debug, Clone)]
pub struct Findlib {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    packages: IndexMap<String, Package>,
}

impl Findlib {
    pub fn from_packages(packages: Vec<Package>) -> Findlib {
        let packages = packages.into_iter().map(|p| (p.name.clone(), p)).collect();
        Findlib {
            inner: Arc::new(Inner { packages }),
        }
    }

    pub fn empty() -> Findlib {
        Findlib::from_packages(Vec::new())
    }

    pub fn find(&self, name: &str) -> Result<&Package, FindlibError> {
        self.inner
            .packages
            .get(name)
            .ok_or_else(|| FindlibError::PackageNotFound {
                name: name.to_string(),
                required_by: None,
            })
    }

    pub fn mem(&self, name: &str) -> bool {
        self.inner.packages.contains_key(name)
    }

    pub fn all_packages(&self) -> impl Iterator<Item = &Package> {
        self.inner.packages.values()
    }

    /// Transitive closure of `requires`, dependencies first, deduplicated
    /// preserving first occurrence. The order is link order and must be
    /// stable for identical inputs.
    pub fn closure<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a Package>,
    ) -> Result<Vec<Package>, FindlibError> {
        let mut seen: IndexSet<String> = IndexSet::new();
        for pkg in packages {
            self.visit(pkg, &mut seen)?;
        }
        Ok(seen
            .into_iter()
            .map(|name| self.inner.packages[&name].clone())
            .collect())
    }

    fn visit(&self, pkg: &Package, seen: &mut IndexSet<String>) -> Result<(), FindlibError> {
        if seen.contains(&pkg.name) {
            return Ok(());
        }
        for dep in &pkg.requires {
            let dep_pkg =
                self.inner
                    .packages
                    .get(dep)
                    .ok_or_else(|| FindlibError::PackageNotFound {
                        name: dep.clone(),
                        required_by: Some(pkg.name.clone()),
                    })?;
            self.visit(dep_pkg, seen)?;
        }
        seen.insert(pkg.name.clone());
        Ok(())
    }

    /// Transitive *runtime* dependencies of a preprocessor-plugin set: close
    /// the plugins over `requires`, gather their declared runtime deps, and
    /// close that set in turn.
    pub fn closed_ppx_runtime_deps_of<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a Package>,
    ) -> Result<Vec<Package>, FindlibError> {
        let plugin_closure = self.closure(packages)?;
        let mut runtime: Vec<&Package> = Vec::new();
        for pkg in &plugin_closure {
            for dep in &pkg.ppx_runtime_deps {
                let dep_pkg =
                    self.inner
                        .packages
                        .get(dep)
                        .ok_or_else(|| FindlibError::PackageNotFound {
                            name: dep.clone(),
                            required_by: Some(pkg.name.clone()),
                        })?;
                runtime.push(dep_pkg);
            }
        }
        self.closure(runtime)
    }

    /// The META-segmentation root of a qualified package name:
    /// `foo.bar.baz` belongs to `foo`.
    pub fn root_package_name(name: &str) -> &str {
        name.split('.').next().unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Findlib {
        Findlib::from_packages(vec![
            Package::new("str", "/opt/lib/str"),
            Package::new("unix", "/opt/lib/unix"),
            Package::new("re", "/opt/lib/re").with_requires(vec!["str"]),
            Package::new("web", "/opt/lib/web").with_requires(vec!["re", "unix"]),
            Package::new("ppx_x", "/opt/lib/ppx_x").with_ppx_runtime_deps(vec!["rt_x"]),
            Package::new("rt_x", "/opt/lib/rt_x").with_requires(vec!["unix"]),
        ])
    }

    #[test]
    fn find_reports_missing_packages() {
        let err = db().find("nope").unwrap_err();
        assert!(matches!(err, FindlibError::PackageNotFound { name, .. } if name == "nope"));
    }

    #[test]
    fn closure_is_deps_first_and_deduplicated() {
        let db = db();
        let web = db.find("web").unwrap().clone();
        let re = db.find("re").unwrap().clone();
        let names: Vec<_> = db
            .closure([&web, &re])
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["str", "re", "unix", "web"]);
    }

    #[test]
    fn closure_is_stable() {
        let db = db();
        let web = db.find("web").unwrap().clone();
        let a = db.closure([&web]).unwrap();
        let b = db.closure([&web]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ppx_runtime_closure_follows_runtime_edges() {
        let db = db();
        let ppx = db.find("ppx_x").unwrap().clone();
        let names: Vec<_> = db
            .closed_ppx_runtime_deps_of([&ppx])
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["unix", "rt_x"]);
    }

    #[test]
    fn root_package_name_splits_on_dot() {
        assert_eq!(Findlib::root_package_name("foo.bar.baz"), "foo");
        assert_eq!(Findlib::root_package_name("plain"), "plain");
    }
}
