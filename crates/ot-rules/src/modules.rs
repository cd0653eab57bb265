//! Module discovery
//!
//! From a directory's flat file-name set, infer the set of modules and
//! their implementation/interface pairs. Object names start out as the raw
//! file stem; library setup rewrites them for wrapped libraries.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use crate::error::RulesError;
use crate::ordered_set::OrderedSet;
use crate::stanza::capitalize;

/// One compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Capitalized stem of the implementation file.
    pub name: String,
    pub impl_file: String,
    pub intf_file: Option<String>,
    /// Base name of compiled artifacts. Raw stem, or `{library}__{Name}`
    /// for non-main modules of a wrapped library.
    pub obj_name: String,
}

impl Module {
    /// Source file for the given half, if present.
    pub fn file(&self, intf: bool) -> Option<&str> {
        if intf {
            self.intf_file.as_deref()
        } else {
            Some(&self.impl_file)
        }
    }
}

/// Modules keyed by name; iteration order is discovery order (sorted) or
/// the user's declaration order after [`parse_modules`].
pub type ModuleMap = IndexMap<String, Module>;

/// Stem of a file name up to the first dot, so preprocessed names like
/// `foo.pp.ml` still map to module `Foo`.
fn module_stem(file: &str) -> &str {
    file.split('.').next().unwrap_or(file)
}

/// Capitalized module name of a source file.
pub fn module_name_of_file(file: &str) -> String {
    capitalize(module_stem(file))
}

fn group_by_stem(
    dir: &str,
    files: impl Iterator<Item = String>,
) -> Result<BTreeMap<String, String>, RulesError> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for file in files {
        let name = module_name_of_file(&file);
        if let Some(existing) = map.get(&name) {
            return Err(RulesError::DuplicateModule {
                dir: dir.to_string(),
                module: name,
                file_a: existing.clone(),
                file_b: file,
            });
        }
        map.insert(name, file);
    }
    Ok(map)
}

/// Infer the module set of a directory from its file names.
pub fn guess_modules(dir: &str, files: &BTreeSet<String>) -> Result<ModuleMap, RulesError> {
    let impls = group_by_stem(
        dir,
        files.iter().filter(|f| f.ends_with(".ml")).cloned(),
    )?;
    let intfs = group_by_stem(
        dir,
        files.iter().filter(|f| f.ends_with(".mli")).cloned(),
    )?;

    for name in intfs.keys() {
        if !impls.contains_key(name) {
            return Err(RulesError::IntfWithoutImpl {
                dir: dir.to_string(),
                module: name.clone(),
            });
        }
    }

    let mut modules = ModuleMap::new();
    for (name, impl_file) in impls {
        let obj_name = module_stem(&impl_file).to_string();
        let intf_file = intfs.get(&name).cloned();
        modules.insert(
            name.clone(),
            Module {
                name,
                impl_file,
                intf_file,
                obj_name,
            },
        );
    }
    Ok(modules)
}

/// Filter discovered modules against the user's `modules` declaration,
/// with the discovered set as the standard baseline.
pub fn parse_modules(
    dir: &str,
    declared: &OrderedSet,
    discovered: &ModuleMap,
) -> Result<ModuleMap, RulesError> {
    let standard: Vec<String> = discovered.keys().cloned().collect();
    let names = declared.eval(&standard)?;
    let mut modules = ModuleMap::new();
    for name in names {
        match discovered.get(&name) {
            Some(m) => {
                modules.insert(name, m.clone());
            }
            None => {
                return Err(RulesError::UnknownModule {
                    dir: dir.to_string(),
                    module: name,
                })
            }
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pairs_impl_and_intf_by_stem() {
        let modules = guess_modules("src", &files(&["foo.ml", "foo.mli", "bar.ml"])).unwrap();
        assert_eq!(modules.len(), 2);
        let foo = &modules["Foo"];
        assert_eq!(foo.impl_file, "foo.ml");
        assert_eq!(foo.intf_file.as_deref(), Some("foo.mli"));
        assert_eq!(foo.obj_name, "foo");
        assert_eq!(modules["Bar"].intf_file, None);
    }

    #[test]
    fn ignores_unrelated_files() {
        let modules = guess_modules("src", &files(&["foo.ml", "notes.txt", "x.c"])).unwrap();
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn interface_without_implementation_is_fatal() {
        let err = guess_modules("src", &files(&["lonely.mli"])).unwrap_err();
        assert!(matches!(
            err,
            RulesError::IntfWithoutImpl { module, .. } if module == "Lonely"
        ));
    }

    #[test]
    fn duplicate_stem_is_fatal() {
        let err = guess_modules("src", &files(&["foo.ml", "Foo.ml"])).unwrap_err();
        assert!(matches!(err, RulesError::DuplicateModule { .. }));
    }

    #[test]
    fn declared_modules_filter_and_order() {
        let discovered = guess_modules("src", &files(&["a.ml", "b.ml", "c.ml"])).unwrap();
        let declared = OrderedSet::literal(&["C", "A"]);
        let modules = parse_modules("src", &declared, &discovered).unwrap();
        assert_eq!(modules.keys().collect::<Vec<_>>(), vec!["C", "A"]);
    }

    #[test]
    fn unknown_declared_module_is_fatal() {
        let discovered = guess_modules("src", &files(&["a.ml"])).unwrap();
        let declared = OrderedSet::literal(&["Nope"]);
        let err = parse_modules("src", &declared, &discovered).unwrap_err();
        assert!(matches!(err, RulesError::UnknownModule { module, .. } if module == "Nope"));
    }

    #[test]
    fn preprocessed_names_map_to_the_same_module() {
        assert_eq!(module_name_of_file("foo.pp.ml"), "Foo");
        assert_eq!(module_name_of_file("foo.ml"), "Foo");
    }
}
