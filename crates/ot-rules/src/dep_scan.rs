//! Dependency scanner plumbing
//!
//! Module-level dependencies are discovered by running the external scanner
//! over the (preprocessed) sources of each kind. Two rules per kind: one
//! captures the scanner's stdout into a dot-file, the second parses it and
//! persists the module → deps map under `{item}.depends.{kind}.sexp` so
//! downstream rules can load it lazily through `vpath`.
//!
//! Scanner output is one line per file, `<filename>: <words…>`. Words that
//! name the module itself or something outside the module set are dropped.

use std::collections::{BTreeSet, HashMap};

use ot_build::{arr_result, lines_of, name_map_codec, run_capture, store_vfile, ArgSpec, NameMap, Vspec};
use ot_path::Path;

use crate::error::RulesError;
use crate::modules::{module_name_of_file, Module, ModuleMap};
use crate::stanza::MlKind;
use crate::super_context::SuperContext;

/// The persisted dependency maps of one stanza.
pub struct ModuleDeps {
    pub impl_spec: Vspec<NameMap>,
    pub intf_spec: Vspec<NameMap>,
}

impl ModuleDeps {
    pub fn for_kind(&self, kind: MlKind) -> &Vspec<NameMap> {
        match kind {
            MlKind::Impl => &self.impl_spec,
            MlKind::Intf => &self.intf_spec,
        }
    }
}

impl SuperContext {
    /// Emit the scan and parse rules for one stanza's module set. The alias
    /// module is not scanned (its body is generated); it is injected into
    /// the persisted maps with an empty dependency list and prepended to
    /// every other module's list.
    pub(crate) fn ocamldep_rules(
        &mut self,
        dir: &Path,
        item: &str,
        modules: &ModuleMap,
        alias: Option<&Module>,
    ) -> ModuleDeps {
        ModuleDeps {
            impl_spec: self.scan_rules(dir, item, modules, alias, MlKind::Impl),
            intf_spec: self.scan_rules(dir, item, modules, alias, MlKind::Intf),
        }
    }

    fn scan_rules(
        &mut self,
        dir: &Path,
        item: &str,
        modules: &ModuleMap,
        alias: Option<&Module>,
        kind: MlKind,
    ) -> Vspec<NameMap> {
        let spec = Vspec::new(
            dir.relative(&format!("{item}.depends.{}.sexp", kind.as_str())),
            name_map_codec(),
        );
        let raw_out = dir.relative(&format!(".{item}.{}.ocamldep-output", kind.as_str()));

        let mut args = vec![ArgSpec::a("-modules")];
        let mut kind_order: Vec<String> = Vec::new();
        for m in modules.values() {
            let Some(file) = m.file(kind == MlKind::Intf) else {
                continue;
            };
            kind_order.push(m.name.clone());
            let p = dir.relative(file);
            if file.ends_with(kind.source_ext()) {
                args.push(ArgSpec::Dep(p));
            } else {
                args.push(ArgSpec::S(vec![
                    ArgSpec::a(kind.force_flag()),
                    ArgSpec::Dep(p),
                ]));
            }
        }
        let scanner = Path::absolute(self.context.ocamldep.clone());
        self.add_rule(run_capture::<()>(scanner, args, raw_out.clone()));

        let members: BTreeSet<String> = modules.keys().cloned().collect();
        let alias_name = alias.map(|a| a.name.clone());
        let parse = arr_result(move |lines: Vec<String>| {
            parse_deps(&lines, &members, &kind_order, alias_name.as_deref())
                .map_err(|e| e.deferred())
        });
        self.add_rule(lines_of(raw_out).then(parse).then(store_vfile(&spec)));
        spec
    }
}

/// Parse scanner output lines into an ordered dependency map.
pub(crate) fn parse_deps(
    lines: &[String],
    members: &BTreeSet<String>,
    order: &[String],
    alias: Option<&str>,
) -> Result<NameMap, RulesError> {
    let mut raw: HashMap<String, Vec<String>> = HashMap::new();
    for line in lines.iter().filter(|l| !l.trim().is_empty()) {
        let (file, words) = line
            .split_once(':')
            .ok_or_else(|| RulesError::MalformedScannerOutput { line: line.clone() })?;
        let base = file.trim().rsplit('/').next().unwrap_or(file);
        let name = module_name_of_file(base);
        if raw.contains_key(&name) {
            return Err(RulesError::DuplicateModuleInScan { module: name });
        }
        let deps: Vec<String> = words
            .split_whitespace()
            .filter(|w| *w != name && members.contains(*w))
            .map(str::to_string)
            .collect();
        raw.insert(name, deps);
    }

    let mut map = NameMap::new();
    if let Some(alias) = alias {
        map.insert(alias.to_string(), Vec::new());
    }
    for name in order {
        if Some(name.as_str()) == alias {
            continue;
        }
        let mut deps = raw.remove(name).unwrap_or_default();
        if let Some(alias) = alias {
            deps.insert(0, alias.to_string());
        }
        map.insert(name.clone(), deps);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn lines(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_only_member_modules_and_drops_self() {
        let map = parse_deps(
            &lines(&["foo.ml: Bar List Foo", "bar.ml:"]),
            &members(&["Foo", "Bar"]),
            &["Bar".to_string(), "Foo".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(map["Foo"], vec!["Bar"]);
        assert_eq!(map["Bar"], Vec::<String>::new());
        // Entries come out in module order, not scan order.
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["Bar", "Foo"]);
    }

    #[test]
    fn preprocessed_file_names_resolve_to_modules() {
        let map = parse_deps(
            &lines(&["_build/default/src/foo.pp.ml: Bar"]),
            &members(&["Foo", "Bar"]),
            &["Foo".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(map["Foo"], vec!["Bar"]);
    }

    #[test]
    fn alias_module_is_injected_everywhere() {
        let map = parse_deps(
            &lines(&["a.ml: B", "b.ml:"]),
            &members(&["A", "B"]),
            &["A".to_string(), "B".to_string()],
            Some("Mylib__"),
        )
        .unwrap();
        assert_eq!(map["Mylib__"], Vec::<String>::new());
        assert_eq!(map["A"], vec!["Mylib__", "B"]);
        assert_eq!(map["B"], vec!["Mylib__"]);
        assert_eq!(map.keys().next().unwrap(), "Mylib__");
    }

    #[test]
    fn malformed_line_is_an_error() {
        let err = parse_deps(
            &lines(&["no colon here"]),
            &members(&["A"]),
            &["A".to_string()],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RulesError::MalformedScannerOutput { .. }));
    }

    #[test]
    fn duplicate_module_in_output_is_an_error() {
        let err = parse_deps(
            &lines(&["a.ml: B", "a.ml: C"]),
            &members(&["A", "B", "C"]),
            &["A".to_string()],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, RulesError::DuplicateModuleInScan { module } if module == "A"));
    }
}
