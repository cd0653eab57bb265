//! Install-manifest emitter
//!
//! Per package: the installable files of its libraries (per mode), its
//! executables, explicit install stanzas, auto-discovered documentation,
//! the synthesized META and the opam file. Optional libraries whose
//! closure has missing dependencies were already filtered by the library
//! database, which is what lets optional stanzas fail silently.

use std::sync::Arc;

use ot_build::{copy, create_file};
use ot_findlib::{Findlib, Mode};
use ot_path::Path;
use tracing::debug;

use crate::error::RulesError;
use crate::stanza::{Library, Section, Stanza};
use crate::super_context::{PackageDef, SrcDir, SuperContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntry {
    pub section: Section,
    pub src: Path,
    pub dst: Option<String>,
}

impl InstallEntry {
    fn new(section: Section, src: Path) -> InstallEntry {
        InstallEntry {
            section,
            src,
            dst: None,
        }
    }

    fn named(section: Section, src: Path, dst: impl Into<String>) -> InstallEntry {
        InstallEntry {
            section,
            src,
            dst: Some(dst.into()),
        }
    }
}

fn is_doc_file(name: &str) -> bool {
    let stems = ["README", "LICENSE", "CHANGES"];
    stems
        .iter()
        .any(|stem| name == *stem || name.starts_with(&format!("{stem}.")))
}

/// Render the `.install` manifest: per-section lists of quoted sources
/// with optional destination names.
pub(crate) fn format_install(entries: &[InstallEntry]) -> String {
    let mut out = String::new();
    let mut sections: Vec<Section> = entries.iter().map(|e| e.section).collect();
    sections.sort();
    sections.dedup();
    for section in sections {
        out.push_str(&format!("{}: [\n", section.as_str()));
        for entry in entries.iter().filter(|e| e.section == section) {
            match &entry.dst {
                Some(dst) => out.push_str(&format!(
                    "  \"{}\" {{\"{}\"}}\n",
                    entry.src.to_path_string(),
                    dst
                )),
                None => out.push_str(&format!("  \"{}\"\n", entry.src.to_path_string())),
            }
        }
        out.push_str("]\n");
    }
    out
}

impl SuperContext {
    pub(crate) fn install_rules(&mut self, dirs: &[SrcDir]) -> Result<(), RulesError> {
        let packages: Vec<PackageDef> = self.packages.values().cloned().collect();
        for pkg in &packages {
            self.package_install_rules(pkg, dirs)?;
        }
        Ok(())
    }

    fn package_install_rules(
        &mut self,
        pkg: &PackageDef,
        dirs: &[SrcDir],
    ) -> Result<(), RulesError> {
        debug!(package = %pkg.name, "install manifest");
        let pkg_dir = self.context.build_path(pkg.path.clone());
        let mut entries: Vec<InstallEntry> = Vec::new();

        let pkg_libs: Vec<(Path, Arc<Library>)> = self
            .lib_db
            .internal_libs_without_non_installable_optional_ones()
            .into_iter()
            .filter(|(_, lib)| Findlib::root_package_name(lib.best_name()) == pkg.name)
            .collect();

        for (dir, lib) in &pkg_libs {
            entries.extend(self.lib_install_entries(dir, lib));
        }
        if !pkg_libs.is_empty() {
            let meta = self.meta_rule(pkg, &pkg_libs);
            entries.push(InstallEntry::named(Section::Lib, meta, "META"));
        }

        for sd in dirs {
            let dir = self.context.build_path(sd.path.clone());
            let in_pkg = pkg.path.as_str().is_empty() || sd.path.starts_with(&pkg.path);
            for stanza in &sd.stanzas {
                match stanza {
                    Stanza::Executables(exes)
                        if exes.package.as_deref() == Some(pkg.name.as_str()) =>
                    {
                        let native = self.context.ocamlopt.is_some()
                            && exes.modes.contains(&Mode::Native);
                        let ext = if native { ".exe" } else { ".bc" };
                        for name in &exes.names {
                            entries.push(InstallEntry::named(
                                Section::Bin,
                                dir.relative(&format!("{name}{ext}")),
                                name,
                            ));
                        }
                    }
                    Stanza::Install(install)
                        if in_pkg
                            && install
                                .package
                                .as_deref()
                                .map(|p| p == pkg.name)
                                .unwrap_or(true) =>
                    {
                        for (file, dst) in &install.files {
                            entries.push(InstallEntry {
                                section: install.section,
                                src: dir.relative(file),
                                dst: dst.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(sd) = dirs.iter().find(|d| d.path == pkg.path) {
            for file in &sd.files {
                if is_doc_file(file) {
                    entries.push(InstallEntry::new(Section::Doc, pkg_dir.relative(file)));
                }
            }
            let opam = format!("{}.opam", pkg.name);
            if sd.files.contains(&opam) {
                entries.push(InstallEntry::named(
                    Section::Lib,
                    pkg_dir.relative(&opam),
                    "opam",
                ));
            }
        }

        let install_file = pkg_dir.relative(&format!("{}.install", pkg.name));
        self.add_rule(create_file::<()>(
            install_file.clone(),
            format_install(&entries),
        ));
        if self.context.is_default() {
            let in_source = Path::source(pkg.path.join(format!("{}.install", pkg.name)));
            self.add_rule(copy::<()>(install_file, in_source));
        }
        Ok(())
    }

    fn lib_install_entries(&self, dir: &Path, lib: &Arc<Library>) -> Vec<InstallEntry> {
        let mut entries = Vec::new();
        let native = self.context.ocamlopt.is_some() && lib.modes.contains(&Mode::Native);

        if lib.modes.contains(&Mode::Byte) {
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("{}.cma", lib.name)),
            ));
        }
        if native {
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("{}.cmxa", lib.name)),
            ));
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("{}{}", lib.name, self.context.ext_lib)),
            ));
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("{}.cmxs", lib.name)),
            ));
        }

        if let Some(saved) = self.lib_modules.get(&lib.name) {
            for m in saved.modules.values().chain(saved.alias.iter()) {
                entries.push(InstallEntry::new(
                    Section::Lib,
                    dir.relative(&format!("{}.cmi", m.obj_name)),
                ));
                if native {
                    entries.push(InstallEntry::new(
                        Section::Lib,
                        dir.relative(&format!("{}.cmx", m.obj_name)),
                    ));
                }
            }
        }

        if lib.has_stubs() {
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("lib{}{}", lib.stubs_base(), self.context.ext_lib)),
            ));
            entries.push(InstallEntry::new(
                Section::Stublibs,
                dir.relative(&format!("dll{}{}", lib.stubs_base(), self.context.ext_dll)),
            ));
        }
        for header in &lib.install_c_headers {
            entries.push(InstallEntry::new(
                Section::Lib,
                dir.relative(&format!("{header}.h")),
            ));
        }
        for artifact in &lib.js_artifacts {
            entries.push(InstallEntry::new(Section::Lib, dir.relative(artifact)));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_groups_by_section() {
        let entries = vec![
            InstallEntry::new(Section::Lib, Path::build("default", "src/foo.cma")),
            InstallEntry::named(Section::Bin, Path::build("default", "bin/tool.exe"), "tool"),
            InstallEntry::new(Section::Lib, Path::build("default", "src/foo.cmi")),
        ];
        let text = format_install(&entries);
        assert_eq!(
            text,
            "lib: [\n  \"_build/default/src/foo.cma\"\n  \"_build/default/src/foo.cmi\"\n]\nbin: [\n  \"_build/default/bin/tool.exe\" {\"tool\"}\n]\n"
        );
    }

    #[test]
    fn doc_files_are_recognized() {
        assert!(is_doc_file("README"));
        assert!(is_doc_file("README.md"));
        assert!(is_doc_file("LICENSE.txt"));
        assert!(is_doc_file("CHANGES.org"));
        assert!(!is_doc_file("src.ml"));
    }
}
