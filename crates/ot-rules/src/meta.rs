//! META synthesis
//!
//! Each package gets a generated `META.{pkg}` describing its libraries to
//! the package-database tooling: the root library's fields at top level,
//! sub-libraries as nested `package "sub" (...)` blocks. The `requires`
//! lines are the persisted library closures, loaded back through the build
//! graph rather than recomputed.

use std::sync::Arc;

use ot_build::{all, echo, vpath, Build};
use ot_path::Path;

use crate::lib_db::requires_spec;
use crate::stanza::Library;
use crate::super_context::{PackageDef, SuperContext};

struct MetaLib {
    best_name: String,
    archive_base: String,
    synopsis: Option<String>,
}

impl SuperContext {
    /// Emit the META rule for a package and return the generated path.
    pub(crate) fn meta_rule(
        &mut self,
        pkg: &PackageDef,
        libs: &[(Path, Arc<Library>)],
    ) -> Path {
        let target = self
            .context
            .build_path(pkg.path.clone())
            .relative(&format!("META.{}", pkg.name));

        let infos: Vec<MetaLib> = libs
            .iter()
            .map(|(_, lib)| MetaLib {
                best_name: lib.best_name().to_string(),
                archive_base: lib.name.clone(),
                synopsis: lib.synopsis.clone(),
            })
            .collect();
        let loads: Vec<Build<(), Vec<String>>> = libs
            .iter()
            .map(|(dir, lib)| vpath(&requires_spec(dir, &lib.name)))
            .collect();

        let pkg_name = pkg.name.clone();
        let version = pkg.version.clone();
        let b = all(loads)
            .map(move |requires: Vec<Vec<String>>| {
                render_meta(&pkg_name, version.as_deref(), &infos, &requires)
            })
            .then(echo(target.clone()));
        self.add_rule(b);
        target
    }
}

fn render_lib_fields(out: &mut String, indent: &str, lib: &MetaLib, requires: &[String]) {
    if let Some(synopsis) = &lib.synopsis {
        out.push_str(&format!("{indent}description = \"{synopsis}\"\n"));
    }
    out.push_str(&format!(
        "{indent}requires = \"{}\"\n",
        requires.join(" ")
    ));
    out.push_str(&format!(
        "{indent}archive(byte) = \"{}.cma\"\n",
        lib.archive_base
    ));
    out.push_str(&format!(
        "{indent}archive(native) = \"{}.cmxa\"\n",
        lib.archive_base
    ));
    out.push_str(&format!(
        "{indent}plugin(byte) = \"{}.cma\"\n",
        lib.archive_base
    ));
    out.push_str(&format!(
        "{indent}plugin(native) = \"{}.cmxs\"\n",
        lib.archive_base
    ));
}

fn render_meta(
    pkg: &str,
    version: Option<&str>,
    libs: &[MetaLib],
    requires: &[Vec<String>],
) -> String {
    let mut out = String::new();
    if let Some(version) = version {
        out.push_str(&format!("version = \"{version}\"\n"));
    }
    for (lib, reqs) in libs.iter().zip(requires) {
        if lib.best_name == pkg {
            render_lib_fields(&mut out, "", lib, reqs);
        }
    }
    for (lib, reqs) in libs.iter().zip(requires) {
        if let Some(sub) = lib
            .best_name
            .strip_prefix(&format!("{pkg}."))
            .filter(|s| !s.is_empty())
        {
            out.push_str(&format!("package \"{sub}\" (\n"));
            out.push_str(&format!("  directory = \"{sub}\"\n"));
            render_lib_fields(&mut out, "  ", lib, reqs);
            out.push_str(")\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_sub_packages_render() {
        let libs = vec![
            MetaLib {
                best_name: "acme".to_string(),
                archive_base: "acme".to_string(),
                synopsis: Some("Core".to_string()),
            },
            MetaLib {
                best_name: "acme.extra".to_string(),
                archive_base: "acme_extra".to_string(),
                synopsis: None,
            },
        ];
        let requires = vec![vec!["unix".to_string()], vec!["acme".to_string()]];
        let text = render_meta("acme", Some("1.0"), &libs, &requires);
        assert!(text.starts_with("version = \"1.0\"\n"));
        assert!(text.contains("description = \"Core\""));
        assert!(text.contains("requires = \"unix\""));
        assert!(text.contains("package \"extra\" (\n"));
        assert!(text.contains("archive(native) = \"acme_extra.cmxa\""));
    }
}
