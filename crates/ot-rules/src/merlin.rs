//! Editor-integration files
//!
//! One `.merlin` per directory with compiling stanzas, written only for
//! the default build context. Library usage comes from the side-channel
//! records attached to the closure builds, so the file reflects what the
//! rules actually resolved rather than re-interpreting the stanzas.

use indexmap::IndexSet;
use ot_build::{copy, create_file};
use ot_path::Path;

use crate::lib_db::ResolvedLib;
use crate::stanza::{Preprocess, Stanza};
use crate::super_context::{SrcDir, SuperContext};

impl SuperContext {
    pub(crate) fn merlin_rules(&mut self, sd: &SrcDir) {
        if !self.context.is_default() {
            return;
        }
        let compiles = sd.stanzas.iter().any(|s| {
            matches!(s, Stanza::Library(_) | Stanza::Executables(_))
        });
        if !compiles {
            return;
        }
        let dir = self.context.build_path(sd.path.clone());
        let source_dir = Path::source(sd.path.clone());

        let mut lib_names: IndexSet<String> = IndexSet::new();
        for rule in &self.rules {
            for record in &rule.lib_deps {
                if record.dir == dir {
                    lib_names.extend(record.deps.iter().cloned());
                }
            }
        }

        let mut lines = vec![
            "S .".to_string(),
            format!("B {}", dir.reach(&source_dir)),
        ];
        for name in &lib_names {
            match self.lib_db.resolve(name) {
                Ok(ResolvedLib::Internal { dir: lib_dir, .. }) => {
                    lines.push(format!("B {}", lib_dir.reach(&source_dir)));
                }
                Ok(ResolvedLib::External(pkg)) => lines.push(format!("PKG {}", pkg.name)),
                Err(_) => {}
            }
        }
        for stanza in &sd.stanzas {
            let preprocess = match stanza {
                Stanza::Library(lib) => &lib.preprocess,
                Stanza::Executables(exes) => &exes.preprocess,
                _ => continue,
            };
            if let Preprocess::Pps { pps, flags } = &preprocess.default {
                let mut sorted = pps.clone();
                sorted.sort();
                sorted.dedup();
                let key = sorted.join("+");
                if let Some(driver) = self.ppx_drivers.get(&key) {
                    let mut line = format!("FLG -ppx {}", driver.exe.reach(&source_dir));
                    for flag in flags {
                        line.push(' ');
                        line.push_str(flag);
                    }
                    lines.push(line);
                }
            }
        }

        let mut text = lines.join("\n");
        text.push('\n');
        let target = dir.relative(".merlin");
        self.add_rule(create_file::<()>(target.clone(), text));
        self.add_rule(copy::<()>(target, source_dir.relative(".merlin")));
    }
}
