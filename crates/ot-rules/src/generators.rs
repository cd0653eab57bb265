//! Generator stanzas and user rules
//!
//! The lexer and parser generators leave `#` line directives pointing at
//! the temporary output file; the emitted rules rewrite them to the
//! canonical build-tree path and delete the temporary, all inside one rule
//! so the executor sees a single producer per generated file.

use ot_build::{const_action, path, targets, Action};
use ot_path::Path;

use crate::error::RulesError;
use crate::expand::Expander;
use crate::stanza::{OcamllexStanza, OcamlyaccStanza, UserAction, UserRule};
use crate::super_context::SuperContext;

fn sed_rewrite(from: &Path, to: &Path) -> Action {
    Action::Bash {
        script: format!(
            "sed -e 's|\"{}\"|\"{}\"|g' {} > {}",
            from.to_path_string(),
            to.to_path_string(),
            from.to_path_string(),
            to.to_path_string()
        ),
    }
}

impl SuperContext {
    pub(crate) fn ocamllex_rules(&mut self, dir: &Path, stanza: &OcamllexStanza) {
        for name in &stanza.names {
            let src = dir.relative(&format!("{name}.mll"));
            let dst = dir.relative(&format!("{name}.ml"));
            let tmp = dir.relative(&format!("{name}.ml.tmp"));
            let action = Action::Progn(vec![
                Action::Run {
                    prog: Path::absolute(self.context.ocamllex.clone()),
                    args: vec![
                        "-q".to_string(),
                        "-o".to_string(),
                        tmp.to_path_string(),
                        src.to_path_string(),
                    ],
                    dir: None,
                    stdout_to: None,
                },
                sed_rewrite(&tmp, &dst),
                Action::RemoveFile { path: tmp },
            ]);
            self.add_rule(
                path::<()>(src)
                    .then(targets(vec![dst]))
                    .then(const_action(action)),
            );
        }
    }

    pub(crate) fn ocamlyacc_rules(&mut self, dir: &Path, stanza: &OcamlyaccStanza) {
        for name in &stanza.names {
            let src = dir.relative(&format!("{name}.mly"));
            let tmp_base = dir.relative(&format!("{name}.tmp"));
            let tmp_ml = dir.relative(&format!("{name}.tmp.ml"));
            let tmp_mli = dir.relative(&format!("{name}.tmp.mli"));
            let dst_ml = dir.relative(&format!("{name}.ml"));
            let dst_mli = dir.relative(&format!("{name}.mli"));
            let action = Action::Progn(vec![
                Action::Run {
                    prog: Path::absolute(self.context.ocamlyacc.clone()),
                    args: vec![
                        "-b".to_string(),
                        tmp_base.to_path_string(),
                        src.to_path_string(),
                    ],
                    dir: None,
                    stdout_to: None,
                },
                sed_rewrite(&tmp_ml, &dst_ml),
                sed_rewrite(&tmp_mli, &dst_mli),
                Action::RemoveFile { path: tmp_ml },
                Action::RemoveFile { path: tmp_mli },
            ]);
            self.add_rule(
                path::<()>(src)
                    .then(targets(vec![dst_ml, dst_mli]))
                    .then(const_action(action)),
            );
        }
    }

    pub(crate) fn user_rule_rules(&mut self, dir: &Path, rule: &UserRule) -> Result<(), RulesError> {
        let target_paths: Vec<Path> = rule.targets.iter().map(|t| dir.relative(t)).collect();
        let deps = self.interpret_dep_confs(dir, &rule.deps)?;

        let (action, artifact_deps) = {
            let expander = Expander {
                sctx: self,
                dir,
                targets: &target_paths,
                deps: &deps,
            };
            match &rule.action {
                UserAction::Run(argv) => {
                    let mut rendered = Vec::new();
                    let mut extra = Vec::new();
                    for arg in argv {
                        let (value, mut arg_deps) = expander.expand(arg)?;
                        rendered.push(value);
                        extra.append(&mut arg_deps);
                    }
                    let prog = rendered.first().cloned().unwrap_or_default();
                    let action = Action::Run {
                        prog: Path::absolute(prog),
                        args: rendered.into_iter().skip(1).collect(),
                        dir: None,
                        stdout_to: None,
                    };
                    (action, extra)
                }
                UserAction::Bash(script) => {
                    let (script, extra) = expander.expand(script)?;
                    (Action::Bash { script }, extra)
                }
            }
        };

        self.add_rule(
            deps.build()
                .then(ot_build::paths(artifact_deps))
                .then(targets(target_paths))
                .then(const_action::<()>(action)),
        );
        Ok(())
    }
}
