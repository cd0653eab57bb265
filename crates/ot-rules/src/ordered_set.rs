//! Ordered-set language
//!
//! Flag sets and module lists are written as a small expression language
//! over ordered string sets, with a placeholder for the context-provided
//! standard value. Sets may pull additional elements from a file, in which
//! case evaluation has to go through the build graph so the file registers
//! as a dependency; [`OrderedSet::eval`] is the static-only fast path used
//! where a file reference is a configuration error.

use ot_build::{all, contents, pure, Build};
use ot_path::Path;

use crate::error::RulesError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderedSet {
    /// The context-provided baseline.
    Standard,
    Literal(Vec<String>),
    Union(Vec<OrderedSet>),
    /// Elements of the left set that are not in the right one.
    Diff(Box<OrderedSet>, Box<OrderedSet>),
    /// Whitespace-separated elements read from a file in the stanza's
    /// directory.
    FromFile(String),
}

impl Default for OrderedSet {
    fn default() -> Self {
        OrderedSet::Standard
    }
}

impl OrderedSet {
    pub fn literal(items: &[&str]) -> OrderedSet {
        OrderedSet::Literal(items.iter().map(|s| s.to_string()).collect())
    }

    /// `:standard ++ items`.
    pub fn standard_plus(items: &[&str]) -> OrderedSet {
        OrderedSet::Union(vec![OrderedSet::Standard, OrderedSet::literal(items)])
    }

    /// Static evaluation. Fails on `FromFile`: sets read from files exist
    /// only inside the build graph, use [`OrderedSet::expand`] there.
    pub fn eval(&self, standard: &[String]) -> Result<Vec<String>, RulesError> {
        match self {
            OrderedSet::Standard => Ok(standard.to_vec()),
            OrderedSet::Literal(items) => Ok(items.clone()),
            OrderedSet::Union(parts) => {
                let mut out = Vec::new();
                for part in parts {
                    out.extend(part.eval(standard)?);
                }
                Ok(out)
            }
            OrderedSet::Diff(left, right) => {
                let keep = left.eval(standard)?;
                let drop = right.eval(standard)?;
                Ok(keep.into_iter().filter(|x| !drop.contains(x)).collect())
            }
            OrderedSet::FromFile(file) => Err(RulesError::FileSetNotStatic { file: file.clone() }),
        }
    }

    /// Evaluation lifted into the build graph: file-sourced sets become
    /// `contents` nodes, registering the file as a rule input.
    pub fn expand(&self, dir: &Path, standard: Vec<String>) -> Build<(), Vec<String>> {
        match self {
            OrderedSet::Standard => pure(standard),
            OrderedSet::Literal(items) => pure(items.clone()),
            OrderedSet::Union(parts) => {
                let builds = parts.iter().map(|p| p.expand(dir, standard.clone())).collect();
                all(builds).map(|lists: Vec<Vec<String>>| lists.into_iter().flatten().collect())
            }
            OrderedSet::Diff(left, right) => left
                .expand(dir, standard.clone())
                .fanout(right.expand(dir, standard))
                .map(|(keep, drop)| keep.into_iter().filter(|x| !drop.contains(x)).collect()),
            OrderedSet::FromFile(file) => contents(dir.relative(file)).map(|text: String| {
                text.split_whitespace().map(str::to_string).collect()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ot_build::MemEnv;

    fn std_set() -> Vec<String> {
        vec!["-g".to_string(), "-w".to_string()]
    }

    #[test]
    fn standard_is_the_baseline() {
        assert_eq!(OrderedSet::Standard.eval(&std_set()).unwrap(), std_set());
    }

    #[test]
    fn union_concatenates_in_order() {
        let set = OrderedSet::standard_plus(&["-O2"]);
        assert_eq!(set.eval(&std_set()).unwrap(), vec!["-g", "-w", "-O2"]);
    }

    #[test]
    fn diff_removes_right_elements() {
        let set = OrderedSet::Diff(
            Box::new(OrderedSet::Standard),
            Box::new(OrderedSet::literal(&["-w"])),
        );
        assert_eq!(set.eval(&std_set()).unwrap(), vec!["-g"]);
    }

    #[test]
    fn from_file_is_not_static() {
        let set = OrderedSet::FromFile("flags.txt".to_string());
        assert!(matches!(
            set.eval(&[]),
            Err(RulesError::FileSetNotStatic { .. })
        ));
    }

    #[test]
    fn from_file_expands_through_the_graph() {
        let dir = Path::build("default", "src");
        let set = OrderedSet::Union(vec![
            OrderedSet::Standard,
            OrderedSet::FromFile("extra-flags".to_string()),
        ]);
        let b = set.expand(&dir, vec!["-g".to_string()]);
        let mut env =
            MemEnv::new().with_file(dir.relative("extra-flags"), "-O2 -unboxed-types\n");
        assert_eq!(
            b.eval((), &mut env).unwrap(),
            vec!["-g", "-O2", "-unboxed-types"]
        );
    }
}
