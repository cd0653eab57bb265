//! Persisted typed values
//!
//! Rules in one directory consume values computed by rules in another
//! (library closures, module dependency maps) through files on disk. A
//! [`Vspec`] pairs the file path with a codec; the generator only references
//! the codec, the executor invokes it. The on-disk shapes are small
//! s-expression-flavoured line formats owned by this crate, parsed by hand
//! the same way dep-info files are.

use std::sync::Arc;

use indexmap::IndexMap;
use ot_path::Path;

use crate::build::{BuildValue, DynVal};
use crate::error::BuildError;

/// Module-name to dependency-list mapping, insertion-ordered.
pub type NameMap = IndexMap<String, Vec<String>>;

/// A typed codec: how a value of type `T` is written to and read from disk.
#[derive(Clone)]
pub struct Codec<T> {
    pub name: &'static str,
    encode: Arc<dyn Fn(&T) -> String + Send + Sync>,
    decode: Arc<dyn Fn(&str) -> Result<T, String> + Send + Sync>,
}

impl<T> Codec<T> {
    pub fn new(
        name: &'static str,
        encode: impl Fn(&T) -> String + Send + Sync + 'static,
        decode: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    ) -> Codec<T> {
        Codec {
            name,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn encode(&self, value: &T) -> String {
        (self.encode)(value)
    }

    pub fn decode(&self, text: &str) -> Result<T, String> {
        (self.decode)(text)
    }
}

/// Codec for an ordered list of names: `(foo bar baz)`.
pub fn name_list_codec() -> Codec<Vec<String>> {
    Codec::new(
        "name-list",
        |names: &Vec<String>| format!("({})\n", names.join(" ")),
        |text: &str| {
            let inner = strip_parens(text.trim())?;
            Ok(inner.split_whitespace().map(str::to_string).collect())
        },
    )
}

/// Codec for an ordered name → name-list map, one `(key (v1 v2))` entry per
/// line. Used for the per-directory module dependency maps.
pub fn name_map_codec() -> Codec<NameMap> {
    Codec::new(
        "name-map",
        |map: &NameMap| {
            let mut out = String::new();
            for (name, deps) in map {
                out.push_str(&format!("({} ({}))\n", name, deps.join(" ")));
            }
            out
        },
        |text: &str| {
            let mut map = NameMap::new();
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                let (name, deps) = parse_map_entry(line)?;
                map.insert(name, deps);
            }
            Ok(map)
        },
    )
}

fn strip_parens(s: &str) -> Result<&str, String> {
    s.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("expected a parenthesized list, got {s:?}"))
}

fn parse_map_entry(line: &str) -> Result<(String, Vec<String>), String> {
    let inner = strip_parens(line.trim())?;
    let inner = inner.trim();
    let (name, rest) = inner
        .split_once(char::is_whitespace)
        .ok_or_else(|| format!("malformed map entry {line:?}"))?;
    let deps = strip_parens(rest.trim())?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    Ok((name.to_string(), deps))
}

/// A persisted typed value: a file path plus the codec for its contents.
#[derive(Clone)]
pub struct Vspec<T> {
    pub path: Path,
    pub codec: Codec<T>,
}

impl<T: BuildValue> Vspec<T> {
    pub fn new(path: Path, codec: Codec<T>) -> Vspec<T> {
        Vspec { path, codec }
    }

    pub(crate) fn erase(&self) -> VspecDyn {
        let path = self.path.clone();
        let schema = self.codec.name;
        let enc_codec = self.codec.clone();
        let dec_codec = self.codec.clone();
        let dec_path = self.path.clone();
        VspecDyn {
            path,
            schema,
            encode: Arc::new(move |v: &DynVal| {
                let t = v.downcast_ref::<T>().ok_or(BuildError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
                Ok(enc_codec.encode(t))
            }),
            decode: Arc::new(move |s: &str| {
                let t = dec_codec.decode(s).map_err(|reason| BuildError::Decode {
                    schema,
                    path: dec_path.clone(),
                    reason,
                })?;
                Ok(Arc::new(t) as DynVal)
            }),
        }
    }
}

/// Type-erased form of [`Vspec`], stored inside build nodes.
#[derive(Clone)]
pub(crate) struct VspecDyn {
    pub path: Path,
    pub schema: &'static str,
    pub encode: Arc<dyn Fn(&DynVal) -> Result<String, BuildError> + Send + Sync>,
    pub decode: Arc<dyn Fn(&str) -> Result<DynVal, BuildError> + Send + Sync>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_list_round_trip() {
        let codec = name_list_codec();
        let names = vec!["str".to_string(), "unix".to_string(), "mylib".to_string()];
        let text = codec.encode(&names);
        assert_eq!(text, "(str unix mylib)\n");
        assert_eq!(codec.decode(&text).unwrap(), names);
    }

    #[test]
    fn empty_name_list() {
        let codec = name_list_codec();
        let text = codec.encode(&Vec::new());
        assert_eq!(codec.decode(&text).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn name_map_round_trip_preserves_order() {
        let codec = name_map_codec();
        let mut map = NameMap::new();
        map.insert("Main".to_string(), vec!["Util".to_string(), "Cfg".to_string()]);
        map.insert("Util".to_string(), Vec::new());
        let text = codec.encode(&map);
        let back = codec.decode(&text).unwrap();
        assert_eq!(back, map);
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["Main", "Util"]);
    }

    #[test]
    fn name_map_rejects_garbage() {
        let codec = name_map_codec();
        assert!(codec.decode("not a sexp").is_err());
    }

    #[test]
    fn codecs_survive_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.requires.sexp");
        let codec = name_list_codec();
        let names = vec!["a".to_string(), "b".to_string()];
        std::fs::write(&file, codec.encode(&names)).unwrap();
        let text = std::fs::read_to_string(&file).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), names);
    }
}
