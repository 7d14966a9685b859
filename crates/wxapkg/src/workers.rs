//! Project-root inference for worker scripts.
//!
//! A bundled `workers.js` declares each module with `define("<path>", ...)`.
//! The common ancestor directory of every declared path is the worker root.
//! The script is scanned textually; it is never executed.

use crate::paths::{common_dir, dirname};
use once_cell::sync::Lazy;
use regex::Regex;

static DEFINE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bdefine\(\s*(?:"((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)')"#).unwrap()
});

/// Module paths declared by `define(...)` calls, in source order.
pub fn declared_modules(script: &str) -> Vec<String> {
    DEFINE_CALL
        .captures_iter(script)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().replace("\\/", "/"))
        .collect()
}

/// Common directory of every declared module, without a trailing `/`.
///
/// Returns `None` when the script declares no modules; `Some("")` means the
/// modules live at the package root.
pub fn worker_root(script: &str) -> Option<String> {
    let mut root: Option<String> = None;
    for module in declared_modules(script) {
        let dir = format!("{}/", dirname(&module));
        root = Some(match root {
            None => common_dir(&dir, &dir),
            Some(acc) => common_dir(&acc, &dir),
        });
    }
    root.map(|mut dir| {
        if dir.ends_with('/') {
            dir.pop();
        }
        dir
    })
}
