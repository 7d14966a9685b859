//! String path helpers that behave the same on every platform.
//!
//! Inputs are normalized to `/` separators and a leading `./` is dropped
//! before comparison.

use std::path::Path;

/// Replace `\` with `/` and drop a single leading `./` segment.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    match path.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None if path == "." => String::new(),
        None => path,
    }
}

/// Longest directory prefix shared by both paths, ending at a `/`.
///
/// ```
/// use wxapkg::paths::common_dir;
///
/// assert_eq!(common_dir("a/b/c.js", "a/b/d.js"), "a/b/");
/// assert_eq!(common_dir("x/y.js", "a/b.js"), "");
/// ```
pub fn common_dir(a: &str, b: &str) -> String {
    let a = normalize(a);
    let b = normalize(b);
    let len = shared_dir_len(&a, &b);
    a[..len].to_string()
}

/// Relative path that walks from the directory of `from` to `to`.
///
/// ```
/// use wxapkg::paths::relative_path;
///
/// assert_eq!(relative_path("images/a.png", "pages/index/index.json"), "../../images/a.png");
/// assert_eq!(relative_path("pages/b/b.js", "pages/a/a.js"), "../b/b.js");
/// ```
pub fn relative_path(to: &str, from: &str) -> String {
    let to = normalize(to);
    let from = normalize(from);
    let len = shared_dir_len(&to, &from);

    let ups = from[len..].matches('/').count();
    let mut out = "../".repeat(ups);
    out.push_str(&to[len..]);
    out
}

/// Replace the extension of the final segment; an empty `ext` strips it.
///
/// `ext` includes the dot, e.g. `".json"`.
pub fn change_ext(name: &str, ext: &str) -> String {
    let seg_start = name.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let stem = match name[seg_start..].rfind('.') {
        Some(dot) => &name[..seg_start + dot],
        None => name,
    };
    format!("{}{}", stem, ext)
}

/// Directory part of a `/`-separated path, `"."` when there is none.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// Render `path` relative to `root` with `/` separators.
///
/// Paths outside `root` are returned unchanged (separators normalized).
pub fn display_relative(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

/// Byte length of the shared prefix of `a` and `b`, cut back to the last `/`.
fn shared_dir_len(a: &str, b: &str) -> usize {
    let shared: usize = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum();
    a[..shared].rfind('/').map_or(0, |i| i + 1)
}
