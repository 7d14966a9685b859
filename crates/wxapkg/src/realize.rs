//! Content realization: the cosmetic transform applied to each extracted file.
//!
//! A realizer may fail for any input; the extraction pipeline then writes the
//! raw bytes instead, so a bad transform never loses a file.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use thiserror::Error;

/// Failure of a content transform.
#[derive(Debug, Error)]
#[error("cannot realize .{extension} content: {reason}")]
pub struct RealizeError {
    pub extension: String,
    pub reason: String,
}

/// Turns raw entry bytes into the content written to disk.
pub trait ContentRealizer: Send + Sync {
    /// `name` is the entry name as stored in the file table. `extension` is
    /// its lowercase extension without the leading dot.
    fn realize(&self, name: &str, extension: &str, raw: &[u8]) -> Result<Vec<u8>, RealizeError>;
}

/// Writes every entry exactly as stored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRealizer;

impl ContentRealizer for RawRealizer {
    fn realize(&self, _name: &str, _extension: &str, raw: &[u8]) -> Result<Vec<u8>, RealizeError> {
        Ok(raw.to_vec())
    }
}

/// Lifecycle hooks whose keys bundlers emit quoted, e.g. `"onLoad":`.
const LIFECYCLE_KEYS: &[&str] = &[
    "onLaunch",
    "onShow",
    "onHide",
    "onError",
    "onPageNotFound",
    "onUnhandledRejection",
    "onLoad",
    "onReady",
    "onUnload",
    "onPullDownRefresh",
    "onReachBottom",
    "onShareAppMessage",
    "onPageScroll",
    "onResize",
    "onTabItemTap",
];

static QUOTED_LIFECYCLE_KEY: Lazy<Regex> = Lazy::new(|| {
    let keys = LIFECYCLE_KEYS.join("|");
    Regex::new(&format!(r#"["']({})["']\s*:"#, keys)).unwrap()
});

/// Only the bundled service script gets its lifecycle keys unquoted.
const SERVICE_SCRIPT: &str = "app-service.js";

/// Default realizer.
///
/// - `json`: re-indented with two spaces
/// - `app-service.js`: quoted lifecycle keys restored to bare keys
/// - `txt`: line endings normalized to `\n`
/// - anything else: raw bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct Formatter;

impl ContentRealizer for Formatter {
    fn realize(&self, name: &str, extension: &str, raw: &[u8]) -> Result<Vec<u8>, RealizeError> {
        match extension {
            "json" => {
                let value: serde_json::Value =
                    serde_json::from_slice(raw).map_err(|e| fail(extension, e))?;
                serde_json::to_vec_pretty(&value).map_err(|e| fail(extension, e))
            }
            "js" if is_service_script(name) => {
                let text = std::str::from_utf8(raw).map_err(|e| fail(extension, e))?;
                Ok(QUOTED_LIFECYCLE_KEY
                    .replace_all(text, "$1:")
                    .into_owned()
                    .into_bytes())
            }
            "txt" => {
                let text = std::str::from_utf8(raw).map_err(|e| fail(extension, e))?;
                Ok(text.replace("\r\n", "\n").replace('\r', "\n").into_bytes())
            }
            _ => Ok(raw.to_vec()),
        }
    }
}

fn is_service_script(name: &str) -> bool {
    Path::new(name).file_name().and_then(|f| f.to_str()) == Some(SERVICE_SCRIPT)
}

fn fail(extension: &str, reason: impl std::fmt::Display) -> RealizeError {
    RealizeError {
        extension: extension.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_reindented() {
        let out = Formatter
            .realize("/a.json", "json", br#"{"a":[1,2],"b":{"c":true}}"#)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("{\n  \"a\": ["));
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back["b"]["c"], true);
    }

    #[test]
    fn test_json_keeps_key_order() {
        let out = Formatter.realize("/b.json", "json", br#"{"z":1,"a":2}"#).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
    }

    #[test]
    fn test_invalid_json_fails() {
        let err = Formatter.realize("/c.json", "json", b"{not json").unwrap_err();
        assert_eq!(err.extension, "json");
    }

    #[test]
    fn test_service_script_lifecycle_keys() {
        let src = br#"Page({"onLoad": function(){}, 'onShow' :f, "custom": 1})"#;
        let out = Formatter.realize("/app-service.js", "js", src).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"Page({onLoad: function(){}, onShow:f, "custom": 1})"#
        );

        let nested = Formatter
            .realize("/sub/app-service.js", "js", br#"{"onHide":g}"#)
            .unwrap();
        assert_eq!(nested, b"{onHide:g}");
    }

    #[test]
    fn test_other_scripts_untouched() {
        let src = br#"var table = {"onLoad": 1, "onShow": 2};"#;
        for name in ["/pages/index/index.js", "/game.js", "/my-app-service.js"] {
            assert_eq!(Formatter.realize(name, "js", src).unwrap(), src.to_vec());
        }
    }

    #[test]
    fn test_txt_line_endings() {
        let out = Formatter.realize("/r.txt", "txt", b"a\r\nb\rc\n").unwrap();
        assert_eq!(out, b"a\nb\nc\n");
    }

    #[test]
    fn test_binary_passthrough() {
        let png = [0x89, b'P', b'N', b'G', 0xff, 0x00];
        assert_eq!(Formatter.realize("/i.png", "png", &png).unwrap(), png);
        assert_eq!(RawRealizer.realize("/d.json", "json", b"{bad").unwrap(), b"{bad");
    }

    #[test]
    fn test_non_utf8_service_script_fails() {
        assert!(Formatter.realize("/app-service.js", "js", &[0xff, 0xfe]).is_err());
        assert!(Formatter.realize("/other.js", "js", &[0xff, 0xfe]).is_ok());
    }
}
