//! Integration tests for manifest reconstruction.

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{read_json, setup_test_dir};
use serde_json::json;
use std::fs;
use std::path::Path;
use wxapkg::{ConfigReconstructor, Context, DELETE_THRESHOLD};

const ICON: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];

fn write_manifest(dir: &Path, manifest: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("app-config.json");
    fs::write(&path, serde_json::to_vec(manifest).unwrap()).unwrap();
    path
}

fn sample_manifest() -> serde_json::Value {
    json!({
        "pages": ["pages/logs/logs", "pages/index/index", "sub/a", "sub/b"],
        "entryPagePath": "pages/index/index.html",
        "global": {"window": {"navigationBarTitleText": "Demo"}},
        "networkTimeout": {"request": 10000},
        "subPackages": [{"root": "sub", "pages": ["sub/a", "sub/b"], "independent": false}],
        "tabBar": {
            "color": "#000000",
            "list": [
                {
                    "pagePath": "pages/index/index.html",
                    "text": "Home",
                    "iconData": STANDARD.encode(ICON),
                    "selectedIconData": STANDARD.encode(b"not on disk")
                },
                {"pagePath": "pages/logs/logs.html", "text": "Logs"}
            ]
        },
        "page": {
            "pages/index/index.html": {"window": {"navigationBarTitleText": "Index"}},
            "pages/logs/logs.html": {}
        }
    })
}

#[tokio::test]
async fn test_reconstruct_full_manifest() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    fs::create_dir_all(dir.join("images")).unwrap();
    fs::write(dir.join("images/home.png"), ICON).unwrap();
    let config = write_manifest(dir, &sample_manifest());

    let ctx = Context::new(16);
    let weights = ConfigReconstructor::new(ctx.clone()).reconstruct(&config).await;
    ctx.idle().await;

    assert_eq!(weights.get(&config), Some(DELETE_THRESHOLD));

    let app = read_json(&dir.join("app.json"));
    assert_eq!(app["pages"], json!(["pages/index/index", "pages/logs/logs"]));
    assert_eq!(app["window"]["navigationBarTitleText"], "Demo");
    assert_eq!(app["networkTimeout"]["request"], 10000);

    let sub = &app["subPackages"][0];
    assert_eq!(sub["root"], "sub/");
    assert_eq!(sub["pages"], json!(["a", "b"]));
    assert_eq!(sub["independent"], false);

    let tab_bar = &app["tabBar"];
    assert_eq!(tab_bar["color"], "#000000");
    let home = &tab_bar["list"][0];
    assert_eq!(home["pagePath"], "pages/index/index");
    assert_eq!(home["iconPath"], "images/home.png");
    assert!(home.get("iconData").is_none());
    // No identical file on disk: the inline payload stays.
    assert!(home.get("selectedIconPath").is_none());
    assert_eq!(home["selectedIconData"], STANDARD.encode(b"not on disk"));
    assert_eq!(tab_bar["list"][1]["pagePath"], "pages/logs/logs");

    let index = read_json(&dir.join("pages/index/index.json"));
    assert_eq!(index, json!({"navigationBarTitleText": "Index"}));
    let logs = read_json(&dir.join("pages/logs/logs.json"));
    assert_eq!(logs, json!({}));
}

#[tokio::test]
async fn test_reconstruct_pretty_output_keeps_key_order() {
    let temp_dir = setup_test_dir();
    let config = write_manifest(temp_dir.path(), &sample_manifest());

    ConfigReconstructor::new(Context::new(4))
        .reconstruct(&config)
        .await;

    let text = fs::read_to_string(temp_dir.path().join("app.json")).unwrap();
    assert!(text.starts_with("{\n    \"pages\": ["));
    let order: Vec<usize> = ["\"pages\"", "\"window\"", "\"tabBar\"", "\"networkTimeout\"", "\"subPackages\""]
        .iter()
        .map(|key| text.find(key).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_page_config_over_manifest_gets_zero_weight() {
    let temp_dir = setup_test_dir();
    let config = write_manifest(
        temp_dir.path(),
        &json!({
            "pages": ["app-config"],
            "entryPagePath": "app-config.html",
            "page": {"app-config.html": {"window": {"title": "x"}}}
        }),
    );

    let weights = ConfigReconstructor::new(Context::new(4))
        .reconstruct(&config)
        .await;

    assert_eq!(weights.get(&config), Some(0));
    assert!(weights.deletable().is_empty());
}

#[tokio::test]
async fn test_manifest_overwrite_survives_bad_sibling_page() {
    let pages = [
        json!({
            "app-config.html": {"window": {"title": "x"}},
            "../escape": {"window": {}}
        }),
        json!({
            "../escape": {"window": {}},
            "app-config.html": {"window": {"title": "x"}}
        }),
    ];

    for page in pages {
        let temp_dir = setup_test_dir();
        let config = write_manifest(
            temp_dir.path(),
            &json!({
                "pages": ["app-config"],
                "entryPagePath": "app-config.html",
                "page": page
            }),
        );

        let weights = ConfigReconstructor::new(Context::new(4))
            .reconstruct(&config)
            .await;

        assert_eq!(weights.get(&config), Some(0));
        assert!(weights.deletable().is_empty());
        assert_eq!(read_json(&config), json!({"title": "x"}));
        assert!(!temp_dir.path().parent().unwrap().join("escape.json").exists());
    }
}

#[tokio::test]
async fn test_split_page_configs_reports_flag_and_error() {
    let temp_dir = setup_test_dir();
    let dir = temp_dir.path();
    let config = dir.join("app-config.json");
    let pages = json!({
        "app-config.html": {"window": {"title": "x"}},
        "../escape": {"window": {}},
        "pages/ok.html": {}
    });

    let (overwrites, result) = ConfigReconstructor::new(Context::new(4))
        .split_page_configs(&config, dir, pages.as_object().unwrap())
        .await;

    assert!(overwrites);
    assert!(result.is_err());
    // Pages after the bad one are still written.
    assert_eq!(read_json(&dir.join("pages/ok.json")), json!({}));
}

#[tokio::test]
async fn test_missing_entry_page_keeps_order() {
    let temp_dir = setup_test_dir();
    let config = write_manifest(
        temp_dir.path(),
        &json!({"pages": ["p1", "p2"], "entryPagePath": "gone.html"}),
    );

    let weights = ConfigReconstructor::new(Context::new(4))
        .reconstruct(&config)
        .await;

    let app = read_json(&temp_dir.path().join("app.json"));
    assert_eq!(app["pages"], json!(["p1", "p2"]));
    assert_eq!(weights.get(&config), Some(DELETE_THRESHOLD));
}

#[tokio::test]
async fn test_unparsable_manifest_reports_nothing() {
    let temp_dir = setup_test_dir();
    let config = temp_dir.path().join("app-config.json");
    fs::write(&config, b"{ definitely not json").unwrap();

    let weights = ConfigReconstructor::new(Context::new(4))
        .reconstruct(&config)
        .await;

    assert!(weights.is_empty());
    assert!(!temp_dir.path().join("app.json").exists());
}

#[tokio::test]
async fn test_bad_page_key_does_not_stop_other_stages() {
    let temp_dir = setup_test_dir();
    let config = write_manifest(
        temp_dir.path(),
        &json!({
            "pages": ["a", "b"],
            "entryPagePath": "b",
            "page": {"../escape": {"window": {}}}
        }),
    );

    let weights = ConfigReconstructor::new(Context::new(4))
        .reconstruct(&config)
        .await;

    let app = read_json(&temp_dir.path().join("app.json"));
    assert_eq!(app["pages"], json!(["b", "a"]));
    assert!(!temp_dir.path().parent().unwrap().join("escape.json").exists());
    assert_eq!(weights.get(&config), Some(DELETE_THRESHOLD));
}
