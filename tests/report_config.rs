use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use stonesense::config::ReportConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STONESENSE_CONFIG",
        "STONESENSE_OUTPUT_DIR",
        "STONESENSE_DETECTOR",
        "STONESENSE_MODEL_PATH",
        "STONESENSE_DETECTOR_TIMEOUT_MS",
        "STONESENSE_WORKERS",
        "STONESENSE_MAX_UPLOAD_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ReportConfig::load().expect("load config");
    assert_eq!(cfg.output_dir, PathBuf::from("stonesense-out"));
    assert_eq!(cfg.detector.backend, "synthetic");
    assert_eq!(cfg.workers, 4);
    assert_eq!(cfg.upload.max_bytes, 10 * 1024 * 1024);
    assert!(cfg.render.embed_image);
    assert!(cfg.advisor.endpoint.is_none());
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let replay = file.path().with_extension("detections.json");
    let json = format!(
        r#"{{
            "output_dir": "/var/lib/stonesense",
            "workers": 2,
            "detector": {{
                "backend": "replay",
                "replay_path": "{}",
                "confidence_threshold": 0.4,
                "timeout_ms": 2500,
                "class_labels": ["kidney_stone", "staghorn"]
            }},
            "render": {{ "jpeg_quality": 75, "pdf": false }},
            "upload": {{ "max_bytes": 2048 }}
        }}"#,
        replay.display()
    );
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("STONESENSE_CONFIG", file.path());
    std::env::set_var("STONESENSE_WORKERS", "8");
    std::env::set_var("STONESENSE_DETECTOR_TIMEOUT_MS", "0");

    let cfg = ReportConfig::load().expect("load config");

    assert_eq!(cfg.output_dir, PathBuf::from("/var/lib/stonesense"));
    assert_eq!(cfg.workers, 8);
    assert_eq!(cfg.detector.backend, "replay");
    assert_eq!(cfg.detector.replay_path.as_deref(), Some(replay.as_path()));
    assert_eq!(cfg.detector.confidence_threshold, 0.4);
    assert_eq!(cfg.detector.timeout, None);
    assert_eq!(cfg.detector.class_labels, vec!["kidney_stone", "staghorn"]);
    assert_eq!(cfg.render.jpeg_quality, 75);
    assert!(!cfg.render.pdf);
    assert!(cfg.render.embed_image);
    assert_eq!(cfg.upload.max_bytes, 2048);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
output_dir = "reports"

[detector]
timeout_ms = 1500

[advisor]
endpoint = "https://llm.example/v1/chat/completions"
model = "local-model"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("STONESENSE_CONFIG", file.path());
    std::env::set_var("STONESENSE_OUTPUT_DIR", "override-dir");

    let cfg = ReportConfig::load().expect("load config");
    assert_eq!(cfg.output_dir, PathBuf::from("override-dir"));
    assert_eq!(cfg.detector.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(
        cfg.advisor.endpoint.as_deref(),
        Some("https://llm.example/v1/chat/completions")
    );
    assert_eq!(cfg.advisor.model, "local-model");

    clear_env();
}

#[test]
fn rejects_bad_env_and_unknown_keys() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STONESENSE_WORKERS", "many");
    assert!(ReportConfig::load().is_err());
    clear_env();

    std::env::set_var("STONESENSE_MAX_UPLOAD_BYTES", "0");
    assert!(ReportConfig::load().is_err());
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"database_url": "sqlite:scans.db"}"#).expect("write config");
    std::env::set_var("STONESENSE_CONFIG", file.path());
    let err = ReportConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
