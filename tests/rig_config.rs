use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use pick_vision::{AngleConvention, CameraRole, ReadinessPolicy, RigConfig, Roi};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PICK_VISION_CONFIG",
        "PICK_VISION_TOP_SERIAL",
        "PICK_VISION_DETAIL_SERIAL",
        "PICK_VISION_TRIGGER_TIMEOUT_MS",
        "PICK_VISION_MAX_RETRIES",
        "PICK_VISION_ARRAY_SERIALS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "top": {
            "serial": "11111111",
            "threshold": 25,
            "angle_convention": "clockwise"
        },
        "detail": {
            "grayscale": false,
            "roi": { "x": 10, "y": 20, "width": 300, "height": 200 },
            "flip_vertical": true
        },
        "trigger": {
            "timeout_ms": 750,
            "max_retries": 3,
            "array_readiness": "skip"
        },
        "array": ["a1", "a2"]
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PICK_VISION_CONFIG", file.path());
    std::env::set_var("PICK_VISION_DETAIL_SERIAL", "22222222");
    std::env::set_var("PICK_VISION_MAX_RETRIES", "4");

    let cfg = RigConfig::load().expect("load config");

    assert_eq!(cfg.top.serial, "11111111");
    assert_eq!(cfg.top.extractor.threshold, 25);
    assert_eq!(cfg.top.extractor.angle_convention, AngleConvention::Clockwise);
    assert_eq!(cfg.detail.serial, "22222222");
    assert!(!cfg.detail.grayscale);
    assert_eq!(cfg.detail.extractor.threshold, 70);
    assert_eq!(cfg.detail.extractor.dilate_radius, 4);
    assert_eq!(
        cfg.detail.extractor.roi,
        Some(Roi {
            x: 10,
            y: 20,
            width: 300,
            height: 200
        })
    );
    assert!(cfg.detail.extractor.flip_vertical);
    assert_eq!(cfg.trigger.timeout, Duration::from_millis(750));
    assert_eq!(cfg.trigger.max_retries, 4);
    assert_eq!(cfg.array_trigger.max_retries, 4);
    assert_eq!(cfg.array_trigger.readiness, ReadinessPolicy::Skip);

    let detail = cfg.session(CameraRole::Detail);
    assert_eq!(detail.serials, vec![Some("22222222".to_string())]);
    assert!(!detail.grayscale);
    let array = cfg.array_session().expect("array session");
    assert_eq!(array.serials.len(), 2);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
array = ["x", "y", "z"]

[top]
serial = "33333333"
min_area_fraction = 0.02

[trigger]
array_ready_wait_ms = 25
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("PICK_VISION_CONFIG", file.path());

    let cfg = RigConfig::load().expect("load config");

    assert_eq!(cfg.top.serial, "33333333");
    assert!((cfg.top.extractor.min_area_fraction - 0.02).abs() < f64::EPSILON);
    assert_eq!(cfg.array, vec!["x", "y", "z"]);
    assert_eq!(
        cfg.array_trigger.readiness,
        ReadinessPolicy::Require(Duration::from_millis(25))
    );

    clear_env();
}

#[test]
fn env_array_serials_replace_file_list() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PICK_VISION_ARRAY_SERIALS", " c1, c2 ,,c3");
    let cfg = RigConfig::load().expect("load config");
    assert_eq!(cfg.array, vec!["c1", "c2", "c3"]);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PICK_VISION_MAX_RETRIES", "0");
    assert!(RigConfig::load().is_err());
    clear_env();

    std::env::set_var("PICK_VISION_TRIGGER_TIMEOUT_MS", "soon");
    assert!(RigConfig::load().is_err());
    clear_env();

    std::env::set_var("PICK_VISION_TRIGGER_TIMEOUT_MS", u64::MAX.to_string());
    assert!(RigConfig::load().is_err());
    clear_env();

    std::env::set_var("PICK_VISION_ARRAY_SERIALS", "1,2,3,4,5");
    assert!(RigConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "top": { "threshold": 0 } }"#)
        .expect("write config");
    std::env::set_var("PICK_VISION_CONFIG", file.path());
    assert!(RigConfig::load().is_err());

    clear_env();
}
