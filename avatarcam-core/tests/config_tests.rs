//! Integration tests for configuration

use avatarcam_core::config::{
    sample_config, BridgeConfig, CameraBackendKind, ConfigFile, OutputResolution, RecoveryPolicy,
};
use avatarcam_core::{PixelFormat, SelectionPolicy};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_resolution_dimensions() {
    assert_eq!(OutputResolution::Source.dimensions(), None);
    assert_eq!(OutputResolution::P480.dimensions(), Some((854, 480)));
    assert_eq!(OutputResolution::P720.dimensions(), Some((1280, 720)));
    assert_eq!(OutputResolution::P1080.dimensions(), Some((1920, 1080)));
    assert_eq!(OutputResolution::P1440.dimensions(), Some((2560, 1440)));
    assert_eq!(OutputResolution::P2160.dimensions(), Some((3840, 2160)));
}

#[test]
fn test_resolution_from_string() {
    assert_eq!("source".parse::<OutputResolution>().unwrap(), OutputResolution::Source);
    assert_eq!("720p".parse::<OutputResolution>().unwrap(), OutputResolution::P720);
    assert_eq!("4K".parse::<OutputResolution>().unwrap(), OutputResolution::P2160);
    assert_eq!(
        "1280x960".parse::<OutputResolution>().unwrap(),
        OutputResolution::Custom {
            width: 1280,
            height: 960
        }
    );
    assert!("huge".parse::<OutputResolution>().is_err());
    assert!("12x".parse::<OutputResolution>().is_err());
}

#[test]
fn test_resolution_display_round_trips() {
    for res in [
        OutputResolution::Source,
        OutputResolution::P480,
        OutputResolution::P1080,
        OutputResolution::Custom {
            width: 800,
            height: 600,
        },
    ] {
        assert_eq!(res.to_string().parse::<OutputResolution>().unwrap(), res);
    }
}

#[test]
fn test_preset_keeps_small_sender_size() {
    // A 720p sender asked for 1080p stays 720p
    assert_eq!(OutputResolution::P1080.resolve(1280, 720), (1280, 720));
    assert_eq!(OutputResolution::P1080.resolve(2560, 1440), (1920, 1080));
}

#[test]
fn test_camera_backend_from_string() {
    assert_eq!("memshare".parse::<CameraBackendKind>().unwrap(), CameraBackendKind::MemShare);
    assert_eq!("V4L2".parse::<CameraBackendKind>().unwrap(), CameraBackendKind::V4l2Loopback);
    assert!("obs".parse::<CameraBackendKind>().is_err());
}

#[test]
fn test_bridge_config_builder() {
    let config = BridgeConfig::manual("VRChatCam")
        .with_resolution(OutputResolution::P720)
        .with_fps(60)
        .with_pixel_format(PixelFormat::Bgra8)
        .with_camera_name("Avatar")
        .with_transport_dir("/tmp/senders");

    assert_eq!(config.selection, SelectionPolicy::manual("VRChatCam"));
    assert_eq!(config.resolution, OutputResolution::P720);
    assert_eq!(config.fps, 60);
    assert_eq!(config.pixel_format, PixelFormat::Bgra8);
    assert_eq!(config.camera.name, "Avatar");
    assert_eq!(
        config.transport.directory.as_deref(),
        Some(std::path::Path::new("/tmp/senders"))
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_bridge_config_validation() {
    assert!(BridgeConfig::default().with_fps(0).validate_strict().is_err());
    assert!(BridgeConfig::default().with_fps(500).validate_strict().is_err());
    assert!(BridgeConfig::default()
        .with_pixel_format(PixelFormat::Yuyv)
        .validate_strict()
        .is_err());
    assert!(BridgeConfig::default()
        .with_resolution(OutputResolution::Custom {
            width: 0,
            height: 720
        })
        .validate_strict()
        .is_err());
    assert!(BridgeConfig::manual("").validate_strict().is_err());
    assert!(BridgeConfig::default()
        .with_camera_name("")
        .validate_strict()
        .is_err());

    let backwards = RecoveryPolicy {
        scan_backoff_base: Duration::from_secs(10),
        scan_backoff_max: Duration::from_secs(1),
        ..RecoveryPolicy::default()
    };
    assert!(BridgeConfig::default()
        .with_recovery(backwards)
        .validate_strict()
        .is_err());
}

#[test]
fn test_bridge_config_warnings() {
    assert!(BridgeConfig::default().validate().is_empty());

    let warnings = BridgeConfig::auto("").validate();
    assert!(warnings.iter().any(|w| w.contains("pattern")));

    let warnings = BridgeConfig::default().with_fps(120).validate();
    assert!(warnings.iter().any(|w| w.contains("120fps")));

    let zero_budget = RecoveryPolicy {
        sink_retry_budget: 0,
        ..RecoveryPolicy::default()
    };
    let warnings = BridgeConfig::default().with_recovery(zero_budget).validate();
    assert!(warnings.iter().any(|w| w.contains("sink_retry_budget")));
}

#[test]
fn test_config_file_default() {
    let config = ConfigFile::default();
    assert_eq!(config.source.name, None);
    assert_eq!(config.source.auto_pattern, "VRC");
    assert_eq!(config.output.resolution, "source");
    assert_eq!(config.output.pixel_format, "rgba8");
    assert_eq!(config.camera.name, "AvatarCam");
    assert_eq!(config.recovery.sink_retry_budget, 5);
}

#[test]
fn test_config_file_matches_bridge_defaults() {
    let config = ConfigFile::default().to_bridge_config().unwrap();
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn test_config_file_sample_parses() {
    let config: ConfigFile = toml::from_str(&sample_config()).expect("Sample config should parse");
    assert_eq!(config, ConfigFile::default());
}

#[test]
fn test_config_file_partial_uses_defaults() {
    let config: ConfigFile = toml::from_str(
        r#"
        [source]
        name = "VRChatCam"

        [output]
        resolution = "720p"
        "#,
    )
    .unwrap();

    let bridge = config.to_bridge_config().unwrap();
    assert_eq!(bridge.selection, SelectionPolicy::manual("VRChatCam"));
    assert_eq!(bridge.resolution, OutputResolution::P720);
    assert_eq!(bridge.fps, 30);
    assert_eq!(bridge.recovery, RecoveryPolicy::default());
}

#[test]
fn test_config_file_bad_values() {
    let mut config = ConfigFile::default();
    config.output.pixel_format = "cmyk".to_string();
    assert!(config.to_bridge_config().is_err());

    let mut config = ConfigFile::default();
    config.camera.backend = "obs".to_string();
    assert!(config.to_bridge_config().is_err());
}

#[test]
fn test_config_file_save_load() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("avatarcam").join("config.toml");

    let mut config = ConfigFile::default();
    config.output.resolution = "1080p".to_string();
    config.camera.name = "Test Camera".to_string();
    config.set_selection(&SelectionPolicy::manual("VRCStream"));
    config
        .save_to(config_path.clone())
        .expect("Failed to save config");

    let loaded = ConfigFile::load_from(config_path).expect("Failed to load config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.selection(), SelectionPolicy::manual("VRCStream"));
}

#[test]
fn test_config_file_selection_round_trip() {
    let mut config = ConfigFile::default();
    config.set_selection(&SelectionPolicy::manual("VRChatCam"));
    assert_eq!(config.source.name.as_deref(), Some("VRChatCam"));

    config.set_selection(&SelectionPolicy::auto("Avatar"));
    assert_eq!(config.source.name, None);
    assert_eq!(config.selection(), SelectionPolicy::auto("Avatar"));
}

#[test]
fn test_config_file_load_nonexistent() {
    let result = ConfigFile::load_from("/nonexistent/path/config.toml".into());
    // Should return default config, not error
    assert_eq!(result.unwrap(), ConfigFile::default());
}

#[test]
fn test_config_file_invalid_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[output\nfps = ").unwrap();
    assert!(ConfigFile::load_from(path).is_err());
}
