#[cfg(test)]
mod tests {

    use crate::core::EngineConfig;
    use crate::parser::PatternConfig;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.mplayer.path, "mplayer");
        assert_eq!(config.mplayer.cache_size_kb, 384);
        assert!(!config.mplayer.always_build_index);
        assert_eq!(config.video_driver.as_deref(), Some("xv"));
        assert_eq!(config.quit_timeout_ms, 2000);
        assert!(config.proxy.http_proxy.is_none());
    }

    #[test]
    fn test_engine_config_serialization() {
        let mut config = EngineConfig::default();
        config.audio_driver = Some("alsa".to_string());
        config.colors.auto_adjust = true;
        config.colors.hue = 12;
        config.proxy.http_proxy = Some("http://proxy:3128".to_string());

        let serialized = serde_json::to_string(&config).expect("Failed to serialize config");
        let deserialized: EngineConfig = serde_json::from_str(&serialized).expect("Failed to deserialize config");

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_backward_compatibility() {
        // Old config files without newer fields must still load
        let old_config_json = r#"{
            "mplayer": {
                "path": "/usr/local/bin/mplayer",
                "cache_size_kb": 1024
            },
            "framedrop": false
        }"#;

        let config: EngineConfig = serde_json::from_str(old_config_json).expect("Failed to parse old config");

        assert_eq!(config.mplayer.path, "/usr/local/bin/mplayer");
        assert_eq!(config.mplayer.cache_size_kb, 1024);
        assert!(!config.framedrop);
        // Missing fields fall back to defaults
        assert_eq!(config.mplayer.patterns, PatternConfig::default());
        assert_eq!(config.grab_timeout_ms, 5000);
        assert_eq!(config.recorder, crate::core::RecorderConfig::default());
    }

    #[test]
    fn test_recorder_defaults() {
        let recorder = EngineConfig::default().recorder;
        assert_eq!(recorder.mencoder_path, "mencoder");
        assert_eq!(recorder.mencoder_args, vec!["-oac", "mp3lame", "-ovc", "lavc"]);
        assert!(recorder.record_copy);
        assert_eq!(recorder.ffmpeg_args.len(), 6);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_load_replaces_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config, EngineConfig::default());

        let rewritten = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<EngineConfig>(&rewritten).is_ok());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = EngineConfig::default();
        config.mplayer.additional_args = vec!["-nolirc".to_string()];
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.mplayer.additional_args, vec!["-nolirc".to_string()]);
    }
}
