//! Tests for argument parsing and config loading

#[cfg(test)]
mod tests {
    use super::super::{load_config, Cli, Commands, LogsCommand};
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["callctx", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate {
                version,
                call_id,
                send_debug_logs,
                debug_samples,
                fail,
            } => {
                assert_eq!(version, "5.0.0");
                assert_eq!(call_id, None);
                assert!(!send_debug_logs);
                assert_eq!(debug_samples, 3);
                assert!(!fail);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_logs_find() {
        let cli = Cli::try_parse_from(["callctx", "--base-path", "/tmp/acc", "logs", "find", "42"])
            .unwrap();
        assert_eq!(cli.base_path.as_deref(), Some(std::path::Path::new("/tmp/acc")));
        assert!(matches!(
            cli.command,
            Commands::Logs {
                command: LogsCommand::Find { id: 42 }
            }
        ));
    }

    #[test]
    fn test_parse_versions_flags() {
        let cli = Cli::try_parse_from(["callctx", "--force-legacy", "versions", "--include-reference"])
            .unwrap();
        assert!(cli.force_legacy);
        assert!(matches!(
            cli.command,
            Commands::Versions {
                include_reference: true,
                include_experimental: false,
                json: false
            }
        ));
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let config = load_config(None, false).unwrap();
        assert!(!config.force_legacy_version);
        assert_eq!(config.call_logs_limit, 20);
    }

    #[test]
    fn test_load_config_from_file_with_override() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("callctx.json");
        std::fs::write(
            &path,
            r#"{"call_logs_limit": 5, "debug_info_poll_interval": {"secs": 1, "nanos": 0}}"#,
        )
        .unwrap();

        let config = load_config(Some(&path), true).unwrap();
        assert!(config.force_legacy_version);
        assert_eq!(config.call_logs_limit, 5);
        assert_eq!(config.debug_info_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_config_rejects_malformed_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_config(Some(&path), false).is_err());
    }
}
