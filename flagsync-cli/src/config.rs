use std::time::Duration;

use flagsync::{Config, RetryConfig};
use serde::Deserialize;

/// Contents of flagsync.toml. Every field can be overridden on the
/// command line or through the environment.
#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub sdk_key: Option<String>,
    pub stream_uri: Option<String>,
    pub base_uri: Option<String>,
    #[serde(default)]
    pub stream_path_suffix: String,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Endpoint settings as given on the command line (or via env vars, which
/// clap folds into the same fields).
#[derive(Debug, Default)]
pub struct Overrides {
    pub sdk_key: Option<String>,
    pub stream_uri: Option<String>,
    pub base_uri: Option<String>,
}

/// A missing config file is not an error; a broken one is.
pub fn load_file_config(path: &str) -> Result<FileConfig, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| format!("{}: {}", path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(format!("{}: {}", path, e)),
    }
}

/// Resolve each setting from: CLI arg > env var > flagsync.toml
pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Config, String> {
    let sdk_key = overrides.sdk_key.or(file.sdk_key).ok_or(
        "No SDK key specified. Use --sdk-key, set FLAGSYNC_SDK_KEY, or set sdk_key in flagsync.toml",
    )?;
    let stream_uri = overrides.stream_uri.or(file.stream_uri).ok_or(
        "No stream URI specified. Use --stream-uri, set FLAGSYNC_STREAM_URI, or set stream_uri in flagsync.toml",
    )?;
    let base_uri = overrides.base_uri.or(file.base_uri).ok_or(
        "No base URI specified. Use --base-uri, set FLAGSYNC_BASE_URI, or set base_uri in flagsync.toml",
    )?;

    let mut config = Config::new(sdk_key, stream_uri, base_uri)
        .with_stream_path_suffix(file.stream_path_suffix)
        .with_retry(file.retry);
    if let Some(secs) = file.connect_timeout_secs {
        config = config.with_connect_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(content: &str) -> FileConfig {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn test_file_values_are_used() {
        let config = resolve(
            Overrides::default(),
            file(
                r#"
                sdk_key = "file-key"
                stream_uri = "http://stream.local/"
                base_uri = "http://poll.local"
                stream_path_suffix = "/transformed"
                connect_timeout_secs = 3

                [retry]
                initial_delay_ms = 250
                max_delay_ms = 5000
                "#,
            ),
        )
        .unwrap();

        assert_eq!(config.sdk_key, "file-key");
        assert_eq!(config.stream_url(), "http://stream.local/all/transformed");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            sdk_key: Some("cli-key".into()),
            stream_uri: None,
            base_uri: Some("http://other".into()),
        };
        let config = resolve(
            overrides,
            file(
                r#"
                sdk_key = "file-key"
                stream_uri = "http://stream.local"
                base_uri = "http://poll.local"
                "#,
            ),
        )
        .unwrap();

        assert_eq!(config.sdk_key, "cli-key");
        assert_eq!(config.stream_uri, "http://stream.local");
        assert_eq!(config.base_uri, "http://other");
    }

    #[test]
    fn test_nan_jitter_in_file_disables_jitter() {
        let config = file(
            r#"
            [retry]
            jitter_ratio = nan
            "#,
        );
        assert_eq!(config.retry.jitter_ratio, 0.0);
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = resolve(Overrides::default(), FileConfig::default()).unwrap_err();
        assert!(err.contains("FLAGSYNC_SDK_KEY"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let config = load_file_config("does-not-exist.toml").unwrap();
        assert!(config.sdk_key.is_none());
    }
}
