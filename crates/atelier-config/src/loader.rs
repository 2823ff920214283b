use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// resolved, the TOML is malformed, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if a placeholder cannot be resolved, the TOML is
    /// malformed, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if the download or polling policy is unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_download()?;
        self.validate_polling()?;
        self.warn_missing_credentials();
        Ok(())
    }

    fn validate_download(&self) -> anyhow::Result<()> {
        let download = &self.download;

        if download.max_attempts == 0 {
            anyhow::bail!("download.max_attempts must be at least 1");
        }

        if download.base_delay > download.max_delay {
            anyhow::bail!(
                "download.base_delay ({:?}) must not exceed download.max_delay ({:?})",
                download.base_delay,
                download.max_delay
            );
        }

        if download.attempt_timeout.is_zero() {
            anyhow::bail!("download.attempt_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_polling(&self) -> anyhow::Result<()> {
        let polling = &self.polling;

        if polling.interval.is_some_and(|d| d.is_zero()) {
            anyhow::bail!("polling.interval must be greater than 0");
        }

        if polling.timeout.is_some_and(|d| d.is_zero()) {
            anyhow::bail!("polling.timeout must be greater than 0");
        }

        if let (Some(request_timeout), Some(timeout)) = (polling.request_timeout, polling.timeout)
            && request_timeout > timeout
        {
            anyhow::bail!("polling.request_timeout ({request_timeout:?}) must not exceed polling.timeout ({timeout:?})");
        }

        Ok(())
    }

    fn warn_missing_credentials(&self) {
        if self.gateway.api_key.is_none() {
            tracing::warn!("no gateway api_key configured; backends without an override are called unauthenticated");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use crate::{Config, LogFormat};

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.gateway.base_url.as_str(), "https://api.302.ai/");
        assert!(config.gateway.api_key.is_none());
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.base_delay, Duration::from_secs(2));
        assert_eq!(config.download.max_delay, Duration::from_secs(30));
        assert_eq!(config.download.max_jitter, Duration::from_secs(1));
        assert_eq!(config.download.attempt_timeout, Duration::from_secs(120));
        assert!(config.polling.interval.is_none());
        assert_eq!(config.telemetry.log_filter, "info");
        assert_eq!(config.telemetry.format, LogFormat::Pretty);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [gateway]
            base_url = "http://127.0.0.1:9000"
            api_key = "sk-gateway"

            [backends.midjourney]
            base_url = "http://127.0.0.1:9100"
            api_key = "sk-mj"

            [polling]
            interval = "500ms"
            timeout = "2m"
            request_timeout = "10s"

            [download]
            max_attempts = 3
            base_delay = "100ms"
            max_delay = "1s"
            max_jitter = "0s"

            [telemetry]
            log_filter = "atelier_imagegen=debug"
            format = "json"
        "#;

        let config = Config::parse(raw).unwrap();

        assert_eq!(config.gateway.api_key.as_ref().unwrap().expose_secret(), "sk-gateway");
        let mj = &config.backends["midjourney"];
        assert_eq!(mj.base_url.as_ref().unwrap().as_str(), "http://127.0.0.1:9100/");
        assert_eq!(config.polling.interval, Some(Duration::from_millis(500)));
        assert_eq!(config.polling.timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.polling.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.download.max_jitter, Duration::ZERO);
        assert_eq!(config.telemetry.format, LogFormat::Json);
    }

    #[test]
    fn expands_environment_placeholders() {
        temp_env::with_var("ATELIER_LOADER_KEY", Some("sk-env"), || {
            let config = Config::parse("[gateway]\napi_key = \"{{ env.ATELIER_LOADER_KEY }}\"").unwrap();
            assert_eq!(config.gateway.api_key.unwrap().expose_secret(), "sk-env");
        });
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = Config::parse("[download]\nretries = 3").unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn rejects_malformed_duration() {
        let err = Config::parse("[polling]\ninterval = \"soon\"").unwrap_err();
        assert!(err.to_string().contains("invalid duration 'soon'"));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = Config::parse("[download]\nmax_attempts = 0").unwrap_err();
        insta::assert_snapshot!(err, @"download.max_attempts must be at least 1");
    }

    #[test]
    fn rejects_base_delay_above_cap() {
        let err = Config::parse("[download]\nbase_delay = \"1m\"\nmax_delay = \"30s\"").unwrap_err();
        assert!(err.to_string().contains("must not exceed download.max_delay"));
    }

    #[test]
    fn rejects_request_timeout_above_ceiling() {
        let err = Config::parse("[polling]\ntimeout = \"10s\"\nrequest_timeout = \"1m\"").unwrap_err();
        assert!(err.to_string().contains("polling.request_timeout"));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = Config::parse("[polling]\ninterval = \"0s\"").unwrap_err();
        assert!(err.to_string().contains("polling.interval"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nbase_url = \"http://localhost:1234\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.gateway.base_url.as_str(), "http://localhost:1234/");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::load(std::path::Path::new("/nonexistent/atelier.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/atelier.toml"));
    }
}
