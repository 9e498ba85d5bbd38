/// Configures the retry budget, backoff curve and retryable statuses.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub initial_backoff_ms: u64,
    /// Ceiling for computed backoff delays in milliseconds.
    pub max_backoff_ms: u64,
    /// Largest random fraction removed from a computed delay.
    pub jitter_ratio: f64,
    /// Longest server retry hint honored, in milliseconds.
    pub max_retry_after_ms: u64,
    /// Stop retrying once the call has run this long.
    pub max_elapsed_ms: Option<u64>,
    /// Per-attempt timeout. Expiry counts as a retryable transport error.
    pub attempt_timeout_ms: Option<u64>,
    /// Retryable status codes in addition to 5xx.
    pub retryable_statuses: Vec<u16>,
    /// Retry every 5xx status.
    pub retry_server_errors: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            jitter_ratio: 0.25,
            max_retry_after_ms: 60_000,
            max_elapsed_ms: None,
            attempt_timeout_ms: None,
            retryable_statuses: vec![408, 409, 429],
            retry_server_errors: true,
        }
    }
}

impl ClientOptions {
    /// Total physical attempts allowed per logical call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Default options with overrides from the environment.
    ///
    /// Reads `DISPATCH_HTTP_MAX_RETRIES` and `DISPATCH_HTTP_TIMEOUT_MS`
    /// (per-attempt timeout). Missing variables keep their defaults.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut options = Self::default();
        if let Some(value) = read_env_u64("DISPATCH_HTTP_MAX_RETRIES")? {
            options.max_retries = u32::try_from(value)
                .map_err(|_| format!("DISPATCH_HTTP_MAX_RETRIES is out of range: {value}"))?;
        }
        if let Some(value) = read_env_u64("DISPATCH_HTTP_TIMEOUT_MS")? {
            options.attempt_timeout_ms = Some(value);
        }
        Ok(options)
    }
}

fn read_env_u64(name: &str) -> std::result::Result<Option<u64>, String> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{name} must be a non-negative integer, got '{value}'")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::ClientOptions;

    #[test]
    fn defaults_allow_three_attempts() {
        let options = ClientOptions::default();
        assert_eq!(options.max_attempts(), 3);
        assert_eq!(options.retryable_statuses, vec![408, 409, 429]);
    }

    #[test]
    fn max_attempts_saturates() {
        let options = ClientOptions {
            max_retries: u32::MAX,
            ..ClientOptions::default()
        };
        assert_eq!(options.max_attempts(), u32::MAX);
    }
}
