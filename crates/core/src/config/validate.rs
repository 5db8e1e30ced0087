use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Rejects values the runtime cannot work with: a zero port, an empty worker
/// pool or queue, a zero poll interval, and autopilot without a usable
/// GitHub repository.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }
    if config.orchestrator.max_workers == 0 {
        return Err(invalid("orchestrator.max_workers must be at least 1"));
    }
    if config.orchestrator.queue_capacity == 0 {
        return Err(invalid("orchestrator.queue_capacity must be at least 1"));
    }
    let step = config.orchestrator.progress_notify_step;
    if step == 0 || step > 100 {
        return Err(invalid("orchestrator.progress_notify_step must be in 1..=100"));
    }
    if config.poller.interval_ms == 0 {
        return Err(invalid("poller.interval_ms cannot be 0"));
    }
    if config.autopilot.poll_interval_ms == 0 || config.autopilot.fast_poll_interval_ms == 0 {
        return Err(invalid("autopilot poll intervals cannot be 0"));
    }

    if let Some(github) = &config.github {
        if github.owner_and_name().is_none() {
            return Err(invalid(&format!(
                "github.repo must be in owner/name form, got '{}'",
                github.repo
            )));
        }
    }

    if config.autopilot.enabled && config.github.is_none() {
        return Err(invalid("autopilot.enabled requires a [github] section"));
    }
    if config.autopilot.feedback.enabled && config.autopilot.feedback.issue_labels.is_empty() {
        return Err(invalid(
            "autopilot.feedback.issue_labels cannot be empty while feedback is enabled",
        ));
    }

    if config.budget.enabled
        && config.budget.max_input_tokens <= 0
        && config.budget.max_output_tokens <= 0
    {
        return Err(invalid("budget.enabled requires at least one positive limit"));
    }

    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = Config::default();
        config.orchestrator.max_workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_queue_fails() {
        let mut config = Config::default();
        config.orchestrator.queue_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_autopilot_requires_github() {
        let config = load_config_from_str(
            r#"
[autopilot]
enabled = true
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("[github]"));
    }

    #[test]
    fn test_validate_feedback_without_labels_fails() {
        let mut config = Config::default();
        config.autopilot.feedback.issue_labels.clear();
        assert!(validate_config(&config).is_err());

        config.autopilot.feedback.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_malformed_repo_fails() {
        let config = load_config_from_str(
            r#"
[github]
token = "t"
repo = "widgets"
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_budget_without_limits_fails() {
        let mut config = Config::default();
        config.budget.enabled = true;
        assert!(validate_config(&config).is_err());

        config.budget.max_output_tokens = 1000;
        assert!(validate_config(&config).is_ok());
    }
}
