//! Environment-sourced configuration.
//!
//! All required values are validated eagerly at startup: a missing variable is
//! a fatal [`ConfigError::MissingEnvVar`], never a runtime error.

use crate::agents::AgentKind;
use crate::bus::BusDriver;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::notify::SmtpConfig;

/// Process configuration for a single agent instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which pipeline stage this process runs.
    pub agent: AgentKind,
    /// Which bus backend to consume through.
    pub bus_driver: BusDriver,
    /// Broker address.
    pub broker: String,
    /// Consumer group (log driver) / subscription name (queue driver).
    pub group_id: String,
    /// Input topic for this agent.
    pub topic: String,
    /// Downstream topic this agent emits to, if any.
    pub output_topic: Option<String>,
    /// Database path or URL.
    pub database_url: String,
    /// Deployment region, for startup diagnostics.
    pub region: String,
    /// LLM provider configuration.
    pub llm: LlmConfig,
    /// SMTP settings for the email notifier; `None` falls back to log-only dispatch.
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent = require("AGENT_TYPE")?.parse::<AgentKind>()?;
        let bus_driver = require("BUS_DRIVER")?.parse::<BusDriver>()?;

        Ok(Self {
            agent,
            bus_driver,
            broker: require("BUS_BROKER")?,
            group_id: require("GROUP_ID")?,
            topic: require("TOPIC")?,
            output_topic: std::env::var("OUTPUT_TOPIC").ok().filter(|t| !t.is_empty()),
            database_url: require("DATABASE_URL")?,
            region: require("REGION")?,
            llm: LlmConfig {
                backend: std::env::var("LLM_BACKEND")
                    .unwrap_or_else(|_| "openai".to_string())
                    .parse::<LlmBackend>()?,
                api_key: secrecy::SecretString::from(require("LLM_API_KEY")?),
                model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            },
            smtp: SmtpConfig::from_env()?,
        })
    }
}

/// Read a required environment variable.
fn require(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_rejects_missing_and_empty() {
        // SAFETY: test-only env mutation, keys are unique to this test.
        unsafe {
            std::env::remove_var("FS_TEST_REQUIRE_MISSING");
            std::env::set_var("FS_TEST_REQUIRE_EMPTY", "");
            std::env::set_var("FS_TEST_REQUIRE_SET", "value");
        }

        assert!(matches!(
            require("FS_TEST_REQUIRE_MISSING"),
            Err(ConfigError::MissingEnvVar(_))
        ));
        assert!(matches!(
            require("FS_TEST_REQUIRE_EMPTY"),
            Err(ConfigError::MissingEnvVar(_))
        ));
        assert_eq!(require("FS_TEST_REQUIRE_SET").unwrap(), "value");
    }
}
