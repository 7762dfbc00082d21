use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use recoveries_agent::customers::{
    CustomerDirectory, GatewayCustomerDirectory, StaticCustomerDirectory,
};
use recoveries_agent::gateway::{GatewayError, ToolGateway};
use recoveries_agent::llm::{AnthropicClient, GatewayModelClient, ModelClient, ModelError};
use recoveries_agent::orchestrator::{PromptSource, PromptSuite};
use recoveries_agent::prompts::{HttpPromptFetcher, PromptFetcher, PromptRef, PromptResolver};
use recoveries_agent::session::InMemorySessionStore;
use recoveries_agent::telemetry::TracingTelemetry;
use recoveries_agent::RecoveriesAgent;
use recoveries_core::config::{
    AppConfig, ConfigError, LlmTransport, LoadOptions, PromptsConfig,
};
use thiserror::Error;
use tracing::{debug, info};

const SYSTEM_PROMPT_FILE: &str = "andrea_system_prompt.txt";
const EXTRACTION_PROMPT_FILE: &str = "extract_ptp_json_prompt.txt";

pub struct Application {
    pub config: AppConfig,
    pub agent: Arc<RecoveriesAgent>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model client construction failed: {0}")]
    ModelClient(#[source] ModelError),
    #[error("gateway client construction failed: {0}")]
    Gateway(#[source] GatewayError),
    #[error("prompt service client construction failed: {0}")]
    PromptService(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let gateway = ToolGateway::new(
        config.gateway.base_url.clone(),
        Duration::from_secs(config.gateway.timeout_secs),
    )
    .map_err(BootstrapError::Gateway)?;

    let model: Arc<dyn ModelClient> = match config.llm.transport {
        LlmTransport::Direct => {
            let Some(api_key) = config.llm.api_key.clone() else {
                return Err(BootstrapError::Config(ConfigError::Validation(
                    "llm.api_key is required for the direct transport".to_string(),
                )));
            };
            Arc::new(
                AnthropicClient::new(
                    api_key,
                    config.llm.base_url.clone(),
                    config.llm.model.clone(),
                    Duration::from_secs(config.llm.timeout_secs),
                )
                .map_err(BootstrapError::ModelClient)?,
            )
        }
        LlmTransport::Gateway => Arc::new(GatewayModelClient::new(
            gateway.clone(),
            config.llm.model.clone(),
            config.gateway.enabled,
        )),
    };

    let fetcher: Option<Box<dyn PromptFetcher>> = match &config.prompts.base_url {
        Some(base_url) => Some(Box::new(
            HttpPromptFetcher::new(
                base_url.clone(),
                Duration::from_secs(config.prompts.timeout_secs),
            )
            .map_err(BootstrapError::PromptService)?,
        )),
        None => None,
    };
    let resolver =
        PromptResolver::new(fetcher, Duration::from_secs(config.prompts.cache_ttl_secs));

    let prompts = PromptSuite {
        resolver,
        system: PromptSource {
            reference: prompt_ref(
                &config.prompts,
                config.prompts.system_slug.as_deref(),
                config.prompts.system_version.as_deref(),
            ),
            fallback: read_fallback(&config.prompts.fallback_dir, SYSTEM_PROMPT_FILE).await,
        },
        extraction: PromptSource {
            reference: prompt_ref(
                &config.prompts,
                config.prompts.extraction_slug.as_deref(),
                config.prompts.extraction_version.as_deref(),
            ),
            fallback: read_fallback(&config.prompts.fallback_dir, EXTRACTION_PROMPT_FILE).await,
        },
    };

    let customers: Arc<dyn CustomerDirectory> = if config.gateway.enabled {
        Arc::new(GatewayCustomerDirectory::new(gateway.clone()))
    } else {
        Arc::new(StaticCustomerDirectory)
    };

    let mut agent = RecoveriesAgent::new(
        config.business_rules,
        prompts,
        model,
        Arc::new(InMemorySessionStore::new()),
        customers,
    )
    .with_telemetry(Arc::new(TracingTelemetry));
    if config.gateway.enabled {
        agent = agent.with_record_gateway(gateway);
    }

    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        "agent pipeline constructed"
    );

    Ok(Application { config, agent: Arc::new(agent) })
}

fn prompt_ref(
    prompts: &PromptsConfig,
    slug: Option<&str>,
    version: Option<&str>,
) -> Option<PromptRef> {
    let slug = slug?;
    let mut reference = PromptRef::new(prompts.project.clone(), slug);
    // Environment and version pins are mutually exclusive; config
    // validation rejects both being set.
    if let Some(environment) = &prompts.environment {
        reference = reference.with_environment(environment.clone());
    } else if let Some(version) = version {
        reference = reference.with_version(version);
    }
    Some(reference)
}

async fn read_fallback(dir: &Path, file: &str) -> Option<String> {
    let path = dir.join(file);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            debug!(
                event_name = "system.bootstrap.blank_fallback_prompt",
                path = %path.display(),
                "fallback prompt file is blank, ignoring"
            );
            None
        }
        Err(error) => {
            debug!(
                event_name = "system.bootstrap.missing_fallback_prompt",
                path = %path.display(),
                error = %error,
                "fallback prompt file unavailable"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use recoveries_core::config::{ConfigOverrides, LlmTransport, LoadOptions};

    use super::{bootstrap, prompt_ref, read_fallback};

    fn valid_overrides() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("test-key".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_succeeds_with_an_api_key_override() {
        let app = bootstrap(valid_overrides())
            .await
            .expect("bootstrap should succeed with valid overrides");

        assert_eq!(app.config.llm.transport, LlmTransport::Direct);
        assert!(!app.config.gateway.enabled);
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_an_api_key_for_direct_transport() {
        let result = bootstrap(LoadOptions::default()).await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn gateway_transport_bootstraps_without_an_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_transport: Some(LlmTransport::Gateway),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_fallback_prompt_files_are_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        assert!(read_fallback(dir.path(), "does_not_exist.txt").await.is_none());
    }

    #[tokio::test]
    async fn fallback_prompt_files_are_read_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        tokio::fs::write(dir.path().join("andrea_system_prompt.txt"), "You are Andrea.")
            .await
            .expect("write should succeed");

        let text = read_fallback(dir.path(), "andrea_system_prompt.txt").await;
        assert_eq!(text.as_deref(), Some("You are Andrea."));
    }

    #[test]
    fn environment_pin_takes_precedence_over_version() {
        let mut prompts = recoveries_core::config::AppConfig::default().prompts;
        prompts.environment = Some("staging".to_string());

        let reference = prompt_ref(&prompts, Some("andrea-recoveries-agent"), Some("v3"))
            .expect("reference should be built");
        assert_eq!(reference.environment.as_deref(), Some("staging"));
        assert!(reference.version.is_none());
    }

    #[test]
    fn missing_slug_yields_no_reference() {
        let prompts = recoveries_core::config::AppConfig::default().prompts;
        assert!(prompt_ref(&prompts, None, None).is_none());
    }
}
