//! `paperflow config`: configuration management commands.

use paperflow_config::AppConfig;
use paperflow_core::{AgentType, AiProvider};

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if AiProvider::ALL.iter().all(|p| !config.has_api_key(*p)) {
                warnings.push(
                    "No API key set (set OPENAI_API_KEY, ANTHROPIC_API_KEY or PERPLEXITY_API_KEY)"
                        .to_string(),
                );
            }

            for agent_type in AgentType::ALL {
                let route = config.route_for(agent_type);
                if agent_type.requires_external_api() && !config.has_api_key(route.provider) {
                    warnings.push(format!(
                        "{agent_type} routes to {} which has no API key; the stage cannot run",
                        route.provider
                    ));
                }
            }

            if config.circuit_breaker.monitor_interval_secs == Some(0) {
                warnings.push("circuit_breaker.monitor_interval_secs = 0 disables the sweep".into());
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Failure threshold:  {}", config.circuit_breaker.failure_threshold);
            println!("   Open timeout:       {} s", config.circuit_breaker.open_timeout_secs);
            println!("   Max backoff:        {} ms", config.retry.max_delay_ms);
            println!("   Retry overrides:    {}", config.retry.agents.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = redacted(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?);
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

/// Replace API keys so `show` never prints secrets.
fn redacted(mut config: AppConfig) -> AppConfig {
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some("[REDACTED]".into());
        }
    }
    config
}
