//! `paperflow status`: show providers, limits and resilience settings.

use paperflow_config::AppConfig;
use paperflow_core::{AgentType, AiProvider};
use paperflow_providers::RateLimiter;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("📚 Paperflow Status");
    println!("===================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());

    println!();
    println!("  Providers (limits per {} ms / {} ms):", config.rate_limits.short_window_ms, config.rate_limits.long_window_ms);
    let limiter = RateLimiter::new(&config.rate_limits);
    for snapshot in limiter.snapshots() {
        let key = if config.has_api_key(snapshot.provider) { "key set" } else { "no key" };
        println!(
            "    {:<11} {:>3}/{:<4} {}",
            snapshot.provider.to_string(),
            snapshot.short_term_limit,
            snapshot.long_term_limit,
            key
        );
    }
    limiter.shutdown();

    println!();
    println!("  Agents (provider, retries, initial delay):");
    for agent_type in AgentType::ALL {
        let route = config.route_for(agent_type);
        let retry = config.retry.settings_for(agent_type);
        let served = if config.has_api_key(route.provider) {
            "cloud"
        } else if agent_type.requires_external_api() {
            "unavailable"
        } else {
            "local"
        };
        println!(
            "    {:<24} {:<11} {} x {:>5} ms  [{served}]",
            agent_type.to_string(),
            route.provider.to_string(),
            retry.max_retries,
            retry.initial_delay_ms
        );
    }

    let cb = &config.circuit_breaker;
    println!();
    println!(
        "  Circuit breaker: open after {} failures, close after {} successes, cooldown {} s",
        cb.failure_threshold, cb.success_threshold, cb.open_timeout_secs
    );
    println!(
        "  Retry backoff:   capped at {} ms, jitter ±{:.0}%",
        config.retry.max_delay_ms,
        config.retry.jitter * 100.0
    );
    println!(
        "  State retention: {} s",
        config.pipeline.state_retention_secs
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, using defaults (see `paperflow config show`)");
    }

    if AiProvider::ALL.iter().all(|p| !config.has_api_key(*p)) {
        println!("  ⚠️  No API keys configured; `paperflow process` will use local agents");
    }

    Ok(())
}
