//! `paperflow process`: run one paper through the full pipeline.

use paperflow_agents::{build_registry, local_fallbacks};
use paperflow_config::AppConfig;
use paperflow_core::{AgentType, PaperRecord, PaperStore, ProgressUpdate};
use paperflow_pipeline::{InMemoryPaperStore, PipelineConfiguration, PipelineOrchestrator};
use paperflow_providers::{ProviderRouter, RateLimiter, build_from_config};
use paperflow_resilience::{CircuitBreaker, RetryPolicy};
use paperflow_telemetry::RetryMetrics;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

pub struct ProcessArgs {
    pub file: PathBuf,
    pub offline: bool,
    pub title: Option<String>,
    pub style: Option<String>,
    pub research: bool,
}

const SUMMARY_STYLES: [&str; 3] = ["brief", "standard", "detailed"];

pub async fn run(args: ProcessArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("Failed to read {}: {e}", args.file.display()))?;
    if content.trim().is_empty() {
        return Err(format!("{} is empty", args.file.display()).into());
    }

    let mut pipeline = PipelineConfiguration::from(&config.pipeline);
    if let Some(style) = args.style {
        if !SUMMARY_STYLES.contains(&style.as_str()) {
            return Err(format!("Unknown summary style '{style}' (expected brief, standard or detailed)").into());
        }
        pipeline.summary_style = style;
    }
    if args.research {
        pipeline.include_research_discovery = true;
        pipeline.include_perplexity_research = true;
    }

    // Shared resilience state
    let router = if args.offline {
        ProviderRouter::new()
    } else {
        build_from_config(&config)
    };
    if router.is_empty() && !args.offline {
        warn!("No provider API keys configured, running with local agents");
    }

    let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
    let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
    let metrics = Arc::new(RetryMetrics::new());
    let retry = Arc::new(RetryPolicy::new(
        config.retry.clone(),
        breaker.clone(),
        Arc::new(local_fallbacks()),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = config
        .circuit_breaker
        .monitor_interval()
        .map(|every| breaker.clone().spawn_monitor(every, shutdown_rx));

    let registry = build_registry(&config, &router, limiter.clone(), retry, args.offline);

    // Research stages need live services; drop them when nobody can serve them.
    for (agent_type, flag) in [
        (AgentType::RelatedPaperDiscovery, &mut pipeline.include_research_discovery),
        (AgentType::PerplexityResearcher, &mut pipeline.include_perplexity_research),
    ] {
        if *flag && !registry.contains(agent_type) {
            warn!(agent_type = %agent_type, "No provider available, skipping stage");
            *flag = false;
        }
    }

    // Paper
    let title = args.title.unwrap_or_else(|| {
        args.file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".into())
    });
    let paper_id = uuid::Uuid::new_v4().to_string();
    let store = Arc::new(InMemoryPaperStore::new());
    store
        .save(PaperRecord::new(&paper_id, "cli", &title, content))
        .await?;

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        registry,
        store,
        config.pipeline.state_retention(),
    ));

    println!("📄 Processing \"{title}\"");
    let sink = Arc::new(|update: &ProgressUpdate| {
        println!("   [{:>5.1}%] {}", update.percent_complete, update.message);
    });

    let outcome = orchestrator
        .process_paper(&paper_id, "cli", pipeline, sink)
        .await?
        .wait()
        .await;

    shutdown_tx.send_replace(true);
    limiter.shutdown();
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }

    let result = outcome?;
    println!();
    println!("{}", serde_json::to_string_pretty(&result)?);

    let totals = metrics.snapshot().totals;
    println!();
    println!(
        "   Attempts: {}  Retries: {}  Fallbacks: {} ({} ok)  Circuit trips: {}",
        totals.total_attempts,
        totals.total_retries,
        totals.fallback_attempts,
        totals.fallback_successes,
        totals.circuit_breaker_trips
    );

    if result.success {
        println!("   ✅ Pipeline completed in {} ms", result.duration_ms);
        Ok(())
    } else {
        let message = result
            .error_message
            .unwrap_or_else(|| format!("pipeline {}", result.status));
        Err(message.into())
    }
}
