use anyhow::{Context, Result};
use clap::Parser;
use pdpd_controller::{FeatureRegistry, PolicyControllerFactory};
use pdpd_core::config::{AppConfig, LogFormat, LoggingConfig};
use pdpd_core::topic::{MemoryBroker, MemoryTopicEndpoints, TopicEndpointProvider};
use pdpd_lifecycle::LifecycleFsm;
use pdpd_pool::PoolingFeature;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// pdpd - policy decision point daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/pdpd.yaml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the PDP name
    #[arg(short, long, env = "PDPD_NAME")]
    name: Option<String>,

    /// Layer PDPD__SECTION__KEY environment variables over the file
    #[arg(long)]
    env_overrides: bool,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let level = logging.parse_level()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.env_overrides {
        AppConfig::from_config_builder(&args.config)
    } else {
        AppConfig::from_file(&args.config)
    }
    .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(name) = args.name {
        config.pdp.name = Some(name);
    }
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging)?;

    // the generated name must be stable across every component
    let name = config.pdp.resolve_name();
    config.pdp.name = Some(name.clone());

    info!(pdp = %name, config = ?args.config, "Starting pdpd");

    let endpoints: Arc<dyn TopicEndpointProvider> =
        Arc::new(MemoryTopicEndpoints::new(MemoryBroker::new()));
    endpoints.add_topic_sources(&config.topics);
    endpoints.add_topic_sinks(&config.topics);

    let features = FeatureRegistry::new();
    features.register(Arc::new(PoolingFeature::new(
        name.clone(),
        config.pooling.clone(),
        Arc::clone(&endpoints),
    )));

    let factory = Arc::new(PolicyControllerFactory::new(Arc::clone(&endpoints), features));
    for (controller, properties) in &config.controllers {
        factory
            .build(controller, properties.clone())
            .with_context(|| format!("Failed to build controller {}", controller))?;
    }

    let fsm = LifecycleFsm::new(&config.pdp, Arc::clone(&factory), Arc::clone(&endpoints))
        .context("Failed to create lifecycle state machine")?;
    fsm.start().context("Failed to start lifecycle state machine")?;

    info!(pdp = %name, state = %fsm.state(), controllers = config.controllers.len(), "pdpd running");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for shutdown signal");
    }
    info!("Received shutdown signal, stopping pdpd...");

    fsm.shutdown();
    factory.destroy_all();

    info!("pdpd stopped");
    Ok(())
}
