use std::sync::Arc;

use fraud_sentinel::agents::{AgentDeps, create_agent};
use fraud_sentinel::bus::{MemoryBus, Shutdown};
use fraud_sentinel::config::Config;
use fraud_sentinel::llm::create_provider;
use fraud_sentinel::notify::{EmailNotifier, LogNotifier, Notifier};
use fraud_sentinel::store::LibSqlStore;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    info!(
        agent = ?config.agent,
        driver = ?config.bus_driver,
        broker = %config.broker,
        group = %config.group_id,
        region = %config.region,
        "starting"
    );

    let store = if config.database_url == ":memory:" {
        LibSqlStore::new_memory().await?
    } else {
        LibSqlStore::new_local(std::path::Path::new(&config.database_url)).await?
    };

    let llm = create_provider(&config.llm)?;

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => Arc::new(EmailNotifier::new(smtp.clone())),
        None => Arc::new(LogNotifier),
    };

    let deps = AgentDeps {
        bus: Arc::new(MemoryBus::new(config.bus_driver)),
        store: Arc::new(store),
        llm,
        notifier,
        topic: config.topic.clone(),
        output_topic: config.output_topic.clone(),
    };

    let agent = create_agent(config.agent, deps);
    let (signal, shutdown) = Shutdown::new();
    let task = tokio::spawn(agent.run(shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining");
    signal.cancel();
    task.await?;

    info!("stopped");
    Ok(())
}
