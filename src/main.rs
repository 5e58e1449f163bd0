use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plsgate::config::Config;
use plsgate::db::StubPool;
use plsgate::logging::JsonFormatter;
use plsgate::server::Server;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::new(&config.logging.filter);
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(config.logging.service_name.clone())),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting plsgate server...");
    config.log_summary();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let pool = Arc::new(StubPool::new(config.gateway.pool_size));
    let server = Server::new(config.server, config.gateway, pool)?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    server.trigger_shutdown();
    let drained = server.wait_for_drain(server.drain_timeout()).await;
    if drained {
        info!("All connections drained, exiting");
    } else {
        info!("Drain timeout reached, exiting with connections still active");
    }

    Ok(())
}
