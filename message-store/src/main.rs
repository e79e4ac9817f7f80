use std::sync::Arc;

use message_store::api::{create_router, ApiState};
use message_store::config::Config;
use message_store::handlers::{PersistHandler, TelemetryHandler};
use message_store::kafka::consumer::HandlerRegistry;
use message_store::kafka::EventBus;
use message_store::lifecycle::Container;
use message_store::server::{management_router, serve};
use message_store::store::DocumentStore;

use health::HealthRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn termination_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("starting up...");

    let config = Config::init_with_defaults().expect("failed to load configuration from env");

    let health_registry = HealthRegistry::new();
    let consumer_liveness =
        health_registry.register("consumer", config.consumer_liveness_deadline());

    let store = DocumentStore::connect(&config).expect("failed to initialize document store");

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(PersistHandler::new(store.clone())));
    registry.register(Arc::new(TelemetryHandler));

    let event_bus = EventBus::new(
        &config.kafka,
        config.fetch_retry_policy(),
        config.commit_retry_policy(),
        registry,
        consumer_liveness,
    )
    .expect("failed to initialize kafka event bus");
    let publisher = event_bus.publisher();

    let shutdown = CancellationToken::new();

    let mut container = Container::new();
    container.add(Box::new(store));
    container.add(Box::new(event_bus));

    if let Err(err) = container.start_all(&shutdown).await {
        error!(error = ?err, "failed to start components");
        std::process::exit(1);
    }

    let api_server = tokio::spawn(serve(
        create_router(ApiState { publisher }),
        config.api_bind(),
        shutdown.clone(),
    ));
    let management_server = tokio::spawn(serve(
        management_router(health_registry),
        config.management_bind(),
        shutdown.clone(),
    ));

    termination_signal().await;
    info!("termination signal received, shutting down...");
    shutdown.cancel();

    match container.stop_all(config.shutdown_timeout()).await {
        Ok(()) => info!("service stopped gracefully"),
        Err(err) => error!(error = ?err, "graceful shutdown failed"),
    }

    for server in [api_server, management_server] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "server failed"),
            Err(err) => error!(error = %err, "server task panicked"),
        }
    }
}
