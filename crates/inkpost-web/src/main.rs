use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use inkpost_core::{
    Clock, CounterStore, InMemoryCounterStore, InMemoryCredentialStore, RedisCounterStore,
    SystemClock,
};
use inkpost_web::config::{CounterBackend, ServerConfig};
use inkpost_web::mail::notifier_from_config;
use inkpost_web::state::{AppState, Dependencies};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inkpost_web=debug,inkpost_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    let tls_config = config.tls.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let counters: Arc<dyn CounterStore> = match config.rate_limit.backend {
        CounterBackend::Redis => {
            let url = config
                .rate_limit
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("rate_limit.backend = \"redis\" needs redis_url"))?;
            let store = RedisCounterStore::connect(url, config.timeouts.counter()).await?;
            tracing::info!("Rate-limit counters in Redis");
            Arc::new(store)
        }
        CounterBackend::Memory => {
            let store = Arc::new(InMemoryCounterStore::new());

            // Expired window cleanup task
            let cleanup_store = store.clone();
            let cleanup_clock = clock.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    cleanup_store.purge_expired(cleanup_clock.now());
                }
            });

            store as Arc<dyn CounterStore>
        }
    };

    let deps = Dependencies {
        store: Arc::new(InMemoryCredentialStore::new()),
        notifier: notifier_from_config(&config.mail),
        counters,
        clock,
    };

    let state = AppState::new(config, deps)?;
    let app = inkpost_web::build_router(state)?;

    if let (Some(cert), Some(key)) = (&tls_config.cert_path, &tls_config.key_path) {
        use axum_server::tls_rustls::RustlsConfig;
        let rustls_config = RustlsConfig::from_pem_file(cert, key).await?;
        tracing::info!("inkpost-web listening on https://{}", bind_addr);
        axum_server::bind_rustls(bind_addr, rustls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("inkpost-web listening on http://{}", bind_addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}
