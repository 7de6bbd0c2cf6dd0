use std::net::SocketAddr;
use std::sync::Arc;

use edumesh_core::{BuildVersion, Mode};
use edumesh_engine::EngineConfig;
use edumesh_infra::{PostgresStores, RedisWake};

use edumesh_api::app::{self, Backends, build_services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edumesh_observability::init();

    let version: BuildVersion = env!("CARGO_PKG_VERSION").parse()?;
    let secret = std::env::var("APP_SECRET").unwrap_or_else(|_| {
        tracing::warn!("APP_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });

    let mode = match std::env::var("MODE").as_deref() {
        Ok("satellite") => Mode::Satellite,
        _ => Mode::Hub,
    };
    let config = match mode {
        Mode::Hub => EngineConfig::hub(version, secret),
        Mode::Satellite => EngineConfig::satellite(
            version,
            secret,
            std::env::var("HUB_URL")?,
            std::env::var("HUB_API_KEY")?,
        ),
    };

    let mut backends = Backends::in_memory(&config)?;
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;
        let stores = PostgresStores::new(pool);
        stores.migrate().await?;
        backends.tasks = Arc::new(stores.tasks());
        backends.sync_jobs = Arc::new(stores.sync_jobs());
        backends.audits = Arc::new(stores.audits());
    } else {
        tracing::warn!("DATABASE_URL not set; queues are in-memory and not crash-safe");
    }
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        backends.wake = Arc::new(RedisWake::new(redis_url, "edumesh:wake")?);
    }

    let services = Arc::new(build_services(config, backends)?);
    tokio::spawn(services.engine.clone().run());

    let app = app::build_app(services);
    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(mode = %mode, "listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
