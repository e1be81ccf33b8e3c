use std::sync::Arc;

use anyhow::{Context, Result};
use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, init_pool},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use traffic_controller::{
    AppState, Backends, Gateway,
    clock::SystemClock,
    config::GatewayConfig,
    forwarder::HttpAgentBackend,
    rate_limiter::{AdmissionController, RatePolicy},
    repositories::{
        AuditRepository, CredentialRepository, IdentityRepository, RedisRateWindowStore,
        SessionRepository,
    },
    routes, sweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    info!("Starting traffic controller");

    let config = GatewayConfig::from_env()?;

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    if common::database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations applied");
    }

    // Shared rate windows; the controller falls back to local counters if Redis is down
    let redis_pool = RedisPool::new(&RedisConfig::from_env()?).await?;
    match redis_pool.health_check().await {
        Ok(true) => info!("Redis connection successful"),
        _ => warn!("Redis unreachable at startup, rate limits start in local mode"),
    }

    let admission = AdmissionController::new(
        Arc::new(RedisRateWindowStore::new(redis_pool.clone())),
        RatePolicy::from(&config),
    );

    let backends = Backends {
        identities: Arc::new(IdentityRepository::new(pool.clone())),
        credentials: Arc::new(CredentialRepository::new(pool.clone())),
        sessions: Arc::new(SessionRepository::new(pool.clone())),
        audit: Arc::new(AuditRepository::new(pool.clone())),
    };

    let agent = HttpAgentBackend::new(&config.agent_backend_url, config.forward_timeout())?;
    info!("Forwarding to agent at {}", agent.endpoint());

    let gateway = Gateway::new(
        &config,
        admission,
        backends,
        Arc::new(agent),
        Arc::new(SystemClock),
    );

    let mut scheduler =
        sweeper::start_session_sweeper(gateway.clone(), &config.session_sweep_schedule).await?;

    let app_state = AppState {
        gateway,
        db_pool: Some(pool),
        redis_pool: Some(redis_pool),
    };

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Traffic controller listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down traffic controller");
    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }

    Ok(())
}
