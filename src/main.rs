use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certification_gate::api::{self, AppState};
use certification_gate::config::Config;
use certification_gate::db::{self, CertificationStore, MemoryStore, PgStore};
use certification_gate::services::certification::CertificationService;
use certification_gate::services::dispatcher::NotificationDispatcher;
use certification_gate::services::events::EventBus;
use certification_gate::services::mailer::{HttpMailer, LogMailer, Mailer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certification_gate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting certification gate...");

    // Load configuration
    let config = Config::from_env()?;
    let workflow = config.workflow();
    tracing::info!(
        token_ttl_days = config.token_ttl_days,
        "Configuration loaded successfully"
    );

    let store: Arc<dyn CertificationStore> = match &config.database_url {
        Some(database_url) => {
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match (&config.mail_api_url, &config.mail_api_key) {
        (Some(api_url), Some(api_key)) => Arc::new(HttpMailer::new(api_url, api_key.clone())?),
        _ => {
            tracing::warn!("Mail API not configured, emails are only logged");
            Arc::new(LogMailer)
        }
    };

    // Side effects run off the request path
    let (events, receiver) = EventBus::channel();
    let dispatcher = NotificationDispatcher::new(store.clone(), mailer, workflow.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run(receiver));

    let state = AppState {
        store: store.clone(),
        certifications: CertificationService::new(store, events, &workflow),
        config: workflow,
    };

    let app = api::app(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it the last event sender) is gone, let pending side effects finish
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "Notification dispatcher crashed");
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
