mod auth;
mod calendar;
mod email;
mod error;
mod model;
mod pipeline;
mod prompt;
mod rate_limiters;
mod request_tracing;
mod routes;
mod server_config;
mod state;
mod testing;

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use calendar::{client::CalendarClient, CalendarProvider};
use email::client::GmailClient;
use mimalloc::MiMalloc;
use model::{
    email_summary::PgResultStore, enrichment::EnrichmentResult, memory_store::MemoryResultStore,
};
use pipeline::{
    EnrichmentEngine, EnrichmentThrottle, MailProvider, PipelineContext, PipelineSettings,
    ResultStore, SyncSession,
};
use prompt::{CachedEngine, ChatEnrichmentEngine};
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database};
use server_config::cfg;
use state::ttl_cache::TtlCache;
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

/// Builds a mail provider for one caller's Gmail access token
pub type ProviderFactory = Arc<dyn Fn(String) -> Arc<dyn MailProvider> + Send + Sync>;
/// Same for Google Calendar; the Gmail access token carries the calendar scope
pub type CalendarFactory = Arc<dyn Fn(String) -> Arc<dyn CalendarProvider> + Send + Sync>;

#[derive(Clone)]
struct ServerState {
    pipeline: PipelineContext,
    answer_cache: TtlCache<EnrichmentResult>,
    provider_factory: ProviderFactory,
    calendar_factory: CalendarFactory,
}

impl ServerState {
    fn new(
        http_client: HttpClient,
        rate_limiters: RateLimiters,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let answer_cache = TtlCache::new(Duration::from_secs(cfg.cache.ttl_secs));
        let chat: Arc<dyn EnrichmentEngine> = Arc::new(ChatEnrichmentEngine::new(
            http_client.clone(),
            rate_limiters.clone(),
            &cfg.api,
            &cfg.model,
        ));
        let engine = Arc::new(CachedEngine::new(
            chat,
            answer_cache.clone(),
            cfg.cache.max_key_len,
        ));

        let pipeline = PipelineContext::new(
            engine,
            store,
            EnrichmentThrottle::new(cfg.pipeline.enrichment_concurrency),
            PipelineSettings::from_config(&cfg.pipeline),
        );

        let calendar_client = http_client.clone();
        let calendar_factory: CalendarFactory =
            Arc::new(move |token: String| -> Arc<dyn CalendarProvider> {
                Arc::new(CalendarClient::new(
                    calendar_client.clone(),
                    token,
                    cfg.calendar.clone(),
                ))
            });

        let provider_factory: ProviderFactory =
            Arc::new(move |token: String| -> Arc<dyn MailProvider> {
                Arc::new(GmailClient::new(
                    http_client.clone(),
                    token,
                    rate_limiters.clone(),
                    cfg.gmail.clone(),
                ))
            });

        Self {
            pipeline,
            answer_cache,
            provider_factory,
            calendar_factory,
        }
    }

    fn sync_session(&self, user_id: i32, gmail_token: String) -> SyncSession {
        let provider = (self.provider_factory)(gmail_token);
        SyncSession::new(provider, self.pipeline.clone(), user_id)
    }
}

async fn connect_store() -> anyhow::Result<Arc<dyn ResultStore>> {
    let Ok(db_url) = env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL is not set, results are kept in memory only");
        return Ok(Arc::new(MemoryResultStore::new()));
    };

    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);
    let conn = Database::connect(db_options).await?;

    let store = PgResultStore::new(conn);
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let store = connect_store().await?;
    let state = ServerState::new(http_client, RateLimiters::from_env(), store);

    let router = AppRouter::create(state.clone());

    let mut scheduler = JobScheduler::new()
        .await
        .expect("Failed to create scheduler");

    {
        let state_clone = state.clone();
        // Drop expired enrichment answers
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(cfg.cache.cleanup_interval_secs),
                move |uuid, _l| {
                    let state = state_clone.clone();
                    Box::pin(async move {
                        if let Err(e) = crate::state::cleanup::answer_cache_cleanup(state).await {
                            tracing::error!("Answer cache cleanup job {} failed: {:?}", uuid, e);
                        }
                    })
                },
            )?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    match scheduler.start().await {
        Ok(_) => tracing::info!("Scheduler started"),
        Err(e) => tracing::error!("Failed to start scheduler: {:?}", e),
    }

    match run_server(router, scheduler).await {
        Ok(Ok(())) => tracing::info!("Server shut down, exiting"),
        Ok(Err(e)) => tracing::error!("Server failed: {:?}", e),
        Err(e) => tracing::error!("Server task panicked: {:?}", e),
    }

    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {:?}", e);
    }
    tracing::info!("Cleanups done, shutting down");
}

fn run_server(router: Router, scheduler: JobScheduler) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("3000".to_string());
        tracing::info!("Enrichment server running on http://0.0.0.0:{}", port);
        tracing::info!("{}", *server_config::cfg);

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

        Ok(())
    })
}
