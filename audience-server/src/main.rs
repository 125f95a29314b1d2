use std::sync::Arc;

use audience_core::{
    create_engine, AudienceConfig, InMemoryObservationStore, ObservationStore, OcrBackendConfig, OcrEngine,
    PgObservationStore,
};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

use audience_server::http::{self, HttpState};
use audience_server::router::AppContext;
use audience_server::subsystems::batcher::{self, PendingBatches};
use audience_server::subsystems::intake::{self, Intake};
use audience_server::subsystems::pipeline::Pipeline;
use audience_server::telegram::{SummarySink, TelegramClient};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "audience.toml")]
    config: String,

    #[arg(long)]
    health: bool,

    /// Keep observations in memory instead of Postgres.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match AudienceConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let default_level = config
        .service
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    // Store
    let (store, pool) = if args.dry_run {
        tracing::warn!("Dry run: observations are kept in memory only");
        let store: Arc<dyn ObservationStore> = Arc::new(InMemoryObservationStore::new());
        (store, None)
    } else {
        let pool = match audience_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };

        if args.health {
            match audience_core::db::health_check(&pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            println!("✅ Audience DB health check passed");
            return Ok(());
        }

        if let Err(e) = audience_core::db::ensure_schema(&pool).await {
            eprintln!("Failed to create schema: {}", e);
            std::process::exit(1);
        }
        let store: Arc<dyn ObservationStore> = Arc::new(PgObservationStore::new(pool.clone()));
        (store, Some(pool))
    };

    // OCR
    let ocr: Arc<dyn OcrEngine> = match create_engine(OcrBackendConfig::from_config(&config.ocr)) {
        Ok(engine) => Arc::from(engine),
        Err(e) => {
            eprintln!("Failed to create OCR engine '{}': {}", config.ocr.backend, e);
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(Pipeline::new(store, ocr));
    let tz = config.service.timezone_offset_hours;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Telegram
    let mode = config.telegram.mode.as_str();
    let mut telegram: Option<Arc<TelegramClient>> = None;
    let mut webhook_intake: Option<Arc<Intake>> = None;

    if mode != "disabled" {
        let client = match TelegramClient::from_config(&config.telegram) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("Failed to create Telegram client: {}", e);
                std::process::exit(1);
            }
        };
        let sink: Arc<dyn SummarySink> = client.clone();

        let batches = if config.batching.enabled {
            let batches = Arc::new(PendingBatches::new());
            tasks.push(tokio::spawn(batcher::run_batch_loop(
                batches.clone(),
                pipeline.clone(),
                sink.clone(),
                config.batching.clone(),
                tz,
                tx.subscribe(),
            )));
            Some(batches)
        } else {
            None
        };

        let intake = Arc::new(Intake {
            pipeline: pipeline.clone(),
            telegram: client.clone(),
            sink,
            batches,
            identity: config.identity.clone(),
            timezone_offset_hours: tz,
        });

        match mode {
            "polling" => {
                tasks.push(tokio::spawn(intake::run_polling_loop(
                    intake,
                    config.telegram.poll_timeout_seconds,
                    tx.subscribe(),
                )));
            }
            "webhook" => {
                let public_url = match &config.telegram.public_url {
                    Some(u) => u.trim_end_matches('/').to_string(),
                    None => {
                        eprintln!("telegram.mode = \"webhook\" requires telegram.public_url");
                        std::process::exit(1);
                    }
                };
                if !config.http.enabled {
                    tracing::warn!("Webhook mode with HTTP disabled: updates will not be received");
                }
                let webhook_url = format!("{}/webhook", public_url);
                match client.set_webhook(&webhook_url).await {
                    Ok(()) => tracing::info!("Telegram webhook registered at {}", webhook_url),
                    Err(e) => tracing::error!("Failed to register webhook: {}", e),
                }
                webhook_intake = Some(intake);
            }
            other => {
                eprintln!("Unknown telegram.mode '{}'", other);
                std::process::exit(1);
            }
        }
        telegram = Some(client);
    }

    // HTTP REST API
    if config.http.enabled {
        let state = HttpState {
            ctx: AppContext {
                pipeline: pipeline.clone(),
                pool,
                timezone_offset_hours: tz,
            },
            intake: webhook_intake,
        };
        let host = config.http.host.clone();
        let port = config.http.port;
        let http_shutdown = tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = http::start_http_server(state, &host, port, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }));
    }

    if tasks.is_empty() {
        tracing::warn!("Nothing to run: Telegram and HTTP are both disabled");
        return Ok(());
    }

    let mut shutdown = tx.subscribe();
    let _ = shutdown.recv().await;

    if let (Some(client), "webhook") = (&telegram, mode) {
        if let Err(e) = client.delete_webhook().await {
            tracing::warn!("Failed to delete webhook: {}", e);
        }
    }

    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("Audience server stopped");

    Ok(())
}
