//! SkillSwap ledger - coin settlement for peer-to-peer mentoring

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skillswap_ledger::{
    config::{Args, StoreBackend},
    db::{DocumentStore, MemoryStore, MongoStore},
    ledger::Ledger,
    logging::AuditLogger,
    server::{self, AppState},
    services::{GatewayAuthorizer, PaymentAuthorizer, SandboxAuthorizer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("skillswap_ledger={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  SkillSwap Ledger");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store_backend);
    info!("Platform account: {}", args.platform_account_id);
    info!(
        "Payments: {}",
        args.payment_gateway_url.as_deref().unwrap_or("sandbox")
    );
    info!("======================================");

    let store: Arc<dyn DocumentStore> = match args.store_backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store - ledger state is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Mongo => match MongoStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(store) => {
                info!("MongoDB connected successfully");
                Arc::new(store)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                    Arc::new(MemoryStore::new())
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        },
    };

    let ledger = Ledger::new(store, args.ledger_config(), args.platform_account_id.clone());
    let platform = ledger.ensure_platform_account().await?;
    info!("Platform account ready: {} (balance {})", platform.id, platform.balance);

    let (key_id, key_secret) = args
        .payment_keys()
        .ok_or_else(|| anyhow::anyhow!("payment keys are not configured"))?;
    let authorizer: Arc<dyn PaymentAuthorizer> = match args.payment_gateway_url {
        Some(ref url) => Arc::new(GatewayAuthorizer::new(url, &key_id, &key_secret)?),
        None => {
            if !args.dev_mode {
                warn!("No PAYMENT_GATEWAY_URL set - orders are minted by the local sandbox");
            }
            Arc::new(SandboxAuthorizer::new(&key_id, &key_secret))
        }
    };

    let audit = AuditLogger::new(args.node_id.to_string());
    if let Some(ref path) = args.audit_log_path {
        match audit.init_file(path.clone()).await {
            Ok(()) => info!("Audit trail: {}", path.display()),
            Err(e) => warn!("Audit trail disabled, cannot open {}: {}", path.display(), e),
        }
    }

    let state = Arc::new(AppState::new(args, ledger, authorizer, audit)?);
    server::run(state).await?;

    Ok(())
}
