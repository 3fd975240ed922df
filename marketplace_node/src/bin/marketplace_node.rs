use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use marketplace_node::{
    api::{create_router, AppState, JwtAuthority},
    chain::{PaymentContract, PublishVerifier, RegistryContract, RpcChainReader},
    config::Config,
    listing::{LifecycleManager, LifecycleSettings},
    pinning::PinataPinner,
    storage::MemoryStore,
    subscription::SubscriptionService,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Marketplace Node Arguments
#[derive(Parser)]
#[clap(name = "marketplace-node")]
#[clap(about = "Trading-bot marketplace backend with on-chain publish confirmation")]
struct Args {
    /// Path to node configuration file
    #[clap(long, default_value = "config/marketplace.yaml")]
    config: PathBuf,

    /// API port to listen on (overrides the configuration)
    #[clap(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting marketplace node...");
    info!("Config path: {:?}", args.config);

    if !args.config.exists() {
        info!("Config file not found, using defaults and environment");
    }
    let mut config = Config::load(Some(&args.config)).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if config.auth.jwt_secret.is_empty() {
        bail!("auth.jwt_secret is not set (MARKET_AUTH__JWT_SECRET)");
    }
    if config.pinning.jwt.is_empty() {
        warn!("pinning.jwt is not set; pin requests will be rejected by the pinning service");
    }
    if !config.chain.production {
        warn!(
            "Running in development mode with {} required confirmations",
            config.chain.effective_min_confirmations()
        );
    }

    let store = Arc::new(MemoryStore::new());
    info!("In-memory store initialized");

    let pinner = Arc::new(PinataPinner::new(&config.pinning).context("Failed to create pinning client")?);
    info!("Pinning client targets {}", config.pinning.endpoint);

    let chain = Arc::new(
        RpcChainReader::new(&config.chain.rpc_url, config.chain.timeout())
            .context("Failed to create chain reader")?,
    );
    let registry = RegistryContract::new(
        config.chain.registry_address()?,
        &config.chain.register_method,
        &config.chain.details_method,
    )?;
    info!("Chain reader connected to {}, registry {}", config.chain.rpc_url, registry.address_hex());

    let payments = PaymentContract::new(config.chain.payment_address()?)?;
    info!("Payments settle through {}", payments.address_hex());

    let min_confirmations = config.chain.effective_min_confirmations();
    let verifier = Arc::new(PublishVerifier::new(chain, registry, min_confirmations));
    info!("Chain confirmation requires {} confirmations", min_confirmations);

    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        pinner,
        verifier.clone(),
        LifecycleSettings {
            pin_timeout: config.pinning.timeout(),
            pin_stale_after: Duration::from_secs(config.listing.pin_stale_after_secs),
        },
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        store.clone(),
        store,
        verifier,
        payments,
        config.subscription.period_days,
    ));

    let state = AppState {
        lifecycle,
        subscriptions,
        auth: Arc::new(JwtAuthority::new(&config.auth.jwt_secret)),
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Marketplace API listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
