use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use nextrouter_core::{EngineConfig, LogSink, engine::ProxyEngine};
use nextrouter_dsl::Registry;
use nextrouter_router::{JsonKeystore, ModelRouter, RouterState, TokenBindings, proxy_router};

mod reload;

#[derive(Parser)]
#[command(name = "nextrouter")]
struct Cli {
    /// Directory of provider `.conf` files.
    #[arg(long, env = "NEXTROUTER_DSL_DIR", default_value = "providers")]
    dsl_dir: PathBuf,
    /// JSON keystore: provider -> { value, base_url?, name? }.
    #[arg(long, env = "NEXTROUTER_KEYS", default_value = "keys.json")]
    keys: PathBuf,
    /// Optional JSON model routing table: model -> [providers].
    #[arg(long, env = "NEXTROUTER_MODELS")]
    models: Option<PathBuf>,
    /// Optional JSON downstream-token bindings: token -> provider.
    #[arg(long, env = "NEXTROUTER_TOKEN_BINDINGS")]
    token_bindings: Option<PathBuf>,
    /// Optional OAuth token cache directory (files are written 0600).
    #[arg(long, env = "NEXTROUTER_TOKEN_DIR")]
    token_dir: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 8788)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let registry = Arc::new(
        Registry::load_dir(&cli.dsl_dir)
            .with_context(|| format!("loading provider configs from {:?}", cli.dsl_dir))?,
    );
    info!(
        event = "registry_loaded",
        providers = registry.len(),
        dir = %cli.dsl_dir.display()
    );

    let keystore = Arc::new(
        JsonKeystore::load(&cli.keys)
            .with_context(|| format!("loading keystore {:?}", cli.keys))?,
    );

    let routes: HashMap<String, Vec<String>> = match &cli.models {
        Some(path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("loading model routes {path:?}"))?;
            serde_json::from_slice(&raw).context("parsing model routes")?
        }
        None => HashMap::new(),
    };
    let model_router = Arc::new(ModelRouter::new(routes));

    let token_bindings = Arc::new(match &cli.token_bindings {
        Some(path) => TokenBindings::load(path)
            .with_context(|| format!("loading token bindings {path:?}"))?,
        None => TokenBindings::default(),
    });

    let mut config = EngineConfig::default();
    config.oauth.persist_dir = cli.token_dir.clone();
    let engine = Arc::new(ProxyEngine::new(
        registry.clone(),
        config,
        Arc::new(LogSink),
    )?);

    reload::spawn_sighup_reload(registry, cli.dsl_dir.clone());

    let state = RouterState {
        engine,
        keystore,
        token_bindings,
        model_router,
    };
    let app = proxy_router(state);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(event = "listening", addr = %bind);
    axum::serve(listener, app).await?;
    Ok(())
}
