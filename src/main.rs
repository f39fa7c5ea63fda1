use astro_engine::atoms::constants::PROCESSED_MESSAGE_RETENTION_DAYS;
use astro_engine::atoms::traits::{Calculator, ReplySender};
use astro_engine::engine::collaborators::{HttpCalculator, LocalCalculator, NominatimGeocoder, OpenAiGenerator};
use astro_engine::engine::translations::Catalog;
use astro_engine::engine::whatsapp::{self, LogSender, WhatsAppSender};
use astro_engine::{Engine, EngineConfig, EngineError, EngineResult, EngineSettings, Guards, MenuSet, Services, SqliteStore};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "astro-engine")]
#[command(about = "WhatsApp astrology concierge — webhook server and menu state machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// TOML config file; defaults are used when omitted
        #[arg(short, long, env = "ASTRO_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, env = "WHATSAPP_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
        #[arg(long, env = "WHATSAPP_APP_SECRET", hide_env_values = true)]
        app_secret: Option<String>,
        #[arg(long, env = "WHATSAPP_VERIFY_TOKEN", hide_env_values = true)]
        verify_token: Option<String>,
        #[arg(long, env = "GENERATION_API_KEY", hide_env_values = true)]
        generation_api_key: Option<String>,
    },
    /// Validate a menu definition and its translation keys
    CheckMenu {
        /// Menu TOML; the built-in menu when omitted
        #[arg(short, long)]
        menu: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve { config, access_token, app_secret, verify_token, generation_api_key } => {
            match EngineConfig::load(config.as_deref()) {
                Ok(mut cfg) => {
                    let overrides = [
                        (&mut cfg.whatsapp.access_token, access_token),
                        (&mut cfg.whatsapp.app_secret, app_secret),
                        (&mut cfg.whatsapp.verify_token, verify_token),
                        (&mut cfg.collaborators.generation.api_key, generation_api_key),
                    ];
                    for (slot, value) in overrides {
                        if let Some(v) = value.filter(|v| !v.is_empty()) {
                            *slot = v;
                        }
                    }
                    serve(cfg).await
                }
                Err(e) => Err(e),
            }
        }
        Commands::CheckMenu { menu } => check_menu(menu),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(cfg: EngineConfig) -> EngineResult<()> {
    let db_path = cfg.storage.resolved_path();
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let pruned = store.prune_processed(PROCESSED_MESSAGE_RETENTION_DAYS)?;
    if pruned > 0 {
        info!("[main] Pruned {} processed-message records", pruned);
    }

    let menus = MenuSet::load(cfg.conversation.menu_path.as_deref())?;
    let translator = Arc::new(Catalog::builtin(&cfg.conversation.default_locale)?);

    let calculator: Arc<dyn Calculator> = match &cfg.collaborators.calculation_url {
        Some(url) => Arc::new(HttpCalculator::new(url)),
        None => {
            warn!("[main] No calculation service configured — using the offline calculator");
            Arc::new(LocalCalculator)
        }
    };
    let sender: Arc<dyn ReplySender> = if cfg.whatsapp.can_send() {
        Arc::new(WhatsAppSender::new(cfg.whatsapp.clone()))
    } else {
        warn!("[main] WhatsApp credentials missing — replies are logged, not sent");
        Arc::new(LogSender)
    };
    let generation = &cfg.collaborators.generation;

    let services = Services {
        translator,
        calculator,
        payments: store.clone(),
        geocoder: Arc::new(NominatimGeocoder::new(
            &cfg.collaborators.geocoder_url,
            &cfg.collaborators.geocoder_user_agent,
        )),
        generator: Arc::new(OpenAiGenerator::new(&generation.base_url, &generation.api_key, &generation.model)),
        sender,
    };

    let engine = Arc::new(Engine::new(
        menus,
        store,
        services,
        Guards::from_config(&cfg.resilience),
        EngineSettings::from_config(&cfg.conversation),
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[main] Shutdown requested");
            signal.store(true, Ordering::Relaxed);
        }
    });

    whatsapp::run_server(engine, cfg.server, cfg.whatsapp, stop).await
}

fn check_menu(path: Option<PathBuf>) -> EngineResult<()> {
    let set = MenuSet::load(path.as_deref())?;
    let catalog = Catalog::builtin("en")?;

    let mut untranslated: Vec<&str> = set
        .tree
        .nodes()
        .flat_map(|n| std::iter::once(n.title.as_str()).chain(n.prompt.as_deref()))
        .filter(|key| !catalog.contains(key))
        .collect();
    untranslated.sort();
    untranslated.dedup();

    println!(
        "menu ok: {} nodes, depth {}, {} triggers",
        set.tree.nodes().count(),
        set.tree.depth(),
        set.registry.len()
    );
    for locale in catalog.locales() {
        let missing = catalog.missing_keys(locale);
        if !missing.is_empty() {
            println!("locale '{}' falls back to English for {} key(s)", locale, missing.len());
        }
    }
    if untranslated.is_empty() {
        Ok(())
    } else {
        for key in &untranslated {
            println!("untranslated: {}", key);
        }
        Err(EngineError::Config(format!("{} menu key(s) have no translation", untranslated.len())))
    }
}
