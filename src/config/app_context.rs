use crate::config::chains::ChainRegistry;
use crate::config::constants::{DEFAULT_DB_POOL_SIZE, DEFAULT_REDIS_CONNECTION_TIMEOUT_MS};
use crate::config::settings::Settings;
use crate::oracle::cached::CachedPriceOracle;
use crate::oracle::coingecko::CoinGeckoSource;
use crate::oracle::PriceOracle;
use crate::services::{CreditEngine, QueueEngine, ScanOrchestrator, SweepEngine};
use crate::storage::cache::{RedisCooldown, RedisPool};
use crate::storage::persistent::{DbPool, PgStore};
use crate::storage::CooldownStore;
use crate::tg_bot::notifications::TelegramNotifier;
use crate::types::keys::{HdSeed, TreasuryKeys};
use crate::types::notification::{LogNotifier, Notifier};
use crate::utils::keys::keypair_from_base58_string;
use crate::storage;
use anyhow::Result;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use teloxide::net::client_from_env;
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zeroize::Zeroizing;

// app context built once at startup and shared by the scheduler loops
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub db_pool: DbPool,
    pub redis_pool: RedisPool,
    pub chains: ChainRegistry,
    pub locks: Arc<dyn CooldownStore>,
    pub credit: Arc<CreditEngine>,
    pub scans: Arc<ScanOrchestrator>,
    pub queue: Arc<QueueEngine>,
    pub sweeps: Arc<SweepEngine>,
}

impl Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("settings", &self.settings)
            .field("chains", &self.chains)
            .field("sweep_chains", &self.sweeps.chains())
            .finish()
    }
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::new(level)
        .add_directive("h2::codec=info".parse().unwrap())
        .add_directive("hyper::client=info".parse().unwrap())
        .add_directive("hyper_util=info".parse().unwrap())
        .add_directive("tokio_postgres=info".parse().unwrap())
        .add_directive("reqwest=info".parse().unwrap())
        .add_directive("teloxide=info".parse().unwrap())
        .add_directive("ethers_providers=info".parse().unwrap());
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}

fn load_treasury(settings: &Settings) -> Result<TreasuryKeys> {
    let solana = match &settings.keys.solana_treasury_private_key {
        Some(key) => Some(Arc::new(keypair_from_base58_string(key)?)),
        None => None,
    };
    Ok(TreasuryKeys {
        evm_private_key: settings
            .keys
            .evm_treasury_private_key
            .as_ref()
            .map(|key| Arc::new(Zeroizing::new(key.clone()))),
        solana,
    })
}

impl AppContext {
    /// Loads settings, starts logging and wires every engine. Panics on unusable configuration.
    pub async fn new(config_filename: &str) -> Self {
        // loading settings
        let settings = Settings::new(config_filename).expect("Failed to load settings");
        init_logging(&settings.logger.level);

        // storage: redis locks and cooldowns, postgres ledger
        let db_pool = storage::persistent::connect(
            &settings.storage.database_uri,
            settings.storage.db_pool_size.unwrap_or(DEFAULT_DB_POOL_SIZE),
        )
        .expect("Failed to create database pool");
        let redis_pool = storage::cache::connect(
            &settings.storage.redis_uri,
            settings
                .storage
                .redis_connection_timeout_ms
                .unwrap_or(DEFAULT_REDIS_CONNECTION_TIMEOUT_MS),
        )
        .expect("Failed to create redis pool");
        let store = Arc::new(PgStore::new(db_pool.clone()));
        let locks: Arc<dyn CooldownStore> = Arc::new(RedisCooldown::new(redis_pool.clone()));

        // keys are only ever handed to the sweepers
        let seed = HdSeed::from_phrase(&settings.keys.hd_mnemonic).expect("Invalid HD mnemonic");
        let treasury = load_treasury(&settings).expect("Invalid treasury key");
        info!("Treasury signers: {:?}", treasury);

        let chains = ChainRegistry::new(&settings.chains).expect("Failed to set up chain clients");
        let scanners = chains
            .scanners(&settings, &treasury)
            .expect("Failed to set up chain scanners");
        let sweepers = chains
            .sweepers(&settings, &seed, &treasury)
            .expect("Failed to set up chain sweepers");

        let oracle: Arc<dyn PriceOracle> = Arc::new(CachedPriceOracle::new(
            CoinGeckoSource::new(&settings.oracle).expect("Failed to set up price source"),
            Duration::from_secs(settings.oracle.cache_ttl_s),
        ));
        let notifier: Arc<dyn Notifier> = match &settings.tgbot {
            Some(tgbot) => {
                let bot = Bot::with_client(tgbot.telegram_token.clone(), client_from_env());
                Arc::new(TelegramNotifier::new(bot, tgbot.admin_chat_ids.clone()))
            }
            None => {
                info!("No telegram bot configured, notifications go to the log only");
                Arc::new(LogNotifier)
            }
        };

        let credit = Arc::new(CreditEngine::new(store.clone(), oracle, notifier.clone()));
        let scans = Arc::new(ScanOrchestrator::new(
            store.clone(),
            locks.clone(),
            scanners,
            credit.clone(),
            settings.scan.cooldown_s,
            Duration::from_millis(settings.scan.chain_timeout_ms),
        ));
        let queue = Arc::new(QueueEngine::new(store.clone(), settings.queue.payout_slot_s));
        let sweeps = Arc::new(SweepEngine::new(
            store.clone(),
            store,
            sweepers,
            notifier,
            settings.sweep.batch_size,
            Duration::from_millis(settings.sweep.submission_delay_ms),
        ));

        Self {
            settings: Arc::new(settings),
            db_pool,
            redis_pool,
            chains,
            locks,
            credit,
            scans,
            queue,
            sweeps,
        }
    }
}
