use std::sync::Arc;

use anyhow::Result;
use collector::{
    CollectorFactory, CollectorRegistry, FallbackPriceOracle, PortfolioCollector,
    PortfolioDirectory, RateCollector, ScheduledCollector, Scheduler, SnapshotStore,
    StaticPriceOracle, WalletCollector,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    clients::{
        http_client, CeffuClient, CoingeckoPriceOracle, CoingeckoRateSource,
        ExchangeRateApiSource, OneTokenClient,
    },
    config::AppConfig,
    repositories::{PostgresPortfolioRepository, PostgresSnapshotRepository},
    state::AppState,
};

pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let pool = PgPool::connect(&config.database_url).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;
    Ok(state_from_pool(config, pool))
}

/// 已有連線池時 (測試、CLI) 直接組裝 state。
pub fn state_from_pool(config: &AppConfig, pool: PgPool) -> AppState {
    let snapshots = Arc::new(PostgresSnapshotRepository::new(pool.clone()));
    let portfolios = Arc::new(PostgresPortfolioRepository::new(pool.clone()));
    let factory = LiveCollectorFactory::new(config.clone(), snapshots.clone(), portfolios);
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(CollectorRegistry::new(config.fan_out())),
        Arc::new(factory),
        config.scheduler_config(),
    ));

    AppState {
        config: config.clone(),
        db: pool,
        scheduler,
        snapshots,
    }
}

/// 依設定建立 collector：沒有憑證的來源不註冊，匯率一律註冊。
pub struct LiveCollectorFactory {
    config: AppConfig,
    store: Arc<dyn SnapshotStore>,
    directory: Arc<dyn PortfolioDirectory>,
}

impl LiveCollectorFactory {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SnapshotStore>,
        directory: Arc<dyn PortfolioDirectory>,
    ) -> Self {
        Self {
            config,
            store,
            directory,
        }
    }
}

impl CollectorFactory for LiveCollectorFactory {
    fn build(&self) -> Result<Vec<Arc<dyn ScheduledCollector>>> {
        let config = &self.config;
        let signed_client = http_client(config.upstream_timeout)?;
        let public_client = http_client(config.public_api_timeout)?;
        let mut collectors: Vec<Arc<dyn ScheduledCollector>> = Vec::new();

        match &config.onetoken {
            Some(onetoken) => {
                let api = OneTokenClient::new(
                    signed_client.clone(),
                    &onetoken.base_url,
                    &onetoken.api_key,
                    &onetoken.secret,
                );
                collectors.push(Arc::new(PortfolioCollector::new(
                    Arc::new(api),
                    self.store.clone(),
                    self.directory.clone(),
                )));
            }
            None => warn!("ONETOKEN_API_KEY / ONETOKEN_SECRET not set, portfolio collector disabled"),
        }

        match &config.ceffu {
            Some(ceffu) => {
                let api = CeffuClient::new(
                    signed_client,
                    &ceffu.base_url,
                    &ceffu.api_key,
                    &ceffu.secret_key,
                );
                let prices = FallbackPriceOracle::new(
                    Arc::new(CoingeckoPriceOracle::new(
                        public_client.clone(),
                        &config.coingecko_api_base,
                        config.token_price_ids.clone(),
                        config.price_cache_ttl,
                    )),
                    Arc::new(StaticPriceOracle::with_defaults(config.token_prices.clone())),
                );
                collectors.push(Arc::new(
                    WalletCollector::new(Arc::new(api), Arc::new(prices), self.store.clone())
                        .with_wallet_ids(ceffu.wallet_ids.clone()),
                ));
            }
            None => warn!("CEFFU_API_KEY / CEFFU_SECRET_KEY not set, wallet collector disabled"),
        }

        let rates = RateCollector::new(self.store.clone())
            .with_source(
                Arc::new(ExchangeRateApiSource::new(
                    public_client.clone(),
                    &config.fiat_rate_api_base,
                )),
                config.fiat_pairs.clone(),
            )
            .with_source(
                Arc::new(CoingeckoRateSource::new(public_client, &config.coingecko_api_base)),
                config.crypto_pairs.clone(),
            );
        info!(pairs = rates.pair_count(), "rate collector configured");
        collectors.push(Arc::new(rates));

        Ok(collectors)
    }
}
