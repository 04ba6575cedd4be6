use crate::concurrency::WakeRegistry;
use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::store::StoreClient;
use crate::upstream::forward::build_forward_client;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared gateway state, cheaply cloneable.
///
/// Composed of narrow, independently-useful sub-handles rather than one
/// monolithic struct — each subsystem borrows only what it needs.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub store: StoreClient,
    pub metrics: Metrics,
    pub wake_registry: WakeRegistry,
    pub forward_client: reqwest::Client,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let store = StoreClient::connect(&config.store.url).await?;
        let metrics = Metrics::install();
        let forward_client = build_forward_client();

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            store,
            metrics,
            wake_registry: WakeRegistry::new(),
            forward_client,
        })
    }
}
