use std::sync::Arc;

use anyhow::{Context, Result};
use souk_auth::Authenticator;
use souk_config::{AppConfig, RealtimeConfig};
use souk_conversations::{ConversationServices, SqliteConversationStore};
use souk_database::initialize_database;
use souk_realtime::{ChatHub, RedisBus, RoomMultiplexer, SessionRegistry};
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::DEBUG)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub hub: ChatHub,
    /// Present when broadcasts are shared with other nodes through Redis.
    pub redis_bus: Option<RedisBus>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());

        let store = Arc::new(SqliteConversationStore::new(db_pool.clone()));
        let services = ConversationServices::new(store, &config.messaging);

        let (rooms, redis_bus) = connect_rooms(&config.realtime).await;
        let registry = SessionRegistry::new(rooms);
        let hub = ChatHub::new(services, registry, &config.messaging);

        info!(
            cross_node = redis_bus.is_some(),
            page_size = config.messaging.history_page_size,
            "conversation hub ready"
        );

        Ok(Self {
            db_pool,
            authenticator,
            hub,
            redis_bus,
        })
    }
}

/// Rooms backed by the Redis bus when one is configured and reachable,
/// otherwise in-process only.
async fn connect_rooms(config: &RealtimeConfig) -> (RoomMultiplexer, Option<RedisBus>) {
    let Some(redis_url) = config.redis_url.as_deref() else {
        info!("no redis url configured, broadcasting in-process only");
        return (RoomMultiplexer::new(), None);
    };

    let bus = match RedisBus::connect(config, redis_url).await {
        Ok(bus) => bus,
        Err(error) => {
            warn!(%error, "failed to connect to redis, proceeding without cross-node broadcast");
            return (RoomMultiplexer::new(), None);
        }
    };

    let rooms = RoomMultiplexer::with_bus(Arc::new(bus.clone()));
    match bus.spawn_listener(rooms.clone()).await {
        Ok(_listener) => (rooms, Some(bus)),
        Err(error) => {
            warn!(%error, "failed to subscribe to redis, proceeding without cross-node broadcast");
            (RoomMultiplexer::new(), None)
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
