use std::sync::Arc;

use tricycle_dispatch::api::DynAPI;
use tricycle_dispatch::auth::{DynIdentity, StaticIdentityProvider};
use tricycle_dispatch::clock::SystemClock;
use tricycle_dispatch::config::Config;
use tricycle_dispatch::db::PgPool;
use tricycle_dispatch::engine::{Engine, ExpirySweeper};
use tricycle_dispatch::error::Error;
use tricycle_dispatch::gateway::Gateway;
use tricycle_dispatch::server::serve;
use tricycle_dispatch::store::{DynStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let store: DynStore = match &config.database_url {
        Some(url) => {
            let PgPool(pool) = PgPool::new(url, config.max_connections).await?;
            Arc::new(PgStore::new(pool).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, bookings are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let identity: DynIdentity = match &config.identity_tokens_file {
        Some(path) => Arc::new(StaticIdentityProvider::from_file(path)?),
        None => {
            tracing::warn!("IDENTITY_TOKENS_FILE is not set, every request will be unauthorized");
            Arc::new(StaticIdentityProvider::new())
        }
    };

    let engine = Arc::new(Engine::new(
        store,
        Arc::new(SystemClock),
        config.engine.clone(),
    ));

    ExpirySweeper::new(engine.clone(), config.sweep_interval, config.sweep_workers).spawn();

    let api = Arc::new(Gateway::new(engine)?) as DynAPI;

    serve(api, identity, config.bind_addr).await
}
