use anyhow::{Context as _, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::rest::RestApi;
use crate::archive::{ArchiveHandle, ArchiveQueue};
use crate::config::Config;
use crate::db::DatabaseService;
use crate::debounce::{DebounceEngine, Decision};
use crate::error::Error;
use crate::ingest::EventParser;
use crate::models::EventRecord;
use crate::rollup::{RollupJob, RollupScheduler};
use crate::store::{MemoryStore, StateStore, StoreClient};

/// Everything a request handler needs, shared by clone
#[derive(Clone)]
pub struct AppContext {
    pub store: StoreClient,
    pub engine: DebounceEngine,
    pub parser: EventParser,
    pub archive: ArchiveHandle,
}

impl AppContext {
    /// Run one parsed event through the debounce engine and archive it if accepted.
    pub async fn process(&self, event: &EventRecord) -> Result<Decision, Error> {
        let decision = match self.engine.evaluate(event).await {
            Ok(decision) => decision,
            Err(e) => {
                error!("Failed to evaluate event {}: {}", event, e);
                return Err(e);
            }
        };

        if decision.is_accepted() {
            info!("Sending {} {}", event.serial, event.ts);
            if let Err(e) = self.archive.dispatch(event) {
                warn!("Accepted event {} not archived: {}", event, e);
            }
        } else {
            debug!("Not sending {} {}", event.serial, event.ts);
        }

        Ok(decision)
    }

    /// Milliseconds used to stamp events that carry no time
    pub fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Open the store backend named by `store.url`
pub async fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    let url = config.store.url.as_str();

    if url.starts_with("memory://") {
        info!("Using in-memory camera state store");
        Ok(Arc::new(MemoryStore::new()))
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let database = DatabaseService::new(&config.store).await?;
        Ok(Arc::new(database.state_store()))
    } else {
        Err(Error::Config(format!("Unsupported store url: {}", url)).into())
    }
}

/// Owns the background services and their single shutdown path
pub struct Application {
    config: Config,
    context: AppContext,
    archive: ArchiveQueue,
    shutdown: CancellationToken,
}

impl Application {
    /// Connect to the configured store and assemble the services
    pub async fn build(config: Config) -> Result<Self> {
        let backend = open_store(&config).await?;
        let app = Self::with_store(config, backend);

        app.context
            .store
            .ping()
            .await
            .context("Camera state store is unreachable")?;

        Ok(app)
    }

    /// Assemble the services over an already opened backend
    pub fn with_store(config: Config, backend: Arc<dyn StateStore>) -> Self {
        let shutdown = CancellationToken::new();
        let store = StoreClient::new(backend, &config.store);
        let archive = ArchiveQueue::start(&config.archive, shutdown.clone());

        let context = AppContext {
            engine: DebounceEngine::new(store.clone(), &config.debounce),
            parser: EventParser::new(&config.ingest),
            archive: archive.handle(),
            store,
        };

        Self {
            config,
            context,
            archive,
            shutdown,
        }
    }

    pub fn context(&self) -> AppContext {
        self.context.clone()
    }

    /// Cancelling this token stops the listener, the scheduler and the archive writer
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token is cancelled, then drain the background tasks
    pub async fn run(self) -> Result<()> {
        let job = RollupJob::new(
            self.context.store.clone(),
            self.config.rollup.events_dir.clone(),
            self.config.rollup.clear_mode,
        );
        let scheduler = RollupScheduler::new(job, self.config.rollup.cadence, self.config.rollup.utc)
            .start(self.shutdown.clone());

        let api = RestApi::new(&self.config.api, self.context.clone());
        let served = api.run(self.shutdown.clone()).await;

        // a listener error also has to bring the background tasks down
        self.shutdown.cancel();

        if let Err(e) = scheduler.await {
            error!("Rollup scheduler task failed: {}", e);
        }

        drop(self.context);
        let stats = self.archive.join().await;
        info!(
            "Archive writer stopped: {} queued, {} written, {} failed, {} dropped",
            stats.queued, stats.written, stats.failed, stats.dropped
        );

        served
    }
}
