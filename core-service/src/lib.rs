//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (media index,
//! permissions, filesystem, playlist files, lifecycle) into the library
//! reader. Desktop apps typically enable the `desktop-shims` feature (which
//! depends on `bridge-desktop`) so optional bridges fall back to desktop
//! defaults.
//!
//! ```no_run
//! # async fn example(index: std::sync::Arc<dyn bridge_traits::MediaIndex>) -> core_service::Result<()> {
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder().media_index(index).build()?;
//! let core = CoreService::new(config)?;
//! let scan = core.refresh().await?;
//! println!("{} songs", scan.songs.len());
//! # Ok(())
//! # }
//! ```

pub mod error;

pub use error::{Result, ServiceError};

use std::sync::Arc;

use core_library::ScanResult;
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_runtime::logging::{init_logging, LoggingConfig};
use core_sync::{
    LibraryReader, LibrarySnapshot, LifecyclePause, Playlists, ReaderDeps, ReaderSettings,
    SimpleReader,
};
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
///
/// Cheap to clone; clones share one reader and one event bus. Must be created
/// inside a tokio runtime since the reader stages start immediately.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    events: EventBus,
    reader: Arc<LibraryReader>,
}

impl CoreService {
    /// Create a new service from a built configuration.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let reader = LibraryReader::from_config(&config, events.clone())?;
        info!(
            load = ?config.load,
            lifecycle = config.lifecycle_observer.is_some(),
            "Core service started"
        );

        Ok(Self {
            config: Arc::new(config),
            events,
            reader: Arc::new(reader),
        })
    }

    /// Installs the global tracing subscriber, then creates the service.
    ///
    /// The configured [`LoggerSink`](bridge_traits::LoggerSink) is used when
    /// `logging` does not name one.
    pub fn bootstrap(config: CoreConfig, mut logging: LoggingConfig) -> Result<Self> {
        if logging.logger_sink.is_none() {
            logging.logger_sink = config.logger_sink.clone();
        }
        init_logging(logging)?;
        Self::new(config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn reader(&self) -> &LibraryReader {
        &self.reader
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &Arc<ReaderSettings> {
        self.reader.settings()
    }

    /// Forces a scan and returns the result of the first scan started after
    /// this call, whether or not anything observes the reader.
    pub async fn refresh(&self) -> Result<Arc<ScanResult>> {
        Ok(self.reader.refresh().await?)
    }

    /// Forces a scan and returns the playlists resolved against it.
    pub async fn refresh_playlists(&self) -> Result<Playlists> {
        Ok(self.reader.refresh_playlists().await?)
    }

    /// Pause signal following the configured lifecycle observer, if any.
    pub async fn lifecycle_pause(&self) -> Result<Option<LifecyclePause>> {
        match &self.config.lifecycle_observer {
            Some(observer) => Ok(Some(LifecyclePause::new(Arc::clone(observer)).await?)),
            None => Ok(None),
        }
    }

    /// One-shot read with the current filter values. Bypasses the reader's
    /// stages and does not touch their caches.
    #[instrument(skip(self))]
    pub async fn read_once(&self) -> Result<LibrarySnapshot> {
        let mut deps = ReaderDeps::from_config(&self.config, self.events.clone());
        deps.settings = Arc::clone(self.reader.settings());
        Ok(SimpleReader::from_deps(deps).read().await?)
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("config", &self.config)
            .field("phase", &self.reader.current_phase())
            .finish()
    }
}
