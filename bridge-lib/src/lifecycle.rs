//! Library lifecycle
//!
//! Codec and JSON handles work without initialization. Storage needs a root
//! directory, which `init` provides.
//!
//! ## State Machine
//!
//! - 0 (IDLE): never initialized
//! - 1 (READY): storage root configured
//! - 2 (RELEASED): released; `init` may run again

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::handle::{registry, ResourceKind};
use crate::logging::{self, LogLevel};
use crate::storage::ConnectionPool;
use crate::types::BridgeConfig;
use crate::{read_lock, write_lock};

pub static STATE: AtomicU8 = AtomicU8::new(STATE_IDLE);

pub const STATE_IDLE: u8 = 0;
pub const STATE_READY: u8 = 1;
pub const STATE_RELEASED: u8 = 2;

struct Env {
    config: BridgeConfig,
    pool: Arc<ConnectionPool>,
}

static ENV: RwLock<Option<Env>> = RwLock::new(None);

pub fn get_state() -> u8 {
    STATE.load(Ordering::SeqCst)
}

pub fn is_ready() -> bool {
    get_state() == STATE_READY
}

pub fn state_name(state: u8) -> &'static str {
    match state {
        STATE_IDLE => "idle",
        STATE_READY => "ready",
        STATE_RELEASED => "released",
        _ => "unknown",
    }
}

pub fn init(config: BridgeConfig) -> Result<()> {
    let mut env = write_lock!(ENV);
    if env.is_some() {
        warn!("Already initialized");
        return Err(Error::AlreadyInitialized);
    }

    let level = LogLevel::from_code(config.log.level)
        .ok_or_else(|| Error::config(format!("unknown log level {}", config.log.level)))?;
    if !logging::init(level) {
        warn!("Another logger is installed; bridge log events go through it");
    }

    info!("Initializing bridge, store path: {:?}", config.store.path);
    let pool = match ConnectionPool::new(&config.store.path) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to prepare store directory: {}", e);
            return Err(e);
        }
    };

    *env = Some(Env {
        config,
        pool: Arc::new(pool),
    });
    STATE.store(STATE_READY, Ordering::SeqCst);
    info!("Bridge ready");
    Ok(())
}

pub fn init_from_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = BridgeConfig::load(path.as_ref())?;
    init(config)
}

/// Closes every storage handle and forgets the storage root.
pub fn release() -> Result<()> {
    let mut env = write_lock!(ENV);
    if env.take().is_none() {
        return Err(Error::NotInitialized);
    }
    let mut closed = 0;
    for kind in [ResourceKind::Query, ResourceKind::Sql, ResourceKind::Kv] {
        closed += registry().remove_all(kind);
    }
    STATE.store(STATE_RELEASED, Ordering::SeqCst);
    info!("Bridge released, {} storage handles closed", closed);
    Ok(())
}

pub fn config() -> Option<BridgeConfig> {
    read_lock!(ENV).as_ref().map(|env| env.config.clone())
}

pub(crate) fn pool() -> Result<Arc<ConnectionPool>> {
    read_lock!(ENV)
        .as_ref()
        .map(|env| Arc::clone(&env.pool))
        .ok_or(Error::NotInitialized)
}
