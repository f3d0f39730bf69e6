#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use threadhub_os::thread_guard::{ThreadGuard, ThreadGuardConfig};
use threadhub_storage::repo::SharedThreadStore;

use crate::call_context::MetadataCallResolver;
use crate::guarded::{GuardedDbApi, GuardedNetApi, ThreadInterceptor};
use crate::memory_engine::{MemoryDbEngine, MemoryNetEngine};

pub const ENV_GRPC_BIND: &str = "THREADHUB_GRPC_BIND";
pub const ENV_STORE_PATH: &str = "THREADHUB_STORE_PATH";
pub const DEFAULT_GRPC_BIND: &str = "127.0.0.1:6006";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    /// Journal location; `None` keeps ownership state in memory only.
    pub store_path: Option<PathBuf>,
    pub guard: ThreadGuardConfig,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let bind_raw = env_getter(ENV_GRPC_BIND)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_GRPC_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|err| format!("{ENV_GRPC_BIND}={bind_raw}: {err}"))?;
        let store_path = env_getter(ENV_STORE_PATH)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let guard = ThreadGuardConfig::from_env_var_map(&mut env_getter)
            .map_err(|err| format!("thread guard config: {err}"))?;
        Ok(Self {
            bind,
            store_path,
            guard,
        })
    }
}

/// The guarded services wired over one shared ownership store.
#[derive(Clone)]
pub struct AdapterRuntime {
    store: SharedThreadStore,
    interceptor: ThreadInterceptor,
    port: u16,
}

impl AdapterRuntime {
    pub fn new(config: &AdapterConfig) -> Result<Self, String> {
        let store = match &config.store_path {
            Some(path) => SharedThreadStore::open(path.clone()).map_err(|err| {
                format!(
                    "thread store open failed for {}: {}",
                    path.display(),
                    err
                )
            })?,
            None => SharedThreadStore::new_in_memory(),
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: &AdapterConfig, store: SharedThreadStore) -> Result<Self, String> {
        let guard = ThreadGuard::new(
            config.guard.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        )
        .map_err(|err| format!("thread guard config: {err}"))?;
        let resolver = MetadataCallResolver::new(Arc::new(store.clone()));
        Ok(Self {
            store,
            interceptor: ThreadInterceptor::new(guard, resolver),
            port: config.bind.port(),
        })
    }

    pub fn store(&self) -> &SharedThreadStore {
        &self.store
    }

    pub fn guarded_db(&self) -> GuardedDbApi<MemoryDbEngine> {
        GuardedDbApi::new(self.interceptor.clone(), MemoryDbEngine::new(self.port))
    }

    pub fn guarded_net(&self) -> GuardedNetApi<MemoryNetEngine> {
        GuardedNetApi::new(self.interceptor.clone(), MemoryNetEngine::new(self.port))
    }
}
