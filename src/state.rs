//! Shared application state.

use std::sync::Arc;

use crate::auth::{CodeService, TokenService};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::ech::{EchKeystore, SecretBox};
use crate::storage::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub cache: Arc<TtlCache>,
    pub tokens: Arc<TokenService>,
    pub codes: Arc<CodeService>,
    pub keystore: Arc<EchKeystore>,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let cache = Arc::new(TtlCache::default());
        let tokens = Arc::new(TokenService::new(
            store.clone(),
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let codes = Arc::new(CodeService::new(
            cache.clone(),
            config.verify_code_test_mode,
        ));
        let keystore = Arc::new(EchKeystore::new(
            store.clone(),
            SecretBox::new(&config.master_key),
        ));
        Self {
            config,
            store,
            cache,
            tokens,
            codes,
            keystore,
        }
    }
}
