//! Handler and filter factory registries
//!
//! Configuration names handlers and filters; these registries map those
//! names to factories. Both are populated at startup and frozen before
//! the listeners start; duplicate registration is a fatal configuration
//! error. The store cache keeps lease stores alive across pipeline
//! rebuilds so a reload does not forget bindings.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use hexane_core::error::{Error, Result};
use hexane_core::store::LeaseStore;

use crate::filter::TransactionFilter;
use crate::handler::Handler;

/// Lease stores shared across pipeline rebuilds, keyed by pool identity
#[derive(Default)]
pub struct StoreCache {
    stores: DashMap<String, Arc<dyn LeaseStore>>,
}

impl StoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the store for `key`, creating it on first use
    pub fn get_or_create<F>(&self, key: &str, create: F) -> Arc<dyn LeaseStore>
    where
        F: FnOnce() -> Arc<dyn LeaseStore>,
    {
        self.stores
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(pool = %key, "Creating lease store");
                create()
            })
            .clone()
    }

    /// Fetch an existing store without creating one
    pub fn get(&self, key: &str) -> Option<Arc<dyn LeaseStore>> {
        self.stores.get(key).map(|entry| entry.clone())
    }
}

/// Everything a handler factory gets to build one handler instance
pub struct FactoryContext<'a> {
    /// The configured handler name
    pub name: &'a str,
    /// The handler section's parameters
    pub params: &'a serde_json::Map<String, Value>,
    /// Configured precedence override
    pub precedence: Option<u16>,
    /// Shared lease stores
    pub stores: &'a StoreCache,
}

impl FactoryContext<'_> {
    fn missing(&self, key: &str) -> Error {
        Error::config(format!(
            "handler '{}' is missing required parameter '{}'",
            self.name, key
        ))
    }

    fn bad(&self, key: &str, expected: &str) -> Error {
        Error::config(format!(
            "handler '{}' parameter '{}' must be {}",
            self.name, key, expected
        ))
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.bad(key, "a string")),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.params.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| self.bad(key, "an unsigned 32-bit integer")),
            Some(_) => Err(self.bad(key, "an unsigned 32-bit integer")),
        }
    }

    pub fn get_u8(&self, key: &str) -> Result<Option<u8>> {
        match self.get_u32(key)? {
            None => Ok(None),
            Some(v) => u8::try_from(v)
                .map(Some)
                .map_err(|_| self.bad(key, "an unsigned 8-bit integer")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.params.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.bad(key, "a boolean")),
        }
    }

    pub fn require_addr(&self, key: &str) -> Result<Ipv6Addr> {
        self.require_str(key)?
            .parse()
            .map_err(|_| self.bad(key, "an IPv6 address"))
    }

    pub fn require_addr_list(&self, key: &str) -> Result<Vec<Ipv6Addr>> {
        let values = match self.params.get(key) {
            None => return Err(self.missing(key)),
            Some(Value::Array(values)) => values,
            Some(_) => return Err(self.bad(key, "a list of IPv6 addresses")),
        };
        let mut addrs = Vec::with_capacity(values.len());
        for value in values {
            let addr = value
                .as_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.bad(key, "a list of IPv6 addresses"))?;
            addrs.push(addr);
        }
        if addrs.is_empty() {
            return Err(self.bad(key, "a non-empty list of IPv6 addresses"));
        }
        Ok(addrs)
    }

    pub fn require_string_list(&self, key: &str) -> Result<Vec<String>> {
        let values = match self.params.get(key) {
            None => return Err(self.missing(key)),
            Some(Value::Array(values)) => values,
            Some(_) => return Err(self.bad(key, "a list of strings")),
        };
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            match value.as_str() {
                Some(s) if !s.is_empty() => out.push(s.to_string()),
                _ => return Err(self.bad(key, "a list of non-empty strings")),
            }
        }
        if out.is_empty() {
            return Err(self.bad(key, "a non-empty list of strings"));
        }
        Ok(out)
    }

    /// Decode a hex-encoded parameter
    pub fn require_hex(&self, key: &str) -> Result<Vec<u8>> {
        let s = self.require_str(key)?;
        if s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(self.bad(key, "an even-length hex string"));
        }
        Ok((0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap_or(0))
            .collect())
    }
}

/// Factory building one handler from its configuration section
pub type HandlerFactory = fn(&FactoryContext) -> Result<Arc<dyn Handler>>;

/// Factory building one filter from its configured condition
pub type FilterFactory = fn(&FilterRegistry, &Value) -> Result<Arc<dyn TransactionFilter>>;

/// Registry of handler factories, keyed by configuration name
pub struct HandlerRegistry {
    factories: RwLock<HashMap<String, HandlerFactory>>,
    frozen: AtomicBool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// A registry carrying every built-in handler factory
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        crate::handlers::register_defaults(&registry);
        registry
    }

    pub fn register(&self, name: &str, factory: HandlerFactory) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::config(format!(
                "cannot register handler '{}': registry is frozen",
                name
            )));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(Error::config(format!(
                "duplicate registration for handler '{}'",
                name
            )));
        }
        factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn get(&self, name: &str) -> Option<HandlerFactory> {
        self.factories.read().get(name).copied()
    }

    /// Build one handler from its configuration section
    pub fn build(&self, ctx: &FactoryContext) -> Result<Arc<dyn Handler>> {
        let factory = self
            .get(ctx.name)
            .ok_or_else(|| Error::config(format!("unknown handler '{}'", ctx.name)))?;
        factory(ctx)
    }

    pub fn count(&self) -> usize {
        self.factories.read().len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Registry of filter factories, keyed by configuration name
pub struct FilterRegistry {
    factories: RwLock<HashMap<String, FilterFactory>>,
    frozen: AtomicBool,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// A registry carrying every built-in filter factory
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        crate::handlers::register_default_filters(&registry);
        registry
    }

    pub fn register(&self, name: &str, factory: FilterFactory) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::config(format!(
                "cannot register filter '{}': registry is frozen",
                name
            )));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(name) {
            return Err(Error::config(format!(
                "duplicate registration for filter '{}'",
                name
            )));
        }
        factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Build one filter from its configured condition
    pub fn build(&self, name: &str, value: &Value) -> Result<Arc<dyn TransactionFilter>> {
        let factory = {
            self.factories
                .read()
                .get(name)
                .copied()
                .ok_or_else(|| Error::config(format!("unknown filter '{}'", name)))?
        };
        factory(self, value)
    }

    pub fn count(&self) -> usize {
        self.factories.read().len()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexane_core::error::HandlerError;
    use serde_json::json;

    struct NullHandler;

    impl Handler for NullHandler {
        fn name(&self) -> &str {
            "null"
        }

        fn handle(
            &self,
            _bundle: &mut crate::TransactionBundle,
        ) -> std::result::Result<(), HandlerError> {
            Ok(())
        }
    }

    fn null_factory(_ctx: &FactoryContext) -> Result<Arc<dyn Handler>> {
        Ok(Arc::new(NullHandler))
    }

    #[test]
    fn test_duplicate_handler_registration_fails() {
        let registry = HandlerRegistry::new();
        registry.register("null", null_factory).unwrap();
        assert!(registry.register("null", null_factory).is_err());
    }

    #[test]
    fn test_register_after_freeze_fails() {
        let registry = HandlerRegistry::new();
        registry.freeze();
        assert!(registry.register("late", null_factory).is_err());
    }

    #[test]
    fn test_unknown_handler_is_config_error() {
        let registry = HandlerRegistry::new();
        let params = serde_json::Map::new();
        let stores = StoreCache::new();
        let ctx = FactoryContext {
            name: "nonexistent",
            params: &params,
            precedence: None,
            stores: &stores,
        };
        assert!(registry.build(&ctx).is_err());
    }

    #[test]
    fn test_factory_context_getters() {
        let params = json!({
            "addresses": ["2001:db8::53"],
            "preference": 255,
            "always-send": true,
            "pattern": "000300"
        });
        let params = params.as_object().unwrap().clone();
        let stores = StoreCache::new();
        let ctx = FactoryContext {
            name: "test",
            params: &params,
            precedence: None,
            stores: &stores,
        };

        assert_eq!(
            ctx.require_addr_list("addresses").unwrap(),
            vec!["2001:db8::53".parse::<Ipv6Addr>().unwrap()]
        );
        assert_eq!(ctx.get_u8("preference").unwrap(), Some(255));
        assert!(ctx.get_bool("always-send").unwrap());
        assert_eq!(ctx.require_hex("pattern").unwrap(), vec![0x00, 0x03, 0x00]);
        assert!(ctx.require_str("missing").is_err());
        assert!(ctx.get_u32("pattern").is_err());
    }

    #[test]
    fn test_store_cache_reuses_instances() {
        use crate::store::{MemoryLeaseStore, PoolConfig};

        let cache = StoreCache::new();
        let make = || -> Arc<dyn LeaseStore> {
            Arc::new(MemoryLeaseStore::new(PoolConfig {
                prefix: "2001:db8::".parse().unwrap(),
                prefix_len: 64,
                delegation_len: None,
                preferred: 3600,
                valid: 7200,
            }))
        };

        let a = cache.get_or_create("na:2001:db8::/64", make);
        let b = cache.get_or_create("na:2001:db8::/64", make);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get("na:2001:db8::/64").is_some());
        assert!(cache.get("other").is_none());
    }
}
