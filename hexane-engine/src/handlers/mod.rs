//! Built-in handlers and filters
//!
//! Every handler a configuration can name has a factory registered here.
//! The mandatory finalization handlers (response type, status codes,
//! stripping, relay framing) are not configurable; the pipeline appends
//! them itself.

pub mod basic;
pub mod finalize;
pub mod leasequery;
pub mod pool;
pub mod rapid_commit;
pub mod relay;
pub mod server_id;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use hexane_core::error::{Error, Result};

use crate::filter::{
    AlwaysMatch, DuidFilter, InterfaceFilter, MarkedWithFilter, NotFilter, RemoteIdFilter,
    SubnetFilter, SubscriberIdFilter, TransactionFilter,
};
use crate::registry::{FilterRegistry, HandlerRegistry};

/// Register every built-in handler factory
pub fn register_defaults(registry: &HandlerRegistry) {
    // Registration of the built-in set cannot collide with itself; a
    // failure here would mean a duplicate name in this function.
    let _ = registry.register("mark", basic::mark_factory);
    let _ = registry.register("ignore-request", basic::ignore_request_factory);
    let _ = registry.register("preference", basic::preference_factory);
    let _ = registry.register("server-unicast", basic::server_unicast_factory);
    let _ = registry.register("sol-max-rt", basic::sol_max_rt_factory);
    let _ = registry.register("inf-max-rt", basic::inf_max_rt_factory);
    let _ = registry.register("dns-servers", basic::dns_servers_factory);
    let _ = registry.register("domain-search", basic::domain_search_factory);
    let _ = registry.register("sip-servers", basic::sip_servers_factory);
    let _ = registry.register("sip-domains", basic::sip_domains_factory);
    let _ = registry.register("sntp-servers", basic::sntp_servers_factory);
    let _ = registry.register("ntp-servers", basic::ntp_servers_factory);
    let _ = registry.register("aftr-name", basic::aftr_name_factory);
    let _ = registry.register("map-e", basic::map_e_factory);
    let _ = registry.register("map-t", basic::map_t_factory);
    let _ = registry.register("rapid-commit", rapid_commit::factory);
    let _ = registry.register("ia-na-pool", pool::ia_na_factory);
    let _ = registry.register("ia-pd-pool", pool::ia_pd_factory);
    let _ = registry.register("leasequery", leasequery::factory);
}

/// Register every built-in filter factory
pub fn register_default_filters(registry: &FilterRegistry) {
    let _ = registry.register("always", always_filter);
    let _ = registry.register("not", not_filter);
    let _ = registry.register("marked-with", marked_with_filter);
    let _ = registry.register("subnet", subnet_filter);
    let _ = registry.register("interface", interface_filter);
    let _ = registry.register("duid", duid_filter);
    let _ = registry.register("remote-id", remote_id_filter);
    let _ = registry.register("subscriber-id", subscriber_id_filter);
}

fn always_filter(_registry: &FilterRegistry, _value: &Value) -> Result<Arc<dyn TransactionFilter>> {
    Ok(Arc::new(AlwaysMatch))
}

fn not_filter(registry: &FilterRegistry, value: &Value) -> Result<Arc<dyn TransactionFilter>> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::config("filter 'not' needs an object value naming a child filter"))?;
    let name = object
        .get("filter")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config("filter 'not' child must carry a 'filter' name"))?;
    let child_value = object.get("value").cloned().unwrap_or(Value::Null);
    Ok(Arc::new(NotFilter {
        child: registry.build(name, &child_value)?,
    }))
}

fn marked_with_filter(
    _registry: &FilterRegistry,
    value: &Value,
) -> Result<Arc<dyn TransactionFilter>> {
    let mark = value
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::config("filter 'marked-with' needs a non-empty string value"))?;
    Ok(Arc::new(MarkedWithFilter {
        mark: mark.to_string(),
    }))
}

fn subnet_filter(_registry: &FilterRegistry, value: &Value) -> Result<Arc<dyn TransactionFilter>> {
    let spec = value
        .as_str()
        .ok_or_else(|| Error::config("filter 'subnet' needs a 'prefix/len' string value"))?;
    let (prefix, len) = parse_prefix6(spec)?;
    Ok(Arc::new(SubnetFilter {
        prefix,
        prefix_len: len,
    }))
}

fn interface_filter(
    _registry: &FilterRegistry,
    value: &Value,
) -> Result<Arc<dyn TransactionFilter>> {
    let mut interfaces = HashSet::new();
    match value {
        Value::String(name) if !name.is_empty() => {
            interfaces.insert(name.clone());
        }
        Value::Array(names) => {
            for name in names {
                match name.as_str() {
                    Some(name) if !name.is_empty() => {
                        interfaces.insert(name.to_string());
                    }
                    _ => {
                        return Err(Error::config(
                            "filter 'interface' values must be non-empty strings",
                        ))
                    }
                }
            }
        }
        _ => {
            return Err(Error::config(
                "filter 'interface' needs a name or list of names",
            ))
        }
    }
    if interfaces.is_empty() {
        return Err(Error::config("filter 'interface' matched nothing"));
    }
    Ok(Arc::new(InterfaceFilter { interfaces }))
}

fn duid_filter(_registry: &FilterRegistry, value: &Value) -> Result<Arc<dyn TransactionFilter>> {
    let hex = value
        .as_str()
        .ok_or_else(|| Error::config("filter 'duid' needs a hex string value"))?;
    Ok(Arc::new(DuidFilter {
        pattern: parse_hex(hex).ok_or_else(|| Error::config("filter 'duid' value is not hex"))?,
    }))
}

fn remote_id_filter(
    _registry: &FilterRegistry,
    value: &Value,
) -> Result<Arc<dyn TransactionFilter>> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::config("filter 'remote-id' needs {enterprise, id} value"))?;
    let enterprise = object
        .get("enterprise")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::config("filter 'remote-id' needs a numeric 'enterprise'"))?;
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .and_then(parse_hex)
        .ok_or_else(|| Error::config("filter 'remote-id' needs a hex 'id'"))?;
    Ok(Arc::new(RemoteIdFilter { enterprise, id }))
}

fn subscriber_id_filter(
    _registry: &FilterRegistry,
    value: &Value,
) -> Result<Arc<dyn TransactionFilter>> {
    let id = value
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::config("filter 'subscriber-id' needs a string value"))?;
    // Subscriber-ids are NVT ASCII in practice; match the raw bytes
    Ok(Arc::new(SubscriberIdFilter {
        id: id.as_bytes().to_vec(),
    }))
}

/// Parse "2001:db8::/64" into prefix and length
pub(crate) fn parse_prefix6(spec: &str) -> Result<(std::net::Ipv6Addr, u8)> {
    let (prefix, len) = spec
        .split_once('/')
        .ok_or_else(|| Error::config(format!("'{}' is not a prefix/len pair", spec)))?;
    let prefix = prefix
        .parse()
        .map_err(|_| Error::config(format!("'{}' is not an IPv6 address", prefix)))?;
    let len: u8 = len
        .parse()
        .map_err(|_| Error::config(format!("'{}' is not a prefix length", len)))?;
    if len > 128 {
        return Err(Error::config("prefix length exceeds 128"));
    }
    Ok((prefix, len))
}

pub(crate) fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(
        (0..s.len())
            .step_by(2)
            .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect(),
    )
}
