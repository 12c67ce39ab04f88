//! Simple option handlers
//!
//! Most configured behavior is "put this option in the response". A
//! [`SimpleOptionHandler`] carries one prebuilt option; ORO-gated options
//! are only added when the client asked for them, unless `always-send`
//! forces them through the strip pass.

use std::sync::Arc;

use hexane_core::error::{Error, HandlerError};

use hexane_wire::options::{map, ntp::NtpSubOption, DhcpOption};
use hexane_wire::registry::OptionRegistry;
use hexane_wire::MessageType;

use crate::handler::Handler;
use crate::registry::FactoryContext;
use crate::transaction::TransactionBundle;

/// Puts one prebuilt option into every eligible response
pub struct SimpleOptionHandler {
    name: String,
    option: DhcpOption,
    always_send: bool,
    precedence: u16,
}

impl SimpleOptionHandler {
    pub fn new(name: impl Into<String>, option: DhcpOption, always_send: bool) -> Self {
        Self {
            name: name.into(),
            option,
            always_send,
            precedence: 100,
        }
    }

    pub fn with_precedence(mut self, precedence: u16) -> Self {
        self.precedence = precedence;
        self
    }

    /// Replies to these request kinds only carry identifiers and status
    fn eligible(msg_type: MessageType) -> bool {
        !matches!(
            msg_type,
            MessageType::Release
                | MessageType::Decline
                | MessageType::Confirm
                | MessageType::Leasequery
        )
    }
}

impl Handler for SimpleOptionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn precedence(&self) -> u16 {
        self.precedence
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if !Self::eligible(bundle.inner().msg_type) {
            return Ok(());
        }
        let code = self.option.code();
        let gated = OptionRegistry::global().is_oro_gated(code);
        if self.always_send || !gated || bundle.is_requested(code) {
            if self.always_send {
                bundle.force_option(code);
            }
            bundle.set_response_option(self.option.clone());
        }
        Ok(())
    }
}

/// Tags matching transactions so marked-with filters can scope handlers
pub struct MarkHandler {
    mark: String,
}

impl Handler for MarkHandler {
    fn name(&self) -> &str {
        "mark"
    }

    fn precedence(&self) -> u16 {
        // Marks must land before anything tests them
        20
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn pre(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        bundle.mark(self.mark.clone());
        Ok(())
    }
}

/// Silently drops every transaction it sees
pub struct IgnoreRequestHandler;

impl Handler for IgnoreRequestHandler {
    fn name(&self) -> &str {
        "ignore-request"
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn pre(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        bundle.drop_with(hexane_core::types::DropReason::Policy);
        Ok(())
    }
}

// Factories

pub(crate) fn mark_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    Ok(Arc::new(MarkHandler {
        mark: ctx.require_str("mark")?.to_string(),
    }))
}

pub(crate) fn ignore_request_factory(_ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    Ok(Arc::new(IgnoreRequestHandler))
}

fn simple(ctx: &FactoryContext, option: DhcpOption) -> Result<Arc<dyn Handler>, Error> {
    let handler = SimpleOptionHandler::new(ctx.name, option, ctx.get_bool("always-send")?)
        .with_precedence(ctx.precedence.unwrap_or(100));
    Ok(Arc::new(handler))
}

pub(crate) fn preference_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let value = ctx
        .get_u8("preference")?
        .ok_or_else(|| Error::config("handler 'preference' needs 'preference'"))?;
    simple(ctx, DhcpOption::Preference(value))
}

pub(crate) fn server_unicast_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let address = ctx.require_addr("address")?;
    simple(ctx, DhcpOption::ServerUnicast(address))
}

pub(crate) fn sol_max_rt_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let seconds = ctx
        .get_u32("seconds")?
        .ok_or_else(|| Error::config("handler 'sol-max-rt' needs 'seconds'"))?;
    hexane_wire::options::sol_max_rt::check_range(seconds)
        .map_err(|err| Error::config(format!("handler 'sol-max-rt': {}", err)))?;
    simple(ctx, DhcpOption::SolMaxRt(seconds))
}

pub(crate) fn inf_max_rt_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let seconds = ctx
        .get_u32("seconds")?
        .ok_or_else(|| Error::config("handler 'inf-max-rt' needs 'seconds'"))?;
    hexane_wire::options::sol_max_rt::check_range(seconds)
        .map_err(|err| Error::config(format!("handler 'inf-max-rt': {}", err)))?;
    simple(ctx, DhcpOption::InfMaxRt(seconds))
}

pub(crate) fn dns_servers_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::DnsServers(ctx.require_addr_list("addresses")?),
    )
}

pub(crate) fn domain_search_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::DomainSearchList(ctx.require_string_list("domains")?),
    )
}

pub(crate) fn sip_servers_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::SipServerAddresses(ctx.require_addr_list("addresses")?),
    )
}

pub(crate) fn sip_domains_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::SipServerDomains(ctx.require_string_list("domains")?),
    )
}

pub(crate) fn sntp_servers_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::SntpServers(ctx.require_addr_list("addresses")?),
    )
}

pub(crate) fn ntp_servers_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let mut subs = Vec::new();
    if let Some(addresses) = ctx.params.get("addresses") {
        let list = addresses
            .as_array()
            .ok_or_else(|| Error::config("handler 'ntp-servers': bad 'addresses'"))?;
        for value in list {
            let addr = value.as_str().and_then(|s| s.parse().ok()).ok_or_else(|| {
                Error::config("handler 'ntp-servers': bad address")
            })?;
            subs.push(NtpSubOption::ServerAddress(addr));
        }
    }
    if let Some(fqdns) = ctx.params.get("fqdns") {
        let list = fqdns
            .as_array()
            .ok_or_else(|| Error::config("handler 'ntp-servers': bad 'fqdns'"))?;
        for value in list {
            match value.as_str() {
                Some(name) if !name.is_empty() => {
                    subs.push(NtpSubOption::ServerFqdn(name.to_string()))
                }
                _ => return Err(Error::config("handler 'ntp-servers': bad fqdn")),
            }
        }
    }
    if subs.is_empty() {
        return Err(Error::config(
            "handler 'ntp-servers' needs 'addresses' or 'fqdns'",
        ));
    }
    simple(ctx, DhcpOption::NtpServers(subs))
}

pub(crate) fn aftr_name_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    simple(
        ctx,
        DhcpOption::AftrName(ctx.require_str("name")?.to_string()),
    )
}

pub(crate) fn map_e_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let mut container = Vec::new();
    for addr in ctx.require_addr_list("br")? {
        container.push(DhcpOption::S46Br(addr));
    }
    container.extend(parse_rules(ctx)?);
    simple(ctx, DhcpOption::S46MapE(container))
}

pub(crate) fn map_t_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    let (prefix, prefix_length) = super::parse_prefix6(ctx.require_str("dmr")?)?;
    let mut container = vec![DhcpOption::S46Dmr {
        prefix_length,
        prefix,
    }];
    container.extend(parse_rules(ctx)?);
    simple(ctx, DhcpOption::S46MapT(container))
}

fn parse_rules(ctx: &FactoryContext) -> Result<Vec<DhcpOption>, Error> {
    let bad = || Error::config(format!("handler '{}': malformed rule", ctx.name));

    let rules = match ctx.params.get("rules") {
        None => return Ok(Vec::new()),
        Some(value) => value.as_array().ok_or_else(bad)?,
    };

    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let rule = rule.as_object().ok_or_else(bad)?;

        let ipv4 = rule
            .get("ipv4-prefix")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(bad)?;
        let (ipv4_prefix, prefix4_len) = parse_prefix4(ipv4).ok_or_else(bad)?;

        let ipv6 = rule
            .get("ipv6-prefix")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(bad)?;
        let (ipv6_prefix, prefix6_len) = super::parse_prefix6(ipv6)?;

        let ea_len = rule
            .get("ea-len")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(bad)?;

        let forwarding = rule
            .get("forwarding")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let mut options = Vec::new();
        if let Some(psid_len) = rule.get("psid-len").and_then(serde_json::Value::as_u64) {
            let psid_len = u8::try_from(psid_len).map_err(|_| bad())?;
            let offset = rule
                .get("psid-offset")
                .and_then(serde_json::Value::as_u64)
                .map(|v| u8::try_from(v).map_err(|_| bad()))
                .transpose()?
                .unwrap_or(6);
            let psid = rule
                .get("psid")
                .and_then(serde_json::Value::as_u64)
                .map(|v| u16::try_from(v).map_err(|_| bad()))
                .transpose()?
                .unwrap_or(0);
            options.push(DhcpOption::S46PortParams(map::S46PortParams {
                offset,
                psid_len,
                psid,
            }));
        }

        out.push(DhcpOption::S46Rule(map::S46Rule {
            flags: if forwarding { map::S46_RULE_FLAG_FMR } else { 0 },
            ea_len,
            prefix4_len,
            ipv4_prefix,
            prefix6_len,
            ipv6_prefix,
            options,
        }));
    }
    Ok(out)
}

fn parse_prefix4(spec: &str) -> Option<(std::net::Ipv4Addr, u8)> {
    let (prefix, len) = spec.split_once('/')?;
    let prefix = prefix.parse().ok()?;
    let len: u8 = len.parse().ok()?;
    if len > 32 {
        return None;
    }
    Some((prefix, len))
}
