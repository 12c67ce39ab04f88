//! Address and prefix pool handlers
//!
//! Allocate from a configured pool through the lease store contract.
//! Solicit offers, Request commits, Renew/Rebind extend, Release frees,
//! Decline quarantines, Confirm answers on-link checks. T1 defaults to
//! half the preferred lifetime and T2 to four fifths of it.

use std::sync::Arc;

use hexane_core::error::{Error, HandlerError};
use hexane_core::store::{Allocation, AllocationHints, Denial, Lease, LeaseKind, LeaseStore};

use hexane_wire::options::{self, DhcpOption, IaAddress, IaNa, StatusCodeOption};
use hexane_wire::options::prefix_delegation::{IaPd, IaPrefix};
use hexane_wire::MessageType;

use crate::handler::Handler;
use crate::registry::FactoryContext;
use crate::store::{MemoryLeaseStore, PoolConfig};
use crate::transaction::TransactionBundle;

/// Which IA family a pool handler serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IaKind {
    Na,
    Pd,
}

/// Pool-backed IA handler, shared between IA_NA and IA_PD
pub struct PoolHandler {
    name: String,
    kind: IaKind,
    store: Arc<dyn LeaseStore>,
    t1: Option<u32>,
    t2: Option<u32>,
}

impl PoolHandler {
    fn timers(&self, preferred: u32) -> (u32, u32) {
        let t1 = self.t1.unwrap_or(preferred / 2);
        let t2 = self.t2.unwrap_or(preferred / 5 * 4);
        (t1, t2)
    }

    /// IAIDs of the served kind in the request
    fn request_ias<'a>(&self, bundle: &'a TransactionBundle) -> Vec<(u32, Option<LeaseKind>)> {
        bundle
            .inner()
            .options
            .iter()
            .filter_map(|option| match (self.kind, option) {
                (IaKind::Na, DhcpOption::IaNa(ia)) => {
                    let hint = ia.options.iter().find_map(|sub| match sub {
                        DhcpOption::IaAddress(addr) => Some(LeaseKind::Address(addr.address)),
                        _ => None,
                    });
                    Some((ia.iaid, hint))
                }
                (IaKind::Pd, DhcpOption::IaPd(ia)) => {
                    let hint = ia.options.iter().find_map(|sub| match sub {
                        DhcpOption::IaPrefix(prefix) => {
                            Some(LeaseKind::Prefix(prefix.prefix, prefix.prefix_length))
                        }
                        _ => None,
                    });
                    Some((ia.iaid, hint))
                }
                _ => None,
            })
            .collect()
    }

    /// The IA option answering `iaid` with a granted lease
    fn granted_ia(&self, iaid: u32, lease: &Lease, with_status: bool) -> DhcpOption {
        let (t1, t2) = self.timers(lease.preferred);
        let mut ia_options = Vec::with_capacity(2);
        match (self.kind, lease.kind) {
            (IaKind::Na, LeaseKind::Address(address)) => {
                ia_options.push(DhcpOption::IaAddress(IaAddress {
                    address,
                    preferred_lifetime: lease.preferred,
                    valid_lifetime: lease.valid,
                    options: vec![],
                }));
            }
            (IaKind::Pd, LeaseKind::Prefix(prefix, prefix_length)) => {
                ia_options.push(DhcpOption::IaPrefix(IaPrefix {
                    preferred_lifetime: lease.preferred,
                    valid_lifetime: lease.valid,
                    prefix_length,
                    prefix,
                    options: vec![],
                }));
            }
            // A store serving the wrong kind is a bug; answer with nothing
            _ => {}
        }
        if with_status {
            ia_options.push(DhcpOption::StatusCode(StatusCodeOption::success()));
        }
        self.wrap_ia(iaid, t1, t2, ia_options)
    }

    /// The IA option answering `iaid` with a status code only
    fn denied_ia(&self, iaid: u32, denial: Denial) -> DhcpOption {
        let status = match denial {
            Denial::NoAddrsAvail => StatusCodeOption::new(
                options::status::NO_ADDRS_AVAIL,
                "no addresses available",
            ),
            Denial::NoPrefixAvail => {
                StatusCodeOption::new(options::status::NO_PREFIX_AVAIL, "no prefixes available")
            }
            Denial::NoBinding => {
                StatusCodeOption::new(options::status::NO_BINDING, "no binding for this client")
            }
            Denial::NotOnLink => {
                StatusCodeOption::new(options::status::NOT_ON_LINK, "not on link")
            }
        };
        self.wrap_ia(iaid, 0, 0, vec![DhcpOption::StatusCode(status)])
    }

    fn wrap_ia(&self, iaid: u32, t1: u32, t2: u32, ia_options: Vec<DhcpOption>) -> DhcpOption {
        match self.kind {
            IaKind::Na => DhcpOption::IaNa(IaNa {
                iaid,
                t1,
                t2,
                options: ia_options,
            }),
            IaKind::Pd => DhcpOption::IaPd(IaPd {
                iaid,
                t1,
                t2,
                options: ia_options,
            }),
        }
    }

    fn client_id(bundle: &TransactionBundle) -> Option<Vec<u8>> {
        bundle.facts.client_duid.as_ref().map(|duid| duid.encode())
    }

    fn answer_allocations(
        &self,
        bundle: &mut TransactionBundle,
        renewal: bool,
        with_status: bool,
    ) -> Result<(), HandlerError> {
        let client_id = match Self::client_id(bundle) {
            Some(id) => id,
            None => return Ok(()),
        };
        let link_address = bundle.facts.link_address;
        let deadline = bundle.deadline;

        for (iaid, hint) in self.request_ias(bundle) {
            let allocation = if renewal {
                self.store.renew(&client_id, iaid, deadline)?
            } else {
                let hints = AllocationHints {
                    requested: hint,
                    link_address,
                };
                self.store.allocate(&client_id, iaid, &hints, deadline)?
            };

            let ia = match allocation {
                Allocation::Granted(lease) => self.granted_ia(iaid, &lease, with_status),
                Allocation::Denied(denial) => self.denied_ia(iaid, denial),
            };
            bundle.set_response_option(ia);
        }
        Ok(())
    }

    fn answer_confirm(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let deadline = bundle.deadline;
        let mut any = false;
        let mut all_on_link = true;

        for option in &bundle.inner().options {
            let kinds: Vec<LeaseKind> = match (self.kind, option) {
                (IaKind::Na, DhcpOption::IaNa(ia)) => ia
                    .options
                    .iter()
                    .filter_map(|sub| match sub {
                        DhcpOption::IaAddress(addr) => Some(LeaseKind::Address(addr.address)),
                        _ => None,
                    })
                    .collect(),
                (IaKind::Pd, DhcpOption::IaPd(ia)) => ia
                    .options
                    .iter()
                    .filter_map(|sub| match sub {
                        DhcpOption::IaPrefix(prefix) => {
                            Some(LeaseKind::Prefix(prefix.prefix, prefix.prefix_length))
                        }
                        _ => None,
                    })
                    .collect(),
                _ => continue,
            };
            for kind in kinds {
                any = true;
                if !self.store.confirm(&kind, deadline)? {
                    all_on_link = false;
                }
            }
        }

        if any {
            let status = if all_on_link {
                StatusCodeOption::new(options::status::SUCCESS, "all addresses on-link")
            } else {
                StatusCodeOption::new(options::status::NOT_ON_LINK, "address not on this link")
            };
            bundle.set_response_option(DhcpOption::StatusCode(status));
        }
        Ok(())
    }

    fn answer_teardown(
        &self,
        bundle: &mut TransactionBundle,
        decline: bool,
    ) -> Result<(), HandlerError> {
        let client_id = match Self::client_id(bundle) {
            Some(id) => id,
            None => return Ok(()),
        };
        let deadline = bundle.deadline;

        for (iaid, _) in self.request_ias(bundle) {
            if decline {
                self.store.decline(&client_id, iaid, deadline)?;
            } else {
                self.store.release(&client_id, iaid, deadline)?;
            }
        }
        bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::success()));
        Ok(())
    }
}

impl Handler for PoolHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn idempotent(&self) -> bool {
        // Allocation is idempotent per (client, iaid) and the IA in the
        // response is replaced, not appended
        true
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        match bundle.inner().msg_type {
            MessageType::Solicit => self.answer_allocations(bundle, false, false),
            MessageType::Request => self.answer_allocations(bundle, false, true),
            MessageType::Renew | MessageType::Rebind => {
                self.answer_allocations(bundle, true, true)
            }
            MessageType::Confirm => self.answer_confirm(bundle),
            MessageType::Release => self.answer_teardown(bundle, false),
            MessageType::Decline => self.answer_teardown(bundle, true),
            _ => Ok(()),
        }
    }
}

fn pool_config(ctx: &FactoryContext, delegation: bool) -> Result<PoolConfig, Error> {
    let (prefix, prefix_len) = super::parse_prefix6(ctx.require_str("pool")?)?;
    let delegation_len = if delegation {
        let len = ctx.get_u8("delegation-len")?.unwrap_or(64);
        if len <= prefix_len || len > 128 {
            return Err(Error::config(format!(
                "handler '{}': delegation-len {} does not fit inside /{}",
                ctx.name, len, prefix_len
            )));
        }
        Some(len)
    } else {
        None
    };
    Ok(PoolConfig {
        prefix,
        prefix_len,
        delegation_len,
        preferred: ctx.get_u32("preferred-lifetime")?.unwrap_or(3600),
        valid: ctx.get_u32("valid-lifetime")?.unwrap_or(7200),
    })
}

fn build(ctx: &FactoryContext, kind: IaKind) -> Result<Arc<dyn Handler>, Error> {
    let config = pool_config(ctx, kind == IaKind::Pd)?;
    if config.preferred > config.valid {
        return Err(Error::config(format!(
            "handler '{}': preferred-lifetime exceeds valid-lifetime",
            ctx.name
        )));
    }
    let key = config.cache_key();
    let store = ctx
        .stores
        .get_or_create(&key, || Arc::new(MemoryLeaseStore::new(config)));
    Ok(Arc::new(PoolHandler {
        name: ctx.name.to_string(),
        kind,
        store,
        t1: ctx.get_u32("t1")?,
        t2: ctx.get_u32("t2")?,
    }))
}

pub(crate) fn ia_na_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    build(ctx, IaKind::Na)
}

pub(crate) fn ia_pd_factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    build(ctx, IaKind::Pd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StoreCache;
    use crate::transaction::test_support::{bundle_from, solicit};
    use hexane_core::types::TransactionId;
    use hexane_wire::{ClientMessage, Duid, Message};

    fn na_handler() -> PoolHandler {
        PoolHandler {
            name: "ia-na-pool".to_string(),
            kind: IaKind::Na,
            store: Arc::new(MemoryLeaseStore::new(PoolConfig {
                prefix: "2001:db8::".parse().unwrap(),
                prefix_len: 64,
                delegation_len: None,
                preferred: 3600,
                valid: 7200,
            })),
            t1: None,
            t2: None,
        }
    }

    #[test]
    fn test_solicit_offers_first_address() {
        let handler = na_handler();
        let mut bundle = bundle_from(solicit([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], 1));
        handler.handle(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                assert_eq!(ia.iaid, 1);
                assert_eq!(ia.t1, 1800);
                assert_eq!(ia.t2, 2880);
                match &ia.options[0] {
                    DhcpOption::IaAddress(addr) => {
                        assert_eq!(addr.address, "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap());
                        assert_eq!(addr.preferred_lifetime, 3600);
                        assert_eq!(addr.valid_lifetime, 7200);
                    }
                    other => panic!("expected address, got {:?}", other),
                }
                // An offer carries no status code
                assert_eq!(ia.options.len(), 1);
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_request_commits_with_success_status() {
        let handler = na_handler();

        // The client requests the address it was offered
        let request = Message::Client(
            ClientMessage::new(MessageType::Request, TransactionId([1, 2, 3])).with_options(vec![
                DhcpOption::ClientId(Duid::from_mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])),
                DhcpOption::IaNa(IaNa {
                    iaid: 1,
                    t1: 0,
                    t2: 0,
                    options: vec![DhcpOption::IaAddress(IaAddress {
                        address: "2001:db8::1".parse().unwrap(),
                        preferred_lifetime: 0,
                        valid_lifetime: 0,
                        options: vec![],
                    })],
                }),
            ]),
        );
        let mut bundle = bundle_from(request);
        handler.handle(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                let has_addr = ia.options.iter().any(|o| {
                    matches!(o, DhcpOption::IaAddress(a)
                        if a.address == "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap())
                });
                let has_success = ia.options.iter().any(|o| {
                    matches!(o, DhcpOption::StatusCode(s) if s.code == options::status::SUCCESS)
                });
                assert!(has_addr);
                assert!(has_success);
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_renew_without_binding_is_no_binding() {
        let handler = na_handler();
        let renew = Message::Client(
            ClientMessage::new(MessageType::Renew, TransactionId([1, 2, 3])).with_options(vec![
                DhcpOption::ClientId(Duid::from_mac([0xaa; 6])),
                DhcpOption::ServerId(Duid::from_mac([0xbb; 6])),
                DhcpOption::IaNa(IaNa {
                    iaid: 9,
                    t1: 0,
                    t2: 0,
                    options: vec![],
                }),
            ]),
        );
        let mut bundle = bundle_from(renew);
        handler.handle(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                assert!(ia.options.iter().any(|o| {
                    matches!(o, DhcpOption::StatusCode(s) if s.code == options::status::NO_BINDING)
                }));
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_pool_exhaustion_yields_no_addrs_avail() {
        let handler = PoolHandler {
            name: "ia-na-pool".to_string(),
            kind: IaKind::Na,
            store: Arc::new(MemoryLeaseStore::new(PoolConfig {
                prefix: "2001:db8::".parse().unwrap(),
                prefix_len: 127, // one usable address
                delegation_len: None,
                preferred: 3600,
                valid: 7200,
            })),
            t1: None,
            t2: None,
        };

        let mut first = bundle_from(solicit([1; 6], 1));
        handler.handle(&mut first).unwrap();
        let mut second = bundle_from(solicit([2; 6], 1));
        handler.handle(&mut second).unwrap();

        match second.find_response(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                assert!(ia.options.iter().any(|o| matches!(
                    o,
                    DhcpOption::StatusCode(s) if s.code == options::status::NO_ADDRS_AVAIL
                )));
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_factory_validates_pool() {
        let stores = StoreCache::new();
        let params = serde_json::json!({ "pool": "2001:db8::/64", "preferred-lifetime": 9000, "valid-lifetime": 600 });
        let params = params.as_object().unwrap().clone();
        let ctx = FactoryContext {
            name: "ia-na-pool",
            params: &params,
            precedence: None,
            stores: &stores,
        };
        assert!(ia_na_factory(&ctx).is_err());
    }
}
