//! Leasequery handler (RFC 5007, bulk mode per RFC 5460)
//!
//! Answers Leasequery messages against a pool's store. Queries by address
//! and by client-id are served; other query types get an unknown-query-type
//! status. Over TCP the result set is streamed: the first binding rides in
//! the reply, further bindings in leasequery-data messages, terminated by
//! leasequery-done.

use std::sync::Arc;
use std::time::SystemTime;

use hexane_core::error::{Error, HandlerError};
use hexane_core::store::{Lease, LeaseKind, LeaseStore};
use hexane_core::types::Transport;

use hexane_wire::options::leasequery::{LqQuery, QUERY_BY_ADDRESS, QUERY_BY_CLIENT_ID};
use hexane_wire::options::{self, DhcpOption, IaAddress, StatusCodeOption};
use hexane_wire::options::prefix_delegation::IaPrefix;
use hexane_wire::{ClientMessage, Duid, MessageType};

use crate::handler::Handler;
use crate::registry::FactoryContext;
use crate::store::{MemoryLeaseStore, PoolConfig};
use crate::transaction::TransactionBundle;

pub struct LeasequeryHandler {
    store: Arc<dyn LeaseStore>,
}

impl LeasequeryHandler {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    fn client_data(leases: &[Lease]) -> Result<DhcpOption, HandlerError> {
        let mut data = Vec::with_capacity(leases.len() + 2);
        if let Some(first) = leases.first() {
            data.push(DhcpOption::ClientId(Duid::decode(&first.client_id)?));
        }
        let mut newest = None;
        for lease in leases {
            match lease.kind {
                LeaseKind::Address(address) => data.push(DhcpOption::IaAddress(IaAddress {
                    address,
                    preferred_lifetime: lease.preferred,
                    valid_lifetime: lease.valid,
                    options: vec![],
                })),
                LeaseKind::Prefix(prefix, prefix_length) => {
                    data.push(DhcpOption::IaPrefix(IaPrefix {
                        preferred_lifetime: lease.preferred,
                        valid_lifetime: lease.valid,
                        prefix_length,
                        prefix,
                        options: vec![],
                    }))
                }
            }
            if newest.map(|at| lease.updated_at > at).unwrap_or(true) {
                newest = Some(lease.updated_at);
            }
        }
        let age = newest
            .and_then(|at| SystemTime::now().duration_since(at).ok())
            .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        data.push(DhcpOption::CltTime(age));
        Ok(DhcpOption::ClientData(data))
    }

    fn answer(&self, bundle: &mut TransactionBundle, query: LqQuery) -> Result<(), HandlerError> {
        let deadline = bundle.deadline;

        // Collect the matching bindings, grouped per client
        let groups: Vec<Vec<Lease>> = match query.query_type {
            QUERY_BY_ADDRESS => match query.queried_address() {
                Some(address) => self
                    .store
                    .query_by_address(address, deadline)?
                    .map(|lease| vec![vec![lease]])
                    .unwrap_or_default(),
                None => {
                    bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::new(
                        options::status::MALFORMED_QUERY,
                        "query-by-address without an address",
                    )));
                    return Ok(());
                }
            },
            QUERY_BY_CLIENT_ID => match query.queried_client() {
                Some(duid) => {
                    let leases = self.store.query_by_client(&duid.encode(), deadline)?;
                    if leases.is_empty() {
                        Vec::new()
                    } else {
                        vec![leases]
                    }
                }
                None => {
                    bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::new(
                        options::status::MALFORMED_QUERY,
                        "query-by-client-id without a client-id",
                    )));
                    return Ok(());
                }
            },
            other => {
                tracing::debug!(id = %bundle.id, query_type = other, "Unknown leasequery type");
                bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::new(
                    options::status::UNKNOWN_QUERY_TYPE,
                    "query type not supported",
                )));
                return Ok(());
            }
        };

        bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::success()));

        if groups.is_empty() {
            // Success with no client-data means: nothing known
            return Ok(());
        }

        match bundle.recv.transport {
            Transport::Udp => {
                // One datagram: only the first group fits
                bundle.set_response_option(Self::client_data(&groups[0])?);
            }
            Transport::Tcp => {
                let transaction_id = bundle.transaction_id();

                // Split the first group: first binding in the reply, the
                // rest streamed as leasequery-data
                let (head, tail) = groups[0].split_at(1);
                bundle.set_response_option(Self::client_data(head)?);

                for lease in tail {
                    let mut data = ClientMessage::new(MessageType::LeasequeryData, transaction_id);
                    data.options
                        .push(Self::client_data(std::slice::from_ref(lease))?);
                    bundle.extra_responses.push(data);
                }
                bundle
                    .extra_responses
                    .push(ClientMessage::new(MessageType::LeasequeryDone, transaction_id));
            }
        }

        Ok(())
    }
}

impl Handler for LeasequeryHandler {
    fn name(&self) -> &str {
        "leasequery"
    }

    fn idempotent(&self) -> bool {
        false
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.inner().msg_type != MessageType::Leasequery {
            return Ok(());
        }
        match bundle.inner().find(options::leasequery::OPTION_LQ_QUERY) {
            Some(DhcpOption::LqQuery(query)) => {
                let query = query.clone();
                self.answer(bundle, query)
            }
            _ => {
                bundle.set_response_option(DhcpOption::StatusCode(StatusCodeOption::new(
                    options::status::MALFORMED_QUERY,
                    "leasequery without a query option",
                )));
                Ok(())
            }
        }
    }
}

pub(crate) fn factory(ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    // Queries run against the same pool a pool handler serves
    let (prefix, prefix_len) = super::parse_prefix6(ctx.require_str("pool")?)?;
    let delegation_len = ctx.get_u8("delegation-len")?;
    let config = PoolConfig {
        prefix,
        prefix_len,
        delegation_len,
        preferred: ctx.get_u32("preferred-lifetime")?.unwrap_or(3600),
        valid: ctx.get_u32("valid-lifetime")?.unwrap_or(7200),
    };
    let key = config.cache_key();
    let store = ctx
        .stores
        .get_or_create(&key, || Arc::new(MemoryLeaseStore::new(config)));
    Ok(Arc::new(LeasequeryHandler::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::recv_info;
    use hexane_core::store::AllocationHints;
    use hexane_core::types::TransactionId;
    use hexane_wire::{Decoded, Message};
    use std::time::{Duration, Instant};

    fn store_with_leases() -> Arc<MemoryLeaseStore> {
        let store = Arc::new(MemoryLeaseStore::new(PoolConfig {
            prefix: "2001:db8::".parse().unwrap(),
            prefix_len: 64,
            delegation_len: None,
            preferred: 3600,
            valid: 7200,
        }));
        let deadline = Instant::now() + Duration::from_secs(1);
        let client = Duid::from_mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]).encode();
        store.allocate(&client, 1, &AllocationHints::default(), deadline).unwrap();
        store.allocate(&client, 2, &AllocationHints::default(), deadline).unwrap();
        store
    }

    fn leasequery_bundle(query: LqQuery, transport: Transport) -> TransactionBundle {
        let message = Message::Client(
            ClientMessage::new(MessageType::Leasequery, TransactionId([7, 8, 9])).with_options(
                vec![
                    DhcpOption::ClientId(Duid::from_mac([0xca, 0xfe, 0, 0, 0, 1])),
                    DhcpOption::LqQuery(query),
                ],
            ),
        );
        let mut recv = recv_info();
        recv.transport = transport;
        TransactionBundle::new(
            Decoded {
                message,
                consumed: 0,
                partial: false,
            },
            recv,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_query_by_address() {
        let handler = LeasequeryHandler::new(store_with_leases());
        let query = LqQuery {
            query_type: QUERY_BY_ADDRESS,
            link_address: "::".parse().unwrap(),
            options: vec![DhcpOption::IaAddress(IaAddress {
                address: "2001:db8::1".parse().unwrap(),
                preferred_lifetime: 0,
                valid_lifetime: 0,
                options: vec![],
            })],
        };
        let mut bundle = leasequery_bundle(query, Transport::Udp);
        handler.handle(&mut bundle).unwrap();

        assert_eq!(bundle.response().msg_type, MessageType::LeasequeryReply);
        match bundle.find_response(options::leasequery::OPTION_CLIENT_DATA) {
            Some(DhcpOption::ClientData(data)) => {
                assert!(matches!(data[0], DhcpOption::ClientId(_)));
                assert!(data
                    .iter()
                    .any(|option| matches!(option, DhcpOption::IaAddress(_))));
                assert!(data
                    .iter()
                    .any(|option| matches!(option, DhcpOption::CltTime(_))));
            }
            other => panic!("expected client-data, got {:?}", other),
        }
    }

    #[test]
    fn test_query_by_client_id_over_tcp_streams() {
        let handler = LeasequeryHandler::new(store_with_leases());
        let query = LqQuery {
            query_type: QUERY_BY_CLIENT_ID,
            link_address: "::".parse().unwrap(),
            options: vec![DhcpOption::ClientId(Duid::from_mac([
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
            ]))],
        };
        let mut bundle = leasequery_bundle(query, Transport::Tcp);
        handler.handle(&mut bundle).unwrap();

        // Two bindings: one in the reply, one streamed, then done
        assert_eq!(bundle.extra_responses.len(), 2);
        assert_eq!(
            bundle.extra_responses[0].msg_type,
            MessageType::LeasequeryData
        );
        assert_eq!(
            bundle.extra_responses[1].msg_type,
            MessageType::LeasequeryDone
        );
    }

    #[test]
    fn test_unknown_query_type() {
        let handler = LeasequeryHandler::new(store_with_leases());
        let query = LqQuery {
            query_type: 200,
            link_address: "::".parse().unwrap(),
            options: vec![],
        };
        let mut bundle = leasequery_bundle(query, Transport::Udp);
        handler.handle(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_STATUS_CODE) {
            Some(DhcpOption::StatusCode(status)) => {
                assert_eq!(status.code, options::status::UNKNOWN_QUERY_TYPE);
            }
            other => panic!("expected status code, got {:?}", other),
        }
    }

    #[test]
    fn test_no_match_is_success_without_data() {
        let handler = LeasequeryHandler::new(store_with_leases());
        let query = LqQuery {
            query_type: QUERY_BY_ADDRESS,
            link_address: "::".parse().unwrap(),
            options: vec![DhcpOption::IaAddress(IaAddress {
                address: "2001:db8::9999".parse().unwrap(),
                preferred_lifetime: 0,
                valid_lifetime: 0,
                options: vec![],
            })],
        };
        let mut bundle = leasequery_bundle(query, Transport::Udp);
        handler.handle(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_STATUS_CODE) {
            Some(DhcpOption::StatusCode(status)) => {
                assert_eq!(status.code, options::status::SUCCESS);
            }
            other => panic!("expected status code, got {:?}", other),
        }
        assert!(bundle
            .find_response(options::leasequery::OPTION_CLIENT_DATA)
            .is_none());
    }
}
