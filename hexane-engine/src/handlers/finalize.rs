//! Mandatory finalization handlers
//!
//! Always appended to the pipeline after the configured handlers: echo
//! the client-id, fix the response type, answer unanswered IAs with a
//! status code, strip unsolicited options, and account for drops.

use std::sync::Arc;

use hexane_core::error::HandlerError;
use hexane_core::stats::ServerStats;

use hexane_wire::options::prefix_delegation::IaPd;
use hexane_wire::options::{self, DhcpOption, IaNa, IaTa, StatusCodeOption};
use hexane_wire::registry::OptionRegistry;
use hexane_wire::MessageType;

use crate::handler::Handler;
use crate::transaction::{response_type_for, TransactionBundle, RAPID_COMMIT_MARK};

/// Echo the request's client-id into the response
pub struct EchoClientIdHandler;

impl Handler for EchoClientIdHandler {
    fn name(&self) -> &str {
        "echo-client-id"
    }

    fn precedence(&self) -> u16 {
        500
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.find_response(options::OPTION_CLIENTID).is_none() {
            if let Some(duid) = bundle.facts.client_duid.clone() {
                bundle.set_response_option(DhcpOption::ClientId(duid));
            }
        }
        Ok(())
    }
}

/// Force the response type the request kind demands
pub struct ResponseTypeHandler;

impl Handler for ResponseTypeHandler {
    fn name(&self) -> &str {
        "response-type"
    }

    fn precedence(&self) -> u16 {
        510
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let expected = response_type_for(
            bundle.inner().msg_type,
            bundle.is_marked(RAPID_COMMIT_MARK),
        );
        if bundle.response().msg_type != expected {
            tracing::debug!(
                id = %bundle.id,
                found = %bundle.response().msg_type,
                expected = %expected,
                "Correcting response type"
            );
            bundle.response_mut().msg_type = expected;
        }
        Ok(())
    }
}

/// Answer IAs no handler answered with the appropriate status code
pub struct UnansweredIaHandler;

impl UnansweredIaHandler {
    fn denial_status(msg_type: MessageType, prefix: bool) -> StatusCodeOption {
        match msg_type {
            MessageType::Renew | MessageType::Rebind => StatusCodeOption::new(
                options::status::NO_BINDING,
                "no binding for this client",
            ),
            _ if prefix => {
                StatusCodeOption::new(options::status::NO_PREFIX_AVAIL, "no prefixes available")
            }
            _ => StatusCodeOption::new(options::status::NO_ADDRS_AVAIL, "no addresses available"),
        }
    }
}

impl Handler for UnansweredIaHandler {
    fn name(&self) -> &str {
        "unanswered-ia"
    }

    fn precedence(&self) -> u16 {
        520
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let msg_type = bundle.inner().msg_type;
        if !matches!(
            msg_type,
            MessageType::Solicit | MessageType::Request | MessageType::Renew | MessageType::Rebind
        ) {
            return Ok(());
        }

        let unanswered_na: Vec<u32> = bundle
            .facts
            .ia_na_ids
            .iter()
            .copied()
            .filter(|iaid| {
                !bundle.response().find_all(options::OPTION_IA_NA).any(
                    |option| matches!(option, DhcpOption::IaNa(ia) if ia.iaid == *iaid),
                )
            })
            .collect();
        for iaid in unanswered_na {
            bundle.set_response_option(DhcpOption::IaNa(IaNa {
                iaid,
                t1: 0,
                t2: 0,
                options: vec![DhcpOption::StatusCode(Self::denial_status(msg_type, false))],
            }));
        }

        let unanswered_ta: Vec<u32> = bundle
            .facts
            .ia_ta_ids
            .iter()
            .copied()
            .filter(|iaid| {
                !bundle.response().find_all(options::OPTION_IA_TA).any(
                    |option| matches!(option, DhcpOption::IaTa(ia) if ia.iaid == *iaid),
                )
            })
            .collect();
        for iaid in unanswered_ta {
            bundle.set_response_option(DhcpOption::IaTa(IaTa {
                iaid,
                options: vec![DhcpOption::StatusCode(Self::denial_status(msg_type, false))],
            }));
        }

        let unanswered_pd: Vec<u32> = bundle
            .facts
            .ia_pd_ids
            .iter()
            .copied()
            .filter(|iaid| {
                !bundle
                    .response()
                    .find_all(options::prefix_delegation::OPTION_IA_PD)
                    .any(|option| matches!(option, DhcpOption::IaPd(ia) if ia.iaid == *iaid))
            })
            .collect();
        for iaid in unanswered_pd {
            bundle.set_response_option(DhcpOption::IaPd(IaPd {
                iaid,
                t1: 0,
                t2: 0,
                options: vec![DhcpOption::StatusCode(Self::denial_status(msg_type, true))],
            }));
        }

        Ok(())
    }
}

/// Strip ORO-gated options the client neither requested nor a handler forced
pub struct StripUnsolicitedHandler;

impl Handler for StripUnsolicitedHandler {
    fn name(&self) -> &str {
        "strip-unsolicited"
    }

    fn precedence(&self) -> u16 {
        530
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let registry = OptionRegistry::global();
        let requested: Vec<u16> = bundle.inner().requested_options().to_vec();

        let keep: Vec<bool> = bundle
            .response()
            .options
            .iter()
            .map(|option| {
                let code = option.code();
                !registry.is_oro_gated(code)
                    || requested.contains(&code)
                    || bundle.is_forced(code)
            })
            .collect();

        let mut index = 0;
        bundle.response_mut().options.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        Ok(())
    }
}

/// Count drops by reason; runs even when the transaction was dropped
pub struct DropAccountingHandler {
    stats: Arc<ServerStats>,
}

impl DropAccountingHandler {
    pub fn new(stats: Arc<ServerStats>) -> Self {
        Self { stats }
    }
}

impl Handler for DropAccountingHandler {
    fn name(&self) -> &str {
        "drop-accounting"
    }

    fn precedence(&self) -> u16 {
        1000
    }

    fn run_on_drop(&self) -> bool {
        true
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.is_dropped() {
            if let Some(reason) = bundle.drop_reason() {
                self.stats.record_dropped(reason);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::{bundle_from, solicit};
    use hexane_core::types::DropReason;
    use hexane_wire::Duid;

    #[test]
    fn test_client_id_is_echoed_once() {
        let handler = EchoClientIdHandler;
        let mut bundle = bundle_from(solicit([0x42; 6], 1));

        handler.post(&mut bundle).unwrap();
        handler.post(&mut bundle).unwrap();

        let ids: Vec<_> = bundle
            .response()
            .find_all(options::OPTION_CLIENTID)
            .collect();
        assert_eq!(ids, vec![&DhcpOption::ClientId(Duid::from_mac([0x42; 6]))]);
    }

    #[test]
    fn test_response_type_is_corrected() {
        let mut bundle = bundle_from(solicit([0; 6], 1));
        bundle.response_mut().msg_type = MessageType::Reply;
        ResponseTypeHandler.post(&mut bundle).unwrap();
        assert_eq!(bundle.response().msg_type, MessageType::Advertise);
    }

    #[test]
    fn test_unanswered_ia_gets_status() {
        let mut bundle = bundle_from(solicit([0; 6], 1));
        UnansweredIaHandler.post(&mut bundle).unwrap();

        match bundle.find_response(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                assert_eq!(ia.iaid, 1);
                assert!(matches!(
                    &ia.options[0],
                    DhcpOption::StatusCode(s) if s.code == options::status::NO_ADDRS_AVAIL
                ));
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }

        // Idempotent: a second pass adds nothing
        let before = bundle.response().options.len();
        UnansweredIaHandler.post(&mut bundle).unwrap();
        assert_eq!(bundle.response().options.len(), before);
    }

    #[test]
    fn test_strip_removes_unrequested_gated_options() {
        let mut bundle = bundle_from(solicit([0; 6], 1));
        bundle.set_response_option(DhcpOption::DnsServers(vec!["2001:db8::53".parse().unwrap()]));
        bundle.set_response_option(DhcpOption::Preference(255));
        bundle.set_response_option(DhcpOption::SolMaxRt(3600));
        bundle.force_option(options::sol_max_rt::OPTION_SOL_MAX_RT);

        StripUnsolicitedHandler.post(&mut bundle).unwrap();

        // Gated and unrequested: gone
        assert!(bundle
            .find_response(options::dns::OPTION_DNS_SERVERS)
            .is_none());
        // Not gated: kept
        assert!(bundle.find_response(options::OPTION_PREFERENCE).is_some());
        // Gated but forced: kept
        assert!(bundle
            .find_response(options::sol_max_rt::OPTION_SOL_MAX_RT)
            .is_some());
    }

    #[test]
    fn test_drop_accounting_counts_only_drops() {
        let stats = Arc::new(ServerStats::new());
        let handler = DropAccountingHandler::new(stats.clone());

        let mut emitted = bundle_from(solicit([0; 6], 1));
        handler.post(&mut emitted).unwrap();
        assert_eq!(stats.snapshot().values["pipeline.dropped"], 0);

        let mut dropped = bundle_from(solicit([0; 6], 1));
        dropped.drop_with(DropReason::Policy);
        handler.post(&mut dropped).unwrap();
        assert_eq!(stats.snapshot().values["pipeline.dropped"], 1);
        assert_eq!(stats.snapshot().values["pipeline.drop.policy"], 1);
    }
}
