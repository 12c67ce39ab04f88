//! Per-message transaction state
//!
//! A [`TransactionBundle`] carries one inbound request and everything
//! produced while answering it: derived facts, marks, the response under
//! construction, and the disposition. The request is immutable after
//! parse; the disposition is monotonic (once dropped, never emitted).

use std::collections::{HashMap, HashSet};
use std::net::{Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use uuid::Uuid;

use hexane_core::types::{Disposition, DropReason, TransactionId, Transport};
use hexane_wire::options::DhcpOption;
use hexane_wire::registry::OptionRegistry;
use hexane_wire::{ClientMessage, Decoded, Duid, Message, MessageType, RelayMessage};

/// Where and how a datagram was received
#[derive(Debug, Clone)]
pub struct ReceiveInfo {
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub interface: String,
    pub received_at: Instant,
    pub transport: Transport,
}

/// Facts derived from the request at parse time
#[derive(Debug, Clone, Default)]
pub struct Facts {
    pub client_duid: Option<Duid>,
    pub server_duid: Option<Duid>,
    pub ia_na_ids: Vec<u32>,
    pub ia_ta_ids: Vec<u32>,
    pub ia_pd_ids: Vec<u32>,
    pub elapsed_time: Option<u16>,
    /// Link address of the outermost relay, when relayed
    pub link_address: Option<Ipv6Addr>,
    /// Interface-ids along the relay chain, outside-in
    pub interface_ids: Vec<Vec<u8>>,
    pub remote_ids: Vec<(u32, Vec<u8>)>,
    pub subscriber_ids: Vec<Vec<u8>>,
    pub client_link_layer: Option<(u16, Vec<u8>)>,
}

/// Lifecycle of a transaction; transitions are forward-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransactionState {
    Parsed,
    Classified,
    Answered,
    Finalized,
    Emitted,
    Dropped,
}

/// Everything one transaction carries through the pipeline
pub struct TransactionBundle {
    /// Server-side tracking id, used in every log line about this transaction
    pub id: Uuid,
    /// The request exactly as decoded
    request: Message,
    /// Relay chain outer to inner; empty for unrelayed requests
    relay_chain: Vec<RelayMessage>,
    /// The innermost client message
    inner: ClientMessage,
    /// Some options were demoted to opaque during decode
    pub partial: bool,
    pub facts: Facts,
    pub recv: ReceiveInfo,
    pub deadline: Instant,

    response: ClientMessage,
    /// Finalized outbound message, relay framing applied
    outbound: Option<Message>,
    /// Additional messages streamed after the response (bulk leasequery)
    pub extra_responses: Vec<ClientMessage>,

    marks: HashSet<String>,
    scratch: HashMap<String, String>,
    forced_options: HashSet<u16>,

    state: TransactionState,
    disposition: Disposition,
    drop_reason: Option<DropReason>,
}

impl TransactionBundle {
    /// Build a bundle from a decoded message.
    ///
    /// Fails with [`DropReason::ClientOnly`] when the message kind is one
    /// only servers originate, and with [`DropReason::DecodeError`] when a
    /// relay chain does not terminate in a client message.
    pub fn new(
        decoded: Decoded,
        recv: ReceiveInfo,
        deadline: Duration,
    ) -> Result<Self, DropReason> {
        let request = decoded.message;

        // Peel the relay chain down to the client message
        let mut relay_chain = Vec::new();
        let mut cursor = &request;
        let inner = loop {
            match cursor {
                Message::Relay(relay) => {
                    if relay.msg_type == MessageType::RelayReply {
                        return Err(DropReason::ClientOnly);
                    }
                    relay_chain.push(relay.clone());
                    cursor = match relay.inner() {
                        Some(inner) => inner,
                        None => return Err(DropReason::DecodeError),
                    };
                }
                Message::Client(client) => {
                    if client.msg_type.is_server_originated() {
                        return Err(DropReason::ClientOnly);
                    }
                    break client.clone();
                }
            }
        };

        let response_type = match inner.msg_type {
            MessageType::Solicit => MessageType::Advertise,
            MessageType::Request
            | MessageType::Confirm
            | MessageType::Renew
            | MessageType::Rebind
            | MessageType::Release
            | MessageType::Decline
            | MessageType::InformationRequest => MessageType::Reply,
            MessageType::Leasequery => MessageType::LeasequeryReply,
            // Relay kinds were peeled above; server kinds rejected
            _ => return Err(DropReason::ClientOnly),
        };
        let response = ClientMessage::new(response_type, inner.transaction_id);

        let facts = Self::derive_facts(&inner, &relay_chain);
        let deadline = recv.received_at + deadline;

        Ok(Self {
            id: Uuid::now_v7(),
            request,
            relay_chain,
            inner,
            partial: decoded.partial,
            facts,
            recv,
            deadline,
            response,
            outbound: None,
            extra_responses: Vec::new(),
            marks: HashSet::new(),
            scratch: HashMap::new(),
            forced_options: HashSet::new(),
            state: TransactionState::Parsed,
            disposition: Disposition::Emit,
            drop_reason: None,
        })
    }

    fn derive_facts(inner: &ClientMessage, relay_chain: &[RelayMessage]) -> Facts {
        let mut facts = Facts {
            client_duid: inner.client_duid().cloned(),
            server_duid: inner.server_duid().cloned(),
            ..Facts::default()
        };

        for option in &inner.options {
            match option {
                DhcpOption::IaNa(ia) => facts.ia_na_ids.push(ia.iaid),
                DhcpOption::IaTa(ia) => facts.ia_ta_ids.push(ia.iaid),
                DhcpOption::IaPd(ia) => facts.ia_pd_ids.push(ia.iaid),
                DhcpOption::ElapsedTime(time) => facts.elapsed_time = Some(*time),
                _ => {}
            }
        }

        if let Some(outermost) = relay_chain.first() {
            facts.link_address = Some(outermost.link_address);
        }
        for relay in relay_chain {
            for option in &relay.options {
                match option {
                    DhcpOption::InterfaceId(id) => facts.interface_ids.push(id.clone()),
                    DhcpOption::RemoteId { enterprise, id } => {
                        facts.remote_ids.push((*enterprise, id.clone()))
                    }
                    DhcpOption::SubscriberId(id) => facts.subscriber_ids.push(id.clone()),
                    DhcpOption::ClientLinkLayer {
                        hardware_type,
                        address,
                    } => {
                        facts.client_link_layer = Some((*hardware_type, address.clone()));
                    }
                    _ => {}
                }
            }
        }

        facts
    }

    // Read-only views

    /// The request as received
    pub fn request(&self) -> &Message {
        &self.request
    }

    /// The innermost client message
    pub fn inner(&self) -> &ClientMessage {
        &self.inner
    }

    /// Relay chain outer to inner; empty when the client sent directly
    pub fn relay_chain(&self) -> &[RelayMessage] {
        &self.relay_chain
    }

    /// The transaction-id echoed back to the client
    pub fn transaction_id(&self) -> TransactionId {
        self.inner.transaction_id
    }

    // Response construction

    pub fn response(&self) -> &ClientMessage {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ClientMessage {
        &mut self.response
    }

    /// First response option carrying `code`
    pub fn find_response(&self, code: u16) -> Option<&DhcpOption> {
        self.response.find(code)
    }

    /// Add an option to the response.
    ///
    /// Singletons replace any prior value (last write wins); IA containers
    /// replace the entry with the same IAID; everything else appends.
    pub fn set_response_option(&mut self, option: DhcpOption) {
        let slot = match &option {
            DhcpOption::IaNa(ia) => {
                let iaid = ia.iaid;
                self.response.options.iter().position(
                    |existing| matches!(existing, DhcpOption::IaNa(x) if x.iaid == iaid),
                )
            }
            DhcpOption::IaPd(ia) => {
                let iaid = ia.iaid;
                self.response.options.iter().position(
                    |existing| matches!(existing, DhcpOption::IaPd(x) if x.iaid == iaid),
                )
            }
            _ if OptionRegistry::global().is_singleton(option.code()) => {
                let code = option.code();
                self.response
                    .options
                    .iter()
                    .position(|existing| existing.code() == code)
            }
            _ => None,
        };
        match slot {
            Some(index) => self.response.options[index] = option,
            None => self.response.options.push(option),
        }
    }

    /// Keep an ORO-gated option even though the client did not request it
    pub fn force_option(&mut self, code: u16) {
        self.forced_options.insert(code);
    }

    pub fn is_forced(&self, code: u16) -> bool {
        self.forced_options.contains(&code)
    }

    /// Did the client request this option code via ORO?
    pub fn is_requested(&self, code: u16) -> bool {
        self.inner.requested_options().contains(&code)
    }

    /// The finalized outbound message, once relay framing ran
    pub fn outbound(&self) -> Option<&Message> {
        self.outbound.as_ref()
    }

    pub fn set_outbound(&mut self, message: Message) {
        self.outbound = Some(message);
    }

    // Marks and scratch

    pub fn mark(&mut self, tag: impl Into<String>) {
        self.marks.insert(tag.into());
    }

    pub fn is_marked(&self, tag: &str) -> bool {
        self.marks.contains(tag)
    }

    pub fn marks(&self) -> &HashSet<String> {
        &self.marks
    }

    /// Inter-handler scratch, scoped to this transaction only
    pub fn scratch_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.scratch.insert(key.into(), value.into());
    }

    pub fn scratch_get(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    // Disposition and lifecycle

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason
    }

    /// Drop the transaction. Monotonic: the first reason sticks and no
    /// later handler can flip the transaction back to emit.
    pub fn drop_with(&mut self, reason: DropReason) {
        if self.disposition != Disposition::Drop {
            self.disposition = Disposition::Drop;
            self.drop_reason = Some(reason);
        }
    }

    /// Ask for one more trip through the queue; ignored once dropped
    pub fn defer(&mut self) {
        if self.disposition == Disposition::Emit {
            self.disposition = Disposition::Defer;
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.disposition == Disposition::Drop
    }

    /// Has the transaction deadline passed?
    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Advance the lifecycle; backward transitions are ignored
    pub fn advance(&mut self, next: TransactionState) {
        if next > self.state {
            self.state = next;
        }
    }
}

/// Expected response kind for a request kind, rapid commit aside
pub fn response_type_for(request: MessageType, rapid_commit: bool) -> MessageType {
    match request {
        MessageType::Solicit if rapid_commit => MessageType::Reply,
        MessageType::Solicit => MessageType::Advertise,
        MessageType::Leasequery => MessageType::LeasequeryReply,
        _ => MessageType::Reply,
    }
}

/// Mark name the rapid-commit handler and response-type finalizer share
pub const RAPID_COMMIT_MARK: &str = "rapid-commit";


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use hexane_wire::options;

    #[test]
    fn test_solicit_skeleton() {
        let bundle = bundle_from(solicit([0, 1, 2, 3, 4, 5], 1));
        assert_eq!(bundle.inner().msg_type, MessageType::Solicit);
        assert_eq!(bundle.response().msg_type, MessageType::Advertise);
        assert_eq!(
            bundle.response().transaction_id,
            TransactionId([0xaa, 0xbb, 0xcc])
        );
        assert_eq!(bundle.facts.ia_na_ids, vec![1]);
        assert!(bundle.facts.client_duid.is_some());
        assert!(bundle.relay_chain().is_empty());
    }

    #[test]
    fn test_client_only_kind_is_rejected() {
        let advertise = Message::Client(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([0, 0, 1]),
        ));
        let decoded = Decoded {
            message: advertise,
            consumed: 0,
            partial: false,
        };
        let result = TransactionBundle::new(decoded, recv_info(), Duration::from_secs(1));
        assert!(matches!(result, Err(DropReason::ClientOnly)));
    }

    #[test]
    fn test_relay_chain_peeling() {
        let inner = solicit([0, 1, 2, 3, 4, 5], 1);
        let relayed = Message::Relay(RelayMessage {
            msg_type: MessageType::RelayForward,
            hop_count: 0,
            link_address: "2001:db8::ffff".parse().unwrap(),
            peer_address: "fe80::1".parse().unwrap(),
            options: vec![
                DhcpOption::InterfaceId(b"ge-0/0/1".to_vec()),
                DhcpOption::RemoteId {
                    enterprise: 9,
                    id: vec![1, 2, 3],
                },
                DhcpOption::RelayMessage(Box::new(inner)),
            ],
        });

        let bundle = bundle_from(relayed);
        assert_eq!(bundle.relay_chain().len(), 1);
        assert_eq!(bundle.inner().msg_type, MessageType::Solicit);
        assert_eq!(
            bundle.facts.link_address,
            Some("2001:db8::ffff".parse().unwrap())
        );
        assert_eq!(bundle.facts.interface_ids, vec![b"ge-0/0/1".to_vec()]);
        assert_eq!(bundle.facts.remote_ids, vec![(9, vec![1, 2, 3])]);
    }

    #[test]
    fn test_disposition_is_monotonic() {
        let mut bundle = bundle_from(solicit([0, 1, 2, 3, 4, 5], 1));
        assert_eq!(bundle.disposition(), Disposition::Emit);

        bundle.drop_with(DropReason::Policy);
        assert_eq!(bundle.disposition(), Disposition::Drop);
        assert_eq!(bundle.drop_reason(), Some(DropReason::Policy));

        // A later drop does not overwrite the first reason
        bundle.drop_with(DropReason::Timeout);
        assert_eq!(bundle.drop_reason(), Some(DropReason::Policy));

        // And defer cannot resurrect a dropped transaction
        bundle.defer();
        assert_eq!(bundle.disposition(), Disposition::Drop);
    }

    #[test]
    fn test_state_is_forward_only() {
        let mut bundle = bundle_from(solicit([0, 1, 2, 3, 4, 5], 1));
        bundle.advance(TransactionState::Answered);
        assert_eq!(bundle.state(), TransactionState::Answered);
        bundle.advance(TransactionState::Classified);
        assert_eq!(bundle.state(), TransactionState::Answered);
    }

    #[test]
    fn test_singleton_replacement_last_write_wins() {
        let mut bundle = bundle_from(solicit([0, 1, 2, 3, 4, 5], 1));
        bundle.set_response_option(DhcpOption::Preference(10));
        bundle.set_response_option(DhcpOption::Preference(255));

        let prefs: Vec<_> = bundle
            .response()
            .find_all(options::OPTION_PREFERENCE)
            .collect();
        assert_eq!(prefs, vec![&DhcpOption::Preference(255)]);
    }

    #[test]
    fn test_ia_replacement_matches_iaid() {
        let mut bundle = bundle_from(solicit([0, 1, 2, 3, 4, 5], 1));
        bundle.set_response_option(DhcpOption::IaNa(options::IaNa {
            iaid: 1,
            t1: 100,
            t2: 200,
            options: vec![],
        }));
        bundle.set_response_option(DhcpOption::IaNa(options::IaNa {
            iaid: 2,
            t1: 0,
            t2: 0,
            options: vec![],
        }));
        bundle.set_response_option(DhcpOption::IaNa(options::IaNa {
            iaid: 1,
            t1: 111,
            t2: 222,
            options: vec![],
        }));

        let ias: Vec<_> = bundle.response().find_all(options::OPTION_IA_NA).collect();
        assert_eq!(ias.len(), 2);
        match ias[0] {
            DhcpOption::IaNa(ia) => assert_eq!((ia.iaid, ia.t1, ia.t2), (1, 111, 222)),
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }
}
