//! Relay reply framing
//!
//! The last finalization step: mirror the decoded relay chain outside-in,
//! wrapping the reply in one relay-reply per relay-forward, echoing each
//! hop's interface-id, and re-inserting the inner message through a
//! relay-message option.

use hexane_core::error::HandlerError;

use hexane_wire::options::DhcpOption;
use hexane_wire::{Message, MessageType, RelayMessage};

use crate::handler::Handler;
use crate::transaction::TransactionBundle;

pub struct RelayReplyHandler;

impl Handler for RelayReplyHandler {
    fn name(&self) -> &str {
        "relay-reply"
    }

    fn precedence(&self) -> u16 {
        // After every other finalizer; the wrapped message is sealed here
        900
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let mut outbound = Message::Client(bundle.response().clone());

        // Wrap innermost-first so depth and addresses mirror the request
        for relay in bundle.relay_chain().iter().rev() {
            let mut options = Vec::with_capacity(2);
            if let Some(interface_id) = relay.interface_id() {
                options.push(DhcpOption::InterfaceId(interface_id.to_vec()));
            }
            options.push(DhcpOption::RelayMessage(Box::new(outbound)));

            outbound = Message::Relay(RelayMessage {
                msg_type: MessageType::RelayReply,
                hop_count: relay.hop_count,
                link_address: relay.link_address,
                peer_address: relay.peer_address,
                options,
            });
        }

        bundle.set_outbound(outbound);
        Ok(())
    }
}
