//! Rapid commit handler (RFC 3315 section 17.2.1)
//!
//! When enabled and the Solicit carries a rapid-commit option, the
//! exchange is collapsed: the response becomes a Reply carrying the
//! rapid-commit option, and address handlers commit instead of offer.

use std::sync::Arc;

use hexane_core::error::{Error, HandlerError};

use hexane_wire::options::DhcpOption;
use hexane_wire::MessageType;

use crate::handler::Handler;
use crate::registry::FactoryContext;
use crate::transaction::{TransactionBundle, RAPID_COMMIT_MARK};

pub struct RapidCommitHandler;

impl Handler for RapidCommitHandler {
    fn name(&self) -> &str {
        "rapid-commit"
    }

    fn precedence(&self) -> u16 {
        // The mark must exist before pools and the response-type pass look
        30
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn pre(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.inner().msg_type == MessageType::Solicit && bundle.inner().has_rapid_commit() {
            bundle.mark(RAPID_COMMIT_MARK);
        }
        Ok(())
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.is_marked(RAPID_COMMIT_MARK) {
            bundle.response_mut().msg_type = MessageType::Reply;
            bundle.set_response_option(DhcpOption::RapidCommit);
        }
        Ok(())
    }
}

pub(crate) fn factory(_ctx: &FactoryContext) -> Result<Arc<dyn Handler>, Error> {
    Ok(Arc::new(RapidCommitHandler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::{bundle_from, solicit};
    use hexane_core::types::TransactionId;
    use hexane_wire::options::{self, IaNa};
    use hexane_wire::{ClientMessage, Duid, Message};

    #[test]
    fn test_rapid_commit_flips_response_type() {
        let handler = RapidCommitHandler;
        let message = Message::Client(
            ClientMessage::new(MessageType::Solicit, TransactionId([1, 2, 3])).with_options(vec![
                DhcpOption::ClientId(Duid::from_mac([0; 6])),
                DhcpOption::RapidCommit,
                DhcpOption::IaNa(IaNa {
                    iaid: 1,
                    t1: 0,
                    t2: 0,
                    options: vec![],
                }),
            ]),
        );
        let mut bundle = bundle_from(message);

        handler.pre(&mut bundle).unwrap();
        handler.handle(&mut bundle).unwrap();

        assert_eq!(bundle.response().msg_type, MessageType::Reply);
        assert!(bundle
            .find_response(options::OPTION_RAPID_COMMIT)
            .is_some());
    }

    #[test]
    fn test_solicit_without_rapid_commit_is_untouched() {
        let handler = RapidCommitHandler;
        let mut bundle = bundle_from(solicit([0; 6], 1));

        handler.pre(&mut bundle).unwrap();
        handler.handle(&mut bundle).unwrap();

        assert_eq!(bundle.response().msg_type, MessageType::Advertise);
        assert!(bundle.find_response(options::OPTION_RAPID_COMMIT).is_none());
    }
}
