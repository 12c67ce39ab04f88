//! Server identity handler
//!
//! Validates the server-id rules of RFC 3315 section 15 on the way in and
//! guarantees the response carries our DUID exactly once on the way out.
//! Always part of the pipeline.

use hexane_core::error::HandlerError;
use hexane_core::types::DropReason;

use hexane_wire::options::{self, DhcpOption};
use hexane_wire::{Duid, MessageType};

use crate::handler::Handler;
use crate::transaction::TransactionBundle;

pub struct ServerIdHandler {
    duid: Duid,
}

impl ServerIdHandler {
    pub fn new(duid: Duid) -> Self {
        Self { duid }
    }
}

impl Handler for ServerIdHandler {
    fn name(&self) -> &str {
        "server-id"
    }

    fn precedence(&self) -> u16 {
        10
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn pre(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        let msg_type = bundle.inner().msg_type;
        let supplied = bundle.facts.server_duid.clone();

        match msg_type {
            // These must not name a server
            MessageType::Solicit | MessageType::Confirm | MessageType::Rebind => {
                if supplied.is_some() {
                    tracing::debug!(
                        id = %bundle.id,
                        msg_type = %msg_type,
                        "Dropping: message kind must not carry a server-id"
                    );
                    bundle.drop_with(DropReason::Policy);
                }
            }
            // These must name us specifically
            MessageType::Request
            | MessageType::Renew
            | MessageType::Release
            | MessageType::Decline => match supplied {
                Some(duid) if duid == self.duid => {}
                _ => {
                    tracing::debug!(
                        id = %bundle.id,
                        msg_type = %msg_type,
                        "Dropping: message is not addressed to this server"
                    );
                    bundle.drop_with(DropReason::Policy);
                }
            },
            // May name a server; if so it must be us
            _ => {
                if let Some(duid) = supplied {
                    if duid != self.duid {
                        tracing::debug!(
                            id = %bundle.id,
                            msg_type = %msg_type,
                            "Dropping: message names another server"
                        );
                        bundle.drop_with(DropReason::Policy);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        bundle.set_response_option(DhcpOption::ServerId(self.duid.clone()));
        Ok(())
    }

    fn post(&self, bundle: &mut TransactionBundle) -> Result<(), HandlerError> {
        if bundle.find_response(options::OPTION_SERVERID).is_none() {
            bundle.set_response_option(DhcpOption::ServerId(self.duid.clone()));
        }
        Ok(())
    }
}
