//! Transaction filters
//!
//! Filters are predicates over a transaction. In configuration they nest
//! as a tree: a child is evaluated only when its parent matched, and the
//! handlers attached to matched nodes accumulate in depth-first order.
//! The tree is linearized at build time into flat (filter chain, handler)
//! pairs so per-transaction dispatch is a simple scan.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Arc;

use crate::transaction::TransactionBundle;

/// A predicate restricting which transactions a handler sees
pub trait TransactionFilter: Send + Sync {
    /// Filter kind name, used in logs and configuration errors
    fn name(&self) -> &str;

    fn matches(&self, bundle: &TransactionBundle) -> bool;
}

/// Matches every transaction
pub struct AlwaysMatch;

impl TransactionFilter for AlwaysMatch {
    fn name(&self) -> &str {
        "always"
    }

    fn matches(&self, _bundle: &TransactionBundle) -> bool {
        true
    }
}

/// Inverts a child filter
pub struct NotFilter {
    pub child: Arc<dyn TransactionFilter>,
}

impl TransactionFilter for NotFilter {
    fn name(&self) -> &str {
        "not"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        !self.child.matches(bundle)
    }
}

/// Matches transactions a pre-handler tagged with the configured mark
pub struct MarkedWithFilter {
    pub mark: String,
}

impl TransactionFilter for MarkedWithFilter {
    fn name(&self) -> &str {
        "marked-with"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        bundle.is_marked(&self.mark)
    }
}

/// Matches on the link the request came in over: the outermost relay's
/// link-address, or the source address for unrelayed requests
pub struct SubnetFilter {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
}

impl SubnetFilter {
    pub fn contains(&self, address: &Ipv6Addr) -> bool {
        if self.prefix_len == 0 {
            return true;
        }
        let bits = u128::from_be_bytes(address.octets());
        let prefix_bits = u128::from_be_bytes(self.prefix.octets());
        let mask = u128::MAX << (128 - self.prefix_len as u32);
        bits & mask == prefix_bits & mask
    }
}

impl TransactionFilter for SubnetFilter {
    fn name(&self) -> &str {
        "subnet"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        let address = bundle.facts.link_address.unwrap_or_else(|| {
            match bundle.recv.source {
                std::net::SocketAddr::V6(addr) => *addr.ip(),
                std::net::SocketAddr::V4(_) => Ipv6Addr::UNSPECIFIED,
            }
        });
        self.contains(&address)
    }
}

/// Matches the receiving interface by name
pub struct InterfaceFilter {
    pub interfaces: HashSet<String>,
}

impl TransactionFilter for InterfaceFilter {
    fn name(&self) -> &str {
        "interface"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        self.interfaces.contains(&bundle.recv.interface)
    }
}

/// Matches the client DUID against a byte-prefix pattern
pub struct DuidFilter {
    pub pattern: Vec<u8>,
}

impl TransactionFilter for DuidFilter {
    fn name(&self) -> &str {
        "duid"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        match &bundle.facts.client_duid {
            Some(duid) => duid.encode().starts_with(&self.pattern),
            None => false,
        }
    }
}

/// Matches a remote-id option seen anywhere along the relay chain
pub struct RemoteIdFilter {
    pub enterprise: u32,
    pub id: Vec<u8>,
}

impl TransactionFilter for RemoteIdFilter {
    fn name(&self) -> &str {
        "remote-id"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        bundle
            .facts
            .remote_ids
            .iter()
            .any(|(enterprise, id)| *enterprise == self.enterprise && id == &self.id)
    }
}

/// Matches a subscriber-id option seen anywhere along the relay chain
pub struct SubscriberIdFilter {
    pub id: Vec<u8>,
}

impl TransactionFilter for SubscriberIdFilter {
    fn name(&self) -> &str {
        "subscriber-id"
    }

    fn matches(&self, bundle: &TransactionBundle) -> bool {
        bundle.facts.subscriber_ids.iter().any(|id| id == &self.id)
    }
}

/// Evaluate a linearized filter chain; short-circuits on the first miss
pub fn chain_matches(chain: &[Arc<dyn TransactionFilter>], bundle: &TransactionBundle) -> bool {
    chain.iter().all(|filter| filter.matches(bundle))
}
