//! Store contracts
//!
//! The core persists nothing itself. Lease backends implement [`LeaseStore`];
//! every operation is synchronous, thread-safe and honors the pass-through
//! deadline of the transaction that triggered it.

use std::net::Ipv6Addr;
use std::time::{Instant, SystemTime};

use crate::error::StoreError;

/// What a lease binds: one address or one delegated prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
    Address(Ipv6Addr),
    Prefix(Ipv6Addr, u8),
}

impl LeaseKind {
    /// True for delegated-prefix leases
    pub fn is_prefix(&self) -> bool {
        matches!(self, LeaseKind::Prefix(..))
    }
}

/// A committed or offered binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Raw client DUID bytes
    pub client_id: Vec<u8>,
    /// IA identifier the binding belongs to
    pub iaid: u32,
    /// The bound address or prefix
    pub kind: LeaseKind,
    /// Preferred lifetime in seconds
    pub preferred: u32,
    /// Valid lifetime in seconds
    pub valid: u32,
    /// When the binding was (last) written
    pub updated_at: SystemTime,
}

/// Hints a client supplied with its request
#[derive(Debug, Clone, Default)]
pub struct AllocationHints {
    /// Address or prefix the client asked for
    pub requested: Option<LeaseKind>,
    /// Link address the request came in over (outermost relay, or unspecified)
    pub link_address: Option<Ipv6Addr>,
}

/// Why an allocation or renewal was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Pool has no free addresses
    NoAddrsAvail,
    /// Pool has no free prefixes
    NoPrefixAvail,
    /// The server has no binding for this client/IA
    NoBinding,
    /// The requested address is not on-link
    NotOnLink,
}

/// Outcome of an allocation-shaped store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    Granted(Lease),
    Denied(Denial),
}

/// Contract every lease backend implements.
///
/// Implementations must be safe to call from multiple workers at once and
/// must return (or fail with [`StoreError::Timeout`]) before `deadline`.
pub trait LeaseStore: Send + Sync {
    /// Allocate a binding for (client, iaid), honoring hints where possible.
    /// Allocation is idempotent: asking again for the same (client, iaid)
    /// returns the existing binding.
    fn allocate(
        &self,
        client_id: &[u8],
        iaid: u32,
        hints: &AllocationHints,
        deadline: Instant,
    ) -> Result<Allocation, StoreError>;

    /// Extend an existing binding
    fn renew(
        &self,
        client_id: &[u8],
        iaid: u32,
        deadline: Instant,
    ) -> Result<Allocation, StoreError>;

    /// Release a binding; unknown bindings release successfully
    fn release(&self, client_id: &[u8], iaid: u32, deadline: Instant) -> Result<(), StoreError>;

    /// Quarantine a binding the client declined
    fn decline(&self, client_id: &[u8], iaid: u32, deadline: Instant) -> Result<(), StoreError>;

    /// Answer a Confirm: is the given kind on-link for this pool?
    fn confirm(&self, kind: &LeaseKind, deadline: Instant) -> Result<bool, StoreError>;

    /// Leasequery: look up the binding covering an address
    fn query_by_address(
        &self,
        address: Ipv6Addr,
        deadline: Instant,
    ) -> Result<Option<Lease>, StoreError>;

    /// Leasequery: all bindings held by a client
    fn query_by_client(
        &self,
        client_id: &[u8],
        deadline: Instant,
    ) -> Result<Vec<Lease>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_kind() {
        let addr = LeaseKind::Address("2001:db8::1".parse().unwrap());
        let prefix = LeaseKind::Prefix("2001:db8:100::".parse().unwrap(), 56);
        assert!(!addr.is_prefix());
        assert!(prefix.is_prefix());
    }
}
