//! In-memory lease store
//!
//! The default backend for the pool handlers: a dashmap-backed store
//! allocating addresses (or delegated prefixes) sequentially from one
//! configured pool. Bindings live for the process lifetime; declined
//! values are quarantined until released by an operator restart.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use dashmap::{DashMap, DashSet};

use hexane_core::error::StoreError;
use hexane_core::store::{Allocation, AllocationHints, Denial, Lease, LeaseKind, LeaseStore};

/// One pool of addresses or delegated prefixes
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool prefix, e.g. 2001:db8::/64
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    /// When set, the pool delegates prefixes of this length instead of
    /// single addresses
    pub delegation_len: Option<u8>,
    /// Preferred lifetime handed out with each binding
    pub preferred: u32,
    /// Valid lifetime handed out with each binding
    pub valid: u32,
}

impl PoolConfig {
    /// Cache key identifying this pool across pipeline rebuilds
    pub fn cache_key(&self) -> String {
        match self.delegation_len {
            Some(len) => format!("pd:{}/{}^{}", self.prefix, self.prefix_len, len),
            None => format!("na:{}/{}", self.prefix, self.prefix_len),
        }
    }

    fn base_bits(&self) -> u128 {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - self.prefix_len as u32)
        };
        u128::from_be_bytes(self.prefix.octets()) & mask
    }

    /// Number of allocatable units, capped to keep scans bounded
    fn capacity(&self) -> u64 {
        let unit_bits = match self.delegation_len {
            Some(len) => len.saturating_sub(self.prefix_len) as u32,
            None => 128 - self.prefix_len as u32,
        };
        if unit_bits >= 16 {
            1 << 16
        } else if self.delegation_len.is_some() {
            1u64 << unit_bits
        } else {
            // Address pools skip offset zero
            (1u64 << unit_bits) - 1
        }
    }

    /// The pool member at `offset`
    fn kind_at(&self, offset: u64) -> LeaseKind {
        match self.delegation_len {
            Some(len) => {
                let shift = 128 - len as u32;
                let bits = self.base_bits() | ((offset as u128) << shift);
                LeaseKind::Prefix(Ipv6Addr::from(bits.to_be_bytes()), len)
            }
            None => {
                // Skip offset zero, the subnet-router anycast address
                let bits = self.base_bits() | (offset as u128 + 1);
                LeaseKind::Address(Ipv6Addr::from(bits.to_be_bytes()))
            }
        }
    }

    /// Is this address or prefix inside the pool?
    fn contains(&self, kind: &LeaseKind) -> bool {
        let (addr, expected_prefix) = match kind {
            LeaseKind::Address(addr) => (addr, None),
            LeaseKind::Prefix(addr, len) => (addr, Some(*len)),
        };
        if expected_prefix != self.delegation_len && expected_prefix.is_some() {
            return false;
        }
        if self.delegation_len.is_some() && expected_prefix.is_none() {
            return false;
        }
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u128::MAX << (128 - self.prefix_len as u32)
        };
        u128::from_be_bytes(addr.octets()) & mask == self.base_bits()
    }

    fn value_bits(kind: &LeaseKind) -> u128 {
        match kind {
            LeaseKind::Address(addr) | LeaseKind::Prefix(addr, _) => {
                u128::from_be_bytes(addr.octets())
            }
        }
    }
}

type BindingKey = (Vec<u8>, u32);

/// Thread-safe in-memory lease store over one pool
pub struct MemoryLeaseStore {
    config: PoolConfig,
    bindings: DashMap<BindingKey, Lease>,
    in_use: DashMap<u128, BindingKey>,
    declined: DashSet<u128>,
    next: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            bindings: DashMap::new(),
            in_use: DashMap::new(),
            declined: DashSet::new(),
            next: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn denial(&self) -> Denial {
        if self.config.delegation_len.is_some() {
            Denial::NoPrefixAvail
        } else {
            Denial::NoAddrsAvail
        }
    }

    fn lease_for(&self, key: &BindingKey, kind: LeaseKind) -> Lease {
        Lease {
            client_id: key.0.clone(),
            iaid: key.1,
            kind,
            preferred: self.config.preferred,
            valid: self.config.valid,
            updated_at: SystemTime::now(),
        }
    }

    fn try_claim(&self, key: &BindingKey, kind: LeaseKind) -> Option<Lease> {
        let bits = PoolConfig::value_bits(&kind);
        if self.declined.contains(&bits) {
            return None;
        }
        match self.in_use.entry(bits) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(key.clone());
                let lease = self.lease_for(key, kind);
                self.bindings.insert(key.clone(), lease.clone());
                Some(lease)
            }
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn allocate(
        &self,
        client_id: &[u8],
        iaid: u32,
        hints: &AllocationHints,
        _deadline: Instant,
    ) -> Result<Allocation, StoreError> {
        let key = (client_id.to_vec(), iaid);

        // Idempotent: an existing binding is simply returned
        if let Some(existing) = self.bindings.get(&key) {
            return Ok(Allocation::Granted(existing.clone()));
        }

        // Honor the client's hint when it falls inside the pool and is free
        if let Some(requested) = &hints.requested {
            if self.config.contains(requested) {
                if let Some(lease) = self.try_claim(&key, *requested) {
                    return Ok(Allocation::Granted(lease));
                }
            }
        }

        // Sequential scan from the allocation cursor
        let capacity = self.config.capacity();
        for _ in 0..capacity {
            let offset = self.next.fetch_add(1, Ordering::Relaxed) % capacity;
            let candidate = self.config.kind_at(offset);
            if let Some(lease) = self.try_claim(&key, candidate) {
                return Ok(Allocation::Granted(lease));
            }
        }

        Ok(Allocation::Denied(self.denial()))
    }

    fn renew(
        &self,
        client_id: &[u8],
        iaid: u32,
        _deadline: Instant,
    ) -> Result<Allocation, StoreError> {
        let key = (client_id.to_vec(), iaid);
        match self.bindings.get_mut(&key) {
            Some(mut binding) => {
                binding.updated_at = SystemTime::now();
                Ok(Allocation::Granted(binding.clone()))
            }
            None => Ok(Allocation::Denied(Denial::NoBinding)),
        }
    }

    fn release(&self, client_id: &[u8], iaid: u32, _deadline: Instant) -> Result<(), StoreError> {
        let key = (client_id.to_vec(), iaid);
        if let Some((_, lease)) = self.bindings.remove(&key) {
            self.in_use.remove(&PoolConfig::value_bits(&lease.kind));
        }
        Ok(())
    }

    fn decline(&self, client_id: &[u8], iaid: u32, _deadline: Instant) -> Result<(), StoreError> {
        let key = (client_id.to_vec(), iaid);
        if let Some((_, lease)) = self.bindings.remove(&key) {
            let bits = PoolConfig::value_bits(&lease.kind);
            self.in_use.remove(&bits);
            self.declined.insert(bits);
        }
        Ok(())
    }

    fn confirm(&self, kind: &LeaseKind, _deadline: Instant) -> Result<bool, StoreError> {
        Ok(self.config.contains(kind))
    }

    fn query_by_address(
        &self,
        address: Ipv6Addr,
        _deadline: Instant,
    ) -> Result<Option<Lease>, StoreError> {
        let bits = u128::from_be_bytes(address.octets());
        match self.in_use.get(&bits) {
            Some(key) => Ok(self.bindings.get(key.value()).map(|lease| lease.clone())),
            None => Ok(None),
        }
    }

    fn query_by_client(
        &self,
        client_id: &[u8],
        _deadline: Instant,
    ) -> Result<Vec<Lease>, StoreError> {
        let mut leases: Vec<Lease> = self
            .bindings
            .iter()
            .filter(|entry| entry.key().0 == client_id)
            .map(|entry| entry.value().clone())
            .collect();
        leases.sort_by_key(|lease| lease.iaid);
        Ok(leases)
    }
}
