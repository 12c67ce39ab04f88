//! Option registry
//!
//! A process-wide mapping from option code to codec entry. Extensions
//! register at startup; the registry is frozen before the listeners start
//! and duplicate registration is a fatal configuration error. Each entry
//! declares multiplicity, the containers the option may appear in, and
//! whether the option is gated on the client's option-request option.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;

use hexane_core::error::{CodecError, Error, Result};

use crate::options::{self, DhcpOption};
use crate::MAX_NESTING_DEPTH;

/// Kinds of containers an option may appear in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// A client/server message body
    Message,
    /// A relay-forward or relay-reply body
    Relay,
    IaNa,
    IaTa,
    IaPd,
    IaAddress,
    IaPrefix,
    /// Leasequery client-data option
    ClientData,
    /// Leasequery query option
    LqQuery,
    /// Any softwire (MAP) container
    S46,
}

/// Decoder for one option code; receives the option value only
pub type OptionDecoder = fn(&[u8], &mut DecodeCtx) -> std::result::Result<DhcpOption, CodecError>;

/// Registry entry for one option code
#[derive(Clone, Copy)]
pub struct OptionEntry {
    pub code: u16,
    pub name: &'static str,
    pub decoder: OptionDecoder,
    /// May the option appear at most once per container?
    pub singleton: bool,
    /// Containers the option belongs in
    pub containers: &'static [ContainerKind],
    /// Stripped from responses unless requested via ORO or forced
    pub oro_gated: bool,
    /// Decoder failures fail the message instead of demoting to opaque
    pub structural: bool,
}

impl std::fmt::Debug for OptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionEntry")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("singleton", &self.singleton)
            .field("oro_gated", &self.oro_gated)
            .finish()
    }
}

/// State threaded through one decode run
pub struct DecodeCtx<'a> {
    registry: &'a OptionRegistry,
    depth: usize,
    partial: bool,
}

impl<'a> DecodeCtx<'a> {
    pub fn new(registry: &'a OptionRegistry) -> Self {
        Self {
            registry,
            depth: 0,
            partial: false,
        }
    }

    pub fn registry(&self) -> &'a OptionRegistry {
        self.registry
    }

    /// Did any option get demoted to opaque during this run?
    pub fn partial(&self) -> bool {
        self.partial
    }

    pub(crate) fn mark_partial(&mut self) {
        self.partial = true;
    }

    pub(crate) fn descend(&mut self) -> std::result::Result<(), CodecError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::RecursionLimit);
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth -= 1;
    }
}

/// Process-wide option registry
pub struct OptionRegistry {
    entries: RwLock<HashMap<u16, OptionEntry>>,
    frozen: AtomicBool,
}

impl OptionRegistry {
    /// An empty registry; only useful in tests
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// A registry carrying every option this crate implements
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for entry in default_entries() {
            // Defaults carry no duplicates; a panic here would be a bug in
            // this table, caught by the registry tests.
            let _ = registry.register(entry);
        }
        registry
    }

    /// Register one option codec.
    ///
    /// Fails on duplicate codes and after the registry was frozen.
    pub fn register(&self, entry: OptionEntry) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::config(format!(
                "cannot register option {} ({}): registry is frozen",
                entry.code, entry.name
            )));
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&entry.code) {
            return Err(Error::config(format!(
                "duplicate registration for option {}: '{}' is already registered as '{}'",
                entry.code, entry.name, existing.name
            )));
        }
        entries.insert(entry.code, entry);
        Ok(())
    }

    /// Freeze the registry; later registrations fail
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Look up the entry for an option code
    pub fn get(&self, code: u16) -> Option<OptionEntry> {
        self.entries.read().get(&code).copied()
    }

    /// Is the code registered as a singleton?
    pub fn is_singleton(&self, code: u16) -> bool {
        self.get(code).map(|entry| entry.singleton).unwrap_or(false)
    }

    /// Is the code stripped from responses unless requested?
    pub fn is_oro_gated(&self, code: u16) -> bool {
        self.get(code).map(|entry| entry.oro_gated).unwrap_or(false)
    }

    /// Number of registered codes
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// The shared process-wide registry.
    ///
    /// Initialized with every built-in option on first use; extensions add
    /// their entries before the server freezes it.
    pub fn global() -> &'static OptionRegistry {
        static INSTANCE: OnceLock<OptionRegistry> = OnceLock::new();
        INSTANCE.get_or_init(OptionRegistry::with_defaults)
    }
}

impl Default for OptionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// Container shorthands for the default table
const MSG: &[ContainerKind] = &[ContainerKind::Message];
const MSG_RELAY: &[ContainerKind] = &[ContainerKind::Message, ContainerKind::Relay];
const RELAY: &[ContainerKind] = &[ContainerKind::Relay];
const ANY_STATUS: &[ContainerKind] = &[
    ContainerKind::Message,
    ContainerKind::IaNa,
    ContainerKind::IaTa,
    ContainerKind::IaPd,
    ContainerKind::IaAddress,
    ContainerKind::IaPrefix,
    ContainerKind::ClientData,
];
const MSG_CLIENT_DATA: &[ContainerKind] = &[ContainerKind::Message, ContainerKind::ClientData];
const S46_ONLY: &[ContainerKind] = &[ContainerKind::S46];

fn default_entries() -> Vec<OptionEntry> {
    macro_rules! entry {
        ($code:expr, $name:expr, $decoder:path, $singleton:expr, $containers:expr, $gated:expr) => {
            OptionEntry {
                code: $code,
                name: $name,
                decoder: $decoder,
                singleton: $singleton,
                containers: $containers,
                oro_gated: $gated,
                structural: false,
            }
        };
    }

    vec![
        entry!(options::OPTION_CLIENTID, "client-id", options::decode_client_id, true, {
            const C: &[ContainerKind] = &[
                ContainerKind::Message,
                ContainerKind::ClientData,
                ContainerKind::LqQuery,
            ];
            C
        }, false),
        entry!(options::OPTION_SERVERID, "server-id", options::decode_server_id, true, MSG, false),
        entry!(options::OPTION_IA_NA, "ia-na", options::decode_ia_na, false, MSG_CLIENT_DATA, false),
        entry!(options::OPTION_IA_TA, "ia-ta", options::decode_ia_ta, false, MSG_CLIENT_DATA, false),
        entry!(options::OPTION_IAADDR, "ia-address", options::decode_ia_addr, false, {
            const C: &[ContainerKind] = &[
                ContainerKind::IaNa,
                ContainerKind::IaTa,
                ContainerKind::ClientData,
                ContainerKind::LqQuery,
            ];
            C
        }, false),
        entry!(options::OPTION_ORO, "option-request", options::decode_oro, true, MSG, false),
        entry!(options::OPTION_PREFERENCE, "preference", options::decode_preference, true, MSG, false),
        entry!(options::OPTION_ELAPSED_TIME, "elapsed-time", options::decode_elapsed_time, true, MSG, false),
        OptionEntry {
            code: options::OPTION_RELAY_MSG,
            name: "relay-message",
            decoder: options::decode_relay_msg,
            singleton: true,
            containers: RELAY,
            oro_gated: false,
            structural: true,
        },
        entry!(options::OPTION_AUTH, "authentication", options::decode_auth, true, MSG, false),
        entry!(options::OPTION_UNICAST, "server-unicast", options::decode_unicast, true, MSG, false),
        entry!(options::OPTION_STATUS_CODE, "status-code", options::decode_status_code, true, ANY_STATUS, false),
        entry!(options::OPTION_RAPID_COMMIT, "rapid-commit", options::decode_rapid_commit, true, MSG, false),
        entry!(options::OPTION_USER_CLASS, "user-class", options::decode_user_class, true, MSG, false),
        entry!(options::OPTION_VENDOR_CLASS, "vendor-class", options::decode_vendor_class, false, MSG, false),
        entry!(options::OPTION_VENDOR_OPTS, "vendor-specific", options::decode_vendor_opts, false, MSG_RELAY, true),
        entry!(options::OPTION_INTERFACE_ID, "interface-id", options::decode_interface_id, true, RELAY, false),
        entry!(options::OPTION_RECONF_MSG, "reconfigure-message", options::decode_reconf_msg, true, MSG, false),
        entry!(options::OPTION_RECONF_ACCEPT, "reconfigure-accept", options::decode_reconf_accept, true, MSG, false),
        // SIP (RFC 3319)
        entry!(options::sip::OPTION_SIP_SERVER_D, "sip-server-domains", options::sip::decode_sip_domains, true, MSG, true),
        entry!(options::sip::OPTION_SIP_SERVER_A, "sip-server-addresses", options::sip::decode_sip_addresses, true, MSG, true),
        // DNS (RFC 3646)
        entry!(options::dns::OPTION_DNS_SERVERS, "dns-servers", options::dns::decode_dns_servers, true, MSG, true),
        entry!(options::dns::OPTION_DOMAIN_LIST, "domain-search-list", options::dns::decode_domain_list, true, MSG, true),
        // Prefix delegation (RFC 3633)
        entry!(options::prefix_delegation::OPTION_IA_PD, "ia-pd", options::prefix_delegation::decode_ia_pd, false, MSG_CLIENT_DATA, false),
        entry!(options::prefix_delegation::OPTION_IAPREFIX, "ia-prefix", options::prefix_delegation::decode_ia_prefix, false, {
            const C: &[ContainerKind] = &[ContainerKind::IaPd, ContainerKind::ClientData];
            C
        }, false),
        // SNTP (RFC 4075)
        entry!(options::sntp::OPTION_SNTP_SERVERS, "sntp-servers", options::sntp::decode_sntp_servers, true, MSG, true),
        // Relay agent information
        entry!(options::relay_agent::OPTION_REMOTE_ID, "remote-id", options::relay_agent::decode_remote_id, true, RELAY, false),
        entry!(options::relay_agent::OPTION_SUBSCRIBER_ID, "subscriber-id", options::relay_agent::decode_subscriber_id, true, RELAY, false),
        entry!(options::relay_agent::OPTION_CLIENT_LINKLAYER_ADDR, "client-linklayer-address", options::relay_agent::decode_client_linklayer, true, RELAY, false),
        // Leasequery (RFC 5007 / RFC 5460)
        entry!(options::leasequery::OPTION_LQ_QUERY, "lq-query", options::leasequery::decode_lq_query, true, MSG, false),
        entry!(options::leasequery::OPTION_CLIENT_DATA, "client-data", options::leasequery::decode_client_data, false, MSG, false),
        entry!(options::leasequery::OPTION_CLT_TIME, "clt-time", options::leasequery::decode_clt_time, true, {
            const C: &[ContainerKind] = &[ContainerKind::ClientData];
            C
        }, false),
        entry!(options::leasequery::OPTION_LQ_RELAY_DATA, "lq-relay-data", options::leasequery::decode_lq_relay_data, true, MSG, false),
        entry!(options::leasequery::OPTION_LQ_CLIENT_LINK, "lq-client-link", options::leasequery::decode_lq_client_link, true, MSG, false),
        entry!(options::leasequery::OPTION_RELAY_ID, "relay-id", options::leasequery::decode_relay_id, true, MSG_RELAY, false),
        // NTP (RFC 5908)
        entry!(options::ntp::OPTION_NTP_SERVER, "ntp-servers", options::ntp::decode_ntp_servers, true, MSG, true),
        // DS-Lite (RFC 6334)
        entry!(options::dslite::OPTION_AFTR_NAME, "aftr-name", options::dslite::decode_aftr_name, true, MSG, true),
        // RFC 7083
        entry!(options::sol_max_rt::OPTION_SOL_MAX_RT, "sol-max-rt", options::sol_max_rt::decode_sol_max_rt, true, MSG, true),
        entry!(options::sol_max_rt::OPTION_INF_MAX_RT, "inf-max-rt", options::sol_max_rt::decode_inf_max_rt, true, MSG, true),
        // Softwire / MAP (RFC 7598)
        entry!(options::map::OPTION_S46_RULE, "s46-rule", options::map::decode_s46_rule, false, S46_ONLY, false),
        entry!(options::map::OPTION_S46_BR, "s46-br", options::map::decode_s46_br, false, S46_ONLY, false),
        entry!(options::map::OPTION_S46_DMR, "s46-dmr", options::map::decode_s46_dmr, true, S46_ONLY, false),
        entry!(options::map::OPTION_S46_V4V6BIND, "s46-v4v6-binding", options::map::decode_s46_v4v6_binding, true, S46_ONLY, false),
        entry!(options::map::OPTION_S46_PORTPARAMS, "s46-port-params", options::map::decode_s46_portparams, true, S46_ONLY, false),
        entry!(options::map::OPTION_S46_CONT_MAPE, "s46-mape", options::map::decode_s46_mape, true, MSG, true),
        entry!(options::map::OPTION_S46_CONT_MAPT, "s46-mapt", options::map::decode_s46_mapt, true, MSG, true),
        entry!(options::map::OPTION_S46_CONT_LW, "s46-lw", options::map::decode_s46_lw, true, MSG, true),
    ]
}
