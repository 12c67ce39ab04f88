//! Handler pipeline
//!
//! Built once from the configured filter/handler tree: the tree is
//! linearized depth-first into flat (filter chain, handler) pairs, the
//! mandatory finalization handlers are appended, and per-transaction
//! dispatch becomes a simple scan. Execution runs the three phases in
//! order, checks the deadline between phases, and catches handler errors
//! so a failing handler can never take a worker down.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use hexane_core::config::PipelineNode;
use hexane_core::error::Result;
use hexane_core::stats::ServerStats;
use hexane_core::types::DropReason;

use hexane_wire::Duid;

use crate::filter::{chain_matches, TransactionFilter};
use crate::handler::{Handler, Phase};
use crate::handlers::finalize::{
    DropAccountingHandler, EchoClientIdHandler, ResponseTypeHandler, StripUnsolicitedHandler,
    UnansweredIaHandler,
};
use crate::handlers::relay::RelayReplyHandler;
use crate::handlers::server_id::ServerIdHandler;
use crate::registry::{FactoryContext, FilterRegistry, HandlerRegistry, StoreCache};
use crate::transaction::{TransactionBundle, TransactionState};

/// One linearized (filter chain, handler) pair
struct PipelineEntry {
    chain: Vec<Arc<dyn TransactionFilter>>,
    handler: Arc<dyn Handler>,
    /// Depth-first configuration order; mandatory handlers sort last
    order: usize,
}

/// Wraps a handler whose precedence configuration overrides the default
struct ConfiguredPrecedence {
    inner: Arc<dyn Handler>,
    precedence: u16,
}

impl Handler for ConfiguredPrecedence {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn precedence(&self) -> u16 {
        self.precedence
    }

    fn run_on_drop(&self) -> bool {
        self.inner.run_on_drop()
    }

    fn idempotent(&self) -> bool {
        self.inner.idempotent()
    }

    fn pre(&self, bundle: &mut TransactionBundle) -> std::result::Result<(), hexane_core::error::HandlerError> {
        self.inner.pre(bundle)
    }

    fn handle(&self, bundle: &mut TransactionBundle) -> std::result::Result<(), hexane_core::error::HandlerError> {
        self.inner.handle(bundle)
    }

    fn post(&self, bundle: &mut TransactionBundle) -> std::result::Result<(), hexane_core::error::HandlerError> {
        self.inner.post(bundle)
    }
}

/// An immutable, shareable pipeline
pub struct Pipeline {
    entries: Vec<PipelineEntry>,
    stats: Arc<ServerStats>,
}

impl Pipeline {
    /// Build a pipeline from the configured tree.
    ///
    /// Unknown handler or filter names and malformed parameters are
    /// configuration errors; nothing is partially built.
    pub fn build(
        nodes: &[PipelineNode],
        handlers: &HandlerRegistry,
        filters: &FilterRegistry,
        stores: &StoreCache,
        server_duid: Duid,
        stats: Arc<ServerStats>,
    ) -> Result<Pipeline> {
        let mut entries = Vec::new();
        let mut chain: Vec<Arc<dyn TransactionFilter>> = Vec::new();
        Self::walk(nodes, handlers, filters, stores, &mut chain, &mut entries)?;

        // Mandatory finalization, always after the configured handlers
        let mandatory: Vec<Arc<dyn Handler>> = vec![
            Arc::new(ServerIdHandler::new(server_duid)),
            Arc::new(EchoClientIdHandler),
            Arc::new(ResponseTypeHandler),
            Arc::new(UnansweredIaHandler),
            Arc::new(StripUnsolicitedHandler),
            Arc::new(RelayReplyHandler),
            Arc::new(DropAccountingHandler::new(stats.clone())),
        ];
        let base = entries.len();
        for (offset, handler) in mandatory.into_iter().enumerate() {
            entries.push(PipelineEntry {
                chain: Vec::new(),
                handler,
                order: base + offset,
            });
        }

        debug!(handlers = entries.len(), "Pipeline built");
        Ok(Pipeline { entries, stats })
    }

    fn walk(
        nodes: &[PipelineNode],
        handlers: &HandlerRegistry,
        filters: &FilterRegistry,
        stores: &StoreCache,
        chain: &mut Vec<Arc<dyn TransactionFilter>>,
        entries: &mut Vec<PipelineEntry>,
    ) -> Result<()> {
        for node in nodes {
            match node {
                PipelineNode::Handler(section) => {
                    let ctx = FactoryContext {
                        name: &section.handler,
                        params: &section.params,
                        precedence: section.precedence,
                        stores,
                    };
                    let mut handler = handlers.build(&ctx)?;
                    if let Some(precedence) = section.precedence {
                        handler = Arc::new(ConfiguredPrecedence {
                            inner: handler,
                            precedence,
                        });
                    }
                    entries.push(PipelineEntry {
                        chain: chain.clone(),
                        handler,
                        order: entries.len(),
                    });
                }
                PipelineNode::Filter(section) => {
                    let filter = filters.build(&section.filter, &section.value)?;
                    chain.push(filter);
                    let result =
                        Self::walk(&section.children, handlers, filters, stores, chain, entries);
                    chain.pop();
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Number of linearized entries, mandatory handlers included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the pipeline over one transaction.
    ///
    /// Phases run in order; the deadline is checked between phases; a
    /// drop short-circuits everything except run-on-drop post handlers.
    pub fn execute(&self, bundle: &mut TransactionBundle) {
        // Filter selection is one scan over the linearized entries
        let mut selected: Vec<(&Arc<dyn Handler>, usize)> = self
            .entries
            .iter()
            .filter(|entry| chain_matches(&entry.chain, bundle))
            .map(|entry| (&entry.handler, entry.order))
            .collect();
        selected.sort_by_key(|(handler, order)| (handler.precedence(), *order));

        self.run_phase(Phase::Pre, &selected, bundle);
        bundle.advance(TransactionState::Classified);
        self.check_deadline(bundle);

        self.run_phase(Phase::Handle, &selected, bundle);
        bundle.advance(TransactionState::Answered);
        self.check_deadline(bundle);

        self.run_phase(Phase::Post, &selected, bundle);
        bundle.advance(TransactionState::Finalized);
    }

    fn check_deadline(&self, bundle: &mut TransactionBundle) {
        if !bundle.is_dropped() && bundle.deadline_exceeded() {
            warn!(id = %bundle.id, "Transaction deadline exceeded between phases");
            bundle.drop_with(DropReason::Timeout);
        }
    }

    fn run_phase(
        &self,
        phase: Phase,
        selected: &[(&Arc<dyn Handler>, usize)],
        bundle: &mut TransactionBundle,
    ) {
        for (handler, _) in selected {
            if bundle.is_dropped() && !(phase == Phase::Post && handler.run_on_drop()) {
                // Drops short-circuit the phase; run-on-drop posts still run
                if phase == Phase::Post {
                    continue;
                }
                break;
            }

            let result = match phase {
                Phase::Pre => handler.pre(bundle),
                Phase::Handle => handler.handle(bundle),
                Phase::Post => handler.post(bundle),
            };

            if let Err(err) = result {
                error!(
                    id = %bundle.id,
                    handler = handler.name(),
                    phase = ?phase,
                    error = %err,
                    "Handler failed; dropping transaction"
                );
                self.stats.record_handler_error();
                bundle.drop_with(DropReason::HandlerError);
            }
        }
    }
}

/// Swappable pointer to the active pipeline.
///
/// Reload builds a complete new pipeline, then swaps this one pointer;
/// in-flight transactions keep the Arc they already cloned.
pub struct PipelineHandle {
    active: RwLock<Arc<Pipeline>>,
}

impl PipelineHandle {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            active: RwLock::new(pipeline),
        }
    }

    /// The pipeline to use for a new transaction
    pub fn load(&self) -> Arc<Pipeline> {
        self.active.read().clone()
    }

    /// Atomically replace the active pipeline
    pub fn swap(&self, pipeline: Arc<Pipeline>) {
        *self.active.write() = pipeline;
    }
}
