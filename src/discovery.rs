//! Discovery - locate the nearest matching provider from a starting node.
//!
//! A discovery query is an ephemeral, single-use message: it carries an
//! identifier and a result slot, travels outward from the context node
//! through ancestors and across encapsulation boundaries, and is consumed
//! before [`get_provider`] returns. The first mounted provider whose
//! identifier matches halts the walk and lands in the slot; an unmatched
//! query falls off the root unconsumed and the slot stays empty.
//!
//! Absence is the normal "not found" outcome, never an error.

use std::rc::Rc;

use log::debug;

use crate::provider::{self, AnyProvider, ProviderHandle};
use crate::tree::{self, TraversalOptions};

/// Namespaced protocol name for discovery queries. Used as the log target
/// so discovery traffic can be filtered apart from unrelated signals.
pub const DISCOVERY_QUERY_TYPE: &str = "tree-context/get-provider";

/// An in-flight discovery query: the identifier being searched for plus a
/// mutable result slot. Created per [`get_provider`] call, never reused.
pub struct DiscoveryQuery {
    identifier: String,
    result: Option<(usize, Rc<dyn AnyProvider>)>,
}

impl DiscoveryQuery {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            result: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether a provider has intercepted this query.
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Node index of the intercepting provider, if any.
    pub fn resolved_node(&self) -> Option<usize> {
        self.result.as_ref().map(|(index, _)| *index)
    }

    /// Offer the node at `index` to this query. A mounted provider with a
    /// matching identifier intercepts the query and halts the walk
    /// (returns true); anything else lets it continue (returns false).
    fn offer(&mut self, index: usize) -> bool {
        match provider::mounted_at(index) {
            Some(candidate) if candidate.identifier() == self.identifier => {
                self.result = Some((index, candidate));
                true
            }
            _ => false,
        }
    }
}

/// Find the nearest mounted provider for `identifier`, searching upward
/// from `context_node` (inclusive) across encapsulation boundaries.
///
/// Synchronous single round-trip: the walk completes before this returns.
/// Returns None when no provider on the path matches, or when the
/// matching provider stores a value type other than `T`.
pub fn get_provider<T: Clone + PartialEq + 'static>(
    identifier: &str,
    context_node: usize,
) -> Option<ProviderHandle<T>> {
    let mut query = DiscoveryQuery::new(identifier);
    tree::find_ancestor_matching(
        context_node,
        TraversalOptions::BUBBLES | TraversalOptions::CROSS_BOUNDARIES,
        |index| query.offer(index),
    );

    let Some((index, state)) = query.result else {
        debug!(
            target: DISCOVERY_QUERY_TYPE,
            "query '{identifier}' from node {context_node}: no provider on path"
        );
        return None;
    };
    debug!(
        target: DISCOVERY_QUERY_TYPE,
        "query '{identifier}' from node {context_node}: intercepted at node {index}"
    );

    let handle = provider::downcast_handle::<T>(index, state);
    if handle.is_none() {
        debug!(
            target: DISCOVERY_QUERY_TYPE,
            "query '{identifier}': provider at node {index} holds a different value type"
        );
    }
    handle
}
