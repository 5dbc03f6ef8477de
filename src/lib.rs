//! # tree-context
//!
//! Context providers with ancestor discovery for reactive component trees.
//!
//! A provider exposes a mutable value to descendant nodes without explicit
//! parent-to-child wiring: descendants locate the nearest provider for an
//! identifier through a synchronous upward search, and react to value
//! changes through observer callbacks or [spark-signals](https://github.com/RLabs-Inc/spark-signals)
//! effects.
//!
//! ## Architecture
//!
//! ```text
//! create_provider -> ProviderType -> ProviderHandle (mounted on a tree node)
//!                                          ^
//! get_provider -> DiscoveryQuery -> tree::find_ancestor_matching
//! ```
//!
//! Providers are composed over host tree nodes rather than subclassing
//! them, and discovery is an explicit ancestor walk rather than a bubbling
//! event; both preserve the nearest-match, halt-on-first-hit contract.
//!
//! ## Modules
//!
//! - [`tree`] - Host tree: node registry, parent links, boundaries, traversal
//! - [`provider`] - Provider factory, value storage, change notification
//! - [`discovery`] - Discovery queries and `get_provider`
//!
//! ## Example
//!
//! ```ignore
//! use tree_context::{create_provider, get_provider, tree};
//!
//! let counter = create_provider(0u32, "counter");
//!
//! let provider = counter.create();
//! tree::push_parent_context(provider.node_index());
//! let widget = tree::create_node(None);
//! tree::pop_parent_context();
//!
//! let found = get_provider::<u32>("counter", widget).unwrap();
//! found.set_value(1); // observers of `provider` are notified
//! ```

pub mod discovery;
pub mod provider;
pub mod tree;

// Re-export commonly used items
pub use discovery::{DISCOVERY_QUERY_TYPE, DiscoveryQuery, get_provider};
pub use provider::{ProviderHandle, ProviderType, create_provider, reset_providers};
pub use tree::TraversalOptions;
