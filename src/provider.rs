//! Provider factory - tree nodes that expose a mutable value to descendants.
//!
//! [`create_provider`] defines a provider *type* (one per semantic context
//! in an application); instantiating the type mounts a provider into the
//! host tree as a child of the current parent context. A mounted provider
//! answers discovery queries addressed to its identifier and notifies
//! observers whenever its value is replaced with a non-equal one.
//!
//! # Change detection
//!
//! The sole policy is `!=` on the stored value. An assignment that
//! compares equal is a complete no-op: no store, no notification.
//! Notifications are delivered locally (they never traverse the tree):
//! registered `on_change` callbacks fire, and a revision signal bumps so
//! that `value()` reads inside an `effect` re-run.
//!
//! # Example
//!
//! ```ignore
//! use tree_context::{create_provider, get_provider, tree};
//!
//! let theme = create_provider("dark".to_string(), "app-theme");
//!
//! let root = tree::create_node(None);
//! tree::push_parent_context(root);
//! let provider = theme.create();
//! tree::push_parent_context(provider.node_index());
//! let widget = tree::create_node(None);
//! tree::pop_parent_context();
//! tree::pop_parent_context();
//!
//! let found = get_provider::<String>("app-theme", widget).unwrap();
//! assert_eq!(found.value(), "dark");
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use log::trace;
use spark_signals::{Signal, signal};

use crate::tree;

// =============================================================================
// Mounted-Provider Table
// =============================================================================

thread_local! {
    /// Association table shared with discovery: node index → mounted
    /// provider. Private to the crate; the value store itself lives
    /// inside each instance's state, keyed by instance identity.
    static MOUNTED: RefCell<HashMap<usize, Rc<dyn AnyProvider>>> = RefCell::new(HashMap::new());

    /// Counter for instance identities.
    static INSTANCE_COUNTER: Cell<u64> = const { Cell::new(0) };
}

fn next_instance_id() -> u64 {
    INSTANCE_COUNTER.with(|counter| {
        let id = counter.get();
        counter.set(id + 1);
        id
    })
}

/// Look up the provider mounted on a node, if any.
pub(crate) fn mounted_at(index: usize) -> Option<Rc<dyn AnyProvider>> {
    MOUNTED.with(|table| table.borrow().get(&index).cloned())
}

/// Clear the mounted-provider table (for testing).
pub fn reset_providers() {
    MOUNTED.with(|table| table.borrow_mut().clear());
    INSTANCE_COUNTER.with(|counter| counter.set(0));
}

/// Type-erased view of a mounted provider, enough for discovery to match
/// identifiers and hand back a typed handle.
pub(crate) trait AnyProvider {
    fn identifier(&self) -> &str;
    fn instance_id(&self) -> u64;
    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
}

// =============================================================================
// Provider State
// =============================================================================

/// Per-instance state. The value is a genuinely private field here; no
/// external code can reach it except through the handle's accessors.
struct ProviderState<T> {
    identifier: String,
    instance_id: u64,
    value: RefCell<T>,
    /// Bumped on every accepted write; reactive readers track this.
    revision: Signal<u64>,
    rev_counter: Cell<u64>,
    mounted: Cell<bool>,
    /// Set once the backing node is released; blocks remounting.
    destroyed: Cell<bool>,
    /// Observer slots; tombstoned on cleanup so slot ids stay stable.
    observers: RefCell<Vec<Option<Rc<dyn Fn()>>>>,
}

impl<T> ProviderState<T> {
    fn notify(&self) {
        // Clone the live observers out before calling, so a callback may
        // register or deregister observers without a borrow conflict.
        let observers: Vec<Rc<dyn Fn()>> =
            self.observers.borrow().iter().flatten().cloned().collect();
        for observer in observers {
            observer();
        }
    }
}

impl<T: 'static> AnyProvider for ProviderState<T> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn instance_id(&self) -> u64 {
        self.instance_id
    }

    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Define a provider type holding values of type `T` under the given
/// identifier.
///
/// Pure and deterministic; call it any number of times to define distinct
/// provider types. Identifiers are matched by strict equality during
/// discovery, and uniqueness across types is a caller convention.
pub fn create_provider<T>(initial_value: T, identifier: impl Into<String>) -> ProviderType<T>
where
    T: Clone + PartialEq + 'static,
{
    ProviderType {
        identifier: identifier.into(),
        initial: initial_value,
    }
}

/// A provider definition produced by [`create_provider`].
#[derive(Clone)]
pub struct ProviderType<T> {
    identifier: String,
    initial: T,
}

impl<T: Clone + PartialEq + 'static> ProviderType<T> {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Instantiate and mount a provider as a child of the current parent
    /// context. The instance starts with this type's initial value.
    pub fn create(&self) -> ProviderHandle<T> {
        let instance_id = next_instance_id();
        let node_id = format!("provider:{}:{}", self.identifier, instance_id);
        let index = tree::create_node(Some(&node_id));

        let state = Rc::new(ProviderState {
            identifier: self.identifier.clone(),
            instance_id,
            value: RefCell::new(self.initial.clone()),
            revision: signal(0u64),
            rev_counter: Cell::new(0),
            mounted: Cell::new(false),
            destroyed: Cell::new(false),
            observers: RefCell::new(Vec::new()),
        });

        let handle = ProviderHandle { index, state };
        handle.mount();

        // Releasing the node unmounts the instance for good.
        let state_for_destroy = Rc::downgrade(&handle.state);
        tree::on_destroy(index, move || {
            if let Some(state) = state_for_destroy.upgrade() {
                state.mounted.set(false);
                state.destroyed.set(true);
            }
            MOUNTED.with(|table| {
                table.borrow_mut().remove(&index);
            });
        });

        handle
    }
}

// =============================================================================
// Provider Handle
// =============================================================================

/// Handle to a mounted provider instance. Cloning the handle shares the
/// same instance; the stored value is dropped when the last handle and
/// the mounted-table entry are gone.
pub struct ProviderHandle<T> {
    index: usize,
    state: Rc<ProviderState<T>>,
}

impl<T> Clone for ProviderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone + PartialEq + 'static> ProviderHandle<T> {
    /// The identifier this instance answers discovery queries for.
    pub fn identifier(&self) -> &str {
        &self.state.identifier
    }

    /// The host tree node this instance occupies.
    pub fn node_index(&self) -> usize {
        self.index
    }

    /// Current stored value.
    ///
    /// Reads through the revision signal, so calling this inside an
    /// `effect` subscribes the effect to future changes.
    pub fn value(&self) -> T {
        self.state.revision.get();
        self.state.value.borrow().clone()
    }

    /// Replace the stored value.
    ///
    /// No-op when the new value compares equal to the current one;
    /// otherwise stores it and emits a change notification.
    pub fn set_value(&self, value: T) {
        if *self.state.value.borrow() == value {
            return;
        }
        *self.state.value.borrow_mut() = value;

        let revision = self.state.rev_counter.get() + 1;
        self.state.rev_counter.set(revision);
        self.state.revision.set(revision);
        self.state.notify();
    }

    /// The raw change signal, for fine-grained effects that want to react
    /// to writes without reading the value.
    pub fn revision(&self) -> Signal<u64> {
        self.state.revision.clone()
    }

    /// Register an observer fired on every accepted write.
    /// Returns a cleanup function that deregisters it.
    pub fn on_change(&self, callback: impl Fn() + 'static) -> impl FnOnce() {
        let slot = {
            let mut observers = self.state.observers.borrow_mut();
            observers.push(Some(Rc::new(callback) as Rc<dyn Fn()>));
            observers.len() - 1
        };
        let state = Rc::clone(&self.state);
        move || {
            let mut observers = state.observers.borrow_mut();
            if let Some(entry) = observers.get_mut(slot) {
                *entry = None;
            }
        }
    }

    /// Whether this instance is currently discoverable.
    pub fn is_mounted(&self) -> bool {
        self.state.mounted.get()
    }

    /// Make this instance discoverable. Idempotent; a no-op once the
    /// backing node has been released.
    pub fn mount(&self) {
        if self.state.mounted.get() || self.state.destroyed.get() {
            return;
        }
        if !tree::is_allocated(self.index) {
            return;
        }
        let state: Rc<dyn AnyProvider> = self.state.clone();
        MOUNTED.with(|table| {
            table.borrow_mut().insert(self.index, state);
        });
        self.state.mounted.set(true);
        trace!(
            "mounted provider '{}' at node {}",
            self.state.identifier, self.index
        );
    }

    /// Stop answering discovery queries. Idempotent; never panics when
    /// called on an already-unmounted instance. Only evicts the table
    /// entry if it belongs to this instance.
    pub fn unmount(&self) {
        if !self.state.mounted.get() {
            return;
        }
        self.state.mounted.set(false);
        MOUNTED.with(|table| {
            let mut table = table.borrow_mut();
            let ours = table
                .get(&self.index)
                .is_some_and(|occupant| occupant.instance_id() == self.state.instance_id);
            if ours {
                table.remove(&self.index);
            }
        });
        trace!(
            "unmounted provider '{}' at node {}",
            self.state.identifier, self.index
        );
    }
}

/// Rebuild a typed handle from a table entry. None if the entry stores a
/// different value type.
pub(crate) fn downcast_handle<T: Clone + PartialEq + 'static>(
    index: usize,
    provider: Rc<dyn AnyProvider>,
) -> Option<ProviderHandle<T>> {
    let state = provider.as_any().downcast::<ProviderState<T>>().ok()?;
    Some(ProviderHandle { index, state })
}
