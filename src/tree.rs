//! Host component tree - node registry and ancestor traversal.
//!
//! Manages the lifecycle of node indices:
//! - ID ↔ Index bidirectional mapping
//! - Free index pool for O(1) reuse
//! - Parent context stack for nested node creation
//! - Parent links and encapsulation-boundary flags per node
//! - Destroy callbacks, run when a node (or an ancestor) is released
//!
//! Providers live *in* this tree by composition: a provider owns a node
//! index rather than subclassing a node type. Discovery walks parent
//! links via [`find_ancestor_matching`] instead of dispatching a bubbling
//! event, which preserves the same nearest-match, halt-on-first-hit
//! contract.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

bitflags! {
    /// Traversal configuration for [`find_ancestor_matching`].
    ///
    /// Mirrors how a tree signal would be initialized: `BUBBLES` walks
    /// upward past the starting node, `CROSS_BOUNDARIES` continues past
    /// encapsulation boundaries that would otherwise stop the walk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraversalOptions: u8 {
        const BUBBLES = 1 << 0;
        const CROSS_BOUNDARIES = 1 << 1;
    }
}

// =============================================================================
// Tree State
// =============================================================================

thread_local! {
    /// Map node ID to index.
    static ID_TO_INDEX: RefCell<HashMap<String, usize>> = RefCell::new(HashMap::new());

    /// Map index to node ID.
    static INDEX_TO_ID: RefCell<HashMap<usize, String>> = RefCell::new(HashMap::new());

    /// Set of currently allocated indices (for iteration).
    static ALLOCATED: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());

    /// Pool of freed indices for reuse.
    static FREE_INDICES: RefCell<Vec<usize>> = RefCell::new(Vec::new());

    /// Next index to allocate if pool is empty.
    static NEXT_INDEX: RefCell<usize> = const { RefCell::new(0) };

    /// Counter for generating unique IDs.
    static ID_COUNTER: RefCell<usize> = const { RefCell::new(0) };

    /// Stack of parent indices for nested node creation.
    static PARENT_STACK: RefCell<Vec<usize>> = RefCell::new(Vec::new());

    /// Parent link per index (columnar, indexed by node).
    static PARENT_OF: RefCell<Vec<Option<usize>>> = RefCell::new(Vec::new());

    /// Encapsulation-boundary flag per index.
    static BOUNDARY: RefCell<Vec<bool>> = RefCell::new(Vec::new());

    /// Destroy callbacks registered per index.
    static DESTROY_CALLBACKS: RefCell<HashMap<usize, Vec<Box<dyn FnOnce()>>>> = RefCell::new(HashMap::new());
}

// =============================================================================
// Parent Context Stack
// =============================================================================

/// Get current parent index (None if at root).
pub fn get_current_parent_index() -> Option<usize> {
    PARENT_STACK.with(|stack| stack.borrow().last().copied())
}

/// Push a parent index onto the stack.
pub fn push_parent_context(index: usize) {
    PARENT_STACK.with(|stack| stack.borrow_mut().push(index));
}

/// Pop a parent index from the stack.
pub fn pop_parent_context() {
    PARENT_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
}

// =============================================================================
// Node Allocation
// =============================================================================

/// Allocate a node.
///
/// The new node's parent is the top of the parent context stack (or none,
/// for a root). If `id` is not provided one is generated; if a node with
/// the given ID already exists its index is returned unchanged.
pub fn create_node(id: Option<&str>) -> usize {
    let node_id = match id {
        Some(id) => id.to_string(),
        None => ID_COUNTER.with(|counter| {
            let mut counter = counter.borrow_mut();
            let id = format!("n{}", *counter);
            *counter += 1;
            id
        }),
    };

    let existing = ID_TO_INDEX.with(|map| map.borrow().get(&node_id).copied());
    if let Some(index) = existing {
        return index;
    }

    // Reuse a freed index or allocate a new one
    let index = FREE_INDICES.with(|free| {
        let mut free = free.borrow_mut();
        if let Some(index) = free.pop() {
            index
        } else {
            NEXT_INDEX.with(|next| {
                let mut next = next.borrow_mut();
                let index = *next;
                *next += 1;
                index
            })
        }
    });

    ID_TO_INDEX.with(|map| {
        map.borrow_mut().insert(node_id.clone(), index);
    });
    INDEX_TO_ID.with(|map| {
        map.borrow_mut().insert(index, node_id);
    });
    ALLOCATED.with(|set| {
        set.borrow_mut().insert(index);
    });

    ensure_capacity(index);
    PARENT_OF.with(|parents| parents.borrow_mut()[index] = get_current_parent_index());

    index
}

/// Release a node back to the pool.
///
/// Also recursively releases all children!
pub fn release_node(index: usize) {
    let id = INDEX_TO_ID.with(|map| map.borrow().get(&index).cloned());
    let Some(id) = id else { return };

    // Children first, so destroy callbacks run leaf-to-root. Collected
    // up front to avoid mutating the set while iterating.
    let children: Vec<usize> = ALLOCATED.with(|set| {
        set.borrow()
            .iter()
            .copied()
            .filter(|&child| parent_of(child) == Some(index))
            .collect()
    });
    for child in children {
        release_node(child);
    }

    run_destroy_callbacks(index);

    ID_TO_INDEX.with(|map| {
        map.borrow_mut().remove(&id);
    });
    INDEX_TO_ID.with(|map| {
        map.borrow_mut().remove(&index);
    });
    ALLOCATED.with(|set| {
        set.borrow_mut().remove(&index);
    });

    clear_at_index(index);

    FREE_INDICES.with(|free| {
        free.borrow_mut().push(index);
    });

    // When the last node goes away, drop all bookkeeping to free memory.
    let is_empty = ALLOCATED.with(|set| set.borrow().is_empty());
    if is_empty {
        FREE_INDICES.with(|free| free.borrow_mut().clear());
        NEXT_INDEX.with(|next| *next.borrow_mut() = 0);
        PARENT_OF.with(|parents| parents.borrow_mut().clear());
        BOUNDARY.with(|flags| flags.borrow_mut().clear());
    }
}

fn ensure_capacity(index: usize) {
    PARENT_OF.with(|parents| {
        let mut parents = parents.borrow_mut();
        if parents.len() <= index {
            parents.resize(index + 1, None);
        }
    });
    BOUNDARY.with(|flags| {
        let mut flags = flags.borrow_mut();
        if flags.len() <= index {
            flags.resize(index + 1, false);
        }
    });
}

fn clear_at_index(index: usize) {
    PARENT_OF.with(|parents| parents.borrow_mut()[index] = None);
    BOUNDARY.with(|flags| flags.borrow_mut()[index] = false);
}

// =============================================================================
// Parent Links & Boundaries
// =============================================================================

/// Get a node's parent index.
pub fn parent_of(index: usize) -> Option<usize> {
    PARENT_OF.with(|parents| parents.borrow().get(index).copied().flatten())
}

/// Re-parent a node explicitly (overrides the creation-time context).
pub fn set_parent(index: usize, parent: Option<usize>) {
    if !is_allocated(index) {
        return;
    }
    PARENT_OF.with(|parents| parents.borrow_mut()[index] = parent);
}

/// Mark or unmark a node as an encapsulation boundary.
pub fn set_boundary(index: usize, boundary: bool) {
    if !is_allocated(index) {
        return;
    }
    BOUNDARY.with(|flags| flags.borrow_mut()[index] = boundary);
}

/// Check whether a node is an encapsulation boundary.
pub fn is_boundary(index: usize) -> bool {
    BOUNDARY.with(|flags| flags.borrow().get(index).copied().unwrap_or(false))
}

// =============================================================================
// Ancestor Traversal
// =============================================================================

/// Walk from `start` toward the root, returning the first node for which
/// `predicate` answers `true`.
///
/// `start` itself is tested first. The first hit halts the walk: no node
/// beyond it is visited. Without [`TraversalOptions::BUBBLES`] only
/// `start` is tested; without [`TraversalOptions::CROSS_BOUNDARIES`] the
/// walk stops after testing a boundary node. An unmatched walk falls off
/// the root and returns None.
pub fn find_ancestor_matching(
    start: usize,
    options: TraversalOptions,
    mut predicate: impl FnMut(usize) -> bool,
) -> Option<usize> {
    if !is_allocated(start) {
        return None;
    }
    let mut current = start;
    loop {
        if predicate(current) {
            return Some(current);
        }
        if !options.contains(TraversalOptions::BUBBLES) {
            return None;
        }
        if is_boundary(current) && !options.contains(TraversalOptions::CROSS_BOUNDARIES) {
            return None;
        }
        current = parent_of(current)?;
    }
}

// =============================================================================
// Destroy Callbacks
// =============================================================================

/// Register a callback to run when the node at `index` is released.
pub fn on_destroy(index: usize, callback: impl FnOnce() + 'static) {
    DESTROY_CALLBACKS.with(|callbacks| {
        callbacks
            .borrow_mut()
            .entry(index)
            .or_default()
            .push(Box::new(callback));
    });
}

/// Run and clear destroy callbacks for an index.
fn run_destroy_callbacks(index: usize) {
    let callbacks = DESTROY_CALLBACKS.with(|callbacks| callbacks.borrow_mut().remove(&index));
    if let Some(callbacks) = callbacks {
        for callback in callbacks {
            callback();
        }
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Get index for a node ID.
pub fn get_index(id: &str) -> Option<usize> {
    ID_TO_INDEX.with(|map| map.borrow().get(id).copied())
}

/// Get ID for an index.
pub fn get_id(index: usize) -> Option<String> {
    INDEX_TO_ID.with(|map| map.borrow().get(&index).cloned())
}

/// Check if an index is currently allocated.
pub fn is_allocated(index: usize) -> bool {
    ALLOCATED.with(|set| set.borrow().contains(&index))
}

/// Count of currently allocated nodes.
pub fn node_count() -> usize {
    ALLOCATED.with(|set| set.borrow().len())
}

// =============================================================================
// Reset (for testing)
// =============================================================================

/// Reset all tree state (for testing).
pub fn reset_tree() {
    ID_TO_INDEX.with(|map| map.borrow_mut().clear());
    INDEX_TO_ID.with(|map| map.borrow_mut().clear());
    ALLOCATED.with(|set| set.borrow_mut().clear());
    FREE_INDICES.with(|free| free.borrow_mut().clear());
    NEXT_INDEX.with(|next| *next.borrow_mut() = 0);
    ID_COUNTER.with(|counter| *counter.borrow_mut() = 0);
    PARENT_STACK.with(|stack| stack.borrow_mut().clear());
    PARENT_OF.with(|parents| parents.borrow_mut().clear());
    BOUNDARY.with(|flags| flags.borrow_mut().clear());
    DESTROY_CALLBACKS.with(|callbacks| callbacks.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_node() {
        reset_tree();

        let idx1 = create_node(None);
        let idx2 = create_node(None);
        let idx3 = create_node(Some("sidebar"));

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 2);

        assert!(is_allocated(0));
        assert!(is_allocated(2));
        assert!(!is_allocated(3));
        assert_eq!(node_count(), 3);
        assert_eq!(get_index("sidebar"), Some(2));
        assert_eq!(get_id(2), Some("sidebar".to_string()));
    }

    #[test]
    fn test_release_and_reuse() {
        reset_tree();

        let idx1 = create_node(None);
        let idx2 = create_node(None);

        release_node(idx1);
        assert!(!is_allocated(idx1));
        assert!(is_allocated(idx2));

        // Should reuse the freed index
        let idx3 = create_node(None);
        assert_eq!(idx3, idx1);
    }

    #[test]
    fn test_parent_from_context_stack() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let child = create_node(None);
        push_parent_context(child);
        let grandchild = create_node(None);
        pop_parent_context();
        pop_parent_context();

        assert_eq!(parent_of(root), None);
        assert_eq!(parent_of(child), Some(root));
        assert_eq!(parent_of(grandchild), Some(child));
    }

    #[test]
    fn test_release_is_recursive() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let child = create_node(None);
        push_parent_context(child);
        let grandchild = create_node(None);
        pop_parent_context();
        pop_parent_context();

        release_node(root);
        assert!(!is_allocated(child));
        assert!(!is_allocated(grandchild));
        assert_eq!(node_count(), 0);
    }

    #[test]
    fn test_destroy_callback() {
        use std::cell::Cell;
        use std::rc::Rc;

        reset_tree();

        let called = Rc::new(Cell::new(false));
        let called_clone = called.clone();

        let idx = create_node(None);
        on_destroy(idx, move || {
            called_clone.set(true);
        });

        assert!(!called.get());
        release_node(idx);
        assert!(called.get());
    }

    #[test]
    fn test_find_ancestor_tests_start_first() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let child = create_node(None);
        pop_parent_context();

        let found = find_ancestor_matching(child, TraversalOptions::BUBBLES, |_| true);
        assert_eq!(found, Some(child));
    }

    #[test]
    fn test_find_ancestor_nearest_wins() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let mid = create_node(None);
        push_parent_context(mid);
        let leaf = create_node(None);
        pop_parent_context();
        pop_parent_context();

        // Both root and mid would match; the walk must stop at mid.
        let found = find_ancestor_matching(leaf, TraversalOptions::BUBBLES, |idx| {
            idx == root || idx == mid
        });
        assert_eq!(found, Some(mid));
    }

    #[test]
    fn test_find_ancestor_without_bubbles_only_tests_start() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let child = create_node(None);
        pop_parent_context();

        let found = find_ancestor_matching(child, TraversalOptions::empty(), |idx| idx == root);
        assert_eq!(found, None);
    }

    #[test]
    fn test_find_ancestor_stops_at_boundary() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let shadow_root = create_node(None);
        set_boundary(shadow_root, true);
        push_parent_context(shadow_root);
        let leaf = create_node(None);
        pop_parent_context();
        pop_parent_context();

        // Non-crossing walk tests the boundary node, then stops.
        let found = find_ancestor_matching(leaf, TraversalOptions::BUBBLES, |idx| idx == root);
        assert_eq!(found, None);

        let found = find_ancestor_matching(
            leaf,
            TraversalOptions::BUBBLES | TraversalOptions::CROSS_BOUNDARIES,
            |idx| idx == root,
        );
        assert_eq!(found, Some(root));
    }

    #[test]
    fn test_find_ancestor_unmatched_falls_off_root() {
        reset_tree();

        let root = create_node(None);
        push_parent_context(root);
        let leaf = create_node(None);
        pop_parent_context();

        let mut visited = Vec::new();
        let found = find_ancestor_matching(
            leaf,
            TraversalOptions::BUBBLES | TraversalOptions::CROSS_BOUNDARIES,
            |idx| {
                visited.push(idx);
                false
            },
        );
        assert_eq!(found, None);
        assert_eq!(visited, vec![leaf, root]);
    }
}
