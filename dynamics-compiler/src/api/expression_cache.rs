/*!

De-duplicating registry of DAG nodes, keyed by the visual item that produced them. Modeled
directly on this codebase's `DagNodeCache`: a `HashMap` from a key to a `NodePtr`, with lookup
and insert as the only two real operations — everything else is a thin convenience wrapper.

*/

use dynamics_abs::{HashMap, IString};

use crate::api::node::NodePtr;
use crate::model::ItemId;

/// Every key (a visual item's id, or an anonymous/integral-input slot) resolves to exactly one
/// node across the compiler's lifetime. Anonymous nodes have no external key and exist to own
/// intermediate expressions produced during Godley translation and switch lowering.
#[derive(Default)]
pub struct ExpressionCache {
  by_item: HashMap<ItemId, NodePtr>,
  /// Keyed by fully-scoped value-id rather than visual-item identity: a Godley column and a
  /// later (or earlier) `Variable` item referencing the same flow name must resolve to the same
  /// node even though they are different `ItemId`s.
  by_value_id: HashMap<IString, NodePtr>,
  integral_inputs: HashMap<IString, NodePtr>,
  /// Owns nodes with no external key so they are not dropped before the cache is.
  anonymous: Vec<NodePtr>,
}

impl ExpressionCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn exists(&self, key: ItemId) -> bool {
    self.by_item.contains_key(&key)
  }

  pub fn lookup(&self, key: ItemId) -> Option<NodePtr> {
    self.by_item.get(&key).cloned()
  }

  /// Registers `node` under `key`. Re-inserting the same key with a different node pointer is a
  /// logic error in the builder (the two-phase construction protocol requires registering
  /// *before* recursing exactly once per item) and is caught in debug builds.
  pub fn insert(&mut self, key: ItemId, node: NodePtr) {
    if let Some(existing) = self.by_item.get(&key) {
      debug_assert!(
        std::rc::Rc::ptr_eq(existing, &node),
        "ExpressionCache::insert called twice for the same item with different nodes"
      );
      return;
    }
    self.by_item.insert(key, node);
  }

  /// Looks up a node by its fully-scoped value-id, independent of which visual item first
  /// created it.
  pub fn lookup_named(&self, value_id: &str) -> Option<NodePtr> {
    self.by_value_id.get(value_id).cloned()
  }

  /// Registers `node` under `value_id`. Like [`Self::insert`], re-registering the same value-id
  /// with a different node is a builder logic error.
  pub fn insert_named(&mut self, value_id: IString, node: NodePtr) {
    if let Some(existing) = self.by_value_id.get(&value_id) {
      debug_assert!(
        std::rc::Rc::ptr_eq(existing, &node),
        "ExpressionCache::insert_named called twice for the same value-id with different nodes"
      );
      return;
    }
    self.by_value_id.insert(value_id, node);
  }

  pub fn insert_anonymous(&mut self, node: NodePtr) -> NodePtr {
    self.anonymous.push(node.clone());
    node
  }

  pub fn insert_integral_input(&mut self, value_id: IString, node: NodePtr) {
    self.integral_inputs.insert(value_id, node);
  }

  pub fn get_integral_input(&self, value_id: &str) -> Option<NodePtr> {
    self.integral_inputs.get(value_id).cloned()
  }

  /// Total number of distinctly-keyed nodes (anonymous nodes are not counted, matching the
  /// teacher cache's `len()`, which reports only the externally-keyed population).
  pub fn len(&self) -> usize {
    self.by_item.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_item.is_empty()
  }
}
