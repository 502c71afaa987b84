/*!

The value-slot arena. Every scalar/tensor quantity the compiled plan reads or writes lives in a
`VariableValue` owned by a `ValueRegistry`; callers (and the plan itself) address a slot by its
stable `SlotIndex` rather than by a borrowed pointer, in the tradition of this codebase's other
sentinel-carrying index types (see `SortIndex`/`VariableIndex`).

*/

use std::fmt;

use dynamics_abs::{HashMap, IString};

/// An arena index into a [`ValueRegistry`]. `UNALLOCATED` (`-1`) marks a slot that has not yet
/// been assigned storage.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(i32);

impl SlotIndex {
  pub const UNALLOCATED: SlotIndex = SlotIndex(-1);

  pub(crate) fn from_usize(index: usize) -> Self {
    SlotIndex(index as i32)
  }

  pub fn is_allocated(self) -> bool {
    self.0 >= 0
  }

  /// Panics if the slot is `UNALLOCATED`.
  pub fn index(self) -> usize {
    debug_assert!(self.is_allocated(), "use of an unallocated SlotIndex");
    self.0 as usize
  }
}

impl Default for SlotIndex {
  fn default() -> Self {
    Self::UNALLOCATED
  }
}

impl fmt::Debug for SlotIndex {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_allocated() {
      write!(f, "SlotIndex({})", self.0)
    } else {
      write!(f, "SlotIndex(UNALLOCATED)")
    }
  }
}

/// The role a registry slot plays in the compiled system.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum VariableKind {
  /// Recomputed every step from a defining expression.
  Flow,
  /// Evolves via the time integral of a flow expression.
  Stock,
  /// The derivative-expression slot paired with a stock (see [`crate::api::node::Node::IntegralInput`]).
  Integral,
  /// A user-supplied constant exposed as a tunable (slider-bound).
  Parameter,
  /// A literal numeric constant, e.g. the canonical `constant:zero`/`constant:one`.
  Constant,
  /// An internal temporary allocated during code generation, not visible in the source model.
  TempFlow,
  /// Kind could not be determined; using this slot is an error.
  Undefined,
}

/// The source of a slot's starting value.
#[derive(Clone, Debug, PartialEq)]
pub enum InitValue {
  Number(f64),
  Name(IString),
}

impl Default for InitValue {
  fn default() -> Self {
    InitValue::Number(0.0)
  }
}

/// The kind of labels an axis carries.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AxisLabelKind {
  Numeric,
  String,
  Time,
}

/// One named axis of a tensor-valued slot, with its label kind and length. Scalars have an empty
/// `x_vector`.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisDescriptor {
  pub name: IString,
  pub label_kind: AxisLabelKind,
  pub len: usize,
}

/// A single value slot: storage location plus the metadata the compiler needs to generate code
/// and render equations for it.
#[derive(Clone, Debug)]
pub struct VariableValue {
  pub value_id: IString,
  pub kind: VariableKind,
  slot: SlotIndex,
  pub init: InitValue,
  pub x_vector: Vec<AxisDescriptor>,
  pub units: IString,
}

impl VariableValue {
  pub fn new(value_id: impl Into<IString>, kind: VariableKind) -> Self {
    Self {
      value_id: value_id.into(),
      kind,
      slot: SlotIndex::UNALLOCATED,
      init: InitValue::default(),
      x_vector: Vec::new(),
      units: IString::from(""),
    }
  }

  pub fn new_constant(value_id: impl Into<IString>, value: f64) -> Self {
    let mut v = Self::new(value_id, VariableKind::Constant);
    v.init = InitValue::Number(value);
    v
  }

  /// `Some(_)` once this value has been given storage by [`ValueRegistry::alloc_value`].
  pub fn slot_index(&self) -> Option<SlotIndex> {
    self.slot.is_allocated().then_some(self.slot)
  }

  pub fn is_flow_var(&self) -> bool {
    matches!(self.kind, VariableKind::Flow | VariableKind::TempFlow)
  }

  pub fn is_stock(&self) -> bool {
    matches!(self.kind, VariableKind::Stock)
  }

  /// Total element count across all axes; `1` for a scalar.
  pub fn tensor_size(&self) -> usize {
    if self.x_vector.is_empty() {
      1
    } else {
      self.x_vector.iter().map(|axis| axis.len).product()
    }
  }
}

/// The arena owning every value slot plus a name → slot index lookup.
#[derive(Debug, Default)]
pub struct ValueRegistry {
  slots: Vec<VariableValue>,
  by_id: HashMap<IString, SlotIndex>,
}

impl ValueRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry preloaded with the canonical `constant:zero`/`constant:one` slots that the
  /// `multiply`/`add` fold's identity and short-circuit rules depend on.
  pub fn with_constants() -> Self {
    let mut registry = Self::new();
    registry.alloc_value(VariableValue::new_constant("constant:zero", 0.0));
    registry.alloc_value(VariableValue::new_constant("constant:one", 1.0));
    registry
  }

  pub fn alloc_value(&mut self, mut value: VariableValue) -> SlotIndex {
    let index = SlotIndex::from_usize(self.slots.len());
    value.slot = index;
    self.by_id.insert(value.value_id.clone(), index);
    self.slots.push(value);
    index
  }

  pub fn get(&self, index: SlotIndex) -> &VariableValue {
    &self.slots[index.index()]
  }

  pub fn get_mut(&mut self, index: SlotIndex) -> &mut VariableValue {
    &mut self.slots[index.index()]
  }

  pub fn lookup(&self, value_id: &str) -> Option<SlotIndex> {
    self.by_id.get(value_id).copied()
  }

  pub fn zero_slot(&self) -> SlotIndex {
    self.lookup("constant:zero").expect("ValueRegistry::with_constants was not used to construct this registry")
  }

  pub fn one_slot(&self) -> SlotIndex {
    self.lookup("constant:one").expect("ValueRegistry::with_constants was not used to construct this registry")
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &VariableValue> {
    self.slots.iter()
  }

  /// Checks the arena's "valid entries" invariant (§5): every slot knows its own index, and the
  /// name lookup resolves each `value_id` back to the slot that carries it. A no-op outside debug
  /// builds — this is a development-time consistency check, not a recoverable compile error.
  pub fn debug_assert_valid(&self) {
    debug_assert_eq!(self.slots.len(), self.by_id.len(), "ValueRegistry: slot count and name-lookup size diverged");
    for (index, value) in self.slots.iter().enumerate() {
      debug_assert_eq!(
        value.slot_index(),
        Some(SlotIndex::from_usize(index)),
        "ValueRegistry: slot {index} does not know its own index"
      );
      debug_assert_eq!(
        self.by_id.get(&value.value_id).copied(),
        Some(SlotIndex::from_usize(index)),
        "ValueRegistry: name lookup for {} does not resolve back to its own slot",
        value.value_id
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unallocated_slot_is_the_default() {
    let slot = SlotIndex::default();
    assert!(!slot.is_allocated());
  }

  #[test]
  fn with_constants_preloads_zero_and_one() {
    let registry = ValueRegistry::with_constants();
    assert_eq!(registry.len(), 2);
    let zero = registry.get(registry.zero_slot());
    assert_eq!(zero.init, InitValue::Number(0.0));
    let one = registry.get(registry.one_slot());
    assert_eq!(one.init, InitValue::Number(1.0));
  }

  #[test]
  fn alloc_value_assigns_a_stable_slot() {
    let mut registry = ValueRegistry::with_constants();
    let idx = registry.alloc_value(VariableValue::new("group:a", VariableKind::Flow));
    assert!(idx.is_allocated());
    assert_eq!(registry.lookup("group:a"), Some(idx));
    assert_eq!(registry.get(idx).slot_index(), Some(idx));
  }

  #[test]
  fn scalar_tensor_size_is_one() {
    let value = VariableValue::new("group:a", VariableKind::Flow);
    assert_eq!(value.tensor_size(), 1);
  }

  #[test]
  fn debug_assert_valid_accepts_a_well_formed_registry() {
    let mut registry = ValueRegistry::with_constants();
    registry.alloc_value(VariableValue::new("group:a", VariableKind::Flow));
    registry.alloc_value(VariableValue::new("group:b", VariableKind::Stock));
    registry.debug_assert_valid();
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic]
  fn debug_assert_valid_catches_a_stale_slot_index() {
    let mut registry = ValueRegistry::with_constants();
    let idx = registry.alloc_value(VariableValue::new("group:a", VariableKind::Flow));
    registry.get_mut(idx).value_id = IString::from("group:renamed-without-reindexing");
    registry.debug_assert_valid();
  }
}
