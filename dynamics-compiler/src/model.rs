/*!

A minimal concrete stand-in for the externally-owned visual model: a tree of [`Group`]s
containing [`Item`]s (variables, operations, switches, integrators, Godley icons, plots, sheets)
connected by [`Wire`]s between typed [`Port`]s. Port `0` of an item is its output; ports `>= 1`
are inputs. This is sufficient to build and exercise the compiler in tests; a real embedding
application supplies its own richer types behind the same shapes.

*/

use dynamics_abs::IString;

use crate::core::operator::OperatorState;
use crate::core::value_registry::VariableKind;

/// Stable identity of a visual item, used as the [`crate::api::expression_cache::ExpressionCache`]
/// key and as the "highlight" carried by [`crate::core::error::CompileError`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Default)]
pub struct ItemId(u32);

impl ItemId {
  pub fn new(id: u32) -> Self {
    ItemId(id)
  }

  pub fn raw(self) -> u32 {
    self.0
  }
}

/// A connection point on an item. Index `0` is always the output port.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Port {
  pub item: ItemId,
  pub index: u32,
}

impl Port {
  pub fn output(item: ItemId) -> Self {
    Port { item, index: 0 }
  }

  pub fn input(item: ItemId, index: u32) -> Self {
    debug_assert!(index >= 1, "port index 0 is reserved for an item's output");
    Port { item, index }
  }
}

/// A directed connection from one item's output port to another item's input port. Several
/// wires may share the same destination port (variadic fan-in).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Wire {
  pub from: Port,
  pub to: Port,
}

/// One cell of a Godley icon's data grid, as raw text exactly as a user would type it
/// (`"2*interest"`, `"-tax"`, `"salary"`, or empty).
pub type GodleyCell = String;

/// What kind of visual item an [`Item`] is.
#[derive(Clone, Debug)]
pub enum ItemKind {
  /// `init` supplies the starting value when the variable has no defining wire (a slider-bound
  /// parameter, or a stock with no Godley column).
  Variable { kind: VariableKind, name: IString, init: crate::core::value_registry::InitValue },
  Constant { value: f64 },
  Operation { op: crate::core::operator::OperatorKind, state: OperatorState },
  /// An N-case switch: input port 1 is the selector, ports `2..=N+1` the branch values.
  Switch { num_cases: usize },
  /// Binds a stock variable named `stock_name`; input port 1 is the derivative expression, port
  /// 2 (optional) the initial-value expression.
  Integrator { stock_name: IString },
  /// Row 0 holds column headers (the first column is conventionally blank); remaining rows hold
  /// signed flow-coefficient cells. Row `initial_condition_row`, if any, is skipped during flow
  /// parsing (§4.3 step 3).
  GodleyIcon { rows: Vec<Vec<GodleyCell>>, initial_condition_row: Option<usize> },
  Plot,
  Sheet,
}

#[derive(Clone, Debug)]
pub struct Item {
  pub id: ItemId,
  pub kind: ItemKind,
}

/// A scope containing items and the wires between them, plus nested child groups. Fully-scoped
/// value-ids are formed as `"{group_name}:{local_name}"`.
#[derive(Clone, Debug, Default)]
pub struct Group {
  pub name: IString,
  pub items: Vec<Item>,
  pub wires: Vec<Wire>,
  pub children: Vec<Group>,
  next_id: u32,
}

impl Group {
  pub fn new(name: impl Into<IString>) -> Self {
    Self { name: name.into(), ..Default::default() }
  }

  /// Allocates a fresh `ItemId` and adds the item to this group, returning the id.
  pub fn add_item(&mut self, kind: ItemKind) -> ItemId {
    let id = ItemId::new(self.next_id);
    self.next_id += 1;
    self.items.push(Item { id, kind });
    id
  }

  pub fn add_wire(&mut self, from: Port, to: Port) {
    self.wires.push(Wire { from, to });
  }

  pub fn item(&self, id: ItemId) -> Option<&Item> {
    self.items.iter().find(|item| item.id == id)
  }

  /// All wires whose destination is `port`, in insertion order (fan-in list for a variadic port).
  pub fn wires_into(&self, port: Port) -> impl Iterator<Item = &Wire> {
    self.wires.iter().filter(move |w| w.to == port)
  }

  pub fn scoped_name(&self, local: &str) -> IString {
    format!("{}:{}", self.name, local).into()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_item_assigns_increasing_ids() {
    let mut group = Group::new("model");
    let a = group.add_item(ItemKind::Constant { value: 1.0 });
    let b = group.add_item(ItemKind::Constant { value: 2.0 });
    assert_ne!(a, b);
    assert!(group.item(a).is_some());
    assert!(group.item(b).is_some());
  }

  #[test]
  fn wires_into_filters_by_destination() {
    let mut group = Group::new("model");
    let a = group.add_item(ItemKind::Constant { value: 1.0 });
    let b = group.add_item(ItemKind::Constant { value: 2.0 });
    let op = group.add_item(ItemKind::Operation {
      op: crate::core::operator::OperatorKind::Add,
      state: OperatorState::default(),
    });
    group.add_wire(Port::output(a), Port::input(op, 1));
    group.add_wire(Port::output(b), Port::input(op, 1));
    let fan_in: Vec<_> = group.wires_into(Port::input(op, 1)).collect();
    assert_eq!(fan_in.len(), 2);
  }

  #[test]
  fn scoped_name_prefixes_the_group_name() {
    let group = Group::new("top");
    assert_eq!(group.scoped_name("x").as_ref(), "top:x");
  }
}
