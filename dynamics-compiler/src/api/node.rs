/*!

The expression DAG node type. A flat tagged enum replaces a polymorphic node hierarchy (§9):
compilation here is a one-shot batch transform over a DAG with no back-edges requiring garbage
collection, so plain `Rc` reference counting is sufficient — the same subexpression can be an
argument of more than one parent, which is why nodes are shared (`Rc`) rather than owned
(`Box`).

*/

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use dynamics_abs::IString;
use ordered_float::OrderedFloat;

use crate::core::error::{CompileError, CompileResult};
use crate::core::operator::{OperatorKind, OperatorState};
use crate::core::value_registry::{InitValue, SlotIndex, VariableKind};
use crate::model::ItemId;

/// The lazily-initialized caches every node variant carries: its assigned storage slot (filled
/// in by code generation) and its memoized definition order (filled in by `order()`).
#[derive(Debug, Default)]
pub struct NodeCore {
  result: RefCell<Option<SlotIndex>>,
  order: RefCell<Option<i32>>,
}

impl NodeCore {
  pub fn result(&self) -> Option<SlotIndex> {
    *self.result.borrow()
  }

  pub fn set_result(&self, slot: SlotIndex) {
    *self.result.borrow_mut() = Some(slot);
  }

  pub fn cached_order(&self) -> Option<i32> {
    *self.order.borrow()
  }

  pub fn set_cached_order(&self, order: i32) {
    *self.order.borrow_mut() = Some(order);
  }
}

/// A shared, reference-counted handle to a DAG node. Equality of identity (not structure) is
/// what the expression cache's "same visual item → same node" contract relies on; compare with
/// `Rc::ptr_eq`.
pub type NodePtr = Rc<Node>;

pub enum Node {
  Constant {
    core: NodeCore,
    value: OrderedFloat<f64>,
  },
  Variable {
    core: NodeCore,
    value_id: IString,
    name: IString,
    kind: VariableKind,
    init: RefCell<InitValue>,
    rhs: RefCell<Option<NodePtr>>,
    int_op: RefCell<Option<ItemId>>,
  },
  /// The derivative-expression node inserted to break a stock's self-reference cycle; `rhs` is
  /// resolved either immediately or by the deferred second pass (§4.4).
  IntegralInput {
    core: NodeCore,
    name: IString,
    rhs: RefCell<Option<NodePtr>>,
  },
  Operation {
    core: NodeCore,
    op: OperatorKind,
    state: OperatorState,
    /// `arguments[i]` is the variadic list of nodes wired to input port `i + 1`.
    arguments: RefCell<Vec<Vec<NodePtr>>>,
  },
  GodleyColumn {
    core: NodeCore,
    credits: Vec<NodePtr>,
    debits: Vec<NodePtr>,
  },
}

impl Node {
  pub fn new_constant(value: f64) -> NodePtr {
    Rc::new(Node::Constant { core: NodeCore::default(), value: OrderedFloat(value) })
  }

  pub fn new_variable(
    value_id: IString,
    name: IString,
    kind: VariableKind,
    init: InitValue,
    int_op: Option<ItemId>,
  ) -> NodePtr {
    Rc::new(Node::Variable {
      core: NodeCore::default(),
      value_id,
      name,
      kind,
      init: RefCell::new(init),
      rhs: RefCell::new(None),
      int_op: RefCell::new(int_op),
    })
  }

  pub fn new_integral_input(name: IString) -> NodePtr {
    Rc::new(Node::IntegralInput { core: NodeCore::default(), name, rhs: RefCell::new(None) })
  }

  pub fn new_operation(op: OperatorKind, state: OperatorState) -> NodePtr {
    Rc::new(Node::Operation { core: NodeCore::default(), op, state, arguments: RefCell::new(Vec::new()) })
  }

  pub fn new_godley_column(credits: Vec<NodePtr>, debits: Vec<NodePtr>) -> NodePtr {
    Rc::new(Node::GodleyColumn { core: NodeCore::default(), credits, debits })
  }

  pub fn core(&self) -> &NodeCore {
    match self {
      Node::Constant { core, .. }
      | Node::Variable { core, .. }
      | Node::IntegralInput { core, .. }
      | Node::Operation { core, .. }
      | Node::GodleyColumn { core, .. } => core,
    }
  }

  pub fn rhs(&self) -> Option<NodePtr> {
    match self {
      Node::Variable { rhs, .. } | Node::IntegralInput { rhs, .. } => rhs.borrow().clone(),
      _ => None,
    }
  }

  pub fn set_rhs(&self, node: NodePtr) {
    match self {
      Node::Variable { rhs, .. } | Node::IntegralInput { rhs, .. } => *rhs.borrow_mut() = Some(node),
      _ => debug_assert!(false, "set_rhs called on a node kind with no rhs slot"),
    }
  }

  pub fn is_integrate(&self) -> bool {
    matches!(self, Node::Operation { op: OperatorKind::Integrate, .. })
  }

  pub fn value_id(&self) -> Option<&IString> {
    match self {
      Node::Variable { value_id, .. } => Some(value_id),
      _ => None,
    }
  }

  pub fn name(&self) -> Option<&IString> {
    match self {
      Node::Variable { name, .. } => Some(name),
      Node::IntegralInput { name, .. } => Some(name),
      _ => None,
    }
  }

  pub fn kind(&self) -> Option<VariableKind> {
    match self {
      Node::Variable { kind, .. } => Some(*kind),
      _ => None,
    }
  }

  pub fn int_op(&self) -> Option<ItemId> {
    match self {
      Node::Variable { int_op, .. } => *int_op.borrow(),
      _ => None,
    }
  }

  pub fn set_int_op(&self, item_id: ItemId) {
    match self {
      Node::Variable { int_op, .. } => *int_op.borrow_mut() = Some(item_id),
      _ => debug_assert!(false, "set_int_op called on a node kind with no int_op slot"),
    }
  }

  /// `true` for operation nodes whose operator folds over port arguments (`add`, `multiply`, …).
  pub fn as_operation(&self) -> Option<(OperatorKind, &OperatorState, &RefCell<Vec<Vec<NodePtr>>>)> {
    match self {
      Node::Operation { op, state, arguments, .. } => Some((*op, state, arguments)),
      _ => None,
    }
  }

  pub fn init(&self) -> Option<InitValue> {
    match self {
      Node::Variable { init, .. } => Some(init.borrow().clone()),
      _ => None,
    }
  }

  pub fn set_init(&self, value: InitValue) {
    match self {
      Node::Variable { init, .. } => *init.borrow_mut() = value,
      _ => debug_assert!(false, "set_init called on a node kind with no init slot"),
    }
  }

  /// The definition order used to sequence flow-variable emission (§4.5): `integrate`-typed
  /// operations are order `0` (stocks are initial-condition roots); constants are order `1`;
  /// everything else is one more than the maximum order of its wired arguments. Memoized per
  /// node. `max_order` bounds recursion depth against an integral-unbroken cycle.
  pub fn order(&self, max_order: i32) -> CompileResult<i32> {
    if let Some(cached) = self.core().cached_order() {
      return Ok(cached);
    }
    if max_order <= 0 {
      return Err(CompileError::MaxOrderRecursion { highlight: None });
    }

    let computed = match self {
      Node::Operation { op: OperatorKind::Integrate, .. } => 0,
      Node::Constant { .. } => 1,
      Node::Variable { rhs, .. } | Node::IntegralInput { rhs, .. } => match rhs.borrow().as_ref() {
        Some(r) => r.order(max_order - 1)?,
        None => 1,
      },
      Node::Operation { arguments, .. } => {
        let mut max_seen = 0;
        for port in arguments.borrow().iter() {
          for argument in port {
            max_seen = max_seen.max(argument.order(max_order - 1)?);
          }
        }
        max_seen
      }
      Node::GodleyColumn { credits, debits, .. } => {
        let mut max_seen = 0;
        for node in credits.iter().chain(debits.iter()) {
          max_seen = max_seen.max(node.order(max_order - 1)?);
        }
        max_seen
      }
    };

    self.core().set_cached_order(computed);
    Ok(computed)
  }
}

impl fmt::Debug for Node {
  // Deliberately shallow: `rhs`/`arguments` hold `Rc` children, and recursing through `Debug`
  // would both be noisy and, for a DAG with shared substructure, quadratic.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Node::Constant { value, .. } => f.debug_struct("Constant").field("value", value).finish(),
      Node::Variable { name, kind, .. } => {
        f.debug_struct("Variable").field("name", name).field("kind", kind).finish()
      }
      Node::IntegralInput { name, .. } => f.debug_struct("IntegralInput").field("name", name).finish(),
      Node::Operation { op, arguments, .. } => f
        .debug_struct("Operation")
        .field("op", op)
        .field("num_ports", &arguments.borrow().len())
        .finish(),
      Node::GodleyColumn { credits, debits, .. } => f
        .debug_struct("GodleyColumn")
        .field("num_credits", &credits.len())
        .field("num_debits", &debits.len())
        .finish(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn node_core_starts_unresolved() {
    let node = Node::new_constant(1.0);
    assert_eq!(node.core().result(), None);
    assert_eq!(node.core().cached_order(), None);
  }

  #[test]
  fn set_result_is_visible_through_shared_rc() {
    let node = Node::new_constant(1.0);
    let alias = Rc::clone(&node);
    node.core().set_result(SlotIndex::from_usize(2));
    assert_eq!(alias.core().result(), Some(SlotIndex::from_usize(2)));
  }

  #[test]
  fn rhs_round_trips_through_a_variable() {
    let var = Node::new_variable(
      IString::from("g:x"),
      IString::from("x"),
      VariableKind::Flow,
      InitValue::Number(0.0),
      None,
    );
    assert!(var.rhs().is_none());
    let constant = Node::new_constant(5.0);
    var.set_rhs(Rc::clone(&constant));
    assert!(Rc::ptr_eq(&var.rhs().unwrap(), &constant));
  }

  #[test]
  fn order_of_a_constant_is_one() {
    let c = Node::new_constant(1.0);
    assert_eq!(c.order(10).unwrap(), 1);
  }

  #[test]
  fn order_of_an_operation_is_one_plus_max_argument_order() {
    let a = Node::new_constant(1.0);
    let b = Node::new_variable(
      IString::from("g:b"),
      IString::from("b"),
      VariableKind::Flow,
      InitValue::Number(0.0),
      None,
    );
    // b has no rhs, so its own order is 1; the op's order should be 2.
    let op = Node::new_operation(OperatorKind::Add, OperatorState::default());
    if let Node::Operation { arguments, .. } = &*op {
      *arguments.borrow_mut() = vec![vec![a], vec![b]];
    }
    assert_eq!(op.order(10).unwrap(), 2);
  }

  #[test]
  fn order_is_memoized() {
    let c = Node::new_constant(1.0);
    assert_eq!(c.order(10).unwrap(), 1);
    assert_eq!(c.core().cached_order(), Some(1));
  }

  #[test]
  fn integrate_operation_has_order_zero() {
    let op = Node::new_operation(OperatorKind::Integrate, OperatorState::default());
    assert_eq!(op.order(10).unwrap(), 0);
  }

  #[test]
  fn unbroken_cycle_raises_max_order_recursion() {
    let a = Node::new_variable(
      IString::from("g:a"),
      IString::from("a"),
      VariableKind::Flow,
      InitValue::Number(0.0),
      None,
    );
    let b = Node::new_variable(
      IString::from("g:b"),
      IString::from("b"),
      VariableKind::Flow,
      InitValue::Number(0.0),
      None,
    );
    a.set_rhs(Rc::clone(&b));
    b.set_rhs(Rc::clone(&a));
    let err = a.order(5).unwrap_err();
    assert_eq!(err, CompileError::MaxOrderRecursion { highlight: None });
  }
}
