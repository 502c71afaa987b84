/*!

Lowers the ordered expression DAG into a flat [`EvalOp`] plan (§4.6, §4.7). Each node's
`add_eval_ops` binds its `NodeCore::result` slot exactly once per compile and is otherwise a
cache hit; the top-level [`populate_eval_op_vector`] drives that recursion over the orderer's
output and assembles the final [`EvalOpVector`].

*/

use dynamics_abs::tracing;

use crate::api::dag_builder::{RavelProjector, SystemOfEquations};
use crate::api::node::{Node, NodePtr};
use crate::core::error::{CompileError, CompileResult};
use crate::core::eval_op::{EvalOp, EvalOpVector, Integral};
use crate::core::operator::{OperatorKind, OperatorState};
use crate::core::value_registry::{AxisDescriptor, AxisLabelKind, InitValue, SlotIndex, ValueRegistry, VariableKind, VariableValue};

fn alloc_temp(sys: &mut SystemOfEquations) -> SlotIndex {
  let n = sys.temp_counter.get() + 1;
  sys.temp_counter.set(n);
  sys.registry.alloc_value(VariableValue::new(format!("temp:{n}"), VariableKind::TempFlow))
}

fn ensure_variable_slot(registry: &mut ValueRegistry, value_id: &str, kind: VariableKind) -> SlotIndex {
  if let Some(slot) = registry.lookup(value_id) {
    return slot;
  }
  registry.alloc_value(VariableValue::new(value_id, kind))
}

fn is_flow_slot(registry: &ValueRegistry, slot: SlotIndex) -> bool {
  registry.get(slot).is_flow_var()
}

/// Resolves the slot a freshly-computed node should write into: `target` if it names a flow slot,
/// else a fresh internal temporary (§4.6 "Else bind result").
fn resolve_slot(sys: &mut SystemOfEquations, target: Option<SlotIndex>) -> SlotIndex {
  match target {
    Some(slot) if is_flow_slot(&sys.registry, slot) => slot,
    _ => alloc_temp(sys),
  }
}

/// Inherits `x_vector` from the first operand that has a non-empty one, then narrows it to the
/// intersection (by axis name) with every other non-scalar operand. `None` signals a disjoint
/// intersection: the caller must emit no steps at all (§8 "Axis intersection").
fn conform_axes(registry: &ValueRegistry, operands: &[SlotIndex]) -> Option<Vec<AxisDescriptor>> {
  let mut base: Option<Vec<AxisDescriptor>> = None;
  for &slot in operands {
    let axes = &registry.get(slot).x_vector;
    if axes.is_empty() {
      continue;
    }
    match &mut base {
      None => base = Some(axes.clone()),
      Some(current) => {
        let narrowed: Vec<AxisDescriptor> =
          current.iter().filter(|axis| axes.iter().any(|other| other.name == axis.name)).cloned().collect();
        if narrowed.is_empty() {
          return None;
        }
        *current = narrowed;
      }
    }
  }
  Some(base.unwrap_or_default())
}

/// For `Subtract`/`Divide`, each of the two input ports is internally a sum (resp. a product) of
/// its own wires before the single binary step combines the two port-level aggregates — the
/// natural variadic extension of "one side of a binary op can itself be a fan-in". Every other
/// `is_cumulate` operator folds its single port directly with itself.
fn port_fold_kind(op: OperatorKind) -> OperatorKind {
  match op {
    OperatorKind::Subtract => OperatorKind::Add,
    OperatorKind::Divide => OperatorKind::Multiply,
    other => other,
  }
}

/// Folds `operands` with `fold_kind` into `dst`, applying the multiply-family short-circuit and
/// the add-family identity-skip (§4.6). Returns `true` if `dst` now holds a defined value for
/// this list (`false` when the list was empty and the caller must supply its own identity).
fn fold_into(fold_kind: OperatorKind, operands: &[SlotIndex], zero: SlotIndex, dst: SlotIndex, ev: &mut EvalOpVector) -> bool {
  if fold_kind.is_multiply_family() && operands.iter().any(|&s| s == zero) {
    ev.push(EvalOp::Copy { dst, src: zero });
    return true;
  }
  let filtered: Vec<SlotIndex> = if fold_kind.is_add_family() {
    operands.iter().copied().filter(|&s| s != zero).collect()
  } else {
    operands.to_vec()
  };
  if filtered.is_empty() {
    return false;
  }
  ev.push(EvalOp::Copy { dst, src: filtered[0] });
  for &operand in &filtered[1..] {
    ev.push(EvalOp::Op { kind: fold_kind, dst, src1: Some(dst), src2: Some(operand), state: OperatorState::default() });
  }
  true
}

/// Evaluates every argument node of a port, left to right, for its own natural slot (`target =
/// None` — an argument is read, never written into).
fn eval_port(sys: &mut SystemOfEquations, ev: &mut EvalOpVector, port: &[NodePtr]) -> CompileResult<Vec<SlotIndex>> {
  port.iter().map(|arg| add_eval_ops(arg, sys, ev, None)).collect()
}

/// The single entry point every DAG node (and the `SystemOfEquations` driver) goes through to
/// obtain a node's value slot, appending whatever `EvalOp`s are needed to make that slot correct.
pub fn add_eval_ops(node: &NodePtr, sys: &mut SystemOfEquations, ev: &mut EvalOpVector, target: Option<SlotIndex>) -> CompileResult<SlotIndex> {
  if let Some(result) = node.core().result() {
    if let Some(t) = target {
      if t != result && is_flow_slot(&sys.registry, t) {
        ev.push(EvalOp::Copy { dst: t, src: result });
      }
    }
    return Ok(result);
  }

  let result = match &**node {
    Node::Constant { value, .. } => {
      let v = value.0;
      if v == 0.0 {
        sys.registry.zero_slot()
      } else if v == 1.0 {
        sys.registry.one_slot()
      } else {
        let slot = resolve_slot(sys, target);
        ev.push(EvalOp::Constant { dst: slot, value: v });
        slot
      }
    }

    Node::Variable { value_id, kind, rhs, init, .. } => {
      let slot = ensure_variable_slot(&mut sys.registry, value_id.as_ref(), *kind);
      let rhs_node = rhs.borrow().clone();
      match rhs_node {
        Some(rhs_node) => {
          add_eval_ops(&rhs_node, sys, ev, Some(slot))?;
        }
        None => match kind {
          // A stock's value is owned and stepped by the integrator; the compiler never writes
          // to it directly (the Integral triple, not an EvalOp, is how it gets a derivative).
          VariableKind::Stock => {}
          _ => {
            if let InitValue::Number(n) = &*init.borrow() {
              ev.push(EvalOp::Constant { dst: slot, value: *n });
            }
          }
        },
      }
      slot
    }

    Node::IntegralInput { rhs, .. } => {
      let slot = resolve_slot(sys, target);
      let rhs_node = rhs.borrow().clone();
      match rhs_node {
        Some(rhs_node) => {
          add_eval_ops(&rhs_node, sys, ev, Some(slot))?;
        }
        // A stock with no wired derivative (and no Godley column) has a zero rate of change.
        None => ev.push(EvalOp::Constant { dst: slot, value: 0.0 }),
      }
      slot
    }

    Node::Operation { op, state, arguments, .. } => {
      let ports: Vec<Vec<NodePtr>> = arguments.borrow().clone();
      // A disjoint axis intersection (`None`) means this node contributes no internal
      // computation step of its own (§8 "axis intersection"), but a flow variable whose
      // defining wire is this node still needs its slot written — falling through to the
      // shared result-binding/post-step below with the canonical zero in place of a real
      // result satisfies that without inventing a bespoke step for "nothing to contribute".
      add_eval_ops_operation(*op, state, &ports, sys, ev, target)?.unwrap_or_else(|| sys.registry.zero_slot())
    }

    Node::GodleyColumn { credits, debits, .. } => {
      let ports = vec![credits.clone(), debits.clone()];
      add_eval_ops_binary_split(OperatorKind::Subtract, &OperatorState::default(), &ports, sys, ev, target)?
        .unwrap_or_else(|| sys.registry.zero_slot())
    }
  };

  node.core().set_result(result);
  if let Some(t) = target {
    if t != result && is_flow_slot(&sys.registry, t) {
      ev.push(EvalOp::Copy { dst: t, src: result });
    }
  }
  Ok(result)
}

fn add_eval_ops_operation(
  op: OperatorKind,
  state: &OperatorState,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<Option<SlotIndex>> {
  if op.is_comparison() {
    return add_eval_ops_comparison(op, ports, sys, ev, target).map(Some);
  }

  if op.is_binary_split() {
    return add_eval_ops_binary_split(op, state, ports, sys, ev, target);
  }

  if op.is_cumulate() {
    let flat: Vec<NodePtr> = ports.iter().flatten().cloned().collect();
    let operands = eval_port(sys, ev, &flat)?;
    let Some(_axes) = conform_axes(&sys.registry, &operands) else {
      tracing::trace!(op = %op, "disjoint operand axes; emitting no steps");
      return Ok(None);
    };
    let zero = sys.registry.zero_slot();
    let fold_kind = port_fold_kind(op);
    let slot = resolve_slot(sys, target);
    if !fold_into(fold_kind, &operands, zero, slot, ev) {
      let identity = if op.is_multiply_family() { 1.0 } else { 0.0 };
      ev.push(EvalOp::Constant { dst: slot, value: identity });
    }
    return Ok(Some(slot));
  }

  match op {
    OperatorKind::RunningSum | OperatorKind::RunningProduct => add_eval_ops_running(op, state, ports, sys, ev, target).map(Some),
    OperatorKind::Difference => add_eval_ops_difference(state, ports, sys, ev, target).map(Some),
    OperatorKind::Index | OperatorKind::Gather => add_eval_ops_index(op, state, ports, sys, ev, target).map(Some),
    OperatorKind::Ravel => add_eval_ops_ravel(ports, sys, ev, target).map(Some),
    OperatorKind::Data => add_eval_ops_data(ports, sys, ev, target).map(Some),
    OperatorKind::Differentiate | OperatorKind::Constant => {
      // Differentiate is lowered away at DAG-build time (§4.2); Constant is the deprecated
      // operator path, rejected before a Node::Operation of this kind can even be created.
      unreachable!("{op} never reaches code generation as a Node::Operation")
    }
    _ => add_eval_ops_generic(op, ports, sys, ev, target).map(Some),
  }
}

/// `<`, `<=`, `=`: exactly two ports, each optionally empty. A missing side is filled with a
/// zero-valued temporary whose units are copied from the present side, so unit-checking
/// (external) still sees a unit-compatible comparison.
fn add_eval_ops_comparison(
  op: OperatorKind,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let lhs_nodes = ports.first().cloned().unwrap_or_default();
  let rhs_nodes = ports.get(1).cloned().unwrap_or_default();

  let lhs_operands = eval_port(sys, ev, &lhs_nodes)?;
  let rhs_operands = eval_port(sys, ev, &rhs_nodes)?;
  let zero = sys.registry.zero_slot();

  let lhs = fold_single_side(&lhs_operands, zero, sys, ev);
  let rhs = fold_single_side(&rhs_operands, zero, sys, ev);

  let (lhs, rhs) = match (lhs, rhs) {
    (Some(l), Some(r)) => (l, r),
    (Some(l), None) => (l, zero_like(sys, ev, l)),
    (None, Some(r)) => (zero_like(sys, ev, r), r),
    (None, None) => (zero, zero),
  };

  let slot = resolve_slot(sys, target);
  ev.push(EvalOp::Op { kind: op, dst: slot, src1: Some(lhs), src2: Some(rhs), state: OperatorState::default() });
  Ok(slot)
}

fn fold_single_side(operands: &[SlotIndex], zero: SlotIndex, sys: &mut SystemOfEquations, ev: &mut EvalOpVector) -> Option<SlotIndex> {
  match operands {
    [] => None,
    [single] => Some(*single),
    _ => {
      let temp = alloc_temp(sys);
      fold_into(OperatorKind::Add, operands, zero, temp, ev);
      Some(temp)
    }
  }
}

/// A zero-valued temporary with `like`'s units, used to fill a comparison's empty side.
fn zero_like(sys: &mut SystemOfEquations, ev: &mut EvalOpVector, like: SlotIndex) -> SlotIndex {
  let units = sys.registry.get(like).units.clone();
  let slot = alloc_temp(sys);
  sys.registry.get_mut(slot).units = units;
  ev.push(EvalOp::Constant { dst: slot, value: 0.0 });
  slot
}

/// `Subtract`/`Divide` (and the Godley column, which is structurally identical: credits minus
/// debits) split across two ports: fold port 0 into the result, then combine with port 1 —
/// directly if it has one operand, otherwise fold port 1 into a temporary first (§4.6).
fn add_eval_ops_binary_split(
  op: OperatorKind,
  state: &OperatorState,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<Option<SlotIndex>> {
  let port0_nodes = ports.first().cloned().unwrap_or_default();
  let port1_nodes = ports.get(1).cloned().unwrap_or_default();

  let port0 = eval_port(sys, ev, &port0_nodes)?;
  let port1 = eval_port(sys, ev, &port1_nodes)?;

  let all: Vec<SlotIndex> = port0.iter().chain(port1.iter()).copied().collect();
  let Some(_axes) = conform_axes(&sys.registry, &all) else {
    tracing::trace!(op = %op, "disjoint operand axes; emitting no steps");
    return Ok(None);
  };

  if op == OperatorKind::Divide {
    let zero = sys.registry.zero_slot();
    if port1.iter().any(|&s| s == zero) {
      return Err(CompileError::DivideByConstantZero { highlight: None });
    }
  }

  let slot = resolve_slot(sys, target);
  let zero = sys.registry.zero_slot();
  let fold_kind = port_fold_kind(op);

  if port0.is_empty() && port1.is_empty() {
    let identity = if op == OperatorKind::Divide { 1.0 } else { 0.0 };
    ev.push(EvalOp::Constant { dst: slot, value: identity });
    return Ok(Some(slot));
  }

  if !fold_into(fold_kind, &port0, zero, slot, ev) {
    let identity = if fold_kind.is_multiply_family() { 1.0 } else { 0.0 };
    ev.push(EvalOp::Constant { dst: slot, value: identity });
  }

  match port1.len() {
    0 => {}
    1 => {
      ev.push(EvalOp::Op { kind: op, dst: slot, src1: Some(slot), src2: Some(port1[0]), state: state.clone() });
    }
    _ => {
      let temp = alloc_temp(sys);
      fold_into(fold_kind, &port1, zero, temp, ev);
      ev.push(EvalOp::Op { kind: op, dst: slot, src1: Some(slot), src2: Some(temp), state: state.clone() });
    }
  }

  Ok(Some(slot))
}

/// A highlighted variant of [`CompileError::IncorrectlyWired`] would need the originating
/// `ItemId`, which `NodeCore` does not carry (only the builder's cache does); an embedder wanting
/// highlight-quality diagnostics resolves it from the cache using the `ItemId` it built the node
/// with in the first place.
fn single_required_operand(ports: &[Vec<NodePtr>], sys: &mut SystemOfEquations, ev: &mut EvalOpVector) -> CompileResult<SlotIndex> {
  let flat: Vec<NodePtr> = ports.iter().flatten().cloned().collect();
  match flat.len() {
    1 => add_eval_ops(&flat[0], sys, ev, None),
    _ => Err(CompileError::IncorrectlyWired { highlight: None }),
  }
}

fn add_eval_ops_running(
  op: OperatorKind,
  state: &OperatorState,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let input = single_required_operand(ports, sys, ev)?;
  let x_vector = sys.registry.get(input).x_vector.clone();
  let slot = resolve_slot(sys, target);
  sys.registry.get_mut(slot).x_vector = x_vector;
  ev.push(EvalOp::Op { kind: op, dst: slot, src1: Some(input), src2: None, state: state.clone() });
  Ok(slot)
}

/// Builds the per-element `(current_index, lagged_index)` pairs a lagged self-subtraction along
/// one axis of length `axis_len` actually performs: a positive lag trims the leading slice (the
/// first `lag` elements have no earlier partner to subtract), a negative lag trims the trailing
/// slice, symmetrically. The returned list's length is always `axis_len - lag.unsigned_abs()` —
/// no out-of-bound pair is ever produced (§4.6 "discard out-of-bound index pairs").
fn difference_index_pairs(axis_len: usize, lag: i32) -> Vec<(usize, usize)> {
  if lag >= 0 {
    let lag = lag as usize;
    (lag..axis_len).map(|current| (current, current - lag)).collect()
  } else {
    let lag = lag.unsigned_abs() as usize;
    (0..axis_len - lag).map(|current| (current, current + lag)).collect()
  }
}

/// `difference(v, arg, axis)`: emitted as a lagged self-subtraction. `state` carries the lag and
/// axis; this function computes both the shrunk result `x_vector` and the literal per-element
/// index-pair list the plan carries (§4.6, §8 scenario 6) so a downstream evaluator needs no
/// further index arithmetic of its own.
fn add_eval_ops_difference(
  state: &OperatorState,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let input = single_required_operand(ports, sys, ev)?;
  let mut x_vector = sys.registry.get(input).x_vector.clone();

  // An axis name not present in the input is left unvalidated (§9 open question): fall back to
  // the input's total element count as the lag's reference length rather than guessing at a
  // specific axis to shrink.
  let axis_len = match x_vector.iter().find(|a| a.name == state.axis) {
    Some(axis) => axis.len,
    None => sys.registry.get(input).tensor_size(),
  };

  let lag = state.arg.unsigned_abs() as usize;
  if lag >= axis_len {
    return Err(CompileError::DifferenceArgumentTooLarge { highlight: None, axis_len, arg: state.arg });
  }

  if let Some(axis) = x_vector.iter_mut().find(|a| a.name == state.axis) {
    axis.len -= lag;
  }

  let index_pairs = difference_index_pairs(axis_len, state.arg);

  let slot = resolve_slot(sys, target);
  sys.registry.get_mut(slot).x_vector = x_vector;
  ev.push(EvalOp::Difference { dst: slot, src: input, index_pairs, state: state.clone() });
  Ok(slot)
}

fn add_eval_ops_index(
  op: OperatorKind,
  state: &OperatorState,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let input = single_required_operand(ports, sys, ev)?;
  let mut x_vector = sys.registry.get(input).x_vector.clone();
  if let Some(axis) = x_vector.iter_mut().find(|a| a.name == state.axis) {
    axis.label_kind = AxisLabelKind::Numeric;
  }
  let slot = resolve_slot(sys, target);
  sys.registry.get_mut(slot).x_vector = x_vector;
  ev.push(EvalOp::Op { kind: op, dst: slot, src1: Some(input), src2: None, state: state.clone() });
  Ok(slot)
}

fn add_eval_ops_ravel(
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let input = single_required_operand(ports, sys, ev)?;
  let input_axes = sys.registry.get(input).x_vector.clone();
  let projected = match sys.ravel_projector.clone() {
    Some(projector) => projector.project(&input_axes),
    None => input_axes,
  };
  let slot = resolve_slot(sys, target);
  sys.registry.get_mut(slot).x_vector = projected;
  ev.push(EvalOp::Ravel { dst: slot, src: input });
  Ok(slot)
}

fn add_eval_ops_data(
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let input = single_required_operand(ports, sys, ev)?;
  let slot = resolve_slot(sys, target);
  ev.push(EvalOp::Data { dst: slot, src: input });
  Ok(slot)
}

/// The arity fallback (§4.6 "Generic arity fallback"): every wired port must carry exactly one
/// operand; the resulting 0/1/2-ary operand list dispatches to the matching `EvalOp::Op` shape.
fn add_eval_ops_generic(
  op: OperatorKind,
  ports: &[Vec<NodePtr>],
  sys: &mut SystemOfEquations,
  ev: &mut EvalOpVector,
  target: Option<SlotIndex>,
) -> CompileResult<SlotIndex> {
  let mut operands = Vec::with_capacity(ports.len());
  for port in ports {
    match port.len() {
      0 => {}
      1 => operands.push(add_eval_ops(&port[0], sys, ev, None)?),
      _ => return Err(CompileError::MissingArgument { highlight: None }),
    }
  }
  if operands.len() > 2 {
    return Err(CompileError::TooManyArguments { highlight: None, arity: operands.len() });
  }
  let slot = resolve_slot(sys, target);
  ev.push(EvalOp::Op {
    kind: op,
    dst: slot,
    src1: operands.first().copied(),
    src2: operands.get(1).copied(),
    state: OperatorState::default(),
  });
  Ok(slot)
}

/// Top-level driver (§4.7): generates the full `EvalOp` plan for an already-built and
/// already-ordered [`SystemOfEquations`]. Node `result` caches are not reset between calls, so a
/// second call on the same instance would only emit the `Copy` steps for already-bound nodes, not
/// a complete plan — a fresh compile starts with a fresh `SystemOfEquations::new`.
pub fn populate_eval_op_vector(sys: &mut SystemOfEquations) -> CompileResult<EvalOpVector> {
  let mut ev = EvalOpVector::new();

  // Step 1: flow variables, producer-before-consumer order.
  let variables = sys.variables.clone();
  for node in &variables {
    let (value_id, kind) = match &**node {
      Node::Variable { value_id, kind, .. } => (value_id.clone(), *kind),
      _ => unreachable!("SystemOfEquations::variables only ever holds Variable nodes"),
    };
    let slot = ensure_variable_slot(&mut sys.registry, value_id.as_ref(), kind);
    add_eval_ops(node, sys, &mut ev, Some(slot))?;
    tracing::trace!(variable = %value_id, "flow variable steps emitted");
  }

  // Step 2: stocks and their integral inputs.
  let integration_variables = sys.integration_variables.clone();
  for (stock_node, integral_node) in &integration_variables {
    let value_id = stock_node.value_id().expect("integration_variables pairs a Variable stock").clone();
    let stock_slot = ensure_variable_slot(&mut sys.registry, value_id.as_ref(), VariableKind::Stock);
    let init = stock_node.init().unwrap_or_default();
    sys.registry.get_mut(stock_slot).init = init;
    add_eval_ops(stock_node, sys, &mut ev, Some(stock_slot))?;

    let input_slot = add_eval_ops(integral_node, sys, &mut ev, None)?;
    ev.integrals.push(Integral { stock_slot, int_op: stock_node.int_op(), input_slot });
    tracing::trace!(stock = %value_id, "integral triple emitted");
  }

  // Step 3: force every visual-sink input up to date.
  let sink_inputs = sys.sink_inputs.clone();
  for node in &sink_inputs {
    add_eval_ops(node, sys, &mut ev, None)?;
  }

  // Step 4: "publish to the owning operator's output port" (§4.6 post-step) is satisfied by
  // construction — every node's registry slot *is* its published output-port value here, via the
  // `NodeCore::result` cache set above; there is no separate output-port store to additionally
  // write.

  sys.registry.debug_assert_valid();
  Ok(ev)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::dag_builder::CompileOptions;
  use crate::model::{Group, ItemKind, Port};
  use dynamics_abs::IString;

  fn wire_value(group: &mut Group, value: f64) -> crate::model::ItemId {
    group.add_item(ItemKind::Constant { value })
  }

  #[test]
  fn simple_arithmetic_plan_orders_producer_before_consumer() {
    // A = 2 + 3*B; B = 5
    let mut group = Group::new("m");
    let b = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("B"), init: InitValue::Number(0.0) });
    let five = wire_value(&mut group, 5.0);
    group.add_wire(Port::output(five), Port::input(b, 1));

    let two = wire_value(&mut group, 2.0);
    let three = wire_value(&mut group, 3.0);
    let mul = group.add_item(ItemKind::Operation { op: OperatorKind::Multiply, state: OperatorState::default() });
    group.add_wire(Port::output(three), Port::input(mul, 1));
    group.add_wire(Port::output(b), Port::input(mul, 2));

    let a = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("A"), init: InitValue::Number(0.0) });
    let add = group.add_item(ItemKind::Operation { op: OperatorKind::Add, state: OperatorState::default() });
    group.add_wire(Port::output(two), Port::input(add, 1));
    group.add_wire(Port::output(mul), Port::input(add, 1));
    group.add_wire(Port::output(add), Port::input(a, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let ev = populate_eval_op_vector(&mut sys).unwrap();

    let b_slot = sys.registry.lookup("m:B").unwrap();
    let a_slot = sys.registry.lookup("m:A").unwrap();
    let b_write = ev.ops.iter().position(|op| op.dst() == b_slot).unwrap();
    let a_write = ev.ops.iter().position(|op| op.dst() == a_slot).unwrap();
    assert!(b_write < a_write, "B must be evaluated before A reads it");
  }

  #[test]
  fn single_integrator_yields_an_integral_triple() {
    let mut group = Group::new("m");
    let stock = group.add_item(ItemKind::Integrator { stock_name: IString::from("S") });
    let a = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("A"), init: InitValue::Number(0.0) });
    let one = wire_value(&mut group, 1.0);
    group.add_wire(Port::output(one), Port::input(a, 1));
    group.add_wire(Port::output(a), Port::input(stock, 1));
    let ten = wire_value(&mut group, 10.0);
    group.add_wire(Port::output(ten), Port::input(stock, 2));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let ev = populate_eval_op_vector(&mut sys).unwrap();

    assert_eq!(ev.integrals.len(), 1);
    let integral = ev.integrals[0];
    let stock_slot = sys.registry.lookup("m:S").unwrap();
    assert_eq!(integral.stock_slot, stock_slot);
    assert_eq!(sys.registry.get(stock_slot).init, InitValue::Number(10.0));
  }

  #[test]
  fn multiply_by_zero_short_circuits_to_a_copy() {
    let mut group = Group::new("m");
    let zero = wire_value(&mut group, 0.0);
    let x = wire_value(&mut group, 7.0);
    let mul = group.add_item(ItemKind::Operation { op: OperatorKind::Multiply, state: OperatorState::default() });
    group.add_wire(Port::output(zero), Port::input(mul, 1));
    group.add_wire(Port::output(x), Port::input(mul, 1));
    let out = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("out"), init: InitValue::Number(0.0) });
    group.add_wire(Port::output(mul), Port::input(out, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let ev = populate_eval_op_vector(&mut sys).unwrap();

    let out_slot = sys.registry.lookup("m:out").unwrap();
    let zero_slot = sys.registry.zero_slot();
    let writes: Vec<&EvalOp> = ev.ops.iter().filter(|op| op.dst() == out_slot).collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0], &EvalOp::Copy { dst: out_slot, src: zero_slot });
  }

  #[test]
  fn divide_by_a_zero_constant_is_an_error() {
    let mut group = Group::new("m");
    let x = wire_value(&mut group, 7.0);
    let zero = wire_value(&mut group, 0.0);
    let div = group.add_item(ItemKind::Operation { op: OperatorKind::Divide, state: OperatorState::default() });
    group.add_wire(Port::output(x), Port::input(div, 1));
    group.add_wire(Port::output(zero), Port::input(div, 2));
    let out = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("out"), init: InitValue::Number(0.0) });
    group.add_wire(Port::output(div), Port::input(out, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let err = populate_eval_op_vector(&mut sys).unwrap_err();
    assert_eq!(err, CompileError::DivideByConstantZero { highlight: None });
  }

  #[test]
  fn difference_past_the_axis_length_is_an_error() {
    let mut group = Group::new("m");
    let v = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("v"), init: InitValue::Number(0.0) });
    let five = wire_value(&mut group, 5.0);
    group.add_wire(Port::output(five), Port::input(v, 1));

    let state = OperatorState { axis: IString::from("t"), arg: 5, ..OperatorState::default() };
    let diff = group.add_item(ItemKind::Operation { op: OperatorKind::Difference, state: state.clone() });
    group.add_wire(Port::output(v), Port::input(diff, 1));
    let out = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("out"), init: InitValue::Number(0.0) });
    group.add_wire(Port::output(diff), Port::input(out, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    // Pre-allocate "m:v"'s slot so code generation's `ensure_variable_slot` reuses it instead of
    // creating a fresh, axis-less one.
    let v_slot = sys.registry.alloc_value(VariableValue::new("m:v", VariableKind::Flow));
    sys.registry.get_mut(v_slot).x_vector = vec![AxisDescriptor { name: IString::from("t"), label_kind: AxisLabelKind::Numeric, len: 5 }];
    let err = populate_eval_op_vector(&mut sys).unwrap_err();
    assert!(matches!(err, CompileError::DifferenceArgumentTooLarge { axis_len: 5, arg: 5, .. }));
  }

  #[test]
  fn difference_emits_the_literal_lagged_index_pairs() {
    let mut group = Group::new("m");
    let v = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("v"), init: InitValue::Number(0.0) });
    let five = wire_value(&mut group, 5.0);
    group.add_wire(Port::output(five), Port::input(v, 1));

    let state = OperatorState { axis: IString::from("t"), arg: 2, ..OperatorState::default() };
    let diff = group.add_item(ItemKind::Operation { op: OperatorKind::Difference, state: state.clone() });
    group.add_wire(Port::output(v), Port::input(diff, 1));
    let out = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("out"), init: InitValue::Number(0.0) });
    group.add_wire(Port::output(diff), Port::input(out, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let v_slot = sys.registry.alloc_value(VariableValue::new("m:v", VariableKind::Flow));
    sys.registry.get_mut(v_slot).x_vector = vec![AxisDescriptor { name: IString::from("t"), label_kind: AxisLabelKind::Numeric, len: 5 }];
    let ev = populate_eval_op_vector(&mut sys).unwrap();

    let out_slot = sys.registry.lookup("m:out").unwrap();
    let diff_op = ev.ops.iter().find(|op| op.dst() == out_slot).expect("a Difference op writing m:out");
    match diff_op {
      EvalOp::Difference { index_pairs, .. } => assert_eq!(index_pairs, &vec![(2, 0), (3, 1), (4, 2)]),
      other => panic!("expected EvalOp::Difference, got {other:?}"),
    }
    assert_eq!(sys.registry.get(out_slot).x_vector[0].len, 3);
  }

  #[test]
  fn disjoint_axis_operation_still_writes_its_flow_variable_target() {
    // `out = p + q` where p and q carry disjoint axes: the Add node itself contributes no
    // internal computation step, but `out`'s slot must still be written (§8 "every flow variable
    // with a defining wire gets at least one step writing its slot").
    let mut group = Group::new("m");
    let p = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("p"), init: InitValue::Number(0.0) });
    let q = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("q"), init: InitValue::Number(0.0) });
    let add = group.add_item(ItemKind::Operation { op: OperatorKind::Add, state: OperatorState::default() });
    group.add_wire(Port::output(p), Port::input(add, 1));
    group.add_wire(Port::output(q), Port::input(add, 1));
    let out = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("out"), init: InitValue::Number(0.0) });
    group.add_wire(Port::output(add), Port::input(out, 1));

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let p_slot = sys.registry.alloc_value(VariableValue::new("m:p", VariableKind::Flow));
    sys.registry.get_mut(p_slot).x_vector = vec![AxisDescriptor { name: IString::from("x"), label_kind: AxisLabelKind::Numeric, len: 3 }];
    let q_slot = sys.registry.alloc_value(VariableValue::new("m:q", VariableKind::Flow));
    sys.registry.get_mut(q_slot).x_vector = vec![AxisDescriptor { name: IString::from("y"), label_kind: AxisLabelKind::Numeric, len: 3 }];

    let ev = populate_eval_op_vector(&mut sys).unwrap();

    let out_slot = sys.registry.lookup("m:out").unwrap();
    let zero_slot = sys.registry.zero_slot();
    let writes: Vec<&EvalOp> = ev.ops.iter().filter(|op| op.dst() == out_slot).collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0], &EvalOp::Copy { dst: out_slot, src: zero_slot });
  }

  #[test]
  fn godley_column_evaluates_to_credits_minus_debits() {
    let mut group = Group::new("m");
    group.add_item(ItemKind::GodleyIcon {
      rows: vec![
        vec!["".into(), "Wages".into()],
        vec!["".into(), "salary".into()],
        vec!["".into(), "-0.5*tax".into()],
      ],
      initial_condition_row: None,
    });

    let mut sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let ev = populate_eval_op_vector(&mut sys).unwrap();

    let wages_slot = sys.registry.lookup("m:Wages").unwrap();
    assert!(ev.integrals.iter().any(|i| i.stock_slot == wages_slot));
  }
}
