/*!

The output of code generation: a flat, ordered plan of evaluation steps plus the list of
stock/integral pairings the integrator needs to step the system forward in time.

*/

use crate::core::operator::{OperatorKind, OperatorState};
use crate::core::value_registry::SlotIndex;

/// One record in the emitted plan. Every arithmetic/tensor step targets a single destination
/// slot; each record carries its originating operator's state so an integrator-side error can
/// still be traced back to the item that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum EvalOp {
  /// Copy the value of `src` into `dst`.
  Copy { dst: SlotIndex, src: SlotIndex },
  /// Write a literal constant into `dst`.
  Constant { dst: SlotIndex, value: f64 },
  /// Apply `kind` with up to two operands, writing the result to `dst`. Nullary operators (e.g.
  /// a zero-argument fold) leave both `src1`/`src2` as `None`.
  Op {
    kind: OperatorKind,
    dst: SlotIndex,
    src1: Option<SlotIndex>,
    src2: Option<SlotIndex>,
    state: OperatorState,
  },
  /// A lagged self-subtraction along one axis of `src` (§4.6 "difference"). `index_pairs[k] =
  /// (current_index, lagged_index)` names the pair of per-element positions along `state.axis`
  /// that the k-th output element subtracts — `dst[k] = src[current_index] - src[lagged_index]`.
  /// Out-of-bound pairs are never produced: the list's length is exactly the shrunk axis length.
  Difference {
    dst: SlotIndex,
    src: SlotIndex,
    index_pairs: Vec<(usize, usize)>,
    state: OperatorState,
  },
  /// Project `src`'s data cube through the (external) Ravel subsystem's current slice/pivot
  /// state into `dst`.
  Ravel { dst: SlotIndex, src: SlotIndex },
  /// Opaque single-input lookup into the (external) tensor library.
  Data { dst: SlotIndex, src: SlotIndex },
}

impl EvalOp {
  pub fn dst(&self) -> SlotIndex {
    match self {
      EvalOp::Copy { dst, .. }
      | EvalOp::Constant { dst, .. }
      | EvalOp::Op { dst, .. }
      | EvalOp::Difference { dst, .. }
      | EvalOp::Ravel { dst, .. }
      | EvalOp::Data { dst, .. } => *dst,
    }
  }
}

/// One `dstock/dt = input` pairing: `stock_slot` is the stock's own storage slot, `int_op`
/// identifies the integrator item that owns it (used only for error reporting; `None` for a
/// stock whose only definition is a Godley column, with no explicit integrator item), and
/// `input_slot` is the slot holding the evaluated derivative expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Integral {
  pub stock_slot: SlotIndex,
  pub int_op: Option<crate::model::ItemId>,
  pub input_slot: SlotIndex,
}

/// The full output of [`crate::api::code_gen::populate_eval_op_vector`].
#[derive(Clone, Debug, Default)]
pub struct EvalOpVector {
  pub ops: Vec<EvalOp>,
  pub integrals: Vec<Integral>,
}

impl EvalOpVector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    self.ops.clear();
    self.integrals.clear();
  }

  pub fn push(&mut self, op: EvalOp) {
    self.ops.push(op);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dst_extracts_the_target_slot() {
    let slot = SlotIndex::from_usize(3);
    let op = EvalOp::Constant { dst: slot, value: 1.0 };
    assert_eq!(op.dst(), slot);
  }

  #[test]
  fn difference_dst_extracts_the_target_slot() {
    let slot = SlotIndex::from_usize(5);
    let op = EvalOp::Difference {
      dst: slot,
      src: SlotIndex::from_usize(1),
      index_pairs: vec![(2, 0), (3, 1)],
      state: OperatorState::default(),
    };
    assert_eq!(op.dst(), slot);
  }

  #[test]
  fn clear_empties_both_lists() {
    let mut ev = EvalOpVector::new();
    ev.push(EvalOp::Constant { dst: SlotIndex::from_usize(0), value: 0.0 });
    ev.integrals.push(Integral {
      stock_slot: SlotIndex::from_usize(0),
      int_op: Some(crate::model::ItemId::new(0)),
      input_slot: SlotIndex::from_usize(1),
    });
    ev.clear();
    assert!(ev.ops.is_empty());
    assert!(ev.integrals.is_empty());
  }
}
