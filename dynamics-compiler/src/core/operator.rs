/*!

The catalogue of operator kinds a visual operation item can carry, and the immutable snapshot of
an operator's UI-configured parameters the compiler takes at build time.

*/

use dynamics_abs::IString;

use crate::core::format::{FormatStyle, Formattable};
use crate::impl_display_debug_for_formattable;

/// Every operator kind the code generator knows how to lower. `Constant` is retained only to
/// recognize and reject the deprecated operator path (§7); literal constants are represented by
/// `Node::Constant`, not by an operation of this kind.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OperatorKind {
  Add,
  Subtract,
  Multiply,
  Divide,
  Min,
  Max,
  And,
  Or,
  Lt,
  Le,
  Eq,
  RunningSum,
  RunningProduct,
  Difference,
  Index,
  Gather,
  Ravel,
  Data,
  Differentiate,
  Integrate,
  /// Deprecated: a bare `constant` operation. See `CompileError::DeprecatedConstantOperator`.
  Constant,
}

impl OperatorKind {
  pub fn name_str(&self) -> &'static str {
    use OperatorKind::*;
    match self {
      Add            => "add",
      Subtract       => "subtract",
      Multiply       => "multiply",
      Divide         => "divide",
      Min            => "min",
      Max            => "max",
      And            => "and",
      Or             => "or",
      Lt             => "lt",
      Le             => "le",
      Eq             => "eq",
      RunningSum     => "runningSum",
      RunningProduct => "runningProduct",
      Difference     => "difference",
      Index          => "index",
      Gather         => "gather",
      Ravel          => "ravel",
      Data           => "data",
      Differentiate  => "differentiate",
      Integrate      => "integrate",
      Constant       => "constant",
    }
  }

  /// Operators folded by the variadic `cumulate` arithmetic routine (§4.6).
  pub fn is_cumulate(&self) -> bool {
    matches!(
      self,
      OperatorKind::Add
        | OperatorKind::Subtract
        | OperatorKind::Multiply
        | OperatorKind::Divide
        | OperatorKind::Min
        | OperatorKind::Max
        | OperatorKind::And
        | OperatorKind::Or
    )
  }

  /// Operators in the `multiply` family, whose fold short-circuits on a constant-zero operand.
  pub fn is_multiply_family(&self) -> bool {
    matches!(self, OperatorKind::Multiply | OperatorKind::Divide | OperatorKind::And)
  }

  /// Operators in the `add` family, whose fold skips identity (constant-zero) operands.
  pub fn is_add_family(&self) -> bool {
    matches!(self, OperatorKind::Add | OperatorKind::Subtract | OperatorKind::Or | OperatorKind::Max | OperatorKind::Min)
  }

  pub fn is_comparison(&self) -> bool {
    matches!(self, OperatorKind::Lt | OperatorKind::Le | OperatorKind::Eq)
  }

  /// Operators split across two input ports with a binary fold per port (§4.6).
  pub fn is_binary_split(&self) -> bool {
    matches!(self, OperatorKind::Subtract | OperatorKind::Divide)
  }
}

impl Formattable for OperatorKind {
  fn repr(&self, out: &mut dyn std::fmt::Write, _style: FormatStyle) -> std::fmt::Result {
    write!(out, "{}", self.name_str())
  }
}
impl_display_debug_for_formattable!(OperatorKind);

/// The direction a `runningSum`/`runningProduct` accumulates in.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Default)]
pub enum AccumulateDirection {
  #[default]
  Forward,
  Backward,
}

/// An immutable snapshot of the UI-configurable parameters of an operator, taken at compile
/// time. Runtime mutation of the originating visual item does not reach back into an already
/// compiled plan — invalidating the plan on such a change is the embedding application's
/// responsibility, not this crate's (§9).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperatorState {
  /// Axis name for `runningSum`/`runningProduct`/`difference`/`index`/`gather`.
  pub axis: IString,
  /// Lag (for `difference`) or other scalar integer parameter.
  pub arg: i32,
  pub direction: AccumulateDirection,
}
