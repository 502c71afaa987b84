/*!

Foundational types shared by the `api` layer: the value-slot arena, the evaluation-plan record
types, the error enum, and the display/formatting infrastructure.

*/

pub mod error;
pub mod format;
pub mod operator;
pub mod value_registry;
pub mod eval_op;
