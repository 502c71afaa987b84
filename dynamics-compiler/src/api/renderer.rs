/*!

Textual emitters (§4.8) over the same DAG [`crate::api::dag_builder::SystemOfEquations`] builds and
orders: a LaTeX-flavored typeset-math form and a procedural, MATLAB-style code form. Both are pure
text with no effect on the compiled plan, and dispatch per node-kind through the
[`Formattable`]/[`FormatStyle`] machinery the rest of this codebase already uses for this purpose.

*/

use std::fmt::Write;

use crate::api::dag_builder::SystemOfEquations;
use crate::api::node::Node;
use crate::core::format::{FormatStyle, Formattable};
use crate::core::operator::OperatorKind;
use crate::core::value_registry::InitValue;
use crate::impl_display_debug_for_formattable;

/// A node wrapped with the style it should render in, so `Formattable::repr` can be implemented
/// once per node kind instead of once per renderer.
struct RenderNode<'a> {
  node: &'a Node,
}

impl Formattable for RenderNode<'_> {
  fn repr(&self, out: &mut dyn Write, style: FormatStyle) -> std::fmt::Result {
    render_expression(self.node, out, style)
  }
}
impl_display_debug_for_formattable!(RenderNode<'_>);

fn render_expression(node: &Node, out: &mut dyn Write, style: FormatStyle) -> std::fmt::Result {
  match node {
    Node::Constant { value, .. } => write!(out, "{}", value.0),

    Node::Variable { name, rhs, .. } => match rhs.borrow().as_ref() {
      Some(rhs) => render_expression(rhs, out, style),
      None => write!(out, "{name}"),
    },

    Node::IntegralInput { rhs, .. } => match rhs.borrow().as_ref() {
      Some(rhs) => render_expression(rhs, out, style),
      None => write!(out, "0"),
    },

    Node::Operation { op, state, arguments, .. } => render_operation(*op, state, &arguments.borrow(), out, style),

    Node::GodleyColumn { credits, debits, .. } => {
      render_fold(OperatorKind::Add, credits, out, style)?;
      for node in debits {
        write!(out, " - ")?;
        render_expression(node, out, style)?;
      }
      Ok(())
    }
  }
}

fn render_fold(op: OperatorKind, operands: &[crate::api::node::NodePtr], out: &mut dyn Write, style: FormatStyle) -> std::fmt::Result {
  let joiner = infix_symbol(op, style);
  for (i, operand) in operands.iter().enumerate() {
    if i > 0 {
      write!(out, " {joiner} ")?;
    }
    render_expression(operand, out, style)?;
  }
  Ok(())
}

fn infix_symbol(op: OperatorKind, style: FormatStyle) -> &'static str {
  match (op, style) {
    (OperatorKind::Add, _) => "+",
    (OperatorKind::Subtract, _) => "-",
    (OperatorKind::Multiply, FormatStyle::Math) => r"\cdot",
    (OperatorKind::Multiply, _) => "*",
    (OperatorKind::Divide, _) => "/",
    (OperatorKind::And, FormatStyle::Math) => r"\wedge",
    (OperatorKind::And, _) => "&&",
    (OperatorKind::Or, FormatStyle::Math) => r"\vee",
    (OperatorKind::Or, _) => "||",
    (OperatorKind::Lt, _) => "<",
    (OperatorKind::Le, FormatStyle::Math) => r"\leq",
    (OperatorKind::Le, _) => "<=",
    (OperatorKind::Eq, _) => "==",
    _ => op.name_str(),
  }
}

fn render_operation(
  op: OperatorKind,
  state: &crate::core::operator::OperatorState,
  arguments: &[Vec<crate::api::node::NodePtr>],
  out: &mut dyn Write,
  style: FormatStyle,
) -> std::fmt::Result {
  let flat: Vec<crate::api::node::NodePtr> = arguments.iter().flatten().cloned().collect();

  if (op.is_cumulate() && !matches!(op, OperatorKind::Min | OperatorKind::Max)) || op.is_comparison() {
    return render_fold(op, &flat, out, style);
  }

  let call = match (op, style) {
    (OperatorKind::Min, FormatStyle::Math) => r"\min".to_string(),
    (OperatorKind::Max, FormatStyle::Math) => r"\max".to_string(),
    _ => op.name_str().to_string(),
  };
  write!(out, "{call}(")?;
  for (i, node) in flat.iter().enumerate() {
    if i > 0 {
      write!(out, ", ")?;
    }
    render_expression(node, out, style)?;
  }
  if matches!(op, OperatorKind::RunningSum | OperatorKind::RunningProduct | OperatorKind::Difference | OperatorKind::Index | OperatorKind::Gather)
    && !state.axis.is_empty()
  {
    write!(out, ", \"{}\"", state.axis)?;
  }
  write!(out, ")")
}

impl SystemOfEquations {
  /// LaTeX-flavored typeset math: one `name = rhs` line per flow variable, followed by
  /// `name(0) = init` and `\frac{d\,name}{dt} = rhs` per stock.
  pub fn render_latex(&self) -> String {
    self.render(FormatStyle::Math)
  }

  /// Procedural, MATLAB-style assignment statements for the same system.
  pub fn render_code(&self) -> String {
    self.render(FormatStyle::Code)
  }

  fn render(&self, style: FormatStyle) -> String {
    let mut out = String::new();

    for node in &self.variables {
      let Node::Variable { name, rhs, .. } = &**node else { continue };
      if rhs.borrow().is_none() {
        continue;
      }
      let _ = write_equation(&mut out, name.as_ref(), node, style);
    }

    for (stock, integral) in &self.integration_variables {
      let Node::Variable { name, init, .. } = &**stock else { continue };
      let init_text = match &*init.borrow() {
        InitValue::Number(n) => n.to_string(),
        InitValue::Name(id) => id.to_string(),
      };
      match style {
        FormatStyle::Math => {
          let _ = writeln!(out, r"{name}(0) = {init_text}");
          let _ = write!(out, r"\frac{{d\,{name}}}{{dt}} = ");
        }
        _ => {
          let _ = writeln!(out, "{name}_0 = {init_text};");
          let _ = write!(out, "d{name}_dt = ");
        }
      }
      let _ = render_expression(integral, &mut out, style);
      out.push('\n');
    }

    out
  }
}

fn write_equation(out: &mut String, name: &str, node: &Node, style: FormatStyle) -> std::fmt::Result {
  write!(out, "{name} = ")?;
  render_expression(node, out, style)?;
  out.push('\n');
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::dag_builder::CompileOptions;
  use crate::core::operator::OperatorState;
  use crate::core::value_registry::VariableKind;
  use crate::model::{Group, ItemKind, Port};
  use dynamics_abs::IString;

  fn wire_value(group: &mut Group, value: f64) -> crate::model::ItemId {
    group.add_item(ItemKind::Constant { value })
  }

  #[test]
  fn code_rendering_includes_each_flow_variable() {
    let mut group = Group::new("m");
    let b = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("B"), init: InitValue::Number(0.0) });
    let five = wire_value(&mut group, 5.0);
    group.add_wire(Port::output(five), Port::input(b, 1));

    let a = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("A"), init: InitValue::Number(0.0) });
    let add = group.add_item(ItemKind::Operation { op: OperatorKind::Add, state: OperatorState::default() });
    group.add_wire(Port::output(b), Port::input(add, 1));
    group.add_wire(Port::output(add), Port::input(a, 1));

    let sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let code = sys.render_code();
    assert!(code.contains("B = 5"));
    assert!(code.contains("A = B"));
  }

  #[test]
  fn latex_rendering_emits_a_derivative_line() {
    let mut group = Group::new("m");
    let stock = group.add_item(ItemKind::Integrator { stock_name: IString::from("S") });
    let a = group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("A"), init: InitValue::Number(0.0) });
    let one = wire_value(&mut group, 1.0);
    group.add_wire(Port::output(one), Port::input(a, 1));
    group.add_wire(Port::output(a), Port::input(stock, 1));
    let ten = wire_value(&mut group, 10.0);
    group.add_wire(Port::output(ten), Port::input(stock, 2));

    let sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    let latex = sys.render_latex();
    assert!(latex.contains(r"S(0) = 10"));
    assert!(latex.contains(r"\frac{d\,S}{dt} = A"));
  }

  #[test]
  fn variables_with_no_defining_wire_are_not_rendered_as_equations() {
    let mut group = Group::new("m");
    group.add_item(ItemKind::Variable { kind: VariableKind::Flow, name: IString::from("p"), init: InitValue::Number(7.0) });
    let sys = SystemOfEquations::new(&group, CompileOptions::default()).unwrap();
    assert!(!sys.render_code().contains("p ="));
  }
}
