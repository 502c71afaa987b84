/*!

Walks a visual model and builds the expression DAG: [`SystemOfEquations::new`] is the compiler's
single entry point. Variables are registered in the cache *before* their defining expression is
resolved, so a forward or circular reference (broken, for stocks, by an
[`crate::api::node::Node::IntegralInput`] wrapper) resolves to a stable node identity instead of
recursing forever.

*/

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use dynamics_abs::{tracing, IString};

use crate::core::error::{CompileError, CompileResult};
use crate::core::operator::{OperatorKind, OperatorState};
use crate::core::value_registry::{AxisDescriptor, InitValue, ValueRegistry, VariableKind};
use crate::api::expression_cache::ExpressionCache;
use crate::api::godley::{is_skippable_header, strip_header_marker, FlowCoef};
use crate::api::node::{Node, NodePtr};
use crate::model::{Group, Item, ItemId, ItemKind, Port, Wire};

/// Ravel is an external tensor-slicing subsystem (§6); the compiler only needs to know how a
/// ravel projection reshapes the *metadata* (`x_vector`) of its input, not how to move the data
/// itself. Absent a projector, a ravel step passes its input's axes through unchanged.
pub trait RavelProjector {
  fn project(&self, input_axes: &[AxisDescriptor]) -> Vec<AxisDescriptor>;
}

/// Tunables passed explicitly to [`SystemOfEquations::new`] rather than read from global state
/// (§9 rejects a `minsky()`-style singleton).
pub struct CompileOptions<'hb> {
  /// Guards `Node::order`'s recursion against a cycle not broken by an integral.
  pub max_order: i32,
  /// Invoked periodically during long Godley/variable walks so an embedding event loop stays
  /// responsive. Has no semantic effect on the compiled plan.
  pub heartbeat: Option<&'hb dyn Fn()>,
  /// Consulted by code generation (§6) when lowering a `Ravel` operation. `None` passes tensor
  /// metadata through unchanged.
  pub ravel_projector: Option<Rc<dyn RavelProjector>>,
}

impl<'hb> Default for CompileOptions<'hb> {
  fn default() -> Self {
    Self { max_order: 1000, heartbeat: None, ravel_projector: None }
  }
}

impl<'hb> CompileOptions<'hb> {
  fn tick(&self) {
    if let Some(hb) = self.heartbeat {
      hb();
    }
  }
}

/// The compiled expression DAG plus the ordered lists code generation consumes: the topologically
/// sorted flow variables and the (stock, integral-input) pairs.
pub struct SystemOfEquations {
  pub(crate) cache: ExpressionCache,
  pub registry: ValueRegistry,
  /// Flow variables, sorted by ascending definition order after construction.
  pub variables: Vec<NodePtr>,
  /// `(stock, integral_input)` pairs, in discovery order.
  pub integration_variables: Vec<(NodePtr, NodePtr)>,
  /// Nodes feeding a visual sink (plot/sheet) input, discovered after ordering (§4.7 step 3):
  /// the code generator forces these up to date even though no flow variable reads them.
  pub(crate) sink_inputs: Vec<NodePtr>,
  pub(crate) max_order: i32,
  pub(crate) ravel_projector: Option<Rc<dyn RavelProjector>>,
  /// Counts internal temporaries allocated during code generation (§4.6).
  pub(crate) temp_counter: std::cell::Cell<u32>,
  used_names: HashSet<String>,
  processed_godley_columns: HashSet<IString>,
  deferred_integral_inputs: Vec<(NodePtr, Wire)>,
}

impl SystemOfEquations {
  pub fn new(group: &Group, options: CompileOptions<'_>) -> CompileResult<Self> {
    let mut sys = SystemOfEquations {
      cache: ExpressionCache::new(),
      registry: ValueRegistry::with_constants(),
      variables: Vec::new(),
      integration_variables: Vec::new(),
      sink_inputs: Vec::new(),
      max_order: options.max_order,
      ravel_projector: options.ravel_projector.clone(),
      temp_counter: std::cell::Cell::new(0),
      used_names: HashSet::new(),
      processed_godley_columns: HashSet::new(),
      deferred_integral_inputs: Vec::new(),
    };

    // Phase 1: integrators. Discover every stock, create its paired IntegralInput, and attempt
    // to resolve the derivative wire immediately.
    for item in &group.items {
      if let ItemKind::Integrator { stock_name } = &item.kind {
        tracing::trace!(item = item.id.raw(), stock = %stock_name, "building integrator");
        sys.build_integrator(group, item.id, stock_name)?;
        options.tick();
      }
    }

    // Phase 2: resolve derivative wires that forward-referenced a stock not yet built in phase 1.
    let deferred = std::mem::take(&mut sys.deferred_integral_inputs);
    for (integral_node, wire) in deferred {
      if integral_node.rhs().is_none() {
        if let Some(resolved) = sys.get_node_from_wire(group, &wire)? {
          integral_node.set_rhs(resolved);
        } else {
          tracing::warn!("integral input still unresolved after the deferred pass");
        }
      }
    }

    // Phase 3: Godley tables. Each column's integral input is set directly; this is also how a
    // Godley-only stock (no Integrator item at all) gets created.
    for item in &group.items {
      if let ItemKind::GodleyIcon { rows, initial_condition_row } = &item.kind {
        tracing::trace!(item = item.id.raw(), "processing Godley table");
        sys.process_godley_table(group, rows, *initial_condition_row)?;
        options.tick();
      }
    }

    // Phase 4: flow variables.
    for item in &group.items {
      if let ItemKind::Variable { kind: VariableKind::Flow, name, init } = &item.kind {
        let node = sys.make_dag_var(group, item.id, name.clone(), VariableKind::Flow, init.clone())?;
        sys.variables.push(node);
        options.tick();
      }
    }

    // Phase 5: order and stably sort the flow variables.
    let mut ordered = Vec::with_capacity(sys.variables.len());
    for node in &sys.variables {
      ordered.push((node.order(sys.max_order)?, node.clone()));
    }
    ordered.sort_by_key(|(order, _)| *order);
    sys.variables = ordered.into_iter().map(|(_, node)| node).collect();

    // Phase 6: visual sinks (plots, sheets) have no registry slot of their own, but the code
    // generator must still force every wire feeding one up to date (§4.7 step 3).
    for item in &group.items {
      if matches!(item.kind, ItemKind::Plot | ItemKind::Sheet) {
        let wires: Vec<Wire> = group.wires.iter().filter(|w| w.to.item == item.id).cloned().collect();
        for wire in &wires {
          if let Some(node) = sys.get_node_from_wire(group, wire)? {
            sys.sink_inputs.push(node);
          }
        }
      }
    }

    Ok(sys)
  }

  // region Integrators

  fn build_integrator(&mut self, group: &Group, item_id: ItemId, stock_name: &IString) -> CompileResult<()> {
    let value_id = group.scoped_name(stock_name);
    let stock_node = self.get_or_create_named(&value_id, stock_name.clone(), VariableKind::Stock);
    self.cache.insert(item_id, stock_node.clone());
    stock_node.set_int_op(item_id);

    let integral_node = self.get_or_create_integral_input(&value_id, stock_name.clone(), &stock_node);

    if integral_node.rhs().is_none() {
      if let Some(wire) = group.wires_into(Port::input(item_id, 1)).next().cloned() {
        match self.get_node_from_wire(group, &wire)? {
          Some(resolved) => integral_node.set_rhs(resolved),
          None => self.deferred_integral_inputs.push((integral_node.clone(), wire)),
        }
      }
    }

    if let Some(wire) = group.wires_into(Port::input(item_id, 2)).next().cloned() {
      let init = self.resolve_init_value(group, &wire, item_id)?;
      stock_node.set_init(init);
    }

    Ok(())
  }

  fn resolve_init_value(&self, group: &Group, wire: &Wire, highlight: ItemId) -> CompileResult<InitValue> {
    let source = group.item(wire.from.item).ok_or(CompileError::InvalidInitPort { highlight: Some(highlight) })?;
    match &source.kind {
      ItemKind::Constant { value } => Ok(InitValue::Number(*value)),
      ItemKind::Variable { name, .. } => Ok(InitValue::Name(group.scoped_name(name))),
      _ => Err(CompileError::InvalidInitPort { highlight: Some(highlight) }),
    }
  }

  // endregion

  // region Godley translation

  fn process_godley_table(
    &mut self,
    group: &Group,
    rows: &[Vec<String>],
    initial_condition_row: Option<usize>,
  ) -> CompileResult<()> {
    let Some(header_row) = rows.first() else { return Ok(()) };

    for col in 1..header_row.len() {
      let header = &header_row[col];
      if is_skippable_header(header) {
        continue;
      }
      let stock_name = strip_header_marker(header);
      let value_id = group.scoped_name(stock_name);
      if !self.processed_godley_columns.insert(value_id.clone()) {
        continue;
      }

      let mut credits = Vec::new();
      let mut debits = Vec::new();
      for (row_index, row) in rows.iter().enumerate().skip(1) {
        if Some(row_index) == initial_condition_row {
          continue;
        }
        let Some(cell) = row.get(col) else { continue };
        let Some(flow) = FlowCoef::parse(cell) else { continue };

        let flow_value_id = group.scoped_name(flow.name.as_ref());
        let flow_node = self.get_or_create_named(&flow_value_id, flow.name.clone(), VariableKind::Flow);

        let term = if (flow.coef.abs() - 1.0).abs() < f64::EPSILON {
          flow_node
        } else {
          let magnitude = Node::new_constant(flow.coef.abs());
          self.make_binary_op(OperatorKind::Multiply, magnitude, flow_node)
        };

        if flow.coef > 0.0 {
          credits.push(term);
        } else {
          debits.push(term);
        }
      }

      let column_node = self.cache.insert_anonymous(Node::new_godley_column(credits, debits));

      let stock_node = self.get_or_create_named(&value_id, IString::from(stock_name), VariableKind::Stock);
      let integral_node = self.get_or_create_integral_input(&value_id, IString::from(stock_name), &stock_node);
      integral_node.set_rhs(column_node);
    }

    Ok(())
  }

  // endregion

  // region Shared node construction

  /// Returns the existing node for `value_id` if one was created via any path (an earlier
  /// Godley reference, an earlier `make_dag_var` call, …), otherwise creates and registers a
  /// fresh `Variable` node. The caller is responsible for additionally keying it by `ItemId` via
  /// `self.cache.insert` when it corresponds to a concrete visual item.
  fn get_or_create_named(&mut self, value_id: &IString, name: IString, kind: VariableKind) -> NodePtr {
    if let Some(existing) = self.cache.lookup_named(value_id.as_ref()) {
      return existing;
    }
    let unique_name = self.uniquify_name(name.as_ref());
    let node = Node::new_variable(value_id.clone(), unique_name, kind, InitValue::default(), None);
    self.cache.insert_named(value_id.clone(), node.clone());
    node
  }

  fn get_or_create_integral_input(&mut self, value_id: &IString, stock_name: IString, stock_node: &NodePtr) -> NodePtr {
    if let Some(existing) = self.cache.get_integral_input(value_id.as_ref()) {
      return existing;
    }
    let node = Node::new_integral_input(stock_name);
    self.cache.insert_integral_input(value_id.clone(), node.clone());
    self.integration_variables.push((stock_node.clone(), node.clone()));
    node
  }

  fn uniquify_name(&mut self, name: &str) -> IString {
    if self.used_names.insert(name.to_string()) {
      return IString::from(name);
    }
    let mut suffix = 0u32;
    loop {
      let candidate = format!("{name}_{suffix}");
      if self.used_names.insert(candidate.clone()) {
        return IString::from(candidate.as_str());
      }
      suffix += 1;
    }
  }

  /// Builds (or returns the cached) node for the variable backing visual item `item_id`.
  /// Registers the item in the cache *before* resolving its defining wire, so a cyclic or
  /// forward reference to this same variable resolves to this node's identity instead of
  /// recursing forever.
  pub(crate) fn make_dag_var(
    &mut self,
    group: &Group,
    item_id: ItemId,
    name: IString,
    kind: VariableKind,
    init: InitValue,
  ) -> CompileResult<NodePtr> {
    if let Some(existing) = self.cache.lookup(item_id) {
      return Ok(existing);
    }

    if kind == VariableKind::Undefined {
      return Err(CompileError::UndefinedVariableType { highlight: Some(item_id) });
    }

    if kind == VariableKind::Constant {
      let value = match init {
        InitValue::Number(n) => n,
        InitValue::Name(_) => 0.0,
      };
      let node = Node::new_constant(value);
      self.cache.insert(item_id, node.clone());
      return Ok(node);
    }

    let value_id = group.scoped_name(name.as_ref());
    let node = self.get_or_create_named(&value_id, name, kind);
    self.cache.insert(item_id, node.clone());

    if kind != VariableKind::Integral {
      if let Some(wire) = group.wires_into(Port::input(item_id, 1)).next().cloned() {
        if let Some(rhs) = self.get_node_from_wire(group, &wire)? {
          node.set_rhs(rhs);
        }
      } else if !matches!(&init, InitValue::Number(n) if *n == 0.0) {
        node.set_init(init);
      }
    }

    Ok(node)
  }

  pub(crate) fn make_dag_op(
    &mut self,
    group: &Group,
    item_id: ItemId,
    op: OperatorKind,
    state: OperatorState,
  ) -> CompileResult<NodePtr> {
    if let Some(existing) = self.cache.lookup(item_id) {
      return Ok(existing);
    }

    if op == OperatorKind::Constant {
      return Err(CompileError::DeprecatedConstantOperator { highlight: Some(item_id) });
    }

    if op == OperatorKind::Differentiate {
      let wire = group
        .wires_into(Port::input(item_id, 1))
        .next()
        .cloned()
        .ok_or(CompileError::DerivativeNotWired { highlight: Some(item_id) })?;
      let input = self
        .get_node_from_wire(group, &wire)?
        .ok_or(CompileError::DerivativeNotWired { highlight: Some(item_id) })?;
      let result = self.differentiate_node(&input)?;
      self.cache.insert(item_id, result.clone());
      return Ok(result);
    }

    let node = Node::new_operation(op, state);
    self.cache.insert(item_id, node.clone());

    let max_port = group.wires.iter().filter(|w| w.to.item == item_id).map(|w| w.to.index).max().unwrap_or(0);

    let mut arguments = Vec::with_capacity(max_port as usize);
    for port_index in 1..=max_port {
      let wires: Vec<Wire> = group.wires_into(Port::input(item_id, port_index)).cloned().collect();
      let mut port_args = Vec::with_capacity(wires.len());
      for wire in &wires {
        if let Some(arg) = self.get_node_from_wire(group, wire)? {
          port_args.push(arg);
        }
      }
      arguments.push(port_args);
    }

    if let Node::Operation { arguments: cell, .. } = &*node {
      *cell.borrow_mut() = arguments;
    }

    Ok(node)
  }

  pub(crate) fn make_dag_switch(&mut self, group: &Group, item_id: ItemId, num_cases: usize) -> CompileResult<NodePtr> {
    if let Some(existing) = self.cache.lookup(item_id) {
      return Ok(existing);
    }
    if num_cases == 0 {
      return Err(CompileError::InputPortNotWired { highlight: Some(item_id) });
    }

    let selector_wire = group
      .wires_into(Port::input(item_id, 1))
      .next()
      .cloned()
      .ok_or(CompileError::InputPortNotWired { highlight: Some(item_id) })?;
    let selector = self
      .get_node_from_wire(group, &selector_wire)?
      .ok_or(CompileError::InputPortNotWired { highlight: Some(item_id) })?;

    let mut branches = Vec::with_capacity(num_cases);
    for case in 0..num_cases {
      let port_index = (case + 2) as u32;
      let wire = group
        .wires_into(Port::input(item_id, port_index))
        .next()
        .cloned()
        .ok_or(CompileError::InputPortNotWired { highlight: Some(item_id) })?;
      let branch = self
        .get_node_from_wire(group, &wire)?
        .ok_or(CompileError::InputPortNotWired { highlight: Some(item_id) })?;
      branches.push(branch);
    }

    // `thresholds[k-1]` is the node for `selector < k`, for k in 1..num_cases.
    let mut thresholds = Vec::with_capacity(num_cases.saturating_sub(1));
    for k in 1..num_cases {
      let k_const = Node::new_constant(k as f64);
      thresholds.push(self.make_binary_op(OperatorKind::Lt, selector.clone(), k_const));
    }

    let mut terms = Vec::with_capacity(num_cases);
    if num_cases == 1 {
      terms.push(branches[0].clone());
    } else {
      terms.push(self.make_binary_op(OperatorKind::Multiply, branches[0].clone(), thresholds[0].clone()));
      for i in 1..(num_cases - 1) {
        let step = self.make_binary_op(OperatorKind::Subtract, thresholds[i].clone(), thresholds[i - 1].clone());
        terms.push(self.make_binary_op(OperatorKind::Multiply, branches[i].clone(), step));
      }
      let one = Node::new_constant(1.0);
      let last_step = self.make_binary_op(OperatorKind::Subtract, one, thresholds[num_cases - 2].clone());
      terms.push(self.make_binary_op(OperatorKind::Multiply, branches[num_cases - 1].clone(), last_step));
    }

    let sum_node = Node::new_operation(OperatorKind::Add, OperatorState::default());
    if let Node::Operation { arguments, .. } = &*sum_node {
      *arguments.borrow_mut() = vec![terms];
    }
    self.cache.insert(item_id, sum_node.clone());
    Ok(sum_node)
  }

  /// Resolves a wire's source item to its cached node, building it on a cache miss. `None` if
  /// the source item doesn't exist, or is a sink (plot/sheet) rather than an expression source.
  pub(crate) fn get_node_from_wire(&mut self, group: &Group, wire: &Wire) -> CompileResult<Option<NodePtr>> {
    let item_id = wire.from.item;
    if let Some(existing) = self.cache.lookup(item_id) {
      return Ok(Some(existing));
    }
    let Some(item) = group.item(item_id) else { return Ok(None) };

    match item.kind.clone() {
      ItemKind::Variable { kind, name, init } => Ok(Some(self.make_dag_var(group, item_id, name, kind, init)?)),
      ItemKind::Constant { value } => {
        let node = Node::new_constant(value);
        self.cache.insert(item_id, node.clone());
        Ok(Some(node))
      }
      ItemKind::Operation { op, state } => Ok(Some(self.make_dag_op(group, item_id, op, state)?)),
      ItemKind::Switch { num_cases } => Ok(Some(self.make_dag_switch(group, item_id, num_cases)?)),
      // Built eagerly in phase 1/3; if it's still missing the source is effectively undefined.
      ItemKind::Integrator { .. } => Ok(self.cache.lookup(item_id)),
      ItemKind::GodleyIcon { .. } | ItemKind::Plot | ItemKind::Sheet => Ok(None),
    }
  }

  fn make_binary_op(&mut self, op: OperatorKind, a: NodePtr, b: NodePtr) -> NodePtr {
    let node = Node::new_operation(op, OperatorState::default());
    if let Node::Operation { arguments, .. } = &*node {
      *arguments.borrow_mut() = vec![vec![a], vec![b]];
    }
    self.cache.insert_anonymous(node)
  }

  /// Symbolic differentiation sufficient for the documented scope: constants, variables (via
  /// their paired `IntegralInput` when the variable is a stock, zero otherwise), and the
  /// arithmetic operators via the standard sum/product/quotient rules. Anything else is
  /// `CompileError::DerivativeNotWired` rather than a silent zero.
  fn differentiate_node(&mut self, node: &NodePtr) -> CompileResult<NodePtr> {
    match &**node {
      Node::Constant { .. } => Ok(Node::new_constant(0.0)),

      Node::Variable { value_id, kind, .. } => {
        if *kind == VariableKind::Stock {
          if let Some(integral) = self.cache.get_integral_input(value_id.as_ref()) {
            return Ok(integral);
          }
        }
        Ok(Node::new_constant(0.0))
      }

      Node::Operation { op, arguments, .. } => {
        match op {
          OperatorKind::Add | OperatorKind::Subtract => {
            let mut differentiated_ports = Vec::new();
            for port in arguments.borrow().iter() {
              let mut differentiated_port = Vec::with_capacity(port.len());
              for argument in port {
                differentiated_port.push(self.differentiate_node(argument)?);
              }
              differentiated_ports.push(differentiated_port);
            }
            let result = Node::new_operation(*op, OperatorState::default());
            if let Node::Operation { arguments, .. } = &*result {
              *arguments.borrow_mut() = differentiated_ports;
            }
            Ok(self.cache.insert_anonymous(result))
          }

          OperatorKind::Multiply => {
            let operands: Vec<NodePtr> = arguments.borrow().iter().flatten().cloned().collect();
            let [f, g] = operands.as_slice() else {
              return Err(CompileError::DerivativeNotWired { highlight: None });
            };
            let (f, g) = (f.clone(), g.clone());
            let df = self.differentiate_node(&f)?;
            let dg = self.differentiate_node(&g)?;
            let term1 = self.make_binary_op(OperatorKind::Multiply, df, g.clone());
            let term2 = self.make_binary_op(OperatorKind::Multiply, f, dg);
            Ok(self.make_binary_op(OperatorKind::Add, term1, term2))
          }

          OperatorKind::Divide => {
            let operands: Vec<NodePtr> = arguments.borrow().iter().flatten().cloned().collect();
            let [f, g] = operands.as_slice() else {
              return Err(CompileError::DerivativeNotWired { highlight: None });
            };
            let (f, g) = (f.clone(), g.clone());
            let df = self.differentiate_node(&f)?;
            let dg = self.differentiate_node(&g)?;
            let term1 = self.make_binary_op(OperatorKind::Multiply, df, g.clone());
            let term2 = self.make_binary_op(OperatorKind::Multiply, f, dg);
            let numerator = self.make_binary_op(OperatorKind::Subtract, term1, term2);
            let denominator = self.make_binary_op(OperatorKind::Multiply, g.clone(), g);
            Ok(self.make_binary_op(OperatorKind::Divide, numerator, denominator))
          }

          _ => Err(CompileError::DerivativeNotWired { highlight: None }),
        }
      }

      _ => Err(CompileError::DerivativeNotWired { highlight: None }),
    }
  }

  // endregion
}
