//! Cell evaluation: scope validation, binding, the rule pass, jumps.
//!
//! A cube without rule axes binds one column per axis and returns that cell.
//! A cube with rule axes walks every combination of candidate columns in
//! odometer order, the last axis spinning fastest. Rule conditions are
//! evaluated at most once per pass; a false condition skips the rest of
//! that combination, a complete combination executes its cell. The value
//! of the last executed cell is returned.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::axis::Axis;
use crate::cell::CellValue;
use crate::column::{Column, ColumnValue};
use crate::coordinate::{ColumnIdSet, Coordinate, TrackedInput};
use crate::cube::NCube;
use crate::error::{NCubeError, Result};
use crate::ids::ColumnId;
use crate::program::{CellProgram, Flow, ProgramContext};
use crate::stack::{EvalContext, Frame};
use crate::trace::{Binding, Output};
use crate::value::Value;

/// How one pass over the cube ended.
enum PassOutcome {
    Value(Value),
    Stopped(Value),
    Jumped(Coordinate),
}

/// Forces one axis to a given column, used by `get_map`.
#[derive(Clone, Copy)]
struct Pin {
    axis: usize,
    column: ColumnId,
}

/// Why a program is being run.
#[derive(Clone, Copy)]
enum Invocation<'k> {
    Condition,
    Cell(&'k ColumnIdSet),
}

impl NCube {
    /// Evaluate the cell at `input` in a fresh call context.
    ///
    /// Cross-cube references fail with `UnknownCube`; use
    /// [`get_cell_in`](Self::get_cell_in) with a resolver to follow them.
    pub fn get_cell(&self, input: &Coordinate, output: &mut Output) -> Result<Value> {
        let mut ctx = EvalContext::new();
        self.evaluate(input, output, &mut ctx, None)
    }

    /// As [`get_cell`](Self::get_cell), returning `default` where no cell exists.
    pub fn get_cell_with_default(
        &self,
        input: &Coordinate,
        output: &mut Output,
        default: impl Into<CellValue>,
    ) -> Result<Value> {
        let mut ctx = EvalContext::new();
        let default = default.into();
        self.evaluate(input, output, &mut ctx, Some(&default))
    }

    pub fn get_cell_in(&self, input: &Coordinate, output: &mut Output, ctx: &mut EvalContext<'_>) -> Result<Value> {
        self.evaluate(input, output, ctx, None)
    }

    pub(crate) fn evaluate(
        &self,
        input: &Coordinate,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
        default_override: Option<&CellValue>,
    ) -> Result<Value> {
        self.evaluate_pinned(input, output, ctx, default_override, None)
    }

    fn evaluate_pinned(
        &self,
        input: &Coordinate,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
        default_override: Option<&CellValue>,
        pin: Option<Pin>,
    ) -> Result<Value> {
        let mut current = input.clone();
        loop {
            self.validate_scope(&current)?;
            let tracked = TrackedInput::new(current);
            let outcome = if self.has_rule_axis() {
                self.run_rules(&tracked, output, ctx, default_override, pin)
            } else {
                self.run_flat(&tracked, output, ctx, default_override, pin)
            };
            output.rule_info.note_keys(tracked.keys_read());

            match outcome? {
                PassOutcome::Value(v) => return Ok(v),
                PassOutcome::Stopped(v) => {
                    output.rule_info.rule_stopped = true;
                    return Ok(v);
                }
                PassOutcome::Jumped(next) => {
                    output.rule_info.jump_count += 1;
                    debug!(cube = %self.name, from = %tracked.coordinate(), to = %next, "jump");
                    current = next;
                }
            }
        }
    }

    fn validate_scope(&self, input: &Coordinate) -> Result<()> {
        let missing: Vec<String> = self
            .required_scope()
            .into_iter()
            .filter(|key| !input.contains_key(key))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(NCubeError::MissingScope {
                cube: self.name.clone(),
                missing,
            })
        }
    }

    fn bind_axis<'c>(&'c self, axis: &'c Axis, input: &TrackedInput) -> Result<&'c Column> {
        let value = input.get(axis.name()).cloned().unwrap_or(Value::Null);
        match axis.find_column(&value)? {
            Some(column) => Ok(column),
            None => Err(NCubeError::CoordinateNotFound {
                cube: self.name.clone(),
                axis: Some(axis.name().to_string()),
                value: Some(value.to_string()),
                message: format!("value '{value}' not found on axis '{}'", axis.name()),
                chain: None,
            }),
        }
    }

    fn pinned<'c>(&'c self, axis_idx: usize, pin: Option<Pin>) -> Result<Option<&'c Column>> {
        match pin {
            Some(p) if p.axis == axis_idx => self.axes[axis_idx]
                .get_column(p.column)
                .map(Some)
                .ok_or_else(|| NCubeError::IllegalState(format!("pinned column {} vanished", p.column))),
            _ => Ok(None),
        }
    }

    fn run_flat(
        &self,
        input: &TrackedInput,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
        default_override: Option<&CellValue>,
        pin: Option<Pin>,
    ) -> Result<PassOutcome> {
        let mut binding = Binding::new(&self.name, ctx.depth());
        let mut key = ColumnIdSet::new();
        for (i, axis) in self.axes.iter().enumerate() {
            let column = match self.pinned(i, pin)? {
                Some(c) => c,
                None => self.bind_axis(axis, input)?,
            };
            key.insert(column.id());
            binding.bind(axis.name(), column.clone());
        }

        let cell = self
            .cells
            .get(&key)
            .or(self.default_cell_value.as_ref())
            .or(default_override)
            .ok_or_else(|| {
                NCubeError::coordinate_not_found(
                    &self.name,
                    None,
                    format!("no cell at {} and no default value", input.coordinate()),
                )
            })?;

        match self.execute_cell(cell, &key, input, output, ctx)? {
            Flow::Value(v) => {
                binding.value = Some(v.clone());
                output.rule_info.push(binding);
                Ok(PassOutcome::Value(v))
            }
            Flow::Stop => {
                output.rule_info.push(binding);
                Ok(PassOutcome::Stopped(Value::Null))
            }
            Flow::Jump(next) => {
                output.rule_info.push(binding);
                Ok(PassOutcome::Jumped(next))
            }
        }
    }

    /// Candidate columns per axis for a rule pass.
    fn rule_candidates<'c>(&'c self, input: &TrackedInput, pin: Option<Pin>) -> Result<Vec<Vec<&'c Column>>> {
        let mut candidates = Vec::with_capacity(self.axes.len());
        for (i, axis) in self.axes.iter().enumerate() {
            if let Some(column) = self.pinned(i, pin)? {
                candidates.push(vec![column]);
                continue;
            }
            if !axis.is_rule() {
                candidates.push(vec![self.bind_axis(axis, input)?]);
                continue;
            }
            let start = match input.get(axis.name()) {
                Some(Value::String(name)) => Some(name.as_str()),
                Some(Value::Null) | None => None,
                Some(other) => {
                    return Err(NCubeError::invalid(format!(
                        "rule axis '{}' takes a rule name to start from, got {other}",
                        axis.name()
                    )))
                }
            };
            let mut columns = axis.rule_columns_starting_at(start).ok_or_else(|| NCubeError::CoordinateNotFound {
                cube: self.name.clone(),
                axis: Some(axis.name().to_string()),
                value: start.map(str::to_string),
                message: format!("no rule named '{}' on axis '{}'", start.unwrap_or_default(), axis.name()),
                chain: None,
            })?;
            columns.extend(axis.default_column());
            if columns.is_empty() {
                return Err(NCubeError::NoConditionsFired {
                    cube: self.name.clone(),
                    axis: axis.name().to_string(),
                    chain: None,
                });
            }
            candidates.push(columns);
        }
        Ok(candidates)
    }

    fn run_rules(
        &self,
        input: &TrackedInput,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
        default_override: Option<&CellValue>,
        pin: Option<Pin>,
    ) -> Result<PassOutcome> {
        let depth = ctx.depth();
        let mut candidates = self.rule_candidates(input, pin)?;
        let n = candidates.len();
        let mut counters = vec![1usize; n];
        let mut fired = vec![0usize; n];
        let mut conditions: HashMap<ColumnId, bool> = HashMap::new();
        let mut last: Option<Value> = None;

        loop {
            let mut binding = Binding::new(&self.name, depth);
            let mut key = ColumnIdSet::new();
            let mut complete = true;

            for i in 0..n {
                let axis = &self.axes[i];
                let column = candidates[i][counters[i] - 1];
                if axis.is_rule() {
                    let truthy = match conditions.get(&column.id()) {
                        Some(&t) => t,
                        None => {
                            let t = if column.is_default() {
                                fired[i] == 0
                            } else {
                                match self.evaluate_condition(column, input, output, ctx)? {
                                    Flow::Value(v) => v.is_truthy(),
                                    Flow::Stop => {
                                        return Ok(PassOutcome::Stopped(last.unwrap_or(Value::Null)))
                                    }
                                    Flow::Jump(next) => return Ok(PassOutcome::Jumped(next)),
                                }
                            };
                            output.rule_info.conditions_evaluated += 1;
                            conditions.insert(column.id(), t);
                            trace!(cube = %self.name, axis = axis.name(), rule = %column, fired = t, "condition");
                            if t {
                                fired[i] += 1;
                                if !axis.fire_all() {
                                    candidates[i] = vec![column];
                                    counters[i] = 1;
                                }
                            }
                            t
                        }
                    };
                    if !truthy {
                        complete = false;
                        break;
                    }
                }
                key.insert(column.id());
                binding.bind(axis.name(), column.clone());
            }

            if complete {
                let cell = self
                    .cells
                    .get(&key)
                    .or(self.default_cell_value.as_ref())
                    .or(default_override);
                let flow = match cell {
                    Some(cell) => self.execute_cell(cell, &key, input, output, ctx)?,
                    None => Flow::Value(Value::Null),
                };
                match flow {
                    Flow::Value(v) => {
                        binding.value = Some(v.clone());
                        output.rule_info.push(binding);
                        last = Some(v);
                    }
                    Flow::Stop => {
                        output.rule_info.push(binding);
                        return Ok(PassOutcome::Stopped(last.unwrap_or(Value::Null)));
                    }
                    Flow::Jump(next) => {
                        output.rule_info.push(binding);
                        return Ok(PassOutcome::Jumped(next));
                    }
                }
            }

            if !advance(&mut counters, &candidates) {
                break;
            }
        }

        for (i, axis) in self.axes.iter().enumerate() {
            if axis.is_rule() && fired[i] == 0 {
                return Err(NCubeError::NoConditionsFired {
                    cube: self.name.clone(),
                    axis: axis.name().to_string(),
                    chain: None,
                });
            }
        }

        let value = last.unwrap_or_else(|| {
            self.default_cell_value
                .as_ref()
                .or(default_override)
                .and_then(CellValue::to_value)
                .unwrap_or(Value::Null)
        });
        Ok(PassOutcome::Value(value))
    }

    fn evaluate_condition(
        &self,
        column: &Column,
        input: &TrackedInput,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Flow> {
        match column.value() {
            ColumnValue::Rule(program) => {
                self.execute_program(program.as_ref(), Invocation::Condition, input, output, ctx)
            }
            other => Err(NCubeError::IllegalState(format!(
                "{} column on rule axis of cube '{}'",
                other.kind(),
                self.name
            ))),
        }
    }

    fn execute_cell(
        &self,
        cell: &CellValue,
        key: &ColumnIdSet,
        input: &TrackedInput,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Flow> {
        match cell {
            CellValue::Program(program) => {
                self.execute_program(program.as_ref(), Invocation::Cell(key), input, output, ctx)
            }
            other => Ok(Flow::Value(other.to_value().unwrap_or(Value::Null))),
        }
    }

    fn execute_program(
        &self,
        program: &dyn CellProgram,
        invocation: Invocation<'_>,
        input: &TrackedInput,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Flow> {
        let cache_key = match invocation {
            Invocation::Cell(key) if program.is_cacheable() && ctx.config().cache_program_results => Some(key),
            _ => None,
        };
        if let Some(value) = cache_key.and_then(|k| self.results.get(k)) {
            return Ok(Flow::Value(value));
        }

        let advised = matches!(invocation, Invocation::Cell(_));
        if advised {
            for advice in self.advice.values() {
                if !advice.before(self, input.coordinate(), output) {
                    debug!(cube = %self.name, advice = advice.name(), "advice skipped cell");
                    return Ok(Flow::Value(Value::Null));
                }
            }
        }

        ctx.push(Frame::new(&self.name, input.coordinate().clone()))?;
        let result = {
            let mut pctx = ProgramContext::new(input, output, self, ctx);
            program.execute(&mut pctx)
        };
        let chain = ctx.chain();
        ctx.pop();

        let flow = result.map_err(|err| self.program_error(err, input, chain))?;

        if let Flow::Value(value) = &flow {
            if advised {
                for advice in self.advice.values() {
                    advice.after(self, input.coordinate(), output, value);
                }
            }
            if let Some(key) = cache_key {
                return Ok(Flow::Value(self.results.publish(key, value.clone())));
            }
        }
        Ok(flow)
    }

    /// Engine errors pass through, picking up the call chain if they are
    /// binding failures without one. Anything else becomes a command error.
    fn program_error(&self, err: anyhow::Error, input: &TrackedInput, chain: Vec<String>) -> NCubeError {
        match err.downcast::<NCubeError>() {
            Ok(inner) => inner.with_chain(chain),
            Err(source) => NCubeError::CommandExecution {
                cube: self.name.clone(),
                coordinate: input.coordinate().to_string(),
                chain,
                source,
            },
        }
    }

    // ─── maps and membership ──────────────────────────────────

    /// Evaluate every column of one wildcard axis.
    ///
    /// Exactly one axis in `input` must carry a list: the columns to visit,
    /// or every column when the list is empty. Rule axes cannot be the
    /// wildcard. Returns `(column value, cell value)` pairs in presentation
    /// order; missing cells read as `Null`.
    pub fn get_map(&self, input: &Coordinate, output: &mut Output) -> Result<Vec<(Value, Value)>> {
        let mut ctx = EvalContext::new();
        self.get_map_in(input, output, &mut ctx)
    }

    pub fn get_map_in(
        &self,
        input: &Coordinate,
        output: &mut Output,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Vec<(Value, Value)>> {
        let wildcards: Vec<usize> = self
            .axes
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(input.get(a.name()), Some(Value::List(_))))
            .map(|(i, _)| i)
            .collect();
        let [axis_idx] = wildcards.as_slice() else {
            return Err(NCubeError::invalid(format!(
                "get_map on cube '{}' needs exactly one wildcard axis, found {}",
                self.name,
                wildcards.len()
            )));
        };
        let axis = &self.axes[*axis_idx];
        if axis.is_rule() {
            return Err(NCubeError::invalid(format!(
                "rule axis '{}' cannot be a get_map wildcard",
                axis.name()
            )));
        }

        let wanted = match input.get(axis.name()) {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        let columns: Vec<&Column> = if wanted.is_empty() {
            axis.columns().collect()
        } else {
            let mut picked: Vec<&Column> = Vec::new();
            for v in &wanted {
                if let Some(c) = axis.find_column(v)? {
                    if !picked.contains(&c) {
                        picked.push(c);
                    }
                }
            }
            picked
        };

        let null_cell = CellValue::Scalar(Value::Null);
        let mut result = Vec::with_capacity(columns.len());
        for column in columns {
            let pin = Pin {
                axis: *axis_idx,
                column: column.id(),
            };
            let value = self.evaluate_pinned(input, output, ctx, Some(&null_cell), Some(pin))?;
            result.push((column.value().to_value(), value));
        }
        Ok(result)
    }

    /// True when `input` binds to a stored cell, or to the default value
    /// when `use_default` is set.
    pub fn contains_cell(&self, input: &Coordinate, use_default: bool) -> bool {
        match self.get_coordinate_key(input) {
            Ok(key) => self.cells.contains_key(&key) || (use_default && self.default_cell_value.is_some()),
            Err(_) => false,
        }
    }
}

/// Step the odometer: last axis fastest. False once every combination was visited.
fn advance(counters: &mut [usize], candidates: &[Vec<&Column>]) -> bool {
    for i in (0..counters.len()).rev() {
        if counters[i] < candidates[i].len() {
            counters[i] += 1;
            return true;
        }
        counters[i] = 1;
    }
    false
}
