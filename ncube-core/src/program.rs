//! Executable cell contents and rule conditions.
//!
//! A program is anything implementing [`CellProgram`]. The engine hands it a
//! [`ProgramContext`] exposing the tracked input, the shared [`Output`], the
//! owning cube and the call context; the program answers with a [`Flow`]:
//! a value, a stop signal, or a jump to a new coordinate.
//!
//! Three kinds ship with the crate:
//!
//! - `closure`: native Rust closures registered in a [`ProgramLibrary`] under
//!   a label, persisted by that label.
//! - `ref`: `@Cube[input]`, evaluate another cube with the same input.
//! - anything else hydrates as an [`OpaqueProgram`] that keeps its source for
//!   hashing and round-tripping but fails when executed.

use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::coordinate::{ci_eq, Coordinate, TrackedInput};
use crate::cube::NCube;
use crate::error::{NCubeError, Result};
use crate::registry::ProgramCache;
use crate::stack::EvalContext;
use crate::trace::Output;
use crate::value::Value;

pub const KIND_CLOSURE: &str = "closure";
pub const KIND_REF: &str = "ref";

/// What a program asks the engine to do next.
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    Value(Value),
    /// Abort the rest of the current rule pass without error.
    Stop,
    /// Restart evaluation with the given input.
    Jump(Coordinate),
}

impl From<Value> for Flow {
    fn from(v: Value) -> Self {
        Flow::Value(v)
    }
}

/// Persistable description of a program.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cacheable: bool,
}

impl ProgramSpec {
    pub fn new(kind: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: Some(source.into()),
            url: None,
            cacheable: false,
        }
    }

    /// Key under which the compiled form is cached.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind,
            self.url.as_deref().unwrap_or(""),
            self.source.as_deref().unwrap_or(""),
            self.cacheable
        )
    }
}

pub trait CellProgram: Send + Sync + fmt::Debug {
    fn kind(&self) -> &str;

    fn execute(&self, ctx: &mut ProgramContext<'_, '_>) -> anyhow::Result<Flow>;

    /// Cacheable programs are run once per cell; later reads reuse the result.
    fn is_cacheable(&self) -> bool {
        false
    }

    fn source_text(&self) -> Option<&str> {
        None
    }

    fn source_url(&self) -> Option<&str> {
        None
    }

    fn spec(&self) -> ProgramSpec {
        ProgramSpec {
            kind: self.kind().to_string(),
            source: self.source_text().map(str::to_string),
            url: self.source_url().map(str::to_string),
            cacheable: self.is_cacheable(),
        }
    }
}

// ─── Context ──────────────────────────────────────────────────

/// Everything a running program may touch.
pub struct ProgramContext<'a, 'r> {
    input: &'a TrackedInput,
    output: &'a mut Output,
    cube: &'a NCube,
    eval: &'a mut EvalContext<'r>,
}

impl<'a, 'r> ProgramContext<'a, 'r> {
    pub(crate) fn new(
        input: &'a TrackedInput,
        output: &'a mut Output,
        cube: &'a NCube,
        eval: &'a mut EvalContext<'r>,
    ) -> Self {
        Self {
            input,
            output,
            cube,
            eval,
        }
    }

    /// Read an input key. The read is recorded in the rule trace.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// Input value or `Null`.
    pub fn input_or_null(&self, key: &str) -> Value {
        self.input(key).cloned().unwrap_or(Value::Null)
    }

    /// Untracked copy of the whole input, for building jump targets.
    pub fn input_coordinate(&self) -> &Coordinate {
        self.input.coordinate()
    }

    pub fn output(&mut self) -> &mut Output {
        &mut *self.output
    }

    pub fn cube(&self) -> &NCube {
        self.cube
    }

    pub fn depth(&self) -> usize {
        self.eval.depth()
    }

    pub fn call_chain(&self) -> Vec<String> {
        self.eval.chain()
    }

    /// Evaluate another cube, resolved through the call context.
    ///
    /// The callee shares this call's output and stack.
    pub fn get_cell(&mut self, cube_name: &str, input: &Coordinate) -> Result<Value> {
        let target = if ci_eq(cube_name, self.cube.name()) {
            None
        } else {
            Some(self.eval.resolve(cube_name)?)
        };
        let cube = target.as_deref().unwrap_or(self.cube);
        cube.evaluate(input, &mut *self.output, &mut *self.eval, None)
    }

    /// Evaluate this cube again at another coordinate.
    pub fn get_local(&mut self, input: &Coordinate) -> Result<Value> {
        self.cube
            .evaluate(input, &mut *self.output, &mut *self.eval, None)
    }
}

// ─── Built-in programs ────────────────────────────────────────

type ProgramFn = dyn Fn(&mut ProgramContext<'_, '_>) -> anyhow::Result<Flow> + Send + Sync;

/// A native closure. Persists as its label.
#[derive(Clone)]
pub struct ClosureProgram {
    label: String,
    cacheable: bool,
    body: Arc<ProgramFn>,
}

impl ClosureProgram {
    pub fn new<F>(label: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ProgramContext<'_, '_>) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            cacheable: false,
            body: Arc::new(body),
        }
    }

    /// Closure returning a plain value.
    pub fn value<F, V>(label: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut ProgramContext<'_, '_>) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self::new(label, move |ctx| Ok(Flow::Value(body(ctx).into())))
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn with_cacheable(&self, cacheable: bool) -> Self {
        Self {
            label: self.label.clone(),
            cacheable,
            body: Arc::clone(&self.body),
        }
    }
}

impl fmt::Debug for ClosureProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureProgram")
            .field("label", &self.label)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl CellProgram for ClosureProgram {
    fn kind(&self) -> &str {
        KIND_CLOSURE
    }

    fn execute(&self, ctx: &mut ProgramContext<'_, '_>) -> anyhow::Result<Flow> {
        (self.body)(ctx)
    }

    fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    fn source_text(&self) -> Option<&str> {
        Some(&self.label)
    }
}

static REF_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*@?([\w.]+)").expect("cube reference pattern")
});

/// `@Cube[input]`: evaluate `Cube` with the caller's input.
#[derive(Clone, Debug)]
pub struct ReferenceProgram {
    cube: String,
    source: String,
}

impl ReferenceProgram {
    pub fn new(cube: impl Into<String>) -> Self {
        let cube = cube.into();
        let source = format!("@{cube}[input]");
        Self { cube, source }
    }

    pub fn parse(source: &str) -> Result<Self> {
        let caps = REF_TARGET
            .captures(source)
            .ok_or_else(|| NCubeError::invalid(format!("malformed cube reference: {source}")))?;
        Ok(Self {
            cube: caps[1].to_string(),
            source: source.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.cube
    }
}

impl CellProgram for ReferenceProgram {
    fn kind(&self) -> &str {
        KIND_REF
    }

    fn execute(&self, ctx: &mut ProgramContext<'_, '_>) -> anyhow::Result<Flow> {
        let input = ctx.input_coordinate().clone();
        Ok(Flow::Value(ctx.get_cell(&self.cube, &input)?))
    }

    fn source_text(&self) -> Option<&str> {
        Some(&self.source)
    }
}

/// A program whose kind no factory understands.
#[derive(Clone, Debug)]
pub struct OpaqueProgram {
    spec: ProgramSpec,
}

impl OpaqueProgram {
    pub fn new(spec: ProgramSpec) -> Self {
        Self { spec }
    }
}

impl CellProgram for OpaqueProgram {
    fn kind(&self) -> &str {
        &self.spec.kind
    }

    fn execute(&self, _ctx: &mut ProgramContext<'_, '_>) -> anyhow::Result<Flow> {
        Err(anyhow!(
            "no executor for program kind '{}' ({})",
            self.spec.kind,
            self.spec.source.as_deref().unwrap_or("no source")
        ))
    }

    fn is_cacheable(&self) -> bool {
        self.spec.cacheable
    }

    fn source_text(&self) -> Option<&str> {
        self.spec.source.as_deref()
    }

    fn source_url(&self) -> Option<&str> {
        self.spec.url.as_deref()
    }
}

// ─── Factory ──────────────────────────────────────────────────

/// Turns persisted program descriptions back into executables.
pub trait ProgramFactory: Send + Sync {
    fn build(&self, spec: &ProgramSpec) -> Result<Arc<dyn CellProgram>>;
}

/// Named closures plus the built-in kinds, compiled once per distinct spec.
#[derive(Default)]
pub struct ProgramLibrary {
    closures: HashMap<String, ClosureProgram>,
    cache: ProgramCache,
}

impl ProgramLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under its label, replacing any previous one.
    pub fn register(&mut self, program: ClosureProgram) -> &mut Self {
        self.closures.insert(program.label.clone(), program);
        self.cache.clear();
        self
    }

    pub fn closure(&self, label: &str) -> Option<&ClosureProgram> {
        self.closures.get(label)
    }

    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    /// Forget compiled programs. Cubes already loaded keep theirs.
    pub fn clear_compiled(&self) {
        self.cache.clear();
    }

    fn compile(&self, spec: &ProgramSpec) -> Result<Arc<dyn CellProgram>> {
        let source = spec.source.as_deref().unwrap_or_default();
        let program: Arc<dyn CellProgram> = match spec.kind.as_str() {
            KIND_CLOSURE => match self.closures.get(source) {
                Some(closure) => Arc::new(closure.with_cacheable(spec.cacheable)),
                None => {
                    warn!(label = source, "no closure registered, cell will fail when run");
                    Arc::new(OpaqueProgram::new(spec.clone()))
                }
            },
            KIND_REF => Arc::new(ReferenceProgram::parse(source)?),
            _ => Arc::new(OpaqueProgram::new(spec.clone())),
        };
        Ok(program)
    }
}

impl ProgramFactory for ProgramLibrary {
    fn build(&self, spec: &ProgramSpec) -> Result<Arc<dyn CellProgram>> {
        self.cache.get_or_compile(&spec.cache_key(), || self.compile(spec))
    }
}

impl fmt::Debug for ProgramLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut labels: Vec<&String> = self.closures.keys().collect();
        labels.sort();
        f.debug_struct("ProgramLibrary")
            .field("closures", &labels)
            .field("compiled", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_parses_target() {
        let r = ReferenceProgram::parse("@Rates.Tax[input]").unwrap();
        assert_eq!(r.target(), "Rates.Tax");
        assert_eq!(r.spec().kind, KIND_REF);
        assert!(ReferenceProgram::parse("[]").is_err());
    }

    #[test]
    fn library_builds_registered_closures() {
        let mut lib = ProgramLibrary::new();
        lib.register(ClosureProgram::value("one", |_| 1));
        let spec = ProgramSpec::new(KIND_CLOSURE, "one");
        let a = lib.build(&spec).unwrap();
        let b = lib.build(&spec).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lib.compiled_count(), 1);
        assert_eq!(a.spec(), spec);
    }

    #[test]
    fn unknown_kinds_keep_their_source() {
        let lib = ProgramLibrary::new();
        let spec = ProgramSpec {
            kind: "groovy".into(),
            source: Some("input.age > 5".into()),
            url: None,
            cacheable: true,
        };
        let program = lib.build(&spec).unwrap();
        assert_eq!(program.spec(), spec);
        assert!(program.is_cacheable());
    }

    #[test]
    fn cacheable_flag_survives_compilation() {
        let mut lib = ProgramLibrary::new();
        lib.register(ClosureProgram::value("now", |_| 1));
        let mut spec = ProgramSpec::new(KIND_CLOSURE, "now");
        spec.cacheable = true;
        assert!(lib.build(&spec).unwrap().is_cacheable());
    }
}
