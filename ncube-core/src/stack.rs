//! Explicit call context threaded through nested cube evaluation.

use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::coordinate::{ci_eq, Coordinate};
use crate::cube::NCube;
use crate::error::{NCubeError, Result};

/// Looks up cubes by name for cross-cube calls.
pub trait CubeResolver {
    fn resolve(&self, name: &str) -> Option<Arc<NCube>>;
}

/// One program invocation on the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub cube_name: String,
    pub coordinate: Coordinate,
}

impl Frame {
    pub fn new(cube_name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            cube_name: cube_name.into(),
            coordinate,
        }
    }

    fn same_call(&self, other: &Frame) -> bool {
        ci_eq(&self.cube_name, &other.cube_name) && self.coordinate == other.coordinate
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.cube_name, self.coordinate)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn chain(&self) -> Vec<String> {
        self.frames.iter().map(Frame::to_string).collect()
    }

    fn push(&mut self, frame: Frame, config: &EngineConfig) -> Result<()> {
        if self.frames.len() >= config.max_call_depth {
            return Err(NCubeError::CallDepthExceeded {
                depth: self.frames.len() + 1,
                limit: config.max_call_depth,
            });
        }
        if config.detect_cycles && self.frames.iter().any(|f| f.same_call(&frame)) {
            let mut chain = self.chain();
            chain.push(frame.to_string());
            return Err(NCubeError::CycleDetected { chain });
        }
        self.frames.push(frame);
        Ok(())
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }
}

/// Per-logical-call state: resolver, stack and limits.
///
/// A context is created for each top-level `get_cell` and handed down to
/// every nested call it makes, so recursion is bounded per call rather
/// than per thread.
pub struct EvalContext<'r> {
    resolver: Option<&'r dyn CubeResolver>,
    stack: CallStack,
    config: EngineConfig,
}

impl<'r> EvalContext<'r> {
    pub fn new() -> Self {
        Self {
            resolver: None,
            stack: CallStack::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: &'r dyn CubeResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn chain(&self) -> Vec<String> {
        self.stack.chain()
    }

    pub(crate) fn push(&mut self, frame: Frame) -> Result<()> {
        self.stack.push(frame, &self.config)
    }

    pub(crate) fn pop(&mut self) {
        self.stack.pop();
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<NCube>> {
        self.resolver
            .and_then(|r| r.resolve(name))
            .ok_or_else(|| NCubeError::UnknownCube(name.to_string()))
    }
}

impl Default for EvalContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("has_resolver", &self.resolver.is_some())
            .field("stack", &self.stack)
            .field("config", &self.config)
            .finish()
    }
}
