use std::fmt;

use crate::coordinate::Coordinate;
use crate::cube::NCube;
use crate::trace::Output;
use crate::value::Value;

/// Interceptor wrapped around program cells of a cube.
///
/// Advice is runtime-only: it never affects a cube's content hash and is
/// not persisted.
pub trait Advice: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Return `false` to skip execution; the cell then yields `Null`.
    fn before(&self, _cube: &NCube, _input: &Coordinate, _output: &mut Output) -> bool {
        true
    }

    fn after(&self, _cube: &NCube, _input: &Coordinate, _output: &mut Output, _result: &Value) {}
}
