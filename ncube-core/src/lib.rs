//! Sparse N-dimensional decision cubes.
//!
//! A cube is a set of named axes and a sparse map from one column per axis
//! to a cell. Looking a value up binds an input coordinate to a column on
//! every axis; rule axes instead walk their conditions in order and run every
//! combination that fires.
//!
//! ```text
//! Coordinate { state: "OH", age: 42 }
//!       │
//!       ▼
//! ┌─────────────────────────────────────┐
//! │  Axis binding                       │
//! │  discrete / range / set / nearest   │
//! │  → one column id per axis           │
//! └─────────────────────────────────────┘
//!       │                 │ rule axes present
//!       ▼                 ▼
//! ┌──────────────┐  ┌───────────────────────────────┐
//! │  Flat lookup │  │  Rule pass                    │
//! │  cells[ids]  │  │  odometer over candidates,    │
//! └──────────────┘  │  conditions, Stop / Jump      │
//!       │           └───────────────────────────────┘
//!       ▼                 │
//! ┌─────────────────────────────────────┐
//! │  Cell program (closure, @Cube ref)  │
//! │  EvalContext: call stack, cycles    │
//! └─────────────────────────────────────┘
//!       │
//!       ▼
//!   Value + Output.rule_info trace
//! ```
//!
//! Hosting lives on top: [`CubeRegistry`] caches cubes per application,
//! [`CubeStore`] persists their JSON form by revision, and
//! [`CubeRepository`] joins the two.

pub mod advice;
pub mod axis;
pub mod cell;
pub mod column;
pub mod config;
pub mod coordinate;
pub mod cube;
pub mod engine;
pub mod error;
pub mod format;
pub mod hash;
pub mod ids;
pub mod program;
pub mod range;
pub mod registry;
pub mod repository;
pub mod scope;
pub mod stack;
pub mod store;
pub mod trace;
pub mod value;

pub use advice::Advice;
pub use axis::{Axis, AxisType, PreferredOrder};
pub use cell::CellValue;
pub use column::{Column, ColumnValue};
pub use config::{ConfigLoader, EngineConfig};
pub use coordinate::{ColumnIdSet, Coordinate, TrackedInput};
pub use cube::NCube;
pub use error::{NCubeError, Result};
pub use hash::compute_value_hash;
pub use ids::{AxisId, ColumnId};
pub use program::{
    CellProgram, ClosureProgram, Flow, OpaqueProgram, ProgramContext, ProgramFactory,
    ProgramLibrary, ProgramSpec, ReferenceProgram,
};
pub use range::{Range, RangeSet, SetItem};
pub use registry::{CubeRegistry, ProgramCache};
pub use repository::CubeRepository;
pub use stack::{CallStack, CubeResolver, EvalContext, Frame};
pub use store::{ApplicationId, CubeStore, MemoryCubeStore, Revision, SerializedCube};
pub use trace::{Binding, Output, RuleInfo};
pub use value::{LatLon, Point2D, Point3D, Value, ValueType};
