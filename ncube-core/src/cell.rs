use std::sync::Arc;

use crate::program::CellProgram;
use crate::range::{Range, RangeSet};
use crate::value::Value;

/// A stored cell.
#[derive(Clone, Debug)]
pub enum CellValue {
    Scalar(Value),
    Binary(Vec<u8>),
    Program(Arc<dyn CellProgram>),
    Range(Range),
    RangeSet(RangeSet),
}

impl CellValue {
    pub fn program(program: impl CellProgram + 'static) -> Self {
        CellValue::Program(Arc::new(program))
    }

    pub fn as_program(&self) -> Option<&Arc<dyn CellProgram>> {
        match self {
            CellValue::Program(p) => Some(p),
            _ => None,
        }
    }

    /// Value of a non-program cell. Programs yield `None`; they must be executed.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            CellValue::Scalar(v) => Some(v.clone()),
            CellValue::Binary(b) => Some(Value::Bytes(b.clone())),
            CellValue::Range(r) => Some(r.to_value()),
            CellValue::RangeSet(s) => Some(s.to_value()),
            CellValue::Program(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CellValue::Scalar(_) => "scalar",
            CellValue::Binary(_) => "binary",
            CellValue::Program(_) => "program",
            CellValue::Range(_) => "range",
            CellValue::RangeSet(_) => "rangeSet",
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellValue::Scalar(a), CellValue::Scalar(b)) => a == b,
            (CellValue::Binary(a), CellValue::Binary(b)) => a == b,
            (CellValue::Program(a), CellValue::Program(b)) => a.spec() == b.spec(),
            (CellValue::Range(a), CellValue::Range(b)) => a == b,
            (CellValue::RangeSet(a), CellValue::RangeSet(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! scalar_cell_from {
    ($($t:ty),*) => {
        $(impl From<$t> for CellValue {
            fn from(v: $t) -> Self {
                CellValue::Scalar(Value::from(v))
            }
        })*
    };
}

scalar_cell_from!(Value, bool, i64, i32, f64, &str, String);
