//! JSON wire form of a cube.
//!
//! ```json
//! {
//!   "ncube": "Rates",
//!   "meta": { ... },
//!   "defaultCellValue": { "value": { "type": "double", "value": 0.0 } },
//!   "axes": [
//!     { "id": 1, "name": "Age", "type": "RANGE", "valueType": "LONG",
//!       "preferredOrder": "SORTED", "hasDefault": true, "defaultId": 2,
//!       "columns": [ { "id": 3, "displayOrder": 0,
//!                      "value": { "range": { "low": ..., "high": ... } } } ] }
//!   ],
//!   "cells": [ { "id": [2, 5], "content": { "value": ... } } ]
//! }
//! ```
//!
//! Programs are written as their [`ProgramSpec`] and rebuilt through a
//! [`ProgramFactory`] on the way back in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::axis::{Axis, AxisType, PreferredOrder};
use crate::cell::CellValue;
use crate::column::{Column, ColumnValue};
use crate::coordinate::ColumnIdSet;
use crate::cube::NCube;
use crate::error::{NCubeError, Result};
use crate::ids::{AxisId, ColumnId};
use crate::program::{ProgramFactory, ProgramSpec};
use crate::range::{Range, RangeSet};
use crate::value::{Value, ValueType};

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeDto {
    pub ncube: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cell_value: Option<CellContentDto>,
    #[serde(default)]
    pub axes: Vec<AxisDto>,
    #[serde(default)]
    pub cells: Vec<CellDto>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxisDto {
    pub id: AxisId,
    pub name: String,
    #[serde(rename = "type")]
    pub axis_type: AxisType,
    pub value_type: ValueType,
    pub preferred_order: PreferredOrder,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_id: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_meta: BTreeMap<String, Value>,
    #[serde(default = "default_true")]
    pub fire_all: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(default)]
    pub columns: Vec<ColumnDto>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDto {
    pub id: ColumnId,
    #[serde(default)]
    pub display_order: i32,
    pub value: ColumnValueDto,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnValueDto {
    Discrete(Value),
    Range(Range),
    Set(RangeSet),
    Rule(ProgramSpec),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CellContentDto {
    Value(Value),
    Binary(#[serde(with = "crate::value::hex_bytes")] Vec<u8>),
    Program(ProgramSpec),
    Range(Range),
    RangeSet(RangeSet),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellDto {
    pub id: Vec<ColumnId>,
    pub content: CellContentDto,
}

// ─── encode ───────────────────────────────────────────────────

fn encode_cell(cell: &CellValue) -> CellContentDto {
    match cell {
        CellValue::Scalar(v) => CellContentDto::Value(v.clone()),
        CellValue::Binary(b) => CellContentDto::Binary(b.clone()),
        CellValue::Program(p) => CellContentDto::Program(p.spec()),
        CellValue::Range(r) => CellContentDto::Range(r.clone()),
        CellValue::RangeSet(s) => CellContentDto::RangeSet(s.clone()),
    }
}

fn encode_column(column: &Column) -> Result<ColumnDto> {
    let value = match column.value() {
        ColumnValue::Discrete(v) => ColumnValueDto::Discrete(v.clone()),
        ColumnValue::Range(r) => ColumnValueDto::Range(r.clone()),
        ColumnValue::Set(s) => ColumnValueDto::Set(s.clone()),
        ColumnValue::Rule(p) => ColumnValueDto::Rule(p.spec()),
        ColumnValue::Default => {
            return Err(NCubeError::IllegalState(
                "default column encoded as a regular column".into(),
            ))
        }
    };
    Ok(ColumnDto {
        id: column.id(),
        display_order: column.display_order(),
        value,
        meta: column.meta().clone(),
    })
}

fn encode_axis(axis: &Axis) -> Result<AxisDto> {
    Ok(AxisDto {
        id: axis.id(),
        name: axis.name().to_string(),
        axis_type: axis.axis_type(),
        value_type: axis.value_type(),
        preferred_order: axis.preferred_order(),
        has_default: axis.has_default(),
        default_id: axis.default_column().map(Column::id),
        default_meta: axis
            .default_column()
            .map(|c| c.meta().clone())
            .unwrap_or_default(),
        fire_all: axis.fire_all(),
        meta: axis.meta().clone(),
        columns: axis
            .columns_without_default()
            .map(encode_column)
            .collect::<Result<Vec<_>>>()?,
    })
}

pub fn to_dto(cube: &NCube) -> Result<CubeDto> {
    let mut cells: Vec<CellDto> = cube
        .cells()
        .map(|(key, cell)| CellDto {
            id: key.iter().collect(),
            content: encode_cell(cell),
        })
        .collect();
    cells.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CubeDto {
        ncube: cube.name().to_string(),
        meta: cube.meta().clone(),
        default_cell_value: cube.default_cell_value().map(encode_cell),
        axes: cube.axes().iter().map(encode_axis).collect::<Result<Vec<_>>>()?,
        cells,
    })
}

pub fn to_json(cube: &NCube) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_dto(cube)?)?)
}

// ─── decode ───────────────────────────────────────────────────

fn decode_cell(content: CellContentDto, factory: &dyn ProgramFactory) -> Result<CellValue> {
    Ok(match content {
        CellContentDto::Value(v) => CellValue::Scalar(v),
        CellContentDto::Binary(b) => CellValue::Binary(b),
        CellContentDto::Program(spec) => CellValue::Program(factory.build(&spec)?),
        CellContentDto::Range(r) => CellValue::Range(r),
        CellContentDto::RangeSet(s) => CellValue::RangeSet(s),
    })
}

fn decode_axis(dto: AxisDto, factory: &dyn ProgramFactory) -> Result<Axis> {
    let mut axis = Axis::new(
        dto.name,
        dto.axis_type,
        dto.value_type,
        false,
        dto.preferred_order,
    )?;
    axis.set_id(dto.id);
    axis.set_fire_all(dto.fire_all);
    for (k, v) in dto.meta {
        axis.set_meta(k, v);
    }
    if dto.has_default {
        axis.add_column_with(ColumnValue::Default, None, dto.default_meta, dto.default_id)?;
    }
    for column in dto.columns {
        let value = match column.value {
            ColumnValueDto::Discrete(v) => ColumnValue::Discrete(v),
            ColumnValueDto::Range(r) => ColumnValue::Range(r),
            ColumnValueDto::Set(s) => ColumnValue::Set(s),
            ColumnValueDto::Rule(spec) => ColumnValue::Rule(factory.build(&spec)?),
        };
        axis.add_column_with(value, Some(column.display_order), column.meta, Some(column.id))?;
    }
    Ok(axis)
}

pub fn from_dto(dto: CubeDto, factory: &dyn ProgramFactory) -> Result<NCube> {
    let mut cube = NCube::new(dto.ncube)?;
    for (k, v) in dto.meta {
        cube.set_meta(k, v);
    }
    for axis in dto.axes {
        cube.add_axis(decode_axis(axis, factory)?)?;
    }
    if let Some(default) = dto.default_cell_value {
        cube.set_default_cell_value(Some(decode_cell(default, factory)?));
    }
    for cell in dto.cells {
        let key: ColumnIdSet = cell.id.into_iter().collect();
        cube.set_cell_by_ids(key, decode_cell(cell.content, factory)?)?;
    }
    Ok(cube)
}

pub fn from_json(json: &str, factory: &dyn ProgramFactory) -> Result<NCube> {
    let dto: CubeDto = serde_json::from_str(json)?;
    from_dto(dto, factory)
}

impl NCube {
    pub fn to_json(&self) -> Result<String> {
        to_json(self)
    }

    pub fn from_json(json: &str, factory: &dyn ProgramFactory) -> Result<NCube> {
        from_json(json, factory)
    }
}
