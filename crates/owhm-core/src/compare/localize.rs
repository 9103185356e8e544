//! Failure localization.
//!
//! Turns a failure mask over an n-dimensional deviation array into one
//! coordinate-labelled line per failing element. Lines are not capped.

use ndarray::{ArrayD, Dimension};
use serde::Serialize;

/// Position of a failing element, 1-based on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Coordinate {
    TimeSeries1D {
        entry: usize,
    },
    Spatial2D {
        row: usize,
        column: usize,
    },
    Spatial3D {
        layer: usize,
        row: usize,
        column: usize,
    },
    SpatialTime4D {
        period: usize,
        layer: usize,
        row: usize,
        column: usize,
    },
    /// Row-major position for arrays of any other rank.
    Flat {
        index: usize,
    },
}

impl Coordinate {
    /// Labels a zero-based multi-index by its rank.
    pub fn from_index(index: &[usize], flat_index: usize) -> Self {
        match *index {
            [entry] => Self::TimeSeries1D { entry: entry + 1 },
            [row, column] => Self::Spatial2D {
                row: row + 1,
                column: column + 1,
            },
            [layer, row, column] => Self::Spatial3D {
                layer: layer + 1,
                row: row + 1,
                column: column + 1,
            },
            [period, layer, row, column] => Self::SpatialTime4D {
                period: period + 1,
                layer: layer + 1,
                row: row + 1,
                column: column + 1,
            },
            _ => Self::Flat {
                index: flat_index + 1,
            },
        }
    }

    pub fn period(&self) -> Option<usize> {
        match self {
            Self::SpatialTime4D { period, .. } => Some(*period),
            _ => None,
        }
    }

    pub fn layer(&self) -> Option<usize> {
        match self {
            Self::Spatial3D { layer, .. } | Self::SpatialTime4D { layer, .. } => Some(*layer),
            _ => None,
        }
    }

    pub fn row(&self) -> Option<usize> {
        match self {
            Self::Spatial2D { row, .. }
            | Self::Spatial3D { row, .. }
            | Self::SpatialTime4D { row, .. } => Some(*row),
            _ => None,
        }
    }

    pub fn column(&self) -> Option<usize> {
        match self {
            Self::Spatial2D { column, .. }
            | Self::Spatial3D { column, .. }
            | Self::SpatialTime4D { column, .. } => Some(*column),
            _ => None,
        }
    }

    pub fn entry(&self) -> Option<usize> {
        match self {
            Self::TimeSeries1D { entry } => Some(*entry),
            Self::Flat { index } => Some(*index),
            _ => None,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::TimeSeries1D { entry } | Self::Flat { index: entry } => {
                format!("entry number: {}", entry)
            }
            Self::Spatial2D { row, column } => format!("row: {}, column {}", row, column),
            Self::Spatial3D { layer, row, column } => {
                format!("layer: {}, row: {}, column {}", layer, row, column)
            }
            Self::SpatialTime4D {
                period,
                layer,
                row,
                column,
            } => format!(
                "kper: {}, layer: {}, row: {}, column {}",
                period, layer, row, column
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellFailure {
    pub coordinate: Coordinate,
    pub sim_value: f64,
    pub valid_value: f64,
    pub deviation: f64,
}

impl CellFailure {
    /// Renders one diagnostic line, prefixed by the budget item when there is one.
    pub fn render(&self, field: Option<&str>) -> String {
        let prefix = match field {
            Some(field) => format!("Budget item: {}, ", field),
            None => "Array failure: ".to_string(),
        };
        format!(
            "{}{}, sim_val: {:.2}, valid_val: {:.2}, failure criteria : {:.3}\n",
            prefix,
            self.coordinate.label(),
            self.sim_value,
            self.valid_value,
            self.deviation
        )
    }
}

/// Collects every element whose deviation fails `is_failure`, in row-major order.
pub fn locate_failures(
    sim: &ArrayD<f64>,
    valid: &ArrayD<f64>,
    deviation: &ArrayD<f64>,
    is_failure: impl Fn(f64) -> bool,
) -> Vec<CellFailure> {
    deviation
        .indexed_iter()
        .enumerate()
        .filter(|(_, (_, value))| is_failure(**value))
        .map(|(flat_index, (index, value))| {
            let index = index.slice();
            CellFailure {
                coordinate: Coordinate::from_index(index, flat_index),
                sim_value: sim[index],
                valid_value: valid[index],
                deviation: *value,
            }
        })
        .collect()
}

/// Renders the failure block for a set of localized cells.
pub fn localize(failures: &[CellFailure], field: Option<&str>) -> String {
    let mut block = String::new();
    for failure in failures {
        block.push_str(&failure.render(field));
    }
    block
}
