//! Farm-process output adapter.
//!
//! Farm outputs arrive as one row per entity per timestep. Comparison happens
//! per stress period, so the raw series is collapsed once into
//! duration-weighted stress-period means; the per-timestep values are not kept.

use crate::domain::{NamedArraySet, OwhmError};
use ndarray::{Array1, ArrayD};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Columns that never describe a budget quantity.
pub const IGNORED_COLUMNS: [&str; 8] = [
    "active",
    "date_start",
    "def-flag",
    "drch",
    "fid",
    "q-discrepancy[%]",
    "q-drch-in",
    "q-in-out",
];

pub const IGNORED_COLUMN_PREFIX: &str = "v-";

const ENTITY_COLUMN: &str = "fid";
const PERIOD_COLUMN: &str = "per";
const STEP_COLUMN: &str = "stp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Days,
    Minutes,
    Years,
    Seconds,
}

impl TimeUnit {
    /// Search order when looking for the cumulative-time column.
    pub const SEARCH_ORDER: [TimeUnit; 4] = [
        TimeUnit::Days,
        TimeUnit::Minutes,
        TimeUnit::Years,
        TimeUnit::Seconds,
    ];

    pub const fn column(self) -> &'static str {
        match self {
            Self::Days => "days",
            Self::Minutes => "minutes",
            Self::Years => "years",
            Self::Seconds => "seconds",
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Timestep,
    StressPeriod,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FarmAggregationError {
    #[error("cannot discern the time step from farm output data; expected one of days, minutes, years, seconds")]
    UnknownTimeUnit,
    #[error("farm output table has no '{column}' column")]
    MissingColumn { column: &'static str },
    #[error("farm output row {row} has {found} values but the header has {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("farm output row {row} has non-integer or negative {column} value {value}")]
    InvalidInteger {
        row: usize,
        column: &'static str,
        value: f64,
    },
    #[error("entity {entity}: field '{field}' has {found} samples, expected {expected}")]
    LengthMismatch {
        entity: i64,
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("entity {entity} has no '{unit}' time column")]
    MissingTimeColumn { entity: i64, unit: TimeUnit },
    #[error("entity {entity} has no rows for stress period {period}")]
    PeriodGap { entity: i64, period: usize },
    #[error("farm output series is already aggregated to stress periods")]
    AlreadyAggregated,
}

impl FarmAggregationError {
    /// True for defects in the table the reader produced, as opposed to
    /// failures of the aggregation itself.
    pub fn is_table_error(&self) -> bool {
        matches!(
            self,
            Self::MissingColumn { .. } | Self::RowWidth { .. } | Self::InvalidInteger { .. }
        )
    }
}

impl From<FarmAggregationError> for OwhmError {
    fn from(error: FarmAggregationError) -> Self {
        let message = error.to_string();
        match error {
            FarmAggregationError::UnknownTimeUnit | FarmAggregationError::AlreadyAggregated => {
                OwhmError::computation("RUN.FARM_AGGREGATION", message)
            }
            _ => OwhmError::input_validation("INPUT.FARM_TABLE", message),
        }
    }
}

/// Per-entity series for one farm output file.
#[derive(Debug, Clone, PartialEq)]
pub struct FarmEntity {
    per: Vec<usize>,
    stp: Option<Vec<usize>>,
    ts_time: Option<Vec<f64>>,
    fields: BTreeMap<String, Vec<f64>>,
}

impl FarmEntity {
    pub fn new(per: Vec<usize>) -> Self {
        Self {
            per,
            stp: None,
            ts_time: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_steps(mut self, stp: Vec<usize>) -> Self {
        self.stp = Some(stp);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.fields.insert(name.into(), values);
        self
    }

    pub fn per(&self) -> &[usize] {
        &self.per
    }

    pub fn stp(&self) -> Option<&[usize]> {
        self.stp.as_deref()
    }

    pub fn ts_time(&self) -> Option<&[f64]> {
        self.ts_time.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&[f64]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// One-dimensional budget view; names are upper-cased.
    pub fn to_budget(&self) -> NamedArraySet {
        let mut set = NamedArraySet::new();
        let per: Vec<f64> = self.per.iter().map(|period| *period as f64).collect();
        set.insert(PERIOD_COLUMN, column_array(per));
        for (name, values) in &self.fields {
            set.insert(name, column_array(values.clone()));
        }
        set
    }
}

fn column_array(values: Vec<f64>) -> ArrayD<f64> {
    Array1::from(values).into_dyn()
}

/// Entity id to series mapping for one farm output file.
#[derive(Debug, Clone, PartialEq)]
pub struct FarmEntityTimeSeries {
    entities: BTreeMap<i64, FarmEntity>,
    granularity: Granularity,
    time_unit: Option<TimeUnit>,
}

impl FarmEntityTimeSeries {
    pub fn from_entities(entities: BTreeMap<i64, FarmEntity>) -> Self {
        Self {
            entities,
            granularity: Granularity::Timestep,
            time_unit: None,
        }
    }

    /// Groups raw rows by entity id, dropping non-budget columns.
    pub fn from_table(header: &[String], rows: &[Vec<f64>]) -> Result<Self, FarmAggregationError> {
        let header: Vec<String> = header
            .iter()
            .map(|column| column.trim().to_ascii_lowercase())
            .collect();
        let column_index = |column: &'static str| {
            header
                .iter()
                .position(|name| name == column)
                .ok_or(FarmAggregationError::MissingColumn { column })
        };
        let fid_index = column_index(ENTITY_COLUMN)?;
        let per_index = column_index(PERIOD_COLUMN)?;
        let stp_index = header.iter().position(|name| name == STEP_COLUMN);

        let mut entities: BTreeMap<i64, FarmEntity> = BTreeMap::new();
        for (row_index, row) in rows.iter().enumerate() {
            let row_number = row_index + 1;
            if row.len() != header.len() {
                return Err(FarmAggregationError::RowWidth {
                    row: row_number,
                    expected: header.len(),
                    found: row.len(),
                });
            }

            let fid = integer_cell(row[fid_index], row_number, ENTITY_COLUMN)? as i64;
            let per = integer_cell(row[per_index], row_number, PERIOD_COLUMN)?;
            let stp = stp_index
                .map(|index| integer_cell(row[index], row_number, STEP_COLUMN))
                .transpose()?;

            let entity = entities.entry(fid).or_insert_with(|| FarmEntity {
                stp: stp_index.map(|_| Vec::new()),
                ..FarmEntity::new(Vec::new())
            });
            entity.per.push(per);
            if let (Some(steps), Some(stp)) = (entity.stp.as_mut(), stp) {
                steps.push(stp);
            }

            for (column, value) in header.iter().zip(row) {
                if is_ignored_column(column) || column == PERIOD_COLUMN || column == STEP_COLUMN {
                    continue;
                }
                entity.fields.entry(column.clone()).or_default().push(*value);
            }
        }

        Ok(Self::from_entities(entities))
    }

    pub fn entities(&self) -> &BTreeMap<i64, FarmEntity> {
        &self.entities
    }

    pub fn entity(&self, id: i64) -> Option<&FarmEntity> {
        self.entities.get(&id)
    }

    pub fn entity_ids(&self) -> Vec<i64> {
        self.entities.keys().copied().collect()
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn time_unit(&self) -> Option<TimeUnit> {
        self.time_unit
    }

    /// First unit column present in any entity, in [`TimeUnit::SEARCH_ORDER`].
    pub fn detect_time_unit(&self) -> Result<TimeUnit, FarmAggregationError> {
        self.entities
            .values()
            .find_map(|entity| {
                TimeUnit::SEARCH_ORDER
                    .into_iter()
                    .find(|unit| entity.fields.contains_key(unit.column()))
            })
            .ok_or(FarmAggregationError::UnknownTimeUnit)
    }

    /// Fills `ts_time` on every entity from the detected cumulative-time column.
    pub fn compute_timestep_lengths(&mut self) -> Result<TimeUnit, FarmAggregationError> {
        if self.granularity == Granularity::StressPeriod {
            return Err(FarmAggregationError::AlreadyAggregated);
        }
        let unit = self.detect_time_unit()?;
        for (&id, entity) in self.entities.iter_mut() {
            let cumulative = entity
                .fields
                .get(unit.column())
                .ok_or(FarmAggregationError::MissingTimeColumn { entity: id, unit })?;
            entity.ts_time = Some(timestep_durations(cumulative));
        }
        self.time_unit = Some(unit);
        Ok(unit)
    }

    /// Collapses every entity to duration-weighted stress-period means.
    pub fn aggregate_to_stress_periods(mut self) -> Result<Self, FarmAggregationError> {
        let unit = self.compute_timestep_lengths()?;

        for (&id, entity) in self.entities.iter_mut() {
            aggregate_entity(id, entity, unit)?;
        }

        tracing::debug!(
            entities = self.entities.len(),
            %unit,
            "farm output aggregated to stress periods"
        );
        self.granularity = Granularity::StressPeriod;
        Ok(self)
    }

    pub fn to_budget_sets(&self) -> BTreeMap<i64, NamedArraySet> {
        self.entities
            .iter()
            .map(|(id, entity)| (*id, entity.to_budget()))
            .collect()
    }
}

fn is_ignored_column(column: &str) -> bool {
    IGNORED_COLUMNS.contains(&column) || column.starts_with(IGNORED_COLUMN_PREFIX)
}

fn integer_cell(value: f64, row: usize, column: &'static str) -> Result<usize, FarmAggregationError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(FarmAggregationError::InvalidInteger { row, column, value })
    }
}

/// `ts[0] = cum[0]`, `ts[i] = cum[i] - cum[i - 1]`.
pub fn timestep_durations(cumulative: &[f64]) -> Vec<f64> {
    let mut previous = 0.0;
    cumulative
        .iter()
        .map(|&time| {
            let duration = time - previous;
            previous = time;
            duration
        })
        .collect()
}

/// Duration-weighted mean of `values` per stress period, in period order.
pub fn weighted_period_means(values: &[f64], per: &[usize], durations: &[f64]) -> Vec<f64> {
    let mut sums: BTreeMap<usize, (f64, f64, f64, usize)> = BTreeMap::new();
    for ((&value, &period), &duration) in values.iter().zip(per).zip(durations) {
        let entry = sums.entry(period).or_insert((0.0, 0.0, 0.0, 0));
        entry.0 += value * duration;
        entry.1 += duration;
        entry.2 += value;
        entry.3 += 1;
    }

    sums.into_values()
        .map(|(weighted, total_duration, plain, count)| {
            if total_duration == 0.0 {
                plain / count as f64
            } else {
                weighted / total_duration
            }
        })
        .collect()
}

fn aggregate_entity(id: i64, entity: &mut FarmEntity, unit: TimeUnit) -> Result<(), FarmAggregationError> {
    let samples = entity.per.len();
    for (name, values) in &entity.fields {
        if values.len() != samples {
            return Err(FarmAggregationError::LengthMismatch {
                entity: id,
                field: name.clone(),
                expected: samples,
                found: values.len(),
            });
        }
    }

    let mut period_end_time: BTreeMap<usize, f64> = BTreeMap::new();
    if let Some(cumulative) = entity.fields.get(unit.column()) {
        for (&period, &time) in entity.per.iter().zip(cumulative) {
            period_end_time.insert(period, time);
        }
    }
    if let Some(gap) = (1..).zip(period_end_time.keys()).find(|(dense, period)| dense != *period) {
        return Err(FarmAggregationError::PeriodGap {
            entity: id,
            period: gap.0,
        });
    }

    let durations = entity
        .ts_time
        .take()
        .ok_or(FarmAggregationError::MissingTimeColumn { entity: id, unit })?;
    for (name, values) in entity.fields.iter_mut() {
        if name == unit.column() {
            continue;
        }
        *values = weighted_period_means(values, &entity.per, &durations);
    }
    let period_count = period_end_time.len();
    entity
        .fields
        .insert(unit.column().to_string(), period_end_time.into_values().collect());

    entity.per = (1..=period_count).collect();
    entity.stp = None;
    Ok(())
}
