use crate::domain::{NamedArraySet, OwhmError};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("budget has no fields to export")]
    Empty,
    #[error("field '{field}' is {ndim}-dimensional; only per-timestep series can be tabulated")]
    NotSeries { field: String, ndim: usize },
    #[error("field '{field}' has {found} rows, expected {expected}")]
    RowCount {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("failed to create export directory '{}': {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write budget table '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl From<ExportError> for OwhmError {
    fn from(error: ExportError) -> Self {
        let message = error.to_string();
        match error {
            ExportError::CreateDirectory { .. } | ExportError::Write { .. } => {
                OwhmError::io_system("IO.EXPORT", message)
            }
            _ => OwhmError::input_validation("INPUT.EXPORT", message),
        }
    }
}

/// Writes `set` as a CSV table: sorted field names as the header, one row
/// per time index, values to four decimals. Returns the number of data rows.
pub fn write_budget_table(path: &Path, set: &NamedArraySet) -> Result<usize, ExportError> {
    let rows = table_rows(set)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ExportError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let write_error = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(write_error)?;
    writer.write_record(set.keys()).map_err(write_error)?;
    for row in &rows {
        writer.write_record(row).map_err(write_error)?;
    }
    writer.flush().map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source: source.into(),
    })?;

    tracing::debug!(path = %path.display(), rows = rows.len(), "budget table written");
    Ok(rows.len())
}

fn table_rows(set: &NamedArraySet) -> Result<Vec<Vec<String>>, ExportError> {
    let mut expected = None;
    for (field, values) in set {
        if values.ndim() != 1 {
            return Err(ExportError::NotSeries {
                field: field.clone(),
                ndim: values.ndim(),
            });
        }
        match expected {
            None => expected = Some(values.len()),
            Some(expected) if expected != values.len() => {
                return Err(ExportError::RowCount {
                    field: field.clone(),
                    expected,
                    found: values.len(),
                });
            }
            Some(_) => {}
        }
    }
    let row_count = expected.ok_or(ExportError::Empty)?;

    Ok((0..row_count)
        .map(|row| {
            set.iter()
                .map(|(_, values)| format!("{:.4}", values[[row].as_slice()]))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{ExportError, write_budget_table};
    use crate::domain::NamedArraySet;
    use ndarray::{ArrayD, IxDyn};
    use tempfile::TempDir;

    fn series(values: &[f64]) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
            .expect("shape should match data")
    }

    #[test]
    fn writes_sorted_header_and_fixed_precision_rows() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("nested/budget.csv");
        let mut set = NamedArraySet::new();
        set.insert("wel_out", series(&[1.0, 2.5]));
        set.insert("RCH_IN", series(&[0.123456, -3.0]));

        let rows = write_budget_table(&path, &set).expect("export should succeed");
        assert_eq!(rows, 2);

        let contents = std::fs::read_to_string(&path).expect("export file should be readable");
        assert_eq!(contents, "RCH_IN,WEL_OUT\n0.1235,1.0000\n-3.0000,2.5000\n");
    }

    #[test]
    fn rejects_ragged_and_spatial_fields() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("budget.csv");

        let mut ragged = NamedArraySet::new();
        ragged.insert("A_IN", series(&[1.0, 2.0]));
        ragged.insert("B_IN", series(&[1.0]));
        assert!(matches!(
            write_budget_table(&path, &ragged),
            Err(ExportError::RowCount { .. })
        ));

        let mut spatial = NamedArraySet::new();
        spatial.insert("HEAD", ArrayD::zeros(IxDyn(&[2, 2])));
        assert!(matches!(
            write_budget_table(&path, &spatial),
            Err(ExportError::NotSeries { ndim: 2, .. })
        ));

        assert!(matches!(
            write_budget_table(&path, &NamedArraySet::new()),
            Err(ExportError::Empty)
        ));
    }
}
