//! JSON snapshots of reader output and discovery of comparable files.
//!
//! The binary and text simulator formats are parsed elsewhere; the harness
//! consumes the reader's output as `<output file name>.json`.

use crate::domain::{NamedArraySet, OutputKind, OwhmError, OwhmResult, ParsedOutput};
use crate::farm::FarmEntityTimeSeries;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ndarray::{ArrayD, IxDyn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_EXTENSION: &str = "json";
pub const NO_FILE: &str = "no_file";
pub const PARSE_ERROR: &str = "parse_error";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize snapshot '{}': {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write snapshot '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read directory '{}': {source}", path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

impl From<SnapshotError> for OwhmError {
    fn from(error: SnapshotError) -> Self {
        let message = error.to_string();
        match error {
            SnapshotError::Parse { .. } => OwhmError::input_validation("INPUT.SNAPSHOT", message),
            SnapshotError::Serialize { .. } | SnapshotError::InvalidGlob { .. } => {
                OwhmError::internal("SYS.SNAPSHOT", message)
            }
            SnapshotError::Read { .. }
            | SnapshotError::Write { .. }
            | SnapshotError::ReadDirectory { .. } => OwhmError::io_system("IO.SNAPSHOT", message),
        }
    }
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub shape: Vec<usize>,
    /// Row-major values; `null` stands for a value the reader could not represent.
    pub data: Vec<Option<f64>>,
}

impl FieldSnapshot {
    pub fn from_array(values: &ArrayD<f64>) -> Self {
        Self {
            shape: values.shape().to_vec(),
            data: values
                .iter()
                .map(|value| value.is_finite().then_some(*value))
                .collect(),
        }
    }

    fn into_array(self) -> Option<ArrayD<f64>> {
        let data = self
            .data
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), data).ok()
    }
}

/// Heads, list budgets and cell budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArraySnapshot {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub fail_list: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSnapshot>,
}

impl ArraySnapshot {
    pub fn from_set(set: &NamedArraySet) -> Self {
        Self {
            success: true,
            fail_list: Vec::new(),
            fields: set
                .iter()
                .map(|(name, values)| (name.clone(), FieldSnapshot::from_array(values)))
                .collect(),
        }
    }

    /// Converts to a parsed output. Fields whose data does not fill their
    /// shape are moved to the fail list.
    pub fn into_parsed(self) -> ParsedOutput {
        let mut fail_list = self.fail_list;
        let mut records = Vec::with_capacity(self.fields.len());
        for (name, field) in self.fields {
            match field.into_array() {
                Some(values) => records.push((name, values)),
                None => fail_list.push(name),
            }
        }

        let data = NamedArraySet::from_records(records);
        if self.success && fail_list.is_empty() {
            ParsedOutput::loaded(data)
        } else {
            ParsedOutput::failed(data, fail_list)
        }
    }
}

/// Farm-process output table as the reader emits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmSnapshot {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub fail_list: Vec<String>,
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<f64>>,
}

impl FarmSnapshot {
    pub fn failed(reason: &str) -> Self {
        Self {
            success: false,
            fail_list: vec![reason.to_string()],
            header: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn require_loaded(self, label: &str) -> OwhmResult<FarmEntityTimeSeries> {
        if !self.success {
            let reason = if self.fail_list.is_empty() {
                "unknown loading error".to_string()
            } else {
                self.fail_list.join(", ")
            };
            return Err(OwhmError::input_validation(
                "INPUT.UPSTREAM_PARSE",
                format!("{} output failed to load: {}", label, reason),
            ));
        }
        FarmEntityTimeSeries::from_table(&self.header, &self.rows).map_err(|error| {
            if error.is_table_error() {
                OwhmError::input_validation(
                    "INPUT.UPSTREAM_PARSE",
                    format!("{} output failed to load: {}", label, error),
                )
            } else {
                error.into()
            }
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let content = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SnapshotError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_array_snapshot(path: &Path) -> Result<ArraySnapshot, SnapshotError> {
    read_json(path)
}

pub fn load_farm_snapshot(path: &Path) -> Result<FarmSnapshot, SnapshotError> {
    read_json(path)
}

/// Reads an array snapshot, folding I/O and parse errors into an unsuccessful output.
pub fn read_parsed_output(path: &Path) -> ParsedOutput {
    match load_array_snapshot(path) {
        Ok(snapshot) => snapshot.into_parsed(),
        Err(error) => {
            tracing::warn!(%error, "snapshot could not be loaded");
            ParsedOutput::failed(NamedArraySet::new(), vec![failure_tag(&error).to_string()])
        }
    }
}

pub fn read_farm_output(path: &Path) -> FarmSnapshot {
    match load_farm_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(%error, "farm snapshot could not be loaded");
            FarmSnapshot::failed(failure_tag(&error))
        }
    }
}

fn failure_tag(error: &SnapshotError) -> &'static str {
    match error {
        SnapshotError::Parse { .. } => PARSE_ERROR,
        _ => NO_FILE,
    }
}

pub fn write_array_snapshot(path: &Path, set: &NamedArraySet) -> Result<(), SnapshotError> {
    write_json(path, &ArraySnapshot::from_set(set))
}

pub fn write_farm_snapshot(path: &Path, snapshot: &FarmSnapshot) -> Result<(), SnapshotError> {
    write_json(path, snapshot)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SnapshotError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|source| SnapshotError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Maps snapshot file names to the output kind of the file they were read from.
#[derive(Debug, Clone)]
pub struct SnapshotClassifier {
    globs: GlobSet,
    kinds: Vec<OutputKind>,
}

impl SnapshotClassifier {
    pub fn new() -> Result<Self, SnapshotError> {
        let mut builder = GlobSetBuilder::new();
        let mut kinds = Vec::new();
        for kind in OutputKind::ALL {
            for extension in kind.extensions() {
                let pattern = format!("**/*.{}.{}", extension, SNAPSHOT_EXTENSION);
                let glob = GlobBuilder::new(&pattern)
                    .case_insensitive(true)
                    .literal_separator(true)
                    .build()
                    .map_err(|source| SnapshotError::InvalidGlob {
                        pattern: pattern.clone(),
                        source,
                    })?;
                builder.add(glob);
                kinds.push(kind);
            }
        }
        let globs = builder.build().map_err(|source| SnapshotError::InvalidGlob {
            pattern: "<snapshot set>".to_string(),
            source,
        })?;
        Ok(Self { globs, kinds })
    }

    pub fn classify(&self, relative_path: &str) -> Option<OutputKind> {
        self.globs
            .matches(relative_path)
            .first()
            .map(|index| self.kinds[*index])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SnapshotEntry {
    pub relative_path: String,
    pub kind: OutputKind,
}

impl SnapshotEntry {
    /// Output file name without the snapshot extension, used as the model marker.
    pub fn model_name(&self) -> &str {
        let file_name = self
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path);
        file_name
            .strip_suffix(SNAPSHOT_EXTENSION)
            .and_then(|name| name.strip_suffix('.'))
            .unwrap_or(file_name)
    }
}

/// Every snapshot of a known kind under `root`, sorted by relative path.
/// A missing root yields no entries.
pub fn discover_snapshots(root: &Path) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let classifier = SnapshotClassifier::new()?;

    let mut files = Vec::new();
    collect_relative_files(root, root, &mut files)?;
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|relative_path| {
            classifier.classify(&relative_path).map(|kind| SnapshotEntry {
                relative_path,
                kind,
            })
        })
        .collect())
}

fn collect_relative_files(
    root: &Path,
    current_dir: &Path,
    results: &mut Vec<String>,
) -> Result<(), SnapshotError> {
    let read_error = |path: &Path, source| SnapshotError::ReadDirectory {
        path: path.to_path_buf(),
        source,
    };
    let directory = fs::read_dir(current_dir).map_err(|source| read_error(current_dir, source))?;

    for entry in directory {
        let entry = entry.map_err(|source| read_error(current_dir, source))?;
        let entry_path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| read_error(&entry_path, source))?;

        if file_type.is_dir() {
            collect_relative_files(root, &entry_path, results)?;
        } else if file_type.is_file() {
            let relative_path = entry_path
                .strip_prefix(root)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .replace('\\', "/");
            results.push(relative_path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        ArraySnapshot, FarmSnapshot, NO_FILE, PARSE_ERROR, SnapshotClassifier, discover_snapshots,
        read_farm_output, read_parsed_output, write_array_snapshot,
    };
    use crate::domain::{NamedArraySet, OutputKind};
    use ndarray::{ArrayD, IxDyn};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn classifier_uses_inner_extension() {
        let classifier = SnapshotClassifier::new().expect("classifier should build");

        assert_eq!(classifier.classify("model.lst.json"), Some(OutputKind::ListBudget));
        assert_eq!(classifier.classify("nested/model.LIST.json"), Some(OutputKind::ListBudget));
        assert_eq!(classifier.classify("a/b/model.hds.json"), Some(OutputKind::Head));
        assert_eq!(classifier.classify("model.ufh.json"), Some(OutputKind::Head));
        assert_eq!(classifier.classify("model.cbc.json"), Some(OutputKind::CellBudget));
        assert_eq!(classifier.classify("fdsbal.out.json"), Some(OutputKind::FarmOutput));
        assert_eq!(classifier.classify("model.lst"), None);
        assert_eq!(classifier.classify("notes.txt.json"), None);
    }

    #[test]
    fn missing_snapshot_reports_no_file() {
        let temp = TempDir::new().expect("tempdir should be created");
        let parsed = read_parsed_output(&temp.path().join("absent.lst.json"));

        assert!(!parsed.success());
        assert_eq!(parsed.fail_list(), &[NO_FILE.to_string()]);

        let farm = read_farm_output(&temp.path().join("absent.out.json"));
        assert!(!farm.success);
        assert_eq!(farm.fail_list, vec![NO_FILE.to_string()]);
    }

    #[test]
    fn malformed_snapshot_reports_parse_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("broken.hds.json");
        fs::write(&path, "{ not json").expect("fixture should be written");

        assert_eq!(read_parsed_output(&path).fail_list(), &[PARSE_ERROR.to_string()]);
    }

    #[test]
    fn snapshot_fields_load_with_shape_and_nulls() {
        let snapshot: ArraySnapshot = serde_json::from_str(
            r#"{
              "fields": {
                "head": { "shape": [2, 2], "data": [1.0, 2.0, null, 4.0] },
                "totim": { "shape": [1], "data": [10.0] },
                "bad": { "shape": [3], "data": [1.0] }
              }
            }"#,
        )
        .expect("snapshot json should parse");

        let parsed = snapshot.into_parsed();
        assert!(!parsed.success());
        assert_eq!(parsed.fail_list(), &["bad".to_string()]);
        assert_eq!(parsed.data().keys(), vec!["HEAD"]);
        let head = parsed.data().get("HEAD").expect("head should load");
        assert_eq!(head.shape(), &[2, 2]);
        assert!(head[[1, 0].as_slice()].is_nan());
    }

    #[test]
    fn written_snapshot_reads_back_as_loaded() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("out/model.lst.json");
        let mut set = NamedArraySet::new();
        set.insert(
            "WEL_IN",
            ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.5, 2.5]).expect("shape should match data"),
        );

        write_array_snapshot(&path, &set).expect("snapshot should be written");
        let parsed = read_parsed_output(&path);

        assert!(parsed.success());
        assert_eq!(parsed.data(), &set);
    }

    #[test]
    fn farm_snapshot_builds_entity_series() {
        let snapshot: FarmSnapshot = serde_json::from_str(
            r#"{
              "header": ["PER", "STP", "DAYS", "FID", "Q-IN"],
              "rows": [[1, 1, 1, 1, 10.0], [1, 1, 1, 2, 20.0]]
            }"#,
        )
        .expect("farm json should parse");

        let series = snapshot
            .require_loaded("reference")
            .expect("farm table should load");
        assert_eq!(series.entity_ids(), vec![1, 2]);
    }

    #[test]
    fn farm_table_without_entity_column_fails_to_load() {
        let snapshot: FarmSnapshot = serde_json::from_str(
            r#"{
              "header": ["PER", "STP", "DAYS", "Q-IN"],
              "rows": [[1, 1, 1, 10.0]]
            }"#,
        )
        .expect("farm json should parse");

        let error = snapshot
            .require_loaded("candidate")
            .expect_err("missing fid column should fail");
        assert!(
            error
                .diagnostic_line()
                .starts_with("ERROR: [INPUT.UPSTREAM_PARSE] candidate output failed to load:")
        );
    }

    #[test]
    fn discovery_walks_tree_and_skips_unknown_files() {
        let temp = TempDir::new().expect("tempdir should be created");
        let root = temp.path();
        fs::create_dir_all(root.join("nwt")).expect("fixture directory should be created");
        for name in ["b.lst.json", "nwt/a.hds.json", "readme.md", "nwt/c.txt.json"] {
            fs::write(root.join(name), "{}").expect("fixture should be written");
        }

        let entries = discover_snapshots(root).expect("discovery should succeed");
        let found: Vec<(&str, OutputKind)> = entries
            .iter()
            .map(|entry| (entry.relative_path.as_str(), entry.kind))
            .collect();
        assert_eq!(
            found,
            vec![("b.lst.json", OutputKind::ListBudget), ("nwt/a.hds.json", OutputKind::Head)]
        );
        assert_eq!(entries[1].model_name(), "a.hds");

        assert!(discover_snapshots(&root.join("missing")).expect("missing root is empty").is_empty());
    }
}
