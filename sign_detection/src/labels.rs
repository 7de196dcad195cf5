use crate::config::LabelsConfig;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

pub const UNKNOWN_LABEL: &str = "Unknown";

const DEFAULT_GESTURES: [(i64, &str); 5] = [
    (1, "Hello"),
    (2, "Yes"),
    (3, "No"),
    (4, "Thank You"),
    (5, "I Love You"),
];

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line {line}: {content}")]
    InvalidLine { line: usize, content: String },
}

/// Class id to display name mapping. Built once at startup and shared
/// read-only between requests.
#[derive(Debug, Clone)]
pub struct LabelMap {
    names: HashMap<i64, String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            names: DEFAULT_GESTURES
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
        }
    }
}

impl LabelMap {
    pub fn new(labels_cfg: Option<&LabelsConfig>) -> Result<Self, LabelsError> {
        match labels_cfg {
            Some(cfg) => {
                let labels = load_labels(&cfg.get_path())?;
                tracing::info!("Loaded {} labels from {:?}", labels.len(), cfg.get_path());
                Ok(labels)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn name(&self, class_id: i64) -> &str {
        self.names
            .get(&class_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Reads `id,name` lines. Blank lines and `#` comments are skipped.
pub fn load_labels(filepath: &Path) -> Result<LabelMap, LabelsError> {
    let file = File::open(filepath)?;
    parse_labels(io::BufReader::new(file))
}

fn parse_labels<R: BufRead>(reader: R) -> Result<LabelMap, LabelsError> {
    let mut names = HashMap::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let invalid = || LabelsError::InvalidLine {
            line: index + 1,
            content: line.clone(),
        };

        let (id, name) = trimmed.split_once(',').ok_or_else(invalid)?;
        let id: i64 = id.trim().parse().map_err(|_| invalid())?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }

        names.insert(id, name.to_string());
    }

    Ok(LabelMap { names })
}
