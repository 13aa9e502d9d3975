//! Class index to class name resolution.

pub const UNKNOWN_LABEL: &str = "unknown";

const DEFAULT_LABELS: [&str; 4] = ["car", "motorcycle", "bus", "truck"];

/// Fixed label table. Indices outside the table resolve to `"unknown"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn name(&self, class_index: usize) -> &str {
        self.names
            .get(class_index)
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

impl Default for LabelTable {
    fn default() -> Self {
        Self::new(DEFAULT_LABELS.iter().map(|s| s.to_string()).collect())
    }
}
