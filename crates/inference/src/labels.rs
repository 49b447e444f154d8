use anyhow::Context;
use std::fs;
use std::path::Path;

const UNKNOWN_LABEL: &str = "unknown";

/// Class names indexed by label, one per line of a labels file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels {}", path.display()))?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        Self::new(
            contents
                .lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .collect(),
        )
    }

    pub fn name(&self, label: usize) -> &str {
        self.names
            .get(label)
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
