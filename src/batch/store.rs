// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{Error, Result};

/// Flat mapping of scheduler directives, loaded once per job submission and
/// immutable afterwards. Values may still contain `%NAME%` placeholder
/// tokens; this store does not interpret them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchConfig {
    entries: BTreeMap<String, String>,
}

impl BatchConfig {
    /// Load a `KEY=VALUE` directive file. Blank lines and `#` comments are
    /// ignored; a repeated key keeps its last value.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let entries = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let config = BatchConfig::parse(
            "# cluster profile\n\nNODES=4\n  WALLTIME = 01:00:00  \n# trailing comment\n",
        );
        assert_eq!(config.len(), 2);
        assert_eq!(config.get("NODES"), Some("4"));
        assert_eq!(config.get("WALLTIME"), Some("01:00:00"));
    }

    #[test]
    fn parse_keeps_equals_signs_inside_values() {
        let config = BatchConfig::parse("EXEC_COMMAND=env FOO=bar srun pic\n");
        assert_eq!(config.get("EXEC_COMMAND"), Some("env FOO=bar srun pic"));
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let config = BatchConfig::parse("NODES=2\nNODES=8\n");
        assert_eq!(config.get("NODES"), Some("8"));
    }

    #[test]
    fn lines_without_separator_are_ignored() {
        let config = BatchConfig::parse("garbage line\nNODES=4\n");
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn load_missing_file_reports_config_not_found() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.cfg");
        let err = BatchConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { path: p, .. } if p == path));
    }

    #[test]
    fn load_reads_file_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cluster.cfg");
        std::fs::write(&path, "PARTITION=gpu\n").unwrap();
        let config = BatchConfig::load(&path).unwrap();
        assert_eq!(config.get("PARTITION"), Some("gpu"));
    }
}
