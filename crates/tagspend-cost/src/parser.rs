//! Parser for cost-export JSON files.
//!
//! Accepts either a bare JSON array of resources or an object wrapping the
//! array under `results` (or `result`), the shape vendor report APIs return.
//! Field names are camelCase; tags are `{"vendorKey", "vendorValue"}` pairs.
//! Entries that fail to deserialize are skipped with a warning so one bad
//! resource does not drop the whole export.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CostError, Result};
use crate::models::ResourceRecord;

/// Wrapper fields searched for the resource array, in order.
const RESULT_FIELDS: &[&str] = &["results", "result"];

/// Reads resource records from export files.
#[derive(Debug, Default, Clone)]
pub struct ExportParser;

impl ExportParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single export file, or every `.json` file if `path` is a
    /// directory.
    pub fn parse_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<ResourceRecord>> {
        let path = path.as_ref();
        if path.is_dir() {
            self.parse_directory(path)
        } else {
            self.parse_file(path)
        }
    }

    /// Parse all `.json` files in a directory, in file name order.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn parse_directory<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<ResourceRecord>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CostError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Directory not found: {}", dir.display()),
            )));
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut all_records = Vec::new();
        for path in files {
            match self.parse_file(&path) {
                Ok(records) => {
                    debug!(file = %path.display(), count = records.len(), "Parsed export file");
                    all_records.extend(records);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to parse export file");
                }
            }
        }

        Ok(all_records)
    }

    /// Parse a single export file.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<ResourceRecord>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        self.parse_str(&contents, path)
    }

    /// Parse export JSON. `origin` is only used in error messages.
    pub fn parse_str(&self, contents: &str, origin: &Path) -> Result<Vec<ResourceRecord>> {
        let value: Value = serde_json::from_str(contents)?;
        let entries = Self::resource_array(value).ok_or_else(|| CostError::InvalidExport {
            path: origin.to_path_buf(),
            message: "expected an array of resources or an object with a `results` array".into(),
        })?;

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ResourceRecord>(entry) {
                Ok(record) if record.resource_identifier.is_empty() => {
                    warn!(index, file = %origin.display(), "Skipping resource without identifier");
                }
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(index, file = %origin.display(), error = %e, "Skipping malformed resource");
                }
            }
        }

        Ok(records)
    }

    fn resource_array(value: Value) -> Option<Vec<Value>> {
        match value {
            Value::Array(entries) => Some(entries),
            Value::Object(mut map) => RESULT_FIELDS
                .iter()
                .find_map(|field| match map.remove(*field) {
                    Some(Value::Array(entries)) => Some(entries),
                    _ => None,
                }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tag;

    const EXPORT: &str = r#"{
        "results": [
            {
                "service": "ec2",
                "name": "web-1",
                "resourceIdentifier": "i-0001",
                "vendorAccountId": "111122223333",
                "provider": "Amazon",
                "region": "us-east-1",
                "os": "linux",
                "nodeType": "m5.large",
                "effectiveHourly": 0.096,
                "totalSpend": 70.08,
                "lastSeen": "2026-03-01T00:00:00Z",
                "hoursRunning": 730,
                "tags": [
                    {"vendorKey": "tag_user_env", "vendorValue": "prod"},
                    {"vendorKey": "tag_user_Name", "vendorValue": "web-1"}
                ]
            },
            {"resourceIdentifier": "i-0002", "totalSpend": 3.0}
        ]
    }"#;

    fn origin() -> &'static Path {
        Path::new("export.json")
    }

    #[test]
    fn test_parse_wrapped_results() {
        let records = ExportParser::new().parse_str(EXPORT, origin()).unwrap();

        assert_eq!(records.len(), 2);
        let web = &records[0];
        assert_eq!(web.resource_identifier, "i-0001");
        assert_eq!(web.node_type, "m5.large");
        assert_eq!(web.hours_running, 730);
        assert!(web.last_seen.is_some());
        assert_eq!(web.tags[0], Tag::new("tag_user_env", "prod"));

        let bare = &records[1];
        assert!(bare.tags.is_empty());
        assert_eq!(bare.effective_hourly, 0.0);
    }

    #[test]
    fn test_parse_bare_array() {
        let json = r#"[{"resourceIdentifier": "i-1"}, {"resourceIdentifier": "i-2"}]"#;
        let records = ExportParser::new().parse_str(json, origin()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_parse_singular_result_field() {
        let json = r#"{"result": [{"resourceIdentifier": "i-1"}]}"#;
        let records = ExportParser::new().parse_str(json, origin()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let json = r#"[
            {"resourceIdentifier": "i-1"},
            {"name": "no identifier"},
            {"resourceIdentifier": ""},
            {"resourceIdentifier": "i-2", "totalSpend": "not a number"}
        ]"#;
        let records = ExportParser::new().parse_str(json, origin()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].resource_identifier, "i-1");
    }

    #[test]
    fn test_unrecognized_shape() {
        let err = ExportParser::new()
            .parse_str(r#"{"data": []}"#, origin())
            .unwrap_err();
        assert!(matches!(err, CostError::InvalidExport { .. }));

        let err = ExportParser::new().parse_str("not json", origin()).unwrap_err();
        assert!(matches!(err, CostError::Json(_)));
    }

    #[test]
    fn test_parse_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"[{"resourceIdentifier": "i-b"}]"#).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"resourceIdentifier": "i-a"}]"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let records = ExportParser::new().parse_path(dir.path()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.resource_identifier.as_str()).collect();
        assert_eq!(ids, vec!["i-a", "i-b"]);
    }

    #[test]
    fn test_parse_missing_directory() {
        let err = ExportParser::new()
            .parse_directory("/nonexistent/tagspend-exports")
            .unwrap_err();
        assert!(matches!(err, CostError::Io(_)));
    }
}
