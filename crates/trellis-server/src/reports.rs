//! Compliance report persistence.
//!
//! Generated reports land under `data/compliance_reports/` as
//! `<sanitized-org-id>_<epoch-ms>.<ext>`. Rendering PDFs is an external
//! concern; this sink only writes bytes it is handed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use trellis_core::error::CoreError;

/// File sink for generated compliance reports
#[derive(Debug, Clone)]
pub struct ReportSink {
    base_dir: PathBuf,
}

impl ReportSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write a JSON report; returns the file name
    pub async fn write_json(&self, org_id: Uuid, report: &Value) -> Result<String, CoreError> {
        let bytes = serde_json::to_vec_pretty(report)?;
        self.write(org_id, "json", &bytes).await
    }

    /// Write pre-rendered PDF bytes; returns the file name
    pub async fn write_pdf(&self, org_id: Uuid, bytes: &[u8]) -> Result<String, CoreError> {
        self.write(org_id, "pdf", bytes).await
    }

    async fn write(&self, org_id: Uuid, ext: &str, bytes: &[u8]) -> Result<String, CoreError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to create reports dir: {}", e)))?;

        let file_name = format!(
            "{}_{}.{}",
            sanitize(&org_id.to_string()),
            Utc::now().timestamp_millis(),
            ext
        );
        let path = self.base_dir.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CoreError::Internal(format!("failed to write report: {}", e)))?;
        Ok(file_name)
    }
}

/// Keep only characters safe in a file name
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-123"), "abc-123");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
    }

    #[tokio::test]
    async fn test_write_json_report() {
        let dir = std::env::temp_dir().join(format!("trellis-reports-{}", Uuid::new_v4()));
        let sink = ReportSink::new(&dir);
        let org = Uuid::new_v4();

        let name = sink
            .write_json(org, &json!({"summary": {"total": 3}}))
            .await
            .unwrap();
        assert!(name.ends_with(".json"));
        assert!(name.starts_with(&sanitize(&org.to_string())));

        let written = tokio::fs::read_to_string(dir.join(&name)).await.unwrap();
        assert!(written.contains("\"total\": 3"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
