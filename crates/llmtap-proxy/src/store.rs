//! Append-only JSONL capture store.
//!
//! One record per line, written only after an exchange has fully terminated.
//! Appends are serialized through a mutex so concurrent exchanges queue in
//! arrival order; the store is the only writer of the file during a proxy
//! run. Durability is best-effort (flush, no fsync).

use anyhow::{Context, Result};
use llmtap_types::CaptureRecord;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct CaptureStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl CaptureStore {
    /// Open (creating parents and the file as needed) for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create capture dir {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open capture log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize one record as a JSON line and append it.
    pub async fn append(&self, record: &CaptureRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serialize capture record")?;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .with_context(|| format!("append to capture log {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmtap_types::CapturedRequest;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn record(id: &str) -> CaptureRecord {
        CaptureRecord {
            id: id.to_string(),
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            request: CapturedRequest {
                url: "/v1/chat/completions".to_string(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                body: serde_json::json!({"messages": []}),
            },
            response: None,
            duration_ms: 1,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_stay_line_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");
        let store = Arc::new(CaptureStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(&record(&format!("r{}", i))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 20);
        for line in lines {
            let parsed: CaptureRecord = serde_json::from_str(line).unwrap();
            assert!(parsed.id.starts_with('r'));
        }
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/capture.jsonl");
        let store = CaptureStore::open(&path).unwrap();
        store.append(&record("r1")).await.unwrap();
        assert!(path.exists());
    }
}
