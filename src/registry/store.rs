//! JSON-lines record file backing a registry.
//!
//! One descriptor per line. The file is only ever rewritten whole (temp file
//! then rename), never appended to.

use std::path::{Path, PathBuf};

use crate::registry::ServiceDescriptor;
use crate::types::{Error, Result};

/// Outcome of reading the record file.
#[derive(Debug, Default)]
pub struct FileContents {
    pub records: Vec<ServiceDescriptor>,
    /// (line number, reason) for every line that did not decode.
    pub malformed: Vec<(usize, String)>,
}

#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing file reads as empty.
    pub fn read_all(&self) -> Result<FileContents> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileContents::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut contents = FileContents::default();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match ServiceDescriptor::decode(line.as_bytes()) {
                Ok(descriptor) => contents.records.push(descriptor),
                Err(e) => contents.malformed.push((index + 1, e.to_string())),
            }
        }
        Ok(contents)
    }

    /// Replace the file with exactly `records`, one per line.
    pub fn write_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a ServiceDescriptor>,
    ) -> Result<()> {
        let mut data = Vec::new();
        for record in records {
            data.extend_from_slice(&record.encode()?);
            data.push(b'\n');
        }

        let tmp = self.tmp_path();
        std::fs::write(&tmp, &data)
            .map_err(|e| Error::persist(format!("{}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::persist(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceId;

    fn descriptor(id: &str, address: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(
            ServiceId::from_string(id.to_string()).unwrap(),
            format!("{} service", id),
            address,
            id,
        )
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("absent.json"));
        let contents = file.read_all().unwrap();
        assert!(contents.records.is_empty());
        assert!(contents.malformed.is_empty());
    }

    #[test]
    fn test_rewrite_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordFile::new(dir.path().join("services.json"));

        let first = [descriptor("hello", "tcp://localhost:5560"), descriptor("time", "tcp://localhost:5580")];
        file.write_all(first.iter()).unwrap();
        let second = [descriptor("hello", "tcp://localhost:5561")];
        file.write_all(second.iter()).unwrap();

        let contents = file.read_all().unwrap();
        assert_eq!(contents.records, second.to_vec());
        assert!(!file.tmp_path().exists());
    }

    #[test]
    fn test_malformed_lines_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        let good = String::from_utf8(descriptor("hello", "tcp://localhost:5560").encode().unwrap()).unwrap();
        std::fs::write(&path, format!("{good}\n{{not json\n\n{good}\n")).unwrap();

        let contents = RecordFile::new(&path).read_all().unwrap();
        assert_eq!(contents.records.len(), 2);
        assert_eq!(contents.malformed.len(), 1);
        assert_eq!(contents.malformed[0].0, 2);
    }

    #[test]
    fn test_unwritable_location_is_persist_error() {
        let file = RecordFile::new("/nonexistent-dir/svcfabric/services.json");
        let err = file
            .write_all([descriptor("hello", "tcp://localhost:5560")].iter())
            .unwrap_err();
        assert!(matches!(err, Error::Persist(_)));
    }
}
