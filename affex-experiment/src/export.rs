use affex_core::ExportError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Side channel that hands the serialized record to the participant/operator.
pub trait ExportSink {
    fn deliver(&self, filename: &str, contents: &str) -> Result<PathBuf, ExportError>;
}

/// Writes exports into a directory, creating it if needed.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ExportSink for FileSink {
    fn deliver(&self, filename: &str, contents: &str) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        fs::write(&path, contents)?;
        info!("Wrote {} bytes to {}", contents.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_into_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("out"));
        let path = sink.deliver("a.csv", "x\n").unwrap();
        assert_eq!(path, dir.path().join("out").join("a.csv"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\n");
    }
}
