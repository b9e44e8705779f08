use std::fs;
use std::path::{Path, PathBuf};

/// Best-effort persistence of transformed buffers for offline inspection
///
/// Write failures are logged and swallowed: whether a diagnostic artifact landed on disk never
/// decides the outcome of a transformation.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    base_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> ArtifactWriter {
        ArtifactWriter {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Path for one artifact: `<base>/<slashed-class-name>[.<label>].class`
    pub fn artifact_path(&self, slashed_name: &str, label: Option<&str>) -> PathBuf {
        let file_name = match label {
            Some(label) => format!("{}.{}.class", slashed_name, label),
            None => format!("{}.class", slashed_name),
        };
        self.base_dir.join(file_name)
    }

    /// Write one buffer, creating intermediate directories as needed
    pub fn write(&self, slashed_name: &str, label: Option<&str>, bytes: &[u8]) {
        let path = self.artifact_path(slashed_name, label);
        if let Err(err) = self.try_write(&path, bytes) {
            log::error!("cannot write class file artifact {}: {}", path.display(), err);
        } else {
            log::info!("dumped class file artifact {}", path.display());
        }
    }

    fn try_write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }
}

#[cfg(test)]
mod artifact_tests {
    use super::*;

    #[test]
    fn paths_keep_package_directories() {
        let writer = ArtifactWriter::new("/tmp/dump");
        assert_eq!(
            writer.artifact_path("com/acme/Widget", None),
            PathBuf::from("/tmp/dump/com/acme/Widget.class")
        );
        assert_eq!(
            writer.artifact_path("com/acme/Widget", Some("unrepaired")),
            PathBuf::from("/tmp/dump/com/acme/Widget.unrepaired.class")
        );
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        writer.write("com/acme/Widget", None, &[0xCA, 0xFE]);
        let written = fs::read(dir.path().join("com/acme/Widget.class")).unwrap();
        assert_eq!(written, vec![0xCA, 0xFE]);
    }

    #[test]
    fn write_failures_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, b"a plain file where a directory must go").unwrap();
        let writer = ArtifactWriter::new(&blocker);
        writer.write("com/acme/Widget", None, &[0xCA, 0xFE]);
    }
}
