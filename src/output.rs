//! Output sink
//!
//! The replay script goes to standard output or to a file. File output
//! is atomic: the script is written to a temporary file in the target
//! directory and renamed into place, so a consumer never sees a
//! truncated script.

use crate::error::{CarveError, Result};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the rendered script goes.
#[derive(Debug, Clone)]
pub enum OutputSink {
    Stdout,
    File(PathBuf),
}

impl OutputSink {
    /// Resolve the sink from `--output`. A directory path gets a
    /// generated dump file name inside it; no path means stdout.
    pub fn resolve(
        output: Option<PathBuf>,
        schema: &str,
        table: &str,
        first_pk: &str,
    ) -> Self {
        match output {
            None => OutputSink::Stdout,
            Some(path) if path.is_dir() => {
                OutputSink::File(path.join(dump_file_name(schema, table, first_pk)))
            }
            Some(path) => OutputSink::File(path),
        }
    }

    /// Write the complete script. Nothing is flushed anywhere before this
    /// point, so a failed or cancelled run leaves no partial output.
    pub fn write(&self, script: &str) -> Result<()> {
        match self {
            OutputSink::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(script.as_bytes())?;
                stdout.flush()?;
                Ok(())
            }
            OutputSink::File(path) => {
                let parent = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                std::fs::create_dir_all(&parent)?;

                let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
                tmp.write_all(script.as_bytes())?;
                tmp.flush()?;
                tmp.persist(path)
                    .map_err(|e| CarveError::Output(e.error))?;

                info!(path = %path.display(), bytes = script.len(), "replay script written");
                Ok(())
            }
        }
    }
}

/// Default dump directory: `PGCARVE_DUMP_DIR`, or `~/.pgcarve/dumps`.
pub fn default_dump_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    let home = dirs::home_dir()
        .ok_or_else(|| CarveError::Usage("no home directory available for dump output".to_string()))?;
    Ok(home.join(".pgcarve").join("dumps"))
}

/// `{schema}_{table}_{firstpk}_{timestamp}.sql`
pub fn dump_file_name(schema: &str, table: &str, first_pk: &str) -> String {
    format!(
        "{}_{}_{}_{}.sql",
        schema,
        table,
        first_pk,
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_write_is_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.sql");

        let sink = OutputSink::File(path.clone());
        sink.write("BEGIN;\nCOMMIT;\n").unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "BEGIN;\nCOMMIT;\n");
    }

    #[test]
    fn test_file_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.sql");
        std::fs::write(&path, "old contents").unwrap();

        OutputSink::File(path.clone()).write("new contents").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents");
    }

    #[test]
    fn test_directory_output_generates_name() {
        let dir = tempdir().unwrap();
        let sink = OutputSink::resolve(Some(dir.path().to_path_buf()), "public", "users", "3");

        let OutputSink::File(path) = sink else {
            panic!("expected file sink");
        };
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("public_users_3_"));
        assert!(name.ends_with(".sql"));
    }

    #[test]
    fn test_no_output_means_stdout() {
        assert!(matches!(
            OutputSink::resolve(None, "public", "users", "3"),
            OutputSink::Stdout
        ));
    }
}
