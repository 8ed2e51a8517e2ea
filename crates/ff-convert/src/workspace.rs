//! Per-request scratch directory.
//!
//! Layout:
//!
//! ```text
//! <tmp>/in/source.<ext>      uploaded bytes
//! <tmp>/out/source.<format>  converter output
//! <tmp>/scratch/             intermediate files
//! ```
//!
//! The directory is deleted when the workspace is dropped.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempDir;

use ff_core::{Error, Result};

const STEM: &str = "source";

pub struct ConversionWorkspace {
    dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl ConversionWorkspace {
    /// Create the directories. `source_ext` defaults to `bin`.
    pub fn new(source_ext: Option<&str>, target_format: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fileforge-")
            .tempdir()
            .map_err(|e| workspace_error(format!("failed to create temp dir: {e}")))?;

        for sub in ["in", "out", "scratch"] {
            std::fs::create_dir(dir.path().join(sub))
                .map_err(|e| workspace_error(format!("failed to create {sub}/: {e}")))?;
        }

        let ext = source_ext.unwrap_or("bin");
        let input = dir.path().join("in").join(format!("{STEM}.{ext}"));
        let output = dir.path().join("out").join(format!("{STEM}.{target_format}"));

        Ok(Self { dir, input, output })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub async fn write_input(&self, data: &[u8]) -> Result<()> {
        tokio::fs::write(&self.input, data).await?;
        Ok(())
    }

    /// Read the converter output; a missing or empty file is a failure.
    pub async fn read_output(&self, tool: &str) -> Result<Bytes> {
        match tokio::fs::read(&self.output).await {
            Ok(data) if !data.is_empty() => Ok(Bytes::from(data)),
            Ok(_) => Err(Error::tool(tool, "produced an empty output file")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::tool(tool, "produced no output file"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn workspace_error(message: String) -> Error {
    Error::tool("workspace", message)
}
