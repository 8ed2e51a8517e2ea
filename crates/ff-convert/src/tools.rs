//! Discovery of converter binaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use ff_core::config::ToolsConfig;
use ff_core::{Error, Result};

/// Tools the registry knows about, by registry name.
pub const KNOWN_TOOLS: &[&str] = &["ffmpeg", "magick", "libreoffice", "7z", "pandoc"];

/// Executable names tried on `PATH` for each registry name, in order.
fn candidates(name: &str) -> &'static [&'static str] {
    match name {
        "ffmpeg" => &["ffmpeg"],
        "magick" => &["magick", "convert"],
        "libreoffice" => &["soffice", "libreoffice"],
        "7z" => &["7z", "7zz", "7za"],
        "pandoc" => &["pandoc"],
        _ => &[],
    }
}

fn configured_path<'a>(config: &'a ToolsConfig, name: &str) -> Option<&'a Path> {
    match name {
        "ffmpeg" => config.ffmpeg_path.as_deref(),
        "magick" => config.magick_path.as_deref(),
        "libreoffice" => config.libreoffice_path.as_deref(),
        "7z" => config.sevenzip_path.as_deref(),
        "pandoc" => config.pandoc_path.as_deref(),
        _ => None,
    }
}

/// Availability of one tool, as printed by `check-tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolved locations of the converter binaries.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Resolve every known tool.
    ///
    /// A configured path wins when it exists; otherwise `PATH` is searched.
    /// Missing tools are left out and reported by [`require`](Self::require).
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let resolved = match configured_path(config, name) {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(
                        tool = name,
                        path = %p.display(),
                        "Configured tool path does not exist; searching PATH"
                    );
                    find_on_path(name)
                }
                None => find_on_path(name),
            };

            if let Some(path) = resolved {
                tools.insert(name.to_string(), path);
            }
        }

        Self { tools }
    }

    /// Registry with explicit locations, skipping discovery.
    pub fn from_paths<N, P>(paths: impl IntoIterator<Item = (N, P)>) -> Self
    where
        N: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            tools: paths
                .into_iter()
                .map(|(n, p)| (n.into(), p.into()))
                .collect(),
        }
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    pub fn require(&self, name: &str) -> Result<&Path> {
        self.path(name).ok_or_else(|| {
            Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Report every known tool, probing versions of the ones found.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(name, path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    candidates(name)
        .iter()
        .find_map(|exe| which::which(exe).ok())
}

/// First line of the tool's version banner.
fn detect_version(name: &str, path: &Path) -> Option<String> {
    let flag = match name {
        "ffmpeg" => "-version",
        "7z" => "i",
        _ => "--version",
    };
    let output = Command::new(path).arg(flag).output().ok()?;
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_does_not_panic_without_tools() {
        let registry = ToolRegistry::discover(&ToolsConfig::default());
        assert_eq!(registry.check_all().len(), KNOWN_TOOLS.len());
    }

    #[test]
    fn require_missing_tool_is_tool_error() {
        let registry = ToolRegistry::default();
        let err = registry.require("pandoc").unwrap_err();
        assert_eq!(err.http_status(), 502);
        assert!(err.to_string().contains("pandoc"));
    }

    #[test]
    fn configured_path_wins_when_present() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = ToolsConfig {
            pandoc_path: Some(file.path().to_path_buf()),
            ..ToolsConfig::default()
        };
        let registry = ToolRegistry::discover(&config);
        assert_eq!(registry.path("pandoc"), Some(file.path()));
    }

    #[test]
    fn from_paths_registers_explicit_tools() {
        let registry = ToolRegistry::from_paths([("magick", "/opt/im/magick")]);
        assert_eq!(
            registry.require("magick").unwrap(),
            Path::new("/opt/im/magick")
        );
        assert!(registry.path("ffmpeg").is_none());

        let infos = registry.check_all();
        let magick = infos.iter().find(|i| i.name == "magick").unwrap();
        assert!(magick.available);
        assert!(magick.version.is_none());
    }
}
