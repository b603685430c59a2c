//! Converter executable discovery.
//!
//! The [`ToolRegistry`] locates the executables behind each
//! [`EngineKind`]: an explicitly configured path first, then the usual
//! install locations for the platform, then `PATH`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dr_core::config::{EngineKind, EnginesConfig};
use serde::{Deserialize, Serialize};

/// Install locations checked for LibreOffice before falling back to `PATH`.
const LIBREOFFICE_KNOWN_PATHS: &[&str] = &[
    "/usr/bin/libreoffice",
    "/usr/bin/soffice",
    "/usr/local/bin/libreoffice",
    "/usr/local/bin/soffice",
    "/usr/lib/libreoffice/program/soffice",
    "/opt/libreoffice/program/soffice",
    "/snap/bin/libreoffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
    r"C:\Program Files\LibreOffice\program\soffice.exe",
    r"C:\Program Files (x86)\LibreOffice\program\soffice.exe",
];

const LIBREOFFICE_PATH_NAMES: &[&str] = &["libreoffice", "soffice"];

const DOCX2PDF_PATH_NAMES: &[&str] = &["docx2pdf"];

/// How a tool was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discovery {
    Configured,
    KnownPath,
    SearchPath,
}

/// A located converter executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub kind: EngineKind,
    pub path: PathBuf,
    pub discovery: Discovery,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `--version` output, if available.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool locations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<EngineKind, ToolConfig>,
}

impl ToolRegistry {
    /// Discover executables for every configured engine.
    ///
    /// A configured path that does not exist is logged and ignored, and
    /// discovery continues with the known locations.
    pub fn discover(config: &EnginesConfig) -> Self {
        let mut tools = HashMap::new();

        for &kind in &config.order {
            let (configured, known, names) = match kind {
                EngineKind::LibreOffice => (
                    config.libreoffice_path.as_deref(),
                    LIBREOFFICE_KNOWN_PATHS,
                    LIBREOFFICE_PATH_NAMES,
                ),
                EngineKind::Docx2Pdf => {
                    (config.docx2pdf_path.as_deref(), &[][..], DOCX2PDF_PATH_NAMES)
                }
            };

            if let Some((path, discovery)) = resolve(kind, configured, known, names) {
                tools.insert(
                    kind,
                    ToolConfig {
                        kind,
                        path,
                        discovery,
                    },
                );
            }
        }

        Self { tools }
    }

    /// Registry with explicit locations, bypassing discovery.
    pub fn from_tools(tools: impl IntoIterator<Item = ToolConfig>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.kind, t)).collect(),
        }
    }

    pub fn get(&self, kind: EngineKind) -> Option<&ToolConfig> {
        self.tools.get(&kind)
    }

    /// Return the location for `kind`, or [`dr_core::Error::Tool`] if it was
    /// not found during discovery.
    pub fn require(&self, kind: EngineKind) -> dr_core::Result<&ToolConfig> {
        self.tools.get(&kind).ok_or_else(|| {
            dr_core::Error::tool(
                kind.as_str(),
                format!("{kind} not found; is it installed and in PATH?"),
            )
        })
    }

    /// Check the given engines and return availability information.
    pub fn check_all(&self, kinds: &[EngineKind]) -> Vec<ToolInfo> {
        kinds
            .iter()
            .map(|&kind| match self.tools.get(&kind) {
                Some(cfg) => ToolInfo {
                    name: kind.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: kind.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

fn resolve(
    kind: EngineKind,
    configured: Option<&Path>,
    known: &[&str],
    names: &[&str],
) -> Option<(PathBuf, Discovery)> {
    if let Some(p) = configured {
        if p.is_file() {
            return Some((p.to_path_buf(), Discovery::Configured));
        }
        tracing::warn!(
            engine = %kind,
            path = %p.display(),
            "Configured executable does not exist; searching default locations"
        );
    }

    if let Some(p) = known.iter().map(Path::new).find(|p| p.is_file()) {
        return Some((p.to_path_buf(), Discovery::KnownPath));
    }

    names
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|p| (p, Discovery::SearchPath))
}

/// Run `<tool> --version` and return the first non-empty line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("--version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
