//! Conversion engines.
//!
//! An engine turns one input document into a PDF at a given output path by
//! driving an external program. Engines never return errors: every way an
//! attempt can go wrong is folded into [`ConvertOutcome`] so the fallback
//! chain can decide what to do next.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dr_core::config::{EngineKind, EnginesConfig};

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Result of one conversion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertOutcome {
    Success,
    Failure(String),
    TimedOut,
}

/// A document-to-PDF converter.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Stable engine name, used in logs and as `engine_used` on jobs.
    fn name(&self) -> &str;

    /// Whether the engine can run on this host. Called once at startup.
    async fn probe_availability(&self) -> bool;

    /// Convert `input` into a PDF at `output` within `timeout`.
    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> ConvertOutcome;
}

/// Shared handle to an engine.
pub type SharedEngine = Arc<dyn ConversionEngine>;

/// Build the configured engines in priority order.
pub fn build_engines(config: &EnginesConfig, registry: &ToolRegistry) -> Vec<SharedEngine> {
    config
        .order
        .iter()
        .map(|&kind| {
            let program = registry.get(kind).map(|t| t.path.clone());
            let engine: SharedEngine = match kind {
                EngineKind::LibreOffice => Arc::new(LibreOfficeEngine::new(program)),
                EngineKind::Docx2Pdf => Arc::new(Docx2PdfEngine::new(program)),
            };
            engine
        })
        .collect()
}

fn outcome_from_error(engine: &str, err: dr_core::Error) -> ConvertOutcome {
    match err {
        dr_core::Error::ToolTimeout { timeout, .. } => {
            tracing::warn!(engine, ?timeout, "Conversion timed out; process killed");
            ConvertOutcome::TimedOut
        }
        other => ConvertOutcome::Failure(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// LibreOffice
// ---------------------------------------------------------------------------

/// LibreOffice running headless.
///
/// Each invocation gets a throwaway user profile so that concurrent
/// conversions do not fight over the profile lock.
#[derive(Debug, Clone)]
pub struct LibreOfficeEngine {
    program: Option<PathBuf>,
}

impl LibreOfficeEngine {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }
}

#[async_trait]
impl ConversionEngine for LibreOfficeEngine {
    fn name(&self) -> &str {
        EngineKind::LibreOffice.as_str()
    }

    async fn probe_availability(&self) -> bool {
        self.program.as_deref().is_some_and(Path::is_file)
    }

    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> ConvertOutcome {
        let Some(program) = self.program.clone() else {
            return ConvertOutcome::Failure("libreoffice executable not found".into());
        };

        let scratch = match tempfile::Builder::new().prefix("docrelay-lo-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return ConvertOutcome::Failure(format!("failed to create scratch dir: {e}")),
        };
        let profile_dir = scratch.path().join("profile");
        let out_dir = scratch.path().join("out");
        if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
            return ConvertOutcome::Failure(format!("failed to create output dir: {e}"));
        }

        let result = ToolCommand::new(program)
            .arg(format!("-env:UserInstallation={}", file_url(&profile_dir)))
            .args([
                "--headless",
                "--invisible",
                "--nodefault",
                "--nolockcheck",
                "--nologo",
                "--norestore",
                "--convert-to",
                "pdf",
                "--outdir",
            ])
            .arg(out_dir.as_os_str())
            .arg(input.as_os_str())
            .current_dir(scratch.path())
            .timeout(timeout)
            .execute()
            .await;

        if let Err(e) = result {
            return outcome_from_error(self.name(), e);
        }

        // soffice names its output after the input stem.
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let produced = out_dir.join(format!("{stem}.pdf"));
        if !produced.is_file() {
            return ConvertOutcome::Failure(format!(
                "libreoffice exited cleanly but produced no {}",
                produced.display()
            ));
        }

        match move_file(&produced, output).await {
            Ok(()) => ConvertOutcome::Success,
            Err(e) => ConvertOutcome::Failure(format!("failed to move output: {e}")),
        }
    }
}

/// `file://` URL for a local directory, as LibreOffice expects it.
fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    }
}

/// Rename, falling back to copy + remove across filesystems.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

// ---------------------------------------------------------------------------
// docx2pdf
// ---------------------------------------------------------------------------

/// The `docx2pdf` CLI, which automates Microsoft Word. Only usable on
/// Windows and macOS.
#[derive(Debug, Clone)]
pub struct Docx2PdfEngine {
    program: Option<PathBuf>,
}

impl Docx2PdfEngine {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }
}

#[async_trait]
impl ConversionEngine for Docx2PdfEngine {
    fn name(&self) -> &str {
        EngineKind::Docx2Pdf.as_str()
    }

    async fn probe_availability(&self) -> bool {
        cfg!(any(target_os = "windows", target_os = "macos"))
            && self.program.as_deref().is_some_and(Path::is_file)
    }

    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> ConvertOutcome {
        let Some(program) = self.program.clone() else {
            return ConvertOutcome::Failure("docx2pdf executable not found".into());
        };

        let result = ToolCommand::new(program)
            .arg(input.as_os_str())
            .arg(output.as_os_str())
            .timeout(timeout)
            .execute()
            .await;

        match result {
            Ok(_) => ConvertOutcome::Success,
            Err(e) => outcome_from_error(self.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Discovery, ToolConfig};

    #[test]
    fn file_url_formats() {
        assert_eq!(file_url(Path::new("/tmp/p")), "file:///tmp/p");
        assert_eq!(file_url(Path::new(r"C:\Temp\p")), "file:///C:/Temp/p");
    }

    #[test]
    fn build_engines_follows_order() {
        let config = EnginesConfig {
            order: vec![EngineKind::Docx2Pdf, EngineKind::LibreOffice],
            libreoffice_path: None,
            docx2pdf_path: None,
        };
        let engines = build_engines(&config, &ToolRegistry::default());
        let names: Vec<_> = engines.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["docx2pdf", "libreoffice"]);
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let engine = LibreOfficeEngine::new(None);
        assert!(!engine.probe_availability().await);

        let dir = tempfile::tempdir().unwrap();
        let outcome = engine
            .convert(
                &dir.path().join("a.docx"),
                &dir.path().join("a.pdf"),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(outcome, ConvertOutcome::Failure(_)));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A stand-in soffice that writes `<stem>.pdf` into `--outdir`.
    #[cfg(unix)]
    const FAKE_SOFFICE: &str = r#"
outdir=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
stem=$(basename "$input" .docx)
printf '%%PDF-1.4 fake' > "$outdir/$stem.pdf"
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn libreoffice_moves_output_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "soffice", FAKE_SOFFICE);
        let registry = ToolRegistry::from_tools([ToolConfig {
            kind: EngineKind::LibreOffice,
            path: program,
            discovery: Discovery::Configured,
        }]);
        let config = EnginesConfig {
            order: vec![EngineKind::LibreOffice],
            ..EnginesConfig::default()
        };
        let engine = build_engines(&config, &registry).remove(0);
        assert!(engine.probe_availability().await);

        let input = dir.path().join("job-1.docx");
        std::fs::write(&input, b"PK fake docx").unwrap();
        let output = dir.path().join("job-1.pdf");

        let outcome = engine.convert(&input, &output, Duration::from_secs(10)).await;
        assert_eq!(outcome, ConvertOutcome::Success);
        assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn libreoffice_without_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LibreOfficeEngine::new(Some(script(dir.path(), "soffice", "exit 0")));
        let input = dir.path().join("a.docx");
        std::fs::write(&input, b"x").unwrap();

        let outcome = engine
            .convert(&input, &dir.path().join("a.pdf"), Duration::from_secs(10))
            .await;
        assert!(matches!(outcome, ConvertOutcome::Failure(ref m) if m.contains("produced no")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn libreoffice_hang_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let engine = LibreOfficeEngine::new(Some(script(dir.path(), "soffice", "sleep 30")));
        let input = dir.path().join("a.docx");
        std::fs::write(&input, b"x").unwrap();

        let outcome = engine
            .convert(&input, &dir.path().join("a.pdf"), Duration::from_millis(200))
            .await;
        assert_eq!(outcome, ConvertOutcome::TimedOut);
    }
}
