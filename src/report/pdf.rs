use crate::error::RenderError;
use log::debug;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Converts rendered Markdown into a PDF file
///
/// Conversion blocks; the report writer runs it on the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait PdfEngine: Send + Sync {
    /// Write a PDF of `markdown` to `output`; relative image links resolve
    /// against `resource_dir`
    fn convert(&self, markdown: &str, resource_dir: &Path, output: &Path)
        -> Result<(), RenderError>;
}

/// PDF engine backed by an external converter (pandoc by default)
///
/// The configured command may carry extra arguments, e.g.
/// `pandoc --pdf-engine=wkhtmltopdf`.
#[derive(Debug, Clone)]
pub struct PandocEngine {
    program: String,
    extra_args: Vec<String>,
}

impl PandocEngine {
    pub fn new(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "pandoc".to_string());
        Self {
            program,
            extra_args: parts.collect(),
        }
    }
}

impl PdfEngine for PandocEngine {
    fn convert(
        &self,
        markdown: &str,
        resource_dir: &Path,
        output: &Path,
    ) -> Result<(), RenderError> {
        debug!("Converting report with {} to {}", self.program, output.display());

        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .args(["--from", "markdown", "--standalone"])
            .arg("--resource-path")
            .arg(resource_dir)
            .args(["-V", "geometry:margin=2cm"])
            .arg("-o")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RenderError::EngineUnavailable(format!("{} not found", self.program))
                }
                _ => RenderError::EngineUnavailable(format!("{}: {}", self.program, e)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A converter that exits early closes the pipe; its status says why
            if let Err(e) = stdin.write_all(markdown.as_bytes()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let result = child.wait_with_output()?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no diagnostic output")
                .trim()
                .to_string();
            return Err(RenderError::EngineFailed(format!(
                "{} exited with {}: {}",
                self.program, result.status, message
            )));
        }

        if !output.exists() {
            return Err(RenderError::EngineFailed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_with_arguments() {
        let engine = PandocEngine::new("pandoc --pdf-engine=wkhtmltopdf");
        assert_eq!(engine.program, "pandoc");
        assert_eq!(engine.extra_args, vec!["--pdf-engine=wkhtmltopdf"]);

        assert_eq!(PandocEngine::new("").program, "pandoc");
    }

    #[test]
    fn test_missing_converter_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PandocEngine::new("prodwatch-no-such-converter");
        let result = engine.convert("# Report", dir.path(), &dir.path().join("out.pdf"));
        assert!(matches!(result, Err(RenderError::EngineUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_converter_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PandocEngine::new("false");
        let result = engine.convert("# Report", dir.path(), &dir.path().join("out.pdf"));
        assert!(matches!(result, Err(RenderError::EngineFailed(_))));
    }
}
