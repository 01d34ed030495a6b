//! Form-filler adapter.
//!
//! [`FormFiller`] is what the assembler talks to. The production implementation,
//! [`ScratchFormFiller`], drives a file-based [`PdfTool`] (pdftk by default) through scratch
//! files on a memory-backed mount. Swapping in an in-process PDF library means implementing
//! [`FormFiller`] directly; callers do not change.

use crate::config::CoreConfig;
use crate::constants::PDF_SIGNATURE;
use crate::{DocumentError, DocumentResult};
use lme_scratch::{ScratchArea, ScratchPath, ScratchPurpose};
use lme_types::FormFields;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Result of filling one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Filled(Vec<u8>),
    /// Soft failure. The assembler drops the template and carries on.
    Failed(String),
}

pub trait FormFiller: Send + Sync {
    /// Fills `template` with `fields`.
    ///
    /// Tool failures and unusable output are reported as [`FillOutcome::Failed`] unless the
    /// filler was configured to propagate them, in which case they are
    /// `DocumentError::FillFailed`.
    fn fill(&self, template: &Path, fields: &FormFields) -> DocumentResult<FillOutcome>;

    /// Merges filled fragments, in order, into one document.
    fn concat(&self, fragments: &[Vec<u8>]) -> DocumentResult<Vec<u8>>;
}

/// An external tool that reads and writes PDF files on disk.
pub trait PdfTool: Send + Sync {
    fn fill_form(
        &self,
        template: &Path,
        fields: &FormFields,
        output: &Path,
        flatten: bool,
    ) -> io::Result<()>;

    fn concat(&self, inputs: &[&Path], output: &Path) -> io::Result<()>;
}

const XFDF_NAMESPACE: &str = "http://ns.adobe.com/xfdf/";

/// The pdftk command line tool.
#[derive(Debug, Clone)]
pub struct Pdftk {
    bin: PathBuf,
}

impl Pdftk {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    fn run(&self, mut command: Command, stdin: Option<&[u8]>) -> io::Result<()> {
        command
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;

        // The pipe is closed before waiting, and the child is always reaped.
        let written = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => pipe.write_all(input),
            (Some(_), None) => Err(io::Error::other("pdftk stdin not captured")),
            (None, _) => Ok(()),
        };

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                self.bin.display(),
                output.status,
                stderr.trim()
            )));
        }

        written.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("{} did not read its input: {e}", self.bin.display()),
            )
        })
    }
}

impl PdfTool for Pdftk {
    fn fill_form(
        &self,
        template: &Path,
        fields: &FormFields,
        output: &Path,
        flatten: bool,
    ) -> io::Result<()> {
        let mut command = Command::new(&self.bin);
        command
            .arg(template)
            .args(["fill_form", "-", "output"])
            .arg(output);
        if flatten {
            command.arg("flatten");
        }
        let document = xfdf(fields).map_err(io::Error::other)?;
        self.run(command, Some(&document))
    }

    fn concat(&self, inputs: &[&Path], output: &Path) -> io::Result<()> {
        let mut command = Command::new(&self.bin);
        command.args(inputs).args(["cat", "output"]).arg(output);
        self.run(command, None)
    }
}

/// Renders fields as an XFDF document, the format pdftk's `fill_form` reads from stdin.
pub fn xfdf(fields: &FormFields) -> quick_xml::Result<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("xfdf");
    root.push_attribute(("xmlns", XFDF_NAMESPACE));
    root.push_attribute(("xml:space", "preserve"));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("fields")))?;

    for (name, value) in fields.iter() {
        let mut field = BytesStart::new("field");
        field.push_attribute(("name", name));
        writer.write_event(Event::Start(field))?;
        writer.write_event(Event::Start(BytesStart::new("value")))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("value")))?;
        writer.write_event(Event::End(BytesEnd::new("field")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("fields")))?;
    writer.write_event(Event::End(BytesEnd::new("xfdf")))?;
    Ok(writer.into_inner())
}

fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_SIGNATURE)
}

/// Deletes a scratch file, logging instead of failing.
fn release_logged(path: ScratchPath) {
    let shown = path.path().display().to_string();
    if let Err(e) = path.release() {
        tracing::warn!(
            path = %shown,
            error = %e,
            scratch_cleanup_failed = true,
            "failed to remove scratch file"
        );
    }
}

/// [`FormFiller`] backed by a [`PdfTool`] and a scratch area.
pub struct ScratchFormFiller<T: PdfTool> {
    tool: T,
    scratch: ScratchArea,
    flatten: bool,
    propagate_failures: bool,
}

impl<T: PdfTool> ScratchFormFiller<T> {
    pub fn new(tool: T, scratch: ScratchArea) -> Self {
        Self {
            tool,
            scratch,
            flatten: true,
            propagate_failures: false,
        }
    }

    #[must_use]
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    #[must_use]
    pub fn with_propagate_failures(mut self, propagate: bool) -> Self {
        self.propagate_failures = propagate;
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    fn soft_failure(&self, template: &Path, reason: String) -> DocumentResult<FillOutcome> {
        if self.propagate_failures {
            return Err(DocumentError::FillFailed {
                template: template.to_path_buf(),
                reason,
            });
        }
        tracing::warn!(
            template = %template.display(),
            reason = %reason,
            "template fill failed, skipping"
        );
        Ok(FillOutcome::Failed(reason))
    }
}

impl ScratchFormFiller<Pdftk> {
    /// The production filler: pdftk over a scratch area in the configured directory.
    pub fn from_config(config: &CoreConfig) -> DocumentResult<Self> {
        let scratch = ScratchArea::new(config.scratch_dir())?;
        Ok(Self::new(Pdftk::new(config.pdftk_bin().to_path_buf()), scratch)
            .with_flatten(config.flatten())
            .with_propagate_failures(config.propagate_fill_failures()))
    }
}

impl<T: PdfTool> FormFiller for ScratchFormFiller<T> {
    fn fill(&self, template: &Path, fields: &FormFields) -> DocumentResult<FillOutcome> {
        if !template.is_file() {
            return self.soft_failure(template, "template not found".to_owned());
        }

        let output = self.scratch.allocate(ScratchPurpose::Fill, 0)?;

        if let Err(e) = self
            .tool
            .fill_form(template, fields, output.path(), self.flatten)
        {
            release_logged(output);
            return self.soft_failure(template, e.to_string());
        }

        let bytes = match output.read() {
            Ok(bytes) => bytes,
            Err(e) => {
                release_logged(output);
                return self.soft_failure(template, e.to_string());
            }
        };
        release_logged(output);

        if !is_pdf(&bytes) {
            return self.soft_failure(template, "output is not a PDF".to_owned());
        }

        tracing::debug!(
            template = %template.display(),
            bytes = bytes.len(),
            "template filled"
        );
        Ok(FillOutcome::Filled(bytes))
    }

    fn concat(&self, fragments: &[Vec<u8>]) -> DocumentResult<Vec<u8>> {
        let mut inputs = Vec::with_capacity(fragments.len());
        for (index, fragment) in fragments.iter().enumerate() {
            let input = self.scratch.allocate(ScratchPurpose::ConcatInput, index)?;
            input.write(fragment)?;
            inputs.push(input);
        }
        let output = self
            .scratch
            .allocate(ScratchPurpose::ConcatOutput, fragments.len())?;

        let input_paths: Vec<&Path> = inputs.iter().map(ScratchPath::path).collect();
        let result = self
            .tool
            .concat(&input_paths, output.path())
            .map_err(|e| DocumentError::ConcatenationFailed(e.to_string()))
            .and_then(|()| {
                output
                    .read()
                    .map_err(|e| DocumentError::ConcatenationFailed(e.to_string()))
            })
            .and_then(|bytes| {
                if is_pdf(&bytes) {
                    Ok(bytes)
                } else {
                    Err(DocumentError::ConcatenationFailed(
                        "merged output is not a PDF".to_owned(),
                    ))
                }
            });

        for input in inputs {
            release_logged(input);
        }
        release_logged(output);

        result
    }
}
