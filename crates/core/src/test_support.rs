//! Test doubles shared by the unit tests.

use crate::filler::PdfTool;
use lme_types::FormFields;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A [`PdfTool`] that writes recognisable bytes instead of running pdftk.
///
/// Templates whose file name contains `broken` fail, and those containing `garbage` produce
/// output without a PDF signature. A filled fragment is `%PDF-fill:<file name>`; a merge is
/// `%PDF-merged\n` followed by the inputs' bytes.
#[derive(Debug, Default)]
pub struct FakeTool {
    fail_concat: bool,
    filled: Mutex<Vec<(String, FormFields)>>,
    concat_calls: AtomicUsize,
}

impl FakeTool {
    pub fn failing_concat() -> Self {
        Self {
            fail_concat: true,
            ..Default::default()
        }
    }

    pub fn concat_calls(&self) -> usize {
        self.concat_calls.load(Ordering::SeqCst)
    }

    /// Fields handed to the fill of the template with file name `template`.
    pub fn fields_for(&self, template: &str) -> Option<FormFields> {
        self.filled
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _)| name == template)
            .map(|(_, fields)| fields.clone())
    }
}

impl PdfTool for FakeTool {
    fn fill_form(
        &self,
        template: &Path,
        fields: &FormFields,
        output: &Path,
        _flatten: bool,
    ) -> io::Result<()> {
        let name = template
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if let Ok(mut filled) = self.filled.lock() {
            filled.push((name.to_owned(), fields.clone()));
        }

        if name.contains("broken") {
            return Err(io::Error::other("simulated fill failure"));
        }
        if name.contains("garbage") {
            return fs::write(output, b"not a pdf");
        }
        fs::write(output, format!("%PDF-fill:{name}"))
    }

    fn concat(&self, inputs: &[&Path], output: &Path) -> io::Result<()> {
        self.concat_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_concat {
            return Err(io::Error::other("simulated concat failure"));
        }

        let mut merged = b"%PDF-merged\n".to_vec();
        for input in inputs {
            merged.extend(fs::read(input)?);
        }
        fs::write(output, merged)
    }
}
