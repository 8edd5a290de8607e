use crate::cell::OutputItem;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Host-side display surface for one executing cell. `replace_output`
/// receives the entire accumulated output on every update (replace, not
/// append); `warn` surfaces non-fatal problems to the user.
pub trait DisplaySink: Send {
    fn replace_output(&mut self, parts: &[OutputItem]);
    fn warn(&mut self, message: &str);
}

/// Host-side file access for `include` directives and local inline images.
/// Paths are relative to the active document's directory; failures are
/// non-fatal and surface as warnings at the call site.
pub trait FileReader {
    fn read(&self, relative: &Path) -> Result<Vec<u8>>;
}

/// Filesystem-backed reader rooted at the active document's directory.
pub struct FsFileReader {
    base: PathBuf,
}

impl FsFileReader {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl FileReader for FsFileReader {
    fn read(&self, relative: &Path) -> Result<Vec<u8>> {
        let path = self.base.join(relative);
        std::fs::read(&path).with_context(|| format!("cannot read '{}'", path.display()))
    }
}
