//! Output sink — persist each session's accumulated bytes.
//!
//! File names depend only on the session index, never on completion order:
//! session `i` writes `<dir>/<i>` (or `<dir>/<i>.<ext>`). Sessions with no
//! output write nothing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Remove `dir` if it exists, then create it empty.
pub fn prepare(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(dir)
}

pub fn file_name(index: usize, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{}.{}", index, ext),
        None => index.to_string(),
    }
}

pub fn output_path(dir: &Path, index: usize, ext: Option<&str>) -> PathBuf {
    dir.join(file_name(index, ext))
}

/// Write every non-empty output verbatim. Returns the number of files written.
pub fn write_outputs<O: AsRef<[u8]>>(dir: &Path, ext: Option<&str>, outputs: &[O]) -> io::Result<usize> {
    let mut written = 0;
    for (index, output) in outputs.iter().enumerate() {
        let bytes = output.as_ref();
        if bytes.is_empty() {
            continue;
        }
        fs::write(output_path(dir, index, ext), bytes)?;
        written += 1;
    }
    Ok(written)
}
