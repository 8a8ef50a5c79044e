use crate::error::{Error, IoContext, Result};
use crate::workspace::Workspace;
use fs2::FileExt;
use std::fs::{File, OpenOptions};

/// Advisory exclusive lock on one base name, held until dropped. Lives in a
/// hidden `.<base>.lock` file next to the chunks.
#[derive(Debug)]
pub struct BaseLock {
    file: File,
}

impl BaseLock {
    /// Fails with [`Error::Busy`] instead of waiting when another holder exists.
    pub fn acquire(ws: &Workspace, base: &str) -> Result<Self> {
        let path = ws.resolve_flat(&format!(".{base}.lock"))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .io_ctx("open lock", &path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(Error::Busy { base: base.to_string() })
            }
            Err(e) => Err(Error::io("lock", &path, e)),
        }
    }
}

impl Drop for BaseLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
