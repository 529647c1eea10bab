//! Per-job scratch space for intermediate and candidate artifacts.
//!
//! Every job gets its own directory under the scratch root, so concurrent jobs
//! never share file names. Files handed out by [`Scratch::allocate`] are deleted
//! when their handle drops unless they were promoted first; the directory itself
//! goes away when the [`Scratch`] is closed or dropped.

use std::cell::Cell;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

pub struct Scratch {
    dir: TempDir,
    next: Cell<u32>,
}

impl Scratch {
    pub fn create(root: &Path, label: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(root)?;
        debug!("scratch dir {}", dir.path().display());
        Ok(Self {
            dir,
            next: Cell::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserves a unique file name; nothing is created on disk until a writer does so.
    pub fn allocate(&self, extension: &str) -> ScratchFile {
        let n = self.next.get();
        self.next.set(n + 1);
        ScratchFile {
            path: self.dir.path().join(format!("artifact-{n:04}.{extension}")),
            armed: true,
        }
    }

    /// Number of handles allocated so far.
    pub fn allocated(&self) -> u32 {
        self.next.get()
    }

    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// A scratch artifact. Deleted on drop unless promoted.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size probe on the artifact as it sits on disk.
    pub fn size(&self) -> io::Result<u64> {
        crate::probe::size_of(&self.path)
    }

    pub fn release(self) {
        drop(self);
    }

    /// Moves the artifact to `dest` and drops it from scratch bookkeeping.
    /// `dest` is either left untouched or holds the complete artifact.
    pub fn promote(mut self, dest: &Path) -> io::Result<()> {
        let parent = match dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        match std::fs::rename(&self.path, dest) {
            Ok(()) => {
                self.armed = false;
                Ok(())
            }
            Err(err) => {
                // Scratch root and output may live on different filesystems.
                debug!("rename into place failed ({err}); copying instead");
                let mut staged = NamedTempFile::new_in(parent)?;
                io::copy(&mut File::open(&self.path)?, staged.as_file_mut())?;
                staged.as_file().sync_all()?;
                staged.persist(dest).map_err(|e| e.error)?;
                Ok(())
            }
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove scratch file {}: {e}", self.path.display()),
        }
    }
}
