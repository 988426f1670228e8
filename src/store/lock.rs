use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, Result};

pub const LOCK_FILE: &str = ".archive.lock";

/// Exclusive advisory lock over a backup directory. The holder's pid is
/// written into the lock file so a refused caller can say who has it.
/// Released on drop.
#[derive(Debug)]
pub struct ArchiveLock {
    file: File,
    path: PathBuf,
}

impl ArchiveLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim();
            let detail = if holder.is_empty() {
                path.display().to_string()
            } else {
                format!("{} (held by pid {holder})", path.display())
            };
            return Err(MigrationError::Locked(detail));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly so unlock errors surface; dropping also releases.
    pub fn release(self) -> Result<()> {
        self.file.set_len(0)?;
        FileExt::unlock(&self.file)?;
        Ok(())
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
