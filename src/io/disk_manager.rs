use std::{
    io::{self, SeekFrom},
    path::Path,
};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::info;

use crate::{
    error::{Error, PoolResult},
    page::PageId,
};

/// The backing store adapter: random-access page I/O over a single file.
///
/// The file cursor is shared state, so callers must sequence every operation
/// through a single mutual-exclusion primitive (the pager wraps the manager
/// in the store latch). Each operation seeks to the page offset, verifies the
/// resolved position, and transfers exactly `page_size` bytes or fails.
pub struct DiskManager {
    file: File,
    page_size: usize,
}

impl DiskManager {
    /// Opens the file at the provided path and constructs a new disk manager
    /// instance that wraps over it.
    ///
    /// The file is opened for read/write with write-through semantics and a
    /// random-access hint where the platform supports them, and is grown to
    /// `page_size * preallocate_pages` bytes (never truncated).
    pub async fn open(
        path: &Path,
        page_size: usize,
        preallocate_pages: usize,
    ) -> PoolResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options.custom_flags(libc::O_SYNC);

        let file = options.open(path).await?;

        let preallocated = (page_size * preallocate_pages) as u64;
        if file.metadata().await?.len() < preallocated {
            file.set_len(preallocated).await?;
        }

        #[cfg(target_os = "linux")]
        advise_random_access(&file);

        Ok(DiskManager { file, page_size })
    }

    /// Reads the contents of the page at the offset from the given page id,
    /// writing them at the provided buffer.
    ///
    /// # Panics
    ///
    /// - If `buf`'s length is different than the page size.
    pub async fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> PoolResult<()> {
        info!(?page_id, "reading page from disk");
        assert_eq!(buf.len(), self.page_size);

        let size = self.file.metadata().await?.len();
        let offset = page_id.offset(self.page_size);
        if offset >= size {
            return Err(Error::PageOutOfBounds(page_id));
        }

        self.seek_to(page_id, offset).await?;

        if let Err(error) = self.file.read_exact(buf).await {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                Err(Error::ShortRead(page_id))
            } else {
                Err(error.into())
            }
        } else {
            Ok(())
        }
    }

    /// Writes the contents of the provided buffer at the offset from the
    /// given page id.
    ///
    /// # Panics
    ///
    /// - If `buf`'s length is different than the page size.
    pub async fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> PoolResult<()> {
        info!(?page_id, "writing page to disk");
        assert_eq!(buf.len(), self.page_size);

        let offset = page_id.offset(self.page_size);
        self.seek_to(page_id, offset).await?;

        if let Err(error) = self.file.write_all(buf).await {
            if error.kind() == io::ErrorKind::WriteZero {
                Err(Error::ShortWrite(page_id))
            } else {
                Err(error.into())
            }
        } else {
            Ok(())
        }
    }

    /// Returns the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    async fn seek_to(&mut self, page_id: PageId, offset: u64) -> PoolResult<()> {
        let actual = self.file.seek(SeekFrom::Start(offset)).await?;
        if actual != offset {
            return Err(Error::SeekMismatch {
                page_id,
                expected: offset,
                actual,
            });
        }
        Ok(())
    }
}

/// Hints the kernel that access is random, not sequential. Best effort.
#[cfg(target_os = "linux")]
fn advise_random_access(file: &File) {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_RANDOM) };
    if rc != 0 {
        tracing::warn!(rc, "posix_fadvise failed");
    }
}
