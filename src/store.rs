use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Sequential byte sink for incoming DATA blocks.
pub trait Sink {
    fn append(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Sequential byte source for outgoing DATA blocks.
pub trait Source {
    /// Fills `buf` as far as the source allows. A return value smaller than
    /// `buf.len()` means end of input.
    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl Sink for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

// `Read::read` may return short counts mid-stream; only EOF may end a block early.
impl<R: Read> Source for R {
    fn read_block(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// Download target on disk.
///
/// The file is created (and truncated) on the first append, so a transfer
/// that fails before any DATA arrives leaves the filesystem untouched. Unless
/// [`FileSink::commit`] is called, dropping the sink removes whatever was
/// written.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl FileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            committed: false,
        }
    }

    pub fn commit(mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Sink for FileSink {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => File::create(&self.path)?,
        };
        self.file.insert(file).write_all(data)
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(file) = self.file.take() {
            drop(file);
            match fs::remove_file(&self.path) {
                Ok(()) => log::debug!("Removed partial file {}", self.path.display()),
                Err(e) => log::warn!(
                    "Failed to remove partial file {}: {e}",
                    self.path.display()
                ),
            }
        }
    }
}
