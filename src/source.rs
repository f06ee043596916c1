use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

/// Hands out independent readable handles onto one target.
///
/// Every call to `open` must return a handle with its own position, so that
/// concurrent readers never interleave seeks on a shared cursor.
pub(crate) trait ByteSource: Send + Sync + 'static {
    type Handle: Read + Seek + Send;

    fn open(&self) -> io::Result<Self::Handle>;

    fn len(&self) -> io::Result<u64>;
}

#[derive(Debug, Clone)]
pub(crate) struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub(crate) fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }
}

impl ByteSource for FileSource {
    type Handle = File;

    fn open(&self) -> io::Result<File> {
        OpenOptions::new().read(true).open(&self.path)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}
