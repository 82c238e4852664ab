//! File-backed byte source and sink.

use super::{ByteSink, ByteSource, Whence};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

fn seek_from(offset: i64, whence: Whence) -> SeekFrom {
    match whence {
        Whence::Set => SeekFrom::Start(offset.max(0) as u64),
        Whence::Cur => SeekFrom::Current(offset),
        Whence::End | Whence::Size => SeekFrom::End(offset),
    }
}

#[derive(Debug)]
pub struct FileSource {
    file: File,
    size: i64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len() as i64;
        Ok(Self { file, size })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<i64> {
        if whence == Whence::Size {
            return Ok(self.size);
        }
        Ok(self.file.seek(seek_from(offset, whence))? as i64)
    }
}

#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl ByteSink for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> io::Result<i64> {
        if whence == Whence::Size {
            self.writer.flush()?;
            return Ok(self.writer.get_ref().metadata()?.len() as i64);
        }
        // BufWriter flushes pending bytes before seeking.
        Ok(self.writer.seek(seek_from(offset, whence))? as i64)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_round_trip() {
        let tmp = NamedTempFile::new().unwrap();

        let mut sink = FileSink::create(tmp.path()).unwrap();
        sink.write(b"0123456789").unwrap();
        sink.seek(0, Whence::Set).unwrap();
        sink.write(b"ab").unwrap();
        assert_eq!(sink.seek(0, Whence::Size).unwrap(), 10);
        sink.flush().unwrap();
        drop(sink);

        let mut src = FileSource::open(tmp.path()).unwrap();
        assert_eq!(src.size(), 10);
        assert_eq!(src.seek(0, Whence::Size).unwrap(), 10);
        src.seek(-4, Whence::End).unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = src.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(buf, b"6789");

        src.seek(0, Whence::Set).unwrap();
        let n = src.read(&mut chunk).unwrap();
        assert_eq!(&chunk[..n], b"ab2");
    }
}
