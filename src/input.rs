use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};

/// Chunk size used to feed the parsers.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Unified input reader over a file or stdin
pub struct InputReader {
    reader: Box<dyn Read>,
    size: Option<u64>,
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path = input_path.as_ref();

        if path == Path::new("-") {
            return Ok(Self {
                reader: Box::new(io::stdin().lock()),
                size: None,
            });
        }

        let file =
            File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let size = file.metadata().ok().map(|metadata| metadata.len());

        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            size,
        })
    }

    /// Total input size, unknown for pipes
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Read a chunk of data into the provided buffer
    /// Returns the number of bytes read, 0 indicates EOF
    pub fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        loop {
            match self.reader.read(buffer) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Process data in chunks using a callback function
    /// The callback receives each chunk and should return Ok(true) to continue or Ok(false) to stop
    pub fn process_chunks<F>(&mut self, chunk_size: usize, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<bool>,
    {
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let bytes_read = self.read_chunk(&mut buffer)?;
            if bytes_read == 0 {
                break; // EOF
            }

            if !callback(&buffer[..bytes_read])? {
                break;
            }
        }

        Ok(())
    }
}
