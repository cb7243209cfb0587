//! Bounded in-memory pipe coupling a body producer to the transport.
//!
//! # Design
//! Chunks travel through a bounded `crossbeam_channel`. With a capacity of
//! zero the channel is a rendezvous, so every write waits for the reader to
//! take it and a slow consumer throttles the producer. Dropping the writer
//! disconnects the channel; the reader sees end-of-stream only after it has
//! drained every chunk already sent.

use std::io::{self, Read, Write};

use crossbeam_channel::{Receiver, Sender};

/// Create a pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

/// Write end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl PipeWriter {
    /// Signal end-of-stream to the reader.
    pub fn close(self) {}
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // Writer gone and channel drained.
                Err(_) => return Ok(0),
            }
        }
        let remaining = &self.chunk[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn bytes_arrive_in_order_then_eof() {
        let (mut writer, mut reader) = pipe(0);
        let producer = thread::spawn(move || {
            writer.write_all(b"first ").unwrap();
            writer.write_all(b"second ").unwrap();
            writer.write_all(b"third").unwrap();
            writer.close();
        });

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, "first second third");
    }

    #[test]
    fn small_reads_split_a_chunk() {
        let (mut writer, mut reader) = pipe(1);
        writer.write_all(b"abcdef").unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_blocks_until_reader_drains() {
        let (mut writer, mut reader) = pipe(0);
        let written = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&written);
        let producer = thread::spawn(move || {
            writer.write_all(b"chunk").unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!written.load(Ordering::SeqCst), "write completed without a reader");

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        producer.join().unwrap();
        assert!(written.load(Ordering::SeqCst));
    }

    #[test]
    fn writing_after_reader_dropped_is_broken_pipe() {
        let (mut writer, reader) = pipe(0);
        drop(reader);
        let err = writer.write(b"lost").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
