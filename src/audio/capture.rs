//! The capture-and-forward loop.
//!
//! Reads fixed-size chunks from a capture source and writes them, unmodified
//! and in order, to the connected receiver.

use std::io::Write;

use tokio::sync::watch;

use crate::audio::source::{CaptureBackend, CaptureSource};
use crate::constants::MIN_CAPTURE_BUFFER_BYTES;
use crate::error::{Error, Result};

/// Owns the opened capture source and the reusable read buffer.
pub struct AudioCapture {
    source: Option<Box<dyn CaptureSource>>,
    buffer: Vec<u8>,
}

impl AudioCapture {
    /// Opens the device and sizes the read buffer to
    /// `max(device minimum, MIN_CAPTURE_BUFFER_BYTES)`.
    pub fn initialize(backend: &dyn CaptureBackend) -> Result<Self> {
        let source = backend.open().map_err(Error::DeviceInit)?;
        let buffer_len = source.min_buffer_bytes().max(MIN_CAPTURE_BUFFER_BYTES);
        tracing::debug!(buffer_len, "capture device initialized");
        Ok(Self {
            source: Some(source),
            buffer: vec![0; buffer_len],
        })
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Pure byte passthrough: every read that yields more than zero bytes is
    /// written to `sink` exactly as read; zero-length reads are skipped. The
    /// cancellation signal is checked once per iteration. Terminates with
    /// [`Error::Cancelled`] or [`Error::StreamIo`]; the device is released
    /// before either is returned.
    pub fn run<W: Write>(&mut self, sink: &mut W, cancel: &watch::Receiver<bool>) -> Result<()> {
        let mut source = match self.source.take() {
            Some(source) => source,
            None => return Err(Error::Cancelled),
        };
        let result = pump(source.as_mut(), &mut self.buffer, sink, cancel);
        drop(source);
        result
    }

    /// Stops and frees the device. Safe to call repeatedly, and when
    /// initialization never completed.
    pub fn release(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("capture device released");
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn pump<W: Write>(
    source: &mut dyn CaptureSource,
    buffer: &mut [u8],
    sink: &mut W,
    cancel: &watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *cancel.borrow() {
            return Err(Error::Cancelled);
        }
        let read = source.read(buffer).map_err(Error::StreamIo)?;
        if read == 0 {
            continue;
        }
        sink.write_all(&buffer[..read]).map_err(Error::StreamIo)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{ScriptedBackend, ScriptedSource};
    use proptest::prelude::*;
    use std::io;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink {
        writes: Vec<usize>,
        data: Vec<u8>,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn skips_zero_length_reads() {
        let first: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let second: Vec<u8> = (0..=255).map(|i| i as u8).collect();
        let source = ScriptedSource::from_chunks([Vec::new(), first.clone(), second.clone()])
            .then_error(io::ErrorKind::UnexpectedEof);
        let backend = ScriptedBackend::single(source);
        let mut capture = AudioCapture::initialize(&backend).unwrap();
        let (_tx, cancel) = watch::channel(false);
        let mut sink = CountingSink::default();

        let result = capture.run(&mut sink, &cancel);
        assert!(matches!(result, Err(Error::StreamIo(_))));
        assert_eq!(sink.writes, vec![128, 256]);
        assert_eq!(sink.data.len(), 384);
        assert_eq!(&sink.data[..128], &first[..]);
        assert_eq!(&sink.data[128..], &second[..]);
    }

    #[test]
    fn cancellation_stops_the_loop_before_reading() {
        let backend = ScriptedBackend::single(ScriptedSource::from_chunks([vec![1u8; 8]]));
        let mut capture = AudioCapture::initialize(&backend).unwrap();
        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();
        let mut sink = CountingSink::default();

        assert!(matches!(
            capture.run(&mut sink, &cancel),
            Err(Error::Cancelled)
        ));
        assert!(sink.data.is_empty());
    }

    #[test]
    fn cancellation_mid_stream_releases_the_device() {
        let backend = ScriptedBackend::single(ScriptedSource::from_chunks([vec![2u8; 16]]));
        let mut capture = AudioCapture::initialize(&backend).unwrap();
        let (tx, cancel) = watch::channel(false);
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            let _ = tx.send(true);
        });
        let mut sink = CountingSink::default();

        let result = capture.run(&mut sink, &cancel);
        signaller.join().unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(sink.data, vec![2u8; 16]);

        // run consumed the source; a second run reports the released device.
        assert!(matches!(
            capture.run(&mut sink, &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn buffer_respects_device_minimum_and_floor() {
        let backend = ScriptedBackend::single(ScriptedSource::new().with_min_buffer_bytes(512));
        let capture = AudioCapture::initialize(&backend).unwrap();
        assert_eq!(capture.buffer_len(), MIN_CAPTURE_BUFFER_BYTES);

        let backend = ScriptedBackend::single(ScriptedSource::new().with_min_buffer_bytes(16384));
        let capture = AudioCapture::initialize(&backend).unwrap();
        assert_eq!(capture.buffer_len(), 16384);
    }

    #[test]
    fn release_is_idempotent() {
        let backend = ScriptedBackend::single(ScriptedSource::new());
        let mut capture = AudioCapture::initialize(&backend).unwrap();
        capture.release();
        capture.release();
    }

    #[test]
    fn initialize_fails_without_a_device() {
        let backend = ScriptedBackend::new();
        assert!(matches!(
            AudioCapture::initialize(&backend),
            Err(Error::DeviceInit(_))
        ));
    }

    proptest! {
        #[test]
        fn passthrough_preserves_order_and_bytes(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)
        ) {
            let source = ScriptedSource::from_chunks(chunks.clone())
                .then_error(io::ErrorKind::BrokenPipe);
            let backend = ScriptedBackend::single(source);
            let mut capture = AudioCapture::initialize(&backend).unwrap();
            let (_tx, cancel) = watch::channel(false);
            let mut sink = CountingSink::default();

            let result = capture.run(&mut sink, &cancel);
            prop_assert!(matches!(result, Err(Error::StreamIo(_))));

            let expected: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
            prop_assert_eq!(sink.data, expected);

            let expected_writes: Vec<usize> = chunks
                .iter()
                .filter(|c| !c.is_empty())
                .map(|c| c.len())
                .collect();
            prop_assert_eq!(sink.writes, expected_writes);
        }
    }
}
