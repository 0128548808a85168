//! Capture sources: the seam between the service and the platform audio input.
//!
//! `MicSource` bridges cpal's push-style callback into the blocking pull-style
//! read the capture loop wants: the stream callback converts samples to bytes
//! and hands chunks over a bounded channel.

use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::constants::{BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE};
use crate::error::DeviceInitError;

/// How long a blocking read waits for device data before reporting an empty
/// read. Bounds the capture loop's reaction time to cancellation.
pub(crate) const READ_POLL: Duration = Duration::from_millis(20);

/// Chunks buffered between the device callback and the capture loop.
const CHUNK_QUEUE_CAPACITY: usize = 32;

/// A blocking byte source of PCM audio.
pub trait CaptureSource {
    /// Reads up to `buf.len()` bytes. Returns `Ok(0)` when nothing arrived
    /// within the source's poll interval.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Smallest chunk the device may deliver, in bytes. Zero when unknown.
    fn min_buffer_bytes(&self) -> usize;
}

/// Opens capture sources. Opening happens on the capture thread because the
/// underlying platform stream is not `Send`.
pub trait CaptureBackend: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureSource>, DeviceInitError>;
}

/// Default backend: the host's default input device via cpal.
#[derive(Debug, Default)]
pub struct MicBackend;

impl CaptureBackend for MicBackend {
    fn open(&self) -> Result<Box<dyn CaptureSource>, DeviceInitError> {
        MicSource::open().map(|source| Box::new(source) as Box<dyn CaptureSource>)
    }
}

/// Microphone capture at 48 kHz mono 16-bit.
pub struct MicSource {
    // Keeps the capture alive; dropping it releases the device.
    _stream: cpal::Stream,
    chunks: Receiver<Vec<u8>>,
    errors: Receiver<String>,
    pending: Vec<u8>,
    min_buffer: usize,
}

impl MicSource {
    fn open() -> Result<Self, DeviceInitError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(DeviceInitError::NoDevice)?;

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceInitError::UnsupportedConfig(e.to_string()))?;
        let min_buffer = match supported.buffer_size() {
            SupportedBufferSize::Range { min, .. } => {
                *min as usize * CHANNELS as usize * BYTES_PER_SAMPLE
            }
            SupportedBufferSize::Unknown => 0,
        };

        let config = StreamConfig {
            channels: CHANNELS,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = bounded::<Vec<u8>>(CHUNK_QUEUE_CAPACITY);
        let (error_tx, error_rx) = bounded::<String>(16);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mut bytes = Vec::with_capacity(data.len() * BYTES_PER_SAMPLE);
                    for sample in data {
                        bytes.extend_from_slice(&sample.to_ne_bytes());
                    }
                    // Dropped on overrun when the reader stalls.
                    let _ = chunk_tx.try_send(bytes);
                },
                move |err| {
                    let _ = error_tx.try_send(err.to_string());
                },
                None,
            )
            .map_err(|e| DeviceInitError::OpenStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceInitError::NotReady(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            chunks: chunk_rx,
            errors: error_rx,
            pending: Vec::new(),
            min_buffer,
        })
    }
}

impl CaptureSource for MicSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Ok(err) = self.errors.try_recv() {
            return Err(io::Error::other(err));
        }
        if self.pending.is_empty() {
            match self.chunks.recv_timeout(READ_POLL) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "capture stream closed",
                    ));
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn min_buffer_bytes(&self) -> usize {
        self.min_buffer
    }
}

/// Deterministic source for tests: replays a fixed sequence of reads, then
/// behaves like an idle device.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    min_buffer: usize,
}

enum Step {
    Chunk(Vec<u8>),
    Fail(io::ErrorKind),
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            min_buffer: 0,
        }
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        Self {
            steps: chunks.into_iter().map(Step::Chunk).collect(),
            min_buffer: 0,
        }
    }

    /// Appends a read failure after the scripted chunks.
    pub fn then_error(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }

    pub fn with_min_buffer_bytes(mut self, bytes: usize) -> Self {
        self.min_buffer = bytes;
        self
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for ScriptedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(Step::Chunk(chunk)) => {
                if chunk.len() > buf.len() {
                    let (now, rest) = chunk.split_at(buf.len());
                    buf.copy_from_slice(now);
                    self.steps.push_front(Step::Chunk(rest.to_vec()));
                    Ok(buf.len())
                } else {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted read failure")),
            None => {
                thread::sleep(READ_POLL);
                Ok(0)
            }
        }
    }

    fn min_buffer_bytes(&self) -> usize {
        self.min_buffer
    }
}

/// Backend that hands out one scripted source per session.
#[derive(Default)]
pub struct ScriptedBackend {
    sessions: Mutex<VecDeque<ScriptedSource>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(source: ScriptedSource) -> Self {
        let backend = Self::default();
        backend.push_session(source);
        backend
    }

    pub fn push_session(&self, source: ScriptedSource) {
        self.sessions.lock().push_back(source);
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(&self) -> Result<Box<dyn CaptureSource>, DeviceInitError> {
        self.sessions
            .lock()
            .pop_front()
            .map(|source| Box::new(source) as Box<dyn CaptureSource>)
            .ok_or(DeviceInitError::NoDevice)
    }
}
