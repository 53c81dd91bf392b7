//! Bounded PCM ring between a synthesis stream and the playback callback
//!
//! The feeder writes network chunks ahead into a single-producer
//! single-consumer ring; the reader is drained from the playback pull
//! callback at device cadence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio::sync::Notify;

use super::decoder::{BYTES_PER_SAMPLE, ByteSource};
use super::tts::SynthesisStream;

/// Wait between attempts to write into a full ring
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(5);

/// Longest wait for the next synthesis chunk before the stream counts as stalled
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Flags {
    /// Producer is done; no more bytes will arrive
    finished: AtomicBool,
    /// Consumer is gone; bytes written now would never be read
    closed: AtomicBool,
    /// Signalled once when the consumer is dropped
    reader_gone: Notify,
}

/// Create a ring of `ring_bytes` that accepts at most `max_bytes` in total
#[must_use]
pub fn pcm_channel(ring_bytes: usize, max_bytes: usize) -> (PcmFeeder, PcmReader) {
    let ring = HeapRb::<u8>::new(ring_bytes.max(BYTES_PER_SAMPLE));
    let (producer, consumer) = ring.split();
    let flags = Arc::new(Flags::default());

    (
        PcmFeeder {
            producer,
            flags: Arc::clone(&flags),
            written: 0,
            max_bytes: max_bytes - max_bytes % BYTES_PER_SAMPLE,
            truncated: false,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        },
        PcmReader { consumer, flags },
    )
}

/// Result of feeding one synthesis stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedReport {
    /// Bytes written into the ring
    pub bytes: usize,
    /// The stream exceeded the total cap and the rest was discarded
    pub truncated: bool,
    /// The stream ended with an error after this many bytes
    pub error: Option<String>,
}

/// Writing half of the ring
pub struct PcmFeeder {
    producer: HeapProd<u8>,
    flags: Arc<Flags>,
    written: usize,
    max_bytes: usize,
    truncated: bool,
    stall_timeout: Duration,
}

impl PcmFeeder {
    /// Give up on a stream that delivers nothing for `stall_timeout`
    #[must_use]
    pub const fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Write `data`, waiting while the ring is full
    ///
    /// Returns `false` once nothing more should be written, either because
    /// the total cap was hit or the reader was dropped.
    pub async fn push(&mut self, data: &[u8]) -> bool {
        let room = self.max_bytes - self.written;
        let mut data = if data.len() > room {
            if !self.truncated {
                tracing::warn!(
                    max_bytes = self.max_bytes,
                    "synthesized audio exceeds playback cap, truncating"
                );
            }
            self.truncated = true;
            &data[..room]
        } else {
            data
        };

        while !data.is_empty() {
            if self.flags.closed.load(Ordering::Acquire) {
                return false;
            }
            let n = self.producer.push_slice(data);
            self.written += n;
            data = &data[n..];
            if n == 0 {
                tokio::time::sleep(BACKPRESSURE_WAIT).await;
            }
        }

        !self.truncated && !self.flags.closed.load(Ordering::Acquire)
    }

    /// Total bytes written so far
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Copy `stream` into the ring until it ends, fails, stalls, or the cap is hit
    ///
    /// Also returns as soon as the reader is dropped, even while waiting on
    /// the network. The reader sees end of stream when this returns.
    pub async fn feed(mut self, mut stream: SynthesisStream) -> FeedReport {
        let mut error = None;
        let flags = Arc::clone(&self.flags);

        loop {
            if flags.closed.load(Ordering::Acquire) {
                break;
            }

            let next = tokio::select! {
                next = tokio::time::timeout(self.stall_timeout, stream.next()) => next,
                () = flags.reader_gone.notified() => {
                    tracing::debug!(bytes = self.written, "reader dropped, abandoning synthesis stream");
                    break;
                }
            };

            let Ok(next) = next else {
                let message = format!(
                    "synthesis stream stalled for {}ms",
                    self.stall_timeout.as_millis()
                );
                tracing::warn!(bytes = self.written, "{message}");
                error = Some(message);
                break;
            };
            let Some(chunk) = next else {
                break;
            };

            match chunk {
                Ok(bytes) => {
                    if !self.push(&bytes).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, bytes = self.written, "synthesis stream failed");
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        FeedReport {
            bytes: self.written,
            truncated: self.truncated,
            error,
        }
    }
}

impl Drop for PcmFeeder {
    fn drop(&mut self) {
        self.flags.finished.store(true, Ordering::Release);
    }
}

/// Reading half of the ring
pub struct PcmReader {
    consumer: HeapCons<u8>,
    flags: Arc<Flags>,
}

impl PcmReader {
    /// Whether the feeder has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.flags.finished.load(Ordering::Acquire)
    }

    /// Whether the feeder has finished and every byte has been read
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.is_finished() && self.consumer.is_empty()
    }

    /// Bytes ready to read
    #[must_use]
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }
}

impl ByteSource for PcmReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        // Checked before occupancy so a finished flag covers every byte seen
        let finished = self.is_finished();
        let mut n = buf.len().min(self.consumer.occupied_len());
        if !finished {
            // Leave a split sample in the ring until its second byte arrives
            n -= n % BYTES_PER_SAMPLE;
        }
        self.consumer.pop_slice(&mut buf[..n])
    }
}

impl Drop for PcmReader {
    fn drop(&mut self) {
        self.flags.closed.store(true, Ordering::Release);
        self.flags.reader_gone.notify_one();
    }
}
