//! 16-bit PCM to float sample conversion
//!
//! Synthesis output is raw little-endian `i16`, mono, 24 kHz with no header.
//! The playback callback asks for a fixed number of samples; whatever the
//! byte source cannot supply is padded with silence.

/// Sample rate of synthesized speech
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Bytes per encoded sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Supplier of raw PCM bytes
pub trait ByteSource {
    /// Copy up to `buf.len()` bytes into `buf`, returning how many were written
    ///
    /// Returning fewer bytes than requested (including zero) means nothing
    /// more is available right now.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;
}

impl<'a> ByteSource for &'a [u8] {
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let source: &'a [u8] = *self;
        let n = buf.len().min(source.len());
        let (head, rest) = source.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = rest;
        n
    }
}

/// Decodes PCM bytes into normalized `f32` samples
///
/// Holds only a scratch buffer, so it can live inside a real-time callback
/// without allocating once warmed up.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    scratch: Vec<u8>,
}

impl PcmDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder pre-sized for pulls of up to `samples` samples
    #[must_use]
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            scratch: vec![0; samples * BYTES_PER_SAMPLE],
        }
    }

    /// Fill `out` with samples read from `source`
    ///
    /// Reads up to `2 * out.len()` bytes, maps each `i16` to `[-1.0, 1.0)` by
    /// dividing by 32768 and zero-fills the shortfall. Returns the number of
    /// samples that came from the source.
    pub fn fill<S: ByteSource + ?Sized>(&mut self, source: &mut S, out: &mut [f32]) -> usize {
        let wanted = out.len() * BYTES_PER_SAMPLE;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0);
        }

        let read = source.read_bytes(&mut self.scratch[..wanted]);
        let decoded = read / BYTES_PER_SAMPLE;

        for (sample, pair) in out
            .iter_mut()
            .zip(self.scratch[..decoded * BYTES_PER_SAMPLE].chunks_exact(BYTES_PER_SAMPLE))
        {
            *sample = f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0;
        }
        out[decoded..].fill(0.0);

        decoded
    }
}

/// Encode float samples as 16-bit little-endian PCM
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let value = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
            value.to_le_bytes()
        })
        .collect()
}
