use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};
use log::debug;

use super::{Format, Mode, MAX_BUFFER_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No input has been fed yet.
    Created,
    /// Output of the last chunk is drained; more input is expected.
    Feeding,
    /// Output of the current chunk is pending.
    Draining,
    /// The final chunk has been fully drained.
    Finished,
    /// The engine reported an error; the context is unusable.
    Failed,
}

enum Coder {
    Deflate(Compress),
    Inflate(Decompress),
}

impl Coder {
    fn totals(&self) -> (u64, u64) {
        match self {
            Coder::Deflate(c) => (c.total_in(), c.total_out()),
            Coder::Inflate(d) => (d.total_in(), d.total_out()),
        }
    }
}

/// One incremental compression or decompression stream.
///
/// Input is fed one buffer at a time and output is drained in steps of at
/// most `buffer_size` bytes. A new chunk is accepted only after the previous
/// one has been fully drained.
///
/// The engine runs one step ahead of the caller: `Draining` always means a
/// non-empty chunk (or a deferred engine error) is waiting, so a successful
/// `process_step` never returns empty output.
pub struct ZStream {
    coder: Coder,
    format: Format,
    buffer_size: usize,
    pending: Vec<u8>,
    consumed: usize,
    last_chunk: bool,
    stream_end: bool,
    chunk_done: bool,
    ready: Option<Vec<u8>>,
    fault: Option<Error>,
    phase: Phase,
}

impl ZStream {
    pub fn deflate(mode: Mode, buffer_size: usize, format: Format) -> Result<Self> {
        check_buffer_size(buffer_size)?;
        let level = mode.compression();
        let compress = match format {
            Format::Zlib => Compress::new(level, true),
            Format::Raw => Compress::new(level, false),
            Format::Gzip => Compress::new_gzip(level, 15),
        };
        Ok(Self::with_coder(Coder::Deflate(compress), format, buffer_size))
    }

    pub fn inflate(buffer_size: usize, format: Format) -> Result<Self> {
        check_buffer_size(buffer_size)?;
        let decompress = match format {
            Format::Zlib => Decompress::new(true),
            Format::Raw => Decompress::new(false),
            Format::Gzip => Decompress::new_gzip(15),
        };
        Ok(Self::with_coder(
            Coder::Inflate(decompress),
            format,
            buffer_size,
        ))
    }

    fn with_coder(coder: Coder, format: Format, buffer_size: usize) -> Self {
        Self {
            coder,
            format,
            buffer_size,
            pending: Vec::with_capacity(buffer_size),
            consumed: 0,
            last_chunk: false,
            stream_end: false,
            chunk_done: false,
            ready: None,
            fault: None,
            phase: Phase::Created,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_compressing(&self) -> bool {
        matches!(self.coder, Coder::Deflate(_))
    }

    /// Feeds up to one buffer of `chunk` and returns how many bytes were taken.
    ///
    /// `is_final` only takes effect when the whole chunk fits; otherwise the
    /// caller still owes the remainder.
    pub fn input(&mut self, chunk: &[u8], is_final: bool) -> Result<usize> {
        match self.phase {
            Phase::Draining => return Err(Error::NotDrained),
            Phase::Finished => return Err(Error::StreamFinished),
            Phase::Failed => return Err(Error::codec("stream failed")),
            Phase::Created | Phase::Feeding => {}
        }
        if chunk.is_empty() && !is_final {
            return Err(Error::argument("empty chunk without end of stream"));
        }
        if self.stream_end {
            // decompressor already saw the end of the compressed stream
            if !chunk.is_empty() {
                self.phase = Phase::Failed;
                return Err(Error::codec("trailing data after end of stream"));
            }
            self.last_chunk = true;
            self.phase = Phase::Finished;
            return Ok(0);
        }

        let accepted = chunk.len().min(self.buffer_size);
        self.pending.clear();
        self.pending.extend_from_slice(&chunk[..accepted]);
        self.consumed = 0;
        self.last_chunk = is_final && accepted == chunk.len();
        self.chunk_done = false;
        self.phase = Phase::Draining;
        self.advance();
        Ok(accepted)
    }

    /// Hands out the next chunk of output, at most one buffer long.
    ///
    /// Only valid while `Draining`; the returned chunk is never empty.
    pub fn process_step(&mut self) -> Result<Vec<u8>> {
        match self.phase {
            Phase::Draining => {}
            Phase::Failed => return Err(Error::codec("stream failed")),
            Phase::Created | Phase::Feeding | Phase::Finished => {
                return Err(Error::codec("no output pending"))
            }
        }
        if let Some(e) = self.fault.take() {
            self.phase = Phase::Failed;
            return Err(e);
        }
        let out = self
            .ready
            .take()
            .ok_or_else(|| Error::codec("no output pending"))?;
        self.advance();
        Ok(out)
    }

    /// Runs the engine until it yields output or the current chunk is done.
    fn advance(&mut self) {
        while !self.chunk_done {
            match self.step() {
                Ok(out) if out.is_empty() => {}
                Ok(out) => {
                    self.ready = Some(out);
                    return;
                }
                Err(e) => {
                    self.fault = Some(e);
                    return;
                }
            }
        }
        self.phase = if self.last_chunk {
            Phase::Finished
        } else {
            Phase::Feeding
        };
    }

    fn step(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.buffer_size];
        let (in_before, out_before) = self.coder.totals();
        let input = &self.pending[self.consumed..];
        let status = match &mut self.coder {
            Coder::Deflate(c) => {
                let flush = if self.last_chunk {
                    FlushCompress::Finish
                } else {
                    FlushCompress::None
                };
                c.compress(input, &mut out, flush).map_err(Error::codec)?
            }
            Coder::Inflate(d) => d
                .decompress(input, &mut out, FlushDecompress::None)
                .map_err(Error::codec)?,
        };
        let (in_after, out_after) = self.coder.totals();
        self.consumed += (in_after - in_before) as usize;
        let produced = (out_after - out_before) as usize;
        out.truncate(produced);

        if status == Status::StreamEnd {
            self.stream_end = true;
        }
        let step_finished = self.stream_end || produced < self.buffer_size;
        if step_finished {
            self.check_chunk()?;
            self.chunk_done = true;
        }
        debug!(
            "codec step: produced {} bytes, consumed {}/{}, finished {}",
            produced,
            self.consumed,
            self.pending.len(),
            step_finished
        );
        Ok(out)
    }

    fn check_chunk(&self) -> Result<()> {
        if !self.is_compressing() {
            if self.stream_end && self.consumed < self.pending.len() {
                return Err(Error::codec("trailing data after end of stream"));
            }
            if self.last_chunk && !self.stream_end {
                return Err(Error::codec("compressed stream is truncated"));
            }
        }
        Ok(())
    }

    /// True once the output of the current chunk is fully drained.
    pub fn is_step_finished(&self) -> Result<bool> {
        match self.phase {
            Phase::Failed => Err(Error::codec("stream failed")),
            Phase::Draining => Ok(false),
            Phase::Created | Phase::Feeding | Phase::Finished => Ok(true),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }
}

fn check_buffer_size(buffer_size: usize) -> Result<()> {
    if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
        return Err(Error::argument(format!(
            "buffer size {} out of range 1..={}",
            buffer_size, MAX_BUFFER_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(stream: &mut ZStream, out: &mut Vec<u8>) {
        while !stream.is_step_finished().unwrap() {
            out.extend(stream.process_step().unwrap());
        }
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        assert!(ZStream::deflate(Mode::Default, 0, Format::Zlib).is_err());
        assert!(ZStream::inflate(0, Format::Gzip).is_err());
        assert!(ZStream::inflate(MAX_BUFFER_SIZE + 1, Format::Raw).is_err());
    }

    #[test]
    fn test_input_before_drain_is_rejected() {
        let mut stream = ZStream::deflate(Mode::Default, 8, Format::Zlib).unwrap();
        // header, one literal block and the adler32 trailer overflow 8 bytes
        assert_eq!(stream.input(b"hello", true).unwrap(), 5);
        assert_eq!(stream.phase(), Phase::Draining);
        assert!(matches!(stream.input(b"world", false), Err(Error::NotDrained)));
        let mut out = Vec::new();
        drain(&mut stream, &mut out);
        assert!(stream.is_finished());
        assert!(out.len() > 8);
    }

    #[test]
    fn test_input_caps_at_buffer_size_and_defers_final() {
        let mut stream = ZStream::deflate(Mode::Fastest, 4, Format::Raw).unwrap();
        assert_eq!(stream.input(b"abcdefgh", true).unwrap(), 4);
        let mut out = Vec::new();
        drain(&mut stream, &mut out);
        assert_eq!(stream.phase(), Phase::Feeding);
        assert_eq!(stream.input(b"efgh", true).unwrap(), 4);
        drain(&mut stream, &mut out);
        assert!(stream.is_finished());
        assert!(matches!(stream.input(b"x", true), Err(Error::StreamFinished)));
    }

    #[test]
    fn test_empty_chunk_needs_final_flag() {
        let mut stream = ZStream::deflate(Mode::Default, 16, Format::Gzip).unwrap();
        assert!(stream.input(&[], false).is_err());
        assert_eq!(stream.input(&[], true).unwrap(), 0);
        let mut out = Vec::new();
        drain(&mut stream, &mut out);
        assert_eq!(&out[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_truncated_inflate_fails() {
        let mut deflate = ZStream::deflate(Mode::Default, 64, Format::Zlib).unwrap();
        deflate.input(b"some payload that will be cut short", true).unwrap();
        let mut packed = Vec::new();
        drain(&mut deflate, &mut packed);

        let mut inflate = ZStream::inflate(64, Format::Zlib).unwrap();
        inflate.input(&packed[..packed.len() - 3], true).unwrap();
        let mut result = Ok(Vec::new());
        while let Ok(false) = inflate.is_step_finished() {
            result = inflate.process_step();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
        assert_eq!(inflate.phase(), Phase::Failed);
        assert!(inflate.process_step().is_err());
    }

    #[test]
    fn test_garbage_inflate_fails() {
        let mut inflate = ZStream::inflate(32, Format::Zlib).unwrap();
        inflate.input(b"definitely not zlib", true).unwrap();
        // the error surfaces from the step that hit it
        assert!(!inflate.is_step_finished().unwrap());
        assert!(inflate.process_step().is_err());
        assert!(inflate.is_step_finished().is_err());
    }

    #[test]
    fn test_process_step_outside_draining_fails() {
        let mut stream = ZStream::inflate(32, Format::Raw).unwrap();
        assert!(stream.is_step_finished().unwrap());
        assert!(stream.process_step().is_err());
        assert_eq!(stream.phase(), Phase::Created);
    }

    #[test]
    fn test_buffered_input_leaves_nothing_to_drain() {
        let mut stream = ZStream::deflate(Mode::Default, 64, Format::Raw).unwrap();
        assert_eq!(stream.input(b"hello", false).unwrap(), 5);
        // deflate holds short input back, so the step is already over
        assert!(stream.is_step_finished().unwrap());
        assert_eq!(stream.phase(), Phase::Feeding);
        assert!(stream.process_step().is_err());

        assert_eq!(stream.input(&[], true).unwrap(), 0);
        let mut out = Vec::new();
        while !stream.is_step_finished().unwrap() {
            let chunk = stream.process_step().unwrap();
            assert!(!chunk.is_empty());
            out.extend(chunk);
        }
        assert!(stream.is_finished());
        let mut inflate = ZStream::inflate(64, Format::Raw).unwrap();
        inflate.input(&out, true).unwrap();
        let mut plain = Vec::new();
        drain(&mut inflate, &mut plain);
        assert_eq!(plain, b"hello");
    }
}
