use std::io::{ErrorKind, Read, Write};

use super::{Format, Mode, ZStream};
use crate::error::Result;

/// Fills `buf` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Pumps `reader` through `stream` into `writer`, returning bytes written.
///
/// Output already written before a failure stays written.
pub fn pump<R: Read, W: Write>(stream: &mut ZStream, mut reader: R, mut writer: W) -> Result<u64> {
    let mut chunk = vec![0u8; stream.buffer_size()];
    let mut written = 0u64;
    loop {
        let n = read_full(&mut reader, &mut chunk)?;
        let last = n < chunk.len();
        stream.input(&chunk[..n], last)?;
        while !stream.is_step_finished()? {
            let out = stream.process_step()?;
            writer.write_all(&out)?;
            written += out.len() as u64;
        }
        if last {
            break;
        }
    }
    writer.flush()?;
    Ok(written)
}

pub fn zip_stream<R: Read, W: Write>(
    mode: Mode,
    buffer_size: usize,
    format: Format,
    reader: R,
    writer: W,
) -> Result<u64> {
    let mut stream = ZStream::deflate(mode, buffer_size, format)?;
    pump(&mut stream, reader, writer)
}

pub fn unzip_stream<R: Read, W: Write>(
    buffer_size: usize,
    format: Format,
    reader: R,
    writer: W,
) -> Result<u64> {
    let mut stream = ZStream::inflate(buffer_size, format)?;
    pump(&mut stream, reader, writer)
}

pub fn zip_bytes(mode: Mode, buffer_size: usize, format: Format, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    zip_stream(mode, buffer_size, format, input, &mut out)?;
    Ok(out)
}

pub fn unzip_bytes(buffer_size: usize, format: Format, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    unzip_stream(buffer_size, format, input, &mut out)?;
    Ok(out)
}
