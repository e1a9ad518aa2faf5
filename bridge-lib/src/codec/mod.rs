//! Incremental zlib/gzip/raw deflate codec
//!
//! Contexts are owned by the handle registry; every operation here takes a
//! handle and locks the context for the duration of one call.

use std::sync::{Arc, Mutex};

use flate2::Compression;
use log::debug;

mod engine;
mod stream;

pub use engine::{Phase, ZStream};
pub use stream::{unzip_bytes, unzip_stream, zip_bytes, zip_stream};

use crate::error::{Error, Result};
use crate::handle::{registry, wrong_kind, Handle, Resource, ResourceKind};
use crate::mutex_lock;

pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;
pub const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    Fastest,
    Smallest,
}

impl Mode {
    pub fn from_code(code: i32) -> Option<Mode> {
        match code {
            -1 => Some(Mode::Default),
            1 => Some(Mode::Fastest),
            9 => Some(Mode::Smallest),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Mode::Default => -1,
            Mode::Fastest => 1,
            Mode::Smallest => 9,
        }
    }

    pub(crate) fn compression(self) -> Compression {
        match self {
            Mode::Default => Compression::default(),
            Mode::Fastest => Compression::fast(),
            Mode::Smallest => Compression::best(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Zlib,
    Gzip,
    Raw,
}

impl Format {
    pub fn from_code(code: i32) -> Option<Format> {
        match code {
            0 => Some(Format::Zlib),
            1 => Some(Format::Gzip),
            2 => Some(Format::Raw),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Format::Zlib => 0,
            Format::Gzip => 1,
            Format::Raw => 2,
        }
    }
}

/// Parses boundary codes into typed codec parameters.
pub fn parse_params(mode: i32, buffer_size: i64, format: i32) -> Result<(Mode, usize, Format)> {
    let mode = Mode::from_code(mode).ok_or_else(|| Error::argument(format!("mode {}", mode)))?;
    let format =
        Format::from_code(format).ok_or_else(|| Error::argument(format!("format {}", format)))?;
    let buffer_size = usize::try_from(buffer_size)
        .ok()
        .filter(|size| *size > 0)
        .ok_or_else(|| Error::argument(format!("buffer size {}", buffer_size)))?;
    Ok((mode, buffer_size, format))
}

fn open(stream: ZStream) -> Result<Handle> {
    let compressing = stream.is_compressing();
    let handle = registry().insert(Resource::Codec(Arc::new(Mutex::new(stream))))?;
    debug!("codec {} opened, compressing: {}", handle, compressing);
    Ok(handle)
}

pub fn zip_init(mode: Mode, buffer_size: usize, format: Format) -> Result<Handle> {
    open(ZStream::deflate(mode, buffer_size, format)?)
}

pub fn unzip_init(buffer_size: usize, format: Format) -> Result<Handle> {
    open(ZStream::inflate(buffer_size, format)?)
}

fn context(handle: Handle) -> Result<Arc<Mutex<ZStream>>> {
    match registry().get(handle)? {
        Resource::Codec(stream) => Ok(stream),
        other => Err(wrong_kind(handle, ResourceKind::Codec, &other)),
    }
}

pub fn input(handle: Handle, chunk: &[u8], is_final: bool) -> Result<usize> {
    let stream = context(handle)?;
    let mut stream = mutex_lock!(stream);
    stream.input(chunk, is_final)
}

pub fn process_step(handle: Handle) -> Result<Vec<u8>> {
    let stream = context(handle)?;
    let mut stream = mutex_lock!(stream);
    stream.process_step()
}

pub fn is_step_finished(handle: Handle) -> Result<bool> {
    let stream = context(handle)?;
    let stream = mutex_lock!(stream);
    stream.is_step_finished()
}

pub fn release(handle: Handle) -> Result<()> {
    registry().remove(handle, ResourceKind::Codec)?;
    debug!("codec {} released", handle);
    Ok(())
}
