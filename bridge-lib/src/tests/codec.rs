use std::io::Read;

use proptest::prelude::*;

use super::payload;
use crate::codec::{self, Format, Mode, ZStream};
use crate::error::Error;
use crate::handle::Handle;
use crate::json;

const MODES: [Mode; 3] = [Mode::Default, Mode::Fastest, Mode::Smallest];
const FORMATS: [Format; 3] = [Format::Zlib, Format::Gzip, Format::Raw];

/// Drives a codec handle over `input`, feeding chunks of the given sizes.
fn run(handle: Handle, input: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut sizes = sizes.iter().cycle();
    loop {
        let want = *sizes.next().unwrap();
        let end = (offset + want).min(input.len());
        let last = end == input.len();
        let accepted = codec::input(handle, &input[offset..end], last).unwrap();
        offset += accepted;
        while !codec::is_step_finished(handle).unwrap() {
            let step = codec::process_step(handle).unwrap();
            assert!(!step.is_empty());
            out.extend(step);
        }
        if last && offset == input.len() {
            break;
        }
    }
    codec::release(handle).unwrap();
    out
}

fn zip(mode: Mode, buffer_size: usize, format: Format, input: &[u8]) -> Vec<u8> {
    zip_parts(mode, buffer_size, format, input, &[buffer_size])
}

fn zip_parts(mode: Mode, buffer_size: usize, format: Format, input: &[u8], sizes: &[usize]) -> Vec<u8> {
    let handle = codec::zip_init(mode, buffer_size, format).unwrap();
    run(handle, input, sizes)
}

fn unzip(buffer_size: usize, format: Format, input: &[u8], sizes: &[usize]) -> Vec<u8> {
    let handle = codec::unzip_init(buffer_size, format).unwrap();
    run(handle, input, sizes)
}

#[test]
fn test_round_trip_all_modes_and_formats() {
    let data = payload(10_000, 7);
    for mode in MODES {
        for format in FORMATS {
            for buffer_size in [1, 7, 512, 16 * 1024] {
                let packed = zip(mode, buffer_size, format, &data);
                let unpacked = unzip(buffer_size, format, &packed, &[buffer_size]);
                assert_eq!(unpacked, data, "{:?} {:?} {}", mode, format, buffer_size);
            }
        }
    }
}

#[test]
fn test_bytes_helpers_round_trip() {
    let data = payload(4096, 3);
    for format in FORMATS {
        let packed = codec::zip_bytes(Mode::Smallest, 100, format, &data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(codec::unzip_bytes(33, format, &packed).unwrap(), data);
    }
}

#[test]
fn test_empty_payload_round_trip() {
    for format in FORMATS {
        let packed = codec::zip_bytes(Mode::Default, 64, format, &[]).unwrap();
        assert!(!packed.is_empty());
        assert!(codec::unzip_bytes(64, format, &packed).unwrap().is_empty());
    }
}

#[test]
fn test_payload_filling_whole_buffers() {
    // the last read fills the buffer exactly, so the final chunk arrives empty
    let data = payload(64 * 4, 11);
    let packed = codec::zip_bytes(Mode::Fastest, 64, Format::Gzip, &data).unwrap();
    assert_eq!(codec::unzip_bytes(64, Format::Gzip, &packed).unwrap(), data);
}

#[test]
fn test_gzip_magic_and_raw_has_no_framing() {
    let data = payload(3000, 5);
    let gzip = codec::zip_bytes(Mode::Default, 256, Format::Gzip, &data).unwrap();
    assert_eq!(&gzip[..2], &[0x1f, 0x8b]);

    let zlib = codec::zip_bytes(Mode::Default, 256, Format::Zlib, &data).unwrap();
    let raw = codec::zip_bytes(Mode::Default, 256, Format::Raw, &data).unwrap();
    assert_eq!(zlib[0], 0x78);
    assert_ne!(&raw[..2], &[0x1f, 0x8b]);
    // zlib = 2 byte header + raw deflate + 4 byte adler32
    assert_eq!(raw.len() + 6, zlib.len());
    assert_eq!(&zlib[2..zlib.len() - 4], &raw[..]);
}

#[test]
fn test_decompressed_output_ignores_feed_partitioning() {
    let data = payload(20_000, 9);
    let packed = codec::zip_bytes(Mode::Default, 1024, Format::Zlib, &data).unwrap();
    for sizes in [&[1usize][..], &[3, 50, 7], &[1024], &[999, 1, 512]] {
        let unpacked = unzip(1024, Format::Zlib, &packed, sizes);
        assert_eq!(unpacked, data, "{:?}", sizes);
    }
}

#[test]
fn test_compressed_output_ignores_feed_partitioning() {
    let data = payload(5000, 12);
    for mode in MODES {
        for format in FORMATS {
            let whole = zip_parts(mode, 64, format, &data, &[64]);
            for sizes in [&[1usize][..], &[7], &[33], &[5, 64, 1]] {
                let parted = zip_parts(mode, 64, format, &data, sizes);
                assert_eq!(parted, whole, "{:?} {:?} {:?}", mode, format, sizes);
            }
        }
    }
}

#[test]
fn test_every_step_yields_output() {
    let handle = codec::zip_init(Mode::Default, 64, Format::Raw).unwrap();
    assert_eq!(codec::input(handle, b"hello", false).unwrap(), 5);
    assert!(codec::is_step_finished(handle).unwrap());
    assert!(codec::process_step(handle).is_err());
    assert_eq!(codec::input(handle, b" world", true).unwrap(), 6);
    let mut packed = Vec::new();
    while !codec::is_step_finished(handle).unwrap() {
        let step = codec::process_step(handle).unwrap();
        assert!(!step.is_empty());
        packed.extend(step);
    }
    codec::release(handle).unwrap();
    assert_eq!(codec::unzip_bytes(64, Format::Raw, &packed).unwrap(), b"hello world");
}

#[test]
fn test_init_rejects_bad_buffer_size() {
    assert!(codec::parse_params(-1, 0, 0).is_err());
    assert!(codec::zip_init(Mode::Default, 0, Format::Zlib).is_err());
    assert!(codec::unzip_init(0, Format::Zlib).is_err());
}

#[test]
fn test_input_before_drained_is_rejected() {
    let handle = codec::zip_init(Mode::Default, 4, Format::Zlib).unwrap();
    let data = payload(64, 1);
    // a final chunk always flushes more than four bytes of framing
    assert_eq!(codec::input(handle, &data[..3], true).unwrap(), 3);
    assert!(!codec::is_step_finished(handle).unwrap());
    assert!(matches!(
        codec::input(handle, &data[3..], false),
        Err(Error::NotDrained)
    ));
    codec::release(handle).unwrap();
}

#[test]
fn test_released_handle_fails_cleanly() {
    let handle = codec::unzip_init(16, Format::Raw).unwrap();
    codec::release(handle).unwrap();
    assert!(matches!(codec::input(handle, b"x", true), Err(Error::InvalidHandle(_))));
    assert!(codec::process_step(handle).is_err());
    assert!(codec::is_step_finished(handle).is_err());
    assert!(codec::release(handle).is_err());
}

#[test]
fn test_codec_call_with_other_kind_is_rejected() {
    let decoder = json::decoder_init("[1]").unwrap();
    assert!(matches!(
        codec::input(decoder, b"abc", true),
        Err(Error::WrongKind { .. })
    ));
    assert!(codec::release(decoder).is_err());
    // the decoder survives the mistaken release
    assert!(json::decoder_release(decoder).is_ok());
}

/// Reader that hands out at most `step` bytes per call.
struct Trickle<'a> {
    data: &'a [u8],
    step: usize,
}

impl Read for Trickle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

#[test]
fn test_stream_driver_tolerates_short_reads() {
    let data = payload(5000, 21);
    let mut packed = Vec::new();
    codec::zip_stream(
        Mode::Default,
        256,
        Format::Gzip,
        Trickle { data: &data, step: 3 },
        &mut packed,
    )
    .unwrap();
    let mut unpacked = Vec::new();
    let written = codec::unzip_stream(
        128,
        Format::Gzip,
        Trickle { data: &packed, step: 5 },
        &mut unpacked,
    )
    .unwrap();
    assert_eq!(written as usize, data.len());
    assert_eq!(unpacked, data);
}

#[test]
fn test_truncated_stream_fails_through_driver() {
    let data = payload(2000, 4);
    let packed = codec::zip_bytes(Mode::Default, 512, Format::Gzip, &data).unwrap();
    let result = codec::unzip_bytes(512, Format::Gzip, &packed[..packed.len() / 2]);
    assert!(result.is_err());
}

#[test]
fn test_trailing_garbage_fails() {
    let mut packed = codec::zip_bytes(Mode::Default, 512, Format::Zlib, b"abc").unwrap();
    packed.extend_from_slice(b"junk");
    assert!(codec::unzip_bytes(512, Format::Zlib, &packed).is_err());
}

#[test]
fn test_step_output_bounded_by_buffer_size() {
    let data = payload(4000, 8);
    let packed = codec::zip_bytes(Mode::Default, 4000, Format::Zlib, &data).unwrap();
    let mut stream = ZStream::inflate(10, Format::Zlib).unwrap();
    let mut offset = 0;
    while offset < packed.len() {
        let end = (offset + 10).min(packed.len());
        offset += stream.input(&packed[offset..end], end == packed.len()).unwrap();
        while !stream.is_step_finished().unwrap() {
            assert!(stream.process_step().unwrap().len() <= 10);
        }
    }
    assert!(stream.is_finished());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_round_trip(
        data in proptest::collection::vec(any::<u8>(), 0..3000),
        buffer_size in 1usize..300,
        mode in 0usize..3,
        format in 0usize..3,
    ) {
        let (mode, format) = (MODES[mode], FORMATS[format]);
        let packed = codec::zip_bytes(mode, buffer_size, format, &data).unwrap();
        prop_assert_eq!(codec::unzip_bytes(buffer_size, format, &packed).unwrap(), data);
    }

    #[test]
    fn prop_feed_partitioning(
        data in proptest::collection::vec(0u8..4, 1..4000),
        sizes in proptest::collection::vec(1usize..200, 1..8),
    ) {
        let packed = codec::zip_bytes(Mode::Default, 256, Format::Raw, &data).unwrap();
        let unpacked = unzip(200, Format::Raw, &packed, &sizes);
        prop_assert_eq!(unpacked, data);
    }

    #[test]
    fn prop_compress_partitioning(
        data in proptest::collection::vec(0u8..8, 1..4000),
        sizes in proptest::collection::vec(1usize..200, 1..8),
        mode in 0usize..3,
        format in 0usize..3,
    ) {
        let (mode, format) = (MODES[mode], FORMATS[format]);
        let whole = zip_parts(mode, 200, format, &data, &[200]);
        let parted = zip_parts(mode, 200, format, &data, &sizes);
        prop_assert_eq!(parted, whole);
    }
}
