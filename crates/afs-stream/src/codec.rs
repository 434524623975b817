#![forbid(unsafe_code)]
//! Compression-method dispatch for single compressed blocks.
//!
//! Methods are validated when a stream is built, so the dispatcher only
//! ever sees members of [`CompressionMethod`].

use crate::lzvn;
use afs_error::{AfsError, Result};
use afs_types::CompressionMethod;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

/// Leading byte of a deflate block stored without compression.
pub const DEFLATE_STORED_MARKER: u8 = 0xFF;

/// Leading byte of an LZVN block stored without compression.
pub const LZVN_STORED_MARKER: u8 = 0x06;

fn decode_error(method: CompressionMethod, detail: impl Into<String>) -> AfsError {
    AfsError::Decode {
        method: method.name(),
        detail: detail.into(),
    }
}

fn copy_stored(method: CompressionMethod, input: &[u8], output: &mut [u8]) -> Result<usize> {
    if input.len() > output.len() {
        return Err(decode_error(
            method,
            format!(
                "stored block of {} bytes exceeds output of {} bytes",
                input.len(),
                output.len()
            ),
        ));
    }
    output[..input.len()].copy_from_slice(input);
    Ok(input.len())
}

/// Decode one compressed block into `output`.
///
/// Returns the number of valid bytes written, which is less than
/// `output.len()` for the final block of a stream.
pub fn decompress(method: CompressionMethod, input: &[u8], output: &mut [u8]) -> Result<usize> {
    match method {
        CompressionMethod::None => {
            let count = input.len().min(output.len());
            output[..count].copy_from_slice(&input[..count]);
            Ok(count)
        }
        CompressionMethod::Deflate => match input.split_first() {
            Some((&DEFLATE_STORED_MARKER, stored)) => copy_stored(method, stored, output),
            _ => inflate_zlib(input, output),
        },
        CompressionMethod::Lzvn => match input.split_first() {
            Some((&LZVN_STORED_MARKER, stored)) => copy_stored(method, stored, output),
            _ => lzvn::decode(input, output).map_err(|detail| decode_error(method, detail)),
        },
    }
}

fn inflate_zlib(input: &[u8], output: &mut [u8]) -> Result<usize> {
    let mut inflater = Decompress::new(true);
    match inflater.decompress(input, output, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => usize::try_from(inflater.total_out())
            .map_err(|_| decode_error(CompressionMethod::Deflate, "output size overflows usize")),
        Ok(Status::Ok | Status::BufError) => Err(decode_error(
            CompressionMethod::Deflate,
            format!(
                "stream did not end: consumed={} produced={} output_capacity={}",
                inflater.total_in(),
                inflater.total_out(),
                output.len()
            ),
        )),
        Err(err) => Err(decode_error(CompressionMethod::Deflate, err.to_string())),
    }
}

/// Encode one block with `method`.
///
/// Only the stored and deflate paths have encoders; LZVN is decode-only.
pub fn compress(method: CompressionMethod, input: &[u8]) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(input.to_vec()),
        CompressionMethod::Deflate => {
            let mut deflater = Compress::new(Compression::default(), true);
            let mut out = Vec::with_capacity(input.len() / 2 + 64);
            loop {
                let consumed = usize::try_from(deflater.total_in()).unwrap_or(input.len());
                out.reserve(4096);
                let status = deflater
                    .compress_vec(&input[consumed..], &mut out, FlushCompress::Finish)
                    .map_err(|err| {
                        AfsError::InvalidArgument(format!("deflate encode failed: {err}"))
                    })?;
                if status == Status::StreamEnd {
                    return Ok(out);
                }
            }
        }
        CompressionMethod::Lzvn => Err(AfsError::UnsupportedCompression(method.id())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afs_types::COMPRESSED_BLOCK_SIZE;

    fn plaintext(len: usize) -> Vec<u8> {
        // Mix of compressible runs and varying bytes.
        (0..len)
            .map(|i| if (i / 64) % 3 == 0 { b'a' } else { (i * 7 % 251) as u8 })
            .collect()
    }

    #[test]
    fn round_trip_for_encodable_methods() {
        for method in [CompressionMethod::None, CompressionMethod::Deflate] {
            for len in [1, 2, 100, 4096, 65_535, COMPRESSED_BLOCK_SIZE] {
                let input = plaintext(len);
                let encoded = compress(method, &input).expect("encode");
                let mut out = vec![0_u8; COMPRESSED_BLOCK_SIZE];
                let count = decompress(method, &encoded, &mut out).expect("decode");
                assert_eq!(count, len, "{method} len {len}");
                assert_eq!(&out[..count], &input[..], "{method} len {len}");
            }
        }
    }

    #[test]
    fn deflate_ignores_trailing_padding() {
        let input = plaintext(1024);
        let mut encoded = compress(CompressionMethod::Deflate, &input).expect("encode");
        encoded.resize(COMPRESSED_BLOCK_SIZE, 0);
        let mut out = vec![0_u8; COMPRESSED_BLOCK_SIZE];
        let count = decompress(CompressionMethod::Deflate, &encoded, &mut out).expect("decode");
        assert_eq!(count, 1024);
        assert_eq!(&out[..count], &input[..]);
    }

    #[test]
    fn stored_markers_copy_payload() {
        let mut out = [0_u8; 16];
        let count =
            decompress(CompressionMethod::Deflate, &[0xFF, 1, 2, 3], &mut out).expect("stored");
        assert_eq!(&out[..count], &[1, 2, 3]);

        let count = decompress(CompressionMethod::Lzvn, &[0x06, 9, 8], &mut out).expect("stored");
        assert_eq!(&out[..count], &[9, 8]);

        let err = decompress(CompressionMethod::Lzvn, &[0x06; 20], &mut out).expect_err("overflow");
        assert!(err.is_decode());
    }

    #[test]
    fn corrupt_deflate_is_a_decode_error() {
        let mut out = vec![0_u8; 1024];
        let err = decompress(CompressionMethod::Deflate, &[0x78, 0x9C, 0xFF, 0xFF, 0x00], &mut out)
            .expect_err("corrupt");
        assert!(err.is_decode());
        assert!(!err.is_io());

        let encoded = compress(CompressionMethod::Deflate, &plaintext(4096)).expect("encode");
        let truncated = &encoded[..encoded.len() / 2];
        let err =
            decompress(CompressionMethod::Deflate, truncated, &mut out).expect_err("truncated");
        assert!(err.is_decode());
    }

    #[test]
    fn deflate_output_overflow_is_a_decode_error() {
        let encoded = compress(CompressionMethod::Deflate, &plaintext(4096)).expect("encode");
        let mut out = vec![0_u8; 1024];
        let err = decompress(CompressionMethod::Deflate, &encoded, &mut out).expect_err("overflow");
        assert!(err.is_decode());
    }

    #[test]
    fn none_method_reports_short_final_block() {
        let mut out = vec![0_u8; COMPRESSED_BLOCK_SIZE];
        let count = decompress(CompressionMethod::None, &[5_u8; 300], &mut out).expect("copy");
        assert_eq!(count, 300);
    }

    #[test]
    fn lzvn_has_no_encoder() {
        assert!(matches!(
            compress(CompressionMethod::Lzvn, b"x"),
            Err(AfsError::UnsupportedCompression(2))
        ));
    }
}
