//! Cipher and codec primitives for the proprietary lyric payloads.
//!
//! Everything here is pure and synchronous: a hex digest for request
//! signing, the KRC XOR unwrap, the QRC 3DES block cipher, and best-effort
//! DEFLATE decompression. None of it is a security boundary.

pub mod des;

pub use des::{Mode, TripleDes};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use md5::{Digest, Md5};
use std::io::Read;
use thiserror::Error;

/// Repeating XOR key applied to KRC payloads after the magic header.
const KRC_XOR_KEY: [u8; 16] = [
    0x40, 0x47, 0x61, 0x77, 0x5e, 0x32, 0x74, 0x47, 0x51, 0x36, 0x31, 0x2d, 0xce, 0xd2, 0x6e,
    0x69,
];

/// Length of the `krc1` magic prefix stripped before the XOR pass.
const KRC_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("input length {0} is not a multiple of the 8-byte block size")]
    RaggedLength(usize),
    #[error("payload shorter than its 4-byte header")]
    ShortPayload,
    #[error("deflate stream produced no output: {0}")]
    Deflate(std::io::Error),
}

/// Hex MD5 digest. Used only to sign requests, never for secrecy.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_ref());
    hex::encode(hasher.finalize())
}

/// Strip the fixed 4-byte magic header and XOR the rest against the
/// repeating 16-byte key. The result is still compressed.
pub fn xor_unwrap(payload: &[u8]) -> Result<Vec<u8>, CipherError> {
    if payload.len() <= KRC_HEADER_LEN {
        return Err(CipherError::ShortPayload);
    }
    let mut data = payload[KRC_HEADER_LEN..].to_vec();
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= KRC_XOR_KEY[i % KRC_XOR_KEY.len()];
    }
    Ok(data)
}

/// Which DEFLATE framing to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wrap {
    Zlib,
    Raw,
}

/// Decompress `data` into UTF-8 text.
///
/// Best-effort: a stream that dies after producing output returns the
/// partial output; only a stream that produced nothing is an error.
pub fn inflate(data: &[u8], wrap: Wrap) -> Result<String, CipherError> {
    let (bytes, err) = match wrap {
        Wrap::Zlib => drain(ZlibDecoder::new(data)),
        Wrap::Raw => drain(DeflateDecoder::new(data)),
    };
    if bytes.is_empty()
        && let Some(err) = err
    {
        return Err(CipherError::Deflate(err));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn drain(mut reader: impl Read) -> (Vec<u8>, Option<std::io::Error>) {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return (out, None),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) => return (out, Some(err)),
        }
    }
}
