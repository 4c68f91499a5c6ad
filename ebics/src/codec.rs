//! Order data codec: compression, segmentation and the identifiers handed out per
//! transaction and order.

use std::io::Write;

use base64::{engine::general_purpose, Engine as _};
use flate2::{write::ZlibEncoder, Compression};
use miniz_oxide::inflate::{decompress_to_vec, decompress_to_vec_zlib};
use rand::{rngs::OsRng, RngCore};

use crate::error::{EbicsError, Result};

/// Order IDs are "OR" plus two base 36 digits.
pub const ORDER_ID_LIMIT: u32 = 36 * 36;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Deflates order data before encryption. The stream carries the zlib framing
/// (http://www.ietf.org/rfc/rfc1950.txt) EBICS banks send and expect.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| EbicsError::Codec(format!("deflate: {e}")))
}

/// Inflates zlib framed order data, falling back to a raw deflate stream
/// (http://www.ietf.org/rfc/rfc1951.txt) when the zlib header is missing.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_to_vec_zlib(data)
        .or_else(|zlib_err| {
            decompress_to_vec(data).map_err(|_| zlib_err)
        })
        .map_err(|e| EbicsError::Codec(format!("inflate failed: {:?}", e.status)))
}

pub fn base64_encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

/// Tolerates whitespace, as banks tend to wrap long base64 values.
pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(general_purpose::STANDARD.decode(compact)?)
}

/// Splits an encoded payload into segments of at most `segment_size` characters.
/// The first segment travels as segment number 1.
pub fn chunk(encoded: &str, segment_size: usize) -> Result<Vec<String>> {
    if segment_size == 0 {
        return Err(EbicsError::Codec("segment size must be positive".into()));
    }
    let chars: Vec<char> = encoded.chars().collect();
    Ok(chars
        .chunks(segment_size)
        .map(|segment| segment.iter().collect())
        .collect())
}

/// Segments must be given in ascending segment number order.
pub fn reassemble<S: AsRef<str>>(segments: &[S]) -> String {
    segments.iter().map(|s| s.as_ref()).collect()
}

/// `ceil(len / segment_size)`, but at least one segment.
pub fn num_segments(encoded_len: usize, segment_size: usize) -> usize {
    encoded_len.div_ceil(segment_size.max(1)).max(1)
}

/// 16 random bytes in upper case hex.
pub fn generate_transaction_id() -> String {
    let mut id = [0u8; 16];
    OsRng.fill_bytes(&mut id);
    hex::encode_upper(id)
}

pub fn generate_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Callers must check this before handing `n` to [`compute_order_id`].
pub fn check_order_id_overflow(n: u32) -> Result<bool> {
    if n == 0 {
        return Err(EbicsError::InvalidRequest("order ID counter starts at 1".into()));
    }
    Ok(n >= ORDER_ID_LIMIT)
}

/// `1` becomes `OR01`, `36` becomes `OR10`.
pub fn compute_order_id(n: u32) -> Result<String> {
    if check_order_id_overflow(n)? {
        return Err(EbicsError::OrderIdOverflow(n));
    }
    let high = BASE36_DIGITS[(n / 36) as usize] as char;
    let low = BASE36_DIGITS[(n % 36) as usize] as char;
    Ok(format!("OR{high}{low}"))
}
