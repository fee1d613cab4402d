use std::io::Read;

use flate2::read::{MultiGzDecoder, ZlibDecoder};

use crate::normalize::DecodeError;

/// Undoes a `Content-Encoding` chain. Encodings are applied in header order,
/// so they are removed last to first.
///
/// No intermediate or final body may grow past `limit` bytes.
pub fn decompress(
    header: Option<&str>,
    body: Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    let Some(encodings) = header else {
        return Ok(body);
    };

    let mut body = body;
    for encoding in encodings.rsplit(',').map(str::trim) {
        body = match encoding {
            "" | "identity" => body,
            "gzip" | "x-gzip" => {
                read_capped(MultiGzDecoder::new(body.as_slice()), encoding, limit)?
            }
            "zstd" => {
                let decoder = zstd::stream::read::Decoder::new(body.as_slice())
                    .map_err(|source| decompress_error(encoding, source))?;
                read_capped(decoder, encoding, limit)?
            }
            "deflate" | "x-deflate" => {
                read_capped(ZlibDecoder::new(body.as_slice()), encoding, limit)?
            }
            other => return Err(DecodeError::UnsupportedEncoding(other.to_string())),
        };
    }
    Ok(body)
}

/// Reads at most one byte past `limit`, which is enough to tell an oversized
/// body from one that fits exactly.
fn read_capped(reader: impl Read, encoding: &str, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoded = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|source| decompress_error(encoding, source))?;
    if decoded.len() > limit {
        return Err(DecodeError::TooLarge { limit });
    }
    Ok(decoded)
}

fn decompress_error(encoding: &str, source: std::io::Error) -> DecodeError {
    DecodeError::Decompress {
        encoding: encoding.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;

    use super::*;

    const PAYLOAD: &[u8] = br#"{"cpuIdle": 93.5}"#;
    const LIMIT: usize = 1 << 20;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("write");
        encoder.finish().expect("finish")
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("write");
        encoder.finish().expect("finish")
    }

    #[test]
    fn test_identity() {
        assert_eq!(decompress(None, PAYLOAD.to_vec(), LIMIT).expect("plain"), PAYLOAD);
        assert_eq!(
            decompress(Some("identity"), PAYLOAD.to_vec(), LIMIT).expect("identity"),
            PAYLOAD
        );
    }

    #[test]
    fn test_deflate() {
        assert_eq!(
            decompress(Some("deflate"), zlib(PAYLOAD), LIMIT).expect("deflate"),
            PAYLOAD
        );
    }

    #[test]
    fn test_gzip() {
        assert_eq!(
            decompress(Some("x-gzip"), gzip(PAYLOAD), LIMIT).expect("gzip"),
            PAYLOAD
        );
    }

    #[test]
    fn test_zstd() {
        let compressed = zstd::encode_all(PAYLOAD, 3).expect("zstd encode");
        assert_eq!(
            decompress(Some("zstd"), compressed, LIMIT).expect("zstd"),
            PAYLOAD
        );
    }

    #[test]
    fn test_chained_encodings() {
        let body = gzip(&zlib(PAYLOAD));
        assert_eq!(
            decompress(Some("deflate, gzip"), body, LIMIT).expect("chain"),
            PAYLOAD
        );
    }

    #[test]
    fn test_unsupported_encoding() {
        let err = decompress(Some("br"), PAYLOAD.to_vec(), LIMIT).expect_err("brotli");
        assert!(matches!(err, DecodeError::UnsupportedEncoding(ref e) if e == "br"));
    }

    #[test]
    fn test_corrupt_body() {
        let err = decompress(Some("deflate"), PAYLOAD.to_vec(), LIMIT).expect_err("not zlib");
        assert!(matches!(err, DecodeError::Decompress { .. }));
    }

    #[test]
    fn test_decompressed_size_is_capped() {
        let bomb = zlib(&vec![b' '; 4 * LIMIT]);
        assert!(bomb.len() < LIMIT);

        let err = decompress(Some("deflate"), bomb, LIMIT).expect_err("over limit");
        assert!(matches!(err, DecodeError::TooLarge { limit } if limit == LIMIT));

        let exact = vec![b' '; LIMIT];
        let decoded = decompress(Some("gzip"), gzip(&exact), LIMIT).expect("fits exactly");
        assert_eq!(decoded.len(), LIMIT);
    }
}
