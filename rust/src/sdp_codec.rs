//! Session descriptions are too large for a single relay message, so they
//! travel gzip-compressed and base64-encoded.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compact payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("gzip stream error: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("decompressed payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("compact payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("decompressed payload exceeds limit of {limit} bytes")]
    Inflated { limit: usize },
}

/// Largest description [`decompress`] will inflate. Remote peers choose the
/// input, so the output is capped.
pub const MAX_DECOMPRESSED_BYTES: usize = 1024 * 1024;

pub fn compress(text: &str) -> Result<String, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let gz = encoder.finish()?;
    Ok(STANDARD.encode(gz))
}

/// Like [`compress`], but fails when the compact form would not fit in
/// `limit` bytes.
pub fn compress_within(text: &str, limit: usize) -> Result<String, CodecError> {
    let compact = compress(text)?;
    if compact.len() > limit {
        return Err(CodecError::TooLarge {
            size: compact.len(),
            limit,
        });
    }
    Ok(compact)
}

pub fn decompress(compact: &str) -> Result<String, CodecError> {
    decompress_within(compact, MAX_DECOMPRESSED_BYTES)
}

/// Like [`decompress`], but fails once the inflated text passes `limit` bytes.
pub fn decompress_within(compact: &str, limit: usize) -> Result<String, CodecError> {
    let gz = STANDARD.decode(compact.trim())?;
    let mut out = Vec::new();
    GzDecoder::new(gz.as_slice())
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(CodecError::Inflated { limit });
    }
    Ok(String::from_utf8(out)?)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample_sdp(media_sections: usize) -> String {
        let mut sdp = String::from("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
        for mid in 0..media_sections {
            let seed = (mid as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let fingerprint = (0..32u32)
                .map(|i| format!("{:02X}", (seed.rotate_left(i * 7) >> 56) as u8))
                .collect::<Vec<_>>()
                .join(":");
            let lines = [
                "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99 100 101 102".to_string(),
                "c=IN IP4 0.0.0.0".to_string(),
                "a=rtcp:9 IN IP4 0.0.0.0".to_string(),
                format!("a=ice-ufrag:{:08x}", seed as u32),
                format!("a=ice-pwd:{:016x}{:08x}", seed, seed.rotate_left(29) as u32),
                format!("a=fingerprint:sha-256 {fingerprint}"),
                "a=setup:actpass".to_string(),
                format!("a=mid:{mid}"),
                "a=sendrecv".to_string(),
                "a=rtcp-mux".to_string(),
                "a=rtpmap:96 VP8/90000".to_string(),
                "a=rtcp-fb:96 goog-remb".to_string(),
                "a=rtcp-fb:96 transport-cc".to_string(),
                "a=rtcp-fb:96 ccm fir".to_string(),
                "a=rtcp-fb:96 nack".to_string(),
                "a=rtcp-fb:96 nack pli".to_string(),
                format!("a=ssrc:{} cname:{:012x}", seed as u32, seed >> 16),
            ];
            for line in lines {
                sdp.push_str(&line);
                sdp.push_str("\r\n");
            }
        }
        sdp
    }

    #[test]
    fn restores_a_session_description() {
        let sdp = sample_sdp(2);
        let compact = compress(&sdp).expect("compress");
        assert!(compact.is_ascii());
        assert_eq!(decompress(&compact).expect("decompress"), sdp);
    }

    #[test]
    fn realistic_descriptions_shrink_well_below_the_relay_ceiling() {
        let sdp = sample_sdp(80);
        assert!(sdp.len() > 30_000, "raw={}", sdp.len());
        let compact = compress_within(&sdp, 64 * 1024).expect("fits");
        assert!(compact.len() < 64 * 1024);
        assert!(compact.len() < sdp.len() / 2, "compact={} raw={}", compact.len(), sdp.len());
        assert_eq!(decompress(&compact).expect("decompress"), sdp);
    }

    #[test]
    fn compress_within_reports_size_and_limit() {
        match compress_within(&sample_sdp(1), 16) {
            Err(CodecError::TooLarge { size, limit }) => {
                assert_eq!(limit, 16);
                assert!(size > 16);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_a_distinct_error() {
        assert!(matches!(decompress("%%% not base64"), Err(CodecError::Base64(_))));
        // Valid base64, but not a gzip stream.
        assert!(matches!(decompress("aGVsbG8gd29ybGQ="), Err(CodecError::Gzip(_))));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0xff, 0xfe, 0xfd]).unwrap();
        let compact = STANDARD.encode(encoder.finish().unwrap());
        assert!(matches!(decompress(&compact), Err(CodecError::Utf8(_))));
    }

    #[test]
    fn inflation_past_the_cap_is_rejected() {
        let bomb = compress(&"a".repeat(MAX_DECOMPRESSED_BYTES + 1)).unwrap();
        assert!(bomb.len() < 16 * 1024);
        assert!(matches!(
            decompress(&bomb),
            Err(CodecError::Inflated { limit: MAX_DECOMPRESSED_BYTES })
        ));

        let exact = compress(&"b".repeat(64)).unwrap();
        assert_eq!(decompress_within(&exact, 64).unwrap().len(), 64);
        assert!(matches!(
            decompress_within(&exact, 63),
            Err(CodecError::Inflated { limit: 63 })
        ));
    }

    #[test]
    fn empty_text_survives() {
        assert_eq!(decompress(&compress("").unwrap()).unwrap(), "");
    }

    proptest! {
        #[test]
        fn decompress_inverts_compress(text in any::<String>()) {
            let compact = compress(&text).unwrap();
            prop_assert_eq!(decompress(&compact).unwrap(), text);
        }
    }
}
