//! Text forms of a [`SessionDescription`] for the out-of-band hop between peers.
//!
//! Two forms are produced: plain json, and a compact form (json, gzip,
//! standard base64) short enough for a QR code. [`decode`] accepts either and
//! tells them apart by the leading `{`.

use crate::config::DescriptionFormat;
use crate::error::CodecError;
use crate::peer::types::{SdpKind, SessionDescription};
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Upper bound on a decompressed description, guards against gzip bombs.
pub const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

pub fn encode(desc: &SessionDescription, format: DescriptionFormat) -> Result<String, CodecError> {
    validate(desc)?;
    match format {
        DescriptionFormat::Json => Ok(serde_json::to_string(desc)?),
        DescriptionFormat::Compact => {
            let json = serde_json::to_vec(desc)?;
            let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
            gz.write_all(&json)?;
            let compressed = gz.finish()?;
            Ok(general_purpose::STANDARD.encode(compressed))
        }
    }
}

pub fn decode(text: &str) -> Result<SessionDescription, CodecError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(CodecError::Empty);
    }

    let desc: SessionDescription = if text.starts_with('{') {
        serde_json::from_str(text)?
    } else {
        // pasted or scanned text may be wrapped
        let packed: String = text.chars().filter(|c| !matches!(c, '\r' | '\n')).collect();
        if !packed.bytes().all(is_base64_byte) {
            return Err(CodecError::UnrecognizedFormat);
        }
        let compressed = general_purpose::STANDARD.decode(packed)?;

        let mut json = Vec::new();
        GzDecoder::new(&compressed[..])
            .take(MAX_DECOMPRESSED_SIZE + 1)
            .read_to_end(&mut json)?;
        if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
            return Err(CodecError::TooLarge {
                limit: MAX_DECOMPRESSED_SIZE,
            });
        }
        serde_json::from_slice(&json)?
    };

    validate(&desc)?;
    Ok(desc)
}

/// Like [`decode`], but the description must be of `expected` kind.
pub fn decode_expecting(text: &str, expected: SdpKind) -> Result<SessionDescription, CodecError> {
    let desc = decode(text)?;
    if desc.kind != expected {
        return Err(CodecError::UnexpectedKind {
            expected,
            found: desc.kind,
        });
    }
    Ok(desc)
}

fn is_base64_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'/' | b'=')
}

fn validate(desc: &SessionDescription) -> Result<(), CodecError> {
    if desc.sdp.trim_start().starts_with("v=") {
        Ok(())
    } else {
        Err(CodecError::MalformedSdp)
    }
}
