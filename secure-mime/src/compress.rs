// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CompressedData generation and expansion (RFC 3274, zlib).

Compression is the one pipeline stage with no cryptography in it, so it
streams: input is deflated through `flate2` as it is read, and only the
compressed image is ever held in memory before the DER framing is
written. Expansion likewise inflates straight into the output stream.
*/

use {
    crate::{
        asn1::{
            rfc3274::{CompressedData, OID_ID_COMPRESSED_DATA, OID_ZLIB_COMPRESSION},
            rfc5280::AlgorithmIdentifier,
            rfc5652::{CmsVersion, EncapsulatedContentInfo, OID_ID_DATA},
        },
        Error,
    },
    bcder::{encode::Values, Mode, OctetString, Oid},
    bytes::Bytes,
    flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression},
    std::io::{Read, Write},
};

/// Compress a content stream into a DER-encoded CompressedData document.
pub fn compress(mut content: impl Read, mut output: impl Write) -> Result<(), Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    std::io::copy(&mut content, &mut encoder)?;
    let compressed = encoder.finish()?;

    let compressed_data = CompressedData {
        version: CmsVersion::V0,
        compression_algorithm: AlgorithmIdentifier {
            algorithm: Oid(Bytes::copy_from_slice(OID_ZLIB_COMPRESSION.as_ref())),
            parameters: None,
        },
        content_info: EncapsulatedContentInfo {
            content_type: Oid(Bytes::copy_from_slice(OID_ID_DATA.as_ref())),
            content: Some(OctetString::new(Bytes::from(compressed))),
        },
    };

    compressed_data
        .encode_ref()
        .write_encoded(Mode::Der, &mut output)?;

    Ok(())
}

/// Expand a DER-encoded CompressedData document into the output stream.
pub fn decompress(mut input: impl Read, mut output: impl Write) -> Result<(), Error> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    let compressed_data = CompressedData::decode_ber(&data)?;

    if compressed_data.compression_algorithm.algorithm != OID_ZLIB_COMPRESSION {
        return Err(Error::NotSupported(format!(
            "compression algorithm {}",
            compressed_data.compression_algorithm.algorithm
        )));
    }

    let compressed = compressed_data
        .content_info
        .content
        .ok_or_else(|| Error::Cipher("CompressedData carries no content".into()))?
        .to_bytes();

    let mut decoder = ZlibDecoder::new(compressed.as_ref());
    std::io::copy(&mut decoder, &mut output)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small() {
        let content = b"The quick brown fox jumps over the lazy dog";

        let mut compressed = Vec::new();
        compress(content.as_ref(), &mut compressed).unwrap();

        let mut expanded = Vec::new();
        decompress(compressed.as_slice(), &mut expanded).unwrap();

        assert_eq!(expanded, content);
    }

    #[test]
    fn round_trip_one_mebibyte_of_noise() {
        // xorshift keeps the test deterministic.
        let mut state = 0x2545f4914f6cdd1du64;
        let content = (0..1024 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect::<Vec<_>>();

        let mut compressed = Vec::new();
        compress(content.as_slice(), &mut compressed).unwrap();

        // Incompressible input must not balloon: zlib overhead on random
        // octets stays within a fraction of a percent.
        assert!(compressed.len() < content.len() + content.len() / 8);

        let mut expanded = Vec::new();
        decompress(compressed.as_slice(), &mut expanded).unwrap();

        assert_eq!(expanded, content);
    }

    #[test]
    fn round_trip_highly_compressible() {
        let content = vec![b'a'; 512 * 1024];

        let mut compressed = Vec::new();
        compress(content.as_slice(), &mut compressed).unwrap();
        assert!(compressed.len() < content.len() / 100);

        let mut expanded = Vec::new();
        decompress(compressed.as_slice(), &mut expanded).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let mut out = Vec::new();
        assert!(decompress(&b"not asn.1"[..], &mut out).is_err());
    }

    #[test]
    fn inner_content_type_is_id_data() {
        let mut compressed = Vec::new();
        compress(&b"x"[..], &mut compressed).unwrap();

        let parsed = CompressedData::decode_ber(&compressed).unwrap();
        assert_eq!(
            parsed.content_info.content_type.as_ref(),
            OID_ID_DATA.as_ref()
        );
    }
}
