// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! ASN.1 data structures defined by RFC 3274: compressed CMS content. */

use {
    crate::asn1::{
        rfc5280::AlgorithmIdentifier,
        rfc5652::{CmsVersion, EncapsulatedContentInfo},
    },
    bcder::{
        decode::{Constructed, Malformed, Source},
        encode,
        encode::{PrimitiveContent, Values},
        ConstOid, Oid, Tag,
    },
};

/// The compressed-data content type.
///
/// `id-ct-compressedData` in the specification.
///
/// 1.2.840.113549.1.9.16.1.9
pub const OID_ID_COMPRESSED_DATA: ConstOid =
    Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 1, 9]);

/// The zlib compression algorithm.
///
/// `id-alg-zlibCompress` in the specification.
///
/// 1.2.840.113549.1.9.16.3.8
pub const OID_ZLIB_COMPRESSION: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 3, 8]);

/// Compressed-data content type.
///
/// ```ASN.1
/// CompressedData ::= SEQUENCE {
///   version CMSVersion,   -- Always set to 0
///   compressionAlgorithm CompressionAlgorithmIdentifier,
///   encapContentInfo EncapsulatedContentInfo }
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompressedData {
    pub version: CmsVersion,
    pub compression_algorithm: CompressionAlgorithmIdentifier,
    pub content_info: EncapsulatedContentInfo,
}

impl CompressedData {
    /// Attempt to decode BER encoded bytes to a parsed data structure.
    pub fn decode_ber(data: &[u8]) -> Result<Self, bcder::decode::Error> {
        Constructed::decode(data, bcder::Mode::Ber, |cons| Self::decode(cons))
    }

    pub fn decode<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let oid = Oid::take_from(cons)?;

            if oid != OID_ID_COMPRESSED_DATA {
                return Err(Malformed.into());
            }

            cons.take_constructed_if(Tag::CTX_0, Self::take_from)
        })
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let version = CmsVersion::take_from(cons)?;
            let compression_algorithm = CompressionAlgorithmIdentifier::take_from(cons)?;
            let content_info = EncapsulatedContentInfo::take_from(cons)?;

            Ok(Self {
                version,
                compression_algorithm,
                content_info,
            })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            OID_ID_COMPRESSED_DATA.encode_ref(),
            encode::sequence_as(
                Tag::CTX_0,
                encode::sequence((
                    self.version.encode(),
                    self.compression_algorithm.encode_ref(),
                    self.content_info.encode_ref(),
                )),
            ),
        ))
    }
}

pub type CompressionAlgorithmIdentifier = AlgorithmIdentifier;
