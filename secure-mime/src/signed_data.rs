// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! High-level interface over parsed CMS SignedData payloads. */

use {
    crate::{
        algorithm::{DigestAlgorithm, SignatureAlgorithm},
        certificate::{Certificate, CertificateSelector, Crl},
        asn1::rfc5652::{
            self, RevocationInfoChoice, SignerIdentifier, OID_CONTENT_TYPE, OID_MESSAGE_DIGEST,
            OID_SIGNING_TIME,
        },
        asn1::common::Time,
        Error,
    },
    bcder::{Integer, OctetString, Oid},
    ring::signature::UnparsedPublicKey,
    std::{convert::TryFrom, ops::Deref},
};

/// Represents a parsed CMS SignedData structure.
///
/// This is the high-level type representing a CMS signature of some data.
/// It contains a description of what was signed, the cryptographic
/// signatures over it, and the certificates and CRLs the sender chose to
/// embed.
#[derive(Clone, Debug)]
pub struct SignedData {
    /// Content that was signed, when carried inline (encapsulated mode).
    signed_content: Option<Vec<u8>>,

    /// Certificates embedded within the data structure.
    certificates: Vec<Certificate>,

    /// CRLs embedded within the data structure.
    crls: Vec<Crl>,

    /// Describes content signatures.
    signers: Vec<SignerInfo>,
}

impl SignedData {
    /// Construct an instance by parsing BER data.
    ///
    /// The entire input is consumed before any collection is materialized:
    /// certificates and CRLs trail the encapsulated content in the ASN.1
    /// SEQUENCE, so they are only complete once the parse has drained it.
    pub fn parse_ber(data: &[u8]) -> Result<Self, Error> {
        Self::try_from(&rfc5652::SignedData::decode_ber(data)?)
    }

    /// Obtain encapsulated content that was signed.
    ///
    /// This is the defined `encapContentInfo eContent` value. Absent for
    /// detached signatures.
    pub fn signed_content(&self) -> Option<&[u8]> {
        self.signed_content.as_deref()
    }

    /// Certificates the sender embedded in the payload.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// CRLs the sender embedded in the payload.
    pub fn crls(&self) -> impl Iterator<Item = &Crl> {
        self.crls.iter()
    }

    /// Obtain signing information attached to this instance.
    ///
    /// Each iterated value represents an entity that cryptographically
    /// signed the content.
    pub fn signers(&self) -> impl Iterator<Item = &SignerInfo> {
        self.signers.iter()
    }
}

impl TryFrom<&rfc5652::SignedData> for SignedData {
    type Error = Error;

    fn try_from(raw: &rfc5652::SignedData) -> Result<Self, Self::Error> {
        let signed_content = raw
            .content_info
            .content
            .as_ref()
            .map(|content| content.to_bytes().to_vec());

        let certificates = match &raw.certificates {
            Some(certs) => certs
                .iter()
                .filter_map(|choice| Certificate::try_from(choice).ok())
                .collect(),
            None => Vec::new(),
        };

        let crls = match &raw.crls {
            Some(crls) => crls
                .iter()
                .filter_map(|choice| match choice {
                    RevocationInfoChoice::Crl(crl) => {
                        Crl::from_parsed_asn1((**crl).clone()).ok()
                    }
                    RevocationInfoChoice::Other => None,
                })
                .collect(),
            None => Vec::new(),
        };

        let signers = raw
            .signer_infos
            .iter()
            .map(SignerInfo::try_from)
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self {
            signed_content,
            certificates,
            crls,
            signers,
        })
    }
}

/// How a signer identified its certificate.
#[derive(Clone, Debug)]
pub enum SignerId {
    /// Issuer distinguished name plus certificate serial number.
    IssuerAndSerialNumber(crate::asn1::rfc3280::Name, Integer),

    /// Subject key identifier extension value.
    SubjectKeyIdentifier(Vec<u8>),
}

impl SignerId {
    /// A selector locating the signer's certificate.
    pub fn selector(&self) -> CertificateSelector {
        match self {
            Self::IssuerAndSerialNumber(issuer, serial) => {
                CertificateSelector::ByIssuerSerial(issuer.clone(), serial.clone())
            }
            Self::SubjectKeyIdentifier(ski) => CertificateSelector::BySki(ski.clone()),
        }
    }
}

/// Represents a parsed CMS SignerInfo structure.
///
/// Instances are logically equivalent to a single signed assertion
/// within a `SignedData` payload. There can be multiple signers per
/// `SignedData`, which is why this type exists on its own.
#[derive(Clone, Debug)]
pub struct SignerInfo {
    /// How the signing certificate is identified.
    signer_id: SignerId,

    /// The algorithm used for digesting signed content.
    digest_algorithm: DigestAlgorithm,

    /// Algorithm used for signing the digest.
    signature_algorithm: SignatureAlgorithm,

    /// The cryptographic signature.
    signature: Vec<u8>,

    /// Parsed signed attributes.
    signed_attributes: Option<SignedAttributes>,

    /// DER SET OF rendering of the signed attributes, the actual
    /// signature input when attributes are present.
    digested_signed_attributes_data: Option<Vec<u8>>,
}

impl SignerInfo {
    /// How the signer identified its certificate.
    pub fn signer_id(&self) -> &SignerId {
        &self.signer_id
    }

    /// Obtain the message digest algorithm used by this signer.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    /// Obtain the cryptographic signing algorithm used by this signer.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Obtain the raw bytes constituting the cryptographic signature.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Obtain the `SignedAttributes` attached to this instance.
    pub fn signed_attributes(&self) -> Option<&SignedAttributes> {
        self.signed_attributes.as_ref()
    }

    /// The signing time asserted by the signer, when present.
    pub fn signing_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.signed_attributes
            .as_ref()
            .and_then(|attrs| attrs.signing_time)
    }

    /// The octets the signature was computed over.
    ///
    /// Per RFC 5652 §5.4 this is the DER SET OF encoding of the signed
    /// attributes when they are present, and the encapsulated (or
    /// externally supplied, for detached signatures) content otherwise.
    pub fn signature_input(
        &self,
        signed_data: &SignedData,
        external_content: Option<&[u8]>,
    ) -> Vec<u8> {
        if let Some(attrs_data) = &self.digested_signed_attributes_data {
            attrs_data.clone()
        } else {
            signed_data
                .signed_content()
                .or(external_content)
                .unwrap_or_default()
                .to_vec()
        }
    }

    /// Verify the cryptographic signature of this signer.
    ///
    /// `external_content` supplies the signed octets for detached
    /// signatures. This checks signature integrity only; certificate
    /// trust is the path builder's business.
    pub fn verify_signature(
        &self,
        signed_data: &SignedData,
        external_content: Option<&[u8]>,
        certificate: &Certificate,
    ) -> Result<(), Error> {
        let algorithm = self
            .signature_algorithm
            .as_verification_algorithm(self.digest_algorithm)?;

        let key = UnparsedPublicKey::new(algorithm, certificate.public_key().key.clone());

        key.verify(
            &self.signature_input(signed_data, external_content),
            &self.signature,
        )
        .map_err(|_| Error::SignatureVerification)
    }

    /// Verify the message-digest signed attribute against the content.
    ///
    /// Meaningless without signed attributes, in which case the signature
    /// itself already covers the content and this returns successfully.
    pub fn verify_message_digest(
        &self,
        signed_data: &SignedData,
        external_content: Option<&[u8]>,
    ) -> Result<(), Error> {
        let attrs = match &self.signed_attributes {
            Some(attrs) => attrs,
            None => return Ok(()),
        };

        let content = signed_data
            .signed_content()
            .or(external_content)
            .unwrap_or_default();

        let mut hasher = self.digest_algorithm.as_hasher()?;
        hasher.update(content);

        if hasher.finish() == attrs.message_digest {
            Ok(())
        } else {
            Err(Error::DigestNotEqual)
        }
    }

    /// Locate this signer's certificate among candidates.
    pub fn find_certificate<'a>(
        &self,
        mut candidates: impl Iterator<Item = &'a Certificate>,
    ) -> Option<&'a Certificate> {
        let selector = self.signer_id.selector();

        candidates.find(|cert| selector.matches(cert))
    }
}

impl TryFrom<&rfc5652::SignerInfo> for SignerInfo {
    type Error = Error;

    fn try_from(signer_info: &rfc5652::SignerInfo) -> Result<Self, Self::Error> {
        let signer_id = match &signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(issuer) => SignerId::IssuerAndSerialNumber(
                issuer.issuer.clone(),
                issuer.serial_number.clone(),
            ),
            SignerIdentifier::SubjectKeyIdentifier(ski) => {
                SignerId::SubjectKeyIdentifier(ski.to_bytes().to_vec())
            }
        };

        let digest_algorithm = DigestAlgorithm::try_from(&signer_info.digest_algorithm)?;
        let signature_algorithm = SignatureAlgorithm::try_from(&signer_info.signature_algorithm)?;
        let signature = signer_info.signature.to_bytes().to_vec();

        let signed_attributes = signer_info
            .signed_attributes
            .as_ref()
            .map(|attributes| SignedAttributes::try_from(attributes))
            .transpose()?;

        let digested_signed_attributes_data =
            signer_info.signed_attributes_digested_content()?;

        Ok(SignerInfo {
            signer_id,
            digest_algorithm,
            signature_algorithm,
            signature,
            signed_attributes,
            digested_signed_attributes_data,
        })
    }
}

/// Represents the contents of a CMS SignedAttributes structure.
///
/// This is a high-level interface to the SignedAttributes ASN.1 type.
#[derive(Clone, Debug)]
pub struct SignedAttributes {
    /// The content type of the value being signed.
    ///
    /// This is often `OID_ID_DATA`.
    content_type: Oid,

    /// Holds the digest of the content that was signed.
    message_digest: Vec<u8>,

    /// The time the signature was created.
    signing_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl SignedAttributes {
    pub fn content_type(&self) -> &Oid {
        &self.content_type
    }

    pub fn message_digest(&self) -> &[u8] {
        &self.message_digest
    }

    pub fn signing_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.signing_time
    }
}

impl TryFrom<&rfc5652::SignedAttributes> for SignedAttributes {
    type Error = Error;

    fn try_from(attributes: &rfc5652::SignedAttributes) -> Result<Self, Self::Error> {
        // Content type attribute MUST be present with exactly one value.
        let content_type = attributes
            .iter()
            .find(|attr| attr.typ == OID_CONTENT_TYPE)
            .ok_or(Error::MissingSignedAttributeContentType)?;

        if content_type.values.len() != 1 {
            return Err(Error::MalformedSignedAttributeContentType);
        }

        let content_type = bcder::decode::Constructed::decode(
            content_type.values[0].deref().as_slice(),
            bcder::Mode::Der,
            |cons| Oid::take_from(cons),
        )
        .map_err(|_| Error::MalformedSignedAttributeContentType)?;

        // Message digest attribute MUST be present with exactly one value.
        let message_digest = attributes
            .iter()
            .find(|attr| attr.typ == OID_MESSAGE_DIGEST)
            .ok_or(Error::MissingSignedAttributeMessageDigest)?;

        if message_digest.values.len() != 1 {
            return Err(Error::MalformedSignedAttributeMessageDigest);
        }

        let message_digest = bcder::decode::Constructed::decode(
            message_digest.values[0].deref().as_slice(),
            bcder::Mode::Der,
            |cons| OctetString::take_from(cons),
        )
        .map_err(|_| Error::MalformedSignedAttributeMessageDigest)?
        .to_bytes()
        .to_vec();

        // Signing time is optional, but common (DER UTCTime until 2050).
        let signing_time = attributes
            .iter()
            .find(|attr| attr.typ == OID_SIGNING_TIME)
            .map(|attr| {
                if attr.values.len() != 1 {
                    Err(Error::MalformedSignedAttributeSigningTime)
                } else {
                    let time = bcder::decode::Constructed::decode(
                        attr.values[0].deref().as_slice(),
                        bcder::Mode::Der,
                        |cons| Time::take_from(cons),
                    )
                    .map_err(|_| Error::MalformedSignedAttributeSigningTime)?;

                    Ok(chrono::DateTime::from(time))
                }
            })
            .transpose()?;

        Ok(SignedAttributes {
            content_type,
            message_digest,
            signing_time,
        })
    }
}
