// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Functionality for generating SignedData payloads. */

use {
    crate::{
        algorithm::{DigestAlgorithm, SigningKey},
        asn1::{
            common::UtcTime,
            rfc5652::{
                Attribute, AttributeValue, CertificateChoices, CertificateSet, CmsVersion,
                DigestAlgorithmIdentifier, DigestAlgorithmIdentifiers, EncapsulatedContentInfo,
                IssuerAndSerialNumber, RevocationInfoChoice, RevocationInfoChoices,
                SignatureValue, SignedAttributes, SignedData, SignerIdentifier, SignerInfo,
                SignerInfos, OID_CONTENT_TYPE, OID_ID_DATA, OID_MESSAGE_DIGEST, OID_SIGNING_TIME,
            },
        },
        certificate::{Certificate, Crl},
        Error,
    },
    bcder::{
        encode::{PrimitiveContent, Values},
        Captured, Mode, OctetString, Oid,
    },
    bytes::Bytes,
    std::collections::HashMap,
};

/// Builder type to construct an entity that will sign some data.
///
/// Instances will be attached to `SignedDataBuilder` instances where they
/// will sign data using configured settings.
pub struct SignerBuilder<'a> {
    /// The cryptographic key pair used for signing content.
    signing_key: &'a SigningKey,

    /// X.509 certificate used for signing.
    signing_certificate: Certificate,

    /// Content digest algorithm to use.
    digest_algorithm: DigestAlgorithm,

    /// The content type of the value being signed.
    ///
    /// This is a mandatory field for signed attributes. The default value
    /// is `id-data`.
    content_type: Oid,

    /// Extra attributes to include in the SignedAttributes set.
    extra_signed_attributes: Vec<Attribute>,
}

impl<'a> SignerBuilder<'a> {
    /// Construct a new entity that will sign content.
    ///
    /// An entity is constructed from a signing key and certificate, which
    /// are mandatory.
    pub fn new(signing_key: &'a SigningKey, signing_certificate: Certificate) -> Self {
        Self {
            signing_key,
            signing_certificate,
            digest_algorithm: DigestAlgorithm::Sha256,
            content_type: Oid(Bytes::copy_from_slice(OID_ID_DATA.as_ref())),
            extra_signed_attributes: Vec::new(),
        }
    }

    /// Define the content digest algorithm.
    pub fn digest_algorithm(mut self, alg: DigestAlgorithm) -> Self {
        self.digest_algorithm = alg;
        self
    }

    /// Define the content type of the signed content.
    pub fn content_type(mut self, oid: Oid) -> Self {
        self.content_type = oid;
        self
    }

    /// Add an additional attribute to sign.
    pub fn signed_attribute(mut self, typ: Oid, values: Vec<AttributeValue>) -> Self {
        self.extra_signed_attributes.push(Attribute { typ, values });
        self
    }

    /// Add an additional OctetString signed attribute.
    ///
    /// This is a helper for converting a byte slice to an OctetString and
    /// AttributeValue without having to go through low-level ASN.1 code.
    pub fn signed_attribute_octet_string(self, typ: Oid, data: &[u8]) -> Self {
        self.signed_attribute(
            typ,
            vec![AttributeValue::new(Captured::from_values(
                Mode::Der,
                data.encode_ref(),
            ))],
        )
    }

    /// The certificate this signer asserts.
    pub fn certificate(&self) -> &Certificate {
        &self.signing_certificate
    }
}

/// Entity for incrementally deriving a SignedData payload.
///
/// With signers attached this produces a signature document (detached
/// when no encapsulated content is set); without signers it produces a
/// certs-only document carrying just certificates and CRLs.
#[derive(Default)]
pub struct SignedDataBuilder<'a> {
    /// Encapsulated content to sign.
    signed_content: Option<Vec<u8>>,

    /// Precomputed content digests for detached signing.
    ///
    /// Keyed by digest algorithm so multiple signers can share one pass
    /// over a content stream the builder never sees.
    content_digests: HashMap<DigestAlgorithm, Vec<u8>>,

    /// Entities who will generate signatures.
    signers: Vec<SignerBuilder<'a>>,

    /// X.509 certificates to add to the payload.
    certificates: Vec<Certificate>,

    /// CRLs to add to the payload.
    crls: Vec<Crl>,

    /// Whether to assert a signing-time signed attribute.
    ///
    /// One timestamp is taken per build so every signer in the document
    /// agrees, and either all signers carry the attribute or none do.
    omit_signing_time: bool,

    /// Whether to suppress embedding certificates.
    ///
    /// Recipients then must already hold the signer's certificate.
    omit_certificates: bool,
}

impl<'a> SignedDataBuilder<'a> {
    /// Define the content to sign.
    ///
    /// This content will be embedded in the generated payload.
    pub fn signed_content(mut self, data: Vec<u8>) -> Self {
        self.signed_content = Some(data);
        self
    }

    /// Record the digest of detached content for a digest algorithm.
    ///
    /// Callers stream the content themselves and hand over one digest per
    /// algorithm their signers use.
    pub fn content_digest(mut self, alg: DigestAlgorithm, digest: Vec<u8>) -> Self {
        self.content_digests.insert(alg, digest);
        self
    }

    /// Add a signer.
    ///
    /// The signer is the thing generating the cryptographic signature over
    /// data to be signed.
    pub fn signer(mut self, signer: SignerBuilder<'a>) -> Self {
        self.signers.push(signer);
        self
    }

    /// Add a certificate defined by our crate's Certificate type.
    pub fn certificate(mut self, cert: Certificate) -> Self {
        if !self
            .certificates
            .iter()
            .any(|x| x.raw_certificate() == cert.raw_certificate())
        {
            self.certificates.push(cert);
        }

        self
    }

    /// Add multiple certificates to the certificates chain.
    pub fn certificates(mut self, certs: impl Iterator<Item = Certificate>) -> Self {
        for cert in certs {
            self = self.certificate(cert);
        }

        self
    }

    /// Add a CRL to embed in the payload.
    pub fn crl(mut self, crl: Crl) -> Self {
        self.crls.push(crl);
        self
    }

    /// Do not assert a signing-time attribute on any signer.
    pub fn omit_signing_time(mut self) -> Self {
        self.omit_signing_time = true;
        self
    }

    /// Do not embed any certificates in the payload.
    pub fn omit_certificates(mut self) -> Self {
        self.omit_certificates = true;
        self
    }

    /// Construct a DER-encoded ASN.1 document containing a `SignedData` object.
    pub fn build_der(&self) -> Result<Vec<u8>, Error> {
        let mut signer_infos = SignerInfos::default();
        let mut digest_algorithms = DigestAlgorithmIdentifiers::default();
        let mut seen_certificates = self.certificates.clone();
        let signing_time = UtcTime::now();

        for signer in &self.signers {
            let digest_algorithm_id = DigestAlgorithmIdentifier::try_from(signer.digest_algorithm)?;

            if !digest_algorithms.contains(&digest_algorithm_id) {
                digest_algorithms.push(digest_algorithm_id.clone());
            }

            if !seen_certificates
                .iter()
                .any(|x| x.raw_certificate() == signer.signing_certificate.raw_certificate())
            {
                seen_certificates.push(signer.signing_certificate.clone());
            }

            let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber::from(
                &signer.signing_certificate,
            ));

            // The message digest is computed from the encapsulated content
            // or handed in precomputed for detached mode. The digest of
            // nothing is still a valid digest when only attributes are
            // signed.
            let message_digest = if let Some(content) = &self.signed_content {
                let mut hasher = signer.digest_algorithm.as_hasher()?;
                hasher.update(content);
                hasher.finish()
            } else if let Some(digest) = self.content_digests.get(&signer.digest_algorithm) {
                digest.clone()
            } else {
                let hasher = signer.digest_algorithm.as_hasher()?;
                hasher.finish()
            };

            let mut signed_attributes = SignedAttributes::default();

            // The content-type attribute is mandatory.
            signed_attributes.push(Attribute {
                typ: Oid(Bytes::copy_from_slice(OID_CONTENT_TYPE.as_ref())),
                values: vec![AttributeValue::new(Captured::from_values(
                    Mode::Der,
                    signer.content_type.encode_ref(),
                ))],
            });

            // The message-digest attribute is mandatory.
            signed_attributes.push(Attribute {
                typ: Oid(Bytes::copy_from_slice(OID_MESSAGE_DIGEST.as_ref())),
                values: vec![AttributeValue::new(Captured::from_values(
                    Mode::Der,
                    message_digest.as_slice().encode(),
                ))],
            });

            if !self.omit_signing_time {
                signed_attributes.push(Attribute {
                    typ: Oid(Bytes::copy_from_slice(OID_SIGNING_TIME.as_ref())),
                    values: vec![AttributeValue::new(Captured::from_values(
                        Mode::Der,
                        signing_time.clone().encode(),
                    ))],
                });
            }

            signed_attributes.extend(signer.extra_signed_attributes.iter().cloned());

            // DER SET OF ordering; the signature will not verify elsewhere
            // without it.
            signed_attributes.sort_by_type();

            let signature_algorithm = signer
                .signing_key
                .signature_algorithm(signer.digest_algorithm)?
                .into();

            let mut signer_info = SignerInfo {
                version: CmsVersion::V1,
                sid,
                digest_algorithm: digest_algorithm_id,
                signed_attributes: Some(signed_attributes),
                signature_algorithm,
                signature: SignatureValue::new(Bytes::new()),
                unsigned_attributes: None,
                signed_attributes_data: None,
            };

            // RFC 5652 §5.4: with signed attributes present, the signature
            // covers exactly the DER SET OF encoding of the attributes.
            let signature_input = signer_info
                .signed_attributes_digested_content()?
                .unwrap_or_default();

            signer_info.signature = SignatureValue::new(Bytes::from(
                signer
                    .signing_key
                    .sign(signer.digest_algorithm, &signature_input)?,
            ));

            signer_infos.push(signer_info);
        }

        let mut certificates = CertificateSet::default();
        if !self.omit_certificates {
            certificates.extend(seen_certificates.iter().map(|cert| {
                CertificateChoices::Certificate(Box::new(cert.raw_certificate().clone()))
            }));
        }

        let mut crls = RevocationInfoChoices::default();
        crls.extend(
            self.crls
                .iter()
                .map(|crl| RevocationInfoChoice::Crl(Box::new(crl.raw_certificate_list().clone()))),
        );

        let signed_data = SignedData {
            version: CmsVersion::V1,
            digest_algorithms,
            content_info: EncapsulatedContentInfo {
                content_type: Oid(Bytes::copy_from_slice(OID_ID_DATA.as_ref())),
                content: self
                    .signed_content
                    .as_ref()
                    .map(|content| OctetString::new(Bytes::copy_from_slice(content))),
            },
            certificates: if certificates.is_empty() {
                None
            } else {
                Some(certificates)
            },
            crls: if crls.is_empty() { None } else { Some(crls) },
            signer_infos,
        };

        let mut der = Vec::new();
        signed_data
            .encode_ref()
            .write_encoded(Mode::Der, &mut der)?;

        Ok(der)
    }
}

/// Build a certs-only SignedData document (`application/pkcs7-keys`).
pub fn build_certs_only_der(certificates: &[Certificate]) -> Result<Vec<u8>, Error> {
    if certificates.is_empty() {
        return Err(Error::Argument(
            "a certs-only document requires at least one certificate".into(),
        ));
    }

    let mut builder = SignedDataBuilder::default();

    for cert in certificates {
        builder = builder.certificate(cert.clone());
    }

    builder.build_der()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{signed_data, testutil},
    };

    #[test]
    fn simple_rsa_signature_round_trips() {
        let authority = testutil::authority();
        let (cert, key) = authority.issue_signer("Alice", "alice@example.com");

        let der = SignedDataBuilder::default()
            .signed_content(b"hello world".to_vec())
            .certificate(cert.clone())
            .signer(SignerBuilder::new(&key, cert))
            .build_der()
            .unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();
        assert_eq!(parsed.signed_content(), Some(b"hello world".as_ref()));
        assert_eq!(parsed.signers().count(), 1);

        for signer in parsed.signers() {
            let cert = signer.find_certificate(parsed.certificates()).unwrap();
            signer.verify_signature(&parsed, None, cert).unwrap();
            signer.verify_message_digest(&parsed, None).unwrap();
            assert!(signer.signing_time().is_some());
        }
    }

    #[test]
    fn detached_signature_verifies_with_external_content() {
        let authority = testutil::authority();
        let (cert, key) = authority.issue_signer("Alice", "alice@example.com");

        let content = b"some detached content\r\n";
        let mut hasher = DigestAlgorithm::Sha256.as_hasher().unwrap();
        hasher.update(content);

        let der = SignedDataBuilder::default()
            .content_digest(DigestAlgorithm::Sha256, hasher.finish())
            .certificate(cert.clone())
            .signer(SignerBuilder::new(&key, cert))
            .build_der()
            .unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();
        assert!(parsed.signed_content().is_none());

        for signer in parsed.signers() {
            let cert = signer.find_certificate(parsed.certificates()).unwrap();
            signer.verify_signature(&parsed, Some(content), cert).unwrap();
            signer.verify_message_digest(&parsed, Some(content)).unwrap();
        }
    }

    #[test]
    fn tampered_content_fails_digest_check() {
        let authority = testutil::authority();
        let (cert, key) = authority.issue_signer("Alice", "alice@example.com");

        let content = b"original";
        let mut hasher = DigestAlgorithm::Sha256.as_hasher().unwrap();
        hasher.update(content);

        let der = SignedDataBuilder::default()
            .content_digest(DigestAlgorithm::Sha256, hasher.finish())
            .certificate(cert.clone())
            .signer(SignerBuilder::new(&key, cert))
            .build_der()
            .unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();

        for signer in parsed.signers() {
            assert!(signer
                .verify_message_digest(&parsed, Some(b"tampered"))
                .is_err());
        }
    }

    #[test]
    fn omitted_signing_time_is_consistent() {
        let authority = testutil::authority();
        let (cert, key) = authority.issue_signer("Alice", "alice@example.com");

        let der = SignedDataBuilder::default()
            .signed_content(b"data".to_vec())
            .omit_signing_time()
            .signer(SignerBuilder::new(&key, cert))
            .build_der()
            .unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();

        for signer in parsed.signers() {
            assert!(signer.signing_time().is_none());
        }
    }

    #[test]
    fn certs_only_document() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        let der = build_certs_only_der(&[alice.clone(), authority.certificate().clone()]).unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();
        assert_eq!(parsed.signers().count(), 0);
        assert!(parsed.signed_content().is_none());
        assert_eq!(parsed.certificates().count(), 2);
    }

    #[test]
    fn certs_only_requires_certificates() {
        assert!(matches!(
            build_certs_only_der(&[]),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn embedded_crl_round_trips() {
        let authority = testutil::authority();
        let (cert, key) = authority.issue_signer("Alice", "alice@example.com");
        let crl = authority.revoke(&[&cert]);

        let der = SignedDataBuilder::default()
            .signed_content(b"data".to_vec())
            .certificate(cert.clone())
            .crl(crl)
            .signer(SignerBuilder::new(&key, cert.clone()))
            .build_der()
            .unwrap();

        let parsed = signed_data::SignedData::parse_ber(&der).unwrap();
        let crls = parsed.crls().collect::<Vec<_>>();
        assert_eq!(crls.len(), 1);
        assert!(crls[0].lookup(cert.serial_number()).is_some());
    }
}
