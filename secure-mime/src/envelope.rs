// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generation and opening of EnvelopedData payloads.

Key management is RSA key transport (RSAES-PKCS1-v1_5): a fresh content
encryption key is generated per message and wrapped under each
recipient's public key. ring deliberately implements no RSA encryption,
so the `rsa` crate carries the key transport while ring supplies the
randomness for session keys.
*/

use {
    crate::{
        algorithm::{ContentEncryptionAlgorithm, OID_RSA},
        asn1::{
            rfc5280::{AlgorithmIdentifier, AlgorithmParameter},
            rfc5652::{
                CmsVersion, EncryptedContentInfo, EnvelopedData, IssuerAndSerialNumber,
                KeyTransRecipientInfo, RecipientIdentifier, RecipientInfo, RecipientInfos,
                OID_ID_DATA,
            },
        },
        certificate::{Certificate, CertificateKeyAlgorithm},
        store::SubjectIdentifierType,
        Error,
    },
    bcder::{
        encode::{PrimitiveContent, Values},
        Mode, OctetString, Oid,
    },
    bytes::Bytes,
    ring::rand::SecureRandom,
    rsa::{pkcs1::DecodeRsaPublicKey, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey},
};

/// One intended recipient of an EnvelopedData payload.
pub struct EnvelopeRecipient {
    pub certificate: Certificate,
    pub identifier_type: SubjectIdentifierType,
}

/// Entity for deriving an EnvelopedData payload.
pub struct EnvelopedDataBuilder {
    recipients: Vec<EnvelopeRecipient>,
    algorithm: ContentEncryptionAlgorithm,
}

impl Default for EnvelopedDataBuilder {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            // Hard-wired: no negotiation from recipient SMIMECapabilities
            // happens anywhere in this crate.
            algorithm: ContentEncryptionAlgorithm::TripleDesCbc,
        }
    }
}

impl EnvelopedDataBuilder {
    /// Add a recipient whose public key will wrap the session key.
    pub fn recipient(
        mut self,
        certificate: Certificate,
        identifier_type: SubjectIdentifierType,
    ) -> Self {
        self.recipients.push(EnvelopeRecipient {
            certificate,
            identifier_type,
        });
        self
    }

    /// Override the content encryption algorithm.
    pub fn content_encryption_algorithm(mut self, alg: ContentEncryptionAlgorithm) -> Self {
        self.algorithm = alg;
        self
    }

    /// Encrypt `content` to every configured recipient, producing a
    /// DER-encoded EnvelopedData document.
    pub fn build_der(&self, content: &[u8]) -> Result<Vec<u8>, Error> {
        if self.recipients.is_empty() {
            return Err(Error::Argument(
                "an enveloped document requires at least one recipient".into(),
            ));
        }

        let rng = ring::rand::SystemRandom::new();

        let mut cek = vec![0u8; self.algorithm.key_len()];
        rng.fill(&mut cek)
            .map_err(|_| Error::Cipher("session key generation failed".into()))?;

        let mut iv = vec![0u8; self.algorithm.iv_len()];
        rng.fill(&mut iv)
            .map_err(|_| Error::Cipher("IV generation failed".into()))?;

        let encrypted_content = self.algorithm.encrypt(&cek, &iv, content)?;

        let mut recipient_infos = RecipientInfos::default();
        let mut any_ski = false;

        for recipient in &self.recipients {
            let (rid, version) = match recipient.identifier_type {
                SubjectIdentifierType::IssuerAndSerialNumber => (
                    RecipientIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber::from(
                        &recipient.certificate,
                    )),
                    CmsVersion::V0,
                ),
                SubjectIdentifierType::SubjectKeyIdentifier => {
                    let ski = recipient.certificate.subject_key_identifier().ok_or_else(|| {
                        Error::Argument(format!(
                            "recipient {:?} has no subject key identifier extension",
                            recipient.certificate.subject_common_name()
                        ))
                    })?;

                    any_ski = true;

                    (
                        RecipientIdentifier::SubjectKeyIdentifier(OctetString::new(Bytes::from(
                            ski,
                        ))),
                        CmsVersion::V2,
                    )
                }
            };

            let encrypted_key = wrap_cek(&recipient.certificate, &cek)?;

            recipient_infos.push(RecipientInfo::KeyTransRecipientInfo(KeyTransRecipientInfo {
                version,
                rid,
                key_encryption_algorithm: rsa_key_encryption_algorithm(),
                encrypted_key: OctetString::new(Bytes::from(encrypted_key)),
            }));
        }

        let enveloped = EnvelopedData {
            version: if any_ski { CmsVersion::V2 } else { CmsVersion::V0 },
            originator_info: None,
            recipient_infos,
            encrypted_content_info: EncryptedContentInfo {
                content_type: Oid(Bytes::copy_from_slice(OID_ID_DATA.as_ref())),
                content_encryption_algorithm: self.algorithm.algorithm_identifier(&iv),
                encrypted_content: Some(OctetString::new(Bytes::from(encrypted_content))),
            },
            unprotected_attributes: None,
        };

        let mut der = Vec::new();
        enveloped.encode_ref().write_encoded(Mode::Der, &mut der)?;

        Ok(der)
    }
}

/// The rsaEncryption key-encryption identifier with its NULL parameter.
fn rsa_key_encryption_algorithm() -> AlgorithmIdentifier {
    AlgorithmIdentifier {
        algorithm: Oid(Bytes::copy_from_slice(OID_RSA.as_ref())),
        parameters: Some(AlgorithmParameter::from_values(().encode())),
    }
}

/// Wrap a content encryption key under a recipient certificate's RSA key.
fn wrap_cek(certificate: &Certificate, cek: &[u8]) -> Result<Vec<u8>, Error> {
    if certificate.public_key().algorithm != CertificateKeyAlgorithm::Rsa {
        return Err(Error::NotSupported(
            "key transport requires an RSA recipient key".into(),
        ));
    }

    let public_key = RsaPublicKey::from_pkcs1_der(&certificate.public_key().key)
        .map_err(|e| Error::KeyTransport(e.to_string()))?;

    public_key
        .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, cek)
        .map_err(|e| Error::KeyTransport(e.to_string()))
}

/// Unwrap the content encryption key from a KeyTrans recipient info.
pub fn unwrap_cek(ktri: &KeyTransRecipientInfo, key: &RsaPrivateKey) -> Result<Vec<u8>, Error> {
    if ktri.key_encryption_algorithm.algorithm != OID_RSA {
        return Err(Error::NotSupported(format!(
            "unsupported key encryption algorithm: {}",
            ktri.key_encryption_algorithm.algorithm
        )));
    }

    key.decrypt(Pkcs1v15Encrypt, &ktri.encrypted_key.to_bytes())
        .map_err(|e| Error::KeyTransport(e.to_string()))
}

/// Decrypt the content of an EnvelopedData with an unwrapped session key.
pub fn decrypt_content(enveloped: &EnvelopedData, cek: &[u8]) -> Result<Vec<u8>, Error> {
    let info = &enveloped.encrypted_content_info;

    let (algorithm, iv) =
        ContentEncryptionAlgorithm::from_algorithm_identifier(&info.content_encryption_algorithm)?;

    let ciphertext = info
        .encrypted_content
        .as_ref()
        .ok_or_else(|| Error::Cipher("EnvelopedData carries no encrypted content".into()))?
        .to_bytes();

    algorithm.decrypt(cek, &iv, &ciphertext)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil};

    fn round_trip(identifier_type: SubjectIdentifierType) {
        let authority = testutil::authority();
        let cert = authority.issue_leaf("Bob", "bob@example.com");
        let key = testutil::rsa_private_key();

        let der = EnvelopedDataBuilder::default()
            .recipient(cert.clone(), identifier_type)
            .build_der(b"secret")
            .unwrap();

        let enveloped = EnvelopedData::decode_ber(&der).unwrap();
        assert_eq!(enveloped.recipient_infos.len(), 1);

        let ktri = match &enveloped.recipient_infos[0] {
            RecipientInfo::KeyTransRecipientInfo(ktri) => ktri,
            other => panic!("unexpected recipient info: {:?}", other),
        };

        let cek = unwrap_cek(ktri, &key).unwrap();
        let plaintext = decrypt_content(&enveloped, &cek).unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn issuer_serial_round_trip() {
        round_trip(SubjectIdentifierType::IssuerAndSerialNumber);
    }

    #[test]
    fn subject_key_identifier_round_trip() {
        round_trip(SubjectIdentifierType::SubjectKeyIdentifier);
    }

    #[test]
    fn zero_recipients_is_an_argument_error() {
        assert!(matches!(
            EnvelopedDataBuilder::default().build_der(b"data"),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn wrong_key_fails_to_unwrap() {
        let authority = testutil::authority();
        let cert = authority.issue_leaf("Bob", "bob@example.com");

        let der = EnvelopedDataBuilder::default()
            .recipient(cert, SubjectIdentifierType::IssuerAndSerialNumber)
            .build_der(b"secret")
            .unwrap();

        let enveloped = EnvelopedData::decode_ber(&der).unwrap();
        let ktri = match &enveloped.recipient_infos[0] {
            RecipientInfo::KeyTransRecipientInfo(ktri) => ktri,
            other => panic!("unexpected recipient info: {:?}", other),
        };

        let wrong_key = testutil::other_rsa_private_key();
        assert!(unwrap_cek(ktri, &wrong_key).is_err());
    }
}
