// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The S/MIME context: the operations the MIME layer calls.

[SecureMimeContext] glues the pipeline to a [CertificateStore]. It
validates arguments up front, resolves mailboxes to certificates and
keys, runs the CMS generators and parsers, and orchestrates path
building during verification. All content crosses this boundary as
octet streams; the accompanying [SecureMimeType] tells the MIME wrapper
which `smime-type` parameter the produced part gets.
*/

use {
    crate::{
        algorithm::DigestAlgorithm,
        asn1::rfc5652::{EnvelopedData, RecipientIdentifier, RecipientInfo},
        certificate::{Certificate, CertificateSelector},
        compress, envelope,
        envelope::EnvelopedDataBuilder,
        mailbox::Mailbox,
        path::{CertificatePath, PathBuildError, PathBuilder},
        signed_data::{SignedData, SignerInfo},
        signing::{build_certs_only_der, SignedDataBuilder, SignerBuilder},
        store::{CertificateStore, CmsRecipient, CmsSigner},
        Error,
    },
    log::{debug, warn},
    std::io::{Read, Write},
};

/// The protocol parameter value for detached signature parts.
pub const SIGNATURE_PROTOCOL: &str = "application/pkcs7-signature";

/// The protocol parameter value for enveloped parts.
pub const ENCRYPTION_PROTOCOL: &str = "application/pkcs7-mime";

/// The protocol parameter value for certs-only key exchange parts.
pub const KEY_EXCHANGE_PROTOCOL: &str = "application/pkcs7-keys";

/// What kind of CMS object an operation produced.
///
/// The MIME wrapper derives the `smime-type` parameter of
/// `application/pkcs7-mime` parts from this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecureMimeType {
    Data,
    SignedData,
    EnvelopedData,
    CompressedData,
    CertsOnly,
}

impl SecureMimeType {
    /// The `smime-type` parameter value, where one is defined.
    pub fn smime_type(&self) -> Option<&'static str> {
        match self {
            Self::Data => None,
            Self::SignedData => Some("signed-data"),
            Self::EnvelopedData => Some("enveloped-data"),
            Self::CompressedData => Some("compressed-data"),
            Self::CertsOnly => Some("certs-only"),
        }
    }
}

/// The outcome of examining one signer of a verified document.
///
/// Exactly one of [Self::chain] and [Self::chain_error] is populated on
/// a fully processed signature; integrity problems with the signature
/// bytes themselves are reported separately so a broken signature from
/// a trusted signer and a good signature from an untrusted one remain
/// distinguishable.
#[derive(Debug)]
pub struct DigitalSignature {
    signer_info: SignerInfo,
    creation_date: Option<chrono::DateTime<chrono::Utc>>,
    signer_certificate: Option<Certificate>,
    chain: Option<CertificatePath>,
    chain_error: Option<PathBuildError>,
    verification_error: Option<String>,
}

impl DigitalSignature {
    /// The parsed signer info this record describes.
    pub fn signer_info(&self) -> &SignerInfo {
        &self.signer_info
    }

    /// The signing time asserted by the signer, if any.
    pub fn creation_date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.creation_date
    }

    /// The signer's certificate, when it could be located.
    pub fn signer_certificate(&self) -> Option<&Certificate> {
        self.signer_certificate.as_ref()
    }

    /// The validated certification path, when one was built.
    pub fn chain(&self) -> Option<&CertificatePath> {
        self.chain.as_ref()
    }

    /// Why no certification path exists, when none was built.
    pub fn chain_error(&self) -> Option<&PathBuildError> {
        self.chain_error.as_ref()
    }

    /// An integrity failure of the signature or message digest, if any.
    pub fn verification_error(&self) -> Option<&str> {
        self.verification_error.as_deref()
    }

    /// Whether the signature checks out and chains to a trusted anchor.
    pub fn is_valid(&self) -> bool {
        self.verification_error.is_none() && self.chain.is_some()
    }
}

/// The complete result of a verification. Never partial: one entry per
/// signer info in the document, whatever their individual outcomes.
pub type DigitalSignatureCollection = Vec<DigitalSignature>;

/// An S/MIME cryptography context over a certificate store.
///
/// A context is cheap to construct and holds no open resources between
/// operations; the store opens its backing material per call. A single
/// instance must not be used concurrently from multiple threads during
/// import or decrypt, because the store takes its writer lock.
pub struct SecureMimeContext {
    store: CertificateStore,
}

impl SecureMimeContext {
    pub fn new(store: CertificateStore) -> Self {
        Self { store }
    }

    /// The backing certificate store.
    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Whether a MIME protocol parameter denotes something this context
    /// can process. The `x-` subtype prefix is tolerated.
    pub fn supports(&self, protocol: &str) -> bool {
        let mut parts = protocol.trim().splitn(2, '/');

        let typ = match parts.next() {
            Some(typ) => typ,
            None => return false,
        };

        if !typ.eq_ignore_ascii_case("application") {
            return false;
        }

        let subtype = match parts.next() {
            Some(subtype) => subtype.to_ascii_lowercase(),
            None => return false,
        };
        let subtype = subtype.strip_prefix("x-").unwrap_or(&subtype);

        matches!(subtype, "pkcs7-signature" | "pkcs7-mime" | "pkcs7-keys")
    }

    /// Produce a detached signature over a content stream.
    ///
    /// The content is digested as it is read and never buffered whole.
    pub fn sign(
        &self,
        signer: &Mailbox,
        digest_algorithm: DigestAlgorithm,
        content: impl Read,
        output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        let signer = self.store.get_cms_signer(signer, digest_algorithm)?;

        self.sign_with(&signer, content, output)
    }

    /// Produce a detached signature with explicitly supplied material.
    pub fn sign_with(
        &self,
        signer: &CmsSigner,
        mut content: impl Read,
        mut output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        // An unusable digest algorithm must fail before any output.
        signer.digest_algorithm.digest_oid()?;

        let mut hasher = signer.digest_algorithm.as_hasher()?;
        let mut buffer = [0u8; 8192];

        loop {
            let n = content.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let signing_key = signer.private_key.signing_key()?;

        let der = SignedDataBuilder::default()
            .content_digest(signer.digest_algorithm, hasher.finish())
            .certificate(signer.certificate.clone())
            .signer(
                SignerBuilder::new(&signing_key, signer.certificate.clone())
                    .digest_algorithm(signer.digest_algorithm),
            )
            .build_der()?;

        output.write_all(&der)?;

        Ok(SecureMimeType::SignedData)
    }

    /// Produce a SignedData with the content encapsulated inside.
    pub fn encapsulated_sign(
        &self,
        signer: &Mailbox,
        digest_algorithm: DigestAlgorithm,
        content: impl Read,
        output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        let signer = self.store.get_cms_signer(signer, digest_algorithm)?;

        self.encapsulated_sign_with(&signer, content, output)
    }

    /// Encapsulated signing with explicitly supplied material.
    pub fn encapsulated_sign_with(
        &self,
        signer: &CmsSigner,
        mut content: impl Read,
        mut output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        signer.digest_algorithm.digest_oid()?;

        let mut data = Vec::new();
        content.read_to_end(&mut data)?;

        let signing_key = signer.private_key.signing_key()?;

        let der = SignedDataBuilder::default()
            .signed_content(data)
            .certificate(signer.certificate.clone())
            .signer(
                SignerBuilder::new(&signing_key, signer.certificate.clone())
                    .digest_algorithm(signer.digest_algorithm),
            )
            .build_der()?;

        output.write_all(&der)?;

        Ok(SecureMimeType::SignedData)
    }

    /// Verify a detached signature over externally supplied content.
    pub fn verify_detached(
        &self,
        mut content: impl Read,
        mut signature: impl Read,
    ) -> Result<DigitalSignatureCollection, Error> {
        let mut content_data = Vec::new();
        content.read_to_end(&mut content_data)?;

        let mut signature_data = Vec::new();
        signature.read_to_end(&mut signature_data)?;

        let signed_data = SignedData::parse_ber(&signature_data)?;

        self.verify_signed_data(&signed_data, Some(&content_data))
    }

    /// Verify an encapsulated SignedData, extracting its content.
    ///
    /// The returned octets are the signed entity; feeding them to the
    /// MIME loader is the caller's job.
    pub fn verify(
        &self,
        mut signed: impl Read,
    ) -> Result<(Vec<u8>, DigitalSignatureCollection), Error> {
        let mut data = Vec::new();
        signed.read_to_end(&mut data)?;

        let signed_data = SignedData::parse_ber(&data)?;

        let content = signed_data
            .signed_content()
            .ok_or_else(|| {
                Error::Argument("SignedData carries no encapsulated content".into())
            })?
            .to_vec();

        let signatures = self.verify_signed_data(&signed_data, None)?;

        Ok((content, signatures))
    }

    /// Walk every signer info of a parsed document and produce the
    /// signature collection.
    ///
    /// Embedded certificates and CRLs are mirrored into the store before
    /// any signature record exists, so first contact with a
    /// correspondent populates the address book even when verification
    /// later fails. Per-signature problems land in the records; only
    /// infrastructure failures abort the call.
    fn verify_signed_data(
        &self,
        signed_data: &SignedData,
        external_content: Option<&[u8]>,
    ) -> Result<DigitalSignatureCollection, Error> {
        for cert in signed_data.certificates() {
            if let Err(e) = self.store.import_certificate(cert) {
                warn!("could not learn embedded certificate: {e}");
            }
        }

        for crl in signed_data.crls() {
            if let Err(e) = self.store.import_crl(crl) {
                warn!("could not learn embedded CRL: {e}");
            }
        }

        let anchors = self.store.get_trusted_anchors()?;

        let path_builder = PathBuilder::new(anchors)
            .intermediates(
                self.store
                    .get_intermediates()?
                    .into_iter()
                    .chain(signed_data.certificates().cloned()),
            )
            .local_crls(self.store.get_crls()?)
            .embedded_crls(signed_data.crls().cloned());

        let mut signatures = Vec::new();

        for signer in signed_data.signers() {
            let creation_date = signer.signing_time();

            // Embedded certificates first; the local store is the
            // fallback so self-describing mail verifies against an empty
            // address book.
            let certificate = signer
                .find_certificate(signed_data.certificates())
                .cloned()
                .or_else(|| {
                    self.store
                        .get_certificate(&signer.signer_id().selector())
                        .ok()
                        .flatten()
                });

            let record = match certificate {
                None => DigitalSignature {
                    signer_info: signer.clone(),
                    creation_date,
                    signer_certificate: None,
                    chain: None,
                    chain_error: Some(PathBuildError::SignerCertificateNotFound),
                    verification_error: None,
                },
                Some(certificate) => {
                    let verification_error = signer
                        .verify_signature(signed_data, external_content, &certificate)
                        .err()
                        .or_else(|| {
                            signer
                                .verify_message_digest(signed_data, external_content)
                                .err()
                        })
                        .map(|e| e.to_string());

                    let (chain, chain_error) =
                        match path_builder.build(&certificate, creation_date) {
                            Ok(chain) => (Some(chain), None),
                            Err(e) => (None, Some(e)),
                        };

                    DigitalSignature {
                        signer_info: signer.clone(),
                        creation_date,
                        signer_certificate: Some(certificate),
                        chain,
                        chain_error,
                        verification_error,
                    }
                }
            };

            signatures.push(record);
        }

        debug!("verified document with {} signature(s)", signatures.len());

        Ok(signatures)
    }

    /// Encrypt content to a set of mailboxes.
    pub fn encrypt(
        &self,
        recipients: &[Mailbox],
        content: impl Read,
        output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        if recipients.is_empty() {
            return Err(Error::Argument(
                "encrypting requires at least one recipient".into(),
            ));
        }

        let recipients = recipients
            .iter()
            .map(|mailbox| self.store.get_cms_recipient(mailbox))
            .collect::<Result<Vec<_>, Error>>()?;

        self.encrypt_with(recipients, content, output)
    }

    /// Encrypt content to explicitly supplied recipients.
    pub fn encrypt_with(
        &self,
        recipients: Vec<CmsRecipient>,
        mut content: impl Read,
        mut output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        if recipients.is_empty() {
            return Err(Error::Argument(
                "encrypting requires at least one recipient".into(),
            ));
        }

        for recipient in &recipients {
            if !recipient.certificate.allows_key_encipherment() {
                return Err(Error::Argument(format!(
                    "certificate for {:?} is not capable of key encipherment",
                    recipient.certificate.subject_common_name()
                )));
            }
        }

        // The CBC layer wants the plaintext contiguous; this is the one
        // operation that materializes its input.
        let mut plaintext = Vec::new();
        content.read_to_end(&mut plaintext)?;

        let mut builder = EnvelopedDataBuilder::default();
        for recipient in recipients {
            builder = builder.recipient(recipient.certificate, recipient.identifier_type);
        }

        let der = builder.build_der(&plaintext)?;
        output.write_all(&der)?;

        Ok(SecureMimeType::EnvelopedData)
    }

    /// Decrypt an EnvelopedData, writing the plaintext entity octets.
    pub fn decrypt(&self, mut input: impl Read, mut output: impl Write) -> Result<(), Error> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        let enveloped = EnvelopedData::decode_ber(&data)?;

        for info in enveloped.recipient_infos.iter() {
            let ktri = match info {
                RecipientInfo::KeyTransRecipientInfo(ktri) => ktri,
                RecipientInfo::Other(tag) => {
                    debug!("skipping unsupported recipient info {tag:?}");
                    continue;
                }
            };

            let selector = match &ktri.rid {
                RecipientIdentifier::IssuerAndSerialNumber(ias) => CertificateSelector::from(ias),
                RecipientIdentifier::SubjectKeyIdentifier(ski) => {
                    CertificateSelector::BySki(ski.to_bytes().to_vec())
                }
            };

            let key = match self.store.get_private_key(&selector) {
                Ok(Some(key)) => key,
                Ok(None) => continue,
                Err(e) => {
                    warn!("private key lookup failed: {e}");
                    continue;
                }
            };

            let rsa_key = match key.rsa_private_key() {
                Ok(key) => key,
                Err(_) => continue,
            };

            let cek = match envelope::unwrap_cek(ktri, &rsa_key) {
                Ok(cek) => cek,
                Err(_) => continue,
            };

            let plaintext = envelope::decrypt_content(&enveloped, &cek)?;
            output.write_all(&plaintext)?;

            return Ok(());
        }

        Err(Error::NoSuitablePrivateKey)
    }

    /// Compress a content stream into a CompressedData part.
    pub fn compress(
        &self,
        content: impl Read,
        output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        compress::compress(content, output)?;

        Ok(SecureMimeType::CompressedData)
    }

    /// Expand a CompressedData part into the original entity octets.
    pub fn decompress(&self, input: impl Read, output: impl Write) -> Result<(), Error> {
        compress::decompress(input, output)
    }

    /// Export the certificates of the given mailboxes as a certs-only
    /// SignedData.
    pub fn export(
        &self,
        mailboxes: &[Mailbox],
        mut output: impl Write,
    ) -> Result<SecureMimeType, Error> {
        if mailboxes.is_empty() {
            return Err(Error::Argument(
                "exporting requires at least one mailbox".into(),
            ));
        }

        let certificates = mailboxes
            .iter()
            .map(|mailbox| {
                self.store
                    .get_cms_recipient(mailbox)
                    .map(|recipient| recipient.certificate)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let der = build_certs_only_der(&certificates)?;
        output.write_all(&der)?;

        Ok(SecureMimeType::CertsOnly)
    }

    /// Import every certificate and CRL of a certs-only SignedData.
    pub fn import(&self, mut input: impl Read) -> Result<(), Error> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        let signed_data = SignedData::parse_ber(&data)?;

        for cert in signed_data.certificates() {
            self.store.import_certificate(cert)?;
        }

        for crl in signed_data.crls() {
            self.store.import_crl(crl)?;
        }

        Ok(())
    }

    /// Import a single certificate into the store.
    pub fn import_certificate(&self, cert: &Certificate) -> Result<(), Error> {
        self.store.import_certificate(cert)
    }

    /// Import a single CRL into the store.
    pub fn import_crl(&self, crl: &crate::certificate::Crl) -> Result<(), Error> {
        self.store.import_crl(crl)
    }

    /// Import a PKCS #12 archive of personal material.
    pub fn import_pkcs12(&self, input: impl Read, password: &str) -> Result<(), Error> {
        self.store.import_pkcs12(input, password)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            store::{FileStore, FileStorePaths},
            testutil,
        },
        std::fs,
        tempfile::TempDir,
    };

    const PASSWORD: &str = "password";

    /// A context over a fresh store directory, provisioned with the
    /// authority as trust anchor and optionally a personal PKCS #12.
    fn context_for(
        authority: &testutil::Authority,
        personal: Option<&Certificate>,
    ) -> (SecureMimeContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = FileStorePaths::under(dir.path());

        fs::write(&paths.root, authority.certificate().as_pem().unwrap()).unwrap();

        if let Some(cert) = personal {
            fs::write(&paths.user, testutil::pkcs12_bundle(cert, PASSWORD)).unwrap();
        }

        let store = CertificateStore::File(FileStore::open(paths, PASSWORD).unwrap());

        (SecureMimeContext::new(store), dir)
    }

    fn empty_context() -> (SecureMimeContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CertificateStore::File(
            FileStore::open(FileStorePaths::under(dir.path()), PASSWORD).unwrap(),
        );

        (SecureMimeContext::new(store), dir)
    }

    #[test]
    fn protocol_support() {
        let (ctx, _dir) = empty_context();

        assert!(ctx.supports("application/pkcs7-signature"));
        assert!(ctx.supports("application/x-pkcs7-signature"));
        assert!(ctx.supports("Application/PKCS7-Mime"));
        assert!(ctx.supports("application/x-pkcs7-keys"));
        assert!(!ctx.supports("application/pgp-signature"));
        assert!(!ctx.supports("text/plain"));
        assert!(!ctx.supports("pkcs7-mime"));
    }

    #[test]
    fn smime_type_parameters() {
        assert_eq!(SecureMimeType::SignedData.smime_type(), Some("signed-data"));
        assert_eq!(
            SecureMimeType::EnvelopedData.smime_type(),
            Some("enveloped-data")
        );
        assert_eq!(
            SecureMimeType::CompressedData.smime_type(),
            Some("compressed-data")
        );
        assert_eq!(SecureMimeType::CertsOnly.smime_type(), Some("certs-only"));
        assert_eq!(SecureMimeType::Data.smime_type(), None);
    }

    #[test]
    fn sign_then_verify_detached() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let (ctx, _dir) = context_for(&authority, Some(&alice));

        let content = b"Hello\r\n";
        let mut signature = Vec::new();

        let tag = ctx
            .sign(
                &Mailbox::new(Some("Alice"), "alice@example.com"),
                DigestAlgorithm::Sha256,
                content.as_ref(),
                &mut signature,
            )
            .unwrap();
        assert_eq!(tag, SecureMimeType::SignedData);

        let before = chrono::Utc::now();
        let signatures = ctx
            .verify_detached(content.as_ref(), signature.as_slice())
            .unwrap();

        assert_eq!(signatures.len(), 1);
        let sig = &signatures[0];

        assert!(sig.chain_error().is_none(), "{:?}", sig.chain_error());
        assert!(sig.verification_error().is_none());
        assert!(sig.is_valid());
        assert_eq!(
            sig.signer_certificate().unwrap().subject_common_name(),
            Some("Alice".to_string())
        );

        let creation = sig.creation_date().expect("signing time present");
        let skew = (before - creation).num_seconds().abs();
        assert!(skew <= 5, "creation date skew was {skew}s");
    }

    #[test]
    fn encapsulated_sign_then_verify_extracts_content() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let (ctx, _dir) = context_for(&authority, Some(&alice));

        let mut blob = Vec::new();
        ctx.encapsulated_sign(
            &Mailbox::from("alice@example.com"),
            DigestAlgorithm::Sha256,
            b"Hello\r\n".as_ref(),
            &mut blob,
        )
        .unwrap();

        let (content, signatures) = ctx.verify(blob.as_slice()).unwrap();

        assert_eq!(content, b"Hello\r\n");
        assert_eq!(signatures.len(), 1);
        assert!(signatures[0].is_valid());
    }

    #[test]
    fn tampered_content_invalidates_signature() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let (ctx, _dir) = context_for(&authority, Some(&alice));

        let mut signature = Vec::new();
        ctx.sign(
            &Mailbox::from("alice@example.com"),
            DigestAlgorithm::Sha256,
            b"original".as_ref(),
            &mut signature,
        )
        .unwrap();

        let signatures = ctx
            .verify_detached(b"tampered".as_ref(), signature.as_slice())
            .unwrap();

        assert_eq!(signatures.len(), 1);
        assert!(signatures[0].verification_error().is_some());
        assert!(!signatures[0].is_valid());
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let authority = testutil::authority();
        let bob = authority.issue_leaf("Bob", "bob@example.com");

        // Alice's side knows Bob's certificate only.
        let (alice_ctx, _a) = context_for(&authority, None);
        alice_ctx.import_certificate(&bob).unwrap();

        let mut ciphertext = Vec::new();
        let tag = alice_ctx
            .encrypt(
                &[Mailbox::from("bob@example.com")],
                b"secret".as_ref(),
                &mut ciphertext,
            )
            .unwrap();
        assert_eq!(tag, SecureMimeType::EnvelopedData);

        // Bob's side holds the private key.
        let (bob_ctx, _b) = context_for(&authority, Some(&bob));

        let mut plaintext = Vec::new();
        bob_ctx
            .decrypt(ciphertext.as_slice(), &mut plaintext)
            .unwrap();

        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn encrypt_unknown_recipient_is_certificate_not_found() {
        let (ctx, _dir) = empty_context();

        let err = ctx
            .encrypt(
                &[Mailbox::from("unknown@example.com")],
                b"data".as_ref(),
                &mut Vec::new(),
            )
            .unwrap_err();

        match err {
            Error::CertificateNotFound { mailbox, .. } => {
                assert_eq!(mailbox, "unknown@example.com");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn encrypt_zero_recipients_is_an_argument_error() {
        let (ctx, _dir) = empty_context();
        let mut output = Vec::new();

        assert!(matches!(
            ctx.encrypt(&[], b"data".as_ref(), &mut output),
            Err(Error::Argument(_))
        ));
        assert!(output.is_empty());
    }

    #[test]
    fn decrypt_without_key_reports_no_suitable_key() {
        let authority = testutil::authority();
        let bob = authority.issue_leaf("Bob", "bob@example.com");

        let (sender, _a) = context_for(&authority, None);
        sender.import_certificate(&bob).unwrap();

        let mut ciphertext = Vec::new();
        sender
            .encrypt(
                &[Mailbox::from("bob@example.com")],
                b"secret".as_ref(),
                &mut ciphertext,
            )
            .unwrap();

        // A context with no personal material cannot open it.
        let (stranger, _b) = context_for(&authority, None);

        assert!(matches!(
            stranger.decrypt(ciphertext.as_slice(), &mut Vec::new()),
            Err(Error::NoSuitablePrivateKey)
        ));
    }

    #[test]
    fn revoked_signer_yields_chain_error_with_reason() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let (ctx, _dir) = context_for(&authority, Some(&alice));

        // The local CRL store lists Alice as revoked.
        let crl = authority.revoke(&[&alice]);
        ctx.import_crl(&crl).unwrap();

        let mut signature = Vec::new();
        ctx.sign(
            &Mailbox::from("alice@example.com"),
            DigestAlgorithm::Sha256,
            b"data".as_ref(),
            &mut signature,
        )
        .unwrap();

        let signatures = ctx
            .verify_detached(b"data".as_ref(), signature.as_slice())
            .unwrap();

        assert_eq!(signatures.len(), 1);
        let sig = &signatures[0];

        assert!(sig.signer_certificate().is_some());
        assert!(sig.verification_error().is_none());

        match sig.chain_error() {
            Some(PathBuildError::Revoked { reason, .. }) => {
                assert_eq!(*reason, Some(testutil::REASON_KEY_COMPROMISE));
            }
            other => panic!("expected a revocation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_signer_certificate_still_yields_a_record() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let key = testutil::signing_key();

        // A signature with no embedded certificates, verified by a
        // context that has never seen Alice.
        let der = crate::signing::SignedDataBuilder::default()
            .signed_content(b"data".to_vec())
            .omit_certificates()
            .signer(crate::signing::SignerBuilder::new(&key, alice))
            .build_der()
            .unwrap();

        let (ctx, _dir) = empty_context();
        let (_, signatures) = ctx.verify(der.as_slice()).unwrap();

        assert_eq!(signatures.len(), 1);
        assert!(signatures[0].signer_certificate().is_none());
        assert!(matches!(
            signatures[0].chain_error(),
            Some(PathBuildError::SignerCertificateNotFound)
        ));
    }

    #[test]
    fn verification_learns_embedded_certificates() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let (alice_ctx, _a) = context_for(&authority, Some(&alice));

        let mut blob = Vec::new();
        alice_ctx
            .encapsulated_sign(
                &Mailbox::from("alice@example.com"),
                DigestAlgorithm::Sha256,
                b"hi".as_ref(),
                &mut blob,
            )
            .unwrap();

        // The receiving side starts with an empty address book.
        let (receiver, _b) = context_for(&authority, None);
        receiver.verify(blob.as_slice()).unwrap();

        // First contact populated it.
        let recipient = receiver
            .store()
            .get_cms_recipient(&Mailbox::from("alice@example.com"))
            .unwrap();
        assert_eq!(
            recipient.certificate.fingerprint().unwrap(),
            alice.fingerprint().unwrap()
        );
    }

    #[test]
    fn compress_round_trip() {
        let (ctx, _dir) = empty_context();

        let mut compressed = Vec::new();
        let tag = ctx
            .compress(b"squeeze me".as_ref(), &mut compressed)
            .unwrap();
        assert_eq!(tag, SecureMimeType::CompressedData);

        let mut expanded = Vec::new();
        ctx.decompress(compressed.as_slice(), &mut expanded).unwrap();
        assert_eq!(expanded, b"squeeze me");
    }

    #[test]
    fn export_zero_mailboxes_is_an_argument_error() {
        let (ctx, _dir) = empty_context();

        assert!(matches!(
            ctx.export(&[], &mut Vec::new()),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn export_then_import_is_idempotent() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        let (ctx, dir) = empty_context();
        ctx.import_certificate(&alice).unwrap();

        let mut exported = Vec::new();
        let tag = ctx
            .export(&[Mailbox::from("alice@example.com")], &mut exported)
            .unwrap();
        assert_eq!(tag, SecureMimeType::CertsOnly);

        let addressbook = dir.path().join("addressbook.crt");
        let before = fs::read(&addressbook).unwrap();

        ctx.import(exported.as_slice()).unwrap();

        let after = fs::read(&addressbook).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn import_certs_only_populates_address_book() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        let blob = crate::signing::build_certs_only_der(&[alice.clone()]).unwrap();

        let (ctx, _dir) = empty_context();
        ctx.import(blob.as_slice()).unwrap();

        assert!(ctx
            .store()
            .get_cms_recipient(&Mailbox::from("alice@example.com"))
            .is_ok());
    }
}
