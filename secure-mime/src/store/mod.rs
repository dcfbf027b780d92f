// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Certificate store backends.

A store resolves mailbox addresses and certificate selectors to signing
and recipient material, enumerates trust anchors, intermediates and
CRLs, and accepts imports of new material.

Dispatch is a closed enum over the two backends rather than a trait
object: callers and backends both benefit from knowing the full set of
variants, and nothing here wants open-ended extensibility.
*/

mod file;
mod os;

pub use {
    file::{FileStore, FileStorePaths},
    os::OsStore,
};

use {
    crate::{
        algorithm::{DigestAlgorithm, SigningKey},
        certificate::{Certificate, CertificateSelector, Crl, TrustAnchor},
        mailbox::Mailbox,
        Error,
    },
    rsa::pkcs8::DecodePrivateKey,
    std::io::Read,
    zeroize::Zeroizing,
};

/// Selects which CMS RecipientIdentifier variant an operation emits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubjectIdentifierType {
    #[default]
    IssuerAndSerialNumber,
    SubjectKeyIdentifier,
}

/// A private key held by a store, as PKCS #8 material.
///
/// One blob backs both roles a mail key plays: ring consumes it for
/// signing, the `rsa` crate for unwrapping key-transport session keys.
#[derive(Clone)]
pub struct PrivateKey {
    pkcs8_der: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey")
    }
}

impl PrivateKey {
    pub fn from_pkcs8_der(data: Vec<u8>) -> Self {
        Self {
            pkcs8_der: Zeroizing::new(data),
        }
    }

    /// A ring signing key over this material.
    pub fn signing_key(&self) -> Result<SigningKey, Error> {
        SigningKey::from_pkcs8_der(&self.pkcs8_der)
    }

    /// An RSA decryption key over this material.
    pub fn rsa_private_key(&self) -> Result<rsa::RsaPrivateKey, Error> {
        rsa::RsaPrivateKey::from_pkcs8_der(&self.pkcs8_der)
            .map_err(|e| Error::KeyTransport(e.to_string()))
    }

    /// Whether this key is the counterpart of a certificate's public key.
    ///
    /// Only decidable for RSA, where both encodings are canonical; other
    /// algorithms answer false and callers fall back to positional
    /// pairing within the archive.
    pub fn matches_certificate(&self, cert: &Certificate) -> bool {
        use rsa::pkcs1::EncodeRsaPublicKey;

        match self.rsa_private_key() {
            Ok(key) => match key.to_public_key().to_pkcs1_der() {
                Ok(der) => der.as_bytes() == cert.public_key().key.as_slice(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

/// A recipient of an encrypted message.
#[derive(Clone, Debug)]
pub struct CmsRecipient {
    pub certificate: Certificate,
    pub identifier_type: SubjectIdentifierType,
}

impl CmsRecipient {
    pub fn new(certificate: Certificate) -> Self {
        Self {
            certificate,
            identifier_type: SubjectIdentifierType::default(),
        }
    }
}

/// A signer resolved from a store: certificate, key and digest choice.
#[derive(Clone, Debug)]
pub struct CmsSigner {
    pub certificate: Certificate,
    pub private_key: PrivateKey,
    pub digest_algorithm: DigestAlgorithm,
}

impl CmsSigner {
    pub fn new(
        certificate: Certificate,
        private_key: PrivateKey,
        digest_algorithm: DigestAlgorithm,
    ) -> Self {
        Self {
            certificate,
            private_key,
            digest_algorithm,
        }
    }
}

/// A polymorphic certificate store.
pub enum CertificateStore {
    File(FileStore),
    Os(OsStore),
}

impl CertificateStore {
    /// Open the file-backed store at its default per-user location.
    pub fn open_default_file_store(password: &str) -> Result<Self, Error> {
        Ok(Self::File(FileStore::open_default(password)?))
    }

    /// Open the file-backed store with explicit paths.
    pub fn open_file_store(paths: FileStorePaths, password: &str) -> Result<Self, Error> {
        Ok(Self::File(FileStore::open(paths, password)?))
    }

    /// Open the host operating system's certificate store.
    pub fn open_os_store() -> Result<Self, Error> {
        Ok(Self::Os(OsStore::new()?))
    }

    /// Find a certificate matching the selector, searching every source
    /// the backend has.
    pub fn get_certificate(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<Certificate>, Error> {
        match self {
            Self::File(store) => store.get_certificate(selector),
            Self::Os(store) => store.get_certificate(selector),
        }
    }

    /// Find the private key whose certificate matches the selector.
    pub fn get_private_key(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<PrivateKey>, Error> {
        match self {
            Self::File(store) => store.get_private_key(selector),
            Self::Os(store) => store.get_private_key(selector),
        }
    }

    /// The set of trust anchors, deduplicated by fingerprint.
    pub fn get_trusted_anchors(&self) -> Result<Vec<TrustAnchor>, Error> {
        match self {
            Self::File(store) => store.get_trusted_anchors(),
            Self::Os(store) => store.get_trusted_anchors(),
        }
    }

    /// Candidate intermediate certificates for path building.
    pub fn get_intermediates(&self) -> Result<Vec<Certificate>, Error> {
        match self {
            Self::File(store) => store.get_intermediates(),
            Self::Os(store) => store.get_intermediates(),
        }
    }

    /// The locally configured CRLs.
    pub fn get_crls(&self) -> Result<Vec<Crl>, Error> {
        match self {
            Self::File(store) => store.get_crls(),
            Self::Os(store) => store.get_crls(),
        }
    }

    /// Resolve a mailbox to an encryption recipient.
    pub fn get_cms_recipient(&self, mailbox: &Mailbox) -> Result<CmsRecipient, Error> {
        let selector = CertificateSelector::ByEmail(mailbox.address().to_string());

        match self.get_certificate(&selector)? {
            Some(certificate) => Ok(CmsRecipient::new(certificate)),
            None => Err(Error::CertificateNotFound {
                mailbox: mailbox.address().to_string(),
                reason: "no certificate bound to this address".into(),
            }),
        }
    }

    /// Resolve a mailbox to a signer with its private key.
    pub fn get_cms_signer(
        &self,
        mailbox: &Mailbox,
        digest_algorithm: DigestAlgorithm,
    ) -> Result<CmsSigner, Error> {
        let selector = CertificateSelector::ByEmail(mailbox.address().to_string());

        let certificate = self.get_certificate(&selector)?.ok_or_else(|| {
            Error::CertificateNotFound {
                mailbox: mailbox.address().to_string(),
                reason: "no certificate bound to this address".into(),
            }
        })?;

        let private_key =
            self.get_private_key(&selector)?
                .ok_or_else(|| Error::CertificateNotFound {
                    mailbox: mailbox.address().to_string(),
                    reason: "certificate has no usable private key".into(),
                })?;

        Ok(CmsSigner::new(certificate, private_key, digest_algorithm))
    }

    /// Import a certificate. Duplicate imports do not change the store.
    pub fn import_certificate(&self, cert: &Certificate) -> Result<(), Error> {
        match self {
            Self::File(store) => store.import_certificate(cert),
            Self::Os(store) => store.import_certificate(cert),
        }
    }

    /// Import a CRL. Duplicate imports do not change the store.
    pub fn import_crl(&self, crl: &Crl) -> Result<(), Error> {
        match self {
            Self::File(store) => store.import_crl(crl),
            Self::Os(store) => store.import_crl(crl),
        }
    }

    /// Import a PKCS #12 archive of certificates and private keys.
    pub fn import_pkcs12(&self, mut input: impl Read, password: &str) -> Result<(), Error> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;

        match self {
            Self::File(store) => store.import_pkcs12(&data, password),
            Self::Os(store) => store.import_pkcs12(&data, password),
        }
    }
}
