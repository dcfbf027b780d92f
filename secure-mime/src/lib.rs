// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! S/MIME cryptography core.

This crate implements the engine behind S/MIME protected mail bodies:
generation and parsing of CMS (RFC 5652) structures for signing,
encryption and compression, certificate stores that resolve mailbox
addresses to signing and recipient material, and X.509 certification
path building with CRL-based revocation.

It deliberately stops at the octet level. MIME framing
(`application/pkcs7-mime`, `multipart/signed`) is the caller's business:
every operation consumes and produces raw octet streams together with a
[SecureMimeType] tag telling the MIME layer which `smime-type` parameter
to emit.

The main entry point is [SecureMimeContext], which owns a
[CertificateStore] and exposes the sign/verify/encrypt/decrypt/compress
operations:

```no_run
use secure_mime::{CertificateStore, DigestAlgorithm, Mailbox, SecureMimeContext};

let store = CertificateStore::open_default_file_store("password")?;
let ctx = SecureMimeContext::new(store);

let alice = Mailbox::new(Some("Alice"), "alice@example.com");
let mut signature = Vec::new();
ctx.sign(&alice, DigestAlgorithm::Sha256, &mut "Hello\r\n".as_bytes(), &mut signature)?;
# Ok::<(), secure_mime::Error>(())
```

# Wire compatibility

Emitted blobs are DER-encoded CMS. SignedData interoperates with any
RFC 5652 consumer; EnvelopedData uses RSA key transport with
DES-EDE3-CBC content encryption, the lowest common denominator of
deployed S/MIME; CompressedData is RFC 3274 with zlib.
*/

pub mod asn1;

mod algorithm;
mod certificate;
mod compress;
mod context;
mod envelope;
mod mailbox;
mod path;
mod signed_data;
mod signing;
mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use {
    algorithm::{
        ContentEncryptionAlgorithm, DigestAlgorithm, DigestContext, SignatureAlgorithm,
        SigningKey,
    },
    certificate::{
        Certificate, CertificateKeyAlgorithm, CertificatePublicKey, CertificateSelector, Crl,
        Fingerprint, TrustAnchor,
    },
    context::{
        DigitalSignature, DigitalSignatureCollection, SecureMimeContext, SecureMimeType,
        ENCRYPTION_PROTOCOL, KEY_EXCHANGE_PROTOCOL, SIGNATURE_PROTOCOL,
    },
    envelope::EnvelopedDataBuilder,
    mailbox::Mailbox,
    path::{CertificatePath, PathBuildError, PathBuilder},
    signed_data::{SignedAttributes, SignedData, SignerId, SignerInfo},
    signing::{SignedDataBuilder, SignerBuilder},
    store::{
        CertificateStore, CmsRecipient, CmsSigner, FileStore, FileStorePaths, OsStore,
        PrivateKey, SubjectIdentifierType,
    },
};

use bcder::Oid;

/// Unified error type for S/MIME operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ASN.1 decode error: {0}")]
    Decode(bcder::decode::Error),

    #[error("PEM error: {0}")]
    Pem(pem::PemError),

    #[error("bad string value: {0:?}")]
    Charset(bcder::string::CharSetError),

    #[error("no certificate found for {mailbox}: {reason}")]
    CertificateNotFound { mailbox: String, reason: String },

    #[error("bad argument: {0}")]
    Argument(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("content-type attribute missing from SignedAttributes")]
    MissingSignedAttributeContentType,

    #[error("content-type attribute in SignedAttributes is malformed")]
    MalformedSignedAttributeContentType,

    #[error("message-digest attribute missing from SignedAttributes")]
    MissingSignedAttributeMessageDigest,

    #[error("message-digest attribute in SignedAttributes is malformed")]
    MalformedSignedAttributeMessageDigest,

    #[error("signing-time attribute in SignedAttributes is malformed")]
    MalformedSignedAttributeSigningTime,

    #[error("unknown digest algorithm: {0}")]
    UnknownDigestAlgorithm(Oid),

    #[error("unknown signature algorithm: {0}")]
    UnknownSignatureAlgorithm(Oid),

    #[error("unknown content encryption algorithm: {0}")]
    UnknownContentEncryptionAlgorithm(Oid),

    #[error("unknown certificate format")]
    UnknownCertificateFormat,

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("digests not equivalent")]
    DigestNotEqual,

    #[error("error during signature creation")]
    SignatureCreation,

    #[error("private key rejected: {0}")]
    KeyRejected(ring::error::KeyRejected),

    #[error("suitable private key not found")]
    NoSuitablePrivateKey,

    #[error("content encryption error: {0}")]
    Cipher(String),

    #[error("RSA key transport error: {0}")]
    KeyTransport(String),

    #[error("PKCS #12 error: {0}")]
    Pkcs12(String),

    #[error("PKCS #12 password incorrect")]
    Pkcs12BadPassword,
}

impl From<bcder::decode::Error> for Error {
    fn from(e: bcder::decode::Error) -> Self {
        Self::Decode(e)
    }
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Self::Pem(e)
    }
}

impl From<bcder::string::CharSetError> for Error {
    fn from(e: bcder::string::CharSetError) -> Self {
        Self::Charset(e)
    }
}

impl From<ring::error::KeyRejected> for Error {
    fn from(e: ring::error::KeyRejected) -> Self {
        Self::KeyRejected(e)
    }
}
