// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Digest, signature and content-encryption algorithm registries.

Everything that maps symbolic algorithm names to OIDs, `micalg`
parameter tokens and concrete cryptographic implementations lives here.
*/

use {
    crate::{
        asn1::rfc5280::{AlgorithmIdentifier, AlgorithmParameter},
        asn1::rfc5652::DigestAlgorithmIdentifier,
        Error,
    },
    bcder::{decode::Constructed, ConstOid, Mode, OctetString, Oid},
    bytes::Bytes,
    cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    ring::signature::{EcdsaKeyPair, Ed25519KeyPair, RsaKeyPair, VerificationAlgorithm},
    sha2::Digest,
    std::convert::TryFrom,
};

/// MD2 digest algorithm.
///
/// 1.2.840.113549.2.2
pub const OID_MD2: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 2, 2]);

/// MD4 digest algorithm.
///
/// 1.2.840.113549.2.4
pub const OID_MD4: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 2, 4]);

/// MD5 digest algorithm.
///
/// 1.2.840.113549.2.5
pub const OID_MD5: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 2, 5]);

/// SHA-1 digest algorithm.
///
/// 1.3.14.3.2.26
pub const OID_SHA1: ConstOid = Oid(&[43, 14, 3, 2, 26]);

/// SHA-224 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.4
pub const OID_SHA224: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 4]);

/// SHA-256 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.1
pub const OID_SHA256: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 1]);

/// SHA-384 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.2
pub const OID_SHA384: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 2]);

/// SHA-512 digest algorithm.
///
/// 2.16.840.1.101.3.4.2.3
pub const OID_SHA512: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 2, 3]);

/// RSA+SHA-1 encryption.
///
/// 1.2.840.113549.1.1.5
pub const OID_SHA1_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 5]);

/// RSA+SHA-256 encryption.
///
/// 1.2.840.113549.1.1.11
pub const OID_SHA256_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 11]);

/// RSA+SHA-384 encryption.
///
/// 1.2.840.113549.1.1.12
pub const OID_SHA384_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 12]);

/// RSA+SHA-512 encryption.
///
/// 1.2.840.113549.1.1.13
pub const OID_SHA512_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 13]);

/// RSAES-PKCS1-v1_5 / rsaEncryption.
///
/// 1.2.840.113549.1.1.1
pub const OID_RSA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 1, 1]);

/// ECDSA with SHA-256.
///
/// 1.2.840.10045.4.3.2
pub const OID_ECDSA_SHA256: ConstOid = Oid(&[42, 134, 72, 206, 61, 4, 3, 2]);

/// ECDSA with SHA-384.
///
/// 1.2.840.10045.4.3.3
pub const OID_ECDSA_SHA384: ConstOid = Oid(&[42, 134, 72, 206, 61, 4, 3, 3]);

/// Ed25519 signature algorithm.
///
/// 1.3.101.112
pub const OID_ED25519: ConstOid = Oid(&[43, 101, 112]);

/// Elliptic curve public key cryptography.
///
/// 1.2.840.10045.2.1
pub const OID_EC_PUBLIC_KEY: ConstOid = Oid(&[42, 134, 72, 206, 61, 2, 1]);

/// Triple DES in CBC mode.
///
/// 1.2.840.113549.3.7
pub const OID_DES_EDE3_CBC: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 3, 7]);

/// AES-128 in CBC mode.
///
/// 2.16.840.1.101.3.4.1.2
pub const OID_AES128_CBC: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 1, 2]);

/// AES-192 in CBC mode.
///
/// 2.16.840.1.101.3.4.1.22
pub const OID_AES192_CBC: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 1, 22]);

/// AES-256 in CBC mode.
///
/// 2.16.840.1.101.3.4.1.42
pub const OID_AES256_CBC: ConstOid = Oid(&[96, 134, 72, 1, 101, 3, 4, 1, 42]);

/// A hashing algorithm usable (or at least nameable) in S/MIME messages.
///
/// The full set of algorithms historic mail software advertises is
/// representable so `micalg` parameters and SMIMECapabilities round-trip,
/// but only a subset can actually be used for signing. [Self::None] is the
/// "no algorithm" sentinel used when a `micalg` token is unrecognized.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DigestAlgorithm {
    None,
    Md2,
    Md4,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    RipeMd160,
    DoubleSha,
    Tiger192,
    Haval5160,
}

impl DigestAlgorithm {
    /// The canonical RFC 3851 `micalg` parameter token for this algorithm.
    pub fn micalg_name(self) -> Result<&'static str, Error> {
        match self {
            Self::None => Err(Error::OutOfRange("digest algorithm has no micalg name")),
            Self::Md2 => Ok("md2"),
            Self::Md4 => Ok("md4"),
            Self::Md5 => Ok("md5"),
            Self::Sha1 => Ok("sha1"),
            Self::Sha224 => Ok("sha224"),
            Self::Sha256 => Ok("sha256"),
            Self::Sha384 => Ok("sha384"),
            Self::Sha512 => Ok("sha512"),
            Self::RipeMd160 => Ok("ripemd160"),
            Self::DoubleSha => Ok("doublesha"),
            Self::Tiger192 => Ok("tiger192"),
            Self::Haval5160 => Ok("haval-5-160"),
        }
    }

    /// Look up a digest algorithm from a `micalg` parameter token.
    ///
    /// Matching is case-insensitive and accepts both the RFC 3851 spellings
    /// and the dashed RFC 5751 spellings (`sha-256`). Unknown tokens map to
    /// [Self::None] rather than an error so a lenient caller can fall back
    /// to trying every digest algorithm listed in the signature itself.
    pub fn from_micalg(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "md2" => Self::Md2,
            "md4" => Self::Md4,
            "md5" => Self::Md5,
            "sha1" | "sha-1" => Self::Sha1,
            "sha224" | "sha-224" => Self::Sha224,
            "sha256" | "sha-256" => Self::Sha256,
            "sha384" | "sha-384" => Self::Sha384,
            "sha512" | "sha-512" => Self::Sha512,
            "ripemd160" => Self::RipeMd160,
            "doublesha" => Self::DoubleSha,
            "tiger192" => Self::Tiger192,
            "haval-5-160" => Self::Haval5160,
            _ => Self::None,
        }
    }

    /// The OID emitted into CMS `digestAlgorithm` fields for this algorithm.
    pub fn digest_oid(self) -> Result<Oid, Error> {
        let oid = match self {
            Self::None => return Err(Error::OutOfRange("no OID for the null digest algorithm")),
            Self::RipeMd160 | Self::DoubleSha | Self::Tiger192 | Self::Haval5160 => {
                return Err(Error::NotSupported(format!(
                    "no digest OID registered for {:?}",
                    self
                )));
            }
            Self::Md2 => OID_MD2,
            Self::Md4 => OID_MD4,
            Self::Md5 => OID_MD5,
            Self::Sha1 => OID_SHA1,
            Self::Sha224 => OID_SHA224,
            Self::Sha256 => OID_SHA256,
            Self::Sha384 => OID_SHA384,
            Self::Sha512 => OID_SHA512,
        };

        Ok(Oid(Bytes::copy_from_slice(oid.as_ref())))
    }

    /// Create a new streaming content hasher for this algorithm.
    pub fn as_hasher(self) -> Result<DigestContext, Error> {
        match self {
            Self::Md5 => Ok(DigestContext::Md5(md5::Md5::new())),
            Self::Sha1 => Ok(DigestContext::Ring(ring::digest::Context::new(
                &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            ))),
            Self::Sha224 => Ok(DigestContext::Sha224(sha2::Sha224::new())),
            Self::Sha256 => Ok(DigestContext::Ring(ring::digest::Context::new(
                &ring::digest::SHA256,
            ))),
            Self::Sha384 => Ok(DigestContext::Ring(ring::digest::Context::new(
                &ring::digest::SHA384,
            ))),
            Self::Sha512 => Ok(DigestContext::Ring(ring::digest::Context::new(
                &ring::digest::SHA512,
            ))),
            _ => Err(Error::NotSupported(format!(
                "digesting with {:?} is not available",
                self
            ))),
        }
    }
}

impl TryFrom<&Oid> for DigestAlgorithm {
    type Error = Error;

    fn try_from(v: &Oid) -> Result<Self, Self::Error> {
        if v == &OID_SHA256 {
            Ok(Self::Sha256)
        } else if v == &OID_SHA1 {
            Ok(Self::Sha1)
        } else if v == &OID_SHA384 {
            Ok(Self::Sha384)
        } else if v == &OID_SHA512 {
            Ok(Self::Sha512)
        } else if v == &OID_SHA224 {
            Ok(Self::Sha224)
        } else if v == &OID_MD5 {
            Ok(Self::Md5)
        } else if v == &OID_MD2 {
            Ok(Self::Md2)
        } else if v == &OID_MD4 {
            Ok(Self::Md4)
        } else {
            Err(Error::UnknownDigestAlgorithm(v.clone()))
        }
    }
}

impl TryFrom<&DigestAlgorithmIdentifier> for DigestAlgorithm {
    type Error = Error;

    fn try_from(v: &DigestAlgorithmIdentifier) -> Result<Self, Self::Error> {
        Self::try_from(&v.algorithm)
    }
}

impl TryFrom<DigestAlgorithm> for DigestAlgorithmIdentifier {
    type Error = Error;

    fn try_from(alg: DigestAlgorithm) -> Result<Self, Self::Error> {
        Ok(Self {
            algorithm: alg.digest_oid()?,
            parameters: None,
        })
    }
}

/// A streaming digest in progress.
pub enum DigestContext {
    Ring(ring::digest::Context),
    Md5(md5::Md5),
    Sha224(sha2::Sha224),
}

impl DigestContext {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Ring(ctx) => ctx.update(data),
            Self::Md5(ctx) => ctx.update(data),
            Self::Sha224(ctx) => ctx.update(data),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::Ring(ctx) => ctx.finish().as_ref().to_vec(),
            Self::Md5(ctx) => ctx.finalize().to_vec(),
            Self::Sha224(ctx) => ctx.finalize().to_vec(),
        }
    }
}

/// An algorithm used to digitally sign content.
///
/// Instances can be converted to/from the underlying ASN.1 type and OIDs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignatureAlgorithm {
    /// SHA-1 with RSA encryption.
    Sha1Rsa,

    /// SHA-256 with RSA encryption.
    Sha256Rsa,

    /// SHA-384 with RSA encryption.
    Sha384Rsa,

    /// SHA-512 with RSA encryption.
    Sha512Rsa,

    /// RSAES-PKCS1-v1_5, i.e. bare `rsaEncryption`.
    ///
    /// CMS signer infos commonly carry this instead of a combined
    /// digest+RSA OID; the digest algorithm field disambiguates.
    RsaesPkcsV15,

    /// ECDSA with SHA-256.
    EcdsaSha256,

    /// ECDSA with SHA-384.
    EcdsaSha384,

    /// Ed25519.
    Ed25519,
}

impl SignatureAlgorithm {
    /// Resolve to a ring verification algorithm.
    ///
    /// For the bare `rsaEncryption` form the digest algorithm from the
    /// signer info selects the hash.
    pub fn as_verification_algorithm(
        &self,
        digest: DigestAlgorithm,
    ) -> Result<&'static dyn VerificationAlgorithm, Error> {
        match self {
            Self::Sha1Rsa => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY),
            Self::Sha256Rsa => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
            Self::Sha384Rsa => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
            Self::Sha512Rsa => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA512),
            Self::RsaesPkcsV15 => match digest {
                DigestAlgorithm::Sha1 => {
                    Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY)
                }
                DigestAlgorithm::Sha256 => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA256),
                DigestAlgorithm::Sha384 => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA384),
                DigestAlgorithm::Sha512 => Ok(&ring::signature::RSA_PKCS1_2048_8192_SHA512),
                _ => Err(Error::NotSupported(format!(
                    "RSA verification with digest {:?}",
                    digest
                ))),
            },
            Self::EcdsaSha256 => Ok(&ring::signature::ECDSA_P256_SHA256_ASN1),
            Self::EcdsaSha384 => Ok(&ring::signature::ECDSA_P384_SHA384_ASN1),
            Self::Ed25519 => Ok(&ring::signature::ED25519),
        }
    }
}

impl TryFrom<&Oid> for SignatureAlgorithm {
    type Error = Error;

    fn try_from(v: &Oid) -> Result<Self, Self::Error> {
        if v == &OID_SHA256_RSA {
            Ok(Self::Sha256Rsa)
        } else if v == &OID_SHA1_RSA {
            Ok(Self::Sha1Rsa)
        } else if v == &OID_SHA384_RSA {
            Ok(Self::Sha384Rsa)
        } else if v == &OID_SHA512_RSA {
            Ok(Self::Sha512Rsa)
        } else if v == &OID_RSA {
            Ok(Self::RsaesPkcsV15)
        } else if v == &OID_ECDSA_SHA256 {
            Ok(Self::EcdsaSha256)
        } else if v == &OID_ECDSA_SHA384 {
            Ok(Self::EcdsaSha384)
        } else if v == &OID_ED25519 {
            Ok(Self::Ed25519)
        } else {
            Err(Error::UnknownSignatureAlgorithm(v.clone()))
        }
    }
}

impl TryFrom<&AlgorithmIdentifier> for SignatureAlgorithm {
    type Error = Error;

    fn try_from(v: &AlgorithmIdentifier) -> Result<Self, Self::Error> {
        Self::try_from(&v.algorithm)
    }
}

impl From<SignatureAlgorithm> for Oid {
    fn from(v: SignatureAlgorithm) -> Self {
        let oid = match v {
            SignatureAlgorithm::Sha1Rsa => OID_SHA1_RSA,
            SignatureAlgorithm::Sha256Rsa => OID_SHA256_RSA,
            SignatureAlgorithm::Sha384Rsa => OID_SHA384_RSA,
            SignatureAlgorithm::Sha512Rsa => OID_SHA512_RSA,
            SignatureAlgorithm::RsaesPkcsV15 => OID_RSA,
            SignatureAlgorithm::EcdsaSha256 => OID_ECDSA_SHA256,
            SignatureAlgorithm::EcdsaSha384 => OID_ECDSA_SHA384,
            SignatureAlgorithm::Ed25519 => OID_ED25519,
        };

        Oid(Bytes::copy_from_slice(oid.as_ref()))
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifier {
    fn from(alg: SignatureAlgorithm) -> Self {
        Self {
            algorithm: alg.into(),
            parameters: None,
        }
    }
}

/// Represents a key used for signing content.
///
/// This is a wrapper around ring's key types supporting signing. Only the
/// private half matters here; decryption keys are handled separately by
/// the store layer because ring deliberately implements no RSA decryption.
pub enum SigningKey {
    /// ECDSA key pair over P-256.
    Ecdsa(EcdsaKeyPair),

    /// ED25519 key pair.
    Ed25519(Ed25519KeyPair),

    /// RSA key pair.
    Rsa(RsaKeyPair),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ecdsa(_) => f.write_str("SigningKey::Ecdsa"),
            Self::Ed25519(_) => f.write_str("SigningKey::Ed25519"),
            Self::Rsa(_) => f.write_str("SigningKey::Rsa"),
        }
    }
}

impl SigningKey {
    /// Construct an instance by parsing PKCS #8 DER data.
    ///
    /// The key algorithm is discovered by attempting each supported type.
    pub fn from_pkcs8_der(data: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = RsaKeyPair::from_pkcs8(data) {
            return Ok(Self::Rsa(key));
        }

        if let Ok(key) =
            EcdsaKeyPair::from_pkcs8(&ring::signature::ECDSA_P256_SHA256_ASN1_SIGNING, data)
        {
            return Ok(Self::Ecdsa(key));
        }

        let key = Ed25519KeyPair::from_pkcs8(data)
            .or_else(|_| Ed25519KeyPair::from_pkcs8_maybe_unchecked(data))?;

        Ok(Self::Ed25519(key))
    }

    /// Sign a message with the given content digest algorithm.
    ///
    /// Returns the raw bytes constituting the signature.
    pub fn sign(&self, digest: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Rsa(key) => {
                let padding: &'static dyn ring::signature::RsaEncoding = match digest {
                    DigestAlgorithm::Sha256 => &ring::signature::RSA_PKCS1_SHA256,
                    DigestAlgorithm::Sha384 => &ring::signature::RSA_PKCS1_SHA384,
                    DigestAlgorithm::Sha512 => &ring::signature::RSA_PKCS1_SHA512,
                    _ => {
                        return Err(Error::NotSupported(format!(
                            "RSA signing with digest {:?}",
                            digest
                        )));
                    }
                };

                let mut signature = vec![0; key.public_modulus_len()];

                key.sign(
                    padding,
                    &ring::rand::SystemRandom::new(),
                    message,
                    &mut signature,
                )
                .map_err(|_| Error::SignatureCreation)?;

                Ok(signature)
            }
            Self::Ecdsa(key) => {
                if digest != DigestAlgorithm::Sha256 {
                    return Err(Error::NotSupported(format!(
                        "ECDSA P-256 signing requires SHA-256, not {:?}",
                        digest
                    )));
                }

                let signature = key
                    .sign(&ring::rand::SystemRandom::new(), message)
                    .map_err(|_| Error::SignatureCreation)?;

                Ok(signature.as_ref().to_vec())
            }
            // Ed25519 hashes internally; the digest algorithm only governs
            // the message-digest attribute.
            Self::Ed25519(key) => Ok(key.sign(message).as_ref().to_vec()),
        }
    }

    /// The signature algorithm emitted when signing with a given digest.
    pub fn signature_algorithm(&self, digest: DigestAlgorithm) -> Result<SignatureAlgorithm, Error> {
        match self {
            Self::Rsa(_) => match digest {
                DigestAlgorithm::Sha256 => Ok(SignatureAlgorithm::Sha256Rsa),
                DigestAlgorithm::Sha384 => Ok(SignatureAlgorithm::Sha384Rsa),
                DigestAlgorithm::Sha512 => Ok(SignatureAlgorithm::Sha512Rsa),
                _ => Err(Error::NotSupported(format!(
                    "RSA signing with digest {:?}",
                    digest
                ))),
            },
            Self::Ecdsa(_) => Ok(SignatureAlgorithm::EcdsaSha256),
            Self::Ed25519(_) => Ok(SignatureAlgorithm::Ed25519),
        }
    }
}

impl From<EcdsaKeyPair> for SigningKey {
    fn from(key: EcdsaKeyPair) -> Self {
        Self::Ecdsa(key)
    }
}

impl From<Ed25519KeyPair> for SigningKey {
    fn from(key: Ed25519KeyPair) -> Self {
        Self::Ed25519(key)
    }
}

impl From<RsaKeyPair> for SigningKey {
    fn from(key: RsaKeyPair) -> Self {
        Self::Rsa(key)
    }
}

/// A symmetric content-encryption algorithm for EnvelopedData.
///
/// DES-EDE3-CBC is what this implementation emits; the AES variants are
/// accepted on the parse side so mail from modern peers decrypts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentEncryptionAlgorithm {
    TripleDesCbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl ContentEncryptionAlgorithm {
    /// Key length in octets.
    pub fn key_len(self) -> usize {
        match self {
            Self::TripleDesCbc => 24,
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
        }
    }

    /// CBC initialization vector length in octets.
    pub fn iv_len(self) -> usize {
        match self {
            Self::TripleDesCbc => 8,
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
        }
    }

    /// Encrypt plaintext under key/iv with PKCS #7 padding.
    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        fn run<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>
        where
            C: cbc::cipher::BlockEncryptMut + cbc::cipher::BlockCipher + cbc::cipher::KeyInit,
        {
            Ok(cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| Error::Cipher(e.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }

        match self {
            Self::TripleDesCbc => run::<des::TdesEde3>(key, iv, plaintext),
            Self::Aes128Cbc => run::<aes::Aes128>(key, iv, plaintext),
            Self::Aes192Cbc => run::<aes::Aes192>(key, iv, plaintext),
            Self::Aes256Cbc => run::<aes::Aes256>(key, iv, plaintext),
        }
    }

    /// Decrypt ciphertext under key/iv, stripping PKCS #7 padding.
    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        fn run<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>
        where
            C: cbc::cipher::BlockDecryptMut + cbc::cipher::BlockCipher + cbc::cipher::KeyInit,
        {
            cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| Error::Cipher(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|e| Error::Cipher(e.to_string()))
        }

        match self {
            Self::TripleDesCbc => run::<des::TdesEde3>(key, iv, ciphertext),
            Self::Aes128Cbc => run::<aes::Aes128>(key, iv, ciphertext),
            Self::Aes192Cbc => run::<aes::Aes192>(key, iv, ciphertext),
            Self::Aes256Cbc => run::<aes::Aes256>(key, iv, ciphertext),
        }
    }

    /// Build the ASN.1 algorithm identifier carrying the CBC IV parameter.
    pub fn algorithm_identifier(self, iv: &[u8]) -> AlgorithmIdentifier {
        let oid = match self {
            Self::TripleDesCbc => OID_DES_EDE3_CBC,
            Self::Aes128Cbc => OID_AES128_CBC,
            Self::Aes192Cbc => OID_AES192_CBC,
            Self::Aes256Cbc => OID_AES256_CBC,
        };

        AlgorithmIdentifier {
            algorithm: Oid(Bytes::copy_from_slice(oid.as_ref())),
            parameters: Some(AlgorithmParameter::from_values(
                OctetString::new(Bytes::copy_from_slice(iv)).encode_ref(),
            )),
        }
    }

    /// Extract the algorithm and its IV from a parsed identifier.
    pub fn from_algorithm_identifier(id: &AlgorithmIdentifier) -> Result<(Self, Vec<u8>), Error> {
        let alg = Self::try_from(&id.algorithm)?;

        let params = id.parameters.as_ref().ok_or_else(|| {
            Error::Cipher("content encryption algorithm is missing its IV parameter".into())
        })?;

        let iv = Constructed::decode(params.as_slice(), Mode::Ber, |cons| {
            OctetString::take_from(cons)
        })?;
        let iv = iv.to_bytes().to_vec();

        if iv.len() != alg.iv_len() {
            return Err(Error::Cipher(format!(
                "unexpected IV length {} for {:?}",
                iv.len(),
                alg
            )));
        }

        Ok((alg, iv))
    }
}

impl TryFrom<&Oid> for ContentEncryptionAlgorithm {
    type Error = Error;

    fn try_from(v: &Oid) -> Result<Self, Self::Error> {
        if v == &OID_DES_EDE3_CBC {
            Ok(Self::TripleDesCbc)
        } else if v == &OID_AES128_CBC {
            Ok(Self::Aes128Cbc)
        } else if v == &OID_AES192_CBC {
            Ok(Self::Aes192Cbc)
        } else if v == &OID_AES256_CBC {
            Ok(Self::Aes256Cbc)
        } else {
            Err(Error::UnknownContentEncryptionAlgorithm(v.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micalg_round_trip() {
        for alg in [
            DigestAlgorithm::Md2,
            DigestAlgorithm::Md4,
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha224,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
            DigestAlgorithm::RipeMd160,
            DigestAlgorithm::DoubleSha,
            DigestAlgorithm::Tiger192,
            DigestAlgorithm::Haval5160,
        ] {
            let name = alg.micalg_name().unwrap();
            assert_eq!(DigestAlgorithm::from_micalg(name), alg, "{}", name);
        }
    }

    #[test]
    fn micalg_is_case_insensitive_and_accepts_dashed_names() {
        assert_eq!(
            DigestAlgorithm::from_micalg("SHA256"),
            DigestAlgorithm::Sha256
        );
        assert_eq!(
            DigestAlgorithm::from_micalg("sha-256"),
            DigestAlgorithm::Sha256
        );
        assert_eq!(DigestAlgorithm::from_micalg("Sha-1"), DigestAlgorithm::Sha1);
    }

    #[test]
    fn unknown_micalg_maps_to_none() {
        assert_eq!(
            DigestAlgorithm::from_micalg("whirlpool"),
            DigestAlgorithm::None
        );
    }

    #[test]
    fn micalg_name_rejects_none() {
        assert!(matches!(
            DigestAlgorithm::None.micalg_name(),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn digest_oid_not_supported_set() {
        for alg in [
            DigestAlgorithm::RipeMd160,
            DigestAlgorithm::DoubleSha,
            DigestAlgorithm::Tiger192,
            DigestAlgorithm::Haval5160,
        ] {
            assert!(matches!(alg.digest_oid(), Err(Error::NotSupported(_))));
        }

        assert!(matches!(
            DigestAlgorithm::None.digest_oid(),
            Err(Error::OutOfRange(_))
        ));

        for alg in [
            DigestAlgorithm::Md2,
            DigestAlgorithm::Md4,
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha224,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert!(alg.digest_oid().is_ok(), "{:?}", alg);
        }
    }

    #[test]
    fn digest_oid_round_trip() {
        for alg in [
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha512,
        ] {
            let oid = alg.digest_oid().unwrap();
            assert_eq!(DigestAlgorithm::try_from(&oid).unwrap(), alg);
        }
    }

    #[test]
    fn sha256_hasher_matches_known_vector() {
        let mut hasher = DigestAlgorithm::Sha256.as_hasher().unwrap();
        hasher.update(b"abc");
        assert_eq!(
            hex::encode(hasher.finish()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn md5_hasher_matches_known_vector() {
        let mut hasher = DigestAlgorithm::Md5.as_hasher().unwrap();
        hasher.update(b"abc");
        assert_eq!(hex::encode(hasher.finish()), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn triple_des_round_trip() {
        let key = [0x11u8; 24];
        let iv = [0x22u8; 8];
        let plaintext = b"attack at dawn";

        let alg = ContentEncryptionAlgorithm::TripleDesCbc;
        let ciphertext = alg.encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(&ciphertext, plaintext);
        assert_eq!(ciphertext.len() % 8, 0);

        let decrypted = alg.decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aes_round_trip() {
        let key = [0x42u8; 32];
        let iv = [9u8; 16];
        let plaintext = vec![7u8; 100];

        let alg = ContentEncryptionAlgorithm::Aes256Cbc;
        let ciphertext = alg.encrypt(&key, &iv, &plaintext).unwrap();
        let decrypted = alg.decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn content_encryption_identifier_round_trip() {
        let iv = [3u8; 8];
        let id = ContentEncryptionAlgorithm::TripleDesCbc.algorithm_identifier(&iv);

        let (alg, parsed_iv) = ContentEncryptionAlgorithm::from_algorithm_identifier(&id).unwrap();
        assert_eq!(alg, ContentEncryptionAlgorithm::TripleDesCbc);
        assert_eq!(parsed_iv, iv);
    }
}
