// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! High-level X.509 certificate and CRL interfaces. */

use {
    crate::{
        algorithm::SignatureAlgorithm,
        asn1::{
            rfc3280::{
                take_general_names_from, GeneralName, Name, OID_COMMON_NAME, OID_EMAIL_ADDRESS,
            },
            rfc5280::{
                self, RevokedCertificate, OID_EXTENSION_CRL_REASON, OID_EXTENSION_KEY_USAGE,
                OID_EXTENSION_SUBJECT_ALT_NAME, OID_EXTENSION_SUBJECT_KEY_ID,
            },
            rfc5652::{CertificateChoices, IssuerAndSerialNumber},
        },
        Error,
    },
    bcder::{
        decode::Constructed,
        encode::Values,
        BitString, Integer, Mode, OctetString, Oid,
    },
    std::{
        convert::{TryFrom, TryInto},
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
    },
};

/// Defines an X.509 certificate used for signing or encrypting mail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Certificate {
    /// The certificate's serial number.
    ///
    /// We need to store an ASN.1 primitive because ASN.1 integers are
    /// unbounded.
    serial_number: Integer,

    /// Subject of this certificate, as parsed ASN.1.
    subject: Name,

    /// Issuer of this certificate, as parsed ASN.1.
    issuer: Name,

    /// The public key for this certificate.
    public_key: CertificatePublicKey,

    /// The parsed ASN.1 certificate backing this instance.
    raw_cert: rfc5280::Certificate,
}

impl Certificate {
    /// Obtain an instance from an already parsed ASN.1 data structure.
    pub fn from_parsed_asn1(cert: rfc5280::Certificate) -> Result<Self, Error> {
        Ok(Self {
            serial_number: cert.tbs_certificate.serial_number.clone(),
            subject: cert.tbs_certificate.subject.clone(),
            issuer: cert.tbs_certificate.issuer.clone(),
            public_key: (&cert.tbs_certificate.subject_public_key_info).try_into()?,
            raw_cert: cert,
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, Error> {
        let cert = Constructed::decode(data, Mode::Der, |cons| {
            rfc5280::Certificate::take_from(cons)
        })?;

        Self::from_parsed_asn1(cert)
    }

    pub fn from_pem(data: &[u8]) -> Result<Self, Error> {
        let pem = pem::parse(data)?;

        Self::from_der(&pem.contents)
    }

    /// Parse PEM data potentially containing multiple certificate records.
    pub fn from_pem_multiple(data: impl AsRef<[u8]>) -> Result<Vec<Self>, Error> {
        pem::parse_many(data)?
            .into_iter()
            .filter(|pem| pem.tag == "CERTIFICATE")
            .map(|pem| Self::from_der(&pem.contents))
            .collect::<Result<Vec<_>, Error>>()
    }

    /// The serial number of this certificate.
    pub fn serial_number(&self) -> &Integer {
        &self.serial_number
    }

    /// The subject of this certificate.
    pub fn subject(&self) -> &Name {
        &self.subject
    }

    /// The issuer of this certificate.
    pub fn issuer(&self) -> &Name {
        &self.issuer
    }

    /// Obtain the public key associated with this certificate.
    pub fn public_key(&self) -> &CertificatePublicKey {
        &self.public_key
    }

    /// Obtain the parsed certificate data structure backing this instance.
    pub fn raw_certificate(&self) -> &rfc5280::Certificate {
        &self.raw_cert
    }

    /// The subject common name, when one is present and decodable.
    pub fn subject_common_name(&self) -> Option<String> {
        self.subject.find_attribute_string(&OID_COMMON_NAME)
    }

    /// Every email address bound to this certificate.
    ///
    /// rfc822Name entries of the subject alternative name extension come
    /// first; the legacy emailAddress attribute of the subject DN is the
    /// fallback, which is how mail software has matched certificates to
    /// senders since PKIX deprecated DN-borne addresses.
    pub fn emails(&self) -> Vec<String> {
        let mut emails = Vec::new();

        if let Some(ext) = self.raw_cert.find_extension(&OID_EXTENSION_SUBJECT_ALT_NAME) {
            let data = ext.value.to_bytes();

            if let Ok(names) = Constructed::decode(data.as_ref(), Mode::Der, |cons| {
                take_general_names_from(cons)
            }) {
                for name in names {
                    if let GeneralName::Rfc822Name(address) = name {
                        emails.push(address);
                    }
                }
            }
        }

        if emails.is_empty() {
            if let Some(address) = self.subject.find_attribute_string(&OID_EMAIL_ADDRESS) {
                emails.push(address);
            }
        }

        emails
    }

    /// Whether this certificate is bound to the given address.
    pub fn matches_address(&self, address: &str) -> bool {
        self.emails()
            .iter()
            .any(|email| email.eq_ignore_ascii_case(address))
    }

    /// Whether the certified key may be used for key encipherment.
    ///
    /// A certificate without a key usage extension poses no restriction.
    pub fn allows_key_encipherment(&self) -> bool {
        match self.raw_cert.find_extension(&OID_EXTENSION_KEY_USAGE) {
            Some(ext) => {
                let data = ext.value.to_bytes();

                match Constructed::decode(data.as_ref(), Mode::Der, |cons| {
                    BitString::take_from(cons)
                }) {
                    // keyEncipherment is bit 2, MSB first.
                    Ok(bits) => bits
                        .octet_bytes()
                        .first()
                        .map(|b| b & 0x20 != 0)
                        .unwrap_or(false),
                    Err(_) => false,
                }
            }
            None => true,
        }
    }

    /// The subject key identifier extension value, when present.
    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        let ext = self.raw_cert.find_extension(&OID_EXTENSION_SUBJECT_KEY_ID)?;
        let data = ext.value.to_bytes();

        Constructed::decode(data.as_ref(), Mode::Der, |cons| OctetString::take_from(cons))
            .ok()
            .map(|os| os.to_bytes().to_vec())
    }

    /// When this certificate becomes valid.
    pub fn not_before(&self) -> chrono::DateTime<chrono::Utc> {
        *self
            .raw_cert
            .tbs_certificate
            .validity
            .not_before
            .as_ref()
    }

    /// When this certificate stops being valid.
    pub fn not_after(&self) -> chrono::DateTime<chrono::Utc> {
        *self.raw_cert.tbs_certificate.validity.not_after.as_ref()
    }

    /// Whether the certificate is self-signed.
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// The SHA-256 fingerprint of the DER encoding.
    pub fn fingerprint(&self) -> Result<Fingerprint, Error> {
        let der = self.as_der()?;

        Ok(Fingerprint(
            ring::digest::digest(&ring::digest::SHA256, &der)
                .as_ref()
                .to_vec(),
        ))
    }

    /// Serialize this certificate to DER.
    pub fn as_der(&self) -> Result<Vec<u8>, Error> {
        let mut res = Vec::<u8>::new();

        self.raw_cert
            .encode_ref()
            .write_encoded(Mode::Der, &mut res)?;

        Ok(res)
    }

    /// Serialize this certificate to PEM.
    pub fn as_pem(&self) -> Result<String, Error> {
        Ok(pem::encode(&pem::Pem {
            tag: "CERTIFICATE".to_string(),
            contents: self.as_der()?,
        }))
    }

    /// Verifies the signature of this certificate against an issuer's key.
    ///
    /// For a self-signed certificate, pass `self`.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), Error> {
        let spki = &issuer.raw_cert.tbs_certificate.subject_public_key_info;

        // Prefer the bytes the signer actually covered. A constructed
        // instance that never saw a parse is re-encoded in DER, which is
        // what its builder signed.
        let tbs_data = match &self.raw_cert.tbs_certificate.raw_data {
            Some(data) => data.clone(),
            None => {
                let mut data = Vec::new();
                self.raw_cert
                    .tbs_certificate
                    .encode_ref()
                    .write_encoded(Mode::Der, &mut data)?;
                data
            }
        };

        let signature_algorithm = SignatureAlgorithm::try_from(&self.raw_cert.signature_algorithm)?;
        let verify_algorithm =
            signature_algorithm.as_verification_algorithm(crate::DigestAlgorithm::Sha256)?;

        let key = ring::signature::UnparsedPublicKey::new(
            verify_algorithm,
            spki.subject_public_key.octet_bytes(),
        );
        let signature = self.raw_cert.signature.octet_bytes();

        key.verify(&tbs_data, signature.as_ref())
            .map_err(|_| Error::SignatureVerification)
    }
}

impl TryFrom<&CertificateChoices> for Certificate {
    type Error = Error;

    fn try_from(cert: &CertificateChoices) -> Result<Self, Self::Error> {
        match cert {
            CertificateChoices::Certificate(cert) => Self::from_parsed_asn1((**cert).clone()),
            CertificateChoices::Other(_) => Err(Error::UnknownCertificateFormat),
        }
    }
}

impl From<&Certificate> for IssuerAndSerialNumber {
    fn from(cert: &Certificate) -> Self {
        Self {
            issuer: cert.issuer.clone(),
            serial_number: cert.serial_number.clone(),
        }
    }
}

/// Describes a public key in an X.509 certificate key pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificatePublicKey {
    /// Key algorithm.
    pub algorithm: CertificateKeyAlgorithm,

    /// Raw public key data (the BIT STRING payload of the SPKI).
    pub key: Vec<u8>,
}

impl TryFrom<&rfc5280::SubjectPublicKeyInfo> for CertificatePublicKey {
    type Error = Error;

    fn try_from(info: &rfc5280::SubjectPublicKeyInfo) -> Result<Self, Self::Error> {
        let algorithm = CertificateKeyAlgorithm::try_from(&info.algorithm)?;
        let key = info.subject_public_key.octet_bytes().to_vec();

        Ok(Self { algorithm, key })
    }
}

/// The algorithm family of a certified public key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CertificateKeyAlgorithm {
    /// RSA, OID 1.2.840.113549.1.1.1.
    Rsa,

    /// Elliptic curve, OID 1.2.840.10045.2.1.
    Ec,

    /// Ed25519, OID 1.3.101.112.
    Ed25519,
}

impl TryFrom<&Oid> for CertificateKeyAlgorithm {
    type Error = Error;

    fn try_from(v: &Oid) -> Result<Self, Self::Error> {
        if v == &crate::algorithm::OID_RSA {
            Ok(Self::Rsa)
        } else if v == &crate::algorithm::OID_EC_PUBLIC_KEY {
            Ok(Self::Ec)
        } else if v == &crate::algorithm::OID_ED25519 {
            Ok(Self::Ed25519)
        } else {
            Err(Error::UnknownSignatureAlgorithm(v.clone()))
        }
    }
}

impl TryFrom<&rfc5280::AlgorithmIdentifier> for CertificateKeyAlgorithm {
    type Error = Error;

    fn try_from(v: &rfc5280::AlgorithmIdentifier) -> Result<Self, Self::Error> {
        Self::try_from(&v.algorithm)
    }
}

/// A SHA-256 digest identifying a certificate or CRL.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// A trust anchor: a certificate accepted as a path root without further
/// verification, with optional encoded name constraints.
#[derive(Clone, Debug)]
pub struct TrustAnchor {
    certificate: Certificate,
    name_constraints: Option<Vec<u8>>,
}

impl TrustAnchor {
    pub fn new(certificate: Certificate) -> Self {
        Self {
            certificate,
            name_constraints: None,
        }
    }

    pub fn with_name_constraints(certificate: Certificate, constraints: Vec<u8>) -> Self {
        Self {
            certificate,
            name_constraints: Some(constraints),
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn name_constraints(&self) -> Option<&[u8]> {
        self.name_constraints.as_deref()
    }
}

impl PartialEq for TrustAnchor {
    fn eq(&self, other: &Self) -> bool {
        match (self.certificate.fingerprint(), other.certificate.fingerprint()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TrustAnchor {}

impl Hash for TrustAnchor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Ok(fingerprint) = self.certificate.fingerprint() {
            fingerprint.as_bytes().hash(state);
        }
    }
}

impl From<Certificate> for TrustAnchor {
    fn from(certificate: Certificate) -> Self {
        Self::new(certificate)
    }
}

/// A certificate revocation list.
#[derive(Clone, Debug)]
pub struct Crl {
    raw: rfc5280::CertificateList,

    /// DER image this instance was parsed from, kept so store imports and
    /// CMS embedding do not depend on lossless re-encoding.
    der: Vec<u8>,
}

impl Crl {
    pub fn from_der(data: &[u8]) -> Result<Self, Error> {
        let raw = rfc5280::CertificateList::decode_der(data)?;

        Ok(Self {
            raw,
            der: data.to_vec(),
        })
    }

    pub fn from_parsed_asn1(raw: rfc5280::CertificateList) -> Result<Self, Error> {
        let mut der = Vec::new();
        raw.encode_ref().write_encoded(Mode::Der, &mut der)?;

        Ok(Self { raw, der })
    }

    pub fn raw_certificate_list(&self) -> &rfc5280::CertificateList {
        &self.raw
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// The DN of the authority this list belongs to.
    pub fn issuer(&self) -> &Name {
        &self.raw.tbs_cert_list.issuer
    }

    pub fn this_update(&self) -> chrono::DateTime<chrono::Utc> {
        *self.raw.tbs_cert_list.this_update.as_ref()
    }

    pub fn next_update(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.raw
            .tbs_cert_list
            .next_update
            .as_ref()
            .map(|t| *t.as_ref())
    }

    /// Find the revocation entry for a serial number, if one exists.
    pub fn lookup(&self, serial: &Integer) -> Option<&RevokedCertificate> {
        self.raw
            .tbs_cert_list
            .revoked_certificates
            .iter()
            .find(|entry| &entry.user_certificate == serial)
    }

    /// The SHA-256 fingerprint of the DER encoding.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(
            ring::digest::digest(&ring::digest::SHA256, &self.der)
                .as_ref()
                .to_vec(),
        )
    }

    /// Verifies the signature of this CRL against the issuing authority.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), Error> {
        let spki = &issuer.raw_certificate().tbs_certificate.subject_public_key_info;

        let tbs_data = match &self.raw.tbs_cert_list.raw_data {
            Some(data) => data.clone(),
            None => {
                let mut data = Vec::new();
                self.raw
                    .tbs_cert_list
                    .encode_ref()
                    .write_encoded(Mode::Der, &mut data)?;
                data
            }
        };

        let signature_algorithm = SignatureAlgorithm::try_from(&self.raw.signature_algorithm)?;
        let verify_algorithm =
            signature_algorithm.as_verification_algorithm(crate::DigestAlgorithm::Sha256)?;

        let key = ring::signature::UnparsedPublicKey::new(
            verify_algorithm,
            spki.subject_public_key.octet_bytes(),
        );
        let signature = self.raw.signature.octet_bytes();

        key.verify(&tbs_data, signature.as_ref())
            .map_err(|_| Error::SignatureVerification)
    }
}

/// The RFC 5280 CRLReason value attached to a revocation entry, if any.
pub fn revocation_reason(entry: &RevokedCertificate) -> Option<u8> {
    let extensions = entry.crl_entry_extensions.as_ref()?;
    let ext = extensions.iter().find(|x| x.id == OID_EXTENSION_CRL_REASON)?;
    let data = ext.value.to_bytes();

    // The value is a DER ENUMERATED: tag, length 1, code.
    if data.len() == 3 && data[1] == 1 {
        Some(data[2])
    } else {
        None
    }
}

/// Identifies one certificate in a store or a parsed CMS payload.
///
/// Backends index on these directly, which is why this is a closed sum
/// instead of a predicate trait.
#[derive(Clone, Debug)]
pub enum CertificateSelector {
    /// Match on the subject distinguished name.
    BySubject(Name),

    /// Match on issuer distinguished name and serial number.
    ByIssuerSerial(Name, Integer),

    /// Match on the subject key identifier extension.
    BySki(Vec<u8>),

    /// Match on a bound email address, case-insensitively.
    ByEmail(String),
}

impl CertificateSelector {
    pub fn matches(&self, cert: &Certificate) -> bool {
        match self {
            Self::BySubject(subject) => cert.subject() == subject,
            Self::ByIssuerSerial(issuer, serial) => {
                certificate_is_subset_of(serial, issuer, cert.serial_number(), cert.issuer())
            }
            Self::BySki(ski) => cert
                .subject_key_identifier()
                .map(|id| &id == ski)
                .unwrap_or(false),
            Self::ByEmail(address) => cert.matches_address(address),
        }
    }
}

impl From<&IssuerAndSerialNumber> for CertificateSelector {
    fn from(id: &IssuerAndSerialNumber) -> Self {
        Self::ByIssuerSerial(id.issuer.clone(), id.serial_number.clone())
    }
}

/// Whether one certificate identity is a subset of another.
///
/// This returns true iff the two have the same serial number and every
/// `Name` attribute in the first is present in the other. Non-exact
/// matching tolerates candidate certificates carrying extra RDN fields.
pub fn certificate_is_subset_of(
    a_serial: &Integer,
    a_name: &Name,
    b_serial: &Integer,
    b_name: &Name,
) -> bool {
    if a_serial != b_serial {
        return false;
    }

    let Name::RdnSequence(a_sequence) = &a_name;
    let Name::RdnSequence(b_sequence) = &b_name;

    a_sequence.iter().all(|rdn| b_sequence.contains(rdn))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil};

    #[test]
    fn email_extraction_prefers_san() {
        let authority = testutil::authority();
        let cert = authority.issue_leaf("Alice", "alice@example.com");

        assert_eq!(cert.emails(), vec!["alice@example.com".to_string()]);
        assert!(cert.matches_address("ALICE@example.com"));
        assert!(!cert.matches_address("mallory@example.com"));
        assert_eq!(cert.subject_common_name().as_deref(), Some("Alice"));
    }

    #[test]
    fn der_round_trip() {
        let authority = testutil::authority();
        let cert = authority.issue_leaf("Alice", "alice@example.com");

        let der = cert.as_der().unwrap();
        let reparsed = Certificate::from_der(&der).unwrap();

        assert_eq!(reparsed.subject(), cert.subject());
        assert_eq!(reparsed.serial_number(), cert.serial_number());
        assert_eq!(reparsed.emails(), cert.emails());
    }

    #[test]
    fn pem_round_trip_multiple() {
        let authority = testutil::authority();
        let a = authority.issue_leaf("Alice", "alice@example.com");
        let b = authority.issue_leaf("Bob", "bob@example.com");

        let bundle = format!("{}{}", a.as_pem().unwrap(), b.as_pem().unwrap());
        let certs = Certificate::from_pem_multiple(bundle.as_bytes()).unwrap();

        assert_eq!(certs.len(), 2);
        assert!(certs[0].matches_address("alice@example.com"));
        assert!(certs[1].matches_address("bob@example.com"));
    }

    #[test]
    fn issued_certificate_verifies_against_issuer() {
        let authority = testutil::authority();
        let cert = authority.issue_leaf("Alice", "alice@example.com");

        cert.verify_signed_by(authority.certificate()).unwrap();
        authority
            .certificate()
            .verify_signed_by(authority.certificate())
            .unwrap();
    }

    #[test]
    fn selector_matching() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let bob = authority.issue_leaf("Bob", "bob@example.com");

        let by_email = CertificateSelector::ByEmail("alice@example.com".into());
        assert!(by_email.matches(&alice));
        assert!(!by_email.matches(&bob));

        let by_subject = CertificateSelector::BySubject(alice.subject().clone());
        assert!(by_subject.matches(&alice));
        assert!(!by_subject.matches(&bob));

        let by_issuer_serial = CertificateSelector::ByIssuerSerial(
            alice.issuer().clone(),
            alice.serial_number().clone(),
        );
        assert!(by_issuer_serial.matches(&alice));
        assert!(!by_issuer_serial.matches(&bob));
    }

    #[test]
    fn crl_lookup_and_reason() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let bob = authority.issue_leaf("Bob", "bob@example.com");

        let crl = authority.revoke(&[&alice]);

        assert!(crl.lookup(alice.serial_number()).is_some());
        assert!(crl.lookup(bob.serial_number()).is_none());

        let entry = crl.lookup(alice.serial_number()).unwrap();
        assert_eq!(revocation_reason(entry), Some(testutil::REASON_KEY_COMPROMISE));
    }

    #[test]
    fn crl_der_round_trip() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let crl = authority.revoke(&[&alice]);

        let reparsed = Crl::from_der(crl.as_der()).unwrap();
        assert!(reparsed.lookup(alice.serial_number()).is_some());
        assert_eq!(reparsed.fingerprint(), crl.fingerprint());
    }

    #[test]
    fn trust_anchor_set_semantics() {
        let authority = testutil::authority();
        let anchor_a = TrustAnchor::new(authority.certificate().clone());
        let anchor_b = TrustAnchor::new(authority.certificate().clone());

        let mut set = std::collections::HashSet::new();
        set.insert(anchor_a);
        set.insert(anchor_b);
        assert_eq!(set.len(), 1);
    }
}
