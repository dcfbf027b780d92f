// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The default file-backed certificate store.

Four well-known files under a per-user directory hold everything:

* `addressbook.crt`: correspondent certificates (intermediates included)
* `root.crt`: trust anchors
* `revoked.crl`: CRLs
* `user.p12`: the user's own certificates and private keys

Certificate and CRL bundles are concatenations of DER records or PEM
blocks; both forms are read, PEM is written. Every operation opens the
backing files, works, and lets them close: the store keeps no state
between calls, so two contexts over the same directory observe each
other's imports. Writers serialize on an advisory lock file and land
their changes with a write-new-then-rename so a crash never truncates
a bundle.
*/

use {
    crate::{
        certificate::{Certificate, CertificateSelector, Crl, TrustAnchor},
        store::PrivateKey,
        Error,
    },
    fs2::FileExt,
    log::{debug, warn},
    std::{
        fs,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Locations of the four backing files.
#[derive(Clone, Debug)]
pub struct FileStorePaths {
    pub addressbook: PathBuf,
    pub root: PathBuf,
    pub revoked: PathBuf,
    pub user: PathBuf,
}

impl FileStorePaths {
    /// The conventional file names under a containing directory.
    pub fn under(dir: &Path) -> Self {
        Self {
            addressbook: dir.join("addressbook.crt"),
            root: dir.join("root.crt"),
            revoked: dir.join("revoked.crl"),
            user: dir.join("user.p12"),
        }
    }

    /// The per-user default directory: `%APPDATA%/mimekit` on Windows,
    /// `$HOME/.mimekit` elsewhere.
    pub fn default_paths() -> Result<Self, Error> {
        #[cfg(windows)]
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::NotSupported("no application data directory".into()))?
            .join("mimekit");

        #[cfg(not(windows))]
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::NotSupported("no home directory".into()))?
            .join(".mimekit");

        Ok(Self::under(&dir))
    }
}

/// The file-backed store.
pub struct FileStore {
    paths: FileStorePaths,
    password: String,
}

impl FileStore {
    /// Open a store over explicit paths.
    ///
    /// The containing directory of the address book is created so a
    /// first import does not fail on a fresh account.
    pub fn open(paths: FileStorePaths, password: &str) -> Result<Self, Error> {
        if let Some(dir) = paths.addressbook.parent() {
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            paths,
            password: password.to_string(),
        })
    }

    /// Open the store at its default per-user location.
    pub fn open_default(password: &str) -> Result<Self, Error> {
        Self::open(FileStorePaths::default_paths()?, password)
    }

    pub fn paths(&self) -> &FileStorePaths {
        &self.paths
    }

    pub fn get_certificate(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<Certificate>, Error> {
        // Personal certificates first, then correspondents, then roots:
        // the user's own certificate wins when an address appears twice.
        let (user_certs, _) = self.load_user_archive()?;

        for cert in user_certs
            .into_iter()
            .chain(read_certificate_bundle(&self.paths.addressbook)?)
            .chain(read_certificate_bundle(&self.paths.root)?)
        {
            if selector.matches(&cert) {
                return Ok(Some(cert));
            }
        }

        Ok(None)
    }

    pub fn get_private_key(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<PrivateKey>, Error> {
        let (certs, keys) = self.load_user_archive()?;

        let cert = match certs.iter().find(|cert| selector.matches(cert)) {
            Some(cert) => cert,
            None => return Ok(None),
        };

        if let Some(key) = keys.iter().find(|key| key.matches_certificate(cert)) {
            return Ok(Some(key.clone()));
        }

        // A single-key archive pairs implicitly; anything richer without
        // a public-key match is ambiguous and yields nothing.
        if keys.len() == 1 {
            return Ok(Some(keys[0].clone()));
        }

        Ok(None)
    }

    pub fn get_trusted_anchors(&self) -> Result<Vec<TrustAnchor>, Error> {
        let mut anchors: Vec<TrustAnchor> = Vec::new();

        for cert in read_certificate_bundle(&self.paths.root)? {
            let anchor = TrustAnchor::new(cert);

            if !anchors.contains(&anchor) {
                anchors.push(anchor);
            }
        }

        Ok(anchors)
    }

    pub fn get_intermediates(&self) -> Result<Vec<Certificate>, Error> {
        let (user_certs, _) = self.load_user_archive()?;
        let mut certs = read_certificate_bundle(&self.paths.addressbook)?;
        certs.extend(user_certs);

        Ok(certs)
    }

    pub fn get_crls(&self) -> Result<Vec<Crl>, Error> {
        read_crl_bundle(&self.paths.revoked)
    }

    pub fn import_certificate(&self, cert: &Certificate) -> Result<(), Error> {
        let _guard = self.write_lock()?;

        let mut certs = read_certificate_bundle(&self.paths.addressbook)?;
        let fingerprint = cert.fingerprint()?;

        for existing in &certs {
            if existing.fingerprint()? == fingerprint {
                debug!("certificate {} already in address book", fingerprint);
                return Ok(());
            }
        }

        certs.push(cert.clone());

        let mut bundle = String::new();
        for cert in &certs {
            bundle.push_str(&cert.as_pem()?);
        }

        write_atomically(&self.paths.addressbook, bundle.as_bytes())?;
        debug!("imported certificate {} into address book", fingerprint);

        Ok(())
    }

    pub fn import_crl(&self, crl: &Crl) -> Result<(), Error> {
        let _guard = self.write_lock()?;

        let mut crls = read_crl_bundle(&self.paths.revoked)?;
        let fingerprint = crl.fingerprint();

        if crls.iter().any(|existing| existing.fingerprint() == fingerprint) {
            debug!("CRL {} already present", fingerprint);
            return Ok(());
        }

        crls.push(crl.clone());

        let mut bundle = String::new();
        for crl in &crls {
            bundle.push_str(&pem::encode(&pem::Pem {
                tag: "X509 CRL".to_string(),
                contents: crl.as_der().to_vec(),
            }));
        }

        write_atomically(&self.paths.revoked, bundle.as_bytes())?;
        debug!("imported CRL {}", fingerprint);

        Ok(())
    }

    /// Install a PKCS #12 archive as the user's personal bundle.
    ///
    /// The archive's MAC is verified against the password before
    /// anything touches disk; the archive then replaces `user.p12`
    /// wholesale. The password becomes the one subsequent operations on
    /// this store instance must have been opened with.
    pub fn import_pkcs12(&self, data: &[u8], password: &str) -> Result<(), Error> {
        let (certs, _keys) = parse_pkcs12(data, password)?;

        if certs.is_empty() {
            return Err(Error::Pkcs12("archive contains no certificates".into()));
        }

        let _guard = self.write_lock()?;
        write_atomically(&self.paths.user, data)?;

        debug!("installed PKCS #12 archive with {} certificate(s)", certs.len());

        Ok(())
    }

    fn load_user_archive(&self) -> Result<(Vec<Certificate>, Vec<PrivateKey>), Error> {
        if !self.paths.user.exists() {
            return Ok((Vec::new(), Vec::new()));
        }

        let data = fs::read(&self.paths.user)?;

        parse_pkcs12(&data, &self.password)
    }

    /// Take the advisory writer lock for the store directory.
    ///
    /// Readers proceed without it; concurrent writers queue up here.
    /// The lock releases when the returned handle drops, including on
    /// error paths.
    fn write_lock(&self) -> Result<fs::File, Error> {
        let lock_path = self
            .paths
            .addressbook
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".mimekit.lock");

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;

        file.lock_exclusive()?;

        Ok(file)
    }
}

/// Read a bundle of certificates, accepting PEM blocks or raw
/// concatenated DER. A missing file is an empty bundle.
fn read_certificate_bundle(path: &Path) -> Result<Vec<Certificate>, Error> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if looks_like_pem(&data) {
        Certificate::from_pem_multiple(&data)
    } else {
        let raw = bcder::decode::Constructed::decode(data.as_slice(), bcder::Mode::Ber, |cons| {
            let mut certs = Vec::new();

            while let Some(cert) = crate::asn1::rfc5280::Certificate::take_opt_from(cons)? {
                certs.push(cert);
            }

            Ok(certs)
        })?;

        raw.into_iter()
            .map(Certificate::from_parsed_asn1)
            .collect::<Result<Vec<_>, Error>>()
    }
}

/// Read a bundle of CRLs, accepting PEM blocks or raw concatenated DER.
fn read_crl_bundle(path: &Path) -> Result<Vec<Crl>, Error> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if looks_like_pem(&data) {
        pem::parse_many(&data)?
            .into_iter()
            .filter(|block| block.tag == "X509 CRL")
            .map(|block| Crl::from_der(&block.contents))
            .collect()
    } else {
        let raw = bcder::decode::Constructed::decode(data.as_slice(), bcder::Mode::Ber, |cons| {
            let mut crls = Vec::new();

            while let Some(crl) = crate::asn1::rfc5280::CertificateList::take_opt_from(cons)? {
                crls.push(crl);
            }

            Ok(crls)
        })?;

        raw.into_iter().map(Crl::from_parsed_asn1).collect()
    }
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.starts_with(b"-----")
        || data
            .windows(b"-----BEGIN".len())
            .any(|window| window == b"-----BEGIN")
}

/// Replace a file's contents via a sibling temporary and a rename, so a
/// crash mid-write leaves either the old bundle or the new one.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;

    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;

    Ok(())
}

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

/// Parse a PKCS #12 archive into its certificates and private keys.
///
/// The MAC is checked against the password first, so a wrong password
/// is reported as such rather than as a garbled-bag parse error.
pub(crate) fn parse_pkcs12(
    data: &[u8],
    password: &str,
) -> Result<(Vec<Certificate>, Vec<PrivateKey>), Error> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| Error::Pkcs12(format!("data does not appear to be PKCS #12: {:?}", e)))?;

    if !pfx.verify_mac(password) {
        return Err(Error::Pkcs12BadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(Error::Pkcs12("unexpected outer content info".into()));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| Error::Pkcs12(format!("failed parsing inner ContentInfo: {:?}", e)))?;

    let bmp_password = bmp_string(password);

    let mut certificates = Vec::new();
    let mut keys = Vec::new();

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    Error::Pkcs12("failed decrypting inner EncryptedData".into())
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(Error::Pkcs12("unexpected inner content info".into()));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| Error::Pkcs12(format!("failed parsing SafeBag: {:?}", e)))?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(cert_bag) => match cert_bag {
                    p12::CertBag::X509(cert_data) => {
                        certificates.push(Certificate::from_der(&cert_data)?);
                    }
                    p12::CertBag::SDSI(_) => {
                        warn!("skipping SDSI certificate bag in PKCS #12 archive");
                    }
                },
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        Error::Pkcs12("failed decrypting shrouded key bag".into())
                    })?;

                    keys.push(PrivateKey::from_pkcs8_der(decrypted));
                }
                _ => {
                    warn!("skipping unrecognized bag in PKCS #12 archive");
                }
            }
        }
    }

    Ok((certificates, keys))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store::SubjectIdentifierType, testutil, DigestAlgorithm, Mailbox},
    };

    fn store_in(dir: &Path) -> FileStore {
        FileStore::open(FileStorePaths::under(dir), "password").unwrap()
    }

    #[test]
    fn missing_files_are_empty_collections() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.get_trusted_anchors().unwrap().is_empty());
        assert!(store.get_intermediates().unwrap().is_empty());
        assert!(store.get_crls().unwrap().is_empty());
        assert!(store
            .get_certificate(&CertificateSelector::ByEmail("alice@example.com".into()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn imported_certificate_resolves_as_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        store.import_certificate(&alice).unwrap();

        let found = store
            .get_certificate(&CertificateSelector::ByEmail("alice@example.com".into()))
            .unwrap()
            .unwrap();

        assert_eq!(found.fingerprint().unwrap(), alice.fingerprint().unwrap());

        let wrapped = crate::CertificateStore::File(store_in(dir.path()));
        let recipient = wrapped
            .get_cms_recipient(&Mailbox::from("alice@example.com"))
            .unwrap();
        assert_eq!(
            recipient.certificate.fingerprint().unwrap(),
            alice.fingerprint().unwrap()
        );
        assert_eq!(
            recipient.identifier_type,
            SubjectIdentifierType::IssuerAndSerialNumber
        );
    }

    #[test]
    fn duplicate_imports_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        store.import_certificate(&alice).unwrap();
        let first = fs::read(&store.paths().addressbook).unwrap();

        store.import_certificate(&alice).unwrap();
        let second = fs::read(&store.paths().addressbook).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn der_bundle_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let a = authority.issue_leaf("Alice", "alice@example.com");
        let b = authority.issue_leaf("Bob", "bob@example.com");

        let mut raw = a.as_der().unwrap();
        raw.extend(b.as_der().unwrap());
        fs::write(&store.paths().addressbook, raw).unwrap();

        let certs = store.get_intermediates().unwrap();
        assert_eq!(certs.len(), 2);
    }

    #[test]
    fn crl_import_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let crl = authority.revoke(&[&alice]);

        store.import_crl(&crl).unwrap();
        store.import_crl(&crl).unwrap();

        let crls = store.get_crls().unwrap();
        assert_eq!(crls.len(), 1);
        assert!(crls[0].lookup(alice.serial_number()).is_some());
    }

    #[test]
    fn trusted_anchors_deduplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let root_pem = authority.certificate().as_pem().unwrap();

        fs::write(&store.paths().root, format!("{root_pem}{root_pem}")).unwrap();

        assert_eq!(store.get_trusted_anchors().unwrap().len(), 1);
    }

    #[test]
    fn pkcs12_archive_supplies_signer_material() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let archive = testutil::pkcs12_bundle(&alice, "password");

        store.import_pkcs12(&archive, "password").unwrap();

        let key = store
            .get_private_key(&CertificateSelector::ByEmail("alice@example.com".into()))
            .unwrap();
        assert!(key.is_some());

        let wrapped = crate::CertificateStore::File(store_in(dir.path()));
        let signer = wrapped
            .get_cms_signer(&Mailbox::from("alice@example.com"), DigestAlgorithm::Sha256)
            .unwrap();
        assert_eq!(signer.digest_algorithm, DigestAlgorithm::Sha256);
    }

    #[test]
    fn pkcs12_wrong_password_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let archive = testutil::pkcs12_bundle(&alice, "password");

        assert!(matches!(
            store.import_pkcs12(&archive, "wrong"),
            Err(Error::Pkcs12BadPassword)
        ));
    }
}
