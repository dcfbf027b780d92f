// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The operating-system certificate store backend.

Reads the host certificate store under its well-known logical names:
`My` (personal certificates and private keys), `AddressBook`,
`TrustedPeople` and `Root`. Certificate import lands in `AddressBook`;
PKCS #12 import lands in `My`; CRL import is accepted and dropped,
because the system store offers no sensible CRL slot through this API.

Only Windows exposes such a store. The type exists on every platform so
the backend dispatch stays uniform, but construction fails off-Windows.
*/

#[cfg(windows)]
use {
    crate::store::file::parse_pkcs12,
    log::warn,
    schannel::{
        cert_context::CertContext,
        cert_store::{CertAdd, CertStore, PfxImportOptions},
    },
};

use crate::{
    certificate::{Certificate, CertificateSelector, Crl, TrustAnchor},
    store::PrivateKey,
    Error,
};

/// Logical store names searched for certificates, in order.
#[cfg(windows)]
const SEARCH_ORDER: [&str; 4] = ["My", "AddressBook", "TrustedPeople", "Root"];

/// The host operating system's certificate store.
pub struct OsStore {
    _priv: (),
}

#[cfg(windows)]
impl OsStore {
    pub fn new() -> Result<Self, Error> {
        Ok(Self { _priv: () })
    }

    fn open(name: &str) -> Result<CertStore, Error> {
        CertStore::open_current_user(name).map_err(Error::Io)
    }

    fn certificates_in(name: &str) -> Result<Vec<Certificate>, Error> {
        let store = Self::open(name)?;
        let mut certs = Vec::new();

        for context in store.certs() {
            match Certificate::from_der(context.to_der()) {
                Ok(cert) => certs.push(cert),
                // The system store holds certificates from every era;
                // ones this crate cannot model are not its business.
                Err(_) => continue,
            }
        }

        Ok(certs)
    }

    pub fn get_certificate(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<Certificate>, Error> {
        for name in SEARCH_ORDER {
            for cert in Self::certificates_in(name)? {
                if selector.matches(&cert) {
                    return Ok(Some(cert));
                }
            }
        }

        Ok(None)
    }

    pub fn get_private_key(
        &self,
        selector: &CertificateSelector,
    ) -> Result<Option<PrivateKey>, Error> {
        let store = Self::open("My")?;

        for context in store.certs() {
            let cert = match Certificate::from_der(context.to_der()) {
                Ok(cert) => cert,
                Err(_) => continue,
            };

            if !selector.matches(&cert) {
                continue;
            }

            // The certificate is flagged as having an associated key when
            // acquisition succeeds; the key itself stays in the system
            // key container and is not exportable as PKCS #8 material.
            if context.private_key().silent(true).acquire().is_ok() {
                warn!(
                    "certificate in the system store has a private key, \
                     but system-held keys are not exportable"
                );
            }

            return Ok(None);
        }

        Ok(None)
    }

    pub fn get_trusted_anchors(&self) -> Result<Vec<TrustAnchor>, Error> {
        let mut anchors: Vec<TrustAnchor> = Vec::new();

        for cert in Self::certificates_in("Root")? {
            let anchor = TrustAnchor::new(cert);

            if !anchors.contains(&anchor) {
                anchors.push(anchor);
            }
        }

        Ok(anchors)
    }

    pub fn get_intermediates(&self) -> Result<Vec<Certificate>, Error> {
        let mut certs = Self::certificates_in("AddressBook")?;
        certs.extend(Self::certificates_in("TrustedPeople")?);

        Ok(certs)
    }

    pub fn get_crls(&self) -> Result<Vec<Crl>, Error> {
        // CRLs never enter this backend (import is a no-op), so
        // revocation stays unarmed for contexts over the system store.
        Ok(Vec::new())
    }

    pub fn import_certificate(&self, cert: &Certificate) -> Result<(), Error> {
        let der = cert.as_der()?;
        let context = CertContext::new(&der).map_err(Error::Io)?;

        let mut store = Self::open("AddressBook")?;
        store
            .add_cert(&context, CertAdd::UseExisting)
            .map_err(Error::Io)?;

        Ok(())
    }

    pub fn import_crl(&self, _crl: &Crl) -> Result<(), Error> {
        // Accepted and dropped; see the module docs.
        warn!("CRL import into the system store is not implemented; ignoring");
        Ok(())
    }

    pub fn import_pkcs12(&self, data: &[u8], password: &str) -> Result<(), Error> {
        // Validate the archive and password before touching the store.
        parse_pkcs12(data, password)?;

        let mut options = PfxImportOptions::new();
        options.password(password);
        let imported = options.import(data).map_err(Error::Io)?;

        let mut my = Self::open("My")?;

        for context in imported.certs() {
            my.add_cert(&context, CertAdd::ReplaceExisting)
                .map_err(Error::Io)?;
        }

        Ok(())
    }
}

#[cfg(not(windows))]
impl OsStore {
    pub fn new() -> Result<Self, Error> {
        Err(Self::unsupported())
    }

    fn unsupported() -> Error {
        Error::NotSupported("the system certificate store is only available on Windows".into())
    }

    pub fn get_certificate(
        &self,
        _selector: &CertificateSelector,
    ) -> Result<Option<Certificate>, Error> {
        Err(Self::unsupported())
    }

    pub fn get_private_key(
        &self,
        _selector: &CertificateSelector,
    ) -> Result<Option<PrivateKey>, Error> {
        Err(Self::unsupported())
    }

    pub fn get_trusted_anchors(&self) -> Result<Vec<TrustAnchor>, Error> {
        Err(Self::unsupported())
    }

    pub fn get_intermediates(&self) -> Result<Vec<Certificate>, Error> {
        Err(Self::unsupported())
    }

    pub fn get_crls(&self) -> Result<Vec<Crl>, Error> {
        Err(Self::unsupported())
    }

    pub fn import_certificate(&self, _cert: &Certificate) -> Result<(), Error> {
        Err(Self::unsupported())
    }

    pub fn import_crl(&self, _crl: &Crl) -> Result<(), Error> {
        Err(Self::unsupported())
    }

    pub fn import_pkcs12(&self, _data: &[u8], _password: &str) -> Result<(), Error> {
        Err(Self::unsupported())
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn construction_is_unsupported_off_windows() {
        assert!(matches!(OsStore::new(), Err(Error::NotSupported(_))));
    }
}
