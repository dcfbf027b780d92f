// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! X.509 certification path building.

Given a leaf certificate, a pool of candidate intermediates, CRLs and a
set of trust anchors, assemble a chain from the leaf to an anchor or
explain why none exists.

Validation follows the chain validity model: the leaf is judged at the
reference instant (the asserted signing time when one exists, otherwise
now), while every issuer only needs to have been valid at the moment it
issued the next link. An expired root therefore still anchors an old
archived signature, which strict shell-model validation would reject.

Revocation checking turns on when, and only when, the locally
configured CRL collection is non-empty. CRLs embedded in a message
never enable it on their own: a sender who controls the message must
not be able to choose whether revocation is consulted.
*/

use {
    crate::certificate::{revocation_reason, Certificate, Crl, Fingerprint, TrustAnchor},
    chrono::{DateTime, Utc},
    log::warn,
};

/// Why no path could be built from a leaf to a trust anchor.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PathBuildError {
    #[error("the signer certificate could not be located")]
    SignerCertificateNotFound,

    #[error("no issuer found for {subject}")]
    NoIssuer { subject: String },

    #[error("no path terminates at a trusted anchor")]
    NoTrustAnchor,

    #[error("{subject} carries an invalid issuer signature")]
    BadSignature { subject: String },

    #[error("{subject} is not yet valid at the reference time")]
    NotYetValid { subject: String },

    #[error("{subject} is expired at the reference time")]
    Expired { subject: String },

    #[error("certificate {serial} is revoked (reason {reason:?})")]
    Revoked { serial: String, reason: Option<u8> },

    #[error("path length limit exceeded")]
    DepthExceeded,

    #[error("certificate handling failed: {0}")]
    Internal(String),
}

/// A validated certification path, leaf first, anchor last.
pub type CertificatePath = Vec<Certificate>;

const MAX_PATH_DEPTH: usize = 10;

/// Builds validated certification paths.
pub struct PathBuilder {
    anchors: Vec<TrustAnchor>,
    pool: Vec<Certificate>,
    local_crls: Vec<Crl>,
    embedded_crls: Vec<Crl>,
}

impl PathBuilder {
    /// Start from a snapshot of the trust anchor set.
    ///
    /// The anchors are captured once; mutations of the underlying store
    /// during a verification do not affect an in-flight build.
    pub fn new(anchors: Vec<TrustAnchor>) -> Self {
        Self {
            anchors,
            pool: Vec::new(),
            local_crls: Vec::new(),
            embedded_crls: Vec::new(),
        }
    }

    /// Add candidate intermediates (local store plus embedded certificates).
    pub fn intermediates(mut self, certs: impl IntoIterator<Item = Certificate>) -> Self {
        self.pool.extend(certs);
        self
    }

    /// Add the locally configured CRLs.
    ///
    /// A non-empty collection here is what arms revocation checking.
    pub fn local_crls(mut self, crls: impl IntoIterator<Item = Crl>) -> Self {
        self.local_crls.extend(crls);
        self
    }

    /// Add CRLs embedded in the message being verified.
    ///
    /// These participate in lookups once revocation is armed but never
    /// arm it themselves.
    pub fn embedded_crls(mut self, crls: impl IntoIterator<Item = Crl>) -> Self {
        self.embedded_crls.extend(crls);
        self
    }

    /// Whether revocation checking is armed.
    pub fn revocation_enabled(&self) -> bool {
        !self.local_crls.is_empty()
    }

    /// Build a validated path from `leaf` to one of the anchors.
    ///
    /// `signing_time`, when present, is the instant the leaf is judged
    /// at; archived signatures stay verifiable after their certificates
    /// expire.
    pub fn build(
        &self,
        leaf: &Certificate,
        signing_time: Option<DateTime<Utc>>,
    ) -> Result<CertificatePath, PathBuildError> {
        let reference = signing_time.unwrap_or_else(Utc::now);

        self.check_validity(leaf, reference)?;
        self.check_revocation(leaf)?;

        let mut chain: Vec<Certificate> = vec![leaf.clone()];
        let mut seen: Vec<Fingerprint> = vec![fingerprint(leaf)?];

        loop {
            if chain.len() > MAX_PATH_DEPTH {
                return Err(PathBuildError::DepthExceeded);
            }

            let current = chain.last().expect("chain is never empty").clone();

            // An anchor in the chain terminates the build. Anchors are
            // exempt from validity checks at the reference instant; what
            // matters is that they were valid when they issued the next
            // link, which check_issuance established before they were
            // pushed.
            if self.is_anchor(&current)? {
                return Ok(chain);
            }

            if current.is_self_signed() {
                // A self-signed certificate that is not an anchor ends the
                // search with nothing to show for it.
                return Err(PathBuildError::NoTrustAnchor);
            }

            // Anchors first: a path that can stop is preferred to one
            // that wanders through cross-signed intermediates.
            let anchor_issuer = self
                .anchors
                .iter()
                .map(|anchor| anchor.certificate())
                .find(|cand| self.check_issuance(&current, cand).is_ok());

            let issuer = match anchor_issuer {
                Some(issuer) => issuer,
                None => match self
                    .pool
                    .iter()
                    .filter(|cand| {
                        fingerprint(cand)
                            .map(|fp| !seen.contains(&fp))
                            .unwrap_or(false)
                    })
                    .find(|cand| self.check_issuance(&current, cand).is_ok())
                {
                    Some(issuer) => issuer,
                    None => {
                        // Distinguish "nobody claims this subject" from
                        // "claimants exist but fail checks".
                        return Err(self.explain_failure(&current));
                    }
                },
            };

            self.check_revocation(issuer)?;

            seen.push(fingerprint(issuer)?);
            chain.push(issuer.clone());
        }
    }

    fn is_anchor(&self, cert: &Certificate) -> Result<bool, PathBuildError> {
        let fp = fingerprint(cert)?;

        for anchor in &self.anchors {
            if fingerprint(anchor.certificate())? == fp {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Check that `issuer` plausibly issued `child`: name chaining, a
    /// valid signature, and issuer validity at the child's issuance.
    fn check_issuance(&self, child: &Certificate, issuer: &Certificate) -> Result<(), PathBuildError> {
        if child.issuer() != issuer.subject() {
            return Err(PathBuildError::NoIssuer {
                subject: subject_label(child),
            });
        }

        child
            .verify_signed_by(issuer)
            .map_err(|_| PathBuildError::BadSignature {
                subject: subject_label(child),
            })?;

        // Chain validity: the issuer must have been valid when the child
        // was issued, not necessarily at the reference instant.
        let issued_at = child.not_before();
        if issued_at < issuer.not_before() {
            return Err(PathBuildError::NotYetValid {
                subject: subject_label(issuer),
            });
        }
        if issued_at > issuer.not_after() {
            return Err(PathBuildError::Expired {
                subject: subject_label(issuer),
            });
        }

        Ok(())
    }

    fn check_validity(
        &self,
        cert: &Certificate,
        reference: DateTime<Utc>,
    ) -> Result<(), PathBuildError> {
        if reference < cert.not_before() {
            return Err(PathBuildError::NotYetValid {
                subject: subject_label(cert),
            });
        }

        if reference > cert.not_after() {
            return Err(PathBuildError::Expired {
                subject: subject_label(cert),
            });
        }

        Ok(())
    }

    fn check_revocation(&self, cert: &Certificate) -> Result<(), PathBuildError> {
        if !self.revocation_enabled() {
            return Ok(());
        }

        for crl in self.local_crls.iter().chain(self.embedded_crls.iter()) {
            if crl.issuer() != cert.issuer() {
                continue;
            }

            // An unauthenticated CRL must not revoke anything; it is
            // ignored when its signer cannot be found or fails to check
            // out.
            if let Some(authority) = self.find_crl_authority(crl) {
                if crl.verify_signed_by(authority).is_err() {
                    warn!(
                        "ignoring CRL from {:?}: signature does not verify",
                        crl.issuer()
                    );
                    continue;
                }
            } else {
                warn!("ignoring CRL from {:?}: no authority certificate", crl.issuer());
                continue;
            }

            if let Some(entry) = crl.lookup(cert.serial_number()) {
                return Err(PathBuildError::Revoked {
                    serial: format!("{:?}", cert.serial_number()),
                    reason: revocation_reason(entry),
                });
            }
        }

        Ok(())
    }

    fn find_crl_authority(&self, crl: &Crl) -> Option<&Certificate> {
        self.anchors
            .iter()
            .map(|anchor| anchor.certificate())
            .chain(self.pool.iter())
            .find(|cert| cert.subject() == crl.issuer())
    }

    /// A leaf with candidate issuers that all failed checks deserves a
    /// better error than "no issuer".
    fn explain_failure(&self, current: &Certificate) -> PathBuildError {
        let candidates = self
            .anchors
            .iter()
            .map(|anchor| anchor.certificate())
            .chain(self.pool.iter())
            .filter(|cand| cand.subject() == current.issuer())
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return PathBuildError::NoIssuer {
                subject: subject_label(current),
            };
        }

        for cand in candidates {
            if let Err(err) = self.check_issuance(current, cand) {
                return err;
            }
        }

        PathBuildError::NoTrustAnchor
    }
}

fn fingerprint(cert: &Certificate) -> Result<Fingerprint, PathBuildError> {
    cert.fingerprint()
        .map_err(|e| PathBuildError::Internal(e.to_string()))
}

fn subject_label(cert: &Certificate) -> String {
    cert.subject_common_name()
        .unwrap_or_else(|| format!("serial {:?}", cert.serial_number()))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::testutil, chrono::Duration};

    fn builder(authority: &testutil::Authority) -> PathBuilder {
        PathBuilder::new(vec![TrustAnchor::new(authority.certificate().clone())])
    }

    #[test]
    fn leaf_chains_to_trusted_root() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");

        let chain = builder(&authority).build(&alice, None).unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].subject(), alice.subject());
        assert_eq!(chain[1].subject(), authority.certificate().subject());
    }

    #[test]
    fn self_signed_anchor_is_a_complete_path() {
        let authority = testutil::authority();

        let chain = builder(&authority)
            .build(authority.certificate(), None)
            .unwrap();

        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn untrusted_leaf_reports_missing_issuer() {
        let trusted = testutil::authority();
        let rogue = testutil::authority_named("Rogue CA");
        let mallory = rogue.issue_leaf("Mallory", "mallory@example.com");

        let err = builder(&trusted).build(&mallory, None).unwrap_err();
        assert!(matches!(err, PathBuildError::NoIssuer { .. }));
    }

    #[test]
    fn expired_leaf_fails_at_now_but_verifies_at_signing_time() {
        let authority = testutil::authority();
        let expired = authority.issue_expired_leaf("Old Alice", "alice@example.com");

        let err = builder(&authority).build(&expired, None).unwrap_err();
        assert!(matches!(err, PathBuildError::Expired { .. }));

        // At the time the message claims to have been signed, the
        // certificate was still good.
        let then = expired.not_after() - Duration::days(1);
        builder(&authority).build(&expired, Some(then)).unwrap();
    }

    #[test]
    fn issuer_not_yet_valid_at_issuance_is_reported() {
        let now = Utc::now();

        // A root whose validity only starts next year cannot have issued
        // a certificate that claims to exist today.
        let future = testutil::authority_with_window(
            "Future CA",
            now + Duration::days(365),
            now + Duration::days(3650),
        );
        let leaf = future.issue_leaf("Alice", "alice@example.com");

        let err = builder(&future).build(&leaf, None).unwrap_err();
        assert!(matches!(err, PathBuildError::NotYetValid { .. }), "{err}");
    }

    #[test]
    fn revocation_requires_local_crls() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let crl = authority.revoke(&[&alice]);

        // Embedded alone: revocation stays off and the path builds.
        let pb = builder(&authority).embedded_crls([crl.clone()]);
        assert!(!pb.revocation_enabled());
        pb.build(&alice, None).unwrap();

        // Local CRLs arm the check.
        let pb = builder(&authority).local_crls([crl]);
        assert!(pb.revocation_enabled());
        let err = pb.build(&alice, None).unwrap_err();
        assert!(matches!(err, PathBuildError::Revoked { .. }));
    }

    #[test]
    fn unrelated_crl_does_not_revoke() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let bob = authority.issue_leaf("Bob", "bob@example.com");

        let crl = authority.revoke(&[&bob]);

        builder(&authority).local_crls([crl]).build(&alice, None).unwrap();
    }

    #[test]
    fn revoked_reason_is_carried() {
        let authority = testutil::authority();
        let alice = authority.issue_leaf("Alice", "alice@example.com");
        let crl = authority.revoke(&[&alice]);

        let err = builder(&authority)
            .local_crls([crl])
            .build(&alice, None)
            .unwrap_err();

        match err {
            PathBuildError::Revoked { reason, .. } => {
                assert_eq!(reason, Some(testutil::REASON_KEY_COMPROMISE));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
