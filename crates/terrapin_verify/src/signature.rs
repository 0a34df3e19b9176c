//! OpenPGP verification of the detached signature over the sums document.
//!
//! The registry response names the keys the release may be signed with. Each
//! key is tried in turn: a key that did not issue the signature is skipped,
//! a matching key must verify. A successful verification is then classified
//! against the configured trust roots: signed by an official root, signed by
//! a key the partner root vouches for, or community-signed.

use std::io::Cursor;

use pgp::{
    composed::{Deserializable, SignedPublicKey, StandaloneSignature},
    types::KeyTrait,
};
use terrapin_registry::GpgPublicKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("the registry supplied a signing key that is not valid ASCII armor")]
    MalformedKey(#[source] pgp::errors::Error),

    #[error("the checksum signature could not be parsed")]
    MalformedSignature(#[source] pgp::errors::Error),

    #[error("none of the registry's signing keys issued the checksum signature")]
    UnknownIssuer,

    #[error("checksum signature verification failed")]
    BadSignature(#[source] pgp::errors::Error),

    #[error("the trust signature of key {key_id} could not be verified")]
    BadTrustSignature {
        key_id: String,
        #[source]
        source: pgp::errors::Error,
    },

    #[error("a configured trust root is not valid ASCII armor")]
    MalformedTrustRoot(#[source] pgp::errors::Error),
}

/// Who vouches for a verified signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedBy {
    Official,
    Partner,
    Community,
}

/// The keyrings signatures are classified against. Both roots are optional;
/// without them every valid signature classifies as community.
#[derive(Debug, Default)]
pub struct TrustRoots {
    official: Vec<SignedPublicKey>,
    partner: Vec<SignedPublicKey>,
}

impl TrustRoots {
    /// Builds trust roots from armored key material.
    pub fn from_armor(
        official: Option<&str>,
        partner: Option<&str>,
    ) -> Result<Self, SignatureError> {
        let parse = |armor: Option<&str>| -> Result<Vec<SignedPublicKey>, SignatureError> {
            armor
                .map(|armor| {
                    SignedPublicKey::from_string(armor)
                        .map(|(key, _)| vec![key])
                        .map_err(SignatureError::MalformedTrustRoot)
                })
                .unwrap_or_else(|| Ok(Vec::new()))
        };
        Ok(Self {
            official: parse(official)?,
            partner: parse(partner)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.official.is_empty() && self.partner.is_empty()
    }
}

/// Verifies the detached `signature` over `document` with the registry's
/// `keys` and classifies the result against `roots`.
pub fn verify_detached(
    document: &[u8],
    signature: &[u8],
    keys: &[GpgPublicKey],
    roots: &TrustRoots,
) -> Result<SignedBy, SignatureError> {
    let signature = parse_signature(signature)?;
    let mut unknown_issuer_only = true;

    for registry_key in keys {
        let (key, _) = SignedPublicKey::from_string(&registry_key.ascii_armor)
            .map_err(SignatureError::MalformedKey)?;

        if !key_matches_issuer(&key, &signature) {
            continue;
        }
        unknown_issuer_only = false;

        verify_with_keyring(&signature, &key, document)
            .map_err(SignatureError::BadSignature)?;

        if let Some(expiry) = key.expires_at() {
            if expiry < chrono::Utc::now() {
                tracing::warn!(
                    key_id = %registry_key.key_id,
                    "the signing key has expired; accepting the signature anyway"
                );
            }
        }

        return classify(&signature, registry_key, document, roots);
    }

    Err(SignatureError::UnknownIssuer)
}

fn parse_signature(bytes: &[u8]) -> Result<StandaloneSignature, SignatureError> {
    match StandaloneSignature::from_bytes(Cursor::new(bytes)) {
        Ok(signature) => Ok(signature),
        Err(binary_err) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|armor| StandaloneSignature::from_string(armor).ok())
            .map(|(signature, _)| signature)
            .ok_or(SignatureError::MalformedSignature(binary_err)),
    }
}

/// Whether `key` (or one of its subkeys) issued `signature`. A signature
/// without issuer information matches any key and is left to verification.
fn key_matches_issuer(key: &SignedPublicKey, signature: &StandaloneSignature) -> bool {
    let issuers: Vec<_> = signature.signature.issuer().into_iter().collect();
    if issuers.is_empty() {
        return true;
    }
    issuers.iter().any(|issuer| {
        **issuer == key.key_id()
            || key
                .public_subkeys
                .iter()
                .any(|subkey| **issuer == subkey.key_id())
    })
}

fn verify_with_keyring(
    signature: &StandaloneSignature,
    key: &SignedPublicKey,
    document: &[u8],
) -> Result<(), pgp::errors::Error> {
    match signature.verify(key, document) {
        Ok(()) => Ok(()),
        Err(primary_err) => {
            for subkey in &key.public_subkeys {
                if signature.verify(subkey, document).is_ok() {
                    return Ok(());
                }
            }
            Err(primary_err)
        }
    }
}

fn classify(
    signature: &StandaloneSignature,
    registry_key: &GpgPublicKey,
    document: &[u8],
    roots: &TrustRoots,
) -> Result<SignedBy, SignatureError> {
    // Signed directly by an official root?
    for root in &roots.official {
        if verify_with_keyring(signature, root, document).is_ok() {
            return Ok(SignedBy::Official);
        }
    }

    // A partner key carries a trust signature over its own armor, issued by
    // the partner root.
    if !registry_key.trust_signature.is_empty() && !roots.partner.is_empty() {
        let (trust_signature, _) = StandaloneSignature::from_string(&registry_key.trust_signature)
            .map_err(SignatureError::MalformedSignature)?;
        let mut last_err = None;
        for root in &roots.partner {
            match verify_with_keyring(&trust_signature, root, registry_key.ascii_armor.as_bytes())
            {
                Ok(()) => return Ok(SignedBy::Partner),
                Err(source) => last_err = Some(source),
            }
        }
        if let Some(source) = last_err {
            return Err(SignatureError::BadTrustSignature {
                key_id: registry_key.key_id.clone(),
                source,
            });
        }
    }

    Ok(SignedBy::Community)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use terrapin_registry::GpgPublicKey;

    use super::{verify_detached, SignatureError, TrustRoots};

    #[test]
    fn rejects_garbage_signatures() {
        assert_matches!(
            verify_detached(b"doc", b"not a signature", &[], &TrustRoots::default()),
            Err(SignatureError::MalformedSignature(_))
        );
    }

    #[test]
    fn empty_trust_roots_are_empty() {
        let roots = TrustRoots::from_armor(None, None).unwrap();
        assert!(roots.is_empty());
    }

    #[test]
    fn rejects_garbage_trust_roots() {
        assert_matches!(
            TrustRoots::from_armor(Some("not armor"), None),
            Err(SignatureError::MalformedTrustRoot(_))
        );
    }

    #[test]
    fn malformed_registry_keys_are_fatal() {
        // A syntactically valid signature is required before keys are looked
        // at, so feed the error path through the armored branch.
        let keys = [GpgPublicKey {
            key_id: "DEADBEEF".to_owned(),
            ascii_armor: "garbage".to_owned(),
            ..GpgPublicKey::default()
        }];
        let result = verify_detached(b"doc", b"garbage", &keys, &TrustRoots::default());
        assert!(result.is_err());
    }
}
