use ecdsa::signature::Signer as _;
use pkcs8::{
    der::pem::PemLabel as _, DecodePrivateKey as _, EncodePrivateKey as _, ObjectIdentifier,
    PrivateKeyInfo, SecretDocument,
};
use rsa::{
    signature::{SignatureEncoding as _, Signer as _},
    traits::PublicKeyParts as _,
};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{jws::Jwk, Error, Result};

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Private key of an account.
#[derive(Clone, Debug)]
pub(crate) enum KeyPair {
    /// Signs with `ES256`.
    P256(p256::ecdsa::SigningKey),

    /// Signs with `ES384`.
    P384(p384::ecdsa::SigningKey),

    /// Signs with `RS256` (RSASSA-PKCS1-v1_5 using SHA-256).
    Rsa(Box<rsa::RsaPrivateKey>),
}

/// Account identity: the key pair plus the key ID once the account exists.
#[derive(Clone, Debug)]
pub(crate) struct AcmeKey {
    key: KeyPair,

    /// Set once we contacted the ACME API to figure out the key ID.
    key_id: Option<String>,
}

impl AcmeKey {
    pub(crate) fn new() -> AcmeKey {
        Self::from_key(KeyPair::P256(crate::create_p256_key()))
    }

    /// Reads a PKCS#8 PEM encoded RSA, P-256 or P-384 key.
    pub(crate) fn from_pem(pem: &str) -> Result<AcmeKey> {
        let (label, doc) =
            SecretDocument::from_pem(pem).map_err(|err| Error::Key(err.to_string()))?;
        PrivateKeyInfo::validate_pem_label(label).map_err(|err| Error::Key(err.to_string()))?;

        Self::from_pkcs8_der(doc.as_bytes())
    }

    pub(crate) fn from_pkcs8_der(der: &[u8]) -> Result<AcmeKey> {
        let info = PrivateKeyInfo::try_from(der)?;
        let oid = info.algorithm.oid;

        let key = if oid == RSA_ENCRYPTION {
            KeyPair::Rsa(Box::new(rsa::RsaPrivateKey::from_pkcs8_der(der)?))
        } else if oid == EC_PUBLIC_KEY {
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|err| Error::Key(err.to_string()))?;

            if curve == SECP256R1 {
                KeyPair::P256(p256::ecdsa::SigningKey::from_pkcs8_der(der)?)
            } else if curve == SECP384R1 {
                KeyPair::P384(p384::ecdsa::SigningKey::from_pkcs8_der(der)?)
            } else {
                return Err(Error::UnsupportedKeyType(format!("EC curve {curve}")));
            }
        } else {
            return Err(Error::UnsupportedKeyType(oid.to_string()));
        };

        Ok(Self::from_key(key))
    }

    pub(crate) fn from_key(key: KeyPair) -> AcmeKey {
        AcmeKey { key, key_id: None }
    }

    pub(crate) fn to_pem(&self) -> Result<Zeroizing<String>> {
        let encoded = match &self.key {
            KeyPair::P256(key) => key.to_pkcs8_pem(pem::LineEnding::LF),
            KeyPair::P384(key) => key.to_pkcs8_pem(pem::LineEnding::LF),
            KeyPair::Rsa(key) => key.to_pkcs8_pem(pem::LineEnding::LF),
        };

        Ok(encoded?)
    }

    /// JWS algorithm matching the key type.
    pub(crate) fn alg(&self) -> &'static str {
        match self.key {
            KeyPair::P256(_) => "ES256",
            KeyPair::P384(_) => "ES384",
            KeyPair::Rsa(_) => "RS256",
        }
    }

    /// Signs `msg`, producing the raw JWS signature bytes.
    ///
    /// ECDSA signatures are the fixed size `r || s` concatenation required by [RFC 7518 §3.4].
    ///
    /// [RFC 7518 §3.4]: https://datatracker.ietf.org/doc/html/rfc7518#section-3.4
    pub(crate) fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let sig_err = |err: ecdsa::Error| Error::Key(err.to_string());

        let signature = match &self.key {
            KeyPair::P256(key) => {
                let sig: p256::ecdsa::Signature = key.try_sign(msg).map_err(sig_err)?;
                sig.to_bytes().to_vec()
            }
            KeyPair::P384(key) => {
                let sig: p384::ecdsa::Signature = key.try_sign(msg).map_err(sig_err)?;
                sig.to_bytes().to_vec()
            }
            KeyPair::Rsa(key) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.as_ref().clone());
                signer
                    .try_sign(msg)
                    .map_err(|err| Error::Key(err.to_string()))?
                    .to_vec()
            }
        };

        Ok(signature)
    }

    /// Public half of the key as a JWK.
    pub(crate) fn jwk(&self) -> Result<Jwk> {
        match &self.key {
            KeyPair::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let (x, y) = (point.x().map(|x| x.as_slice()), point.y().map(|y| y.as_slice()));
                Jwk::ec(self.alg(), "P-256", x, y)
            }
            KeyPair::P384(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let (x, y) = (point.x().map(|x| x.as_slice()), point.y().map(|y| y.as_slice()));
                Jwk::ec(self.alg(), "P-384", x, y)
            }
            KeyPair::Rsa(key) => Ok(Jwk::rsa(
                self.alg(),
                &key.n().to_bytes_be(),
                &key.e().to_bytes_be(),
            )),
        }
    }

    pub(crate) fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid)
    }
}
