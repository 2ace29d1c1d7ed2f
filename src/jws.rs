//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use hmac::{Hmac, Mac as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{acc::AcmeKey, Error, Result};

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// This field MUST NOT contain "none" or a Message Authentication Code (MAC) algorithm (e.g.
    /// one in which the algorithm registry description mentions MAC/HMAC).
    alg: String,

    /// A unique value that enables the verifier of a JWS to recognize when replay has occurred.
    ///
    /// As defined in [RFC 8555 §6.5].
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    nonce: String,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// > The "url" header parameter specifies the URL (RFC 3986) to which this JWS object is
    /// directed. The "url" header parameter MUST be carried in the protected header of the JWS. The
    /// value of the "url" header parameter MUST be a string representing the target URL.
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    /// Embeds the public key until the account has a key ID, then only sends the ID.
    pub(crate) fn new(key: &AcmeKey, url: &str, nonce: String) -> Result<Self> {
        let (jwk, kid) = match key.key_id() {
            Some(kid) => (None, Some(kid.to_owned())),
            None => (Some(key.jwk()?), None),
        };

        Ok(JwsProtectedHeader {
            alg: key.alg().to_owned(),
            url: url.to_owned(),
            nonce,
            jwk,
            kid,
        })
    }
}

/// Protected header of an external account binding, see [RFC 8555 §7.3.4].
///
/// Signed with the MAC key issued by the CA, so there is no nonce and no `jwk`.
///
/// [RFC 8555 §7.3.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.4
#[derive(Debug, Serialize, Deserialize)]
struct EabProtectedHeader {
    alg: String,
    kid: String,
    url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub(crate) enum Jwk {
    Ec {
        alg: String,
        crv: String,
        kty: String,
        #[serde(rename = "use")]
        _use: String,
        x: String,
        y: String,
    },
    Rsa {
        alg: String,
        kty: String,
        #[serde(rename = "use")]
        _use: String,
        n: String,
        e: String,
    },
}

impl Jwk {
    pub(crate) fn ec(alg: &str, crv: &str, x: Option<&[u8]>, y: Option<&[u8]>) -> Result<Self> {
        let (Some(x), Some(y)) = (x, y) else {
            return Err(Error::Key("EC public key is not an affine point".to_owned()));
        };

        Ok(Jwk::Ec {
            alg: alg.to_owned(),
            crv: crv.to_owned(),
            kty: "EC".to_owned(),
            _use: "sig".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        })
    }

    pub(crate) fn rsa(alg: &str, n: &[u8], e: &[u8]) -> Self {
        Jwk::Rsa {
            alg: alg.to_owned(),
            kty: "RSA".to_owned(),
            _use: "sig".to_owned(),
            n: BASE64_URL_SAFE_NO_PAD.encode(n),
            e: BASE64_URL_SAFE_NO_PAD.encode(e),
        }
    }

    /// JWK thumbprint as defined in [RFC 7638].
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub(crate) fn thumbprint(&self) -> Result<[u8; 32]> {
        let json = serde_json::to_string(&JwkThumb::from(self))?;
        Ok(Sha256::digest(json).into())
    }
}

/// Required members of a JWK only.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
// LEXICAL ORDER OF FIELDS MATTER!
enum JwkThumb {
    Ec {
        crv: String,
        kty: String,
        x: String,
        y: String,
    },
    Rsa {
        e: String,
        kty: String,
        n: String,
    },
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        match a {
            Jwk::Ec { crv, kty, x, y, .. } => JwkThumb::Ec {
                crv: crv.clone(),
                kty: kty.clone(),
                x: x.clone(),
                y: y.clone(),
            },
            Jwk::Rsa { kty, n, e, .. } => JwkThumb::Rsa {
                e: e.clone(),
                kty: kty.clone(),
                n: n.clone(),
            },
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    pub(crate) protected: String,
    pub(crate) payload: String,
    pub(crate) signature: String,
}

impl FlattenedJsonJws {
    pub(crate) fn new(protected: String, payload: String, signature: String) -> Self {
        FlattenedJsonJws {
            protected,
            payload,
            signature,
        }
    }
}

/// Signs `payload` for `url` with the account key, consuming `nonce`.
pub(crate) fn sign<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AcmeKey,
    payload: &T,
) -> Result<FlattenedJsonJws> {
    let protected = JwsProtectedHeader::new(key, url, nonce)?;
    let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(&protected)?);

    let payload = {
        let payload_json = serde_json::to_string(payload)?;

        // POST-as-GET: `EmptyString` signs an empty payload rather than an encoded `""`.
        if payload_json == "\"\"" {
            String::new()
        } else {
            BASE64_URL_SAFE_NO_PAD.encode(payload_json)
        }
    };

    let to_sign = format!("{header}.{payload}");
    let signature = BASE64_URL_SAFE_NO_PAD.encode(key.sign(to_sign.as_bytes())?);

    Ok(FlattenedJsonJws::new(header, payload, signature))
}

/// Signs the external account binding for a newAccount request to `url`.
///
/// The payload is the account's public JWK, MACed with HS256 under the CA-issued `hmac_key`.
pub(crate) fn sign_external_account_binding(
    url: &str,
    kid: &str,
    hmac_key: &[u8],
    key: &AcmeKey,
) -> Result<FlattenedJsonJws> {
    let protected = EabProtectedHeader {
        alg: "HS256".to_owned(),
        kid: kid.to_owned(),
        url: url.to_owned(),
    };

    let header = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(&protected)?);
    let payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_string(&key.jwk()?)?);

    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|err| Error::Key(format!("EAB MAC key: {err}")))?;
    mac.update(format!("{header}.{payload}").as_bytes());
    let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(FlattenedJsonJws::new(header, payload, signature))
}

/// Key authorization for a challenge token, see [RFC 8555 §8.1].
///
/// `token || '.' || base64url(JWK_Thumbprint(accountKey))`. Identical for every challenge type.
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub(crate) fn key_authorization(token: &str, key: &AcmeKey) -> Result<String> {
    let thumbprint = key.jwk()?.thumbprint()?;
    let digest = BASE64_URL_SAFE_NO_PAD.encode(thumbprint);
    Ok(format!("{token}.{digest}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ecdsa::signature::Verifier as _;

    use super::*;
    use crate::api;

    const RSA_PEM: &str = include_str!("testdata/rsa2048.pem");
    const P384_PEM: &str = include_str!("testdata/p384.pem");

    fn decode_header(jws: &FlattenedJsonJws) -> serde_json::Value {
        let json = BASE64_URL_SAFE_NO_PAD.decode(&jws.protected).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn header_embeds_jwk_until_key_id_is_known() {
        let mut key = AcmeKey::new();

        let jws = sign("https://ca.test/new-acct", "n1".to_owned(), &key, &api::EmptyObject).unwrap();
        let header = decode_header(&jws);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["url"], "https://ca.test/new-acct");
        assert_eq!(header["nonce"], "n1");
        assert_eq!(header["jwk"]["kty"], "EC");
        assert!(header.get("kid").is_none());

        key.set_key_id("https://ca.test/acct/1".to_owned());
        let jws = sign("https://ca.test/order/1", "n2".to_owned(), &key, &api::EmptyString).unwrap();
        let header = decode_header(&jws);
        assert_eq!(header["kid"], "https://ca.test/acct/1");
        assert!(header.get("jwk").is_none());
        assert_eq!(jws.payload, "");
    }

    #[test]
    fn es256_signature_verifies() {
        let signing_key = crate::create_p256_key();
        let verifying_key = *signing_key.verifying_key();
        let key = AcmeKey::from_key(crate::acc::KeyPair::P256(signing_key));

        let jws = sign("https://ca.test/x", "n".to_owned(), &key, &api::EmptyObject).unwrap();
        let sig = BASE64_URL_SAFE_NO_PAD.decode(&jws.signature).unwrap();
        let sig = p256::ecdsa::Signature::from_slice(&sig).unwrap();

        let signed = format!("{}.{}", jws.protected, jws.payload);
        verifying_key.verify(signed.as_bytes(), &sig).unwrap();
    }

    #[test]
    fn header_algorithm_matches_key() {
        let rsa = AcmeKey::from_pem(RSA_PEM).unwrap();
        let jws = sign("https://ca.test/x", "n".to_owned(), &rsa, &api::EmptyObject).unwrap();
        let header = decode_header(&jws);
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["jwk"]["kty"], "RSA");
        assert_eq!(header["jwk"]["e"], "AQAB");

        let p384 = AcmeKey::from_pem(P384_PEM).unwrap();
        let jws = sign("https://ca.test/x", "n".to_owned(), &p384, &api::EmptyObject).unwrap();
        let header = decode_header(&jws);
        assert_eq!(header["alg"], "ES384");
        assert_eq!(header["jwk"]["crv"], "P-384");
    }

    #[test]
    fn external_account_binding_uses_mac_and_no_nonce() {
        let key = AcmeKey::new();
        let hmac_key = b"super secret mac key from the CA";

        let eab = sign_external_account_binding("https://ca.test/new-acct", "kid-1", hmac_key, &key)
            .unwrap();

        let header = decode_header(&eab);
        assert_eq!(
            header,
            serde_json::json!({
                "alg": "HS256",
                "kid": "kid-1",
                "url": "https://ca.test/new-acct",
            })
        );

        let payload = BASE64_URL_SAFE_NO_PAD.decode(&eab.payload).unwrap();
        let jwk: Jwk = serde_json::from_slice(&payload).unwrap();
        assert_eq!(jwk, key.jwk().unwrap());

        let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key).unwrap();
        mac.update(format!("{}.{}", eab.protected, eab.payload).as_bytes());
        let sig = BASE64_URL_SAFE_NO_PAD.decode(&eab.signature).unwrap();
        mac.verify_slice(&sig).unwrap();
    }

    #[test]
    fn thumbprint_matches_rfc7638_example() {
        // https://datatracker.ietf.org/doc/html/rfc7638#section-3.1
        let jwk = Jwk::Rsa {
            alg: "RS256".to_owned(),
            kty: "RSA".to_owned(),
            _use: "sig".to_owned(),
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".to_owned(),
            e: "AQAB".to_owned(),
        };

        let thumbprint = BASE64_URL_SAFE_NO_PAD.encode(jwk.thumbprint().unwrap());
        assert_eq!(thumbprint, "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
    }

    #[test]
    fn key_authorization_is_deterministic() {
        let key = AcmeKey::new();
        let other = AcmeKey::new();

        let first = key_authorization("token-a", &key).unwrap();
        assert_eq!(first, key_authorization("token-a", &key).unwrap());
        assert!(first.starts_with("token-a."));

        let mut seen = HashSet::new();
        for i in 0..32 {
            let token = format!("token-{i}");
            assert!(seen.insert(key_authorization(&token, &key).unwrap()));
            assert!(seen.insert(key_authorization(&token, &other).unwrap()));
        }
    }
}
