use std::io::{BufReader, Cursor};

use der::{
    asn1::{Ia5String, Ia5StringRef, ObjectIdentifier, PrintableStringRef, Utf8StringRef},
    oid::AssociatedOid as _,
    Decode as _, DecodePem as _, Encode as _, Tag, Tagged as _,
};
use ecdsa::signature::{Keypair, Signer};
use pkcs8::{spki::EncodePublicKey, DecodePrivateKey as _, EncodePrivateKey as _};
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder as _, RequestBuilder},
    ext::{
        pkix::{name::GeneralName, SubjectAltName},
        Extension,
    },
    name::Name,
    request::CertReq,
    spki::{DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding},
};
use zeroize::Zeroizing;

use crate::{Error, Result};

const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const EXTENSION_REQUEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Private key of an issued certificate.
#[derive(Debug, Clone)]
pub enum CertificateKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl CertificateKey {
    /// Reads a PKCS#8 PEM encoded P-256 or P-384 key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .map(Self::P256)
            .or_else(|_| p384::ecdsa::SigningKey::from_pkcs8_pem(pem).map(Self::P384))
            .map_err(|err| Error::Key(format!("certificate key must be P-256 or P-384: {err}")))
    }

    /// The key in PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        let pem = match self {
            CertificateKey::P256(key) => key.to_pkcs8_pem(pem::LineEnding::LF),
            CertificateKey::P384(key) => key.to_pkcs8_pem(pem::LineEnding::LF),
        };

        Ok(pem?)
    }
}

impl From<p256::ecdsa::SigningKey> for CertificateKey {
    fn from(key: p256::ecdsa::SigningKey) -> Self {
        CertificateKey::P256(key)
    }
}

impl From<p384::ecdsa::SigningKey> for CertificateKey {
    fn from(key: p384::ecdsa::SigningKey) -> Self {
        CertificateKey::P384(key)
    }
}

/// Creates a CSR with `domains` and `emails`, signed with `key`, in DER.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All domains and email
/// addresses are added to a Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(
    key: &CertificateKey,
    domains: &[&str],
    emails: &[String],
) -> Result<Vec<u8>> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| Error::Csr("no domains to request a certificate for".to_owned()))?;

    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .map_err(|err| Error::Csr(format!("subject {primary_domain:?}: {err}")))?;

    let ia5 = |value: &str| {
        Ia5String::new(value).map_err(|err| Error::Csr(format!("SAN {value:?}: {err}")))
    };

    let mut names = Vec::with_capacity(domains.len() + emails.len());
    for domain in domains {
        names.push(GeneralName::DnsName(ia5(domain)?));
    }
    for email in emails {
        names.push(GeneralName::Rfc822Name(ia5(email)?));
    }
    let san = SubjectAltName(names);

    let csr = match key {
        CertificateKey::P256(key) => build_csr::<_, p256::ecdsa::DerSignature>(key, subject, &san),
        CertificateKey::P384(key) => build_csr::<_, p384::ecdsa::DerSignature>(key, subject, &san),
    }?;

    Ok(csr.to_der()?)
}

fn build_csr<S, Sig>(signer: &S, subject: Name, san: &SubjectAltName) -> Result<CertReq>
where
    S: Keypair + DynSignatureAlgorithmIdentifier + Signer<Sig>,
    S::VerifyingKey: EncodePublicKey,
    Sig: SignatureBitStringEncoding,
{
    let csr_err = |err: x509_cert::builder::Error| Error::Csr(err.to_string());

    let mut builder = RequestBuilder::new(subject, signer).map_err(csr_err)?;
    builder.add_extension(san).map_err(csr_err)?;
    builder.build::<Sig>().map_err(csr_err)
}

/// Reads a CSR in DER or PEM.
pub(crate) fn parse_csr(csr: &[u8]) -> Result<CertReq> {
    let start = csr
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(csr.len());

    if csr[start..].starts_with(b"-----BEGIN") {
        Ok(CertReq::from_pem(csr)?)
    } else {
        Ok(CertReq::from_der(csr)?)
    }
}

/// Domains a CSR asks for: the Common Name first, then the DNS names of the SAN extension.
pub(crate) fn csr_domains(csr: &CertReq) -> Result<Vec<String>> {
    let mut domains = Vec::new();

    for rdn in &csr.info.subject.0 {
        for atv in rdn.0.iter().filter(|atv| atv.oid == COMMON_NAME) {
            let value = &atv.value;
            let cn = match value.tag() {
                Tag::Utf8String => value.decode_as::<Utf8StringRef<'_>>()?.as_str(),
                Tag::PrintableString => value.decode_as::<PrintableStringRef<'_>>()?.as_str(),
                Tag::Ia5String => value.decode_as::<Ia5StringRef<'_>>()?.as_str(),
                _ => continue,
            };
            domains.push(cn.to_owned());
        }
    }

    for attr in csr.info.attributes.iter().filter(|a| a.oid == EXTENSION_REQUEST) {
        for value in attr.values.iter() {
            let extensions = Vec::<Extension>::from_der(&value.to_der()?)?;

            for ext in extensions
                .iter()
                .filter(|ext| ext.extn_id == SubjectAltName::OID)
            {
                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())?;
                for name in san.0 {
                    if let GeneralName::DnsName(dns) = name {
                        domains.push(dns.to_string());
                    }
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    domains.retain(|domain| seen.insert(domain.clone()));

    if domains.is_empty() {
        return Err(Error::Csr("CSR names no domains".to_owned()));
    }

    Ok(domains)
}

/// An issued certificate together with what was used to obtain it.
///
/// `certificate` holds the leaf certificate, or the whole chain when bundling was requested.
/// `issuer_certificate` always holds the chain without the leaf.
#[derive(Clone)]
pub struct Resource {
    domain: String,
    cert_url: String,
    cert_stable_url: String,
    private_key: Option<Zeroizing<String>>,
    certificate: String,
    issuer_certificate: String,
    csr: Vec<u8>,
}

impl Resource {
    pub(crate) fn from_chain(
        domain: String,
        cert_url: String,
        private_key: Option<Zeroizing<String>>,
        chain_pem: &str,
        bundle: bool,
    ) -> Result<Self> {
        let chain = pem_certs(chain_pem)?;
        let (leaf, issuers) = chain
            .split_first()
            .ok_or_else(|| Error::Certificate("no certificates in chain".to_owned()))?;

        let to_pem = |der: &Vec<u8>| {
            pem::encode_string("CERTIFICATE", pem::LineEnding::LF, der)
                .map_err(|err| Error::Certificate(err.to_string()))
        };

        let issuer_certificate = issuers.iter().map(to_pem).collect::<Result<String>>()?;

        let certificate = if bundle {
            chain.iter().map(to_pem).collect::<Result<String>>()?
        } else {
            to_pem(leaf)?
        };

        Ok(Resource {
            domain,
            cert_stable_url: cert_url.clone(),
            cert_url,
            private_key,
            certificate,
            issuer_certificate,
            csr: Vec::new(),
        })
    }

    pub(crate) fn with_csr(mut self, csr: Vec<u8>) -> Self {
        self.csr = csr;
        self
    }

    /// The primary domain of the certificate.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// URL the certificate was downloaded from.
    pub fn cert_url(&self) -> &str {
        &self.cert_url
    }

    /// URL the certificate can be fetched from again later.
    pub fn cert_stable_url(&self) -> &str {
        &self.cert_stable_url
    }

    /// The private key in PEM format.
    ///
    /// `None` when the certificate was obtained for a caller supplied CSR.
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_deref().map(String::as_str)
    }

    /// The issued certificate file in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The issuer chain in PEM format.
    pub fn issuer_certificate(&self) -> &str {
        &self.issuer_certificate
    }

    /// The CSR supplied for the order; empty when this library generated it.
    pub fn csr(&self) -> &[u8] {
        &self.csr
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> Result<Vec<Vec<u8>>> {
        pem_certs(&self.certificate)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        let cert_chain = self.certificate_chain()?;
        let cert_ee = cert_chain
            .first() // EE cert is first
            .ok_or_else(|| Error::Certificate("no certificates in chain".to_owned()))?;

        let cert = x509_cert::Certificate::from_der(cert_ee)
            .map_err(|err| Error::Certificate(err.to_string()))?;

        let not_after = cert.tbs_certificate.validity.not_after.to_unix_duration();
        let not_after = i64::try_from(not_after.as_secs())
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .ok_or_else(|| Error::Certificate("notAfter out of range".to_owned()))?;

        let diff = not_after - OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("domain", &self.domain)
            .field("cert_url", &self.cert_url)
            .field("cert_stable_url", &self.cert_stable_url)
            .field("csr_len", &self.csr.len())
            .finish_non_exhaustive()
    }
}

fn pem_certs(pem: &str) -> Result<Vec<Vec<u8>>> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| Error::Certificate(err.to_string()))
}

#[cfg(test)]
mod tests {
    use der::EncodePem as _;

    use super::*;

    fn chain_pem(domains: &[&str]) -> String {
        crate::test::issue_chain(&domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn csr_names_every_domain_and_email() {
        let key = CertificateKey::from(create_p256_key());
        let emails = ["hostmaster@example.test".to_owned()];
        let der = create_csr(&key, &["example.test", "www.example.test"], &emails).unwrap();

        let csr = parse_csr(&der).unwrap();
        assert_eq!(csr_domains(&csr).unwrap(), ["example.test", "www.example.test"]);

        let pem = csr.to_pem(pem::LineEnding::LF).unwrap();
        let again = parse_csr(pem.as_bytes()).unwrap();
        assert_eq!(again.to_der().unwrap(), der);
    }

    #[test]
    fn csr_with_p384_key() {
        let key = CertificateKey::from_pkcs8_pem(include_str!("testdata/p384.pem")).unwrap();
        assert!(matches!(key, CertificateKey::P384(_)));

        let der = create_csr(&key, &["example.test"], &[]).unwrap();
        let csr = parse_csr(&der).unwrap();
        assert_eq!(csr_domains(&csr).unwrap(), ["example.test"]);
    }

    #[test]
    fn rsa_certificate_keys_are_rejected() {
        let err = CertificateKey::from_pkcs8_pem(include_str!("testdata/rsa2048.pem")).unwrap_err();
        assert!(matches!(err, Error::Key(_)), "{err:?}");
    }

    #[test]
    fn csr_needs_a_domain() {
        let key = CertificateKey::from(create_p256_key());
        assert!(matches!(create_csr(&key, &[], &[]), Err(Error::Csr(_))));
        assert!(parse_csr(b"not a csr").is_err());
    }

    #[test]
    fn chain_is_split_into_leaf_and_issuer() {
        let chain = chain_pem(&["example.test"]);

        let res = Resource::from_chain(
            "example.test".to_owned(),
            "https://ca.test/cert/1".to_owned(),
            None,
            &chain,
            false,
        )
        .unwrap();

        assert_eq!(res.certificate_chain().unwrap().len(), 1);
        assert!(!res.issuer_certificate().is_empty());
        assert_ne!(res.certificate(), res.issuer_certificate());
        assert!(res.csr().is_empty());
        assert_eq!(res.cert_stable_url(), res.cert_url());
        assert_eq!(res.valid_days_left().unwrap(), 89);

        let bundled = Resource::from_chain(
            "example.test".to_owned(),
            "https://ca.test/cert/1".to_owned(),
            None,
            &chain,
            true,
        )
        .unwrap();

        assert_eq!(bundled.certificate_chain().unwrap().len(), 2);
        assert!(bundled.certificate().ends_with(res.issuer_certificate()));
    }

    #[test]
    fn empty_chain_is_an_error() {
        let err = Resource::from_chain(String::new(), String::new(), None, "", true).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)), "{err:?}");
    }
}
