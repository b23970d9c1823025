// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Client certificate, private key and authority certificate handling.
// Author: Lukas Bower

use crate::error::ClientError;
use crate::util::{ensure_parent, write_restricted, STATE_DIR_MODE};
use log::{debug, info};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use ureq::tls::{Certificate, ClientCert, PrivateKey, RootCerts, TlsConfig};

const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

/// Locations of the three PEM files making up the agent's identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca_cert: PathBuf,
}

impl TrustPaths {
    fn all_exist(&self) -> bool {
        [&self.cert, &self.key, &self.ca_cert]
            .iter()
            .all(|path| path.exists())
    }
}

/// Parsed, validated trust material.
#[derive(Clone)]
pub struct TrustMaterial {
    identity: ClientCert,
    authority: Vec<Vec<u8>>,
    subject: String,
}

impl TrustMaterial {
    /// Parse PEM text; `paths` only labels errors.
    pub fn from_pem(
        paths: &TrustPaths,
        key_pem: &str,
        cert_pem: &str,
        ca_pem: &str,
    ) -> Result<Self, ClientError> {
        let chain_der = parse_certs(&paths.cert, cert_pem)?;
        let subject = common_name(&paths.cert, &chain_der[0])?;
        let authority = parse_certs(&paths.ca_cert, ca_pem)?;
        let key = PrivateKey::from_pem(key_pem.as_bytes()).map_err(|err| {
            ClientError::TrustMaterial {
                path: paths.key.clone(),
                reason: err.to_string(),
            }
        })?;
        let chain: Vec<Certificate<'static>> = chain_der
            .iter()
            .map(|der| Certificate::from_der(der).to_owned())
            .collect();
        Ok(Self {
            identity: ClientCert::new_with_certs(&chain, key),
            authority,
            subject,
        })
    }

    /// Common name of the client certificate.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// TLS settings presenting the client certificate and trusting only the
    /// authority certificate(s).
    pub fn tls_config(&self) -> TlsConfig {
        let roots: Vec<Certificate<'static>> = self
            .authority
            .iter()
            .map(|der| Certificate::from_der(der).to_owned())
            .collect();
        TlsConfig::builder()
            .root_certs(RootCerts::from(roots))
            .client_cert(Some(self.identity.clone()))
            .build()
    }
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("subject", &self.subject)
            .field("authority_certs", &self.authority.len())
            .finish_non_exhaustive()
    }
}

/// On-disk home of the agent's trust material.
#[derive(Debug)]
pub struct TrustStore {
    paths: TrustPaths,
    material: Option<TrustMaterial>,
}

impl TrustStore {
    /// Load the material if all three files exist.
    ///
    /// Missing files are not an error: the store is simply not installed.
    pub fn load(paths: TrustPaths) -> Result<Self, ClientError> {
        if !paths.all_exist() {
            debug!("trust material incomplete under {}", paths.cert.display());
            return Ok(Self {
                paths,
                material: None,
            });
        }
        let key = read_pem(&paths.key)?;
        let cert = read_pem(&paths.cert)?;
        let ca = read_pem(&paths.ca_cert)?;
        let material = TrustMaterial::from_pem(&paths, &key, &cert, &ca)?;
        Ok(Self {
            paths,
            material: Some(material),
        })
    }

    pub fn is_installed(&self) -> bool {
        self.material.is_some()
    }

    pub fn material(&self) -> Option<&TrustMaterial> {
        self.material.as_ref()
    }

    pub fn paths(&self) -> &TrustPaths {
        &self.paths
    }

    /// Validate and persist newly issued material, replacing what was held.
    pub fn install(
        &mut self,
        key_pem: &str,
        cert_pem: &str,
        ca_pem: &str,
    ) -> Result<&TrustMaterial, ClientError> {
        let material = TrustMaterial::from_pem(&self.paths, key_pem, cert_pem, ca_pem)?;
        for path in [&self.paths.key, &self.paths.cert, &self.paths.ca_cert] {
            ensure_parent(path, STATE_DIR_MODE)?;
        }
        write_restricted(&self.paths.key, key_pem.as_bytes(), KEY_MODE)?;
        write_restricted(&self.paths.cert, cert_pem.as_bytes(), CERT_MODE)?;
        write_restricted(&self.paths.ca_cert, ca_pem.as_bytes(), CERT_MODE)?;
        info!(
            "installed certificate for {} at {}",
            material.subject(),
            self.paths.cert.display()
        );
        Ok(self.material.insert(material))
    }
}

/// Freshly generated private key and signing request for a certname.
pub struct CertificateRequest {
    pub key_pem: String,
    pub csr_pem: String,
}

impl CertificateRequest {
    pub fn generate(certname: &str) -> Result<Self, ClientError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![certname.to_owned()])?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, certname);
        params.distinguished_name = name;
        let csr = params.serialize_request(&key)?;
        Ok(Self {
            key_pem: key.serialize_pem(),
            csr_pem: csr.pem()?,
        })
    }
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("csr_pem", &self.csr_pem)
            .finish_non_exhaustive()
    }
}

fn read_pem(path: &Path) -> Result<String, ClientError> {
    fs::read_to_string(path).map_err(|err| ClientError::TrustMaterial {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn parse_certs(path: &Path, pem: &str) -> Result<Vec<Vec<u8>>, ClientError> {
    let invalid = |reason: String| ClientError::TrustMaterial {
        path: path.to_path_buf(),
        reason,
    };
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_bytes()))
        .map_err(|err| invalid(err.to_string()))?;
    if certs.is_empty() {
        return Err(invalid("no certificates found".into()));
    }
    for der in &certs {
        x509_parser::parse_x509_certificate(der).map_err(|err| invalid(err.to_string()))?;
    }
    Ok(certs)
}

fn common_name(path: &Path, der: &[u8]) -> Result<String, ClientError> {
    let (_, cert) =
        x509_parser::parse_x509_certificate(der).map_err(|err| ClientError::TrustMaterial {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    let subject = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_owned();
    Ok(subject)
}
