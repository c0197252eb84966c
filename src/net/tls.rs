//! TLS policy and certificate loading.
//!
//! # Responsibilities
//! - Describe the per-listener TLS bundle (cert, key, directives, legacy flag)
//! - Build a rustls `ServerConfig` from PEM files on disk
//! - Hot-swap the active config when certificates are reloaded

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::crypto::aws_lc_rs;
use rustls::version::{TLS12, TLS13};
use rustls::{ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

/// Error building or reloading a TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate file not found: {0:?}")]
    CertNotFound(PathBuf),

    #[error("Private key file not found: {0:?}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0:?}")]
    EmptyCertChain(PathBuf),

    #[error("No private key found in {0:?}")]
    MissingKey(PathBuf),

    #[error("Invalid TLS directive {key}={value}")]
    InvalidDirective { key: String, value: String },

    #[error("TLS directives leave no protocol version enabled")]
    NoProtocolVersions,

    #[error("rustls rejected configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Protocol versions in ascending order. Legacy versions are listed so that
/// directives naming them parse; rustls itself only speaks 1.2 and 1.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ProtocolVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl ProtocolVersion {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "TLSv1" | "TLSv1.0" => Some(Self::Tls10),
            "TLSv1.1" => Some(Self::Tls11),
            "TLSv1.2" => Some(Self::Tls12),
            "TLSv1.3" => Some(Self::Tls13),
            _ => None,
        }
    }
}

/// Resolved TLS material and directives for one server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    cert_path: PathBuf,
    key_path: PathBuf,
    conf_cmds: Vec<(String, String)>,
    use_old_tls: bool,
}

impl TlsPolicy {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            conf_cmds: Vec::new(),
            use_old_tls: false,
        }
    }

    /// Replace the directive list. Order is preserved; later entries win.
    pub fn with_conf_cmds(mut self, cmds: Vec<(String, String)>) -> Self {
        self.conf_cmds = cmds;
        self
    }

    pub fn with_old_tls(mut self, use_old_tls: bool) -> Self {
        self.use_old_tls = use_old_tls;
        self
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn conf_cmds(&self) -> &[(String, String)] {
        &self.conf_cmds
    }

    pub fn use_old_tls(&self) -> bool {
        self.use_old_tls
    }

    /// Load the PEM files and build a rustls server configuration.
    pub fn server_config(&self) -> Result<ServerConfig, TlsError> {
        let options = DirectiveOptions::from_cmds(&self.conf_cmds)?;
        let versions = options.protocol_versions(self.use_old_tls)?;

        if !self.cert_path.exists() {
            return Err(TlsError::CertNotFound(self.cert_path.clone()));
        }
        if !self.key_path.exists() {
            return Err(TlsError::KeyNotFound(self.key_path.clone()));
        }

        let mut cert_reader = open(&self.cert_path)?;
        let chain = certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| TlsError::Read {
                path: self.cert_path.clone(),
                source,
            })?;
        if chain.is_empty() {
            return Err(TlsError::EmptyCertChain(self.cert_path.clone()));
        }

        let mut key_reader = open(&self.key_path)?;
        let key = private_key(&mut key_reader)
            .map_err(|source| TlsError::Read {
                path: self.key_path.clone(),
                source,
            })?
            .ok_or_else(|| TlsError::MissingKey(self.key_path.clone()))?;

        let provider = Arc::new(aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        config.ignore_client_order = !options.server_preference;

        Ok(config)
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Directive state after applying every command in order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DirectiveOptions {
    min: Option<ProtocolVersion>,
    max: Option<ProtocolVersion>,
    server_preference: bool,
}

impl DirectiveOptions {
    fn from_cmds(cmds: &[(String, String)]) -> Result<Self, TlsError> {
        let mut options = Self {
            min: None,
            max: None,
            server_preference: false,
        };

        for (key, value) in cmds {
            let invalid = || TlsError::InvalidDirective {
                key: key.clone(),
                value: value.clone(),
            };
            match key.as_str() {
                "MinProtocol" | "MaxProtocol" => {
                    let version = if value == "None" {
                        None
                    } else {
                        Some(ProtocolVersion::parse(value).ok_or_else(invalid)?)
                    };
                    if key == "MinProtocol" {
                        options.min = version;
                    } else {
                        options.max = version;
                    }
                }
                "Options" => {
                    for flag in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                        match flag {
                            "ServerPreference" => options.server_preference = true,
                            "-ServerPreference" => options.server_preference = false,
                            other => {
                                tracing::warn!(option = %other, "Unsupported TLS option ignored")
                            }
                        }
                    }
                }
                _ => {
                    tracing::warn!(
                        directive = %key,
                        value = %value,
                        "Unsupported TLS directive ignored"
                    );
                }
            }
        }

        Ok(options)
    }

    fn protocol_versions(
        &self,
        use_old_tls: bool,
    ) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        let min = match self.min {
            Some(min) => min,
            None if use_old_tls => ProtocolVersion::Tls10,
            None => ProtocolVersion::Tls12,
        };
        if min < ProtocolVersion::Tls12 {
            tracing::warn!(
                "Legacy TLS versions requested; rustls negotiates TLS 1.2 and newer only"
            );
        }

        let max = self.max.unwrap_or(ProtocolVersion::Tls13);
        let versions: Vec<&'static SupportedProtocolVersion> = [
            (ProtocolVersion::Tls12, &TLS12),
            (ProtocolVersion::Tls13, &TLS13),
        ]
        .into_iter()
        .filter(|(v, _)| *v >= min && *v <= max)
        .map(|(_, supported)| supported)
        .collect();

        if versions.is_empty() {
            return Err(TlsError::NoProtocolVersions);
        }
        Ok(versions)
    }
}

/// A server config that can be rebuilt from disk while connections are accepted.
#[derive(Debug)]
pub struct ReloadableTls {
    policy: TlsPolicy,
    current: ArcSwap<ServerConfig>,
}

impl ReloadableTls {
    /// Build the initial configuration from the policy.
    pub fn new(policy: TlsPolicy) -> Result<Self, TlsError> {
        let config = policy.server_config()?;
        Ok(Self {
            policy,
            current: ArcSwap::from_pointee(config),
        })
    }

    pub fn policy(&self) -> &TlsPolicy {
        &self.policy
    }

    /// Acceptor over the configuration active right now.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.current.load_full())
    }

    /// Re-read cert and key. The active config is left in place on failure.
    pub fn reload(&self) -> Result<(), TlsError> {
        let config = self.policy.server_config()?;
        self.current.store(Arc::new(config));
        tracing::info!(
            cert = %self.policy.cert_path.display(),
            key = %self.policy.key_path.display(),
            "TLS certificates reloaded"
        );
        Ok(())
    }
}
