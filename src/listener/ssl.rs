//! Per-listener TLS policy resolution.

use crate::net::TlsPolicy;

use super::error::ListenerError;
use super::store::ListenerSpec;

/// Process-wide TLS defaults inherited by listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalTls {
    pub cert_file: String,
    pub key_file: String,
    pub conf_cmds: Vec<(String, String)>,
}

impl GlobalTls {
    pub fn new(cert_file: impl Into<String>, key_file: impl Into<String>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            conf_cmds: Vec::new(),
        }
    }

    pub fn with_conf_cmds(mut self, cmds: Vec<(String, String)>) -> Self {
        self.conf_cmds = cmds;
        self
    }
}

/// Merge a listener's TLS settings over the global defaults.
///
/// Empty spec paths inherit the global ones; if either result is still
/// empty the listener cannot serve TLS and realization must fail.
/// Directives are global first, then the listener's own.
pub fn resolve_policy(spec: &ListenerSpec, global: &GlobalTls) -> Result<TlsPolicy, ListenerError> {
    let cert = pick(&spec.cert_file, &global.cert_file);
    let key = pick(&spec.key_file, &global.key_file);
    if cert.is_empty() || key.is_empty() {
        return Err(ListenerError::MissingTlsMaterial(spec.to_string()));
    }

    let cmds = global
        .conf_cmds
        .iter()
        .chain(spec.ssl_conf_cmds.iter())
        .cloned()
        .collect();

    Ok(TlsPolicy::new(cert, key)
        .with_conf_cmds(cmds)
        .with_old_tls(spec.use_old_tls))
}

fn pick<'a>(own: &'a str, inherited: &'a str) -> &'a str {
    if own.is_empty() {
        inherited
    } else {
        own
    }
}
