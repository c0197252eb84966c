//! Declared listener specs, held until topology construction.

use std::fmt;

use super::error::ListenerError;

/// Intent to bind one address/port, before any socket exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSpec {
    /// Numeric IPv4/IPv6 literal. Never a hostname.
    pub address: String,
    pub port: u16,
    pub use_ssl: bool,
    /// Overrides the global cert when non-empty.
    pub cert_file: String,
    /// Overrides the global key when non-empty.
    pub key_file: String,
    pub use_old_tls: bool,
    /// Appended after the global directives.
    pub ssl_conf_cmds: Vec<(String, String)>,
}

impl ListenerSpec {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            use_ssl: false,
            cert_file: String::new(),
            key_file: String::new(),
            use_old_tls: false,
            ssl_conf_cmds: Vec::new(),
        }
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn with_cert_files(
        mut self,
        cert_file: impl Into<String>,
        key_file: impl Into<String>,
    ) -> Self {
        self.cert_file = cert_file.into();
        self.key_file = key_file.into();
        self
    }

    pub fn with_old_tls(mut self, use_old_tls: bool) -> Self {
        self.use_old_tls = use_old_tls;
        self
    }

    pub fn with_conf_cmds(mut self, cmds: Vec<(String, String)>) -> Self {
        self.ssl_conf_cmds = cmds;
        self
    }
}

impl fmt::Display for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Append-only store, frozen by topology construction.
#[derive(Debug, Default)]
pub struct ListenerStore {
    specs: Vec<ListenerSpec>,
    frozen: bool,
}

impl ListenerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: ListenerSpec) -> Result<(), ListenerError> {
        if self.frozen {
            return Err(ListenerError::Frozen(spec.to_string()));
        }
        self.specs.push(spec);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn specs(&self) -> &[ListenerSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
