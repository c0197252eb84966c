//! Certificate file watcher for hot reload.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::schema::AppConfig;

/// A request to reload TLS material, naming the file that changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest {
    pub path: PathBuf,
}

/// Watches certificate and key files and asks for a reload when they change.
pub struct CertWatcher {
    files: BTreeSet<PathBuf>,
    reload_tx: mpsc::UnboundedSender<ReloadRequest>,
}

impl CertWatcher {
    /// Create a watcher over `files`.
    ///
    /// Relative paths are resolved against the current directory. A path
    /// that resolves through symlinks is matched both as written and at its
    /// target, since either side may be the one rewritten on rotation.
    /// Returns the watcher and a receiver for reload requests.
    pub fn new<I>(files: I) -> (Self, mpsc::UnboundedReceiver<ReloadRequest>)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let mut targets = BTreeSet::new();
        for file in files {
            let file = absolute(&file);
            if let Ok(resolved) = file.canonicalize() {
                targets.insert(resolved);
            }
            targets.insert(file);
        }
        (
            Self {
                files: targets,
                reload_tx,
            },
            reload_rx,
        )
    }

    /// Every cert/key path named in the configuration, global and per listener.
    pub fn tls_files(config: &AppConfig) -> Vec<PathBuf> {
        let global = [&config.tls.cert_file, &config.tls.key_file];
        let per_listener = config
            .listener
            .iter()
            .filter(|l| l.use_ssl)
            .flat_map(|l| [&l.cert_file, &l.key_file]);

        global
            .into_iter()
            .chain(per_listener)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    /// Start watching in the background.
    ///
    /// Parent directories are watched rather than the files themselves so
    /// that atomic replace-by-rename (the usual rotation) is still seen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.reload_tx.clone();
        let files = self.files.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if let Some(path) = event.paths.iter().find(|p| files.contains(*p)) {
                        tracing::info!(
                            path = %path.display(),
                            "TLS file change detected, requesting reload"
                        );
                        let _ = tx.send(ReloadRequest { path: path.clone() });
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dirs: BTreeSet<&Path> = self.files.iter().filter_map(|f| f.parent()).collect();
        for dir in dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }

        tracing::info!(files = self.files.len(), "TLS file watcher started");
        Ok(watcher)
    }
}

/// `path` joined onto the current directory when relative.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Cannot resolve relative TLS path"
            );
            path.to_path_buf()
        }
    }
}
