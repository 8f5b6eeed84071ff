// Volume data behind the handshake program
//
// The handshake procedures only read volume state; where it lives is up to
// the embedding daemon.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

#[async_trait]
pub trait VolumeSource: Send + Sync {
    /// Volfile contents for `id`, or None if there is no such volfile
    async fn volfile(&self, id: &str) -> io::Result<Option<String>>;

    /// UUID of the named volume
    async fn volume_id(&self, _volname: &str) -> Option<String> {
        None
    }

    /// Client-facing addresses of the peers hosting the volume's bricks
    async fn client_addresses(&self, _volname: &str) -> Option<Vec<String>> {
        None
    }

    /// Final status reported by a rebalance process
    async fn defrag_status(&self, status: HashMap<String, String>) -> Result<(), String> {
        info!("Rebalance status: {:?}", status);
        Ok(())
    }
}

/// Volfiles stored as `<dir>/<id>.vol`
#[derive(Debug, Clone)]
pub struct VolfileDir {
    dir: PathBuf,
}

impl VolfileDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Volfile ids name a file directly inside the directory
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        let name = format!("{}.vol", id);
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Some(self.dir.join(name)),
            _ => None,
        }
    }
}

#[async_trait]
impl VolumeSource for VolfileDir {
    async fn volfile(&self, id: &str) -> io::Result<Option<String>> {
        let Some(path) = self.path_for(id) else {
            debug!("Rejected volfile id {:?}", id);
            return Ok(None);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
