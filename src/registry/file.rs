use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::NodeError;
use crate::node::{Node, NodeRecord};
use crate::registry::{MemoryRegistry, NodeUpdate, Registry};

#[derive(Debug, Default, Facet)]
#[facet(default)]
struct RegistryFile {
    #[facet(default)]
    nodes: Vec<NodeRecord>,
}

/// JSON-file registry: loaded once at open, saved after every write.
///
/// Callers hold the session lock for the whole command, so nothing else
/// writes the file between load and save.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    inner: MemoryRegistry,
}

impl FileRegistry {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, NodeError> {
        let inner = if path.exists() {
            MemoryRegistry::from_nodes(load(path)?)
        } else {
            tracing::debug!(path = %path.display(), "registry file absent, starting empty");
            MemoryRegistry::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    /// Apply `write` to a copy of the nodes and keep it only once it is
    /// on disk, so a failed save leaves memory matching the file.
    fn commit<T>(
        &mut self,
        write: impl FnOnce(&mut MemoryRegistry) -> Result<T, NodeError>,
    ) -> Result<T, NodeError> {
        let mut next = self.inner.clone();
        let out = write(&mut next)?;
        save(&self.path, &next)?;
        self.inner = next;
        Ok(out)
    }
}

fn save(path: &Path, registry: &MemoryRegistry) -> Result<(), NodeError> {
    let file = RegistryFile {
        nodes: registry.nodes().iter().map(Node::to_record).collect(),
    };
    let json = facet_json::to_string(&file).map_err(|e| NodeError::RegistryParse {
        path: path.display().to_string(),
        message: format!("{e:?}"),
    })?;

    let write_err = |source| NodeError::RegistryWrite {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    // Rename over the old file so readers never see a partial write.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    tracing::debug!(path = %path.display(), "saved registry");
    Ok(())
}

fn load(path: &Path) -> Result<Vec<Node>, NodeError> {
    let contents = std::fs::read_to_string(path).map_err(|source| NodeError::RegistryLoad {
        path: path.display().to_string(),
        source,
    })?;
    let file: RegistryFile =
        facet_json::from_str(&contents).map_err(|e| NodeError::RegistryParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    file.nodes.into_iter().map(Node::from_record).collect()
}

impl Registry for FileRegistry {
    fn snapshot(&self) -> Result<Vec<Node>, NodeError> {
        self.inner.snapshot()
    }

    fn add_node(&mut self, node: Node) -> Result<(), NodeError> {
        self.commit(|reg| reg.add_node(node))
    }

    fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<Node, NodeError> {
        self.commit(|reg| reg.update_node(node_id, update))
    }

    fn set_parent(&mut self, node_id: &str, parent_id: Option<&str>) -> Result<(), NodeError> {
        self.commit(|reg| reg.set_parent(node_id, parent_id))
    }

    fn update_metadata(
        &mut self,
        node_id: &str,
        extra: BTreeMap<String, String>,
        delete_keys: &[String],
    ) -> Result<(), NodeError> {
        self.commit(|reg| reg.update_metadata(node_id, extra, delete_keys))
    }

    fn delete_node(&mut self, node_id: &str) -> Result<(), NodeError> {
        self.commit(|reg| reg.delete_node(node_id))
    }
}
