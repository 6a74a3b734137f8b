//! Saved connection tree.
//!
//! Client applications keep their SSH targets organized as a tree of
//! folders and connection leaves. The daemon stores the tree as one
//! JSON document and resolves connection ids into connect parameters
//! when a session is opened against a saved entry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use protocol::messages::{ConnectParams, Credential};

fn default_port() -> u16 {
    22
}

/// One node of the connection tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionNode {
    /// A folder grouping other nodes.
    Folder {
        /// Stable node id.
        id: String,
        /// Display name.
        name: String,
        /// Child nodes, in display order.
        #[serde(default)]
        children: Vec<ConnectionNode>,
    },
    /// A saved SSH target.
    Connection {
        /// Stable node id.
        id: String,
        /// Display name.
        name: String,
        /// Host to connect to.
        host: String,
        /// SSH port.
        #[serde(default = "default_port")]
        port: u16,
        /// Login user.
        username: String,
        /// Stored credential, if the user chose to save one.
        #[serde(default)]
        credential: Option<Credential>,
    },
}

impl ConnectionNode {
    /// The node's id, regardless of its kind.
    pub fn id(&self) -> &str {
        match self {
            ConnectionNode::Folder { id, .. } => id,
            ConnectionNode::Connection { id, .. } => id,
        }
    }
}

/// Store for the connection tree, backed by a JSON file.
pub struct ConnectionStore {
    path: PathBuf,
    tree: RwLock<Vec<ConnectionNode>>,
}

impl ConnectionStore {
    /// Load the tree from a file. A missing file yields an empty tree.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let tree = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read connections file: {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| {
                format!("Failed to parse connections file: {}", path.display())
            })?
        } else {
            tracing::debug!("Connections file not found at {:?}, starting empty", path);
            Vec::new()
        };

        Ok(Self {
            path,
            tree: RwLock::new(tree),
        })
    }

    /// Replace the whole tree and persist it.
    pub fn replace(&self, tree: Vec<ConnectionNode>) -> Result<()> {
        {
            let mut guard = self.tree.write().expect("connection tree lock poisoned");
            *guard = tree;
        }
        self.save()
    }

    /// Persist the tree. The write goes through a temporary file and a
    /// rename, so a crash cannot leave a half-written document behind.
    pub fn save(&self) -> Result<()> {
        let contents = {
            let guard = self.tree.read().expect("connection tree lock poisoned");
            serde_json::to_string_pretty(&*guard).context("Failed to serialize connection tree")?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write connections file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace connections file: {}", self.path.display())
        })?;

        tracing::debug!("Connection tree saved to {:?}", self.path);
        Ok(())
    }

    /// Resolve a saved connection id into connect parameters.
    ///
    /// Folder ids do not resolve; only connection leaves do. A saved
    /// entry without a stored credential resolves to None as well,
    /// since the daemon cannot authenticate with it.
    pub fn resolve(&self, id: &str) -> Option<ConnectParams> {
        let guard = self.tree.read().expect("connection tree lock poisoned");
        find_connection(&guard, id)
    }

    /// Ids and names of every connection leaf, depth-first.
    pub fn connection_names(&self) -> Vec<(String, String)> {
        let guard = self.tree.read().expect("connection tree lock poisoned");
        let mut out = Vec::new();
        collect_names(&guard, &mut out);
        out
    }
}

fn find_connection(nodes: &[ConnectionNode], id: &str) -> Option<ConnectParams> {
    for node in nodes {
        match node {
            ConnectionNode::Connection {
                id: node_id,
                host,
                port,
                username,
                credential,
                ..
            } if node_id == id => {
                return credential.as_ref().map(|credential| ConnectParams {
                    host: host.clone(),
                    port: *port,
                    username: username.clone(),
                    credential: credential.clone(),
                });
            }
            ConnectionNode::Folder { children, .. } => {
                if let Some(params) = find_connection(children, id) {
                    return Some(params);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_names(nodes: &[ConnectionNode], out: &mut Vec<(String, String)>) {
    for node in nodes {
        match node {
            ConnectionNode::Connection { id, name, .. } => {
                out.push((id.clone(), name.clone()));
            }
            ConnectionNode::Folder { children, .. } => collect_names(children, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> Vec<ConnectionNode> {
        vec![
            ConnectionNode::Folder {
                id: "folder-prod".to_string(),
                name: "Production".to_string(),
                children: vec![ConnectionNode::Connection {
                    id: "conn-web".to_string(),
                    name: "web-01".to_string(),
                    host: "web01.example.com".to_string(),
                    port: 22,
                    username: "deploy".to_string(),
                    credential: Some(Credential::Password {
                        password: "hunter2".to_string(),
                    }),
                }],
            },
            ConnectionNode::Connection {
                id: "conn-lab".to_string(),
                name: "lab box".to_string(),
                host: "10.0.0.5".to_string(),
                port: 2222,
                username: "admin".to_string(),
                credential: None,
            },
        ]
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::load(dir.path().join("connections.json")).unwrap();
        assert!(store.connection_names().is_empty());
        assert!(store.resolve("anything").is_none());
    }

    #[test]
    fn test_resolve_nested_connection() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::load(dir.path().join("connections.json")).unwrap();
        store.replace(sample_tree()).unwrap();

        let params = store.resolve("conn-web").expect("should resolve");
        assert_eq!(params.host, "web01.example.com");
        assert_eq!(params.port, 22);
        assert_eq!(params.username, "deploy");
        assert!(matches!(params.credential, Credential::Password { .. }));
    }

    #[test]
    fn test_resolve_folder_id_fails() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::load(dir.path().join("connections.json")).unwrap();
        store.replace(sample_tree()).unwrap();

        assert!(store.resolve("folder-prod").is_none());
    }

    #[test]
    fn test_resolve_without_credential_fails() {
        let dir = TempDir::new().unwrap();
        let store = ConnectionStore::load(dir.path().join("connections.json")).unwrap();
        store.replace(sample_tree()).unwrap();

        assert!(store.resolve("conn-lab").is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connections.json");

        let store = ConnectionStore::load(&path).unwrap();
        store.replace(sample_tree()).unwrap();
        drop(store);

        let reloaded = ConnectionStore::load(&path).unwrap();
        let names = reloaded.connection_names();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&("conn-web".to_string(), "web-01".to_string())));
        assert!(names.contains(&("conn-lab".to_string(), "lab box".to_string())));
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deep").join("connections.json");

        let store = ConnectionStore::load(&path).unwrap();
        store.replace(sample_tree()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_port_defaults_to_22() {
        let json = r#"[
            {
                "type": "connection",
                "id": "c1",
                "name": "no port",
                "host": "h",
                "username": "u",
                "credential": { "kind": "password", "password": "p" }
            }
        ]"#;
        let tree: Vec<ConnectionNode> = serde_json::from_str(json).unwrap();
        match &tree[0] {
            ConnectionNode::Connection { port, .. } => assert_eq!(*port, 22),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_load_corrupt_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connections.json");
        fs::write(&path, "{not json").unwrap();

        let result = ConnectionStore::load(&path);
        assert!(result.is_err());
    }
}
