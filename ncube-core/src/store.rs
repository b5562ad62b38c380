use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::coordinate::fold_case;
use crate::cube::NCube;
use crate::program::ProgramFactory;

// ── Addressing ──

pub const DEFAULT_BRANCH: &str = "HEAD";

/// Which application a cube belongs to. Cubes are named per application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    pub tenant: String,
    pub app: String,
    pub version: String,
    pub branch: String,
}

impl ApplicationId {
    pub fn new(
        tenant: impl Into<String>,
        app: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            app: app.into(),
            version: version.into(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.tenant, self.app, self.version, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Revision {
    Latest,
    Exact(u64),
}

// ── Stored form ──

/// One saved revision of a cube.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedCube {
    pub name: String,
    pub revision: u64,
    pub sha: String,
    pub json: String,
    pub saved_at: i64,
}

impl SerializedCube {
    /// Snapshot a cube. The store assigns the revision on save.
    pub fn from_cube(cube: &NCube) -> Result<Self> {
        Ok(Self {
            name: cube.name().to_string(),
            revision: 0,
            sha: cube.content_hash().to_string(),
            json: cube.to_json()?,
            saved_at: now_ms(),
        })
    }

    pub fn hydrate(&self, factory: &dyn ProgramFactory) -> Result<NCube> {
        let cube = NCube::from_json(&self.json, factory)?;
        info!(cube = %self.name, revision = self.revision, "cube hydrated");
        Ok(cube)
    }
}

/// Persistence for serialized cubes, keyed by application and name.
#[async_trait]
pub trait CubeStore: Send + Sync {
    /// Store a new revision and return its number. Saving content identical
    /// to the latest revision stores nothing and returns that revision.
    async fn save(&self, app: &ApplicationId, cube: &SerializedCube) -> Result<u64>;
    async fn load(
        &self,
        app: &ApplicationId,
        name: &str,
        revision: Revision,
    ) -> Result<Option<SerializedCube>>;
    async fn revisions(&self, app: &ApplicationId, name: &str) -> Result<Vec<u64>>;
    async fn list(&self, app: &ApplicationId) -> Result<Vec<String>>;
    /// Remove every revision. Returns whether anything was there.
    async fn delete(&self, app: &ApplicationId, name: &str) -> Result<bool>;
}

// ── MemoryCubeStore ──

type StoreKey = (ApplicationId, String);

/// In-memory CubeStore. Names are matched case-insensitively.
pub struct MemoryCubeStore {
    inner: RwLock<HashMap<StoreKey, Vec<SerializedCube>>>,
}

impl MemoryCubeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCubeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn store_key(app: &ApplicationId, name: &str) -> StoreKey {
    (app.clone(), fold_case(name))
}

#[async_trait]
impl CubeStore for MemoryCubeStore {
    async fn save(&self, app: &ApplicationId, cube: &SerializedCube) -> Result<u64> {
        if cube.name.trim().is_empty() {
            return Err(anyhow!("Cannot save a cube without a name"));
        }
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let history = store.entry(store_key(app, &cube.name)).or_default();

        if let Some(latest) = history.last() {
            if latest.sha == cube.sha {
                debug!(app = %app, cube = %cube.name, revision = latest.revision, "unchanged, not saved");
                return Ok(latest.revision);
            }
        }

        let revision = history.last().map_or(1, |r| r.revision + 1);
        let mut saved = cube.clone();
        saved.revision = revision;
        history.push(saved);
        info!(app = %app, cube = %cube.name, revision, "cube saved");
        Ok(revision)
    }

    async fn load(
        &self,
        app: &ApplicationId,
        name: &str,
        revision: Revision,
    ) -> Result<Option<SerializedCube>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let Some(history) = store.get(&store_key(app, name)) else {
            return Ok(None);
        };
        Ok(match revision {
            Revision::Latest => history.last().cloned(),
            Revision::Exact(n) => history.iter().find(|r| r.revision == n).cloned(),
        })
    }

    async fn revisions(&self, app: &ApplicationId, name: &str) -> Result<Vec<u64>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store
            .get(&store_key(app, name))
            .map(|h| h.iter().map(|r| r.revision).collect())
            .unwrap_or_default())
    }

    async fn list(&self, app: &ApplicationId) -> Result<Vec<String>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut names: Vec<String> = store
            .iter()
            .filter(|((a, _), history)| a == app && !history.is_empty())
            .filter_map(|(_, history)| history.last().map(|r| r.name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, app: &ApplicationId, name: &str) -> Result<bool> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let removed = store.remove(&store_key(app, name)).is_some();
        if removed {
            info!(app = %app, cube = name, "cube deleted");
        }
        Ok(removed)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::program::ProgramLibrary;
    use crate::value::ValueType;

    fn app() -> ApplicationId {
        ApplicationId::new("acme", "pricing", "1.0.0")
    }

    fn sample_cube(name: &str, cell: i64) -> NCube {
        let mut cube = NCube::new(name).unwrap();
        let mut axis = Axis::discrete("State", ValueType::String, false).unwrap();
        axis.add_column("OH").unwrap();
        cube.add_axis(axis).unwrap();
        cube.set_cell(&[("State", "OH")].into_iter().collect(), cell)
            .unwrap();
        cube
    }

    /// Saving then loading returns the same content.
    #[tokio::test]
    async fn save_load_round_trip() {
        let store = MemoryCubeStore::new();
        let cube = sample_cube("Rates", 1);
        let rev = store
            .save(&app(), &SerializedCube::from_cube(&cube).unwrap())
            .await
            .unwrap();
        assert_eq!(rev, 1);

        let loaded = store
            .load(&app(), "rates", Revision::Latest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.revision, 1);
        let back = loaded.hydrate(&ProgramLibrary::new()).unwrap();
        assert_eq!(back.content_hash(), cube.content_hash());
    }

    /// Unchanged content does not create a revision.
    #[tokio::test]
    async fn identical_save_is_noop() {
        let store = MemoryCubeStore::new();
        let snapshot = SerializedCube::from_cube(&sample_cube("Rates", 1)).unwrap();
        assert_eq!(store.save(&app(), &snapshot).await.unwrap(), 1);
        assert_eq!(store.save(&app(), &snapshot).await.unwrap(), 1);

        let changed = SerializedCube::from_cube(&sample_cube("Rates", 2)).unwrap();
        assert_eq!(store.save(&app(), &changed).await.unwrap(), 2);
        assert_eq!(store.revisions(&app(), "Rates").await.unwrap(), vec![1, 2]);

        let first = store
            .load(&app(), "Rates", Revision::Exact(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.sha, snapshot.sha);
        assert!(store
            .load(&app(), "Rates", Revision::Exact(9))
            .await
            .unwrap()
            .is_none());
    }

    /// Applications and branches are isolated from each other.
    #[tokio::test]
    async fn list_is_per_application() {
        let store = MemoryCubeStore::new();
        let feature = app().with_branch("feature");
        store
            .save(&app(), &SerializedCube::from_cube(&sample_cube("B", 1)).unwrap())
            .await
            .unwrap();
        store
            .save(&app(), &SerializedCube::from_cube(&sample_cube("A", 1)).unwrap())
            .await
            .unwrap();
        store
            .save(&feature, &SerializedCube::from_cube(&sample_cube("C", 1)).unwrap())
            .await
            .unwrap();

        assert_eq!(store.list(&app()).await.unwrap(), vec!["A", "B"]);
        assert_eq!(store.list(&feature).await.unwrap(), vec!["C"]);
        assert_eq!(feature.to_string(), "acme/pricing/1.0.0/feature");
    }

    #[tokio::test]
    async fn delete_removes_all_revisions() {
        let store = MemoryCubeStore::new();
        store
            .save(&app(), &SerializedCube::from_cube(&sample_cube("Rates", 1)).unwrap())
            .await
            .unwrap();
        assert!(store.delete(&app(), "RATES").await.unwrap());
        assert!(!store.delete(&app(), "RATES").await.unwrap());
        assert!(store.revisions(&app(), "Rates").await.unwrap().is_empty());
    }
}
