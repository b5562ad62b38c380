//! Hosting layer: loads cubes from a [`CubeStore`] into the [`CubeRegistry`]
//! and evaluates them with cross-cube references resolved.

use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

use crate::coordinate::{fold_case, Coordinate};
use crate::cube::NCube;
use crate::registry::CubeRegistry;
use crate::store::{ApplicationId, CubeStore, Revision, SerializedCube};
use crate::trace::Output;
use crate::value::Value;

pub struct CubeRepository {
    store: Arc<dyn CubeStore>,
    registry: Arc<CubeRegistry>,
}

impl CubeRepository {
    pub fn new(store: Arc<dyn CubeStore>, registry: Arc<CubeRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<CubeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CubeStore> {
        &self.store
    }

    /// Latest revision of a cube, from the registry when already loaded.
    pub async fn load_cube(&self, app: &ApplicationId, name: &str) -> Result<Option<Arc<NCube>>> {
        if let Some(cube) = self.registry.get(app, name) {
            return Ok(Some(cube));
        }
        let Some(stored) = self.store.load(app, name, Revision::Latest).await? else {
            debug!(app = %app, cube = name, "cube not in store");
            return Ok(None);
        };
        let cube = stored
            .hydrate(self.registry.library())
            .with_context(|| format!("Failed to hydrate {} r{}", stored.name, stored.revision))?;
        Ok(Some(self.registry.insert(app, cube)))
    }

    /// A specific revision, hydrated fresh. The registry is not touched.
    pub async fn load_revision(
        &self,
        app: &ApplicationId,
        name: &str,
        revision: u64,
    ) -> Result<Option<NCube>> {
        let Some(stored) = self.store.load(app, name, Revision::Exact(revision)).await? else {
            return Ok(None);
        };
        Ok(Some(stored.hydrate(self.registry.library())?))
    }

    /// Persist a cube and make it the cached copy. Returns the revision.
    pub async fn save_cube(&self, app: &ApplicationId, cube: NCube) -> Result<u64> {
        let snapshot = SerializedCube::from_cube(&cube)?;
        let revision = self.store.save(app, &snapshot).await?;
        self.registry.insert(app, cube);
        Ok(revision)
    }

    pub async fn delete_cube(&self, app: &ApplicationId, name: &str) -> Result<bool> {
        self.registry.remove(app, name);
        self.store.delete(app, name).await
    }

    /// Load every stored cube of the application. Returns how many were loaded.
    pub async fn preload(&self, app: &ApplicationId) -> Result<usize> {
        let names = self.store.list(app).await?;
        let mut loaded = 0;
        for name in &names {
            if self.load_cube(app, name).await?.is_some() {
                loaded += 1;
            }
        }
        info!(app = %app, loaded, "application preloaded");
        Ok(loaded)
    }

    /// Every cube reachable from `name` through program references,
    /// `name` included. Missing cubes are reported, not skipped.
    pub async fn referenced_cubes_closure(
        &self,
        app: &ApplicationId,
        name: &str,
    ) -> Result<BTreeSet<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(next) = queue.pop_front() {
            if !visited.insert(fold_case(&next)) {
                continue;
            }
            let cube = self
                .load_cube(app, &next)
                .await?
                .ok_or_else(|| anyhow!("Cube {} referenced but not found in {}", next, app))?;
            found.insert(cube.name().to_string());
            for referenced in cube.referenced_cube_names() {
                if !visited.contains(&fold_case(&referenced)) {
                    queue.push_back(referenced);
                }
            }
        }
        Ok(found)
    }

    /// Evaluate a cube after loading everything it can reach.
    pub async fn get_cell(
        &self,
        app: &ApplicationId,
        name: &str,
        input: &Coordinate,
        output: &mut Output,
    ) -> Result<Value> {
        self.referenced_cubes_closure(app, name).await?;
        Ok(self.registry.get_cell(app, name, input, output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;
    use crate::cell::CellValue;
    use crate::program::{ProgramLibrary, ReferenceProgram};
    use crate::store::MemoryCubeStore;
    use crate::value::ValueType;

    fn repo() -> CubeRepository {
        CubeRepository::new(
            Arc::new(MemoryCubeStore::new()),
            Arc::new(CubeRegistry::new(ProgramLibrary::new())),
        )
    }

    fn referencing(name: &str, target: &str) -> NCube {
        let mut cube = NCube::new(name).unwrap();
        cube.set_default_cell_value(Some(CellValue::program(ReferenceProgram::new(target))));
        cube
    }

    fn leaf(name: &str, value: i64) -> NCube {
        let mut cube = NCube::new(name).unwrap();
        let mut axis = Axis::discrete("State", ValueType::String, false).unwrap();
        axis.add_column("OH").unwrap();
        cube.add_axis(axis).unwrap();
        cube.set_cell(&[("State", "OH")].into_iter().collect(), value)
            .unwrap();
        cube
    }

    #[tokio::test]
    async fn closure_follows_references_and_survives_cycles() {
        let repo = repo();
        let app = ApplicationId::new("acme", "pricing", "1.0.0");
        repo.save_cube(&app, referencing("A", "B")).await.unwrap();
        repo.save_cube(&app, referencing("B", "A")).await.unwrap();
        repo.registry().clear(&app);

        let names = repo.referenced_cubes_closure(&app, "a").await.unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn missing_reference_is_an_error() {
        let repo = repo();
        let app = ApplicationId::new("acme", "pricing", "1.0.0");
        repo.save_cube(&app, referencing("A", "Gone")).await.unwrap();
        let err = repo.referenced_cubes_closure(&app, "A").await.unwrap_err();
        assert!(err.to_string().contains("Gone"));
    }

    #[tokio::test]
    async fn get_cell_loads_referenced_cubes_from_store() {
        let repo = repo();
        let app = ApplicationId::new("acme", "pricing", "1.0.0");
        repo.save_cube(&app, referencing("Front", "Rates")).await.unwrap();
        repo.save_cube(&app, leaf("Rates", 42)).await.unwrap();
        repo.registry().clear(&app);

        let mut output = Output::new();
        let input: Coordinate = [("State", "OH")].into_iter().collect();
        let value = repo.get_cell(&app, "Front", &input, &mut output).await.unwrap();
        assert_eq!(value, Value::Long(42));
        assert_eq!(repo.registry().cube_names(&app), vec!["Front", "Rates"]);
    }

    #[tokio::test]
    async fn load_revision_returns_history() {
        let repo = repo();
        let app = ApplicationId::new("acme", "pricing", "1.0.0");
        assert_eq!(repo.save_cube(&app, leaf("Rates", 1)).await.unwrap(), 1);
        assert_eq!(repo.save_cube(&app, leaf("Rates", 2)).await.unwrap(), 2);

        let old = repo.load_revision(&app, "Rates", 1).await.unwrap().unwrap();
        assert_eq!(old.content_hash(), leaf("Rates", 1).content_hash());
        assert!(repo.load_revision(&app, "Rates", 5).await.unwrap().is_none());
        assert_eq!(repo.preload(&app).await.unwrap(), 1);
    }
}
