//! Per-application cube cache and the compiled-program cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::coordinate::{fold_case, Coordinate};
use crate::cube::NCube;
use crate::error::{NCubeError, Result};
use crate::program::{CellProgram, ProgramLibrary};
use crate::stack::{CubeResolver, EvalContext};
use crate::store::ApplicationId;
use crate::trace::Output;
use crate::value::Value;

// ── ProgramCache ──

/// Compiled programs keyed by source. Built at most once per key.
///
/// Readers of a published entry take only the read lock. A miss takes a
/// per-key gate, re-checks, compiles, and publishes.
#[derive(Default)]
pub struct ProgramCache {
    compiled: RwLock<HashMap<String, Arc<dyn CellProgram>>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn CellProgram>> {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or_compile<F>(&self, key: &str, compile: F) -> Result<Arc<dyn CellProgram>>
    where
        F: FnOnce() -> Result<Arc<dyn CellProgram>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let gate = {
            let mut gates = self
                .gates
                .lock()
                .map_err(|e| NCubeError::IllegalState(format!("Lock: {}", e)))?;
            Arc::clone(gates.entry(key.to_string()).or_default())
        };
        let _held = gate
            .lock()
            .map_err(|e| NCubeError::IllegalState(format!("Lock: {}", e)))?;

        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let program = compile()?;
        self.compiled
            .write()
            .map_err(|e| NCubeError::IllegalState(format!("Lock: {}", e)))?
            .insert(key.to_string(), Arc::clone(&program));
        debug!(key, "compiled program");
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ── CubeRegistry ──

/// Loaded cubes, grouped by application. Names are case-insensitive.
pub struct CubeRegistry {
    apps: RwLock<HashMap<ApplicationId, HashMap<String, Arc<NCube>>>>,
    library: Arc<ProgramLibrary>,
    config: EngineConfig,
}

impl CubeRegistry {
    pub fn new(library: ProgramLibrary) -> Self {
        Self {
            apps: RwLock::new(HashMap::new()),
            library: Arc::new(library),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn library(&self) -> &ProgramLibrary {
        &self.library
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Make sure an application entry exists.
    pub fn create(&self, app: &ApplicationId) {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app.clone())
            .or_default();
    }

    pub fn insert(&self, app: &ApplicationId, cube: NCube) -> Arc<NCube> {
        let cube = Arc::new(cube);
        let name = fold_case(cube.name());
        info!(app = %app, cube = cube.name(), sha = cube.content_hash(), "cube cached");
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(app.clone())
            .or_default()
            .insert(name, Arc::clone(&cube));
        cube
    }

    pub fn get(&self, app: &ApplicationId, name: &str) -> Option<Arc<NCube>> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(app)?
            .get(&fold_case(name))
            .cloned()
    }

    pub fn remove(&self, app: &ApplicationId, name: &str) -> Option<Arc<NCube>> {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(app)?
            .remove(&fold_case(name))
    }

    /// Drop every cached cube of one application.
    pub fn clear(&self, app: &ApplicationId) {
        if let Some(cubes) = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(app)
        {
            cubes.clear();
        }
    }

    pub fn clear_all(&self) {
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.library.clear_compiled();
    }

    pub fn cube_names(&self, app: &ApplicationId) -> Vec<String> {
        let apps = self.apps.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = apps
            .get(app)
            .map(|cubes| cubes.values().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Resolver over one application's cubes.
    pub fn scope<'a>(&'a self, app: &'a ApplicationId) -> AppScope<'a> {
        AppScope {
            registry: self,
            app,
        }
    }

    /// Evaluate a cached cube, following references within the same application.
    pub fn get_cell(
        &self,
        app: &ApplicationId,
        cube: &str,
        input: &Coordinate,
        output: &mut Output,
    ) -> Result<Value> {
        let target = self
            .get(app, cube)
            .ok_or_else(|| NCubeError::UnknownCube(cube.to_string()))?;
        let scope = self.scope(app);
        let mut ctx = EvalContext::new()
            .with_resolver(&scope)
            .with_config(self.config.clone());
        target.get_cell_in(input, output, &mut ctx)
    }
}

impl fmt::Debug for CubeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let apps = self.apps.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CubeRegistry")
            .field("apps", &apps.len())
            .field("library", &self.library)
            .finish()
    }
}

pub struct AppScope<'a> {
    registry: &'a CubeRegistry,
    app: &'a ApplicationId,
}

impl CubeResolver for AppScope<'_> {
    fn resolve(&self, name: &str) -> Option<Arc<NCube>> {
        self.registry.get(self.app, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ClosureProgram;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn compile_runs_once_under_contention() {
        let cache = Arc::new(ProgramCache::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                thread::spawn(move || {
                    cache
                        .get_or_compile("k", || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(Arc::new(ClosureProgram::value("k", |_| 1)) as Arc<dyn CellProgram>)
                        })
                        .unwrap()
                })
            })
            .collect();
        let programs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(programs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_compile_is_not_cached() {
        let cache = ProgramCache::new();
        let err = cache.get_or_compile("bad", || Err(NCubeError::invalid("nope")));
        assert!(err.is_err());
        assert!(cache.get("bad").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn registry_is_case_insensitive_and_per_app() {
        let registry = CubeRegistry::new(ProgramLibrary::new());
        let app = ApplicationId::new("acme", "pricing", "1.0.0");
        let other = ApplicationId::new("acme", "claims", "1.0.0");
        registry.insert(&app, NCube::new("Rates").unwrap());
        assert!(registry.get(&app, "RATES").is_some());
        assert!(registry.get(&other, "Rates").is_none());
        assert_eq!(registry.cube_names(&app), vec!["Rates".to_string()]);
        registry.clear(&app);
        assert!(registry.get(&app, "rates").is_none());
    }
}
