//! Store, registry and repository working together.

use std::sync::Arc;

use ncube_core::{
    ApplicationId, Axis, CellValue, ClosureProgram, Coordinate, CubeRegistry, CubeRepository,
    CubeStore, MemoryCubeStore, NCube, Output, ProgramLibrary, ReferenceProgram, Revision,
    SerializedCube, Value, ValueType,
};
use pretty_assertions::assert_eq;

fn app() -> ApplicationId {
    ApplicationId::new("acme", "pricing", "2.0.0")
}

fn library() -> ProgramLibrary {
    let mut lib = ProgramLibrary::new();
    lib.register(ClosureProgram::value("double-age", |ctx| {
        ctx.input("age").and_then(Value::as_i64).unwrap_or_default() * 2
    }));
    lib
}

fn rates(lib: &ProgramLibrary) -> NCube {
    let mut cube = NCube::new("Rates").unwrap();
    let mut state = Axis::discrete("State", ValueType::String, true).unwrap();
    state.add_column("OH").unwrap();
    cube.add_axis(state).unwrap();
    cube.set_cell(&Coordinate::new().with("State", "OH"), 1.5).unwrap();
    let doubled = lib.closure("double-age").unwrap().clone();
    cube.set_cell(&Coordinate::new(), CellValue::program(doubled)).unwrap();
    cube
}

fn front() -> NCube {
    let mut cube = NCube::new("Front").unwrap();
    cube.set_default_cell_value(Some(CellValue::program(ReferenceProgram::new("Rates"))));
    cube
}

fn repository(store: Arc<dyn CubeStore>) -> CubeRepository {
    CubeRepository::new(store, Arc::new(CubeRegistry::new(library())))
}

#[tokio::test]
async fn cubes_survive_a_fresh_registry() {
    let store: Arc<dyn CubeStore> = Arc::new(MemoryCubeStore::new());
    let lib = library();

    let writer = repository(Arc::clone(&store));
    writer.save_cube(&app(), rates(&lib)).await.unwrap();
    writer.save_cube(&app(), front()).await.unwrap();

    // A second process sharing only the store.
    let reader = repository(store);
    let mut output = Output::new();
    let oh = reader
        .get_cell(&app(), "Front", &Coordinate::new().with("State", "OH"), &mut output)
        .await
        .unwrap();
    assert_eq!(oh, Value::Double(1.5));

    let elsewhere = reader
        .get_cell(
            &app(),
            "front",
            &Coordinate::new().with("State", "TX").with("age", 21),
            &mut Output::new(),
        )
        .await
        .unwrap();
    assert_eq!(elsewhere, Value::Long(42));
}

#[tokio::test]
async fn stored_hash_matches_hydrated_cube() {
    let store = Arc::new(MemoryCubeStore::new());
    let lib = library();
    let cube = rates(&lib);
    store
        .save(&app(), &SerializedCube::from_cube(&cube).unwrap())
        .await
        .unwrap();

    let stored = store
        .load(&app(), "Rates", Revision::Latest)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sha, cube.content_hash());
    let hydrated = stored.hydrate(&lib).unwrap();
    assert_eq!(hydrated.content_hash(), stored.sha);
}

#[tokio::test]
async fn saving_an_edit_bumps_the_revision_and_the_cache() {
    let store: Arc<dyn CubeStore> = Arc::new(MemoryCubeStore::new());
    let repo = repository(Arc::clone(&store));
    let lib = library();

    assert_eq!(repo.save_cube(&app(), rates(&lib)).await.unwrap(), 1);
    assert_eq!(repo.save_cube(&app(), rates(&lib)).await.unwrap(), 1);

    let mut edited = rates(&lib);
    edited
        .set_cell(&Coordinate::new().with("State", "OH"), 2.5)
        .unwrap();
    assert_eq!(repo.save_cube(&app(), edited).await.unwrap(), 2);

    let cached = repo.load_cube(&app(), "Rates").await.unwrap().unwrap();
    let value = cached
        .get_cell(&Coordinate::new().with("State", "OH"), &mut Output::new())
        .unwrap();
    assert_eq!(value, Value::Double(2.5));
    assert_eq!(store.revisions(&app(), "rates").await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn reference_closure_lists_reachable_cubes() {
    let repo = repository(Arc::new(MemoryCubeStore::new()));
    let lib = library();
    repo.save_cube(&app(), rates(&lib)).await.unwrap();
    repo.save_cube(&app(), front()).await.unwrap();

    let reachable = repo.referenced_cubes_closure(&app(), "Front").await.unwrap();
    assert_eq!(reachable.into_iter().collect::<Vec<_>>(), vec!["Front", "Rates"]);

    assert!(repo.delete_cube(&app(), "Rates").await.unwrap());
    assert!(repo.referenced_cubes_closure(&app(), "Front").await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_produce_distinct_revisions() {
    let store = Arc::new(MemoryCubeStore::new());
    let mut handles = Vec::new();
    for i in 0..8i64 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut cube = NCube::new("Counter").unwrap();
            cube.set_default_cell_value(Some(CellValue::from(i)));
            let snapshot = SerializedCube::from_cube(&cube).unwrap();
            store.save(&app(), &snapshot).await.unwrap()
        }));
    }
    let mut revisions = Vec::new();
    for handle in handles {
        revisions.push(handle.await.unwrap());
    }
    revisions.sort_unstable();
    revisions.dedup();
    assert_eq!(revisions, (1..=8).collect::<Vec<u64>>());
}
