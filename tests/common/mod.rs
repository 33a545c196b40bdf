//! Shared fixtures: an in-memory data source with scripted availability and
//! a rig wiring two of them to a kernel context.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, unbounded};

use retcon::config::Registry;
use retcon::core::{Document, EntityName, ForeignKey, SourceName};
use retcon::kernel::trace::{ChannelSink, RoundTrace};
use retcon::kernel::Context;
use retcon::source::{DataSource, DataSourceError};
use retcon::store::MemoryStore;

pub const ENTITY: &str = "customer";
pub const SOURCE_DATA: &str = "data";
pub const SOURCE_TESTS: &str = "test-results";

pub fn entity() -> EntityName {
    EntityName::new(ENTITY).unwrap()
}

pub fn source(name: &str) -> SourceName {
    SourceName::new(name).unwrap()
}

pub fn fk(source_name: &str, key: &str) -> ForeignKey {
    ForeignKey::new(entity(), source(source_name), key).unwrap()
}

pub fn doc(json: serde_json::Value) -> Document {
    Document::from_json(&json).unwrap()
}

#[derive(Default)]
struct TestSourceState {
    next_key: u64,
    records: BTreeMap<String, Document>,
    available: bool,
}

/// In-memory data source with scripted availability.
#[derive(Clone)]
pub struct TestSource {
    name: String,
    entity: EntityName,
    source: SourceName,
    state: Arc<Mutex<TestSourceState>>,
}

impl TestSource {
    pub fn new(source_name: &str) -> Self {
        Self {
            name: source_name.to_string(),
            entity: entity(),
            source: source(source_name),
            state: Arc::new(Mutex::new(TestSourceState {
                next_key: 0,
                records: BTreeMap::new(),
                available: true,
            })),
        }
    }

    pub fn insert(&self, key: &str, document: Document) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(key.to_string(), document);
    }

    pub fn get(&self, key: &str) -> Option<Document> {
        self.state.lock().unwrap().records.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().records.keys().cloned().collect()
    }

    /// The single record, for sources expected to hold exactly one.
    pub fn only_record(&self) -> (String, Document) {
        let state = self.state.lock().unwrap();
        assert_eq!(
            state.records.len(),
            1,
            "{} should hold exactly one record",
            self.name
        );
        let (key, document) = state.records.iter().next().unwrap();
        (key.clone(), document.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().records.is_empty()
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    fn check_available(&self) -> Result<(), DataSourceError> {
        if self.state.lock().unwrap().available {
            Ok(())
        } else {
            Err(DataSourceError::Unavailable {
                reason: format!("{} is offline", self.name),
            })
        }
    }
}

impl DataSource for TestSource {
    fn create(&self, document: &Document) -> Result<ForeignKey, DataSourceError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        state.next_key += 1;
        let key = format!("{}-{}", self.name, state.next_key);
        state.records.insert(key.clone(), document.clone());
        drop(state);
        Ok(ForeignKey::new(self.entity.clone(), self.source.clone(), key).unwrap())
    }

    fn read(&self, fk: &ForeignKey) -> Result<Document, DataSourceError> {
        self.check_available()?;
        self.state
            .lock()
            .unwrap()
            .records
            .get(&fk.key)
            .cloned()
            .ok_or_else(|| DataSourceError::Gone { fk: fk.clone() })
    }

    fn update(&self, fk: &ForeignKey, document: &Document) -> Result<ForeignKey, DataSourceError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if !state.records.contains_key(&fk.key) {
            return Err(DataSourceError::Gone { fk: fk.clone() });
        }
        state.records.insert(fk.key.clone(), document.clone());
        Ok(fk.clone())
    }

    fn delete(&self, fk: &ForeignKey) -> Result<(), DataSourceError> {
        self.check_available()?;
        self.state.lock().unwrap().records.remove(&fk.key);
        Ok(())
    }
}

pub struct Rig {
    pub store: MemoryStore,
    pub context: Context,
    pub data: TestSource,
    pub tests: TestSource,
    pub traces: Receiver<RoundTrace>,
}

/// A `customer` entity reconciled across `data` and `test-results`, backed
/// by the in-memory store.
pub fn rig(policy: &str) -> Rig {
    let config = retcon::config::parse(&format!(
        r#"
[entities.{ENTITY}]
merge-policy = "{policy}"
enabled = ["{SOURCE_DATA}", "{SOURCE_TESTS}"]
timeout-ms = 2000

[entities.{ENTITY}.sources.{SOURCE_DATA}]
create = "unused"
read = "unused"
update = "unused"
delete = "unused"

[entities.{ENTITY}.sources."{SOURCE_TESTS}"]
create = "unused"
read = "unused"
update = "unused"
delete = "unused"
"#
    ))
    .unwrap();
    let registry = Registry::from_config(&config).unwrap();

    let store = MemoryStore::new();
    let data = TestSource::new(SOURCE_DATA);
    let tests = TestSource::new(SOURCE_TESTS);
    let (sender, traces) = unbounded();

    let context = Context::new(registry, Arc::new(store.clone()))
        .with_source(entity(), source(SOURCE_DATA), Arc::new(data.clone()))
        .with_source(entity(), source(SOURCE_TESTS), Arc::new(tests.clone()))
        .with_trace(Arc::new(ChannelSink::new(sender)));

    Rig {
        store,
        context,
        data,
        tests,
        traces,
    }
}
