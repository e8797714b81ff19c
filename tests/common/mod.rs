//! Shared fakes for driving the pipeline without S3, Kafka or an
//! embedding service.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docflow_ingest::broker::EventPublisher;
use docflow_ingest::chunk::Chunker;
use docflow_ingest::dead_letter::DeadLetterRecord;
use docflow_ingest::embedding::Embedder;
use docflow_ingest::error::{ErrorKind, IngestError, Origin, Result};
use docflow_ingest::models::UploadEvent;
use docflow_ingest::pipeline::Pipeline;
use docflow_ingest::retry::RetryPolicy;
use docflow_ingest::storage::ObjectStore;
use docflow_ingest::store::memory::MemoryStore;

// ============ Object store ============

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    head_error: Mutex<Option<IngestError>>,
    fetch_failures: Mutex<VecDeque<IngestError>>,
    fetch_calls: AtomicUsize,
}

impl FakeObjectStore {
    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.into());
    }

    pub fn fail_head_with(&self, err: IngestError) {
        *self.head_error.lock().unwrap() = Some(err);
    }

    /// Queue errors returned by the next fetch calls, in order.
    pub fn fail_next_fetch(&self, err: IngestError) {
        self.fetch_failures.lock().unwrap().push_back(err);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

fn no_such_key(key: &str) -> IngestError {
    IngestError::new(
        ErrorKind::NotFound,
        Origin::Storage,
        format!("object not found: {}", key),
    )
    .with_code("NoSuchKey")
    .with_status(404)
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn verify_exists(&self, key: &str) -> Result<()> {
        if let Some(err) = self.head_error.lock().unwrap().clone() {
            return Err(err);
        }
        if self.objects.lock().unwrap().contains_key(key) {
            Ok(())
        } else {
            Err(no_such_key(key))
        }
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| no_such_key(key))
    }
}

// ============ Embedder ============

pub struct FakeEmbedder {
    dims: usize,
    calls: AtomicUsize,
    /// 1-based call number that fails, together with the error to return.
    fail_on_call: Mutex<Option<(usize, IngestError)>>,
    always_fail: Mutex<Option<IngestError>>,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            fail_on_call: Mutex::new(None),
            always_fail: Mutex::new(None),
        }
    }

    pub fn fail_on_call(&self, call: usize, err: IngestError) {
        *self.fail_on_call.lock().unwrap() = Some((call, err));
    }

    pub fn always_fail(&self, err: IngestError) {
        *self.always_fail.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some((n, err)) = self.fail_on_call.lock().unwrap().clone() {
            if n == call {
                return Err(err);
            }
        }
        let mut v = vec![0.0; self.dims];
        v[0] = text.chars().count() as f32;
        Ok(v)
    }
}

// ============ Publisher ============

#[derive(Default)]
pub struct RecordingPublisher {
    dead_letters: Mutex<Vec<DeadLetterRecord>>,
    republished: Mutex<Vec<UploadEvent>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn republished(&self) -> Vec<UploadEvent> {
        self.republished.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::transient(Origin::Broker, "broker unavailable"));
        }
        self.dead_letters.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn republish(&self, event: &UploadEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::transient(Origin::Broker, "broker unavailable"));
        }
        self.republished.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ============ Harness ============

pub struct Harness {
    pub objects: Arc<FakeObjectStore>,
    pub embedder: Arc<FakeEmbedder>,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub pipeline: Pipeline,
}

pub fn instant_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::ZERO,
        max_jitter: Duration::ZERO,
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_chunker(Chunker::default())
    }

    pub fn with_chunker(chunker: Chunker) -> Self {
        let objects = Arc::new(FakeObjectStore::default());
        let embedder = Arc::new(FakeEmbedder::new(4));
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Pipeline::new(
            objects.clone(),
            embedder.clone(),
            store.clone(),
            publisher.clone(),
            chunker,
            instant_retries(),
        );
        Self {
            objects,
            embedder,
            store,
            publisher,
            pipeline,
        }
    }

    /// Register a document row and its object, returning the upload event.
    pub fn upload(&self, id: &str, file_name: &str, bytes: impl Into<Vec<u8>>) -> UploadEvent {
        let event = UploadEvent {
            event_id: format!("evt-{}", id),
            document_id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            storage_key: format!("tenants/tenant-1/{}", file_name),
            file_name: file_name.to_string(),
        };
        self.store.insert_document(&event);
        self.objects.put(&event.storage_key, bytes);
        event
    }
}

pub fn payload(event: &UploadEvent) -> Vec<u8> {
    serde_json::to_vec(event).unwrap()
}

pub fn letters(n: usize) -> String {
    (0..n).map(|i| char::from(b'a' + (i % 26) as u8)).collect()
}
