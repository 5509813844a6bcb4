// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Helpers
//!
//! Store, directory and orchestrator setup shared by the integration tests.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use konverse_core::storage::{Persistence, Row, StorageError, Value};
use konverse_core::{
    CoreConfig, DeliveryEvent, DeliveryOrchestrator, MemoryKeyDirectory, MockTransport, SqliteStore,
};

use super::fixtures::*;

/// A fresh migrated in-memory store.
pub fn memory_store() -> Arc<dyn Persistence> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

/// A key directory knowing Bob and Carol.
pub fn directory_with_peers() -> Arc<MemoryKeyDirectory> {
    let keys = MemoryKeyDirectory::new();
    keys.insert(&bob(), bob_key().public_key_ring());
    keys.insert(&carol(), carol_key().public_key_ring());
    Arc::new(keys)
}

/// Alice's orchestrator over an in-memory store and a connected mock transport.
pub fn alice_orchestrator(keys: Arc<MemoryKeyDirectory>) -> DeliveryOrchestrator<MockTransport> {
    alice_orchestrator_with(CoreConfig::in_dir(&std::env::temp_dir()), memory_store(), keys)
}

/// Alice's orchestrator with explicit config and store.
pub fn alice_orchestrator_with(
    config: CoreConfig,
    db: Arc<dyn Persistence>,
    keys: Arc<MemoryKeyDirectory>,
) -> DeliveryOrchestrator<MockTransport> {
    let orchestrator = DeliveryOrchestrator::new(config, db, MockTransport::new(), keys).unwrap();
    orchestrator.set_personal_key(alice_key());
    orchestrator
}

/// Collects every delivery event dispatched by `orchestrator`.
pub fn record_events(
    orchestrator: &DeliveryOrchestrator<MockTransport>,
) -> Arc<Mutex<Vec<DeliveryEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator
        .events()
        .add_handler(Arc::new(konverse_core::model::CallbackHandler::new(
            move |event: DeliveryEvent| sink.lock().unwrap().push(event),
        )));
    events
}

/// Streams delivery events, for waiting on the background worker.
pub fn event_channel(orchestrator: &DeliveryOrchestrator<MockTransport>) -> Receiver<DeliveryEvent> {
    let (sender, receiver) = mpsc::channel();
    let sender = Mutex::new(sender);
    orchestrator
        .events()
        .add_handler(Arc::new(konverse_core::model::CallbackHandler::new(
            move |event: DeliveryEvent| {
                let _ = sender.lock().unwrap().send(event);
            },
        )));
    receiver
}

/// Blocks until the worker reports the decryption of `xmpp_id`.
pub fn wait_for_decryption(events: &Receiver<DeliveryEvent>, xmpp_id: &str) {
    loop {
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            DeliveryEvent::DecryptionFinished { xmpp_id: id, .. } if id == xmpp_id => return,
            _ => continue,
        }
    }
}

/// Store whose every operation fails, for observing orphaned entities.
pub struct FailingPersistence;

impl Persistence for FailingPersistence {
    fn insert(&self, table: &str, _fields: &[(&str, Value)]) -> Result<i64, StorageError> {
        Err(StorageError::Unavailable(format!("insert into {}", table)))
    }

    fn update(&self, table: &str, _fields: &[(&str, Value)], _id: i64) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(format!("update {}", table)))
    }

    fn delete(&self, table: &str, _id: i64) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(format!("delete from {}", table)))
    }

    fn select_where(&self, table: &str, _column: &str, _value: Value) -> Result<Vec<Row>, StorageError> {
        Err(StorageError::Unavailable(format!("select from {}", table)))
    }
}
