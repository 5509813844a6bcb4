// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Background worker.
//!
//! A single thread drains an unbounded job queue in order. Producers never
//! block; the worker blocks only while the queue is empty.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::identity::{Jid, KeyDirectory, PersonalKey};
use crate::model::{lock_message, EventDispatcher, MessageHandle};

use super::coder;
use super::error::DeliveryError;
use super::DeliveryEvent;

/// Shared slot for the personal key; replaced wholesale on re-import.
pub(crate) type KeySlot = Arc<RwLock<Option<Arc<PersonalKey>>>>;

/// Work items.
pub enum Job {
    /// Decrypt the body of an incoming message.
    DecryptMessage(MessageHandle),
    /// Decrypt the downloaded attachment of a message.
    DecryptAttachment(MessageHandle),
    /// Stop after the jobs queued before this one.
    Shutdown,
}

/// Everything a job needs besides the message.
pub(crate) struct WorkerContext {
    pub key: KeySlot,
    pub keys: Arc<dyn KeyDirectory>,
    pub events: Arc<EventDispatcher<DeliveryEvent>>,
    pub attachment_suffix: String,
}

impl WorkerContext {
    fn personal_key(&self) -> Option<Arc<PersonalKey>> {
        self.key.read().expect("key lock poisoned").clone()
    }
}

/// Handle to the worker thread.
pub struct Worker {
    sender: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn spawn(context: WorkerContext) -> Result<Self, DeliveryError> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("konverse-worker".to_string())
            .spawn(move || run(receiver, context))?;

        Ok(Worker {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queues a job.
    pub fn enqueue(&self, job: Job) -> Result<(), DeliveryError> {
        let sender = self.sender.lock().expect("mutex poisoned");
        sender
            .as_ref()
            .ok_or(DeliveryError::WorkerStopped)?
            .send(job)
            .map_err(|_| DeliveryError::WorkerStopped)
    }

    /// Processes every job queued so far, then stops the thread.
    ///
    /// Later calls are no-ops.
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().expect("mutex poisoned").take() {
            // the thread may already be gone; join below reports it
            let _ = sender.send(Job::Shutdown);
        }
        if let Some(thread) = self.thread.lock().expect("mutex poisoned").take() {
            if thread.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().expect("mutex poisoned").is_some()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(receiver: Receiver<Job>, context: WorkerContext) {
    debug!("Worker started");
    while let Ok(job) = receiver.recv() {
        match job {
            Job::DecryptMessage(handle) => decrypt_message(&context, &handle),
            Job::DecryptAttachment(handle) => decrypt_attachment(&context, &handle),
            Job::Shutdown => break,
        }
    }
    debug!("Worker stopped");
}

fn decrypt_message(context: &WorkerContext, handle: &MessageHandle) {
    let key = context.personal_key();
    let (xmpp_id, sender, errors) = {
        let mut message = lock_message(handle);
        let errors = coder::decrypt_message(&mut message, key.as_deref(), &*context.keys);
        (
            message.xmpp_id().to_string(),
            message.sender().map(Jid::to_bare),
            errors,
        )
    };

    if let Some(contact) = sender {
        if errors.iter().any(|e| e.wants_key_refresh()) {
            info!(contact = %contact, "Requesting public key");
            context.events.dispatch(DeliveryEvent::KeyRequested { contact });
        }
    }
    context
        .events
        .dispatch(DeliveryEvent::DecryptionFinished { xmpp_id, errors });
}

fn decrypt_attachment(context: &WorkerContext, handle: &MessageHandle) {
    let key = context.personal_key();
    let (xmpp_id, result) = {
        let mut message = lock_message(handle);
        let result = coder::decrypt_attachment(
            &mut message,
            key.as_deref(),
            &*context.keys,
            &context.attachment_suffix,
        );
        (message.xmpp_id().to_string(), result)
    };

    match result {
        Ok(Some(path)) => {
            context
                .events
                .dispatch(DeliveryEvent::AttachmentDecrypted { xmpp_id, path });
        }
        Ok(None) => debug!(xmpp_id = %xmpp_id, "Attachment not decrypted"),
        Err(e) => warn!(xmpp_id = %xmpp_id, error = %e, "Attachment decryption failed"),
    }
}
