// src/notify.rs
//! Fire-and-forget warning sink.
//!
//! Invalid references found by the command layer are reported here and never
//! affect control flow. The default sink forwards to `log::warn!`.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Recoverable problems reported to the scripting collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Warning {
    #[error("wrong room index = {0}")]
    WrongRoom(u32),
    #[error("no entity with id = {0}")]
    NoEntity(u32),
    #[error("no model with id = {0}")]
    NoModel(u32),
    #[error("entity or object #{0} is not a character")]
    NoCharacter(u32),
    #[error("no hair setup with index = {0}")]
    NoHairSetup(u32),
    #[error("can not create hair for entity #{entity}: {reason}")]
    CantCreateHair { entity: u32, reason: String },
    #[error("can not reset hair for entity #{0}")]
    CantResetHair(u32),
    #[error("no ragdoll setup with index = {0}")]
    NoRagdollSetup(u32),
    #[error("can not create ragdoll for entity #{entity}: {reason}")]
    CantCreateRagdoll { entity: u32, reason: String },
    #[error("can not remove ragdoll for entity #{0}")]
    CantRemoveRagdoll(u32),
    #[error("wrong flipmap index = {0}")]
    WrongFlipIndex(u32),
    #[error("wrong arguments count, must be {0}")]
    WrongArgsCount(&'static str),
}

/// Receiver for [`Warning`]s.
pub trait NotificationSink {
    fn warn(&self, warning: Warning);
}

/// Default sink: the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn warn(&self, warning: Warning) {
        log::warn!("{}", warning);
    }
}

/// Sink that keeps every warning, for inspection by the caller.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    warnings: Arc<Mutex<Vec<Warning>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.warnings.lock())
    }

    pub fn len(&self) -> usize {
        self.warnings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn warn(&self, warning: Warning) {
        log::debug!("recorded warning: {}", warning);
        self.warnings.lock().push(warning);
    }
}
