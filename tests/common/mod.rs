//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ledger_settlement::core::NotificationSender;
use ledger_settlement::types::{DeliveryError, NotificationBody};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Transport that answers from a script and records every request
///
/// Scripted results are used in order; once the script runs out every
/// request gets `fallback`.
pub struct ScriptedSender {
    script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
    fallback: u16,
    sent: Mutex<Vec<(String, NotificationBody)>>,
}

impl ScriptedSender {
    pub fn always(status: u16) -> Self {
        Self::with_script(Vec::new(), status)
    }

    pub fn with_script(script: Vec<Result<u16, DeliveryError>>, fallback: u16) -> Self {
        ScriptedSender {
            script: Mutex::new(script.into()),
            fallback,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every `(target, body)` sent so far
    pub fn sent(&self) -> Vec<(String, NotificationBody)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send(&self, target: &str, body: &NotificationBody) -> Result<u16, DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), body.clone()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }
}

pub fn transport_error() -> DeliveryError {
    DeliveryError::Transport {
        message: "connection refused".to_string(),
    }
}
