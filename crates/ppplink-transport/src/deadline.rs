//! Read/write deadline holder shared by transport implementations

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

use crate::{TransportError, TransportResult};

/// An optional absolute deadline. `None` means operations may block forever.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Mutex<Option<Instant>>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, deadline: Option<Instant>) {
        *self.at.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    pub fn get(&self) -> Option<Instant> {
        *self.at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op`, failing with [`TransportError::Timeout`] once the deadline
    /// passes. An already expired deadline fails without polling `op`.
    pub async fn run<T, F>(&self, op: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        match self.get() {
            Some(at) if at <= Instant::now() => Err(TransportError::Timeout),
            Some(at) => tokio::time::timeout_at(at, op)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => op.await,
        }
    }
}
