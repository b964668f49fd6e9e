//! Compensating rollback for multi-step provisioning
//!
//! Each completed step pushes the future that undoes it. On failure the
//! stack is unwound newest-first; a compensation that fails is logged and
//! the unwind continues. Futures are lazy, so nothing runs unless
//! [`Saga::rollback`] is called.

use crate::error::Result;
use futures::future::BoxFuture;
use std::future::Future;
use tracing::{debug, error, info};

/// Outcome of unwinding a saga
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Compensations run
    pub attempted: usize,
    /// Labels of compensations that failed
    pub failed: Vec<String>,
}

impl RollbackReport {
    /// Whether every compensation succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered stack of compensations
pub struct Saga<'a> {
    name: String,
    steps: Vec<(String, BoxFuture<'a, Result<()>>)>,
}

impl<'a> Saga<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Register the compensation for a step that just succeeded
    pub fn push<F>(&mut self, label: impl Into<String>, compensation: F)
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        self.steps.push((label.into(), Box::pin(compensation)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Keep everything; compensations are dropped unrun
    pub fn commit(self) {
        debug!("{}: committed {} steps", self.name, self.steps.len());
    }

    /// Run compensations in reverse order
    pub async fn rollback(self) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.steps.is_empty() {
            return report;
        }

        info!("{}: rolling back {} steps", self.name, self.steps.len());
        for (label, compensation) in self.steps.into_iter().rev() {
            report.attempted += 1;
            match compensation.await {
                Ok(()) => debug!("{}: rolled back '{}'", self.name, label),
                Err(e) => {
                    error!("{}: rollback of '{}' failed: {}", self.name, label, e);
                    report.failed.push(label);
                }
            }
        }
        report
    }
}
