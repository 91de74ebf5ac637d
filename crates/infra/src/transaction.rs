//! Unit-of-work coordinator.
//!
//! Every public ledger operation runs through [`TransactionCoordinator::run`]
//! (or its retrying sibling). The closure receives the open transaction; if it
//! returns `Ok` the transaction commits, otherwise the handle is dropped and
//! every write of the attempt is discarded together with its row locks.
//!
//! Nothing inside the closure commits, so nested ledger calls compose into one
//! atomic unit without a "top-level vs. inside transaction" switch.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, warn};

use pickledger_core::DomainResult;

use crate::config::RetryPolicy;
use crate::storage::{LedgerStore, Transaction};

pub struct TransactionCoordinator<S: LedgerStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: LedgerStore> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S: LedgerStore> TransactionCoordinator<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `work` in a fresh transaction: commit on `Ok`, roll back on `Err`.
    pub fn run<T, F>(&self, op: &'static str, work: F) -> DomainResult<T>
    where
        F: FnOnce(&mut S::Tx) -> DomainResult<T>,
    {
        let mut tx = self.store.begin()?;
        match work(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                debug!(op, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                drop(tx);
                if err.is_fatal() {
                    error!(op, error = %err, "invariant violation, transaction rolled back");
                } else {
                    warn!(op, error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }

    /// Like [`Self::run`], re-running the whole unit of work when it fails with a
    /// retryable error, up to the configured number of attempts.
    pub fn run_with_retry<T, F>(&self, op: &'static str, mut work: F) -> DomainResult<T>
    where
        F: FnMut(&mut S::Tx) -> DomainResult<T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run(op, &mut work) {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(op, attempt, max_attempts, error = %err, "retrying transient failure");
                    thread::sleep(self.retry.backoff(attempt));
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
