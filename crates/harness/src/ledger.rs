//! Stub and invocation ledger.
//!
//! Two key families live in the shared store under one namespace:
//!
//! - `<namespace>:stubs:<function>` holds the stub queue registered for a function;
//! - `<namespace>:ledger` is the append-only list of every invocation, in the
//!   order the store accepted the appends.
//!
//! Stubs are never popped. The stub served to an invocation is selected by that
//! invocation's ordinal among the ledger entries of the same function
//! ([`cursor`]), so no cursor state exists anywhere.

use std::sync::Arc;

use serde_json::Value;
use sfn_tester_types::{InvocationRecord, Stub};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{SharedStore, StoreError, escape_glob};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "sfn-tester";

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no stubs registered for function '{function_name}'")]
    NoStubsRegistered { function_name: String },

    #[error("function '{function_name}' was invoked {invocation} time(s) but only {registered} stub(s) are registered")]
    StubsExhausted {
        function_name: String,
        invocation: usize,
        registered: usize,
    },

    #[error("ledger entry is malformed: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl LedgerError {
    /// True for both flavours of "there is no stub for this invocation".
    pub fn is_stub_not_found(&self) -> bool {
        matches!(self, LedgerError::NoStubsRegistered { .. } | LedgerError::StubsExhausted { .. })
    }
}

/// Length of the ledger right after an invocation was appended; the record
/// itself sits at `position - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerPosition(pub usize);

/// Number of entries in `records` that belong to `function_name`.
pub fn cursor(records: &[InvocationRecord], function_name: &str) -> usize {
    records.iter().filter(|record| record.function_name == function_name).count()
}

/// Ledger protocol over a [`SharedStore`].
#[derive(Clone)]
pub struct StubLedger {
    store: Arc<dyn SharedStore>,
    namespace: String,
}

impl StubLedger {
    pub fn new(store: Arc<dyn SharedStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    fn stubs_key(&self, function_name: &str) -> String {
        format!("{}:stubs:{}", self.namespace, function_name)
    }

    fn ledger_key(&self) -> String {
        format!("{}:ledger", self.namespace)
    }

    /// Register `queue` for `function_name`, replacing any earlier queue.
    pub async fn register_stubs(&self, function_name: &str, queue: &[Stub]) -> Result<(), LedgerError> {
        let value = serde_json::to_value(queue).map_err(StoreError::from)?;
        self.store.set(&self.stubs_key(function_name), &value).await?;
        debug!(function = function_name, stubs = queue.len(), "registered stubs");
        Ok(())
    }

    /// Append an invocation to the ledger with one atomic store append.
    pub async fn record_invocation(&self, function_name: &str, payload: Value) -> Result<LedgerPosition, LedgerError> {
        let record = InvocationRecord::new(function_name, payload);
        let value = serde_json::to_value(&record).map_err(StoreError::from)?;
        let length = self.store.append(&self.ledger_key(), &value).await?;
        debug!(function = function_name, position = length, "recorded invocation");
        Ok(LedgerPosition(length))
    }

    /// Stub for the latest recorded invocation of `function_name`, counting every
    /// ledger entry currently stored.
    pub async fn consume_stub(&self, function_name: &str) -> Result<Stub, LedgerError> {
        let records = self.read_records(None).await?;
        self.stub_for_ordinal(function_name, cursor(&records, function_name)).await
    }

    /// Stub for the invocation recorded at `position`.
    ///
    /// Only the ledger prefix up to and including that record is counted, so
    /// concurrent invocations of the same function each get their own stub.
    pub async fn consume_stub_at(&self, function_name: &str, position: LedgerPosition) -> Result<Stub, LedgerError> {
        let records = self.read_records(Some(position.0)).await?;
        self.stub_for_ordinal(function_name, cursor(&records, function_name)).await
    }

    async fn stub_for_ordinal(&self, function_name: &str, ordinal: usize) -> Result<Stub, LedgerError> {
        let Some(raw_queue) = self.store.get(&self.stubs_key(function_name)).await? else {
            return Err(LedgerError::NoStubsRegistered {
                function_name: function_name.to_string(),
            });
        };
        let mut queue: Vec<Stub> = serde_json::from_value(raw_queue).map_err(LedgerError::Malformed)?;
        let registered = queue.len();

        if ordinal == 0 || ordinal > registered {
            return Err(LedgerError::StubsExhausted {
                function_name: function_name.to_string(),
                invocation: ordinal,
                registered,
            });
        }
        Ok(queue.swap_remove(ordinal - 1))
    }

    /// Every recorded invocation, in ledger order.
    pub async fn invocations(&self) -> Result<Vec<InvocationRecord>, LedgerError> {
        self.read_records(None).await
    }

    async fn read_records(&self, limit: Option<usize>) -> Result<Vec<InvocationRecord>, LedgerError> {
        self.store
            .range(&self.ledger_key(), limit)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(LedgerError::Malformed))
            .collect()
    }

    /// Delete every key of this ledger's namespace, returning how many were removed.
    pub async fn drain(&self) -> Result<usize, LedgerError> {
        let keys = self.store.keys(&format!("{}:*", escape_glob(&self.namespace))).await?;
        let removed = self.store.del(&keys).await?;
        info!(namespace = %self.namespace, removed, "drained ledger");
        Ok(removed)
    }
}
