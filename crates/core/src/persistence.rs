//! Write results and local batching shared by all repositories.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Where a write ended up.
///
/// `Remote` carries the entity as confirmed by the remote store (and mirrored
/// locally). `Queued` carries the caller's entity, persisted locally with a
/// pending sync queue entry.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    Remote(T),
    Queued(T),
}

impl<T> WriteOutcome<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Remote(v) | Self::Queued(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Remote(v) | Self::Queued(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U> {
        match self {
            Self::Remote(v) => WriteOutcome::Remote(f(v)),
            Self::Queued(v) => WriteOutcome::Queued(f(v)),
        }
    }
}

/// Work whose local writes should land in one commit.
pub type BatchWork<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Groups local writes issued by several repositories into one commit.
///
/// The batch belongs to the task that runs it: writes from other tasks are
/// never folded in. A nested `run_batch` joins the enclosing one.
#[async_trait]
pub trait LocalBatch: Send + Sync {
    /// Runs `work` and commits its deferred local writes together.
    ///
    /// An `Err` from `work` discards them. If this future is dropped before
    /// `work` finishes, the writes deferred so far are still committed.
    async fn run_batch<'a>(&'a self, work: BatchWork<'a>) -> Result<()>;
}
