//! Operator-requested maintenance: reindex, purge, index and retry.
//!
//! Requests are queued on the owning tracker and applied by the commit
//! tracker under the write locks, just before it commits. Applied requests
//! stay in flight until that commit lands; a rollback or a deferred commit
//! puts them back at the head of the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// What a maintenance action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    Node,
    Transaction,
    Acl,
    AclChangeSet,
}

impl Scope {
    /// Whether the scope is handled by the ACL tracker.
    pub fn is_acl(&self) -> bool {
        matches!(self, Scope::Acl | Scope::AclChangeSet)
    }

    /// Whether the scope names a log entry rather than a single item.
    pub fn is_container(&self) -> bool {
        matches!(self, Scope::Transaction | Scope::AclChangeSet)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::Node => "node",
            Scope::Transaction => "transaction",
            Scope::Acl => "acl",
            Scope::AclChangeSet => "aclChangeSet",
        };
        f.write_str(s)
    }
}

/// A maintenance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceAction {
    /// Remove the documents of the target, then index it again
    Reindex(Scope, u64),
    /// Remove the documents of the target
    Purge(Scope, u64),
    /// Index the target without touching the high-water mark
    Index(Scope, u64),
    /// Clear every error stub and reindex the transactions that produced them
    Retry,
}

/// Kind of queued operation, in the order queues drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    Purge,
    Reindex,
    Index,
}

#[derive(Default)]
struct Queues {
    purge: [VecDeque<u64>; 2],
    reindex: [VecDeque<u64>; 2],
    index: [VecDeque<u64>; 2],
    in_flight: Vec<QueuedWork>,
}

impl Queues {
    fn slot(&mut self, operation: Operation, container: bool) -> &mut VecDeque<u64> {
        let slot = usize::from(!container);
        match operation {
            Operation::Purge => &mut self.purge[slot],
            Operation::Reindex => &mut self.reindex[slot],
            Operation::Index => &mut self.index[slot],
        }
    }
}

/// FIFO maintenance queues of one tracker.
///
/// Each operation keeps two queues: containers (transactions or ACL change
/// sets) and items (nodes or ACLs). Draining yields purges, then reindexes,
/// then indexes, containers before items.
#[derive(Default)]
pub struct MaintenanceQueue {
    queues: Mutex<Queues>,
}

/// One drained maintenance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedWork {
    pub operation: Operation,
    pub container: bool,
    pub id: u64,
}

impl MaintenanceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, operation: Operation, container: bool, id: u64) {
        let mut queues = self.lock();
        let queue = queues.slot(operation, container);
        if !queue.contains(&id) {
            queue.push_back(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        let queues = self.lock();
        queues
            .purge
            .iter()
            .chain(queues.reindex.iter())
            .chain(queues.index.iter())
            .all(VecDeque::is_empty)
    }

    pub fn clear(&self) {
        *self.lock() = Queues::default();
    }

    /// Number of applied requests waiting for a commit.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Take everything queued, in application order.
    ///
    /// The returned work is held in flight until [`settle`](Self::settle).
    pub fn drain(&self) -> Vec<QueuedWork> {
        let mut guard = self.lock();
        let queues: &mut Queues = &mut guard;
        let mut work = Vec::new();
        for (operation, pair) in [
            (Operation::Purge, &mut queues.purge),
            (Operation::Reindex, &mut queues.reindex),
            (Operation::Index, &mut queues.index),
        ] {
            for (slot, queue) in pair.iter_mut().enumerate() {
                work.extend(queue.drain(..).map(|id| QueuedWork {
                    operation,
                    container: slot == 0,
                    id,
                }));
            }
        }
        queues.in_flight.extend(work.iter().copied());
        work
    }

    /// Forget a request that failed for good, so it is not retried.
    pub fn discard(&self, work: QueuedWork) {
        self.lock().in_flight.retain(|w| *w != work);
    }

    /// Close the in-flight work: dropped once `committed`, otherwise queued
    /// again ahead of newer requests.
    pub fn settle(&self, committed: bool) {
        let mut queues = self.lock();
        let in_flight = std::mem::take(&mut queues.in_flight);
        if committed {
            return;
        }
        for work in in_flight.into_iter().rev() {
            let queue = queues.slot(work.operation, work.container);
            queue.retain(|id| *id != work.id);
            queue.push_front(work.id);
        }
    }
}
