//! A small observed set of user "memory" strings, exposed to the engine as
//! an optional context-injection payload.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle for unregistering a memory observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryObserverId(u64);

type Observer = Arc<dyn Fn(&[String]) + Send + Sync>;

struct State {
    memories: Vec<String>,
    observers: HashMap<u64, Observer>,
    next_observer_id: u64,
}

/// An unordered set of distinct memory strings.
///
/// Every effective mutation synchronously notifies all registered observers
/// with the full current list; duplicate adds and deletes of absent entries
/// are silent no-ops. Callers must not depend on list order.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                memories: Vec::new(),
                observers: HashMap::new(),
                next_observer_id: 0,
            }),
        }
    }

    pub fn with_memories(memories: Vec<String>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for memory in memories {
                if !state.memories.contains(&memory) {
                    state.memories.push(memory);
                }
            }
        }
        store
    }

    /// Add a memory. Duplicate adds do not notify.
    pub fn add(&self, memory: impl Into<String>) -> bool {
        let memory = memory.into();
        let observers;
        let snapshot;
        {
            let mut state = self.state.lock();
            if state.memories.contains(&memory) {
                tracing::debug!("ignoring duplicate memory add");
                return false;
            }
            state.memories.push(memory);
            observers = state.observers.values().cloned().collect::<Vec<_>>();
            snapshot = state.memories.clone();
        }
        notify(&observers, &snapshot);
        true
    }

    /// Delete a memory. Deleting an absent entry does not notify.
    pub fn delete(&self, memory: &str) -> bool {
        let observers;
        let snapshot;
        {
            let mut state = self.state.lock();
            let Some(position) = state.memories.iter().position(|m| m == memory) else {
                tracing::debug!("ignoring delete of absent memory");
                return false;
            };
            state.memories.remove(position);
            observers = state.observers.values().cloned().collect::<Vec<_>>();
            snapshot = state.memories.clone();
        }
        notify(&observers, &snapshot);
        true
    }

    /// Replace an existing memory with a new one. A missing `old` or an
    /// unchanged value is a silent no-op.
    pub fn replace(&self, old: &str, new: impl Into<String>) -> bool {
        let new = new.into();
        let observers;
        let snapshot;
        {
            let mut state = self.state.lock();
            let Some(position) = state.memories.iter().position(|m| m == old) else {
                tracing::debug!("ignoring replace of absent memory");
                return false;
            };
            if state.memories[position] == new {
                tracing::debug!("ignoring replace with an identical value");
                return false;
            }
            if state.memories.contains(&new) {
                // New value already present; the replace degrades to a delete.
                state.memories.remove(position);
            } else {
                state.memories[position] = new;
            }
            observers = state.observers.values().cloned().collect::<Vec<_>>();
            snapshot = state.memories.clone();
        }
        notify(&observers, &snapshot);
        true
    }

    pub fn clear(&self) {
        let observers;
        let snapshot;
        {
            let mut state = self.state.lock();
            state.memories.clear();
            observers = state.observers.values().cloned().collect::<Vec<_>>();
            snapshot = state.memories.clone();
        }
        notify(&observers, &snapshot);
    }

    /// A defensive copy of the current memories, in arbitrary order.
    pub fn memories(&self) -> Vec<String> {
        self.state.lock().memories.clone()
    }

    /// The context-injection payload for the engine: `None` when the store
    /// is empty, which tells the engine to skip the memory event entirely.
    pub fn memory_for_engine(&self) -> Option<Vec<String>> {
        let state = self.state.lock();
        if state.memories.is_empty() {
            None
        } else {
            Some(state.memories.clone())
        }
    }

    pub fn add_observer(
        &self,
        observer: impl Fn(&[String]) + Send + Sync + 'static,
    ) -> MemoryObserverId {
        let mut state = self.state.lock();
        let id = state.next_observer_id;
        state.next_observer_id += 1;
        state.observers.insert(id, Arc::new(observer));
        MemoryObserverId(id)
    }

    pub fn remove_observer(&self, id: MemoryObserverId) {
        self.state.lock().observers.remove(&id.0);
    }
}

// Observers run outside the lock so they may call back into the store.
fn notify(observers: &[Observer], snapshot: &[String]) {
    for observer in observers {
        observer(snapshot);
    }
}
