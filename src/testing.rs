//! An in-memory [`KvStore`] reference implementation, used only by this
//! crate's own tests. Grounded on the teacher's `controller::Device`: a
//! stand-in a test constructs directly, never shipped as a production
//! backend.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::kv::{KvStore, Version};
use crate::pointer::Pointer;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<Pointer, (Vec<u8>, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore { values: Mutex::new(HashMap::new()) }
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: Pointer) -> Result<Option<(Vec<u8>, Version)>> {
        let values = self.values.lock().unwrap();
        Ok(values.get(&key).map(|(bytes, version)| (bytes.clone(), Version(*version))))
    }

    fn put_if_version(&self, key: Pointer, bytes: Vec<u8>, version: Option<Version>) -> Result<Version> {
        let mut values = self.values.lock().unwrap();
        match version {
            Some(expected) => {
                let current = values.get(&key).map(|(_, v)| *v).unwrap_or(0);
                if expected.0 != current {
                    return Err(Error::Conflict);
                }
                let next = current + 1;
                values.insert(key, (bytes, next));
                Ok(Version(next))
            }
            None => {
                // Unconditional write: overwrite whatever's there (or write
                // fresh), regardless of prior existence. Used for first
                // writes of a freshly allocated pointer, including ones a
                // `BlockSet` recycled from its free list after a conflict.
                let next = values.get(&key).map(|(_, v)| v + 1).unwrap_or(0);
                values.insert(key, (bytes, next));
                Ok(Version(next))
            }
        }
    }
}
