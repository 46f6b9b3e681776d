//! Directory handle arena
//!
//! Hands out the smallest unused non-negative integer for each open
//! directory. Each handle may carry a listing and a scratch string (the
//! directory path it was opened on); both are discarded on release.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct HandleArena {
    /// Released handles below `next`, reused smallest first
    free: BTreeSet<u64>,
    /// One past the highest handle ever issued
    next: u64,
    listings: HashMap<u64, Vec<String>>,
    strings: HashMap<u64, String>,
}

impl HandleArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> u64 {
        if let Some(handle) = self.free.pop_first() {
            return handle;
        }
        let handle = self.next;
        self.next += 1;
        handle
    }

    /// Free a handle and drop whatever was stored under it
    ///
    /// Returns false if the handle was not in use.
    pub fn release(&mut self, handle: u64) -> bool {
        if !self.in_use(handle) {
            return false;
        }
        self.listings.remove(&handle);
        self.strings.remove(&handle);

        if handle + 1 == self.next {
            // shrink back over any trailing free handles
            self.next = handle;
            while self.next > 0 && self.free.remove(&(self.next - 1)) {
                self.next -= 1;
            }
        } else {
            self.free.insert(handle);
        }
        true
    }

    pub fn in_use(&self, handle: u64) -> bool {
        handle < self.next && !self.free.contains(&handle)
    }

    /// Free handles currently held for reuse, ascending
    pub fn free_handles(&self) -> Vec<u64> {
        self.free.iter().copied().collect()
    }

    pub fn set_listing(&mut self, handle: u64, names: Vec<String>) {
        self.listings.insert(handle, names);
    }

    pub fn listing(&self, handle: u64) -> Option<&[String]> {
        self.listings.get(&handle).map(Vec::as_slice)
    }

    pub fn set_string(&mut self, handle: u64, value: String) {
        self.strings.insert(handle, value);
    }

    pub fn string(&self, handle: u64) -> Option<&str> {
        self.strings.get(&handle).map(String::as_str)
    }
}
