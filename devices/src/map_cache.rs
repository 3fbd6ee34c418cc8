// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A bounded LRU cache of foreign-mapped guest pages keyed by PFN, so
//! handlers can DMA into/out of guest RAM without paying a map/unmap
//! round trip on every rep-string byte. Grounded on `demu.c`'s
//! `demu_map_guest_pages`/`demu_unmap_guest_pages` pair plus the
//! map-then-evict discipline crosvm's `vm_memory`/`MemoryMapping` pool
//! uses for foreign memory, simplified here to single-page granularity
//! since that is all the Dispatcher ever asks for.

use std::collections::HashMap;
use std::collections::VecDeque;

use hypervisor::Transport;
use log::warn;

const DEFAULT_CAPACITY: usize = 64;

struct CacheEntry {
    ptr: *mut u8,
}

// SAFETY: entries are only ever dereferenced by the dispatch thread, and
// only for the duration of one handler call per the Map Cache's
// pointer-stability invariant.
unsafe impl Send for CacheEntry {}

/// Maps guest page-frame numbers to host virtual addresses on demand,
/// evicting least-recently-used entries once `capacity` is reached.
pub struct MapCache {
    capacity: usize,
    entries: HashMap<u64, CacheEntry>,
    // Most-recently-used PFN at the back; eviction pops from the front.
    order: VecDeque<u64>,
}

impl MapCache {
    pub fn new() -> MapCache {
        MapCache::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> MapCache {
        MapCache {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns the host pointer backing `pfn`, mapping it on a miss and
    /// evicting the LRU entry if the cache is full. The returned pointer
    /// is stable for the duration of the caller's single handler call;
    /// callers must not retain it across dispatch iterations.
    pub fn lookup(&mut self, transport: &dyn Transport, pfn: u64) -> Option<*mut u8> {
        if let Some(entry) = self.entries.get(&pfn) {
            self.touch(pfn);
            return Some(entry.ptr);
        }

        if self.entries.len() >= self.capacity {
            self.evict_lru(transport);
        }

        match transport.map_guest_pages(&[pfn]) {
            Ok(ptr) => {
                self.entries.insert(pfn, CacheEntry { ptr });
                self.order.push_back(pfn);
                Some(ptr)
            }
            Err(e) => {
                warn!("map cache: failed to map pfn {:#x}: {}", pfn, e);
                None
            }
        }
    }

    /// Drops every cached mapping, unmapping each. Called on the
    /// hypervisor's `INVALIDATE` ioreq.
    pub fn invalidate(&mut self, transport: &dyn Transport) {
        for (pfn, entry) in self.entries.drain() {
            if let Err(e) = transport.unmap_guest_pages(entry.ptr, 1) {
                warn!("map cache: failed to unmap pfn {:#x} on invalidate: {}", pfn, e);
            }
        }
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, pfn: u64) {
        if let Some(pos) = self.order.iter().position(|&p| p == pfn) {
            self.order.remove(pos);
        }
        self.order.push_back(pfn);
    }

    fn evict_lru(&mut self, transport: &dyn Transport) {
        let Some(pfn) = self.order.pop_front() else {
            return;
        };
        if let Some(entry) = self.entries.remove(&pfn) {
            if let Err(e) = transport.unmap_guest_pages(entry.ptr, 1) {
                warn!("map cache: failed to unmap evicted pfn {:#x}: {}", pfn, e);
            }
        }
    }
}

impl Default for MapCache {
    fn default() -> MapCache {
        MapCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use hypervisor::{BufferedIopageView, RangeKind, SharedIopageView};

    struct MockTransport {
        mapped: Mutex<Vec<u64>>,
        next_ptr: Mutex<u64>,
        shared: SharedIopageView,
        buffered: BufferedIopageView,
    }

    impl MockTransport {
        fn new() -> MockTransport {
            let shared_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            let buffered_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            MockTransport {
                mapped: Mutex::new(Vec::new()),
                next_ptr: Mutex::new(0x1000),
                // SAFETY: the boxed, leaked pages above are never freed for
                // the lifetime of the test process.
                shared: unsafe { SharedIopageView::new(shared_page, 1) },
                buffered: unsafe { BufferedIopageView::new(buffered_page) },
            }
        }
    }

    impl Transport for MockTransport {
        fn vcpus(&self) -> usize {
            1
        }
        fn notify_port(&self, _port: u32) -> hypervisor::Result<()> {
            Ok(())
        }
        fn unmask_port(&self, _port: u32) -> hypervisor::Result<()> {
            Ok(())
        }
        fn pending_port(&mut self) -> hypervisor::Result<Option<u32>> {
            Ok(None)
        }
        fn set_irq(&self, _irq: u32, _level: bool) -> hypervisor::Result<()> {
            Ok(())
        }
        fn map_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> hypervisor::Result<()> {
            Ok(())
        }
        fn unmap_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> hypervisor::Result<()> {
            Ok(())
        }
        fn map_guest_pages(&self, pfns: &[u64]) -> hypervisor::Result<*mut u8> {
            self.mapped.lock().unwrap().extend_from_slice(pfns);
            let mut next = self.next_ptr.lock().unwrap();
            let ptr = *next as *mut u8;
            *next += 0x1000;
            Ok(ptr)
        }
        fn unmap_guest_pages(&self, _ptr: *mut u8, _n: usize) -> hypervisor::Result<()> {
            Ok(())
        }
        fn shared_iopage(&self) -> &SharedIopageView {
            &self.shared
        }
        fn buffered_iopage(&self) -> &BufferedIopageView {
            &self.buffered
        }
        fn buffered_port(&self) -> u32 {
            0
        }
        fn local_port(&self, _vcpu: usize) -> u32 {
            0
        }
    }

    #[test]
    fn caches_on_second_lookup() {
        let transport = MockTransport::new();
        let mut cache = MapCache::new();
        let p1 = cache.lookup(&transport, 42).unwrap();
        let p2 = cache.lookup(&transport, 42).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(transport.mapped.lock().unwrap().len(), 1);
    }

    #[test]
    fn invalidate_clears_everything() {
        let transport = MockTransport::new();
        let mut cache = MapCache::new();
        cache.lookup(&transport, 1).unwrap();
        cache.lookup(&transport, 2).unwrap();
        assert_eq!(cache.len(), 2);
        cache.invalidate(&transport);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_lru_when_full() {
        let transport = MockTransport::new();
        let mut cache = MapCache::with_capacity(2);
        cache.lookup(&transport, 1).unwrap();
        cache.lookup(&transport, 2).unwrap();
        cache.lookup(&transport, 3).unwrap();
        assert_eq!(cache.len(), 2);
        // pfn 1 was least-recently-used and should have been evicted.
        assert!(!cache.entries.contains_key(&1));
        assert!(cache.entries.contains_key(&2));
        assert!(cache.entries.contains_key(&3));
    }
}
