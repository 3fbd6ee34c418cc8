// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Three independent ordered collections of non-overlapping address
//! ranges — PIO, MMIO, PCI-config — each mapping a `[start, end]` range to
//! a registered [`IoHandler`]. Grounded on `demu.c`'s three
//! `demu_space_t` lists plus crosvm's `devices::Bus`, which serves the
//! same "flat vector, linear scan" role for its own MMIO/PIO buses.
//!
//! A linear scan over a `Vec` is deliberate, not a placeholder: spec §9
//! calls an interval tree over-engineering for the handful of ranges a
//! device model actually registers.

use std::sync::{Arc, Mutex};

use hypervisor::{RangeKind, Transport};

use crate::error::{RegistryError, Result};
use crate::io_handler::IoHandler;

struct Entry {
    start: u64,
    end: u64,
    handler: Arc<Mutex<dyn IoHandler>>,
}

fn overlaps(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// One of the three address-space kinds, with its own non-overlap domain.
#[derive(Default)]
struct Space {
    entries: Vec<Entry>,
}

impl Space {
    fn find_index(&self, addr: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.start <= addr && addr <= e.end)
    }

    fn check_overlap(&self, start: u64, end: u64) -> Result<()> {
        if self.entries.iter().any(|e| overlaps(e.start, e.end, start, end)) {
            return Err(RegistryError::Overlap(start, end));
        }
        Ok(())
    }

    fn insert(&mut self, start: u64, end: u64, handler: Arc<Mutex<dyn IoHandler>>) -> Result<()> {
        self.check_overlap(start, end)?;
        self.entries.push(Entry { start, end, handler });
        Ok(())
    }

    fn remove(&mut self, start: u64, end: u64) {
        self.entries.retain(|e| !(e.start == start && e.end == end));
    }
}

/// The registry of address ranges a dispatch-engine instance owns.
/// `register_*`/`deregister_*` also drive the hypervisor transport so
/// ranges are actually routed to this ioreq server; `find` is pure local
/// lookup used by the Dispatcher on every trapped access.
pub struct AddressSpaceRegistry {
    port: Space,
    memory: Space,
    pci_config: Space,
}

impl AddressSpaceRegistry {
    pub fn new() -> AddressSpaceRegistry {
        AddressSpaceRegistry {
            port: Space::default(),
            memory: Space::default(),
            pci_config: Space::default(),
        }
    }

    pub fn register_port(
        &mut self,
        transport: &dyn Transport,
        start: u64,
        size: u64,
        handler: Arc<Mutex<dyn IoHandler>>,
    ) -> Result<()> {
        let end = start + size - 1;
        self.port.check_overlap(start, end)?;
        transport.map_range(RangeKind::Port, start, end)?;
        // check_overlap was already run above; insert cannot fail on overlap now.
        self.port.insert(start, end, handler)
    }

    pub fn register_memory(
        &mut self,
        transport: &dyn Transport,
        start: u64,
        size: u64,
        handler: Arc<Mutex<dyn IoHandler>>,
    ) -> Result<()> {
        let end = start + size - 1;
        self.memory.check_overlap(start, end)?;
        transport.map_range(RangeKind::Memory, start, end)?;
        self.memory.insert(start, end, handler)
    }

    pub fn register_pci_config(
        &mut self,
        transport: &dyn Transport,
        bus: u8,
        device: u8,
        function: u8,
        handler: Arc<Mutex<dyn IoHandler>>,
    ) -> Result<()> {
        let bdf = hypervisor::encode_bdf(bus, device, function) as u64;
        self.pci_config.check_overlap(bdf, bdf)?;
        transport.map_range(RangeKind::PciConfig, bdf, bdf)?;
        self.pci_config.insert(bdf, bdf, handler)
    }

    pub fn deregister_port(&mut self, transport: &dyn Transport, start: u64, size: u64) -> Result<()> {
        let end = start + size - 1;
        transport.unmap_range(RangeKind::Port, start, end)?;
        self.port.remove(start, end);
        Ok(())
    }

    pub fn deregister_memory(&mut self, transport: &dyn Transport, start: u64, size: u64) -> Result<()> {
        let end = start + size - 1;
        transport.unmap_range(RangeKind::Memory, start, end)?;
        self.memory.remove(start, end);
        Ok(())
    }

    pub fn deregister_pci_config(
        &mut self,
        transport: &dyn Transport,
        bus: u8,
        device: u8,
        function: u8,
    ) -> Result<()> {
        let bdf = hypervisor::encode_bdf(bus, device, function) as u64;
        transport.unmap_range(RangeKind::PciConfig, bdf, bdf)?;
        self.pci_config.remove(bdf, bdf);
        Ok(())
    }

    pub fn find_port(&self, addr: u64) -> Option<(u64, Arc<Mutex<dyn IoHandler>>)> {
        self.find(&self.port, addr)
    }

    pub fn find_memory(&self, addr: u64) -> Option<(u64, Arc<Mutex<dyn IoHandler>>)> {
        self.find(&self.memory, addr)
    }

    pub fn find_pci_config(&self, bdf: u64) -> Option<(u64, Arc<Mutex<dyn IoHandler>>)> {
        self.find(&self.pci_config, bdf)
    }

    fn find(&self, space: &Space, addr: u64) -> Option<(u64, Arc<Mutex<dyn IoHandler>>)> {
        let idx = space.find_index(addr)?;
        let entry = &space.entries[idx];
        Some((entry.start, entry.handler.clone()))
    }
}

impl Default for AddressSpaceRegistry {
    fn default() -> AddressSpaceRegistry {
        AddressSpaceRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hypervisor::{BufferedIopageView, RangeKind, Result as HvResult, SharedIopageView};

    struct NullHandler;

    impl IoHandler for NullHandler {
        fn read(&mut self, _info: crate::AccessInfo, data: &mut [u8]) {
            data.fill(0);
        }
        fn write(&mut self, _info: crate::AccessInfo, _data: &[u8]) {}
    }

    fn handler() -> Arc<Mutex<dyn IoHandler>> {
        Arc::new(Mutex::new(NullHandler))
    }

    /// Records every range it's asked to route, so tests can assert
    /// `register_*`'s side effect on the transport without a real host.
    struct RecordingTransport {
        mapped: Mutex<Vec<(RangeKind, u64, u64)>>,
        fail_next: Mutex<bool>,
        shared: SharedIopageView,
        buffered: BufferedIopageView,
    }

    impl RecordingTransport {
        fn new() -> RecordingTransport {
            let shared_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            let buffered_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            RecordingTransport {
                mapped: Mutex::new(Vec::new()),
                fail_next: Mutex::new(false),
                // SAFETY: leaked pages live for the test process.
                shared: unsafe { SharedIopageView::new(shared_page, 1) },
                buffered: unsafe { BufferedIopageView::new(buffered_page) },
            }
        }
    }

    impl Transport for RecordingTransport {
        fn vcpus(&self) -> usize {
            1
        }
        fn notify_port(&self, _port: u32) -> HvResult<()> {
            Ok(())
        }
        fn unmask_port(&self, _port: u32) -> HvResult<()> {
            Ok(())
        }
        fn pending_port(&mut self) -> HvResult<Option<u32>> {
            Ok(None)
        }
        fn set_irq(&self, _irq: u32, _level: bool) -> HvResult<()> {
            Ok(())
        }
        fn map_range(&self, kind: RangeKind, start: u64, end: u64) -> HvResult<()> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(hypervisor::HypervisorError::MapIoRange(std::io::Error::from(
                    std::io::ErrorKind::Other,
                )));
            }
            self.mapped.lock().unwrap().push((kind, start, end));
            Ok(())
        }
        fn unmap_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> HvResult<()> {
            Ok(())
        }
        fn map_guest_pages(&self, _pfns: &[u64]) -> HvResult<*mut u8> {
            unimplemented!()
        }
        fn unmap_guest_pages(&self, _ptr: *mut u8, _n: usize) -> HvResult<()> {
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
    fn find_matches_every_address_in_range_and_nothing_outside() {
        let transport = RecordingTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        registry
            .register_memory(&transport, 0x1000, 0x100, handler())
            .unwrap();

        assert!(registry.find_memory(0x1000).is_some());
        assert!(registry.find_memory(0x1000 + 0xff).is_some());
        assert!(registry.find_memory(0x1000 + 0x100).is_none());
        assert!(registry.find_memory(0x0fff).is_none());
    }

    #[test]
    fn overlapping_registration_is_rejected_and_rolled_back() {
        let transport = RecordingTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        registry
            .register_memory(&transport, 0x1000, 0x100, handler())
            .unwrap();

        let err = registry.register_memory(&transport, 0x1050, 0x10, handler());
        assert!(matches!(err, Err(RegistryError::Overlap(_, _))));
        // Only the first, successful registration reached the transport.
        assert_eq!(transport.mapped.lock().unwrap().len(), 1);
    }

    #[test]
    fn adjacent_non_overlapping_ranges_both_register() {
        let transport = RecordingTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        registry
            .register_memory(&transport, 0x1000, 0x100, handler())
            .unwrap();
        registry
            .register_memory(&transport, 0x1100, 0x100, handler())
            .unwrap();

        assert!(registry.find_memory(0x10ff).is_some());
        assert!(registry.find_memory(0x1100).is_some());
    }

    #[test]
    fn transport_failure_rolls_back_the_entry() {
        let transport = RecordingTransport::new();
        *transport.fail_next.lock().unwrap() = true;
        let mut registry = AddressSpaceRegistry::new();

        let err = registry.register_port(&transport, 0x60, 1, handler());
        assert!(matches!(err, Err(RegistryError::Transport(_))));
        assert!(registry.find_port(0x60).is_none());
    }

    #[test]
    fn pci_config_registers_as_single_point_range() {
        let transport = RecordingTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        registry.register_pci_config(&transport, 0, 2, 0, handler()).unwrap();

        let bdf = hypervisor::encode_bdf(0, 2, 0) as u64;
        assert!(registry.find_pci_config(bdf).is_some());
        assert!(registry.find_pci_config(bdf + 1).is_none());
    }

    #[test]
    fn deregister_removes_the_entry() {
        let transport = RecordingTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        registry
            .register_memory(&transport, 0x2000, 0x100, handler())
            .unwrap();
        registry.deregister_memory(&transport, 0x2000, 0x100).unwrap();
        assert!(registry.find_memory(0x2000).is_none());
    }
}
