// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A logging-only `Device`/`IoHandler` pair that claims a configured
//! address range without modeling any real device semantics. Block
//! backends, the framebuffer, and the PCI-config model are out of scope
//! (spec §1); this is the concrete collaborator this build links in so
//! `--device`/config-specified ranges actually have something registered
//! against them, exercising the dispatch engine end to end. A build that
//! links real device backends replaces this mapping, not the engine
//! itself — see the note on `Ioemu::advance_to_device_initialized`.

use std::sync::{Arc, Mutex};

use log::debug;

use devices::{AccessInfo, AddressSpaceRegistry, Device, DeviceError, IoHandler};
use hypervisor::Transport;

use crate::config::DeviceConfig;

pub struct LoggingDevice {
    config: DeviceConfig,
}

impl LoggingDevice {
    pub fn new(config: DeviceConfig) -> LoggingDevice {
        LoggingDevice { config }
    }
}

struct LoggingHandler {
    name: String,
}

impl IoHandler for LoggingHandler {
    fn read(&mut self, info: AccessInfo, data: &mut [u8]) {
        data.fill(0);
        debug!(
            "{}: read {} byte(s) at offset {:#x}, returning zero (no backend linked)",
            self.name,
            data.len(),
            info.addr
        );
    }

    fn write(&mut self, info: AccessInfo, data: &[u8]) {
        debug!(
            "{}: write {} byte(s) at offset {:#x}: {:?} (discarded, no backend linked)",
            self.name,
            data.len(),
            info.addr,
            data
        );
    }
}

impl Device for LoggingDevice {
    fn register(
        &mut self,
        transport: &dyn Transport,
        registry: &mut AddressSpaceRegistry,
    ) -> Result<(), DeviceError> {
        let handler: Arc<Mutex<dyn IoHandler>> = Arc::new(Mutex::new(LoggingHandler {
            name: self.config.name.clone(),
        }));
        match self.config.kind.as_str() {
            "pio" => {
                registry.register_port(transport, self.config.base, self.config.size, handler)?;
            }
            "pci" => {
                let bdf = self.config.base;
                let bus = (bdf >> 8) as u8;
                let device = ((bdf >> 3) & 0x1f) as u8;
                let function = (bdf & 0x7) as u8;
                registry.register_pci_config(transport, bus, device, function, handler)?;
            }
            _ => {
                registry.register_memory(transport, self.config.base, self.config.size, handler)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypervisor::{BufferedIopageView, RangeKind, Result as HvResult, SharedIopageView};

    struct NoopTransport {
        shared: SharedIopageView,
        buffered: BufferedIopageView,
    }

    impl NoopTransport {
        fn new() -> NoopTransport {
            let shared_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            let buffered_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            NoopTransport {
                // SAFETY: leaked pages live for the test process.
                shared: unsafe { SharedIopageView::new(shared_page, 1) },
                buffered: unsafe { BufferedIopageView::new(buffered_page) },
            }
        }
    }

    impl Transport for NoopTransport {
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
        fn map_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> HvResult<()> {
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
    fn registers_mmio_range() {
        let transport = NoopTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        let mut device = LoggingDevice::new(DeviceConfig {
            name: "fb0".to_string(),
            kind: "mmio".to_string(),
            base: 0xE000_0000,
            irq: 0,
            size: 0x1000,
            readonly: false,
            path: None,
        });
        device.register(&transport, &mut registry).unwrap();
        assert!(registry.find_memory(0xE000_0000).is_some());
    }

    #[test]
    fn registers_pci_config_as_point_range() {
        let transport = NoopTransport::new();
        let mut registry = AddressSpaceRegistry::new();
        let bdf = hypervisor::encode_bdf(0, 2, 0) as u64;
        let mut device = LoggingDevice::new(DeviceConfig {
            name: "pcidev".to_string(),
            kind: "pci".to_string(),
            base: bdf,
            irq: 0,
            size: 0,
            readonly: false,
            path: None,
        });
        device.register(&transport, &mut registry).unwrap();
        assert!(registry.find_pci_config(bdf).is_some());
    }
}
