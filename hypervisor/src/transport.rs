// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The capability surface the Address-Space Registry, Map Cache, and
//! Request Dispatcher depend on, kept as a trait so the test suite can
//! substitute a mock instead of talking to a real Xen host. Grounded on
//! `demu.c`'s `demu_state_t` plus the handful of `demu_*` free functions
//! that wrap `xenctrl`/`xenevtchn`/`xenforeignmemory`/`xendevicemodel`
//! calls: this trait is their combined interface, not their lifecycle.
//! Acquisition and teardown of the concrete handles behind an
//! implementation is the Sequencer's job (see `xen_ioemu::sequencer`),
//! since only it knows the order resources were acquired in.

use xen_sys::{HVM_IO_RANGE_MEMORY, HVM_IO_RANGE_PCI, HVM_IO_RANGE_PORT};

use crate::error::Result;
use crate::shared::{BufferedIopageView, SharedIopageView};

/// Which of the three address-space kinds a range belongs to, mirrored
/// onto the hypervisor's `HVMOP_IO_RANGE_*` discriminants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeKind {
    Port,
    Memory,
    PciConfig,
}

impl RangeKind {
    pub fn as_hvm_io_range(self) -> u32 {
        match self {
            RangeKind::Port => HVM_IO_RANGE_PORT,
            RangeKind::Memory => HVM_IO_RANGE_MEMORY,
            RangeKind::PciConfig => HVM_IO_RANGE_PCI,
        }
    }
}

/// Everything the dispatch engine needs from the hypervisor at steady
/// state, abstracted behind a trait so it can be driven by a mock in
/// tests.
pub trait Transport {
    fn vcpus(&self) -> usize;
    fn notify_port(&self, port: u32) -> Result<()>;
    fn unmask_port(&self, port: u32) -> Result<()>;
    fn pending_port(&mut self) -> Result<Option<u32>>;
    fn set_irq(&self, irq: u32, level: bool) -> Result<()>;
    fn map_range(&self, kind: RangeKind, start: u64, end: u64) -> Result<()>;
    fn unmap_range(&self, kind: RangeKind, start: u64, end: u64) -> Result<()>;
    fn map_guest_pages(&self, pfns: &[u64]) -> Result<*mut u8>;
    fn unmap_guest_pages(&self, ptr: *mut u8, n: usize) -> Result<()>;
    fn shared_iopage(&self) -> &SharedIopageView;
    fn buffered_iopage(&self) -> &BufferedIopageView;
    fn buffered_port(&self) -> u32;
    /// The locally bound event-channel port for `vcpu`'s synchronous slot,
    /// used by the Dispatcher to notify completion. Distinct from the
    /// `vp_eport` field in the shared page itself, which is the *guest*
    /// side port id.
    fn local_port(&self, vcpu: usize) -> u32;
}
