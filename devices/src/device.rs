// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The seam a virtual device (block backend, framebuffer, PCI-config
//! model — all out of scope themselves) implements to plug into the
//! dispatch engine: register its handlers, and optionally hand the Event
//! Loop descriptors of its own to poll. Grounded on crosvm's
//! `BusDeviceObj`/`arch::VirtioDeviceStub` pattern of a small trait object
//! the core owns and drives, without specifying what the device itself
//! does with a read or write.

use std::os::unix::io::RawFd;

use hypervisor::Transport;

use crate::address_space::AddressSpaceRegistry;
use crate::error::DeviceError;

pub trait Device: Send {
    /// Registers every address range this device owns against `registry`,
    /// driving `transport` to route them to the ioreq server.
    fn register(
        &mut self,
        transport: &dyn Transport,
        registry: &mut AddressSpaceRegistry,
    ) -> Result<(), DeviceError>;

    /// Descriptors the Event Loop should also wait on, beyond the
    /// event-channel fd. Empty by default; most devices need nothing here
    /// since their I/O runs synchronously inside `IoHandler::read`/`write`.
    fn poll_descriptors(&self) -> &[RawFd] {
        &[]
    }

    /// Called once per event-loop tick timeout for housekeeping (e.g.
    /// flushing write-behind buffers). No-op by default.
    fn tick(&mut self) {}
}
