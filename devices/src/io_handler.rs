// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The handler seam a device registers against the Address-Space Registry.
//! Grounded on crosvm's `devices::BusDevice` trait: a trait object instead
//! of the C original's `(handler_fn, opaque)` pair, so the Dispatcher calls
//! in without unsafe casts.

/// Which of the three address-space kinds an access belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressKind {
    Port,
    Memory,
    PciConfig,
}

/// Direction of a single access, mirroring `IOREQ_READ`/`IOREQ_WRITE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Everything a handler needs to know about one access besides the data
/// itself. `addr` is range-relative for PIO/MMIO and the PCI config-space
/// register offset for PCI-config (the BDF selects which handler is
/// called; the handler itself never sees the BDF).
#[derive(Clone, Copy, Debug)]
pub struct AccessInfo {
    pub addr: u64,
    pub size: u32,
    pub kind: AddressKind,
    pub dir: Direction,
}

/// The access widths, in bytes, a handler natively implements. A handler
/// that only sets `byte` still gets word/long access transparently: the
/// Dispatcher synthesizes the missing widths out of repeated byte calls
/// (see `xen_ioemu::dispatcher::widen`).
#[derive(Clone, Copy, Debug)]
pub struct AccessWidths {
    pub byte: bool,
    pub word: bool,
    pub long: bool,
}

impl AccessWidths {
    pub const ALL: AccessWidths = AccessWidths {
        byte: true,
        word: true,
        long: true,
    };

    pub const BYTE_ONLY: AccessWidths = AccessWidths {
        byte: true,
        word: false,
        long: false,
    };

    pub fn supports(&self, size: u32) -> bool {
        match size {
            1 => self.byte,
            2 => self.word,
            4 => self.long,
            _ => false,
        }
    }
}

/// A registered address-range handler. Implementors back exactly one
/// device's slice of PIO, MMIO, or PCI-config space.
pub trait IoHandler: Send {
    /// Widths this handler implements directly. Defaults to all three;
    /// override to advertise a narrower device (e.g. byte-only legacy PIO)
    /// and let the Dispatcher synthesize the rest.
    fn widths(&self) -> AccessWidths {
        AccessWidths::ALL
    }

    /// Reads exactly `data.len()` bytes, a width this handler advertises
    /// support for via [`IoHandler::widths`].
    fn read(&mut self, info: AccessInfo, data: &mut [u8]);

    /// Writes exactly `data.len()` bytes, a width this handler advertises
    /// support for via [`IoHandler::widths`].
    fn write(&mut self, info: AccessInfo, data: &[u8]);
}
