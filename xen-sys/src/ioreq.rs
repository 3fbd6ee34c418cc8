// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw layout of the two pages the hypervisor shares with an ioreq server:
//! the per-vCPU synchronous `shared_iopage_t` and the ring-structured
//! `buffered_iopage_t`. Field names and sizes follow
//! `xen/include/public/hvm/ioreq.h` as used by `demu.c`; this module is
//! the bit-exact ABI layer, with no behavior of its own.

use std::sync::atomic::{AtomicU32, AtomicU8};

/// One slot's worth of hypervisor-shared page, `TARGET_PAGE_SIZE` on every
/// platform Xen runs the HVM ioreq ABI on.
pub const XC_PAGE_SIZE: usize = 4096;
pub const XC_PAGE_SHIFT: u32 = 12;

pub const IOREQ_BUFFER_SLOT_NUM: usize = 511;

pub const IOREQ_TYPE_PIO: u8 = 0;
pub const IOREQ_TYPE_COPY: u8 = 1;
pub const IOREQ_TYPE_PCI_CONFIG: u8 = 2;
pub const IOREQ_TYPE_TIMEOFFSET: u8 = 7;
pub const IOREQ_TYPE_INVALIDATE: u8 = 5;

pub const IOREQ_READ: u8 = 1;
pub const IOREQ_WRITE: u8 = 0;

pub const STATE_IOREQ_NONE: u8 = 0;
pub const STATE_IOREQ_READY: u8 = 1;
pub const STATE_IOREQ_INPROCESS: u8 = 2;
pub const STATE_IORESP_READY: u8 = 3;

/// One synchronous per-vCPU request/response slot. Ownership is shared
/// with the hypervisor; every cross-boundary access to `state` must use an
/// explicit atomic fence (see `hypervisor::shared`).
#[repr(C)]
pub struct IoReq {
    pub addr: u64,
    pub data: u64,
    pub count: u32,
    pub size: u32,
    pub vp_eport: u32,
    pub ty: u8,
    pub df: u8,
    pub data_is_ptr: u8,
    pub dir: u8,
    pub state: AtomicU8,
}

#[repr(C)]
pub struct SharedIopage {
    pub vcpu_ioreq: [IoReq; 0], // variable-length, sized by `vcpus` at map time
}

/// One write-only buffered slot (no response, no vCPU stall).
#[repr(C)]
#[derive(Copy, Clone)]
pub struct BufIoReq {
    pub addr: u64,
    pub data: u32,
    pub size: u8,
    pub ty: u8,
    pub dir: u8,
    pub pad: u8,
}

#[repr(C)]
pub struct BufferedIopage {
    pub read_pointer: AtomicU32,
    pub write_pointer: AtomicU32,
    pub buf_ioreq: [BufIoReq; IOREQ_BUFFER_SLOT_NUM],
}

/// Encodes a PCI bus/device/function triple into the 16-bit BDF the
/// hypervisor uses as the PCI-config address space's point-range key.
pub const fn encode_bdf(bus: u8, device: u8, function: u8) -> u16 {
    ((bus as u16) << 8) | (((device as u16) & 0x1f) << 3) | ((function as u16) & 0x7)
}
