// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrappers over the raw Xen ABI in `xen-sys`: the hypercall
//! passthrough (`XenCall`), event channels (`EventChannel`), foreign
//! memory mapping (`ForeignMemory`), the ioreq-server device-model
//! operations (`DeviceModel`), and typed, fenced views over the two
//! hypervisor-shared pages (`SharedIopageView`, `BufferedIopageView`).
//!
//! Named and layered after crosvm's `hypervisor` crate: one safe wrapper
//! crate sitting on top of a raw `*_sys` crate, hiding every `unsafe`
//! ioctl/mmap call behind a typed API the rest of the workspace uses.

mod devicemodel;
mod error;
mod evtchn;
mod foreignmemory;
mod shared;
mod transport;
mod xencall;

pub use devicemodel::DeviceModel;
pub use error::{HypervisorError, Result};
pub use evtchn::EventChannel;
pub use foreignmemory::ForeignMemory;
pub use shared::{BufferedIopageView, SharedIopageView, SyncSlot};
pub use transport::{RangeKind, Transport};
pub use xencall::XenCall;

pub use xen_sys::{
    encode_bdf, BufIoReq, IOREQ_BUFFER_SLOT_NUM, IOREQ_READ, IOREQ_TYPE_COPY,
    IOREQ_TYPE_INVALIDATE, IOREQ_TYPE_PCI_CONFIG, IOREQ_TYPE_PIO, IOREQ_TYPE_TIMEOFFSET,
    IOREQ_WRITE, STATE_IOREQ_INPROCESS, STATE_IOREQ_NONE, STATE_IOREQ_READY, STATE_IORESP_READY,
    XC_PAGE_SHIFT, XC_PAGE_SIZE,
};
