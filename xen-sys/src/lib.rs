// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw FFI surface for talking to a Xen host: the `privcmd` hypercall
//! passthrough, the `/dev/xen/evtchn` ioctls, the `HVMOP`/`DMOP` request
//! layouts used to stand up an ioreq server, and the bit-exact layout of
//! the two pages the hypervisor shares with it.
//!
//! Named and shaped after crosvm's `kvm_sys`/`vfio_sys` split: one `_sys`
//! crate per raw kernel/hypervisor ABI, with no behavior beyond `#[repr(C)]`
//! layout and ioctl numbers. `hypervisor` is the safe wrapper built on top.

pub mod evtchn;
pub mod hvm_op;
pub mod ioreq;
pub mod privcmd;

pub use evtchn::*;
pub use hvm_op::*;
pub use ioreq::*;
pub use privcmd::*;
