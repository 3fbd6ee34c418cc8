// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Raw bindings for `/dev/xen/evtchn`, the character device used to bind
//! interdomain event-channel ports into this process and wait for them to
//! fire via `read(2)`/`poll(2)` on the device fd.

pub type EvtchnPort = u32;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct IoctlEvtchnBindInterdomain {
    pub remote_domain: u16,
    pub remote_port: EvtchnPort,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct IoctlEvtchnUnbind {
    pub port: EvtchnPort,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct IoctlEvtchnNotify {
    pub port: EvtchnPort,
}

pub const IOCTL_EVTCHN_BIND_INTERDOMAIN: u64 = 0x44500;
pub const IOCTL_EVTCHN_UNBIND: u64 = 0x44501;
pub const IOCTL_EVTCHN_NOTIFY: u64 = 0x44502;
pub const IOCTL_EVTCHN_RESET: u64 = 0x44503;
pub const IOCTL_EVTCHN_UNMASK: u64 = 0x44504;
