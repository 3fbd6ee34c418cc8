// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe(r) wrapper over `/proc/xen/privcmd`: the hypercall passthrough
//! every other control-plane operation (domctl, HVM/DM ops, foreign-memory
//! mapping) rides on top of.

use std::fs::{File, OpenOptions};
use std::os::raw::c_ulong;
use std::os::unix::io::AsRawFd;

use xen_sys::{PrivcmdHypercall, IOCTL_PRIVCMD_HYPERCALL};

use crate::error::{HypervisorError, Result};

pub struct XenCall {
    file: File,
}

impl XenCall {
    pub fn open() -> Result<XenCall> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/proc/xen/privcmd")
            .map_err(|e| HypervisorError::Open("/proc/xen/privcmd", e))?;
        Ok(XenCall { file })
    }

    /// Issues a raw hypercall with up to five `c_ulong` arguments, the
    /// common shape every `HYPERVISOR_*` op in `xen-sys::privcmd` shares.
    pub fn hypercall(&self, op: c_ulong, args: [c_ulong; 5]) -> Result<c_ulong> {
        let mut call = PrivcmdHypercall { op, arg: args };
        // SAFETY: `call` is a valid, uniquely-owned PrivcmdHypercall; the
        // ioctl either fills in a return value or reports failure via errno.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_PRIVCMD_HYPERCALL as _,
                &mut call as *mut PrivcmdHypercall,
            )
        };
        if ret < 0 {
            return Err(HypervisorError::Hypercall {
                op,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(ret as c_ulong)
    }

    pub(crate) fn as_raw_fd(&self) -> i32 {
        self.file.as_raw_fd()
    }
}
