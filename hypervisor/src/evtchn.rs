// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrapper over `/dev/xen/evtchn`: binding interdomain ports into this
//! process, waiting for them to fire, and notifying/unmasking them. The
//! Event Loop (`xen-ioemu::event_loop`) selects on `as_raw_fd()` alongside
//! every other collaborator descriptor.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};

use base::AsRawDescriptor;
use xen_sys::{
    EvtchnPort, IoctlEvtchnBindInterdomain, IoctlEvtchnNotify, IoctlEvtchnUnbind,
    IOCTL_EVTCHN_BIND_INTERDOMAIN, IOCTL_EVTCHN_NOTIFY, IOCTL_EVTCHN_UNBIND, IOCTL_EVTCHN_UNMASK,
};

use crate::error::{HypervisorError, Result};

pub struct EventChannel {
    file: File,
}

impl EventChannel {
    pub fn open() -> Result<EventChannel> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/xen/evtchn")
            .map_err(|e| HypervisorError::Open("/dev/xen/evtchn", e))?;
        // SAFETY: fd is freshly opened and owned exclusively by `file`.
        let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFL) };
        if flags >= 0 {
            unsafe {
                libc::fcntl(file.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        Ok(EventChannel { file })
    }

    /// Binds a remote (guest-side) port, returning the local port this
    /// process observes it as.
    pub fn bind_interdomain(&self, remote_domain: u16, remote_port: EvtchnPort) -> Result<EvtchnPort> {
        let mut req = IoctlEvtchnBindInterdomain {
            remote_domain,
            remote_port,
        };
        // SAFETY: req is a valid, uniquely-owned binding request.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_EVTCHN_BIND_INTERDOMAIN as _,
                &mut req as *mut IoctlEvtchnBindInterdomain,
            )
        };
        if ret < 0 {
            return Err(HypervisorError::BindPort(std::io::Error::last_os_error()));
        }
        Ok(ret as EvtchnPort)
    }

    pub fn unbind(&self, port: EvtchnPort) -> Result<()> {
        let mut req = IoctlEvtchnUnbind { port };
        // SAFETY: req is a valid, uniquely-owned unbind request.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_EVTCHN_UNBIND as _,
                &mut req as *mut IoctlEvtchnUnbind,
            )
        };
        if ret < 0 {
            return Err(HypervisorError::Unbind(port, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn notify(&self, port: EvtchnPort) -> Result<()> {
        let mut req = IoctlEvtchnNotify { port };
        // SAFETY: req is a valid, uniquely-owned notify request.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                IOCTL_EVTCHN_NOTIFY as _,
                &mut req as *mut IoctlEvtchnNotify,
            )
        };
        if ret < 0 {
            return Err(HypervisorError::Notify(port, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn unmask(&self, port: EvtchnPort) -> Result<()> {
        let mut p = port;
        // SAFETY: p is a valid u32 the kernel writes nothing back into.
        let ret = unsafe {
            libc::ioctl(self.file.as_raw_fd(), IOCTL_EVTCHN_UNMASK as _, &mut p as *mut u32)
        };
        if ret < 0 {
            return Err(HypervisorError::Unmask(port, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Returns the next pending local port, or `None` if nothing is ready
    /// (the fd is opened non-blocking by the event loop's poll discipline:
    /// callers only read after `select`/`poll` reports readability).
    pub fn pending(&mut self) -> Result<Option<EvtchnPort>> {
        let mut buf = [0u8; 4];
        match self.file.read(&mut buf) {
            Ok(4) => Ok(Some(u32::from_ne_bytes(buf))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(HypervisorError::Open("/dev/xen/evtchn", e)),
        }
    }
}

impl AsRawDescriptor for EventChannel {
    fn as_raw_descriptor(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
