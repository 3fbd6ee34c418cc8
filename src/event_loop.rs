// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The single thread that waits on the event-channel fd and any
//! collaborator-owned descriptors, dispatches on readiness, and turns
//! termination signals into a synchronous teardown. Grounded on `demu.c`'s
//! `select()`-based main loop, expressed here with `libc::poll` the way
//! `other_examples`' raw-syscall wrappers favor `poll(2)` over `select(2)`
//! for an unbounded descriptor set.

use std::time::Duration;

use log::{info, warn};

use base::signal::{SignalEvent, SignalFd};
use base::AsRawDescriptor;

use crate::dispatcher;
use crate::sequencer::Ioemu;

/// Housekeeping tick interval when nothing else is pending, matching
/// `demu.c`'s one-second `select` timeout.
const TICK: Duration = Duration::from_secs(1);

enum LoopAction {
    Terminate,
}

/// Runs until a termination signal arrives, then returns so the caller can
/// drive `Ioemu::teardown`. Diagnostic signals are handled inline and do
/// not return control.
pub fn run(ioemu: &mut Ioemu, signal_fd: &SignalFd) {
    let evtchn_fd = ioemu.evtchn_descriptor();
    let diag_fds = [signal_fd.as_raw_descriptor(), evtchn_fd];

    loop {
        let extra_fds = ioemu.device_descriptors();
        let mut pollfds: Vec<libc::pollfd> = diag_fds
            .iter()
            .chain(extra_fds.iter())
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = TICK.as_millis() as libc::c_int;
        // SAFETY: pollfds is a uniquely-owned, correctly-sized buffer for
        // the duration of the call.
        let ret = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!("event loop: poll failed: {}", err);
            continue;
        }

        if ret == 0 {
            ioemu.tick_devices();
            continue;
        }

        if pollfds[0].revents & libc::POLLIN != 0 {
            if let Some(LoopAction::Terminate) = drain_signals(signal_fd, ioemu) {
                return;
            }
        }

        if pollfds[1].revents & libc::POLLIN != 0 {
            service_evtchn(ioemu);
        }

        if pollfds[2..].iter().any(|p| p.revents & libc::POLLIN != 0) {
            ioemu.tick_devices();
        }
    }
}

fn drain_signals(signal_fd: &SignalFd, ioemu: &Ioemu) -> Option<LoopAction> {
    let events = match signal_fd.read() {
        Ok(events) => events,
        Err(e) => {
            warn!("event loop: failed to read signalfd: {}", e);
            return None;
        }
    };
    for event in events {
        match event {
            SignalEvent::Terminate(sig) => {
                info!("received signal {}, tearing down", sig);
                return Some(LoopAction::Terminate);
            }
            SignalEvent::Diagnostic => {
                info!("diagnostic dump: {}", crate::sequencer::describe(ioemu));
            }
        }
    }
    None
}

/// Repeatedly drains whatever the hypervisor's event-channel fd currently
/// reports pending, dispatching the synchronous or buffered path per
/// port, then unmasking. Spurious wakeups (no matching port, per spec
/// §4.5) are silently ignored.
fn service_evtchn(ioemu: &mut Ioemu) {
    loop {
        let pending = match ioemu.transport_mut().pending_port() {
            Ok(p) => p,
            Err(e) => {
                warn!("event loop: failed to read pending port: {}", e);
                return;
            }
        };
        let Some(port) = pending else {
            return;
        };

        let buf_port = ioemu.transport().buffered_port();
        if port == buf_port {
            let (transport, registry, _map_cache) = ioemu.parts_mut();
            dispatcher::dispatch_buffered(transport, registry);
        } else if let Some(vcpu) = ioemu.vcpu_for_local_port(port) {
            let (transport, registry, map_cache) = ioemu.parts_mut();
            dispatcher::dispatch_sync(transport, registry, map_cache, vcpu);
        } else {
            warn!("event loop: spurious wakeup on unbound port {}", port);
            continue;
        }

        if let Err(e) = ioemu.transport().unmask_port(port) {
            warn!("event loop: failed to unmask port {}: {}", port, e);
        }
    }
}
