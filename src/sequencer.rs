// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The monotonic initialization/teardown state machine, grounded directly
//! on `demu.c`'s flat `demu_state_t` plus its `demu_teardown`/milestone
//! table, and on the "encapsulate it as a single owned value threaded
//! through the dispatcher" design note: one `Ioemu` value owns every
//! resource, with no process-global state anywhere in the workspace.
//!
//! Resource acquisition and release live behind [`ResourceOps`], a seam
//! separate from [`hypervisor::Transport`] (which is steady-state
//! dispatch only, per that trait's own doc comment) so the test suite can
//! drive the Sequencer against a mock instead of a real Xen host.
//! [`XenTransport`] is the only production implementor; [`Ioemu`] drives
//! it in order, recording a reverse-order undo action on a private stack
//! after each individual handle is acquired. This is what lets
//! `teardown()` release "exactly the resources acquired at or before the
//! current state" even if a later step in the *same* milestone failed
//! partway through — the public [`SequencerState`] only records
//! completed milestones; the undo stack is the actual source of truth for
//! what must be released.

use std::os::unix::io::RawFd;

use log::{info, warn};

use base::AsRawDescriptor;
use devices::{AddressSpaceRegistry, Device, MapCache};
use hypervisor::{
    BufferedIopageView, DeviceModel, EventChannel, ForeignMemory, RangeKind, Result as HvResult,
    SharedIopageView, Transport, XenCall, XC_PAGE_SIZE,
};

use crate::config::DomainConfig;
use crate::error::{InitError, Result};

/// Public milestones, unchanged in name and order from the specification.
/// `SERVER_ENABLED` is tracked only as an internal undo-stack entry (see
/// the module doc comment and DESIGN.md), folded into the acquisition of
/// `RESOURCE_MAPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SequencerState {
    Uninitialized,
    InterfaceOpen,
    ServerRegistered,
    ResourceMapped,
    PortArrayAllocated,
    PortsBound,
    BufPortBound,
    DeviceInitialized,
    Initialized,
}

/// One reversible action, pushed immediately after the acquisition it
/// undoes succeeds. `teardown()` pops and runs these in exact reverse
/// order, independent of which public milestone was reached.
enum TeardownStep {
    DeviceTeardown,
    UnbindBufPort,
    UnbindPorts,
    FreePortArray,
    DisableServer,
    UnmapResource,
    DestroyServer,
    CloseForeignMemory,
    CloseEvtchn,
    CloseXenCall,
}

/// The resource-acquisition/release seam the Sequencer drives. Kept
/// separate from [`hypervisor::Transport`], which is deliberately scoped
/// to steady-state dispatch (see that trait's doc comment) and not
/// lifecycle. Only `advance_to_*`/`teardown` call through this trait;
/// every other collaborator (Dispatcher, Address-Space Registry, Map
/// Cache) only ever sees `&dyn Transport`.
///
/// The forward-path methods are fallible and the Sequencer only pushes an
/// undo step on `Ok`. The teardown-path methods are infallible by
/// design: a release that fails logs a warning and moves on, since
/// `teardown()` must never itself get stuck mid-unwind.
pub trait ResourceOps: Transport {
    fn new(domid: u16) -> Self
    where
        Self: Sized;

    fn open_xencall(&mut self) -> HvResult<()>;
    fn close_xencall(&mut self);
    fn open_evtchn(&mut self) -> HvResult<()>;
    fn close_evtchn(&mut self);
    fn open_foreignmemory(&mut self) -> HvResult<()>;
    fn close_foreignmemory(&mut self);

    fn set_target(&self, backend_domid: u16) -> HvResult<()>;
    /// Queries the domain's vCPU count and records it for `Transport::vcpus`.
    fn domain_vcpu_count(&mut self) -> HvResult<u32>;

    fn create_ioreq_server(&mut self, handle_bufioreq: bool) -> HvResult<u16>;
    fn destroy_ioreq_server(&mut self);
    fn ioservid(&self) -> Option<u16>;

    fn map_ioreq_server_resource(&mut self) -> HvResult<()>;
    fn unmap_ioreq_server_resource(&mut self);
    fn enable_ioreq_server(&mut self) -> HvResult<()>;
    fn disable_ioreq_server(&mut self);

    fn alloc_port_array(&mut self);
    fn free_port_array(&mut self);
    fn bind_vcpu_port(&mut self, vcpu: usize) -> HvResult<()>;
    fn unbind_vcpu_ports(&mut self);
    /// The *remote* (guest-side) buffered-ioreq port, queried fresh from
    /// the ioreq server's info rather than cached at creation time.
    fn remote_bufioreq_port(&self) -> HvResult<u32>;
    fn bind_buf_port(&mut self, remote_port: u32) -> HvResult<()>;
    fn unbind_buf_port(&mut self);

    /// The raw event-channel fd the Event Loop polls alongside
    /// collaborator descriptors.
    fn evtchn_fd(&self) -> RawFd;
    /// Length of the allocated per-vcpu port array, for diagnostics only.
    fn port_array_len(&self) -> usize;
    /// The vcpu whose locally bound port matches `vcpu`'s slot, if bound.
    fn local_port_if_bound(&self, vcpu: usize) -> Option<u32>;
}

/// The concrete [`ResourceOps`]/[`Transport`] implementation: every handle
/// the hypervisor side of this process holds. Fields are populated one at
/// a time by `Ioemu`'s `advance_to_*` methods; by the time any `Transport`
/// method is called (device registration onward), every field it touches
/// is guaranteed `Some` by the Sequencer's forward-progression invariant.
pub struct XenTransport {
    domid: u16,
    xencall: Option<XenCall>,
    evtchn: Option<EventChannel>,
    foreignmemory: Option<ForeignMemory>,
    ioservid: Option<u16>,
    vcpus: usize,
    resource_base: Option<*mut u8>,
    shared: Option<SharedIopageView>,
    buffered: Option<BufferedIopageView>,
    local_ports: Vec<i32>,
    buf_local_port: Option<u32>,
}

// SAFETY: `resource_base` is only ever dereferenced through `shared`/
// `buffered`'s own volatile/atomic accessors, on the single dispatch
// thread that owns this `XenTransport`.
unsafe impl Send for XenTransport {}

impl XenTransport {
    fn xencall(&self) -> &XenCall {
        self.xencall.as_ref().expect("xencall accessed before INTERFACE_OPEN")
    }

    fn evtchn(&self) -> &EventChannel {
        self.evtchn.as_ref().expect("evtchn accessed before INTERFACE_OPEN")
    }

    fn foreignmemory(&self) -> &ForeignMemory {
        self.foreignmemory
            .as_ref()
            .expect("foreignmemory accessed before INTERFACE_OPEN")
    }

    fn device_model(&self) -> DeviceModel<'_> {
        DeviceModel::new(self.xencall(), self.domid)
    }

    fn ioservid_expect(&self) -> u16 {
        self.ioservid.expect("ioservid accessed before SERVER_REGISTERED")
    }
}

impl ResourceOps for XenTransport {
    fn new(domid: u16) -> XenTransport {
        XenTransport {
            domid,
            xencall: None,
            evtchn: None,
            foreignmemory: None,
            ioservid: None,
            vcpus: 0,
            resource_base: None,
            shared: None,
            buffered: None,
            local_ports: Vec::new(),
            buf_local_port: None,
        }
    }

    fn open_xencall(&mut self) -> HvResult<()> {
        self.xencall = Some(XenCall::open()?);
        Ok(())
    }

    fn close_xencall(&mut self) {
        self.xencall = None;
    }

    fn open_evtchn(&mut self) -> HvResult<()> {
        self.evtchn = Some(EventChannel::open()?);
        Ok(())
    }

    fn close_evtchn(&mut self) {
        self.evtchn = None;
    }

    fn open_foreignmemory(&mut self) -> HvResult<()> {
        self.foreignmemory = Some(ForeignMemory::open()?);
        Ok(())
    }

    fn close_foreignmemory(&mut self) {
        self.foreignmemory = None;
    }

    fn set_target(&self, backend_domid: u16) -> HvResult<()> {
        self.device_model().set_target(backend_domid)
    }

    fn domain_vcpu_count(&mut self) -> HvResult<u32> {
        let vcpus = self.device_model().domain_vcpu_count()?;
        self.vcpus = vcpus as usize;
        Ok(vcpus)
    }

    fn create_ioreq_server(&mut self, handle_bufioreq: bool) -> HvResult<u16> {
        let id = self.device_model().create_ioreq_server(handle_bufioreq)?;
        self.ioservid = Some(id);
        Ok(id)
    }

    fn destroy_ioreq_server(&mut self) {
        if let Some(ioservid) = self.ioservid.take() {
            if let Err(e) = self.device_model().destroy_ioreq_server(ioservid) {
                warn!("teardown: failed to destroy ioreq server: {}", e);
            }
        }
    }

    fn ioservid(&self) -> Option<u16> {
        self.ioservid
    }

    fn map_ioreq_server_resource(&mut self) -> HvResult<()> {
        let ioservid = self.ioservid_expect();
        let base = self.foreignmemory().map_ioreq_server_resource(self.domid, ioservid, 2)?;

        // SAFETY: `base` was just mapped by the ioctl above as two
        // contiguous pages; page 0 is the buffered iopage, page 1 the
        // shared iopage, sized for `vcpus` slots.
        let buffered = unsafe { BufferedIopageView::new(base) };
        let shared = unsafe { SharedIopageView::new(base.add(XC_PAGE_SIZE), self.vcpus) };
        self.resource_base = Some(base);
        self.buffered = Some(buffered);
        self.shared = Some(shared);
        Ok(())
    }

    fn unmap_ioreq_server_resource(&mut self) {
        if let Some(base) = self.resource_base.take() {
            if let Err(e) = self.foreignmemory().unmap(base, 2) {
                warn!("teardown: failed to unmap ioreq server resource: {}", e);
            }
        }
        self.buffered = None;
        self.shared = None;
    }

    fn enable_ioreq_server(&mut self) -> HvResult<()> {
        self.device_model().set_ioreq_server_state(self.ioservid_expect(), true)
    }

    fn disable_ioreq_server(&mut self) {
        if let Some(ioservid) = self.ioservid {
            if let Err(e) = self.device_model().set_ioreq_server_state(ioservid, false) {
                warn!("teardown: failed to disable ioreq server: {}", e);
            }
        }
    }

    fn alloc_port_array(&mut self) {
        self.local_ports = vec![-1; self.vcpus];
    }

    fn free_port_array(&mut self) {
        self.local_ports.clear();
    }

    fn bind_vcpu_port(&mut self, vcpu: usize) -> HvResult<()> {
        let remote_port = self.shared.as_ref().expect("shared iopage accessed before RESOURCE_MAPPED").slot(vcpu).vp_eport();
        let local = self.evtchn().bind_interdomain(self.domid, remote_port)?;
        self.local_ports[vcpu] = local as i32;
        Ok(())
    }

    fn unbind_vcpu_ports(&mut self) {
        for &port in &self.local_ports {
            if port < 0 {
                continue;
            }
            if let Err(e) = self.evtchn().unbind(port as u32) {
                warn!("teardown: failed to unbind vcpu port {}: {}", port, e);
            }
        }
    }

    fn remote_bufioreq_port(&self) -> HvResult<u32> {
        let info = self.device_model().get_ioreq_server_info(self.ioservid_expect())?;
        Ok(info.bufioreq_port)
    }

    fn bind_buf_port(&mut self, remote_port: u32) -> HvResult<()> {
        let local = self.evtchn().bind_interdomain(self.domid, remote_port)?;
        self.buf_local_port = Some(local);
        Ok(())
    }

    fn unbind_buf_port(&mut self) {
        if let Some(port) = self.buf_local_port.take() {
            if let Err(e) = self.evtchn().unbind(port) {
                warn!("teardown: failed to unbind buffered port: {}", e);
            }
        }
    }

    fn evtchn_fd(&self) -> RawFd {
        self.evtchn().as_raw_descriptor()
    }

    fn port_array_len(&self) -> usize {
        self.local_ports.len()
    }

    fn local_port_if_bound(&self, vcpu: usize) -> Option<u32> {
        self.local_ports.get(vcpu).copied().filter(|&p| p >= 0).map(|p| p as u32)
    }
}

impl Transport for XenTransport {
    fn vcpus(&self) -> usize {
        self.vcpus
    }

    fn notify_port(&self, port: u32) -> HvResult<()> {
        self.evtchn().notify(port)
    }

    fn unmask_port(&self, port: u32) -> HvResult<()> {
        self.evtchn().unmask(port)
    }

    fn pending_port(&mut self) -> HvResult<Option<u32>> {
        self.evtchn
            .as_mut()
            .expect("evtchn accessed before INTERFACE_OPEN")
            .pending()
    }

    fn set_irq(&self, irq: u32, level: bool) -> HvResult<()> {
        self.device_model().set_irq_level(irq, level)
    }

    fn map_range(&self, kind: RangeKind, start: u64, end: u64) -> HvResult<()> {
        self.device_model()
            .map_io_range_to_ioreq_server(self.ioservid_expect(), kind.as_hvm_io_range(), start, end)
    }

    fn unmap_range(&self, kind: RangeKind, start: u64, end: u64) -> HvResult<()> {
        self.device_model()
            .unmap_io_range_from_ioreq_server(self.ioservid_expect(), kind.as_hvm_io_range(), start, end)
    }

    fn map_guest_pages(&self, pfns: &[u64]) -> HvResult<*mut u8> {
        self.foreignmemory().map_guest_pages(self.domid, pfns)
    }

    fn unmap_guest_pages(&self, ptr: *mut u8, n: usize) -> HvResult<()> {
        self.foreignmemory().unmap(ptr, n)
    }

    fn shared_iopage(&self) -> &SharedIopageView {
        self.shared.as_ref().expect("shared iopage accessed before RESOURCE_MAPPED")
    }

    fn buffered_iopage(&self) -> &BufferedIopageView {
        self.buffered
            .as_ref()
            .expect("buffered iopage accessed before RESOURCE_MAPPED")
    }

    fn buffered_port(&self) -> u32 {
        self.buf_local_port.expect("buffered port accessed before BUF_PORT_BOUND")
    }

    fn local_port(&self, vcpu: usize) -> u32 {
        let port = self.local_ports[vcpu];
        assert!(port >= 0, "vcpu {} port accessed before PORTS_BOUND", vcpu);
        port as u32
    }
}

/// The single owned value threaded through the whole process: hypervisor
/// handles, the Address-Space Registry, the Map Cache, and registered
/// devices. No field of this struct is ever reachable through a `static`.
/// Generic over the resource-acquisition seam so tests can substitute a
/// mock; every production call site uses the default, `XenTransport`.
pub struct Ioemu<R: ResourceOps = XenTransport> {
    domid: u16,
    backend_domid: u16,
    state: SequencerState,
    teardown_stack: Vec<TeardownStep>,
    transport: R,
    registry: AddressSpaceRegistry,
    map_cache: MapCache,
    devices: Vec<Box<dyn Device>>,
}

impl<R: ResourceOps> Ioemu<R> {
    pub fn new(domid: u16, backend_domid: u16) -> Ioemu<R> {
        Ioemu {
            domid,
            backend_domid,
            state: SequencerState::Uninitialized,
            teardown_stack: Vec::new(),
            transport: R::new(domid),
            registry: AddressSpaceRegistry::new(),
            map_cache: MapCache::new(),
            devices: Vec::new(),
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn transport(&self) -> &dyn Transport {
        &self.transport
    }

    pub fn registry_mut(&mut self) -> &mut AddressSpaceRegistry {
        &mut self.registry
    }

    pub fn map_cache_mut(&mut self) -> &mut MapCache {
        &mut self.map_cache
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        &mut self.transport
    }

    /// A split borrow of the three pieces `dispatcher::dispatch_*` needs at
    /// once: an immutable `Transport` (the dispatcher never needs `&mut`
    /// on it directly; `pending_port` is drained separately by the Event
    /// Loop before this is called) plus mutable access to the registry and
    /// map cache.
    pub fn parts_mut(&mut self) -> (&dyn Transport, &mut AddressSpaceRegistry, &mut MapCache) {
        (&self.transport, &mut self.registry, &mut self.map_cache)
    }

    /// The raw event-channel fd the Event Loop polls.
    pub fn evtchn_descriptor(&self) -> RawFd {
        self.transport.evtchn_fd()
    }

    /// Descriptors owned by registered devices that the Event Loop should
    /// also wait on (spec §4.5/§6).
    pub fn device_descriptors(&self) -> Vec<RawFd> {
        self.devices.iter().flat_map(|d| d.poll_descriptors().iter().copied()).collect()
    }

    /// Runs each device's per-tick housekeeping hook.
    pub fn tick_devices(&mut self) {
        for device in &mut self.devices {
            device.tick();
        }
    }

    /// Finds the vCPU index whose locally bound port matches `port`, or
    /// `None` if it belongs to no currently bound vCPU slot (a spurious
    /// wakeup, per spec §4.5).
    pub fn vcpu_for_local_port(&self, port: u32) -> Option<usize> {
        (0..self.transport.vcpus()).find(|&vcpu| self.transport.local_port_if_bound(vcpu) == Some(port))
    }

    /// Opens the control, event-channel, and foreign-memory handles and
    /// queries the domain's vCPU count. Folds `demu.c`'s four separate
    /// handle-opens into one milestone, per SPEC_FULL.md's Open Question
    /// resolution.
    pub fn advance_to_interface_open(&mut self) -> Result<()> {
        self.transport.open_xencall().map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::CloseXenCall);

        self.transport.open_evtchn().map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::CloseEvtchn);

        self.transport.open_foreignmemory().map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::CloseForeignMemory);

        if self.backend_domid != self.domid {
            self.transport.set_target(self.backend_domid).map_err(InitError::Transport)?;
        }

        let vcpus = self.transport.domain_vcpu_count().map_err(InitError::Transport)?;

        self.state = SequencerState::InterfaceOpen;
        info!("interface open: domid={} vcpus={}", self.domid, vcpus);
        Ok(())
    }

    pub fn advance_to_server_registered(&mut self) -> Result<()> {
        let ioservid = self.transport.create_ioreq_server(true).map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::DestroyServer);

        self.state = SequencerState::ServerRegistered;
        info!("ioreq server registered: id={}", ioservid);
        Ok(())
    }

    /// Maps the server's shared resource (buffered iopage at page 0,
    /// shared iopage at page 1) and, as an internal sub-step, enables the
    /// server — the `SERVER_ENABLED` milestone from `demu.c`'s teardown
    /// table, folded here rather than exposed as a tenth public state.
    pub fn advance_to_resource_mapped(&mut self) -> Result<()> {
        self.transport.map_ioreq_server_resource().map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::UnmapResource);

        self.transport.enable_ioreq_server().map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::DisableServer);

        self.state = SequencerState::ResourceMapped;
        info!("ioreq server resource mapped and enabled");
        Ok(())
    }

    pub fn advance_to_port_array_allocated(&mut self) -> Result<()> {
        self.transport.alloc_port_array();
        self.teardown_stack.push(TeardownStep::FreePortArray);
        self.state = SequencerState::PortArrayAllocated;
        Ok(())
    }

    /// Binds one interdomain port per vCPU, using the guest-side port
    /// number each vCPU's synchronous slot already carries in `vp_eport`.
    pub fn advance_to_ports_bound(&mut self) -> Result<()> {
        let vcpus = self.transport.vcpus();
        for vcpu in 0..vcpus {
            self.transport.bind_vcpu_port(vcpu).map_err(InitError::Transport)?;
        }
        self.teardown_stack.push(TeardownStep::UnbindPorts);
        self.state = SequencerState::PortsBound;
        info!("bound {} per-vcpu event channel ports", vcpus);
        Ok(())
    }

    pub fn advance_to_buf_port_bound(&mut self) -> Result<()> {
        let remote_port = self.transport.remote_bufioreq_port().map_err(InitError::Transport)?;
        self.transport.bind_buf_port(remote_port).map_err(InitError::Transport)?;
        self.teardown_stack.push(TeardownStep::UnbindBufPort);
        self.state = SequencerState::BufPortBound;
        Ok(())
    }

    /// Registers every device named in `config` against the Address-Space
    /// Registry. `devices` are the already-constructed collaborators
    /// matching `config.devices` by position; building the concrete
    /// `Box<dyn Device>` values from a `DeviceConfig` is left to `main`,
    /// since that mapping is specific to the set of devices this build
    /// links in (out of scope here, per spec §1).
    pub fn advance_to_device_initialized(
        &mut self,
        config: &DomainConfig,
        mut devices: Vec<Box<dyn Device>>,
    ) -> Result<()> {
        for device in &mut devices {
            device
                .register(&self.transport, &mut self.registry)
                .map_err(InitError::Device)?;
        }
        self.devices = devices;
        self.teardown_stack.push(TeardownStep::DeviceTeardown);
        self.state = SequencerState::DeviceInitialized;
        info!(
            "device initialization complete: {} device(s) for domid {}",
            config.devices.len(),
            self.domid
        );
        Ok(())
    }

    pub fn advance_to_initialized(&mut self) -> Result<()> {
        self.state = SequencerState::Initialized;
        info!("sequencer reached INITIALIZED");
        Ok(())
    }

    /// Releases exactly what was acquired, in strict reverse order.
    /// Idempotent: calling this repeatedly, or from `UNINITIALIZED`, is a
    /// no-op since the undo stack is already empty.
    pub fn teardown(&mut self) {
        while let Some(step) = self.teardown_stack.pop() {
            match step {
                TeardownStep::DeviceTeardown => self.devices.clear(),
                TeardownStep::UnbindBufPort => self.transport.unbind_buf_port(),
                TeardownStep::UnbindPorts => self.transport.unbind_vcpu_ports(),
                TeardownStep::FreePortArray => self.transport.free_port_array(),
                TeardownStep::DisableServer => self.transport.disable_ioreq_server(),
                TeardownStep::UnmapResource => self.transport.unmap_ioreq_server_resource(),
                TeardownStep::DestroyServer => self.transport.destroy_ioreq_server(),
                TeardownStep::CloseForeignMemory => self.transport.close_foreignmemory(),
                TeardownStep::CloseEvtchn => self.transport.close_evtchn(),
                TeardownStep::CloseXenCall => self.transport.close_xencall(),
            }
        }
        self.state = SequencerState::Uninitialized;
    }
}

/// Describes the current sequencer state, used by the diagnostic signal
/// handler to log what's currently live without tearing anything down.
pub fn describe<R: ResourceOps>(ioemu: &Ioemu<R>) -> String {
    format!(
        "state={:?} vcpus={} local_ports={} devices={}",
        ioemu.state,
        ioemu.transport.vcpus(),
        ioemu.transport.port_array_len(),
        ioemu.devices.len()
    )
}
