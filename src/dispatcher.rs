// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Turns trapped hypervisor I/O requests into calls against the
//! Address-Space Registry, with the memory-ordering discipline spec §4.3/
//! §5 requires: an acquire fence on observing `READY`, a release fence on
//! publishing `RESP_READY`, and the buffered ring's snapshot/drain/
//! re-snapshot/publish cycle. Grounded on `demu.c`'s `demu_io_event`/
//! `demu_poll_buffered_iopage` pair, expressed here with
//! `std::sync::atomic` fences instead of the original's `xen_mb()`/
//! `xen_wmb()` macros.

use std::sync::atomic::Ordering;

use log::warn;

use devices::{AccessInfo, AddressKind, AddressSpaceRegistry, Direction, IoHandler, MapCache};
use hypervisor::{
    Transport, IOREQ_BUFFER_SLOT_NUM, IOREQ_READ, IOREQ_TYPE_COPY, IOREQ_TYPE_INVALIDATE,
    IOREQ_TYPE_PCI_CONFIG, IOREQ_TYPE_PIO, IOREQ_TYPE_TIMEOFFSET, IOREQ_WRITE,
    STATE_IOREQ_INPROCESS, STATE_IOREQ_READY, STATE_IORESP_READY, XC_PAGE_SHIFT, XC_PAGE_SIZE,
};

/// Services the synchronous slot for one vCPU, if it is carrying a fresh
/// request. A no-op if the slot isn't `READY` (covers both "nothing
/// happened" and spurious wakeups).
pub fn dispatch_sync(
    transport: &dyn Transport,
    registry: &mut AddressSpaceRegistry,
    map_cache: &mut MapCache,
    vcpu: usize,
) {
    let slot = transport.shared_iopage().slot(vcpu);

    // Acquire fence: nothing below may be reordered before this load
    // observes READY, since the hypervisor's writes to the rest of the
    // slot happened-before its store of READY.
    if slot.state(Ordering::Acquire) != STATE_IOREQ_READY {
        return;
    }
    slot.set_state(STATE_IOREQ_INPROCESS, Ordering::Relaxed);

    let addr = slot.addr();
    let data = slot.data();
    let count = slot.count();
    let size = slot.size();
    let ty = slot.ty();
    let dir = slot.dir();
    let df = slot.df();
    let data_is_ptr = slot.data_is_ptr();

    match ty {
        IOREQ_TYPE_INVALIDATE => map_cache.invalidate(transport),
        IOREQ_TYPE_TIMEOFFSET => {}
        IOREQ_TYPE_PIO | IOREQ_TYPE_COPY => {
            let kind = if ty == IOREQ_TYPE_PIO {
                AddressKind::Port
            } else {
                AddressKind::Memory
            };
            if data_is_ptr != 0 {
                dispatch_rep(transport, registry, map_cache, kind, addr, data, size, count, df, dir);
            } else {
                let result = dispatch_point(registry, kind, addr, None, size, dir, data);
                if dir == IOREQ_READ {
                    slot.set_data(result);
                }
            }
        }
        IOREQ_TYPE_PCI_CONFIG => {
            let bdf = addr >> 8;
            let reg = (addr & 0xff) + ((size >> 16) as u64);
            let real_size = size & 0xffff;
            let result =
                dispatch_point(registry, AddressKind::PciConfig, bdf, Some(reg), real_size, dir, data);
            if dir == IOREQ_READ {
                slot.set_data(result);
            }
        }
        _ => {}
    }

    // Release fence: the handler's effects (including any Map Cache
    // writes into guest memory) must be globally visible before
    // RESP_READY becomes observable to the hypervisor.
    slot.set_state(STATE_IORESP_READY, Ordering::Release);

    if let Err(e) = transport.notify_port(transport.local_port(vcpu)) {
        warn!("dispatcher: failed to notify vcpu {} port: {}", vcpu, e);
    }
}

/// One non-rep access: looks up the handler keyed by `addr`, marshals the
/// `size`-byte value to/from the slot's 64-bit `data` field in
/// little-endian order, and returns the value to store back on a read
/// (ignored on write).
///
/// `addr` is always the registry lookup key. For PIO/MMIO that is also
/// the value exposed to the handler, range-relative (`offset_in_range`
/// below). PCI-config entries are registered as a single-point range
/// keyed by the encoded BDF, so the offset exposed to the handler is the
/// config-space register instead; callers pass it as `explicit_offset`
/// rather than relying on the (always-zero) `addr - range_start`.
fn dispatch_point(
    registry: &mut AddressSpaceRegistry,
    kind: AddressKind,
    addr: u64,
    explicit_offset: Option<u64>,
    size: u32,
    dir: u8,
    data: u64,
) -> u64 {
    let found = match kind {
        AddressKind::Port => registry.find_port(addr),
        AddressKind::Memory => registry.find_memory(addr),
        AddressKind::PciConfig => registry.find_pci_config(addr),
    };
    let Some((range_start, handler)) = found else {
        // No handler: reads return zero-initialized data, writes are
        // silently discarded. The guest must not hang on an unmatched
        // range (spec §4.3).
        return 0;
    };

    let offset_in_range = addr.wrapping_sub(range_start);
    let offset = explicit_offset.unwrap_or(offset_in_range);
    let sz = size as usize;
    let info = AccessInfo {
        addr: offset,
        size,
        kind,
        dir: if dir == IOREQ_READ { Direction::Read } else { Direction::Write },
    };

    let mut h = handler.lock().unwrap();
    if dir == IOREQ_READ {
        let mut buf = [0u8; 8];
        widen_read(&mut *h, info, &mut buf[..sz]);
        let mut value = 0u64;
        for (i, byte) in buf[..sz].iter().enumerate() {
            value |= (*byte as u64) << (8 * i);
        }
        value
    } else {
        let mut buf = [0u8; 8];
        for (i, byte) in buf[..sz].iter_mut().enumerate() {
            *byte = ((data >> (8 * i)) & 0xff) as u8;
        }
        widen_write(&mut *h, info, &buf[..sz]);
        0
    }
}

/// A `data_is_ptr` rep/string access: `data` is a guest address, repeated
/// `count` times with stride `size` (negated if `df`). The I/O address
/// advances by the same stride each iteration for MMIO; it stays fixed
/// for PIO (spec §4.3's "mimicking `rep movs`" note).
#[allow(clippy::too_many_arguments)]
fn dispatch_rep(
    transport: &dyn Transport,
    registry: &mut AddressSpaceRegistry,
    map_cache: &mut MapCache,
    kind: AddressKind,
    addr: u64,
    guest_addr: u64,
    size: u32,
    count: u32,
    df: u8,
    dir: u8,
) {
    let found = match kind {
        AddressKind::Port => registry.find_port(addr),
        AddressKind::Memory => registry.find_memory(addr),
        AddressKind::PciConfig => None,
    };
    let Some((range_start, handler)) = found else {
        return;
    };

    let stride: i64 = if df != 0 { -(size as i64) } else { size as i64 };
    let mut io_addr = addr;
    let mut g_addr = guest_addr;
    let sz = size as usize;

    for _ in 0..count {
        let page_offset = (g_addr & (XC_PAGE_SIZE as u64 - 1)) as usize;
        assert!(
            page_offset + sz <= XC_PAGE_SIZE,
            "rep access spans a page boundary: offset {:#x} size {}",
            page_offset,
            sz
        );
        let pfn = g_addr >> XC_PAGE_SHIFT;
        let offset = io_addr.wrapping_sub(range_start);
        let info = AccessInfo {
            addr: offset,
            size,
            kind,
            dir: if dir == IOREQ_READ { Direction::Read } else { Direction::Write },
        };

        if dir == IOREQ_READ {
            let mut buf = [0u8; 8];
            {
                let mut h = handler.lock().unwrap();
                widen_read(&mut *h, info, &mut buf[..sz]);
            }
            match map_cache.lookup(transport, pfn) {
                // SAFETY: `ptr` is a page-resident mapping at least
                // XC_PAGE_SIZE long; `page_offset + sz` was asserted to
                // stay within one page above.
                Some(ptr) => unsafe {
                    std::ptr::copy_nonoverlapping(buf.as_ptr(), ptr.add(page_offset), sz);
                },
                None => {
                    warn!("dispatcher: rep read could not map guest pfn {:#x}, dropping", pfn);
                }
            }
        } else {
            match map_cache.lookup(transport, pfn) {
                Some(ptr) => {
                    let mut buf = [0u8; 8];
                    // SAFETY: see above.
                    unsafe {
                        std::ptr::copy_nonoverlapping(ptr.add(page_offset), buf.as_mut_ptr(), sz);
                    }
                    let mut h = handler.lock().unwrap();
                    widen_write(&mut *h, info, &buf[..sz]);
                }
                None => {
                    warn!("dispatcher: rep write could not map guest pfn {:#x}, dropping", pfn);
                }
            }
        }

        if kind == AddressKind::Memory {
            io_addr = (io_addr as i64).wrapping_add(stride) as u64;
        }
        g_addr = (g_addr as i64).wrapping_add(stride) as u64;
    }
}

/// Drains the buffered ring until caught up with the hypervisor's
/// producer, re-snapshotting `write_pointer` after each drain pass since
/// more may have arrived while draining (spec §4.3 step 5's note).
pub fn dispatch_buffered(
    transport: &dyn Transport,
    registry: &mut AddressSpaceRegistry,
) {
    let page = transport.buffered_iopage();
    loop {
        // Acquire fence: every buffered write up to this snapshot is
        // guaranteed complete in the hypervisor's view.
        let write_snapshot = page.write_pointer(Ordering::Acquire);
        let mut read_ptr = page.read_pointer(Ordering::Relaxed);
        if read_ptr == write_snapshot {
            break;
        }

        let pending = write_snapshot.wrapping_sub(read_ptr);
        if pending as usize > IOREQ_BUFFER_SLOT_NUM {
            warn!(
                "buffered ring overflow: {} pending slots exceeds capacity {}",
                pending, IOREQ_BUFFER_SLOT_NUM
            );
        }
        let limit = pending.min(IOREQ_BUFFER_SLOT_NUM as u32);
        let mut consumed = 0u32;

        while consumed < limit {
            let req = page.slot(read_ptr);
            let mut data = req.data as u64;
            let size = 1u32 << req.size;
            let mut advance = 1u32;

            if size == 8 && consumed + 1 < limit {
                let hi = page.slot(read_ptr.wrapping_add(1));
                data |= (hi.data as u64) << 32;
                advance = 2;
            }

            let kind = if req.ty == IOREQ_TYPE_PIO {
                AddressKind::Port
            } else {
                AddressKind::Memory
            };
            dispatch_buffered_write(registry, kind, req.addr, size.min(8), data);

            read_ptr = read_ptr.wrapping_add(advance);
            consumed += advance;
        }

        // Release fence: every write dispatched above must be visible
        // before the hypervisor observes the advanced read_pointer.
        page.set_read_pointer(read_ptr, Ordering::Release);

        if page.write_pointer(Ordering::Acquire) == read_ptr {
            break;
        }
    }
}

fn dispatch_buffered_write(registry: &mut AddressSpaceRegistry, kind: AddressKind, addr: u64, size: u32, data: u64) {
    let found = match kind {
        AddressKind::Port => registry.find_port(addr),
        AddressKind::Memory => registry.find_memory(addr),
        AddressKind::PciConfig => None,
    };
    let Some((range_start, handler)) = found else {
        return;
    };

    let offset = addr.wrapping_sub(range_start);
    let sz = size as usize;
    let mut buf = [0u8; 8];
    for (i, byte) in buf[..sz].iter_mut().enumerate() {
        *byte = ((data >> (8 * i)) & 0xff) as u8;
    }
    let info = AccessInfo {
        addr: offset,
        size,
        kind,
        dir: Direction::Write,
    };
    let mut h = handler.lock().unwrap();
    widen_write(&mut *h, info, &buf[..sz]);
}

/// Issues a read of `data.len()` bytes (1, 2, or 4), synthesizing it out
/// of narrower handler-native widths when the handler doesn't implement
/// `info.size` directly (spec §4.3's width fall-through).
fn widen_read(handler: &mut dyn IoHandler, info: AccessInfo, data: &mut [u8]) {
    let widths = handler.widths();
    if widths.supports(info.size) {
        handler.read(info, data);
        return;
    }
    match info.size {
        2 => {
            for i in 0..2u64 {
                let mut byte = [0u8; 1];
                widen_read(handler, sub_info(info, i, 1), &mut byte);
                data[i as usize] = byte[0];
            }
        }
        4 if widths.word => {
            for i in 0..2u64 {
                let mut word = [0u8; 2];
                widen_read(handler, sub_info(info, i * 2, 2), &mut word);
                data[(i * 2) as usize..(i * 2) as usize + 2].copy_from_slice(&word);
            }
        }
        4 => {
            for i in 0..4u64 {
                let mut byte = [0u8; 1];
                widen_read(handler, sub_info(info, i, 1), &mut byte);
                data[i as usize] = byte[0];
            }
        }
        8 => {
            for i in 0..2u64 {
                let mut long = [0u8; 4];
                widen_read(handler, sub_info(info, i * 4, 4), &mut long);
                data[(i * 4) as usize..(i * 4) as usize + 4].copy_from_slice(&long);
            }
        }
        _ => data.fill(0),
    }
}

fn widen_write(handler: &mut dyn IoHandler, info: AccessInfo, data: &[u8]) {
    let widths = handler.widths();
    if widths.supports(info.size) {
        handler.write(info, data);
        return;
    }
    match info.size {
        2 => {
            for i in 0..2u64 {
                widen_write(handler, sub_info(info, i, 1), &data[i as usize..i as usize + 1]);
            }
        }
        4 if widths.word => {
            for i in 0..2u64 {
                let lo = (i * 2) as usize;
                widen_write(handler, sub_info(info, i * 2, 2), &data[lo..lo + 2]);
            }
        }
        4 => {
            for i in 0..4u64 {
                widen_write(handler, sub_info(info, i, 1), &data[i as usize..i as usize + 1]);
            }
        }
        8 => {
            for i in 0..2u64 {
                let lo = (i * 4) as usize;
                widen_write(handler, sub_info(info, i * 4, 4), &data[lo..lo + 4]);
            }
        }
        _ => {}
    }
}

fn sub_info(info: AccessInfo, byte_offset: u64, size: u32) -> AccessInfo {
    AccessInfo {
        addr: info.addr + byte_offset,
        size,
        kind: info.kind,
        dir: info.dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use devices::AccessWidths;
    use hypervisor::{BufferedIopageView, RangeKind, Result as HvResult, SharedIopageView};

    struct MockTransport {
        shared_page: *mut u8,
        buffered_page: *mut u8,
        vcpus: usize,
        mapped: Mutex<std::collections::HashMap<u64, *mut u8>>,
        guest_ram: *mut u8,
    }

    // SAFETY: tests are single-threaded; every pointer here lives for the
    // duration of the test.
    unsafe impl Send for MockTransport {}
    unsafe impl Sync for MockTransport {}

    impl MockTransport {
        fn new(vcpus: usize) -> MockTransport {
            let shared_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            let buffered_page = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            let guest_ram = Box::leak(Box::new([0u8; 4096])).as_mut_ptr();
            MockTransport {
                shared_page,
                buffered_page,
                vcpus,
                mapped: Mutex::new(std::collections::HashMap::new()),
                guest_ram,
            }
        }

        fn shared_view(&self) -> SharedIopageView {
            // SAFETY: shared_page is sized for at least `vcpus` slots in
            // every test below (vcpus <= 4).
            unsafe { SharedIopageView::new(self.shared_page, self.vcpus) }
        }

        fn buffered_view(&self) -> BufferedIopageView {
            // SAFETY: buffered_page is a live 4KiB allocation.
            unsafe { BufferedIopageView::new(self.buffered_page) }
        }
    }

    impl Transport for MockTransport {
        fn vcpus(&self) -> usize {
            self.vcpus
        }
        fn notify_port(&self, _port: u32) -> HvResult<()> {
            Ok(())
        }
        fn unmask_port(&self, _port: u32) -> HvResult<()> {
            Ok(())
        }
        fn pending_port(&mut self) -> HvResult<Option<u32>> {
            Ok(None)
        }
        fn set_irq(&self, _irq: u32, _level: bool) -> HvResult<()> {
            Ok(())
        }
        fn map_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> HvResult<()> {
            Ok(())
        }
        fn unmap_range(&self, _kind: RangeKind, _start: u64, _end: u64) -> HvResult<()> {
            Ok(())
        }
        fn map_guest_pages(&self, pfns: &[u64]) -> HvResult<*mut u8> {
            let pfn = pfns[0];
            let mut mapped = self.mapped.lock().unwrap();
            Ok(*mapped.entry(pfn).or_insert(self.guest_ram))
        }
        fn unmap_guest_pages(&self, _ptr: *mut u8, _n: usize) -> HvResult<()> {
            Ok(())
        }
        fn shared_iopage(&self) -> &SharedIopageView {
            unreachable!("tests call shared_view() directly instead")
        }
        fn buffered_iopage(&self) -> &BufferedIopageView {
            unreachable!("tests call buffered_view() directly instead")
        }
        fn buffered_port(&self) -> u32 {
            0
        }
        fn local_port(&self, _vcpu: usize) -> u32 {
            0
        }
    }

    /// `dispatch_sync`/`dispatch_buffered` take `transport.shared_iopage()`
    /// by reference, but the mock needs interior views built after
    /// construction; this thin wrapper makes those views the ones
    /// returned, so tests can still call the free dispatch functions
    /// unchanged.
    struct Wired {
        inner: MockTransport,
        shared: SharedIopageView,
        buffered: BufferedIopageView,
    }

    impl Wired {
        fn new(vcpus: usize) -> Wired {
            let inner = MockTransport::new(vcpus);
            let shared = inner.shared_view();
            let buffered = inner.buffered_view();
            Wired { inner, shared, buffered }
        }
    }

    impl Transport for Wired {
        fn vcpus(&self) -> usize {
            self.inner.vcpus()
        }
        fn notify_port(&self, port: u32) -> HvResult<()> {
            self.inner.notify_port(port)
        }
        fn unmask_port(&self, port: u32) -> HvResult<()> {
            self.inner.unmask_port(port)
        }
        fn pending_port(&mut self) -> HvResult<Option<u32>> {
            self.inner.pending_port()
        }
        fn set_irq(&self, irq: u32, level: bool) -> HvResult<()> {
            self.inner.set_irq(irq, level)
        }
        fn map_range(&self, kind: RangeKind, start: u64, end: u64) -> HvResult<()> {
            self.inner.map_range(kind, start, end)
        }
        fn unmap_range(&self, kind: RangeKind, start: u64, end: u64) -> HvResult<()> {
            self.inner.unmap_range(kind, start, end)
        }
        fn map_guest_pages(&self, pfns: &[u64]) -> HvResult<*mut u8> {
            self.inner.map_guest_pages(pfns)
        }
        fn unmap_guest_pages(&self, ptr: *mut u8, n: usize) -> HvResult<()> {
            self.inner.unmap_guest_pages(ptr, n)
        }
        fn shared_iopage(&self) -> &SharedIopageView {
            &self.shared
        }
        fn buffered_iopage(&self) -> &BufferedIopageView {
            &self.buffered
        }
        fn buffered_port(&self) -> u32 {
            0
        }
        fn local_port(&self, vcpu: usize) -> u32 {
            self.inner.local_port(vcpu)
        }
    }

    struct ConstHandler {
        value: u32,
    }

    impl IoHandler for ConstHandler {
        fn read(&mut self, _info: AccessInfo, data: &mut [u8]) {
            data.copy_from_slice(&self.value.to_le_bytes()[..data.len()]);
        }
        fn write(&mut self, _info: AccessInfo, _data: &[u8]) {}
    }

    #[derive(Default)]
    struct RecordingHandler {
        writes: Vec<(u64, u8)>,
    }

    impl IoHandler for RecordingHandler {
        fn widths(&self) -> AccessWidths {
            AccessWidths::BYTE_ONLY
        }
        fn read(&mut self, _info: AccessInfo, data: &mut [u8]) {
            data[0] = 0;
        }
        fn write(&mut self, info: AccessInfo, data: &[u8]) {
            self.writes.push((info.addr, data[0]));
        }
    }

    #[test]
    fn scenario_single_mmio_read() {
        let transport = Wired::new(1);
        let mut registry = AddressSpaceRegistry::new();
        let mut map_cache = MapCache::new();
        let handler = Arc::new(Mutex::new(ConstHandler { value: 0xDEADBEEF }));
        registry
            .register_memory(&transport, 0xFE000000, 0x1000, handler)
            .unwrap();

        let slot = transport.shared_iopage().slot(0);
        slot.set_data(0);
        // addr/size/etc. are private to SyncSlot's crate; exercise through
        // the raw page directly the way the real hypervisor would fill it.
        unsafe {
            let raw = transport.inner.shared_page as *mut xen_sys::IoReq;
            (*raw).addr = 0xFE000000;
            (*raw).size = 4;
            (*raw).count = 1;
            (*raw).ty = IOREQ_TYPE_COPY;
            (*raw).dir = IOREQ_READ;
            (*raw).data_is_ptr = 0;
            (*raw).state.store(STATE_IOREQ_READY, Ordering::Relaxed);
        }

        dispatch_sync(&transport, &mut registry, &mut map_cache, 0);

        assert_eq!(slot.data(), 0xDEADBEEF);
        assert_eq!(slot.state(Ordering::Relaxed), STATE_IORESP_READY);
    }

    #[test]
    fn scenario_pci_config_read_keys_on_bdf_not_register() {
        let transport = Wired::new(1);
        let mut registry = AddressSpaceRegistry::new();
        let mut map_cache = MapCache::new();
        let handler = Arc::new(Mutex::new(ConstHandler { value: 0x9abc }));
        let bdf = hypervisor::encode_bdf(0, 2, 0) as u64;
        assert_eq!(bdf, 0x10);
        registry
            .register_pci_config(&transport, 0, 2, 0, handler)
            .unwrap();

        let slot = transport.shared_iopage().slot(0);
        slot.set_data(0);
        unsafe {
            let raw = transport.inner.shared_page as *mut xen_sys::IoReq;
            // addr packs bdf in bits [8..], register in bits [0..8); size
            // packs the real transfer width in its low 16 bits and an
            // extension of the register offset in bits [16..32) (spec §8
            // scenario 3: BDF 00:02.0 encoded 0x0100, register 0x04).
            (*raw).addr = (bdf << 8) | 0x04;
            (*raw).size = 4;
            (*raw).count = 1;
            (*raw).ty = IOREQ_TYPE_PCI_CONFIG;
            (*raw).dir = IOREQ_READ;
            (*raw).data_is_ptr = 0;
            (*raw).state.store(STATE_IOREQ_READY, Ordering::Relaxed);
        }

        dispatch_sync(&transport, &mut registry, &mut map_cache, 0);

        assert_eq!(slot.data(), 0x9abc);
        assert_eq!(slot.state(Ordering::Relaxed), STATE_IORESP_READY);
    }

    #[test]
    fn scenario_rep_write_df_zero() {
        let transport = Wired::new(1);
        let mut registry = AddressSpaceRegistry::new();
        let mut map_cache = MapCache::new();
        let handler: Arc<Mutex<dyn IoHandler>> = Arc::new(Mutex::new(RecordingHandler::default()));
        registry
            .register_memory(&transport, 0xFE000000, 0x1000, handler.clone())
            .unwrap();

        // Pre-seed guest memory [0x1000..0x1003] = {0xAA,0xBB,0xCC,0xDD}.
        unsafe {
            let ram = transport.inner.guest_ram;
            *ram.add(0) = 0xAA;
            *ram.add(1) = 0xBB;
            *ram.add(2) = 0xCC;
            *ram.add(3) = 0xDD;
        }

        dispatch_rep(
            &transport,
            &mut registry,
            &mut map_cache,
            AddressKind::Memory,
            0xFE000000,
            0x1000,
            1,
            4,
            0,
            IOREQ_WRITE,
        );

        let recorded = handler.lock().unwrap().writes.clone();
        assert_eq!(recorded, vec![(0, 0xAA), (1, 0xBB), (2, 0xCC), (3, 0xDD)]);
    }

    #[test]
    fn scenario_invalidate_clears_map_cache() {
        let transport = Wired::new(1);
        let mut map_cache = MapCache::new();
        map_cache.lookup(&transport, 0x10).unwrap();
        assert_eq!(map_cache.len(), 1);
        map_cache.invalidate(&transport);
        assert!(map_cache.is_empty());
    }

    #[test]
    fn width_fallthrough_assembles_long_from_bytes() {
        struct BytesOnly {
            memory: [u8; 8],
        }
        impl IoHandler for BytesOnly {
            fn widths(&self) -> AccessWidths {
                AccessWidths::BYTE_ONLY
            }
            fn read(&mut self, info: AccessInfo, data: &mut [u8]) {
                data[0] = self.memory[info.addr as usize];
            }
            fn write(&mut self, _info: AccessInfo, _data: &[u8]) {}
        }
        let mut handler = BytesOnly {
            memory: [0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0],
        };
        let info = AccessInfo {
            addr: 0,
            size: 4,
            kind: AddressKind::Memory,
            dir: Direction::Read,
        };
        let mut out = [0u8; 4];
        widen_read(&mut handler, info, &mut out);
        assert_eq!(u32::from_le_bytes(out), 0x44332211);
    }

    #[test]
    fn buffered_eight_byte_write_pairs_adjacent_slots() {
        let transport = Wired::new(1);
        let mut registry = AddressSpaceRegistry::new();
        let handler = Arc::new(Mutex::new(RecordingHandler::default()));
        registry
            .register_memory(&transport, 0xFEC00000, 0x1000, handler.clone())
            .unwrap();

        // SAFETY: constructing two adjacent buffered slots directly on the
        // mock's raw page, exactly as the hypervisor producer would.
        unsafe {
            let raw = transport.inner.buffered_page as *mut xen_sys::BufIoReq;
            *raw.add(0) = xen_sys::BufIoReq {
                addr: 0xFEC00010,
                data: 0x1111_2222,
                size: 3,
                ty: IOREQ_TYPE_COPY,
                dir: IOREQ_WRITE,
                pad: 0,
            };
            *raw.add(1) = xen_sys::BufIoReq {
                addr: 0xFEC00010,
                data: 0x3333_4444,
                size: 3,
                ty: IOREQ_TYPE_COPY,
                dir: IOREQ_WRITE,
                pad: 0,
            };
        }
        transport.buffered_iopage().set_read_pointer(0, Ordering::Relaxed);
        // two slots consumed -> write_pointer = 2
        let page_ptr = &transport.buffered as *const BufferedIopageView;
        let _ = page_ptr;
        transport_set_write_pointer(&transport, 2);

        dispatch_buffered(&transport, &mut registry);

        assert_eq!(transport.buffered_iopage().read_pointer(Ordering::Relaxed), 2);
        let writes = handler.lock().unwrap().writes.clone();
        // RecordingHandler only supports byte width; the dispatcher's
        // fall-through for an 8-byte access splits into two 4-byte steps,
        // each of which further splits into 4 bytes since `widths().word`
        // is false too, so it bottoms out at 8 individual byte writes.
        assert_eq!(writes.len(), 8);
        assert_eq!(writes[0], (0x10, 0x22));
    }

    fn transport_set_write_pointer(transport: &Wired, value: u32) {
        transport.buffered_iopage().write_pointer(Ordering::Relaxed);
        // There is no public setter for write_pointer (only the
        // hypervisor producer side would ever set it); for the test we
        // reach into the raw page the same way the real hypervisor does.
        unsafe {
            let raw = transport.inner.buffered_page as *mut xen_sys::BufferedIopage;
            (*raw).write_pointer.store(value, Ordering::Relaxed);
        }
    }
}
