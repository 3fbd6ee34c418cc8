// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("failed to bind event channel port: {0}")]
    BindPort(std::io::Error),
    #[error("failed to create ioreq server: {0}")]
    CreateIoreqServer(std::io::Error),
    #[error("failed to destroy ioreq server: {0}")]
    DestroyIoreqServer(std::io::Error),
    #[error("failed to query domain info for domid {0}")]
    DomainInfo(u16),
    #[error("hypercall {op} failed: {source}")]
    Hypercall { op: u64, source: std::io::Error },
    #[error("failed to map io range to ioreq server: {0}")]
    MapIoRange(std::io::Error),
    #[error("failed to map guest pages: {0}")]
    MapPages(std::io::Error),
    #[error("failed to map ioreq server resource: {0}")]
    MapResource(std::io::Error),
    #[error("failed to notify event channel port {0}: {1}")]
    Notify(u32, std::io::Error),
    #[error("failed to open {0}: {1}")]
    Open(&'static str, std::io::Error),
    #[error("failed to set irq level: {0}")]
    SetIrq(std::io::Error),
    #[error("failed to set ioreq server state: {0}")]
    SetServerState(std::io::Error),
    #[error("failed to unbind event channel port {0}: {1}")]
    Unbind(u32, std::io::Error),
    #[error("failed to unmap io range from ioreq server: {0}")]
    UnmapIoRange(std::io::Error),
    #[error("failed to unmap guest pages: {0}")]
    UnmapPages(std::io::Error),
    #[error("failed to unmask event channel port {0}: {1}")]
    Unmask(u32, std::io::Error),
}

pub type Result<T> = std::result::Result<T, HypervisorError>;
