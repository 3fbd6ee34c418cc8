// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process entry point: parses CLI flags or a JSON domain configuration,
//! drives the Sequencer forward to `INITIALIZED`, runs the Event Loop
//! until a termination signal arrives, then tears everything back down.
//! Grounded on `demu.c`'s `main()`, split along crosvm's binary-plus-
//! support-crates layout (see SPEC_FULL.md §2A).

mod builtin_device;
mod cli;
mod config;
mod dispatcher;
mod error;
mod event_loop;
mod sequencer;

use std::fs;
use std::process::ExitCode;

use base::signal::SignalFd;
use devices::Device;
use log::{error, info};

use crate::config::{DeviceConfig, DomainConfig};
use crate::error::{InitError, Result};
use crate::sequencer::Ioemu;

fn main() -> ExitCode {
    base::syslog::init();

    let argv: Vec<String> = std::env::args().collect();
    let command_name = argv.first().cloned().unwrap_or_else(|| "xen-ioemu".to_string());
    let args = match cli::parse(&command_name, &argv[1..]) {
        cli::ParseOutcome::Parsed(args) => args,
        cli::ParseOutcome::Exit(code) => return exit_code(code),
    };

    if args.debug {
        std::env::set_var("RUST_LOG", "debug");
    }

    let domain_config = match build_domain_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid domain configuration: {}", e);
            return exit_code(2);
        }
    };

    match run(domain_config) {
        Ok(()) => exit_code(0),
        Err(e) => {
            error!("initialization failed: {}", e);
            exit_code(1)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

/// Builds the `DomainConfig` the Sequencer and device registration consume,
/// either from a JSON file (the newer-build path, spec §6) or by
/// synthesizing one from the older-build CLI flags.
fn build_domain_config(args: &cli::Args) -> Result<DomainConfig> {
    if let Some(path) = &args.config {
        let text =
            fs::read_to_string(path).map_err(|e| InitError::InvalidConfig(format!("{}: {}", path, e)))?;
        return DomainConfig::from_json(&text).map_err(|e| InitError::InvalidConfig(e.to_string()));
    }

    let mut devices = Vec::with_capacity(args.device.len());
    for spec in &args.device {
        devices.push(parse_device_spec(spec)?);
    }

    Ok(DomainConfig {
        domid: args.domid,
        backend_domid: args.backend_domid,
        devices,
    })
}

/// Parses one `name:kind:base:irq` flag value (spec §6's older-build CLI
/// surface). `base` accepts `0x`-prefixed hex or plain decimal.
fn parse_device_spec(spec: &str) -> Result<DeviceConfig> {
    let parts: Vec<&str> = spec.split(':').collect();
    let [name, kind, base, irq] = parts[..] else {
        return Err(InitError::InvalidConfig(format!(
            "malformed --device {:?}, expected name:kind:base:irq",
            spec
        )));
    };
    let base = parse_u64(base)
        .ok_or_else(|| InitError::InvalidConfig(format!("invalid base address {:?} in --device {:?}", base, spec)))?;
    let irq: u32 = irq
        .parse()
        .map_err(|_| InitError::InvalidConfig(format!("invalid irq {:?} in --device {:?}", irq, spec)))?;
    Ok(DeviceConfig {
        name: name.to_string(),
        kind: kind.to_string(),
        base,
        irq,
        size: 0x1000,
        readonly: false,
        path: None,
    })
}

fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn run(config: DomainConfig) -> Result<()> {
    let signal_fd = SignalFd::new()
        .map_err(|e| InitError::InvalidConfig(format!("failed to set up signal handling: {}", e)))?;

    let mut ioemu = Ioemu::new(config.domid, config.backend_domid);
    if let Err(e) = initialize(&mut ioemu, &config) {
        ioemu.teardown();
        return Err(e);
    }

    info!(
        "xen-ioemu ready: domid={} backend_domid={} devices={}",
        config.domid,
        config.backend_domid,
        config.devices.len()
    );

    event_loop::run(&mut ioemu, &signal_fd);

    ioemu.teardown();
    info!("teardown complete, exiting");
    Ok(())
}

/// Drives the Sequencer through every milestone up to `INITIALIZED`. Each
/// `advance_to_*` call pushes its own undo action onto `Ioemu`'s private
/// teardown stack before returning success, so a failure partway through
/// leaves `ioemu.teardown()` able to release exactly what was acquired
/// regardless of which step failed (spec §4.2, §7).
fn initialize(ioemu: &mut Ioemu, config: &DomainConfig) -> Result<()> {
    ioemu.advance_to_interface_open()?;
    ioemu.advance_to_server_registered()?;
    ioemu.advance_to_resource_mapped()?;
    ioemu.advance_to_port_array_allocated()?;
    ioemu.advance_to_ports_bound()?;
    ioemu.advance_to_buf_port_bound()?;

    let devices: Vec<Box<dyn Device>> = config
        .devices
        .iter()
        .cloned()
        .map(|d| Box::new(builtin_device::LoggingDevice::new(d)) as Box<dyn Device>)
        .collect();
    ioemu.advance_to_device_initialized(config, devices)?;
    ioemu.advance_to_initialized()?;
    Ok(())
}
