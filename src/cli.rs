// Copyright 2024 The xen-ioemu Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The older-build CLI surface spec §6 mentions: flags to target a
//! specific domain and device directly, for setups that do not yet
//! discover configuration through xenstore. Built with `argh`, the way
//! the rest of this corpus's binaries parse flags.

use argh::FromArgs;

/// user-space I/O-request dispatch engine for a Xen HVM guest
#[derive(FromArgs, Debug)]
pub struct Args {
    /// target guest domain id
    #[argh(option)]
    pub domid: u16,

    /// backend (driver) domain id
    #[argh(option, default = "0")]
    pub backend_domid: u16,

    /// path to a JSON domain configuration file; when omitted, devices may
    /// still be specified individually with repeated `--device` flags
    #[argh(option)]
    pub config: Option<String>,

    /// `name:kind:base:irq` device spec, may be repeated
    #[argh(option)]
    pub device: Vec<String>,

    /// enable verbose logging regardless of RUST_LOG
    #[argh(switch)]
    pub debug: bool,
}

/// Parse result distinguishing CLI misuse (exit code 2) from a clean
/// `--help` early exit (exit code 0) per spec §6's process surface.
pub enum ParseOutcome {
    Parsed(Args),
    Exit(i32),
}

pub fn parse(command_name: &str, args: &[String]) -> ParseOutcome {
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    match Args::from_args(&[command_name], &arg_refs) {
        Ok(args) => ParseOutcome::Parsed(args),
        Err(early_exit) => {
            if early_exit.status.is_ok() {
                println!("{}", early_exit.output);
                ParseOutcome::Exit(0)
            } else {
                eprint!("{}", early_exit.output);
                ParseOutcome::Exit(2)
            }
        }
    }
}
