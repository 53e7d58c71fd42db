// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT

//! Helper unit of the dynamic functions.
//!
//! The host links this crate normally to share the C ABI definitions. At run
//! time the very same source (`SOURCE`) is compiled standalone by `rustc` into
//! an rlib that every code snippet is linked against, so it must not depend on
//! anything but `std`.
//!
//! A snippet sees two things: the typed locals derived from its parameters and
//! a `host: &Host` handle used to compose with other registered functions.

use std::collections::HashMap;
use std::ffi::c_void;

/// This file, as compiled into the helper rlib.
pub const SOURCE: &str = include_str!("lib.rs");

/// Crate name snippets refer to.
pub const CRATE_NAME: &str = "dynfn_function";

/// Symbol exported by every compiled unit.
pub const ENTRY_SYMBOL: &[u8] = b"dynfn_entry\0";

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAULT: i32 = 1;

/// Flag that makes the executable run a single function and exit.
pub const EXEC_FLAG: &str = "--exec";

/// Receives a chunk of UTF-8 output; `sink` is owned by the side that allocated it.
pub type SinkFn = unsafe extern "C" fn(sink: *mut c_void, data_ptr: *const u8, data_len: usize);

/// Host callback invoking another function by name.
pub type CallFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    name_ptr: *const u8,
    name_len: usize,
    args_ptr: *const u8,
    args_len: usize,
    sink: *mut c_void,
    sink_fn: SinkFn,
) -> i32;

/// Capabilities the host binds into a loaded unit for the duration of one call.
#[repr(C)]
pub struct HostApi {
    pub ctx: *mut c_void,
    pub call: CallFn,
    /// Executable used by `Host::spawn`; may be empty.
    pub exe_ptr: *const u8,
    pub exe_len: usize,
}

/// Signature of `dynfn_entry`.
pub type EntryFn = unsafe extern "C" fn(host: *const HostApi, args_ptr: *const u8, args_len: usize, sink: *mut c_void, sink_fn: SinkFn) -> i32;

/// `SinkFn` appending to the `Vec<u8>` behind `sink`.
///
/// # Safety
/// `sink` must point to a live `Vec<u8>` and `data_ptr` to `data_len` readable bytes.
pub unsafe extern "C" fn collect_into_vec(sink: *mut c_void, data_ptr: *const u8, data_len: usize) {
    let out = &mut *(sink as *mut Vec<u8>);
    if data_len > 0 && !data_ptr.is_null() {
        out.extend_from_slice(std::slice::from_raw_parts(data_ptr, data_len));
    }
}

/// Length-prefixed encoding of a string map: for each pair, `u32 LE` length and bytes of key, then of value.
pub fn encode_args<'a, I>(args: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = Vec::new();
    for (key, value) in args {
        for part in [key, value] {
            out.extend_from_slice(&(part.len() as u32).to_le_bytes());
            out.extend_from_slice(part.as_bytes());
        }
    }
    out
}

/// Inverse of `encode_args`. A truncated tail is ignored.
pub fn decode_args(data: &[u8]) -> HashMap<String, String> {
    let mut args = HashMap::new();
    let mut rest = data;
    while let (Some(key), Some(value)) = (take_str(&mut rest), take_str(&mut rest)) {
        args.insert(key, value);
    }
    args
}

fn take_str(rest: &mut &[u8]) -> Option<String> {
    if rest.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    if rest.len() < 4 + len {
        return None;
    }
    let value = String::from_utf8_lossy(&rest[4..4 + len]).into_owned();
    *rest = &rest[4 + len..];
    Some(value)
}

/// Conversion of a raw textual argument into a parameter's declared type.
/// Malformed or absent input yields the type's default and never fails.
pub trait Coerce: Sized {
    fn coerce(raw: Option<&String>) -> Self;
}

impl Coerce for String {
    fn coerce(raw: Option<&String>) -> Self {
        raw.cloned().unwrap_or_default()
    }
}

impl Coerce for bool {
    fn coerce(raw: Option<&String>) -> Self {
        raw.map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(false)
    }
}

macro_rules! coerce_parsed {
    ( $( $t:ty ),* ) => {
        $(
            impl Coerce for $t {
                fn coerce(raw: Option<&String>) -> Self {
                    raw.and_then(|v| v.trim().parse::<$t>().ok()).unwrap_or_default()
                }
            }
        )*
    };
}

coerce_parsed!(i32, i64, f32, f64);

/// Handle through which a snippet reaches the host.
pub struct Host {
    api: *const HostApi,
}

impl Host {
    /// # Safety
    /// `api` must be null or valid for the lifetime of the returned handle.
    pub unsafe fn from_raw(api: *const HostApi) -> Self {
        Self { api }
    }

    /// A handle without host: `call` fails, `spawn` uses the current executable.
    pub fn detached() -> Self {
        Self { api: std::ptr::null() }
    }

    /// Run another registered function synchronously and return its output.
    pub fn call(&self, name: &str, args_json: &str) -> Result<String, String> {
        if self.api.is_null() {
            return Err(format!("cannot call '{}': no host available", name));
        }
        let api = unsafe { &*self.api };
        let mut out: Vec<u8> = Vec::new();
        let status = unsafe {
            (api.call)(
                api.ctx,
                name.as_ptr(),
                name.len(),
                args_json.as_ptr(),
                args_json.len(),
                &mut out as *mut Vec<u8> as *mut c_void,
                collect_into_vec,
            )
        };
        let text = String::from_utf8_lossy(&out).into_owned();
        match status {
            STATUS_OK => Ok(text),
            _ => Err(text),
        }
    }

    pub fn executable(&self) -> Option<String> {
        if self.api.is_null() {
            return None;
        }
        let api = unsafe { &*self.api };
        if api.exe_ptr.is_null() || api.exe_len == 0 {
            return None;
        }
        let raw = unsafe { std::slice::from_raw_parts(api.exe_ptr, api.exe_len) };
        Some(String::from_utf8_lossy(raw).into_owned())
    }

    /// Launch another registered function in its own process, for parallel work.
    /// Standard input is closed; standard output and error are piped to the caller.
    pub fn spawn(&self, name: &str, args_json: &str) -> std::io::Result<std::process::Child> {
        let exe = match self.executable() {
            Some(exe) => std::path::PathBuf::from(exe),
            None => std::env::current_exe()?,
        };
        let mut child = std::process::Command::new(exe)
            .arg(EXEC_FLAG)
            .arg(name)
            .arg(args_json)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;
        drop(child.stdin.take());
        Ok(child)
    }
}

pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "snippet panicked".to_string()
    }
}

thread_local! {
    // const without drop glue: no TLS destructor pinning the loaded library
    static IN_SNIPPET: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

static QUIET_HOOK: std::sync::Once = std::sync::Once::new();

/// Panics of a snippet are reported through the sink only. The default hook
/// would print to stderr and capture a backtrace.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !IN_SNIPPET.with(|flag| flag.get()) {
                previous(info);
            }
        }));
    });
}

/// Body of `dynfn_entry`: decode the arguments, run the snippet, hand the
/// result (or the panic message) to the sink.
///
/// # Safety
/// Pointers must be valid as described by `EntryFn`.
pub unsafe fn run_entry(
    host: *const HostApi,
    args_ptr: *const u8,
    args_len: usize,
    sink: *mut c_void,
    sink_fn: SinkFn,
    run: fn(&HashMap<String, String>, &Host) -> String,
) -> i32 {
    let raw: &[u8] = if args_ptr.is_null() || args_len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(args_ptr, args_len)
    };
    let args = decode_args(raw);
    let host = Host::from_raw(host);
    install_quiet_hook();
    let outer = IN_SNIPPET.with(|flag| flag.replace(true));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(&args, &host)));
    IN_SNIPPET.with(|flag| flag.set(outer));
    let (status, text) = match result {
        Ok(out) => (STATUS_OK, out),
        Err(payload) => (STATUS_FAULT, panic_message(payload.as_ref())),
    };
    sink_fn(sink, text.as_ptr(), text.len());
    status
}

/// Export macro generating `dynfn_entry` around a snippet function.
#[macro_export]
macro_rules! export {
    ( $fun:ident ) => {
        #[no_mangle]
        pub unsafe extern "C" fn dynfn_entry(
            host: *const $crate::HostApi,
            args_ptr: *const u8,
            args_len: usize,
            sink: *mut ::std::ffi::c_void,
            sink_fn: $crate::SinkFn,
        ) -> i32 {
            $crate::run_entry(host, args_ptr, args_len, sink, sink_fn, $fun)
        }
    };
}
