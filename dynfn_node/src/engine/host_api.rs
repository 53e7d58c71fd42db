// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;

/// State behind the `HostApi` handed to a loaded artifact for one invocation.
pub struct HostContext {
    engine: super::Engine,
    runtime: tokio::runtime::Handle,
    exe: String,
    depth: u32,
}

impl HostContext {
    pub fn new(engine: super::Engine, runtime: tokio::runtime::Handle, depth: u32) -> Self {
        let exe = engine
            .executable()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            engine,
            runtime,
            exe,
            depth,
        }
    }

    /// C view of this context; valid as long as `self` is.
    pub fn api(&self) -> dynfn_function::HostApi {
        dynfn_function::HostApi {
            ctx: self as *const HostContext as *mut std::ffi::c_void,
            call: host_call,
            exe_ptr: self.exe.as_ptr(),
            exe_len: self.exe.len(),
        }
    }

    /// Nested in-process call. Must run on a thread outside the async context.
    pub fn call(&self, name: &str, arguments: &str) -> Result<String, DynFnError> {
        let max = self.engine.max_call_depth();
        if self.depth >= max {
            return Err(DynFnError::ExecutionFault(format!(
                "nested call to '{}' exceeds the maximum call depth of {}",
                name, max
            )));
        }
        log::debug!("nested call '{}' at depth {}", name, self.depth + 1);
        self.runtime.block_on(self.engine.call_at_depth(name, arguments, self.depth + 1))
    }
}

unsafe extern "C" fn host_call(
    ctx: *mut std::ffi::c_void,
    name_ptr: *const u8,
    name_len: usize,
    args_ptr: *const u8,
    args_len: usize,
    sink: *mut std::ffi::c_void,
    sink_fn: dynfn_function::SinkFn,
) -> i32 {
    let ctx = &*(ctx as *const HostContext);
    let name = String::from_utf8_lossy(std::slice::from_raw_parts(name_ptr, name_len)).into_owned();
    let arguments = match args_len {
        0 => String::new(),
        len => String::from_utf8_lossy(std::slice::from_raw_parts(args_ptr, len)).into_owned(),
    };

    // must not unwind into the artifact
    let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctx.call(&name, &arguments)));
    let (status, text) = match res {
        Ok(Ok(out)) => (dynfn_function::STATUS_OK, out),
        Ok(Err(err)) => (dynfn_function::STATUS_FAULT, err.to_string()),
        Err(payload) => (dynfn_function::STATUS_FAULT, dynfn_function::panic_message(payload.as_ref())),
    };
    sink_fn(sink, text.as_ptr(), text.len());
    status
}
