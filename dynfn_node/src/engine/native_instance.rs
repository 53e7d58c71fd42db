// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use std::io::prelude::*;

/// A compiled artifact loaded for a single invocation.
///
/// The library is closed before its backing file is deleted, whichever way
/// the instance goes out of scope.
pub struct NativeInstance {
    // declared first: dropped before the file it was loaded from
    library: libloading::Library,
    code_file_path: tempfile::TempPath,
}

impl NativeInstance {
    pub fn load(artifact: &[u8]) -> Result<Self, DynFnError> {
        let mut file = tempfile::Builder::new()
            .prefix("dynfn-native-")
            .suffix(std::env::consts::DLL_SUFFIX)
            .tempfile()?;
        file.write_all(artifact)?;
        file.flush()?;
        let code_file_path = file.into_temp_path();
        log::debug!("Native instance: {} bytes in {}", artifact.len(), code_file_path.display());

        let library = unsafe { libloading::Library::new(code_file_path.as_os_str()) }
            .map_err(|err| DynFnError::ExecutionFault(format!("cannot load compiled artifact: {}", err)))?;
        Ok(Self { library, code_file_path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.code_file_path
    }

    /// Run the entry point of the artifact. Blocks until the snippet returns.
    pub fn invoke(&self, host: &dynfn_function::HostApi, args: &std::collections::HashMap<String, String>) -> Result<String, DynFnError> {
        let entry: libloading::Symbol<dynfn_function::EntryFn> = unsafe { self.library.get(dynfn_function::ENTRY_SYMBOL) }
            .map_err(|err| DynFnError::ExecutionFault(format!("entry point not found: {}", err)))?;

        let encoded = dynfn_function::encode_args(args.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let mut out: Vec<u8> = Vec::new();
        let status = unsafe {
            entry(
                host,
                encoded.as_ptr(),
                encoded.len(),
                &mut out as *mut Vec<u8> as *mut std::ffi::c_void,
                dynfn_function::collect_into_vec,
            )
        };
        let text = String::from_utf8_lossy(&out).into_owned();
        match status {
            dynfn_function::STATUS_OK => Ok(text),
            _ => Err(DynFnError::ExecutionFault(text)),
        }
    }
}
