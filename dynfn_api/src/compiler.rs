// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use crate::error::DynFnError;
use crate::function::ParamSpec;

/// Boundary to the compiler service turning a parameter schema plus a source
/// body into the bytes of a loadable artifact.
///
/// Implementations must report source problems as `DynFnError::Compile`
/// carrying the diagnostics verbatim.
#[async_trait::async_trait]
pub trait CompilerAPI: Send + Sync {
    async fn compile(&self, parameters: &[ParamSpec], body: &str) -> Result<Vec<u8>, DynFnError>;
}
