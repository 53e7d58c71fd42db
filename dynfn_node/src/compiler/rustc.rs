// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::ParamSpec;

/// Compiler adapter driving an external `rustc`.
///
/// The helper unit is built once per instance, into a private build
/// directory removed when the compiler is dropped. Each snippet is then
/// built as a `cdylib` linked against it.
pub struct RustcCompiler {
    rustc: String,
    opt_level: String,
    build_dir: tempfile::TempDir,
    helper: tokio::sync::OnceCell<std::path::PathBuf>,
}

/// Extract the rendered text of every error out of rustc's JSON diagnostics.
/// Lines that are not diagnostics are kept as they are.
pub fn parse_diagnostics(stderr: &str) -> Vec<String> {
    let mut errors = vec![];
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(diag) => {
                let level = diag.get("level").and_then(|l| l.as_str()).unwrap_or_default();
                if level == "error" || level == "error: internal compiler error" {
                    let rendered = diag
                        .get("rendered")
                        .and_then(|r| r.as_str())
                        .or_else(|| diag.get("message").and_then(|m| m.as_str()))
                        .unwrap_or_default();
                    errors.push(rendered.trim_end().to_string());
                }
            }
            Err(_) => errors.push(line.to_string()),
        }
    }
    errors
}

impl RustcCompiler {
    pub fn new(rustc: &str, opt_level: &str) -> Result<Self, DynFnError> {
        let build_dir = tempfile::Builder::new().prefix("dynfn-build-").tempdir()?;
        Ok(Self {
            rustc: rustc.to_string(),
            opt_level: opt_level.to_string(),
            build_dir,
            helper: tokio::sync::OnceCell::new(),
        })
    }

    async fn run_rustc(&self, args: Vec<std::ffi::OsString>) -> Result<(), DynFnError> {
        log::debug!("{} {:?}", self.rustc, args);
        let output = tokio::process::Command::new(&self.rustc)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|err| DynFnError::Compile(vec![format!("could not run '{}': {}", self.rustc, err)]))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&stderr);
        if diagnostics.is_empty() {
            diagnostics.push(format!("{} exited with {}", self.rustc, output.status));
        }
        Err(DynFnError::Compile(diagnostics))
    }

    fn common_args(&self) -> Vec<std::ffi::OsString> {
        vec![
            "--edition".into(),
            "2021".into(),
            "--error-format=json".into(),
            "-C".into(),
            format!("opt-level={}", self.opt_level).into(),
        ]
    }

    /// Path of the helper rlib, building it on first use.
    async fn helper_rlib(&self) -> Result<&std::path::PathBuf, DynFnError> {
        self.helper
            .get_or_try_init(|| async {
                let dir = self.build_dir.path().join("helper");
                std::fs::create_dir_all(&dir)?;
                // `lib.rs` so that the unit finds itself through include_str!
                let source = dir.join("lib.rs");
                std::fs::write(&source, dynfn_function::SOURCE)?;

                let mut args = self.common_args();
                args.extend([
                    "--crate-type".into(),
                    "rlib".into(),
                    "--crate-name".into(),
                    dynfn_function::CRATE_NAME.into(),
                    "--out-dir".into(),
                    dir.clone().into_os_string(),
                    source.into_os_string(),
                ]);
                self.run_rustc(args).await?;
                log::info!("Helper unit built in {}", dir.display());
                Ok::<_, DynFnError>(dir.join(format!("lib{}.rlib", dynfn_function::CRATE_NAME)))
            })
            .await
    }
}

#[async_trait::async_trait]
impl dynfn_api::compiler::CompilerAPI for RustcCompiler {
    async fn compile(&self, parameters: &[ParamSpec], body: &str) -> Result<Vec<u8>, DynFnError> {
        let unit = super::render_unit(parameters, body)?;
        let helper = self.helper_rlib().await?.clone();

        let unit_dir = tempfile::Builder::new().prefix("unit-").tempdir_in(self.build_dir.path())?;
        let source = unit_dir.path().join("unit.rs");
        std::fs::write(&source, unit)?;
        let artifact = unit_dir
            .path()
            .join(format!("{}dynfn_unit{}", std::env::consts::DLL_PREFIX, std::env::consts::DLL_SUFFIX));

        let mut extern_arg = std::ffi::OsString::from(format!("{}=", dynfn_function::CRATE_NAME));
        extern_arg.push(&helper);
        let mut dependency_arg = std::ffi::OsString::from("dependency=");
        if let Some(helper_dir) = helper.parent() {
            dependency_arg.push(helper_dir);
        }

        let mut args = self.common_args();
        args.extend([
            "--crate-type".into(),
            "cdylib".into(),
            "--crate-name".into(),
            "dynfn_unit".into(),
            "-L".into(),
            dependency_arg,
            "--extern".into(),
            extern_arg,
            "-o".into(),
            artifact.clone().into_os_string(),
            source.into_os_string(),
        ]);
        self.run_rustc(args).await?;

        let bytes = std::fs::read(&artifact)?;
        log::debug!("Compiled unit of {} bytes", bytes.len());
        Ok(bytes)
    }
}
