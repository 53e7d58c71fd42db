// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;

pub mod compiler;
pub mod engine;
pub mod output_log;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod tools;

pub const DATABASE_FILE_NAME: &str = "functions.db";

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct DynFnSettings {
    /// Directory of the database and the output log.
    pub data_dir: String,
    pub exec_timeout_secs: u64,
    pub output_log_max_bytes: u64,
    pub rustc: String,
    pub opt_level: String,
    /// Executable launched for out-of-process calls, if not this one.
    pub exec_path: Option<String>,
    pub max_call_depth: u32,
}

impl Default for DynFnSettings {
    fn default() -> Self {
        Self {
            data_dir: String::from("dynfn_data"),
            exec_timeout_secs: 120,
            output_log_max_bytes: output_log::DEFAULT_MAX_BYTES,
            rustc: std::env::var("RUSTC").unwrap_or_else(|_| String::from("rustc")),
            opt_level: String::from("0"),
            exec_path: None,
            max_call_depth: engine::DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl DynFnSettings {
    /// Read the settings from a TOML file, falling back to the defaults when
    /// the file does not exist. `DYNFN_DATA_DIR` takes precedence over the file.
    pub fn from_file(filename: &str) -> anyhow::Result<Self> {
        let settings = match std::fs::read_to_string(filename) {
            Ok(content) => toml::from_str::<DynFnSettings>(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no configuration file {}, using defaults", filename);
                DynFnSettings::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(settings.with_env())
    }

    pub fn with_env(mut self) -> Self {
        if let Ok(data_dir) = std::env::var(supervisor::DATA_DIR_ENV) {
            if !data_dir.trim().is_empty() {
                self.data_dir = data_dir;
            }
        }
        self
    }
}

pub fn dynfn_node_default_conf() -> String {
    String::from(
        r##"data_dir = "dynfn_data"
exec_timeout_secs = 120
output_log_max_bytes = 1048576
rustc = "rustc"
opt_level = "0"
#exec_path = "/usr/local/bin/dynfn"
max_call_depth = 8
"##,
    )
}

/// Databases already initialized by this process.
static INITIALIZED: tokio::sync::Mutex<Vec<std::path::PathBuf>> = tokio::sync::Mutex::const_new(Vec::new());

/// Everything needed to manage and run dynamic functions on this host.
#[derive(Clone)]
pub struct DynFnNode {
    settings: DynFnSettings,
    data_dir: std::path::PathBuf,
    registry: registry::Registry,
    engine: engine::Engine,
    supervisor: supervisor::Supervisor,
    output_log: output_log::OutputLog,
}

impl DynFnNode {
    pub async fn new(settings: DynFnSettings) -> anyhow::Result<Self> {
        let compiler = compiler::rustc::RustcCompiler::new(&settings.rustc, &settings.opt_level)?;
        Self::with_compiler(settings, std::sync::Arc::new(compiler)).await
    }

    pub async fn with_compiler(
        settings: DynFnSettings,
        compiler: std::sync::Arc<dyn dynfn_api::compiler::CompilerAPI>,
    ) -> anyhow::Result<Self> {
        let mut data_dir = std::path::PathBuf::from(&settings.data_dir);
        if data_dir.is_relative() {
            data_dir = std::env::current_dir()?.join(data_dir);
        }
        std::fs::create_dir_all(&data_dir)?;
        log::info!("Starting dynamic functions node in {}", data_dir.display());
        log::debug!("Settings: {:?}", settings);

        let db_path = data_dir.join(DATABASE_FILE_NAME);
        let store = store::FunctionStore::open(&db_path).await?;

        // schema and legacy import once per database and process
        {
            let mut initialized = INITIALIZED.lock().await;
            if !initialized.contains(&db_path) {
                store.ensure_schema().await?;
                store::legacy::import_legacy(&store, compiler.as_ref(), &data_dir).await;
                initialized.push(db_path.clone());
            }
        }

        let exe = match &settings.exec_path {
            Some(path) if !path.trim().is_empty() => Some(std::path::PathBuf::from(path)),
            _ => std::env::current_exe().ok(),
        };
        let engine = engine::Engine::new(store.clone(), exe.clone(), settings.max_call_depth);
        let supervisor = supervisor::Supervisor::new(
            exe.unwrap_or_else(|| std::path::PathBuf::from("dynfn")),
            data_dir.clone(),
            std::time::Duration::from_secs(settings.exec_timeout_secs),
        );
        let output_log = output_log::OutputLog::new(data_dir.join(output_log::OUTPUT_LOG_FILE_NAME), settings.output_log_max_bytes);

        Ok(Self {
            settings,
            data_dir,
            registry: registry::Registry::new(store, compiler),
            engine,
            supervisor,
            output_log,
        })
    }

    pub fn settings(&self) -> &DynFnSettings {
        &self.settings
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub fn registry(&self) -> &registry::Registry {
        &self.registry
    }

    pub fn engine(&self) -> &engine::Engine {
        &self.engine
    }

    pub fn supervisor(&self) -> &supervisor::Supervisor {
        &self.supervisor
    }

    pub fn output_log(&self) -> &output_log::OutputLog {
        &self.output_log
    }

    /// Single in-process invocation, as done for `--exec`.
    pub async fn exec(&self, name: &str, arguments: &str) -> Result<String, DynFnError> {
        self.engine.call(name, arguments).await
    }

    /// Invocation whose designated output is also appended to the shared
    /// output log, as done for `--exec_out`.
    pub async fn exec_and_persist(&self, name: &str, arguments: &str) -> Result<String, DynFnError> {
        let result = self.engine.call(name, arguments).await?;
        let output = dynfn_api::util::strip_output_instructions(&result).to_string();
        let log = self.output_log.clone();
        let func = name.to_string();
        tokio::task::spawn_blocking(move || log.append(&func, &output))
            .await
            .map_err(|err| DynFnError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))??;
        Ok(result)
    }
}
