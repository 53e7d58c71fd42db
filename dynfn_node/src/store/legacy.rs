// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::function::{FunctionKind, FunctionRecord, ParamSpec};

pub const LEGACY_FILE_NAME: &str = "dynamic_functions.json";

/// Definition as stored by the JSON file that predates the database.
#[derive(Debug, serde::Deserialize)]
struct LegacyFunction {
    #[serde(rename = "Name", alias = "name", alias = "NAME")]
    name: String,
    #[serde(rename = "Description", alias = "description", default)]
    description: String,
    #[serde(rename = "Parameters", alias = "parameters", default)]
    parameters: Option<Vec<ParamSpec>>,
    #[serde(rename = "FunctionType", alias = "functionType", alias = "functiontype", alias = "function_type", default)]
    function_type: Option<String>,
    #[serde(rename = "Body", alias = "body", default)]
    body: String,
    #[serde(rename = "OutputInstructions", alias = "outputInstructions", alias = "outputinstructions", alias = "output_instructions", default)]
    output_instructions: Option<String>,
}

/// Location of the legacy file: the data directory first, then its parent.
pub fn find_legacy_file(data_dir: &std::path::Path) -> Option<std::path::PathBuf> {
    let candidate = data_dir.join(LEGACY_FILE_NAME);
    if candidate.is_file() {
        return Some(candidate);
    }
    let parent = data_dir.parent()?.join(LEGACY_FILE_NAME);
    match parent.is_file() {
        true => Some(parent),
        false => None,
    }
}

/// One-time import of the legacy JSON definitions into an empty store.
///
/// Returns the number of imported records. Nothing here is fatal: failures
/// are logged and the store is left as it was.
pub async fn import_legacy(
    store: &super::FunctionStore,
    compiler: &dyn dynfn_api::compiler::CompilerAPI,
    data_dir: &std::path::Path,
) -> usize {
    let path = match find_legacy_file(data_dir) {
        Some(path) => path,
        None => return 0,
    };

    match store.count().await {
        Ok(0) => {}
        Ok(_) => {
            log::debug!("Store not empty, ignoring {}", path.display());
            return 0;
        }
        Err(err) => {
            log::warn!("Could not count the stored functions, skipping import: {}", err);
            return 0;
        }
    }

    let definitions: Vec<LegacyFunction> = match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
    {
        Ok(definitions) => definitions,
        Err(err) => {
            log::error!("Import of {} failed: {}", path.display(), err);
            return 0;
        }
    };
    if definitions.is_empty() {
        return 0;
    }

    let mut imported = 0;
    for def in definitions {
        let kind = def
            .function_type
            .as_deref()
            .map(|t| FunctionKind::parse(t).unwrap_or(FunctionKind::Code))
            .unwrap_or(FunctionKind::Code);
        let parameters = def.parameters.unwrap_or_default();
        let compiled_artifact = match kind {
            FunctionKind::Instructions => None,
            FunctionKind::Code => match compiler.compile(&parameters, &def.body).await {
                Ok(artifact) => Some(artifact),
                Err(err) => {
                    // kept without artifact: the source survives, calls report NotCompiled
                    log::warn!("Import: failed to compile '{}': {}", def.name, err);
                    None
                }
            },
        };
        let record = FunctionRecord {
            name: def.name,
            description: def.description,
            parameters,
            kind,
            body: def.body,
            compiled_artifact,
            output_instructions: def.output_instructions.filter(|o| !o.trim().is_empty()),
        };
        match store.upsert(&record).await {
            Ok(_) => imported += 1,
            Err(err) => log::error!("Import: could not store '{}': {}", record.name, err),
        }
    }
    log::info!("Imported {} function(s) from {}", imported, path.display());

    let mut backup = path.clone().into_os_string();
    backup.push(".migrated");
    if let Err(err) = std::fs::rename(&path, &backup) {
        log::warn!("Could not rename {}: {}", path.display(), err);
    }
    imported
}

#[cfg(test)]
mod test {
    use super::*;
    use dynfn_api::error::DynFnError;

    struct RejectingCompiler {}

    #[async_trait::async_trait]
    impl dynfn_api::compiler::CompilerAPI for RejectingCompiler {
        async fn compile(&self, _parameters: &[ParamSpec], body: &str) -> Result<Vec<u8>, DynFnError> {
            match body.contains("broken") {
                true => Err(DynFnError::Compile(vec!["error: broken".to_string()])),
                false => Ok(body.as_bytes().to_vec()),
            }
        }
    }

    const LEGACY: &str = r#"[
        {"Name":"add","Description":"adds","Parameters":[{"Name":"a","Type":"int","Description":"x"}],"FunctionType":"code","Body":"a + 1"},
        {"Name":"hello","Description":"greets","Parameters":[],"FunctionType":"instructions","Body":"Say hi to {who}","OutputInstructions":"bold"},
        {"Name":"bad","Body":"broken"}
    ]"#;

    async fn setup(dir: &std::path::Path) -> super::super::FunctionStore {
        let store = super::super::FunctionStore::open(&dir.join("functions.db")).await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_import_legacy_file() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEGACY_FILE_NAME), LEGACY).unwrap();
        let store = setup(dir.path()).await;

        assert_eq!(3, import_legacy(&store, &RejectingCompiler {}, dir.path()).await);

        let add = store.get("add").await.unwrap().unwrap();
        assert_eq!(Some(b"a + 1".to_vec()), add.compiled_artifact);
        assert_eq!("a", add.parameters[0].name);
        let hello = store.get("hello").await.unwrap().unwrap();
        assert_eq!(FunctionKind::Instructions, hello.kind);
        assert_eq!(Some("bold".to_string()), hello.output_instructions);
        // default kind is code, compile failure keeps the data
        let bad = store.get("bad").await.unwrap().unwrap();
        assert_eq!(FunctionKind::Code, bad.kind);
        assert_eq!(None, bad.compiled_artifact);

        assert!(!dir.path().join(LEGACY_FILE_NAME).exists());
        assert!(dir.path().join("dynamic_functions.json.migrated").exists());
    }

    #[tokio::test]
    async fn test_import_from_parent_only_into_empty_store() {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(root.path().join(LEGACY_FILE_NAME), LEGACY).unwrap();
        let store = setup(&data_dir).await;

        store.upsert(&crate::store::test::record("existing", FunctionKind::Instructions, "x")).await.unwrap();
        assert_eq!(0, import_legacy(&store, &RejectingCompiler {}, &data_dir).await);
        assert!(root.path().join(LEGACY_FILE_NAME).exists());

        store.delete("existing").await.unwrap();
        assert_eq!(3, import_legacy(&store, &RejectingCompiler {}, &data_dir).await);
        assert!(root.path().join("dynamic_functions.json.migrated").exists());
    }

    #[tokio::test]
    async fn test_import_malformed_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LEGACY_FILE_NAME), "{ not a list").unwrap();
        let store = setup(dir.path()).await;
        assert_eq!(0, import_legacy(&store, &RejectingCompiler {}, dir.path()).await);
        assert_eq!(0, store.count().await.unwrap());
        assert!(dir.path().join(LEGACY_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_import_lowercase_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(LEGACY_FILE_NAME),
            r#"[{"name":"shout","description":"loud","parameters":[{"name":"w","type":"string"}],"functionType":"instructions","body":"{w}!","outputInstructions":"caps"}]"#,
        )
        .unwrap();
        let store = setup(dir.path()).await;

        assert_eq!(1, import_legacy(&store, &RejectingCompiler {}, dir.path()).await);
        let shout = store.get("shout").await.unwrap().unwrap();
        assert_eq!("loud", shout.description);
        assert_eq!(FunctionKind::Instructions, shout.kind);
        assert_eq!("w", shout.parameters[0].name);
        assert_eq!("{w}!", shout.body);
        assert_eq!(Some("caps".to_string()), shout.output_instructions);
    }
}
