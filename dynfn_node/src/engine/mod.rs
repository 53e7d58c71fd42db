// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::{FunctionKind, FunctionRecord};

pub mod host_api;
pub mod native_instance;

pub const DEFAULT_MAX_CALL_DEPTH: u32 = 8;

/// Executes registered functions inside the host process.
#[derive(Clone)]
pub struct Engine {
    inner: std::sync::Arc<EngineInner>,
}

struct EngineInner {
    store: crate::store::FunctionStore,
    exe: Option<std::path::PathBuf>,
    max_call_depth: u32,
}

/// Arguments as a JSON object; anything else counts as no arguments.
pub fn parse_arguments(arguments: &str) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Textual form of an argument: strings verbatim, other values as JSON.
fn argument_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Replace `{param}` for every declared parameter; other braces are left alone.
pub fn substitute(record: &FunctionRecord, args: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut text = record.body.clone();
    for p in &record.parameters {
        text = text.replace(&format!("{{{}}}", p.name), &argument_text(args.get(&p.name)));
    }
    text
}

impl Engine {
    /// `exe` is the executable that `Host::spawn` launches from inside a snippet.
    pub fn new(store: crate::store::FunctionStore, exe: Option<std::path::PathBuf>, max_call_depth: u32) -> Self {
        Self {
            inner: std::sync::Arc::new(EngineInner {
                store,
                exe,
                max_call_depth,
            }),
        }
    }

    pub fn executable(&self) -> Option<&std::path::Path> {
        self.inner.exe.as_deref()
    }

    pub fn max_call_depth(&self) -> u32 {
        self.inner.max_call_depth
    }

    /// Invoke a function by name. The result carries the output instructions
    /// marker when the function has output instructions.
    pub async fn call(&self, name: &str, arguments: &str) -> Result<String, DynFnError> {
        self.call_at_depth(name, arguments, 0).await
    }

    pub(crate) async fn call_at_depth(&self, name: &str, arguments: &str, depth: u32) -> Result<String, DynFnError> {
        let args = parse_arguments(arguments);
        let record = self
            .inner
            .store
            .get(name)
            .await?
            .ok_or_else(|| DynFnError::NotFound(name.to_string()))?;
        log::debug!("call '{}' ({}) at depth {}", record.name, record.kind, depth);

        let result = match record.kind {
            FunctionKind::Instructions => substitute(&record, &args),
            FunctionKind::Code => self.run_native(&record, &args, depth).await?,
        };
        Ok(dynfn_api::util::append_output_instructions(
            result,
            record.output_instructions.as_deref(),
        ))
    }

    async fn run_native(
        &self,
        record: &FunctionRecord,
        args: &serde_json::Map<String, serde_json::Value>,
        depth: u32,
    ) -> Result<String, DynFnError> {
        let artifact = record
            .compiled_artifact
            .as_deref()
            .ok_or_else(|| DynFnError::NotCompiled(record.name.clone()))?;
        let string_args: std::collections::HashMap<String, String> = record
            .parameters
            .iter()
            .map(|p| (p.name.clone(), argument_text(args.get(&p.name))))
            .collect();

        let instance = native_instance::NativeInstance::load(artifact)?;
        let ctx = host_api::HostContext::new(self.clone(), tokio::runtime::Handle::current(), depth);
        let res = tokio::task::spawn_blocking(move || {
            let api = ctx.api();
            let res = instance.invoke(&api, &string_args);
            drop(instance);
            res
        })
        .await;

        match res {
            Ok(res) => res,
            Err(err) => Err(DynFnError::ExecutionFault(format!("invocation of '{}' aborted: {}", record.name, err))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dynfn_api::function::{ParamSpec, ParamType};

    fn instructions(body: &str, params: &[&str]) -> FunctionRecord {
        FunctionRecord {
            name: "t".to_string(),
            description: String::new(),
            parameters: params.iter().map(|p| ParamSpec::new(p, ParamType::String, "")).collect(),
            kind: FunctionKind::Instructions,
            body: body.to_string(),
            compiled_artifact: None,
            output_instructions: None,
        }
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(1, parse_arguments("{\"a\":1}").len());
        assert!(parse_arguments("[1,2]").is_empty());
        assert!(parse_arguments("not json").is_empty());
        assert!(parse_arguments("").is_empty());
        assert!(parse_arguments("null").is_empty());
    }

    #[test]
    fn test_substitute() {
        let record = instructions("Hello {who}, you are {age}. {unknown} {flags} {missing}", &["who", "age", "flags", "missing"]);
        let args = parse_arguments(r#"{"who":"Ann","age":41,"flags":[true,null],"unknown":"x"}"#);
        assert_eq!("Hello Ann, you are 41. {unknown} [true,null] ", substitute(&record, &args));
    }

    #[test]
    fn test_substitute_repeats_and_nested_braces() {
        let record = instructions("{x}+{x}={{x}}", &["x"]);
        assert_eq!("2+2={2}", substitute(&record, &parse_arguments("{\"x\":\"2\"}")));
    }

    async fn engine(dir: &tempfile::TempDir) -> (Engine, crate::store::FunctionStore) {
        let store = crate::store::FunctionStore::open(&dir.path().join("functions.db")).await.unwrap();
        store.ensure_schema().await.unwrap();
        (Engine::new(store.clone(), None, DEFAULT_MAX_CALL_DEPTH), store)
    }

    #[tokio::test]
    async fn test_call_instructions_and_errors() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let (engine, store) = engine(&dir).await;

        let mut greet = instructions("Greet {name} warmly", &["name"]);
        greet.name = "greet".to_string();
        greet.output_instructions = Some("one line".to_string());
        store.upsert(&greet).await.unwrap();

        assert_eq!(
            "Greet Bob warmly\n\n[Output Instructions]: one line",
            engine.call("GREET", "{\"name\":\"Bob\"}").await.unwrap()
        );
        assert_eq!(
            "Greet  warmly\n\n[Output Instructions]: one line",
            engine.call("greet", "garbage").await.unwrap()
        );

        assert!(engine.call("nope", "{}").await.unwrap_err().is_not_found());

        let mut uncompiled = crate::store::test::record("raw", FunctionKind::Code, "1");
        uncompiled.compiled_artifact = None;
        store.upsert(&uncompiled).await.unwrap();
        assert!(matches!(engine.call("raw", "{}").await, Err(DynFnError::NotCompiled(_))));

        // bytes that are not a loadable library
        store.upsert(&crate::store::test::record("junk", FunctionKind::Code, "1")).await.unwrap();
        assert!(matches!(engine.call("junk", "{}").await, Err(DynFnError::ExecutionFault(_))));
    }
}
