// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::FunctionKind;

pub const CATALOG_URI: &str = "dynfn://functions";

/// Text view of the node for agents: every operation answers with a
/// message, failures included.
#[derive(Clone)]
pub struct Tools {
    node: crate::DynFnNode,
}

#[derive(serde::Serialize)]
struct Catalog {
    resource: &'static str,
    count: usize,
    functions: Vec<CatalogEntry>,
}

#[derive(serde::Serialize)]
struct CatalogEntry {
    #[serde(flatten)]
    summary: dynfn_api::function::FunctionSummary,
    signature: String,
}

impl Tools {
    pub fn new(node: crate::DynFnNode) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &crate::DynFnNode {
        &self.node
    }

    /// Comma-separated names, ordered.
    pub async fn list(&self) -> String {
        match self.node.registry().list().await {
            Ok(functions) => functions.iter().map(|f| f.name.as_str()).collect::<Vec<&str>>().join(", "),
            Err(err) => format!("Error: {}", err),
        }
    }

    pub async fn inspect(&self, name: &str, full: bool) -> String {
        let record = match self.node.registry().get(name).await {
            Ok(record) => record,
            Err(DynFnError::NotFound(_)) => return format!("Function '{}' not found. Use list to see available functions.", name),
            Err(err) => return format!("Error: {}", err),
        };

        let mut out = vec![
            format!("Function: {}", record.name),
            format!("Type:        {}", record.kind),
            format!("Description: {}", record.description),
            String::new(),
        ];
        if record.parameters.is_empty() {
            out.push("Parameters: (none)".to_string());
        } else {
            out.push("Parameters:".to_string());
            for p in &record.parameters {
                out.push(format!("  - {} ({}): {}", p.name, p.param_type, p.description));
            }
        }

        if full {
            let compiled = match (record.kind, &record.compiled_artifact) {
                (FunctionKind::Instructions, _) => "N/A (instructions)",
                (FunctionKind::Code, Some(_)) => "Yes",
                (FunctionKind::Code, None) => "No (missing artifact)",
            };
            out.push(String::new());
            out.push(format!("Compiled:    {}", compiled));
            out.push(String::new());
            out.push(format!(
                "Source ({}):",
                match record.kind {
                    FunctionKind::Instructions => "Instructions",
                    FunctionKind::Code => "Rust Code",
                }
            ));
            for (i, line) in record.body.split('\n').enumerate() {
                out.push(format!("  {:>3} | {}", i + 1, line.trim_end_matches('\r')));
            }
        }

        if let Some(instructions) = &record.output_instructions {
            out.push(String::new());
            out.push(format!("Output Instructions: {}", instructions));
        }
        out.join("\n").trim_end().to_string()
    }

    pub async fn register(&self, request: crate::registry::RegisterRequest) -> String {
        match self.node.registry().register(request).await {
            Ok(record) => format!(
                "{} function '{}' registered successfully with {} parameter(s).",
                match record.kind {
                    FunctionKind::Instructions => "Instructions",
                    FunctionKind::Code => "Code",
                },
                record.name,
                record.parameters.len()
            ),
            Err(err @ DynFnError::Compile(_)) => err.to_string(),
            Err(err) => format!("Registration failed: {}", err),
        }
    }

    pub async fn update(&self, name: &str, field: &str, value: &str) -> String {
        match self.node.registry().update_field(name, field, value).await {
            Ok(field) => format!("Function '{}' updated successfully: {}.", name, field),
            Err(err @ DynFnError::NotFound(_)) => err.to_string(),
            Err(DynFnError::Compile(diagnostics)) => {
                let field = dynfn_api::function::UpdatableField::parse(field)
                    .map(|f| f.to_string())
                    .unwrap_or_else(|_| field.to_string());
                format!(
                    "Update failed: compilation failed after changing '{}':\n{}",
                    field,
                    diagnostics.join("\n")
                )
            }
            Err(err) => format!("Update failed: {}", err),
        }
    }

    pub async fn delete(&self, name: &str) -> String {
        match self.node.registry().delete(name).await {
            Ok(true) => format!("Function '{}' deleted successfully.", name),
            Ok(false) => format!("Function '{}' not found.", name),
            Err(err) => format!("Error: {}", err),
        }
    }

    pub async fn compile(&self, name: &str) -> String {
        match self.node.registry().recompile(name).await {
            Ok(crate::registry::RecompileOutcome::Recompiled) => format!("Function '{}' recompiled successfully.", name),
            Ok(crate::registry::RecompileOutcome::NotCode) => {
                format!("Function '{}' is an instructions function; nothing to compile.", name)
            }
            Err(DynFnError::Compile(diagnostics)) => format!("Recompilation failed:\n{}", diagnostics.join("\n")),
            Err(err) => err.to_string(),
        }
    }

    pub async fn call(&self, name: &str, arguments: &str) -> String {
        match self.node.engine().call(name, arguments).await {
            Ok(result) => result,
            Err(DynFnError::NotFound(_)) => format!("Function '{}' not found. Use list to see available functions.", name),
            Err(err) => err.to_string(),
        }
    }

    pub async fn call_process(&self, name: &str, arguments: &str) -> String {
        match self.node.supervisor().call(name, arguments).await {
            Ok(stdout) => stdout,
            Err(err @ DynFnError::ChildExit { .. }) => err.to_string(),
            Err(DynFnError::Process(msg)) => format!("Error spawning process: {}", msg),
            Err(err) => format!("Error: {}", err),
        }
    }

    /// The whole shared output log, or the latest output of `func` when not empty.
    pub async fn read_shared_output(&self, func: &str) -> String {
        let log = self.node.output_log().clone();
        let func = func.trim().to_string();
        let res = tokio::task::spawn_blocking(move || log.query(Some(func.as_str()).filter(|f| !f.is_empty()))).await;
        match res {
            Ok(Ok(text)) => text,
            Ok(Err(err @ DynFnError::NoLogEntry(_))) => err.to_string(),
            Ok(Err(err)) => format!("Error: {}", err),
            Err(err) => format!("Error: {}", err),
        }
    }

    /// JSON listing of every function with its metadata.
    pub async fn catalog(&self) -> String {
        let functions = match self.node.registry().list().await {
            Ok(functions) => functions,
            Err(err) => return format!("Error: {}", err),
        };
        let catalog = Catalog {
            resource: CATALOG_URI,
            count: functions.len(),
            functions: functions
                .into_iter()
                .map(|summary| CatalogEntry {
                    signature: summary.signature(),
                    summary,
                })
                .collect(),
        };
        serde_json::to_string_pretty(&catalog).unwrap_or_else(|err| format!("Error: {}", err))
    }

    pub async fn details(&self, name: &str) -> String {
        self.inspect(name, false).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::test::{request, MockCompiler};

    async fn tools(dir: &tempfile::TempDir) -> Tools {
        let _ = env_logger::builder().is_test(true).try_init();
        let settings = crate::DynFnSettings {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let node = crate::DynFnNode::with_compiler(settings, std::sync::Arc::new(MockCompiler::default()))
            .await
            .unwrap();
        Tools::new(node)
    }

    #[tokio::test]
    async fn test_register_list_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir).await;
        assert_eq!("", tools.list().await);

        assert_eq!(
            "Code function 'add' registered successfully with 2 parameter(s).",
            tools
                .register(request("add", "code", r#"[{"name":"a","type":"int","description":"first"},{"name":"b","type":"int"}]"#, "a + b"))
                .await
        );
        let mut hello = request("hello", "", "", "Hi {x}\nbye");
        hello.output_instructions = "shout".to_string();
        assert_eq!("Instructions function 'hello' registered successfully with 0 parameter(s).", tools.register(hello).await);
        assert_eq!("add, hello", tools.list().await);

        assert_eq!(
            "Function: add\nType:        code\nDescription: add does things\n\nParameters:\n  - a (int): first\n  - b (int):",
            tools.inspect("add", false).await
        );
        assert_eq!(
            concat!(
                "Function: hello\nType:        instructions\nDescription: hello does things\n\nParameters: (none)\n\n",
                "Compiled:    N/A (instructions)\n\nSource (Instructions):\n    1 | Hi {x}\n    2 | bye\n\n",
                "Output Instructions: shout"
            ),
            tools.inspect("hello", true).await
        );
        assert!(tools.inspect("add", true).await.contains("Compiled:    Yes\n\nSource (Rust Code):\n    1 | a + b"));
        assert_eq!("Function 'zz' not found. Use list to see available functions.", tools.inspect("zz", true).await);
        assert_eq!(tools.inspect("add", false).await, tools.details("add").await);
    }

    #[tokio::test]
    async fn test_failure_messages() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir).await;
        assert_eq!(
            "Compilation failed:\nerror: compile_error found",
            tools.register(request("x", "code", "[]", "compile_error")).await
        );
        assert!(tools.register(request("x", "code", "oops", "1")).await.starts_with("Registration failed: "));

        tools.register(request("f", "code", "[]", "1")).await;
        tools.register(request("g", "instructions", "[]", "g")).await;
        assert_eq!("Function 'f' updated successfully: body.", tools.update("f", "BODY", "2").await);
        assert_eq!(
            "Update failed: compilation failed after changing 'body':\nerror: compile_error found",
            tools.update("f", "body", "compile_error").await
        );
        assert_eq!("Update failed: a function named 'g' already exists.", tools.update("f", "name", "g").await);
        assert!(tools.update("f", "color", "red").await.starts_with("Update failed: field must be one of"));
        assert_eq!("Function 'nope' not found.", tools.update("nope", "body", "1").await);

        assert_eq!("Function 'f' recompiled successfully.", tools.compile("f").await);
        assert_eq!("Function 'g' is an instructions function; nothing to compile.", tools.compile("g").await);
        assert_eq!("Function 'nope' not found.", tools.compile("nope").await);

        assert_eq!("Function 'g' deleted successfully.", tools.delete("g").await);
        assert_eq!("Function 'g' not found.", tools.delete("g").await);
        assert_eq!("Function 'g' not found. Use list to see available functions.", tools.call("g", "{}").await);
    }

    #[tokio::test]
    async fn test_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir).await;
        tools.register(request("b", "instructions", r#"[{"name":"p","type":"bool"}]"#, "x")).await;
        tools.register(request("a", "code", "[]", "1")).await;

        let catalog: serde_json::Value = serde_json::from_str(&tools.catalog().await).unwrap();
        assert_eq!("dynfn://functions", catalog["resource"]);
        assert_eq!(2, catalog["count"]);
        assert_eq!("a", catalog["functions"][0]["name"]);
        assert_eq!("code", catalog["functions"][0]["functionType"]);
        assert_eq!("bool", catalog["functions"][1]["parameters"][0]["type"]);
        assert!(catalog["functions"][1]["outputInstructions"].is_null());
        assert_eq!("", catalog["functions"][0]["signature"]);
        assert_eq!("p: bool", catalog["functions"][1]["signature"]);
    }

    #[tokio::test]
    async fn test_read_shared_output() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(&dir).await;
        assert_eq!("(empty)", tools.read_shared_output("").await);

        tools.register(request("echo", "instructions", r#"[{"name":"v"}]"#, "v={v}")).await;
        tools.node().exec_and_persist("echo", "{\"v\":1}").await.unwrap();
        assert_eq!("v=1", tools.read_shared_output("echo").await);
        assert_eq!("No entry found for 'other'", tools.read_shared_output("other").await);
        assert!(tools.read_shared_output("  ").await.starts_with("[Size: "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_process_messages() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake.sh");
        std::fs::write(&exe, "#!/bin/sh\nif [ \"$2\" = ok ]; then printf fine; else echo bad >&2; exit 2; fi\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = crate::DynFnSettings {
            data_dir: dir.path().to_string_lossy().into_owned(),
            exec_path: Some(exe.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let node = crate::DynFnNode::with_compiler(settings, std::sync::Arc::new(MockCompiler::default()))
            .await
            .unwrap();
        let tools = Tools::new(node);
        assert_eq!("fine", tools.call_process("ok", "{}").await);
        assert_eq!("Error (exit code 2):\nbad", tools.call_process("ko", "{}").await);
    }
}
