// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::{FunctionKind, FunctionRecord, FunctionSummary, UpdatableField};

/// Definition of a new function as received from a client, before validation.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON array of `{name, type, description}`.
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub body: String,
    /// `instructions` (the default) or `code`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub output_instructions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecompileOutcome {
    Recompiled,
    NotCode,
}

/// Validating front of the store: every record that reaches the store
/// through here is well formed, and every code record has an artifact
/// built from its current source.
#[derive(Clone)]
pub struct Registry {
    store: crate::store::FunctionStore,
    compiler: std::sync::Arc<dyn dynfn_api::compiler::CompilerAPI>,
}

fn blank_to_none(value: &str) -> Option<String> {
    match value.trim().is_empty() {
        true => None,
        false => Some(value.to_string()),
    }
}

fn parse_kind(raw: &str) -> Result<FunctionKind, DynFnError> {
    FunctionKind::parse(raw).ok_or_else(|| DynFnError::validation("function_type must be 'code' or 'instructions'."))
}

impl Registry {
    pub fn new(store: crate::store::FunctionStore, compiler: std::sync::Arc<dyn dynfn_api::compiler::CompilerAPI>) -> Self {
        Self { store, compiler }
    }

    pub fn store(&self) -> &crate::store::FunctionStore {
        &self.store
    }

    /// Validate, compile if needed, then persist, replacing any function
    /// with the same name. Nothing is stored when compilation fails.
    pub async fn register(&self, request: RegisterRequest) -> Result<FunctionRecord, DynFnError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(DynFnError::validation("name cannot be empty."));
        }
        let parameters = dynfn_api::function::parse_parameters(&request.parameters)?;
        let kind = match request.kind.trim().is_empty() {
            true => FunctionKind::Instructions,
            false => parse_kind(&request.kind)?,
        };
        let compiled_artifact = match kind {
            FunctionKind::Code => Some(self.compiler.compile(&parameters, &request.body).await?),
            FunctionKind::Instructions => None,
        };

        let record = FunctionRecord {
            name,
            description: request.description,
            parameters,
            kind,
            body: request.body,
            compiled_artifact,
            output_instructions: blank_to_none(&request.output_instructions),
        };
        self.store.upsert(&record).await?;
        log::info!("Registered {} function '{}'", record.kind, record.name);
        Ok(record)
    }

    pub async fn get(&self, name: &str) -> Result<FunctionRecord, DynFnError> {
        self.store.get(name).await?.ok_or_else(|| DynFnError::NotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<FunctionSummary>, DynFnError> {
        Ok(self.store.list().await?.iter().map(|r| r.summary()).collect())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, DynFnError> {
        let deleted = self.store.delete(name).await?;
        if deleted {
            log::info!("Deleted function '{}'", name);
        }
        Ok(deleted)
    }

    /// Change one field of an existing function. Code functions are rebuilt
    /// before anything is written; a failed build leaves the record untouched.
    pub async fn update_field(&self, name: &str, field: &str, value: &str) -> Result<UpdatableField, DynFnError> {
        let mut record = self.get(name).await?;
        let field = UpdatableField::parse(field)?;

        match field {
            UpdatableField::Name => {
                let new_name = value.trim();
                if new_name.is_empty() {
                    return Err(DynFnError::validation("name cannot be empty."));
                }
                record.name = new_name.to_string();
            }
            UpdatableField::Description => record.description = value.to_string(),
            UpdatableField::Parameters => record.parameters = dynfn_api::function::parse_parameters(value)?,
            UpdatableField::Kind => record.kind = parse_kind(value)?,
            UpdatableField::Body => record.body = value.to_string(),
            UpdatableField::OutputInstructions => record.output_instructions = blank_to_none(value),
        }

        match record.kind {
            FunctionKind::Instructions => record.compiled_artifact = None,
            FunctionKind::Code => {
                if field.affects_code() || record.compiled_artifact.is_none() {
                    record.compiled_artifact = Some(self.compiler.compile(&record.parameters, &record.body).await?);
                }
            }
        }

        self.store.replace(name, &record).await?;
        log::info!("Updated function '{}': {}", name, field);
        Ok(field)
    }

    /// Rebuild the artifact of a code function from its stored source.
    pub async fn recompile(&self, name: &str) -> Result<RecompileOutcome, DynFnError> {
        let record = self.get(name).await?;
        if record.is_instructions() {
            return Ok(RecompileOutcome::NotCode);
        }
        let artifact = self.compiler.compile(&record.parameters, &record.body).await?;
        self.store.set_artifact(&record.name, Some(&artifact)).await?;
        log::info!("Recompiled function '{}'", record.name);
        Ok(RecompileOutcome::Recompiled)
    }
}
