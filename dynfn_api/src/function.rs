// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use crate::error::DynFnError;

/// Declared type of a function parameter.
/// Unknown type names fall back to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    #[default]
    String,
    Int,
    Long,
    Double,
    Float,
    Bool,
}

impl ParamType {
    pub fn from_string(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "int" => Self::Int,
            "long" => Self::Long,
            "double" => Self::Double,
            "float" => Self::Float,
            "bool" => Self::Bool,
            _ => Self::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Long => "long",
            Self::Double => "double",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }

    /// Rust type of the local variable a compiled snippet sees.
    pub fn rust_type(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int => "i32",
            Self::Long => "i64",
            Self::Double => "f64",
            Self::Float => "f32",
            Self::Bool => "bool",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl serde::Serialize for ParamType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for ParamType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|r| Self::from_string(&r)).unwrap_or_default())
    }
}

/// One entry of a function's parameter schema.
/// Keys are accepted both lowercase and capitalized, the latter being the legacy file format.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ParamSpec {
    #[serde(alias = "Name", default)]
    pub name: String,
    #[serde(rename = "type", alias = "Type", default)]
    pub param_type: ParamType,
    #[serde(alias = "Description", default)]
    pub description: String,
}

impl ParamSpec {
    pub fn new(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
        }
    }
}

/// Parse and validate a JSON parameter schema.
/// A blank string is an empty schema; anything but an array of named entries is rejected.
pub fn parse_parameters(raw: &str) -> Result<Vec<ParamSpec>, DynFnError> {
    if raw.trim().is_empty() {
        return Ok(vec![]);
    }
    let params: Vec<ParamSpec> =
        serde_json::from_str(raw).map_err(|e| DynFnError::validation(format!("parameters must be a JSON array of {{name, type, description}}: {}", e)))?;
    if let Some(pos) = params.iter().position(|p| p.name.trim().is_empty()) {
        return Err(DynFnError::validation(format!("parameter #{} has no name", pos + 1)));
    }
    Ok(params)
}

/// Serialize a parameter schema the way it is persisted.
pub fn parameters_to_json(params: &[ParamSpec]) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Template text returned with `{param}` substitution.
    Instructions,
    /// Source snippet compiled into a loadable artifact.
    Code,
}

impl FunctionKind {
    /// Case-insensitive parse; `None` for blank or unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "instructions" => Some(Self::Instructions),
            "code" => Some(Self::Code),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::Code => "code",
        }
    }
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted unit of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRecord {
    /// Case-insensitive unique key.
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    pub kind: FunctionKind,
    pub body: String,
    /// Present only for `Code` records whose last compilation succeeded.
    pub compiled_artifact: Option<Vec<u8>>,
    /// Presentation hint appended to results, never executed.
    pub output_instructions: Option<String>,
}

impl FunctionRecord {
    pub fn is_instructions(&self) -> bool {
        self.kind == FunctionKind::Instructions
    }

    pub fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            parameters: self.parameters.clone(),
            output_instructions: self.output_instructions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FunctionSummary {
    pub name: String,
    pub description: String,
    #[serde(rename = "functionType", serialize_with = "serialize_kind")]
    pub kind: FunctionKind,
    pub parameters: Vec<ParamSpec>,
    #[serde(rename = "outputInstructions")]
    pub output_instructions: Option<String>,
}

fn serialize_kind<S: serde::Serializer>(kind: &FunctionKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(kind.as_str())
}

impl FunctionSummary {
    /// e.g. `a: int, b: int`
    pub fn signature(&self) -> String {
        self.parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.param_type))
            .collect::<Vec<String>>()
            .join(", ")
    }
}

/// Fields that can be changed one at a time on an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatableField {
    Name,
    Description,
    Parameters,
    Kind,
    Body,
    OutputInstructions,
}

pub const UPDATABLE_FIELDS: &str = "name, description, parameters, function_type, body, output_instructions";

impl UpdatableField {
    pub fn parse(raw: &str) -> Result<Self, DynFnError> {
        match raw.trim().to_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "description" => Ok(Self::Description),
            "parameters" => Ok(Self::Parameters),
            "function_type" | "functiontype" | "kind" => Ok(Self::Kind),
            "body" => Ok(Self::Body),
            "output_instructions" | "outputinstructions" => Ok(Self::OutputInstructions),
            _ => Err(DynFnError::validation(format!("field must be one of: {}.", UPDATABLE_FIELDS))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Description => "description",
            Self::Parameters => "parameters",
            Self::Kind => "function_type",
            Self::Body => "body",
            Self::OutputInstructions => "output_instructions",
        }
    }

    /// Whether changing this field invalidates a compiled artifact.
    pub fn affects_code(&self) -> bool {
        matches!(self, Self::Parameters | Self::Kind | Self::Body)
    }
}

impl std::fmt::Display for UpdatableField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_parameters() {
        let params = parse_parameters(r#"[{"name":"a","type":"int","description":"first"},{"Name":"b","Type":"BOOL"}]"#).unwrap();
        assert_eq!(
            vec![ParamSpec::new("a", ParamType::Int, "first"), ParamSpec::new("b", ParamType::Bool, "")],
            params
        );

        assert!(parse_parameters("").unwrap().is_empty());
        assert!(parse_parameters("  ").unwrap().is_empty());
        assert!(parse_parameters("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_parameters_rejects_bad_shapes() {
        assert!(matches!(parse_parameters("{\"name\":\"a\"}"), Err(DynFnError::Validation(_))));
        assert!(matches!(parse_parameters("not json"), Err(DynFnError::Validation(_))));
        assert!(matches!(parse_parameters(r#"[{"type":"int"}]"#), Err(DynFnError::Validation(_))));
    }

    #[test]
    fn test_unknown_param_type_is_string() {
        let params = parse_parameters(r#"[{"name":"x","type":"decimal"},{"name":"y"},{"name":"z","type":null}]"#).unwrap();
        assert!(params.iter().all(|p| p.param_type == ParamType::String));
    }

    #[test]
    fn test_parameters_json_roundtrip_uses_lowercase_keys() {
        let params = vec![ParamSpec::new("a", ParamType::Long, "n")];
        let json = parameters_to_json(&params);
        assert_eq!(r#"[{"name":"a","type":"long","description":"n"}]"#, json);
        assert_eq!(params, parse_parameters(&json).unwrap());
    }

    #[test]
    fn test_function_kind_parse() {
        assert_eq!(Some(FunctionKind::Code), FunctionKind::parse(" Code "));
        assert_eq!(Some(FunctionKind::Instructions), FunctionKind::parse("INSTRUCTIONS"));
        assert_eq!(None, FunctionKind::parse(""));
        assert_eq!(None, FunctionKind::parse("script"));
    }

    #[test]
    fn test_updatable_field_parse() {
        assert_eq!(UpdatableField::Kind, UpdatableField::parse("FunctionType").unwrap());
        assert_eq!(UpdatableField::Kind, UpdatableField::parse("function_type").unwrap());
        assert_eq!(UpdatableField::OutputInstructions, UpdatableField::parse("outputInstructions").unwrap());
        match UpdatableField::parse("compiled_artifact") {
            Err(DynFnError::Validation(msg)) => assert!(msg.contains(UPDATABLE_FIELDS)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(UpdatableField::Body.affects_code());
        assert!(!UpdatableField::Description.affects_code());
    }

    #[test]
    fn test_summary_signature() {
        let record = FunctionRecord {
            name: "add".to_string(),
            description: "adds".to_string(),
            parameters: vec![ParamSpec::new("a", ParamType::Int, ""), ParamSpec::new("b", ParamType::Int, "")],
            kind: FunctionKind::Code,
            body: "(a + b).to_string()".to_string(),
            compiled_artifact: None,
            output_instructions: None,
        };
        assert_eq!("a: int, b: int", record.summary().signature());
        let json = serde_json::to_value(record.summary()).unwrap();
        assert_eq!("code", json["functionType"]);
    }
}
