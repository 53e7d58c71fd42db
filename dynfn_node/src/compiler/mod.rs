// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::function::ParamSpec;

pub mod rustc;

/// Name of the exported wrapper.
const RUN_FN: &str = "__dynfn_run";
/// Name of the function holding the snippet itself.
const BODY_FN: &str = "__dynfn_body";

fn is_identifier(name: &str) -> bool {
    // cannot be raw identifiers
    if matches!(name, "_" | "self" | "Self" | "super" | "crate") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => chars.all(|c| c == '_' || c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// Turn a parameter schema and a snippet into a complete compilation unit.
///
/// Every declared parameter becomes a typed local in scope of the snippet,
/// filled from the textual argument map. The snippet is the body of a
/// function returning `impl ToString`: its tail expression or an explicit
/// `return` is the result.
pub fn render_unit(parameters: &[ParamSpec], body: &str) -> Result<String, DynFnError> {
    let invalid: Vec<String> = parameters
        .iter()
        .filter(|p| !is_identifier(&p.name))
        .map(|p| format!("error: parameter name '{}' is not a valid identifier", p.name))
        .collect();
    if !invalid.is_empty() {
        return Err(DynFnError::Compile(invalid));
    }

    let mut preamble = String::new();
    for p in parameters {
        preamble.push_str(&format!(
            "    let r#{}: {} = dynfn_function::Coerce::coerce(args.get({:?}));\n",
            p.name,
            p.param_type.rust_type(),
            p.name
        ));
    }

    Ok(format!(
        r##"#![allow(unused, non_snake_case, unused_mut, unreachable_code)]
extern crate dynfn_function;
use std::collections::HashMap;
use dynfn_function::Host;

dynfn_function::export!({run});

fn {run}(args: &HashMap<String, String>, host: &Host) -> String {{
    ::std::string::ToString::to_string(&{body_fn}(args, host))
}}

fn {body_fn}(args: &HashMap<String, String>, host: &Host) -> impl ::std::string::ToString {{
{preamble}
{body}
}}
"##,
        run = RUN_FN,
        body_fn = BODY_FN,
        preamble = preamble,
        body = body
    ))
}
