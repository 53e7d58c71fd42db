// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT

/// Separates a function result from its output instructions.
pub const OUTPUT_INSTRUCTIONS_MARKER: &str = "\n\n[Output Instructions]: ";

/// Append the output instructions marker, unless the instructions are blank.
pub fn append_output_instructions(result: String, instructions: Option<&str>) -> String {
    match instructions {
        Some(instructions) if !instructions.trim().is_empty() => format!("{}{}{}", result, OUTPUT_INSTRUCTIONS_MARKER, instructions),
        _ => result,
    }
}

/// Return only the designated output, dropping a trailing output instructions section.
pub fn strip_output_instructions(text: &str) -> &str {
    match text.find(OUTPUT_INSTRUCTIONS_MARKER) {
        Some(pos) => &text[..pos],
        None => text,
    }
}

pub fn create_template(path: &str, content: &str) -> anyhow::Result<()> {
    assert!(!path.is_empty());
    match std::path::Path::new(&path).exists() {
        true => anyhow::bail!("cannot overwrite configuration file: {}", path),
        false => {
            std::fs::write(path, content)?;
            Ok(())
        }
    }
}
