// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT

pub mod compiler;
pub mod error;
pub mod function;
pub mod output_log;
pub mod util;
