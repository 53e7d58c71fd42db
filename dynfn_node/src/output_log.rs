// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use dynfn_api::output_log::OutputLogEntry;
use std::io::prelude::*;

pub const OUTPUT_LOG_FILE_NAME: &str = "exec_output.jsonl";
pub const DEFAULT_MAX_BYTES: u64 = 1_048_576;

/// Shared, size-bounded JSON-lines log of persisted function results.
///
/// Writers in different processes are serialized with an exclusive `flock`
/// on the log file itself.
#[derive(Debug, Clone)]
pub struct OutputLog {
    path: std::path::PathBuf,
    max_bytes: u64,
}

/// `flock` on an open file, released on drop.
struct LockGuard {
    file: std::fs::File,
}

impl LockGuard {
    fn acquire(file: std::fs::File) -> Result<Self, DynFnError> {
        Self::lock(file, true)
    }

    fn acquire_shared(file: std::fs::File) -> Result<Self, DynFnError> {
        Self::lock(file, false)
    }

    fn lock(file: std::fs::File, exclusive: bool) -> Result<Self, DynFnError> {
        #[cfg(unix)]
        {
            let operation = match exclusive {
                true => libc::LOCK_EX,
                false => libc::LOCK_SH,
            };
            let ret = unsafe { libc::flock(std::os::unix::io::AsRawFd::as_raw_fd(&file), operation) };
            if ret != 0 {
                return Err(DynFnError::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            unsafe {
                libc::flock(std::os::unix::io::AsRawFd::as_raw_fd(&self.file), libc::LOCK_UN);
            }
        }
    }
}

/// `1234567` -> `1,234,567`
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl OutputLog {
    pub fn new(path: std::path::PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one entry, first halving the log (oldest lines go) if the new
    /// line would push it beyond the size limit.
    pub fn append(&self, func: &str, output: &str) -> Result<(), DynFnError> {
        let entry = OutputLogEntry {
            func: func.to_string(),
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            out: output.to_string(),
        };
        let line = entry.to_line();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new().create(true).truncate(false).read(true).write(true).open(&self.path)?;
        let mut guard = LockGuard::acquire(file)?;
        let file = &mut guard.file;

        let size = file.metadata()?.len();
        if size + line.len() as u64 > self.max_bytes {
            let mut content = String::new();
            file.seek(std::io::SeekFrom::Start(0))?;
            file.read_to_string(&mut content)?;
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            let kept = &lines[lines.len() - lines.len() / 2..];
            log::info!("Output log {} full ({} bytes), keeping {} of {} entries", self.path.display(), size, kept.len(), lines.len());

            let mut rewritten = String::new();
            for l in kept {
                rewritten.push_str(l);
                rewritten.push('\n');
            }
            rewritten.push_str(&line);
            file.set_len(0)?;
            file.seek(std::io::SeekFrom::Start(0))?;
            file.write_all(rewritten.as_bytes())?;
        } else {
            file.seek(std::io::SeekFrom::End(0))?;
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
        Ok(())
    }

    /// Without a function name: the whole log behind a size header.
    /// With one: the output of the most recent entry of that function.
    pub fn query(&self, func: Option<&str>) -> Result<String, DynFnError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok("(empty)".to_string()),
            Err(err) => return Err(err.into()),
        };
        // a writer may be halving the log right now
        let mut guard = LockGuard::acquire_shared(file)?;
        let mut content = String::new();
        guard.file.read_to_string(&mut content)?;
        let size = guard.file.metadata()?.len();
        drop(guard);
        let content = content.trim_end();
        if content.is_empty() {
            return Ok("(empty)".to_string());
        }

        match func.filter(|f| !f.is_empty()) {
            None => {
                let used = match self.max_bytes {
                    0 => 0.0,
                    max => size as f64 * 100.0 / max as f64,
                };
                Ok(format!(
                    "[Size: {} / {} bytes ({:.2}% used)]\n{}",
                    group_thousands(size),
                    group_thousands(self.max_bytes),
                    used,
                    content
                ))
            }
            Some(func) => content
                .lines()
                .rev()
                .filter_map(OutputLogEntry::from_line)
                .find(|entry| entry.func == func)
                .map(|entry| entry.out)
                .ok_or_else(|| DynFnError::NoLogEntry(func.to_string())),
        }
    }
}
