// SPDX-FileCopyrightText: © 2024 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use dynfn_api::error::DynFnError;
use tokio::io::AsyncReadExt;

/// Environment variable pointing a child at the data directory of its parent.
pub const DATA_DIR_ENV: &str = "DYNFN_DATA_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Print the result.
    Exec,
    /// Print the result and append it to the shared output log.
    ExecOut,
}

impl ExecMode {
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Exec => dynfn_function::EXEC_FLAG,
            Self::ExecOut => "--exec_out",
        }
    }
}

/// Runs functions in child processes of the host executable, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct Supervisor {
    exe: std::path::PathBuf,
    data_dir: std::path::PathBuf,
    timeout: std::time::Duration,
}

fn spawn_reader<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![];
        if let Some(mut pipe) = pipe {
            if let Err(err) = pipe.read_to_end(&mut buf).await {
                log::warn!("error reading child output: {}", err);
            }
        }
        buf
    })
}

/// Kill the child together with everything it spawned.
async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // the child leads its own process group
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    if let Err(err) = child.kill().await {
        log::debug!("kill: {}", err);
    }
}

impl Supervisor {
    pub fn new(exe: std::path::PathBuf, data_dir: std::path::PathBuf, timeout: std::time::Duration) -> Self {
        Self { exe, data_dir, timeout }
    }

    pub async fn call(&self, name: &str, arguments: &str) -> Result<String, DynFnError> {
        self.run(ExecMode::Exec, name, arguments).await
    }

    pub async fn run(&self, mode: ExecMode, name: &str, arguments: &str) -> Result<String, DynFnError> {
        let mut command = std::process::Command::new(&self.exe);
        command
            .arg(mode.flag())
            .arg(name)
            .arg(arguments)
            .env(DATA_DIR_ENV, &self.data_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        {
            std::os::unix::process::CommandExt::process_group(&mut command, 0);
        }

        let mut command = tokio::process::Command::from(command);
        command.kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| DynFnError::Process(format!("could not start {}: {}", self.exe.display(), err)))?;
        log::debug!("Started '{}' as pid {:?}", name, child.id());

        drop(child.stdin.take());
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                stdout.abort();
                stderr.abort();
                return Err(DynFnError::Process(err.to_string()));
            }
            Err(_) => {
                log::warn!("'{}' timed out after {:?}, killing its process group", name, self.timeout);
                kill_tree(&mut child).await;
                stdout.abort();
                stderr.abort();
                return Err(DynFnError::Timeout(self.timeout.as_secs()));
            }
        };

        let stdout = String::from_utf8_lossy(&stdout.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr.await.unwrap_or_default()).into_owned();
        match status.code() {
            Some(0) => Ok(stdout),
            code => Err(DynFnError::ChildExit {
                code: code.unwrap_or(-1),
                output: format!("{}\n{}", stderr, stdout).trim().to_string(),
            }),
        }
    }
}
