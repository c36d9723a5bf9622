// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::user_pool::User;
use async_trait::async_trait;
use engine_models::constants::{ENV_PROCESS_NAME, ENV_SANDBOX_SOCKET};
use engine_models::ProcessName;
use engine_process_exports::ProcessError;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// What a launcher needs to start one sandbox child.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// name the sandbox registers with
    pub process_name: ProcessName,
    /// identity the child runs as
    pub user: User,
    /// sandbox RPC socket to connect to
    pub socket_path: PathBuf,
}

/// A started sandbox child.
#[async_trait]
pub trait SandboxChild: Send {
    /// OS pid, if the child has one
    fn id(&self) -> Option<u32>;

    /// Waits for the child to exit and returns its exit code. Cancel safe.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Kills the child and reaps it.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Specifies a common interface that can be used by the OS launcher, or mockers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    /// Starts a child that will connect to the sandbox RPC service and
    /// register as `request.process_name`.
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SandboxChild>, ProcessError>;
}

/// Launches the sandbox executable as a child process.
#[derive(Debug, Clone)]
pub struct OsSandboxLauncher {
    sandbox_bin: PathBuf,
    switch_user: bool,
}

impl OsSandboxLauncher {
    /// When `switch_user` is set the child runs under the uid/gid of its
    /// pool user, which requires the manager to run as root.
    pub fn new(sandbox_bin: PathBuf, switch_user: bool) -> Self {
        OsSandboxLauncher {
            sandbox_bin,
            switch_user,
        }
    }
}

#[async_trait]
impl SandboxLauncher for OsSandboxLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<Box<dyn SandboxChild>, ProcessError> {
        let mut command = Command::new(&self.sandbox_bin);
        command
            .env(ENV_PROCESS_NAME, request.process_name.as_str())
            .env(ENV_SANDBOX_SOCKET, &request.socket_path)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        if self.switch_user {
            command.uid(request.user.uid).gid(request.user.gid);
        }
        let child = command.spawn().map_err(|e| {
            ProcessError::LaunchError(format!(
                "{} as {}: {}",
                self.sandbox_bin.display(),
                request.user.name,
                e
            ))
        })?;
        Ok(Box::new(OsSandboxChild(child)))
    }
}

struct OsSandboxChild(Child);

#[async_trait]
impl SandboxChild for OsSandboxChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.wait().await?.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        match self.0.kill().await {
            // already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            res => res,
        }
    }
}
