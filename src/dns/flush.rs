use std::future::Future;
use std::io;
use std::process::ExitStatus;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Clears the resolver cache so the next lookup is measured cold.
pub trait CacheFlusher: Send + Sync + 'static {
    fn flush(&self) -> impl Future<Output = Result<(), FlushError>> + Send;
}

/// Runs the host operating system's DNS cache flush command.
#[derive(Debug, Clone)]
pub struct SystemFlusher {
    program: String,
    args: Vec<String>,
}

impl SystemFlusher {
    pub fn for_host_os() -> Self {
        let (program, args): (&str, &[&str]) = if cfg!(windows) {
            ("ipconfig", &["/flushdns"])
        } else if cfg!(target_os = "macos") {
            ("dscacheutil", &["-flushcache"])
        } else {
            ("resolvectl", &["flush-caches"])
        };
        Self::with_command(program, args)
    }

    pub fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CacheFlusher for SystemFlusher {
    async fn flush(&self) -> Result<(), FlushError> {
        let command = self.command_line();
        debug!("Flushing DNS cache: {}", command);

        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FlushError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FlushError::ExitStatus {
                command,
                status: output.status,
                stderr,
            });
        }
        Ok(())
    }
}

/// Skips flushing; DNS timings then reflect whatever the resolver has cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFlusher;

impl CacheFlusher for NoopFlusher {
    async fn flush(&self) -> Result<(), FlushError> {
        Ok(())
    }
}
