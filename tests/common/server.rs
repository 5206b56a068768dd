//! Test daemon management.
//!
//! Spawns `kickoffd` with a throwaway config and exchanges JSON lines with
//! it over stdin/stdout.

#![allow(dead_code)]

use serde_json::Value;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// A running daemon.
pub struct TestServer {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    _data_dir: TempDir,
}

impl TestServer {
    /// Spawn the daemon with a redb store and SQLite ratings in a temp dir.
    pub async fn spawn(extra_config: &str) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;
        let config_path = data_dir.path().join("config.toml");
        std::fs::write(&config_path, config_for(data_dir.path(), extra_config))?;

        let mut child = Command::new(env!("CARGO_BIN_EXE_kickoffd"))
            .arg(&config_path)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("child stdout not captured"))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            _data_dir: data_dir,
        })
    }

    /// Write one raw line to the daemon.
    pub async fn send_raw(&mut self, line: &str) -> anyhow::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("stdin already closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, action: &Value) -> anyhow::Result<()> {
        self.send_raw(&action.to_string()).await
    }

    /// Next output line, parsed.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        let line = timeout(Duration::from_secs(5), self.stdout.next_line())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for output"))??
            .ok_or_else(|| anyhow::anyhow!("daemon closed stdout"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Read lines until one matches, returning everything read.
    pub async fn recv_until<F>(&mut self, pred: F) -> anyhow::Result<Vec<Value>>
    where
        F: Fn(&Value) -> bool,
    {
        let mut seen = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = pred(&line);
            seen.push(line);
            if done {
                return Ok(seen);
            }
        }
    }

    /// Read lines until the accumulated output satisfies `done`.
    pub async fn collect_until<F>(&mut self, done: F) -> anyhow::Result<Vec<Value>>
    where
        F: Fn(&[Value]) -> bool,
    {
        let mut seen = Vec::new();
        while !done(&seen) {
            seen.push(self.recv().await?);
        }
        Ok(seen)
    }

    /// Wait for the reply to a given action id.
    pub async fn reply_to(&mut self, id: &str) -> anyhow::Result<Value> {
        let lines = self
            .recv_until(|v| v["type"] == "reply" && v["id"] == id)
            .await?;
        lines
            .into_iter()
            .last()
            .ok_or_else(|| anyhow::anyhow!("no reply"))
    }

    /// Close stdin and collect the remaining output until exit.
    pub async fn finish(mut self) -> anyhow::Result<(ExitStatus, Vec<Value>)> {
        drop(self.stdin.take());
        let mut rest = Vec::new();
        while let Some(line) = timeout(Duration::from_secs(5), self.stdout.next_line()).await?? {
            rest.push(serde_json::from_str(&line)?);
        }
        let status = timeout(Duration::from_secs(5), self.child.wait()).await??;
        Ok((status, rest))
    }
}

fn config_for(dir: &Path, extra: &str) -> String {
    format!(
        r#"
[server]
name = "test"
metrics_port = 0

[store]
backend = "redb"
path = "{dir}/sessions.redb"
retry_base_delay_ms = 1
retry_max_delay_ms = 10

[database]
path = "{dir}/ratings.db"

{extra}
"#,
        dir = dir.display(),
    )
}
