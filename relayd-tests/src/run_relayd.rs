// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Output, Stdio},
    sync::atomic::{AtomicU32, Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};

static RUN_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique path in the temp directory for this test process.
pub fn temp_path(stem: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "relayd-{stem}-{}-{}.{extension}",
        std::process::id(),
        RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Minimal relay configuration with the container backend disabled.
pub fn disabled_backend_config(relay_id: &str, socket_path: &Path) -> Value {
    json!({
        "id": relay_id,
        "max_concurrent": 2,
        "log_level": "debug",
        "bus": { "socket_path": socket_path },
        "container": { "enabled": false }
    })
}

pub fn write_config(config: &Value) -> anyhow::Result<PathBuf> {
    let path = temp_path("config", "json");
    fs::write(&path, serde_json::to_vec_pretty(config)?)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}

fn relayd_command(config_path: &Path) -> Command {
    let mut command = Command::new("cargo");
    command
        .args(["run", "--quiet", "-p", "relayd", "--", "--file"])
        .arg(config_path);
    command
}

/// Run relayd to completion, for configurations that are expected to
/// make it exit on its own.
pub fn run_relayd_to_exit(config_path: &Path, extra_args: &[&str]) -> anyhow::Result<Output> {
    relayd_command(config_path)
        .args(extra_args)
        .stdin(Stdio::null())
        .output()
        .context("failed to run relayd via cargo")
}

/// A relayd process started via `cargo run`. Terminated on drop.
pub struct RelaydGuard {
    child: Child,
    config_path: PathBuf,
    socket_path: PathBuf,
}

impl RelaydGuard {
    /// Starts relayd and waits until its bus socket exists.
    pub fn start(config: &Value) -> anyhow::Result<Self> {
        let socket_path = config["bus"]["socket_path"]
            .as_str()
            .map(PathBuf::from)
            .context("configuration has no bus.socket_path")?;
        let config_path = write_config(config)?;

        println!("Executing relayd located via cargo run");
        let child = relayd_command(&config_path)
            .stdin(Stdio::null())
            .spawn()
            .context("failed to start relayd")?;
        let mut guard = Self {
            child,
            config_path,
            socket_path,
        };

        // the first run may have to build relayd
        let deadline = Instant::now() + Duration::from_secs(120);
        while !guard.socket_path.exists() {
            if let Some(status) = guard.child.try_wait()? {
                bail!("relayd exited during startup with {status}");
            }
            if Instant::now() >= deadline {
                bail!("relayd did not bind {}", guard.socket_path.display());
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(guard)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    pub fn send_signal(&self, sig: Signal) -> nix::Result<()> {
        signal::kill(self.pid(), sig)
    }

    pub fn interrupt(&self) -> nix::Result<()> {
        self.send_signal(Signal::SIGINT)
    }

    pub fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for RelaydGuard {
    fn drop(&mut self) {
        let pid = self.pid();

        if let Ok(None) = self.child.try_wait() {
            let _ = signal::kill(pid, Signal::SIGTERM);

            for _ in 0..20 {
                if let Ok(Some(_)) = self.child.try_wait() {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }

            if let Ok(None) = self.child.try_wait() {
                let _ = signal::kill(pid, Signal::SIGKILL);
                let _ = self.child.wait();
            }
        }

        let _ = fs::remove_file(&self.config_path);
    }
}
