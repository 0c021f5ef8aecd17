// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Container backend that drives `podman` or `docker` through their command line.

use std::io::{self, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{self, Command, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use log::debug;

use super::exec_spec::ExecSpec;
use super::{BackendError, ContainerBackend, ExecOutput, Session};
use crate::config::ContainerConfig;

#[derive(Debug)]
pub struct CliEngine {
    relay_id: String,
    binary: String,
    default_image: Option<String>,
    extra_run_args: Vec<String>,
    run_counter: AtomicU64,
}

impl CliEngine {
    pub fn new(relay_id: &str, config: &ContainerConfig) -> Self {
        Self {
            relay_id: relay_id.to_string(),
            binary: config.binary().to_string(),
            default_image: config.default_image.clone(),
            extra_run_args: config.extra_run_args.clone(),
            run_counter: AtomicU64::new(0),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn query(&self, args: &[&str]) -> io::Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
    }
}

fn describe_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        output.status.to_string()
    } else {
        stderr.to_string()
    }
}

fn exit_code(output: &Output) -> i32 {
    // shells report death by signal as 128 + signo, so do the same
    output
        .status
        .code()
        .unwrap_or_else(|| 128 + output.status.signal().unwrap_or(0))
}

impl ContainerBackend for CliEngine {
    fn verify_configuration(&self) -> Result<(), BackendError> {
        let output = self
            .query(&["version"])
            .map_err(|e| BackendError::Verify(format!("failed to run {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(BackendError::Verify(format!(
                "{} version failed: {}",
                self.binary,
                describe_failure(&output)
            )));
        }

        if let Some(image) = &self.default_image {
            let output = self
                .query(&["image", "inspect", image])
                .map_err(|e| BackendError::Verify(format!("failed to run {}: {e}", self.binary)))?;
            if !output.status.success() {
                return Err(BackendError::Verify(format!(
                    "default image {image} is not available: {}",
                    describe_failure(&output)
                )));
            }
        }
        Ok(())
    }

    fn acquire_session(&self) -> Result<Box<dyn Session>, BackendError> {
        let output = self.query(&["version"]).map_err(|e| {
            BackendError::Unavailable(format!("failed to run {}: {e}", self.binary))
        })?;
        if !output.status.success() {
            return Err(BackendError::Unavailable(describe_failure(&output)));
        }

        let run_no = self.run_counter.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(CliSession {
            binary: self.binary.clone(),
            name: format!("relayd-{}-{}-{}", self.relay_id, process::id(), run_no),
            default_image: self.default_image.clone(),
            extra_run_args: self.extra_run_args.clone(),
        }))
    }
}

#[derive(Debug)]
struct CliSession {
    binary: String,
    name: String,
    default_image: Option<String>,
    extra_run_args: Vec<String>,
}

impl Session for CliSession {
    fn execute(self: Box<Self>, payload: &[u8]) -> Result<ExecOutput, BackendError> {
        let spec = ExecSpec::from_payload(payload)?;
        let image = spec
            .image
            .clone()
            .or_else(|| self.default_image.clone())
            .ok_or_else(|| {
                BackendError::InvalidPayload(
                    "no image given and no default image configured".into(),
                )
            })?;

        let mut builder = RunBuilder::new(&self.binary).rm().name(&self.name);
        if !spec.stdin.is_empty() {
            builder = builder.interactive();
        }
        for (key, value) in &spec.env {
            builder = builder.env(key, value);
        }
        let builder = builder
            .extra_args(&self.extra_run_args)
            .image(&image)
            .command(&spec.command);

        let output = builder.run(&spec.stdin).map_err(|e| {
            BackendError::Execution(format!("failed to run {} for {}: {e}", self.binary, self.name))
        })?;

        Ok(ExecOutput {
            exit_code: exit_code(&output),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Builder for `<engine> run` invocations.
#[derive(Debug, Default)]
pub struct RunBuilder {
    binary: String,
    args: Vec<String>,
}

impl RunBuilder {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.into(),
            args: vec!["run".into()],
        }
    }

    pub fn rm(mut self) -> Self {
        self.args.push("--rm".into());
        self
    }

    pub fn interactive(mut self) -> Self {
        self.args.push("--interactive".into());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.args.push("--name".into());
        self.args.push(name.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.args.push("-e".into());
        self.args.push(format!("{key}={value}"));
        self
    }

    pub fn extra_args(mut self, args: &[String]) -> Self {
        self.args.extend(args.iter().cloned());
        self
    }

    /// Final image reference
    pub fn image(mut self, image: &str) -> Self {
        self.args.push(image.into());
        self
    }

    /// Command to run inside the container
    pub fn command(mut self, cmd: &[String]) -> Self {
        self.args.extend(cmd.iter().cloned());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn run(self, stdin: &[u8]) -> io::Result<Output> {
        debug!("Arguments for {}: {:?}", self.binary, &self.args);

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread, otherwise a chatty child can fill
        // its stdout pipe while we are still blocked writing.
        let child_stdin = child.stdin.take();
        let input = stdin.to_vec();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut pipe) = child_stdin {
                pipe.write_all(&input)?;
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        if let Ok(Err(e)) = writer.join() {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(e);
            }
        }
        Ok(output)
    }
}
