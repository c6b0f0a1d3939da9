//! Subprocess invocation helpers.
//!
//! All external tools (docker, compose, certbot via compose, crontab, curl,
//! tar, systemctl) are driven through [`Cmd`], which captures output and
//! turns non-zero exits into errors carrying the command line and a stderr
//! excerpt. Checks that are allowed to fail opt in with [`Cmd::allow_fail`]
//! and inspect the result themselves.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Builder for a blocking subprocess invocation.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    allow_fail: bool,
    error_msg: Option<String>,
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl CmdResult {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Combined output for diagnostics, stderr first (that is where the
    /// interesting part of a failed tool run usually lives).
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            out.push_str(stderr);
        }
        if !stdout.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stdout);
        }
        out
    }
}

impl Cmd {
    /// Start building an invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            allow_fail: false,
            error_msg: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a path argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.display().to_string());
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// A non-zero exit becomes a normal [`CmdResult`] instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Message to lead the error with when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Run the command to completion, capturing stdout and stderr.
    pub fn run(self) -> Result<CmdResult> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let output = command
            .output()
            .with_context(|| format!("failed to run '{}' (is it installed?)", self.program))?;

        let result = CmdResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status,
        };

        if !result.success() && !self.allow_fail {
            let command_line = if self.args.is_empty() {
                self.program.clone()
            } else {
                format!("{} {}", self.program, self.args.join(" "))
            };
            let detail = result.diagnostics();
            match self.error_msg {
                Some(msg) => bail!("{}\n  command: {}\n  {}", msg, command_line, detail),
                None => bail!("'{}' failed ({})\n{}", command_line, result.status, detail),
            }
        }

        Ok(result)
    }
}

/// Find a tool on PATH.
pub fn which(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// Whether a tool is available on PATH.
pub fn exists(tool: &str) -> bool {
    which(tool).is_some()
}
