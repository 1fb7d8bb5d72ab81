use anyhow::{anyhow, Context, Result};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use crate::error::HarnessError;
use crate::hosts::status_label;

#[derive(Debug, Clone)]
pub struct BuildTool {
    program: String,
    leading_args: Vec<String>,
    build_dir: PathBuf,
}

impl BuildTool {
    pub fn from_command_line(command_line: &str, build_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("empty build command"))?;
        Ok(Self {
            program: program.to_string(),
            leading_args: parts.map(|p| p.to_string()).collect(),
            build_dir: build_dir.into(),
        })
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(format!("BUILD_DIR={}", self.build_dir.display()));
        args
    }

    fn display<S: AsRef<OsStr>>(&self, args: &[String], targets: &[S]) -> String {
        std::iter::once(self.program.clone())
            .chain(args.iter().cloned())
            .chain(targets.iter().map(|t| t.as_ref().to_string_lossy().to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Builds `targets` and returns the tool's diagnostic stream. The tool's
    /// regular output is forwarded to our stderr.
    pub fn run<S: AsRef<OsStr>>(&self, targets: &[S]) -> Result<String> {
        let args = self.base_args();
        let shown = self.display(&args, targets);
        info!("{}", shown);
        let output = Command::new(&self.program)
            .args(&args)
            .args(targets)
            .stdin(Stdio::null())
            .stdout(Stdio::from(io::stderr()))
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("running {}", shown))?;
        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            eprint!("{}", diagnostics);
            return Err(HarnessError::BuildFailed {
                command: shown,
                status: status_label(output.status.code()),
            }
            .into());
        }
        Ok(diagnostics)
    }

    pub fn variable(&self, name: &str) -> Result<String> {
        let mut args = self.base_args();
        args.push(format!("print-{}", name));
        let shown = self.display::<&str>(&args, &[]);
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("running {}", shown))?;
        if !output.status.success() {
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            return Err(HarnessError::BuildFailed {
                command: shown,
                status: status_label(output.status.code()),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn program_list(&self, name: &str) -> Result<Vec<String>> {
        Ok(file_stems(&self.variable(name)?))
    }
}

pub(crate) fn file_stems(list: &str) -> Vec<String> {
    list.split_whitespace()
        .filter_map(|p| Path::new(p).file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .collect()
}
