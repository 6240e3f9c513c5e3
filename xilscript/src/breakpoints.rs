use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::ScriptError;
use crate::host::ScriptHost;
use crate::program::Program;
use crate::stack::Stack;

/// A debugger breakpoint on a line of a script file
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub filename: PathBuf,
    pub line: u32,
    pub active: bool,
    pub hit_count: u32,
    /// equation that must be non-zero for the breakpoint to stop the script
    pub condition: Option<String>,
    ip: Option<u32>,
}

impl Breakpoint {
    /// The instruction the breakpoint is bound to, if its file is part of the loaded script
    pub fn ip(&self) -> Option<u32> {
        self.ip
    }
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} \t{}\t{}\th={}",
            if self.active { 'A' } else { 'I' },
            self.filename.display(),
            self.line,
            self.hit_count
        )
    }
}

fn normalize_path(filename: &Path) -> PathBuf {
    filename
        .canonicalize()
        .unwrap_or_else(|_| filename.to_path_buf())
}

#[derive(Debug, Default)]
pub(crate) struct Breakpoints {
    list: Vec<Breakpoint>,
    change_counter: u64,
}

impl Breakpoints {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn list(&self) -> &[Breakpoint] {
        &self.list
    }

    pub(crate) fn change_counter(&self) -> u64 {
        self.change_counter
    }

    fn position(&self, filename: &Path, line: u32) -> Option<usize> {
        self.list
            .iter()
            .position(|bp| bp.filename == filename && bp.line == line)
    }

    pub(crate) fn add(
        &mut self,
        filename: &Path,
        line: u32,
        condition: Option<&str>,
        program: &Program,
    ) -> Result<(), ScriptError> {
        let filename = normalize_path(filename);
        if self.position(&filename, line).is_some() {
            return Err(ScriptError::BreakpointError {
                description: format!(
                    "there is already a breakpoint at {}:{line}",
                    filename.display()
                ),
            });
        }
        let mut breakpoint = Breakpoint {
            filename,
            line,
            active: true,
            hit_count: 0,
            condition: condition.map(str::to_string),
            ip: None,
        };
        breakpoint.ip = find_ip(program, &breakpoint);
        self.list.push(breakpoint);
        self.change_counter += 1;
        Ok(())
    }

    pub(crate) fn remove(&mut self, filename: &Path, line: u32) -> Result<(), ScriptError> {
        let filename = normalize_path(filename);
        let pos = self
            .position(&filename, line)
            .ok_or_else(|| no_breakpoint(&filename, line))?;
        self.list.remove(pos);
        self.change_counter += 1;
        Ok(())
    }

    // toggle()
    // Switch a breakpoint between active and inactive. Returns the new state.
    pub(crate) fn toggle(&mut self, filename: &Path, line: u32) -> Result<bool, ScriptError> {
        let filename = normalize_path(filename);
        let pos = self
            .position(&filename, line)
            .ok_or_else(|| no_breakpoint(&filename, line))?;
        let breakpoint = &mut self.list[pos];
        breakpoint.active = !breakpoint.active;
        self.change_counter += 1;
        Ok(breakpoint.active)
    }

    // resolve()
    // Bind all breakpoints to the instructions of a newly loaded script
    pub(crate) fn resolve(&mut self, program: &Program) {
        for breakpoint in &mut self.list {
            breakpoint.ip = find_ip(program, breakpoint);
            if breakpoint.ip.is_none() && program.files.lookup(&breakpoint.filename).is_some() {
                log::warn!(
                    "breakpoint at {}:{} is behind the last command of the file",
                    breakpoint.filename.display(),
                    breakpoint.line
                );
            }
        }
        self.change_counter += 1;
    }

    // hit()
    // True if an active breakpoint at `ip` stops the script
    pub(crate) fn hit(
        &mut self,
        program: &Program,
        ip: u32,
        host: &mut dyn ScriptHost,
        stack: &Stack,
    ) -> bool {
        let mut stop = false;
        for breakpoint in &mut self.list {
            if !breakpoint.active || breakpoint.ip != Some(ip) {
                continue;
            }
            let triggered = match &breakpoint.condition {
                None => true,
                Some(condition) => match host.solve_equation(condition, &stack.view(None)) {
                    Ok(value) => value != 0.0,
                    Err(message) => {
                        log::warn!("cannot solve breakpoint condition \"{condition}\": {message}");
                        true
                    }
                },
            };
            if triggered {
                breakpoint.hit_count += 1;
                stop = true;
            }
        }
        if stop {
            self.change_counter += 1;
            if let Some((filename, line)) = program.location(ip) {
                log::debug!("breakpoint hit at {filename}:{line}");
            }
        }
        stop
    }
}

fn no_breakpoint(filename: &Path, line: u32) -> ScriptError {
    ScriptError::BreakpointError {
        description: format!("there is no breakpoint at {}:{line}", filename.display()),
    }
}

fn find_ip(program: &Program, breakpoint: &Breakpoint) -> Option<u32> {
    let file = program.files.lookup(&breakpoint.filename)?;
    let (ip_start, ip_end) = program.file_ip_range(file)?;
    program
        .instructions
        .find_ip(file, breakpoint.line, ip_start, ip_end)
}
