use thiserror::Error;

use crate::breakpoints::Breakpoints;
use crate::commands::{CmdState, CommandRegistry, ExecContext};
use crate::filecache::Cursor;
use crate::host::ScriptHost;
use crate::paramlist::ParamLists;
use crate::proc::MAIN_PROC;
use crate::program::Program;
use crate::script::ScriptConfig;
use crate::stack::{Stack, StackError};
use crate::tokenizer::{TokenizedCommand, TokenizerEnv, TokenizerError, parse_next_command};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("{filename}:{line}: {command}: {message}")]
    CommandFailed {
        filename: String,
        line: u32,
        command: String,
        message: String,
    },

    #[error("{filename}:{line}: {stack_error}")]
    StackError {
        filename: String,
        line: u32,
        stack_error: StackError,
    },

    #[error("{filename}:{line}: Timeout reached at current command {command}")]
    Timeout {
        filename: String,
        line: u32,
        command: String,
    },

    #[error("instruction pointer {ip} is outside of the script")]
    InvalidIp { ip: u32 },

    #[error("{tokenizer_error}")]
    TokenizerError { tokenizer_error: TokenizerError },

    #[error("{filename}:{line}: more than {limit} commands were executed inside of an ATOMIC block")]
    AtomicLimit {
        filename: String,
        line: u32,
        limit: u32,
    },
}

/// How the executor treats breakpoints and single steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepMode {
    /// stop at active breakpoints
    Run,
    /// continue from a breakpoint without stopping at it again
    IgnoreOnce,
    /// execute the current command, then stop at the next one or at `target`
    Step {
        skip_first: bool,
        target: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickResult {
    Continue,
    Finished,
    /// stopped in front of the instruction at `current_ip`
    Hold,
}

/// A command that returned `AwaitingCycles`
#[derive(Debug)]
struct Waiting {
    cmd: usize,
    ip: u32,
    remaining: u32,
    start_cycle: u32,
    token: TokenizedCommand,
}

#[derive(Debug)]
pub(crate) struct Executor {
    pub(crate) stack: Stack,
    pub(crate) current_ip: u32,
    pub(crate) next_ip: u32,
    pub(crate) atomic_depth: u32,
    pub(crate) cycle: u32,
    pub(crate) cmd_state: CmdState,
    pub(crate) cmd_data: u64,
    pub(crate) step: StepMode,
    pub(crate) branch_entry: bool,
    pub(crate) current_proc: usize,
    pub(crate) param_lists: ParamLists,
    pub(crate) end_reached: bool,
    waiting: Option<Waiting>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub(crate) fn new() -> Self {
        Self {
            stack: Stack::new(),
            current_ip: 0,
            next_ip: 0,
            atomic_depth: 0,
            cycle: 0,
            cmd_state: CmdState::NotStarted,
            cmd_data: 0,
            step: StepMode::Run,
            branch_entry: false,
            current_proc: MAIN_PROC,
            param_lists: ParamLists::new(),
            end_reached: false,
            waiting: None,
        }
    }

    // reset()
    // Prepare a new run that starts at `ip`
    pub(crate) fn reset(&mut self, ip: u32, stop_at_start: bool) {
        self.stack.reset();
        self.current_ip = ip;
        self.next_ip = ip;
        self.atomic_depth = 0;
        self.cycle = 0;
        self.cmd_state = CmdState::NotStarted;
        self.cmd_data = 0;
        self.step = if stop_at_start {
            StepMode::Step {
                skip_first: false,
                target: None,
            }
        } else {
            StepMode::Run
        };
        self.branch_entry = false;
        self.current_proc = MAIN_PROC;
        self.param_lists.clear();
        self.end_reached = false;
        self.waiting = None;
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.waiting.is_some()
    }

    // tick()
    // One scheduler cycle: poll a waiting command, then execute commands until one of them
    // waits, the atomic region ends or the script stops.
    pub(crate) fn tick(
        &mut self,
        program: &Program,
        registry: &CommandRegistry,
        host: &mut dyn ScriptHost,
        config: &ScriptConfig,
        breakpoints: &mut Breakpoints,
    ) -> Result<TickResult, RuntimeError> {
        self.cycle = self.cycle.wrapping_add(1);

        if let Some(waiting) = &mut self.waiting {
            if waiting.remaining > 1 {
                waiting.remaining -= 1;
                return Ok(TickResult::Continue);
            }
            if !self.poll_waiting(program, registry, host, config)? {
                return Ok(TickResult::Continue);
            }
        }

        let mut executed = 0u32;
        loop {
            if self.end_reached {
                return Ok(TickResult::Finished);
            }
            if self.should_hold(program, host, breakpoints) {
                return Ok(TickResult::Hold);
            }
            self.execute_one(program, registry, host, config)?;
            executed += 1;
            if self.end_reached {
                return Ok(TickResult::Finished);
            }
            if self.waiting.is_some() || self.atomic_depth == 0 {
                return Ok(TickResult::Continue);
            }
            if executed >= config.max_atomic_commands {
                let (filename, line) = program.location(self.current_ip).unwrap_or_default();
                return Err(RuntimeError::AtomicLimit {
                    filename,
                    line,
                    limit: config.max_atomic_commands,
                });
            }
        }
    }

    // poll_waiting()
    // Call wait() of the waiting command. Returns true once the command is done.
    fn poll_waiting(
        &mut self,
        program: &Program,
        registry: &CommandRegistry,
        host: &mut dyn ScriptHost,
        config: &ScriptConfig,
    ) -> Result<bool, RuntimeError> {
        let Some(mut waiting) = self.waiting.take() else {
            return Ok(true);
        };
        let Some(command) = registry.get(waiting.cmd) else {
            return Err(RuntimeError::InvalidIp { ip: waiting.ip });
        };
        let elapsed = self.cycle.wrapping_sub(waiting.start_cycle);
        if let Some(timeout) = command.descriptor().timeout {
            if elapsed > timeout {
                let (filename, line) = program.location(waiting.ip).unwrap_or_default();
                return Err(RuntimeError::Timeout {
                    filename,
                    line,
                    command: command.descriptor().name.to_string(),
                });
            }
        }

        let state = {
            let mut ctx = ExecContext {
                program,
                exec: self,
                host,
                token: &waiting.token,
                registry,
                config,
                ip: waiting.ip,
                branch_entry: false,
            };
            command.wait(&mut ctx, elapsed)?
        };
        if let CmdState::AwaitingCycles(cycles) = state {
            waiting.remaining = cycles.max(1);
            self.cmd_state = state;
            self.waiting = Some(waiting);
            return Ok(false);
        }
        self.cmd_state = CmdState::Done;
        self.current_ip = self.next_ip;
        Ok(true)
    }

    fn execute_one(
        &mut self,
        program: &Program,
        registry: &CommandRegistry,
        host: &mut dyn ScriptHost,
        config: &ScriptConfig,
    ) -> Result<(), RuntimeError> {
        let ip = self.current_ip;
        let token = tokenize_instruction(program, registry, &*host, &self.param_lists, config, ip)?;
        let Some(command) = registry.get(token.cmd) else {
            return Err(RuntimeError::InvalidIp { ip });
        };
        log::trace!(
            "cycle {} ip {ip} line {}: {}",
            self.cycle,
            token.line,
            command.descriptor().name
        );

        self.next_ip = ip.saturating_add(1);
        self.cmd_data = 0;
        self.cmd_state = CmdState::NotStarted;
        let branch_entry = std::mem::take(&mut self.branch_entry);
        let start_cycle = self.cycle;
        let state = {
            let mut ctx = ExecContext {
                program,
                exec: self,
                host,
                token: &token,
                registry,
                config,
                ip,
                branch_entry,
            };
            command.execute(&mut ctx)?
        };
        if let CmdState::AwaitingCycles(cycles) = state {
            self.cmd_state = state;
            self.waiting = Some(Waiting {
                cmd: token.cmd,
                ip,
                remaining: cycles.max(1),
                start_cycle,
                token,
            });
        } else {
            self.cmd_state = CmdState::Done;
            self.current_ip = self.next_ip;
        }
        Ok(())
    }

    // should_hold()
    // Decide whether the debugger stops in front of the current instruction
    fn should_hold(
        &mut self,
        program: &Program,
        host: &mut dyn ScriptHost,
        breakpoints: &mut Breakpoints,
    ) -> bool {
        let ip = self.current_ip;
        match self.step {
            StepMode::IgnoreOnce => {
                self.step = StepMode::Run;
                false
            }
            StepMode::Run => breakpoints.hit(program, ip, host, &self.stack),
            StepMode::Step {
                skip_first: true,
                target,
            } => {
                self.step = StepMode::Step {
                    skip_first: false,
                    target,
                };
                false
            }
            StepMode::Step {
                skip_first: false,
                target: None,
            } => true,
            StepMode::Step {
                skip_first: false,
                target: Some(target),
            } => ip == target || breakpoints.hit(program, ip, host, &self.stack),
        }
    }
}

// tokenize_instruction()
// Instructions only store the position of their command. The parameters are read again every
// time, with the current parameter lists and environment.
pub(crate) fn tokenize_instruction(
    program: &Program,
    registry: &CommandRegistry,
    host: &dyn ScriptHost,
    param_lists: &ParamLists,
    config: &ScriptConfig,
    ip: u32,
) -> Result<TokenizedCommand, RuntimeError> {
    let instruction = program
        .instructions
        .get(ip)
        .ok_or(RuntimeError::InvalidIp { ip })?;
    let cached = program
        .files
        .get(instruction.file)
        .ok_or(RuntimeError::InvalidIp { ip })?;
    let filename = program.filename(instruction.file);
    let mut cursor = Cursor::at(&cached.data, instruction.offset, instruction.line);
    let env = TokenizerEnv {
        registry,
        host,
        param_lists: Some(param_lists),
        temp_dir: config.temp_dir.as_deref(),
        filename: &filename,
    };
    parse_next_command(&mut cursor, &env)
        .map_err(|tokenizer_error| RuntimeError::TokenizerError { tokenizer_error })
}
