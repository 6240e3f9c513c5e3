use std::path::{Path, PathBuf};

use crate::ScriptError;
use crate::breakpoints::{Breakpoint, Breakpoints};
use crate::commands::{Command, CommandRegistry};
use crate::executor::{Executor, StepMode, TickResult};
use crate::host::{ScriptHost, VariableValue};
use crate::parser;
use crate::program::Program;
use crate::stack::Frame;

/// State of a script, as seen by the scheduler and the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// no script is running
    Stop,
    /// a start was requested, the script is parsed on the next call of `cyclic`
    Start,
    Running,
    /// parsed successfully, but not started
    Ready,
    /// the end of the main script was reached
    Finished,
    Error,
    /// stopped by a breakpoint, a single step or the debugger
    DebugHold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptConfig {
    /// treat parser warnings as errors
    pub strict: bool,
    /// an ATOMIC block that is not closed correctly is an error instead of a warning
    pub strict_atomic: bool,
    /// stop in front of the first command
    pub stop_at_start: bool,
    /// directory for the files of embedded `{ ... }` blocks, the system temp dir by default
    pub temp_dir: Option<PathBuf>,
    /// number of commands after which an ATOMIC block is considered an endless loop
    pub max_atomic_commands: u32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            strict: false,
            strict_atomic: false,
            stop_at_start: false,
            temp_dir: None,
            max_atomic_commands: 10000,
        }
    }
}

/// Where the script currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub filename: String,
    pub line: u32,
    pub ip: u32,
    pub stack_depth: usize,
    pub atomic_depth: u32,
}

/// A script engine instance.
///
/// The script is started with [`Script::start`] (or [`Script::request_start`]) and then driven by
/// calling [`Script::cyclic`] once per scheduler cycle.
#[derive(Debug)]
pub struct Script<H: ScriptHost> {
    host: H,
    config: ScriptConfig,
    registry: CommandRegistry,
    program: Program,
    executor: Executor,
    breakpoints: Breakpoints,
    state: ScriptState,
    requested: Option<PathBuf>,
    last_error: Option<ScriptError>,
    log_msgs: Vec<ScriptError>,
}

impl<H: ScriptHost> Script<H> {
    /// Create an engine with the built-in commands and the default configuration
    pub fn new(host: H) -> Self {
        Self::with_config(host, ScriptConfig::default())
    }

    pub fn with_config(host: H, config: ScriptConfig) -> Self {
        Self {
            host,
            config,
            registry: CommandRegistry::with_builtins(),
            program: Program::new(),
            executor: Executor::new(),
            breakpoints: Breakpoints::new(),
            state: ScriptState::Stop,
            requested: None,
            last_error: None,
            log_msgs: Vec::new(),
        }
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ScriptConfig) {
        self.config = config;
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    /// The error that stopped the last run
    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    /// Warnings of the last parse
    pub fn log_msgs(&self) -> &[ScriptError] {
        &self.log_msgs
    }

    fn is_active(&self) -> bool {
        matches!(self.state, ScriptState::Running | ScriptState::DebugHold)
    }

    fn invalid_state(&self, operation: &'static str) -> ScriptError {
        ScriptError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Add a command. It is not possible to add commands while a script is running.
    pub fn register_command(&mut self, command: Box<dyn Command>) -> Result<bool, ScriptError> {
        if self.is_active() {
            return Err(self.invalid_state("register_command"));
        }
        // the indices of the loaded instructions would no longer match
        self.program.instructions.clear();
        Ok(self.registry.register(command))
    }

    /// Parse a script and every file it uses without running it.
    ///
    /// Structure errors are returned, warnings are collected in [`Script::log_msgs`]. Breakpoints
    /// that were set before are bound to the new instructions.
    pub fn load(&mut self, filename: &Path) -> Result<(), ScriptError> {
        if self.is_active() {
            return Err(self.invalid_state("load"));
        }
        self.log_msgs.clear();
        self.last_error = None;
        match self.parse(filename) {
            Ok(()) => {
                self.state = ScriptState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = ScriptState::Error;
                Err(err)
            }
        }
    }

    fn parse(&mut self, filename: &Path) -> Result<(), ScriptError> {
        self.program.reset()?;
        let main = self.program.files.load_file(filename)?;
        parser::parse(
            &mut self.program,
            &self.registry,
            &self.host,
            &self.config,
            main,
            &mut self.log_msgs,
        )?;
        self.breakpoints.resolve(&self.program);
        log::debug!(
            "{} parsed, {} instructions in {} files",
            filename.display(),
            self.program.instructions.len(),
            self.program.files.len()
        );
        Ok(())
    }

    /// Parse the script and prepare it for execution. The first command runs on the next call
    /// of [`Script::cyclic`].
    pub fn start(&mut self, filename: &Path) -> Result<(), ScriptError> {
        self.load(filename)?;
        self.executor.reset(0, self.config.stop_at_start);
        self.state = ScriptState::Running;
        Ok(())
    }

    /// Start the script on the next call of [`Script::cyclic`]
    pub fn request_start(&mut self, filename: &Path) {
        self.requested = Some(filename.to_path_buf());
        self.state = ScriptState::Start;
    }

    /// Stop a running, held or requested script. A finished or failed script is left alone.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            ScriptState::Running | ScriptState::DebugHold | ScriptState::Start
        ) {
            log::debug!("script stopped at ip {}", self.executor.current_ip);
            self.state = ScriptState::Stop;
        }
    }

    /// Run the script for one scheduler cycle and return the state afterwards.
    ///
    /// Normally one command is executed per cycle. Inside ATOMIC blocks commands run until the end
    /// of the block, waiting commands keep the script at their position until they are done.
    pub fn cyclic(&mut self) -> ScriptState {
        match self.state {
            ScriptState::Start => {
                if let Some(filename) = self.requested.take() {
                    if let Err(err) = self.start(&filename) {
                        log::debug!("script start failed: {err}");
                        self.last_error = Some(err);
                        self.state = ScriptState::Error;
                    }
                } else {
                    self.state = ScriptState::Stop;
                }
            }
            ScriptState::Running => {
                let result = self.executor.tick(
                    &self.program,
                    &self.registry,
                    &mut self.host,
                    &self.config,
                    &mut self.breakpoints,
                );
                match result {
                    Ok(TickResult::Continue) => {}
                    Ok(TickResult::Finished) => {
                        log::debug!("script finished after {} cycles", self.executor.cycle);
                        self.state = ScriptState::Finished;
                    }
                    Ok(TickResult::Hold) => self.state = ScriptState::DebugHold,
                    Err(runtime_error) => {
                        log::debug!("script stopped by error: {runtime_error}");
                        self.last_error = Some(ScriptError::RuntimeError { runtime_error });
                        self.state = ScriptState::Error;
                    }
                }
            }
            _ => {}
        }
        self.state
    }

    /// File, line and instruction of the command that runs next, or that is waiting
    pub fn current_position(&self) -> Option<Position> {
        let ip = self.executor.current_ip;
        let (filename, line) = self.program.location(ip)?;
        Some(Position {
            filename,
            line,
            ip,
            stack_depth: self.executor.stack.len(),
            atomic_depth: self.executor.atomic_depth,
        })
    }

    /// Number of cycles since the script was started
    pub fn cycle_counter(&self) -> u32 {
        self.executor.cycle
    }

    /// Number of stack frames, including the end-of-stack marker
    pub fn stack_depth(&self) -> usize {
        self.executor.stack.len()
    }

    /// The stack, bottom first
    pub fn stack_frames(&self) -> &[Frame] {
        self.executor.stack.frames()
    }

    /// Debugger text of one stack frame, 0 is the bottom of the stack
    pub fn stack_frame_string(&self, pos: usize) -> Option<String> {
        self.executor
            .stack
            .frame_to_string(pos, |proc| self.program.procs.name(proc))
    }

    /// Value of a name as the script sees it: local variables first, then external variables
    pub fn variable_value(&mut self, name: &str) -> Option<f64> {
        self.lookup_variable(name, None)
    }

    /// Value of a name as seen from stack position `frame`. Only the frames below it are
    /// searched, so passing the position of a call frame shows the variables of the caller.
    pub fn variable_value_in_frame(&mut self, name: &str, frame: usize) -> Option<f64> {
        self.lookup_variable(name, Some(frame))
    }

    fn lookup_variable(&mut self, name: &str, from: Option<usize>) -> Option<f64> {
        match self.executor.stack.get_local_variable_value(name, from) {
            Some(VariableValue::Value(value)) => Some(value),
            Some(VariableValue::External(_)) | None => self.host.read_variable(name),
        }
    }

    // evaluate()
    // Watch expressions of the debugger. With a frame, local variables resolve like in
    // variable_value_in_frame().
    pub fn evaluate(&mut self, equation: &str, frame: Option<usize>) -> Result<f64, String> {
        let locals = self.executor.stack.view(frame);
        self.host.solve_equation(equation, &locals)
    }

    /// Names of the defined parameter lists
    pub fn param_lists_string(&self) -> String {
        self.executor.param_lists.describe()
    }

    /// Incremented whenever the stack changes, the debugger view uses it to refresh
    pub fn stack_change_counter(&self) -> u64 {
        self.executor.stack.change_counter()
    }

    pub fn file_change_counter(&self) -> u64 {
        self.program.files.changed_counter()
    }

    pub fn breakpoint_change_counter(&self) -> u64 {
        self.breakpoints.change_counter()
    }

    /// All breakpoints, bound or not
    pub fn breakpoints(&self) -> &[Breakpoint] {
        self.breakpoints.list()
    }

    /// Set a breakpoint on a line. If a condition is given, the breakpoint only stops the script
    /// when the condition evaluates to a non-zero value.
    ///
    /// Breakpoints in files that are not part of the loaded script are kept and bound when a
    /// script using the file is loaded.
    pub fn add_breakpoint(
        &mut self,
        filename: &Path,
        line: u32,
        condition: Option<&str>,
    ) -> Result<(), ScriptError> {
        self.breakpoints
            .add(filename, line, condition, &self.program)
    }

    /// Fails if there is no breakpoint on the line
    pub fn remove_breakpoint(&mut self, filename: &Path, line: u32) -> Result<(), ScriptError> {
        self.breakpoints.remove(filename, line)
    }

    /// Activate or deactivate a breakpoint; returns true if it is active afterwards
    pub fn toggle_breakpoint(&mut self, filename: &Path, line: u32) -> Result<bool, ScriptError> {
        self.breakpoints.toggle(filename, line)
    }

    /// Hold the running script at the next cycle boundary
    pub fn debug_stop(&mut self) -> Result<(), ScriptError> {
        if self.state != ScriptState::Running {
            return Err(self.invalid_state("debug_stop"));
        }
        self.state = ScriptState::DebugHold;
        Ok(())
    }

    fn resume(&mut self, operation: &'static str, step: StepMode) -> Result<(), ScriptError> {
        if self.state != ScriptState::DebugHold {
            return Err(self.invalid_state(operation));
        }
        self.executor.step = step;
        self.state = ScriptState::Running;
        Ok(())
    }

    // step_mode()
    // A waiting command is finished before the step, it does not count as the first command
    fn step_mode(&self, target: Option<u32>) -> StepMode {
        StepMode::Step {
            skip_first: !self.executor.is_waiting(),
            target,
        }
    }

    /// Resume a held script until the next breakpoint
    pub fn debug_continue(&mut self) -> Result<(), ScriptError> {
        let step = if self.executor.is_waiting() {
            StepMode::Run
        } else {
            StepMode::IgnoreOnce
        };
        self.resume("debug_continue", step)
    }

    /// Execute one command, stopping at the first command of a called procedure or file
    pub fn debug_step_into(&mut self) -> Result<(), ScriptError> {
        self.resume("debug_step_into", self.step_mode(None))
    }

    /// Execute one command. Calls of procedures, subroutines and files are executed completely.
    pub fn debug_step_over(&mut self) -> Result<(), ScriptError> {
        let ip = self.executor.current_ip;
        let call_like = self
            .program
            .instructions
            .get(ip)
            .is_some_and(|instruction| self.registry.descriptor(instruction.cmd).call_like);
        let target = call_like.then_some(ip + 1);
        self.resume("debug_step_over", self.step_mode(target))
    }

    /// Run until the innermost procedure, subroutine or file returns. Outside of any call this is
    /// the same as [`Script::debug_step_over`].
    pub fn debug_step_out(&mut self) -> Result<(), ScriptError> {
        match self.executor.stack.first_return_ip() {
            Some(ret_ip) => self.resume("debug_step_out", self.step_mode(Some(ret_ip))),
            None => self.debug_step_over(),
        }
    }

    /// Run until the command on `line` of `filename` is reached
    pub fn debug_run_to(&mut self, filename: &Path, line: u32) -> Result<(), ScriptError> {
        let canonical = filename
            .canonicalize()
            .unwrap_or_else(|_| filename.to_path_buf());
        let target = self
            .program
            .files
            .lookup(&canonical)
            .and_then(|file| {
                let (ip_start, ip_end) = self.program.file_ip_range(file)?;
                self.program
                    .instructions
                    .find_ip(file, line, ip_start, ip_end)
            })
            .ok_or_else(|| ScriptError::BreakpointError {
                description: format!("there is no command at {}:{line}", filename.display()),
            })?;
        self.resume("debug_run_to", self.step_mode(Some(target)))
    }
}
