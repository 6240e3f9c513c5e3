use std::path::Path;

use crate::ScriptError;
use crate::cmdtable::Instruction;
use crate::compiler::StructureError;
use crate::executor::{Executor, RuntimeError};
use crate::host::ScriptHost;
use crate::parser::{self, ParseState, ParserError};
use crate::program::Program;
use crate::script::ScriptConfig;
use crate::stack::StackError;
use crate::tokenizer::{Param, TokenizedCommand};

mod files;
mod flow;
mod locals;
mod output;
mod paramlists;
mod procs;
mod waits;

/// Progress of the command that is currently executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmdState {
    /// the command has not been executed yet
    #[default]
    NotStarted,
    /// `wait` must be called again after the given number of cycles
    AwaitingCycles(u32),
    Done,
}

/// How the text between the brackets of a command is split into parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawMode {
    None,
    /// everything up to the last `)` of the line is one verbatim parameter
    WholeLine,
    /// everything up to the first `,` is the first parameter, the rest is parsed normally
    FirstParam,
}

/// Static properties of a command
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub min_params: usize,
    pub max_params: usize,
    pub raw: RawMode,
    /// accepts a `{ ... }` block behind the parameters
    pub embedded_file: bool,
    pub inside_atomic_allowed: bool,
    /// checked while a file is only scanned for procedure declarations
    pub using_pass: bool,
    /// maximum number of cycles the command may wait
    pub timeout: Option<u32>,
    /// enters a procedure or file; step over continues behind it
    pub call_like: bool,
    /// the first parameter is written in front of the brackets: `NAME name(params)`
    pub named: bool,
}

impl CommandDescriptor {
    pub const fn new(name: &'static str, min_params: usize, max_params: usize) -> Self {
        Self {
            name,
            min_params,
            max_params,
            raw: RawMode::None,
            embedded_file: false,
            inside_atomic_allowed: true,
            using_pass: false,
            timeout: None,
            call_like: false,
            named: false,
        }
    }

    pub const fn raw(mut self, raw: RawMode) -> Self {
        self.raw = raw;
        self
    }

    pub const fn embedded_file(mut self) -> Self {
        self.embedded_file = true;
        self
    }

    pub const fn not_inside_atomic(mut self) -> Self {
        self.inside_atomic_allowed = false;
        self
    }

    pub const fn using_pass(mut self) -> Self {
        self.using_pass = true;
        self
    }

    pub const fn timeout(mut self, cycles: u32) -> Self {
        self.timeout = Some(cycles);
        self
    }

    pub const fn call_like(mut self) -> Self {
        self.call_like = true;
        self
    }

    pub const fn named(mut self) -> Self {
        self.named = true;
        self
    }
}

/// A script command.
///
/// `syntax_check` runs once while the script is parsed, `execute` runs every time the command is
/// reached. If `execute` returns [`CmdState::AwaitingCycles`] the executor calls `wait` after
/// that many cycles until it reports [`CmdState::Done`].
pub trait Command {
    fn descriptor(&self) -> &CommandDescriptor;

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let _ = ctx;
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError>;

    fn wait(&self, ctx: &mut ExecContext, elapsed: u32) -> Result<CmdState, RuntimeError> {
        let _ = (ctx, elapsed);
        Ok(CmdState::Done)
    }
}

/// All known commands, sorted by name.
///
/// The registry is indexed by the first character of the name; a lookup only compares the names
/// of one bucket.
pub struct CommandRegistry {
    commands: Vec<Box<dyn Command>>,
    buckets: [usize; 257],
    eof: usize,
    set: usize,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.commands.iter().map(|cmd| cmd.descriptor().name))
            .finish()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            commands: Vec::new(),
            buckets: [0; 257],
            eof: 0,
            set: 0,
        };
        registry.commands.extend(files::commands());
        registry.commands.extend(flow::commands());
        registry.commands.extend(locals::commands());
        registry.commands.extend(output::commands());
        registry.commands.extend(paramlists::commands());
        registry.commands.extend(procs::commands());
        registry.commands.extend(waits::commands());
        registry.rebuild_index();
        registry
    }

    /// Add a command. Returns false if a command with the same name exists already.
    ///
    /// Command indices change, so commands must not be registered while a script is loaded.
    pub fn register(&mut self, command: Box<dyn Command>) -> bool {
        if self.lookup(command.descriptor().name).is_some() {
            return false;
        }
        self.commands.push(command);
        self.rebuild_index();
        true
    }

    fn rebuild_index(&mut self) {
        self.commands
            .sort_by(|a, b| a.descriptor().name.cmp(b.descriptor().name));
        for (c, bucket) in self.buckets.iter_mut().enumerate() {
            *bucket = self
                .commands
                .partition_point(|cmd| usize::from(first_byte(cmd.descriptor().name)) < c);
        }
        self.eof = self.lookup("EOF").unwrap_or(0);
        self.set = self.lookup("SET").unwrap_or(0);
    }

    /// Find a command by its exact name
    pub fn lookup(&self, name: &str) -> Option<usize> {
        let c = usize::from(first_byte(name));
        let range = self.buckets[c]..self.buckets[c + 1];
        range
            .into_iter()
            .find(|idx| self.commands[*idx].descriptor().name == name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&dyn Command> {
        self.commands.get(idx).map(Box::as_ref)
    }

    pub(crate) fn name(&self, idx: usize) -> &str {
        self.commands
            .get(idx)
            .map_or("", |cmd| cmd.descriptor().name)
    }

    pub(crate) fn descriptor(&self, idx: usize) -> &CommandDescriptor {
        // indices always come from lookup(), EOF exists in every registry
        match self.commands.get(idx) {
            Some(cmd) => cmd.descriptor(),
            None => &files::EOF_DESCRIPTOR,
        }
    }

    pub(crate) fn eof(&self) -> usize {
        self.eof
    }

    /// The command behind the assignment short form `name = equation`
    pub(crate) fn set_command(&self) -> usize {
        self.set
    }
}

fn first_byte(name: &str) -> u8 {
    name.as_bytes().first().copied().unwrap_or(0)
}

/// Everything a command can look at and change while it is syntax checked
pub struct CheckContext<'a> {
    pub(crate) program: &'a mut Program,
    pub(crate) state: &'a mut ParseState,
    pub(crate) token: &'a TokenizedCommand,
    pub(crate) registry: &'a CommandRegistry,
    pub(crate) config: &'a ScriptConfig,
    pub(crate) log_msgs: &'a mut Vec<ScriptError>,
}

impl CheckContext<'_> {
    pub fn param(&self, idx: usize) -> &str {
        self.token.param(idx)
    }

    pub fn param_count(&self) -> usize {
        self.token.param_count()
    }

    pub fn line(&self) -> u32 {
        self.token.line
    }

    pub fn filename(&self) -> String {
        self.program.files.filename(self.state.file)
    }

    /// A syntax error of the current command
    pub fn error(&self, description: impl Into<String>) -> ParserError {
        ParserError::CommandSyntax {
            filename: self.filename(),
            line: self.token.line,
            command: self.registry.name(self.token.cmd).to_string(),
            description: description.into(),
        }
    }

    /// Record a warning, or fail if warnings are treated as errors
    pub fn error_or_log(&mut self, err: ParserError) -> Result<(), ParserError> {
        parser::error_or_log(self.config.strict, self.log_msgs, err)
    }

    pub(crate) fn structure_error(&self, structure_error: StructureError) -> ParserError {
        ParserError::Structure {
            filename: self.filename(),
            line: self.token.line,
            structure_error,
        }
    }

    pub(crate) fn raw_param(&self, idx: usize) -> Option<&Param> {
        self.token.params.get(idx)
    }

    /// Only `DEF_PROC` declarations are collected from files that are opened by `USING`
    pub(crate) fn using_mode(&self) -> bool {
        self.state.using_mode
    }

    /// The ip of the command that is checked
    pub(crate) fn ip(&self) -> u32 {
        self.program.instructions.next_ip()
    }

    pub(crate) fn set_opt(&mut self, opt: u32) {
        self.state.opt = opt;
    }

    pub(crate) fn set_reserved(&mut self, reserved: u32) {
        self.state.reserved = reserved;
    }

    // patch()
    // Change the opt or reserved value of an earlier instruction
    pub(crate) fn patch(&mut self, ip: u32, opt: Option<u32>, reserved: Option<u32>) {
        if let Some(opt) = opt {
            self.program.instructions.set_opt(ip, opt);
        }
        if let Some(reserved) = reserved {
            self.program.instructions.set_reserved(ip, reserved);
        }
    }
}

/// Everything a command can look at and change while it is executed
pub struct ExecContext<'a> {
    pub(crate) program: &'a Program,
    pub(crate) exec: &'a mut Executor,
    pub(crate) host: &'a mut dyn ScriptHost,
    pub(crate) token: &'a TokenizedCommand,
    pub(crate) registry: &'a CommandRegistry,
    pub(crate) config: &'a ScriptConfig,
    pub(crate) ip: u32,
    /// the command was reached through the false branch of an IF or ELSEIF
    pub(crate) branch_entry: bool,
}

impl<'a> ExecContext<'a> {
    pub fn param(&self, idx: usize) -> &str {
        self.token.param(idx)
    }

    pub fn param_count(&self) -> usize {
        self.token.param_count()
    }

    pub fn line(&self) -> u32 {
        self.token.line
    }

    pub fn filename(&self) -> String {
        self.instruction()
            .map(|instruction| self.program.files.filename(instruction.file))
            .unwrap_or_default()
    }

    pub fn host(&mut self) -> &mut dyn ScriptHost {
        &mut *self.host
    }

    /// Number of ticks since the script was started
    pub fn cycle(&self) -> u32 {
        self.exec.cycle
    }

    /// Scratch value that lives from `execute` to the last `wait` of a command
    pub fn data(&self) -> u64 {
        self.exec.cmd_data
    }

    pub fn set_data(&mut self, data: u64) {
        self.exec.cmd_data = data;
    }

    /// Path of the temporary file written from the `{ ... }` block of the command
    pub fn embedded_file(&self) -> Option<&Path> {
        self.token.embedded_file.as_deref()
    }

    /// A runtime error of the current command
    pub fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::CommandFailed {
            filename: self.filename(),
            line: self.token.line,
            command: self.registry.name(self.token.cmd).to_string(),
            message: message.into(),
        }
    }

    /// Solve an equation, local variables are visible to the solver
    pub fn solve_equation(&mut self, equation: &str) -> Result<f64, RuntimeError> {
        let view = self.exec.stack.view(None);
        match self.host.solve_equation(equation, &view) {
            Ok(value) => Ok(value),
            Err(message) => Err(self.error(format!("cannot solve \"{equation}\": {message}"))),
        }
    }

    /// Solve the parameter `idx`
    pub fn solve(&mut self, idx: usize) -> Result<f64, RuntimeError> {
        let equation = self.token.param(idx).to_string();
        self.solve_equation(&equation)
    }

    pub(crate) fn instruction(&self) -> Option<&'a Instruction> {
        self.program.instructions.get(self.ip)
    }

    pub(crate) fn opt(&self) -> u32 {
        self.instruction().map_or(0, |instruction| instruction.opt)
    }

    pub(crate) fn reserved(&self) -> u32 {
        self.instruction().map_or(0, |instruction| instruction.reserved)
    }

    pub(crate) fn jump(&mut self, ip: u32) {
        self.exec.next_ip = ip;
    }

    pub(crate) fn stack_error(&self, stack_error: StackError) -> RuntimeError {
        RuntimeError::StackError {
            filename: self.filename(),
            line: self.token.line,
            stack_error,
        }
    }

    // nested()
    // A context for another instruction, used to run the DEF_LOCALS of scopes entered by a jump
    pub(crate) fn nested<'b>(
        &'b mut self,
        ip: u32,
        token: &'b TokenizedCommand,
    ) -> ExecContext<'b> {
        ExecContext {
            program: self.program,
            exec: &mut *self.exec,
            host: &mut *self.host,
            token,
            registry: self.registry,
            config: self.config,
            ip,
            branch_entry: false,
        }
    }

    pub(crate) fn tokenize_ip(&self, ip: u32) -> Result<TokenizedCommand, RuntimeError> {
        crate::executor::tokenize_instruction(
            self.program,
            self.registry,
            &*self.host,
            &self.exec.param_lists,
            self.config,
            ip,
        )
    }
}

// to_count()
// Cycle counts and timeouts are solved as float values
pub(crate) fn to_count(ctx: &ExecContext, value: f64) -> Result<u32, RuntimeError> {
    use num_traits::ToPrimitive;
    if value <= 0.0 {
        return Ok(0);
    }
    value
        .round()
        .to_u32()
        .ok_or_else(|| ctx.error(format!("{value} is not a valid number of cycles")))
}
