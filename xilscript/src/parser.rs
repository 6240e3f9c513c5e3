use thiserror::Error;

use crate::ScriptError;
use crate::cmdtable::Instruction;
use crate::commands::{CheckContext, CommandRegistry};
use crate::compiler::{Compiler, StructureError};
use crate::filecache::Cursor;
use crate::filestack::{FileStack, ReturnPosition, ToParseQueue};
use crate::host::ScriptHost;
use crate::labels::Label;
use crate::proc::MAIN_PROC;
use crate::program::Program;
use crate::script::ScriptConfig;
use crate::tokenizer::{TokenizedCommand, TokenizerEnv, parse_next_command};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParserError {
    #[error("{filename}:{line}: {structure_error}")]
    Structure {
        filename: String,
        line: u32,
        structure_error: StructureError,
    },

    #[error("{filename}:{line}: {command}: {description}")]
    CommandSyntax {
        filename: String,
        line: u32,
        command: String,
        description: String,
    },

    #[error(
        "{filename}:{line}: command {command} is not allowed inside an ATOMIC block (ATOMIC started at line {atomic_line})"
    )]
    NotAllowedInAtomic {
        filename: String,
        line: u32,
        command: String,
        atomic_line: u32,
    },

    #[error("{filename}:{line}: label \"{label}\" is already defined in line {first_line}")]
    DuplicateLabel {
        filename: String,
        line: u32,
        label: String,
        first_line: u32,
    },

    #[error("{filename}:{line}: cannot find label \"{label}\"")]
    UnknownLabel {
        filename: String,
        line: u32,
        label: String,
    },

    #[error("{filename}:{line}: call unknown Proc \"{name}\"")]
    UnknownProc {
        filename: String,
        line: u32,
        name: String,
    },

    #[error("{filename}:{line}: Proc \"{name}\" is already defined in {first_filename}:{first_line}")]
    DuplicateProc {
        filename: String,
        line: u32,
        name: String,
        first_filename: String,
        first_line: u32,
    },

    #[error("{filename}:{line}: DEF_PROC \"{name}\" inside of another DEF_PROC")]
    NestedProc {
        filename: String,
        line: u32,
        name: String,
    },

    #[error("{filename}:{line}: wrong parameter count {count} (expecting {expected}) in proc \"{name}\"")]
    ProcParamCount {
        filename: String,
        line: u32,
        name: String,
        count: usize,
        expected: usize,
    },

    #[error(
        "{filename}:{line}: parameter {position} of proc \"{name}\" {}",
        param_kind(.by_ref)
    )]
    ProcParamKind {
        filename: String,
        line: u32,
        name: String,
        position: usize,
        by_ref: bool,
    },

    #[error("{filename}:{line}: cannot open file \"{name}\"")]
    FileNotFound {
        filename: String,
        line: u32,
        name: String,
    },

    #[error(
        "{filename}:{line}: the parameter \"{text}\" contains environment variables that cannot be resolved"
    )]
    UnresolvedEnvVar {
        filename: String,
        line: u32,
        text: String,
    },
}

fn param_kind(by_ref: &bool) -> &'static str {
    if *by_ref {
        "is a reference and must be passed with '&'"
    } else {
        "is a value and cannot be passed with '&'"
    }
}

/// Parser position and the block structure of the file that is parsed
#[derive(Debug)]
pub(crate) struct ParseState {
    pub(crate) compiler: Compiler,
    pub(crate) file: usize,
    /// read position behind the current command
    pub(crate) pos: (usize, u32),
    pub(crate) using_mode: bool,
    pub(crate) current_proc: usize,
    pub(crate) file_stack: FileStack,
    pub(crate) queue: ToParseQueue,
    /// opt and reserved of the instruction that is checked
    pub(crate) opt: u32,
    pub(crate) reserved: u32,
}

impl ParseState {
    fn new(strict_atomic: bool, file: usize) -> Self {
        Self {
            compiler: Compiler::new(strict_atomic),
            file,
            pos: (0, 1),
            using_mode: false,
            current_proc: MAIN_PROC,
            file_stack: FileStack::new(),
            queue: ToParseQueue::new(),
            opt: 0,
            reserved: 0,
        }
    }

    // switch_to_file()
    // Continue parsing at the start of another file
    pub(crate) fn switch_to_file(&mut self, file: usize, using_mode: bool) {
        self.file = file;
        self.pos = (0, 1);
        self.using_mode = using_mode;
    }
}

pub(crate) fn log_warning(log_msgs: &mut Vec<ScriptError>, parser_error: ParserError) {
    log::warn!("{parser_error}");
    log_msgs.push(ScriptError::ParserError { parser_error });
}

pub(crate) fn error_or_log(
    strict: bool,
    log_msgs: &mut Vec<ScriptError>,
    err: ParserError,
) -> Result<(), ParserError> {
    if strict {
        Err(err)
    } else {
        log_warning(log_msgs, err);
        Ok(())
    }
}

// parse()
// Parse the main file and every file it refers to with USING, RUN or CALL.
// Files are appended to the instruction table in the order they were first referenced.
// Parsing stops at the first error.
pub(crate) fn parse(
    program: &mut Program,
    registry: &CommandRegistry,
    host: &dyn ScriptHost,
    config: &ScriptConfig,
    main_file: usize,
    log_msgs: &mut Vec<ScriptError>,
) -> Result<(), ScriptError> {
    let mut state = ParseState::new(config.strict_atomic, main_file);
    start_full_parse(program, main_file);

    loop {
        let filename = program.filename(state.file);
        let token = read_command(program, registry, host, &mut state, &filename)?;
        let using_mode = state.using_mode;
        let file = state.file;
        let descriptor = registry.descriptor(token.cmd);

        if !using_mode {
            register_labels(program, &state, &token, &filename)?;
            if !descriptor.inside_atomic_allowed {
                if let Some(atomic_line) = state.compiler.atomic_line() {
                    return Err(ParserError::NotAllowedInAtomic {
                        filename,
                        line: token.line,
                        command: descriptor.name.to_string(),
                        atomic_line,
                    }
                    .into());
                }
            }
        }

        state.opt = 0;
        state.reserved = 0;
        if !using_mode || descriptor.using_pass {
            if let Some(command) = registry.get(token.cmd) {
                let mut ctx = CheckContext {
                    program: &mut *program,
                    state: &mut state,
                    token: &token,
                    registry,
                    config,
                    log_msgs: &mut *log_msgs,
                };
                command.syntax_check(&mut ctx)?;
            }
        }
        take_structure_warnings(&mut state, config, log_msgs, &filename, token.line)?;

        if !using_mode {
            program.instructions.push(Instruction {
                cmd: token.cmd,
                file,
                offset: token.offset,
                line: token.line,
                opt: state.opt,
                reserved: state.reserved,
            });
        }

        if token.cmd == registry.eof() {
            if using_mode {
                end_of_using_file(&mut state);
            } else if !end_of_file(program, &mut state, config, log_msgs, &filename, token.line)? {
                return Ok(());
            }
        }
    }
}

fn read_command(
    program: &Program,
    registry: &CommandRegistry,
    host: &dyn ScriptHost,
    state: &mut ParseState,
    filename: &str,
) -> Result<TokenizedCommand, ScriptError> {
    let data = program
        .files
        .get(state.file)
        .map_or(&[][..], |cached| cached.data.as_slice());
    let mut cursor = Cursor::at(data, state.pos.0, state.pos.1);
    let env = TokenizerEnv {
        registry,
        host,
        param_lists: None,
        temp_dir: None,
        filename,
    };
    let token = parse_next_command(&mut cursor, &env)?;
    state.pos = cursor.tell();
    Ok(token)
}

// register_labels()
// Labels in front of a command point to its instruction
fn register_labels(
    program: &mut Program,
    state: &ParseState,
    token: &TokenizedCommand,
    filename: &str,
) -> Result<(), ParserError> {
    let ip = program.instructions.next_ip();
    let atomic_depth = state.compiler.atomic_depth();
    let Some(proc) = program.procs.get_mut(state.current_proc) else {
        return Ok(());
    };
    for label in &token.labels {
        let entry = Label {
            name: label.name.clone(),
            file: state.file,
            line: label.line,
            ip,
            scope: proc.scopes.current(),
            atomic_depth,
        };
        if let Err(existing) = proc.labels.add_label(entry) {
            return Err(ParserError::DuplicateLabel {
                filename: filename.to_string(),
                line: label.line,
                label: label.name.clone(),
                first_line: existing.line,
            });
        }
    }
    Ok(())
}

fn take_structure_warnings(
    state: &mut ParseState,
    config: &ScriptConfig,
    log_msgs: &mut Vec<ScriptError>,
    filename: &str,
    line: u32,
) -> Result<(), ParserError> {
    for structure_error in state.compiler.take_warnings() {
        let warning = ParserError::Structure {
            filename: filename.to_string(),
            line,
            structure_error,
        };
        error_or_log(config.strict, log_msgs, warning)?;
    }
    Ok(())
}

fn start_full_parse(program: &mut Program, file: usize) {
    let ip_start = program.instructions.next_ip();
    if let Some(cached) = program.files.get_mut(file) {
        cached.ip_start = ip_start;
        cached.parsed = true;
    }
    log::debug!(
        "parsing {} starting at ip {ip_start}",
        program.files.filename(file)
    );
}

// end_of_using_file()
// The declarations are collected, parsing continues behind the USING command
fn end_of_using_file(state: &mut ParseState) {
    if let Some(ReturnPosition {
        file,
        offset,
        line,
        using_mode,
    }) = state.file_stack.pop()
    {
        state.file = file;
        state.pos = (offset, line);
        state.using_mode = using_mode;
    }
}

// end_of_file()
// Finish the file that was parsed completely and continue with the next queued file.
// Returns false when there is nothing left to parse.
fn end_of_file(
    program: &mut Program,
    state: &mut ParseState,
    config: &ScriptConfig,
    log_msgs: &mut Vec<ScriptError>,
    filename: &str,
    line: u32,
) -> Result<bool, ScriptError> {
    if let Err(structure_error) = state.compiler.end_of_file() {
        return Err(ParserError::Structure {
            filename: filename.to_string(),
            line,
            structure_error,
        }
        .into());
    }
    take_structure_warnings(state, config, log_msgs, filename, line)?;

    if let Some(main) = program.procs.get_mut(MAIN_PROC) {
        if let Err(goto) = main.labels.resolve_gotos(Some(state.file)) {
            return Err(ParserError::UnknownLabel {
                filename: program.files.filename(goto.file),
                line: goto.line,
                label: goto.name,
            }
            .into());
        }
    }

    let ip_end = program.instructions.next_ip().saturating_sub(1);
    if let Some(cached) = program.files.get_mut(state.file) {
        cached.ip_end = ip_end;
    }

    let Some(next) = state.queue.next_file() else {
        return Ok(false);
    };
    start_full_parse(program, next.file);
    let ip_start = program.instructions.next_ip();
    for run_site in next.run_sites {
        program.instructions.set_opt(run_site, ip_start);
    }
    state.compiler.reset();
    state.current_proc = MAIN_PROC;
    state.switch_to_file(next.file, false);
    Ok(true)
}
