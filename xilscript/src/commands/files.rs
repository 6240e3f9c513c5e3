use std::path::Path;

use super::{CheckContext, CmdState, Command, CommandDescriptor, ExecContext};
use crate::executor::RuntimeError;
use crate::filestack::ReturnPosition;
use crate::loader::make_script_filename;
use crate::parser::ParserError;
use crate::proc::MAIN_PROC;

/// The end of every script file is an `EOF` instruction
pub(super) static EOF_DESCRIPTOR: CommandDescriptor = CommandDescriptor::new("EOF", 0, 0);

// RUN and CALL targets that contain unresolved environment variables are looked up at runtime
const UNRESOLVED_FILE: u32 = u32::MAX;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(EofCmd),
        Box::new(UsingCmd(CommandDescriptor::new("USING", 1, 1).using_pass())),
        Box::new(RunCmd(CommandDescriptor::new("RUN", 1, 1).call_like())),
        Box::new(RunCmd(CommandDescriptor::new("CALL", 1, 1).call_like())),
        Box::new(WriteFileCmd(
            CommandDescriptor::new("WRITE_FILE", 1, 2).embedded_file(),
        )),
    ]
}

// load_referenced_file()
// Script names are relative to the directory of the referring file
fn load_referenced_file(ctx: &mut CheckContext, name: &str) -> Result<usize, ParserError> {
    let base = ctx.filename();
    let path = make_script_filename(name, Path::new(&base));
    ctx.program
        .files
        .load_file(&path)
        .map_err(|_| ParserError::FileNotFound {
            filename: base,
            line: ctx.line(),
            name: name.trim().to_string(),
        })
}

struct EofCmd;

impl Command for EofCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &EOF_DESCRIPTOR
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        match ctx.exec.stack.remove_run_return() {
            Ok(Some((ret_ip, ret_proc))) => {
                ctx.exec.current_proc = ret_proc;
                ctx.jump(ret_ip + 1);
            }
            Ok(None) => ctx.exec.end_reached = true,
            Err(stack_error) => return Err(ctx.stack_error(stack_error)),
        }
        Ok(CmdState::Done)
    }
}

struct UsingCmd(CommandDescriptor);

impl Command for UsingCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    // syntax_check()
    // Scan the referenced file for DEF_PROC declarations now and parse it completely later
    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let name = ctx.param(0).to_string();
        let file = load_referenced_file(ctx, &name)?;
        let Some(cached) = ctx.program.files.get(file) else {
            return Ok(());
        };
        if cached.parsed
            || cached.scanned
            || ctx.state.queue.is_queued(file)
            || file == ctx.state.file
            || ctx.state.file_stack.contains(file)
        {
            return Ok(());
        }

        ctx.state.file_stack.push(ReturnPosition {
            file: ctx.state.file,
            offset: ctx.state.pos.0,
            line: ctx.state.pos.1,
            using_mode: ctx.state.using_mode,
        });
        if let Some(cached) = ctx.program.files.get_mut(file) {
            cached.scanned = true;
        }
        ctx.state.queue.enqueue(file, None);
        ctx.state.switch_to_file(file, true);
        log::debug!("scanning {} for procedures", ctx.filename());
        Ok(())
    }

    fn execute(&self, _ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        Ok(CmdState::Done)
    }
}

/// `RUN(file)` and `CALL(file)` execute another script file and continue behind the command
struct RunCmd(CommandDescriptor);

impl Command for RunCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let Some(param) = ctx.raw_param(0) else {
            return Ok(());
        };
        if param.env_unsolved > 0 {
            let warning = ParserError::UnresolvedEnvVar {
                filename: ctx.filename(),
                line: ctx.line(),
                text: param.text.clone(),
            };
            ctx.error_or_log(warning)?;
            ctx.set_opt(UNRESOLVED_FILE);
            return Ok(());
        }
        let name = param.text.clone();
        let file = load_referenced_file(ctx, &name)?;
        match ctx.program.file_ip_range(file) {
            Some((ip_start, _)) => ctx.set_opt(ip_start),
            None => {
                let ip = ctx.ip();
                ctx.state.queue.enqueue(file, Some(ip));
            }
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let filename = ctx.filename();
        let target = match ctx.opt() {
            UNRESOLVED_FILE => {
                let name = ctx.param(0).trim().to_string();
                let path = make_script_filename(&name, Path::new(&filename));
                path.canonicalize()
                    .ok()
                    .and_then(|path| ctx.program.files.lookup(&path))
                    .and_then(|file| ctx.program.file_ip_range(file))
                    .map(|(ip_start, _)| ip_start)
                    .ok_or_else(|| {
                        ctx.error(format!(
                            "cannot call script \"{name}\" the filename include a environment variable but is not refered with USING"
                        ))
                    })?
            }
            ip_start => ip_start,
        };
        let ret_proc = ctx.exec.current_proc;
        ctx.exec.stack.add_run_return(ctx.ip, ret_proc, &filename);
        ctx.exec.current_proc = MAIN_PROC;
        ctx.jump(target);
        Ok(CmdState::Done)
    }
}

/// `WRITE_FILE(name) { ... }` writes the embedded block to a file
struct WriteFileCmd(CommandDescriptor);

impl Command for WriteFileCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        if ctx.token.has_embedded_file {
            Ok(())
        } else {
            Err(ctx.error("expecting an embedded file in { } behind the parameters"))
        }
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let target = ctx.param(0).trim().to_string();
        let Some(source) = ctx.embedded_file() else {
            return Err(ctx.error("the embedded file was not written"));
        };
        if let Err(ioerror) = std::fs::copy(source, &target) {
            return Err(ctx.error(format!("cannot write \"{target}\": {ioerror}")));
        }
        log::debug!("embedded file written to {target}");
        Ok(CmdState::Done)
    }
}
