use super::locals::is_identifier;
use super::{CheckContext, CmdState, Command, CommandDescriptor, ExecContext};
use crate::executor::RuntimeError;
use crate::parser::ParserError;
use crate::proc::{MAIN_PROC, ProcParam};
use crate::stack::RefTarget;
use crate::tokenizer::MAX_PARAMS;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(DefProcCmd(
            CommandDescriptor::new("DEF_PROC", 1, MAX_PARAMS)
                .named()
                .using_pass(),
        )),
        Box::new(EndDefProcCmd(CommandDescriptor::new("END_DEF_PROC", 0, 0))),
        Box::new(CallProcCmd(
            CommandDescriptor::new("CALL_PROC", 1, MAX_PARAMS)
                .named()
                .call_like(),
        )),
    ]
}

/// `DEF_PROC name(value, *reference)` starts the body of a procedure.
///
/// Files opened by `USING` only declare the procedure; the body is bound to it when the file
/// is parsed completely.
struct DefProcCmd(CommandDescriptor);

impl DefProcCmd {
    fn duplicate(ctx: &CheckContext, idx: usize) -> ParserError {
        let (first_file, first_line) = ctx
            .program
            .procs
            .get(idx)
            .map_or((0, 0), |proc| (proc.file, proc.line));
        ParserError::DuplicateProc {
            filename: ctx.filename(),
            line: ctx.line(),
            name: ctx.param(0).to_string(),
            first_filename: ctx.program.filename(first_file),
            first_line,
        }
    }
}

impl Command for DefProcCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let name = ctx.param(0).trim().to_string();
        if !is_identifier(&name) {
            return Err(ctx.error(format!("\"{name}\" is not a valid procedure name")));
        }
        let params: Vec<ProcParam> = (1..ctx.param_count())
            .map(|idx| ProcParam::parse(ctx.param(idx)))
            .collect();
        if let Some(param) = params.iter().find(|param| !is_identifier(&param.name)) {
            return Err(ctx.error(format!(
                "\"{}\" is not a valid parameter name",
                param.name
            )));
        }
        let file = ctx.state.file;
        let line = ctx.line();

        if ctx.using_mode() {
            if let Some(idx) = ctx.program.procs.find(&name) {
                return Err(Self::duplicate(ctx, idx));
            }
            let _ = ctx.program.procs.declare(&name, params, file, line);
            return Ok(());
        }

        if ctx.state.compiler.inside_def_proc() || ctx.state.current_proc != MAIN_PROC {
            return Err(ParserError::NestedProc {
                filename: ctx.filename(),
                line,
                name,
            });
        }
        let idx = match ctx.program.procs.find(&name) {
            Some(idx) => {
                let declared_here = ctx
                    .program
                    .procs
                    .get(idx)
                    .is_some_and(|proc| !proc.defined && proc.file == file);
                if !declared_here {
                    return Err(Self::duplicate(ctx, idx));
                }
                idx
            }
            None => match ctx.program.procs.declare(&name, Vec::new(), file, line).ok() {
                Some(idx) => idx,
                None => return Err(ctx.error("cannot declare procedure")),
            },
        };

        let ip = ctx.ip();
        if let Some(proc) = ctx.program.procs.get_mut(idx) {
            proc.defined = true;
            proc.ip = ip;
            proc.line = line;
            proc.params = params;
        }
        ctx.state.compiler.add_def_proc(ip, line);
        ctx.state.current_proc = idx;
        Ok(())
    }

    // execute()
    // The body is only run by CALL_PROC
    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        ctx.jump(ctx.opt() + 1);
        Ok(CmdState::Done)
    }
}

struct EndDefProcCmd(CommandDescriptor);

impl Command for EndDefProcCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let ip = ctx.ip();
        let node = ctx
            .state
            .compiler
            .end_def_proc()
            .map_err(|err| ctx.structure_error(err))?;
        ctx.patch(node.ip, Some(ip), None);

        let current = ctx.state.current_proc;
        ctx.state.current_proc = MAIN_PROC;
        let Some(proc) = ctx.program.procs.get_mut(current) else {
            return Ok(());
        };
        if let Err(goto) = proc.labels.resolve_gotos(None) {
            return Err(ParserError::UnknownLabel {
                filename: ctx.program.filename(goto.file),
                line: goto.line,
                label: goto.name,
            });
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        match ctx.exec.stack.remove_proc() {
            Ok((ret_proc, ret_ip)) => {
                ctx.exec.current_proc = ret_proc;
                ctx.jump(ret_ip);
                Ok(CmdState::Done)
            }
            Err(stack_error) => Err(ctx.stack_error(stack_error)),
        }
    }
}

enum ProcArg {
    Value(f64),
    Ref(RefTarget),
}

/// `CALL_PROC name(value, &variable)`
struct CallProcCmd(CommandDescriptor);

impl Command for CallProcCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let idx = lookup_proc(ctx, 0)?;
        ctx.set_opt(u32::try_from(idx).unwrap_or(u32::MAX));
        // spliced parameter lists are only known at run time
        if ctx.token.has_param_list {
            return Ok(());
        }
        check_args(ctx, idx, 1, ctx.param_count() - 1)
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let idx = ctx.opt() as usize;
        let count = ctx.param_count() - 1;
        let ret_ip = ctx.ip + 1;
        call_proc(ctx, idx, 1, count, ret_ip)?;
        Ok(CmdState::Done)
    }
}

// lookup_proc()
// The procedure named by parameter `name_param`. It must be defined or declared by USING before.
pub(super) fn lookup_proc(ctx: &CheckContext, name_param: usize) -> Result<usize, ParserError> {
    let name = ctx.param(name_param).trim();
    ctx.program
        .procs
        .find(name)
        .ok_or_else(|| ParserError::UnknownProc {
            filename: ctx.filename(),
            line: ctx.line(),
            name: name.to_string(),
        })
}

// check_args()
// `count` arguments starting at parameter `first_arg`: the count must match the declaration and
// reference parameters take `&variable`.
pub(super) fn check_args(
    ctx: &CheckContext,
    idx: usize,
    first_arg: usize,
    count: usize,
) -> Result<(), ParserError> {
    let Some(proc) = ctx.program.procs.get(idx) else {
        return Ok(());
    };
    if count != proc.params.len() {
        return Err(ParserError::ProcParamCount {
            filename: ctx.filename(),
            line: ctx.line(),
            name: proc.name.clone(),
            count,
            expected: proc.params.len(),
        });
    }
    for (position, param) in proc.params.iter().enumerate() {
        let passed_ref = ctx.param(first_arg + position).trim_start().starts_with('&');
        if passed_ref != param.by_ref {
            return Err(ParserError::ProcParamKind {
                filename: ctx.filename(),
                line: ctx.line(),
                name: proc.name.clone(),
                position: position + 1,
                by_ref: param.by_ref,
            });
        }
    }
    Ok(())
}

// call_proc()
// Arguments are solved in the context of the caller before the procedure frame is pushed. The
// procedure returns to `ret_ip`.
pub(super) fn call_proc(
    ctx: &mut ExecContext,
    idx: usize,
    first_arg: usize,
    count: usize,
    ret_ip: u32,
) -> Result<(), RuntimeError> {
    let program = ctx.program;
    let Some(proc) = program.procs.get(idx) else {
        return Err(ctx.error("invalid procedure"));
    };
    if !proc.defined {
        return Err(ctx.error(format!(
            "procedure \"{}\" is declared but never defined",
            proc.name
        )));
    }
    if count != proc.params.len() {
        return Err(ctx.error(format!(
            "wrong parameter count {count} (expecting {}) in proc \"{}\"",
            proc.params.len(),
            proc.name
        )));
    }

    let mut args = Vec::with_capacity(proc.params.len());
    for (position, param) in proc.params.iter().enumerate() {
        let text = ctx.param(first_arg + position).trim().to_string();
        let arg = match (param.by_ref, text.strip_prefix('&')) {
            (true, Some(variable)) => ProcArg::Ref(resolve_reference(ctx, variable.trim())?),
            (false, None) => ProcArg::Value(ctx.solve_equation(&text)?),
            _ => {
                return Err(ctx.error(format!(
                    "parameter {} \"{text}\" of proc \"{}\" has the wrong kind",
                    position + 1,
                    proc.name
                )));
            }
        };
        args.push(arg);
    }

    let ret_proc = ctx.exec.current_proc;
    ctx.exec.stack.add_proc(ret_proc, ret_ip, &proc.name);
    for (param, arg) in proc.params.iter().zip(args) {
        match arg {
            ProcArg::Value(value) => ctx.exec.stack.add_local_variable(&param.name, value),
            ProcArg::Ref(target) => ctx.exec.stack.add_ref_to_local_variable(&param.name, target),
        }
    }
    ctx.exec.current_proc = idx;
    ctx.jump(proc.ip + 1);
    Ok(())
}

// resolve_reference()
// A reference points to a visible local variable or to an external variable
fn resolve_reference(ctx: &mut ExecContext, name: &str) -> Result<RefTarget, RuntimeError> {
    if let Some(pos) = ctx.exec.stack.find_variable(name, None) {
        return ctx
            .exec
            .stack
            .resolve(pos)
            .map_err(|stack_error| ctx.stack_error(stack_error));
    }
    match ctx.host.variable_id(name) {
        Some(id) => Ok(RefTarget::External(id)),
        None => Err(ctx.error(format!("cannot find variable reference \"{name}\""))),
    }
}
