use super::{CheckContext, CmdState, Command, CommandDescriptor, ExecContext};
use crate::compiler::{BlockKind, BreakUnwind};
use crate::executor::RuntimeError;
use crate::labels::Goto;
use crate::parser::ParserError;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(IfCmd(CommandDescriptor::new("IF", 1, 1))),
        Box::new(ElseIfCmd(CommandDescriptor::new("ELSEIF", 1, 1))),
        Box::new(ElseCmd(CommandDescriptor::new("ELSE", 0, 0))),
        Box::new(EndIfCmd(CommandDescriptor::new("ENDIF", 0, 0))),
        Box::new(WhileCmd(CommandDescriptor::new("WHILE", 1, 1))),
        Box::new(EndWhileCmd(CommandDescriptor::new("ENDWHILE", 0, 0))),
        Box::new(BreakCmd(CommandDescriptor::new("BREAK", 0, 0))),
        Box::new(AtomicCmd(CommandDescriptor::new("ATOMIC", 0, 0))),
        Box::new(EndAtomicCmd(CommandDescriptor::new("END_ATOMIC", 0, 0))),
        Box::new(GotoCmd(CommandDescriptor::new("GOTO", 1, 1))),
        Box::new(GosubCmd(CommandDescriptor::new("GOSUB", 1, 1).call_like())),
        Box::new(ReturnCmd(CommandDescriptor::new("RETURN", 0, 0))),
    ]
}

// register_goto()
// Record a jump to the label in parameter `idx` of the current command. Labels that contain
// environment variables are searched when the jump is executed.
pub(super) fn register_goto(ctx: &mut CheckContext, idx: usize) -> Result<u32, ParserError> {
    let Some(param) = ctx.raw_param(idx) else {
        return Err(ctx.error("missing label"));
    };
    let name = param.text.trim().to_string();
    let dynamic = param.env_solved + param.env_unsolved > 0;
    if param.env_unsolved > 0 {
        let warning = ParserError::UnresolvedEnvVar {
            filename: ctx.filename(),
            line: ctx.line(),
            text: name.clone(),
        };
        ctx.error_or_log(warning)?;
    }

    let ip = ctx.ip();
    let line = ctx.line();
    let file = ctx.state.file;
    let atomic_depth = ctx.state.compiler.atomic_depth();
    let Some(proc) = ctx.program.procs.get_mut(ctx.state.current_proc) else {
        return Err(ctx.error("jump outside of any procedure"));
    };
    let goto = Goto {
        name,
        file,
        line,
        ip,
        scope: proc.scopes.current(),
        atomic_depth,
        dynamic,
        label: None,
    };
    Ok(u32::try_from(proc.labels.add_goto(goto)).unwrap_or(u32::MAX))
}

// jump_to_label()
// Execute a registered jump. GOTO leaves the DEF_LOCALS regions that do not contain the label,
// GOSUB keeps them below its return frame. Regions on the way into the label are entered by
// running their DEF_LOCALS commands.
pub(super) fn jump_to_label(
    ctx: &mut ExecContext,
    goto_idx: u32,
    label_param: usize,
    gosub: bool,
) -> Result<(), RuntimeError> {
    let program = ctx.program;
    let Some(proc) = program.procs.get(ctx.exec.current_proc) else {
        return Err(ctx.error("jump outside of any procedure"));
    };
    let Some(goto) = proc.labels.goto(goto_idx as usize) else {
        return Err(ctx.error("invalid jump"));
    };
    let label = match goto.label {
        Some(idx) => proc.labels.label(idx),
        None => proc.labels.find_label(goto.file, ctx.param(label_param).trim()),
    };
    let Some(label) = label else {
        return Err(ctx.error(format!(
            "cannot find label \"{}\"",
            ctx.param(label_param).trim()
        )));
    };

    let walk = proc.scopes.goto_from_to(goto.scope, label.scope);
    if gosub {
        let atomic_depth = ctx.exec.atomic_depth;
        ctx.exec.stack.add_gosub(ctx.ip + 1, atomic_depth, &label.name);
    } else {
        for _ in 0..walk.pops {
            if let Err(stack_error) = ctx.exec.stack.remove_local_variables() {
                return Err(ctx.stack_error(stack_error));
            }
        }
    }
    for ip in walk.enter {
        let token = ctx.tokenize_ip(ip)?;
        let mut nested = ctx.nested(ip, &token);
        super::locals::define_locals(&mut nested)?;
    }

    let depth = i64::from(ctx.exec.atomic_depth) + i64::from(label.atomic_depth)
        - i64::from(goto.atomic_depth);
    ctx.exec.atomic_depth = u32::try_from(depth.max(0)).unwrap_or(u32::MAX);
    ctx.jump(label.ip);
    Ok(())
}

fn is_true(value: f64) -> bool {
    value != 0.0
}

struct IfCmd(CommandDescriptor);

impl Command for IfCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let (ip, line) = (ctx.ip(), ctx.line());
        ctx.state.compiler.add_if(ip, line);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        if !is_true(ctx.solve(0)?) {
            ctx.jump(ctx.opt());
            ctx.exec.branch_entry = true;
        }
        Ok(CmdState::Done)
    }
}

struct ElseIfCmd(CommandDescriptor);

impl Command for ElseIfCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let (ip, line) = (ctx.ip(), ctx.line());
        let prev = ctx
            .state
            .compiler
            .add_else_if(ip, line)
            .map_err(|err| ctx.structure_error(err))?;
        ctx.patch(prev, Some(ip), None);
        Ok(())
    }

    // execute()
    // Only evaluated when the previous condition was false, otherwise the IF chain is done
    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        if !ctx.branch_entry {
            ctx.jump(ctx.reserved());
        } else if !is_true(ctx.solve(0)?) {
            ctx.jump(ctx.opt());
            ctx.exec.branch_entry = true;
        }
        Ok(CmdState::Done)
    }
}

struct ElseCmd(CommandDescriptor);

impl Command for ElseCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let (ip, line) = (ctx.ip(), ctx.line());
        let prev = ctx
            .state
            .compiler
            .add_else(ip, line)
            .map_err(|err| ctx.structure_error(err))?;
        ctx.patch(prev, Some(ip), None);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        if !ctx.branch_entry {
            ctx.jump(ctx.reserved());
        }
        Ok(CmdState::Done)
    }
}

struct EndIfCmd(CommandDescriptor);

impl Command for EndIfCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    // syntax_check()
    // The last open condition jumps here when it is false, every branch jumps here at its end
    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let ip = ctx.ip();
        let node = ctx
            .state
            .compiler
            .end_if()
            .map_err(|err| ctx.structure_error(err))?;
        if matches!(node.kind, BlockKind::If | BlockKind::ElseIf) {
            ctx.patch(node.ip, Some(ip), None);
        }
        for branch in node.branches {
            ctx.patch(branch, None, Some(ip));
        }
        Ok(())
    }

    fn execute(&self, _ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        Ok(CmdState::Done)
    }
}

struct WhileCmd(CommandDescriptor);

impl Command for WhileCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let (ip, line) = (ctx.ip(), ctx.line());
        ctx.state.compiler.add_while(ip, line);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        if !is_true(ctx.solve(0)?) {
            ctx.jump(ctx.opt());
        }
        Ok(CmdState::Done)
    }
}

struct EndWhileCmd(CommandDescriptor);

impl Command for EndWhileCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let ip = ctx.ip();
        let node = ctx
            .state
            .compiler
            .end_while()
            .map_err(|err| ctx.structure_error(err))?;
        ctx.patch(node.ip, Some(ip + 1), None);
        for branch in node.branches {
            ctx.patch(branch, Some(ip + 1), None);
        }
        ctx.set_opt(node.ip);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        ctx.jump(ctx.opt());
        Ok(CmdState::Done)
    }
}

struct BreakCmd(CommandDescriptor);

impl Command for BreakCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let ip = ctx.ip();
        let unwind = ctx
            .state
            .compiler
            .add_break(ip)
            .map_err(|err| ctx.structure_error(err))?;
        ctx.set_reserved(unwind.encode());
        Ok(())
    }

    // execute()
    // Leave the DEF_LOCALS and ATOMIC blocks between the BREAK and its WHILE
    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let unwind = BreakUnwind::decode(ctx.reserved());
        for _ in 0..unwind.def_locals {
            if let Err(stack_error) = ctx.exec.stack.remove_local_variables() {
                return Err(ctx.stack_error(stack_error));
            }
        }
        ctx.exec.atomic_depth = ctx.exec.atomic_depth.saturating_sub(unwind.atomics);
        ctx.jump(ctx.opt());
        Ok(CmdState::Done)
    }
}

struct AtomicCmd(CommandDescriptor);

impl Command for AtomicCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let (ip, line) = (ctx.ip(), ctx.line());
        ctx.state.compiler.add_atomic(ip, line);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        ctx.exec.atomic_depth = ctx.exec.atomic_depth.saturating_add(1);
        Ok(CmdState::Done)
    }
}

struct EndAtomicCmd(CommandDescriptor);

impl Command for EndAtomicCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        ctx.state
            .compiler
            .end_atomic()
            .map_err(|err| ctx.structure_error(err))
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        ctx.exec.atomic_depth = ctx.exec.atomic_depth.saturating_sub(1);
        Ok(CmdState::Done)
    }
}

struct GotoCmd(CommandDescriptor);

impl Command for GotoCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let goto = register_goto(ctx, 0)?;
        ctx.set_opt(goto);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let goto = ctx.opt();
        jump_to_label(ctx, goto, 0, false)?;
        Ok(CmdState::Done)
    }
}

struct GosubCmd(CommandDescriptor);

impl Command for GosubCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        let goto = register_goto(ctx, 0)?;
        ctx.set_opt(goto);
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let goto = ctx.opt();
        jump_to_label(ctx, goto, 0, true)?;
        Ok(CmdState::Done)
    }
}

struct ReturnCmd(CommandDescriptor);

impl Command for ReturnCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        match ctx.exec.stack.remove_gosub() {
            Ok((ret_ip, atomic_depth)) => {
                ctx.exec.atomic_depth = atomic_depth;
                ctx.jump(ret_ip);
                Ok(CmdState::Done)
            }
            Err(stack_error) => Err(ctx.stack_error(stack_error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gosub_enters_a_subroutine() {
        let commands = commands();
        let call_like: Vec<&str> = commands
            .iter()
            .filter(|cmd| cmd.descriptor().call_like)
            .map(|cmd| cmd.descriptor().name)
            .collect();
        assert_eq!(call_like, vec!["GOSUB"]);
    }
}
