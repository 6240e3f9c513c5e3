use super::{CheckContext, CmdState, Command, CommandDescriptor, ExecContext};
use crate::executor::RuntimeError;
use crate::parser::ParserError;
use crate::tokenizer::MAX_PARAMS;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(DefLocalsCmd(CommandDescriptor::new(
            "DEF_LOCALS",
            0,
            MAX_PARAMS,
        ))),
        Box::new(EndDefLocalsCmd(CommandDescriptor::new(
            "END_DEF_LOCALS",
            0,
            0,
        ))),
        Box::new(SetCmd(CommandDescriptor::new("SET", 1, 1))),
    ]
}

pub(super) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

// split_definition()
// `name` or `name = equation`
fn split_definition(text: &str) -> (&str, Option<&str>) {
    match text.split_once('=') {
        Some((name, equation)) => (name.trim(), Some(equation.trim())),
        None => (text.trim(), None),
    }
}

// assignment()
// `name = equation` with a valid name and a non-empty equation. `x == 1` is a comparison, not an
// assignment.
fn assignment(text: &str) -> Option<(&str, &str)> {
    match split_definition(text) {
        (name, Some(equation))
            if is_identifier(name) && !equation.is_empty() && !equation.starts_with('=') =>
        {
            Some((name, equation))
        }
        _ => None,
    }
}

// define_locals()
// Open a new block of local variables. The initial values are solved before the block exists,
// so they may refer to variables of the same name in an outer block.
pub(super) fn define_locals(ctx: &mut ExecContext) -> Result<(), RuntimeError> {
    let mut values = Vec::with_capacity(ctx.param_count());
    for idx in 0..ctx.param_count() {
        let text = ctx.param(idx).to_string();
        let (name, equation) = split_definition(&text);
        let value = match equation {
            Some(equation) => ctx.solve_equation(equation)?,
            None => 0.0,
        };
        values.push((name.to_string(), value));
    }
    ctx.exec.stack.add_block();
    for (name, value) in values {
        ctx.exec.stack.add_local_variable(&name, value);
    }
    Ok(())
}

struct DefLocalsCmd(CommandDescriptor);

impl Command for DefLocalsCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        for idx in 0..ctx.param_count() {
            let text = ctx.param(idx);
            match split_definition(text) {
                (name, _) if !is_identifier(name) => {
                    return Err(ctx.error(format!("\"{name}\" is not a valid variable name")));
                }
                (_, Some(_)) if assignment(text).is_none() => {
                    return Err(ctx.error(format!("\"{text}\" has no valid initial value")));
                }
                _ => {}
            }
        }
        let (ip, line) = (ctx.ip(), ctx.line());
        ctx.state.compiler.add_def_locals(ip, line);
        if let Some(proc) = ctx.program.procs.get_mut(ctx.state.current_proc) {
            proc.scopes.add_def_locals(ip);
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        define_locals(ctx)?;
        Ok(CmdState::Done)
    }
}

struct EndDefLocalsCmd(CommandDescriptor);

impl Command for EndDefLocalsCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        ctx.state
            .compiler
            .end_def_locals()
            .map_err(|err| ctx.structure_error(err))?;
        if let Some(proc) = ctx.program.procs.get_mut(ctx.state.current_proc) {
            proc.scopes.end_def_locals();
        }
        Ok(())
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        match ctx.exec.stack.remove_local_variables() {
            Ok(()) => Ok(CmdState::Done),
            Err(stack_error) => Err(ctx.stack_error(stack_error)),
        }
    }
}

/// `SET(name = equation)`, also written as `name = equation`.
///
/// Visible local variables and references are assigned on the stack, every other name is an
/// external variable of the host.
struct SetCmd(CommandDescriptor);

impl Command for SetCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        match assignment(ctx.param(0)) {
            Some(_) => Ok(()),
            None => Err(ctx.error(format!(
                "expecting \"variable = equation\" and not \"{}\"",
                ctx.param(0)
            ))),
        }
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let text = ctx.param(0).to_string();
        let (name, equation) = split_definition(&text);
        let value = ctx.solve_equation(equation.unwrap_or_default())?;

        if ctx.exec.stack.find_variable(name, None).is_some() {
            match ctx.exec.stack.set_local_variable(name, value) {
                Ok(None) => {}
                Ok(Some(id)) => {
                    if let Err(message) = ctx.host.write_variable_by_id(id, value) {
                        return Err(ctx.error(message));
                    }
                }
                Err(stack_error) => return Err(ctx.stack_error(stack_error)),
            }
        } else if let Err(message) = ctx.host.write_variable(name, value) {
            return Err(ctx.error(format!("cannot write \"{name}\": {message}")));
        }
        Ok(CmdState::Done)
    }
}
