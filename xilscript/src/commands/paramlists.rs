use super::{CmdState, Command, CommandDescriptor, ExecContext};
use crate::executor::RuntimeError;
use crate::paramlist::ParamLists;
use crate::tokenizer::MAX_PARAMS;

#[derive(Debug, Clone, Copy)]
enum ListOp {
    Define,
    Add,
    Delete,
    Undefine,
}

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(ParamListCmd {
            descriptor: CommandDescriptor::new("DEF_PARAM_LIST", 1, MAX_PARAMS),
            op: ListOp::Define,
        }),
        Box::new(ParamListCmd {
            descriptor: CommandDescriptor::new("ADD_PARAM_LIST", 1, MAX_PARAMS),
            op: ListOp::Add,
        }),
        Box::new(ParamListCmd {
            descriptor: CommandDescriptor::new("DEL_PARAM_LIST", 1, MAX_PARAMS),
            op: ListOp::Delete,
        }),
        Box::new(ParamListCmd {
            descriptor: CommandDescriptor::new("UNDEF_PARAM_LIST", 1, 1),
            op: ListOp::Undefine,
        }),
    ]
}

/// The parameter list commands; the first parameter is the list name, the others are entries
struct ParamListCmd {
    descriptor: CommandDescriptor,
    op: ListOp,
}

impl ParamListCmd {
    fn apply(&self, lists: &mut ParamLists, name: &str, params: &[String]) -> Result<(), String> {
        let ok = match self.op {
            ListOp::Define => lists.define(name, params),
            ListOp::Add => lists.add(name, params),
            ListOp::Delete => lists.remove(name, params),
            ListOp::Undefine => lists.undefine(name),
        };
        if ok {
            return Ok(());
        }
        Err(match self.op {
            ListOp::Define => format!("parameter list \"{name}\" is already defined"),
            _ => format!("parameter list \"{name}\" is not defined"),
        })
    }
}

impl Command for ParamListCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let name = ctx.param(0).trim().to_string();
        let params: Vec<String> = (1..ctx.param_count())
            .map(|idx| ctx.param(idx).trim().to_string())
            .collect();
        match self.apply(&mut ctx.exec.param_lists, &name, &params) {
            Ok(()) => {
                log::debug!("parameter lists: {}", ctx.exec.param_lists.describe());
                Ok(CmdState::Done)
            }
            Err(message) => Err(ctx.error(message)),
        }
    }
}
