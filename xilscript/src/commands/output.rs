use super::{CmdState, Command, CommandDescriptor, ExecContext, RawMode};
use crate::executor::RuntimeError;
use crate::tokenizer::MAX_PARAMS;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(MessageCmd(CommandDescriptor::new("MESSAGE", 0, MAX_PARAMS))),
        Box::new(ReportRawCmd(
            CommandDescriptor::new("REPORT_RAW", 1, 1).raw(RawMode::WholeLine),
        )),
        Box::new(ReportRawParCmd(
            CommandDescriptor::new("REPORT_RAW_PAR", 1, MAX_PARAMS).raw(RawMode::FirstParam),
        )),
    ]
}

/// `MESSAGE(text, ...)`: the parameters are joined with `", "`
struct MessageCmd(CommandDescriptor);

impl Command for MessageCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let text = (0..ctx.param_count())
            .map(|idx| ctx.param(idx))
            .collect::<Vec<_>>()
            .join(", ");
        ctx.host().message(&text);
        Ok(CmdState::Done)
    }
}

struct ReportRawCmd(CommandDescriptor);

impl Command for ReportRawCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let text = ctx.param(0).to_string();
        ctx.host().message(&text);
        Ok(CmdState::Done)
    }
}

/// `REPORT_RAW_PAR(raw text, equation, ...)`: the values of the equations follow the raw text
struct ReportRawParCmd(CommandDescriptor);

impl Command for ReportRawParCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let mut text = ctx.param(0).to_string();
        for idx in 1..ctx.param_count() {
            let value = ctx.solve(idx)?;
            text.push_str(if idx == 1 { " " } else { ", " });
            text.push_str(&value.to_string());
        }
        ctx.host().message(&text);
        Ok(CmdState::Done)
    }
}
