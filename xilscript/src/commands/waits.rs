use num_traits::ToPrimitive;

use super::flow::{jump_to_label, register_goto};
use super::procs::{call_proc, check_args, lookup_proc};
use super::{CheckContext, CmdState, Command, CommandDescriptor, ExecContext, to_count};
use crate::executor::RuntimeError;
use crate::host::ProcessOptions;
use crate::parser::ParserError;
use crate::tokenizer::MAX_PARAMS;

// cycles START_PROCESS_EX waits for the process to come up
const PROCESS_START_TIMEOUT: u32 = 1000;

pub(super) fn commands() -> Vec<Box<dyn Command>> {
    vec![
        Box::new(DelayCmd(CommandDescriptor::new("DELAY", 1, 1).not_inside_atomic())),
        Box::new(WaitUntilCmd(
            CommandDescriptor::new("WAIT_UNTIL", 1, MAX_PARAMS).not_inside_atomic(),
        )),
        Box::new(StartProcessCmd(
            CommandDescriptor::new("START_PROCESS_EX", 1, 7)
                .not_inside_atomic()
                .timeout(PROCESS_START_TIMEOUT),
        )),
    ]
}

/// `DELAY(cycles)`: the next command runs `cycles` ticks later
struct DelayCmd(CommandDescriptor);

impl Command for DelayCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let value = ctx.solve(0)?;
        match to_count(ctx, value)? {
            0 => Ok(CmdState::Done),
            cycles => Ok(CmdState::AwaitingCycles(cycles)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeoutAction {
    Continue,
    Stop,
    Goto,
    Gosub,
    CallProc,
}

impl TimeoutAction {
    fn parse(text: &str) -> Option<Self> {
        let upper = text.trim().to_ascii_uppercase();
        match upper.as_str() {
            "STOP" => Some(Self::Stop),
            "GOTO" => Some(Self::Goto),
            "GOSUB" => Some(Self::Gosub),
            "CALL_PROC" => Some(Self::CallProc),
            _ if upper.len() >= 4 && "CONTINUE".starts_with(&upper) => Some(Self::Continue),
            _ => None,
        }
    }

    // message_param()
    // GOTO and GOSUB take the label as fourth parameter, CALL_PROC the procedure name followed
    // by its arguments. The message comes last.
    fn message_param(self, proc_params: usize) -> usize {
        match self {
            Self::Continue | Self::Stop => 3,
            Self::Goto | Self::Gosub => 4,
            Self::CallProc => 4 + proc_params,
        }
    }
}

/// `WAIT_UNTIL(condition, timeout, action, message)`
///
/// The action on timeout is one of `STOP`, `CONT`, `GOTO, label`, `GOSUB, label` or
/// `CALL_PROC, name, arguments...`. Without a timeout the command waits forever. The default
/// action on timeout is to continue.
struct WaitUntilCmd(CommandDescriptor);

impl WaitUntilCmd {
    fn action(ctx: &ExecContext) -> TimeoutAction {
        if ctx.param_count() < 3 {
            return TimeoutAction::Continue;
        }
        TimeoutAction::parse(ctx.param(2)).unwrap_or(TimeoutAction::Continue)
    }

    // proc_args()
    // Parameters behind the procedure name, without the message
    fn proc_args(param_count: usize, proc_params: usize) -> usize {
        let passed = param_count.saturating_sub(4);
        if passed == proc_params + 1 {
            proc_params
        } else {
            passed
        }
    }
}

impl Command for WaitUntilCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn syntax_check(&self, ctx: &mut CheckContext) -> Result<(), ParserError> {
        if ctx.param_count() < 3 {
            return Ok(());
        }
        let Some(action) = TimeoutAction::parse(ctx.param(2)) else {
            return Err(ctx.error(format!(
                "the third parameter of the WAIT_UNTIL command must be STOP, CONT, GOTO, GOSUB or CALL_PROC and not \"{}\"",
                ctx.param(2)
            )));
        };
        let needs_target = !matches!(action, TimeoutAction::Continue | TimeoutAction::Stop);
        if needs_target && ctx.param_count() < 4 {
            return Err(ctx.error(format!(
                "the timeout action {} of the WAIT_UNTIL command needs a target",
                ctx.param(2).trim()
            )));
        }
        match action {
            TimeoutAction::Goto | TimeoutAction::Gosub if ctx.param_count() > 5 => {
                Err(ctx.error("too many parameters for a timeout with GOTO or GOSUB"))
            }
            TimeoutAction::Goto | TimeoutAction::Gosub => {
                let goto = register_goto(ctx, 3)?;
                ctx.set_opt(goto);
                Ok(())
            }
            TimeoutAction::CallProc => {
                let idx = lookup_proc(ctx, 3)?;
                ctx.set_opt(u32::try_from(idx).unwrap_or(u32::MAX));
                if ctx.token.has_param_list {
                    return Ok(());
                }
                let proc_params = ctx
                    .program
                    .procs
                    .get(idx)
                    .map_or(0, |proc| proc.params.len());
                let count = Self::proc_args(ctx.param_count(), proc_params);
                check_args(ctx, idx, 4, count)
            }
            TimeoutAction::Continue | TimeoutAction::Stop if ctx.param_count() > 4 => {
                Err(ctx.error("too many parameters for a timeout with STOP or CONT"))
            }
            _ => Ok(()),
        }
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let end_cycle = if ctx.param_count() >= 2 {
            let value = ctx.solve(1)?;
            u64::from(ctx.cycle()) + u64::from(to_count(ctx, value)?)
        } else {
            u64::MAX
        };
        ctx.set_data(end_cycle);
        Ok(CmdState::AwaitingCycles(1))
    }

    fn wait(&self, ctx: &mut ExecContext, _elapsed: u32) -> Result<CmdState, RuntimeError> {
        if ctx.solve(0)? != 0.0 {
            return Ok(CmdState::Done);
        }
        if u64::from(ctx.cycle()) < ctx.data() {
            return Ok(CmdState::AwaitingCycles(1));
        }

        let action = Self::action(ctx);
        let proc_params = match action {
            TimeoutAction::CallProc => ctx
                .program
                .procs
                .get(ctx.opt() as usize)
                .map_or(0, |proc| proc.params.len()),
            _ => 0,
        };
        let message_param = action.message_param(proc_params);
        if ctx.param_count() > message_param {
            let message = ctx.param(message_param).to_string();
            ctx.host().message(&message);
        }
        log::debug!("WAIT_UNTIL timeout in line {}", ctx.line());
        match action {
            TimeoutAction::Continue => {}
            TimeoutAction::Stop => {
                return Err(ctx.error("script stopped at timeout during WAIT_UNTIL with STOP"));
            }
            TimeoutAction::Goto | TimeoutAction::Gosub => {
                let goto = ctx.opt();
                jump_to_label(ctx, goto, 3, action == TimeoutAction::Gosub)?;
            }
            TimeoutAction::CallProc => {
                let idx = ctx.opt() as usize;
                let count = Self::proc_args(ctx.param_count(), proc_params);
                let ret_ip = ctx.ip + 1;
                call_proc(ctx, idx, 4, count, ret_ip)?;
            }
        }
        Ok(CmdState::Done)
    }
}

/// `START_PROCESS_EX(name, priority, cycle divider, delay, timeout, svl file, prefix)`
///
/// Empty parameters select the default of the process. The command waits until the host
/// reports the process as running.
struct StartProcessCmd(CommandDescriptor);

impl StartProcessCmd {
    fn int_param(ctx: &mut ExecContext, idx: usize) -> Result<Option<i32>, RuntimeError> {
        if idx >= ctx.param_count() || ctx.param(idx).trim().is_empty() {
            return Ok(None);
        }
        let value = ctx.solve(idx)?;
        match value.round().to_i32() {
            Some(value) => Ok(Some(value)),
            None => Err(ctx.error(format!("{value} is out of range"))),
        }
    }

    fn text_param(ctx: &ExecContext, idx: usize) -> Option<String> {
        if idx >= ctx.param_count() {
            return None;
        }
        let text = ctx.param(idx).trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Command for StartProcessCmd {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
        let name = ctx.param(0).trim().to_string();
        let options = ProcessOptions {
            priority: Self::int_param(ctx, 1)?,
            cycle_divider: Self::int_param(ctx, 2)?,
            delay: Self::int_param(ctx, 3)?,
            timeout: Self::int_param(ctx, 4)?,
            svl_file: Self::text_param(ctx, 5),
            prefix: Self::text_param(ctx, 6),
        };
        if let Err(message) = ctx.host().start_process(&name, &options) {
            return Err(ctx.error(format!("Cannot start process \"{name}\" {message}")));
        }
        log::info!("process {name} started");
        Ok(CmdState::AwaitingCycles(1))
    }

    fn wait(&self, ctx: &mut ExecContext, _elapsed: u32) -> Result<CmdState, RuntimeError> {
        let name = ctx.param(0).trim().to_string();
        if ctx.host().is_process_running(&name) {
            Ok(CmdState::Done)
        } else {
            Ok(CmdState::AwaitingCycles(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_actions() {
        assert_eq!(TimeoutAction::parse("STOP"), Some(TimeoutAction::Stop));
        assert_eq!(TimeoutAction::parse(" cont"), Some(TimeoutAction::Continue));
        assert_eq!(TimeoutAction::parse("CONTINUE"), Some(TimeoutAction::Continue));
        assert_eq!(TimeoutAction::parse("CON"), None);
        assert_eq!(TimeoutAction::parse("gosub"), Some(TimeoutAction::Gosub));
        assert_eq!(TimeoutAction::parse("CALL"), None);
        assert_eq!(TimeoutAction::parse("call_proc"), Some(TimeoutAction::CallProc));
        assert_eq!(TimeoutAction::Goto.message_param(0), 4);
        assert_eq!(TimeoutAction::Stop.message_param(0), 3);
        assert_eq!(TimeoutAction::CallProc.message_param(2), 6);
    }

    #[test]
    fn procedure_arguments_and_message() {
        // WAIT_UNTIL(c, t, CALL_PROC, p, a, b) and the same with a trailing message
        assert_eq!(WaitUntilCmd::proc_args(6, 2), 2);
        assert_eq!(WaitUntilCmd::proc_args(7, 2), 2);
        assert_eq!(WaitUntilCmd::proc_args(4, 0), 0);
        assert_eq!(WaitUntilCmd::proc_args(5, 0), 0);
        // one argument missing is reported by the count check
        assert_eq!(WaitUntilCmd::proc_args(5, 2), 1);
        assert_eq!(WaitUntilCmd::proc_args(8, 2), 4);
    }
}
