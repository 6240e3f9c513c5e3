use thiserror::Error;

use crate::host::{LocalVariables, VariableValue};

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StackError {
    #[error("cannot remove local variables from stack because end of stack reached")]
    EndOfStackReached,

    #[error("cannot remove local variables from stack, found {found} first")]
    UnbalancedBlock { found: &'static str },

    #[error("there was a gosub without a return")]
    GosubWithoutReturn,

    #[error("cannot RETURN to GOSUB because not called by GOSUB")]
    NotCalledByGosub,

    #[error("cannot leave procedure because it was not called by CALL_PROC")]
    NotCalledByProc,

    #[error("missing RETURN for GOSUB({label}) at end of script file")]
    MissingReturn { label: String },

    #[error("end of script file reached inside of procedure {name}")]
    EndOfFileInsideProc { name: String },

    #[error("local variable \"{name}\" does not exist")]
    UnknownVariable { name: String },

    #[error("reference \"{name}\" points to an invalid stack position {position}")]
    InvalidReference { name: String, position: usize },
}

/// Target of a reference parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// position of a `LocalVariable` frame
    Stack(usize),
    /// id of an external variable, see [`ScriptHost::variable_id`](crate::ScriptHost::variable_id)
    External(u64),
}

/// One entry of the script stack
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    EndOfStack,
    LocalVariable {
        name: String,
        value: f64,
    },
    RefToLocalVariable {
        name: String,
        target: RefTarget,
    },
    EndOfBlock,
    ProcCall {
        ret_proc: usize,
        ret_ip: u32,
        name: String,
    },
    Gosub {
        ret_ip: u32,
        atomic_depth: u32,
        label: String,
    },
    BackToFile {
        ret_ip: u32,
        ret_proc: usize,
        filename: String,
    },
}

impl Frame {
    fn kind_name(&self) -> &'static str {
        match self {
            Frame::EndOfStack => "end of stack",
            Frame::LocalVariable { .. } => "local variable",
            Frame::RefToLocalVariable { .. } => "reference",
            Frame::EndOfBlock => "end of block",
            Frame::ProcCall { .. } => "procedure call",
            Frame::Gosub { .. } => "GOSUB",
            Frame::BackToFile { .. } => "return to file",
        }
    }

    // is_call_boundary()
    // Variable lookups never look beyond a procedure or file boundary. GOSUB is transparent.
    fn is_call_boundary(&self) -> bool {
        matches!(
            self,
            Frame::EndOfStack | Frame::ProcCall { .. } | Frame::BackToFile { .. }
        )
    }
}

/// The runtime stack of a script.
///
/// The stack never becomes empty: the bottom entry is always `EndOfStack`.
#[derive(Debug)]
pub(crate) struct Stack {
    frames: Vec<Frame>,
    change_counter: u64,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![Frame::EndOfStack],
            change_counter: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.frames.truncate(1);
        self.change_counter += 1;
    }

    /// Number of frames, including the `EndOfStack` entry
    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub(crate) fn change_counter(&self) -> u64 {
        self.change_counter
    }

    fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
        self.change_counter += 1;
    }

    pub(crate) fn add_local_variable(&mut self, name: &str, value: f64) {
        self.push(Frame::LocalVariable {
            name: name.to_string(),
            value,
        });
    }

    pub(crate) fn add_ref_to_local_variable(&mut self, name: &str, target: RefTarget) {
        self.push(Frame::RefToLocalVariable {
            name: name.to_string(),
            target,
        });
    }

    pub(crate) fn add_block(&mut self) {
        self.push(Frame::EndOfBlock);
    }

    // remove_local_variables()
    // Pop everything down to and including the nearest EndOfBlock
    pub(crate) fn remove_local_variables(&mut self) -> Result<(), StackError> {
        let mut pos = self.frames.len();
        while pos > 0 {
            pos -= 1;
            match &self.frames[pos] {
                Frame::LocalVariable { .. } | Frame::RefToLocalVariable { .. } => {}
                Frame::EndOfBlock => {
                    self.frames.truncate(pos);
                    self.change_counter += 1;
                    return Ok(());
                }
                Frame::EndOfStack => return Err(StackError::EndOfStackReached),
                other => {
                    return Err(StackError::UnbalancedBlock {
                        found: other.kind_name(),
                    });
                }
            }
        }
        Err(StackError::EndOfStackReached)
    }

    pub(crate) fn add_proc(&mut self, ret_proc: usize, ret_ip: u32, name: &str) {
        self.push(Frame::ProcCall {
            ret_proc,
            ret_ip,
            name: name.to_string(),
        });
    }

    // remove_proc()
    // Pop the parameters and locals of a procedure together with its ProcCall frame.
    // Returns the procedure and instruction to return to.
    pub(crate) fn remove_proc(&mut self) -> Result<(usize, u32), StackError> {
        let mut pos = self.frames.len();
        while pos > 0 {
            pos -= 1;
            match &self.frames[pos] {
                Frame::ProcCall {
                    ret_proc, ret_ip, ..
                } => {
                    let result = (*ret_proc, *ret_ip);
                    self.frames.truncate(pos);
                    self.change_counter += 1;
                    return Ok(result);
                }
                Frame::Gosub { .. } => return Err(StackError::GosubWithoutReturn),
                Frame::BackToFile { .. } | Frame::EndOfStack => {
                    return Err(StackError::NotCalledByProc);
                }
                _ => {}
            }
        }
        Err(StackError::NotCalledByProc)
    }

    pub(crate) fn add_gosub(&mut self, ret_ip: u32, atomic_depth: u32, label: &str) {
        self.push(Frame::Gosub {
            ret_ip,
            atomic_depth,
            label: label.to_string(),
        });
    }

    // remove_gosub()
    // Blocks that were entered by the subroutine are dropped together with the Gosub frame.
    // Returns the return address and the atomic depth at the time of the GOSUB.
    pub(crate) fn remove_gosub(&mut self) -> Result<(u32, u32), StackError> {
        let mut pos = self.frames.len();
        while pos > 0 {
            pos -= 1;
            match &self.frames[pos] {
                Frame::Gosub {
                    ret_ip,
                    atomic_depth,
                    ..
                } => {
                    let result = (*ret_ip, *atomic_depth);
                    self.frames.truncate(pos);
                    self.change_counter += 1;
                    return Ok(result);
                }
                Frame::ProcCall { .. } | Frame::BackToFile { .. } | Frame::EndOfStack => {
                    return Err(StackError::NotCalledByGosub);
                }
                _ => {}
            }
        }
        Err(StackError::NotCalledByGosub)
    }

    pub(crate) fn add_run_return(&mut self, ret_ip: u32, ret_proc: usize, filename: &str) {
        self.push(Frame::BackToFile {
            ret_ip,
            ret_proc,
            filename: filename.to_string(),
        });
    }

    // remove_run_return()
    // Called at the end of a script file. Returns None if the end of the main script was reached.
    pub(crate) fn remove_run_return(&mut self) -> Result<Option<(u32, usize)>, StackError> {
        let mut pos = self.frames.len();
        while pos > 0 {
            pos -= 1;
            match &self.frames[pos] {
                Frame::BackToFile {
                    ret_ip, ret_proc, ..
                } => {
                    let result = (*ret_ip, *ret_proc);
                    self.frames.truncate(pos);
                    self.change_counter += 1;
                    return Ok(Some(result));
                }
                Frame::Gosub { label, .. } => {
                    return Err(StackError::MissingReturn {
                        label: label.clone(),
                    });
                }
                Frame::ProcCall { name, .. } => {
                    return Err(StackError::EndOfFileInsideProc { name: name.clone() });
                }
                Frame::EndOfStack => {
                    self.frames.truncate(pos + 1);
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    // find_variable()
    // Search downwards from `from` (exclusive) or the top of the stack for a named entry
    pub(crate) fn find_variable(&self, name: &str, from: Option<usize>) -> Option<usize> {
        let start = from.unwrap_or(self.frames.len()).min(self.frames.len());
        self.frames[..start]
            .iter()
            .enumerate()
            .rev()
            .take_while(|(_, frame)| !frame.is_call_boundary())
            .find(|(_, frame)| match frame {
                Frame::LocalVariable { name: n, .. } | Frame::RefToLocalVariable { name: n, .. } => {
                    n == name
                }
                _ => false,
            })
            .map(|(pos, _)| pos)
    }

    // resolve()
    // Follow a named entry to the frame or external variable that actually holds the value
    pub(crate) fn resolve(&self, pos: usize) -> Result<RefTarget, StackError> {
        match self.frames.get(pos) {
            Some(Frame::LocalVariable { .. }) => Ok(RefTarget::Stack(pos)),
            Some(Frame::RefToLocalVariable { target, name }) => match target {
                RefTarget::External(_) => Ok(*target),
                RefTarget::Stack(target_pos) => match self.frames.get(*target_pos) {
                    Some(Frame::LocalVariable { .. }) => Ok(*target),
                    _ => Err(StackError::InvalidReference {
                        name: name.clone(),
                        position: *target_pos,
                    }),
                },
            },
            _ => Err(StackError::InvalidReference {
                name: String::new(),
                position: pos,
            }),
        }
    }

    pub(crate) fn get_local_variable_value(
        &self,
        name: &str,
        from: Option<usize>,
    ) -> Option<VariableValue> {
        let pos = self.find_variable(name, from)?;
        match self.resolve(pos).ok()? {
            RefTarget::Stack(target) => match &self.frames[target] {
                Frame::LocalVariable { value, .. } => Some(VariableValue::Value(*value)),
                _ => None,
            },
            RefTarget::External(id) => Some(VariableValue::External(id)),
        }
    }

    // set_local_variable()
    // Assign to a visible local variable. If the name is a reference to an external variable, its
    // id is returned and the caller must write the value through the host.
    pub(crate) fn set_local_variable(
        &mut self,
        name: &str,
        value: f64,
    ) -> Result<Option<u64>, StackError> {
        let pos = self
            .find_variable(name, None)
            .ok_or_else(|| StackError::UnknownVariable {
                name: name.to_string(),
            })?;
        match self.resolve(pos)? {
            RefTarget::Stack(target) => {
                if let Some(Frame::LocalVariable { value: v, .. }) = self.frames.get_mut(target) {
                    *v = value;
                }
                self.change_counter += 1;
                Ok(None)
            }
            RefTarget::External(id) => Ok(Some(id)),
        }
    }

    // first_return_ip()
    // The instruction where execution continues after leaving the innermost call
    pub(crate) fn first_return_ip(&self) -> Option<u32> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::ProcCall { ret_ip, .. } | Frame::Gosub { ret_ip, .. } => Some(*ret_ip),
            Frame::BackToFile { ret_ip, .. } => Some(ret_ip + 1),
            _ => None,
        })
    }

    pub(crate) fn view(&self, pos: Option<usize>) -> StackView<'_> {
        StackView { stack: self, pos }
    }

    pub(crate) fn frame_to_string(&self, pos: usize, proc_name: impl Fn(usize) -> String) -> Option<String> {
        let text = match self.frames.get(pos)? {
            Frame::EndOfStack => "SCRIPT_STACK_ENDOF".to_string(),
            Frame::LocalVariable { name, value } => {
                format!("SCRIPT_STACK_LOCAL_VARIABLE Name = \"{name}\" = {value:.6}")
            }
            Frame::RefToLocalVariable { name, target } => match target {
                RefTarget::External(id) => {
                    format!("SCRIPT_STACK_REF_TO_LOCAL_VARIABLE RefName = \"{name}\" points to (VID) {id}")
                }
                RefTarget::Stack(target) => {
                    format!("SCRIPT_STACK_REF_TO_LOCAL_VARIABLE RefName = \"{name}\" points to {target}")
                }
            },
            Frame::EndOfBlock => "SCRIPT_STACK_END_OF_BLOCK".to_string(),
            Frame::ProcCall { ret_proc, name, .. } => format!(
                "SCRIPT_STACK_PROC_CALL \"{name}\" Return to proc = \"{}\" ProcIdx {ret_proc}",
                proc_name(*ret_proc)
            ),
            Frame::Gosub {
                ret_ip,
                atomic_depth,
                label,
            } => format!(
                "SCRIPT_STACK_GOSUB to \"{label}\" Ip = {ret_ip}, AtomicDepth = {atomic_depth}"
            ),
            Frame::BackToFile { filename, .. } => {
                format!("SCRIPT_STACK_BACK_TO_FILE Return to file = \"{filename}\"")
            }
        };
        Some(text)
    }
}

/// The local variables as seen from one stack position
pub(crate) struct StackView<'a> {
    stack: &'a Stack,
    pos: Option<usize>,
}

impl LocalVariables for StackView<'_> {
    fn lookup(&self, name: &str) -> Option<VariableValue> {
        self.stack.get_local_variable_value(name, self.pos)
    }
}
