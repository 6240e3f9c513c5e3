use crate::ScriptError;
use crate::cmdtable::InstructionTable;
use crate::filecache::FileCache;
use crate::proc::ProcTable;

/// The parse result of a script: its files, instructions and procedures
#[derive(Debug, Default)]
pub(crate) struct Program {
    pub(crate) files: FileCache,
    pub(crate) instructions: InstructionTable,
    pub(crate) procs: ProcTable,
}

impl Program {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // reset()
    // Drop the parse result of the last run. Cached files are kept, but read again if they changed.
    pub(crate) fn reset(&mut self) -> Result<(), ScriptError> {
        self.instructions.clear();
        self.procs.reset();
        self.files.prepare_new_run()
    }

    pub(crate) fn filename(&self, file: usize) -> String {
        self.files.filename(file)
    }

    /// Filename and line of an instruction
    pub(crate) fn location(&self, ip: u32) -> Option<(String, u32)> {
        let instruction = self.instructions.get(ip)?;
        Some((self.files.filename(instruction.file), instruction.line))
    }

    /// First and last ip of a completely parsed file
    pub(crate) fn file_ip_range(&self, file: usize) -> Option<(u32, u32)> {
        let cached = self.files.get(file)?;
        cached.parsed.then_some((cached.ip_start, cached.ip_end))
    }
}
