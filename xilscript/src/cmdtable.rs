/// One parsed command. The parameters are not stored, the command is tokenized again from
/// `offset` when it is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub(crate) cmd: usize,
    pub(crate) file: usize,
    pub(crate) offset: usize,
    pub(crate) line: u32,
    /// jump target or table index, depending on the command
    pub(crate) opt: u32,
    pub(crate) reserved: u32,
}

/// All instructions of a script and of every file it calls, indexed by ip
#[derive(Debug, Default)]
pub(crate) struct InstructionTable {
    instructions: Vec<Instruction>,
}

impl InstructionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.instructions.clear();
    }

    /// The ip that the next pushed instruction will get
    pub(crate) fn next_ip(&self) -> u32 {
        u32::try_from(self.instructions.len()).unwrap_or(u32::MAX)
    }

    pub(crate) fn len(&self) -> usize {
        self.instructions.len()
    }

    pub(crate) fn push(&mut self, instruction: Instruction) -> u32 {
        let ip = self.next_ip();
        self.instructions.push(instruction);
        ip
    }

    pub(crate) fn get(&self, ip: u32) -> Option<&Instruction> {
        self.instructions.get(ip as usize)
    }

    pub(crate) fn set_opt(&mut self, ip: u32, opt: u32) {
        if let Some(instruction) = self.instructions.get_mut(ip as usize) {
            instruction.opt = opt;
        }
    }

    pub(crate) fn set_reserved(&mut self, ip: u32, reserved: u32) {
        if let Some(instruction) = self.instructions.get_mut(ip as usize) {
            instruction.reserved = reserved;
        }
    }

    // find_ip()
    // The first instruction of a file at or behind the given line. Breakpoints on empty lines or
    // comments move to the next command.
    pub(crate) fn find_ip(&self, file: usize, line: u32, ip_start: u32, ip_end: u32) -> Option<u32> {
        (ip_start..=ip_end)
            .filter_map(|ip| self.get(ip).map(|instruction| (ip, instruction)))
            .filter(|(_, instruction)| instruction.file == file && instruction.line >= line)
            .min_by_key(|(ip, instruction)| (instruction.line, *ip))
            .map(|(ip, _)| ip)
    }
}
