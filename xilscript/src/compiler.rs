use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StructureError {
    #[error("expecting an {expected} and not an {found} ({opener} started at line {line})")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
        opener: &'static str,
        line: u32,
    },

    #[error("there is no corresponding {opener}")]
    NoOpener { opener: &'static str },

    #[error("missing IF or ELSEIF for that {found}")]
    MissingIf { found: &'static str },

    #[error("no corresponding WHILE for this BREAK found")]
    BreakOutsideWhile,

    #[error("expecting an {expected} and not end of file ({opener} started at line {line})")]
    EndOfFile {
        expected: &'static str,
        opener: &'static str,
        line: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    ElseIf,
    Else,
    While,
    Atomic,
    DefProc,
    DefLocals,
}

impl BlockKind {
    fn opener(self) -> &'static str {
        match self {
            BlockKind::If => "IF",
            BlockKind::ElseIf => "ELSEIF",
            BlockKind::Else => "ELSE",
            BlockKind::While => "WHILE",
            BlockKind::Atomic => "ATOMIC",
            BlockKind::DefProc => "DEF_PROC",
            BlockKind::DefLocals => "DEF_LOCALS",
        }
    }

    fn closer(self) -> &'static str {
        match self {
            BlockKind::If | BlockKind::ElseIf | BlockKind::Else => "ENDIF",
            BlockKind::While => "ENDWHILE",
            BlockKind::Atomic => "END_ATOMIC",
            BlockKind::DefProc => "END_DEF_PROC",
            BlockKind::DefLocals => "END_DEF_LOCALS",
        }
    }

    fn is_if(self) -> bool {
        matches!(self, BlockKind::If | BlockKind::ElseIf | BlockKind::Else)
    }
}

/// An open block
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockNode {
    pub(crate) kind: BlockKind,
    pub(crate) ip: u32,
    pub(crate) line: u32,
    /// IF chains: the ips of all ELSEIF and ELSE commands. WHILE: the ips of all BREAK commands.
    pub(crate) branches: Vec<u32>,
}

impl BlockNode {
    fn mismatch(&self, found: &'static str) -> StructureError {
        StructureError::Mismatch {
            expected: self.kind.closer(),
            found,
            opener: self.kind.opener(),
            line: self.line,
        }
    }
}

/// Blocks that a BREAK leaves on its way to the end of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BreakUnwind {
    pub(crate) def_locals: u32,
    pub(crate) atomics: u32,
}

impl BreakUnwind {
    pub(crate) fn encode(self) -> u32 {
        (self.def_locals << 16) | (self.atomics & 0xffff)
    }

    pub(crate) fn decode(value: u32) -> Self {
        Self {
            def_locals: value >> 16,
            atomics: value & 0xffff,
        }
    }
}

/// The stack of blocks that are open while one file is parsed.
///
/// Every opener pushes a node and every closer pops it again. In non-strict atomic mode an
/// `ATOMIC` without `END_ATOMIC` only produces a warning.
#[derive(Debug, Default)]
pub(crate) struct Compiler {
    stack: Vec<BlockNode>,
    strict_atomic: bool,
    warnings: Vec<StructureError>,
}

impl Compiler {
    pub(crate) fn new(strict_atomic: bool) -> Self {
        Self {
            stack: Vec::new(),
            strict_atomic,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.stack.clear();
        self.warnings.clear();
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<StructureError> {
        std::mem::take(&mut self.warnings)
    }

    fn push(&mut self, kind: BlockKind, ip: u32, line: u32, branches: Vec<u32>) {
        self.stack.push(BlockNode {
            kind,
            ip,
            line,
            branches,
        });
    }

    // pop_matching()
    // Remove the innermost block, which must be accepted by the closer `found`
    fn pop_matching(
        &mut self,
        found: &'static str,
        opener: &'static str,
        accept: impl Fn(BlockKind) -> bool,
    ) -> Result<BlockNode, StructureError> {
        loop {
            let Some(node) = self.stack.pop() else {
                return Err(StructureError::NoOpener { opener });
            };
            if accept(node.kind) {
                return Ok(node);
            }
            let error = node.mismatch(found);
            if node.kind == BlockKind::Atomic && !self.strict_atomic {
                // the unterminated ATOMIC is dropped
                self.warnings.push(error);
                continue;
            }
            self.stack.push(node);
            return Err(error);
        }
    }

    pub(crate) fn add_if(&mut self, ip: u32, line: u32) {
        self.push(BlockKind::If, ip, line, Vec::new());
    }

    // add_else_if()
    // Returns the IF or ELSEIF whose false branch continues at this ELSEIF
    pub(crate) fn add_else_if(&mut self, ip: u32, line: u32) -> Result<u32, StructureError> {
        self.add_branch(BlockKind::ElseIf, ip, line)
    }

    pub(crate) fn add_else(&mut self, ip: u32, line: u32) -> Result<u32, StructureError> {
        self.add_branch(BlockKind::Else, ip, line)
    }

    fn add_branch(&mut self, kind: BlockKind, ip: u32, line: u32) -> Result<u32, StructureError> {
        match self.stack.last() {
            Some(node) if matches!(node.kind, BlockKind::If | BlockKind::ElseIf) => {}
            _ => {
                return Err(StructureError::MissingIf {
                    found: kind.opener(),
                });
            }
        }
        let Some(prev) = self.stack.pop() else {
            return Err(StructureError::MissingIf {
                found: kind.opener(),
            });
        };
        let mut branches = prev.branches;
        branches.push(ip);
        self.push(kind, ip, line, branches);
        Ok(prev.ip)
    }

    pub(crate) fn end_if(&mut self) -> Result<BlockNode, StructureError> {
        self.pop_matching("ENDIF", "IF or ELSE", BlockKind::is_if)
    }

    pub(crate) fn add_while(&mut self, ip: u32, line: u32) {
        self.push(BlockKind::While, ip, line, Vec::new());
    }

    // add_break()
    // A BREAK belongs to the innermost WHILE of the same procedure
    pub(crate) fn add_break(&mut self, ip: u32) -> Result<BreakUnwind, StructureError> {
        let mut unwind = BreakUnwind::default();
        for node in self.stack.iter_mut().rev() {
            match node.kind {
                BlockKind::While => {
                    node.branches.push(ip);
                    return Ok(unwind);
                }
                BlockKind::DefProc => break,
                BlockKind::DefLocals => unwind.def_locals += 1,
                BlockKind::Atomic => unwind.atomics += 1,
                _ => {}
            }
        }
        Err(StructureError::BreakOutsideWhile)
    }

    pub(crate) fn end_while(&mut self) -> Result<BlockNode, StructureError> {
        self.pop_matching("ENDWHILE", "WHILE", |kind| kind == BlockKind::While)
    }

    pub(crate) fn add_atomic(&mut self, ip: u32, line: u32) {
        self.push(BlockKind::Atomic, ip, line, Vec::new());
    }

    // end_atomic()
    // In non-strict mode an END_ATOMIC inside of an IF chain is ignored with a warning and the
    // IF node stays open unchanged
    pub(crate) fn end_atomic(&mut self) -> Result<(), StructureError> {
        match self.stack.last() {
            None => Err(StructureError::NoOpener { opener: "ATOMIC" }),
            Some(node) if node.kind == BlockKind::Atomic => {
                self.stack.pop();
                Ok(())
            }
            Some(node) if node.kind.is_if() && !self.strict_atomic => {
                self.warnings.push(node.mismatch("END_ATOMIC"));
                Ok(())
            }
            Some(node) => Err(node.mismatch("END_ATOMIC")),
        }
    }

    pub(crate) fn add_def_proc(&mut self, ip: u32, line: u32) {
        self.push(BlockKind::DefProc, ip, line, Vec::new());
    }

    pub(crate) fn end_def_proc(&mut self) -> Result<BlockNode, StructureError> {
        self.pop_matching("END_DEF_PROC", "DEF_PROC", |kind| {
            kind == BlockKind::DefProc
        })
    }

    pub(crate) fn add_def_locals(&mut self, ip: u32, line: u32) {
        self.push(BlockKind::DefLocals, ip, line, Vec::new());
    }

    pub(crate) fn end_def_locals(&mut self) -> Result<BlockNode, StructureError> {
        self.pop_matching("END_DEF_LOCALS", "DEF_LOCALS", |kind| {
            kind == BlockKind::DefLocals
        })
    }

    /// Number of open ATOMIC blocks
    pub(crate) fn atomic_depth(&self) -> u32 {
        let count = self
            .stack
            .iter()
            .filter(|node| node.kind == BlockKind::Atomic)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Line of the innermost open ATOMIC
    pub(crate) fn atomic_line(&self) -> Option<u32> {
        self.stack
            .iter()
            .rev()
            .find(|node| node.kind == BlockKind::Atomic)
            .map(|node| node.line)
    }

    pub(crate) fn inside_def_proc(&self) -> bool {
        self.stack.iter().any(|node| node.kind == BlockKind::DefProc)
    }

    // end_of_file()
    // All blocks must be closed at the end of a file
    pub(crate) fn end_of_file(&mut self) -> Result<(), StructureError> {
        while let Some(node) = self.stack.pop() {
            let error = StructureError::EndOfFile {
                expected: node.kind.closer(),
                opener: node.kind.opener(),
                line: node.line,
            };
            if node.kind == BlockKind::Atomic && !self.strict_atomic {
                self.warnings.push(error);
            } else {
                self.stack.clear();
                return Err(error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn if_chain() {
        let mut compiler = Compiler::new(true);
        compiler.add_if(0, 1);
        assert_eq!(compiler.add_else_if(2, 3), Ok(0));
        assert_eq!(compiler.add_else(4, 5), Ok(2));
        let node = compiler.end_if().unwrap();
        assert_eq!(node.kind, BlockKind::Else);
        assert_eq!(node.branches, vec![2, 4]);
        assert_eq!(compiler.end_of_file(), Ok(()));

        assert_eq!(
            compiler.add_else(7, 8),
            Err(StructureError::MissingIf { found: "ELSE" })
        );
    }

    #[test]
    fn mismatch_names_the_opener() {
        let mut compiler = Compiler::new(true);
        compiler.add_if(0, 1);
        let error = compiler.end_while().unwrap_err();
        assert_eq!(
            error.to_string(),
            "expecting an ENDIF and not an ENDWHILE (IF started at line 1)"
        );
        let error = compiler.end_of_file().unwrap_err();
        assert_eq!(
            error.to_string(),
            "expecting an ENDIF and not end of file (IF started at line 1)"
        );
        assert_eq!(
            compiler.end_def_locals(),
            Err(StructureError::NoOpener {
                opener: "DEF_LOCALS"
            })
        );
    }

    #[test]
    fn break_unwind() {
        let mut compiler = Compiler::new(true);
        compiler.add_while(0, 1);
        compiler.add_def_locals(1, 2);
        compiler.add_atomic(2, 3);
        let unwind = compiler.add_break(3).unwrap();
        assert_eq!(
            unwind,
            BreakUnwind {
                def_locals: 1,
                atomics: 1
            }
        );
        assert_eq!(BreakUnwind::decode(unwind.encode()), unwind);
        compiler.end_atomic().unwrap();
        compiler.end_def_locals().unwrap();
        let node = compiler.end_while().unwrap();
        assert_eq!(node.branches, vec![3]);

        compiler.add_while(10, 11);
        compiler.add_def_proc(11, 12);
        assert_eq!(compiler.add_break(12), Err(StructureError::BreakOutsideWhile));
    }

    #[test]
    fn non_strict_atomic() {
        let mut compiler = Compiler::new(false);
        compiler.add_if(0, 1);
        compiler.add_else_if(1, 2).unwrap();
        compiler.add_atomic(2, 3);
        // the ATOMIC is dropped, the branch list of the ELSEIF survives
        let node = compiler.end_if().unwrap();
        assert_eq!(node.kind, BlockKind::ElseIf);
        assert_eq!(node.branches, vec![1]);
        assert_eq!(compiler.take_warnings().len(), 1);

        compiler.add_atomic(5, 6);
        compiler.add_if(6, 7);
        compiler.add_else(7, 8).unwrap();
        compiler.end_atomic().unwrap();
        assert_eq!(compiler.take_warnings().len(), 1);
        let node = compiler.end_if().unwrap();
        assert_eq!(node.branches, vec![7]);
        assert_eq!(compiler.atomic_depth(), 1);
        assert_eq!(compiler.end_of_file(), Ok(()));
        assert_eq!(compiler.take_warnings().len(), 1);
    }

    #[test]
    fn strict_atomic() {
        let mut compiler = Compiler::new(true);
        compiler.add_while(0, 1);
        compiler.add_atomic(1, 2);
        assert_eq!(compiler.atomic_line(), Some(2));
        let error = compiler.end_while().unwrap_err();
        assert_eq!(
            error,
            StructureError::Mismatch {
                expected: "END_ATOMIC",
                found: "ENDWHILE",
                opener: "ATOMIC",
                line: 2
            }
        );
        assert!(compiler.end_of_file().is_err());
    }
}
