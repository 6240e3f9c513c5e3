use fnv::FnvHashMap;

use crate::labels::LabelTable;
use crate::scope::ScopeTree;

/// The top level code of all script files runs as procedure 0
pub(crate) const MAIN_PROC: usize = 0;
pub(crate) const MAIN_PROC_NAME: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcParam {
    pub(crate) name: String,
    /// declared with a leading `*`, the caller passes `&variable`
    pub(crate) by_ref: bool,
}

impl ProcParam {
    pub(crate) fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.strip_prefix('*') {
            Some(name) => Self {
                name: name.trim().to_string(),
                by_ref: true,
            },
            None => Self {
                name: text.to_string(),
                by_ref: false,
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct Proc {
    pub(crate) name: String,
    pub(crate) params: Vec<ProcParam>,
    /// the body has been parsed, `ip` is valid
    pub(crate) defined: bool,
    /// ip of the DEF_PROC command
    pub(crate) ip: u32,
    pub(crate) file: usize,
    pub(crate) line: u32,
    pub(crate) scopes: ScopeTree,
    pub(crate) labels: LabelTable,
}

impl Proc {
    fn new(name: &str, params: Vec<ProcParam>, file: usize, line: u32) -> Self {
        Self {
            name: name.to_string(),
            params,
            defined: false,
            ip: 0,
            file,
            line,
            scopes: ScopeTree::new(),
            labels: LabelTable::new(),
        }
    }
}

/// All procedures of a script, including the main procedure at index 0
#[derive(Debug)]
pub(crate) struct ProcTable {
    procs: Vec<Proc>,
    names: FnvHashMap<String, usize>,
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcTable {
    pub(crate) fn new() -> Self {
        let mut main = Proc::new(MAIN_PROC_NAME, Vec::new(), 0, 0);
        main.defined = true;
        Self {
            procs: vec![main],
            names: FnvHashMap::default(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    // declare()
    // Make a procedure known, either from its DEF_PROC or from a USING scan.
    // Returns the existing procedure as error if the name is already taken.
    pub(crate) fn declare(
        &mut self,
        name: &str,
        params: Vec<ProcParam>,
        file: usize,
        line: u32,
    ) -> Result<usize, &Proc> {
        if let Some(&idx) = self.names.get(name) {
            return Err(&self.procs[idx]);
        }
        let idx = self.procs.len();
        self.names.insert(name.to_string(), idx);
        self.procs.push(Proc::new(name, params, file, line));
        Ok(idx)
    }

    pub(crate) fn find(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&Proc> {
        self.procs.get(idx)
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut Proc> {
        self.procs.get_mut(idx)
    }

    pub(crate) fn name(&self, idx: usize) -> String {
        self.procs
            .get(idx)
            .map(|proc| proc.name.clone())
            .unwrap_or_default()
    }
}
