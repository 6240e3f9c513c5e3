use fnv::FnvHashMap;

/// A jump target `:name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Label {
    pub(crate) name: String,
    pub(crate) file: usize,
    pub(crate) line: u32,
    /// the instruction behind the label
    pub(crate) ip: u32,
    pub(crate) scope: Option<usize>,
    pub(crate) atomic_depth: u32,
}

/// A `GOTO` or `GOSUB` (or the jump of a `WAIT_UNTIL` timeout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Goto {
    pub(crate) name: String,
    pub(crate) file: usize,
    pub(crate) line: u32,
    pub(crate) ip: u32,
    pub(crate) scope: Option<usize>,
    pub(crate) atomic_depth: u32,
    /// the label name contains environment variables and is only known at run time
    pub(crate) dynamic: bool,
    pub(crate) label: Option<usize>,
}

/// Labels and jumps of one procedure. Labels are local to the file they are defined in.
#[derive(Debug, Default)]
pub(crate) struct LabelTable {
    labels: Vec<Label>,
    index: FnvHashMap<(usize, String), usize>,
    gotos: Vec<Goto>,
}

impl LabelTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a label. A label with the same name in the same file is returned as error.
    pub(crate) fn add_label(&mut self, label: Label) -> Result<usize, &Label> {
        let key = (label.file, label.name.clone());
        if let Some(&existing) = self.index.get(&key) {
            return Err(&self.labels[existing]);
        }
        let idx = self.labels.len();
        self.index.insert(key, idx);
        self.labels.push(label);
        Ok(idx)
    }

    pub(crate) fn find_label(&self, file: usize, name: &str) -> Option<&Label> {
        self.index
            .get(&(file, name.to_string()))
            .map(|idx| &self.labels[*idx])
    }

    pub(crate) fn label(&self, idx: usize) -> Option<&Label> {
        self.labels.get(idx)
    }

    pub(crate) fn add_goto(&mut self, goto: Goto) -> usize {
        self.gotos.push(goto);
        self.gotos.len() - 1
    }

    pub(crate) fn goto(&self, idx: usize) -> Option<&Goto> {
        self.gotos.get(idx)
    }

    // resolve_gotos()
    // Bind every open jump of the given file (or of all files) to its label.
    // The first jump without a label is returned as error.
    pub(crate) fn resolve_gotos(&mut self, file: Option<usize>) -> Result<(), Goto> {
        for goto in &mut self.gotos {
            if goto.label.is_some() || goto.dynamic || file.is_some_and(|file| goto.file != file) {
                continue;
            }
            match self.index.get(&(goto.file, goto.name.clone())) {
                Some(idx) => goto.label = Some(*idx),
                None => return Err(goto.clone()),
            }
        }
        Ok(())
    }
}
