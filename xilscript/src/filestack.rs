/// Where parsing continues after a file that was opened by `USING` has been scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReturnPosition {
    pub(crate) file: usize,
    pub(crate) offset: usize,
    pub(crate) line: u32,
    pub(crate) using_mode: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FileStack {
    positions: Vec<ReturnPosition>,
}

impl FileStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, position: ReturnPosition) {
        self.positions.push(position);
    }

    pub(crate) fn pop(&mut self) -> Option<ReturnPosition> {
        self.positions.pop()
    }

    pub(crate) fn contains(&self, file: usize) -> bool {
        self.positions.iter().any(|position| position.file == file)
    }
}

/// A file that still has to be parsed completely
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToParse {
    pub(crate) file: usize,
    /// RUN and CALL commands that jump to the start of this file
    pub(crate) run_sites: Vec<u32>,
}

/// Files are parsed one after another in the order they were referenced
#[derive(Debug, Default)]
pub(crate) struct ToParseQueue {
    entries: Vec<ToParse>,
    next: usize,
}

impl ToParseQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn find_pending(&mut self, file: usize) -> Option<&mut ToParse> {
        self.entries[self.next..]
            .iter_mut()
            .find(|entry| entry.file == file)
    }

    pub(crate) fn is_queued(&self, file: usize) -> bool {
        self.entries[self.next..]
            .iter()
            .any(|entry| entry.file == file)
    }

    // enqueue()
    // Queue a file, optionally together with the RUN command that needs its start ip
    pub(crate) fn enqueue(&mut self, file: usize, run_site: Option<u32>) {
        if let Some(entry) = self.find_pending(file) {
            entry.run_sites.extend(run_site);
            return;
        }
        self.entries.push(ToParse {
            file,
            run_sites: run_site.into_iter().collect(),
        });
    }

    pub(crate) fn next_file(&mut self) -> Option<ToParse> {
        let entry = self.entries.get(self.next)?.clone();
        self.next += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_order() {
        let mut queue = ToParseQueue::new();
        queue.enqueue(3, Some(10));
        queue.enqueue(4, None);
        queue.enqueue(3, Some(12));
        assert!(queue.is_queued(4));
        assert_eq!(
            queue.next_file(),
            Some(ToParse {
                file: 3,
                run_sites: vec![10, 12]
            })
        );
        assert!(!queue.is_queued(3));
        assert_eq!(queue.next_file().unwrap().file, 4);
        assert_eq!(queue.next_file(), None);
    }

    #[test]
    fn return_positions() {
        let mut stack = FileStack::new();
        stack.push(ReturnPosition {
            file: 0,
            offset: 17,
            line: 2,
            using_mode: false,
        });
        assert!(stack.contains(0));
        assert!(!stack.contains(1));
        assert_eq!(stack.pop().unwrap().offset, 17);
        assert_eq!(stack.pop(), None);
    }
}
