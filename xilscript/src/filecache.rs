use fnv::FnvHashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::ScriptError;
use crate::loader;

/// One loaded script file. The same path is only ever loaded once per run.
#[derive(Debug)]
pub(crate) struct CachedFile {
    pub(crate) filename: PathBuf,
    pub(crate) data: Vec<u8>,
    pub(crate) last_write: Option<SystemTime>,
    pub(crate) ip_start: u32,
    pub(crate) ip_end: u32,
    /// scanned by `USING` at least once
    pub(crate) scanned: bool,
    /// the full parse has started, `ip_start` is valid
    pub(crate) parsed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FileCache {
    files: Vec<CachedFile>,
    index: FnvHashMap<String, usize>,
    changed_counter: u64,
}

// cache_key()
// Windows file systems are case-insensitive, so two spellings of one path must share an entry
fn cache_key(path: &Path) -> String {
    let name = path.to_string_lossy();
    if cfg!(windows) {
        name.to_lowercase()
    } else {
        name.into_owned()
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl FileCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // load_file()
    // Returns the id of the cache entry for the given path, reading the file if it is not cached yet
    pub(crate) fn load_file(&mut self, path: &Path) -> Result<usize, ScriptError> {
        let canonical = path
            .canonicalize()
            .map_err(|ioerror| ScriptError::FileOpenError {
                filename: path.to_path_buf(),
                ioerror,
            })?;
        if let Some(id) = self.lookup(&canonical) {
            return Ok(id);
        }

        let data = loader::load(&canonical)?;
        let id = self.files.len();
        log::debug!("caching script file {} as file {id}", canonical.display());
        self.index.insert(cache_key(&canonical), id);
        self.files.push(CachedFile {
            last_write: modification_time(&canonical),
            filename: canonical,
            data,
            ip_start: 0,
            ip_end: 0,
            scanned: false,
            parsed: false,
        });
        self.changed_counter += 1;
        Ok(id)
    }

    /// Find an already cached file. The path should be canonical.
    pub(crate) fn lookup(&self, path: &Path) -> Option<usize> {
        self.index.get(&cache_key(path)).copied()
    }

    pub(crate) fn get(&self, id: usize) -> Option<&CachedFile> {
        self.files.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> Option<&mut CachedFile> {
        self.changed_counter += 1;
        self.files.get_mut(id)
    }

    pub(crate) fn filename(&self, id: usize) -> String {
        self.files
            .get(id)
            .map(|file| file.filename.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn changed_counter(&self) -> u64 {
        self.changed_counter
    }

    // prepare_new_run()
    // Forget all parse results. Files that were modified on disk since they were cached are read again.
    pub(crate) fn prepare_new_run(&mut self) -> Result<(), ScriptError> {
        for file in &mut self.files {
            let last_write = modification_time(&file.filename);
            if last_write != file.last_write {
                log::debug!("script file {} changed, reloading", file.filename.display());
                file.data = loader::load(&file.filename)?;
                file.last_write = last_write;
            }
            file.ip_start = 0;
            file.ip_end = 0;
            file.scanned = false;
            file.parsed = false;
        }
        self.changed_counter += 1;
        Ok(())
    }
}

/// Read position inside a cached file.
///
/// A backslash that is followed only by whitespace up to the end of the line joins the line with
/// the next one; the leading whitespace of the continuation line is skipped.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    line: u32,
    prev: (usize, u32),
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self::at(data, 0, 1)
    }

    pub(crate) fn at(data: &'a [u8], pos: usize, line: u32) -> Self {
        let pos = pos.min(data.len());
        Self {
            data,
            pos,
            line,
            prev: (pos, line),
        }
    }

    pub(crate) fn getc(&mut self) -> Option<u8> {
        self.prev = (self.pos, self.line);
        loop {
            let c = *self.data.get(self.pos)?;
            self.pos += 1;
            match c {
                b'\n' => {
                    self.line += 1;
                    return Some(c);
                }
                b'\\' => {
                    if !self.skip_continuation() {
                        return Some(c);
                    }
                }
                _ => return Some(c),
            }
        }
    }

    // skip_continuation()
    // Called directly after a backslash. Returns true if the line was continued.
    fn skip_continuation(&mut self) -> bool {
        let mut pos = self.pos;
        while let Some(&c) = self.data.get(pos) {
            if c == b'\n' {
                pos += 1;
                while self.data.get(pos).is_some_and(u8::is_ascii_whitespace) {
                    if self.data[pos] == b'\n' {
                        self.line += 1;
                    }
                    pos += 1;
                }
                self.line += 1;
                self.pos = pos;
                return true;
            } else if c.is_ascii_whitespace() {
                pos += 1;
            } else {
                return false;
            }
        }
        false
    }

    /// Look at the next raw byte without consuming it
    pub(crate) fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Undo the last `getc`. Only one level of undo is supported.
    pub(crate) fn unget(&mut self) {
        (self.pos, self.line) = self.prev;
    }

    pub(crate) fn tell(&self) -> (usize, u32) {
        (self.pos, self.line)
    }

    pub(crate) fn seek(&mut self, pos: usize, line: u32) {
        self.pos = pos.min(self.data.len());
        self.line = line;
        self.prev = (self.pos, line);
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}
