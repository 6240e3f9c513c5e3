use fnv::FnvHashMap;

/// Named lists of parameters which can be spliced into the parameters of any command with `$[name]`
#[derive(Debug, Default)]
pub(crate) struct ParamLists {
    lists: FnvHashMap<String, Vec<String>>,
}

impl ParamLists {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&[String]> {
        self.lists.get(name).map(Vec::as_slice)
    }

    /// Create a new list. Returns false if a list with this name already exists.
    pub(crate) fn define(&mut self, name: &str, params: &[String]) -> bool {
        if self.lists.contains_key(name) {
            return false;
        }
        self.lists.insert(name.to_string(), params.to_vec());
        true
    }

    /// Append parameters to an existing list. Returns false if the list does not exist.
    pub(crate) fn add(&mut self, name: &str, params: &[String]) -> bool {
        match self.lists.get_mut(name) {
            Some(list) => {
                list.extend_from_slice(params);
                true
            }
            None => false,
        }
    }

    /// Remove every entry that is equal to one of the given parameters
    pub(crate) fn remove(&mut self, name: &str, params: &[String]) -> bool {
        match self.lists.get_mut(name) {
            Some(list) => {
                list.retain(|item| !params.contains(item));
                true
            }
            None => false,
        }
    }

    pub(crate) fn undefine(&mut self, name: &str) -> bool {
        self.lists.remove(name).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.lists.clear();
    }

    // describe()
    // All list names, quoted and comma separated, for the debugger
    pub(crate) fn describe(&self) -> String {
        let mut names: Vec<&String> = self.lists.keys().collect();
        names.sort();
        names
            .iter()
            .map(|name| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(",")
    }
}
