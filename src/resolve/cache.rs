use std::collections::HashMap;

use parking_lot::RwLock;

use crate::Addr;


/// A cache of formatted resolution results, keyed by module and
/// relative virtual address.
///
/// Module names are case sensitive: cached text embeds the module name
/// as spelled by the frame it was produced for.
///
/// The cache lives for a single run and never evicts. Concurrent
/// computation of the same entry is tolerated: results are a pure
/// function of the debug information, so the last writer wins without
/// changing anything.
#[derive(Debug, Default)]
pub(crate) struct ResolutionCache {
    entries: RwLock<HashMap<(String, Addr), String>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str, rva: Addr) -> Option<String> {
        let key = (module.to_string(), rva);
        self.entries.read().get(&key).cloned()
    }

    pub fn insert(&self, module: &str, rva: Addr, text: String) {
        let key = (module.to_string(), rva);
        let _prev = self.entries.write().insert(key, text);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
