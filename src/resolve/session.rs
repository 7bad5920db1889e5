use std::collections::HashMap;
use std::path::PathBuf;

use crate::log::debug;
use crate::log::warn;
use crate::Session;
use crate::SymbolProvider;


/// The symbol provider sessions owned by a single worker.
///
/// Sessions are opened on first use and closed when the map is
/// dropped. Modules without debug information are remembered as such
/// and not retried for the remainder of the run.
#[derive(Debug)]
pub(crate) struct Sessions<'run> {
    provider: &'run dyn SymbolProvider,
    search_paths: &'run [PathBuf],
    recursive: bool,
    sessions: HashMap<String, Option<Box<dyn Session>>>,
}

impl<'run> Sessions<'run> {
    pub fn new(
        provider: &'run dyn SymbolProvider,
        search_paths: &'run [PathBuf],
        recursive: bool,
    ) -> Self {
        Self {
            provider,
            search_paths,
            recursive,
            sessions: HashMap::new(),
        }
    }

    /// Retrieve the session for `module`, loading it if necessary.
    pub fn get(&mut self, module: &str) -> Option<&dyn Session> {
        let key = module.to_ascii_lowercase();
        let provider = self.provider;
        let search_paths = self.search_paths;
        let recursive = self.recursive;

        self.sessions
            .entry(key)
            .or_insert_with(|| match provider.load(module, search_paths, recursive) {
                Ok(Some(session)) => {
                    debug!("loaded debug information for `{module}`");
                    Some(session)
                }
                Ok(None) => {
                    warn!("no debug information available for `{module}`");
                    None
                }
                Err(err) => {
                    warn!("failed to load debug information for `{module}`: {err:#}");
                    None
                }
            })
            .as_deref()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
