use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::log::debug;
use crate::log::warn;
use crate::util::find_file;

use super::ExportTable;


/// File extensions tried, in order, when looking for a module's image.
const IMAGE_EXTENSIONS: [&str; 3] = ["dll", "exe", "sys"];


/// The export table of a single module, loaded on first use.
type Slot = Arc<OnceLock<Option<Arc<ExportTable>>>>;


/// A cache of export tables, keyed by (case-insensitive) module name.
///
/// Failures to locate or parse an image are remembered as well, so that
/// every module is looked up at most once over the lifetime of the
/// cache. The map lock is only held to find a module's slot; images are
/// located and parsed outside of it.
#[derive(Debug, Default)]
pub(crate) struct ExportCache {
    tables: Mutex<HashMap<String, Slot>>,
}

impl ExportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the export table for `module`, locating its image in
    /// one of the provided search paths on first use.
    pub fn find(
        &self,
        module: &str,
        search_paths: &[PathBuf],
        recursive: bool,
    ) -> Option<Arc<ExportTable>> {
        let slot = Arc::clone(
            self.tables
                .lock()
                .entry(module.to_ascii_lowercase())
                .or_default(),
        );
        slot.get_or_init(|| Self::load(module, search_paths, recursive))
            .clone()
    }

    fn load(module: &str, search_paths: &[PathBuf], recursive: bool) -> Option<Arc<ExportTable>> {
        let names = IMAGE_EXTENSIONS
            .iter()
            .map(|ext| format!("{module}.{ext}"))
            .collect::<Vec<_>>();

        let path = match find_file(search_paths, &names, recursive) {
            Some(path) => path,
            None => {
                warn!("no image for module `{module}` found in search paths");
                return None
            }
        };

        match ExportTable::open(&path) {
            Ok(table) => {
                debug!(
                    "loaded {} exports for `{module}` from {}",
                    table.len(),
                    path.display()
                );
                Some(Arc::new(table))
            }
            Err(err) => {
                warn!("failed to read exports of `{module}`: {err:#}");
                None
            }
        }
    }
}
