mod cache;
mod parser;
mod types;

pub(crate) use cache::ExportCache;
pub use parser::ExportEntry;
pub use parser::ExportTable;
