//! **callsym** turns textual call stacks, as found in crash dumps and
//! diagnostic event traces, into symbolized ones.
//!
//! Frames come in many shapes: module relative addresses
//! (`sqldk.dll+0x40609`), absolute addresses (`0x10042249f`), exports
//! referenced by ordinal (`sqlmin!Ordinal298+0x4A5`), or XML frame
//! rows. All of them are first normalized into `module+RVA` form,
//! using a module base address listing and the export tables of module
//! images where necessary, and then resolved by a [`SymbolProvider`].
//!
//! Inputs may contain many call stacks, e.g., a histogram of call
//! stacks or a stream of events each carrying one. Call stacks are
//! resolved concurrently and reported in input order.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use callsym::SymbolProvider;
//! use callsym::Resolution;
//! use callsym::ResolveOpts;
//! use callsym::StackResolver;
//!
//! # fn provider() -> Arc<dyn SymbolProvider> { unimplemented!() }
//! let resolver = StackResolver::builder()
//!     .set_search_paths(["C:\\symbols"])
//!     .build(provider());
//! let opts = ResolveOpts::default();
//! match resolver.resolve("sqldk.dll+0x40609", &opts).unwrap() {
//!     Resolution::Complete(text) => println!("{text}"),
//!     other => eprintln!("resolution failed: {other:?}"),
//! }
//! ```

use std::result;

mod error;
mod frame;
mod input;
mod log;
mod mmap;
mod output;
mod pe;
mod provider;
mod registry;
mod resolve;
mod resolver;
#[cfg(any(test, feature = "test"))]
mod test_helper;
mod util;


pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoCowStr;
pub use crate::error::IntoError;
pub use crate::frame::Frame;
pub use crate::input::classify;
pub use crate::input::CallStackUnit;
pub use crate::input::Classification;
pub use crate::output::INCONSISTENT_MARKER;
pub use crate::pe::ExportEntry;
pub use crate::pe::ExportTable;
pub use crate::provider::CodeInfo;
pub use crate::provider::InlinedFn;
pub use crate::provider::ModuleInfo;
pub use crate::provider::ResolvedSym;
pub use crate::provider::Session;
pub use crate::provider::SymKind;
pub use crate::provider::SymbolProvider;
pub use crate::provider::TraceSource;
pub use crate::registry::ModuleRange;
pub use crate::registry::ModuleRegistry;
pub use crate::resolve::ProgressFn;
pub use crate::resolve::RunControl;
pub use crate::resolver::Builder;
pub use crate::resolver::Resolution;
pub use crate::resolver::ResolveOpts;
pub use crate::resolver::StackResolver;


/// A type representing addresses.
pub type Addr = u64;

/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = result::Result<T, E>;


#[cfg(feature = "test")]
#[doc(hidden)]
pub mod __private {
    pub use crate::test_helper::*;
}
