//! The interfaces to external backends.
//!
//! `callsym` does not parse any debug-info format itself. Instead, it
//! drives a [`SymbolProvider`], which hands out one [`Session`] per
//! module. Sessions are owned by exactly one worker thread and dropped
//! once that worker is done with its share of a run.
//!
//! Similarly, event-trace files are decoded by a [`TraceSource`].

use std::fmt::Debug;
use std::path::PathBuf;

use crate::Addr;
use crate::Result;


/// The kind of symbol to look up.
///
/// Lookups are attempted in the order the variants are declared in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymKind {
    /// A block-scoped symbol. Providers report the scope enclosing the
    /// block as [`ResolvedSym::parent`].
    Block,
    /// A function symbol.
    Function,
    /// A public (exported or linker-visible) symbol.
    Public,
}

impl SymKind {
    /// All kinds, in lookup order.
    pub const LOOKUP_ORDER: [SymKind; 3] = [SymKind::Block, SymKind::Function, SymKind::Public];
}


/// Source code location information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeInfo {
    /// The source file, as recorded in the debug information.
    pub file: String,
    /// The line number.
    pub line: u32,
}


/// A symbol as reported by a [`Session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSym {
    /// The symbol's name.
    pub name: String,
    /// The offset of the looked up address from the symbol's start.
    pub displacement: u64,
    /// The kind of symbol that matched.
    pub kind: SymKind,
    /// Source code location of the looked up address, if known.
    pub code_info: Option<CodeInfo>,
    /// The lexical parent of a [`SymKind::Block`] symbol: another block,
    /// or the function or public symbol containing it. Its displacement
    /// is relative to the same looked up address.
    pub parent: Option<Box<ResolvedSym>>,
}

impl ResolvedSym {
    /// Walk up the parents of a block-scoped symbol until reaching the
    /// enclosing function or public symbol.
    ///
    /// Returns `None` for a block without such an ancestor.
    pub(crate) fn into_enclosing(self) -> Option<ResolvedSym> {
        let mut sym = self;
        while sym.kind == SymKind::Block {
            let code_info = sym.code_info;
            sym = *sym.parent?;
            sym.code_info = sym.code_info.or(code_info);
        }
        Some(sym)
    }
}


/// A function inlined at a given address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlinedFn {
    /// The name of the inlined function.
    pub name: String,
    /// The offset of the looked up address from the inlined code's
    /// start.
    pub displacement: u64,
    /// Source code location of the inlined call, if known.
    pub code_info: Option<CodeInfo>,
}


/// Debug-info identity of a module, as found in the input alongside
/// the call stacks themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInfo {
    /// The module name, without extension.
    pub module: String,
    /// The name of the debug-info file (e.g., `sqldk.pdb`).
    pub pdb: String,
    /// The debug-info identity, a GUID.
    pub guid: String,
    /// The debug-info age.
    pub age: u32,
}


/// A symbol lookup session for a single module.
pub trait Session: Debug {
    /// Find the symbol of the given kind covering `rva`.
    fn find_sym(&self, rva: Addr, kind: SymKind) -> Result<Option<ResolvedSym>>;

    /// Find the relative virtual addresses of all symbols named `name`.
    fn find_addrs(&self, name: &str) -> Result<Vec<Addr>>;

    /// Retrieve the functions inlined at `rva`, outermost first.
    fn inlined_at(&self, rva: Addr) -> Result<Vec<InlinedFn>>;

    /// Check whether the module's debug information carries any source
    /// code location information.
    fn has_code_info(&self) -> bool;
}


/// A source of debug symbols.
pub trait SymbolProvider: Debug + Send + Sync {
    /// Open a session for `module`, locating its debug information in
    /// `search_paths`.
    ///
    /// `Ok(None)` signals that no debug information is available for
    /// the module. Frames referencing it are passed through.
    fn load(
        &self,
        module: &str,
        search_paths: &[PathBuf],
        recursive: bool,
    ) -> Result<Option<Box<dyn Session>>>;

    /// Hand module identity information found in the input to the
    /// provider, before any session gets loaded.
    fn prepare(&self, modules: &[ModuleInfo]) -> Result<()> {
        let _modules = modules;
        Ok(())
    }
}



/// A decoder of event-trace files recording call stacks.
pub trait TraceSource: Debug {
    /// Decode the call stacks recorded in `files`.
    ///
    /// If `bucketize` is set, identical call stacks are merged into a
    /// histogram of call stacks. Otherwise every recorded call stack is
    /// reported as an event of its own. Returns the number of call
    /// stacks (slots or events, respectively) along with their XML
    /// rendition.
    fn ingest(&self, files: &[PathBuf], bucketize: bool) -> Result<(usize, String)>;
}
