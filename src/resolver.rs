use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::input::classify;
use crate::input::extract_module_info;
use crate::input::Classification;
use crate::log::debug;
use crate::log::info;
use crate::log::warn;
use crate::output::assemble;
use crate::output::Assembled;
use crate::pe::ExportCache;
use crate::registry::parse_listing;
use crate::resolve::ProgressFn;
use crate::resolve::RunControl;
use crate::resolve::Scheduler;
use crate::Addr;
use crate::Error;
use crate::ErrorExt as _;
use crate::ModuleRegistry;
use crate::Result;
use crate::SymbolProvider;
use crate::TraceSource;


/// Options influencing a single resolution run.
#[derive(Clone, Debug)]
pub struct ResolveOpts {
    /// Whether to append the displacement from the symbol's start, in
    /// decimal, to resolved frames.
    ///
    /// Defaults to `true`.
    pub include_offsets: bool,
    /// Whether to report source file and line information.
    pub code_info: bool,
    /// Whether to report inlined functions.
    pub inlined_fns: bool,
    /// Whether to look up already symbolized frames by name, in order
    /// to attach source code information to them. Only effective in
    /// conjunction with `code_info`.
    pub relookup: bool,
    /// Whether each whitespace separated token of the input is a frame
    /// of its own, as opposed to one frame per line.
    pub single_line_frames: bool,
    /// A module base address listing, with one `<module> <address>`
    /// pair per line, used to attribute absolute addresses to modules.
    pub base_addrs: Option<String>,
    /// A handle for cancelling the run and observing its progress.
    pub control: Option<RunControl>,
    /// The struct is non-exhaustive and open to extension.
    #[doc(hidden)]
    pub _non_exhaustive: (),
}

impl Default for ResolveOpts {
    fn default() -> Self {
        Self {
            include_offsets: true,
            code_info: false,
            inlined_fns: false,
            relookup: false,
            single_line_frames: false,
            base_addrs: None,
            control: None,
            _non_exhaustive: (),
        }
    }
}


/// The outcome of a resolution run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution<T = String> {
    /// All call stacks got resolved.
    Complete(T),
    /// The run got cancelled. No output was produced.
    Cancelled,
    /// The input is XML of an unknown shape. No output was produced.
    UnrecognizedSchema,
    /// A call stack with input resolved to nothing. Output stops with
    /// [`INCONSISTENT_MARKER`][crate::INCONSISTENT_MARKER].
    Inconsistent {
        /// The index of the offending call stack.
        unit: usize,
    },
}

impl<T> Resolution<T> {
    fn map<U, F>(self, f: F) -> Resolution<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Complete(value) => Resolution::Complete(f(value)),
            Self::Cancelled => Resolution::Cancelled,
            Self::UnrecognizedSchema => Resolution::UnrecognizedSchema,
            Self::Inconsistent { unit } => Resolution::Inconsistent { unit },
        }
    }
}


/// A builder for configurable construction of [`StackResolver`] objects.
#[derive(Default)]
pub struct Builder {
    search_paths: Vec<PathBuf>,
    recursive: bool,
    max_workers: Option<NonZeroUsize>,
    progress: Option<Box<ProgressFn>>,
}

impl Builder {
    /// Set the directories to search for module images and debug
    /// information.
    pub fn set_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(P::into).collect();
        self
    }

    /// Enable/disable searching sub-directories of search paths.
    ///
    /// By default sub-directories are not searched.
    pub fn enable_recursive_search(mut self, enable: bool) -> Self {
        self.recursive = enable;
        self
    }

    /// Set the maximum number of worker threads used by a run.
    ///
    /// `0` (the default) uses the available hardware parallelism.
    pub fn set_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = NonZeroUsize::new(workers);
        self
    }

    /// Register a callback invoked with the completion percentage
    /// after every processed call stack.
    ///
    /// The callback may be invoked concurrently from multiple worker
    /// threads.
    pub fn set_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Create the [`StackResolver`] object, resolving symbols using
    /// `provider`.
    pub fn build(self, provider: Arc<dyn SymbolProvider>) -> StackResolver {
        let Self {
            search_paths,
            recursive,
            max_workers,
            progress,
        } = self;

        StackResolver {
            provider,
            search_paths,
            recursive,
            max_workers,
            progress,
            exports: ExportCache::new(),
        }
    }
}

impl Debug for Builder {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Builder")
            .field("search_paths", &self.search_paths)
            .field("recursive", &self.recursive)
            .field("max_workers", &self.max_workers)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}


/// Resolves textual call stacks to symbols.
///
/// Export tables of module images are cached for the lifetime of the
/// object. Everything else is scoped to a single run.
pub struct StackResolver {
    provider: Arc<dyn SymbolProvider>,
    search_paths: Vec<PathBuf>,
    recursive: bool,
    max_workers: Option<NonZeroUsize>,
    progress: Option<Box<ProgressFn>>,
    exports: ExportCache,
}

impl StackResolver {
    /// Create a new [`StackResolver`] with default settings.
    pub fn new(provider: Arc<dyn SymbolProvider>) -> Self {
        Builder::default().build(provider)
    }

    /// Retrieve a [`Builder`] object for configurable construction of a
    /// [`StackResolver`].
    pub fn builder() -> Builder {
        Builder::default()
    }

    fn registry(&self, opts: &ResolveOpts, derived: &[(String, Addr)]) -> Result<ModuleRegistry> {
        let mut bases = match &opts.base_addrs {
            Some(listing) => {
                parse_listing(listing).context("invalid module base address listing")?
            }
            None => Vec::new(),
        };

        for (module, base) in derived {
            if !bases
                .iter()
                .any(|(known, _base)| known.eq_ignore_ascii_case(module))
            {
                let () = bases.push((module.clone(), *base));
            }
        }
        ModuleRegistry::from_bases(bases)
    }

    /// Resolve the call stacks in `input`, writing the result to `sink`.
    ///
    /// `input` is either plain text with one frame per line, or XML
    /// containing a histogram of call stacks or a stream of events
    /// carrying call stacks. Frames that cannot be resolved are emitted
    /// as-is.
    ///
    /// Invalid module metadata (a malformed base address listing, for
    /// example) is reported as an error. Problems with individual
    /// modules are not: their frames are passed through.
    pub fn resolve_to<W>(&self, input: &str, opts: &ResolveOpts, sink: &mut W) -> Result<Resolution<()>>
    where
        W: Write + ?Sized,
    {
        let control = opts.control.clone().unwrap_or_default();
        let extracted = extract_module_info(input)?;
        if !extracted.modules.is_empty() {
            if let Err(err) = self.provider.prepare(&extracted.modules) {
                warn!("failed to hand module information to symbol provider: {err:#}");
            }
        }

        let registry = self.registry(opts, &extracted.bases)?;
        let units = match classify(&extracted.text) {
            Classification::Units(units) => units,
            Classification::UnrecognizedSchema => return Ok(Resolution::UnrecognizedSchema),
        };

        let scheduler = Scheduler {
            provider: self.provider.as_ref(),
            search_paths: &self.search_paths,
            recursive: self.recursive,
            max_workers: self.max_workers,
            registry: &registry,
            exports: &self.exports,
            opts,
            control: &control,
            progress: self.progress.as_deref(),
        };
        if !scheduler.run(&units) {
            return Ok(Resolution::Cancelled)
        }

        let resolution = match assemble(&units, sink)? {
            Assembled::Complete => Resolution::Complete(()),
            Assembled::Inconsistent { unit } => Resolution::Inconsistent { unit },
        };
        info!("resolved {} call stacks", units.len());
        Ok(resolution)
    }

    /// Resolve the call stacks in `input`, returning the result as a
    /// string.
    ///
    /// This method works like [`StackResolver::resolve_to`], but
    /// accumulates the output.
    pub fn resolve(&self, input: &str, opts: &ResolveOpts) -> Result<Resolution> {
        let mut output = Vec::new();
        let resolution = self.resolve_to(input, opts, &mut output)?;
        let output = String::from_utf8(output).map_err(|err| err.utf8_error())?;
        Ok(resolution.map(|()| output))
    }

    /// Resolve the call stacks recorded in event-trace `files`, writing
    /// the result to `sink`.
    ///
    /// `source` decodes the files into a histogram of call stacks (if
    /// `bucketize` is set) or a stream of events, which is then resolved
    /// like any other input to [`StackResolver::resolve_to`].
    pub fn resolve_traces_to<W>(
        &self,
        source: &dyn TraceSource,
        files: &[PathBuf],
        bucketize: bool,
        opts: &ResolveOpts,
        sink: &mut W,
    ) -> Result<Resolution<()>>
    where
        W: Write + ?Sized,
    {
        if files.is_empty() {
            return Err(Error::with_invalid_input("no event-trace files provided"))
        }

        let (count, xml) = source
            .ingest(files, bucketize)
            .context("failed to ingest event-trace files")?;
        info!("ingested {count} call stacks from {} event-trace files", files.len());
        if count == 0 {
            debug!("event traces hold no call stacks; nothing to resolve");
            return Ok(Resolution::Complete(()))
        }

        self.resolve_to(&xml, opts, sink)
    }

    /// Resolve the call stacks recorded in event-trace `files`,
    /// returning the result as a string.
    ///
    /// This method works like [`StackResolver::resolve_traces_to`], but
    /// accumulates the output.
    pub fn resolve_traces(
        &self,
        source: &dyn TraceSource,
        files: &[PathBuf],
        bucketize: bool,
        opts: &ResolveOpts,
    ) -> Result<Resolution> {
        let mut output = Vec::new();
        let resolution = self.resolve_traces_to(source, files, bucketize, opts, &mut output)?;
        let output = String::from_utf8(output).map_err(|err| err.utf8_error())?;
        Ok(resolution.map(|()| output))
    }
}

impl Debug for StackResolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StackResolver")
            .field("provider", &self.provider)
            .field("search_paths", &self.search_paths)
            .field("recursive", &self.recursive)
            .field("max_workers", &self.max_workers)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}
