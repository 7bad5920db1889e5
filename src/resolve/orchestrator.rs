use std::fmt::Write as _;

use crate::frame::Normalized;
use crate::log::debug;
use crate::log::warn;
use crate::Addr;
use crate::CodeInfo;
use crate::ResolveOpts;
use crate::Session;
use crate::SymKind;

use super::ResolutionCache;
use super::Sessions;


/// Prefix of lines reporting inlined functions.
const INLINE_PREFIX: &str = "(Inline Function) ";
/// Separator of the results of an ambiguous name lookup.
const AMBIGUITY_SEPARATOR: &str = " OR ";


/// Turns normalized frames into symbolized text, consulting the
/// run's cache and the worker's symbol provider sessions.
#[derive(Debug)]
pub(crate) struct Orchestrator<'run> {
    cache: &'run ResolutionCache,
    opts: &'run ResolveOpts,
}

impl<'run> Orchestrator<'run> {
    pub fn new(cache: &'run ResolutionCache, opts: &'run ResolveOpts) -> Self {
        Self { cache, opts }
    }

    /// Resolve a single frame, falling back to its normalized text if
    /// no symbol is found.
    pub fn resolve_frame(&self, frame: Normalized, sessions: &mut Sessions<'_>) -> String {
        match frame {
            Normalized::Rva {
                prefix,
                module,
                rva,
                text,
            } => match self.resolve_rva(&module, rva, sessions) {
                Some(resolved) => format!("{prefix}{resolved}"),
                None => text,
            },
            Normalized::Name {
                prefix,
                module,
                symbol,
                offset,
                text,
            } => match self.resolve_name(&module, &symbol, offset, sessions) {
                Some(resolved) => format!("{prefix}{resolved}"),
                None => text,
            },
            Normalized::Passthrough(text) => text,
        }
    }

    fn resolve_rva(&self, module: &str, rva: Addr, sessions: &mut Sessions<'_>) -> Option<String> {
        if let Some(text) = self.cache.get(module, rva) {
            return Some(text)
        }

        let session = sessions.get(module)?;
        let text = self.lookup(module, rva, session)?;
        let () = self.cache.insert(module, rva, text.clone());
        Some(text)
    }

    /// Look up a symbol by name, in order to attach source code
    /// information to an already symbolized frame.
    fn resolve_name(
        &self,
        module: &str,
        symbol: &str,
        offset: Addr,
        sessions: &mut Sessions<'_>,
    ) -> Option<String> {
        let session = sessions.get(module)?;
        if !session.has_code_info() {
            return None
        }

        let addrs = session
            .find_addrs(symbol)
            .map_err(|err| warn!("failed to look up `{module}!{symbol}`: {err:#}"))
            .ok()?;
        let results = addrs
            .iter()
            .filter_map(|addr| self.lookup(module, addr.wrapping_add(offset), session))
            .collect::<Vec<_>>();

        if results.len() > 1 {
            debug!(
                "`{module}!{symbol}` is ambiguous; reporting all {} matches",
                results.len()
            );
        }

        (!results.is_empty()).then(|| results.join(AMBIGUITY_SEPARATOR))
    }

    /// Query the provider for `rva`, producing the formatted text.
    fn lookup(&self, module: &str, rva: Addr, session: &dyn Session) -> Option<String> {
        let sym = SymKind::LOOKUP_ORDER.iter().find_map(|kind| {
            let sym = session
                .find_sym(rva, *kind)
                .map_err(|err| warn!("failed to look up {module}+{rva:#x} ({kind:?}): {err:#}"))
                .ok()
                .flatten()?;

            match sym.kind {
                SymKind::Block => {
                    let name = sym.name.clone();
                    let enclosing = sym.into_enclosing();
                    if enclosing.is_none() {
                        debug!("block `{name}` at {module}+{rva:#x} has no enclosing function");
                    }
                    enclosing
                }
                SymKind::Function | SymKind::Public => Some(sym),
            }
        })?;

        let mut lines = Vec::new();
        if self.opts.inlined_fns {
            match session.inlined_at(rva) {
                Ok(inlined) => lines.extend(inlined.iter().map(|inlined| {
                    let text = self.format(
                        module,
                        &inlined.name,
                        inlined.displacement,
                        inlined.code_info.as_ref(),
                    );
                    format!("{INLINE_PREFIX}{text}")
                })),
                Err(err) => {
                    warn!("failed to retrieve inlined functions at {module}+{rva:#x}: {err:#}")
                }
            }
        }

        let () = lines.push(self.format(
            module,
            &sym.name,
            sym.displacement,
            sym.code_info.as_ref(),
        ));
        Some(lines.join("\n"))
    }

    fn format(
        &self,
        module: &str,
        name: &str,
        displacement: u64,
        code_info: Option<&CodeInfo>,
    ) -> String {
        let mut text = format!("{module}!{name}");
        if self.opts.include_offsets {
            let _result = write!(text, "+{displacement}");
        }
        if self.opts.code_info {
            if let Some(CodeInfo { file, line }) = code_info {
                let _result = write!(text, " ({file}:{line})");
            }
        }
        text
    }
}
