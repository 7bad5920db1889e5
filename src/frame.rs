use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Captures;
use regex::Regex;

use crate::log::trace;
use crate::pe::ExportCache;
use crate::util::parse_hex_addr;
use crate::Addr;
use crate::ModuleRegistry;


/// An optional frame index, e.g., `05 ` or `#5 `.
macro_rules! prefix {
    () => {
        r"(?P<prefix>(?:#?[0-9a-f]+\s+)?)"
    };
}

/// A module name, possibly containing dots, excluding the extension.
macro_rules! module {
    () => {
        r"(?P<module>[\w.\-]+?)"
    };
}

// SANITY: All patterns are literals known to compile.
static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^",
        prefix!(),
        module!(),
        r"(?:\.dll)?!Ordinal(?P<ordinal>\d+)\s*\+\s*(?:0x)?(?P<offset>[0-9a-f]+)$"
    ))
    .unwrap()
});
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(r"(?i)^", prefix!(), r"0x(?P<addr>[0-9a-f`]+)$")).unwrap()
});
static SYMBOLIZED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^",
        prefix!(),
        module!(),
        r"(?:\.(?:dll|exe|sys))?!(?P<symbol>[^\s+][^+]*?)(?:\s*\+\s*(?P<offset>0x[0-9a-f]+|\d+))?$"
    ))
    .unwrap()
});
static CANONICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^",
        prefix!(),
        module!(),
        r"(?:\.(?:dll|exe|sys))?\s*\+\s*(?:0x)?(?P<offset>[0-9a-f]+)$"
    ))
    .unwrap()
});


/// Undo the escaping of angle brackets found in text lifted from XML.
pub(crate) fn unescape(line: &str) -> Cow<'_, str> {
    if line.contains("&lt;") || line.contains("&gt;") {
        Cow::Owned(line.replace("&lt;", "<").replace("&gt;", ">"))
    } else {
        Cow::Borrowed(line)
    }
}


/// A single call stack frame, classified by its textual form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame<'line> {
    /// An export referenced by ordinal, e.g., `mod!Ordinal298+0x4A5`.
    Ordinal {
        /// The frame index prefix, including trailing whitespace.
        prefix: &'line str,
        /// The module name, without extension.
        module: &'line str,
        /// The export's ordinal.
        ordinal: u32,
        /// The offset from the export's start.
        offset: Addr,
    },
    /// A bare absolute address, e.g., `0x10042249f`.
    AddressOnly {
        /// The frame index prefix, including trailing whitespace.
        prefix: &'line str,
        /// The absolute address.
        addr: Addr,
    },
    /// A frame that already carries a symbol name, e.g.,
    /// `sqldk!SOS_Task::Execute+0x1e`. Only recognized if requested.
    Symbolized {
        /// The frame index prefix, including trailing whitespace.
        prefix: &'line str,
        /// The module name, without extension.
        module: &'line str,
        /// The symbol name.
        symbol: &'line str,
        /// The offset from the symbol's start.
        offset: Addr,
    },
    /// A module relative address, e.g., `sqldk.dll+0x40609`.
    Canonical {
        /// The frame index prefix, including trailing whitespace.
        prefix: &'line str,
        /// The module name, without extension.
        module: &'line str,
        /// The relative virtual address inside the module.
        rva: Addr,
    },
    /// Anything else.
    Passthrough,
}

impl<'line> Frame<'line> {
    /// Classify `line`.
    ///
    /// Detectors are tried in the order of the variants of this type and
    /// the first match wins. If `symbolized` is false, already
    /// symbolized frames are not recognized as such.
    ///
    /// ```
    /// # use callsym::Frame;
    /// let frame = Frame::parse("05 sqldk.dll+0x40609", false);
    /// assert_eq!(
    ///     frame,
    ///     Frame::Canonical {
    ///         prefix: "05 ",
    ///         module: "sqldk",
    ///         rva: 0x40609,
    ///     }
    /// );
    /// ```
    pub fn parse(line: &'line str, symbolized: bool) -> Self {
        fn hex(captures: &Captures<'_>, name: &str) -> Option<Addr> {
            parse_hex_addr(captures.name(name)?.as_str())
        }

        fn text<'line>(captures: &Captures<'line>, name: &str) -> &'line str {
            captures.name(name).map(|m| m.as_str()).unwrap_or_default()
        }

        let line = line.trim();

        if let Some(captures) = ORDINAL_RE.captures(line) {
            let ordinal = text(&captures, "ordinal").parse().ok();
            if let (Some(ordinal), Some(offset)) = (ordinal, hex(&captures, "offset")) {
                return Frame::Ordinal {
                    prefix: text(&captures, "prefix"),
                    module: text(&captures, "module"),
                    ordinal,
                    offset,
                }
            }
        }

        if let Some(captures) = ADDRESS_RE.captures(line) {
            if let Some(addr) = hex(&captures, "addr") {
                return Frame::AddressOnly {
                    prefix: text(&captures, "prefix"),
                    addr,
                }
            }
        }

        if symbolized {
            if let Some(captures) = SYMBOLIZED_RE.captures(line) {
                let offset = match captures.name("offset").map(|m| m.as_str()) {
                    None => Some(0),
                    Some(offset) if offset.len() > 2 && offset[..2].eq_ignore_ascii_case("0x") => {
                        parse_hex_addr(offset)
                    }
                    Some(offset) => offset.parse().ok(),
                };
                if let Some(offset) = offset {
                    return Frame::Symbolized {
                        prefix: text(&captures, "prefix"),
                        module: text(&captures, "module"),
                        symbol: text(&captures, "symbol").trim_end(),
                        offset,
                    }
                }
            }
        }

        if let Some(captures) = CANONICAL_RE.captures(line) {
            if let Some(rva) = hex(&captures, "offset") {
                return Frame::Canonical {
                    prefix: text(&captures, "prefix"),
                    module: text(&captures, "module"),
                    rva,
                }
            }
        }

        Frame::Passthrough
    }
}


/// A frame after normalization, ready to be handed to the
/// orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Normalized {
    /// Resolve by module relative address.
    Rva {
        prefix: String,
        module: String,
        rva: Addr,
        /// The normalized line, used if resolution fails.
        text: String,
    },
    /// Resolve by symbol name.
    Name {
        prefix: String,
        module: String,
        symbol: String,
        offset: Addr,
        text: String,
    },
    /// Emit as-is.
    Passthrough(String),
}


/// Rewrites raw frames into module relative form.
#[derive(Debug)]
pub(crate) struct Normalizer<'ctx> {
    pub registry: &'ctx ModuleRegistry,
    pub exports: &'ctx ExportCache,
    pub search_paths: &'ctx [PathBuf],
    pub recursive: bool,
    /// Whether to recognize already symbolized frames.
    pub symbolized: bool,
}

impl Normalizer<'_> {
    pub fn normalize(&self, line: &str) -> Normalized {
        let line = unescape(line.trim());
        let line = line.as_ref();

        match Frame::parse(line, self.symbolized) {
            Frame::Ordinal {
                prefix,
                module,
                ordinal,
                offset,
            } => {
                let entry = self
                    .exports
                    .find(module, self.search_paths, self.recursive)
                    .and_then(|table| table.find(ordinal).copied());
                match entry {
                    Some(entry) => {
                        let rva = Addr::from(entry.addr).wrapping_add(offset);
                        let text = format!("{prefix}{module}.dll+0x{rva:X}");
                        trace!("normalized `{line}` to `{text}`");
                        Normalized::Rva {
                            prefix: prefix.to_string(),
                            module: module.to_string(),
                            rva,
                            text,
                        }
                    }
                    None => Normalized::Passthrough(line.to_string()),
                }
            }
            Frame::AddressOnly { prefix, addr } => match self.registry.find(addr) {
                Some(range) => {
                    let rva = addr - range.base;
                    let text = format!("{prefix}{}+0x{rva:x}", range.module);
                    trace!("normalized `{line}` to `{text}`");
                    Normalized::Rva {
                        prefix: prefix.to_string(),
                        module: range.module.clone(),
                        rva,
                        text,
                    }
                }
                None => Normalized::Passthrough(line.to_string()),
            },
            Frame::Symbolized {
                prefix,
                module,
                symbol,
                offset,
            } => Normalized::Name {
                prefix: prefix.to_string(),
                module: module.to_string(),
                symbol: symbol.to_string(),
                offset,
                text: line.to_string(),
            },
            Frame::Canonical {
                prefix,
                module,
                rva,
            } => Normalized::Rva {
                prefix: prefix.to_string(),
                module: module.to_string(),
                rva,
                text: line.to_string(),
            },
            Frame::Passthrough => Normalized::Passthrough(line.to_string()),
        }
    }
}
