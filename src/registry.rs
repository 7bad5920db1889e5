use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::log::debug;
use crate::util::find_match_or_lower_bound_by_key;
use crate::util::module_name;
use crate::util::parse_hex_addr;
use crate::Addr;
use crate::Error;
use crate::IntoError as _;
use crate::Result;


/// The address range a module occupies.
#[derive(Clone, PartialEq, Eq)]
pub struct ModuleRange {
    /// The module name, without extension.
    pub module: String,
    /// The module's base address (inclusive).
    pub base: Addr,
    /// The last address belonging to the module (inclusive).
    pub end: Addr,
}

impl ModuleRange {
    /// Check whether `addr` falls into the range.
    #[inline]
    pub fn contains(&self, addr: Addr) -> bool {
        self.base <= addr && addr <= self.end
    }
}

impl Debug for ModuleRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} [{:#x}-{:#x}]", self.module, self.base, self.end)
    }
}


/// Parse a module base address listing.
///
/// Every non-blank line has the form `<path or name> <base address>`.
/// The address is hexadecimal and may use a backtick to separate the
/// upper and lower 32 bit. A single malformed line fails the entire
/// listing.
pub(crate) fn parse_listing(text: &str) -> Result<Vec<(String, Addr)>> {
    text.lines()
        .enumerate()
        .filter(|(_idx, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let line = line.trim();
            let (path, addr) = line
                .rsplit_once(char::is_whitespace)
                .ok_or_invalid_input(|| {
                    format!("line {}: expected `<module> <base address>`: `{line}`", idx + 1)
                })?;
            let addr = parse_hex_addr(addr).ok_or_invalid_input(|| {
                format!("line {}: invalid base address `{addr}`", idx + 1)
            })?;
            let name = module_name(path.trim());
            if name.is_empty() {
                return Err(Error::with_invalid_input(format!(
                    "line {}: missing module name",
                    idx + 1
                )))
            }
            Ok((name.to_string(), addr))
        })
        .collect()
}


/// A registry mapping addresses to the modules owning them.
///
/// Ranges are sorted by base address and never overlap: each module is
/// assumed to extend up to the base of the next one, with the last one
/// covering the remainder of the address space.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    ranges: Box<[ModuleRange]>,
}

impl ModuleRegistry {
    /// Create a registry from a module base address listing.
    ///
    /// ```
    /// # use callsym::ModuleRegistry;
    /// let registry = ModuleRegistry::parse(
    ///     "c:\\binn\\sqldk.dll 0x00000001`00400000\nntdll.dll 7ffd0000",
    /// )
    /// .unwrap();
    /// let range = registry.find(0x10042249f).unwrap();
    /// assert_eq!(range.module, "sqldk");
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let bases = parse_listing(text)?;
        Self::from_bases(bases)
    }

    /// Create a registry from a list of module names and their base
    /// addresses.
    ///
    /// Two modules sharing a base address are reported as an error.
    pub fn from_bases<I, S>(bases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Addr)>,
        S: Into<String>,
    {
        let mut bases = bases
            .into_iter()
            .map(|(module, base)| (module.into(), base))
            .collect::<Vec<(String, Addr)>>();
        let () = bases.sort_by_key(|(_module, base)| *base);

        if let Some(pair) = bases.windows(2).find(|pair| pair[0].1 == pair[1].1) {
            return Err(Error::with_invalid_input(format!(
                "modules `{}` and `{}` share base address {:#x}",
                pair[0].0, pair[1].0, pair[0].1
            )))
        }

        let ends = bases
            .iter()
            .skip(1)
            .map(|(_module, base)| base - 1)
            .chain([Addr::MAX]);
        let ranges = bases
            .iter()
            .zip(ends)
            .map(|((module, base), end)| ModuleRange {
                module: module.clone(),
                base: *base,
                end,
            })
            .collect::<Box<[_]>>();

        debug!("registered {} module ranges", ranges.len());
        Ok(Self { ranges })
    }

    /// Find the module owning `addr`.
    pub fn find(&self, addr: Addr) -> Option<&ModuleRange> {
        let idx = find_match_or_lower_bound_by_key(&self.ranges, addr, |range| range.base)?;
        let range = self.ranges.get(idx)?;
        range.contains(addr).then_some(range)
    }

    /// Retrieve all ranges, sorted by base address.
    #[inline]
    pub fn ranges(&self) -> &[ModuleRange] {
        &self.ranges
    }

    /// Check whether the registry knows about any module.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
