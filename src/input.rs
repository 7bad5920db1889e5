//! Classification of raw input into call stacks, and extraction of
//! module metadata carried alongside them.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use std::sync::OnceLock;

use regex::Captures;
use regex::Regex;
use roxmltree::Document;
use roxmltree::Node;

use crate::log::debug;
use crate::log::warn;
use crate::util::module_name;
use crate::util::parse_hex_addr;
use crate::Addr;
use crate::Error;
use crate::ModuleInfo;
use crate::Result;


/// Marker identifying the element of an event that holds its call
/// stack.
const CALLSTACK_MARKER: &str = "callstack";

// SANITY: All patterns are literals known to compile.
static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{?[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\}?$")
        .unwrap()
});
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:<|&lt;)frame\s(?P<attrs>[^<>]*?)/?\s*(?:>|&gt;)").unwrap()
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<name>[\w:\-]+)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|&quot;(?P<eq>.*?)&quot;)"#,
    )
    .unwrap()
});


/// A single call stack, as found in the input.
#[derive(Debug)]
pub struct CallStackUnit {
    /// The raw frames, one per line.
    pub text: String,
    /// How often the call stack was observed.
    pub weight: u64,
    /// A label to emit ahead of the resolved call stack.
    pub annotation: Option<String>,
    /// A stable key identifying the unit within its input.
    pub key: Option<String>,
    /// The resolved text, set once by the worker owning the unit.
    resolved: OnceLock<String>,
}

impl CallStackUnit {
    pub(crate) fn new(text: String) -> Self {
        Self {
            text,
            weight: 1,
            annotation: None,
            key: None,
            resolved: OnceLock::new(),
        }
    }

    /// Retrieve the resolved call stack, if the unit was processed.
    pub fn resolved(&self) -> Option<&str> {
        self.resolved.get().map(String::as_str)
    }

    pub(crate) fn set_resolved(&self, text: String) {
        if self.resolved.set(text).is_err() {
            warn!("call stack {:?} resolved more than once", self.key);
        }
    }
}


/// The result of classifying an input.
#[derive(Debug)]
pub enum Classification {
    /// The input consists of the provided call stacks.
    Units(Vec<CallStackUnit>),
    /// The input is XML, but of a shape we don't understand.
    UnrecognizedSchema,
}


/// Concatenate all text contained in `node`.
fn inner_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|node| node.text())
        .collect()
}

/// Find the first child element of `node` named `name`.
fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name().eq_ignore_ascii_case(name))
}

fn histogram_units(doc: &Document<'_>) -> Vec<CallStackUnit> {
    doc.descendants()
        .filter(|node| node.is_element() && node.tag_name().name().eq_ignore_ascii_case("slot"))
        .enumerate()
        .map(|(idx, slot)| {
            let count = slot.attribute("count").unwrap_or("1");
            let weight = count.trim().parse::<u64>().unwrap_or_else(|_err| {
                warn!("slot {idx} carries invalid count `{count}`");
                1
            });
            let text = child_element(slot, "value")
                .map(inner_text)
                .unwrap_or_else(|| inner_text(slot));

            let mut unit = CallStackUnit::new(text);
            unit.weight = weight.max(1);
            unit.annotation = Some(format!("Slot_{idx} [count:{count}]"));
            unit.key = Some(format!("Slot_{idx}"));
            unit
        })
        .collect()
}

fn event_units(doc: &Document<'_>) -> Vec<CallStackUnit> {
    let input = doc.input_text();

    doc.descendants()
        .filter(|node| node.is_element() && node.tag_name().name().eq_ignore_ascii_case("event"))
        .filter_map(|event| {
            let callstack = event.children().find(|child| {
                child.is_element()
                    && child
                        .attribute("name")
                        .map(|name| name.to_ascii_lowercase().contains(CALLSTACK_MARKER))
                        .unwrap_or(false)
            })?;
            Some((event, callstack))
        })
        .enumerate()
        .map(|(idx, (event, callstack))| {
            let text = child_element(callstack, "value")
                .map(inner_text)
                .unwrap_or_else(|| inner_text(callstack));

            let Range { start, end } = event.range();
            let cut = callstack.range();
            let annotation = format!("{}{}", &input[start..cut.start], &input[cut.end..end]);
            let annotation = annotation
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("");

            let mut unit = CallStackUnit::new(text);
            unit.annotation = Some(annotation);
            unit.key = Some(format!("Event_{idx}"));
            unit
        })
        .collect()
}

/// Split raw input into call stacks.
///
/// Input that is not well-formed XML is treated as a single call stack.
/// XML input is expected to be a histogram of call stacks (`Slot`
/// elements with a `count`) or a stream of events with a call stack
/// action each.
pub fn classify(input: &str) -> Classification {
    let doc = match Document::parse(input) {
        Ok(doc) => doc,
        Err(err) => {
            debug!("input is not XML ({err}); treating it as a single call stack");
            return Classification::Units(vec![CallStackUnit::new(input.to_string())])
        }
    };

    let units = histogram_units(&doc);
    if !units.is_empty() {
        debug!("found histogram with {} slots", units.len());
        return Classification::Units(units)
    }

    let units = event_units(&doc);
    if !units.is_empty() {
        debug!("found event stream with {} call stacks", units.len());
        return Classification::Units(units)
    }

    warn!(
        "XML input with root element `{}` has no recognized shape",
        doc.root_element().tag_name().name()
    );
    Classification::UnrecognizedSchema
}


/// Metadata found alongside the call stacks of an input.
#[derive(Debug, Default)]
pub(crate) struct Extracted {
    /// The input, with XML frame rows rewritten into module relative
    /// form.
    pub text: String,
    /// Debug-info identities of modules.
    pub modules: Vec<ModuleInfo>,
    /// Module base addresses derived from absolute frame addresses.
    pub bases: Vec<(String, Addr)>,
}

impl Extracted {
    fn add_module(&mut self, info: ModuleInfo, seen: &mut HashSet<String>) {
        if seen.insert(info.module.to_ascii_lowercase()) {
            let () = self.modules.push(info);
        }
    }

    fn add_base(&mut self, module: &str, base: Addr) {
        match self
            .bases
            .iter()
            .find(|(known, _base)| known.eq_ignore_ascii_case(module))
        {
            Some((_module, known)) if *known != base => {
                debug!("ignoring base {base:#x} of `{module}`; already known as {known:#x}")
            }
            Some(..) => (),
            None => self.bases.push((module.to_string(), base)),
        }
    }
}


/// Parse a comma separated module information row.
///
/// Fields may appear in any order: a GUID, a `.pdb` file name, an
/// optional `.dll`/`.exe` image name, and the age as last numeric
/// field.
fn parse_csv_row(line: &str) -> Option<ModuleInfo> {
    let fields = line
        .split(',')
        .map(|field| field.trim().trim_matches('"').trim())
        .collect::<Vec<_>>();

    let guid = fields.iter().find(|field| GUID_RE.is_match(field))?;
    let has_suffix = |field: &str, suffixes: &[&str]| {
        let field = field.to_ascii_lowercase();
        suffixes.iter().any(|suffix| field.ends_with(suffix))
    };
    let pdb = fields.iter().find(|field| has_suffix(field, &[".pdb"]))?;
    let image = fields
        .iter()
        .find(|field| has_suffix(field, &[".dll", ".exe"]));
    let age = fields.iter().rev().find_map(|field| field.parse::<u32>().ok())?;

    Some(ModuleInfo {
        module: module_name(image.unwrap_or(pdb)).to_string(),
        pdb: pdb.to_string(),
        guid: guid.trim_matches(|c| c == '{' || c == '}').to_string(),
        age,
    })
}

/// Parse the attributes of an XML frame row.
fn frame_attrs(attrs: &str) -> Vec<(&str, &str)> {
    ATTR_RE
        .captures_iter(attrs)
        .filter_map(|captures| {
            let name = captures.name("name")?.as_str();
            let value = captures
                .name("dq")
                .or_else(|| captures.name("sq"))
                .or_else(|| captures.name("eq"))?
                .as_str();
            Some((name, value))
        })
        .collect()
}

/// Rewrite a single XML frame row into `<id> <module>+0x<rva>` form,
/// recording module metadata in the process.
fn rewrite_frame(
    captures: &Captures<'_>,
    extracted: &mut Extracted,
    seen: &mut HashSet<String>,
) -> Result<Option<String>> {
    let attrs = frame_attrs(captures.name("attrs").map(|m| m.as_str()).unwrap_or_default());
    let attr = |name: &str| {
        attrs
            .iter()
            .find(|(key, _value)| key.eq_ignore_ascii_case(name))
            .map(|(_key, value)| *value)
    };

    let (module, rva) = match (attr("module"), attr("rva")) {
        (Some(module), Some(rva)) => (module_name(module), rva),
        _ => return Ok(None),
    };
    let rva = parse_hex_addr(rva).ok_or_else(|| {
        Error::with_invalid_input(format!("frame of `{module}` has invalid rva `{rva}`"))
    })?;

    if let (Some(pdb), Some(guid), Some(age)) = (attr("pdb"), attr("guid"), attr("age")) {
        match age.parse::<u32>() {
            Ok(age) => extracted.add_module(
                ModuleInfo {
                    module: module.to_string(),
                    pdb: pdb.to_string(),
                    guid: guid.trim_matches(|c| c == '{' || c == '}').to_string(),
                    age,
                },
                seen,
            ),
            Err(_err) => {
                return Err(Error::with_invalid_input(format!(
                    "frame of `{module}` has invalid age `{age}`"
                )))
            }
        }
    }

    if let Some(address) = attr("address") {
        let base = parse_hex_addr(address)
            .and_then(|address| address.checked_sub(rva))
            .ok_or_else(|| {
                Error::with_invalid_input(format!(
                    "frame of `{module}` has invalid address `{address}`"
                ))
            })?;
        let () = extracted.add_base(module, base);
    }

    let frame = match attr("id") {
        Some(id) => format!("{id} {module}+0x{rva:x}"),
        None => format!("{module}+0x{rva:x}"),
    };
    Ok(Some(frame))
}

/// Scan `input` for module metadata: comma separated module information
/// rows and XML frame rows.
///
/// XML frame rows are rewritten into module relative form in the
/// returned text.
pub(crate) fn extract_module_info(input: &str) -> Result<Extracted> {
    let mut extracted = Extracted::default();
    let mut seen = HashSet::new();

    for line in input.lines().filter(|line| line.contains(',')) {
        if let Some(info) = parse_csv_row(line) {
            let () = extracted.add_module(info, &mut seen);
        }
    }

    let mut text = String::with_capacity(input.len());
    let mut last = 0;
    for captures in FRAME_RE.captures_iter(input) {
        // SANITY: Group 0 is always present in a match.
        let whole = captures.get(0).unwrap();
        if let Some(frame) = rewrite_frame(&captures, &mut extracted, &mut seen)? {
            let () = text.push_str(&input[last..whole.start()]);
            let () = text.push_str(&frame);
            last = whole.end();
        }
    }
    let () = text.push_str(&input[last..]);
    extracted.text = text;

    if !extracted.modules.is_empty() || !extracted.bases.is_empty() {
        debug!(
            "extracted debug-info identities of {} modules and {} base addresses",
            extracted.modules.len(),
            extracted.bases.len()
        );
    }
    Ok(extracted)
}
