//! Helpers shared between unit tests, integration tests, and
//! benchmarks.

use std::collections::HashMap;
use std::fs::read_to_string;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Addr;
use crate::CodeInfo;
use crate::ErrorExt as _;
use crate::InlinedFn;
use crate::ModuleInfo;
use crate::ResolvedSym;
use crate::Result;
use crate::RunControl;
use crate::Session;
use crate::SymKind;
use crate::SymbolProvider;
use crate::TraceSource;


/// Build a minimal PE image containing nothing but an export directory
/// with the provided export address table.
///
/// The image has a single section mapped at RVA `0x2000` and backed by
/// file offset `0x400`, holding the export directory followed by the
/// export address table. The table is the last thing in the file.
pub fn build_pe_image(ordinal_base: u32, functions: &[u32], pe32_plus: bool) -> Vec<u8> {
    const NT_OFFSET: usize = 0x80;
    const SECTION_RVA: u32 = 0x2000;
    const SECTION_OFFSET: usize = 0x400;
    const EXPORT_DIR_SIZE: u32 = 40;

    fn put_u16(image: &mut [u8], offset: usize, value: u16) {
        image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(image: &mut [u8], offset: usize, value: u32) {
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    let (machine, opt_size, magic, num_dirs_offset, dirs_offset) = if pe32_plus {
        (0x8664u16, 240usize, 0x20bu16, 108usize, 112usize)
    } else {
        (0x14c, 224, 0x10b, 92, 96)
    };
    let data_size = EXPORT_DIR_SIZE + 4 * functions.len() as u32;

    let mut image = vec![0u8; SECTION_OFFSET + data_size as usize];
    let () = image[0..2].copy_from_slice(b"MZ");
    let () = put_u32(&mut image, 0x3c, NT_OFFSET as u32);
    let () = image[NT_OFFSET..NT_OFFSET + 4].copy_from_slice(b"PE\0\0");

    let file_header = NT_OFFSET + 4;
    let () = put_u16(&mut image, file_header, machine);
    // NumberOfSections
    let () = put_u16(&mut image, file_header + 2, 1);
    let () = put_u16(&mut image, file_header + 16, opt_size as u16);

    let opt_header = file_header + 20;
    let () = put_u16(&mut image, opt_header, magic);
    let () = put_u32(&mut image, opt_header + num_dirs_offset, 16);
    let () = put_u32(&mut image, opt_header + dirs_offset, SECTION_RVA);
    let () = put_u32(&mut image, opt_header + dirs_offset + 4, data_size);

    let section = opt_header + opt_size;
    let () = image[section..section + 6].copy_from_slice(b".edata");
    let () = put_u32(&mut image, section + 8, data_size);
    let () = put_u32(&mut image, section + 12, SECTION_RVA);
    let () = put_u32(&mut image, section + 16, data_size);
    let () = put_u32(&mut image, section + 20, SECTION_OFFSET as u32);

    let export_dir = SECTION_OFFSET;
    let () = put_u32(&mut image, export_dir + 16, ordinal_base);
    let () = put_u32(&mut image, export_dir + 20, functions.len() as u32);
    let () = put_u32(&mut image, export_dir + 28, SECTION_RVA + EXPORT_DIR_SIZE);

    for (idx, addr) in functions.iter().enumerate() {
        let () = put_u32(
            &mut image,
            export_dir + EXPORT_DIR_SIZE as usize + idx * 4,
            *addr,
        );
    }
    image
}


/// A symbol known to a [`FakeModule`].
#[derive(Clone, Debug)]
pub struct FakeSym {
    /// The symbol's name.
    pub name: String,
    /// The symbol's start address, relative to the module.
    pub addr: Addr,
    /// The symbol's size.
    pub size: u64,
    /// The kind of the symbol.
    pub kind: SymKind,
    /// Source code location reported for any address in the symbol.
    pub code_info: Option<CodeInfo>,
}

impl FakeSym {
    fn resolve(&self, rva: Addr) -> ResolvedSym {
        ResolvedSym {
            name: self.name.clone(),
            displacement: rva - self.addr,
            kind: self.kind,
            code_info: self.code_info.clone(),
            parent: None,
        }
    }
}


/// The debug information of a single module, as served by
/// [`FakeProvider`].
#[derive(Clone, Debug, Default)]
pub struct FakeModule {
    syms: Vec<FakeSym>,
    inlined: HashMap<Addr, Vec<InlinedFn>>,
}

impl FakeModule {
    /// Create a module without any symbols.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the first symbol of the given kind covering `rva`.
    fn covering(&self, rva: Addr, kind: SymKind) -> Option<&FakeSym> {
        self.syms
            .iter()
            .find(|sym| sym.kind == kind && sym.addr <= rva && rva < sym.addr + sym.size)
    }

    /// Add a function symbol spanning `addr..addr + size`.
    pub fn func(self, name: &str, addr: Addr, size: u64) -> Self {
        self.sym(name, addr, size, SymKind::Function, None)
    }

    /// Add a symbol with all attributes spelled out.
    ///
    /// Block-scoped symbols are reported as nested in the function, or
    /// else public symbol, covering the looked up address.
    pub fn sym(
        mut self,
        name: &str,
        addr: Addr,
        size: u64,
        kind: SymKind,
        code_info: Option<(&str, u32)>,
    ) -> Self {
        let () = self.syms.push(FakeSym {
            name: name.to_string(),
            addr,
            size,
            kind,
            code_info: code_info.map(|(file, line)| CodeInfo {
                file: file.to_string(),
                line,
            }),
        });
        self
    }

    /// Report `name` as inlined at `addr`.
    pub fn inlined(mut self, addr: Addr, name: &str, code_info: Option<(&str, u32)>) -> Self {
        let () = self.inlined.entry(addr).or_default().push(InlinedFn {
            name: name.to_string(),
            displacement: 0,
            code_info: code_info.map(|(file, line)| CodeInfo {
                file: file.to_string(),
                line,
            }),
        });
        self
    }
}


#[derive(Debug)]
struct FakeSession {
    module: FakeModule,
    lookups: Arc<AtomicUsize>,
}

impl Session for FakeSession {
    fn find_sym(&self, rva: Addr, kind: SymKind) -> Result<Option<ResolvedSym>> {
        let _prev = self.lookups.fetch_add(1, Ordering::Relaxed);
        let sym = self.module.covering(rva, kind).map(|sym| {
            let mut resolved = sym.resolve(rva);
            if kind == SymKind::Block {
                resolved.parent = self
                    .module
                    .covering(rva, SymKind::Function)
                    .or_else(|| self.module.covering(rva, SymKind::Public))
                    .map(|parent| Box::new(parent.resolve(rva)));
            }
            resolved
        });
        Ok(sym)
    }

    fn find_addrs(&self, name: &str) -> Result<Vec<Addr>> {
        let addrs = self
            .module
            .syms
            .iter()
            .filter(|sym| sym.name == name)
            .map(|sym| sym.addr)
            .collect();
        Ok(addrs)
    }

    fn inlined_at(&self, rva: Addr) -> Result<Vec<InlinedFn>> {
        Ok(self.module.inlined.get(&rva).cloned().unwrap_or_default())
    }

    fn has_code_info(&self) -> bool {
        self.module.syms.iter().any(|sym| sym.code_info.is_some())
    }
}


/// An in-memory [`SymbolProvider`].
#[derive(Debug, Default)]
pub struct FakeProvider {
    modules: HashMap<String, FakeModule>,
    /// Number of `Session::find_sym` calls performed.
    lookups: Arc<AtomicUsize>,
    /// Number of sessions handed out.
    loads: AtomicUsize,
    prepared: Mutex<Vec<ModuleInfo>>,
    /// A run to cancel once the first session gets loaded.
    cancel_on_load: Option<RunControl>,
}

impl FakeProvider {
    /// Create a provider not knowing about any modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `module` under the (case-insensitive) name `name`.
    pub fn module(mut self, name: &str, module: FakeModule) -> Self {
        let _prev = self.modules.insert(name.to_ascii_lowercase(), module);
        self
    }

    /// Cancel the run controlled by `control` as soon as a session is
    /// requested.
    pub fn cancel_on_load(mut self, control: RunControl) -> Self {
        self.cancel_on_load = Some(control);
        self
    }

    /// Retrieve the number of symbol lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Retrieve the number of sessions handed out so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Retrieve the module information handed to the provider.
    pub fn prepared(&self) -> Vec<ModuleInfo> {
        self.prepared.lock().clone()
    }
}

impl SymbolProvider for FakeProvider {
    fn load(
        &self,
        module: &str,
        _search_paths: &[PathBuf],
        _recursive: bool,
    ) -> Result<Option<Box<dyn Session>>> {
        if let Some(control) = &self.cancel_on_load {
            let () = control.cancel();
        }

        let session = self.modules.get(&module.to_ascii_lowercase()).map(|module| {
            let _prev = self.loads.fetch_add(1, Ordering::Relaxed);
            Box::new(FakeSession {
                module: module.clone(),
                lookups: Arc::clone(&self.lookups),
            }) as Box<dyn Session>
        });
        Ok(session)
    }

    fn prepare(&self, modules: &[ModuleInfo]) -> Result<()> {
        let () = self.prepared.lock().extend_from_slice(modules);
        Ok(())
    }
}


fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}


/// A [`TraceSource`] reading "trace files" holding call stacks as
/// text, separated by empty lines.
#[derive(Debug, Default)]
pub struct FakeTraceSource {
    /// Number of files read.
    files: AtomicUsize,
}

impl FakeTraceSource {
    /// Create a new trace source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the number of files read so far.
    pub fn files(&self) -> usize {
        self.files.load(Ordering::Relaxed)
    }
}

impl TraceSource for FakeTraceSource {
    fn ingest(&self, files: &[PathBuf], bucketize: bool) -> Result<(usize, String)> {
        let mut stacks = Vec::new();
        for file in files {
            let content = read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let _prev = self.files.fetch_add(1, Ordering::Relaxed);
            let () = stacks.extend(
                content
                    .split("\n\n")
                    .map(str::trim)
                    .filter(|stack| !stack.is_empty())
                    .map(str::to_string),
            );
        }

        if bucketize {
            let mut buckets = Vec::<(String, usize)>::new();
            for stack in stacks {
                match buckets.iter().position(|(known, _count)| *known == stack) {
                    Some(idx) => buckets[idx].1 += 1,
                    None => buckets.push((stack, 1)),
                }
            }
            let slots = buckets
                .iter()
                .map(|(stack, count)| {
                    format!(
                        "<Slot count=\"{count}\"><value>{}</value></Slot>",
                        escape_xml(stack)
                    )
                })
                .collect::<String>();
            let xml = format!(
                "<HistogramTarget truncated=\"0\" buckets=\"{}\">{slots}</HistogramTarget>",
                buckets.len()
            );
            Ok((buckets.len(), xml))
        } else {
            let events = stacks
                .iter()
                .enumerate()
                .map(|(idx, stack)| {
                    format!(
                        "<event name=\"sample\" index=\"{idx}\"><action name=\"callstack\"><value>{}</value></action></event>",
                        escape_xml(stack)
                    )
                })
                .collect::<String>();
            Ok((stacks.len(), format!("<RingBufferTarget>{events}</RingBufferTarget>")))
        }
    }
}
