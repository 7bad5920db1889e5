use std::mem::size_of;
use std::path::Path;

use crate::mmap::Mmap;
use crate::util::ReadRaw as _;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

use super::types::IMAGE_DATA_DIRECTORY;
use super::types::IMAGE_DIRECTORY_ENTRY_EXPORT;
use super::types::IMAGE_DOS_SIGNATURE;
use super::types::IMAGE_EXPORT_DIRECTORY;
use super::types::IMAGE_FILE_HEADER;
use super::types::IMAGE_NT_OPTIONAL_HDR32_MAGIC;
use super::types::IMAGE_NT_OPTIONAL_HDR64_MAGIC;
use super::types::IMAGE_NT_SIGNATURE;
use super::types::IMAGE_SECTION_HEADER;
use super::types::DOS_E_LFANEW_OFFSET;
use super::types::PE32_DATA_DIRECTORY_OFFSET;
use super::types::PE32_NUM_RVA_AND_SIZES_OFFSET;
use super::types::PE32_PLUS_DATA_DIRECTORY_OFFSET;
use super::types::PE32_PLUS_NUM_RVA_AND_SIZES_OFFSET;


/// A single entry of an image's export address table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportEntry {
    /// The module-relative ordinal, i.e., the export directory's ordinal
    /// base plus the index into the export address table.
    pub ordinal: u32,
    /// The relative virtual address of the exported function.
    pub addr: u32,
}

impl ExportEntry {
    /// Retrieve the synthetic name of the entry, `Ordinal<N>`.
    ///
    /// Names from the export name table are never consulted; call
    /// stacks of stripped binaries only ever refer to ordinals.
    pub fn name(&self) -> String {
        format!("Ordinal{}", self.ordinal)
    }
}


/// An ordinal to address mapping, as read from an executable image's
/// export directory.
#[derive(Clone, Debug, Default)]
pub struct ExportTable {
    /// Entries, sorted by ordinal.
    entries: Box<[ExportEntry]>,
}

impl ExportTable {
    /// Read the export table of the PE image at `path`.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mmap = Mmap::open(path)?;
        PeParser::new(&mmap)
            .export_table()
            .with_context(|| format!("failed to read export table of {}", path.display()))
    }

    /// Find the entry for the given ordinal.
    pub fn find(&self, ordinal: u32) -> Option<&ExportEntry> {
        self.entries
            .binary_search_by_key(&ordinal, |entry| entry.ordinal)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Retrieve an iterator over all entries, in ordinal order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &ExportEntry> {
        self.entries.iter()
    }

    /// Retrieve the number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


/// The parts of the image headers that we care about.
#[derive(Debug)]
struct Headers {
    /// The export data directory entry.
    export_dir: IMAGE_DATA_DIRECTORY,
    /// The section header table.
    sections: Vec<IMAGE_SECTION_HEADER>,
}


/// A parser for PE/COFF images (PE32 and PE32+).
#[derive(Debug)]
pub(crate) struct PeParser<'data> {
    /// The raw image data.
    data: &'data [u8],
}

impl<'data> PeParser<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Self { data }
    }

    /// Retrieve the data starting at file offset `offset`.
    fn data_at(&self, offset: usize) -> Result<&'data [u8]> {
        self.data
            .get(offset..)
            .ok_or_unexpected_eof(|| format!("file offset {offset:#x} is out of bounds"))
    }

    fn parse_headers(&self) -> Result<Headers> {
        let mut data = self.data;
        let magic = data
            .read_u16()
            .ok_or_invalid_data(|| "failed to read DOS signature")?;
        if magic != IMAGE_DOS_SIGNATURE {
            return Err(Error::with_invalid_data(format!(
                "encountered unexpected DOS signature: {magic:#06x}"
            )))
        }

        let nt_offset = self
            .data_at(DOS_E_LFANEW_OFFSET)?
            .read_u32()
            .ok_or_unexpected_eof(|| "failed to read e_lfanew")?;
        let mut nt = self.data_at(nt_offset as usize)?;
        let signature = nt
            .read_u32()
            .ok_or_unexpected_eof(|| "failed to read NT signature")?;
        if signature != IMAGE_NT_SIGNATURE {
            return Err(Error::with_invalid_data(format!(
                "encountered unexpected NT signature: {signature:#010x}"
            )))
        }

        let file_header = nt
            .read_pod::<IMAGE_FILE_HEADER>()
            .ok_or_unexpected_eof(|| "failed to read IMAGE_FILE_HEADER")?;
        let opt_header = nt
            .read_slice(usize::from(file_header.SizeOfOptionalHeader))
            .ok_or_unexpected_eof(|| "failed to read optional header")?;
        // The section table follows the optional header immediately.
        let mut section_data = nt;

        let mut magic_data = opt_header;
        let opt_magic = magic_data
            .read_u16()
            .ok_or_unexpected_eof(|| "failed to read optional header magic")?;
        let (num_dirs_offset, dirs_offset) = match opt_magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => {
                (PE32_NUM_RVA_AND_SIZES_OFFSET, PE32_DATA_DIRECTORY_OFFSET)
            }
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => (
                PE32_PLUS_NUM_RVA_AND_SIZES_OFFSET,
                PE32_PLUS_DATA_DIRECTORY_OFFSET,
            ),
            _ => {
                return Err(Error::with_invalid_data(format!(
                    "encountered unexpected optional header magic: {opt_magic:#06x}"
                )))
            }
        };

        let num_dirs = opt_header
            .get(num_dirs_offset..)
            .and_then(|mut data| data.read_u32())
            .ok_or_unexpected_eof(|| "failed to read NumberOfRvaAndSizes")?;
        if num_dirs as usize <= IMAGE_DIRECTORY_ENTRY_EXPORT {
            return Err(Error::with_not_found("image has no export data directory"))
        }

        let export_dir = opt_header
            .get(dirs_offset..)
            .and_then(|mut data| {
                let _skipped =
                    data.read_slice(IMAGE_DIRECTORY_ENTRY_EXPORT * size_of::<IMAGE_DATA_DIRECTORY>())?;
                data.read_pod::<IMAGE_DATA_DIRECTORY>()
            })
            .ok_or_unexpected_eof(|| "failed to read export data directory")?;

        let sections = (0..file_header.NumberOfSections)
            .map(|idx| {
                section_data
                    .read_pod::<IMAGE_SECTION_HEADER>()
                    .ok_or_unexpected_eof(|| format!("failed to read section header {idx}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Headers {
            export_dir,
            sections,
        })
    }

    /// Convert a relative virtual address into a file offset, using
    /// the section that contains it.
    fn rva_to_offset(sections: &[IMAGE_SECTION_HEADER], rva: u32) -> Result<usize> {
        let section = sections
            .iter()
            .find(|section| section.contains_rva(rva))
            .ok_or_invalid_data(|| format!("no section contains RVA {rva:#x}"))?;

        let offset = u64::from(section.PointerToRawData) + u64::from(rva - section.VirtualAddress);
        usize::try_from(offset)
            .ok()
            .ok_or_invalid_data(|| format!("file offset {offset:#x} is not addressable"))
    }

    /// Read the image's export address table.
    pub fn export_table(&self) -> Result<ExportTable> {
        let Headers {
            export_dir,
            sections,
        } = self.parse_headers()?;

        if export_dir.VirtualAddress == 0 || export_dir.Size == 0 {
            return Err(Error::with_not_found("image has no export directory"))
        }

        let dir_offset = Self::rva_to_offset(&sections, export_dir.VirtualAddress)?;
        let dir = self
            .data_at(dir_offset)?
            .read_pod::<IMAGE_EXPORT_DIRECTORY>()
            .ok_or_unexpected_eof(|| "failed to read IMAGE_EXPORT_DIRECTORY")?;

        if dir.NumberOfFunctions == 0 {
            return Ok(ExportTable::default())
        }

        let funcs_offset = Self::rva_to_offset(&sections, dir.AddressOfFunctions)?;
        let count = dir.NumberOfFunctions as usize;
        let mut funcs = self
            .data_at(funcs_offset)?
            .read_slice(count.checked_mul(4).ok_or_invalid_data(|| {
                format!("export address table size ({count}) is invalid")
            })?)
            .ok_or_unexpected_eof(|| "export address table is truncated")?;

        let mut entries = Vec::with_capacity(count);
        for idx in 0..dir.NumberOfFunctions {
            // SANITY: We ensured that `count` entries are available.
            let addr = funcs.read_u32().unwrap_or_default();
            if addr == 0 {
                continue
            }

            let ordinal = dir.Base.checked_add(idx).ok_or_invalid_data(|| {
                format!("ordinal base {} overflows at index {idx}", dir.Base)
            })?;
            let () = entries.push(ExportEntry { ordinal, addr });
        }

        Ok(ExportTable {
            entries: entries.into_boxed_slice(),
        })
    }
}
