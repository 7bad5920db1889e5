#![allow(non_camel_case_types, non_snake_case)]

use crate::util::Pod;


/// `MZ`
pub(crate) const IMAGE_DOS_SIGNATURE: u16 = 0x5a4d;
/// Offset of `e_lfanew` in the DOS header.
pub(crate) const DOS_E_LFANEW_OFFSET: usize = 0x3c;
/// `PE\0\0`
pub(crate) const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

pub(crate) const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub(crate) const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;

/// Offsets of `NumberOfRvaAndSizes` and the data directory array within
/// the PE32 optional header.
pub(crate) const PE32_NUM_RVA_AND_SIZES_OFFSET: usize = 92;
pub(crate) const PE32_DATA_DIRECTORY_OFFSET: usize = 96;
/// Offsets of `NumberOfRvaAndSizes` and the data directory array within
/// the PE32+ optional header.
pub(crate) const PE32_PLUS_NUM_RVA_AND_SIZES_OFFSET: usize = 108;
pub(crate) const PE32_PLUS_DATA_DIRECTORY_OFFSET: usize = 112;

pub(crate) const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;


#[derive(Debug)]
#[repr(C)]
pub(crate) struct IMAGE_FILE_HEADER {
    pub Machine: u16,
    pub NumberOfSections: u16,
    pub TimeDateStamp: u32,
    pub PointerToSymbolTable: u32,
    pub NumberOfSymbols: u32,
    pub SizeOfOptionalHeader: u16,
    pub Characteristics: u16,
}

// SAFETY: `IMAGE_FILE_HEADER` is valid for any bit pattern.
unsafe impl Pod for IMAGE_FILE_HEADER {}


#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct IMAGE_DATA_DIRECTORY {
    pub VirtualAddress: u32,
    pub Size: u32,
}

// SAFETY: `IMAGE_DATA_DIRECTORY` is valid for any bit pattern.
unsafe impl Pod for IMAGE_DATA_DIRECTORY {}


#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub(crate) struct IMAGE_SECTION_HEADER {
    pub Name: [u8; 8],
    pub VirtualSize: u32,
    pub VirtualAddress: u32,
    pub SizeOfRawData: u32,
    pub PointerToRawData: u32,
    pub PointerToRelocations: u32,
    pub PointerToLinenumbers: u32,
    pub NumberOfRelocations: u16,
    pub NumberOfLinenumbers: u16,
    pub Characteristics: u32,
}

// SAFETY: `IMAGE_SECTION_HEADER` is valid for any bit pattern.
unsafe impl Pod for IMAGE_SECTION_HEADER {}

impl IMAGE_SECTION_HEADER {
    /// Check whether the provided relative virtual address falls into
    /// this section.
    pub fn contains_rva(&self, rva: u32) -> bool {
        // Some linkers leave `VirtualSize` at zero, in which case the
        // raw data size is the best we can go by.
        let size = if self.VirtualSize != 0 {
            self.VirtualSize
        } else {
            self.SizeOfRawData
        };
        rva >= self.VirtualAddress && u64::from(rva) < u64::from(self.VirtualAddress) + u64::from(size)
    }
}


#[derive(Debug)]
#[repr(C)]
pub(crate) struct IMAGE_EXPORT_DIRECTORY {
    pub Characteristics: u32,
    pub TimeDateStamp: u32,
    pub MajorVersion: u16,
    pub MinorVersion: u16,
    pub Name: u32,
    pub Base: u32,
    pub NumberOfFunctions: u32,
    pub NumberOfNames: u32,
    pub AddressOfFunctions: u32,
    pub AddressOfNames: u32,
    pub AddressOfNameOrdinals: u32,
}

// SAFETY: `IMAGE_EXPORT_DIRECTORY` is valid for any bit pattern.
unsafe impl Pod for IMAGE_EXPORT_DIRECTORY {}
