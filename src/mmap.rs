use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A read-only memory mapping of an entire module image.
#[derive(Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping, absent for empty files.
    mapping: Option<Mapping>,
}

impl Mmap {
    /// Memory map the file at the provided `path`.
    pub(crate) fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::map(&file).with_context(|| format!("failed to map {}", path.display()))
    }

    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = usize::try_from(file.metadata()?.len())
            .map_err(Error::with_invalid_data)
            .context("file is too large to mmap")?;

        // Mapping a region of size 0 is refused by the kernel. An empty
        // image is simply one without any data.
        if len == 0 {
            return Ok(Self { mapping: None })
        }

        // SAFETY: We only ever read from the mapping. Concurrent
        //         modification of the underlying file is outside of our
        //         control and assumed not to happen.
        let mapping = unsafe { MmapOptions::new().len(len).map(file) }?;
        Ok(Self {
            mapping: Some(mapping),
        })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.mapping.as_deref().unwrap_or(&[])
    }
}
