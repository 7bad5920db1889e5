use std::fs;
use std::mem::size_of;
use std::path::Path;
use std::path::PathBuf;

use crate::Addr;


/// Perform a binary search on a slice, returning the index of the match (if
/// found) or the one of the previous item (if any), taking into account
/// duplicates.
///
/// This functionality is useful for cases where we compare elements with a
/// size, such as ranges, and an address to search for can be covered by a range
/// whose start is before the item to search for.
pub(crate) fn find_match_or_lower_bound_by_key<T, U, F>(
    slice: &[T],
    item: U,
    mut f: F,
) -> Option<usize>
where
    U: Ord,
    F: FnMut(&T) -> U,
{
    let idx = slice.partition_point(|e| f(e) < item);

    // At this point `idx` references the first item greater or equal to the one
    // we are looking for.

    if let Some(e) = slice.get(idx) {
        // If the item at `idx` is equal to what we were looking for, we are
        // trivially done, as it's guaranteed to be the first one to match.
        if f(e) == item {
            return Some(idx)
        }
    }

    // Otherwise `idx` points to a "greater" item. Hence, we pick the previous
    // one, but then have to scan backwards for as long as we see this one item,
    // so that we end up reporting the index of the first of all equal ones.
    let idx = idx.checked_sub(1)?;
    let cmp_e = f(slice.get(idx)?);

    for i in (0..idx).rev() {
        let e = slice.get(i)?;
        if f(e) != cmp_e {
            return Some(i + 1)
        }
    }
    Some(idx)
}


/// Parse a hexadecimal address, with or without `0x` prefix.
///
/// Backticks, as used by debuggers to separate the upper and lower 32
/// bit of a 64 bit address (`00000001`00400000`), are ignored.
pub(crate) fn parse_hex_addr(s: &str) -> Option<Addr> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if s.is_empty() {
        return None
    }

    if s.contains('`') {
        let s = s.replace('`', "");
        Addr::from_str_radix(&s, 16).ok()
    } else {
        Addr::from_str_radix(s, 16).ok()
    }
}


/// Extract the bare module name from a path or file name.
///
/// Both `/` and `\` are treated as directory separators, because the
/// paths we see usually originate on Windows systems. The last
/// extension, if any, is stripped.
pub(crate) fn module_name(path: &str) -> &str {
    let name = path.rsplit(['\\', '/']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}


/// Search the provided directories for a file with one of the given
/// names, optionally descending into sub-directories.
///
/// Directories are searched in order and the first match wins. File
/// names are compared case-insensitively.
pub(crate) fn find_file(dirs: &[PathBuf], names: &[String], recursive: bool) -> Option<PathBuf> {
    fn search(dir: &Path, names: &[String], recursive: bool) -> Option<PathBuf> {
        let entries = fs::read_dir(dir).ok()?;
        let mut subdirs = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                if recursive {
                    let () = subdirs.push(path);
                }
                continue
            }

            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if names.iter().any(|name| name.eq_ignore_ascii_case(&file_name)) {
                return Some(path)
            }
        }

        // Files in the directory itself take precedence over those in
        // sub-directories.
        let () = subdirs.sort();
        subdirs
            .iter()
            .find_map(|subdir| search(subdir, names, recursive))
    }

    dirs.iter().find_map(|dir| search(dir, names, recursive))
}


/// A marker trait for "plain old data" data types.
///
/// # Safety
/// Only safe to implement for types that are valid for any bit pattern.
pub(crate) unsafe trait Pod {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}


/// An trait providing utility functions for reading data from a byte buffer.
pub(crate) trait ReadRaw<'data> {
    /// Ensure that `len` bytes are available for consumption.
    fn ensure(&self, len: usize) -> Option<()>;

    /// Consume and return `len` bytes.
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]>;

    /// Read anything implementing `Pod`.
    #[inline]
    fn read_pod<T>(&mut self) -> Option<T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
        //         is guaranteed to be valid and to point to memory of at least
        //         `sizeof(T)` bytes.
        let value = unsafe { data.as_ptr().cast::<T>().read_unaligned() };
        Some(value)
    }

    /// Read a `u16` value.
    #[inline]
    fn read_u16(&mut self) -> Option<u16> {
        self.read_pod::<u16>()
    }

    /// Read a `u32` value.
    #[inline]
    fn read_u32(&mut self) -> Option<u32> {
        self.read_pod::<u32>()
    }
}

impl<'data> ReadRaw<'data> for &'data [u8] {
    #[inline]
    fn ensure(&self, len: usize) -> Option<()> {
        if len > self.len() {
            return None
        }
        Some(())
    }

    #[inline]
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]> {
        self.ensure(len)?;
        let (a, b) = self.split_at(len);
        *self = b;
        Some(a)
    }
}
