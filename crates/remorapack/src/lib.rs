//! # Remorapack
//!
//! The marshalling substrate for remora call frames: a growable byte arena with a
//! forward read cursor and a backward read cursor.
//!
//! ## Philosophy
//!
//! - **Raw and Fixed**: Values are written in their in-memory representation.
//!   No tags, no schema, no versioning. Caller and callee agree on the order.
//! - **Self-describing arrays**: Every array carries a byte count prefix, and a
//!   zero count means "absent".
//! - **Borrowed views**: `assign`/`delegate` hand out views into the arena instead
//!   of copies. A view borrows the buffer, so any append that could reallocate
//!   is rejected by the borrow checker while the view is alive.
//!
//! ## Format
//!
//! - **Scalars**: `[Data: size_of::<T>()]`
//! - **Arrays**: `[ByteCount: u64][Data: ByteCount]`, or `[0u64]` for absent
//! - **Strings**: array of bytes including the terminating NUL
//! - **Framed buffer** (`dump`/`reset_from`): `[Length: u64][Data: Length]`
//!
//! All integers use the native byte order of the host. Both ends of a
//! connection must share endianness; mixed-endian deployments are unsupported.

use std::cell::Cell;
use std::ffi::CStr;
use std::io::Read;
use std::io::Write;
use std::mem::size_of;

use bytemuck::Pod;

pub mod view;

pub use view::View;
pub use view::ViewMut;

#[cfg(test)]
mod tests;

/// Default growth increment, in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Largest step `read_from` grows the arena by before bytes arrive.
pub const READ_CHUNK: usize = 64 * 1024;

/// Size of an array length prefix on the wire.
pub const PREFIX_SIZE: usize = size_of::<u64>();

/// Remorapack marshalling errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The arena could not grow to the requested capacity.
    Alloc { requested: usize },
    /// A read wanted more bytes than the cursor has left.
    ///
    /// Always a protocol mismatch between the writer and the reader.
    Range { wanted: usize, available: usize },
    /// A string payload did not end with a NUL byte.
    Unterminated,
    /// The byte source or sink failed.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Alloc { requested } => write!(f, "Can't grow buffer to {} bytes", requested),
            Error::Range { wanted, available } => {
                write!(f, "Can't read {} bytes, only {} available", wanted, available)
            }
            Error::Unterminated => write!(f, "String payload is not NUL-terminated"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

/// Specialized `Result` for Remorapack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A growable marshalling buffer with dual read cursors.
///
/// # Invariants
///
/// - `offset <= back_offset <= length <= size`
/// - Every append resets `back_offset` to `length`.
/// - Forward reads stop at `back_offset` and backward reads stop at `offset`,
///   so the two cursors never hand out the same bytes.
///
/// The cursors live in `Cell`s so reads only need `&self`. That lets several
/// views from the same buffer coexist, while every operation that writes takes
/// `&mut self`. The buffer is `Send` but not `Sync`: it belongs to one request.
#[derive(Debug, Clone)]
pub struct WireBuffer {
    /// Backing storage. `buf.len()` is the capacity (`size`).
    buf: Vec<u8>,
    block_size: usize,
    length: usize,
    offset: Cell<usize>,
    back_offset: Cell<usize>,
}

impl Default for WireBuffer {
    fn default() -> Self { Self::new() }
}

impl WireBuffer {
    /// Creates an empty buffer growing in `BLOCK_SIZE` increments.
    pub fn new() -> Self {
        Self::with_block_size(BLOCK_SIZE)
    }

    /// Creates an empty buffer growing in `block_size` increments.
    ///
    /// A zero block size is treated as 1.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            block_size: block_size.max(1),
            length: 0,
            offset: Cell::new(0),
            back_offset: Cell::new(0),
        }
    }

    /// Creates a buffer holding a copy of `bytes`, ready to be read from the start.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.push_bytes(bytes)?;
        Ok(buffer)
    }

    /// Creates a buffer by draining one framed payload (`dump` format) from `src`.
    pub fn from_reader<R: Read + ?Sized>(src: &mut R) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.reset_from(src)?;
        Ok(buffer)
    }

    /// Current capacity in bytes.
    pub fn size(&self) -> usize { self.buf.len() }
    /// Bytes written so far.
    pub fn len(&self) -> usize { self.length }
    pub fn block_size(&self) -> usize { self.block_size }
    pub fn offset(&self) -> usize { self.offset.get() }
    pub fn back_offset(&self) -> usize { self.back_offset.get() }

    /// True once the forward cursor has consumed everything written.
    pub fn is_empty(&self) -> bool {
        self.offset.get() == self.length
    }

    /// The written region `[0, length)`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.length]
    }

    // ------------------------------------------------------------------------
    //  GROWTH
    // ------------------------------------------------------------------------

    /// Grows capacity to the smallest multiple of `block_size` holding `required` bytes.
    fn grow_to(&mut self, required: usize) -> Result<()> {
        if required <= self.buf.len() {
            return Ok(());
        }
        let new_size = required
            .div_ceil(self.block_size)
            .checked_mul(self.block_size)
            .ok_or(Error::Alloc { requested: required })?;
        self.buf
            .try_reserve_exact(new_size - self.buf.len())
            .map_err(|_| Error::Alloc { requested: new_size })?;
        self.buf.resize(new_size, 0);
        Ok(())
    }

    /// Reserves `n` bytes at the tail and returns where they start.
    fn claim(&mut self, n: usize) -> Result<usize> {
        let required = self.length.checked_add(n).ok_or(Error::Alloc { requested: usize::MAX })?;
        self.grow_to(required)?;
        let start = self.length;
        self.length = required;
        self.back_offset.set(self.length);
        Ok(start)
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let start = self.claim(bytes.len())?;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Byte size of `n` values of `T` about to be written.
    fn write_span<T>(n: usize) -> Result<usize> {
        size_of::<T>().checked_mul(n).ok_or(Error::Alloc { requested: usize::MAX })
    }

    // ------------------------------------------------------------------------
    //  APPEND
    // ------------------------------------------------------------------------

    /// Appends the in-memory representation of `value`.
    pub fn append<T: Pod>(&mut self, value: T) -> Result<()> {
        self.push_bytes(bytemuck::bytes_of(&value))
    }

    /// Appends a length-prefixed array.
    ///
    /// `None` (and an empty slice) encode as a bare zero prefix, which decodes as absent.
    pub fn append_array<T: Pod>(&mut self, items: Option<&[T]>) -> Result<()> {
        let Some(items) = items else {
            return self.append(0u64);
        };
        let bytes: &[u8] = bytemuck::cast_slice(items);
        self.append(bytes.len() as u64)?;
        self.push_bytes(bytes)
    }

    /// Appends `s` as a byte array including a terminating NUL.
    pub fn append_string(&mut self, s: &str) -> Result<()> {
        self.append((s.len() + 1) as u64)?;
        self.push_bytes(s.as_bytes())?;
        self.push_bytes(&[0])
    }

    /// Appends an opaque pointer-sized handle. The pointee is never touched.
    pub fn append_marshal<T>(&mut self, handle: *const T) -> Result<()> {
        self.append(handle as usize as u64)
    }

    /// Reserves room for `n` values of `T` behind a length prefix and returns a
    /// mutable view over it, so a handler can fill in results in place.
    ///
    /// The reserved bytes start zeroed.
    pub fn delegate<T: Pod>(&mut self, n: usize) -> Result<ViewMut<'_, T>> {
        let size = Self::write_span::<T>(n)?;
        self.append(size as u64)?;
        let start = self.claim(size)?;
        let region = &mut self.buf[start..start + size];
        region.fill(0);
        Ok(ViewMut::new(region))
    }

    /// Reads `n` bytes from `src` straight into the tail.
    ///
    /// Capacity grows at most `READ_CHUNK` bytes ahead of what `src` has
    /// delivered. On failure the length is unchanged.
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R, n: usize) -> Result<()> {
        let start = self.length;
        let required = start.checked_add(n).ok_or(Error::Alloc { requested: usize::MAX })?;
        let mut filled = start;
        while filled < required {
            let end = required.min(filled.saturating_add(READ_CHUNK));
            self.grow_to(end)?;
            src.read_exact(&mut self.buf[filled..end])?;
            filled = end;
        }
        self.length = required;
        self.back_offset.set(self.length);
        Ok(())
    }

    /// Reads `n` values of `T` from `src` straight into the tail.
    pub fn read_values<T: Pod, R: Read + ?Sized>(&mut self, src: &mut R, n: usize) -> Result<()> {
        self.read_from(src, Self::write_span::<T>(n)?)
    }

    // ------------------------------------------------------------------------
    //  FORWARD READS
    // ------------------------------------------------------------------------

    /// Advances the forward cursor over `n` bytes and returns where they start.
    fn take(&self, n: usize) -> Result<usize> {
        let offset = self.offset.get();
        let limit = self.back_offset.get();
        let available = limit.saturating_sub(offset);
        if n > available {
            return Err(Error::Range { wanted: n, available });
        }
        self.offset.set(offset + n);
        Ok(offset)
    }

    /// Byte size of `n` values of `T` about to be read.
    fn read_span<T>(&self, n: usize) -> Result<usize> {
        size_of::<T>().checked_mul(n).ok_or_else(|| Error::Range {
            wanted: usize::MAX,
            available: self.back_offset.get().saturating_sub(self.offset.get()),
        })
    }

    /// Reads an array prefix. Zero means absent.
    fn take_prefix(&self) -> Result<usize> {
        Ok(self.get::<u64>()? as usize)
    }

    /// Reads one value at the forward cursor.
    pub fn get<T: Pod>(&self) -> Result<T> {
        let size = size_of::<T>();
        let start = self.take(size)?;
        Ok(bytemuck::pod_read_unaligned(&self.buf[start..start + size]))
    }

    /// Reads an array of `n` values into an owned `Vec`, or `None` if absent.
    pub fn get_array<T: Pod>(&self, n: usize) -> Result<Option<Vec<T>>> {
        Ok(self.assign::<T>(n)?.map(|view| view.to_vec()))
    }

    /// Reads a whole array, sized by its prefix, into an owned `Vec`.
    pub fn get_all<T: Pod>(&self) -> Result<Option<Vec<T>>> {
        Ok(self.assign_all::<T>()?.map(|view| view.to_vec()))
    }

    /// Borrows `n` values of an array in place, or `None` if absent.
    ///
    /// The view keeps the buffer borrowed, so the buffer can't be appended to
    /// (and possibly reallocated) while the view is alive:
    ///
    /// ```compile_fail
    /// use remorapack::WireBuffer;
    ///
    /// let mut buf = WireBuffer::new();
    /// buf.append_array(Some(&[1u32, 2, 3][..])).unwrap();
    /// let view = buf.assign::<u32>(3).unwrap().unwrap();
    /// buf.append(4u32).unwrap(); // error: `buf` is borrowed by `view`
    /// assert_eq!(view.get(0), Some(1));
    /// ```
    pub fn assign<T: Pod>(&self, n: usize) -> Result<Option<View<'_, T>>> {
        if self.take_prefix()? == 0 {
            return Ok(None);
        }
        let size = self.read_span::<T>(n)?;
        let start = self.take(size)?;
        Ok(Some(View::new(&self.buf[start..start + size])))
    }

    /// Borrows a whole array in place, with the element count taken from the prefix.
    pub fn assign_all<T: Pod>(&self) -> Result<Option<View<'_, T>>> {
        let bytes = self.take_prefix()?;
        if bytes == 0 {
            return Ok(None);
        }
        let whole = match size_of::<T>() {
            0 => 0,
            size => bytes - bytes % size,
        };
        // Trailing bytes that don't fill a whole element are consumed but not viewed.
        let start = self.take(bytes)?;
        Ok(Some(View::new(&self.buf[start..start + whole])))
    }

    /// Borrows a NUL-terminated string written by `append_string`.
    pub fn assign_string(&self) -> Result<Option<&CStr>> {
        let Some(view) = self.assign_all::<u8>()? else {
            return Ok(None);
        };
        CStr::from_bytes_with_nul(view.as_bytes())
            .map(Some)
            .map_err(|_| Error::Unterminated)
    }

    /// Reads a handle written by `append_marshal`.
    pub fn unmarshal<T>(&self) -> Result<*mut T> {
        Ok(self.get::<u64>()? as usize as *mut T)
    }

    // ------------------------------------------------------------------------
    //  BACKWARD READS
    // ------------------------------------------------------------------------

    /// Moves the backward cursor down over `n` bytes, then over `skip` more.
    fn take_back(&self, n: usize, skip: usize) -> Result<usize> {
        let back = self.back_offset.get();
        let floor = self.offset.get();
        let available = back.saturating_sub(floor);
        let Some(wanted) = n.checked_add(skip) else {
            return Err(Error::Range { wanted: usize::MAX, available });
        };
        if wanted > available {
            return Err(Error::Range { wanted, available });
        }
        let start = back - n;
        self.back_offset.set(back - wanted);
        Ok(start)
    }

    /// Pops one value from the tail.
    pub fn back_get<T: Pod>(&self) -> Result<T> {
        let size = size_of::<T>();
        let start = self.take_back(size, 0)?;
        Ok(bytemuck::pod_read_unaligned(&self.buf[start..start + size]))
    }

    /// Pops an array of `n` values from the tail, skipping its length prefix too.
    pub fn back_assign<T: Pod>(&self, n: usize) -> Result<View<'_, T>> {
        let size = self.read_span::<T>(n)?;
        let start = self.take_back(size, PREFIX_SIZE)?;
        Ok(View::new(&self.buf[start..start + size]))
    }

    // ------------------------------------------------------------------------
    //  FRAMING
    // ------------------------------------------------------------------------

    /// Clears length and cursors. Capacity is kept for reuse.
    pub fn reset(&mut self) {
        self.length = 0;
        self.offset.set(0);
        self.back_offset.set(0);
    }

    /// Clears the buffer, then drains one framed payload from `src`.
    pub fn reset_from<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<()> {
        self.reset();
        let mut header = [0u8; PREFIX_SIZE];
        src.read_exact(&mut header)?;
        let size = u64::from_ne_bytes(header) as usize;
        self.read_from(src, size)
    }

    /// Writes `[length: u64][bytes]` to `dst`.
    pub fn dump<W: Write + ?Sized>(&self, dst: &mut W) -> Result<()> {
        dst.write_all(&(self.length as u64).to_ne_bytes())?;
        dst.write_all(self.as_bytes())?;
        Ok(())
    }
}
