//! # Borrowed Views
//!
//! Zero-copy windows into a `WireBuffer`. The arena is a plain byte vector with
//! no alignment guarantees, so elements are read and written unaligned; use
//! `as_slice` when a real `&[T]` is needed and the bytes happen to be aligned.

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

fn count<T>(bytes: usize) -> usize {
    match size_of::<T>() {
        0 => 0,
        size => bytes / size,
    }
}

/// A read-only view of `len()` values of `T` inside a buffer.
#[derive(Debug, Clone, Copy)]
pub struct View<'a, T> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> View<'a, T> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, _marker: PhantomData }
    }

    pub fn len(&self) -> usize { count::<T>(self.bytes.len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Reads element `i`, or `None` past the end.
    pub fn get(&self, i: usize) -> Option<T> {
        let size = size_of::<T>();
        if i >= self.len() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[i * size..(i + 1) * size]))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let view = *self;
        (0..view.len()).filter_map(move |i| view.get(i))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// The viewed bytes.
    pub fn as_bytes(&self) -> &'a [u8] { self.bytes }

    /// Reinterprets the bytes as `&[T]` when they are suitably aligned.
    pub fn as_slice(&self) -> Option<&'a [T]> {
        bytemuck::try_cast_slice(self.bytes).ok()
    }
}

/// A writable view of `len()` values of `T`, returned by `WireBuffer::delegate`.
#[derive(Debug)]
pub struct ViewMut<'a, T> {
    bytes: &'a mut [u8],
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> ViewMut<'a, T> {
    pub(crate) fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, _marker: PhantomData }
    }

    pub fn len(&self) -> usize { count::<T>(self.bytes.len()) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn get(&self, i: usize) -> Option<T> {
        let size = size_of::<T>();
        if i >= self.len() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[i * size..(i + 1) * size]))
    }

    /// Writes element `i`. Returns false past the end.
    pub fn set(&mut self, i: usize, value: T) -> bool {
        let size = size_of::<T>();
        if i >= self.len() {
            return false;
        }
        self.bytes[i * size..(i + 1) * size].copy_from_slice(bytemuck::bytes_of(&value));
        true
    }

    /// Writes the first element; the usual case for single-value results.
    pub fn write(&mut self, value: T) -> bool {
        self.set(0, value)
    }

    /// Copies as many values from `src` as fit. Returns how many were written.
    pub fn copy_from(&mut self, src: &[T]) -> usize {
        let n = src.len().min(self.len());
        let bytes: &[u8] = bytemuck::cast_slice(&src[..n]);
        self.bytes[..bytes.len()].copy_from_slice(bytes);
        n
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] { self.bytes }
}
