//! Zero-copy views over engine-owned buffers.
//!
//! A view is valid only while its backing foreign object is alive. Safe
//! code obtains views by borrowing an [`Owned`](crate::Owned) handle or a
//! [`Borrowed`](crate::Borrowed) record; anything that must outlive the
//! foreign object is copied out with `copy_*` / `to_*`.
//!
//! Null or zero-sized descriptors violate the callers' preconditions and
//! panic.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;
use std::slice;

use nalgebra::{Matrix3, Matrix4};

use crate::layout::{ImageU8, MatD, ZArray};

fn image_dims(desc: &ImageU8) -> (usize, usize, usize) {
    assert!(
        desc.width > 0 && desc.height > 0,
        "zero-sized image descriptor ({}x{})",
        desc.width,
        desc.height
    );
    assert!(
        desc.stride >= desc.width,
        "image stride {} is smaller than width {}",
        desc.stride,
        desc.width
    );
    assert!(!desc.buf.is_null(), "image descriptor has a null buffer");
    let (width, height) = (desc.width as usize, desc.height as usize);
    (width, height, desc.stride as usize)
}

/// Read-only `height × stride` byte view over an `image_u8_t`.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    width: usize,
    height: usize,
    stride: usize,
    data: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// # Safety
    ///
    /// `desc` must point to a live descriptor whose buffer stays valid and
    /// unmodified for `'a`.
    pub unsafe fn from_raw(desc: *const ImageU8) -> Self {
        assert!(!desc.is_null(), "null image descriptor");
        let desc = unsafe { &*desc };
        let (width, height, stride) = image_dims(desc);
        let data = unsafe { slice::from_raw_parts(desc.buf, height * stride) };
        Self {
            width,
            height,
            stride,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The whole padded buffer, `height * stride` bytes.
    #[inline]
    pub fn as_padded(&self) -> &'a [u8] {
        self.data
    }

    /// Visible pixels of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &'a [u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Row `y` including the stride padding.
    #[inline]
    pub fn row_padded(&self, y: usize) -> &'a [u8] {
        let start = y * self.stride;
        &self.data[start..start + self.stride]
    }

    /// Tightly packed `width * height` copy with the padding dropped.
    pub fn copy_cropped(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }
}

/// Writable `height × stride` byte view over an `image_u8_t`.
#[derive(Debug)]
pub struct ImageViewMut<'a> {
    width: usize,
    height: usize,
    stride: usize,
    data: &'a mut [u8],
}

impl<'a> ImageViewMut<'a> {
    /// # Safety
    ///
    /// `desc` must point to a live descriptor whose buffer stays valid for
    /// `'a` and is not accessed through any other path meanwhile.
    pub unsafe fn from_raw(desc: *mut ImageU8) -> Self {
        assert!(!desc.is_null(), "null image descriptor");
        let desc = unsafe { &*desc };
        let (width, height, stride) = image_dims(desc);
        let data = unsafe { slice::from_raw_parts_mut(desc.buf, height * stride) };
        Self {
            width,
            height,
            stride,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Fill the visible region from a tightly packed row-major buffer.
    ///
    /// Padding bytes are left untouched.
    pub fn copy_from_packed(&mut self, src: &[u8]) {
        assert_eq!(
            src.len(),
            self.width * self.height,
            "packed source does not match a {}x{} image",
            self.width,
            self.height
        );
        let width = self.width;
        for (y, src_row) in src.chunks_exact(width).enumerate() {
            self.row_mut(y).copy_from_slice(src_row);
        }
    }
}

fn matrix_dims(header: &MatD) -> (usize, usize) {
    assert!(
        header.nrows > 0 && header.ncols > 0,
        "zero-sized matrix ({}x{})",
        header.nrows,
        header.ncols
    );
    (header.nrows as usize, header.ncols as usize)
}

/// Read-only `nrows × ncols` view over a `matd_t`.
#[derive(Clone, Copy, Debug)]
pub struct MatrixView<'a> {
    nrows: usize,
    ncols: usize,
    data: &'a [f64],
}

impl<'a> MatrixView<'a> {
    /// # Safety
    ///
    /// `m` must point to a live matrix whose payload stays valid and
    /// unmodified for `'a`.
    pub unsafe fn from_raw(m: *const MatD) -> Self {
        assert!(!m.is_null(), "null matrix");
        let (nrows, ncols) = matrix_dims(unsafe { &*m });
        // The payload is a flexible array member; derive its pointer from the
        // allocation pointer rather than from a reference to the header.
        let payload = unsafe { ptr::addr_of!((*m).data) } as *const f64;
        let data = unsafe { slice::from_raw_parts(payload, nrows * ncols) };
        Self { nrows, ncols, data }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f64 {
        assert!(
            r < self.nrows && c < self.ncols,
            "matrix index out of range"
        );
        self.data[r * self.ncols + c]
    }

    /// Row-major payload.
    #[inline]
    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// Deep copy into a 3x3 matrix; `None` if the shape differs.
    pub fn to_matrix3(&self) -> Option<Matrix3<f64>> {
        (self.nrows == 3 && self.ncols == 3).then(|| Matrix3::from_row_slice(self.data))
    }

    /// Deep copy into a 4x4 matrix; `None` if the shape differs.
    pub fn to_matrix4(&self) -> Option<Matrix4<f64>> {
        (self.nrows == 4 && self.ncols == 4).then(|| Matrix4::from_row_slice(self.data))
    }
}

/// Writable `nrows × ncols` view over a `matd_t`.
#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    nrows: usize,
    ncols: usize,
    data: &'a mut [f64],
}

impl<'a> MatrixViewMut<'a> {
    /// # Safety
    ///
    /// `m` must point to a live matrix whose payload stays valid for `'a`
    /// and is not accessed through any other path meanwhile.
    pub unsafe fn from_raw(m: *mut MatD) -> Self {
        assert!(!m.is_null(), "null matrix");
        let (nrows, ncols) = matrix_dims(unsafe { &*m });
        let payload = unsafe { ptr::addr_of_mut!((*m).data) } as *mut f64;
        let data = unsafe { slice::from_raw_parts_mut(payload, nrows * ncols) };
        Self { nrows, ncols, data }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data[..]
    }

    /// Overwrite the payload from a row-major 3x3 matrix.
    pub fn copy_from_matrix3(&mut self, m: &Matrix3<f64>) {
        assert!(
            self.nrows == 3 && self.ncols == 3,
            "expected a 3x3 matrix, got {}x{}",
            self.nrows,
            self.ncols
        );
        for r in 0..3 {
            for c in 0..3 {
                self.data[r * 3 + c] = m[(r, c)];
            }
        }
    }
}

/// Typed read-only view over the elements of a `zarray_t`.
///
/// Elements are copied out by value; `T` is the element type the engine
/// stores (typically a pointer).
#[derive(Clone, Copy, Debug)]
pub struct ArrayView<'a, T: Copy> {
    len: usize,
    el_sz: usize,
    data: *const u8,
    _marker: PhantomData<&'a T>,
}

impl<'a, T: Copy> ArrayView<'a, T> {
    /// # Safety
    ///
    /// `arr` must point to a live array of `T` elements that stays valid and
    /// unmodified for `'a`.
    pub unsafe fn from_raw(arr: *const ZArray) -> Self {
        assert!(!arr.is_null(), "null dynamic array");
        let header = unsafe { &*arr };
        let len = usize::try_from(header.size).unwrap_or(0);
        if len > 0 {
            assert_eq!(
                header.el_sz,
                size_of::<T>(),
                "dynamic array element size does not match the requested type"
            );
            assert!(
                !header.data.is_null(),
                "non-empty dynamic array without data"
            );
        }
        Self {
            len,
            el_sz: header.el_sz,
            data: header.data as *const u8,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        (index < self.len).then(|| {
            // SAFETY: in bounds, and the element size was checked at construction.
            unsafe { ptr::read_unaligned(self.data.add(index * self.el_sz) as *const T) }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let view = *self;
        (0..view.len).filter_map(move |i| view.get(i))
    }
}
