//! Ownership-tagged handles over engine allocations.
//!
//! An [`Owned`] handle is the only thing allowed to release a foreign
//! object, and it does so exactly once, in `Drop`. A [`Borrowed`] pointer is
//! tied to the lifetime of whatever owns the memory and is never released.
//! Views over foreign memory borrow one of the two, so the borrow checker
//! rejects any release while a view is still alive.

use std::ffi::CStr;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::ptr::NonNull;

use crate::api::RawApi;
use crate::error::EngineError;
use crate::layout::{ApriltagDetection, ApriltagDetector, ApriltagFamily, ImageU8, MatD, ZArray};
use crate::library::Engine;
use crate::view::{ArrayView, ImageView, ImageViewMut, MatrixView, MatrixViewMut};

/// A kind of foreign allocation and the single entry point that frees it.
pub trait ForeignKind {
    type Raw;
    /// Human-readable name used in errors.
    const WHAT: &'static str;

    /// # Safety
    ///
    /// `ptr` must be a live allocation of this kind obtained from `api`'s
    /// engine and must not be used afterwards.
    unsafe fn release(api: &RawApi, ptr: *mut Self::Raw);
}

macro_rules! foreign_kind {
    ($(#[$meta:meta])* $kind:ident, $raw:ty, $what:literal, $release:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $kind {}

        impl ForeignKind for $kind {
            type Raw = $raw;
            const WHAT: &'static str = $what;

            unsafe fn release(api: &RawApi, ptr: *mut $raw) {
                unsafe { (api.$release)(ptr) }
            }
        }
    };
}

foreign_kind!(
    /// Detector handle from `apriltag_detector_create`.
    DetectorKind, ApriltagDetector, "detector", detector_destroy
);
foreign_kind!(
    /// Family descriptor from `apriltag_family_create`.
    FamilyKind, ApriltagFamily, "tag family", family_destroy
);
foreign_kind!(
    /// Name array from `apriltag_family_list`.
    FamilyListKind, ZArray, "family list", family_list_destroy
);
foreign_kind!(
    /// Raster from `image_u8_create`.
    ImageKind, ImageU8, "image buffer", image_u8_destroy
);
foreign_kind!(
    /// Result array from `apriltag_detector_detect`.
    DetectionsKind, ZArray, "detection array", detections_destroy
);
foreign_kind!(
    /// Matrix from `matd_create` or `pose_from_homography`.
    MatrixKind, MatD, "matrix", matd_destroy
);

/// Owning handle to a foreign allocation.
///
/// Holds an [`Engine`] clone so the library outlives the allocation.
pub struct Owned<K: ForeignKind> {
    ptr: NonNull<K::Raw>,
    engine: Engine,
}

impl<K: ForeignKind> Owned<K> {
    /// Take ownership of a pointer just returned by the engine.
    ///
    /// A null pointer is reported as [`EngineError::NullHandle`].
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be a fresh allocation of kind `K` from `engine`
    /// that nothing else will release.
    pub unsafe fn from_raw(engine: &Engine, ptr: *mut K::Raw) -> Result<Self, EngineError> {
        NonNull::new(ptr)
            .map(|ptr| Self {
                ptr,
                engine: engine.clone(),
            })
            .ok_or(EngineError::NullHandle { what: K::WHAT })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut K::Raw {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Shared access to the mirrored header.
    #[inline]
    pub fn raw(&self) -> &K::Raw {
        // SAFETY: non-null and live for as long as `self`.
        unsafe { self.ptr.as_ref() }
    }

    /// Exclusive access to the mirrored header.
    #[inline]
    pub fn raw_mut(&mut self) -> &mut K::Raw {
        // SAFETY: non-null, live, and `&mut self` rules out other views.
        unsafe { self.ptr.as_mut() }
    }

    /// Non-owning pointer bounded by this handle's lifetime.
    #[inline]
    pub fn borrow(&self) -> Borrowed<'_, K::Raw> {
        Borrowed {
            ptr: self.ptr,
            _owner: PhantomData,
        }
    }
}

impl<K: ForeignKind> Drop for Owned<K> {
    fn drop(&mut self) {
        // SAFETY: the handle was created from a live allocation of kind `K`
        // and is dropped exactly once.
        unsafe { K::release(self.engine.api(), self.ptr.as_ptr()) }
    }
}

impl<K: ForeignKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("what", &K::WHAT)
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Non-owning pointer into memory owned by something that lives for `'a`.
pub struct Borrowed<'a, T> {
    ptr: NonNull<T>,
    _owner: PhantomData<&'a T>,
}

impl<T> Clone for Borrowed<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Borrowed<'_, T> {}

impl<'a, T> Borrowed<'a, T> {
    /// # Safety
    ///
    /// A non-null `ptr` must stay valid and unmodified for `'a`.
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _owner: PhantomData,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn get(&self) -> &'a T {
        // SAFETY: guaranteed live for `'a` by construction.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> fmt::Debug for Borrowed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Borrowed").field(&self.ptr).finish()
    }
}

impl Owned<ImageKind> {
    pub fn view(&self) -> ImageView<'_> {
        // SAFETY: the descriptor and its buffer live as long as `self`.
        unsafe { ImageView::from_raw(self.as_ptr()) }
    }

    pub fn view_mut(&mut self) -> ImageViewMut<'_> {
        // SAFETY: as above, and `&mut self` makes the view exclusive.
        unsafe { ImageViewMut::from_raw(self.as_ptr()) }
    }
}

impl Owned<MatrixKind> {
    pub fn view(&self) -> MatrixView<'_> {
        // SAFETY: header and payload live as long as `self`.
        unsafe { MatrixView::from_raw(self.as_ptr()) }
    }

    pub fn view_mut(&mut self) -> MatrixViewMut<'_> {
        // SAFETY: as above, and `&mut self` makes the view exclusive.
        unsafe { MatrixViewMut::from_raw(self.as_ptr()) }
    }
}

impl Owned<DetectionsKind> {
    /// Element view over the `apriltag_detection_t *` entries.
    pub fn view(&self) -> ArrayView<'_, *mut ApriltagDetection> {
        // SAFETY: the engine stores one detection pointer per element.
        unsafe { ArrayView::from_raw(self.as_ptr()) }
    }

    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records, valid until this array is released.
    ///
    /// A null entry means the engine's state is corrupt and is reported as
    /// [`EngineError::NullHandle`].
    pub fn records(
        &self,
    ) -> impl Iterator<Item = Result<Borrowed<'_, ApriltagDetection>, EngineError>> + '_ {
        self.view().iter().map(|ptr| {
            // SAFETY: records belong to this array and die with it.
            unsafe { Borrowed::from_raw(ptr) }.ok_or(EngineError::NullHandle {
                what: "detection record",
            })
        })
    }
}

impl Owned<FamilyListKind> {
    /// Copy every family name out of the enumeration array.
    pub fn names(&self) -> Vec<String> {
        // SAFETY: the engine stores one `char *` per element.
        let view = unsafe { ArrayView::<*const c_char>::from_raw(self.as_ptr()) };
        view.iter()
            .filter(|name| !name.is_null())
            .map(|name| {
                // SAFETY: non-null, NUL-terminated, owned by the live list.
                unsafe { CStr::from_ptr(name) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }
}

impl Owned<FamilyKind> {
    pub fn name(&self) -> String {
        family_name(self.raw())
    }
}

impl<'a> Borrowed<'a, ApriltagDetection> {
    /// The record's homography, borrowed for as long as the record.
    pub fn homography(&self) -> Option<MatrixView<'a>> {
        let h = self.get().h;
        // SAFETY: the matrix is owned by the record, which lives for `'a`.
        (!h.is_null()).then(|| unsafe { MatrixView::from_raw(h) })
    }

    /// The family descriptor the record was decoded with.
    pub fn family(&self) -> Option<Borrowed<'a, ApriltagFamily>> {
        // SAFETY: families are owned by the detector and outlive every
        // detection array it produces.
        unsafe { Borrowed::from_raw(self.get().family) }
    }
}

impl Borrowed<'_, ApriltagFamily> {
    pub fn name(&self) -> String {
        family_name(self.get())
    }
}

fn family_name(family: &ApriltagFamily) -> String {
    if family.name.is_null() {
        return String::new();
    }
    // SAFETY: non-null, NUL-terminated, owned by the live family.
    unsafe { CStr::from_ptr(family.name) }
        .to_string_lossy()
        .into_owned()
}
