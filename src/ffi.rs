//! Pointer plumbing between the C API and the Rust objects behind it.
//!
//! `SSL_CTX` and `SSL` are handed out as `Arc<Mutex<_>>` so that
//! `*_up_ref` and `*_free` are just reference count operations.
//! `SSL_METHOD` and `SSL_CIPHER` are statics, and are handed out as plain
//! references that C code never frees.

use core::ffi::{c_char, CStr};
use std::mem;
use std::sync::Arc;

/// The C pointer is really an `Arc<Castable::RustType>`.
pub(crate) struct OwnershipArc;

/// The C pointer is really a `&'static Castable::RustType`.
pub(crate) struct OwnershipRef;

pub(crate) trait OwnershipMarker {}

impl OwnershipMarker for OwnershipArc {}

impl OwnershipMarker for OwnershipRef {}

/// Ties an OpenSSL-named type (like `SSL_CTX`) to the Rust type its pointers
/// actually address, and says who owns it.
///
/// A type can only pick one `Ownership`, so the compiler rejects any attempt
/// to free a static `SSL_CIPHER` as if it were an `Arc`.
pub(crate) trait Castable {
    type Ownership: OwnershipMarker;

    /// What the pointer really points at.
    type RustType;
}

pub(crate) fn cast_const_ptr<C>(ptr: *const C) -> *const C::RustType
where
    C: Castable,
{
    ptr as *const _
}

/// Move `src` into a fresh `Arc` and give the caller its only reference.
pub(crate) fn to_arc_mut_ptr<C>(src: C::RustType) -> *mut C
where
    C: Castable<Ownership = OwnershipArc>,
{
    Arc::into_raw(Arc::new(src)) as *mut C
}

/// Take a new reference to the object behind `ptr`, leaving the caller's
/// reference untouched.
///
/// Returns `None` for `NULL`.
///
/// ## Unsafety:
///
/// If non-null, `ptr` must have come from [`to_arc_mut_ptr`] and not yet
/// been released by [`free_arc`].
pub(crate) fn clone_arc<C>(ptr: *const C) -> Option<Arc<C::RustType>>
where
    C: Castable<Ownership = OwnershipArc>,
{
    if ptr.is_null() {
        return None;
    }
    let rs_typed = cast_const_ptr::<C>(ptr);
    let r = unsafe { Arc::from_raw(rs_typed) };
    let val = Arc::clone(&r);
    // `r` is the caller's reference
    mem::forget(r);
    Some(val)
}

/// Release the caller's reference to the object behind `ptr`.
///
/// The object is dropped once the last `SSL_free`/`SSL_CTX_free` (or the
/// last `SSL` holding its `SSL_CTX`) goes away. `NULL` is ignored.
pub(crate) fn free_arc<C>(ptr: *const C)
where
    C: Castable<Ownership = OwnershipArc>,
{
    if ptr.is_null() {
        return;
    }
    let rs_typed = cast_const_ptr(ptr);
    drop(unsafe { Arc::from_raw(rs_typed) });
}

/// Borrow the object behind a `NULL`-able pointer.
pub(crate) fn try_from<'a, C, O>(from: *const C) -> Option<&'a C::RustType>
where
    C: Castable<Ownership = O>,
{
    unsafe { cast_const_ptr(from).as_ref() }
}

/// Like [`try_from`], but a `NULL` pointer raises
/// `crate::error::Error::null_pointer()` and returns from the caller.
macro_rules! try_ref_from_ptr {
    ( $var:ident ) => {
        match $crate::ffi::try_from($var) {
            Some(c) => c,
            None => return $crate::error::Error::null_pointer().raise().into(),
        }
    };
}

pub(crate) use try_ref_from_ptr;

/// Like [`clone_arc`], but a `NULL` pointer raises
/// `crate::error::Error::null_pointer()` and returns from the caller.
///
/// The two-argument version returns `$error_code` instead of converting the
/// error, for functions like `SSL_read` whose failure value is not the
/// usual one.
macro_rules! try_clone_arc {
    ( $var:ident ) => {
        match $crate::ffi::clone_arc($var) {
            Some(c) => c,
            None => return $crate::error::Error::null_pointer().raise().into(),
        }
    };
    ( $var:ident, $error_code:expr ) => {
        match $crate::ffi::clone_arc($var) {
            Some(c) => c,
            None => {
                $crate::error::Error::null_pointer().raise();
                return $error_code;
            }
        }
    };
}

pub(crate) use try_clone_arc;

/// Makes a slice from a pointer and signed length.
///
/// A null pointer or negative length raises an error and returns from the
/// caller; with three arguments the caller returns `$error_code`.
macro_rules! try_slice_int {
    ( $ptr:expr, $count:expr ) => {
        if $ptr.is_null() || $count < 0 {
            return $crate::error::Error::null_pointer().raise().into();
        } else {
            unsafe { ::core::slice::from_raw_parts($ptr, $count as usize) }
        }
    };
    ( $ptr:expr, $count:expr, $error_code:expr ) => {
        if $ptr.is_null() || $count < 0 {
            $crate::error::Error::null_pointer().raise();
            return $error_code;
        } else {
            unsafe { ::core::slice::from_raw_parts($ptr, $count as usize) }
        }
    };
}

pub(crate) use try_slice_int;

/// Mutable twin of [`try_slice_int`], for read buffers.
macro_rules! try_mut_slice_int {
    ( $ptr:expr, $count:expr ) => {
        if $ptr.is_null() || $count < 0 {
            return $crate::error::Error::null_pointer().raise().into();
        } else {
            unsafe { ::core::slice::from_raw_parts_mut($ptr, $count as usize) }
        }
    };
    ( $ptr:expr, $count:expr, $error_code:expr ) => {
        if $ptr.is_null() || $count < 0 {
            $crate::error::Error::null_pointer().raise();
            return $error_code;
        } else {
            unsafe { ::core::slice::from_raw_parts_mut($ptr, $count as usize) }
        }
    };
}

pub(crate) use try_mut_slice_int;

/// Fixed-length slice, eg. the two bytes of a cipher suite id.
macro_rules! try_slice {
    ( $ptr:expr, $count:expr ) => {
        if $ptr.is_null() {
            return $crate::error::Error::null_pointer().raise().into();
        } else {
            unsafe { ::core::slice::from_raw_parts($ptr, $count) }
        }
    };
}

pub(crate) use try_slice;

/// Paths, host names and cipher lists arrive as C strings. `NULL` and
/// non-UTF-8 both come out as `None`.
pub(crate) fn str_from_cstring(s: *const c_char) -> Option<&'static str> {
    if s.is_null() {
        return None;
    }

    let cstr = unsafe { CStr::from_ptr(s) };
    cstr.to_str().ok()
}

macro_rules! try_str {
    ( $ptr:expr) => {
        match $crate::ffi::str_from_cstring($ptr) {
            Some(s) => s,
            None => return $crate::error::Error::null_pointer().raise().into(),
        }
    };
}

pub(crate) use try_str;
