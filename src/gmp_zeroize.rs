// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Erase GMP-managed memory on release.
//!
//! Key shares, nonces and Paillier secrets live in [`BigNumber`]s backed
//! by GMP, which allocates, reallocates and copies limb buffers behind
//! Rust's back; a `Zeroize` impl on the wrapper type cannot reach those
//! buffers. GMP does, however, let an application install its own memory
//! functions. This module installs wrappers that zero every buffer as it
//! is released, so dropped secrets do not linger on the heap.
//!
//! [`BigNumber`]: libpaillier::unknown_order::BigNumber

use gmp_mpfr_sys::gmp::{
    allocate_function, free_function, get_memory_functions, reallocate_function,
    set_memory_functions,
};
use std::{ffi::c_void, ptr::addr_of_mut, slice, sync::Once};
use zeroize::Zeroize;

static ONCE: Once = Once::new();

/// Install the zeroizing GMP memory functions.
///
/// Call once at startup, before any protocol runs. Subsequent calls are
/// no-ops.
pub fn enable_zeroize() {
    ONCE.call_once(install_zeroizing_allocators);
}

fn install_zeroizing_allocators() {
    unsafe {
        // SAFETY: Calling a C API documented here:
        // https://gmplib.org/manual/Custom-Allocation
        get_memory_functions(
            addr_of_mut!(GMP_ALLOC),
            addr_of_mut!(GMP_REALLOC),
            addr_of_mut!(GMP_FREE),
        );

        // SAFETY: There are no documented error conditions.
        assert!(
            GMP_ALLOC.and(GMP_REALLOC).and(GMP_FREE).is_some(),
            "GMP should return its memory functions."
        );

        set_memory_functions(
            None, // Allocation stays as-is; fresh buffers hold no secrets.
            Some(realloc_and_zeroize),
            Some(free_and_zeroize),
        );
    }
}

static mut GMP_ALLOC: allocate_function = None;
static mut GMP_REALLOC: reallocate_function = None;
static mut GMP_FREE: free_function = None;

extern "C" fn realloc_and_zeroize(
    old_ptr: *mut c_void,
    old_size: usize,
    new_size: usize,
) -> *mut c_void {
    // The stock realloc would take ownership of the old buffer before we
    // could erase it, so allocate fresh, copy, and erase the old buffer
    // ourselves.
    unsafe {
        // SAFETY: this function can only be called after GMP_ALLOC is
        // set.
        let new_ptr = GMP_ALLOC.unwrap()(new_size);

        // SAFETY: Per GMP doc, "ptr is never NULL, it's always a
        // previously allocated block."
        {
            let min_size = old_size.min(new_size);
            let old_data = slice::from_raw_parts(old_ptr as *const u8, min_size);
            let new_data = slice::from_raw_parts_mut(new_ptr as *mut u8, min_size);
            new_data.copy_from_slice(old_data);
        }

        free_and_zeroize(old_ptr, old_size);

        new_ptr
    }
}

extern "C" fn free_and_zeroize(ptr: *mut c_void, size: usize) {
    unsafe {
        // SAFETY: Per GMP doc, "ptr is never NULL, it's always a
        // previously allocated block of size bytes."
        let data = slice::from_raw_parts_mut(ptr as *mut u8, size);

        data.zeroize();

        // SAFETY: this function can only be called after GMP_FREE is
        // set.
        GMP_FREE.unwrap()(ptr, size);
    }
}
