//! jemalloc controls used by the daemon: arena purging and heap statistics.

use std::ffi::{CStr, c_void};

use crate::probe::HeapStats;

/// 4096 is `MALLCTL_ARENAS_ALL`: the purge applies to every arena.
const PURGE_ALL_ARENAS: &CStr = c"arena.4096.purge";

/// Releases unused memory back to the operating system.
/// Called after every gather cycle so the scrape buffers of one cycle do not
/// stay resident until the next.
pub fn release_memory_to_os() {
    // SAFETY: `arena.<i>.purge` takes no input or output; the name is a
    // NUL-terminated literal and every pointer argument is null.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            PURGE_ALL_ARENAS.as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

/// Current `stats.allocated` and `stats.resident`, refreshed through `epoch`.
/// `None` if jemalloc refuses any of the reads.
pub fn heap_stats() -> Option<HeapStats> {
    refresh_epoch()?;
    Some(HeapStats {
        allocated: read_size(c"stats.allocated")?,
        resident: read_size(c"stats.resident")?,
    })
}

fn refresh_epoch() -> Option<()> {
    let mut epoch: u64 = 1;
    // SAFETY: `epoch` is a u64 control; we pass a valid pointer to a u64 and
    // its exact size as the new value.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            c"epoch".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            (&mut epoch as *mut u64).cast::<c_void>(),
            size_of::<u64>(),
        )
    };
    (rc == 0).then_some(())
}

fn read_size(name: &CStr) -> Option<usize> {
    let mut value: usize = 0;
    let mut len = size_of::<usize>();
    // SAFETY: `stats.allocated` and `stats.resident` are size_t reads; `value`
    // and `len` are valid for writes and `len` holds the buffer size.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            name.as_ptr().cast(),
            (&mut value as *mut usize).cast::<c_void>(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    (rc == 0 && len == size_of::<usize>()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_stats_readable() {
        let _buffer = vec![0u8; 1 << 20];
        let stats = heap_stats().unwrap();
        assert!(stats.allocated > 0);
        assert!(stats.resident > 0);
    }

    #[test]
    fn test_purge_does_not_disturb_stats() {
        release_memory_to_os();
        assert!(heap_stats().is_some());
    }
}
