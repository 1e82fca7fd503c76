//! C ABI over `market_queue`, built as `libMarketQueue`.
//!
//! Handles come from `MarketQueue_New*` and must be released with
//! `MarketQueue_Delete`. A handle may be shared by reading threads; only one
//! thread across all processes may call `MarketQueue_Write` for a key.
#![allow(non_snake_case)]

use std::env;
use std::ffi::CStr;
use std::ptr;

use libc::{c_char, c_int, c_uint};
use tracing::warn;

use market_queue::{MarketData, MarketQueue, QueueConfig, QueueEngine, Result};

pub type QueueHandle = MarketQueue<MarketData>;

/// Environment variable naming a TOML config for `MarketQueue_New`.
pub const CONFIG_ENV: &str = "MARKET_QUEUE_CONFIG";

fn default_engine() -> Result<QueueEngine> {
    match env::var_os(CONFIG_ENV) {
        Some(path) => QueueEngine::from_path(path),
        None => QueueEngine::new(QueueConfig::default()),
    }
}

unsafe fn engine_from_path(config_path: *const c_char) -> Result<QueueEngine> {
    if config_path.is_null() {
        return default_engine();
    }
    let path = CStr::from_ptr(config_path).to_string_lossy().into_owned();
    QueueEngine::from_path(path)
}

fn into_handle(res: Result<QueueHandle>, key: c_uint) -> *mut QueueHandle {
    match res {
        Ok(queue) => Box::into_raw(Box::new(queue)),
        Err(e) => {
            warn!("cannot open queue 0x{:08X}: {}", key, e);
            ptr::null_mut()
        }
    }
}

/// Creates or attaches the queue for `key`. Returns null on failure.
#[no_mangle]
pub extern "C" fn MarketQueue_New(capacity: c_uint, key: c_uint) -> *mut QueueHandle {
    into_handle(
        default_engine().and_then(|engine| engine.open(capacity as u64, key)),
        key,
    )
}

/// Like `MarketQueue_New`, reading the config from the TOML file at
/// `config_path` (null means defaults).
///
/// # Safety
/// `config_path` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_NewWithConfig(
    config_path: *const c_char,
    capacity: c_uint,
    key: c_uint,
) -> *mut QueueHandle {
    into_handle(
        engine_from_path(config_path).and_then(|engine| engine.open(capacity as u64, key)),
        key,
    )
}

/// # Safety
/// `queue` must be a live handle or null; `record` must be null or point to
/// a readable `MarketData`.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_Write(
    queue: *const QueueHandle,
    index: c_uint,
    record: *const MarketData,
) -> bool {
    match (queue.as_ref(), record.as_ref()) {
        (Some(queue), Some(record)) => queue.write(index as u64, record).is_ok(),
        _ => false,
    }
}

/// # Safety
/// `queue` must be a live handle or null; `out` must be null or point to a
/// writable `MarketData`.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_Read(
    queue: *const QueueHandle,
    index: c_uint,
    out: *mut MarketData,
) -> bool {
    match (queue.as_ref(), out.as_mut()) {
        (Some(queue), Some(out)) => queue.read(index as u64, out).is_ok(),
        _ => false,
    }
}

/// # Safety
/// Same as `MarketQueue_Read`.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_ReadLast(queue: *const QueueHandle, out: *mut MarketData) -> bool {
    match (queue.as_ref(), out.as_mut()) {
        (Some(queue), Some(out)) => queue.read_last(out).is_ok(),
        _ => false,
    }
}

/// Highest published index, or -1 if nothing was published (or the handle
/// is null). Saturates at `INT_MAX`.
///
/// # Safety
/// `queue` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_LastTick(queue: *const QueueHandle) -> c_int {
    match queue.as_ref().and_then(|q| q.last_index()) {
        Some(index) => c_int::try_from(index).unwrap_or(c_int::MAX),
        None => -1,
    }
}

/// Releases the handle. Whether the shared segment survives is decided by
/// the handle's delete policy; by default it does.
///
/// # Safety
/// `queue` must be null or a handle not yet passed to this function.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_Delete(queue: *mut QueueHandle) {
    if queue.is_null() {
        return;
    }
    let queue = Box::from_raw(queue);
    let key = queue.key();
    if let Err(e) = queue.delete() {
        warn!("deleting queue 0x{:08X} failed: {}", key, e);
    }
}

/// Removes the shared segment for `key` for every process.
#[no_mangle]
pub extern "C" fn MarketQueue_Destroy(key: c_uint) -> bool {
    destroy(default_engine(), key)
}

/// # Safety
/// `config_path` must be null or a NUL terminated string.
#[no_mangle]
pub unsafe extern "C" fn MarketQueue_DestroyWithConfig(config_path: *const c_char, key: c_uint) -> bool {
    destroy(engine_from_path(config_path), key)
}

fn destroy(engine: Result<QueueEngine>, key: c_uint) -> bool {
    match engine.and_then(|engine| engine.destroy(key)) {
        Ok(()) => true,
        Err(e) => {
            warn!("cannot destroy queue 0x{:08X}: {}", key, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::ffi::CString;
    use std::fs;
    use std::process;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tempfile::{tempdir, TempDir};

    use super::*;

    static CONFIG_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_config(policy: &str) -> std::result::Result<(TempDir, CString), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("queue.toml");
        fs::write(
            &path,
            format!(
                "name_prefix = \"/mq_ffi_{}_{}\"\ndelete_policy = \"{}\"\n",
                process::id(),
                CONFIG_COUNTER.fetch_add(1, Ordering::SeqCst),
                policy
            ),
        )?;
        let path = CString::new(path.to_string_lossy().into_owned())?;
        Ok((dir, path))
    }

    #[test]
    fn boundary_round_trip() -> std::result::Result<(), Box<dyn Error>> {
        let (_dir, cfg) = test_config("detach")?;
        unsafe {
            let queue = MarketQueue_NewWithConfig(cfg.as_ptr(), 10, 0xFF00_0003);
            assert!(!queue.is_null());
            let mut out = MarketData::default();
            assert!(!MarketQueue_ReadLast(queue, &mut out));
            assert!(!MarketQueue_Read(queue, 3, &mut out));
            assert_eq!(MarketQueue_LastTick(queue), -1);

            let record = MarketData::new("CZCE", 3, "21:00:00.000", b"abc");
            assert!(MarketQueue_Write(queue, 3, &record));
            assert!(MarketQueue_Read(queue, 3, &mut out));
            assert_eq!(out, record);
            assert!(MarketQueue_ReadLast(queue, &mut out));
            assert_eq!(out.tick, 3);
            assert_eq!(MarketQueue_LastTick(queue), 3);

            MarketQueue_Delete(queue);
            // detach policy leaves the data for the next attacher
            let again = MarketQueue_NewWithConfig(cfg.as_ptr(), 10, 0xFF00_0003);
            assert!(!again.is_null());
            assert!(MarketQueue_Read(again, 3, &mut out));
            MarketQueue_Delete(again);
            assert!(MarketQueue_DestroyWithConfig(cfg.as_ptr(), 0xFF00_0003));
        }
        Ok(())
    }

    #[test]
    fn destroy_policy_removes_segment() -> std::result::Result<(), Box<dyn Error>> {
        let (_dir, cfg) = test_config("destroy")?;
        unsafe {
            let queue = MarketQueue_NewWithConfig(cfg.as_ptr(), 4, 7);
            assert!(!queue.is_null());
            MarketQueue_Delete(queue);
            assert!(!MarketQueue_DestroyWithConfig(cfg.as_ptr(), 7));
        }
        Ok(())
    }

    #[test]
    fn null_arguments_fail_cleanly() {
        unsafe {
            let mut out = MarketData::default();
            let record = MarketData::default();
            assert!(!MarketQueue_Write(ptr::null(), 0, &record));
            assert!(!MarketQueue_Read(ptr::null(), 0, &mut out));
            assert!(!MarketQueue_ReadLast(ptr::null(), &mut out));
            assert_eq!(MarketQueue_LastTick(ptr::null()), -1);
            MarketQueue_Delete(ptr::null_mut());
        }
    }

    #[test]
    fn mismatched_capacity_returns_null() -> std::result::Result<(), Box<dyn Error>> {
        let (_dir, cfg) = test_config("destroy")?;
        unsafe {
            let queue = MarketQueue_NewWithConfig(cfg.as_ptr(), 4, 9);
            assert!(!queue.is_null());
            assert!(MarketQueue_NewWithConfig(cfg.as_ptr(), 5, 9).is_null());
            MarketQueue_Delete(queue);
        }
        Ok(())
    }
}
