//! Boundary marshaling between guest memory and the driver
//!
//! Guests pass raw `(ptr, len)` pairs into their linear memory. Every pair
//! is checked against the memory's current size before any byte is read or
//! written, and every driver outcome leaves as a single `i32` result code.
//!
//! # Guest ABI
//!
//! ```text
//! module "netdrv"
//!   open(target_ptr, target_len, opts_ptr, opts_len, handle_out) -> code
//!   read(handle, buf_ptr, buf_len, nread_out)                    -> code
//!   write(handle, buf_ptr, buf_len, nwritten_out)                -> code
//!   close(handle)                                                -> code
//!   status(handle, status_out)                                   -> code
//!   header(handle, name_ptr, name_len, buf_ptr, buf_len, nread_out) -> code
//! ```
//!
//! `header` copies at most `buf_len` bytes of the value and reports the
//! number copied. A response without that header yields `HeaderNotFound`.
//!
//! Every call that takes a handle resolves it before looking at buffers, so
//! an unknown handle reports a bad handle whatever the buffer. Out-pointers
//! receive a little-endian `u32` and are written only on success. A guest
//! that does not export `memory` traps.
//!
//! # Usage
//!
//! ```rust,ignore
//! struct HostState { driver: Driver }
//!
//! let mut config = wasmtime::Config::new();
//! config.async_support(true);
//! let engine = Engine::new(&config)?;
//! let mut linker = Linker::new(&engine);
//! fn driver_of(state: &HostState) -> &Driver {
//!     &state.driver
//! }
//! netdrv_host::add_to_linker(&mut linker, driver_of)?;
//! ```

use crate::driver::Driver;
use crate::error::DriverError;
use netdrv_api::{func, ResultCode, IMPORT_MODULE};
use std::ops::Range;
use wasmtime::{Caller, Extern, Linker, Memory};

/// Size of an out-parameter slot in guest memory
const OUT_SLOT: u32 = 4;

/// Validate a guest `(ptr, len)` pair against a memory of `memory_len` bytes
pub fn guest_range(memory_len: usize, ptr: u32, len: u32) -> Result<Range<usize>, DriverError> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).ok_or_else(|| {
        DriverError::MemoryAccess(format!("overflow: ptr={}, len={}", ptr, len))
    })?;
    if end > memory_len {
        return Err(DriverError::MemoryAccess(format!(
            "out of bounds: ptr={}, len={}, memory_size={}",
            ptr, len, memory_len
        )));
    }
    Ok(start..end)
}

/// Copy a guest byte range out of `memory`
pub fn read_guest_bytes(memory: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>, DriverError> {
    let range = guest_range(memory.len(), ptr, len)?;
    Ok(memory[range].to_vec())
}

/// Copy a guest range out of `memory` as UTF-8 text
pub fn read_guest_str(memory: &[u8], ptr: u32, len: u32) -> Result<String, DriverError> {
    let bytes = read_guest_bytes(memory, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| DriverError::bad_params("string is not valid UTF-8"))
}

/// Write `bytes` into guest memory at `ptr`
pub fn write_guest_bytes(memory: &mut [u8], ptr: u32, bytes: &[u8]) -> Result<(), DriverError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| DriverError::MemoryAccess(format!("length {} exceeds u32", bytes.len())))?;
    let range = guest_range(memory.len(), ptr, len)?;
    memory[range].copy_from_slice(bytes);
    Ok(())
}

/// Write a little-endian `u32` out-parameter
pub fn write_guest_u32(memory: &mut [u8], ptr: u32, value: u32) -> Result<(), DriverError> {
    write_guest_bytes(memory, ptr, &value.to_le_bytes())
}

/// Collapse a driver result into the guest-facing code, logging failures
pub fn result_code<T>(op: &'static str, result: &Result<T, DriverError>) -> i32 {
    match result {
        Ok(_) => ResultCode::Success.as_i32(),
        Err(DriverError::TryAgain) => ResultCode::TryAgain.as_i32(),
        Err(e) => {
            let code = e.code();
            tracing::warn!(op, code = code.as_i32(), error = %e, "Driver call failed");
            code.as_i32()
        }
    }
}

fn guest_memory<T>(caller: &mut Caller<'_, T>) -> anyhow::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(anyhow::anyhow!("guest does not export memory")),
    }
}

/// Check that an out-parameter slot is writable before doing any work
fn check_out_slot(memory_len: usize, ptr: u32) -> Result<(), DriverError> {
    guest_range(memory_len, ptr, OUT_SLOT).map(|_| ())
}

async fn guest_open<T: Send>(
    mut caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    (target_ptr, target_len, opts_ptr, opts_len, handle_out): (u32, u32, u32, u32, u32),
) -> anyhow::Result<i32> {
    let memory = guest_memory(&mut caller)?;
    let request = {
        let data = memory.data(&caller);
        check_out_slot(data.len(), handle_out).and_then(|_| {
            Ok((
                read_guest_str(data, target_ptr, target_len)?,
                read_guest_str(data, opts_ptr, opts_len)?,
            ))
        })
    };
    let (target, options) = match request {
        Ok(request) => request,
        Err(e) => return Ok(result_code::<()>("open", &Err(e))),
    };

    let driver = get_driver(caller.data()).clone();
    let result = match driver.open(&target, &options).await {
        Ok(handle) => {
            let written = write_guest_u32(memory.data_mut(&mut caller), handle_out, handle);
            if written.is_err() {
                // the guest never learns the handle, so it must not stay open
                let _ = driver.close(handle).await;
            }
            written
        }
        Err(e) => Err(e),
    };
    Ok(result_code("open", &result))
}

async fn guest_read<T: Send>(
    mut caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    (handle, buf_ptr, buf_len, nread_out): (u32, u32, u32, u32),
) -> anyhow::Result<i32> {
    let memory = guest_memory(&mut caller)?;
    let driver = get_driver(caller.data()).clone();
    if !driver.is_open(handle).await {
        return Ok(result_code::<()>("read", &Err(DriverError::BadHandle(handle))));
    }
    let memory_len = memory.data_size(&caller);
    let checked = check_out_slot(memory_len, nread_out)
        .and_then(|_| guest_range(memory_len, buf_ptr, buf_len));
    if let Err(e) = checked {
        return Ok(result_code::<()>("read", &Err(e)));
    }

    let mut buf = vec![0u8; (buf_len as usize).min(driver.config().max_transfer)];
    let result = match driver.read(handle, &mut buf).await {
        Ok(n) => {
            let data = memory.data_mut(&mut caller);
            write_guest_bytes(data, buf_ptr, &buf[..n])
                .and_then(|_| write_guest_u32(data, nread_out, n as u32))
        }
        Err(e) => Err(e),
    };
    Ok(result_code("read", &result))
}

async fn guest_write<T: Send>(
    mut caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    (handle, buf_ptr, buf_len, nwritten_out): (u32, u32, u32, u32),
) -> anyhow::Result<i32> {
    let memory = guest_memory(&mut caller)?;
    let driver = get_driver(caller.data()).clone();
    if !driver.is_open(handle).await {
        return Ok(result_code::<()>("write", &Err(DriverError::BadHandle(handle))));
    }
    let payload = {
        let data = memory.data(&caller);
        check_out_slot(data.len(), nwritten_out)
            .and_then(|_| guest_range(data.len(), buf_ptr, buf_len))
            .map(|range| {
                let take = range.len().min(driver.config().max_transfer);
                data[range.start..range.start + take].to_vec()
            })
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => return Ok(result_code::<()>("write", &Err(e))),
    };

    let result = match driver.write(handle, &payload).await {
        Ok(n) => write_guest_u32(memory.data_mut(&mut caller), nwritten_out, n as u32),
        Err(e) => Err(e),
    };
    Ok(result_code("write", &result))
}

async fn guest_status<T: Send>(
    mut caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    (handle, status_out): (u32, u32),
) -> anyhow::Result<i32> {
    let memory = guest_memory(&mut caller)?;
    let driver = get_driver(caller.data()).clone();
    if !driver.is_open(handle).await {
        return Ok(result_code::<()>("status", &Err(DriverError::BadHandle(handle))));
    }
    if let Err(e) = check_out_slot(memory.data_size(&caller), status_out) {
        return Ok(result_code::<()>("status", &Err(e)));
    }

    let result = match driver.status(handle).await {
        Ok(status) => {
            write_guest_u32(memory.data_mut(&mut caller), status_out, u32::from(status))
        }
        Err(e) => Err(e),
    };
    Ok(result_code("status", &result))
}

async fn guest_header<T: Send>(
    mut caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    (handle, name_ptr, name_len, buf_ptr, buf_len, nread_out): (u32, u32, u32, u32, u32, u32),
) -> anyhow::Result<i32> {
    let memory = guest_memory(&mut caller)?;
    let driver = get_driver(caller.data()).clone();
    if !driver.is_open(handle).await {
        return Ok(result_code::<()>("header", &Err(DriverError::BadHandle(handle))));
    }
    let name = {
        let data = memory.data(&caller);
        check_out_slot(data.len(), nread_out)
            .and_then(|_| guest_range(data.len(), buf_ptr, buf_len))
            .and_then(|_| read_guest_str(data, name_ptr, name_len))
    };
    let name = match name {
        Ok(name) => name,
        Err(e) => return Ok(result_code::<()>("header", &Err(e))),
    };

    let result = match driver.header(handle, &name).await {
        Ok(value) => {
            let n = value.len().min(buf_len as usize);
            let data = memory.data_mut(&mut caller);
            write_guest_bytes(data, buf_ptr, &value[..n])
                .and_then(|_| write_guest_u32(data, nread_out, n as u32))
        }
        Err(e) => Err(e),
    };
    Ok(result_code("header", &result))
}

async fn guest_close<T: Send>(
    caller: Caller<'_, T>,
    get_driver: fn(&T) -> &Driver,
    handle: u32,
) -> anyhow::Result<i32> {
    let driver = get_driver(caller.data()).clone();
    let result = driver.close(handle).await;
    Ok(result_code("close", &result))
}

/// Register the driver functions on `linker`.
///
/// `get_driver` selects the [`Driver`] out of the store's data. The engine
/// must have async support enabled.
pub fn add_to_linker<T>(
    linker: &mut Linker<T>,
    get_driver: fn(&T) -> &Driver,
) -> anyhow::Result<()>
where
    T: Send + 'static,
{
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::OPEN,
        move |caller: Caller<'_, T>, args: (u32, u32, u32, u32, u32)| {
            Box::new(guest_open(caller, get_driver, args))
        },
    )?;
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::READ,
        move |caller: Caller<'_, T>, args: (u32, u32, u32, u32)| {
            Box::new(guest_read(caller, get_driver, args))
        },
    )?;
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::WRITE,
        move |caller: Caller<'_, T>, args: (u32, u32, u32, u32)| {
            Box::new(guest_write(caller, get_driver, args))
        },
    )?;
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::CLOSE,
        move |caller: Caller<'_, T>, (handle,): (u32,)| {
            Box::new(guest_close(caller, get_driver, handle))
        },
    )?;
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::STATUS,
        move |caller: Caller<'_, T>, args: (u32, u32)| {
            Box::new(guest_status(caller, get_driver, args))
        },
    )?;
    linker.func_wrap_async(
        IMPORT_MODULE,
        func::HEADER,
        move |caller: Caller<'_, T>, args: (u32, u32, u32, u32, u32, u32)| {
            Box::new(guest_header(caller, get_driver, args))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_range_bounds() {
        assert_eq!(guest_range(16, 0, 16).unwrap(), 0..16);
        assert_eq!(guest_range(16, 16, 0).unwrap(), 16..16);
        assert!(guest_range(16, 8, 9).is_err());
        assert!(guest_range(16, 17, 0).is_err());
    }

    #[test]
    fn test_guest_range_end_past_memory() {
        assert!(guest_range(1024, u32::MAX, 2).is_err());
        assert!(guest_range(1024, 1000, u32::MAX).is_err());
    }

    #[test]
    fn test_read_guest_str() {
        let mut memory = vec![0u8; 32];
        memory[4..9].copy_from_slice(b"hello");
        assert_eq!(read_guest_str(&memory, 4, 5).unwrap(), "hello");

        memory[10] = 0xff;
        assert!(matches!(
            read_guest_str(&memory, 10, 1),
            Err(DriverError::BadParams(_))
        ));
        assert!(matches!(
            read_guest_str(&memory, 30, 5),
            Err(DriverError::MemoryAccess(_))
        ));
    }

    #[test]
    fn test_write_guest_u32_little_endian() {
        let mut memory = vec![0u8; 8];
        write_guest_u32(&mut memory, 2, 0x0403_0201).unwrap();
        assert_eq!(&memory[2..6], &[1, 2, 3, 4]);
        assert!(write_guest_u32(&mut memory, 5, 1).is_err());
        // nothing written on failure
        assert_eq!(&memory[5..8], &[4, 0, 0]);
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(result_code("read", &Ok::<usize, DriverError>(0)), 0);
        assert_eq!(
            result_code::<()>("read", &Err(DriverError::TryAgain)),
            ResultCode::TryAgain.as_i32()
        );
        assert_eq!(
            result_code::<()>("read", &Err(DriverError::BadHandle(3))),
            ResultCode::BadHandle.as_i32()
        );
    }
}
