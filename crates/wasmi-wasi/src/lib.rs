//! WASI preview-1 (§4.7) and wasi-threads (§4.8) host modules for `wasmi`.
//!
//! Registered the same way any other embedder-supplied import would be:
//! through [`wasmi::Linker::define_host_module`]. Nothing here has special
//! access to interpreter internals — every function goes through the C6
//! host ABI (`wasmi::host_fn`, `wasmi::MemoryCell`,
//! `wasmi::host_func_copyin`/`copyout`) the same way a third-party embedder
//! would use it.

pub mod threads;

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use wasmi::{
    decode_params, host_fn, host_fn_restartable, host_func_copyin, host_func_copyout, host_module, yield_once,
    HostModule, MemoryCell, Trap, TrapCode, Value, ValueType,
};

/// WASI's `errno` values actually exercised by this implementation. Mapped
/// 1:1 from `std::io::Error` kinds where one exists; ABI misuse (an
/// out-of-bounds iovec, say) traps instead of returning an errno, via the
/// ordinary C6 memory-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Errno {
    #[error("success")]
    Success,
    #[error("argument list too long")]
    TooBig,
    #[error("permission denied")]
    Access,
    #[error("bad file descriptor")]
    Badf,
    #[error("resource busy")]
    Busy,
    #[error("file exists")]
    Exist,
    #[error("invalid argument")]
    Inval,
    #[error("I/O error")]
    Io,
    #[error("is a directory")]
    Isdir,
    #[error("too many symbolic links")]
    Loop,
    #[error("no such file or directory")]
    Noent,
    #[error("not a directory")]
    Notdir,
    #[error("directory not empty")]
    Notempty,
    #[error("not supported")]
    Notsup,
    #[error("operation not permitted")]
    Perm,
    #[error("function not supported")]
    Nosys,
}

impl Errno {
    pub fn as_raw(self) -> i32 {
        match self {
            Errno::Success => 0,
            Errno::TooBig => 1,
            Errno::Access => 2,
            Errno::Badf => 8,
            Errno::Busy => 10,
            Errno::Exist => 20,
            Errno::Inval => 28,
            Errno::Io => 29,
            Errno::Isdir => 31,
            Errno::Loop => 32,
            Errno::Noent => 44,
            Errno::Notdir => 54,
            Errno::Notempty => 55,
            Errno::Notsup => 56,
            Errno::Perm => 63,
            Errno::Nosys => 52,
        }
    }
}

impl From<std::io::Error> for Errno {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            NotFound => Errno::Noent,
            PermissionDenied => Errno::Perm,
            AlreadyExists => Errno::Exist,
            InvalidInput | InvalidData => Errno::Inval,
            _ => Errno::Io,
        }
    }
}

enum FdEntry {
    Stdin,
    Stdout,
    Stderr,
    /// A preopened host directory, exposed to the guest under `guest_path`.
    PreopenDir { host_path: PathBuf, guest_path: String },
    File(File),
    Closed,
}

/// In-process WASI environment: arguments, environment variables, and an fd
/// table mapping guest descriptors to host files/stdio, starting at fd 3
/// (0/1/2 are always stdio).
pub struct WasiCtx {
    args: Vec<String>,
    envs: Vec<(String, String)>,
    fds: Vec<FdEntry>,
}

impl WasiCtx {
    fn fd(&self, fd: i32) -> Result<&FdEntry, Errno> {
        self.fds.get(fd as usize).filter(|e| !matches!(e, FdEntry::Closed)).ok_or(Errno::Badf)
    }

    fn fd_mut(&mut self, fd: i32) -> Result<&mut FdEntry, Errno> {
        self.fds.get_mut(fd as usize).filter(|e| !matches!(e, FdEntry::Closed)).ok_or(Errno::Badf)
    }

    /// Resolves `guest_rel_path` against preopen `dirfd`'s host directory,
    /// rejecting any `..` component that would escape it.
    fn resolve_path(&self, dirfd: i32, guest_rel_path: &str) -> Result<PathBuf, Errno> {
        let host_path = match self.fd(dirfd)? {
            FdEntry::PreopenDir { host_path, .. } => host_path.clone(),
            _ => return Err(Errno::Notdir),
        };
        let rel = Path::new(guest_rel_path);
        if rel.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir)) {
            return Err(Errno::Perm);
        }
        Ok(host_path.join(rel))
    }
}

/// Builds a [`WasiCtx`], mirroring the teacher's own chained builder shape.
#[derive(Default)]
pub struct WasiCtxBuilder {
    args: Vec<String>,
    envs: Vec<(String, String)>,
    preopens: Vec<(PathBuf, String)>,
}

impl WasiCtxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn preopened_dir(mut self, host_path: impl Into<PathBuf>, guest_path: impl Into<String>) -> Self {
        self.preopens.push((host_path.into(), guest_path.into()));
        self
    }

    pub fn build(self) -> WasiCtx {
        let mut fds = vec![FdEntry::Stdin, FdEntry::Stdout, FdEntry::Stderr];
        for (host_path, guest_path) in self.preopens {
            fds.push(FdEntry::PreopenDir { host_path, guest_path });
        }
        WasiCtx {
            args: self.args,
            envs: self.envs,
            fds,
        }
    }
}

fn u32_at(values: &[Value], i: usize) -> u32 {
    values[i].i32().expect("registered as an i32 param") as u32
}

fn i32_at(values: &[Value], i: usize) -> i32 {
    values[i].i32().expect("registered as an i32 param")
}

fn write_i32_result(v: i32, results: &mut [wasmi_core::Cell]) {
    wasmi::write_result(Value::I32(v), results);
}

fn write_u32(mem: &MemoryCell, addr: u32, v: u32) -> Result<(), Trap> {
    host_func_copyout(mem, addr, &v.to_le_bytes())
}

fn write_u64(mem: &MemoryCell, addr: u32, v: u64) -> Result<(), Trap> {
    host_func_copyout(mem, addr, &v.to_le_bytes())
}

fn read_u32(mem: &MemoryCell, addr: u32) -> Result<u32, Trap> {
    let mut buf = [0u8; 4];
    host_func_copyin(mem, addr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_path(mem: &MemoryCell, ptr: u32, len: u32) -> Result<String, Trap> {
    let mut buf = vec![0u8; len as usize];
    host_func_copyin(mem, ptr, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Builds the `"wasi_snapshot_preview1"` [`HostModule`] (§4.7). `mem` is
/// bound to the instance's own memory by the embedder right after
/// instantiation (see [`wasmi::MemoryCell`]).
pub fn wasi_snapshot_preview1(ctx: Rc<RefCell<WasiCtx>>, mem: MemoryCell) -> HostModule {
    let mut funcs = Vec::new();

    macro_rules! register {
        ($name:literal, $sig:literal, $body:expr) => {
            funcs.push(($name.into(), host_fn($sig, $body).expect("well-formed type string")));
        };
    }

    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("args_sizes_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let wasi = ctx.borrow();
            let buf_size: usize = wasi.args.iter().map(|a| a.len() + 1).sum();
            write_u32(&mem, u32_at(&values, 0), wasi.args.len() as u32)?;
            write_u32(&mem, u32_at(&values, 1), buf_size as u32)?;
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("args_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let wasi = ctx.borrow();
            let mut argv_ptr = u32_at(&values, 0);
            let mut buf_ptr = u32_at(&values, 1);
            for arg in &wasi.args {
                write_u32(&mem, argv_ptr, buf_ptr)?;
                host_func_copyout(&mem, buf_ptr, arg.as_bytes())?;
                host_func_copyout(&mem, buf_ptr + arg.len() as u32, &[0])?;
                buf_ptr += arg.len() as u32 + 1;
                argv_ptr += 4;
            }
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("environ_sizes_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let wasi = ctx.borrow();
            let buf_size: usize = wasi.envs.iter().map(|(k, v)| k.len() + 1 + v.len() + 1).sum();
            write_u32(&mem, u32_at(&values, 0), wasi.envs.len() as u32)?;
            write_u32(&mem, u32_at(&values, 1), buf_size as u32)?;
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("environ_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let wasi = ctx.borrow();
            let mut env_ptr = u32_at(&values, 0);
            let mut buf_ptr = u32_at(&values, 1);
            for (k, v) in &wasi.envs {
                write_u32(&mem, env_ptr, buf_ptr)?;
                let entry = alloc_kv_entry(k, v);
                host_func_copyout(&mem, buf_ptr, &entry)?;
                buf_ptr += entry.len() as u32;
                env_ptr += 4;
            }
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_write", "(iiii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32], params);
            let errno = fd_write(&ctx, &mem, i32_at(&values, 0), u32_at(&values, 1), u32_at(&values, 2), u32_at(&values, 3))?;
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_read", "(iiii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32], params);
            let errno = fd_read(&ctx, &mem, i32_at(&values, 0), u32_at(&values, 1), u32_at(&values, 2), u32_at(&values, 3))?;
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        register!("fd_close", "(i)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32], params);
            let fd = i32_at(&values, 0);
            let mut wasi = ctx.borrow_mut();
            let errno = match wasi.fd_mut(fd) {
                Ok(entry) => {
                    *entry = FdEntry::Closed;
                    Errno::Success
                }
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_seek", "(iIii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I64, ValueType::I32, ValueType::I32], params);
            let fd = i32_at(&values, 0);
            let offset = values[1].i64().expect("i64 param");
            let whence = u32_at(&values, 2);
            let newoffset_ptr = u32_at(&values, 3);
            let mut wasi = ctx.borrow_mut();
            let errno = match wasi.fd_mut(fd) {
                Ok(FdEntry::File(f)) => {
                    let pos = match whence {
                        0 => SeekFrom::Start(offset as u64),
                        1 => SeekFrom::Current(offset),
                        2 => SeekFrom::End(offset),
                        _ => return Err(Trap::new(TrapCode::Unreachable)),
                    };
                    match f.seek(pos) {
                        Ok(new_pos) => {
                            write_u64(&mem, newoffset_ptr, new_pos)?;
                            Errno::Success
                        }
                        Err(e) => e.into(),
                    }
                }
                Ok(_) => Errno::Inval,
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_tell", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let fd = i32_at(&values, 0);
            let offset_ptr = u32_at(&values, 1);
            let mut wasi = ctx.borrow_mut();
            let errno = match wasi.fd_mut(fd) {
                Ok(FdEntry::File(f)) => match f.stream_position() {
                    Ok(pos) => {
                        write_u64(&mem, offset_ptr, pos)?;
                        Errno::Success
                    }
                    Err(e) => e.into(),
                },
                Ok(_) => Errno::Inval,
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let mem = mem.clone();
        register!("fd_fdstat_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let stat_ptr = u32_at(&values, 1);
            let mut buf = [0u8; 24];
            buf[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
            buf[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
            host_func_copyout(&mem, stat_ptr, &buf)?;
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    register!("fd_fdstat_set_flags", "(ii)i", move |_c, _params, results| {
        write_i32_result(Errno::Success.as_raw(), results);
        Ok(())
    });
    register!("fd_fdstat_set_rights", "(iII)i", move |_c, _params, results| {
        write_i32_result(Errno::Success.as_raw(), results);
        Ok(())
    });
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_prestat_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let fd = i32_at(&values, 0);
            let prestat_ptr = u32_at(&values, 1);
            let wasi = ctx.borrow();
            let errno = match wasi.fd(fd) {
                Ok(FdEntry::PreopenDir { guest_path, .. }) => {
                    let mut buf = [0u8; 8];
                    buf[4..8].copy_from_slice(&(guest_path.len() as u32).to_le_bytes());
                    host_func_copyout(&mem, prestat_ptr, &buf)?;
                    Errno::Success
                }
                Ok(_) => Errno::Badf,
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("fd_prestat_dir_name", "(iii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32], params);
            let fd = i32_at(&values, 0);
            let path_ptr = u32_at(&values, 1);
            let wasi = ctx.borrow();
            let errno = match wasi.fd(fd) {
                Ok(FdEntry::PreopenDir { guest_path, .. }) => {
                    host_func_copyout(&mem, path_ptr, guest_path.as_bytes())?;
                    Errno::Success
                }
                Ok(_) => Errno::Badf,
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("path_open", "(iiiiiIIii)i", move |_c, params, results| {
            let values = decode_params(
                &[
                    ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32,
                    ValueType::I64, ValueType::I64, ValueType::I32, ValueType::I32,
                ],
                params,
            );
            let dirfd = i32_at(&values, 0);
            let path_ptr = u32_at(&values, 2);
            let path_len = u32_at(&values, 3);
            let oflags = u32_at(&values, 4);
            let opened_fd_ptr = u32_at(&values, 8);
            let path = read_path(&mem, path_ptr, path_len)?;
            let mut wasi = ctx.borrow_mut();
            let errno = match wasi.resolve_path(dirfd, &path) {
                Ok(host_path) => {
                    let mut opts = OpenOptions::new();
                    opts.read(true).write(true);
                    if oflags & 0x1 != 0 {
                        opts.create(true);
                    }
                    if oflags & 0x4 != 0 {
                        opts.truncate(true);
                    }
                    match opts.open(&host_path) {
                        Ok(file) => {
                            wasi.fds.push(FdEntry::File(file));
                            let new_fd = wasi.fds.len() as u32 - 1;
                            write_u32(&mem, opened_fd_ptr, new_fd)?;
                            Errno::Success
                        }
                        Err(e) => e.into(),
                    }
                }
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("path_filestat_get", "(iiiii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32, ValueType::I32], params);
            let dirfd = i32_at(&values, 0);
            let path_ptr = u32_at(&values, 2);
            let path_len = u32_at(&values, 3);
            let stat_ptr = u32_at(&values, 4);
            let path = read_path(&mem, path_ptr, path_len)?;
            let wasi = ctx.borrow();
            let errno = match wasi.resolve_path(dirfd, &path) {
                Ok(host_path) => match std::fs::metadata(&host_path) {
                    Ok(meta) => {
                        host_func_copyout(&mem, stat_ptr, &encode_filestat(&meta))?;
                        Errno::Success
                    }
                    Err(e) => e.into(),
                },
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("path_create_directory", "(iii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32], params);
            let path = read_path(&mem, u32_at(&values, 1), u32_at(&values, 2))?;
            let wasi = ctx.borrow();
            let errno = match wasi.resolve_path(i32_at(&values, 0), &path) {
                Ok(host_path) => std::fs::create_dir(host_path).map(|_| Errno::Success).unwrap_or_else(Into::into),
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("path_unlink_file", "(iii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32], params);
            let path = read_path(&mem, u32_at(&values, 1), u32_at(&values, 2))?;
            let wasi = ctx.borrow();
            let errno = match wasi.resolve_path(i32_at(&values, 0), &path) {
                Ok(host_path) => std::fs::remove_file(host_path).map(|_| Errno::Success).unwrap_or_else(Into::into),
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let ctx = ctx.clone();
        let mem = mem.clone();
        register!("path_remove_directory", "(iii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32, ValueType::I32], params);
            let path = read_path(&mem, u32_at(&values, 1), u32_at(&values, 2))?;
            let wasi = ctx.borrow();
            let errno = match wasi.resolve_path(i32_at(&values, 0), &path) {
                Ok(host_path) => std::fs::remove_dir(host_path).map(|_| Errno::Success).unwrap_or_else(Into::into),
                Err(e) => e,
            };
            write_i32_result(errno.as_raw(), results);
            Ok(())
        });
    }
    {
        let mem = mem.clone();
        register!("clock_time_get", "(iIi)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I64, ValueType::I32], params);
            let time_ptr = u32_at(&values, 2);
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            write_u64(&mem, time_ptr, now.as_nanos() as u64)?;
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    {
        let mem = mem.clone();
        register!("random_get", "(ii)i", move |_c, params, results| {
            let values = decode_params(&[ValueType::I32, ValueType::I32], params);
            let len = u32_at(&values, 1) as usize;
            let mut buf = vec![0u8; len];
            getrandom::getrandom(&mut buf).map_err(|_| Trap::new(TrapCode::Unreachable))?;
            host_func_copyout(&mem, u32_at(&values, 0), &buf)?;
            write_i32_result(Errno::Success.as_raw(), results);
            Ok(())
        });
    }
    // Gives another peer in the cooperative scheduler a turn before this
    // thread continues. A genuine no-op outside a cluster, since there is
    // no one else to hand control to.
    funcs.push((
        "sched_yield".into(),
        host_fn_restartable("()i", move |ctx, _params, results| {
            let state = yield_once(ctx)?;
            if state == wasmi::RestartState::Done {
                write_i32_result(Errno::Success.as_raw(), results);
            }
            Ok(state)
        })
        .expect("well-formed type string"),
    ));
    register!("proc_exit", "(i)", move |_c, params, _results| {
        let values = decode_params(&[ValueType::I32], params);
        Err(Trap::new(TrapCode::VoluntaryExit(i32_at(&values, 0) as u32)))
    });

    host_module("wasi_snapshot_preview1", funcs)
}

fn alloc_kv_entry(k: &str, v: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(k.len() + v.len() + 2);
    out.extend_from_slice(k.as_bytes());
    out.push(b'=');
    out.extend_from_slice(v.as_bytes());
    out.push(0);
    out
}

fn fd_write(ctx: &Rc<RefCell<WasiCtx>>, mem: &MemoryCell, fd: i32, iovs_ptr: u32, iovs_len: u32, nwritten_ptr: u32) -> Result<Errno, Trap> {
    let mut total = 0u32;
    let mut wasi = ctx.borrow_mut();
    for i in 0..iovs_len {
        let base = read_u32(mem, iovs_ptr + i * 8)?;
        let len = read_u32(mem, iovs_ptr + i * 8 + 4)?;
        let mut buf = vec![0u8; len as usize];
        host_func_copyin(mem, base, &mut buf)?;
        let result = match wasi.fd_mut(fd) {
            Ok(FdEntry::Stdout) => std::io::stdout().write_all(&buf),
            Ok(FdEntry::Stderr) => std::io::stderr().write_all(&buf),
            Ok(FdEntry::File(f)) => f.write_all(&buf),
            Ok(_) => return Ok(Errno::Inval),
            Err(e) => return Ok(e),
        };
        if let Err(e) = result {
            return Ok(e.into());
        }
        total += len;
    }
    write_u32(mem, nwritten_ptr, total)?;
    Ok(Errno::Success)
}

fn fd_read(ctx: &Rc<RefCell<WasiCtx>>, mem: &MemoryCell, fd: i32, iovs_ptr: u32, iovs_len: u32, nread_ptr: u32) -> Result<Errno, Trap> {
    let mut total = 0u32;
    let mut wasi = ctx.borrow_mut();
    for i in 0..iovs_len {
        let base = read_u32(mem, iovs_ptr + i * 8)?;
        let len = read_u32(mem, iovs_ptr + i * 8 + 4)?;
        let mut buf = vec![0u8; len as usize];
        let n = match wasi.fd_mut(fd) {
            Ok(FdEntry::Stdin) => std::io::stdin().read(&mut buf),
            Ok(FdEntry::File(f)) => f.read(&mut buf),
            Ok(_) => return Ok(Errno::Inval),
            Err(e) => return Ok(e),
        };
        let n = match n {
            Ok(n) => n,
            Err(e) => return Ok(e.into()),
        };
        host_func_copyout(mem, base, &buf[..n])?;
        total += n as u32;
        if n < len as usize {
            break;
        }
    }
    write_u32(mem, nread_ptr, total)?;
    Ok(Errno::Success)
}

fn encode_filestat(meta: &std::fs::Metadata) -> [u8; 64] {
    let mut buf = [0u8; 64];
    let filetype: u8 = if meta.is_dir() { 3 } else { 4 };
    buf[16] = filetype;
    buf[24..32].copy_from_slice(&1u64.to_le_bytes());
    buf[32..40].copy_from_slice(&(meta.len()).to_le_bytes());
    let ns = |t: std::io::Result<SystemTime>| {
        t.ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_nanos() as u64).unwrap_or(0)
    };
    buf[40..48].copy_from_slice(&ns(meta.accessed()).to_le_bytes());
    buf[48..56].copy_from_slice(&ns(meta.modified()).to_le_bytes());
    buf[56..64].copy_from_slice(&ns(meta.created()).to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fd_table_with_stdio_first() {
        let ctx = WasiCtxBuilder::new().args(["prog", "a"]).build();
        assert_eq!(ctx.args, vec!["prog", "a"]);
        assert!(matches!(ctx.fds[0], FdEntry::Stdin));
        assert!(matches!(ctx.fds[1], FdEntry::Stdout));
        assert!(matches!(ctx.fds[2], FdEntry::Stderr));
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let ctx = WasiCtxBuilder::new().preopened_dir("/tmp", "/sandbox").build();
        assert_eq!(ctx.resolve_path(3, "../etc/passwd"), Err(Errno::Perm));
    }

    /// Outside a cluster (plain `Func::call`) `sched_yield` has no peer to
    /// hand control to, so it must resolve on its first and only call
    /// rather than suspending forever.
    #[test]
    fn sched_yield_completes_immediately_without_a_cluster() {
        let module = wasmi::Module::from_text(
            r#"(module
                (import "wasi_snapshot_preview1" "sched_yield" (func $yield (result i32)))
                (func (export "run") (result i32)
                    call $yield))"#,
        )
        .unwrap();
        let mut linker = wasmi::Linker::new();
        let wasi_ctx = Rc::new(RefCell::new(WasiCtxBuilder::new().build()));
        let mem_cell = MemoryCell::new();
        linker.define_host_module(wasi_snapshot_preview1(wasi_ctx, mem_cell));
        let config = Rc::new(wasmi::Config::default());
        let instance = wasmi::Instance::new(&module, &linker, config.clone()).unwrap();
        let run = instance.get_func("run").unwrap();
        let result = run.call(config, &[]).unwrap();
        assert_eq!(result, vec![Value::I32(Errno::Success.as_raw())]);
    }

    /// Inside a cluster, the same `sched_yield` call genuinely suspends
    /// once and must be driven to completion through
    /// `engine::run`/`engine::resume`, not through `Func::call`.
    #[test]
    fn sched_yield_suspends_once_under_a_scheduler() {
        let module = wasmi::Module::from_text(
            r#"(module
                (import "wasi_snapshot_preview1" "sched_yield" (func $yield (result i32)))
                (memory (export "memory") (shared 1 1))
                (func (export "run") (param i32 i32)
                    call $yield
                    drop))"#,
        )
        .unwrap();
        let mut linker = wasmi::Linker::new();
        let wasi_ctx = Rc::new(RefCell::new(WasiCtxBuilder::new().build()));
        let mem_cell = MemoryCell::new();
        linker.define_host_module(wasi_snapshot_preview1(wasi_ctx, mem_cell.clone()));
        let config = Rc::new(wasmi::Config::default());
        let instance = wasmi::Instance::new(&module, &linker, config.clone()).unwrap();
        mem_cell.bind(&instance);

        let cluster = wasmi::Cluster::new();
        let mut scheduler = wasmi::Scheduler::new();
        let run = instance.get_func("run").unwrap();
        let tid = cluster.tids().alloc().unwrap();
        scheduler.spawn(&cluster, config, tid, instance.raw().clone(), run.raw().clone(), vec![Value::I32(tid.as_u32() as i32), Value::I32(0)]);

        scheduler.run_to_completion(&cluster).expect("no trap");
        assert_eq!(cluster.thread_count(), 0);
    }
}
