//! Thin wrappers over the kernel operations the runtime composes:
//! mount/umount/unshare/setns/chroot/chdir/fork/execvp/kill/waitpid.
//! Each wrapper surfaces a distinct `PockyError::SyscallFailure` carrying
//! the originating syscall name, its arguments, and the errno string.

use std::ffi::{c_int, c_ulong, CStr, CString};
use std::path::Path;

use crate::error::{PockyError, PockyResult};

pub const CLONE_NEWUTS: c_int = 0x0400_0000;
pub const CLONE_NEWIPC: c_int = 0x0800_0000;
pub const CLONE_NEWNS: c_int = 0x0002_0000;
pub const CLONE_NEWPID: c_int = 0x2000_0000;
pub const CLONE_NEWNET: c_int = 0x4000_0000;

fn cstr(s: &str) -> CString {
    CString::new(s).expect("argument must not contain NUL bytes")
}

fn path_cstr(p: &Path) -> CString {
    cstr(p.to_str().expect("path must be valid UTF-8"))
}

pub fn extract_libc_error_message() -> String {
    unsafe {
        let message = CStr::from_ptr(libc::strerror(*libc::__errno_location()));
        message.to_str().unwrap_or("unknown error").to_owned()
    }
}

fn wrap(syscall: &'static str, args: impl Into<String>, result: c_int) -> PockyResult<c_int> {
    if result >= 0 {
        Ok(result)
    } else {
        Err(PockyError::syscall(syscall, args, extract_libc_error_message()))
    }
}

pub fn mount(
    src: Option<&str>,
    target: &Path,
    fstype: Option<&str>,
    flags: c_ulong,
    data: Option<&str>,
) -> PockyResult<()> {
    let src_c = src.map(cstr);
    let target_c = path_cstr(target);
    let fstype_c = fstype.map(cstr);
    let data_c = data.map(cstr);

    let result = unsafe {
        libc::mount(
            src_c.as_ref().map(|x| x.as_ptr()).unwrap_or(std::ptr::null()),
            target_c.as_ptr(),
            fstype_c.as_ref().map(|x| x.as_ptr()).unwrap_or(std::ptr::null()),
            flags,
            data_c
                .as_ref()
                .map(|x| x.as_ptr() as *const _)
                .unwrap_or(std::ptr::null()),
        )
    };

    wrap(
        "mount",
        format!("target={}, fstype={:?}, data={:?}", target.display(), fstype, data),
        result,
    )
    .map(|_| ())
}

pub fn bind_mount(src: &Path, target: &Path) -> PockyResult<()> {
    mount(Some(src.to_str().unwrap_or_default()), target, None, libc::MS_BIND, None)
}

pub fn proc_mount(target: &Path) -> PockyResult<()> {
    mount(Some("proc"), target, Some("proc"), 0, None)
}

pub fn umount(path: &Path) -> PockyResult<()> {
    let target = path_cstr(path);
    let result = unsafe { libc::umount(target.as_ptr()) };
    wrap("umount", path.display().to_string(), result).map(|_| ())
}

pub fn unshare(flags: c_int) -> PockyResult<()> {
    let result = unsafe { libc::unshare(flags) };
    wrap("unshare", format!("flags=0x{:x}", flags), result).map(|_| ())
}

pub fn setns(fd: c_int, nstype: c_int) -> PockyResult<()> {
    let result = unsafe { libc::setns(fd, nstype) };
    wrap("setns", format!("fd={}, nstype=0x{:x}", fd, nstype), result).map(|_| ())
}

pub fn chroot(path: &Path) -> PockyResult<()> {
    let target = path_cstr(path);
    let result = unsafe { libc::chroot(target.as_ptr()) };
    wrap("chroot", path.display().to_string(), result).map(|_| ())
}

pub fn chdir(path: &Path) -> PockyResult<()> {
    let target = path_cstr(path);
    let result = unsafe { libc::chdir(target.as_ptr()) };
    wrap("chdir", path.display().to_string(), result).map(|_| ())
}

/// `fork()`. Returns 0 in the child, the child's pid in the parent.
pub fn fork() -> PockyResult<libc::pid_t> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        Err(PockyError::syscall("fork", "", extract_libc_error_message()))
    } else {
        Ok(pid)
    }
}

pub fn exec(command: &[String]) -> PockyResult<()> {
    let command_c = command.iter().map(|part| cstr(part)).collect::<Vec<_>>();
    let mut command_ptrs = command_c.iter().map(|part| part.as_ptr()).collect::<Vec<_>>();
    command_ptrs.push(std::ptr::null());

    let result = unsafe { libc::execvp(command_ptrs[0], command_ptrs.as_ptr()) };
    if result == 0 {
        Ok(())
    } else {
        Err(PockyError::syscall("execvp", command.join(" "), extract_libc_error_message()))
    }
}

pub fn waitpid(pid: libc::pid_t) -> PockyResult<c_int> {
    let mut status: c_int = 0;
    let result = unsafe { libc::waitpid(pid, &mut status as *mut c_int, 0) };
    wrap("waitpid", format!("pid={}", pid), result)?;
    Ok(status)
}

pub fn kill(pid: libc::pid_t, signal: c_int) -> PockyResult<()> {
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(PockyError::syscall("kill", format!("pid={}, sig={}", pid, signal), extract_libc_error_message()))
    }
}

/// `true` if `/proc/<pid>` still exists, i.e. the process has not been reaped.
pub fn process_alive(pid: libc::pid_t) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}
