/// Returns `true` if a process with this pid exists on this host.
///
/// Uses `kill(pid, 0)`: `ESRCH` means gone, `EPERM` means alive but owned by
/// someone else.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Without a portable check, every owner is assumed alive and only the TTL
/// can free a lock.
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}
