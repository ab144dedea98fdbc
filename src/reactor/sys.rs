//! Thin wrappers over the raw syscalls the reactor needs. Every socket
//! handed back by this module is already non-blocking.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::str::FromStr;

use libc::{
    accept, bind, c_int, close, fcntl, getsockname, listen, read, sa_family_t, setsockopt,
    shutdown, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t, write,
    AF_INET, AF_INET6, F_GETFL, F_SETFL, O_NONBLOCK, SHUT_RD, SHUT_RDWR, SHUT_WR, SOCK_STREAM,
    SOL_SOCKET, SO_REUSEADDR,
};

/// Read up to IO_BUF_SIZE bytes at a time throughout the connection and AFR code.
pub const IO_BUF_SIZE: usize = 4 * 1024;

/// Per-connection read buffer hard cap (headers too large beyond this).
pub const IO_BUF_MAXSIZE: usize = 10 * 1024 * 1024;

/// AFR high-water mark: per-file prefetch buffer cap.
pub const AFR_HIGH_WATER_MARK: usize = 4 * 1024 * 1024;

pub fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

pub fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

pub fn sys_close(fd: RawFd) {
    unsafe {
        close(fd);
    }
}

pub fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Creates a non-blocking stream socket for `domain` (`AF_INET`/`AF_INET6`).
pub fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    if let Err(e) = sys_set_nonblocking(fd) {
        sys_close(fd);
        return Err(e);
    }
    Ok(fd)
}

pub fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a connection, returning an already-nonblocking client fd.
pub fn sys_accept(fd: RawFd) -> io::Result<RawFd> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if client_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    if let Err(e) = sys_set_nonblocking(client_fd) {
        sys_close(client_fd);
        return Err(e);
    }
    Ok(client_fd)
}

/// Returns the local address a socket is bound to, used by tests to
/// discover the ephemeral port assigned to a `:0` bind.
pub fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        sockaddr_storage_to_socketaddr(&storage)
    }
}

pub fn sys_shutdown(fd: RawFd, how: Shutdown) {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };
    unsafe {
        shutdown(fd, how);
    }
}

pub fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    set_bool_opt(fd, SOL_SOCKET, SO_REUSEADDR)
}

pub fn sys_set_reuseport(fd: RawFd) -> io::Result<()> {
    set_bool_opt(fd, SOL_SOCKET, libc::SO_REUSEPORT)
}

fn set_bool_opt(fd: RawFd, level: c_int, name: c_int) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Parses `host:port` into a `(domain, storage, len)` triple ready for
/// `sys_bind`.
pub fn sys_parse_sockaddr(address: &str, port: u16) -> io::Result<(c_int, sockaddr_storage, socklen_t)> {
    let host = if address == "localhost" {
        "127.0.0.1"
    } else {
        address
    };

    let addr = SocketAddr::from_str(&format!("{host}:{port}"))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket address"))?;

    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };
    let (storage, len) = socketaddr_to_storage(&addr);
    Ok((domain, storage, len))
}

fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

/// Recovers the connecting peer's address from `accept`'s storage, used only
/// for diagnostic logging.
pub fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}
