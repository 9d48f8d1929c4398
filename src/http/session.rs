//! Session operations abstraction
//!
//! The client has to watch for an early response while it is still writing,
//! so readiness is reported per direction instead of as a single flag.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Transport operations used by the client and server
///
/// Implementors expose their descriptor so zero-copy bodies can write to it
/// directly.
pub trait SessionOps: AsRawFd {
    /// Wait until the session is ready for any of `events`
    ///
    /// `None` waits forever; a zero duration only samples the current state.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<Readiness>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn shutdown(&mut self, how: Shutdown) -> Result<()>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Readiness reported by `SessionOps::poll`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket is in an error state
    pub hangup: bool,
}

impl Readiness {
    pub fn is_idle(&self) -> bool {
        !self.readable && !self.writable && !self.hangup
    }
}

/// Plain TCP session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

impl AsRawFd for FdSessionOps {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<Readiness> {
        use libc::{poll, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        loop {
            let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
            if result >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(Error::Io(err));
            }
        }

        Ok(Readiness {
            readable: pfd.revents & POLLIN != 0,
            writable: pfd.revents & POLLOUT != 0,
            hangup: pfd.revents & (POLLHUP | POLLERR) != 0,
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn shutdown(&mut self, how: Shutdown) -> Result<()> {
        match self.stream.shutdown(how) {
            // Already gone is as good as shut down.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.stream.set_nonblocking(nonblocking).map_err(Error::from)
    }
}

/// Read into `buf`, waiting at most `timeout` for data
///
/// Returns `Error::Timeout` if nothing arrives in time.
pub fn read_with_timeout<S: SessionOps>(
    session: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    loop {
        let ready = session.poll(PollEvents::Read, timeout)?;
        if ready.is_idle() {
            return Err(Error::Timeout);
        }
        match session.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Write all of `buf`, waiting at most `timeout` for each chunk
pub fn write_all_with_timeout<S: SessionOps>(
    session: &mut S,
    mut buf: &[u8],
    timeout: Option<Duration>,
) -> Result<()> {
    while !buf.is_empty() {
        let ready = session.poll(PollEvents::Write, timeout)?;
        if ready.is_idle() {
            return Err(Error::Timeout);
        }
        match session.write(buf) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_poll_reports_directions() {
        let (client, mut server) = pair();
        let session = FdSessionOps::new(client);

        let ready = session.poll(PollEvents::Both, Some(Duration::ZERO)).unwrap();
        assert!(ready.writable);
        assert!(!ready.readable);

        server.write_all(b"HTTP/1.1 401").unwrap();
        let ready = session
            .poll(PollEvents::Read, Some(Duration::from_secs(1)))
            .unwrap();
        assert!(ready.readable);
    }

    #[test]
    fn test_read_with_timeout() {
        let (client, server) = pair();
        let mut session = FdSessionOps::new(client);

        let mut buf = [0u8; 8];
        let result = read_with_timeout(&mut session, &mut buf, Some(Duration::from_millis(50)));
        assert!(matches!(result, Err(Error::Timeout)));

        let writer = thread::spawn(move || {
            let mut server = server;
            server.write_all(b"Hello").unwrap();
        });
        let n = read_with_timeout(&mut session, &mut buf, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(&buf[..n], b"Hello");
        writer.join().unwrap();
    }

    #[test]
    fn test_write_all_nonblocking() {
        let (client, mut server) = pair();
        let mut session = FdSessionOps::new(client);
        session.set_nonblocking(true).unwrap();

        let payload = vec![7u8; 256 * 1024];
        let expected = payload.len();
        let reader = thread::spawn(move || {
            let mut received = Vec::new();
            server.read_to_end(&mut received).unwrap();
            received.len()
        });

        write_all_with_timeout(&mut session, &payload, Some(Duration::from_secs(5))).unwrap();
        session.shutdown(Shutdown::Write).unwrap();

        assert_eq!(reader.join().unwrap(), expected);
    }
}
