use core::ffi::c_int;
use core::mem::ManuallyDrop;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::FromRawFd;

/// A byte stream the engine exchanges records over.
///
/// Non-blocking transports report "try again" as `io::ErrorKind::WouldBlock`;
/// end of stream is a read of zero bytes.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// The transport an `SSL` object is attached to.
pub struct Bio {
    inner: Box<dyn Transport>,
    fd: Option<c_int>,
}

impl Bio {
    /// Use a pre-existing file descriptor, which is not closed on drop.
    ///
    /// Does not (and cannot) validate the file descriptor.
    pub fn new_fd_no_close(fd: c_int) -> Self {
        Self {
            inner: Box::new(FdStream(ManuallyDrop::new(unsafe { File::from_raw_fd(fd) }))),
            fd: Some(fd),
        }
    }

    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            inner: Box::new(transport),
            fd: None,
        }
    }

    /// For `SSL_get_fd`.
    pub fn fd(&self) -> Option<c_int> {
        self.fd
    }
}

impl Read for Bio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for Bio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Plain `read(2)`/`write(2)` on a borrowed descriptor.
struct FdStream(ManuallyDrop<File>);

impl Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.0.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl Write for FdStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.0.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
