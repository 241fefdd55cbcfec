//! Socket-level send and receive with descriptor passing

use nix::errno::Errno;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use crate::config::KERNEL_MAX_DESCRIPTORS;

#[derive(Debug)]
pub(crate) enum RecvOutcome {
    Data { len: usize, fds: Vec<OwnedFd> },
    WouldBlock,
    Eof,
}

#[derive(Debug)]
pub(crate) enum RecvFailure {
    Sys(Errno),
    /// Some descriptors did not fit the control buffer and were discarded
    Truncated,
}

fn send_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::MSG_DONTWAIT
    }
}

fn recv_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::MSG_DONTWAIT
    }
}

/// Control buffer large enough for the most descriptors one message can carry
pub(crate) fn control_buffer() -> Vec<u8> {
    nix::cmsg_space!([RawFd; KERNEL_MAX_DESCRIPTORS])
}

/// Writes as much of `bytes` as the socket accepts, attaching `fds` to the first byte
pub(crate) fn send_chunk(socket: RawFd, bytes: &[u8], fds: &[RawFd]) -> Result<usize, Errno> {
    let iov = [IoSlice::new(bytes)];
    let rights = [ControlMessage::ScmRights(fds)];
    let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };

    loop {
        match sendmsg::<()>(socket, &iov, cmsgs, send_flags(), None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Reads one chunk and the descriptors that came with it
pub(crate) fn recv_chunk(
    socket: RawFd,
    buf: &mut [u8],
    cmsg_buf: &mut Vec<u8>,
) -> Result<RecvOutcome, RecvFailure> {
    loop {
        let mut iov = [IoSliceMut::new(buf)];
        let received = match recvmsg::<()>(socket, &mut iov, Some(&mut *cmsg_buf), recv_flags()) {
            Ok(received) => received,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => return Ok(RecvOutcome::WouldBlock),
            Err(errno) => return Err(RecvFailure::Sys(errno)),
        };

        let mut fds = Vec::new();
        let cmsgs = received.cmsgs().map_err(|_| RecvFailure::Truncated)?;
        for cmsg in cmsgs {
            if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                for raw in raw_fds {
                    // SAFETY: the kernel just installed this descriptor for us
                    // and nothing else owns it.
                    fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }

        if received.flags.contains(MsgFlags::MSG_CTRUNC) {
            return Err(RecvFailure::Truncated);
        }

        let len = received.bytes;
        if len == 0 && fds.is_empty() {
            return Ok(RecvOutcome::Eof);
        }
        return Ok(RecvOutcome::Data { len, fds });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_bytes_and_descriptor_arrive_together() {
        let (left, right) = UnixStream::pair().unwrap();
        right.set_nonblocking(true).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"shared").unwrap();

        let sent = send_chunk(left.as_raw_fd(), b"hi", &[file.as_raw_fd()]).unwrap();
        assert_eq!(sent, 2);

        let mut buf = [0u8; 16];
        let mut cmsg = control_buffer();
        match recv_chunk(right.as_raw_fd(), &mut buf, &mut cmsg).unwrap() {
            RecvOutcome::Data { len, fds } => {
                assert_eq!(&buf[..len], b"hi");
                assert_eq!(fds.len(), 1);
                let mut received = std::fs::File::from(fds.into_iter().next().unwrap());
                received.seek(SeekFrom::Start(0)).unwrap();
                let mut contents = String::new();
                received.read_to_string(&mut contents).unwrap();
                assert_eq!(contents, "shared");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_would_block_then_eof() {
        let (left, right) = UnixStream::pair().unwrap();
        right.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 16];
        let mut cmsg = control_buffer();
        assert!(matches!(
            recv_chunk(right.as_raw_fd(), &mut buf, &mut cmsg),
            Ok(RecvOutcome::WouldBlock)
        ));

        drop(left);
        assert!(matches!(
            recv_chunk(right.as_raw_fd(), &mut buf, &mut cmsg),
            Ok(RecvOutcome::Eof)
        ));
    }

    #[test]
    fn test_send_to_closed_peer_fails() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let result = send_chunk(left.as_raw_fd(), b"x", &[]);
        assert!(result.is_err());
    }
}
