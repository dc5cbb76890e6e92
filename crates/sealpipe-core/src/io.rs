//! Blocking read helpers shared by the streaming stages

use std::io::{ErrorKind, Read};

/// Read until `buf` is full or the reader hits EOF.
///
/// Returns the number of bytes placed in `buf`; a short count means EOF.
pub fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
