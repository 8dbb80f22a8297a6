//! Transport: buffered non-blocking I/O di atas stream socket
//!
//! Pre-allocated read buffer; write buffer hanya tumbuh saat socket penuh.
//! Generic atas stream supaya bisa dipakai `mio::net::UnixStream` (server)
//! maupun `std::os::unix::net::UnixStream` (client/test).

use std::io::{self, Read, Write};

use super::Connection;

pub struct Transport<S> {
    stream: S,
    read_buffer: Box<[u8]>,
    read_pos: usize,
    read_len: usize,
    write_buffer: Vec<u8>,
}

impl<S: Read + Write> Transport<S> {
    /// Stream harus sudah non-blocking kalau dipakai di event loop.
    pub fn new(stream: S, read_buffer_size: usize) -> Self {
        Self {
            stream,
            read_buffer: vec![0u8; read_buffer_size.max(64)].into_boxed_slice(),
            read_pos: 0,
            read_len: 0,
            write_buffer: Vec::new(),
        }
    }

    /// Read data ke internal buffer.
    ///
    /// Returns jumlah byte baru, `Ok(0)` kalau socket belum punya data.
    /// EOF dilaporkan sebagai `ConnectionReset`.
    #[inline]
    pub fn fill_read_buffer(&mut self) -> io::Result<usize> {
        // Compact buffer jika perlu
        if self.read_pos > 0 {
            let remaining = self.read_len - self.read_pos;
            if remaining > 0 {
                self.read_buffer.copy_within(self.read_pos..self.read_len, 0);
            }
            self.read_len = remaining;
            self.read_pos = 0;
        }
        if self.read_len == self.read_buffer.len() {
            return Ok(0);
        }

        match self.stream.read(&mut self.read_buffer[self.read_len..]) {
            Ok(0) => Err(io::Error::new(io::ErrorKind::ConnectionReset, "Connection closed")),
            Ok(n) => {
                self.read_len += n;
                Ok(n)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Get readable data slice (zero-copy)
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..self.read_len]
    }

    /// Consume n bytes dari read buffer
    #[inline(always)]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_len - self.read_pos);
    }

    /// Read everything available and feed it to `conn`.
    ///
    /// Returns the number of messages dispatched. Protocol errors surface
    /// as `InvalidData`; the connection is already closed at that point.
    pub fn pump_into(&mut self, conn: &mut Connection) -> io::Result<usize> {
        let mut dispatched = 0;
        loop {
            let n = self.fill_read_buffer()?;
            if n == 0 && self.readable().is_empty() {
                return Ok(dispatched);
            }
            let len = self.readable().len();
            let result = conn.feed(&self.read_buffer[self.read_pos..self.read_len]);
            self.consume(len);
            dispatched += result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if n == 0 {
                return Ok(dispatched);
            }
        }
    }

    /// Queue data untuk write
    #[inline]
    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_buffer.extend_from_slice(data);
    }

    /// Pindahkan outbound buffer connection ke transport, lalu flush.
    ///
    /// Hanya diambil ketika write buffer sudah kosong, jadi limit outbound
    /// connection tetap berlaku saat peer lambat membaca.
    pub fn flush_from(&mut self, conn: &mut Connection) -> io::Result<()> {
        loop {
            self.flush_write_buffer()?;
            // Socket penuh, sisanya menunggu writable berikutnya
            if !self.write_buffer.is_empty() || !conn.has_outbound() {
                return Ok(());
            }
            let pending = conn.take_outbound();
            self.queue_write(&pending);
        }
    }

    /// Flush write buffer ke socket
    #[inline]
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        // Partial write, sisanya menunggu writable berikutnya
        self.write_buffer.drain(..written);
        Ok(())
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Underlying stream untuk registrasi polling
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory stream: reads from `input`, collects writes, accepts at most
    /// `chunk` bytes per write.
    struct Pipe {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        chunk: usize,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.input.read(buf)?;
            if n == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            Ok(n)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.chunk == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn pipe(input: &[u8], chunk: usize) -> Pipe {
        Pipe {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
            chunk,
        }
    }

    #[test]
    fn test_fill_and_consume() {
        let mut transport = Transport::new(pipe(b"abcdef", 4), 64);
        assert_eq!(transport.fill_read_buffer().unwrap(), 6);
        assert_eq!(transport.readable(), b"abcdef");
        transport.consume(4);
        assert_eq!(transport.readable(), b"ef");
        assert_eq!(transport.fill_read_buffer().unwrap(), 0);
        assert_eq!(transport.readable(), b"ef");
    }

    #[test]
    fn test_partial_write_keeps_remainder() {
        let mut transport = Transport::new(pipe(b"", 3), 64);
        transport.queue_write(b"hello");
        transport.flush_write_buffer().unwrap();
        assert_eq!(transport.write_pending(), 0);
        assert_eq!(transport.stream().output, b"hello");

        transport.stream_mut().chunk = 0;
        transport.queue_write(b"again");
        transport.flush_write_buffer().unwrap();
        assert_eq!(transport.write_pending(), 5);
    }

    #[test]
    fn test_flush_from_drains_connection() {
        use crate::config::ConnectionConfig;
        use crate::core::{ObjectId, Role};
        use crate::protocol::Arg;
        use crate::schema::Schema;
        use std::sync::Arc;

        let schema = Schema::from_source(
            "interface display { request sync { callback: id(callback) (new) } }\n\
             interface callback { event done (destructor) { data: u32 } }",
        )
        .unwrap();
        let config = ConnectionConfig::default();
        let mut conn = Connection::with_schema(Arc::new(schema), Role::Client, &config);
        conn.create_object("display", 1, Some(ObjectId::ROOT)).unwrap();
        for _ in 0..2 {
            let cb = conn.next_id().unwrap();
            conn.send(ObjectId::ROOT, 0, &[Arg::NewId(cb)]).unwrap();
        }

        let mut transport = Transport::new(pipe(b"", 5), 64);
        transport.flush_from(&mut conn).unwrap();
        assert!(!conn.has_outbound());
        assert_eq!(transport.write_pending(), 0);
        assert_eq!(transport.stream().output.len(), 24);
    }
}
