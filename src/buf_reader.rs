/// Read slices similar to std::io::Cursor with byteorder extension
pub struct BufReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BufReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_consumed(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn read_u8(&mut self) -> std::io::Result<u8> {
        if self.pos >= self.buf.len() {
            return Err(past_end());
        }
        let value = self.buf[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u16_be(&mut self) -> std::io::Result<u16> {
        if self.pos + 1 >= self.buf.len() {
            return Err(past_end());
        }
        let value = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u24_be(&mut self) -> std::io::Result<u32> {
        if self.pos + 2 >= self.buf.len() {
            return Err(past_end());
        }
        let value = u32::from_be_bytes([
            0,
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
        ]);
        self.pos += 3;
        Ok(value)
    }

    pub fn read_slice(&mut self, len: usize) -> std::io::Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(past_end());
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a vector prefixed by a one byte length, as used by TLS `opaque<0..2^8-1>`.
    pub fn read_u8_prefixed(&mut self) -> std::io::Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.read_slice(len)
    }

    pub fn read_u16_prefixed(&mut self) -> std::io::Result<&'a [u8]> {
        let len = self.read_u16_be()? as usize;
        self.read_slice(len)
    }

    pub fn read_u24_prefixed(&mut self) -> std::io::Result<&'a [u8]> {
        let len = self.read_u24_be()? as usize;
        self.read_slice(len)
    }

}

fn past_end() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "Read past end of buffer",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut reader = BufReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16_be().unwrap(), 0x0203);
        assert_eq!(reader.read_u24_be().unwrap(), 0x040506);
        assert!(reader.is_consumed());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_read_prefixed() {
        let data = [0x02, 0xaa, 0xbb, 0x00, 0x01, 0xcc, 0x00, 0x00, 0x00];
        let mut reader = BufReader::new(&data);
        assert_eq!(reader.read_u8_prefixed().unwrap(), &[0xaa, 0xbb]);
        assert_eq!(reader.read_u16_prefixed().unwrap(), &[0xcc]);
        assert!(reader.read_u24_prefixed().unwrap().is_empty());
        assert!(reader.is_consumed());
    }

    #[test]
    fn test_truncated_prefix_is_error() {
        let data = [0x05, 0x01, 0x02];
        let mut reader = BufReader::new(&data);
        let err = reader.read_u8_prefixed().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
