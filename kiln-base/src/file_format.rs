//! Helpers shared by the binary file formats. Every file starts with a `FileFormatHeader`.
//! Fixed size headers are bincode encoded, variable length arrays follow as raw little endian
//! values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;

fn to_io_error(error: bincode::Error) -> io::Error {
    match *error {
        bincode::ErrorKind::Io(error) => error,
        error => io::Error::new(io::ErrorKind::InvalidData, error),
    }
}

/// Append a fixed size header, bincode encoded
pub fn write_header<T: Serialize>(
    bytes: &mut Vec<u8>,
    header: &T,
) -> io::Result<()> {
    bincode::serialize_into(bytes, header).map_err(to_io_error)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormatHeader {
    pub format_type: u32,
    pub format_version: u32,
}

impl FileFormatHeader {
    pub const SIZE: usize = 8;

    pub fn new(
        format_type: u32,
        format_version: u32,
    ) -> Self {
        FileFormatHeader {
            format_type,
            format_version,
        }
    }

    pub fn write_to(
        &self,
        bytes: &mut Vec<u8>,
    ) -> io::Result<()> {
        write_header(bytes, self)
    }

    pub fn read_from(reader: &mut BinaryReader) -> io::Result<Self> {
        reader.read_header()
    }

    /// Read the header and fail if it doesn't match
    pub fn read_expected(
        reader: &mut BinaryReader,
        format_type: u32,
        format_version: u32,
    ) -> io::Result<Self> {
        let header = Self::read_from(reader)?;
        if header.format_type != format_type {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid format type {:#010x}, expected {:#010x}",
                    header.format_type, format_type
                ),
            ));
        }

        if header.format_version != format_version {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Invalid format version {}, expected {}",
                    header.format_version, format_version
                ),
            ));
        }

        Ok(header)
    }
}

/// Cursor over a byte slice. Reads past the end fail with `UnexpectedEof`.
pub struct BinaryReader<'a> {
    remaining: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        BinaryReader { remaining: bytes }
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.remaining
    }

    /// For handing the cursor to a `std::io::Read` based decoder, which advances it
    pub fn as_read(&mut self) -> &mut &'a [u8] {
        &mut self.remaining
    }

    /// Decode a fixed size header written by `write_header`
    pub fn read_header<T: DeserializeOwned>(&mut self) -> io::Result<T> {
        bincode::deserialize_from(self.as_read()).map_err(to_io_error)
    }

    pub fn read_bytes(
        &mut self,
        count: usize,
    ) -> io::Result<&'a [u8]> {
        if self.remaining.len() < count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Tried to read {} bytes but only {} are left",
                    count,
                    self.remaining.len()
                ),
            ));
        }

        let (read, remaining) = self.remaining.split_at(count);
        self.remaining = remaining;
        Ok(read)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32_array(
        &mut self,
        count: usize,
    ) -> io::Result<Vec<u32>> {
        let bytes = self.read_bytes(count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    pub fn read_f32_array(
        &mut self,
        count: usize,
    ) -> io::Result<Vec<f32>> {
        Ok(self
            .read_u32_array(count)?
            .into_iter()
            .map(f32::from_bits)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_checks() {
        let mut bytes = Vec::new();
        FileFormatHeader::new(7, 2).write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), FileFormatHeader::SIZE);
        assert_eq!(&bytes[..4], &7u32.to_le_bytes());

        let header = FileFormatHeader::read_expected(&mut BinaryReader::new(&bytes), 7, 2).unwrap();
        assert_eq!(header.format_version, 2);

        let error = FileFormatHeader::read_expected(&mut BinaryReader::new(&bytes), 8, 2);
        assert_eq!(error.unwrap_err().kind(), io::ErrorKind::InvalidData);
        let error = FileFormatHeader::read_expected(&mut BinaryReader::new(&bytes), 7, 3);
        assert_eq!(error.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ExampleHeader {
        count: u32,
        scale: f32,
    }

    #[test]
    fn test_header_followed_by_raw_values() {
        let mut bytes = Vec::new();
        write_header(
            &mut bytes,
            &ExampleHeader {
                count: 2,
                scale: 0.5,
            },
        )
        .unwrap();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());

        let mut reader = BinaryReader::new(&bytes);
        let header: ExampleHeader = reader.read_header().unwrap();
        assert_eq!(
            header,
            ExampleHeader {
                count: 2,
                scale: 0.5
            }
        );
        assert_eq!(reader.read_u32_array(header.count as usize).unwrap(), vec![3, 4]);

        // Truncated headers fail like truncated arrays
        let mut truncated = BinaryReader::new(&bytes[..6]);
        assert_eq!(
            truncated.read_header::<ExampleHeader>().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_reader_bounds() {
        let bytes = [1, 0, 0, 0, 2, 0, 0, 0, 9];
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(reader.read_u32_array(2).unwrap(), vec![1, 2]);
        assert_eq!(reader.read_u8().unwrap(), 9);
        assert_eq!(
            reader.read_u32().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
