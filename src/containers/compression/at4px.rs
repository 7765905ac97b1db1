use crate::containers::{CompressionContainer, ContainerHandler};
use crate::formats::px::{PXCompLevel, PxHandler, PX_CONTROL_FLAG_COUNT};
use std::io::{self};

// At4pxContainer wraps the PX compressed pixel data of a single portrait.
// Header: magic (5), container length (u16), control flags (9), decompressed length (u16)

pub const AT4PX_CONTAINER_HEADER_SIZE: usize = 0x12;

#[derive(Debug, Clone)]
pub struct At4pxContainer {
    pub control_flags_bytes: [u8; PX_CONTROL_FLAG_COUNT],
    pub decompressed_size: u16,
    pub compressed_data: Vec<u8>,
}

impl At4pxContainer {
    /// Reads only as much of `data` as the header claims, so trailing bytes are ignored
    pub fn get_container_size_and_deserialise(data: &[u8]) -> io::Result<(usize, Self)> {
        if data.len() < 7 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Data too short to read container size",
            ));
        }

        if !Self::matches(data) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic number - not an AT4PX container",
            ));
        }

        let container_length = u16::from_le_bytes([data[5], data[6]]) as usize;

        if container_length > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Container length ({}) exceeds available data ({})",
                    container_length,
                    data.len()
                ),
            ));
        }

        let container = Self::parse(&data[..container_length])?;

        Ok((container_length, container))
    }

    fn parse(data: &[u8]) -> io::Result<Self> {
        if data.len() < AT4PX_CONTAINER_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Data too short"));
        }

        if !Self::matches(data) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid magic number",
            ));
        }

        let container_length = u16::from_le_bytes([data[5], data[6]]) as usize;
        if container_length < AT4PX_CONTAINER_HEADER_SIZE || container_length > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid AT4PX container length {}", container_length),
            ));
        }

        let mut control_flags_bytes = [0u8; PX_CONTROL_FLAG_COUNT];
        control_flags_bytes.copy_from_slice(&data[7..16]);
        let decompressed_size = u16::from_le_bytes([data[16], data[17]]);

        let compressed_data = data[AT4PX_CONTAINER_HEADER_SIZE..container_length].to_vec();

        Ok(At4pxContainer {
            control_flags_bytes,
            decompressed_size,
            compressed_data,
        })
    }

    pub fn container_length(&self) -> usize {
        AT4PX_CONTAINER_HEADER_SIZE + self.compressed_data.len()
    }

    pub fn from_uncompressed(
        data: &[u8],
        level: PXCompLevel,
        search_first: bool,
    ) -> Result<Self, String> {
        let decompressed_size = u16::try_from(data.len())
            .map_err(|_| format!("AT4PX input too long: {} bytes", data.len()))?;

        let packed = PxHandler::compress(data, level, search_first)?;

        let container = At4pxContainer {
            control_flags_bytes: packed.control_flags,
            decompressed_size,
            compressed_data: packed.data,
        };

        if container.container_length() > u16::MAX as usize {
            return Err(format!(
                "AT4PX container length {} overflows 16 bits",
                container.container_length()
            ));
        }

        Ok(container)
    }
}

impl ContainerHandler for At4pxContainer {
    fn magic_word() -> &'static [u8] {
        b"AT4PX"
    }
}

impl CompressionContainer for At4pxContainer {
    fn decompress(&self) -> Result<Vec<u8>, String> {
        let decompressed =
            PxHandler::decompress(&self.compressed_data, &self.control_flags_bytes)?;

        if decompressed.len() != self.decompressed_size as usize {
            return Err(format!(
                "AT4PX decompressed to {} bytes, header says {}",
                decompressed.len(),
                self.decompressed_size
            ));
        }

        Ok(decompressed)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.container_length());
        out.extend_from_slice(Self::magic_word());
        out.extend_from_slice(&(self.container_length() as u16).to_le_bytes());
        out.extend_from_slice(&self.control_flags_bytes);
        out.extend_from_slice(&self.decompressed_size.to_le_bytes());
        out.extend_from_slice(&self.compressed_data);
        out
    }
}
