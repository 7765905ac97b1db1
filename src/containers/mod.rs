pub mod compression;

pub trait CompressionContainer {
    fn decompress(&self) -> Result<Vec<u8>, String>;
    fn to_bytes(&self) -> Vec<u8>;
}

pub trait ContainerHandler {
    fn magic_word() -> &'static [u8];
    fn matches(data: &[u8]) -> bool {
        data.starts_with(Self::magic_word())
    }
}
