use crate::codec::CompressionScheme;
use crate::external::EXTERNAL_CHUNK_EXTENSION;

/// Settings shared by regions opened from files.
#[derive(Debug, Clone)]
pub struct RegionOptions {
    /// Scheme for chunks which have no stored scheme yet.
    pub compression: CompressionScheme,
    /// Extension of external chunk files.
    pub external_extension: String,
    /// Whether chunks over 255 sectors may be moved to external files.
    pub allow_external: bool,
}

impl RegionOptions {
    pub fn with_compression(mut self, compression: CompressionScheme) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_external_extension(mut self, extension: &str) -> Self {
        self.external_extension = extension.to_owned();
        self
    }

    pub fn with_external(mut self, allow_external: bool) -> Self {
        self.allow_external = allow_external;
        self
    }
}

impl Default for RegionOptions {
    fn default() -> Self {
        RegionOptions {
            compression: CompressionScheme::Zlib,
            external_extension: EXTERNAL_CHUNK_EXTENSION.to_owned(),
            allow_external: true,
        }
    }
}
