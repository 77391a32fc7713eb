/// Controls payload parsing and outbound validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Zone indices at or above this value are rejected by the parsers.
    pub max_zones: u8,
    /// When true, outbound frames with an unknown code fail validation.
    pub fail_on_unknown_code: bool,
    /// When true, layout documents reject properties not in the layout schema.
    pub strict_mode: bool,
    /// Maximum bytes accepted when loading a layout file.
    pub max_layout_file_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_zones: 12,
            fail_on_unknown_code: true,
            strict_mode: false,
            max_layout_file_size: 256 * 1024,
        }
    }
}
