//! Sample item formats.
//!
//! A block streams *items*: `vlen` consecutive samples of one [`ItemFormat`].
//! All buffering in this crate is done on raw little-endian bytes, so the
//! only thing the core needs to know about an item is its size.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scalar sample type carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFormat {
    /// Interleaved f32 I/Q pairs.
    #[default]
    Complex64,
    Float32,
    Int32,
    /// Interleaved i16 I/Q pairs.
    ComplexInt16,
    Int16,
    Byte,
}

impl ItemFormat {
    /// Parse from a config string (case-insensitive). Accepts the long names
    /// as well as the SigMF datatype tags.
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "complex64" | "complex" | "cf32" | "cf32_le" | "fc32" => Ok(ItemFormat::Complex64),
            "float32" | "float" | "rf32" | "rf32_le" | "f32" => Ok(ItemFormat::Float32),
            "int32" | "int" | "ri32" | "ri32_le" | "i32" => Ok(ItemFormat::Int32),
            "complex_int16" | "complexint16" | "ci16" | "ci16_le" | "sc16" => {
                Ok(ItemFormat::ComplexInt16)
            }
            "int16" | "short" | "ri16" | "ri16_le" | "i16" => Ok(ItemFormat::Int16),
            "byte" | "u8" | "ru8" | "uchar" => Ok(ItemFormat::Byte),
            other => Err(Error::Config(format!("unknown item format: '{}'", other))),
        }
    }

    /// Size of one sample in bytes.
    pub fn sample_size(&self) -> usize {
        match self {
            ItemFormat::Complex64 => 8,
            ItemFormat::Float32 | ItemFormat::Int32 | ItemFormat::ComplexInt16 => 4,
            ItemFormat::Int16 => 2,
            ItemFormat::Byte => 1,
        }
    }

    /// SigMF `core:datatype` tag for this format.
    pub fn sigmf_datatype(&self) -> &'static str {
        match self {
            ItemFormat::Complex64 => "cf32_le",
            ItemFormat::Float32 => "rf32_le",
            ItemFormat::Int32 => "ri32_le",
            ItemFormat::ComplexInt16 => "ci16_le",
            ItemFormat::Int16 => "ri16_le",
            ItemFormat::Byte => "ru8",
        }
    }
}

impl std::fmt::Display for ItemFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemFormat::Complex64 => write!(f, "complex64"),
            ItemFormat::Float32 => write!(f, "float32"),
            ItemFormat::Int32 => write!(f, "int32"),
            ItemFormat::ComplexInt16 => write!(f, "complex_int16"),
            ItemFormat::Int16 => write!(f, "int16"),
            ItemFormat::Byte => write!(f, "byte"),
        }
    }
}

/// Format plus vector length: the unit a work call counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSpec {
    format: ItemFormat,
    vlen: usize,
}

impl ItemSpec {
    pub fn new(format: ItemFormat, vlen: usize) -> Result<Self> {
        if vlen == 0 {
            return Err(Error::Config("vlen must be at least 1".to_string()));
        }
        if format.sample_size().checked_mul(vlen).is_none() {
            return Err(Error::Config(format!("vlen {} is too large for {}", vlen, format)));
        }
        Ok(Self { format, vlen })
    }

    pub fn scalar(format: ItemFormat) -> Self {
        Self { format, vlen: 1 }
    }

    pub fn format(&self) -> ItemFormat {
        self.format
    }

    pub fn vlen(&self) -> usize {
        self.vlen
    }

    /// Bytes per item.
    pub fn item_size(&self) -> usize {
        self.format.sample_size() * self.vlen
    }

    /// Number of whole items in `len` bytes, or an error if `len` would split
    /// an item.
    pub fn whole_items(&self, len: usize) -> Result<usize> {
        let item_size = self.item_size();
        if len % item_size != 0 {
            return Err(Error::PartialItem { len, item_size });
        }
        Ok(len / item_size)
    }
}

impl Default for ItemSpec {
    fn default() -> Self {
        Self::scalar(ItemFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_config_aliases() {
        assert_eq!(ItemFormat::from_str_config("complex64").unwrap(), ItemFormat::Complex64);
        assert_eq!(ItemFormat::from_str_config("CF32_LE").unwrap(), ItemFormat::Complex64);
        assert_eq!(ItemFormat::from_str_config("float").unwrap(), ItemFormat::Float32);
        assert_eq!(ItemFormat::from_str_config("ri32_le").unwrap(), ItemFormat::Int32);
        assert_eq!(ItemFormat::from_str_config("sc16").unwrap(), ItemFormat::ComplexInt16);
        assert_eq!(ItemFormat::from_str_config("short").unwrap(), ItemFormat::Int16);
        assert_eq!(ItemFormat::from_str_config("u8").unwrap(), ItemFormat::Byte);
    }

    #[test]
    fn test_from_str_config_unknown() {
        let err = ItemFormat::from_str_config("complex128").unwrap_err();
        assert!(err.to_string().contains("complex128"));
    }

    #[test]
    fn test_sample_sizes() {
        assert_eq!(ItemFormat::Complex64.sample_size(), 8);
        assert_eq!(ItemFormat::Float32.sample_size(), 4);
        assert_eq!(ItemFormat::Int32.sample_size(), 4);
        assert_eq!(ItemFormat::ComplexInt16.sample_size(), 4);
        assert_eq!(ItemFormat::Int16.sample_size(), 2);
        assert_eq!(ItemFormat::Byte.sample_size(), 1);
    }

    #[test]
    fn test_sigmf_tags_round_trip_through_parser() {
        for format in [
            ItemFormat::Complex64,
            ItemFormat::Float32,
            ItemFormat::Int32,
            ItemFormat::ComplexInt16,
            ItemFormat::Int16,
            ItemFormat::Byte,
        ] {
            let parsed = ItemFormat::from_str_config(format.sigmf_datatype()).unwrap();
            assert_eq!(parsed, format);
        }
    }

    #[test]
    fn test_item_spec_vector_size() {
        let spec = ItemSpec::new(ItemFormat::Complex64, 10).unwrap();
        assert_eq!(spec.item_size(), 80);
        assert_eq!(spec.whole_items(160).unwrap(), 2);
        assert!(spec.whole_items(100).is_err());
    }

    #[test]
    fn test_item_spec_zero_vlen_rejected() {
        assert!(ItemSpec::new(ItemFormat::Float32, 0).is_err());
    }

    #[test]
    fn test_item_spec_overflowing_vlen_rejected() {
        let err = ItemSpec::new(ItemFormat::Complex64, usize::MAX / 4).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(ItemSpec::new(ItemFormat::Byte, usize::MAX).is_ok());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ItemFormat::ComplexInt16).unwrap();
        assert_eq!(json, "\"complex_int16\"");
        let parsed: ItemFormat = serde_json::from_str("\"float32\"").unwrap();
        assert_eq!(parsed, ItemFormat::Float32);
    }
}
