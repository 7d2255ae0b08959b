//! Complex sample packing.
//!
//! DIFI payloads carry signed I/Q components of 8 or 16 bits, I first. On
//! the block side items are `complex64` (two f32) or `complex_int16` (two
//! i16). Components are written little-endian, the layout existing DIFI
//! radio blocks use. Narrowing saturates.

use bytes::BufMut;
use cloudradio_core::{Error as CoreError, ItemFormat};
use serde::{Deserialize, Serialize};

use crate::error::{DifiError, Result};

/// Signed cartesian, link-efficient packing; only the width differs.
const EIGHT_BIT_PAYLOAD_FORMAT: u64 = 0xa000_01c7_0000_0000;
const SIXTEEN_BIT_PAYLOAD_FORMAT: u64 = 0xa000_01cf_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[serde(rename = "8")]
    Eight,
    #[default]
    #[serde(rename = "16")]
    Sixteen,
}

impl BitDepth {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(BitDepth::Eight),
            16 => Ok(BitDepth::Sixteen),
            other => Err(DifiError::Config(format!(
                "bit depth must be 8 or 16, got {}",
                other
            ))),
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    /// Bytes per packed complex sample.
    pub fn sample_bytes(&self) -> usize {
        match self {
            BitDepth::Eight => 2,
            BitDepth::Sixteen => 4,
        }
    }

    pub fn payload_format(&self) -> u64 {
        match self {
            BitDepth::Eight => EIGHT_BIT_PAYLOAD_FORMAT,
            BitDepth::Sixteen => SIXTEEN_BIT_PAYLOAD_FORMAT,
        }
    }
}

/// Converts between block items and packed payload samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCodec {
    format: ItemFormat,
    depth: BitDepth,
}

impl SampleCodec {
    pub fn new(format: ItemFormat, depth: BitDepth) -> Result<Self> {
        match format {
            ItemFormat::Complex64 | ItemFormat::ComplexInt16 => Ok(Self { format, depth }),
            other => Err(DifiError::Config(format!(
                "DIFI carries complex samples; {} is not supported",
                other
            ))),
        }
    }

    pub fn format(&self) -> ItemFormat {
        self.format
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    pub fn item_size(&self) -> usize {
        self.format.sample_size()
    }

    /// Pack one item (exactly `item_size` bytes) onto `out`.
    pub fn pack_item(&self, item: &[u8], out: &mut impl BufMut) {
        let (re, im) = match self.format {
            ItemFormat::ComplexInt16 => (
                i16::from_le_bytes([item[0], item[1]]),
                i16::from_le_bytes([item[2], item[3]]),
            ),
            _ => (
                f32::from_le_bytes([item[0], item[1], item[2], item[3]]) as i16,
                f32::from_le_bytes([item[4], item[5], item[6], item[7]]) as i16,
            ),
        };
        match self.depth {
            BitDepth::Eight => {
                out.put_i8(narrow(re));
                out.put_i8(narrow(im));
            }
            BitDepth::Sixteen => {
                out.put_i16_le(re);
                out.put_i16_le(im);
            }
        }
    }

    /// Unpack whole samples from `payload` onto `out`. Returns the number of
    /// items written; a trailing partial sample is ignored.
    pub fn unpack(&self, payload: &[u8], out: &mut Vec<u8>) -> usize {
        let width = self.depth.sample_bytes();
        let mut n = 0;
        for sample in payload.chunks_exact(width) {
            let (re, im) = match self.depth {
                BitDepth::Eight => (i16::from(sample[0] as i8), i16::from(sample[1] as i8)),
                BitDepth::Sixteen => (
                    i16::from_le_bytes([sample[0], sample[1]]),
                    i16::from_le_bytes([sample[2], sample[3]]),
                ),
            };
            match self.format {
                ItemFormat::ComplexInt16 => {
                    out.extend_from_slice(&re.to_le_bytes());
                    out.extend_from_slice(&im.to_le_bytes());
                }
                _ => {
                    out.extend_from_slice(&f32::from(re).to_le_bytes());
                    out.extend_from_slice(&f32::from(im).to_le_bytes());
                }
            }
            n += 1;
        }
        n
    }

    /// Items in `input`, or an error when it splits an item.
    pub fn whole_items(&self, input: &[u8]) -> Result<usize> {
        let item_size = self.item_size();
        if input.len() % item_size != 0 {
            return Err(CoreError::PartialItem {
                len: input.len(),
                item_size,
            }
            .into());
        }
        Ok(input.len() / item_size)
    }
}

fn narrow(v: i16) -> i8 {
    v.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8
}
