//! Codec adapter: converts one admitted file into the target format,
//! selecting the fallback strategy when the primary codec cannot handle the
//! input subtype.

use std::io::Cursor;
use std::sync::Arc;

use crate::admission::{strip_suffix_ci, CandidateFile};
use crate::config::ConverterConfig;
use crate::error::CodecError;

/// Suffix applied to every derived output name.
pub const TARGET_SUFFIX: &str = ".png";

/// Black-box seam for the primary (HEIC/HEIF) codec.
///
/// Implementations may return multiple representations for one input; only
/// the first is meaningful for this pipeline.
pub trait PrimaryCodec: Send + Sync {
    fn convert(&self, payload: &[u8], quality: f32) -> Result<Vec<Vec<u8>>, CodecError>;
}

/// One successful conversion: target payload plus derived output name.
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    pub name: String,
    pub payload: Vec<u8>,
}

pub struct CodecAdapter {
    codec: Arc<dyn PrimaryCodec>,
    config: ConverterConfig,
}

impl CodecAdapter {
    pub fn new(codec: Arc<dyn PrimaryCodec>, config: ConverterConfig) -> Self {
        Self { codec, config }
    }

    /// Converts one admitted file. A failure here is isolated to the item;
    /// callers record the reason and continue with sibling tasks.
    pub fn convert(&self, file: &CandidateFile) -> Result<ConvertedImage, CodecError> {
        let _span = tracing::info_span!("codec.convert", file = %file.name).entered();

        let payload = if self.config.enable_fallback_codec && self.is_fallback_input(file) {
            self.reencode_fallback(&file.payload)?
        } else {
            let mut outputs = self.codec.convert(&file.payload, self.config.target_quality)?;
            if outputs.is_empty() {
                return Err(CodecError::EmptyOutput);
            }
            outputs.swap_remove(0)
        };

        Ok(ConvertedImage {
            name: self.output_name(&file.name),
            payload,
        })
    }

    /// The primary codec is format-specific; fallback inputs are recognized
    /// by suffix or declared media type and re-encoded directly.
    fn is_fallback_input(&self, file: &CandidateFile) -> bool {
        if self
            .config
            .fallback_suffixes
            .iter()
            .any(|suffix| strip_suffix_ci(&file.name, suffix).is_some())
        {
            return true;
        }
        match file.media_type.as_deref() {
            Some(media_type) => self
                .config
                .fallback_media_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(media_type)),
            None => false,
        }
    }

    /// Decodes the input into an in-memory bitmap and re-encodes it to the
    /// target format, bypassing the primary codec.
    fn reencode_fallback(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let img = image::load_from_memory(payload)
            .map_err(|e| CodecError::FallbackDecode(e.to_string()))?;
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| CodecError::TargetEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Replaces exactly one recognized source suffix with the target suffix,
    /// case-insensitively. Unrecognized names get the target suffix appended.
    pub fn output_name(&self, name: &str) -> String {
        let fallback = self
            .config
            .enable_fallback_codec
            .then_some(self.config.fallback_suffixes.as_slice())
            .unwrap_or(&[]);

        for suffix in self.config.accepted_suffixes.iter().chain(fallback) {
            if let Some(stem) = strip_suffix_ci(name, suffix) {
                return format!("{}{}", stem, TARGET_SUFFIX);
            }
        }

        format!("{}{}", name, TARGET_SUFFIX)
    }
}
