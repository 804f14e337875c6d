//! Decode/encode error codes (`spec.md` §6.3, §7).

use thiserror::Error;

/// Errors surfaced while decoding a GCIF bitstream.
///
/// `File` exists for interface completeness with the original error-code
/// table; this crate performs no file I/O itself, so it never constructs
/// that variant — a file-backed wrapper built on top of this crate would
/// map its I/O errors onto it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("I/O failure reading the encoded stream")]
    File,
    #[error("header failed its authenticity hash check")]
    BadHead,
    #[error("image dimensions in the header are invalid")]
    BadDims,
    #[error("end-of-stream data hash did not match the header's fast_hash")]
    BadData,
    #[error("dominant-colour mask bitstream is structurally invalid")]
    MaskCodes,
    #[error("mask run-length decoding produced an inconsistent pixel count")]
    MaskDeci,
    #[error("mask layer observed an LZ claim it could not reconcile")]
    MaskLz,
    #[error("LZ match code alphabet decode failure")]
    LzCodes,
    #[error("LZ match geometry violates an invariant (out of bounds or overlapping)")]
    LzBad,
    #[error("palette header or palette-indexed stream is invalid")]
    BadPal,
    #[error("mono (single-channel) stream is structurally invalid")]
    BadMono,
    #[error("RGBA stream is structurally invalid")]
    BadRgba,
}

/// Errors surfaced while encoding an image.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    #[error("knob values are out of their valid range")]
    BadParams,
    #[error("image dimensions are invalid")]
    BadDims,
    #[error("I/O failure writing the encoded stream")]
    File,
    #[error("internal invariant violated (decoder/encoder bug)")]
    Bug,
}
