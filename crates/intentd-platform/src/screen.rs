//! Screen capture, text recognition and clipboard capabilities.
//!
//! The OCR scanner treats all three as black boxes: a capture produces a
//! [`Bitmap`], a recognizer turns a bitmap into [`RecognizedText`] fragments,
//! and the clipboard reads and writes plain text.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Rectangular screen region in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Raw captured pixels.  The layout of `data` is backend-defined; only the
/// matching [`TextRecognizer`] needs to understand it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Axis-aligned box around a recognized text fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// One recognized text fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub bounds: BoundingBox,
}

/// Captures the whole screen or a region of it.
pub trait ScreenCapture: Send + Sync {
    fn capture(&self, region: Option<Region>) -> Result<Bitmap>;
}

/// Turns a bitmap into text fragments.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, bitmap: &Bitmap) -> Result<Vec<RecognizedText>>;
}

/// Plain-text system clipboard.
pub trait Clipboard: Send + Sync {
    fn read(&self) -> Result<String>;
    fn write(&self, text: &str) -> Result<()>;
}
