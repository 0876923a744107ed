//! Tokio codec for control directives

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::directive::{Directive, DirectiveTag, SET_TERMINAL_SIZE_LEN};
use crate::error::ProtocolError;

/// Codec for encoding/decoding control directives
///
/// Decoding an unknown tag is a hard error: nothing after it can be
/// trusted to be aligned on a directive boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectiveCodec;

impl DirectiveCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for DirectiveCodec {
    type Item = Directive;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&tag_byte) = src.first() else {
            return Ok(None);
        };

        let tag = DirectiveTag::from_u8(tag_byte).ok_or(ProtocolError::UnknownDirective(tag_byte))?;

        match tag {
            DirectiveTag::Kill => {
                src.advance(1);
                Ok(Some(Directive::Kill))
            }
            DirectiveTag::SetTerminalSize => {
                if src.len() < SET_TERMINAL_SIZE_LEN {
                    src.reserve(SET_TERMINAL_SIZE_LEN - src.len());
                    return Ok(None);
                }

                src.advance(1);
                let cols = src.get_i32();
                let rows = src.get_i32();
                // Reserved pixel width/height
                let _ = src.get_i32();
                let _ = src.get_i32();

                tracing::trace!("Decoded terminal size directive {}x{}", cols, rows);
                Ok(Some(Directive::SetTerminalSize { cols, rows }))
            }
        }
    }
}

impl Encoder<Directive> for DirectiveCodec {
    type Error = ProtocolError;

    fn encode(&mut self, directive: Directive, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match directive {
            Directive::Kill => {
                dst.reserve(1);
                dst.put_u8(DirectiveTag::Kill.as_u8());
            }
            Directive::SetTerminalSize { cols, rows } => {
                dst.reserve(SET_TERMINAL_SIZE_LEN);
                dst.put_u8(DirectiveTag::SetTerminalSize.as_u8());
                dst.put_i32(cols);
                dst.put_i32(rows);
                dst.put_i32(0);
                dst.put_i32(0);
            }
        }
        Ok(())
    }
}
