//! rx-protocol: Wire format for rexec command channels
//!
//! This crate defines the bytes exchanged on the command channel of a
//! remote command invocation: control directives flowing from the client
//! to the executing server, and the exit code reported back once the
//! process has finished and its output has been drained.

pub mod codec;
pub mod directive;
pub mod error;
pub mod result;

pub use codec::DirectiveCodec;
pub use directive::{Directive, DirectiveTag, TerminalSize, SET_TERMINAL_SIZE_LEN};
pub use error::ProtocolError;
pub use result::{
    read_exit_code, write_exit_code, EXIT_CODE_CANCELED, EXIT_CODE_SPAWN_FAILED, RESULT_SIZE,
};
