//! Command result encoding
//!
//! The last thing written on the output side of the command channel is a
//! single big-endian `i32`: the process exit code, or one of the negative
//! sentinels below.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Size of the encoded result in bytes
pub const RESULT_SIZE: usize = 4;

/// Reported when the process could not be spawned
pub const EXIT_CODE_SPAWN_FAILED: i32 = -1;

/// Reported when the command was canceled by its owner rather than by a
/// `KILL` directive
pub const EXIT_CODE_CANCELED: i32 = -2;

/// Write the exit code and flush it
pub async fn write_exit_code<W>(writer: &mut W, code: i32) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&code.to_be_bytes()).await?;
    writer.flush().await
}

/// Read an exit code written by [`write_exit_code`]
pub async fn read_exit_code<R>(reader: &mut R) -> Result<i32, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; RESULT_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(i32::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_code_is_big_endian() {
        let mut out = Vec::new();
        write_exit_code(&mut out, 258).await.unwrap();
        assert_eq!(out, vec![0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_spawn_failure_sentinel_bytes() {
        let mut out = Vec::new();
        write_exit_code(&mut out, EXIT_CODE_SPAWN_FAILED).await.unwrap();
        assert_eq!(out, vec![0xFF; RESULT_SIZE]);

        let mut input: &[u8] = &out;
        assert_eq!(read_exit_code(&mut input).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_truncated_result_is_eof() {
        let mut input: &[u8] = &[0, 0];
        let err = read_exit_code(&mut input).await.unwrap_err();
        assert!(err.is_eof());
    }
}
