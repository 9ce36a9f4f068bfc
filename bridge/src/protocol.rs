use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sent in place of a query-id length to mark a control frame.
pub const CONTROL_MAGIC: u32 = 0xCAFE_FEED;
/// The only control command: the producer-side query has completed.
pub const COMMAND_JDBC_FINISHED: u32 = 1;
/// Literal reply to a connection presenting a bad token.
pub const UNAUTHORIZED_REPLY: &[u8] = b"ERROR: UNAUTHORIZED";

/// Query ids are capped by the data model (opaque string, <= 256 bytes).
pub const MAX_QUERY_ID_BYTES: usize = 256;
pub const MAX_TOKEN_BYTES: usize = 1024;
pub const MAX_SCHEMA_BYTES: usize = 1024 * 1024;

pub async fn read_u32<R>(reader: &mut R) -> io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw).await?;
    Ok(u32::from_be_bytes(raw))
}

async fn read_exact_vec<R>(reader: &mut R, nb_bytes: usize, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if nb_bytes > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {nb_bytes} bytes exceeds the {max} byte limit"),
        ));
    }
    let mut payload = vec![0u8; nb_bytes];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Reads a `[u32 len][bytes]` frame, rejecting lengths above `max`.
pub async fn read_len_prefixed<R>(reader: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let nb_bytes = read_u32(reader).await? as usize;
    read_exact_vec(reader, nb_bytes, max).await
}

/// Reads the body of a frame whose length prefix was already consumed.
pub async fn read_frame_body<R>(reader: &mut R, nb_bytes: usize, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    read_exact_vec(reader, nb_bytes, max).await
}

/// Writes a token-authenticated control handshake:
/// `[u32 len][token]? [u32 magic] [u32 len][qid] [u32 command]`.
pub async fn write_control_frame<W>(
    writer: &mut W,
    token: Option<&str>,
    query_id: &str,
    command: u32,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = vec![];
    if let Some(token) = token {
        sluice_wire::codec::put_len_prefixed(&mut frame, token.as_bytes());
    }
    sluice_wire::codec::put_u32(&mut frame, CONTROL_MAGIC);
    sluice_wire::codec::put_len_prefixed(&mut frame, query_id.as_bytes());
    sluice_wire::codec::put_u32(&mut frame, command);
    writer.write_all(&frame).await?;
    writer.flush().await
}
