use bytes::{Buf, BytesMut};
use eyre::{bail, WrapErr};
use nom::AsBytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::instrument;

use crate::encoding::resp2::{self, Command, Reply};

/// A single RESP2 client connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    #[instrument(err)]
    pub async fn open(addr: &str) -> eyre::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .wrap_err_with(|| format!("Connection to {addr}"))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            buffer: BytesMut::new(),
        })
    }

    /// Sends a command and waits for its reply.
    #[instrument(skip(self, command), fields(command = command.name()), err)]
    pub async fn request(&mut self, command: &Command) -> eyre::Result<Reply> {
        let buffer = resp2::to_bytes(command);
        tracing::trace!(?buffer, "Sending request");
        self.stream
            .write_all(buffer.as_bytes())
            .await
            .wrap_err("writing to socket")?;

        self.receive().await
    }

    async fn receive(&mut self) -> eyre::Result<Reply> {
        let Connection { stream, buffer } = self;
        loop {
            if let Some((reply, read)) = resp2::from_bytes(buffer.as_bytes())? {
                buffer.advance(read);
                tracing::trace!(?reply, "Received reply");
                return Ok(reply);
            }

            let read = stream
                .read_buf(buffer)
                .await
                .wrap_err("failed while trying to receive the rest of reply")?;

            if read == 0 {
                bail!("EOF too early");
            }
        }
    }
}
