//! Connection engine for the framed command channel.
//!
//! One writer task owns the socket's write half and drains a FIFO queue of
//! send entries, so the wire never interleaves two sends: for messages A
//! enqueued before B, all of A's bytes precede any of B's. The read half
//! stays with the [`Connection`] and is driven in one of two modes chosen
//! per call: message receive or file receive. The two modes are never mixed
//! by the engine; the caller picks one per exchange step.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::lz4_stream::{StreamCompressor, StreamDecompressor};
use crate::protocol::{
    self, command, FrameHeader, TransHeader, BLOCK_SIZE, HEADER_SIZE, TRANS_HEADER_SIZE,
};

/// Resolves to `true` once the entry's bytes are fully written, `false` on
/// a write failure (or if the connection is torn down first).
pub type SendDone = oneshot::Receiver<bool>;

enum SendEntry {
    Message {
        header: FrameHeader,
        body: Vec<u8>,
        done: oneshot::Sender<bool>,
    },
    File {
        header: FrameHeader,
        file: File,
        done: oneshot::Sender<bool>,
    },
}

/// Thread-safe enqueue handle onto a connection's send queue. Clones share
/// the queue; enqueue order is wire order.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::UnboundedSender<SendEntry>,
}

impl Sender {
    /// Queues a command message. Returns immediately; await the [`SendDone`]
    /// for the write outcome.
    pub fn send<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> Result<SendDone> {
        let body = protocol::encode_body(args)?;
        let header = FrameHeader::new(cmd, body.len() as u64, args.len() as u64)?;
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SendEntry::Message {
                header,
                body,
                done: done_tx,
            })
            .map_err(|_| anyhow::anyhow!("connection writer is gone"))?;
        Ok(done_rx)
    }

    /// Queues a whole-file transfer under the `filecopy` command. The file
    /// is opened here so a missing path fails at enqueue time; the blocks
    /// are read, compressed, and written by the writer task.
    pub async fn send_file(&self, path: &Path) -> Result<SendDone> {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let len = file.metadata().await?.len();
        let header = FrameHeader::new(command::FILECOPY, len, 1)?;
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SendEntry::File {
                header,
                file,
                done: done_tx,
            })
            .map_err(|_| anyhow::anyhow!("connection writer is gone"))?;
        Ok(done_rx)
    }
}

/// One decoded command frame. Read failures surface as the synthetic
/// `"error"` command with no arguments.
#[derive(Debug)]
pub struct Message {
    pub command: String,
    pub args: Vec<String>,
}

impl Message {
    pub fn is_error(&self) -> bool {
        self.command == command::ERROR
    }
}

pub struct Connection {
    reader: OwnedReadHalf,
    sender: Sender,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(send_loop(writer, rx));
        Self {
            reader,
            sender: Sender { tx },
        }
    }

    /// Clonable handle for enqueuing sends from anywhere.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    pub fn send<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> Result<SendDone> {
        self.sender.send(cmd, args)
    }

    pub async fn send_file(&self, path: &Path) -> Result<SendDone> {
        self.sender.send_file(path).await
    }

    /// Message-mode receive: one header, one body, decoded string list.
    /// Never fails; a broken read comes back as the `"error"` command.
    pub async fn recv_message(&mut self) -> Message {
        match self.read_message().await {
            Ok(msg) => msg,
            Err(err) => {
                if !is_clean_eof(&err) {
                    eprintln!("receive failed: {err:#}");
                }
                Message {
                    command: command::ERROR.to_string(),
                    args: Vec::new(),
                }
            }
        }
    }

    async fn read_message(&mut self) -> Result<Message> {
        let mut hbuf = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut hbuf).await?;
        let header = FrameHeader::decode(&hbuf)?;
        protocol::validate_payload_size(header.length)?;
        let mut body = vec![0u8; header.length as usize];
        self.reader.read_exact(&mut body).await?;
        let args = protocol::decode_body(&body, header.count)?;
        Ok(Message {
            command: header.command,
            args,
        })
    }

    /// File-mode receive into `dest`: consumes the opening `filecopy` frame,
    /// then the block sequence until the EOF flag, decompressing through a
    /// per-transfer decoder.
    pub async fn recv_file(&mut self, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_file(dest)?;
        } else if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;

        // Opening command frame; acknowledged but not interpreted.
        let mut hbuf = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut hbuf).await?;

        let mut decoder = StreamDecompressor::new();
        let mut thbuf = [0u8; TRANS_HEADER_SIZE];
        loop {
            self.reader.read_exact(&mut thbuf).await?;
            let th = TransHeader::decode(&thbuf);
            let mut comp = vec![0u8; th.comp_size as usize];
            if !comp.is_empty() {
                self.reader.read_exact(&mut comp).await?;
            }
            let block = decoder
                .decompress_block(&comp, th.size as usize)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if block.len() as u64 != th.size {
                bail!(
                    "block decompressed to {} bytes, header said {}",
                    block.len(),
                    th.size
                );
            }
            out.write_all(&block).await?;
            if th.eof {
                break;
            }
        }
        out.flush().await?;
        Ok(())
    }
}

fn is_clean_eof(err: &anyhow::Error) -> bool {
    err.downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
}

async fn send_loop(mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<SendEntry>) {
    while let Some(entry) = queue.recv().await {
        match entry {
            SendEntry::Message { header, body, done } => {
                let result = write_message(&mut writer, &header, &body).await;
                if let Err(ref err) = result {
                    eprintln!("send failed [{}]: {err}", header.command);
                }
                let _ = done.send(result.is_ok());
            }
            SendEntry::File { header, file, done } => {
                let result = write_file(&mut writer, &header, file).await;
                if let Err(ref err) = result {
                    eprintln!("send failed [{}]: {err}", header.command);
                }
                let _ = done.send(result.is_ok());
            }
        }
    }
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    header: &FrameHeader,
    body: &[u8],
) -> io::Result<()> {
    writer.write_all(&header.encode()).await?;
    writer.write_all(body).await?;
    Ok(())
}

async fn write_file(
    writer: &mut OwnedWriteHalf,
    header: &FrameHeader,
    mut file: File,
) -> io::Result<()> {
    writer.write_all(&header.encode()).await?;

    let mut encoder = StreamCompressor::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let mut filled = 0;
        let mut eof = false;
        while filled < BLOCK_SIZE {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                eof = true;
                break;
            }
            filled += n;
        }
        let comp = encoder.compress_block(&buf[..filled]);
        let th = TransHeader {
            size: filled as u64,
            comp_size: comp.len() as u64,
            eof,
        };
        // Header and payload go out as one contiguous write.
        let mut frame = Vec::with_capacity(TRANS_HEADER_SIZE + comp.len());
        frame.extend_from_slice(&th.encode());
        frame.extend_from_slice(&comp);
        writer.write_all(&frame).await?;
        if eof {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (Connection::new(client), Connection::new(server))
    }

    #[tokio::test]
    async fn message_roundtrip() {
        let (a, mut b) = pair().await;
        let done = a.send("request", &["filelist", "--"]).unwrap();
        assert!(done.await.unwrap());
        let msg = b.recv_message().await;
        assert_eq!(msg.command, "request");
        assert_eq!(msg.args, vec!["filelist", "--"]);
    }

    #[tokio::test]
    async fn empty_argument_list() {
        let (a, mut b) = pair().await;
        let args: [&str; 0] = [];
        a.send("finish", &args).unwrap();
        let msg = b.recv_message().await;
        assert_eq!(msg.command, "finish");
        assert!(msg.args.is_empty());
    }

    #[tokio::test]
    async fn closed_peer_surfaces_error_command() {
        let (a, mut b) = pair().await;
        drop(a);
        let msg = b.recv_message().await;
        assert!(msg.is_error());
        assert!(msg.args.is_empty());
    }

    #[tokio::test]
    async fn sends_are_serialized_in_enqueue_order() {
        let (a, mut b) = pair().await;
        let sender = a.sender();
        let mut dones = Vec::new();
        for name in ["alpha", "bravo", "charlie"] {
            dones.push(sender.send(name, &[name]).unwrap());
        }
        for done in dones {
            assert!(done.await.unwrap());
        }
        for name in ["alpha", "bravo", "charlie"] {
            let msg = b.recv_message().await;
            assert_eq!(msg.command, name);
            assert_eq!(msg.args, vec![name]);
        }
    }

    #[tokio::test]
    async fn file_transfer_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src.bin");
        let dest = dir.path().join("out/dest.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &payload).unwrap();

        let (a, mut b) = pair().await;
        let done = a.send_file(&src).await.unwrap();
        b.recv_file(&dest).await.unwrap();
        assert!(done.await.unwrap());
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
    }

    #[tokio::test]
    async fn send_file_rejects_missing_path() {
        let (a, _b) = pair().await;
        let err = a.send_file(Path::new("/no/such/file")).await;
        assert!(err.is_err());
    }
}
