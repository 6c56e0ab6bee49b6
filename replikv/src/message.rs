use std::{io, net::SocketAddr};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Wire envelope exchanged between clients, servers, and replicas.
///
/// Every TCP connection carries exactly one request line and, where the
/// protocol calls for it, one response line. Asynchronous read completions
/// arrive as a lone `GetOk` on a fresh connection to the client's callback
/// listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Put {
        key: String,
        value: String,
    },
    PutOk {
        key: String,
        value: String,
        timestamp: u64,
    },
    PutFail,
    Get {
        key: String,
        /// Last timestamp the client observed for this key; 0 if never seen.
        timestamp: u64,
        #[serde(rename = "clientIp")]
        client_ip: String,
        #[serde(rename = "clientPort")]
        client_port: u16,
    },
    GetOk {
        key: String,
        value: String,
        timestamp: u64,
    },
    WaitForResponse {
        key: String,
        timestamp: u64,
    },
    Replication {
        key: String,
        value: String,
        timestamp: u64,
    },
    ReplicationOk {
        key: String,
        timestamp: u64,
    },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // Line-oriented framing keeps the wire inspectable with netcat-style tools.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Opens a connection, sends one request, and reads one response.
///
/// `Ok(None)` means the peer closed the connection without answering, which
/// the protocol uses to withhold confirmation of a failed write.
pub async fn request(addr: SocketAddr, message: &Message) -> io::Result<Option<Message>> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    write_message(&mut writer, message).await?;
    read_message(&mut reader).await
}

/// Delivers a one-way message over a fresh connection, expecting no reply.
///
/// All asynchronous result delivery funnels through here so a retry policy
/// would have a single place to live.
pub async fn push(addr: SocketAddr, message: &Message) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    write_message(&mut stream, message).await?;
    stream.shutdown().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_protocol_schema() {
        let message = Message::Get {
            key: "a".into(),
            timestamp: 3,
            client_ip: "127.0.0.1".into(),
            client_port: 20000,
        };
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["type"], "GET");
        assert_eq!(json["key"], "a");
        assert_eq!(json["timestamp"], 3);
        assert_eq!(json["clientIp"], "127.0.0.1");
        assert_eq!(json["clientPort"], 20000);

        let ok = Message::WaitForResponse {
            key: "a".into(),
            timestamp: 0,
        };
        let json = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(json["type"], "WAIT_FOR_RESPONSE");

        let fail = serde_json::to_value(&Message::PutFail).expect("serialize");
        assert_eq!(fail["type"], "PUT_FAIL");
    }

    #[tokio::test]
    async fn roundtrip_replication_ack() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);
        let message = Message::ReplicationOk {
            key: "k".into(),
            timestamp: 42,
        };

        write_message(&mut writer, &message)
            .await
            .expect("write message");
        let parsed = read_message::<_, Message>(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"\r\n\n").await.expect("write padding");
        write_message(&mut writer, &Message::PutFail)
            .await
            .expect("write message");
        drop(writer);

        let parsed = read_message::<_, Message>(&mut reader)
            .await
            .expect("read message");
        assert_eq!(parsed, Some(Message::PutFail));

        let eof = read_message::<_, Message>(&mut reader)
            .await
            .expect("read at eof");
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_data() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer
            .write_all(b"{\"type\":\"NOT_A_TYPE\"}\n")
            .await
            .expect("write garbage");

        let err = read_message::<_, Message>(&mut reader)
            .await
            .expect_err("undecodable payload should error");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
