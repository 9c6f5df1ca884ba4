//! Fixed little-endian encodings gossiped between nodes.
//!
//! Identity: `node_id: i32` followed by the management, client, replication and subscription
//! addresses, each `host_len: i32, host bytes, port: i32`.
//!
//! Partition list: `count: i32` followed by `count` times
//! `partition_id: i32, replication_factor: i32, is_leader: u8`.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

/// Longest host accepted by the identity encoding.
pub const MAX_HOST_LENGTH: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("buffer ended before {field} could be read")]
    Truncated { field: &'static str },
    #[error("negative length {length} for {field}")]
    NegativeLength { field: &'static str, length: i32 },
    #[error("host of {0} bytes exceeds the maximum of 255")]
    HostTooLong(usize),
    #[error("{0} unexpected bytes after the last field")]
    TrailingBytes(usize),
    #[error("host is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketAddress {
    pub host: String,
    pub port: i32,
}

impl SocketAddress {
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Contact information of a node, published when it joins the gossip cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: i32,
    pub management_api: SocketAddress,
    pub client_api: SocketAddress,
    pub replication_api: SocketAddress,
    pub subscription_api: SocketAddress,
}

impl NodeInfo {
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut bytes = vec![];
        bytes.write_i32::<LittleEndian>(self.node_id)?;
        for address in self.addresses() {
            write_address(&mut bytes, address)?;
        }
        Ok(Bytes::from(bytes))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(buf);
        let node_id = read_i32(&mut cursor, "node id")?;
        let info = NodeInfo {
            node_id,
            management_api: read_address(&mut cursor)?,
            client_api: read_address(&mut cursor)?,
            replication_api: read_address(&mut cursor)?,
            subscription_api: read_address(&mut cursor)?,
        };
        expect_end(&cursor)?;
        Ok(info)
    }

    fn addresses(&self) -> [&SocketAddress; 4] {
        [
            &self.management_api,
            &self.client_api,
            &self.replication_api,
            &self.subscription_api,
        ]
    }
}

/// One entry of an advertised partition list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub partition_id: i32,
    pub replication_factor: i32,
    pub is_leader: bool,
}

pub fn encode_partitions(partitions: &[PartitionInfo]) -> Result<Bytes, CodecError> {
    let mut bytes = Vec::with_capacity(4 + partitions.len() * 9);
    bytes.write_i32::<LittleEndian>(partitions.len() as i32)?;
    for partition in partitions {
        bytes.write_i32::<LittleEndian>(partition.partition_id)?;
        bytes.write_i32::<LittleEndian>(partition.replication_factor)?;
        bytes.write_u8(partition.is_leader as u8)?;
    }
    Ok(Bytes::from(bytes))
}

pub fn decode_partitions(buf: &[u8]) -> Result<Vec<PartitionInfo>, CodecError> {
    let mut cursor = Cursor::new(buf);
    let count = read_i32(&mut cursor, "partition count")?;
    if count < 0 {
        return Err(CodecError::NegativeLength {
            field: "partition count",
            length: count,
        });
    }

    // never trust the count for the allocation, each entry takes 9 bytes
    let mut partitions = Vec::with_capacity((count as usize).min(buf.len() / 9));
    for _ in 0..count {
        partitions.push(PartitionInfo {
            partition_id: read_i32(&mut cursor, "partition id")?,
            replication_factor: read_i32(&mut cursor, "replication factor")?,
            is_leader: cursor
                .read_u8()
                .map_err(|_| CodecError::Truncated { field: "leader flag" })?
                != 0,
        });
    }
    expect_end(&cursor)?;
    Ok(partitions)
}

fn expect_end(cursor: &Cursor<&[u8]>) -> Result<(), CodecError> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if remaining > 0 {
        return Err(CodecError::TrailingBytes(remaining));
    }
    Ok(())
}

fn write_address(bytes: &mut Vec<u8>, address: &SocketAddress) -> Result<(), CodecError> {
    let host = address.host.as_bytes();
    if host.len() > MAX_HOST_LENGTH {
        return Err(CodecError::HostTooLong(host.len()));
    }
    bytes.write_i32::<LittleEndian>(host.len() as i32)?;
    bytes.extend_from_slice(host);
    bytes.write_i32::<LittleEndian>(address.port)?;
    Ok(())
}

fn read_address(cursor: &mut Cursor<&[u8]>) -> Result<SocketAddress, CodecError> {
    let length = read_i32(cursor, "host length")?;
    if length < 0 {
        return Err(CodecError::NegativeLength {
            field: "host length",
            length,
        });
    }
    let length = length as usize;
    if length > MAX_HOST_LENGTH {
        return Err(CodecError::HostTooLong(length));
    }

    let mut host = vec![0; length];
    cursor
        .read_exact(&mut host)
        .map_err(|_| CodecError::Truncated { field: "host" })?;
    let host = String::from_utf8(host)?;
    let port = read_i32(cursor, "port")?;
    Ok(SocketAddress { host, port })
}

fn read_i32(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<i32, CodecError> {
    cursor
        .read_i32::<LittleEndian>()
        .map_err(|_| CodecError::Truncated { field })
}
