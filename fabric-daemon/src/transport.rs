//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fabric_kvstore::rpc::{PeerRpc, RpcError, SyncResponse};
use fabric_kvstore::tasks::messages::input::{
    FullSyncRequestMsg, PeerPublicationMsg, ProtocolMsg,
};
use fabric_utils::UnboundedSender;
use fabric_utils::kv::{PeerSpec, Publication, Value};
use fabric_utils::task::Task;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

// Message types on the peer session.
const MSG_FLOOD: u8 = 1;
const MSG_SYNC_REQ: u8 = 2;
const MSG_SYNC_RESP: u8 = 3;

// Frames larger than this are assumed corrupt.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// KV-Store peer transport: length-framed publications over TCP. Every
// message body uses the store's canonical binary encoding, so any two nodes
// running the protocol interoperate byte-exactly.
pub struct TcpPeerRpc {
    node_id: String,
    timeout: Duration,
}

// ===== impl TcpPeerRpc =====

impl TcpPeerRpc {
    pub fn new(node_id: String, timeout: Duration) -> TcpPeerRpc {
        TcpPeerRpc { node_id, timeout }
    }
}

#[async_trait]
impl PeerRpc for TcpPeerRpc {
    async fn full_sync(
        &self,
        peer: &PeerSpec,
        area: &str,
        local_hashes: BTreeMap<String, Value>,
    ) -> Result<SyncResponse, RpcError> {
        // The request rides the publication encoding: hash-only values plus
        // the requester's node id.
        let request = Publication {
            area: area.to_owned(),
            key_vals: local_hashes,
            expired_keys: vec![],
            node_ids: Some(vec![self.node_id.clone()]),
            flood_root_id: None,
        };

        let exchange = async {
            let mut stream = TcpStream::connect(peer.addr).await?;
            write_frame(&mut stream, MSG_SYNC_REQ, &request).await?;
            let (msg_type, response) = read_frame(&mut stream).await?;
            if msg_type != MSG_SYNC_RESP {
                return Err(std::io::Error::other("unexpected message type"));
            }
            Ok(response)
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(response)) => Ok(SyncResponse {
                key_vals: response.key_vals,
            }),
            Ok(Err(error)) => Err(RpcError::Unreachable(error.to_string())),
            Err(_) => Err(RpcError::Timeout),
        }
    }

    async fn flood(
        &self,
        peer: &PeerSpec,
        publication: Publication,
    ) -> Result<(), RpcError> {
        let send = async {
            let mut stream = TcpStream::connect(peer.addr).await?;
            write_frame(&mut stream, MSG_FLOOD, &publication).await?;
            stream.shutdown().await
        };
        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(RpcError::Unreachable(error.to_string())),
            Err(_) => Err(RpcError::Timeout),
        }
    }
}

// ===== global functions =====

// Serves incoming peer sessions, feeding them into the KV-Store loop. The
// listener handles raw peer input, so it runs supervised and survives a
// panic in the accept path.
pub(crate) fn kv_server(
    listen_addr: SocketAddr,
    kv_ingress: UnboundedSender<ProtocolMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let kv_ingress = kv_ingress.clone();
        async move {
            listen_loop(listen_addr, kv_ingress).await;
        }
    })
}

// ===== helper functions =====

async fn listen_loop(
    listen_addr: SocketAddr,
    kv_ingress: UnboundedSender<ProtocolMsg>,
) {
    let listener = match TcpListener::bind(listen_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            warn!(%listen_addr, %error, "failed to bind peer listener");
            return;
        }
    };
    debug!(%listen_addr, "peer listener ready");

    loop {
        let Ok((stream, remote)) = listener.accept().await else {
            continue;
        };
        let kv_ingress = kv_ingress.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_peer(stream, &kv_ingress).await {
                debug!(%remote, %error, "peer session error");
            }
        });
    }
}

async fn serve_peer(
    mut stream: TcpStream,
    kv_ingress: &UnboundedSender<ProtocolMsg>,
) -> std::io::Result<()> {
    loop {
        let (msg_type, publication) = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            // Orderly shutdown.
            Err(error)
                if error.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        // The sender is the last node the publication traversed.
        let peer = publication
            .node_ids
            .as_ref()
            .and_then(|ids| ids.last())
            .cloned()
            .unwrap_or_default();

        match msg_type {
            MSG_FLOOD => {
                let msg = PeerPublicationMsg { peer, publication };
                let _ = kv_ingress.send(ProtocolMsg::PeerPublication(msg));
            }
            MSG_SYNC_REQ => {
                let (responder, reply) = oneshot::channel();
                let msg = FullSyncRequestMsg {
                    area: publication.area.clone(),
                    peer,
                    remote_hashes: publication.key_vals,
                    responder,
                };
                let _ = kv_ingress.send(ProtocolMsg::FullSyncRequest(msg));
                let Ok(response) = reply.await else {
                    return Ok(());
                };
                let response = Publication {
                    area: publication.area,
                    key_vals: response.key_vals,
                    ..Default::default()
                };
                write_frame(&mut stream, MSG_SYNC_RESP, &response).await?;
            }
            _ => {
                return Err(std::io::Error::other("unknown message type"));
            }
        }
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    msg_type: u8,
    publication: &Publication,
) -> std::io::Result<()> {
    let mut payload = BytesMut::new();
    publication.encode(&mut payload);

    stream.write_u8(msg_type).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}

async fn read_frame(
    stream: &mut TcpStream,
) -> std::io::Result<(u8, Publication)> {
    let msg_type = stream.read_u8().await?;
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::other("frame too large"));
    }
    let mut payload = vec![0; len as usize];
    stream.read_exact(&mut payload).await?;

    let mut payload = Bytes::from(payload);
    let publication = Publication::decode(&mut payload)
        .map_err(|error| std::io::Error::other(error.to_string()))?;
    Ok((msg_type, publication))
}
