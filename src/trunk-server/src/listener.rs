// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-over-TCP ingest listener.
//!
//! Decoder front ends connect and stream newline-delimited requests that
//! open audio segments, append audio and identifiers, and report channel
//! grants and decoder state. Every request gets one response line.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use trunk_core::audio::{
    AudioSegment, AudioSegmentFactory, AudioSegmentReceiver, SegmentLease,
};
use trunk_core::channel::{CallEvent, DecoderStateEvent, TrafficChannelManager};
use trunk_core::identifier::{Identifier, IdentifierUpdateNotification, Operation};
use trunk_core::DynResult;

use crate::audio_manager::AudioManager;
use crate::traffic::TunerChannelModel;

/// Recently ended segments kept per session as link targets.
const RECENT_SEGMENTS: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestRequest {
    SegmentStart {
        segment: String,
        #[serde(default)]
        timeslot: u8,
        #[serde(default)]
        identifiers: Vec<Identifier>,
    },
    Audio {
        segment: String,
        samples: Vec<f32>,
    },
    Identifier {
        segment: String,
        identifier: Identifier,
    },
    IdentifierUpdate {
        segment: String,
        identifier: Identifier,
        operation: Operation,
        #[serde(default)]
        timeslot: u8,
    },
    Link {
        segment: String,
        previous: String,
    },
    SegmentEnd {
        segment: String,
    },
    TrafficAllocation {
        event: CallEvent,
    },
    ChannelEvent {
        channel: String,
        #[serde(flatten)]
        event: DecoderStateEvent,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_event: Option<CallEvent>,
}

impl IngestResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Shared services an ingest session feeds.
pub struct IngestContext {
    pub audio: Arc<AudioManager>,
    pub factory: Arc<AudioSegmentFactory>,
    pub traffic: Arc<TrafficChannelManager>,
    pub channels: Arc<TunerChannelModel>,
}

/// Per-connection segment bookkeeping.
///
/// The session holds a producer lease on every open segment and gives it
/// up when the segment ends.
pub struct IngestSession {
    ctx: Arc<IngestContext>,
    open: HashMap<String, SegmentLease>,
    recent: VecDeque<(String, Arc<AudioSegment>)>,
}

impl IngestSession {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self {
            ctx,
            open: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn handle(&mut self, request: IngestRequest) -> IngestResponse {
        match request {
            IngestRequest::SegmentStart {
                segment,
                timeslot,
                identifiers,
            } => self.start_segment(segment, timeslot, identifiers),
            IngestRequest::Audio { segment, samples } => {
                let Some(lease) = self.open.get(&segment) else {
                    return unknown_segment(&segment);
                };
                match lease.add_audio(samples) {
                    Ok(()) => IngestResponse::ok(),
                    Err(e) => IngestResponse::error(e.to_string()),
                }
            }
            IngestRequest::Identifier {
                segment,
                identifier,
            } => {
                let Some(lease) = self.open.get(&segment) else {
                    return unknown_segment(&segment);
                };
                lease.add_identifier(identifier);
                IngestResponse::ok()
            }
            IngestRequest::IdentifierUpdate {
                segment,
                identifier,
                operation,
                timeslot,
            } => {
                let Some(lease) = self.open.get(&segment) else {
                    return unknown_segment(&segment);
                };
                let notification = IdentifierUpdateNotification::new(identifier, operation, timeslot);
                lease.receive_identifier_update(&notification);
                IngestResponse::ok()
            }
            IngestRequest::Link { segment, previous } => {
                let Some(lease) = self.open.get(&segment) else {
                    return unknown_segment(&segment);
                };
                let Some(previous) = self.find_segment(&previous) else {
                    return unknown_segment(&previous);
                };
                lease.link_to(previous);
                IngestResponse::ok()
            }
            IngestRequest::SegmentEnd { segment } => self.end_segment(&segment),
            IngestRequest::TrafficAllocation { event } => IngestResponse {
                call_event: self.ctx.traffic.process_channel_grant(event),
                ..IngestResponse::ok()
            },
            IngestRequest::ChannelEvent { channel, event } => {
                match self.ctx.channels.channel_state(&channel) {
                    Some(state) => {
                        state.receive_decoder_state_event(&event);
                        IngestResponse::ok()
                    }
                    None => IngestResponse::error(format!("Unknown channel: {}", channel)),
                }
            }
        }
    }

    /// Complete and release every open segment.
    pub fn close(&mut self) {
        if !self.open.is_empty() {
            info!("Completing {} open segment(s)", self.open.len());
        }
        for (_, lease) in self.open.drain() {
            lease.set_complete();
        }
        self.recent.clear();
    }

    fn start_segment(
        &mut self,
        key: String,
        timeslot: u8,
        identifiers: Vec<Identifier>,
    ) -> IngestResponse {
        if self.open.contains_key(&key) {
            return IngestResponse::error(format!("Segment already open: {}", key));
        }
        let segment = self.ctx.factory.create(timeslot);
        for identifier in identifiers {
            segment.add_identifier(identifier);
        }
        let id = segment.id();
        let lease = SegmentLease::acquire(&segment);
        self.ctx.audio.receive(SegmentLease::acquire(&segment));
        debug!("Segment {} opened as {}", key, id);
        self.open.insert(key, lease);
        IngestResponse {
            segment_id: Some(id),
            ..IngestResponse::ok()
        }
    }

    fn end_segment(&mut self, key: &str) -> IngestResponse {
        let Some(lease) = self.open.remove(key) else {
            return unknown_segment(key);
        };
        lease.set_complete();
        let id = lease.id();
        if self.recent.len() >= RECENT_SEGMENTS {
            self.recent.pop_front();
        }
        self.recent
            .push_back((key.to_string(), Arc::clone(lease.segment())));
        IngestResponse {
            segment_id: Some(id),
            ..IngestResponse::ok()
        }
    }

    fn find_segment(&self, key: &str) -> Option<Arc<AudioSegment>> {
        if let Some(lease) = self.open.get(key) {
            return Some(Arc::clone(lease.segment()));
        }
        self.recent
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, segment)| Arc::clone(segment))
    }
}

impl Drop for IngestSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn unknown_segment(key: &str) -> IngestResponse {
    IngestResponse::error(format!("Unknown segment: {}", key))
}

/// Run the ingest listener until shutdown is signalled.
pub async fn run_listener(
    addr: SocketAddr,
    ctx: Arc<IngestContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                info!("Client connected: {}", peer);
                let ctx = Arc::clone(&ctx);
                let client_shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(socket, peer, ctx, client_shutdown_rx).await {
                        error!("Client {} error: {:?}", peer, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_client(
    socket: TcpStream,
    addr: SocketAddr,
    ctx: Arc<IngestContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> DynResult<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut session = IngestSession::new(ctx);

    loop {
        line.clear();
        let bytes_read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Closing client {} for shutdown", addr);
                    break;
                }
                continue;
            }
        };
        if bytes_read == 0 {
            info!("Client {} disconnected", addr);
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<IngestRequest>(trimmed) {
            Ok(request) => session.handle(request),
            Err(e) => {
                error!("Invalid JSON from {}: {} / {:?}", addr, trimmed, e);
                IngestResponse::error(format!("Invalid JSON: {}", e))
            }
        };
        let resp_line = serde_json::to_string(&resp)? + "\n";
        writer.write_all(resp_line.as_bytes()).await?;
        writer.flush().await?;
    }

    session.close();
    Ok(())
}
