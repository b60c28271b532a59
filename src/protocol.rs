//! Messages exchanged with subscribers.
//!
//! Every server frame travels as two parts, `[kind, payload]`: kind `0x01` carries a JSON
//! `ServerMessage`, kind `0x02` carries exactly one PCM chunk. Clients send single-part JSON.

use std::convert::TryFrom;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::Backend;
use crate::control::ControlState;
use crate::error::ProtocolError;
use crate::lens::{LensEntry, ParamSpec};
use crate::sampling::PcmChunk;


#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    Json = 0x01,
    Pcm = 0x02,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello,
    SwitchLens { lens: String },
    SetParam { name: String, value: f64 },
    Pause,
    #[serde(alias = "play")]
    Resume,
    ToggleLive { enabled: bool },
    Bye,
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    pub label: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
    pub effects: Vec<String>,
}


impl From<&ParamSpec> for ParamInfo {
    fn from(spec: &ParamSpec) -> Self {
        ParamInfo {
            name: spec.name.to_string(),
            label: spec.label.to_string(),
            min: spec.min,
            max: spec.max,
            step: spec.step,
            default: spec.default,
            effects: spec.effects.iter().map(|e| e.to_string()).collect(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensInfo {
    pub name: String,
    pub description: String,
    pub tick_hz: f64,
    pub parameters: Vec<ParamInfo>,
}


impl From<&LensEntry> for LensInfo {
    fn from(entry: &LensEntry) -> Self {
        LensInfo {
            name: entry.name.to_string(),
            description: entry.description.to_string(),
            tick_hz: entry.tick_hz,
            parameters: entry.parameters.iter().map(ParamInfo::from).collect(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init {
        lens: String,
        lenses: Vec<LensInfo>,
        backend: Backend,
        is_fallback: bool,
        paused: bool,
    },
    State {
        viz: Value,
        controls: ControlState,
        lens: String,
        backend: Backend,
        is_fallback: bool,
    },
    Paused { paused: bool },
    Rejected { reason: String },
    LensSwitched { lens: String },
}


/// An encoded server frame, ready to be sent to any number of subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}


impl WireFrame {
    pub fn message(message: &ServerMessage) -> Result<Self, ProtocolError> {
        Ok(WireFrame {
            kind: FrameKind::Json,
            payload: serde_json::to_vec(message)?,
        })
    }

    pub fn audio(chunk: &PcmChunk) -> Self {
        WireFrame {
            kind: FrameKind::Pcm,
            payload: chunk.as_bytes().to_vec(),
        }
    }

    pub fn kind_byte(&self) -> [u8; 1] {
        [self.kind.into()]
    }
}


/// A decoded server frame, as seen by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Message(ServerMessage),
    Audio(PcmChunk),
}


pub fn decode_server(parts: &[Vec<u8>]) -> Result<ServerFrame, ProtocolError> {
    let (kind, payload) = match parts {
        [kind, payload, ..] if !kind.is_empty() => (kind[0], payload),
        _ => return Err(ProtocolError::Empty),
    };
    match FrameKind::try_from(kind).map_err(|_| ProtocolError::UnknownKind(kind))? {
        FrameKind::Json => Ok(ServerFrame::Message(serde_json::from_slice(payload)?)),
        FrameKind::Pcm => Ok(ServerFrame::Audio(PcmChunk::try_from(payload.as_slice())?)),
    }
}


pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}


pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}
