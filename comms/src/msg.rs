use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::{DeltaEntry, NetworkInfo, StartSpec},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

type WorkerIdType = u32;
const WORKER_ID_SIZE: usize = size_of::<WorkerIdType>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const SUBMIT_UPDATE_H: Header = 2;
const PUSH_UPDATE_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A worker's local weight delta, sent to the coordinator.
    SubmitUpdate {
        worker_id: u32,
        delta: &'a [DeltaEntry],
    },
    /// The coordinator's aggregated delta, sent to every worker.
    PushUpdate(&'a [DeltaEntry]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    RegisterNode(NetworkInfo),
    StartSgd(StartSpec),
    SubmitReadyToGo { worker_id: usize },
    SubmitEpochDone { worker_id: usize },
    PushReadyToGo,
    PushStop,
    Ack,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short, stable name for the kind of this message, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Err(_) => "err",
            Msg::Control(Command::RegisterNode(_)) => "control/register_node",
            Msg::Control(Command::StartSgd(_)) => "control/start_sgd",
            Msg::Control(Command::SubmitReadyToGo { .. }) => "control/submit_ready_to_go",
            Msg::Control(Command::SubmitEpochDone { .. }) => "control/submit_epoch_done",
            Msg::Control(Command::PushReadyToGo) => "control/push_ready_to_go",
            Msg::Control(Command::PushStop) => "control/push_stop",
            Msg::Control(Command::Ack) => "control/ack",
            Msg::Data(Payload::SubmitUpdate { .. }) => "data/submit_update",
            Msg::Data(Payload::PushUpdate(_)) => "data/push_update",
        }
    }

    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }

    fn cast_entries(buf: &[u8]) -> io::Result<&[DeltaEntry]> {
        bytemuck::try_cast_slice(buf).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Malformed delta entries of {} bytes: {err}", buf.len()),
            )
        })
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::SubmitUpdate { worker_id, delta }) => {
                buf.extend_from_slice(&SUBMIT_UPDATE_H.to_be_bytes());
                buf.extend_from_slice(&worker_id.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(*delta)))
            }
            Msg::Data(Payload::PushUpdate(delta)) => {
                buf.extend_from_slice(&PUSH_UPDATE_H.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(*delta)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        };

        match Header::from_be_bytes(*kind_buf) {
            ERR_H => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                // A truncated document must not read as a closed stream.
                let cmd = serde_json::from_slice(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                Ok(Self::Control(cmd))
            }
            SUBMIT_UPDATE_H => {
                let Some((id_buf, entries)) = rest.split_first_chunk::<WORKER_ID_SIZE>() else {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + WORKER_ID_SIZE);
                };

                let payload = Payload::SubmitUpdate {
                    worker_id: WorkerIdType::from_be_bytes(*id_buf),
                    delta: Self::cast_entries(entries)?,
                };

                Ok(Self::Data(payload))
            }
            PUSH_UPDATE_H => {
                let payload = Payload::PushUpdate(Self::cast_entries(rest)?);
                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
