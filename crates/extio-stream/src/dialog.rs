//! Request/response correlation over one packet channel.
//!
//! A spawned driver task owns the channel write half, the map of in-flight
//! dialogs, and the dialog-id allocator; a companion read task forwards
//! decoded envelopes so neither direction ever blocks the other. Everything
//! else talks to the driver through a cloneable [`DialogHandle`].
//!
//! Inbound routing: an envelope with `dialog_id == 0` or marked Request goes
//! to the session's inbound queue; a Response completes the matching
//! in-flight dialog. Either way, traffic nobody is waiting for is logged as
//! unhandled and dropped.
//!
//! When the channel fails, every in-flight dialog is completed with
//! `ConnectionClosed` and the driver exits with the channel error; plain
//! teardown (dropping the handles) completes nothing; the owning session
//! drives shutdown, not the driver.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use extio_wire::{
    decode_envelope, encode_envelope, message_name, ErrorCode, Message, MsgKind, PackagedMessage,
    PacketType,
};

use crate::channel::{PacketChannel, PacketWriter};
use crate::error::{ChannelError, DialogError};

/// A response envelope delivered back to a request's sender.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogReply {
    pub msg: Message,
    pub resultcode: Option<ErrorCode>,
}

/// An inbound request or unsolicited message, delivered to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub dialog_id: i64,
    pub msg: Message,
    pub resultcode: Option<ErrorCode>,
}

enum DialogCmd {
    Request {
        msg: Message,
        reply: oneshot::Sender<Result<DialogReply, DialogError>>,
    },
    Respond {
        msg: Message,
        dialog_id: i64,
        resultcode: Option<ErrorCode>,
        done: oneshot::Sender<Result<(), DialogError>>,
    },
}

/// Handle for sending over a running dialog driver. Cheap to clone.
#[derive(Clone)]
pub struct DialogHandle {
    cmd_tx: mpsc::Sender<DialogCmd>,
}

impl DialogHandle {
    /// Send a Request envelope under a freshly allocated dialog id and wait
    /// for the matching Response. Completes with an error if the connection
    /// dies first; never completes twice.
    pub async fn send_request(&self, msg: Message) -> Result<DialogReply, DialogError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(DialogCmd::Request { msg, reply: tx })
            .await
            .map_err(|_| DialogError::DriverGone)?;
        rx.await.map_err(|_| DialogError::ConnectionClosed)?
    }

    /// Send a Response envelope under the requester's dialog id. Resolves
    /// once the packet is on the wire.
    pub async fn send_response(
        &self,
        msg: Message,
        dialog_id: i64,
        resultcode: Option<ErrorCode>,
    ) -> Result<(), DialogError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(DialogCmd::Respond {
                msg,
                dialog_id,
                resultcode,
                done: tx,
            })
            .await
            .map_err(|_| DialogError::DriverGone)?;
        rx.await.map_err(|_| DialogError::ConnectionClosed)?
    }

    /// Send an unsolicited message (dialog id 0), e.g. the IQ stream.
    pub async fn send_message(&self, msg: Message) -> Result<(), DialogError> {
        self.send_response(msg, 0, None).await
    }
}

/// Advance the dialog-id allocator. Id 0 is reserved for unsolicited
/// messages; the positive half counts up, the negative half counts down.
fn advance_dialog_id(current: i64) -> i64 {
    if current == 0 {
        1
    } else if current > 0 {
        current + 1
    } else {
        current - 1
    }
}

struct Driver<S: AsyncRead + AsyncWrite> {
    writer: PacketWriter<WriteHalf<S>>,
    cmd_rx: mpsc::Receiver<DialogCmd>,
    read_rx: mpsc::Receiver<Result<PackagedMessage, ChannelError>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pending: HashMap<i64, oneshot::Sender<Result<DialogReply, DialogError>>>,
    next_dialog_id: i64,
}

/// Spawn the driver and read task for a channel.
///
/// Returns the sending handle, the inbound queue (requests and unsolicited
/// messages), and the driver's join handle, whose completion is the
/// connection-death signal.
pub fn start<S>(
    channel: PacketChannel<S>,
) -> (
    DialogHandle,
    mpsc::Receiver<InboundMessage>,
    JoinHandle<Result<(), ChannelError>>,
)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = channel.split();
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (read_tx, read_rx) = mpsc::channel(32);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    let read_task = tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(Some(pkt)) => {
                    if pkt.kind != PacketType::Message {
                        trace!(id = pkt.id, "ignoring raw-data packet");
                        continue;
                    }
                    match decode_envelope(&pkt.payload) {
                        Ok(envelope) => {
                            if read_tx.send(Ok(envelope)).await.is_err() {
                                return;
                            }
                        }
                        // Unknown or malformed content must not kill the
                        // peer; report and keep reading.
                        Err(e) => warn!(id = pkt.id, %e, "unexpected message"),
                    }
                }
                Ok(None) => {
                    let _ = read_tx.send(Err(ChannelError::Closed)).await;
                    return;
                }
                Err(e) => {
                    let _ = read_tx.send(Err(e)).await;
                    return;
                }
            }
        }
    });

    let driver = Driver::<S> {
        writer,
        cmd_rx,
        read_rx,
        inbound_tx,
        pending: HashMap::new(),
        next_dialog_id: 0,
    };

    let driver_task = tokio::spawn(async move {
        let result = driver.run().await;
        read_task.abort();
        result
    });

    (DialogHandle { cmd_tx }, inbound_rx, driver_task)
}

impl<S: AsyncRead + AsyncWrite> Driver<S> {
    async fn run(mut self) -> Result<(), ChannelError> {
        let result = self.drive().await;
        self.fail_pending();
        if let Err(e) = &result {
            trace!(%e, "dialog driver stopped");
        }
        result
    }

    async fn drive(&mut self) -> Result<(), ChannelError> {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd).await?,
                    // Every handle dropped: the owner is tearing down.
                    None => return Ok(()),
                },
                envelope = self.read_rx.recv() => match envelope {
                    Some(Ok(envelope)) => self.dispatch(envelope).await,
                    Some(Err(e)) => return Err(e),
                    None => return Err(ChannelError::Closed),
                },
            }
        }
    }

    async fn handle_cmd(&mut self, cmd: DialogCmd) -> Result<(), ChannelError> {
        match cmd {
            DialogCmd::Request { msg, reply } => {
                self.next_dialog_id = advance_dialog_id(self.next_dialog_id);
                let did = self.next_dialog_id;
                let envelope = PackagedMessage {
                    dialog_id: did,
                    kind: MsgKind::Request,
                    resultcode: None,
                    msg,
                };
                let payload = match encode_envelope(&envelope) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = reply.send(Err(DialogError::Encode(e)));
                        return Ok(());
                    }
                };
                trace!(did, name = message_name(&envelope.msg), "sending request");
                match self.writer.send(PacketType::Message, &payload).await {
                    Ok(_) => {
                        // Registered only after the write succeeds, as the
                        // response cannot arrive earlier.
                        self.pending.insert(did, reply);
                        Ok(())
                    }
                    Err(e) => {
                        drop(reply);
                        Err(e)
                    }
                }
            }
            DialogCmd::Respond {
                msg,
                dialog_id,
                resultcode,
                done,
            } => {
                let envelope = PackagedMessage {
                    dialog_id,
                    kind: MsgKind::Response,
                    resultcode,
                    msg,
                };
                let payload = match encode_envelope(&envelope) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = done.send(Err(DialogError::Encode(e)));
                        return Ok(());
                    }
                };
                match self.writer.send(PacketType::Message, &payload).await {
                    Ok(_) => {
                        let _ = done.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        drop(done);
                        Err(e)
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, envelope: PackagedMessage) {
        let PackagedMessage {
            dialog_id,
            kind,
            resultcode,
            msg,
        } = envelope;

        if dialog_id == 0 || kind == MsgKind::Request {
            trace!(did = dialog_id, name = message_name(&msg), "request received");
            let inbound = InboundMessage {
                dialog_id,
                msg,
                resultcode,
            };
            if self.inbound_tx.send(inbound).await.is_err() {
                trace!(did = dialog_id, "unhandled request");
            }
        } else {
            match self.pending.remove(&dialog_id) {
                Some(tx) => {
                    let _ = tx.send(Ok(DialogReply { msg, resultcode }));
                }
                None => trace!(did = dialog_id, "unhandled response"),
            }
        }
    }

    fn fail_pending(&mut self) {
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(DialogError::ConnectionClosed));
        }
    }
}
