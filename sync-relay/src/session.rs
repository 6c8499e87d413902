//! Per-connection session management.
//!
//! Each connection gets a Session that reads request frames, answers each
//! one with a frame carrying the same request id, and forwards pushes for
//! the documents it listens to. Responses and pushes share one outbound
//! queue drained by a writer task.

use crate::error::{ProtocolError, StorageError};
use crate::protocol::{read_frame, write_frame};
use crate::server::{FrameSender, SyncRelay};
use sealed_sync_types::{
    Appended, DocId, DocRows, Frame, Listening, Message, Rejected, PUSH_REQUEST_ID,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// A per-connection session.
pub struct Session {
    relay: Arc<SyncRelay>,
    id: u64,
    peer: String,
    listening: HashSet<DocId>,
}

impl Session {
    /// Create a new session for a connection from `peer`.
    pub fn new(relay: Arc<SyncRelay>, peer: String) -> Self {
        let id = relay.open_session();
        Self {
            relay,
            id,
            peer,
            listening: HashSet::new(),
        }
    }

    /// Session id, used as the rate-limit key.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the session until the peer disconnects or sends garbage.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        tracing::info!(session = self.id, peer = %self.peer, "session started");

        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::debug!(error = %e, "write failed, closing writer");
                    break;
                }
            }
        });

        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!(session = self.id, "peer closed connection");
                    break;
                }
                Err(e) => {
                    self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(session = self.id, error = %e, "dropping session");
                    break;
                }
            };

            let response = self.handle(frame.request_id, frame.message, &outbound).await;
            if outbound.send(Frame::new(frame.request_id, response)).is_err() {
                break;
            }
        }

        // Cleanup
        self.relay.close_session(self.id);
        drop(outbound);
        let _ = writer_task.await;
        tracing::info!(
            session = self.id,
            documents = self.listening.len(),
            "session ended"
        );
    }

    /// Handle one request and build its response.
    async fn handle(&mut self, request_id: u64, message: Message, outbound: &FrameSender) -> Message {
        if request_id == PUSH_REQUEST_ID {
            return rejected(ProtocolError::InvalidFrame {
                reason: "request id 0 is reserved for pushes".to_string(),
            });
        }

        // Global limit first, then the per-session quota
        let limited = self
            .relay
            .rate_limits()
            .check_global()
            .and_then(|()| self.relay.rate_limits().check_session(self.id));
        if let Err(e) = limited {
            tracing::warn!(session = self.id, error = %e, "rate limited");
            self.relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return rejected(e);
        }

        tracing::trace!(session = self.id, request_id, kind = message.kind(), "request");

        match message {
            Message::StartListening(req) => {
                if self.relay.listen(&req.doc_id, self.id, outbound.clone()) {
                    self.listening.insert(req.doc_id.clone());
                    Message::Listening(Listening {
                        doc_id: req.doc_id,
                        active: true,
                    })
                } else {
                    tracing::warn!(session = self.id, doc = %req.doc_id, "listener limit reached");
                    rejected(format!("too many listeners on {}", req.doc_id))
                }
            }
            Message::StopListening(req) => {
                self.relay.stop_listening(&req.doc_id, self.id);
                self.listening.remove(&req.doc_id);
                Message::Listening(Listening {
                    doc_id: req.doc_id,
                    active: false,
                })
            }
            Message::AddUpdate(req) => match self.relay.append(&req.doc_id, req.operation).await {
                Ok(row_id) => Message::Appended(Appended { row_id }),
                Err(e) => self.storage_failure(e),
            },
            Message::ApplySnapshot(req) => {
                match self
                    .relay
                    .apply_snapshot(&req.doc_id, req.operation, req.last_row_id)
                    .await
                {
                    Ok(row_id) => Message::Appended(Appended { row_id }),
                    Err(e) => self.storage_failure(e),
                }
            }
            Message::GetDoc(req) => match self.relay.get_doc(&req.doc_id).await {
                Ok(rows) => Message::DocRows(DocRows {
                    doc_id: req.doc_id,
                    rows,
                }),
                Err(e) => self.storage_failure(e),
            },
            other => {
                tracing::warn!(session = self.id, kind = other.kind(), "unexpected message");
                rejected(ProtocolError::UnexpectedMessage {
                    kind: other.kind().to_string(),
                })
            }
        }
    }

    fn storage_failure(&self, error: StorageError) -> Message {
        if error.is_rejection() {
            self.relay.metrics().rejections_total.fetch_add(1, Ordering::Relaxed);
            tracing::info!(session = self.id, error = %error, "write rejected");
            rejected(error)
        } else {
            self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
            tracing::error!(session = self.id, error = %error, "storage failure");
            // Don't leak database details to clients
            rejected("internal storage error")
        }
    }
}

fn rejected(reason: impl ToString) -> Message {
    Message::Rejected(Rejected {
        error_message: reason.to_string(),
    })
}
