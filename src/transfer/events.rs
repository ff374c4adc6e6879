use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// Status updates emitted while a stream is being ingested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started,
    FileAnnounced { name: String },
    FileOpened { name: String, size: u64 },
    Progress { name: String, received: u64, total: u64 },
    FileReceived { name: String, size: u64 },
    Completed { files: usize },
    Aborted { reason: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEvent::Started => f.write_str("Starting file transfer..."),
            TransferEvent::FileAnnounced { name } => write!(f, "Receiving {}...", name),
            TransferEvent::FileOpened { name, size } => write!(f, "Writing {} ({} bytes)", name, size),
            TransferEvent::Progress { name, received, total } => {
                write!(f, "{}: {}/{} bytes", name, received, total)
            }
            TransferEvent::FileReceived { .. } => f.write_str("File received successfully."),
            TransferEvent::Completed { .. } => f.write_str("Transfer complete."),
            TransferEvent::Aborted { reason } => write!(f, "Transfer aborted: {}", reason),
        }
    }
}

/// Destination for receiver status updates
pub trait EventSink {
    fn emit(&mut self, event: TransferEvent);
}

/// Forward events to another thread or task
impl EventSink for UnboundedSender<TransferEvent> {
    fn emit(&mut self, event: TransferEvent) {
        // a closed channel only means nobody is watching anymore
        let _ = self.send(event);
    }
}

/// Collect events in memory
impl EventSink for Vec<TransferEvent> {
    fn emit(&mut self, event: TransferEvent) {
        self.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: TransferEvent) {
        (**self).emit(event);
    }
}
