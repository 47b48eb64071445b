//! Outbound delivery queue.
//!
//! Command handling runs on many pool workers, and two of them may produce
//! frames for the same connection at once (a direct response plus a lobby
//! broadcast). Left to the workers, the relative order of those sends would
//! be undefined. Every outbound frame therefore passes through one logical
//! FIFO with a single consumer thread: for any connection, delivery order
//! equals enqueue order. No ordering holds across different connections.
//!
//! The consumer is the only place in the server allowed to block on a
//! transport send. A delivery failure (closed peer, transport error) is
//! logged and skipped; it never stalls deliveries to other connections.

use std::{io, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::connection::{Connection, ConnectionId};

struct Delivery {
    conn_id: ConnectionId,
    sink: Arc<dyn Connection>,
    frame: String,
}

/// Single-consumer queue for all server-to-client frames.
///
/// Dropping the queue delivers what was already enqueued, then joins the
/// consumer thread.
pub struct DeliveryQueue {
    queue: Option<Sender<Delivery>>,
    consumer: Option<thread::JoinHandle<()>>,
}

impl DeliveryQueue {
    /// Start the delivery thread.
    pub fn spawn() -> io::Result<Self> {
        let (queue, deliveries) = unbounded::<Delivery>();

        let consumer = thread::Builder::new()
            .name("parlor-delivery".to_owned())
            .spawn(move || consumer_loop(&deliveries))?;

        Ok(Self { queue: Some(queue), consumer: Some(consumer) })
    }

    /// Append a frame for one connection. Never blocks.
    pub fn enqueue(&self, conn_id: ConnectionId, sink: Arc<dyn Connection>, frame: String) {
        let Some(queue) = &self.queue else { return };

        if queue.send(Delivery { conn_id, sink, frame }).is_err() {
            tracing::error!(%conn_id, "delivery queue closed, dropping frame");
        }
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.queue = None;
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                tracing::error!("delivery thread terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue").finish_non_exhaustive()
    }
}

fn consumer_loop(deliveries: &Receiver<Delivery>) {
    for delivery in deliveries {
        if let Err(err) = delivery.sink.send_text(&delivery.frame) {
            tracing::warn!(conn_id = %delivery.conn_id, %err, "dropped undeliverable frame");
        }
    }
}
