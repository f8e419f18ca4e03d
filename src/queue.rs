//! Cross-thread frame queue.
//!
//! One producer (the session loop) and one consumer (the persistence worker)
//! per session. A message owns its payload outright: sending moves the bytes
//! into the channel and receiving moves them out, so no buffer is ever shared
//! across the thread boundary.
//!
//! The queue is bounded. A producer that outruns the writer blocks on
//! `enqueue` instead of growing the backlog without limit.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, SyncSender};

/// Default bound on in-flight messages per session.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A message crossing from the session loop to the persistence worker.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    /// Opens the session: carries the id that names the output files.
    StartSession(String),
    /// One accepted frame's encoded payload.
    FrameData(Vec<u8>),
    /// Closes the session and terminates the worker.
    EndSession,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::StartSession(_) => "StartSession",
            Message::FrameData(_) => "FrameData",
            Message::EndSession => "EndSession",
        }
    }
}

/// Producer half of a session queue.
pub struct MessageSender {
    tx: SyncSender<Message>,
}

/// Consumer half of a session queue.
pub struct MessageReceiver {
    rx: Receiver<Message>,
}

/// Creates the bounded FIFO connecting one session loop to one worker.
pub fn session_queue(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (MessageSender { tx }, MessageReceiver { rx })
}

impl MessageSender {
    /// Appends a message, blocking while the queue is full.
    ///
    /// Fails only when the worker is gone, which means the worker already hit
    /// an error of its own; the caller should join it to learn why.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow!("persistence worker hung up"))
    }
}

impl MessageReceiver {
    /// Removes and returns the head message, blocking until one exists.
    pub fn dequeue(&self) -> Result<Message> {
        self.rx
            .recv()
            .map_err(|_| anyhow!("session producer hung up"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_messages_in_fifo_order() -> Result<()> {
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);

        let consumer = std::thread::spawn(move || -> Result<Vec<Message>> {
            let mut received = Vec::new();
            loop {
                let message = rx.dequeue()?;
                let done = message == Message::EndSession;
                received.push(message);
                if done {
                    return Ok(received);
                }
            }
        });

        tx.enqueue(Message::StartSession("s".to_string()))?;
        for i in 0..5u8 {
            tx.enqueue(Message::FrameData(vec![i; 3]))?;
        }
        tx.enqueue(Message::EndSession)?;

        let received = consumer.join().expect("consumer thread")?;
        assert_eq!(received.len(), 7);
        assert_eq!(received[0], Message::StartSession("s".to_string()));
        for i in 0..5u8 {
            assert_eq!(received[1 + i as usize], Message::FrameData(vec![i; 3]));
        }
        assert_eq!(received[6], Message::EndSession);
        Ok(())
    }

    #[test]
    fn enqueue_blocks_then_resumes_when_drained() -> Result<()> {
        let (tx, rx) = session_queue(1);
        tx.enqueue(Message::FrameData(vec![1]))?;

        let producer = std::thread::spawn(move || tx.enqueue(Message::FrameData(vec![2])));

        assert_eq!(rx.dequeue()?, Message::FrameData(vec![1]));
        producer.join().expect("producer thread")?;
        assert_eq!(rx.dequeue()?, Message::FrameData(vec![2]));
        Ok(())
    }

    #[test]
    fn enqueue_fails_when_consumer_is_gone() {
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);
        drop(rx);
        assert!(tx.enqueue(Message::EndSession).is_err());
    }

    #[test]
    fn dequeue_fails_when_producer_is_gone() {
        let (tx, rx) = session_queue(DEFAULT_QUEUE_CAPACITY);
        drop(tx);
        assert!(rx.dequeue().is_err());
    }
}
