//! Receive loops feeding the state machine.
//!
//! One loop per channel reads datagrams and hands each one to a spawned
//! handler task. A semaphore bounds how many handlers run at once; when it is
//! exhausted the loop stops reading until a handler finishes.

use super::handler::MessageHandler;
use crate::multicast::channel::{Channel, ChannelSet, MAX_DATAGRAM_SIZE};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub struct Dispatcher {
    handler: Arc<MessageHandler>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(handler: Arc<MessageHandler>, workers: usize) -> Arc<Self> {
        Arc::new(Self {
            handler,
            permits: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Spawns one receive loop per channel and returns their handles.
    pub fn start(self: &Arc<Self>, channels: &ChannelSet) -> Vec<JoinHandle<()>> {
        channels
            .all()
            .into_iter()
            .map(|channel| {
                let dispatcher = self.clone();
                let channel = channel.clone();
                tokio::spawn(async move {
                    dispatcher.receive_loop(channel).await;
                })
            })
            .collect()
    }

    async fn receive_loop(self: Arc<Self>, channel: Arc<Channel>) {
        tracing::info!("Listening on {}", channel.kind());
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match channel.receive(&mut buf).await {
                Ok((header, body)) => {
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        return;
                    };

                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        handler.handle_datagram(header, body).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to receive on {}: {}", channel.kind(), e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
