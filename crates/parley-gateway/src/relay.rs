use std::sync::Arc;

use tracing::{debug, error};

use parley_types::events::{ChatFrame, ClientFrame, ServerEvent};
use parley_types::models::{Message, NewMessage};

use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, StorageError};
use crate::store::MessageStore;

/// Result of relaying one chat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub message_id: i64,
    pub echoed_to_sender: bool,
    pub delivered_to_recipient: bool,
}

/// Persists chat frames and routes each participant their own key view.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    notify_read_receipts: bool,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Dispatcher, notify_read_receipts: bool) -> Self {
        Self {
            store,
            dispatcher,
            notify_read_receipts,
        }
    }

    /// Routes one parsed frame from `user_id` to its handler.
    pub async fn handle_frame(&self, user_id: i64, frame: ClientFrame) -> Result<(), GatewayError> {
        match frame {
            ClientFrame::Chat(chat) => {
                self.handle_chat_frame(user_id, chat).await?;
            }
            ClientFrame::Typing { recipient_id } => {
                self.handle_typing_frame(user_id, recipient_id).await;
            }
            ClientFrame::MarkRead { sender_id } => {
                self.handle_read_receipt_frame(user_id, sender_id).await?;
            }
        }
        Ok(())
    }

    /// Stores the message, then echoes the sender view back to the sender and
    /// relays the recipient view to the recipient if they are online. Nothing
    /// is forwarded if persistence fails.
    pub async fn handle_chat_frame(
        &self,
        sender_id: i64,
        frame: ChatFrame,
    ) -> Result<RelayOutcome, GatewayError> {
        let new_message = NewMessage::from_frame(sender_id, frame);

        let store = self.store.clone();
        let to_store = new_message.clone();
        let persisted = tokio::task::spawn_blocking(move || store.persist(&to_store))
            .await
            .map_err(|e| StorageError::new(format!("spawn_blocking join error: {}", e)))?
            .inspect_err(|e| error!(sender_id, "dropping chat frame: {}", e))?;

        let message = Message::from_persisted(new_message, persisted);
        let recipient_id = message.recipient_id;

        let echoed_to_sender = self
            .dispatcher
            .send_to_user(sender_id, ServerEvent::Message(message.payload_for(sender_id)))
            .await;

        let delivered_to_recipient = if recipient_id == sender_id {
            echoed_to_sender
        } else {
            self.dispatcher
                .send_to_user(recipient_id, ServerEvent::Message(message.payload_for(recipient_id)))
                .await
        };

        debug!(
            message_id = message.id,
            sender_id, recipient_id, delivered_to_recipient, "relayed chat message"
        );

        Ok(RelayOutcome {
            message_id: message.id,
            echoed_to_sender,
            delivered_to_recipient,
        })
    }

    /// Typing indicator to the recipient only; never persisted.
    pub async fn handle_typing_frame(&self, sender_id: i64, recipient_id: i64) -> bool {
        self.dispatcher.typing(sender_id, recipient_id).await
    }

    /// Marks everything `other_party_id` sent to `reader_id` as read.
    pub async fn handle_read_receipt_frame(
        &self,
        reader_id: i64,
        other_party_id: i64,
    ) -> Result<usize, GatewayError> {
        let store = self.store.clone();
        let updated = tokio::task::spawn_blocking(move || store.mark_read(other_party_id, reader_id))
            .await
            .map_err(|e| StorageError::new(format!("spawn_blocking join error: {}", e)))?
            .inspect_err(|e| error!(reader_id, other_party_id, "mark_read failed: {}", e))?;

        debug!(reader_id, other_party_id, updated, "marked messages read");

        if self.notify_read_receipts && updated > 0 {
            self.dispatcher.read_receipt(reader_id, other_party_id).await;
        }

        Ok(updated)
    }
}
