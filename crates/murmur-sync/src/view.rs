//! The ordered, deduplicated list of messages shown for one room.
//!
//! `MessageView` is plain data: every source of updates (optimistic insert,
//! full refetch, single-message refetch) goes through one of its methods, and
//! each method keeps the invariant that an id appears at most once.

use murmur_types::models::{Message, RoomId};
use murmur_types::MessageId;

/// What a single-message reconciliation did to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A record with the same id was replaced in place.
    Updated,
    /// A temporary record was replaced by its confirmed counterpart.
    Promoted { temporary: MessageId },
    /// The record was new and went to the end.
    Appended,
    /// The record is deleted and was taken out of the view.
    Removed,
    /// Nothing changed (other room, or a deleted record that was not shown).
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct MessageView {
    messages: Vec<Message>,
}

impl MessageView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Add a locally created record unless its id is already shown.
    /// Returns whether the view changed.
    pub fn apply_optimistic(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace everything with a fresh listing. Deleted rows are dropped and
    /// the rest ordered by creation time; rows with equal timestamps keep
    /// their listing order.
    pub fn replace_all(&mut self, mut messages: Vec<Message>) {
        messages.retain(|m| !m.is_deleted);
        messages.sort_by_key(|m| m.created_at);

        // A listing may repeat a row if it changed mid-query
        let mut seen = std::collections::HashSet::new();
        messages.retain(|m| seen.insert(m.id.clone()));

        self.messages = messages;
    }

    /// Merge one freshly fetched record of room `room_id`.
    pub fn reconcile(&mut self, room_id: RoomId, message: Message) -> Reconciled {
        if message.room_id != room_id {
            return Reconciled::Ignored;
        }

        if message.is_deleted {
            return match self.remove(&message.id) {
                Some(_) => Reconciled::Removed,
                None => Reconciled::Ignored,
            };
        }

        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return Reconciled::Updated;
        }

        // Content decides; among several matches the author's own wins
        let matches = |m: &Message| m.is_temporary() && m.content == message.content;
        let pending = self
            .messages
            .iter()
            .position(|m| matches(m) && m.user_id == message.user_id)
            .or_else(|| self.messages.iter().position(matches));
        if let Some(index) = pending {
            let temporary = std::mem::replace(&mut self.messages[index], message).id;
            return Reconciled::Promoted { temporary };
        }

        self.messages.push(message);
        Reconciled::Appended
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use murmur_types::models::Author;
    use uuid::Uuid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn message(id: &str, room: RoomId, user: Uuid, content: &str, secs: i64) -> Message {
        Message {
            id: MessageId::new(id),
            room_id: room,
            user_id: user,
            content: content.into(),
            is_deleted: false,
            created_at: at(secs),
            edited_at: None,
            media_urls: Vec::new(),
            author: Author::default(),
            reactions: Vec::new(),
        }
    }

    fn ids(view: &MessageView) -> Vec<&str> {
        view.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn optimistic_insert_is_idempotent() {
        let room = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut view = MessageView::new();

        assert!(view.apply_optimistic(message("temp-1", room, me, "hi", 0)));
        assert!(!view.apply_optimistic(message("temp-1", room, me, "hi", 0)));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn replace_all_orders_and_filters() {
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut deleted = message("m-0", room, user, "gone", 0);
        deleted.is_deleted = true;

        let mut view = MessageView::new();
        view.apply_optimistic(message("temp-9", room, user, "pending", 9));
        view.replace_all(vec![
            message("m-3", room, user, "c", 3),
            deleted,
            message("m-1", room, user, "a", 1),
            message("m-2a", room, user, "b1", 2),
            message("m-2b", room, user, "b2", 2),
        ]);

        assert_eq!(ids(&view), vec!["m-1", "m-2a", "m-2b", "m-3"]);
    }

    #[test]
    fn confirmed_record_promotes_matching_temporary() {
        let room = Uuid::new_v4();
        let me = Uuid::new_v4();
        let mut view = MessageView::new();
        view.apply_optimistic(message("temp-1", room, me, "hi", 0));

        let outcome = view.reconcile(room, message("m-42", room, me, "hi", 1));
        assert_eq!(outcome, Reconciled::Promoted { temporary: MessageId::new("temp-1") });
        assert_eq!(ids(&view), vec!["m-42"]);

        // Delivered again (poll + push): replaced in place, still one record
        assert_eq!(view.reconcile(room, message("m-42", room, me, "hi", 1)), Reconciled::Updated);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn promotion_matches_on_content_even_when_authors_differ() {
        let room = Uuid::new_v4();
        let mut view = MessageView::new();
        view.apply_optimistic(message("temp-1", room, Uuid::nil(), "hello", 0));

        let outcome = view.reconcile(room, message("m-42", room, Uuid::new_v4(), "hello", 1));
        assert_eq!(outcome, Reconciled::Promoted { temporary: MessageId::new("temp-1") });
        assert_eq!(ids(&view), vec!["m-42"]);
    }

    #[test]
    fn author_picks_between_identical_pending_messages() {
        let room = Uuid::new_v4();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut view = MessageView::new();
        view.apply_optimistic(message("temp-1", room, other, "hi", 0));
        view.apply_optimistic(message("temp-2", room, me, "hi", 1));

        let outcome = view.reconcile(room, message("m-7", room, me, "hi", 2));
        assert_eq!(outcome, Reconciled::Promoted { temporary: MessageId::new("temp-2") });
        assert_eq!(ids(&view), vec!["temp-1", "m-7"]);

        assert_eq!(view.reconcile(room, message("m-8", room, me, "bye", 3)), Reconciled::Appended);
    }

    #[test]
    fn single_reconcile_appends_without_resorting() {
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut view = MessageView::new();
        view.replace_all(vec![message("m-5", room, user, "late", 5)]);

        view.reconcile(room, message("m-1", room, user, "early", 1));
        assert_eq!(ids(&view), vec!["m-5", "m-1"]);
    }

    #[test]
    fn other_rooms_and_deleted_rows() {
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut view = MessageView::new();
        view.replace_all(vec![message("m-1", room, user, "a", 1)]);

        let foreign = message("m-2", Uuid::new_v4(), user, "b", 2);
        assert_eq!(view.reconcile(room, foreign), Reconciled::Ignored);

        let mut deleted = message("m-1", room, user, "a", 1);
        deleted.is_deleted = true;
        assert_eq!(view.reconcile(room, deleted.clone()), Reconciled::Removed);
        assert_eq!(view.reconcile(room, deleted), Reconciled::Ignored);
        assert!(view.is_empty());
    }
}
