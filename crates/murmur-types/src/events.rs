use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tables the client reads or subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    MessageReactions,
    Profiles,
    Rooms,
    RoomMembers,
    TypingIndicators,
    Notifications,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::MessageReactions => "message_reactions",
            Self::Profiles => "profiles",
            Self::Rooms => "rooms",
            Self::RoomMembers => "room_members",
            Self::TypingIndicators => "typing_indicators",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-level change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Which change kinds a subscription wants: one kind, or `*` for all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Only(ChangeKind),
    All,
}

impl EventFilter {
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            Self::Only(k) => *k == kind,
            Self::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Only(k) => k.as_str(),
            Self::All => "*",
        }
    }
}

/// `column=eq.value` predicate on a change subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEq {
    pub column: String,
    pub value: String,
}

impl fmt::Display for ColumnEq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One clause of a change subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    pub event: EventFilter,
    pub column: Option<ColumnEq>,
}

impl ChangeFilter {
    pub fn new(table: Table, event: EventFilter) -> Self {
        Self {
            table,
            event,
            column: None,
        }
    }

    pub fn on(table: Table, kind: ChangeKind) -> Self {
        Self::new(table, EventFilter::Only(kind))
    }

    pub fn any(table: Table) -> Self {
        Self::new(table, EventFilter::All)
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.column = Some(ColumnEq {
            column: column.into(),
            value: value.to_string(),
        });
        self
    }

    /// Whether `event` satisfies this clause. Column predicates are checked
    /// against the new row, falling back to the old row for deletes.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.event.accepts(event.kind) {
            return false;
        }
        match &self.column {
            None => true,
            Some(eq) => event
                .column(&eq.column)
                .map(|v| value_as_text(v) == eq.value)
                .unwrap_or(false),
        }
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// A row-level change delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub old_record: Value,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind, record: Value, old_record: Value) -> Self {
        Self {
            table,
            kind,
            record,
            old_record,
        }
    }

    /// Column of the changed row: new values first, old values for deletes.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.record
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| self.old_record.get(name).filter(|v| !v.is_null()))
    }

    pub fn column_str(&self, name: &str) -> Option<&str> {
        self.column(name).and_then(Value::as_str)
    }

    /// Decode the changed row (the old row for deletes).
    pub fn row<T: DeserializeOwned>(&self) -> Option<T> {
        let source = match self.kind {
            ChangeKind::Delete => &self.old_record,
            _ => &self.record,
        };
        serde_json::from_value(source.clone()).ok()
    }
}

/// Lifecycle status of a realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Change(ChangeEvent),
    Status(ChannelStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(table: Table, record: Value) -> ChangeEvent {
        ChangeEvent::new(table, ChangeKind::Insert, record, Value::Null)
    }

    #[test]
    fn filter_by_table_and_kind() {
        let filter = ChangeFilter::on(Table::Messages, ChangeKind::Insert);
        assert!(filter.matches(&insert(Table::Messages, json!({ "id": "m-1" }))));
        assert!(!filter.matches(&insert(Table::MessageReactions, json!({ "id": "r-1" }))));

        let update = ChangeEvent::new(Table::Messages, ChangeKind::Update, json!({}), Value::Null);
        assert!(!filter.matches(&update));
        assert!(ChangeFilter::any(Table::Messages).matches(&update));
    }

    #[test]
    fn filter_by_column() {
        let filter = ChangeFilter::on(Table::Messages, ChangeKind::Insert).where_eq("room_id", "r-1");
        assert!(filter.matches(&insert(Table::Messages, json!({ "room_id": "r-1" }))));
        assert!(!filter.matches(&insert(Table::Messages, json!({ "room_id": "r-2" }))));
        assert!(!filter.matches(&insert(Table::Messages, json!({}))));
    }

    #[test]
    fn delete_matches_old_record() {
        let filter = ChangeFilter::on(Table::TypingIndicators, ChangeKind::Delete).where_eq("room_id", "r-1");
        let event = ChangeEvent::new(
            Table::TypingIndicators,
            ChangeKind::Delete,
            Value::Null,
            json!({ "room_id": "r-1", "user_id": "u-1" }),
        );
        assert!(filter.matches(&event));
        assert_eq!(event.column_str("user_id"), Some("u-1"));
    }

    #[test]
    fn column_filter_wire_form() {
        let filter = ChangeFilter::any(Table::RoomMembers).where_eq("room_id", "abc");
        let eq = filter.column.as_ref().map(ToString::to_string);
        assert_eq!(eq.as_deref(), Some("room_id=eq.abc"));
    }
}
