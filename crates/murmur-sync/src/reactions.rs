use murmur_types::models::{ReactionRow, ReactionSummary, UserId};

/// Group raw reaction rows by emoji, in the order each emoji first appears.
pub fn group_reactions(rows: &[ReactionRow], viewer: Option<UserId>) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for row in rows {
        let mine = viewer == Some(row.user_id);
        match summaries.iter_mut().find(|s| s.emoji == row.emoji) {
            Some(summary) => {
                summary.count += 1;
                summary.viewer_reacted |= mine;
            }
            None => summaries.push(ReactionSummary {
                emoji: row.emoji.clone(),
                count: 1,
                viewer_reacted: mine,
            }),
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::MessageId;
    use uuid::Uuid;

    fn row(user: Uuid, emoji: &str) -> ReactionRow {
        ReactionRow {
            id: None,
            message_id: MessageId::new("m-1"),
            user_id: user,
            emoji: emoji.into(),
        }
    }

    #[test]
    fn counts_per_emoji_in_first_seen_order() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let rows = vec![row(other, "🔥"), row(me, "👍"), row(other, "👍"), row(other, "🎉")];

        let grouped = group_reactions(&rows, Some(me));
        let emojis: Vec<_> = grouped.iter().map(|s| s.emoji.as_str()).collect();
        assert_eq!(emojis, vec!["🔥", "👍", "🎉"]);

        assert_eq!(grouped[0].count, 1);
        assert!(!grouped[0].viewer_reacted);
        assert_eq!(grouped[1].count, 2);
        assert!(grouped[1].viewer_reacted);
    }

    #[test]
    fn anonymous_viewer_never_reacted() {
        let rows = vec![row(Uuid::new_v4(), "👍")];
        assert!(!group_reactions(&rows, None)[0].viewer_reacted);
        assert!(group_reactions(&[], None).is_empty());
    }
}
