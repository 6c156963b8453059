use murmur_types::MessageId;

/// One line of terminal input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Send(String),
    Edit { id: MessageId, content: String },
    Delete(MessageId),
    React { id: MessageId, emoji: String },
    Search(String),
    Attach(String),
    /// Empty line: post pending attachments with the suggested body
    SendAttachment,
    List,
    Rooms,
    NewRoom(String),
    Members,
    Unread,
    Read(String),
}

impl Command {
    /// `None` for slash commands that are malformed.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Some(Self::SendAttachment);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Send(line.to_string()));
        };

        let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
        let args = args.trim();
        match name {
            "edit" => {
                let (id, content) = args.split_once(' ')?;
                Some(Self::Edit {
                    id: MessageId::new(id),
                    content: content.to_string(),
                })
            }
            "delete" if !args.is_empty() => Some(Self::Delete(MessageId::new(args))),
            "react" => {
                let (id, emoji) = args.split_once(' ')?;
                Some(Self::React {
                    id: MessageId::new(id),
                    emoji: emoji.trim().to_string(),
                })
            }
            "search" => Some(Self::Search(args.to_string())),
            "attach" if !args.is_empty() => Some(Self::Attach(args.to_string())),
            "list" => Some(Self::List),
            "rooms" => Some(Self::Rooms),
            "newroom" if !args.is_empty() => Some(Self::NewRoom(args.to_string())),
            "members" => Some(Self::Members),
            "unread" => Some(Self::Unread),
            "read" if !args.is_empty() => Some(Self::Read(args.to_string())),
            _ => None,
        }
    }
}

/// Guess a MIME type from a file name.
pub fn content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(Command::parse("hello"), Some(Command::Send("hello".into())));
        assert_eq!(Command::parse("  "), Some(Command::SendAttachment));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            Command::parse("/edit m-1 new text"),
            Some(Command::Edit { id: MessageId::new("m-1"), content: "new text".into() })
        );
        assert_eq!(
            Command::parse("/react m-1 👍"),
            Some(Command::React { id: MessageId::new("m-1"), emoji: "👍".into() })
        );
        assert_eq!(Command::parse("/delete m-2"), Some(Command::Delete(MessageId::new("m-2"))));
        assert_eq!(Command::parse("/search cats"), Some(Command::Search("cats".into())));
        assert_eq!(Command::parse("/list"), Some(Command::List));
        assert_eq!(Command::parse("/newroom rust talk"), Some(Command::NewRoom("rust talk".into())));
        assert_eq!(Command::parse("/read n-1"), Some(Command::Read("n-1".into())));
        assert_eq!(Command::parse("/members"), Some(Command::Members));
        assert_eq!(Command::parse("/newroom"), None);
        assert_eq!(Command::parse("/delete"), None);
        assert_eq!(Command::parse("/nope"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("Cat.PNG"), "image/png");
        assert_eq!(content_type("notes"), "application/octet-stream");
    }
}
