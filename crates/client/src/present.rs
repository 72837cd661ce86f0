//! Presentation helpers
//!
//! Labels and URLs the conversation view derives from messages.

use time::{Date, OffsetDateTime, UtcOffset};

use fleetchat_shared::{Coordinates, Message, SenderType, UserSession};

/// File extensions the document viewer can open; anything else is downloaded
pub const PREVIEWABLE_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"];

/// Name shown for support agents
pub const AGENT_LABEL: &str = "Faucon Bleu";

// =============================================================================
// Layout
// =============================================================================

/// Which side of the conversation a message renders on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSide {
    Own,
    Other,
}

pub fn message_side(message: &Message, session: &UserSession) -> MessageSide {
    if session.is_own(message) {
        MessageSide::Own
    } else {
        MessageSide::Other
    }
}

/// Label above a message; own messages carry none
pub fn sender_label(message: &Message, session: &UserSession) -> Option<&'static str> {
    if session.is_own(message) {
        return None;
    }
    Some(match message.sender_type {
        SenderType::Vehicle => "Conductor",
        SenderType::Client => "Client",
        SenderType::Agent => AGENT_LABEL,
    })
}

/// Consecutive messages sharing a calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DaySection<'a> {
    pub label: String,
    pub messages: Vec<&'a Message>,
}

/// Day header: `Today`, `Yesterday`, or `Month D, YYYY`
pub fn day_label(day: Date, today: Date) -> String {
    if day == today {
        "Today".to_string()
    } else if today.previous_day() == Some(day) {
        "Yesterday".to_string()
    } else {
        format!("{} {}, {}", day.month(), day.day(), day.year())
    }
}

/// Split an ordered message list into day sections in `now`'s offset
pub fn group_by_day(messages: &[Message], now: OffsetDateTime) -> Vec<DaySection<'_>> {
    let offset = now.offset();
    let today = now.date();
    let mut sections: Vec<(Date, DaySection<'_>)> = Vec::new();

    for message in messages {
        let day = message.created_at.to_offset(offset).date();
        let same_day = matches!(sections.last(), Some((current, _)) if *current == day);
        if same_day {
            if let Some((_, section)) = sections.last_mut() {
                section.messages.push(message);
            }
        } else {
            sections.push((
                day,
                DaySection {
                    label: day_label(day, today),
                    messages: vec![message],
                },
            ));
        }
    }

    sections.into_iter().map(|(_, section)| section).collect()
}

// =============================================================================
// Formatting
// =============================================================================

/// Recording length as `m:ss`
pub fn format_duration(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Playback position as `m:ss`
pub fn format_time(milliseconds: u64) -> String {
    let total_seconds = milliseconds / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Message timestamp as `HH:MM` in the given offset
pub fn format_clock(created_at: OffsetDateTime, offset: UtcOffset) -> String {
    let local = created_at.to_offset(offset);
    format!("{:02}:{:02}", local.hour(), local.minute())
}

// =============================================================================
// Attachments & Locations
// =============================================================================

/// What tapping a file message does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Preview,
    Download,
}

pub fn file_action(file_path: &str) -> FileAction {
    if is_previewable(file_path) {
        FileAction::Preview
    } else {
        FileAction::Download
    }
}

pub fn is_previewable(file_path: &str) -> bool {
    file_path
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_lowercase();
            PREVIEWABLE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// External maps link for a shared location
pub fn maps_url(at: Coordinates) -> String {
    format!(
        "https://www.google.com/maps/search/?api=1&query={},{}",
        at.latitude, at.longitude
    )
}

/// Static map preview image with a pin at `at`
pub fn static_map_url(at: Coordinates, access_token: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("access_token", access_token)
        .finish();
    format!(
        "https://api.mapbox.com/styles/v1/mapbox/streets-v11/static/pin-s+FF0000({lon},{lat})/{lon},{lat},14,0/300x200?{query}",
        lon = at.longitude,
        lat = at.latitude,
        query = query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetchat_shared::{DeliveryStatus, MessageId, MessageType, UserType};
    use time::macros::{date, datetime, offset};

    fn message(id: &str, sender_type: SenderType, at: OffsetDateTime) -> Message {
        Message {
            id: MessageId::from(id),
            sender_type,
            message_type: MessageType::Text,
            content: Some("hello".into()),
            file_path: None,
            latitude: None,
            longitude: None,
            created_at: at,
            status: DeliveryStatus::Sent,
        }
    }

    #[test]
    fn test_day_labels() {
        let today = date!(2024 - 05 - 10);
        assert_eq!(day_label(today, today), "Today");
        assert_eq!(day_label(date!(2024 - 05 - 09), today), "Yesterday");
        assert_eq!(day_label(date!(2024 - 03 - 02), today), "March 2, 2024");
    }

    #[test]
    fn test_group_by_day() {
        let messages = vec![
            message("1", SenderType::Agent, datetime!(2024-05-08 09:00 UTC)),
            message("2", SenderType::Client, datetime!(2024-05-09 09:00 UTC)),
            message("3", SenderType::Agent, datetime!(2024-05-09 18:00 UTC)),
            message("4", SenderType::Agent, datetime!(2024-05-10 07:30 UTC)),
        ];

        let sections = group_by_day(&messages, datetime!(2024-05-10 12:00 UTC));
        let summary: Vec<(&str, usize)> = sections
            .iter()
            .map(|s| (s.label.as_str(), s.messages.len()))
            .collect();
        assert_eq!(summary, vec![("May 8, 2024", 1), ("Yesterday", 2), ("Today", 1)]);
    }

    #[test]
    fn test_grouping_uses_local_offset() {
        // 23:30 UTC is already the next day at UTC+1
        let messages = vec![message("1", SenderType::Agent, datetime!(2024-05-09 23:30 UTC))];
        let sections = group_by_day(&messages, datetime!(2024-05-10 12:00 +1));
        assert_eq!(sections[0].label, "Today");
    }

    #[test]
    fn test_agent_message_renders_on_other_side() {
        let session = UserSession::new(UserType::Client);
        let agent = message("1", SenderType::Agent, datetime!(2024-05-10 07:30 UTC));
        let own = message("2", SenderType::Client, datetime!(2024-05-10 07:31 UTC));

        assert_eq!(message_side(&agent, &session), MessageSide::Other);
        assert_eq!(sender_label(&agent, &session), Some("Faucon Bleu"));
        assert_eq!(message_side(&own, &session), MessageSide::Own);
        assert_eq!(sender_label(&own, &session), None);
    }

    #[test]
    fn test_conductor_and_client_labels() {
        let agent_view = UserSession::new(UserType::Client);
        let conductor = message("1", SenderType::Vehicle, datetime!(2024-05-10 07:30 UTC));
        assert_eq!(sender_label(&conductor, &agent_view), Some("Conductor"));

        let conductor_view = UserSession::new(UserType::Vehicle);
        let client = message("2", SenderType::Client, datetime!(2024-05-10 07:30 UTC));
        assert_eq!(sender_label(&client, &conductor_view), Some("Client"));
    }

    #[test]
    fn test_durations() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_time(59_999), "0:59");
        assert_eq!(format_time(125_000), "2:05");
    }

    #[test]
    fn test_clock() {
        assert_eq!(format_clock(datetime!(2024-05-10 07:05 UTC), offset!(+2)), "09:05");
    }

    #[test]
    fn test_file_actions() {
        assert_eq!(file_action("chat/report.PDF"), FileAction::Preview);
        assert_eq!(file_action("chat/notes.txt"), FileAction::Preview);
        assert_eq!(file_action("chat/archive.zip"), FileAction::Download);
        assert_eq!(file_action("chat/noextension"), FileAction::Download);
    }

    #[test]
    fn test_map_urls() {
        let at = Coordinates {
            latitude: 33.5,
            longitude: -7.25,
        };
        assert_eq!(
            maps_url(at),
            "https://www.google.com/maps/search/?api=1&query=33.5,-7.25"
        );
        assert!(static_map_url(at, "pk.test")
            .ends_with("pin-s+FF0000(-7.25,33.5)/-7.25,33.5,14,0/300x200?access_token=pk.test"));
        assert!(static_map_url(at, "pk.a+b/c=d&e").ends_with("?access_token=pk.a%2Bb%2Fc%3Dd%26e"));
    }
}
