/// Console rendering of the grouped notice view
use crate::feed::{DateGroup, FeedItem, NoticePayload};
use chrono::NaiveDate;
use colored::*;

/// "Today", "Yesterday" or e.g. "Mar 01, 2024"
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%b %d, %Y").to_string()
    }
}

/// One plain line per notice: time, title, sender
pub fn format_notice(item: &FeedItem<NoticePayload>) -> String {
    let mut line = format!(
        "{}  {}",
        item.created_at.format("%H:%M"),
        item.payload.title
    );
    if !item.payload.sender_name.is_empty() {
        line.push_str(&format!(" ({})", item.payload.sender_name));
    }
    if item.payload.attachment.as_ref().is_some_and(|a| !a.is_null()) {
        line.push_str(" [attachment]");
    }
    line
}

/// Render the whole view, newest group last; live items are highlighted
pub fn render_view(groups: &[DateGroup<NoticePayload>], today: NaiveDate) -> Vec<String> {
    let mut lines = Vec::new();
    for group in groups {
        lines.push(format!("── {} ──", date_label(group.date, today)).bold().to_string());
        for item in &group.items {
            let line = format_notice(item);
            if item.is_new {
                lines.push(format!("  {} {}", "●".green().bold(), line.green()));
            } else {
                lines.push(format!("    {}", line));
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn notice(title: &str, sender: &str) -> FeedItem<NoticePayload> {
        FeedItem::new(
            "1",
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap(),
            NoticePayload {
                title: title.to_string(),
                message: String::new(),
                sender_name: sender.to_string(),
                sender_email: String::new(),
                department: "04".to_string(),
                batch: "22".to_string(),
                notice_type: None,
                attachment: None,
                updated_at: None,
            },
        )
    }

    #[test]
    fn test_date_labels() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(date_label(today, today), "Today");
        assert_eq!(date_label(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), today), "Yesterday");
        assert_eq!(date_label(NaiveDate::from_ymd_opt(2024, 2, 9).unwrap(), today), "Feb 09, 2024");
    }

    #[test]
    fn test_format_notice() {
        assert_eq!(format_notice(&notice("Lab moved", "CR")), "09:05  Lab moved (CR)");
        let mut with_file = notice("Slides", "");
        with_file.payload.attachment = Some(serde_json::json!("slides.pdf"));
        assert_eq!(format_notice(&with_file), "09:05  Slides [attachment]");
    }

    #[test]
    fn test_render_view_line_count() {
        colored::control::set_override(false);
        let group = DateGroup {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            items: vec![notice("a", "x"), notice("b", "y")],
        };
        let lines = render_view(&[group], NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "── Today ──");
        assert_eq!(lines[1], "    09:05  a (x)");
    }

    #[test]
    fn test_render_view_drops_highlight_once_seen() {
        colored::control::set_override(false);
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut fresh = notice("a", "x");
        fresh.is_new = true;

        let highlighted = render_view(&[DateGroup { date, items: vec![fresh.clone()] }], date);
        assert_eq!(highlighted[1], "  ● 09:05  a (x)");

        fresh.is_new = false;
        let faded = render_view(&[DateGroup { date, items: vec![fresh] }], date);
        assert_eq!(faded[1], "    09:05  a (x)");
    }
}
