/// Wire model of the notice API and its conversion into feed items
use crate::error::{FeedError, Result};
use crate::feed::{FeedItem, FeedPage};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Notice as sent by the backend, both in pages and on the live topic
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeDto {
    pub notice_id: NoticeId,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_email: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub notice_type: Option<String>,
    #[serde(default)]
    pub attachment: Option<serde_json::Value>,
}

/// The backend uses numeric ids; older clients sent strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoticeId {
    Number(i64),
    Text(String),
}

impl NoticeId {
    pub fn to_key(&self) -> String {
        match self {
            NoticeId::Number(n) => n.to_string(),
            NoticeId::Text(s) => s.clone(),
        }
    }
}

/// Everything about a notice that the presenter shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    pub title: String,
    pub message: String,
    pub sender_name: String,
    pub sender_email: String,
    pub department: String,
    pub batch: String,
    pub notice_type: Option<String>,
    pub attachment: Option<serde_json::Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<NoticeDto> for FeedItem<NoticePayload> {
    type Error = FeedError;

    fn try_from(dto: NoticeDto) -> Result<Self> {
        let created_at = parse_timestamp(&dto.created_at)?;
        let updated_at = match dto.updated_at.as_deref() {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };
        let payload = NoticePayload {
            title: dto.title,
            message: dto.message,
            sender_name: dto.sender_name,
            sender_email: dto.sender_email,
            department: dto.department,
            batch: dto.batch,
            notice_type: dto.notice_type,
            attachment: dto.attachment,
            updated_at,
        };
        Ok(FeedItem::new(dto.notice_id.to_key(), created_at, payload))
    }
}

/// Accepts RFC 3339 or a naive ISO timestamp, the latter taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| FeedError::Fetch(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Decode one notice from a JSON document
pub fn decode_notice(json: &str) -> Result<FeedItem<NoticePayload>> {
    let dto: NoticeDto = serde_json::from_str(json)?;
    FeedItem::try_from(dto)
}

/// Spring-style page envelope returned by `GET /api/notices`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_elements: Option<u64>,
    #[serde(default)]
    pub last: Option<bool>,
    #[serde(default)]
    pub has_next: Option<bool>,
}

impl<T> PageEnvelope<T> {
    /// Whether a page after `page_index` exists. An empty page never has more.
    pub fn has_more(&self, page_index: u32) -> bool {
        if self.content.is_empty() {
            return false;
        }
        if let Some(last) = self.last {
            return !last;
        }
        if let Some(has_next) = self.has_next {
            return has_next;
        }
        self.total_pages
            .map(|total| page_index + 1 < total)
            .unwrap_or(false)
    }
}

impl PageEnvelope<NoticeDto> {
    /// Convert into a feed page, dropping notices that fail to convert
    pub fn into_page(self, page_index: u32) -> FeedPage<NoticePayload> {
        let has_more = self.has_more(page_index);
        let items = self
            .content
            .into_iter()
            .filter_map(|dto| {
                let id = dto.notice_id.to_key();
                match FeedItem::try_from(dto) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Dropping notice {} from page {}: {}", id, page_index, e);
                        None
                    }
                }
            })
            .collect();
        FeedPage {
            items,
            has_more,
            page_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const NOTICE: &str = r#"{
        "noticeId": 42,
        "title": "Class Test Schedule",
        "message": "Class test for Data Structures will be held on Friday.",
        "senderName": "Admin",
        "senderEmail": "admin@student.cuet.ac.bd",
        "createdAt": "2024-03-01T09:30:00",
        "department": "04",
        "batch": "22",
        "noticeType": "ACADEMIC",
        "attachment": null
    }"#;

    #[test]
    fn test_decode_notice() {
        let item = decode_notice(NOTICE).unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.created_at, Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        assert_eq!(item.payload.title, "Class Test Schedule");
        assert_eq!(item.payload.notice_type.as_deref(), Some("ACADEMIC"));
        assert!(item.payload.attachment.is_none());
        assert!(!item.is_new);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 3, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T09:30:00+06:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T03:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T03:30:00.000").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_string_ids() {
        let json = r#"{"noticeId":"n42","title":"t","createdAt":"2024-03-01T00:00:00Z"}"#;
        assert_eq!(decode_notice(json).unwrap().id, "n42");
    }

    #[test]
    fn test_page_has_more() {
        let page: PageEnvelope<NoticeDto> = serde_json::from_str(&format!(
            r#"{{"content":[{}],"totalPages":3,"last":false}}"#,
            NOTICE
        ))
        .unwrap();
        assert!(page.has_more(0));

        let last: PageEnvelope<NoticeDto> =
            serde_json::from_str(&format!(r#"{{"content":[{}],"last":true}}"#, NOTICE)).unwrap();
        assert!(!last.has_more(2));

        let empty: PageEnvelope<NoticeDto> =
            serde_json::from_str(r#"{"content":[],"last":false}"#).unwrap();
        assert!(!empty.has_more(0));

        let by_total: PageEnvelope<NoticeDto> =
            serde_json::from_str(&format!(r#"{{"content":[{}],"totalPages":2}}"#, NOTICE)).unwrap();
        assert!(by_total.has_more(0));
        assert!(!by_total.has_more(1));

        let by_next: PageEnvelope<NoticeDto> =
            serde_json::from_str(&format!(r#"{{"content":[{}],"hasNext":true}}"#, NOTICE)).unwrap();
        assert!(by_next.has_more(5));
    }

    #[test]
    fn test_into_page_drops_bad_notices() {
        let json = format!(
            r#"{{"content":[{},{{"noticeId":7,"title":"bad","createdAt":"not a date"}}],"last":true}}"#,
            NOTICE
        );
        let envelope: PageEnvelope<NoticeDto> = serde_json::from_str(&json).unwrap();
        let page = envelope.into_page(1);
        assert_eq!(page.page_index, 1);
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more);
    }
}
