use std::borrow::Cow;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, DateTime};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::ResourceId;
use crate::metadata::Metadata;

/// The payload of an item. Raw resources start as bytes; textual stages
/// produce text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Text(Arc<str>),
    Bytes(Arc<[u8]>),
}

impl Body {
    /// Decodes `bytes` as UTF-8 text if possible, keeping raw bytes otherwise.
    pub fn from_bytes(bytes: Vec<u8>) -> Body {
        match String::from_utf8(bytes) {
            Ok(string) => Body::Text(string.into()),
            Err(e) => Body::Bytes(e.into_bytes().into()),
        }
    }

    pub fn empty() -> Body {
        Body::Text("".into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(s) => s.as_bytes(),
            Body::Bytes(b) => b,
        }
    }

    /// The body as text. Fails for non-UTF-8 bytes.
    pub fn as_text(&self) -> Result<Cow<'_, str>> {
        match self {
            Body::Text(s) => Ok(Cow::Borrowed(s)),
            Body::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => Ok(Cow::Borrowed(s)),
                Err(e) => Err(error! {
                    "item body is not valid UTF-8 text",
                    "at byte" => e.valid_up_to(),
                }),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value.into())
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.into())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value.into())
    }
}

/// One content unit as it moves through a pipeline. Each stage takes the item
/// by value and returns the next version of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ResourceId,
    pub body: Body,
    pub metadata: Metadata,
}

impl Item {
    pub fn new<B: Into<Body>>(id: ResourceId, body: B) -> Self {
        Item { id, body: body.into(), metadata: Metadata::new() }
    }

    pub fn with_body<B: Into<Body>>(self, body: B) -> Self {
        Item { body: body.into(), ..self }
    }

    /// The item's date: the `date` metadata field if present, else a
    /// `YYYY-MM-DD-` prefix of the file name.
    pub fn date(&self) -> Result<NaiveDateTime> {
        if let Some(value) = self.metadata.get_raw("date") {
            let string = value.as_str().ok_or_else(|| error! {
                "`date` metadata must be a string",
                "resource" => &self.id,
                "found" => value.kind(),
            })?;

            return parse_date(string).ok_or_else(|| error! {
                "failed to parse `date` metadata",
                "resource" => &self.id,
                "value" => string,
            });
        }

        let name = self.id.file_name();
        name.get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .ok_or_else(|| error! {
                "item has no date",
                "resource" => &self.id,
                "hint" => "set `date` metadata or prefix the file name with YYYY-MM-DD-",
            })
    }
}

pub(crate) fn parse_date(string: &str) -> Option<NaiveDateTime> {
    let string = string.trim();
    string.parse::<NaiveDate>().ok().and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| string.parse::<NaiveDateTime>().ok())
        .or_else(|| NaiveDateTime::parse_from_str(string, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(string, "%Y-%m-%d %H:%M").ok())
        .or_else(|| DateTime::parse_from_rfc3339(string).ok().map(|dt| dt.naive_utc()))
}

fn sort_by_date<I: AsRef<Item>>(items: &mut [I], newest_first: bool) -> Result<()> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items.iter() {
        keyed.push(item.as_ref().date()?);
    }

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        let by_date = match newest_first {
            true => keyed[b].cmp(&keyed[a]),
            false => keyed[a].cmp(&keyed[b]),
        };

        by_date.then_with(|| items[a].as_ref().id.cmp(&items[b].as_ref().id))
    });

    apply_permutation(items, order);
    Ok(())
}

// Moves `items[order[i]]` to position `i`.
fn apply_permutation<T>(items: &mut [T], mut order: Vec<usize>) {
    for i in 0..order.len() {
        let mut current = i;
        while order[current] != i {
            let next = order[current];
            items.swap(current, next);
            order[current] = current;
            current = next;
        }

        order[current] = current;
    }
}

/// Sorts `items` newest first by [`Item::date()`], ties by id.
pub fn recent_first<I: AsRef<Item>>(items: &mut [I]) -> Result<()> {
    sort_by_date(items, true)
}

/// Sorts `items` oldest first by [`Item::date()`], ties by id.
pub fn chronological<I: AsRef<Item>>(items: &mut [I]) -> Result<()> {
    sort_by_date(items, false)
}

impl AsRef<Item> for Item {
    fn as_ref(&self) -> &Item {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn post(id: &str, date: Option<&str>) -> Arc<Item> {
        let mut item = Item::new(ResourceId::new(id), "");
        if let Some(date) = date {
            item.metadata.insert_raw("date", date);
        }

        Arc::new(item)
    }

    #[test]
    fn dates_from_metadata_or_name() {
        let item = post("posts/2024-01-05-hello.md", None);
        assert_eq!(item.date().unwrap().date(), NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());

        let item = post("posts/hello.md", Some("2023-12-31 10:30"));
        assert_eq!(item.date().unwrap().date(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());

        assert!(post("posts/hello.md", None).date().is_err());
        assert!(post("posts/hello.md", Some("yesterday")).date().is_err());
    }

    #[test]
    fn sorting() {
        let mut items = vec![
            post("posts/b.md", Some("2024-01-01")),
            post("posts/c.md", Some("2024-03-01")),
            post("posts/a.md", Some("2024-01-01")),
            post("posts/d.md", Some("2024-02-01")),
        ];

        recent_first(&mut items).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["posts/c.md", "posts/d.md", "posts/a.md", "posts/b.md"]);

        chronological(&mut items).unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["posts/a.md", "posts/b.md", "posts/d.md", "posts/c.md"]);
    }
}
