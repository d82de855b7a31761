use std::fmt::Write;

use chrono::Utc;
use chrono::format::{Item, StrftimeItems};
use tracing::debug;

use crate::log_entry::{LogEntry, Value};
use crate::tag::Tag;

/// One step of a pipeline's filter chain.
///
/// Runs on the request path, possibly on many threads at once. Returning
/// `false` rejects the record. A filter may rewrite the tag or the entry
/// before accepting.
pub trait Filter: Send + Sync {
    fn apply(&self, tag: &mut Tag, entry: &mut LogEntry) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&mut Tag, &mut LogEntry) -> bool + Send + Sync,
{
    fn apply(&self, tag: &mut Tag, entry: &mut LogEntry) -> bool {
        self(tag, entry)
    }
}

/// Adapts a mutating closure into a filter that always accepts.
pub struct Transform<F>(pub F);

impl<F> Filter for Transform<F>
where
    F: Fn(&mut Tag, &mut LogEntry) + Send + Sync,
{
    fn apply(&self, tag: &mut Tag, entry: &mut LogEntry) -> bool {
        (self.0)(tag, entry);
        true
    }
}

/// Rejects tags with fewer than `count` segments.
pub struct MinSegments {
    pub count: usize,
}

impl Filter for MinSegments {
    fn apply(&self, tag: &mut Tag, _entry: &mut LogEntry) -> bool {
        tag.len() >= self.count
    }
}

/// Appends the current UTC date, rendered with a `chrono` format string, as
/// a new tag segment.
pub struct AppendDate {
    pub format: String,
}

impl AppendDate {
    /// True when every specifier in `format` is one `chrono` can render.
    pub fn is_valid_format(format: &str) -> bool {
        !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
    }
}

impl Filter for AppendDate {
    fn apply(&self, tag: &mut Tag, _entry: &mut LogEntry) -> bool {
        let mut segment = String::new();
        if write!(segment, "{}", Utc::now().format(&self.format)).is_err() {
            debug!("append_date format '{}' can not be rendered", self.format);
            return false;
        }
        match tag.push(segment) {
            Ok(()) => true,
            Err(e) => {
                debug!("append_date produced an unusable segment for {}: {}", tag, e);
                false
            }
        }
    }
}

/// Overwrites `field` with the current UTC time.
pub struct SetTimestamp {
    pub field: String,
}

impl Filter for SetTimestamp {
    fn apply(&self, _tag: &mut Tag, entry: &mut LogEntry) -> bool {
        entry.set(self.field.clone(), Utc::now());
        true
    }
}

/// Sets `field` to a fixed value, replacing any existing one.
pub struct SetField {
    pub field: String,
    pub value: Value,
}

impl Filter for SetField {
    fn apply(&self, _tag: &mut Tag, entry: &mut LogEntry) -> bool {
        entry.set(self.field.clone(), self.value.clone());
        true
    }
}

/// Rejects entries that do not carry `field`.
pub struct RequireField {
    pub field: String,
}

impl Filter for RequireField {
    fn apply(&self, _tag: &mut Tag, entry: &mut LogEntry) -> bool {
        entry.contains(&self.field)
    }
}
