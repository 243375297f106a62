//! Path flattening for gNMI notifications.
//!
//! Converts hierarchical notification messages into fully-qualified path
//! strings of the form `/name[k1=v1,k2=v2]/...`, the form the metric
//! dispatcher matches against.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::gnmi::{Notification, Path, PathElem};

/// Flatten a path into its string form, one `/name[keys]` segment per
/// element. Keys within an element are emitted in lexicographic order so the
/// flattened form is deterministic.
pub fn flatten_path(path: &Path) -> String {
    let mut out = String::new();
    for elem in &path.elem {
        out.push('/');
        out.push_str(&elem.name);
        if !elem.key.is_empty() {
            let mut keys: Vec<(&String, &String)> = elem.key.iter().collect();
            keys.sort_by(|a, b| a.0.cmp(b.0));
            out.push('[');
            for (i, (k, v)) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(k);
                out.push('=');
                out.push_str(v);
            }
            out.push(']');
        }
    }
    out
}

/// Parse an XPath-like string (e.g. `/components/component[name=FAN-1]/state`)
/// into a [`Path`]. The inverse of [`flatten_path`] for well-formed input.
pub fn parse_path(path_str: &str) -> Path {
    let elem = path_str
        .split('/')
        .filter(|s| !s.is_empty())
        .map(parse_path_segment)
        .collect();
    Path { elem }
}

/// Parse `component[name=FAN-1]` into a [`PathElem`].
fn parse_path_segment(segment: &str) -> PathElem {
    match segment.find('[') {
        Some(bracket_pos) if segment.ends_with(']') => {
            let name = segment[..bracket_pos].to_string();
            let keys_str = &segment[bracket_pos + 1..segment.len() - 1];
            let mut key = HashMap::new();
            for key_val in keys_str.split(',') {
                if let Some((k, v)) = key_val.split_once('=') {
                    key.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
            PathElem { name, key }
        }
        _ => PathElem {
            name: segment.to_string(),
            key: HashMap::new(),
        },
    }
}

/// Convert a device-reported nanosecond timestamp to a UTC timestamp at
/// microsecond precision.
fn notification_time(timestamp_nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(timestamp_nanos / 1000).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Walk one notification, producing `(fqn, timestamp, payload)` for every
/// update and `(fqn, timestamp)` for every delete, in source order. Each fqn
/// is the flattened prefix followed by the flattened per-entry path.
///
/// Pure with respect to the notification; safe to call repeatedly.
pub fn walk_notification<U, D>(notification: &Notification, mut update_cb: U, mut delete_cb: D)
where
    U: FnMut(&str, DateTime<Utc>, &[u8]),
    D: FnMut(&str, DateTime<Utc>),
{
    let prefix = notification
        .prefix
        .as_ref()
        .map(flatten_path)
        .unwrap_or_default();
    let ts = notification_time(notification.timestamp);

    for upd in &notification.update {
        let path = upd.path.as_ref().map(flatten_path).unwrap_or_default();
        let fqn = format!("{}{}", prefix, path);
        let payload = upd.val.as_ref().map(|v| v.json_bytes()).unwrap_or(&[]);
        update_cb(&fqn, ts, payload);
    }

    for del in &notification.delete {
        let fqn = format!("{}{}", prefix, flatten_path(del));
        delete_cb(&fqn, ts);
    }
}
