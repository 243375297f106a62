//! gNMI wire data model.
//!
//! Hand-written subset of the gNMI protobuf messages, with the canonical
//! field tags, covering what a dial-out collector consumes: a stream of
//! [`SubscribeResponse`] messages whose `update` variant carries one
//! [`Notification`]. Fields this exporter never reads (aliases, extensions,
//! deprecated value encodings) are left out; prost skips unknown fields on
//! decode, so frames produced by a full gNMI implementation still decode
//! cleanly.

use std::collections::HashMap;

/// One telemetry batch from a device: a timestamp, an optional path prefix,
/// and ordered lists of updated and deleted paths.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch, as reported by the device.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,

    /// Prefix prepended to every update and delete path.
    #[prost(message, optional, tag = "2")]
    pub prefix: Option<Path>,

    /// Updated paths with their new values, in source order.
    #[prost(message, repeated, tag = "4")]
    pub update: Vec<Update>,

    /// Deleted paths, in source order.
    #[prost(message, repeated, tag = "5")]
    pub delete: Vec<Path>,
}

/// A hierarchical path addressing one measurement point on a device.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Path {
    #[prost(message, repeated, tag = "3")]
    pub elem: Vec<PathElem>,
}

/// One element of a [`Path`]: a name plus optional key/value pairs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PathElem {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(map = "string, string", tag = "2")]
    pub key: HashMap<String, String>,
}

/// A path paired with its new value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(message, optional, tag = "1")]
    pub path: Option<Path>,

    #[prost(message, optional, tag = "3")]
    pub val: Option<TypedValue>,
}

/// A typed gNMI value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TypedValue {
    #[prost(oneof = "typed_value::Value", tags = "1, 2, 3, 4, 5, 10, 11, 12, 14")]
    pub value: Option<typed_value::Value>,
}

pub mod typed_value {
    /// The set of value encodings this collector understands.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(string, tag = "1")]
        StringVal(String),
        #[prost(int64, tag = "2")]
        IntVal(i64),
        #[prost(uint64, tag = "3")]
        UintVal(u64),
        #[prost(bool, tag = "4")]
        BoolVal(bool),
        #[prost(bytes, tag = "5")]
        BytesVal(Vec<u8>),
        #[prost(bytes, tag = "10")]
        JsonVal(Vec<u8>),
        #[prost(bytes, tag = "11")]
        JsonIetfVal(Vec<u8>),
        #[prost(string, tag = "12")]
        AsciiVal(String),
        #[prost(double, tag = "14")]
        DoubleVal(f64),
    }
}

impl TypedValue {
    /// The JSON payload carried by this value, or an empty slice when the
    /// value uses a non-JSON encoding. Devices emit measurements as
    /// JSON-IETF blobs; plain JSON is accepted as well.
    pub fn json_bytes(&self) -> &[u8] {
        match &self.value {
            Some(typed_value::Value::JsonIetfVal(b)) => b,
            Some(typed_value::Value::JsonVal(b)) => b,
            _ => &[],
        }
    }
}

/// One message on a dial-out stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeResponse {
    #[prost(oneof = "subscribe_response::Response", tags = "1, 3")]
    pub response: Option<subscribe_response::Response>,
}

pub mod subscribe_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        /// A telemetry batch.
        #[prost(message, tag = "1")]
        Update(super::Notification),
        /// End-of-initial-sync marker; carries no telemetry.
        #[prost(bool, tag = "3")]
        SyncResponse(bool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_subscribe_response_round_trip() {
        let notification = Notification {
            timestamp: 1_720_382_350_000_000_000,
            prefix: None,
            update: vec![Update {
                path: Some(Path {
                    elem: vec![PathElem {
                        name: "state".to_string(),
                        key: HashMap::new(),
                    }],
                }),
                val: Some(TypedValue {
                    value: Some(typed_value::Value::JsonIetfVal(b"{\"speed\":100}".to_vec())),
                }),
            }],
            delete: vec![],
        };

        let response = SubscribeResponse {
            response: Some(subscribe_response::Response::Update(notification.clone())),
        };

        let bytes = response.encode_to_vec();
        let decoded = SubscribeResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, response);

        match decoded.response {
            Some(subscribe_response::Response::Update(n)) => {
                assert_eq!(n, notification);
                assert_eq!(n.update[0].val.as_ref().unwrap().json_bytes(), b"{\"speed\":100}");
            }
            other => panic!("unexpected response variant: {:?}", other),
        }
    }

    #[test]
    fn test_json_bytes_non_json_value() {
        let val = TypedValue {
            value: Some(typed_value::Value::StringVal("text".to_string())),
        };
        assert!(val.json_bytes().is_empty());

        let empty = TypedValue { value: None };
        assert!(empty.json_bytes().is_empty());
    }
}
