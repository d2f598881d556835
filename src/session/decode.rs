use thiserror::Error;

use crate::gnmi::proto::{subscribe_response, typed_value, SubscribeResponse, TypedValue};
use crate::model::InterfaceState;

/// A single telemetry value that could not be turned into an interface state.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid interface state JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a subscribe response means to the session loop.
#[derive(Debug)]
pub enum Message {
    /// One decode result per JSON-carrying value, in arrival order.
    Updates(Vec<Result<InterfaceState, DecodeError>>),
    /// Initial sync finished.
    SyncComplete,
    /// Stream-level error reported in-band by the device.
    Error(String),
    /// Nothing this exporter cares about.
    Empty,
}

/// Classifies a subscribe response and decodes any interface states it carries.
pub fn classify(response: SubscribeResponse) -> Message {
    match response.response {
        Some(subscribe_response::Response::Update(notification)) => Message::Updates(
            notification
                .update
                .iter()
                .filter_map(|update| update.val.as_ref())
                .filter_map(decode_value)
                .collect(),
        ),
        Some(subscribe_response::Response::SyncResponse(_)) => Message::SyncComplete,
        Some(subscribe_response::Response::Error(err)) => {
            Message::Error(format!("code {}: {}", err.code, err.message))
        }
        None => Message::Empty,
    }
}

/// Decodes a JSON (or JSON_IETF) value; other encodings yield `None`.
pub fn decode_value(value: &TypedValue) -> Option<Result<InterfaceState, DecodeError>> {
    match value.value.as_ref()? {
        typed_value::Value::JsonVal(bytes) | typed_value::Value::JsonIetfVal(bytes) => {
            Some(serde_json::from_slice(bytes).map_err(DecodeError::from))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnmi::proto::{Error as StreamError, Notification, Update};
    use crate::model::LinkStatus;

    fn json(body: &str) -> Update {
        Update {
            val: Some(TypedValue {
                value: Some(typed_value::Value::JsonVal(body.as_bytes().to_vec())),
            }),
            ..Default::default()
        }
    }

    fn notification(updates: Vec<Update>) -> SubscribeResponse {
        SubscribeResponse {
            response: Some(subscribe_response::Response::Update(Notification {
                update: updates,
                ..Default::default()
            })),
        }
    }

    #[test]
    fn test_decode_interface_state() {
        let msg = classify(notification(vec![json(
            r#"{"name":"eth1","admin-status":"UP","oper-status":"DOWN"}"#,
        )]));

        let Message::Updates(results) = msg else {
            panic!("expected updates, got {msg:?}");
        };
        assert_eq!(results.len(), 1);
        let state = results[0].as_ref().expect("decodes");
        assert_eq!(state.name, "eth1");
        assert_eq!(state.admin_status, LinkStatus::Up);
        assert_eq!(state.oper_status, LinkStatus::Down);
    }

    #[test]
    fn test_one_bad_value_in_batch() {
        let msg = classify(notification(vec![
            json(r#"{"name":"eth1","admin-status":"UP","oper-status":"UP"}"#),
            json("{not json"),
            json(r#"{"name":"eth3","admin-status":"DOWN","oper-status":"DOWN"}"#),
        ]));

        let Message::Updates(results) = msg else {
            panic!("expected updates, got {msg:?}");
        };
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(DecodeError::Json(_))));
        assert_eq!(results[2].as_ref().expect("decodes").name, "eth3");
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let value = TypedValue {
            value: Some(typed_value::Value::JsonVal(
                br#"{"admin-status":"UP"}"#.to_vec(),
            )),
        };
        assert!(matches!(decode_value(&value), Some(Err(_))));
    }

    #[test]
    fn test_missing_statuses_default_and_extra_fields_ignored() {
        let value = TypedValue {
            value: Some(typed_value::Value::JsonIetfVal(
                br#"{"name":"eth9","mtu":9000}"#.to_vec(),
            )),
        };
        let state = decode_value(&value).expect("json value").expect("decodes");
        assert_eq!(state.name, "eth9");
        assert_eq!(state.admin_status, LinkStatus::default());
        assert_eq!(state.oper_status.gauge_value(), 0.0);
    }

    #[test]
    fn test_non_json_values_skipped() {
        let msg = classify(notification(vec![
            Update {
                val: Some(TypedValue {
                    value: Some(typed_value::Value::StringVal("UP".to_string())),
                }),
                ..Default::default()
            },
            Update::default(),
        ]));
        let Message::Updates(results) = msg else {
            panic!("expected updates, got {msg:?}");
        };
        assert!(results.is_empty());
    }

    #[test]
    fn test_sync_error_and_empty() {
        let sync = SubscribeResponse {
            response: Some(subscribe_response::Response::SyncResponse(true)),
        };
        assert!(matches!(classify(sync), Message::SyncComplete));

        let err = SubscribeResponse {
            response: Some(subscribe_response::Response::Error(StreamError {
                code: 14,
                message: "unavailable".to_string(),
            })),
        };
        let Message::Error(text) = classify(err) else {
            panic!("expected error");
        };
        assert_eq!(text, "code 14: unavailable");

        assert!(matches!(classify(SubscribeResponse::default()), Message::Empty));
    }
}
