//! JSON-RPC 2.0 framing
//!
//! The SPV server protocol is newline-delimited JSON-RPC 2.0 over TCP.
//! Requests carry a numeric id; server pushes arrive as notifications
//! without one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NetworkError;

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

/// Encode one request as a single wire line (without the trailing newline).
pub fn encode_request(id: u64, method: &str, params: &[Value]) -> Result<String, NetworkError> {
    let request = Request {
        jsonrpc: "2.0",
        id,
        method,
        params,
    };
    serde_json::to_string(&request).map_err(|e| NetworkError::Protocol(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Vec<Value>,
    result: Option<Value>,
    error: Option<ErrorBody>,
}

/// A decoded incoming frame.
#[derive(Debug)]
pub enum Incoming {
    /// Reply matched to a request by id.
    Response {
        id: u64,
        result: Result<Value, ErrorBody>,
    },
    /// Unsolicited server push: method name plus positional args.
    Notification { method: String, params: Vec<Value> },
}

/// Decode one wire line.
pub fn decode(line: &str) -> Result<Incoming, NetworkError> {
    let frame: RawFrame =
        serde_json::from_str(line).map_err(|e| NetworkError::Protocol(e.to_string()))?;

    // A frame carrying a method is a server push; only method-less frames
    // are replies to our own requests.
    match (frame.method, frame.id) {
        (Some(method), _) => Ok(Incoming::Notification {
            method,
            params: frame.params,
        }),
        (None, Some(id)) => {
            let result = match frame.error {
                Some(body) => Err(body),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            };
            Ok(Incoming::Response { id, result })
        }
        (None, None) => Err(NetworkError::Protocol(
            "frame carries neither an id nor a method".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_shape() {
        let line = encode_request(7, "blockchain.address.get_history", &[json!("addr1")]).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "blockchain.address.get_history");
        assert_eq!(value["params"], json!(["addr1"]));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_decode_response() {
        let incoming = decode(r#"{"jsonrpc":"2.0","id":3,"result":["ElectrumX 1.15.0","1.4"]}"#)
            .unwrap();
        match incoming {
            Incoming::Response { id, result } => {
                assert_eq!(id, 3);
                assert_eq!(result.unwrap(), json!(["ElectrumX 1.15.0", "1.4"]));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let incoming =
            decode(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"unknown method"}}"#)
                .unwrap();
        match incoming {
            Incoming::Response { id, result } => {
                assert_eq!(id, 4);
                let body = result.unwrap_err();
                assert_eq!(body.code, -32601);
                assert_eq!(body.message, "unknown method");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let incoming = decode(
            r#"{"jsonrpc":"2.0","method":"blockchain.headers.subscribe","params":[{"height":500}]}"#,
        )
        .unwrap();
        match incoming {
            Incoming::Notification { method, params } => {
                assert_eq!(method, "blockchain.headers.subscribe");
                assert_eq!(params, vec![json!({"height": 500})]);
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        assert!(matches!(decode("not json"), Err(NetworkError::Protocol(_))));
        assert!(matches!(
            decode(r#"{"jsonrpc":"2.0"}"#),
            Err(NetworkError::Protocol(_))
        ));
    }
}
