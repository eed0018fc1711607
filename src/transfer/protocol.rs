//! Transfer Protocol
//!
//! Control messages exchanged once per connection, before any payload bytes.
//! Each message is a compact JSON object preceded by its length as a
//! 4-byte little-endian integer.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest accepted control message body
pub const MAX_CONTROL_SIZE: usize = 64 * 1024;

/// Action name of a file download
pub const ACTION_REQUEST_FILE: &str = "REQUEST_FILE";
/// Action name of a file upload
pub const ACTION_SEND_FILE: &str = "SEND_FILE";

/// Request sent by the connecting side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Ask the server for a file
    RequestFile { filename: String },

    /// Push `filesize` bytes of a file to the server
    SendFile {
        filename: String,
        filesize: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
}

/// Request as it appears on the wire, before the action is recognized
#[derive(Debug, Deserialize)]
struct RawRequest {
    action: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    checksum: Option<String>,
}

/// Server reply to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// File follows: exactly `filesize` bytes
    Ok {
        filename: String,
        filesize: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },

    /// The server does not hold the file; no body follows
    NotFound { filename: String },

    /// The request could not be processed
    Error { message: String },
}

impl Request {
    /// Wire action name
    pub fn action(&self) -> &'static str {
        match self {
            Request::RequestFile { .. } => ACTION_REQUEST_FILE,
            Request::SendFile { .. } => ACTION_SEND_FILE,
        }
    }

    /// Serialize to the JSON body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a JSON body.
    ///
    /// Unrecognized actions yield [`Error::UnknownAction`] so the server can
    /// answer them explicitly; other malformed bodies yield [`Error::Protocol`].
    pub fn decode(body: &[u8]) -> Result<Self> {
        let raw: RawRequest = serde_json::from_slice(body)
            .map_err(|e| Error::Protocol(format!("malformed request: {}", e)))?;

        let filename = || {
            raw.filename
                .clone()
                .ok_or_else(|| Error::Protocol(format!("{} without filename", raw.action)))
        };

        match raw.action.as_str() {
            ACTION_REQUEST_FILE => Ok(Request::RequestFile {
                filename: filename()?,
            }),
            ACTION_SEND_FILE => Ok(Request::SendFile {
                filename: filename()?,
                filesize: raw
                    .filesize
                    .ok_or_else(|| Error::Protocol("SEND_FILE without filesize".into()))?,
                checksum: raw.checksum.clone(),
            }),
            _ => Err(Error::UnknownAction(raw.action.clone())),
        }
    }
}

impl Response {
    /// Serialize to the JSON body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a JSON body
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::Protocol(format!("malformed response: {}", e)))
    }

    /// Short status name for logging
    pub fn status_name(&self) -> &'static str {
        match self {
            Response::Ok { .. } => "OK",
            Response::NotFound { .. } => "NOT_FOUND",
            Response::Error { .. } => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req = Request::RequestFile {
            filename: "a.txt".to_string(),
        };
        let json: serde_json::Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"action": "REQUEST_FILE", "filename": "a.txt"}));

        let req = Request::SendFile {
            filename: "b.bin".to_string(),
            filesize: 42,
            checksum: None,
        };
        let json: serde_json::Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "SEND_FILE", "filename": "b.bin", "filesize": 42})
        );
    }

    #[test]
    fn test_response_wire_format() {
        let ok = Response::Ok {
            filename: "a.txt".to_string(),
            filesize: 3,
            checksum: Some("abc".to_string()),
        };
        let json: serde_json::Value = serde_json::from_slice(&ok.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"status": "OK", "filename": "a.txt", "filesize": 3, "checksum": "abc"})
        );

        let missing = Response::decode(br#"{"status":"NOT_FOUND","filename":"missing.txt"}"#).unwrap();
        assert_eq!(
            missing,
            Response::NotFound {
                filename: "missing.txt".to_string()
            }
        );
    }

    #[test]
    fn test_decode_legacy_request_without_checksum() {
        let req = Request::decode(br#"{"action":"SEND_FILE","filename":"x","filesize":10}"#).unwrap();
        assert_eq!(
            req,
            Request::SendFile {
                filename: "x".to_string(),
                filesize: 10,
                checksum: None
            }
        );
        assert_eq!(req.action(), ACTION_SEND_FILE);
    }

    #[test]
    fn test_unknown_action() {
        let err = Request::decode(br#"{"action":"FILE_LIST","file_list":[]}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownAction(ref a) if a == "FILE_LIST"));
    }

    #[test]
    fn test_missing_fields_are_protocol_errors() {
        assert!(matches!(
            Request::decode(br#"{"action":"SEND_FILE","filename":"x"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(Request::decode(b"not json"), Err(Error::Protocol(_))));
    }
}
