use peercall_media::{IceCandidate, SdpType, SessionDescription};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SignalError;
use crate::sdp_codec::{self, CodecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Topic {
    CallRequest,
    CallAccept,
    SessionStartRequest,
    SessionStartAccept,
    NewIceCandidate,
    SessionEnd,
}

impl Topic {
    /// Subscribed on the local channel for the lifetime of the app.
    pub(crate) const DIRECTORY: [Topic; 2] = [Topic::CallRequest, Topic::CallAccept];

    /// Subscribed on the local channel for the lifetime of one call.
    pub(crate) const CALL: [Topic; 4] = [
        Topic::SessionStartRequest,
        Topic::SessionStartAccept,
        Topic::NewIceCandidate,
        Topic::SessionEnd,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Topic::CallRequest => "callRequest",
            Topic::CallAccept => "callAccept",
            Topic::SessionStartRequest => "sessionStartRequest",
            Topic::SessionStartAccept => "sessionStartAccept",
            Topic::NewIceCandidate => "newIceCandidate",
            Topic::SessionEnd => "sessionEnd",
        }
    }

    pub(crate) fn parse(topic: &str) -> Option<Self> {
        Some(match topic {
            "callRequest" => Topic::CallRequest,
            "callAccept" => Topic::CallAccept,
            "sessionStartRequest" => Topic::SessionStartRequest,
            "sessionStartAccept" => Topic::SessionStartAccept,
            "newIceCandidate" => Topic::NewIceCandidate,
            "sessionEnd" => Topic::SessionEnd,
            _ => return None,
        })
    }
}

/// `{type, sdp}` with the sdp text compressed for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CompactDescription {
    #[serde(rename = "type")]
    pub(crate) sdp_type: SdpType,
    pub(crate) sdp: String,
}

impl CompactDescription {
    pub(crate) fn compress(desc: &SessionDescription, limit: usize) -> Result<Self, CodecError> {
        Ok(Self {
            sdp_type: desc.sdp_type,
            sdp: sdp_codec::compress_within(&desc.sdp, limit)?,
        })
    }

    pub(crate) fn decompress(&self) -> Result<SessionDescription, CodecError> {
        Ok(SessionDescription {
            sdp_type: self.sdp_type,
            sdp: sdp_codec::decompress(&self.sdp)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Signal {
    CallRequest,
    CallAccept,
    SessionStartRequest(CompactDescription),
    SessionStartAccept(CompactDescription),
    NewIceCandidate(IceCandidate),
    SessionEnd,
}

impl Signal {
    pub(crate) fn topic(&self) -> Topic {
        match self {
            Signal::CallRequest => Topic::CallRequest,
            Signal::CallAccept => Topic::CallAccept,
            Signal::SessionStartRequest(_) => Topic::SessionStartRequest,
            Signal::SessionStartAccept(_) => Topic::SessionStartAccept,
            Signal::NewIceCandidate(_) => Topic::NewIceCandidate,
            Signal::SessionEnd => Topic::SessionEnd,
        }
    }

    pub(crate) fn decode(topic: &str, payload: &Value) -> Result<Self, SignalError> {
        let topic = Topic::parse(topic).ok_or_else(|| SignalError::UnknownTopic(topic.into()))?;
        let malformed = |reason: String| SignalError::Malformed {
            topic: topic.as_str(),
            reason,
        };
        match topic {
            Topic::CallRequest => Ok(Signal::CallRequest),
            Topic::CallAccept => Ok(Signal::CallAccept),
            Topic::SessionEnd => Ok(Signal::SessionEnd),
            Topic::SessionStartRequest | Topic::SessionStartAccept => {
                let desc: CompactDescription = serde_json::from_value(payload.clone())
                    .map_err(|e| malformed(e.to_string()))?;
                let expected = if topic == Topic::SessionStartRequest {
                    SdpType::Offer
                } else {
                    SdpType::Answer
                };
                if desc.sdp_type != expected {
                    return Err(malformed(format!(
                        "expected {}, got {}",
                        expected.as_str(),
                        desc.sdp_type.as_str()
                    )));
                }
                Ok(if expected == SdpType::Offer {
                    Signal::SessionStartRequest(desc)
                } else {
                    Signal::SessionStartAccept(desc)
                })
            }
            Topic::NewIceCandidate => {
                // Peers send the candidate as a JSON string; accept a bare
                // object as well.
                let candidate = match payload {
                    Value::String(text) => serde_json::from_str::<IceCandidate>(text),
                    other => serde_json::from_value::<IceCandidate>(other.clone()),
                }
                .map_err(|e| malformed(e.to_string()))?;
                Ok(Signal::NewIceCandidate(candidate))
            }
        }
    }

    pub(crate) fn payload(&self) -> Result<Value, SignalError> {
        let encode = |e: serde_json::Error| SignalError::Malformed {
            topic: self.topic().as_str(),
            reason: e.to_string(),
        };
        match self {
            Signal::CallRequest | Signal::CallAccept | Signal::SessionEnd => Ok(json!({})),
            Signal::SessionStartRequest(desc) | Signal::SessionStartAccept(desc) => {
                serde_json::to_value(desc).map_err(encode)
            }
            Signal::NewIceCandidate(candidate) => serde_json::to_string(candidate)
                .map(Value::String)
                .map_err(encode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.0.2.10 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn control_topics_carry_empty_objects() {
        assert_eq!(Signal::CallRequest.payload().unwrap(), json!({}));
        assert_eq!(Signal::SessionEnd.payload().unwrap(), json!({}));
        assert_eq!(
            Signal::decode("callAccept", &json!({ "ignored": true })).unwrap(),
            Signal::CallAccept
        );
    }

    #[test]
    fn candidate_travels_as_a_json_string() {
        let payload = Signal::NewIceCandidate(candidate()).payload().unwrap();
        let Value::String(text) = &payload else {
            panic!("expected string payload, got {payload}");
        };
        assert!(text.contains("\"sdpMLineIndex\":0"));
        assert_eq!(
            Signal::decode("newIceCandidate", &payload).unwrap(),
            Signal::NewIceCandidate(candidate())
        );
    }

    #[test]
    fn candidate_object_payload_is_accepted() {
        let payload = serde_json::to_value(candidate()).unwrap();
        assert_eq!(
            Signal::decode("newIceCandidate", &payload).unwrap(),
            Signal::NewIceCandidate(candidate())
        );
    }

    #[test]
    fn session_payloads_carry_compressed_sdp() {
        let desc = SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n");
        let compact = CompactDescription::compress(&desc, 1024).unwrap();
        let payload = Signal::SessionStartRequest(compact).payload().unwrap();
        assert_eq!(payload["type"], "offer");
        assert_ne!(payload["sdp"], desc.sdp.as_str());

        let Signal::SessionStartRequest(decoded) =
            Signal::decode("sessionStartRequest", &payload).unwrap()
        else {
            panic!("expected sessionStartRequest");
        };
        assert_eq!(decoded.decompress().unwrap(), desc);
    }

    #[test]
    fn wrong_description_type_for_topic_is_malformed() {
        let payload = json!({ "type": "answer", "sdp": "H4sI" });
        assert!(matches!(
            Signal::decode("sessionStartRequest", &payload),
            Err(SignalError::Malformed { topic: "sessionStartRequest", .. })
        ));
    }

    #[test]
    fn garbage_is_rejected_not_swallowed() {
        assert!(matches!(
            Signal::decode("newIceCandidate", &json!("{not json")),
            Err(SignalError::Malformed { .. })
        ));
        assert!(matches!(
            Signal::decode("sessionStartAccept", &json!(42)),
            Err(SignalError::Malformed { .. })
        ));
        assert!(matches!(
            Signal::decode("ringRing", &json!({})),
            Err(SignalError::UnknownTopic(_))
        ));
    }
}
