//! Reply grammar: `TOPIC VERB KEY=VALUE ...` lines from the bridge.

use crate::identity::{Destination, KeyPair};

/// Reply that does not match the expected success grammar. The raw line is always kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    #[error("malformed reply: {0:?}")]
    Malformed(String),
    #[error("expected {expected} reply, got {line:?}")]
    Unexpected { expected: &'static str, line: String },
    #[error("bridge returned {result}: {line:?}")]
    Failed {
        result: String,
        message: Option<String>,
        line: String,
    },
    #[error("reply missing {key}: {line:?}")]
    MissingField { key: &'static str, line: String },
}

/// Split on spaces, keeping double-quoted runs together (`MESSAGE="a b"`).
fn tokenize(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    for ch in line.trim().chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Value of the first `key=value` field whose key matches. Fields are space-split and the
/// value is everything after the first `=`.
pub fn extract_pair<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_whitespace().find_map(|field| {
        let (k, v) = field.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Integer value of `key`, if present and numeric.
pub fn extract_pair_int(line: &str, key: &str) -> Option<u16> {
    extract_pair(line, key)?.parse().ok()
}

/// First whitespace-delimited field (the destination on an accept line).
pub fn extract_dest(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub topic: String,
    pub verb: String,
    pairs: Vec<(String, String)>,
    raw: String,
}

impl Reply {
    pub fn parse(line: &str) -> Result<Self, ReplyError> {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let mut tokens = tokenize(&raw).into_iter();
        let (Some(topic), Some(verb)) = (tokens.next(), tokens.next()) else {
            return Err(ReplyError::Malformed(raw));
        };
        let pairs = tokens
            .map(|t| match t.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (t, String::new()),
            })
            .collect();
        Ok(Reply {
            topic,
            verb,
            pairs,
            raw,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn result(&self) -> Option<&str> {
        self.get("RESULT")
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn require(&self, key: &'static str) -> Result<&str, ReplyError> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ReplyError::MissingField {
                key,
                line: self.raw.clone(),
            }),
        }
    }

    /// Check topic/verb and, when a `RESULT=` is present, that it is `OK`.
    pub fn expect(line: &str, topic: &str, verb: &str) -> Result<Self, ReplyError> {
        let reply = Reply::parse(line)?;
        if reply.topic != topic || reply.verb != verb {
            return Err(ReplyError::Unexpected {
                expected: expected_name(topic),
                line: reply.raw,
            });
        }
        if let Some(result) = reply.result().filter(|r| *r != "OK") {
            return Err(ReplyError::Failed {
                result: result.to_string(),
                message: reply.get("MESSAGE").map(str::to_string),
                line: reply.raw.clone(),
            });
        }
        Ok(reply)
    }
}

fn expected_name(topic: &str) -> &'static str {
    match topic {
        "HELLO" => "HELLO REPLY",
        "SESSION" => "SESSION STATUS",
        "STREAM" => "STREAM STATUS",
        "DEST" => "DEST REPLY",
        "NAMING" => "NAMING REPLY",
        _ => "bridge",
    }
}

/// `HELLO REPLY RESULT=OK VERSION=3.x` -> negotiated version string.
pub fn parse_hello(line: &str) -> Result<String, ReplyError> {
    let reply = Reply::expect(line, "HELLO", "REPLY")?;
    if reply.result() != Some("OK") {
        return Err(ReplyError::MissingField {
            key: "RESULT",
            line: reply.raw,
        });
    }
    Ok(reply.get("VERSION").unwrap_or_default().to_string())
}

/// `SESSION STATUS RESULT=OK DESTINATION=<private>` -> private destination, if echoed.
pub fn parse_session_status(line: &str) -> Result<Option<String>, ReplyError> {
    let reply = Reply::expect(line, "SESSION", "STATUS")?;
    if reply.result() != Some("OK") {
        return Err(ReplyError::MissingField {
            key: "RESULT",
            line: reply.raw,
        });
    }
    Ok(reply
        .get("DESTINATION")
        .filter(|d| !d.is_empty())
        .map(str::to_string))
}

/// `STREAM STATUS RESULT=OK`.
pub fn parse_stream_status(line: &str) -> Result<(), ReplyError> {
    let reply = Reply::expect(line, "STREAM", "STATUS")?;
    if reply.result() != Some("OK") {
        return Err(ReplyError::MissingField {
            key: "RESULT",
            line: reply.raw,
        });
    }
    Ok(())
}

/// `DEST REPLY PUB=<public> PRIV=<private>`.
pub fn parse_dest_reply(line: &str) -> Result<KeyPair, ReplyError> {
    let reply = Reply::expect(line, "DEST", "REPLY")?;
    let public = Destination::parse(reply.require("PUB")?).ok_or_else(|| {
        ReplyError::MissingField {
            key: "PUB",
            line: reply.raw.clone(),
        }
    })?;
    let private = reply.require("PRIV")?.to_string();
    Ok(KeyPair::new(public, private))
}

/// `NAMING REPLY RESULT=OK NAME=.. VALUE=<destination>`.
pub fn parse_naming_reply(line: &str) -> Result<Destination, ReplyError> {
    let reply = Reply::expect(line, "NAMING", "REPLY")?;
    let value = reply.require("VALUE")?;
    Destination::parse(value).ok_or_else(|| ReplyError::MissingField {
        key: "VALUE",
        line: reply.raw.clone(),
    })
}

/// Remote side of an accepted stream, from the line after `STREAM STATUS RESULT=OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPeer {
    pub destination: Destination,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
}

impl StreamPeer {
    /// `<destination> [FROM_PORT=n] [TO_PORT=n]`
    pub fn parse(line: &str) -> Result<Self, ReplyError> {
        let destination = Destination::parse(extract_dest(line)).ok_or_else(|| {
            ReplyError::MissingField {
                key: "destination",
                line: line.trim_end().to_string(),
            }
        })?;
        Ok(StreamPeer {
            destination,
            from_port: extract_pair_int(line, "FROM_PORT"),
            to_port: extract_pair_int(line, "TO_PORT"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_pair_takes_matching_field() {
        let line = "abc.b32.i2p FROM_PORT=10 TO_PORT=20\n";
        assert_eq!(extract_pair(line, "FROM_PORT"), Some("10"));
        assert_eq!(extract_pair(line, "TO_PORT"), Some("20"));
        assert_eq!(extract_pair(line, "PORT"), None);
        assert_eq!(extract_pair("KEY=a=b", "KEY"), Some("a=b"));
        assert_eq!(extract_pair_int("X=notnum", "X"), None);
        assert_eq!(extract_dest(line), "abc.b32.i2p");
    }

    #[test]
    fn hello_ok() {
        assert_eq!(
            parse_hello("HELLO REPLY RESULT=OK VERSION=3.3\n").unwrap(),
            "3.3"
        );
    }

    #[test]
    fn hello_noversion_is_failure() {
        let err = parse_hello("HELLO REPLY RESULT=NOVERSION\n").unwrap_err();
        assert_eq!(
            err,
            ReplyError::Failed {
                result: "NOVERSION".into(),
                message: None,
                line: "HELLO REPLY RESULT=NOVERSION".into()
            }
        );
    }

    #[test]
    fn failure_keeps_quoted_message() {
        let err = parse_session_status(
            "SESSION STATUS RESULT=DUPLICATED_ID MESSAGE=\"id in use\"\n",
        )
        .unwrap_err();
        match err {
            ReplyError::Failed {
                result, message, ..
            } => {
                assert_eq!(result, "DUPLICATED_ID");
                assert_eq!(message.as_deref(), Some("id in use"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn session_status_destination() {
        assert_eq!(
            parse_session_status("SESSION STATUS RESULT=OK DESTINATION=privkey\n").unwrap(),
            Some("privkey".to_string())
        );
        assert_eq!(
            parse_session_status("SESSION STATUS RESULT=OK\n").unwrap(),
            None
        );
    }

    #[test]
    fn wrong_topic_is_unexpected() {
        assert!(matches!(
            parse_stream_status("SESSION STATUS RESULT=OK\n"),
            Err(ReplyError::Unexpected { .. })
        ));
        assert!(matches!(
            parse_stream_status("garbage"),
            Err(ReplyError::Malformed(_))
        ));
        assert!(matches!(
            parse_stream_status("STREAM STATUS\n"),
            Err(ReplyError::MissingField { key: "RESULT", .. })
        ));
    }

    #[test]
    fn dest_reply() {
        let kp = parse_dest_reply("DEST REPLY PUB=pubkey PRIV=privkey\n").unwrap();
        assert_eq!(kp.public().as_str(), "pubkey");
        assert_eq!(kp.private(), "privkey");
        assert!(parse_dest_reply("DEST REPLY PUB=pubkey\n").is_err());
    }

    #[test]
    fn naming_reply() {
        let d = parse_naming_reply("NAMING REPLY RESULT=OK NAME=site.i2p VALUE=destvalue\n")
            .unwrap();
        assert_eq!(d.as_str(), "destvalue");
        assert!(matches!(
            parse_naming_reply("NAMING REPLY RESULT=KEY_NOT_FOUND NAME=nope.i2p\n"),
            Err(ReplyError::Failed { .. })
        ));
    }

    #[test]
    fn stream_peer_line() {
        let p = StreamPeer::parse("abcdef.b32.i2p FROM_PORT=10 TO_PORT=20\n").unwrap();
        assert_eq!(p.destination.as_str(), "abcdef.b32.i2p");
        assert_eq!(p.from_port, Some(10));
        assert_eq!(p.to_port, Some(20));
        let bare = StreamPeer::parse("abcdef.b32.i2p\n").unwrap();
        assert_eq!(bare.from_port, None);
        assert!(StreamPeer::parse("\n").is_err());
    }
}
